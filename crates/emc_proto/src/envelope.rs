//! The outer base64 envelope (§4.1, §6.2): a fixed-size printable wrapper
//! around one 49,152-byte frame. Everything the transport actually moves is
//! this string — no JSON, no additional framing.

use base64::{engine::general_purpose::STANDARD, Engine as _};

use crate::codec::{ENCODED_SIZE, UNENCODED_SIZE};
use crate::error::CodecError;

/// Base64-encode a complete frame into the fixed-size envelope string.
///
/// [`UNENCODED_SIZE`] (49,152) is divisible by 3, so standard base64 never
/// emits a padding `=` and the output is always exactly [`ENCODED_SIZE`]
/// (65,536) characters (§6.2: "no padding byte surprises").
pub fn encode_envelope(frame: &[u8; UNENCODED_SIZE]) -> String {
    let encoded = STANDARD.encode(frame);
    debug_assert_eq!(encoded.len(), ENCODED_SIZE);
    encoded
}

/// Decode an envelope string back into a frame, rejecting anything that
/// isn't exactly [`ENCODED_SIZE`] characters of standard, unpadded base64.
pub fn decode_envelope(envelope: &str) -> Result<[u8; UNENCODED_SIZE], CodecError> {
    if envelope.len() != ENCODED_SIZE {
        return Err(CodecError::BadPacketSize);
    }
    let decoded = STANDARD
        .decode(envelope.as_bytes())
        .map_err(|_| CodecError::BadPacketSize)?;
    if decoded.len() != UNENCODED_SIZE {
        return Err(CodecError::BadPacketSize);
    }
    let mut frame = [0u8; UNENCODED_SIZE];
    frame.copy_from_slice(&decoded);
    Ok(frame)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_is_exact_size() {
        let frame = [7u8; UNENCODED_SIZE];
        let encoded = encode_envelope(&frame);
        assert_eq!(encoded.len(), ENCODED_SIZE);
        assert!(!encoded.contains('='));
        let decoded = decode_envelope(&encoded).unwrap();
        assert_eq!(decoded, frame);
    }

    #[test]
    fn rejects_wrong_length() {
        assert!(matches!(decode_envelope("short"), Err(CodecError::BadPacketSize)));
    }

    #[test]
    fn rejects_malformed_base64() {
        let bad = "?".repeat(ENCODED_SIZE);
        assert!(decode_envelope(&bad).is_err());
    }
}
