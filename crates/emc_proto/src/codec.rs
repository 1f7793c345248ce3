//! Byte-exact outer/inner packet framing (§4.1).
//!
//! An outer packet is `type:u8 || plen:u16(BE) || packet_count:u32(BE) ||
//! payload[plen]`. A valid frame is a fixed sequence of six outer packets,
//! `packet_count` starting at 0 and incrementing by one per packet.

use emc_crypto::rand_source::RandReader;

use crate::error::CodecError;

// ── Outer packet types ───────────────────────────────────────────────────────

pub const OUTER_PRE_HEADER: u8 = 1;
pub const OUTER_ENCRYPTED_HEADER: u8 = 2;
pub const OUTER_CRYPTO_SETUP: u8 = 4;
pub const OUTER_ENCRYPTED_PACKET: u8 = 16;
pub const OUTER_HMAC: u8 = 8;

/// The fixed sequence of outer-packet types a valid frame carries, in
/// order. Two `EncryptedPacket`s appear back to back: content, then
/// signature-or-padding.
pub const OUTER_SEQUENCE: [u8; 6] = [
    OUTER_PRE_HEADER,
    OUTER_ENCRYPTED_HEADER,
    OUTER_CRYPTO_SETUP,
    OUTER_ENCRYPTED_PACKET,
    OUTER_ENCRYPTED_PACKET,
    OUTER_HMAC,
];

const OUTER_HEADER_LEN: usize = 1 + 2 + 4;

// ── Fixed sizes (§4.1) ───────────────────────────────────────────────────────

pub const PRE_HEADER_PACKET_SIZE: usize = 73;
pub const ENCRYPTED_HEADER_PACKET_SIZE: usize = 7201;
pub const CRYPTO_SETUP_PACKET_SIZE: usize = 23;
pub const CONTENT_PACKET_SIZE: usize = 41708;
pub const SIGNATURE_PACKET_SIZE: usize = 76;
pub const HMAC_PACKET_SIZE: usize = 71;

pub const UNENCODED_SIZE: usize = 49152;
pub const ENCODED_SIZE: usize = 65536;

pub const BOX_NONCE_LEN: usize = 24;
pub const ENCRYPTED_HEADER_CIPHERTEXT_SIZE: usize = 7168;
pub const CRYPTO_SETUP_IV_LEN: usize = 16;

/// Inner-packet capacity of the first `EncryptedPacket` (content + its
/// trailing padding inner packet), derived from [`CONTENT_PACKET_SIZE`].
pub const CONTENT_INNER_CAPACITY: usize = CONTENT_PACKET_SIZE - OUTER_HEADER_LEN;
/// Inner-packet capacity of the second `EncryptedPacket` (signature or
/// padding-only), derived from [`SIGNATURE_PACKET_SIZE`].
pub const SIGNATURE_INNER_CAPACITY: usize = SIGNATURE_PACKET_SIZE - OUTER_HEADER_LEN;

/// §9: "MaxContent=41,691" — the authoritative content ceiling.
pub const MAX_CONTENT: usize = 41_691;

const _: () = assert!(
    PRE_HEADER_PACKET_SIZE
        + ENCRYPTED_HEADER_PACKET_SIZE
        + CRYPTO_SETUP_PACKET_SIZE
        + CONTENT_PACKET_SIZE
        + SIGNATURE_PACKET_SIZE
        + HMAC_PACKET_SIZE
        == UNENCODED_SIZE
);
const _: () = assert!(UNENCODED_SIZE % 3 == 0);

// ── Outer packet read/write ──────────────────────────────────────────────────

pub fn write_outer_packet(buf: &mut Vec<u8>, packet_type: u8, packet_count: u32, payload: &[u8]) {
    buf.push(packet_type);
    buf.extend_from_slice(&(payload.len() as u16).to_be_bytes());
    buf.extend_from_slice(&packet_count.to_be_bytes());
    buf.extend_from_slice(payload);
}

/// Read one outer packet at `input`'s start, checking its type, expected
/// `packet_count`, and exact payload size. Returns `(payload, rest)`.
pub fn read_outer_packet<'a>(
    input: &'a [u8],
    expected_type: u8,
    expected_count: u32,
    expected_payload_len: usize,
) -> Result<(&'a [u8], &'a [u8]), CodecError> {
    if input.len() < OUTER_HEADER_LEN {
        return Err(CodecError::BadPacketSize);
    }
    let packet_type = input[0];
    let plen = u16::from_be_bytes([input[1], input[2]]) as usize;
    let packet_count = u32::from_be_bytes([input[3], input[4], input[5], input[6]]);

    if packet_type != expected_type || packet_count != expected_count {
        return Err(CodecError::BadPacketOrder);
    }
    if plen != expected_payload_len {
        return Err(CodecError::BadPacketSize);
    }
    if input.len() < OUTER_HEADER_LEN + plen {
        return Err(CodecError::BadPacketSize);
    }

    let (payload, rest) = input[OUTER_HEADER_LEN..].split_at(plen);
    Ok((payload, rest))
}

// ── Inner packet types (bitmask) ─────────────────────────────────────────────

pub const INNER_PADDING: u8 = 1;
pub const INNER_DATA: u8 = 2;
pub const INNER_SIGN: u8 = 4;
pub const INNER_SIGNATURE: u8 = 8;

const INNER_HEADER_LEN: usize = 1 + 2 + 1 + 1;

/// Reject any bit combination other than the four valid ones (§4.1).
pub fn validate_inner_type(inner_type: u8) -> Result<(), CodecError> {
    match inner_type {
        INNER_PADDING | INNER_DATA | INNER_SIGNATURE => Ok(()),
        t if t == (INNER_DATA | INNER_SIGN) => Ok(()),
        _ => Err(CodecError::BadInnerPacketType),
    }
}

pub fn write_inner_packet(buf: &mut Vec<u8>, inner_type: u8, more: bool, skip: u8, content: &[u8]) {
    buf.push(inner_type);
    buf.extend_from_slice(&(content.len() as u16).to_be_bytes());
    buf.push(more as u8);
    buf.push(skip);
    buf.extend_from_slice(content);
}

pub struct InnerPacket<'a> {
    pub inner_type: u8,
    pub more: bool,
    pub skip: u8,
    pub content: &'a [u8],
}

/// Read one inner packet from the start of `input`. Returns the packet and
/// the unconsumed remainder.
pub fn read_inner_packet(input: &[u8]) -> Result<(InnerPacket<'_>, &[u8]), CodecError> {
    if input.len() < INNER_HEADER_LEN {
        return Err(CodecError::BadPacketSize);
    }
    let inner_type = input[0];
    validate_inner_type(inner_type)?;
    let plen = u16::from_be_bytes([input[1], input[2]]) as usize;
    let more = input[3] != 0;
    let skip = input[4];
    if input.len() < INNER_HEADER_LEN + plen {
        return Err(CodecError::BadPacketSize);
    }
    let (content, rest) = input[INNER_HEADER_LEN..].split_at(plen);
    Ok((InnerPacket { inner_type, more, skip, content }, rest))
}

// ── Full frame assembly ──────────────────────────────────────────────────────

/// Assemble the complete 49,152-byte frame (§6.2) from its six outer
/// packets, in order. Every payload must already be its fixed size —
/// callers build them with [`build_content_packets`]/[`crate::header`].
pub fn write_frame(
    pre_header_payload: &[u8],
    encrypted_header_payload: &[u8],
    crypto_setup_iv: &[u8; CRYPTO_SETUP_IV_LEN],
    content_packet: &[u8],
    signature_packet: &[u8],
    hmac: &[u8; 64],
) -> Result<[u8; UNENCODED_SIZE], CodecError> {
    if pre_header_payload.len() != PRE_HEADER_PACKET_SIZE - OUTER_HEADER_LEN
        || encrypted_header_payload.len() != ENCRYPTED_HEADER_PACKET_SIZE - OUTER_HEADER_LEN
        || content_packet.len() != CONTENT_INNER_CAPACITY
        || signature_packet.len() != SIGNATURE_INNER_CAPACITY
    {
        return Err(CodecError::BadPacketSize);
    }

    let mut buf = Vec::with_capacity(UNENCODED_SIZE);
    write_outer_packet(&mut buf, OUTER_PRE_HEADER, 0, pre_header_payload);
    write_outer_packet(&mut buf, OUTER_ENCRYPTED_HEADER, 1, encrypted_header_payload);
    write_outer_packet(&mut buf, OUTER_CRYPTO_SETUP, 2, crypto_setup_iv);
    write_outer_packet(&mut buf, OUTER_ENCRYPTED_PACKET, 3, content_packet);
    write_outer_packet(&mut buf, OUTER_ENCRYPTED_PACKET, 4, signature_packet);
    write_outer_packet(&mut buf, OUTER_HMAC, 5, hmac);

    let mut frame = [0u8; UNENCODED_SIZE];
    frame.copy_from_slice(&buf);
    Ok(frame)
}

/// The six outer-packet payloads recovered from a frame, borrowed from it.
pub struct ParsedFrame<'a> {
    pub pre_header_payload: &'a [u8],
    pub encrypted_header_payload: &'a [u8],
    pub crypto_setup_iv: &'a [u8],
    pub content_packet: &'a [u8],
    pub signature_packet: &'a [u8],
    pub hmac: &'a [u8],
    /// The bytes HMAC covers: every outer packet from CryptoSetup onward,
    /// including outer-header bytes (§4.1).
    pub hmac_covered: &'a [u8],
}

pub fn read_frame(frame: &[u8; UNENCODED_SIZE]) -> Result<ParsedFrame<'_>, CodecError> {
    let (pre_header_payload, rest) =
        read_outer_packet(frame, OUTER_PRE_HEADER, 0, PRE_HEADER_PACKET_SIZE - OUTER_HEADER_LEN)?;

    let (encrypted_header_payload, rest) = read_outer_packet(
        rest,
        OUTER_ENCRYPTED_HEADER,
        1,
        ENCRYPTED_HEADER_PACKET_SIZE - OUTER_HEADER_LEN,
    )?;

    let hmac_region_start = frame.len() - rest.len();

    let (crypto_setup_iv, rest) =
        read_outer_packet(rest, OUTER_CRYPTO_SETUP, 2, CRYPTO_SETUP_IV_LEN)?;
    let (content_packet, rest) =
        read_outer_packet(rest, OUTER_ENCRYPTED_PACKET, 3, CONTENT_INNER_CAPACITY)?;
    let (signature_packet, rest) =
        read_outer_packet(rest, OUTER_ENCRYPTED_PACKET, 4, SIGNATURE_INNER_CAPACITY)?;

    let hmac_region_end = frame.len() - rest.len();
    let (hmac, rest) = read_outer_packet(rest, OUTER_HMAC, 5, 64)?;
    if !rest.is_empty() {
        return Err(CodecError::BadPacketSize);
    }

    Ok(ParsedFrame {
        pre_header_payload,
        encrypted_header_payload,
        crypto_setup_iv,
        content_packet,
        signature_packet,
        hmac,
        hmac_covered: &frame[hmac_region_start..hmac_region_end],
    })
}

// ── Content section (the two EncryptedPacket payloads) ──────────────────────

/// Build the two `EncryptedPacket` inner-payload buffers for one message
/// (§4.1 "Payload framing"): `content` (≤ [`MAX_CONTENT`]) wrapped in a
/// `DATA`/`DATA|SIGN` inner packet plus trailing padding, and a second
/// buffer carrying either the Ed25519 `SIGNATURE` inner packet or padding
/// only. Both buffers are exactly [`CONTENT_INNER_CAPACITY`] and
/// [`SIGNATURE_INNER_CAPACITY`] bytes.
pub fn build_content_packets<R: RandReader + ?Sized>(
    reader: &mut R,
    content: &[u8],
    signature: Option<[u8; 64]>,
) -> Result<(Vec<u8>, Vec<u8>), CodecError> {
    if content.len() > MAX_CONTENT {
        return Err(CodecError::BadPacketSize);
    }

    let mut first = Vec::with_capacity(CONTENT_INNER_CAPACITY);
    let inner_type = if signature.is_some() { INNER_DATA | INNER_SIGN } else { INNER_DATA };
    write_inner_packet(&mut first, inner_type, false, 0, content);
    let used = first.len();
    let content_padding_len = CONTENT_INNER_CAPACITY - used - INNER_HEADER_LEN;
    let mut content_padding = vec![0u8; content_padding_len];
    reader.fill(&mut content_padding);
    write_inner_packet(&mut first, INNER_PADDING, false, 0, &content_padding);
    debug_assert_eq!(first.len(), CONTENT_INNER_CAPACITY);

    let mut second = Vec::with_capacity(SIGNATURE_INNER_CAPACITY);
    match signature {
        Some(sig) => write_inner_packet(&mut second, INNER_SIGNATURE, false, 0, &sig),
        None => {
            let padding_len = SIGNATURE_INNER_CAPACITY - INNER_HEADER_LEN;
            let mut padding = vec![0u8; padding_len];
            reader.fill(&mut padding);
            write_inner_packet(&mut second, INNER_PADDING, false, 0, &padding);
        }
    }
    debug_assert_eq!(second.len(), SIGNATURE_INNER_CAPACITY);

    Ok((first, second))
}

/// Inverse of [`build_content_packets`]. Returns `(content, signature)`,
/// enforcing that the `SIGN` bit on the first inner packet agrees with a
/// `SIGNATURE` inner packet actually being present in the second buffer.
pub fn parse_content_packets(first: &[u8], second: &[u8]) -> Result<(Vec<u8>, Option<[u8; 64]>), CodecError> {
    let (data_packet, _) = read_inner_packet(first)?;
    let claims_signed = data_packet.inner_type == (INNER_DATA | INNER_SIGN);
    if data_packet.inner_type != INNER_DATA && !claims_signed {
        return Err(CodecError::BadInnerPacketType);
    }
    let content = data_packet.content.to_vec();

    let (second_packet, _) = read_inner_packet(second)?;
    let signature = match second_packet.inner_type {
        INNER_SIGNATURE => {
            if !claims_signed {
                return Err(CodecError::BadInnerPacketType);
            }
            if second_packet.content.len() != 64 {
                return Err(CodecError::BadPacketSize);
            }
            let mut sig = [0u8; 64];
            sig.copy_from_slice(second_packet.content);
            Some(sig)
        }
        INNER_PADDING => {
            if claims_signed {
                return Err(CodecError::BadInnerPacketType);
            }
            None
        }
        _ => return Err(CodecError::BadInnerPacketType),
    };

    Ok((content, signature))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outer_packet_roundtrip() {
        let mut buf = Vec::new();
        write_outer_packet(&mut buf, OUTER_CRYPTO_SETUP, 2, &[9u8; 16]);
        assert_eq!(buf.len(), CRYPTO_SETUP_PACKET_SIZE);
        let (payload, rest) = read_outer_packet(&buf, OUTER_CRYPTO_SETUP, 2, 16).unwrap();
        assert_eq!(payload, &[9u8; 16]);
        assert!(rest.is_empty());
    }

    #[test]
    fn outer_packet_rejects_wrong_count() {
        let mut buf = Vec::new();
        write_outer_packet(&mut buf, OUTER_CRYPTO_SETUP, 2, &[9u8; 16]);
        assert!(matches!(
            read_outer_packet(&buf, OUTER_CRYPTO_SETUP, 5, 16),
            Err(CodecError::BadPacketOrder)
        ));
    }

    #[test]
    fn outer_packet_rejects_wrong_size() {
        let mut buf = Vec::new();
        write_outer_packet(&mut buf, OUTER_CRYPTO_SETUP, 0, &[9u8; 16]);
        assert!(matches!(
            read_outer_packet(&buf, OUTER_CRYPTO_SETUP, 0, 15),
            Err(CodecError::BadPacketSize)
        ));
    }

    #[test]
    fn inner_packet_roundtrip() {
        let mut buf = Vec::new();
        write_inner_packet(&mut buf, INNER_DATA | INNER_SIGN, false, 0, b"hello");
        let (pkt, rest) = read_inner_packet(&buf).unwrap();
        assert_eq!(pkt.inner_type, INNER_DATA | INNER_SIGN);
        assert_eq!(pkt.content, b"hello");
        assert!(rest.is_empty());
    }

    #[test]
    fn inner_packet_rejects_invalid_combination() {
        let mut buf = Vec::new();
        write_inner_packet(&mut buf, INNER_SIGN, false, 0, b"");
        assert!(matches!(read_inner_packet(&buf), Err(CodecError::BadInnerPacketType)));
    }

    #[test]
    fn fixed_sizes_sum_to_unencoded_size() {
        let sum = PRE_HEADER_PACKET_SIZE
            + ENCRYPTED_HEADER_PACKET_SIZE
            + CRYPTO_SETUP_PACKET_SIZE
            + CONTENT_PACKET_SIZE
            + SIGNATURE_PACKET_SIZE
            + HMAC_PACKET_SIZE;
        assert_eq!(sum, UNENCODED_SIZE);
    }

    #[test]
    fn content_packets_roundtrip_unsigned() {
        use emc_crypto::rand_source::AlwaysZeroReader;
        let mut r = AlwaysZeroReader;
        let content = b"hello world".to_vec();
        let (first, second) = build_content_packets(&mut r, &content, None).unwrap();
        assert_eq!(first.len(), CONTENT_INNER_CAPACITY);
        assert_eq!(second.len(), SIGNATURE_INNER_CAPACITY);

        let (recovered, sig) = parse_content_packets(&first, &second).unwrap();
        assert_eq!(recovered, content);
        assert!(sig.is_none());
    }

    #[test]
    fn content_packets_roundtrip_signed() {
        use emc_crypto::rand_source::AlwaysZeroReader;
        let mut r = AlwaysZeroReader;
        let content = vec![0xAB; 100];
        let sig = [0x11u8; 64];
        let (first, second) = build_content_packets(&mut r, &content, Some(sig)).unwrap();

        let (recovered, recovered_sig) = parse_content_packets(&first, &second).unwrap();
        assert_eq!(recovered, content);
        assert_eq!(recovered_sig, Some(sig));
    }

    #[test]
    fn content_packets_reject_oversize_content() {
        use emc_crypto::rand_source::AlwaysZeroReader;
        let mut r = AlwaysZeroReader;
        let content = vec![0u8; MAX_CONTENT + 1];
        assert!(build_content_packets(&mut r, &content, None).is_err());
    }

    #[test]
    fn content_packets_reject_sign_bit_mismatch() {
        use emc_crypto::rand_source::AlwaysZeroReader;
        let mut r = AlwaysZeroReader;
        let (first, _) = build_content_packets(&mut r, b"data claims signed", Some([1u8; 64])).unwrap();
        let (_, second_unsigned) = build_content_packets(&mut r, b"other", None).unwrap();
        assert!(matches!(
            parse_content_packets(&first, &second_unsigned),
            Err(CodecError::BadInnerPacketType)
        ));
    }

    #[test]
    fn frame_roundtrip_and_hmac_region() {
        use emc_crypto::rand_source::AlwaysZeroReader;
        let mut r = AlwaysZeroReader;
        let pre_header_payload = vec![1u8; PRE_HEADER_PACKET_SIZE - OUTER_HEADER_LEN];
        let encrypted_header_payload = vec![2u8; ENCRYPTED_HEADER_PACKET_SIZE - OUTER_HEADER_LEN];
        let iv = [3u8; CRYPTO_SETUP_IV_LEN];
        let (content_packet, signature_packet) =
            build_content_packets(&mut r, b"hello", None).unwrap();
        let hmac = [4u8; 64];

        let frame = write_frame(
            &pre_header_payload,
            &encrypted_header_payload,
            &iv,
            &content_packet,
            &signature_packet,
            &hmac,
        )
        .unwrap();

        let parsed = read_frame(&frame).unwrap();
        assert_eq!(parsed.pre_header_payload, &pre_header_payload[..]);
        assert_eq!(parsed.crypto_setup_iv, &iv[..]);
        assert_eq!(parsed.hmac, &hmac[..]);
        // hmac_covered starts at CryptoSetup's outer header and ends right
        // before the HMAC outer packet.
        assert_eq!(
            parsed.hmac_covered.len(),
            CRYPTO_SETUP_PACKET_SIZE + CONTENT_PACKET_SIZE + SIGNATURE_PACKET_SIZE
        );
    }
}
