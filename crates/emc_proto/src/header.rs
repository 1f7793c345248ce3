//! The `PreHeader` outer packet and the JSON `Header` sealed inside
//! `EncryptedHeader` (§4.1).

use emc_crypto::identity::KeyEntry;
use emc_crypto::primitives::{box_open, box_seal, CIPHERSUITE, WIRE_VERSION};
use emc_crypto::rand_source::RandReader;
use serde::{Deserialize, Serialize};

use crate::codec::{
    BOX_NONCE_LEN, ENCRYPTED_HEADER_CIPHERTEXT_SIZE, PRE_HEADER_PACKET_SIZE,
};
use crate::error::CodecError;

const PRE_HEADER_PAYLOAD_SIZE: usize = PRE_HEADER_PACKET_SIZE - 7;
/// Wiggle room: 24-byte nonce + 2-byte length prefix in front of the NaCl-box
/// ciphertext inside the `EncryptedHeader` payload.
const BOX_OVERHEAD_TAG_LEN: usize = 16;
/// Plaintext `Header` JSON, after padding, before NaCl-box sealing. The
/// sealed ciphertext (plaintext + Poly1305 tag) must land on
/// [`ENCRYPTED_HEADER_CIPHERTEXT_SIZE`].
const HEADER_PLAINTEXT_SIZE: usize = ENCRYPTED_HEADER_CIPHERTEXT_SIZE - BOX_OVERHEAD_TAG_LEN;

/// `type:u16 || len_cs:u16 || ciphersuite[len_cs] || len_hdrpub:u16 ||
/// sender_header_pub[len_hdrpub]` (§4.1). Carries the sender's identity
/// public key so the recipient can try it against every owned identity
/// when opening the `EncryptedHeader`.
pub struct PreHeader {
    pub version: u16,
    pub sender_header_pub: [u8; 32],
}

impl PreHeader {
    pub fn encode(&self) -> Result<[u8; PRE_HEADER_PAYLOAD_SIZE], CodecError> {
        let mut out = [0u8; PRE_HEADER_PAYLOAD_SIZE];
        let mut pos = 0;
        out[pos..pos + 2].copy_from_slice(&self.version.to_be_bytes());
        pos += 2;
        out[pos..pos + 2].copy_from_slice(&(CIPHERSUITE.len() as u16).to_be_bytes());
        pos += 2;
        out[pos..pos + CIPHERSUITE.len()].copy_from_slice(CIPHERSUITE.as_bytes());
        pos += CIPHERSUITE.len();
        out[pos..pos + 2].copy_from_slice(&32u16.to_be_bytes());
        pos += 2;
        out[pos..pos + 32].copy_from_slice(&self.sender_header_pub);
        pos += 32;
        debug_assert_eq!(pos, PRE_HEADER_PAYLOAD_SIZE);
        Ok(out)
    }

    pub fn decode(payload: &[u8]) -> Result<Self, CodecError> {
        if payload.len() != PRE_HEADER_PAYLOAD_SIZE {
            return Err(CodecError::BadPacketSize);
        }
        let mut pos = 0;
        let version = u16::from_be_bytes([payload[0], payload[1]]);
        pos += 2;
        let len_cs = u16::from_be_bytes([payload[pos], payload[pos + 1]]) as usize;
        pos += 2;
        if pos + len_cs > payload.len() {
            return Err(CodecError::BadPacketSize);
        }
        let ciphersuite = &payload[pos..pos + len_cs];
        pos += len_cs;
        if ciphersuite != CIPHERSUITE.as_bytes() {
            return Err(CodecError::BadCiphersuite);
        }
        let len_hdrpub = u16::from_be_bytes([payload[pos], payload[pos + 1]]) as usize;
        pos += 2;
        if len_hdrpub != 32 || pos + 32 != payload.len() {
            return Err(CodecError::BadPacketSize);
        }
        let mut sender_header_pub = [0u8; 32];
        sender_header_pub.copy_from_slice(&payload[pos..pos + 32]);

        if version != WIRE_VERSION {
            return Err(CodecError::BadVersion);
        }

        Ok(Self { version, sender_header_pub })
    }
}

/// §4.1's `status` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum HeaderStatus {
    Ok = 0,
    Reset = 1,
    Error = 2,
}

/// The JSON document sealed inside `EncryptedHeader` (§4.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Header {
    pub ciphersuite: String,
    pub recipient_pub_hash: String,
    pub recipient_temp_hash: String,
    pub sender_identity: String,
    pub sender_session_pub: KeyEntry,
    pub sender_identity_pub_hash: String,
    pub sender_identity_pub: KeyEntry,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_sender_session_pub: Option<KeyEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_recipient_session_pub_seen: Option<String>,
    pub nym_address: String,
    pub max_delay: u64,
    pub sender_session_count: u64,
    pub sender_message_count: u64,
    pub sender_uid: String,
    pub sender_last_keychain_hash: String,
    pub status: HeaderStatus,
    pub padding: String,
}

impl Header {
    /// Pad this header so its serialized JSON is exactly
    /// [`HEADER_PLAINTEXT_SIZE`] bytes (§4.1: "padding is computed so that
    /// every encoded header is this exact size").
    ///
    /// The spec describes computing the pad length up front from per-field
    /// worst-case deficits (a constant wiggle-room plus the gap between
    /// each variable-length field and its declared maximum) so the
    /// plaintext never needs to be measured twice. This implementation
    /// measures directly instead — it serializes with an empty `padding`
    /// field, takes the byte deficit against the target size verbatim as
    /// the hex pad-string length, and fills that with bytes drawn from
    /// `reader`. The wire result is identical either way: the final
    /// serialized header is always exactly [`HEADER_PLAINTEXT_SIZE`] bytes.
    pub fn apply_padding<R: RandReader + ?Sized>(&mut self, reader: &mut R) -> Result<(), CodecError> {
        self.padding.clear();
        let baseline = serde_json::to_vec(self)?.len();
        if baseline > HEADER_PLAINTEXT_SIZE {
            return Err(CodecError::PaddingOverflow(format!(
                "header without padding is already {baseline} bytes, exceeds {HEADER_PLAINTEXT_SIZE}"
            )));
        }
        let pad_len = HEADER_PLAINTEXT_SIZE - baseline;
        let raw_needed = pad_len.div_ceil(2);
        let mut raw = vec![0u8; raw_needed];
        reader.fill(&mut raw);
        let mut hex_str = hex::encode(&raw);
        hex_str.truncate(pad_len);
        self.padding = hex_str;

        let final_len = serde_json::to_vec(self)?.len();
        if final_len != HEADER_PLAINTEXT_SIZE {
            return Err(CodecError::PaddingOverflow(format!(
                "padded header is {final_len} bytes, expected {HEADER_PLAINTEXT_SIZE}"
            )));
        }
        Ok(())
    }

    /// Seal this (already-padded) header as the `EncryptedHeader` payload:
    /// `nonce(24) || len(2) || ciphertext`.
    pub fn seal(&self, our_priv: &[u8; 32], their_pub: &[u8; 32]) -> Result<Vec<u8>, CodecError> {
        let plaintext = serde_json::to_vec(self)?;
        if plaintext.len() != HEADER_PLAINTEXT_SIZE {
            return Err(CodecError::PaddingOverflow(
                "header must be padded before sealing".into(),
            ));
        }
        let sealed = box_seal(our_priv, their_pub, &plaintext)?;
        let (nonce, ciphertext) = sealed.split_at(BOX_NONCE_LEN);
        if ciphertext.len() != ENCRYPTED_HEADER_CIPHERTEXT_SIZE {
            return Err(CodecError::BadPacketSize);
        }
        let mut out = Vec::with_capacity(BOX_NONCE_LEN + 2 + ciphertext.len());
        out.extend_from_slice(nonce);
        out.extend_from_slice(&(ciphertext.len() as u16).to_be_bytes());
        out.extend_from_slice(ciphertext);
        Ok(out)
    }

    /// Try opening `payload` (the `EncryptedHeader`'s payload bytes) against
    /// one owned identity private key. Returns `None` (not `Err`) on
    /// authentication failure so the caller can keep trying other
    /// identities per §4.4 step 1, only surfacing `BadHeaderKey` once every
    /// identity has been exhausted.
    pub fn try_open(payload: &[u8], our_priv: &[u8; 32], their_pub: &[u8; 32]) -> Option<Header> {
        if payload.len() != BOX_NONCE_LEN + 2 + ENCRYPTED_HEADER_CIPHERTEXT_SIZE {
            return None;
        }
        let (nonce, rest) = payload.split_at(BOX_NONCE_LEN);
        let len = u16::from_be_bytes([rest[0], rest[1]]) as usize;
        let ciphertext = &rest[2..];
        if len != ciphertext.len() {
            return None;
        }
        let mut sealed = Vec::with_capacity(BOX_NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(nonce);
        sealed.extend_from_slice(ciphertext);
        let plaintext = box_open(our_priv, their_pub, &sealed).ok()?;
        serde_json::from_slice(&plaintext).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use emc_crypto::identity::KeyFunction;
    use emc_crypto::rand_source::AlwaysZeroReader;
    use x25519_dalek::{PublicKey, StaticSecret};

    fn sample_header() -> Header {
        Header {
            ciphersuite: CIPHERSUITE.to_string(),
            recipient_pub_hash: "aGFzaA==".into(),
            recipient_temp_hash: "aGFzaA==".into(),
            sender_identity: "alice@example.org".into(),
            sender_session_pub: KeyEntry::from_public(KeyFunction::Ecdhe25519, [1u8; 32]),
            sender_identity_pub_hash: "aGFzaA==".into(),
            sender_identity_pub: KeyEntry::from_public(KeyFunction::Ecdhe25519, [2u8; 32]),
            next_sender_session_pub: None,
            next_recipient_session_pub_seen: None,
            nym_address: "nym://bob".into(),
            max_delay: 0,
            sender_session_count: 0,
            sender_message_count: 0,
            sender_uid: "{}".into(),
            sender_last_keychain_hash: "aGFzaA==".into(),
            status: HeaderStatus::Ok,
            padding: String::new(),
        }
    }

    #[test]
    fn pre_header_roundtrip() {
        let ph = PreHeader { version: WIRE_VERSION, sender_header_pub: [5u8; 32] };
        let encoded = ph.encode().unwrap();
        let decoded = PreHeader::decode(&encoded).unwrap();
        assert_eq!(decoded.sender_header_pub, [5u8; 32]);
    }

    #[test]
    fn pre_header_rejects_bad_ciphersuite() {
        let mut encoded = PreHeader { version: WIRE_VERSION, sender_header_pub: [5u8; 32] }
            .encode()
            .unwrap();
        encoded[4] ^= 0xFF;
        assert!(matches!(PreHeader::decode(&encoded), Err(CodecError::BadCiphersuite)));
    }

    #[test]
    fn header_padding_reaches_exact_size() {
        let mut header = sample_header();
        let mut r = AlwaysZeroReader;
        header.apply_padding(&mut r).unwrap();
        assert_eq!(serde_json::to_vec(&header).unwrap().len(), HEADER_PLAINTEXT_SIZE);
    }

    #[test]
    fn seal_and_open_roundtrip() {
        let mut header = sample_header();
        let mut r = AlwaysZeroReader;
        header.apply_padding(&mut r).unwrap();

        let alice_secret = StaticSecret::from([11u8; 32]);
        let alice_pub = *PublicKey::from(&alice_secret).as_bytes();
        let bob_secret = StaticSecret::from([22u8; 32]);
        let bob_pub = *PublicKey::from(&bob_secret).as_bytes();

        let sealed_payload = header.seal(&alice_secret.to_bytes(), &bob_pub).unwrap();
        let opened = Header::try_open(&sealed_payload, &bob_secret.to_bytes(), &alice_pub).unwrap();
        assert_eq!(opened.sender_identity, header.sender_identity);
    }
}
