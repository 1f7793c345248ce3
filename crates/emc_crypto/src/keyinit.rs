//! `KeyInit` / `SessionAnchor` (§3, §4.5): the short-term key bundle a
//! recipient publishes so a first-time sender can initiate a session.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CryptoError;
use crate::identity::KeyEntry;
use crate::primitives::{aes256_ctr_apply, ed25519_verify, sha512};

/// §9: "MaxNotAfter=90 days" — the authoritative constant for KeyInit
/// lifetime, since the source drafts disagreed on it.
pub const MAX_NOT_AFTER: Duration = Duration::days(90);

/// The plaintext payload encrypted inside a [`KeyInit`] (§3: "SessionAnchor
/// containing an ephemeral DH KeyEntry (`PFKEYS[0]`) plus delivery
/// addressing").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionAnchor {
    pub ephemeral: KeyEntry,
    pub mix_address: String,
    pub nym_address: String,
}

/// The signed body of a `KeyInit`, i.e. everything the Ed25519 signature
/// covers. Kept separate from [`KeyInit`] so `issue`/`verify` build/check
/// the exact same canonical bytes.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct KeyInitBody {
    repo_uri: String,
    signer_pubkey: [u8; 32],
    #[serde(with = "crate::serde_hash")]
    sig_key_hash: [u8; 64],
    not_before: DateTime<Utc>,
    not_after: DateTime<Utc>,
    #[serde(with = "crate::serde_hash")]
    session_anchor_hash: [u8; 64],
    /// AES-256-CTR IV for `encrypted_anchor`. Not named in §3/§4.5, which
    /// gives only the encryption key derivation — but a CTR key is reused
    /// across every `KeyInit` a given identity ever publishes (it is fixed
    /// by the signer's long-term signature key), so a fresh per-publication
    /// IV is required to avoid keystream reuse. See DESIGN.md.
    iv: [u8; 16],
    encrypted_anchor: Vec<u8>,
}

/// A published, signed key bundle (§3, §4.5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyInit {
    body: KeyInitBody,
    #[serde(with = "crate::serde_hash")]
    signature: [u8; 64],
    /// **[ADDED]** The key server's non-repudiation counter-signature,
    /// recorded by the client after publication (§4.5 final paragraph).
    /// Never consulted during verification.
    pub counter_signature: Option<Vec<u8>>,
}

impl KeyInit {
    pub fn repo_uri(&self) -> &str {
        &self.body.repo_uri
    }

    pub fn not_before(&self) -> DateTime<Utc> {
        self.body.not_before
    }

    pub fn not_after(&self) -> DateTime<Utc> {
        self.body.not_after
    }

    /// Issue a fresh `KeyInit`, signed by `signing_key` (an Ed25519
    /// [`KeyEntry`] with its private half present).
    pub fn issue(
        signing_key: &KeyEntry,
        repo_uri: String,
        anchor: &SessionAnchor,
        not_before: DateTime<Utc>,
        not_after: DateTime<Utc>,
        iv: [u8; 16],
    ) -> Result<Self, CryptoError> {
        let anchor_plaintext = serde_json::to_vec(anchor)?;
        let session_anchor_hash = sha512(&anchor_plaintext);

        let aes_key = anchor_encryption_key(&signing_key.public);
        let mut encrypted_anchor = anchor_plaintext;
        aes256_ctr_apply(&aes_key, &iv, &mut encrypted_anchor)?;

        let sig_key_hash = sha512(&sha512(&signing_key.public));

        let body = KeyInitBody {
            repo_uri,
            signer_pubkey: signing_key.public,
            sig_key_hash,
            not_before,
            not_after,
            session_anchor_hash,
            iv,
            encrypted_anchor,
        };
        let canonical = serde_json::to_vec(&body)?;
        let signature = signing_key.sign(&canonical)?;

        Ok(Self { body, signature, counter_signature: None })
    }

    /// **[ADDED]** Record the key server's counter-signature once
    /// publication succeeds.
    pub fn record_counter_signature(&mut self, sig: Vec<u8>) {
        self.counter_signature = Some(sig);
    }

    /// Verify this `KeyInit` per §4.5 and recover its `SessionAnchor`.
    /// `accepted_uris` is the verifier's allow-list for `repo_uri`.
    pub fn verify(&self, accepted_uris: &[&str], now: DateTime<Utc>) -> Result<SessionAnchor, CryptoError> {
        if !accepted_uris.contains(&self.body.repo_uri.as_str()) {
            tracing::warn!(repo_uri = %self.body.repo_uri, "KeyInit rejected: repo_uri not accepted");
            return Err(CryptoError::KeyInitUnverified("repo_uri not accepted".into()));
        }

        let expected_sig_key_hash = sha512(&sha512(&self.body.signer_pubkey));
        if expected_sig_key_hash != self.body.sig_key_hash {
            tracing::warn!("KeyInit rejected: SIGKEYHASH mismatch");
            return Err(CryptoError::KeyInitUnverified("SIGKEYHASH mismatch".into()));
        }

        if self.body.not_before >= self.body.not_after {
            tracing::warn!("KeyInit rejected: not_before >= not_after");
            return Err(CryptoError::KeyInitExpired);
        }
        if now >= self.body.not_after {
            tracing::debug!("KeyInit rejected: past not_after");
            return Err(CryptoError::KeyInitExpired);
        }
        if self.body.not_after - now > MAX_NOT_AFTER {
            tracing::warn!("KeyInit rejected: not_after exceeds MaxNotAfter");
            return Err(CryptoError::KeyInitExpired);
        }

        let canonical = serde_json::to_vec(&self.body)?;
        ed25519_verify(&self.body.signer_pubkey, &canonical, &self.signature)?;

        let aes_key = anchor_encryption_key(&self.body.signer_pubkey);
        let mut plaintext = self.body.encrypted_anchor.clone();
        aes256_ctr_apply(&aes_key, &self.body.iv, &mut plaintext)?;

        if sha512(&plaintext) != self.body.session_anchor_hash {
            return Err(CryptoError::SessionAnchorHashMismatch);
        }

        let anchor: SessionAnchor = serde_json::from_slice(&plaintext)?;
        Ok(anchor)
    }
}

/// `SHA512(signer_pubkey)[..32]`, the SessionAnchor's AES-256-CTR key
/// (§3: "encrypts ... under the first 32 bytes of SHA-512 of the signer's
/// signature-public key").
fn anchor_encryption_key(signer_pubkey: &[u8; 32]) -> [u8; 32] {
    let wide = sha512(signer_pubkey);
    let mut key = [0u8; 32];
    key.copy_from_slice(&wide[..32]);
    key
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::KeyFunction;
    use crate::rand_source::AlwaysZeroReader;

    fn make_anchor() -> SessionAnchor {
        let mut r = AlwaysZeroReader;
        SessionAnchor {
            ephemeral: KeyEntry::generate(KeyFunction::Ecdhe25519, &mut r),
            mix_address: "mix://example".into(),
            nym_address: "nym://bob".into(),
        }
    }

    #[test]
    fn issue_then_verify_roundtrip() {
        let mut r = AlwaysZeroReader;
        let signing = KeyEntry::generate(KeyFunction::Ed25519, &mut r);
        let anchor = make_anchor();
        let now = Utc::now();
        let ki = KeyInit::issue(
            &signing,
            "repo://accepted".into(),
            &anchor,
            now - Duration::hours(1),
            now + Duration::days(30),
            [3u8; 16],
        )
        .unwrap();

        let recovered = ki.verify(&["repo://accepted"], now).unwrap();
        assert_eq!(recovered.ephemeral.public, anchor.ephemeral.public);
        assert_eq!(recovered.nym_address, anchor.nym_address);
    }

    #[test]
    fn rejects_unaccepted_repo_uri() {
        let mut r = AlwaysZeroReader;
        let signing = KeyEntry::generate(KeyFunction::Ed25519, &mut r);
        let anchor = make_anchor();
        let now = Utc::now();
        let ki = KeyInit::issue(
            &signing,
            "repo://untrusted".into(),
            &anchor,
            now - Duration::hours(1),
            now + Duration::days(30),
            [3u8; 16],
        )
        .unwrap();

        assert!(ki.verify(&["repo://accepted"], now).is_err());
    }

    #[test]
    fn rejects_expired_not_after() {
        let mut r = AlwaysZeroReader;
        let signing = KeyEntry::generate(KeyFunction::Ed25519, &mut r);
        let anchor = make_anchor();
        let now = Utc::now();
        let ki = KeyInit::issue(
            &signing,
            "repo://accepted".into(),
            &anchor,
            now - Duration::days(2),
            now - Duration::days(1),
            [3u8; 16],
        )
        .unwrap();

        assert!(matches!(ki.verify(&["repo://accepted"], now), Err(CryptoError::KeyInitExpired)));
    }

    #[test]
    fn rejects_not_after_beyond_max_lifetime() {
        let mut r = AlwaysZeroReader;
        let signing = KeyEntry::generate(KeyFunction::Ed25519, &mut r);
        let anchor = make_anchor();
        let now = Utc::now();
        let ki = KeyInit::issue(
            &signing,
            "repo://accepted".into(),
            &anchor,
            now - Duration::hours(1),
            now + Duration::days(91),
            [3u8; 16],
        )
        .unwrap();

        assert!(matches!(ki.verify(&["repo://accepted"], now), Err(CryptoError::KeyInitExpired)));
    }

    #[test]
    fn tampered_ciphertext_fails_hash_check() {
        let mut r = AlwaysZeroReader;
        let signing = KeyEntry::generate(KeyFunction::Ed25519, &mut r);
        let anchor = make_anchor();
        let now = Utc::now();
        let mut ki = KeyInit::issue(
            &signing,
            "repo://accepted".into(),
            &anchor,
            now - Duration::hours(1),
            now + Duration::days(30),
            [3u8; 16],
        )
        .unwrap();
        ki.body.encrypted_anchor[0] ^= 0xFF;

        // Tampering the ciphertext also invalidates the outer signature,
        // so this is caught even before the anchor-hash check runs.
        assert!(ki.verify(&["repo://accepted"], now).is_err());
    }
}
