//! `KeyEntry` (§3): a named asymmetric key, public always present, private
//! optional. The only two functions a `KeyEntry` can carry are the ones
//! named in §3 — an ECDH X25519 key or an Ed25519 signing key.

use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

use crate::error::CryptoError;
use crate::primitives::{self, sha512, CIPHERSUITE};
use crate::rand_source::RandReader;

/// Which cryptographic role a [`KeyEntry`] plays. Exactly the two variants
/// named in §3 — no catch-all `Other` is invented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyFunction {
    #[serde(rename = "ECDHE25519")]
    Ecdhe25519,
    #[serde(rename = "ED25519")]
    Ed25519,
}

/// A named asymmetric key (§3). `hash == SHA512(public)` is the class
/// invariant; [`KeyEntry::new`] is the only safe constructor and upholds it
/// by construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyEntry {
    pub ciphersuite: String,
    pub function: KeyFunction,
    pub public: [u8; 32],
    /// hex-encoded in the JSON wire form; kept decoded here and encoded at
    /// the codec boundary.
    #[serde(with = "crate::serde_hash")]
    pub hash: [u8; 64],
    #[serde(skip_serializing_if = "Option::is_none")]
    private: Option<[u8; 32]>,
}

impl Drop for KeyEntry {
    fn drop(&mut self) {
        if let Some(p) = self.private.as_mut() {
            p.zeroize();
        }
    }
}

impl KeyEntry {
    /// Build from an already-known public key (e.g. one read off the wire).
    /// The hash is always recomputed, never trusted from the caller.
    pub fn from_public(function: KeyFunction, public: [u8; 32]) -> Self {
        let hash = sha512(&public);
        Self {
            ciphersuite: CIPHERSUITE.to_string(),
            function,
            public,
            hash,
            private: None,
        }
    }

    /// Generate a fresh key entry from a random reader (§3: "Created by a
    /// random-reader").
    pub fn generate<R: RandReader + ?Sized>(function: KeyFunction, reader: &mut R) -> Self {
        let mut secret_bytes = [0u8; 32];
        reader.fill(&mut secret_bytes);
        let public = match function {
            KeyFunction::Ecdhe25519 => {
                let secret = x25519_dalek::StaticSecret::from(secret_bytes);
                *x25519_dalek::PublicKey::from(&secret).as_bytes()
            }
            KeyFunction::Ed25519 => {
                let signing = ed25519_dalek::SigningKey::from_bytes(&secret_bytes);
                signing.verifying_key().to_bytes()
            }
        };
        let mut entry = Self::from_public(function, public);
        entry.private = Some(secret_bytes);
        secret_bytes.zeroize();
        entry
    }

    /// Set (or replace) the private half (§3: "mutated only by setting the
    /// private half").
    pub fn set_private(&mut self, private: [u8; 32]) {
        self.private = Some(private);
    }

    pub fn private(&self) -> Option<&[u8; 32]> {
        self.private.as_ref()
    }

    pub fn has_private(&self) -> bool {
        self.private.is_some()
    }

    pub fn x25519_static_secret(&self) -> Result<x25519_dalek::StaticSecret, CryptoError> {
        if self.function != KeyFunction::Ecdhe25519 {
            return Err(CryptoError::InvalidKey("key entry is not ECDHE25519".into()));
        }
        let p = self
            .private
            .ok_or_else(|| CryptoError::InvalidKey("key entry has no private half".into()))?;
        Ok(x25519_dalek::StaticSecret::from(p))
    }

    pub fn x25519_public(&self) -> x25519_dalek::PublicKey {
        x25519_dalek::PublicKey::from(self.public)
    }

    pub fn sign(&self, msg: &[u8]) -> Result<[u8; 64], CryptoError> {
        if self.function != KeyFunction::Ed25519 {
            return Err(CryptoError::InvalidKey("key entry is not ED25519".into()));
        }
        let p = self
            .private
            .ok_or_else(|| CryptoError::InvalidKey("key entry has no private half".into()))?;
        Ok(primitives::ed25519_sign(&p, msg))
    }

    pub fn verify(&self, msg: &[u8], sig: &[u8; 64]) -> Result<(), CryptoError> {
        if self.function != KeyFunction::Ed25519 {
            return Err(CryptoError::InvalidKey("key entry is not ED25519".into()));
        }
        primitives::ed25519_verify(&self.public, msg, sig)
    }

    /// Recheck the class invariant — used defensively after deserializing a
    /// `KeyEntry` off the wire.
    pub fn check_invariant(&self) -> Result<(), CryptoError> {
        if sha512(&self.public) != self.hash {
            return Err(CryptoError::InvalidKey("KeyEntry.hash != SHA512(public)".into()));
        }
        Ok(())
    }
}
