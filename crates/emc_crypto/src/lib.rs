//! emc_crypto — cryptographic core of the encrypted messaging system.
//!
//! # Design principles
//! - No custom crypto; every primitive is delegated to an audited RustCrypto
//!   or dalek crate (see `primitives`).
//! - Secret material is zeroized on drop.
//! - Randomness is always drawn through the injected `RandReader`
//!   capability, never a bare global RNG call, so probabilistic behavior
//!   (the session-rotation draw) is deterministically testable.
//!
//! # Module layout
//! - `primitives`   — AES-CTR/CBC, HMAC/HKDF-SHA-512, Curve25519 DH, Ed25519,
//!                    NaCl box
//! - `rand_source`  — the `RandReader` capability and test doubles
//! - `padding`      — deterministic cheap padding generator
//! - `identity`     — `KeyEntry`, the named asymmetric key type
//! - `kdf`          — root-key derivation, chain-key/message-key recurrence
//! - `rootkey`      — triple-DH root-key agreement (sender/recipient halves)
//! - `session`      — the per-peer session state machine
//! - `keyinit`      — `KeyInit` / `SessionAnchor` issuance and verification
//! - `error`        — unified error type
//! - `serde_hash`   — `#[serde(with = "...")]` helper for 64-byte fields

pub mod error;
pub mod identity;
pub mod kdf;
pub mod keyinit;
pub mod padding;
pub mod primitives;
pub mod rand_source;
pub mod rootkey;
pub(crate) mod serde_hash;
pub mod session;

pub use error::CryptoError;
