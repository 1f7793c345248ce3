//! emc_proto — wire codec, envelope, and identity canonicalization for the
//! encrypted messaging core.
//!
//! # Modules
//! - `codec`    — byte-exact outer/inner packet framing
//! - `header`   — the PreHeader and the sealed EncryptedHeader JSON
//! - `envelope` — the fixed-size base64 envelope wrapping one frame
//! - `identity` — §6.3 identity canonicalization
//! - `error`    — the codec failure taxonomy

pub mod codec;
pub mod envelope;
pub mod error;
pub mod header;
pub mod identity;

pub use error::CodecError;
