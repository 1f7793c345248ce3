//! emc_store — the persistence boundary and message orchestrator (§5, §6.1).
//!
//! This crate owns nothing `emc_crypto`/`emc_proto` don't already define:
//! it composes them against a [`KeyStore`] so a concrete, transactional
//! backend has a single `encrypt`/`decrypt` call to wrap per message.

pub mod engine;
pub mod error;
pub mod keystore;
pub mod memstore;
pub mod uid;

pub use engine::{
    decrypt, encrypt, expire_published_key_inits, publish_key_init, DecryptedMessage, ReceiveContext,
    SendContext, AVERAGE_SESSION_SIZE,
};
pub use error::{CoreError, ErrorSeverity, StoreError};
pub use keystore::KeyStore;
pub use memstore::MemoryKeyStore;
pub use uid::{ParsedUid, UidSource};
