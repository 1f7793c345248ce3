//! The `KeyStore` trait (§6.1): the persistence boundary the core consumes.
//! Concrete encrypted, durable storage is an out-of-scope external
//! collaborator — this crate only defines the interface and one in-memory
//! reference implementation ([`crate::memstore::MemoryKeyStore`]).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use emc_crypto::identity::KeyEntry;
use emc_crypto::session::SessionState;

use crate::error::StoreError;

/// Everything the core needs from persistent storage (§6.1, §5: "Send +
/// Sync, async fn via async_trait"). All methods are potential suspension
/// points (§5's blocking-I/O list).
#[async_trait]
pub trait KeyStore: Send + Sync {
    async fn get_session_state(&self, state_key: &str) -> Result<Option<SessionState>, StoreError>;

    async fn set_session_state(&self, state_key: &str, state: SessionState) -> Result<(), StoreError>;

    /// Insert or append a batch of message keys. On append, `root_key_hash`
    /// is unchanged, `chain_key` is updated, and the arrays are extended
    /// (§6.1).
    async fn store_session(
        &self,
        session_key: &str,
        root_key_hash: [u8; 64],
        chain_key: [u8; 32],
        send: Vec<[u8; 64]>,
        recv: Vec<[u8; 64]>,
    ) -> Result<(), StoreError>;

    async fn has_session(&self, session_key: &str) -> Result<bool, StoreError>;

    /// The recipient's own KeyInit private key entry, looked up by its
    /// public-key hash.
    async fn get_private_key_entry(&self, pub_key_hash: &[u8; 64]) -> Result<KeyEntry, StoreError>;

    /// A peer's long-term public identity plus its delivery `nym_address`,
    /// looked up by UID.
    async fn get_public_key_entry(&self, peer_uid: &str) -> Result<(KeyEntry, String), StoreError>;

    async fn num_message_keys(&self, session_key: &str) -> Result<u64, StoreError>;

    /// An empty slot (already consumed, or never populated) yields
    /// [`StoreError::MessageKeyUsed`] rather than `Ok(None)`, matching
    /// §6.1's "empty slot returns MessageKeyUsed".
    async fn get_message_key(
        &self,
        session_key: &str,
        sender: bool,
        index: u64,
    ) -> Result<[u8; 64], StoreError>;

    async fn get_root_key_hash(&self, session_key: &str) -> Result<[u8; 64], StoreError>;

    async fn get_chain_key(&self, session_key: &str) -> Result<[u8; 32], StoreError>;

    /// Consume (delete) one message-key slot. Called as part of the same
    /// logical transaction as the counter bump and state save (§7: "the
    /// key-store transaction either commits all changes ... or none").
    async fn del_message_key(&self, session_key: &str, sender: bool, index: u64) -> Result<(), StoreError>;

    async fn add_session_key(
        &self,
        hash: [u8; 64],
        json: String,
        priv_key: [u8; 32],
        cleanup_time: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    async fn get_session_key(&self, hash: &[u8; 64]) -> Result<(String, [u8; 32]), StoreError>;

    async fn del_session_key(&self, hash: &[u8; 64]) -> Result<(), StoreError>;

    /// Remove every session key whose `cleanup_time` has passed.
    async fn cleanup_session_keys(&self, now: DateTime<Utc>) -> Result<(), StoreError>;
}
