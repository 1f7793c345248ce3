//! An in-memory, non-durable [`KeyStore`] (§6: "whose purpose is enabling
//! the round-trip and replay tests"). No at-rest encryption, no durability —
//! this is a test fixture, never a deployment target.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use emc_crypto::identity::KeyEntry;
use emc_crypto::session::SessionState;
use tokio::sync::Mutex;

use crate::error::StoreError;
use crate::keystore::KeyStore;

struct SessionRecord {
    root_key_hash: [u8; 64],
    chain_key: [u8; 32],
    send: Vec<Option<[u8; 64]>>,
    recv: Vec<Option<[u8; 64]>>,
}

#[derive(Default)]
struct Inner {
    states: HashMap<String, SessionState>,
    sessions: HashMap<String, SessionRecord>,
    private_keys: HashMap<[u8; 64], KeyEntry>,
    public_keys: HashMap<String, (KeyEntry, String)>,
    session_keys: HashMap<[u8; 64], (String, [u8; 32], DateTime<Utc>)>,
}

/// Reference `KeyStore` implementation backed by a single `tokio::Mutex`.
/// Good enough for unit tests and the §8 scenarios; a real client needs an
/// encrypted, durable store behind this same trait.
#[derive(Default)]
pub struct MemoryKeyStore {
    inner: Mutex<Inner>,
}

impl MemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Test/setup helper: seed a recipient's own KeyInit private key entry.
    pub async fn insert_private_key_entry(&self, pub_key_hash: [u8; 64], entry: KeyEntry) {
        self.inner.lock().await.private_keys.insert(pub_key_hash, entry);
    }

    /// Test/setup helper: seed a peer's long-term public identity.
    pub async fn insert_public_key_entry(&self, peer_uid: String, entry: KeyEntry, nym_address: String) {
        self.inner.lock().await.public_keys.insert(peer_uid, (entry, nym_address));
    }
}

#[async_trait]
impl KeyStore for MemoryKeyStore {
    async fn get_session_state(&self, state_key: &str) -> Result<Option<SessionState>, StoreError> {
        Ok(self.inner.lock().await.states.get(state_key).cloned())
    }

    async fn set_session_state(&self, state_key: &str, state: SessionState) -> Result<(), StoreError> {
        self.inner.lock().await.states.insert(state_key.to_string(), state);
        Ok(())
    }

    async fn store_session(
        &self,
        session_key: &str,
        root_key_hash: [u8; 64],
        chain_key: [u8; 32],
        send: Vec<[u8; 64]>,
        recv: Vec<[u8; 64]>,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        match inner.sessions.get_mut(session_key) {
            Some(existing) => {
                existing.chain_key = chain_key;
                existing.send.extend(send.into_iter().map(Some));
                existing.recv.extend(recv.into_iter().map(Some));
            }
            None => {
                inner.sessions.insert(
                    session_key.to_string(),
                    SessionRecord {
                        root_key_hash,
                        chain_key,
                        send: send.into_iter().map(Some).collect(),
                        recv: recv.into_iter().map(Some).collect(),
                    },
                );
            }
        }
        Ok(())
    }

    async fn has_session(&self, session_key: &str) -> Result<bool, StoreError> {
        Ok(self.inner.lock().await.sessions.contains_key(session_key))
    }

    async fn get_private_key_entry(&self, pub_key_hash: &[u8; 64]) -> Result<KeyEntry, StoreError> {
        self.inner
            .lock()
            .await
            .private_keys
            .get(pub_key_hash)
            .cloned()
            .ok_or(StoreError::NoKeyEntry)
    }

    async fn get_public_key_entry(&self, peer_uid: &str) -> Result<(KeyEntry, String), StoreError> {
        self.inner
            .lock()
            .await
            .public_keys
            .get(peer_uid)
            .cloned()
            .ok_or(StoreError::NoKeyEntry)
    }

    async fn num_message_keys(&self, session_key: &str) -> Result<u64, StoreError> {
        let inner = self.inner.lock().await;
        let record = inner.sessions.get(session_key).ok_or(StoreError::NoSession)?;
        Ok(record.send.len().min(record.recv.len()) as u64)
    }

    async fn get_message_key(
        &self,
        session_key: &str,
        sender: bool,
        index: u64,
    ) -> Result<[u8; 64], StoreError> {
        let inner = self.inner.lock().await;
        let record = inner.sessions.get(session_key).ok_or(StoreError::NoSession)?;
        let slots = if sender { &record.send } else { &record.recv };
        slots
            .get(index as usize)
            .and_then(|slot| *slot)
            .ok_or(StoreError::MessageKeyUsed)
    }

    async fn get_root_key_hash(&self, session_key: &str) -> Result<[u8; 64], StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner.sessions.get(session_key).ok_or(StoreError::NoSession)?.root_key_hash)
    }

    async fn get_chain_key(&self, session_key: &str) -> Result<[u8; 32], StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner.sessions.get(session_key).ok_or(StoreError::NoSession)?.chain_key)
    }

    async fn del_message_key(&self, session_key: &str, sender: bool, index: u64) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        let record = inner.sessions.get_mut(session_key).ok_or(StoreError::NoSession)?;
        let slots = if sender { &mut record.send } else { &mut record.recv };
        match slots.get_mut(index as usize) {
            Some(slot) => *slot = None,
            None => return Err(StoreError::MessageKeyUsed),
        }
        Ok(())
    }

    async fn add_session_key(
        &self,
        hash: [u8; 64],
        json: String,
        priv_key: [u8; 32],
        cleanup_time: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.inner.lock().await.session_keys.insert(hash, (json, priv_key, cleanup_time));
        Ok(())
    }

    async fn get_session_key(&self, hash: &[u8; 64]) -> Result<(String, [u8; 32]), StoreError> {
        self.inner
            .lock()
            .await
            .session_keys
            .get(hash)
            .map(|(json, priv_key, _)| (json.clone(), *priv_key))
            .ok_or(StoreError::NoSessionKey)
    }

    async fn del_session_key(&self, hash: &[u8; 64]) -> Result<(), StoreError> {
        self.inner.lock().await.session_keys.remove(hash);
        Ok(())
    }

    async fn cleanup_session_keys(&self, now: DateTime<Utc>) -> Result<(), StoreError> {
        self.inner.lock().await.session_keys.retain(|_, (_, _, cleanup_time)| *cleanup_time > now);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use emc_crypto::identity::KeyFunction;

    #[tokio::test]
    async fn store_then_consume_message_key() {
        let store = MemoryKeyStore::new();
        store
            .store_session("s1", [1u8; 64], [2u8; 32], vec![[3u8; 64]], vec![[4u8; 64]])
            .await
            .unwrap();

        assert_eq!(store.get_message_key("s1", true, 0).await.unwrap(), [3u8; 64]);
        store.del_message_key("s1", true, 0).await.unwrap();
        assert!(matches!(
            store.get_message_key("s1", true, 0).await,
            Err(StoreError::MessageKeyUsed)
        ));
    }

    #[tokio::test]
    async fn append_batch_keeps_root_key_hash() {
        let store = MemoryKeyStore::new();
        store
            .store_session("s1", [1u8; 64], [2u8; 32], vec![[3u8; 64]], vec![[4u8; 64]])
            .await
            .unwrap();
        store
            .store_session("s1", [9u8; 64], [5u8; 32], vec![[6u8; 64]], vec![[7u8; 64]])
            .await
            .unwrap();

        assert_eq!(store.get_root_key_hash("s1").await.unwrap(), [1u8; 64]);
        assert_eq!(store.get_chain_key("s1").await.unwrap(), [5u8; 32]);
        assert_eq!(store.num_message_keys("s1").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn public_key_lookup_round_trips() {
        let store = MemoryKeyStore::new();
        let entry = KeyEntry::from_public(KeyFunction::Ecdhe25519, [9u8; 32]);
        store.insert_public_key_entry("bob@example.com".into(), entry.clone(), "nym://bob".into()).await;

        let (found, nym) = store.get_public_key_entry("bob@example.com").await.unwrap();
        assert_eq!(found.public, entry.public);
        assert_eq!(nym, "nym://bob");
        assert!(store.get_public_key_entry("nobody@example.com").await.is_err());
    }

    #[tokio::test]
    async fn cleanup_removes_expired_session_keys() {
        let store = MemoryKeyStore::new();
        let now = Utc::now();
        store.add_session_key([1u8; 64], "{}".into(), [0u8; 32], now - chrono::Duration::hours(1)).await.unwrap();
        store.add_session_key([2u8; 64], "{}".into(), [0u8; 32], now + chrono::Duration::hours(1)).await.unwrap();

        store.cleanup_session_keys(now).await.unwrap();

        assert!(store.get_session_key(&[1u8; 64]).await.is_err());
        assert!(store.get_session_key(&[2u8; 64]).await.is_ok());
    }
}
