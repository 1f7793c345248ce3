//! Session state machine (§4.4): per directed peer pair, decides when to
//! start a session, propose a rotation, adopt a reflected next-key, and
//! track delivery counters.
//!
//! This module is pure decision logic over [`SessionState`] — it never
//! touches a key-store. `emc_store::engine` is the orchestrator that loads a
//! `SessionState`, calls into this module and [`crate::rootkey`]/
//! [`crate::kdf`], and persists the result as one logical transaction
//! (§5).

use serde::{Deserialize, Serialize};

use crate::identity::KeyEntry;
use crate::rand_source::{draw_one_in, RandReader};

/// Per directed `(me, peer)` session record (§3 table).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionState {
    pub sender_session_pub: KeyEntry,
    pub next_sender_session_pub: Option<KeyEntry>,
    #[serde(with = "crate::serde_hash")]
    pub recipient_temp_hash: [u8; 64],
    /// The peer's own most recently observed `next_sender_session_pub`
    /// proposal (§3 table). Kept as the full [`KeyEntry`], not just its
    /// hash, because `emc_store::engine` needs the actual public point to
    /// rerun root-key agreement at the moment rotation adopts it — the
    /// proposing message may be several messages in the past by the time
    /// the echo triggers rotation, so a cached hash alone would not be
    /// enough to redo the ECDH.
    pub next_recipient_session_pub_seen: Option<KeyEntry>,
    pub sender_session_count: u64,
    pub sender_message_count: u64,
    pub max_recipient_count: u64,
    pub nym_address: String,
    pub key_init_session: bool,
    /// Records which structural role this local party played when this
    /// session was first established: `true` if we installed it by running
    /// the *recipient* half of root-key agreement (we published the
    /// KeyInit), `false` if we ran the *sender* half (we fetched a peer's
    /// KeyInit). `emc_store::engine` needs this to know, while
    /// `key_init_session` is still `true`, which of our own two tracked
    /// ephemeral hashes corresponds to the KeyInit's ephemeral (`R_K`) — the
    /// value both peers must plug into the chain-key recurrence identically.
    /// Meaningless once `key_init_session` is `false` (rotation picks the
    /// shared ephemeral by identity sort order instead; see `engine.rs`).
    pub local_is_key_init_recipient: bool,
}

/// Outcome of processing an incoming header against the current state.
#[derive(Debug)]
pub enum RotationOutcome {
    NotRotated,
    /// `new_peer_ephemeral` is the peer's public key promoted from
    /// [`SessionState::next_recipient_session_pub_seen`] — the caller needs
    /// it to rerun root-key agreement under the rotated pairing.
    Rotated { previous_sender_message_count: u64, new_peer_ephemeral: KeyEntry },
}

impl SessionState {
    /// The first session rooted in a KeyInit (§4.4 step 2): all counters
    /// zero, `key_init_session = true`.
    pub fn first_session(
        sender_session_pub: KeyEntry,
        recipient_temp_hash: [u8; 64],
        nym_address: String,
        local_is_key_init_recipient: bool,
    ) -> Self {
        Self {
            sender_session_pub,
            next_sender_session_pub: None,
            recipient_temp_hash,
            next_recipient_session_pub_seen: None,
            sender_session_count: 0,
            sender_message_count: 0,
            max_recipient_count: 0,
            nym_address,
            key_init_session: true,
            local_is_key_init_recipient,
        }
    }

    /// The shared ephemeral hash both peers must plug into
    /// [`crate::kdf::generate_key_batch`] for this session to derive matching
    /// key streams (see the field doc on [`Self::local_is_key_init_recipient`]).
    /// While `key_init_session` holds, it is whichever of our two tracked
    /// hashes belongs to the KeyInit's ephemeral; once rotated, it is the
    /// tracked hash belonging to whichever identity sorts second under
    /// [`crate::kdf::identity_fix`].
    pub fn shared_kdf_peer_hash(&self, local_identity: &str, peer_identity: &str) -> [u8; 64] {
        let local_owns_it = if self.key_init_session {
            self.local_is_key_init_recipient
        } else {
            let (_, local_sorts_first) = crate::kdf::identity_fix(local_identity, peer_identity);
            !local_sorts_first
        };
        if local_owns_it {
            self.sender_session_pub.hash
        } else {
            self.recipient_temp_hash
        }
    }

    /// §4.4 send step 3: with probability `1/average_session_size`, and
    /// only if no proposal is already outstanding, draw a fresh
    /// `next_sender_session_pub`. `make_next` is called at most once.
    pub fn maybe_propose_next_key<R: RandReader + ?Sized>(
        &mut self,
        reader: &mut R,
        average_session_size: u64,
        make_next: impl FnOnce() -> KeyEntry,
    ) {
        if self.next_sender_session_pub.is_some() {
            return;
        }
        if draw_one_in(reader, average_session_size) {
            self.next_sender_session_pub = Some(make_next());
        }
    }

    /// §4.4 send step 7: increment after a successful emit.
    pub fn record_message_sent(&mut self) {
        self.sender_message_count += 1;
    }

    /// §4.4 receive step 3, first half: "update `next_recipient_session_pub_seen`
    /// from `header.next_sender_session_pub` when newer" — the spec gives
    /// no explicit version field to compare against, so "newer" is taken as
    /// "differs from what's already recorded" (the peer only ever proposes
    /// a replacement once the prior one has been adopted or abandoned).
    pub fn observe_peer_proposal(&mut self, peer_next_sender_session_pub: Option<KeyEntry>) {
        if let Some(entry) = peer_next_sender_session_pub {
            let already_seen =
                self.next_recipient_session_pub_seen.as_ref().map(|e| e.hash) == Some(entry.hash);
            if !already_seen {
                self.next_recipient_session_pub_seen = Some(entry);
            }
        }
    }

    /// §4.4 receive step 3, second half: if the peer's header echoes our own
    /// outstanding `next_sender_session_pub` back as their
    /// `next_recipient_session_pub_seen`, rotate. The peer's own next-key
    /// hash (already recorded via [`Self::observe_peer_proposal`]) becomes
    /// our new `recipient_temp_hash`.
    pub fn try_rotate(
        &mut self,
        peer_echoed_hash: Option<[u8; 64]>,
        make_fresh_next: impl FnOnce() -> KeyEntry,
    ) -> RotationOutcome {
        let Some(outstanding) = self.next_sender_session_pub.as_ref() else {
            return RotationOutcome::NotRotated;
        };
        if Some(outstanding.hash) != peer_echoed_hash {
            return RotationOutcome::NotRotated;
        }
        let Some(new_peer_entry) = self.next_recipient_session_pub_seen.take() else {
            return RotationOutcome::NotRotated;
        };

        let previous_sender_message_count = self.sender_message_count;
        self.sender_session_count += previous_sender_message_count;
        self.sender_session_pub = self.next_sender_session_pub.take().unwrap();
        self.recipient_temp_hash = new_peer_entry.hash;
        self.next_sender_session_pub = Some(make_fresh_next());
        self.sender_message_count = 0;
        self.key_init_session = false;

        tracing::debug!(
            previous_sender_message_count,
            new_sender_session_count = self.sender_session_count,
            "session rotated: peer echoed our proposed next key"
        );

        RotationOutcome::Rotated { previous_sender_message_count, new_peer_ephemeral: new_peer_entry }
    }

    /// §4.4 receive: `max_recipient_count` absorbs the highest
    /// `sender_message_count` the peer has declared.
    pub fn observe_peer_message_count(&mut self, peer_sender_message_count: u64) {
        self.max_recipient_count = self.max_recipient_count.max(peer_sender_message_count);
    }

    /// §4.4 step 4 / §9: whether the chain needs another batch before
    /// `index` can be consumed.
    pub fn needs_more_keys(available: u64, index: u64) -> bool {
        index >= available
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::KeyFunction;
    use crate::rand_source::{AlwaysZeroReader, NeverReader};

    fn dummy_entry(tag: u8) -> KeyEntry {
        KeyEntry::from_public(KeyFunction::Ecdhe25519, [tag; 32])
    }

    fn fresh_state() -> SessionState {
        SessionState::first_session(dummy_entry(1), [9u8; 64], "nym://bob".into(), false)
    }

    #[test]
    fn proposal_fires_with_always_zero_reader() {
        let mut state = fresh_state();
        let mut r = AlwaysZeroReader;
        state.maybe_propose_next_key(&mut r, 1000, || dummy_entry(2));
        assert!(state.next_sender_session_pub.is_some());
    }

    #[test]
    fn proposal_never_fires_with_never_reader() {
        let mut state = fresh_state();
        let mut r = NeverReader;
        state.maybe_propose_next_key(&mut r, 1000, || dummy_entry(2));
        assert!(state.next_sender_session_pub.is_none());
    }

    #[test]
    fn proposal_is_idempotent_once_outstanding() {
        let mut state = fresh_state();
        let mut r = AlwaysZeroReader;
        state.maybe_propose_next_key(&mut r, 1000, || dummy_entry(2));
        let first_hash = state.next_sender_session_pub.as_ref().unwrap().hash;
        state.maybe_propose_next_key(&mut r, 1000, || dummy_entry(3));
        assert_eq!(state.next_sender_session_pub.as_ref().unwrap().hash, first_hash);
    }

    #[test]
    fn full_rotation_scenario() {
        let mut state = fresh_state();
        let mut r = AlwaysZeroReader;
        state.maybe_propose_next_key(&mut r, 1000, || dummy_entry(2));
        let proposed_hash = state.next_sender_session_pub.as_ref().unwrap().hash;

        state.record_message_sent();
        state.record_message_sent();
        assert_eq!(state.sender_message_count, 2);

        // Peer proposes their own next key, which we record.
        state.observe_peer_proposal(Some(dummy_entry(7)));
        assert_eq!(state.next_recipient_session_pub_seen.as_ref().unwrap().hash, dummy_entry(7).hash);

        // Peer's next message echoes our proposal back.
        let outcome = state.try_rotate(Some(proposed_hash), || dummy_entry(4));
        match outcome {
            RotationOutcome::Rotated { previous_sender_message_count, new_peer_ephemeral } => {
                assert_eq!(previous_sender_message_count, 2);
                assert_eq!(new_peer_ephemeral.hash, dummy_entry(7).hash);
            }
            RotationOutcome::NotRotated => panic!("expected rotation"),
        }
        assert_eq!(state.sender_session_count, 2);
        assert_eq!(state.sender_message_count, 0);
        assert_eq!(state.recipient_temp_hash, dummy_entry(7).hash);
        assert!(state.next_sender_session_pub.is_some());
        assert!(!state.key_init_session);
    }

    #[test]
    fn mismatched_echo_does_not_rotate() {
        let mut state = fresh_state();
        let mut r = AlwaysZeroReader;
        state.maybe_propose_next_key(&mut r, 1000, || dummy_entry(2));
        state.observe_peer_proposal(Some(dummy_entry(7)));
        let outcome = state.try_rotate(Some([0xAAu8; 64]), || dummy_entry(4));
        assert!(matches!(outcome, RotationOutcome::NotRotated));
    }
}
