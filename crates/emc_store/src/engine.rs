//! The top-level orchestrator (§4.4, §5): `encrypt`/`decrypt` compose
//! `emc_crypto`'s session state machine, root-key agreement and key
//! derivation with `emc_proto`'s codec against a [`KeyStore`], as one
//! logical transaction per message (§5: "the used message key must be
//! emptied before the ciphertext is handed to the caller").
//!
//! Neither function touches a database transaction directly — that is the
//! concrete `KeyStore`'s job (§5: "A concrete implementation should wrap
//! these operations in a database transaction"). This module only fixes
//! the *order* of operations so a transactional `KeyStore` has something
//! correct to wrap.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};

use emc_crypto::identity::{KeyEntry, KeyFunction};
use emc_crypto::kdf::{self, NUM_OF_FUTURE_KEYS};
use emc_crypto::keyinit::{KeyInit, SessionAnchor};
use emc_crypto::primitives::{aes256_ctr_apply, ed25519_verify, hmac_sha512, hmac_sha512_verify, sha512};
use emc_crypto::rand_source::{OsRandReader, RandReader};
use emc_crypto::rootkey;
use emc_crypto::session::{RotationOutcome, SessionState};
use emc_crypto::CryptoError;
use emc_proto::codec::{
    self, CONTENT_INNER_CAPACITY, CRYPTO_SETUP_IV_LEN, MAX_CONTENT, OUTER_CRYPTO_SETUP,
    OUTER_ENCRYPTED_PACKET, CRYPTO_SETUP_PACKET_SIZE, CONTENT_PACKET_SIZE, SIGNATURE_PACKET_SIZE,
};
use emc_proto::envelope::{decode_envelope, encode_envelope};
use emc_proto::header::{Header, HeaderStatus, PreHeader};
use emc_proto::identity::require_mapped;
use emc_proto::CodecError;

use crate::error::{CoreError, StoreError};
use crate::keystore::KeyStore;
use crate::uid::{ParsedUid, UidSource};

/// §9: "AverageSessionSize=1000".
pub const AVERAGE_SESSION_SIZE: u64 = 1000;

// ── Key-store-facing identifiers (§6.1) ─────────────────────────────────────

fn b64(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

fn decode_hash_b64(s: &str) -> Result<[u8; 64], CoreError> {
    let raw = STANDARD
        .decode(s)
        .map_err(|_| StoreError::InvalidIdentity("hash is not valid base64".into()))?;
    raw.try_into()
        .map_err(|_| CoreError::Store(StoreError::InvalidIdentity("hash is not 64 bytes".into())))
}

/// `state_key` (§6.1), computed from each local party's own perspective:
/// "(me, peer)", not "(sender, recipient)". Alice's own record of her
/// relationship with Bob and Bob's own record of his relationship with
/// Alice are therefore two different keys in two different key-stores,
/// each read and written by that party alone for both sending to and
/// receiving from the other. See DESIGN.md.
fn state_key(my_identity_pub: &[u8; 32], peer_identity_pub: &[u8; 32]) -> String {
    let mut buf = Vec::with_capacity(64);
    buf.extend_from_slice(my_identity_pub);
    buf.extend_from_slice(peer_identity_pub);
    b64(&sha512(&buf))
}

/// `session_key` (§6.1). Unlike `state_key`, this must land on the *same*
/// string for both peers, since it indexes one shared message-key batch.
/// The spec's formula names its four inputs `sender_id_hash` /
/// `recipient_id_hash` / `sender_session_hash` / `recipient_temp_hash`, but
/// once a session has rotated there is no longer a fixed "sender" role to
/// hang those names on. This orders the two (identity hash, ephemeral
/// hash) pairs by `identity_fix`'s own lexicographic tie-break instead, so
/// both sides land on the same four-hash concatenation regardless of which
/// of them is the one currently sending. See DESIGN.md.
fn session_key(
    local_identity: &str,
    local_identity_pub_hash: &[u8; 64],
    peer_identity: &str,
    peer_identity_pub_hash: &[u8; 64],
    local_session_hash: &[u8; 64],
    peer_temp_hash: &[u8; 64],
) -> String {
    let (_, local_first) = kdf::identity_fix(local_identity, peer_identity);
    let (id_a, id_b, eph_a, eph_b) = if local_first {
        (local_identity_pub_hash, peer_identity_pub_hash, local_session_hash, peer_temp_hash)
    } else {
        (peer_identity_pub_hash, local_identity_pub_hash, peer_temp_hash, local_session_hash)
    };
    let mut buf = Vec::with_capacity(64 * 4);
    buf.extend_from_slice(id_a);
    buf.extend_from_slice(id_b);
    buf.extend_from_slice(eph_a);
    buf.extend_from_slice(eph_b);
    b64(&sha512(&buf))
}

fn public_only(entry: &KeyEntry) -> KeyEntry {
    KeyEntry::from_public(entry.function, entry.public)
}

// ── Message-key batch maintenance (§4.2, §4.4 step 4) ───────────────────────

/// Install the session's first batch, chaining from the freshly derived
/// root key treated as the initial chain key (§4.2: "Given 32-byte root
/// key (treated as initial chain key)").
async fn install_first_batch(
    store: &dyn KeyStore,
    session_key_str: &str,
    root_key: &[u8; 32],
    root_key_hash: [u8; 64],
    peer_pub_hash: &[u8; 64],
    fix: &[u8; 64],
    local_is_first: bool,
) -> Result<(), CoreError> {
    let (chain_key, pairs) =
        kdf::generate_key_batch(root_key, peer_pub_hash, fix, local_is_first, NUM_OF_FUTURE_KEYS)?;
    let send = pairs.iter().map(|(s, _)| *s).collect();
    let recv = pairs.iter().map(|(_, r)| *r).collect();
    store.store_session(session_key_str, root_key_hash, chain_key, send, recv).await?;
    Ok(())
}

/// §4.4 step 4: "if `sender_message_count >= N`, extend by another batch
/// from the stored chain key." Shared by both directions since the
/// extension itself doesn't care which index is about to be consumed —
/// only that the batch covers it.
async fn ensure_message_keys(
    store: &dyn KeyStore,
    session_key_str: &str,
    index_needed: u64,
    peer_pub_hash: &[u8; 64],
    fix: &[u8; 64],
    local_is_first: bool,
) -> Result<(), CoreError> {
    let available = store.num_message_keys(session_key_str).await?;
    if !SessionState::needs_more_keys(available, index_needed) {
        return Ok(());
    }
    let chain_key = store.get_chain_key(session_key_str).await?;
    let root_key_hash = store.get_root_key_hash(session_key_str).await?;
    let (new_chain_key, pairs) =
        kdf::generate_key_batch(&chain_key, peer_pub_hash, fix, local_is_first, NUM_OF_FUTURE_KEYS)?;
    let send = pairs.iter().map(|(s, _)| *s).collect();
    let recv = pairs.iter().map(|(_, r)| *r).collect();
    store.store_session(session_key_str, root_key_hash, new_chain_key, send, recv).await?;
    Ok(())
}

// ── KeyInit publication lifecycle (§4.5) ────────────────────────────────────

/// Record a freshly issued `SessionAnchor`'s ephemeral private key so a
/// first-time sender's `recipient_temp_hash` can be resolved back to it
/// (§4.4 receive step 1). `cleanup_time` should track the `KeyInit`'s own
/// `not_after` — once it passes, [`expire_published_key_inits`] reclaims
/// the slot (§4.5: unused anchors are reclaimed after expiry).
pub async fn publish_key_init(
    store: &dyn KeyStore,
    anchor: &SessionAnchor,
    cleanup_time: DateTime<Utc>,
) -> Result<(), CoreError> {
    let priv_key = *anchor
        .ephemeral
        .private()
        .ok_or_else(|| CryptoError::InvalidKey("anchor ephemeral has no private half".into()))?;
    let json = serde_json::to_string(anchor).map_err(CryptoError::from)?;
    store.add_session_key(anchor.ephemeral.hash, json, priv_key, cleanup_time).await?;
    Ok(())
}

/// Sweep expired, unclaimed `SessionAnchor`s (§4.5 final paragraph).
pub async fn expire_published_key_inits(store: &dyn KeyStore, now: DateTime<Utc>) -> Result<(), CoreError> {
    store.cleanup_session_keys(now).await?;
    Ok(())
}

// ── Send path (§4.4 "On send") ──────────────────────────────────────────────

/// Everything [`encrypt`] needs beyond the plaintext. Identity-message
/// creation/signing, nym delivery and mix-network delay are out-of-scope
/// external collaborators (§1) — the caller supplies their outputs here.
pub struct SendContext<'a> {
    pub sender_identity: &'a str,
    pub sender_identity_key: &'a KeyEntry,
    pub sender_uid: &'a dyn UidSource,
    /// Present only when this message should carry an Ed25519 signature
    /// over `SHA512(content)` (§4.1).
    pub sender_signing_key: Option<&'a KeyEntry>,
    pub recipient_identity: &'a str,
    /// Required only the first time this sender addresses this recipient
    /// (§4.4 step 2); ignored once a session already exists.
    pub recipient_key_init: Option<&'a KeyInit>,
    pub accepted_key_init_uris: &'a [&'a str],
    pub sender_last_keychain_hash: &'a str,
    pub max_delay: u64,
    /// §4.4 step 1: "If `status == Reset`, discard existing session
    /// state." The spec gives no trigger for this beyond the bare
    /// condition; this implementation treats it as a caller directive —
    /// set when the caller wants to force a fresh KeyInit-rooted session
    /// (e.g. the user manually resets a contact) — and marks the outgoing
    /// header `Reset` so the recipient's own state also gets discarded on
    /// their next send. See DESIGN.md.
    pub force_reset: bool,
}

pub async fn encrypt<R: RandReader + ?Sized>(
    store: &dyn KeyStore,
    reader: &mut R,
    ctx: &SendContext<'_>,
    content: &[u8],
) -> Result<String, CoreError> {
    if content.len() > MAX_CONTENT {
        return Err(CoreError::Codec(CodecError::BadPacketSize));
    }
    require_mapped(ctx.sender_identity).map_err(|e| StoreError::InvalidIdentity(e.to_string()))?;
    require_mapped(ctx.recipient_identity).map_err(|e| StoreError::InvalidIdentity(e.to_string()))?;

    let (recipient_identity_key, _default_nym_address) =
        store.get_public_key_entry(ctx.recipient_identity).await?;
    recipient_identity_key.check_invariant()?;

    let my_state_key = state_key(&ctx.sender_identity_key.public, &recipient_identity_key.public);
    let existing = if ctx.force_reset { None } else { store.get_session_state(&my_state_key).await? };

    let mut state = match existing {
        Some(s) => s,
        None => {
            let key_init = ctx
                .recipient_key_init
                .ok_or(CoreError::Store(StoreError::NoKeyEntry))?;
            let anchor = key_init.verify(ctx.accepted_key_init_uris, Utc::now())?;

            let sender_session = KeyEntry::generate(KeyFunction::Ecdhe25519, reader);
            let agreement = rootkey::agree_as_sender(
                ctx.sender_identity_key,
                &sender_session,
                &recipient_identity_key,
                &anchor.ephemeral,
                None,
            )?;

            let fresh = SessionState::first_session(
                sender_session,
                anchor.ephemeral.hash,
                anchor.nym_address.clone(),
                false,
            );

            let (fix, local_is_first) = kdf::identity_fix(ctx.sender_identity, ctx.recipient_identity);
            let peer_pub_hash = fresh.shared_kdf_peer_hash(ctx.sender_identity, ctx.recipient_identity);
            let session_key_str = session_key(
                ctx.sender_identity,
                &ctx.sender_identity_key.hash,
                ctx.recipient_identity,
                &recipient_identity_key.hash,
                &fresh.sender_session_pub.hash,
                &fresh.recipient_temp_hash,
            );
            install_first_batch(
                store,
                &session_key_str,
                &agreement.root_key,
                agreement.root_key_hash,
                &peer_pub_hash,
                &fix,
                local_is_first,
            )
            .await?;

            tracing::debug!(
                recipient = ctx.recipient_identity,
                session_key = %session_key_str,
                "bootstrapped new session from recipient KeyInit"
            );

            fresh
        }
    };

    // §4.4 step 3: only when reusing an existing session does the
    // rotation draw happen — a freshly bootstrapped session never
    // proposes a replacement for itself on the same message.
    if state.key_init_session || state.sender_message_count > 0 || state.sender_session_count > 0 {
        state.maybe_propose_next_key(reader, AVERAGE_SESSION_SIZE, || {
            let mut local_rng = OsRandReader;
            KeyEntry::generate(KeyFunction::Ecdhe25519, &mut local_rng)
        });
    }

    let (fix, local_is_first) = kdf::identity_fix(ctx.sender_identity, ctx.recipient_identity);
    let peer_pub_hash = state.shared_kdf_peer_hash(ctx.sender_identity, ctx.recipient_identity);
    let session_key_str = session_key(
        ctx.sender_identity,
        &ctx.sender_identity_key.hash,
        ctx.recipient_identity,
        &recipient_identity_key.hash,
        &state.sender_session_pub.hash,
        &state.recipient_temp_hash,
    );

    ensure_message_keys(
        store,
        &session_key_str,
        state.sender_message_count,
        &peer_pub_hash,
        &fix,
        local_is_first,
    )
    .await?;

    // §5(a): empty the slot before the ciphertext is built at all.
    let message_key = store.get_message_key(&session_key_str, true, state.sender_message_count).await?;
    store.del_message_key(&session_key_str, true, state.sender_message_count).await?;

    let split = kdf::split_message_key(&message_key)?;

    let signature = match ctx.sender_signing_key {
        Some(signing_key) => Some(signing_key.sign(&sha512(content))?),
        None => None,
    };

    let (content_packet, signature_packet) = codec::build_content_packets(reader, content, signature)?;
    let mut combined = content_packet;
    combined.extend_from_slice(&signature_packet);
    debug_assert_eq!(combined.len(), CONTENT_INNER_CAPACITY + emc_proto::codec::SIGNATURE_INNER_CAPACITY);
    let iv = draw_crypto_setup_iv(reader);
    aes256_ctr_apply(&split.aes_key, &iv, &mut combined)?;
    let (content_ct, signature_ct) = combined.split_at(CONTENT_INNER_CAPACITY);

    let hmac_covered = assemble_hmac_covered(&iv, content_ct, signature_ct);
    let hmac = hmac_sha512(&split.hmac_key, &hmac_covered)?;

    let mut header = Header {
        ciphersuite: emc_crypto::primitives::CIPHERSUITE.to_string(),
        recipient_pub_hash: b64(&recipient_identity_key.hash),
        recipient_temp_hash: b64(&state.recipient_temp_hash),
        sender_identity: ctx.sender_identity.to_string(),
        sender_session_pub: public_only(&state.sender_session_pub),
        sender_identity_pub_hash: b64(&ctx.sender_identity_key.hash),
        sender_identity_pub: public_only(ctx.sender_identity_key),
        next_sender_session_pub: state.next_sender_session_pub.as_ref().map(public_only),
        next_recipient_session_pub_seen: state.next_recipient_session_pub_seen.as_ref().map(|e| b64(&e.hash)),
        nym_address: state.nym_address.clone(),
        max_delay: ctx.max_delay,
        sender_session_count: state.sender_session_count,
        sender_message_count: state.sender_message_count,
        sender_uid: ctx.sender_uid.to_wire_json(),
        sender_last_keychain_hash: ctx.sender_last_keychain_hash.to_string(),
        status: if ctx.force_reset { HeaderStatus::Reset } else { HeaderStatus::Ok },
        padding: String::new(),
    };
    header.apply_padding(reader)?;

    let sender_identity_priv = ctx
        .sender_identity_key
        .private()
        .ok_or_else(|| CryptoError::InvalidKey("sender identity key has no private half".into()))?;
    let sealed_header = header.seal(sender_identity_priv, &recipient_identity_key.public)?;

    let pre_header = PreHeader { version: emc_crypto::primitives::WIRE_VERSION, sender_header_pub: ctx.sender_identity_key.public };
    let pre_header_payload = pre_header.encode()?;

    let frame = codec::write_frame(&pre_header_payload, &sealed_header, &iv, content_ct, signature_ct, &hmac)?;

    tracing::trace!(
        recipient = ctx.recipient_identity,
        sender_message_count = state.sender_message_count,
        "message encrypted"
    );

    state.record_message_sent();
    store.set_session_state(&my_state_key, state).await?;

    Ok(encode_envelope(&frame))
}

/// Draw the 16-byte CryptoSetup IV once up front so it can be referenced
/// both for the AES-CTR call and for the frame assembly without borrowing
/// `reader` twice.
fn draw_crypto_setup_iv<R: RandReader + ?Sized>(reader: &mut R) -> [u8; CRYPTO_SETUP_IV_LEN] {
    let mut iv = [0u8; CRYPTO_SETUP_IV_LEN];
    reader.fill(&mut iv);
    iv
}

/// Mirrors exactly what [`codec::write_frame`]/[`codec::read_frame`]
/// produce for the HMAC-covered region (§4.1: "every outer packet from
/// CryptoSetup onward"): the CryptoSetup, content and signature outer
/// packets concatenated, packet_counts 2, 3, 4.
fn assemble_hmac_covered(iv: &[u8; CRYPTO_SETUP_IV_LEN], content_ct: &[u8], signature_ct: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(CRYPTO_SETUP_PACKET_SIZE + CONTENT_PACKET_SIZE + SIGNATURE_PACKET_SIZE);
    codec::write_outer_packet(&mut buf, OUTER_CRYPTO_SETUP, 2, iv);
    codec::write_outer_packet(&mut buf, OUTER_ENCRYPTED_PACKET, 3, content_ct);
    codec::write_outer_packet(&mut buf, OUTER_ENCRYPTED_PACKET, 4, signature_ct);
    buf
}

// ── Receive path (§4.4 "On receive") ────────────────────────────────────────

/// Everything [`decrypt`] needs beyond the envelope: every local identity
/// worth trying against the sealed header (§4.4 step 1), paired with its
/// canonical identity string.
pub struct ReceiveContext<'a> {
    pub owned_identities: &'a [(&'a str, &'a KeyEntry)],
}

pub struct DecryptedMessage {
    pub plaintext: Vec<u8>,
    pub sender_identity: String,
    /// Present iff the sender's inner `DATA` packet carried the `SIGN`
    /// bit and the signature verified under the sender UID's signature
    /// key (§8 "Signature binding").
    pub signature: Option<[u8; 64]>,
}

pub async fn decrypt<R: RandReader + ?Sized>(
    store: &dyn KeyStore,
    reader: &mut R,
    ctx: &ReceiveContext<'_>,
    envelope: &str,
) -> Result<DecryptedMessage, CoreError> {
    let frame = decode_envelope(envelope)?;
    let parsed = codec::read_frame(&frame)?;
    let pre_header = PreHeader::decode(parsed.pre_header_payload)?;

    // §4.3 anti-reflection: a sender-header public equal to any local
    // static key is rejected outright.
    if ctx.owned_identities.iter().any(|(_, key)| key.public == pre_header.sender_header_pub) {
        return Err(CoreError::Crypto(CryptoError::KeyReflection));
    }

    let mut opened: Option<(&str, &KeyEntry, Header)> = None;
    for (identity_str, identity_key) in ctx.owned_identities.iter().copied() {
        let Some(priv_key) = identity_key.private() else { continue };
        if let Some(header) = Header::try_open(parsed.encrypted_header_payload, priv_key, &pre_header.sender_header_pub)
        {
            opened = Some((identity_str, identity_key, header));
            break;
        }
    }
    let (recipient_identity, recipient_identity_key, header) =
        opened.ok_or(CoreError::Codec(CodecError::BadHeaderKey))?;

    require_mapped(&header.sender_identity).map_err(|e| StoreError::InvalidIdentity(e.to_string()))?;
    header.sender_identity_pub.check_invariant()?;
    header.sender_session_pub.check_invariant()?;

    if header.recipient_pub_hash != b64(&recipient_identity_key.hash) {
        return Err(CoreError::Codec(CodecError::BadHeaderKey));
    }

    // §5/§9: parse and validate the embedded sender UID in parallel with
    // the key-store work below; joined again before signature
    // verification.
    let uid_json = header.sender_uid.clone();
    let uid_task = tokio::spawn(async move { ParsedUid::from_wire_json(&uid_json) });

    let my_state_key = state_key(&recipient_identity_key.public, &header.sender_identity_pub.public);
    let existing = store.get_session_state(&my_state_key).await?;

    let (state, agreement_session_key) = match existing {
        None => {
            let recipient_temp_hash = decode_hash_b64(&header.recipient_temp_hash)?;
            let recipient_ephemeral = store.get_private_key_entry(&recipient_temp_hash).await?;

            let agreement = rootkey::agree_as_recipient(
                recipient_identity_key,
                &recipient_ephemeral,
                &header.sender_identity_pub,
                &header.sender_session_pub,
                None,
            )?;

            let mut fresh = SessionState::first_session(
                recipient_ephemeral,
                header.sender_session_pub.hash,
                header.nym_address.clone(),
                true,
            );
            // §4.4 receive step 3: "Also generate a local next_sender_session_pub."
            fresh.next_sender_session_pub = Some(KeyEntry::generate(KeyFunction::Ecdhe25519, reader));

            let (fix, local_is_first) = kdf::identity_fix(recipient_identity, &header.sender_identity);
            let peer_pub_hash = fresh.shared_kdf_peer_hash(recipient_identity, &header.sender_identity);
            let session_key_str = session_key(
                recipient_identity,
                &recipient_identity_key.hash,
                &header.sender_identity,
                &header.sender_identity_pub.hash,
                &fresh.sender_session_pub.hash,
                &fresh.recipient_temp_hash,
            );
            install_first_batch(
                store,
                &session_key_str,
                &agreement.root_key,
                agreement.root_key_hash,
                &peer_pub_hash,
                &fix,
                local_is_first,
            )
            .await?;

            tracing::debug!(
                sender = %header.sender_identity,
                session_key = %session_key_str,
                "bootstrapped new session from inbound KeyInit-rooted message"
            );

            (fresh, session_key_str)
        }
        Some(mut s) => {
            let pre_rotate_session_key = session_key(
                recipient_identity,
                &recipient_identity_key.hash,
                &header.sender_identity,
                &header.sender_identity_pub.hash,
                &s.sender_session_pub.hash,
                &s.recipient_temp_hash,
            );

            s.observe_peer_proposal(header.next_sender_session_pub.clone());
            s.observe_peer_message_count(header.sender_message_count);

            let peer_echoed_hash = match &header.next_recipient_session_pub_seen {
                Some(echoed) => Some(decode_hash_b64(echoed)?),
                None => None,
            };
            let rotation = s.try_rotate(peer_echoed_hash, || {
                let mut local_rng = OsRandReader;
                KeyEntry::generate(KeyFunction::Ecdhe25519, &mut local_rng)
            });

            let session_key_str = match rotation {
                RotationOutcome::NotRotated => pre_rotate_session_key,
                RotationOutcome::Rotated { new_peer_ephemeral, previous_sender_message_count } => {
                    let previous_root_key_hash = store.get_root_key_hash(&pre_rotate_session_key).await?;
                    let agreement = rootkey::agree_as_recipient(
                        recipient_identity_key,
                        &s.sender_session_pub,
                        &header.sender_identity_pub,
                        &new_peer_ephemeral,
                        Some(&previous_root_key_hash),
                    )?;

                    let (fix, local_is_first) = kdf::identity_fix(recipient_identity, &header.sender_identity);
                    let peer_pub_hash = s.shared_kdf_peer_hash(recipient_identity, &header.sender_identity);
                    let new_session_key_str = session_key(
                        recipient_identity,
                        &recipient_identity_key.hash,
                        &header.sender_identity,
                        &header.sender_identity_pub.hash,
                        &s.sender_session_pub.hash,
                        &s.recipient_temp_hash,
                    );
                    install_first_batch(
                        store,
                        &new_session_key_str,
                        &agreement.root_key,
                        agreement.root_key_hash,
                        &peer_pub_hash,
                        &fix,
                        local_is_first,
                    )
                    .await?;

                    tracing::debug!(
                        sender = %header.sender_identity,
                        previous_sender_message_count,
                        new_session_key = %new_session_key_str,
                        "session rotated on receive: peer echoed our proposed next key"
                    );

                    new_session_key_str
                }
            };

            (s, session_key_str)
        }
    };
    let session_key_str = agreement_session_key;

    let (fix, local_is_first) = kdf::identity_fix(recipient_identity, &header.sender_identity);
    let peer_pub_hash = state.shared_kdf_peer_hash(recipient_identity, &header.sender_identity);
    ensure_message_keys(
        store,
        &session_key_str,
        header.sender_message_count,
        &peer_pub_hash,
        &fix,
        local_is_first,
    )
    .await?;

    let message_key = store
        .get_message_key(&session_key_str, false, header.sender_message_count)
        .await
        .map_err(CoreError::Store)?;

    let split = kdf::split_message_key(&message_key)?;

    hmac_sha512_verify(&split.hmac_key, parsed.hmac_covered, parsed.hmac).map_err(|_| {
        tracing::warn!(sender = %header.sender_identity, "HMAC verification failed, dropping message");
        CodecError::BadHmac
    })?;

    let mut crypto_setup_iv = [0u8; CRYPTO_SETUP_IV_LEN];
    crypto_setup_iv.copy_from_slice(parsed.crypto_setup_iv);

    let mut combined = parsed.content_packet.to_vec();
    combined.extend_from_slice(parsed.signature_packet);
    aes256_ctr_apply(&split.aes_key, &crypto_setup_iv, &mut combined)?;
    let (content_buf, signature_buf) = combined.split_at(CONTENT_INNER_CAPACITY);

    let (plaintext, signature) = codec::parse_content_packets(content_buf, signature_buf)?;

    let parsed_uid = uid_task
        .await
        .map_err(|_| CoreError::Store(StoreError::InvalidIdentity("sender UID task panicked".into())))??;

    if let Some(sig) = signature {
        ed25519_verify(&parsed_uid.signature_pub, &sha512(&plaintext), &sig).map_err(|e| {
            tracing::warn!(sender = %header.sender_identity, "signature verification failed");
            e
        })?;
    }

    // §5(a)/(b): empty the slot, then persist the advanced state.
    store.del_message_key(&session_key_str, false, header.sender_message_count).await?;
    store.set_session_state(&my_state_key, state).await?;

    Ok(DecryptedMessage {
        plaintext,
        sender_identity: header.sender_identity.clone(),
        signature,
    })
}
