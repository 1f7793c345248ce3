//! Key derivation (§4.2): symmetric key split, root-key derivation, and the
//! chain-key → message-key recurrence (§3).
//!
//! # Open question resolved here
//! §3 gives one generic message-key formula —
//! `HMAC-SHA-512(chain_key, "MESSAGE" || SHA512(peer_pub) || identity_fix)`
//! — parameterized on "peer_pub", without spelling out how the *send* key
//! at index `i` and the *recv* key at index `i` (which must differ, since
//! they encrypt traffic in opposite directions but are derived from the
//! same chain step) are told apart. `original_source` carried no retained
//! files to settle this byte-for-byte, so this implementation adds the
//! minimal extra input needed for the two keys to diverge: a one-byte role
//! tag, assigned by `identity_fix`'s own lexicographic tie-break so both
//! peers agree which role-byte is "mine" without a round trip. Concretely:
//! `role_byte = 0x00` for the lexicographically-first identity's outgoing
//! chain, `0x01` for the other's — mirroring how `identity_fix` itself
//! breaks the tie (§4.4 "Ordering and tie-breaks").

use zeroize::Zeroize;

use crate::error::CryptoError;
use crate::primitives::{hkdf_sha512, hmac_sha512, sha512};

/// Number of message keys fetched per chain-extension batch (§9).
pub const NUM_OF_FUTURE_KEYS: u64 = 50;

const ROLE_FIRST: u8 = 0x00;
const ROLE_SECOND: u8 = 0x01;

// ── Symmetric key split (§4.2) ───────────────────────────────────────────────

/// A 64-byte message key split into a 32-byte AES key and a 64-byte HMAC key
/// via HKDF-SHA-512.
pub struct SplitKey {
    pub aes_key: [u8; 32],
    pub hmac_key: [u8; 64],
}

impl Drop for SplitKey {
    fn drop(&mut self) {
        self.aes_key.zeroize();
        self.hmac_key.zeroize();
    }
}

pub fn split_message_key(message_key: &[u8; 64]) -> Result<SplitKey, CryptoError> {
    let mut out = [0u8; 96];
    hkdf_sha512(message_key, None, b"dl-symmetric-split-v1", &mut out)?;
    let mut aes_key = [0u8; 32];
    let mut hmac_key = [0u8; 64];
    aes_key.copy_from_slice(&out[..32]);
    hmac_key.copy_from_slice(&out[32..]);
    out.zeroize();
    Ok(SplitKey { aes_key, hmac_key })
}

// ── identity_fix (§3, §4.4) ──────────────────────────────────────────────────

/// `identity_fix = SHA512(sort(sender_id, recipient_id))`, canonicalized so
/// both peers compute the same value without a round trip. Also returns
/// whether `a` sorted first, for the role-byte assignment above.
pub fn identity_fix(a: &str, b: &str) -> ([u8; 64], bool) {
    let a_first = a <= b;
    let (first, second) = if a_first { (a, b) } else { (b, a) };
    let mut buf = Vec::with_capacity(first.len() + second.len());
    buf.extend_from_slice(first.as_bytes());
    buf.extend_from_slice(second.as_bytes());
    (sha512(&buf), a_first)
}

// ── Root-key derivation (§4.2, §4.3) ─────────────────────────────────────────

/// Derive a 32-byte root key from the three DH outputs produced by the
/// root-key agreement (§4.3), optionally binding in the hash of a previous
/// root key (for rotation, §4.4). The caller is responsible for zeroizing
/// `t1`/`t2`/`t3` after this call.
pub fn derive_root_key(
    t1: &[u8; 32],
    t2: &[u8; 32],
    t3: &[u8; 32],
    previous_root_key_hash: Option<&[u8; 64]>,
) -> Result<[u8; 32], CryptoError> {
    let mut ikm = Vec::with_capacity(96 + 64);
    ikm.extend_from_slice(t1);
    ikm.extend_from_slice(t2);
    ikm.extend_from_slice(t3);
    if let Some(prev) = previous_root_key_hash {
        ikm.extend_from_slice(prev);
    }
    let mut root_key = [0u8; 32];
    let result = hkdf_sha512(&ikm, None, b"dl-root-key-v1", &mut root_key);
    ikm.zeroize();
    result?;
    Ok(root_key)
}

// ── Chain advance + message-key batch (§3, §4.2) ─────────────────────────────

/// Advance the chain key one step: `chain_key' = HMAC-SHA-512(chain_key, "CHAIN")`,
/// truncated to the 32-byte chain-key size.
pub fn chain_step(chain_key: &[u8; 32]) -> Result<[u8; 32], CryptoError> {
    let wide = hmac_sha512(chain_key, b"CHAIN")?;
    let mut next = [0u8; 32];
    next.copy_from_slice(&wide[..32]);
    Ok(next)
}

/// Derive one (send, recv) message-key pair at the current chain step,
/// without advancing the chain — callers combine this with [`chain_step`].
fn message_key_pair(
    chain_key: &[u8; 32],
    peer_pub_hash: &[u8; 64],
    fix: &[u8; 64],
    local_is_first: bool,
) -> Result<([u8; 64], [u8; 64]), CryptoError> {
    let local_role = if local_is_first { ROLE_FIRST } else { ROLE_SECOND };
    let peer_role = if local_is_first { ROLE_SECOND } else { ROLE_FIRST };

    let derive = |role: u8| -> Result<[u8; 64], CryptoError> {
        let mut data = Vec::with_capacity(7 + 1 + 64 + 64);
        data.extend_from_slice(b"MESSAGE");
        data.push(role);
        data.extend_from_slice(peer_pub_hash);
        data.extend_from_slice(fix);
        hmac_sha512(chain_key, &data)
    };

    let send = derive(local_role)?;
    let recv = derive(peer_role)?;
    Ok((send, recv))
}

/// Produce a batch of `count` (send, recv) message-key pairs starting from
/// `chain_key`, and the resulting chain key after the batch (§4.2: "persist
/// ... base64 of the final chain key").
pub fn generate_key_batch(
    chain_key: &[u8; 32],
    peer_pub_hash: &[u8; 64],
    fix: &[u8; 64],
    local_is_first: bool,
    count: u64,
) -> Result<([u8; 32], Vec<([u8; 64], [u8; 64])>), CryptoError> {
    let mut ck = *chain_key;
    let mut pairs = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let (send, recv) = message_key_pair(&ck, peer_pub_hash, fix, local_is_first)?;
        pairs.push((send, recv));
        ck = chain_step(&ck)?;
    }
    Ok((ck, pairs))
}
