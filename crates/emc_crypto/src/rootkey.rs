//! Root-key agreement (§4.3): triple Curve25519 DH between a sender's and a
//! recipient's identity/session/ephemeral keys, feeding [`crate::kdf`].

use zeroize::Zeroize;

use crate::error::CryptoError;
use crate::identity::KeyEntry;
use crate::kdf::derive_root_key;
use crate::primitives::{dh_checked, sha512};

/// Output of a successful root-key agreement: the derived root key plus the
/// SHA-512 hash of it that gets persisted as the session's root-key hash
/// (§4.2: "persist ... base64 of SHA-512(root_key) as the session's
/// root-key hash").
pub struct RootKeyResult {
    pub root_key: [u8; 32],
    pub root_key_hash: [u8; 64],
}

impl Drop for RootKeyResult {
    fn drop(&mut self) {
        self.root_key.zeroize();
    }
}

fn finish(t1: [u8; 32], t2: [u8; 32], t3: [u8; 32], previous_root_key_hash: Option<&[u8; 64]>) -> Result<RootKeyResult, CryptoError> {
    let mut t1 = t1;
    let mut t2 = t2;
    let mut t3 = t3;
    let root_key = derive_root_key(&t1, &t2, &t3, previous_root_key_hash);
    t1.zeroize();
    t2.zeroize();
    t3.zeroize();
    let root_key = root_key?;
    let root_key_hash = sha512(&root_key);
    Ok(RootKeyResult { root_key, root_key_hash })
}

/// Sender half of §4.3: `t1 = ECDH(I_S, R_K)`, `t2 = ECDH(S_S, R_K)`,
/// `t3 = ECDH(S_S, I_R)`. `recipient_ephemeral` is `R_K` from a `KeyInit` on
/// the first session, or the partner's current `recipient_session` public
/// on later sessions.
pub fn agree_as_sender(
    sender_identity: &KeyEntry,
    sender_session: &KeyEntry,
    recipient_identity_pub: &KeyEntry,
    recipient_ephemeral: &KeyEntry,
    previous_root_key_hash: Option<&[u8; 64]>,
) -> Result<RootKeyResult, CryptoError> {
    let i_s = sender_identity.x25519_static_secret()?;
    let s_s = sender_session.x25519_static_secret()?;
    let i_s_pub = sender_identity.x25519_public();
    let s_s_pub = sender_session.x25519_public();
    let r_k_pub = recipient_ephemeral.x25519_public();
    let i_r_pub = recipient_identity_pub.x25519_public();

    let t1 = dh_checked(&i_s, &r_k_pub, &[&i_s_pub, &s_s_pub])?;
    let t2 = dh_checked(&s_s, &r_k_pub, &[&i_s_pub, &s_s_pub])?;
    let t3 = dh_checked(&s_s, &i_r_pub, &[&i_s_pub, &s_s_pub])?;

    finish(t1, t2, t3, previous_root_key_hash)
}

/// Recipient mirror of §4.3: `t1 = ECDH(R_K, I_S)`, `t2 = ECDH(R_K, S_S)`,
/// `t3 = ECDH(I_R, S_S)`. `recipient_ephemeral` is the recipient's own
/// private half of `R_K` (consumed once from the `KeyInit`), or the current
/// `recipient_session` private key on later sessions.
pub fn agree_as_recipient(
    recipient_identity: &KeyEntry,
    recipient_ephemeral: &KeyEntry,
    sender_identity_pub: &KeyEntry,
    sender_session_pub: &KeyEntry,
    previous_root_key_hash: Option<&[u8; 64]>,
) -> Result<RootKeyResult, CryptoError> {
    let i_r = recipient_identity.x25519_static_secret()?;
    let r_k = recipient_ephemeral.x25519_static_secret()?;
    let i_r_pub = recipient_identity.x25519_public();
    let r_k_pub = recipient_ephemeral.x25519_public();
    let i_s_pub = sender_identity_pub.x25519_public();
    let s_s_pub = sender_session_pub.x25519_public();

    let t1 = dh_checked(&r_k, &i_s_pub, &[&i_r_pub, &r_k_pub])?;
    let t2 = dh_checked(&r_k, &s_s_pub, &[&i_r_pub, &r_k_pub])?;
    let t3 = dh_checked(&i_r, &s_s_pub, &[&i_r_pub, &r_k_pub])?;

    finish(t1, t2, t3, previous_root_key_hash)
}
