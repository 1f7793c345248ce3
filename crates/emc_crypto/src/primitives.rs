//! The ciphersuite's primitive layer (§2: "Primitive layer (≈10%)").
//!
//! Every primitive is delegated to an audited RustCrypto (or dalek) crate —
//! no custom crypto is implemented here, only thin, error-mapped wrappers.
//! Ciphersuite string: `"CURVE25519 XSALSA20 POLY1305"` (§6.2), fixed, never
//! negotiated.

use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit, StreamCipher};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier as _, VerifyingKey};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256, Sha512};
use x25519_dalek::{PublicKey as X25519Public, StaticSecret};

use crate::error::CryptoError;

/// Exactly the ciphersuite string named in §6.2. No other value is valid.
pub const CIPHERSUITE: &str = "CURVE25519 XSALSA20 POLY1305";

/// The wire protocol version named in §6.2.
pub const WIRE_VERSION: u16 = 1;

// ── Hashing ──────────────────────────────────────────────────────────────────

pub fn sha256(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

pub fn sha512(data: &[u8]) -> [u8; 64] {
    Sha512::digest(data).into()
}

// ── HMAC-SHA-512 ─────────────────────────────────────────────────────────────

type HmacSha512 = Hmac<Sha512>;

/// HMAC-SHA-512(key, data) → 64 bytes. Used for the message-key derivation
/// (§3), the chain-key advance (§3), and the wire HMAC trailer (§4.1).
pub fn hmac_sha512(key: &[u8], data: &[u8]) -> Result<[u8; 64], CryptoError> {
    let mut mac = HmacSha512::new_from_slice(key)
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().into())
}

/// Constant-time HMAC verification.
pub fn hmac_sha512_verify(key: &[u8], data: &[u8], expected: &[u8]) -> Result<(), CryptoError> {
    let mut mac = HmacSha512::new_from_slice(key)
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
    mac.update(data);
    mac.verify_slice(expected).map_err(|_| CryptoError::AeadDecrypt)
}

// ── HKDF-SHA-512 ─────────────────────────────────────────────────────────────

/// HKDF-SHA-512 extract-then-expand. `salt` empty is permitted (HKDF treats
/// it as a zeroed salt of hash-length, per RFC 5869).
pub fn hkdf_sha512(
    ikm: &[u8],
    salt: Option<&[u8]>,
    info: &[u8],
    output: &mut [u8],
) -> Result<(), CryptoError> {
    let hk = hkdf::Hkdf::<Sha512>::new(salt, ikm);
    hk.expand(info, output)
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))
}

// ── AES-256-CTR ──────────────────────────────────────────────────────────────

type Aes256Ctr = ctr::Ctr64BE<aes::Aes256>;

/// Encrypt/decrypt in place with AES-256-CTR (the operation is its own
/// inverse). `iv` is the 16-byte counter-block IV from the CryptoSetup
/// packet (§4.1).
pub fn aes256_ctr_apply(key: &[u8; 32], iv: &[u8; 16], data: &mut [u8]) -> Result<(), CryptoError> {
    let mut cipher = Aes256Ctr::new(key.into(), iv.into());
    cipher.try_apply_keystream(data).map_err(|_| CryptoError::AeadDecrypt)
}

/// Fill `out` with `out.len()` bytes of AES-256-CTR keystream over an
/// all-zero buffer — the deterministic cheap padding generator (§2:
/// "Padding generator").
pub fn aes256_ctr_keystream(key: &[u8; 32], iv: &[u8; 16], out: &mut [u8]) {
    out.fill(0);
    let mut cipher = Aes256Ctr::new(key.into(), iv.into());
    cipher.apply_keystream(out);
}

// ── AES-256-CBC (padding-enforced) ──────────────────────────────────────────

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

/// PKCS#7-padded AES-256-CBC encryption.
pub fn aes256_cbc_encrypt(key: &[u8; 32], iv: &[u8; 16], plaintext: &[u8]) -> Vec<u8> {
    Aes256CbcEnc::new(key.into(), iv.into()).encrypt_padded_vec_mut::<aes::cipher::block_padding::Pkcs7>(plaintext)
}

/// PKCS#7-padded AES-256-CBC decryption. Rejects malformed padding rather
/// than silently truncating — a CBC padding oracle is otherwise an easy way
/// to leak key material one byte at a time.
pub fn aes256_cbc_decrypt(key: &[u8; 32], iv: &[u8; 16], ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    Aes256CbcDec::new(key.into(), iv.into())
        .decrypt_padded_vec_mut::<aes::cipher::block_padding::Pkcs7>(ciphertext)
        .map_err(|_| CryptoError::AeadDecrypt)
}

// ── Curve25519 Diffie-Hellman (with anti-reflection, §4.3) ──────────────────

/// Perform `ECDH(local_priv, peer_pub)`, rejecting the computation before it
/// happens if `peer_pub` equals any key in `local_publics` (§4.3 anti-
/// reflection rule: "A peer public equal to the local identity or session
/// public is rejected before multiplication").
pub fn dh_checked(
    local_priv: &StaticSecret,
    peer_pub: &X25519Public,
    local_publics: &[&X25519Public],
) -> Result<[u8; 32], CryptoError> {
    if local_publics.iter().any(|lp| lp.as_bytes() == peer_pub.as_bytes()) {
        return Err(CryptoError::KeyReflection);
    }
    let shared = local_priv.diffie_hellman(peer_pub);
    // Reflection can also happen out-of-band (peer_pub derived from our own
    // priv elsewhere); re-derive our own public and compare once more.
    let our_pub = X25519Public::from(local_priv);
    if our_pub.as_bytes() == peer_pub.as_bytes() {
        return Err(CryptoError::KeyReflection);
    }
    Ok(*shared.as_bytes())
}

// ── Ed25519 sign/verify ──────────────────────────────────────────────────────

pub fn ed25519_sign(secret: &[u8; 32], msg: &[u8]) -> [u8; 64] {
    SigningKey::from_bytes(secret).sign(msg).to_bytes()
}

pub fn ed25519_verify(public: &[u8; 32], msg: &[u8], sig: &[u8; 64]) -> Result<(), CryptoError> {
    let vk = VerifyingKey::from_bytes(public).map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
    let signature = Signature::from_bytes(sig);
    vk.verify(msg, &signature)
        .map_err(|_| CryptoError::SignatureVerification)
}

// ── NaCl box (Curve25519 + XSalsa20 + Poly1305) ─────────────────────────────

use crypto_box::{
    aead::{Aead, AeadCore, OsRng as BoxOsRng},
    PublicKey as BoxPublicKey, SalsaBox, SecretKey as BoxSecretKey,
};

/// 24-byte NaCl-box nonce.
pub const BOX_NONCE_LEN: usize = 24;

/// Seal `plaintext` authenticated to `their_pub` using `our_priv`. Returns
/// `nonce || ciphertext+tag` (the wire format §4.1 prepends this to the
/// EncryptedHeader's 2-byte length prefix).
pub fn box_seal(
    our_priv: &[u8; 32],
    their_pub: &[u8; 32],
    plaintext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let sk = BoxSecretKey::from(*our_priv);
    let pk = BoxPublicKey::from(*their_pub);
    let the_box = SalsaBox::new(&pk, &sk);
    let nonce = SalsaBox::generate_nonce(&mut BoxOsRng);
    let ct = the_box
        .encrypt(&nonce, plaintext)
        .map_err(|_| CryptoError::AeadEncrypt)?;
    let mut out = Vec::with_capacity(BOX_NONCE_LEN + ct.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ct);
    Ok(out)
}

/// Open a NaCl-box sealed with [`box_seal`]. `our_priv` is tried as the
/// recipient identity; §4.4 step 1 calls this once per owned identity until
/// one succeeds.
pub fn box_open(our_priv: &[u8; 32], their_pub: &[u8; 32], sealed: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if sealed.len() < BOX_NONCE_LEN {
        return Err(CryptoError::AeadDecrypt);
    }
    let (nonce_bytes, ct) = sealed.split_at(BOX_NONCE_LEN);
    let sk = BoxSecretKey::from(*our_priv);
    let pk = BoxPublicKey::from(*their_pub);
    let the_box = SalsaBox::new(&pk, &sk);
    the_box
        .decrypt(nonce_bytes.into(), ct)
        .map_err(|_| CryptoError::AeadDecrypt)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;

    #[test]
    fn ctr_roundtrip() {
        let key = [7u8; 32];
        let iv = [1u8; 16];
        let mut data = b"hello ctr mode".to_vec();
        let original = data.clone();
        aes256_ctr_apply(&key, &iv, &mut data).unwrap();
        assert_ne!(data, original);
        aes256_ctr_apply(&key, &iv, &mut data).unwrap();
        assert_eq!(data, original);
    }

    #[test]
    fn cbc_roundtrip() {
        let key = [9u8; 32];
        let iv = [2u8; 16];
        let pt = b"a message that is not block-aligned!!";
        let ct = aes256_cbc_encrypt(&key, &iv, pt);
        let back = aes256_cbc_decrypt(&key, &iv, &ct).unwrap();
        assert_eq!(back, pt);
    }

    #[test]
    fn cbc_rejects_corrupted_padding() {
        let key = [9u8; 32];
        let iv = [2u8; 16];
        let pt = b"0123456789abcdef"; // exactly one block
        let mut ct = aes256_cbc_encrypt(&key, &iv, pt);
        *ct.last_mut().unwrap() ^= 0xFF;
        assert!(aes256_cbc_decrypt(&key, &iv, &ct).is_err());
    }

    #[test]
    fn hmac_sha512_verifies() {
        let key = b"a key";
        let data = b"some data";
        let tag = hmac_sha512(key, data).unwrap();
        assert!(hmac_sha512_verify(key, data, &tag).is_ok());
        assert!(hmac_sha512_verify(key, b"other data", &tag).is_err());
    }

    #[test]
    fn dh_anti_reflection() {
        let priv_a = StaticSecret::random_from_rng(OsRng);
        let pub_a = X25519Public::from(&priv_a);
        let priv_b = StaticSecret::random_from_rng(OsRng);
        let pub_b = X25519Public::from(&priv_b);

        // Normal DH works.
        assert!(dh_checked(&priv_a, &pub_b, &[&pub_a]).is_ok());

        // Peer pub equal to local pub is a reflection attempt.
        let err = dh_checked(&priv_a, &pub_a, &[&pub_a]).unwrap_err();
        assert!(matches!(err, CryptoError::KeyReflection));
    }

    #[test]
    fn ed25519_roundtrip() {
        let signing = SigningKey::generate(&mut OsRng);
        let secret = signing.to_bytes();
        let public = signing.verifying_key().to_bytes();
        let sig = ed25519_sign(&secret, b"msg");
        assert!(ed25519_verify(&public, b"msg", &sig).is_ok());
        assert!(ed25519_verify(&public, b"other", &sig).is_err());
    }

    #[test]
    fn nacl_box_roundtrip() {
        let a = BoxSecretKey::generate(&mut OsRng);
        let b = BoxSecretKey::generate(&mut OsRng);
        let a_pub: [u8; 32] = *BoxPublicKey::from(&a).as_bytes();
        let b_pub: [u8; 32] = *BoxPublicKey::from(&b).as_bytes();
        let a_priv: [u8; 32] = a.to_bytes();
        let b_priv: [u8; 32] = b.to_bytes();

        let sealed = box_seal(&a_priv, &b_pub, b"hello bob").unwrap();
        let opened = box_open(&b_priv, &a_pub, &sealed).unwrap();
        assert_eq!(opened, b"hello bob");
    }
}
