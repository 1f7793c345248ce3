use thiserror::Error;

/// Errors raised by the primitive, key-derivation, root-key-agreement,
/// session-state-machine and key-init layers.
///
/// Wire-framing failures (bad packet order/size, HMAC mismatch, unknown
/// ciphersuite) are modeled separately as `emc_proto::CodecError` — this
/// enum only covers failures that originate below the codec.
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("key generation failed: {0}")]
    KeyGeneration(String),

    #[error("signature verification failed")]
    SignatureVerification,

    #[error("AEAD/box encryption failed")]
    AeadEncrypt,

    #[error("AEAD/box decryption failed (authentication mismatch — possible tampering)")]
    AeadDecrypt,

    #[error("key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("invalid key material: {0}")]
    InvalidKey(String),

    #[error("ECDH rejected: shared secret reflects a local public key")]
    KeyReflection,

    #[error("session not initialised for this peer")]
    SessionNotInitialised,

    #[error("message key at this index has already been consumed")]
    MessageKeyUsed,

    #[error("KeyInit has expired or is not yet valid")]
    KeyInitExpired,

    #[error("KeyInit failed verification: {0}")]
    KeyInitUnverified(String),

    #[error("decrypted SessionAnchor hash does not match the declared SESSIONANCHORHASH")]
    SessionAnchorHashMismatch,

    #[error("identity string does not satisfy the mapped-identity canonicalization rule: {0}")]
    InvalidIdentity(String),

    #[error("serialisation error: {0}")]
    Serialisation(#[from] serde_json::Error),
}
