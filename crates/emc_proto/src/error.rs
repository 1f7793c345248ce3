use thiserror::Error;

/// The codec failure taxonomy (§4.6). Every wire-framing rejection is one of
/// these variants — never a bare `String`, so callers can match
/// exhaustively per §7's recoverable/fatal-per-message/fatal-to-session
/// classification.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("PreHeader version mismatch")]
    BadVersion,

    #[error("unknown or mismatched ciphersuite string")]
    BadCiphersuite,

    #[error("outer packet type/count violates ordering")]
    BadPacketOrder,

    #[error("payload length disagrees with the fixed size for this packet")]
    BadPacketSize,

    #[error("no owned identity can open the EncryptedHeader")]
    BadHeaderKey,

    #[error("trailer HMAC does not match")]
    BadHmac,

    #[error("Ed25519 signature verification failed")]
    BadSignature,

    #[error("invalid inner-packet type combination")]
    BadInnerPacketType,

    #[error("recv message key at this index has already been consumed")]
    MessageKeyUsed,

    #[error("KeyInit has expired or is not yet valid")]
    KeyInitExpired,

    #[error("KeyInit failed verification: {0}")]
    KeyInitUnverified(String),

    #[error("decrypted SessionAnchor hash does not match the declared hash")]
    SessionAnchorHashMismatch,

    #[error("identity string is not in canonical mapped form: {0}")]
    InvalidIdentity(String),

    #[error("header padding computation failed: {0}")]
    PaddingOverflow(String),

    #[error(transparent)]
    Crypto(#[from] emc_crypto::CryptoError),

    #[error("header JSON (de)serialisation error: {0}")]
    Json(#[from] serde_json::Error),
}
