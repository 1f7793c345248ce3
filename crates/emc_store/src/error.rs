use thiserror::Error;

/// Failures the key-store transport itself can raise (§6.1), distinct from
/// the codec/crypto failures the core core logic raises.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("no KeyEntry found for the requested hash")]
    NoKeyEntry,

    #[error("no session state found for this state key")]
    NoSessionState,

    #[error("no session found for this session key")]
    NoSession,

    #[error("recv message key at this index has already been consumed")]
    MessageKeyUsed,

    #[error("session key material not found for this hash")]
    NoSessionKey,

    #[error("sender_uid identity is not in canonical mapped form: {0}")]
    InvalidIdentity(String),

    #[error("store serialisation error: {0}")]
    Serialisation(#[from] serde_json::Error),
}

/// The top-level error composing every layer the core touches (§7). The
/// spec's error-handling section composes this from `CodecError` and the
/// store's transport error; it is realized here — in `emc_store`, the one
/// crate that already depends on both `emc_proto` and `emc_crypto` — rather
/// than in `emc_crypto` itself, which cannot depend on its own downstream
/// crates.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Codec(#[from] emc_proto::CodecError),

    #[error(transparent)]
    Crypto(#[from] emc_crypto::CryptoError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl CoreError {
    /// §7's three-way recoverability classification, used by callers to
    /// decide whether to drop-and-continue, refetch, or tear down the
    /// session.
    pub fn severity(&self) -> ErrorSeverity {
        use emc_crypto::CryptoError as CE;
        use emc_proto::CodecError as PE;

        match self {
            CoreError::Codec(PE::BadHeaderKey) => ErrorSeverity::Recoverable,
            CoreError::Codec(PE::KeyInitExpired) => ErrorSeverity::Recoverable,
            CoreError::Store(StoreError::MessageKeyUsed) => ErrorSeverity::Recoverable,
            CoreError::Codec(PE::MessageKeyUsed) => ErrorSeverity::Recoverable,

            CoreError::Codec(PE::BadHmac)
            | CoreError::Codec(PE::BadSignature)
            | CoreError::Codec(PE::BadPacketOrder)
            | CoreError::Codec(PE::BadPacketSize) => ErrorSeverity::FatalToMessage,

            CoreError::Crypto(CE::KeyReflection)
            | CoreError::Codec(PE::SessionAnchorHashMismatch)
            | CoreError::Crypto(CE::SessionAnchorHashMismatch) => ErrorSeverity::FatalToSession,

            _ => ErrorSeverity::FatalToMessage,
        }
    }
}

/// §7: "Recoverable at the caller" / "Fatal per-message but non-fatal to
/// session" / "Fatal to the session".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    Recoverable,
    FatalToMessage,
    FatalToSession,
}
