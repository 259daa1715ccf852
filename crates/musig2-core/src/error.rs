//! Error types for MuSig2 operations

use thiserror::Error;

/// Result type alias for MuSig2 operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during MuSig2 key aggregation and signing
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// Malformed or empty key input
    #[error("Invalid key data: {0}")]
    InvalidKeyData(String),

    /// The signing key's public key is absent from the co-signer set
    #[error("Signing key is not found in key set")]
    SignerNotInKeySet,

    /// Nonce aggregation was asked to combine zero nonces
    #[error("Cannot aggregate an empty nonce set")]
    EmptyNonceSet,

    /// Signing was attempted before the nonce round closed
    #[error("Missing combined nonce")]
    CombinedNonceUnavailable,

    /// The local secret nonce was already consumed
    #[error("Nonce already used")]
    SigningContextReuse,

    /// More partial signatures were fed than there are signers
    #[error("Already have all partial signatures")]
    AlreadyHaveAllSigs,

    /// The combined signature does not verify under the aggregated key
    #[error("Final signature is invalid")]
    FinalSignatureInvalid,

    /// A tweak produced an unusable key
    #[error("Invalid tweak: {0}")]
    InvalidTweak(String),

    /// A public nonce could not be used
    #[error("Invalid nonce: {0}")]
    InvalidNonce(String),

    /// A partial signature failed individual verification
    #[error("Invalid partial signature from signer {index}")]
    InvalidPartialSignature { index: usize },

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Deserialization error
    #[error("Deserialization error: {0}")]
    Deserialization(String),

    /// Key derivation error
    #[error("Key derivation error: {0}")]
    Derivation(String),
}

impl Error {
    /// Whether the session that returned this error must be discarded.
    ///
    /// None of a session's partial state is safe to resume after a fatal
    /// error, since resuming risks nonce reuse.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::SigningContextReuse | Error::FinalSignatureInvalid | Error::AlreadyHaveAllSigs
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}
