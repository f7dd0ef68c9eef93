//! Error types for keyward.
//!
//! Every error variant is a distinct failure mode in the key-custody and
//! envelope layers. Messages are intentionally minimal: they signal *what*
//! failed without revealing key state, nonces or plaintext.

use thiserror::Error;

/// The single error type for all keyward operations.
#[derive(Debug, Error)]
pub enum KeywardError {
    /// The key-custody entry is missing, or a wrapped key could not be
    /// unwrapped. Never self-healing: a replacement key would orphan every
    /// envelope sealed under the old one.
    #[error("key unavailable: {0}")]
    KeyUnavailable(String),

    /// The GCM authentication tag did not verify. Covers tampered
    /// ciphertext and ciphertext sealed under a different key.
    #[error("authentication tag mismatch")]
    AuthenticationFailure,

    /// An envelope, configuration or store document could not be parsed.
    #[error("serialization error: {0}")]
    SerializationError(String),

    /// The presence check failed, was cancelled, produced a token that did
    /// not verify, or no authenticator is enrolled.
    #[error("presence denied: {0}")]
    PresenceDenied(String),

    /// The platform does not meet the capability floor for the operation.
    #[error("platform unsupported: {0}")]
    PlatformUnsupported(String),

    /// A cryptographic key was invalid (wrong length, malformed, etc.).
    #[error("invalid key")]
    InvalidKey,

    /// A nonce had the wrong length for the cipher.
    #[error("invalid nonce")]
    InvalidNonce,

    /// A cipher session was used for the opposite direction.
    #[error("invalid session: {0}")]
    InvalidSession(&'static str),

    /// Encryption failed. The underlying primitive returned an error.
    #[error("encryption failed")]
    EncryptionFailure,

    /// The system's random number generator failed to produce bytes.
    #[error("randomness source failed")]
    RandomnessFailure,

    /// The key-value store or the filesystem failed.
    #[error("storage error: {0}")]
    Storage(String),
}

impl From<serde_json::Error> for KeywardError {
    fn from(err: serde_json::Error) -> Self {
        Self::SerializationError(err.to_string())
    }
}

impl From<std::io::Error> for KeywardError {
    fn from(err: std::io::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, KeywardError>;
