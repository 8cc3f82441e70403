//! Error taxonomy for the relay core.

/// Errors surfaced by channels, the registry and the router.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// Application data attempted before the handshake produced a key.
    #[error("encryption key is not set")]
    KeyNotSet,

    /// A second key was offered to a channel that already has one.
    #[error("encryption key is already set")]
    KeyAlreadySet,

    #[error("frame encryption failed")]
    EncryptFailed,

    /// Short frame or failed authentication. The two are deliberately not
    /// told apart.
    #[error("frame decryption failed")]
    DecryptFailed,

    #[error("malformed message: {0}")]
    MalformedMessage(String),

    /// The user has no live channels.
    #[error("no live connection")]
    NoConnection,

    /// The user has channels but every send attempt failed.
    #[error("delivery failed on every connection")]
    DeliveryFailed,

    /// The offline store rejected a write; the message is lost.
    #[error("persistence failed: {0}")]
    PersistenceFailed(String),

    /// The underlying transport is gone.
    #[error("channel closed")]
    ChannelClosed,

    #[error("handshake failed: {0}")]
    Handshake(String),
}

pub type Result<T> = std::result::Result<T, RelayError>;
