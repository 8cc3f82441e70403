/// Hush Crypto Library
///
/// Per-connection frame encryption (AES-256-GCM). Every frame is
/// `nonce(12) || ciphertext || tag(16)` under the key the connection
/// agreed on during its handshake, or under the static fallback key
/// derived from a configured secret.

pub mod encrypt;
pub mod keys;
