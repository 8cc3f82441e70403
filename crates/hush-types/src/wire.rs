/// Liveness check sent by clients. Travels unencrypted.
pub const PING: &str = "PING";

/// Reply to [`PING`]. Travels unencrypted.
pub const PONG: &str = "PONG";

/// Nonce length of the AEAD frame (AES-256-GCM standard nonce).
pub const NONCE_LEN: usize = 12;

/// Authentication tag length appended to every AEAD frame.
pub const TAG_LEN: usize = 16;

/// Returns true when a raw inbound payload is the liveness check.
pub fn is_ping(raw: &[u8]) -> bool {
    raw == PING.as_bytes()
}
