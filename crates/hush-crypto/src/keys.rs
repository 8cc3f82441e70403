use aes_gcm::aead::OsRng;
use aes_gcm::aead::rand_core::RngCore;
use anyhow::Result;
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use sha2::{Digest, Sha256};

/// Generate a random 256-bit key for AES-256-GCM.
pub fn generate_key() -> [u8; 32] {
    let mut key = [0u8; 32];
    OsRng.fill_bytes(&mut key);
    key
}

/// Derive the static fallback key from a human-manageable secret.
/// One SHA-256 pass, no salt: both ends must arrive at the same key from
/// the same configured string.
pub fn derive_key(secret: &str) -> [u8; 32] {
    let digest = Sha256::digest(secret.as_bytes());
    let mut key = [0u8; 32];
    key.copy_from_slice(&digest);
    key
}

/// Resolve a configured static key. `base64:<key>` is taken as raw key
/// material; anything else is a secret to derive from.
pub fn parse_static_key(value: &str) -> Result<[u8; 32]> {
    match value.strip_prefix("base64:") {
        Some(encoded) => key_from_base64(encoded),
        None => Ok(derive_key(value)),
    }
}

/// Decode a base64 key.
pub fn key_from_base64(encoded: &str) -> Result<[u8; 32]> {
    let bytes = BASE64.decode(encoded)?;
    let key: [u8; 32] = bytes
        .try_into()
        .map_err(|_| anyhow::anyhow!("Invalid key length"))?;
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derived_key_is_stable() {
        assert_eq!(derive_key("encrypt-key"), derive_key("encrypt-key"));
        assert_ne!(derive_key("encrypt-key"), derive_key("encrypt-key2"));
    }

    #[test]
    fn base64_key_decodes() {
        let key = generate_key();
        assert_eq!(key_from_base64(&BASE64.encode(key)).unwrap(), key);
    }

    #[test]
    fn static_key_accepts_raw_or_derived() {
        let raw = generate_key();
        let configured = format!("base64:{}", BASE64.encode(raw));
        assert_eq!(parse_static_key(&configured).unwrap(), raw);
        assert_eq!(parse_static_key("encrypt-key").unwrap(), derive_key("encrypt-key"));
        assert!(parse_static_key("base64:!!!").is_err());
    }

    #[test]
    fn short_base64_key_is_rejected() {
        assert!(key_from_base64(&BASE64.encode([0u8; 16])).is_err());
    }
}
