use aes_gcm::{
    Aes256Gcm, Key, Nonce,
    aead::{Aead, KeyInit, OsRng, rand_core::RngCore},
};
use anyhow::{Result, anyhow, bail};

use hush_types::wire::{NONCE_LEN, TAG_LEN};

/// Encrypt a plaintext into a single wire frame with AES-256-GCM.
/// Returns `nonce || ciphertext || tag` with a fresh random nonce.
pub fn encrypt_frame(key: &[u8; 32], plaintext: &[u8]) -> Result<Vec<u8>> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));

    let mut nonce_bytes = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let sealed = cipher
        .encrypt(nonce, plaintext)
        .map_err(|e| anyhow!("Encryption failed: {}", e))?;

    let mut frame = Vec::with_capacity(NONCE_LEN + sealed.len());
    frame.extend_from_slice(&nonce_bytes);
    frame.extend_from_slice(&sealed);
    Ok(frame)
}

/// Decrypt a wire frame produced by [`encrypt_frame`].
pub fn decrypt_frame(key: &[u8; 32], frame: &[u8]) -> Result<Vec<u8>> {
    if frame.len() < NONCE_LEN + TAG_LEN {
        bail!("Frame too short: {} bytes", frame.len());
    }

    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    let (nonce_bytes, sealed) = frame.split_at(NONCE_LEN);
    let nonce = Nonce::from_slice(nonce_bytes);

    let plaintext = cipher
        .decrypt(nonce, sealed)
        .map_err(|e| anyhow!("Decryption failed: {}", e))?;

    Ok(plaintext)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::{derive_key, generate_key};

    #[test]
    fn encrypt_decrypt_roundtrip() {
        let key = generate_key();
        let message = b"Hello from Hush!";

        let frame = encrypt_frame(&key, message).unwrap();
        assert_eq!(frame.len(), NONCE_LEN + message.len() + TAG_LEN);
        assert_ne!(&frame[NONCE_LEN..NONCE_LEN + message.len()], message);

        let decrypted = decrypt_frame(&key, &frame).unwrap();
        assert_eq!(decrypted, message);
    }

    #[test]
    fn roundtrip_holds_for_assorted_payloads() {
        let key = derive_key("encrypt-key");
        let payloads: [&[u8]; 4] = [b"", b"x", &[0u8; 255], "\u{4f60}\u{597d}".as_bytes()];
        for p in payloads {
            let frame = encrypt_frame(&key, p).unwrap();
            assert_eq!(decrypt_frame(&key, &frame).unwrap(), p);
        }
    }

    #[test]
    fn nonce_is_fresh_per_call() {
        let key = generate_key();
        let a = encrypt_frame(&key, b"same").unwrap();
        let b = encrypt_frame(&key, b"same").unwrap();
        assert_ne!(a[..NONCE_LEN], b[..NONCE_LEN]);
        assert_ne!(a, b);
    }

    #[test]
    fn wrong_key_fails() {
        let key1 = generate_key();
        let key2 = generate_key();

        let frame = encrypt_frame(&key1, b"Secret message").unwrap();
        assert!(decrypt_frame(&key2, &frame).is_err());
    }

    #[test]
    fn every_single_bit_flip_is_detected() {
        let key = generate_key();
        let frame = encrypt_frame(&key, b"tamper me").unwrap();

        for byte in 0..frame.len() {
            for bit in 0..8 {
                let mut tampered = frame.clone();
                tampered[byte] ^= 1 << bit;
                assert!(
                    decrypt_frame(&key, &tampered).is_err(),
                    "flip at byte {} bit {} went unnoticed",
                    byte,
                    bit
                );
            }
        }
    }

    #[test]
    fn short_frames_fail() {
        let key = generate_key();
        assert!(decrypt_frame(&key, &[]).is_err());
        assert!(decrypt_frame(&key, &[0u8; NONCE_LEN]).is_err());
        assert!(decrypt_frame(&key, &[0u8; NONCE_LEN + TAG_LEN - 1]).is_err());
    }
}
