//! At-rest encryption for linked exchange API credentials. AES-256-GCM
//! keyed by `CREDENTIAL_ENCRYPTION_KEY`; ciphertext is stored as
//! `base64(nonce || tag+ciphertext)` so a single TEXT column holds it.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::{engine::general_purpose::STANDARD, Engine};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};

/// Derives a 32-byte key from the configured secret regardless of its
/// length, the same way the JWT secret is used as HMAC key material.
fn derive_key(secret: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    hasher.finalize().into()
}

pub fn encrypt(secret_key: &str, plaintext: &str) -> String {
    let key = derive_key(secret_key);
    let cipher = Aes256Gcm::new_from_slice(&key).expect("derived key is always 32 bytes");

    let mut nonce_bytes = [0u8; 12];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext.as_bytes())
        .expect("encryption with a fixed-size nonce cannot fail");

    let mut out = Vec::with_capacity(nonce_bytes.len() + ciphertext.len());
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(&ciphertext);
    STANDARD.encode(out)
}

#[derive(Debug, thiserror::Error)]
pub enum DecryptError {
    #[error("malformed ciphertext encoding")]
    Encoding,
    #[error("ciphertext too short to contain a nonce")]
    Truncated,
    #[error("decryption failed: wrong key or corrupted ciphertext")]
    Aead,
}

pub fn decrypt(secret_key: &str, encoded: &str) -> Result<String, DecryptError> {
    let key = derive_key(secret_key);
    let cipher = Aes256Gcm::new_from_slice(&key).expect("derived key is always 32 bytes");

    let raw = STANDARD.decode(encoded).map_err(|_| DecryptError::Encoding)?;
    if raw.len() < 12 {
        return Err(DecryptError::Truncated);
    }
    let (nonce_bytes, ciphertext) = raw.split_at(12);
    let nonce = Nonce::from_slice(nonce_bytes);

    let plaintext = cipher.decrypt(nonce, ciphertext).map_err(|_| DecryptError::Aead)?;
    String::from_utf8(plaintext).map_err(|_| DecryptError::Aead)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips() {
        let encrypted = encrypt("a-secret-key", "api-secret-value");
        let decrypted = decrypt("a-secret-key", &encrypted).unwrap();
        assert_eq!(decrypted, "api-secret-value");
    }

    #[test]
    fn wrong_key_fails_to_decrypt() {
        let encrypted = encrypt("key-one", "payload");
        assert!(decrypt("key-two", &encrypted).is_err());
    }

    #[test]
    fn each_call_uses_a_fresh_nonce() {
        let a = encrypt("k", "same-plaintext");
        let b = encrypt("k", "same-plaintext");
        assert_ne!(a, b);
    }
}
