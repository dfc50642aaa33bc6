//! AES-256-GCM cipher for secrets at rest.
//!
//! Client secrets and bearer tokens are sealed individually with a unique
//! random nonce. The master key is 32 bytes (256 bits), provided base64
//! encoded from an environment variable at startup, and held in memory only.

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use anyhow::{anyhow, Context, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde::{Deserialize, Serialize};

/// Size of the encryption key in bytes (256 bits)
const KEY_SIZE: usize = 32;

/// Size of the nonce in bytes (96 bits, standard for GCM)
const NONCE_SIZE: usize = 12;

/// A sealed value as stored at rest: ciphertext plus the nonce it was
/// sealed with, both base64 encoded.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SealedSecret {
    pub ciphertext: String,
    pub nonce: String,
}

/// Process-wide symmetric cipher for credential material.
///
/// Constructed once at startup from the configured master key and shared by
/// reference. The key never appears in logs or error messages.
#[derive(Clone)]
pub struct SecretCipher {
    key: Vec<u8>,
}

impl SecretCipher {
    /// Builds a cipher from a base64-encoded 32-byte master key.
    ///
    /// Fails if the key is not valid base64 or not exactly 32 bytes.
    pub fn from_base64_key(key_base64: &str) -> Result<Self> {
        let key = BASE64
            .decode(key_base64)
            .context("Failed to decode base64 encryption key")?;

        if key.len() != KEY_SIZE {
            return Err(anyhow!(
                "Encryption key must be {} bytes (256 bits), got {} bytes",
                KEY_SIZE,
                key.len()
            ));
        }

        Ok(Self { key })
    }

    /// Seals a plaintext value with a fresh random nonce.
    pub fn seal(&self, plaintext: &str) -> Result<SealedSecret> {
        let cipher = Aes256Gcm::new_from_slice(&self.key)
            .map_err(|e| anyhow!("Failed to create cipher: {}", e))?;

        // Random nonce, never reused
        let nonce_bytes = Aes256Gcm::generate_nonce(&mut OsRng);

        let ciphertext_bytes = cipher
            .encrypt(&nonce_bytes, plaintext.as_bytes())
            .map_err(|e| anyhow!("Encryption failed: {}", e))?;

        Ok(SealedSecret {
            ciphertext: BASE64.encode(&ciphertext_bytes),
            nonce: BASE64.encode(nonce_bytes),
        })
    }

    /// Opens a sealed value.
    ///
    /// Fails on wrong key, malformed base64, or tampered ciphertext
    /// (authenticated encryption). Callers must treat failure as fatal for
    /// the operation in flight and never proceed with a partial secret.
    pub fn open(&self, sealed: &SealedSecret) -> Result<String> {
        let ciphertext_bytes = BASE64
            .decode(&sealed.ciphertext)
            .context("Failed to decode ciphertext")?;
        let nonce_bytes = BASE64
            .decode(&sealed.nonce)
            .context("Failed to decode nonce")?;

        if nonce_bytes.len() != NONCE_SIZE {
            return Err(anyhow!(
                "Invalid nonce size: expected {}, got {}",
                NONCE_SIZE,
                nonce_bytes.len()
            ));
        }

        let cipher = Aes256Gcm::new_from_slice(&self.key)
            .map_err(|e| anyhow!("Failed to create cipher: {}", e))?;

        let plaintext_bytes = cipher
            .decrypt(Nonce::from_slice(&nonce_bytes), ciphertext_bytes.as_ref())
            .map_err(|e| anyhow!("Decryption failed (wrong key or corrupted data): {}", e))?;

        String::from_utf8(plaintext_bytes).context("Decrypted data is not valid UTF-8")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_cipher() -> SecretCipher {
        SecretCipher::from_base64_key(&BASE64.encode([0u8; 32])).unwrap()
    }

    #[test]
    fn test_key_validation() {
        // Valid 32-byte key (base64-encoded)
        assert!(SecretCipher::from_base64_key(&BASE64.encode([7u8; 32])).is_ok());

        // Too short
        assert!(SecretCipher::from_base64_key(&BASE64.encode([0u8; 16])).is_err());

        // Too long
        assert!(SecretCipher::from_base64_key(&BASE64.encode([0u8; 64])).is_err());

        // Invalid base64
        assert!(SecretCipher::from_base64_key("not-valid-base64!@#$").is_err());
    }

    #[test]
    fn test_seal_open_roundtrip() {
        let cipher = test_cipher();
        let plaintext = "my-client-secret-12345";

        let sealed = cipher.seal(plaintext).expect("seal failed");
        assert_ne!(sealed.ciphertext, plaintext);

        let opened = cipher.open(&sealed).expect("open failed");
        assert_eq!(opened, plaintext);
    }

    #[test]
    fn test_unique_nonces() {
        let cipher = test_cipher();

        let a = cipher.seal("same-plaintext").unwrap();
        let b = cipher.seal("same-plaintext").unwrap();

        // Random nonces mean distinct ciphertexts for identical plaintext
        assert_ne!(a.nonce, b.nonce);
        assert_ne!(a.ciphertext, b.ciphertext);

        assert_eq!(cipher.open(&a).unwrap(), "same-plaintext");
        assert_eq!(cipher.open(&b).unwrap(), "same-plaintext");
    }

    #[test]
    fn test_wrong_key_fails() {
        let cipher1 = SecretCipher::from_base64_key(&BASE64.encode([0u8; 32])).unwrap();
        let cipher2 = SecretCipher::from_base64_key(&BASE64.encode([1u8; 32])).unwrap();

        let sealed = cipher1.seal("secret").unwrap();
        assert!(cipher2.open(&sealed).is_err());
    }

    #[test]
    fn test_mismatched_nonce_fails() {
        let cipher = test_cipher();

        let sealed = cipher.seal("secret").unwrap();
        let other = cipher.seal("other").unwrap();

        let crossed = SealedSecret {
            ciphertext: sealed.ciphertext,
            nonce: other.nonce,
        };
        assert!(cipher.open(&crossed).is_err());
    }

    #[test]
    fn test_tampered_ciphertext_fails() {
        let cipher = test_cipher();

        let mut sealed = cipher.seal("secret").unwrap();
        sealed.ciphertext.push('X');

        // Authenticated encryption detects tampering
        assert!(cipher.open(&sealed).is_err());
    }
}
