//! Authenticated encryption for cached session artifacts.
//!
//! Uses AES-256-GCM with a master key supplied from outside the process.
//! Sealed payloads are `BASE64(nonce || ciphertext)`; the target id is bound
//! as associated data so a payload only opens for the target that sealed it.

use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use rand::RngCore;
use std::fmt;

/// Key length in bytes (256 bits for AES-256)
const KEY_LENGTH: usize = 32;

/// Nonce length in bytes (96 bits for AES-GCM)
const NONCE_LENGTH: usize = 12;

#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("Invalid master key: {0}")]
    InvalidKey(String),

    #[error("Encryption failed")]
    Encrypt,

    #[error("Payload is not valid base64: {0}")]
    Encoding(#[from] base64::DecodeError),

    #[error("Sealed payload too short")]
    Truncated,

    #[error("Decryption failed: invalid key or corrupted data")]
    Decrypt,
}

/// The externally supplied master key. Never generated by this crate.
#[derive(Clone)]
pub struct MasterKey([u8; KEY_LENGTH]);

impl MasterKey {
    pub fn from_bytes(bytes: [u8; KEY_LENGTH]) -> Self {
        Self(bytes)
    }

    /// Parse a key from hex (64 characters) or base64 (32 decoded bytes).
    pub fn parse(key_str: &str) -> Result<Self, CryptoError> {
        let trimmed = key_str.trim();

        if trimmed.len() == KEY_LENGTH * 2 && trimmed.chars().all(|c| c.is_ascii_hexdigit()) {
            let bytes =
                hex::decode(trimmed).map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
            let mut key = [0u8; KEY_LENGTH];
            key.copy_from_slice(&bytes);
            return Ok(Self(key));
        }

        let bytes = BASE64
            .decode(trimmed)
            .map_err(|_| CryptoError::InvalidKey("key is neither valid hex nor base64".into()))?;

        if bytes.len() != KEY_LENGTH {
            return Err(CryptoError::InvalidKey(format!(
                "key must be {} bytes, got {} bytes",
                KEY_LENGTH,
                bytes.len()
            )));
        }

        let mut key = [0u8; KEY_LENGTH];
        key.copy_from_slice(&bytes);
        Ok(Self(key))
    }
}

impl fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("MasterKey([REDACTED])")
    }
}

/// AES-256-GCM cipher bound to one master key.
pub struct SessionCipher {
    cipher: Aes256Gcm,
}

impl SessionCipher {
    pub fn new(key: &MasterKey) -> Result<Self, CryptoError> {
        let cipher = Aes256Gcm::new_from_slice(&key.0)
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
        Ok(Self { cipher })
    }

    /// Encrypt `plaintext`, binding `aad`. Returns `BASE64(nonce || ciphertext)`.
    pub fn seal(&self, plaintext: &[u8], aad: &[u8]) -> Result<String, CryptoError> {
        let mut nonce_bytes = [0u8; NONCE_LENGTH];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(
                nonce,
                Payload {
                    msg: plaintext,
                    aad,
                },
            )
            .map_err(|_| CryptoError::Encrypt)?;

        let mut combined = Vec::with_capacity(NONCE_LENGTH + ciphertext.len());
        combined.extend_from_slice(&nonce_bytes);
        combined.extend_from_slice(&ciphertext);

        Ok(BASE64.encode(&combined))
    }

    /// Decrypt a payload produced by [`SessionCipher::seal`] with the same `aad`.
    pub fn open(&self, sealed: &str, aad: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let combined = BASE64.decode(sealed.trim())?;
        if combined.len() < NONCE_LENGTH {
            return Err(CryptoError::Truncated);
        }

        let (nonce_bytes, ciphertext) = combined.split_at(NONCE_LENGTH);
        let nonce = Nonce::from_slice(nonce_bytes);

        self.cipher
            .decrypt(
                nonce,
                Payload {
                    msg: ciphertext,
                    aad,
                },
            )
            .map_err(|_| CryptoError::Decrypt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key() -> MasterKey {
        let mut key = [0u8; KEY_LENGTH];
        for (i, byte) in key.iter_mut().enumerate() {
            *byte = i as u8;
        }
        MasterKey::from_bytes(key)
    }

    #[test]
    fn test_seal_open_roundtrip() {
        let cipher = SessionCipher::new(&test_key()).unwrap();
        let sealed = cipher.seal(b"sessionid=abc123", b"instagram").unwrap();
        let opened = cipher.open(&sealed, b"instagram").unwrap();
        assert_eq!(opened, b"sessionid=abc123");
    }

    #[test]
    fn test_different_seals_differ() {
        let cipher = SessionCipher::new(&test_key()).unwrap();
        let a = cipher.seal(b"same", b"t").unwrap();
        let b = cipher.seal(b"same", b"t").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_wrong_key_fails() {
        let cipher = SessionCipher::new(&test_key()).unwrap();
        let sealed = cipher.seal(b"secret", b"t").unwrap();

        let mut other = [7u8; KEY_LENGTH];
        other[0] = 255;
        let other = SessionCipher::new(&MasterKey::from_bytes(other)).unwrap();
        assert!(matches!(other.open(&sealed, b"t"), Err(CryptoError::Decrypt)));
    }

    #[test]
    fn test_wrong_target_binding_fails() {
        let cipher = SessionCipher::new(&test_key()).unwrap();
        let sealed = cipher.seal(b"secret", b"instagram").unwrap();
        assert!(matches!(
            cipher.open(&sealed, b"twitter"),
            Err(CryptoError::Decrypt)
        ));
    }

    #[test]
    fn test_truncated_payload() {
        let cipher = SessionCipher::new(&test_key()).unwrap();
        let short = BASE64.encode([1u8, 2, 3]);
        assert!(matches!(
            cipher.open(&short, b"t"),
            Err(CryptoError::Truncated)
        ));
    }

    #[test]
    fn test_parse_key_hex() {
        let hex_key = "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f";
        let key = MasterKey::parse(hex_key).unwrap();
        assert_eq!(key.0, test_key().0);
    }

    #[test]
    fn test_parse_key_base64() {
        let encoded = BASE64.encode(test_key().0);
        let key = MasterKey::parse(&encoded).unwrap();
        assert_eq!(key.0, test_key().0);
    }

    #[test]
    fn test_parse_key_invalid() {
        assert!(MasterKey::parse("abc").is_err());
        assert!(MasterKey::parse(&"z".repeat(64)).is_err());
    }

    #[test]
    fn test_key_debug_redacted() {
        assert_eq!(format!("{:?}", test_key()), "MasterKey([REDACTED])");
    }
}
