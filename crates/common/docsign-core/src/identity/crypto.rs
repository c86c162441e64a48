//! Encryption of signing keys at rest.
//!
//! # Algorithms
//!
//! - **Key Derivation**: Argon2id over a one-time passphrase and random salt
//! - **Encryption**: ChaCha20-Poly1305 (authenticated, so a wrong passphrase
//!   or tampered ciphertext is detected rather than yielding garbage)
//!
//! The plaintext is the PKCS#8 DER document of the signing key.

use argon2::{Algorithm, Argon2, Params, Version};
use chacha20poly1305::{aead::Aead, ChaCha20Poly1305, Key, KeyInit, Nonce};
use docsign_config::KdfConfig;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use zeroize::Zeroizing;

use crate::types::base64_bytes;

/// Salt length for key derivation (16 bytes)
pub const SALT_LEN: usize = 16;

/// Nonce length for ChaCha20-Poly1305 (12 bytes)
pub const NONCE_LEN: usize = 12;

/// Entropy of the generated one-time passphrase (32 bytes, hex encoded)
pub const PASSPHRASE_BYTES: usize = 32;

#[derive(Error, Debug)]
pub enum KeyCryptoError {
    #[error("Invalid KDF parameters: {0}")]
    InvalidParams(String),

    #[error("Key derivation failed: {0}")]
    Derivation(String),

    #[error("Encryption failed")]
    Encryption,

    /// Wrong passphrase or tampered ciphertext.
    #[error("Failed to decrypt private key")]
    Decryption,

    #[error("Malformed key envelope: {0}")]
    Malformed(String),
}

/// Encrypted PKCS#8 key together with everything needed to open it.
///
/// The passphrase lives next to the ciphertext, so this protects against
/// casual disclosure of the key column only.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EncryptedPrivateKey {
    #[serde(with = "base64_bytes")]
    pub ciphertext: Vec<u8>,
    #[serde(with = "base64_bytes")]
    pub salt: Vec<u8>,
    #[serde(with = "base64_bytes")]
    pub nonce: Vec<u8>,
    pub passphrase: String,
    pub kdf: KdfConfig,
}

impl std::fmt::Debug for EncryptedPrivateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptedPrivateKey")
            .field("ciphertext_len", &self.ciphertext.len())
            .field("passphrase", &"<redacted>")
            .field("kdf", &self.kdf)
            .finish()
    }
}

/// Generate cryptographically secure random bytes.
pub fn generate_random_bytes<const N: usize>() -> [u8; N] {
    let mut bytes = [0u8; N];
    OsRng.fill_bytes(&mut bytes);
    bytes
}

/// Fresh passphrase used for exactly one key.
pub fn generate_passphrase() -> Zeroizing<String> {
    let bytes = Zeroizing::new(generate_random_bytes::<PASSPHRASE_BYTES>());
    Zeroizing::new(hex::encode(bytes.as_slice()))
}

/// Derive a 256-bit key encryption key with Argon2id.
pub fn derive_key_encryption_key(
    passphrase: &[u8],
    salt: &[u8],
    kdf: &KdfConfig,
) -> Result<Zeroizing<[u8; 32]>, KeyCryptoError> {
    let params = Params::new(kdf.memory_kib, kdf.iterations, kdf.parallelism, Some(32))
        .map_err(|e| KeyCryptoError::InvalidParams(e.to_string()))?;

    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

    let mut key = Zeroizing::new([0u8; 32]);
    argon2
        .hash_password_into(passphrase, salt, key.as_mut())
        .map_err(|e| KeyCryptoError::Derivation(e.to_string()))?;

    Ok(key)
}

/// Encrypt a PKCS#8 document under a new salt and nonce.
pub fn seal_private_key(
    pkcs8_der: &[u8],
    passphrase: &str,
    kdf: &KdfConfig,
) -> Result<EncryptedPrivateKey, KeyCryptoError> {
    let salt: [u8; SALT_LEN] = generate_random_bytes();
    let nonce: [u8; NONCE_LEN] = generate_random_bytes();

    let encryption_key = derive_key_encryption_key(passphrase.as_bytes(), &salt, kdf)?;
    let cipher = ChaCha20Poly1305::new(Key::from_slice(encryption_key.as_slice()));
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), pkcs8_der)
        .map_err(|_| KeyCryptoError::Encryption)?;

    Ok(EncryptedPrivateKey {
        ciphertext,
        salt: salt.to_vec(),
        nonce: nonce.to_vec(),
        passphrase: passphrase.to_string(),
        kdf: kdf.clone(),
    })
}

/// Decrypt with the stored passphrase, returning the PKCS#8 document.
pub fn open_private_key(sealed: &EncryptedPrivateKey) -> Result<Zeroizing<Vec<u8>>, KeyCryptoError> {
    if sealed.nonce.len() != NONCE_LEN {
        return Err(KeyCryptoError::Malformed(format!(
            "nonce length {} (expected {})",
            sealed.nonce.len(),
            NONCE_LEN
        )));
    }

    let encryption_key = derive_key_encryption_key(sealed.passphrase.as_bytes(), &sealed.salt, &sealed.kdf)?;
    let cipher = ChaCha20Poly1305::new(Key::from_slice(encryption_key.as_slice()));
    let plaintext = cipher
        .decrypt(Nonce::from_slice(&sealed.nonce), sealed.ciphertext.as_slice())
        .map_err(|_| KeyCryptoError::Decryption)?;

    Ok(Zeroizing::new(plaintext))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seal_and_open() {
        let kdf = KdfConfig::insecure_fast();
        let passphrase = generate_passphrase();
        let secret = b"pkcs8 document bytes".to_vec();

        let sealed = seal_private_key(&secret, &passphrase, &kdf).unwrap();
        assert_ne!(sealed.ciphertext, secret);

        let opened = open_private_key(&sealed).unwrap();
        assert_eq!(opened.as_slice(), secret.as_slice());
    }

    #[test]
    fn wrong_passphrase_fails() {
        let kdf = KdfConfig::insecure_fast();
        let mut sealed = seal_private_key(b"secret", "right", &kdf).unwrap();
        sealed.passphrase = "wrong".to_string();
        assert!(matches!(open_private_key(&sealed), Err(KeyCryptoError::Decryption)));
    }

    #[test]
    fn tampered_ciphertext_fails() {
        let kdf = KdfConfig::insecure_fast();
        let mut sealed = seal_private_key(b"secret", "pass", &kdf).unwrap();
        sealed.ciphertext[0] ^= 0xff;
        assert!(open_private_key(&sealed).is_err());
    }

    #[test]
    fn passphrases_are_unique() {
        assert_ne!(*generate_passphrase(), *generate_passphrase());
        assert_eq!(generate_passphrase().len(), PASSPHRASE_BYTES * 2);
    }

    #[test]
    fn debug_output_hides_passphrase() {
        let sealed = seal_private_key(b"secret", "hunter2", &KdfConfig::insecure_fast()).unwrap();
        let rendered = format!("{sealed:?}");
        assert!(!rendered.contains("hunter2"));
    }
}
