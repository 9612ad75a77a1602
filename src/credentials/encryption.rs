//! AES-256-GCM encryption for OAuth token material.
//!
//! Every token is sealed with its own random nonce. The sealed form is
//! `base64(nonce) ":" base64(ciphertext)` so a single column holds everything
//! needed to open it again with the same master key.

use super::{EncryptedToken, PlainToken};
use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use anyhow::{anyhow, Context, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};

/// Size of the encryption key in bytes (256 bits)
const KEY_SIZE: usize = 32;

/// Size of the nonce in bytes (96 bits, standard for GCM)
const NONCE_SIZE: usize = 12;

/// Separator between the encoded nonce and the encoded ciphertext
const SEPARATOR: char = ':';

/// Validates that the master key is exactly 32 bytes when base64 decoded.
///
/// # Returns
/// * `Ok(Vec<u8>)` - Decoded key bytes (32 bytes)
/// * `Err` - If key is invalid length or invalid base64
pub fn validate_key(key_base64: &str) -> Result<Vec<u8>> {
    let key_bytes = BASE64
        .decode(key_base64.trim())
        .context("Failed to decode base64 encryption key")?;

    if key_bytes.len() != KEY_SIZE {
        return Err(anyhow!(
            "Encryption key must be {} bytes (256 bits), got {} bytes",
            KEY_SIZE,
            key_bytes.len()
        ));
    }

    Ok(key_bytes)
}

/// Symmetric encrypt/decrypt of OAuth tokens before they are persisted.
///
/// The store only ever sees [`EncryptedToken`] values; plaintext exists in
/// memory as a [`PlainToken`] for the duration of a provider call.
#[derive(Clone)]
pub struct EncryptionService {
    cipher: Aes256Gcm,
}

impl std::fmt::Debug for EncryptionService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("EncryptionService(***)")
    }
}

impl EncryptionService {
    /// Builds the service from a base64-encoded 32-byte master key.
    pub fn from_base64_key(key_base64: &str) -> Result<Self> {
        let key = validate_key(key_base64).context("Invalid encryption key")?;
        Self::from_key_bytes(&key)
    }

    /// Builds the service from raw key bytes (must be 32 bytes).
    pub fn from_key_bytes(key: &[u8]) -> Result<Self> {
        if key.len() != KEY_SIZE {
            return Err(anyhow!("Encryption key must be {} bytes", KEY_SIZE));
        }
        let cipher = Aes256Gcm::new_from_slice(key)
            .map_err(|e| anyhow!("Failed to create cipher: {}", e))?;
        Ok(Self { cipher })
    }

    /// Encrypts plaintext with a fresh random nonce.
    pub fn encrypt(&self, plaintext: &str) -> Result<EncryptedToken> {
        // Never reuse a nonce with the same key
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|e| anyhow!("Encryption failed: {}", e))?;

        Ok(EncryptedToken::from_ciphertext(format!(
            "{}{}{}",
            BASE64.encode(nonce),
            SEPARATOR,
            BASE64.encode(ciphertext)
        )))
    }

    /// Seals a token that is already held as plaintext.
    pub fn seal(&self, token: &PlainToken) -> Result<EncryptedToken> {
        self.encrypt(token.expose())
    }

    /// Decrypts a sealed token.
    ///
    /// Fails on a wrong key, a malformed value, or any tampering with the
    /// nonce or ciphertext (authenticated encryption).
    pub fn decrypt(&self, sealed: &EncryptedToken) -> Result<PlainToken> {
        let (nonce_b64, ciphertext_b64) = sealed
            .as_str()
            .split_once(SEPARATOR)
            .ok_or_else(|| anyhow!("Malformed encrypted token (missing nonce separator)"))?;

        let nonce_bytes = BASE64.decode(nonce_b64).context("Failed to decode nonce")?;
        if nonce_bytes.len() != NONCE_SIZE {
            return Err(anyhow!(
                "Invalid nonce size: expected {}, got {}",
                NONCE_SIZE,
                nonce_bytes.len()
            ));
        }
        let ciphertext = BASE64
            .decode(ciphertext_b64)
            .context("Failed to decode ciphertext")?;

        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(&nonce_bytes), ciphertext.as_ref())
            .map_err(|e| anyhow!("Decryption failed (wrong key or corrupted data): {}", e))?;

        let plaintext =
            String::from_utf8(plaintext).context("Decrypted data is not valid UTF-8")?;
        Ok(PlainToken::new(plaintext))
    }
}
