//! Key-encrypting key and encrypt-at-rest primitives.
//!
//! Every private scalar and master seed is wrapped with ChaCha20Poly1305
//! under a 256-bit KEK derived from the operator secret. The KEK exists
//! only in process memory.

use chacha20poly1305::{aead::Aead, ChaCha20Poly1305, Key, KeyInit, Nonce};
use secrecy::{ExposeSecret, SecretString};
use sha2::{Digest, Sha256};
use zeroize::Zeroize;

use crate::error::{WalletError, WalletResult};

/// AEAD nonce size (96-bit)
const NONCE_SIZE: usize = 12;

/// Key-encrypting key
///
/// Layout of sealed data: nonce (12 bytes) || ciphertext (with auth tag),
/// base64-encoded for storage in TEXT columns.
pub struct Kek {
    key: [u8; 32],
}

impl Kek {
    /// Derive the KEK from the operator secret (SHA-256, one-way)
    pub fn derive(secret: &SecretString) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(secret.expose_secret().as_bytes());
        let key: [u8; 32] = hasher.finalize().into();
        Self { key }
    }

    /// Encrypt plaintext, returning base64(nonce || ciphertext)
    pub fn seal(&self, plaintext: &[u8]) -> WalletResult<String> {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        getrandom::getrandom(&mut nonce_bytes)
            .map_err(|e| WalletError::Internal(format!("failed to generate nonce: {e}")))?;
        let nonce = Nonce::from_slice(&nonce_bytes);

        let cipher = ChaCha20Poly1305::new(Key::from_slice(&self.key));
        let ciphertext = cipher
            .encrypt(nonce, plaintext)
            .map_err(|e| WalletError::Internal(format!("encryption failed: {e}")))?;

        let mut sealed = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        sealed.extend_from_slice(&nonce_bytes);
        sealed.extend_from_slice(&ciphertext);

        Ok(base64::Engine::encode(
            &base64::engine::general_purpose::STANDARD,
            &sealed,
        ))
    }

    /// Decrypt base64(nonce || ciphertext)
    ///
    /// Fails with `DecryptionFailed` if the auth tag does not verify, which
    /// covers both a wrong KEK and corrupted storage.
    pub fn open(&self, sealed_b64: &str) -> WalletResult<Vec<u8>> {
        let sealed = base64::Engine::decode(&base64::engine::general_purpose::STANDARD, sealed_b64)
            .map_err(|_| WalletError::DecryptionFailed)?;

        if sealed.len() < NONCE_SIZE {
            return Err(WalletError::DecryptionFailed);
        }

        let (nonce_bytes, ciphertext) = sealed.split_at(NONCE_SIZE);
        let nonce = Nonce::from_slice(nonce_bytes);

        let cipher = ChaCha20Poly1305::new(Key::from_slice(&self.key));
        cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| WalletError::DecryptionFailed)
    }
}

impl Drop for Kek {
    fn drop(&mut self) {
        self.key.zeroize();
    }
}
