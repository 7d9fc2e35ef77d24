use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    Aes256Gcm, Nonce,
};
use rand::{rngs::OsRng, RngCore};
use zeroize::{Zeroize, ZeroizeOnDrop};
use crate::error::{SessionError, Result};

/// The size of the AES-256 key in bytes.
pub const KEY_SIZE: usize = 32;
/// The size of the AES-GCM nonce in bytes.
pub const NONCE_SIZE: usize = 12;
/// The size of the AES-GCM authentication tag in bytes.
pub const TAG_SIZE: usize = 16;

/// A secure key wrapper that ensures the key is zeroized on drop.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SecureKey([u8; KEY_SIZE]);

impl SecureKey {
    /// Creates a new `SecureKey` from a byte array.
    pub fn new(key: [u8; KEY_SIZE]) -> Self {
        Self(key)
    }

    /// Returns a reference to the key as a byte slice.
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }

    /// Returns a mutable reference so a KDF can write into the key in place.
    pub fn as_mut_bytes(&mut self) -> &mut [u8; KEY_SIZE] {
        &mut self.0
    }
}

/// Fills `buf` from the OS random source.
pub fn fill_random(buf: &mut [u8]) -> Result<()> {
    OsRng
        .try_fill_bytes(buf)
        .map_err(|e| SessionError::Entropy(format!("OS random source failed: {}", e)))
}

/// Generates a new random AES-GCM nonce.
pub fn generate_nonce() -> Result<[u8; NONCE_SIZE]> {
    let mut nonce = [0u8; NONCE_SIZE];
    fill_random(&mut nonce)?;
    Ok(nonce)
}

/// Encrypts a plaintext using AES-256-GCM, authenticating `aad` alongside it.
///
/// # Returns
///
/// A tuple containing the ciphertext (with tag) and the nonce used for encryption.
pub fn encrypt(
    key: &SecureKey,
    plaintext: &[u8],
    aad: &[u8],
) -> Result<(Vec<u8>, [u8; NONCE_SIZE])> {
    let cipher = Aes256Gcm::new(key.as_bytes().into());

    let nonce_bytes = generate_nonce()?;
    let nonce = Nonce::from(nonce_bytes);

    let ciphertext = cipher
        .encrypt(&nonce, Payload { msg: plaintext, aad })
        .map_err(|e| SessionError::Cipher(format!("Encryption failed: {}", e)))?;

    Ok((ciphertext, nonce_bytes))
}

/// Decrypts a ciphertext using AES-256-GCM.
///
/// Fails if the key, nonce, ciphertext or `aad` differ from what was sealed.
pub fn decrypt(
    key: &SecureKey,
    ciphertext: &[u8],
    nonce: &[u8; NONCE_SIZE],
    aad: &[u8],
) -> Result<Vec<u8>> {
    let cipher = Aes256Gcm::new(key.as_bytes().into());
    let nonce = Nonce::from(*nonce);

    cipher
        .decrypt(&nonce, Payload { msg: ciphertext, aad })
        .map_err(|e| SessionError::Cipher(format!("Decryption failed: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(byte: u8) -> SecureKey {
        SecureKey::new([byte; KEY_SIZE])
    }

    #[test]
    fn seal_and_open() {
        let (ciphertext, nonce) = encrypt(&key(1), b"service key", b"header").unwrap();
        assert_eq!(ciphertext.len(), b"service key".len() + TAG_SIZE);

        let plain = decrypt(&key(1), &ciphertext, &nonce, b"header").unwrap();
        assert_eq!(plain, b"service key");
    }

    #[test]
    fn open_fails_with_other_key_or_aad() {
        let (ciphertext, nonce) = encrypt(&key(1), b"service key", b"header").unwrap();

        assert!(matches!(
            decrypt(&key(2), &ciphertext, &nonce, b"header"),
            Err(SessionError::Cipher(_))
        ));
        assert!(matches!(
            decrypt(&key(1), &ciphertext, &nonce, b"other"),
            Err(SessionError::Cipher(_))
        ));
    }

    #[test]
    fn nonces_are_not_repeated() {
        assert_ne!(generate_nonce().unwrap(), generate_nonce().unwrap());
    }
}
