use argon2::{Algorithm, Argon2, Params, Version};
use base64::{Engine as _, engine::general_purpose};
use zeroize::Zeroizing;

use crate::config::CipherConfig;
use crate::crypto::aes::{self, SecureKey, KEY_SIZE, NONCE_SIZE, TAG_SIZE};
use crate::error::{SessionError, Result};

/// The size of the key derivation salt in bytes.
pub const SALT_SIZE: usize = 16;
/// Plaintext is padded to a multiple of this many bytes before sealing.
const PAD_BLOCK: usize = 16;
/// `salt || plaintext length (u64 LE)`, authenticated as associated data.
const HEADER_SIZE: usize = SALT_SIZE + 8;

/// Password-based symmetric cipher for service keys.
///
/// Each call to [`SecretCipher::encrypt`] derives a fresh AES-256 key from
/// the session password and a random salt with Argon2id. The output frame is
///
/// ```text
/// salt[16] || plaintext_len u64 LE || nonce[12] || AES-256-GCM(padded plaintext)
/// ```
///
/// base64 encoded without padding. The salt and length are bound to the
/// ciphertext as associated data.
#[derive(Clone, Debug)]
pub struct SecretCipher {
    params: Params,
}

impl SecretCipher {
    /// Creates a cipher with the given Argon2id cost.
    pub fn new(config: CipherConfig) -> Result<Self> {
        let params = Params::new(
            config.memory_kib,
            config.iterations,
            config.parallelism,
            Some(KEY_SIZE),
        )
        .map_err(|e| SessionError::Cipher(format!("Argon2 params: {}", e)))?;

        Ok(Self { params })
    }

    fn derive_key(&self, password: &[u8], salt: &[u8]) -> Result<SecureKey> {
        let mut key = SecureKey::new([0u8; KEY_SIZE]);
        Argon2::new(Algorithm::Argon2id, Version::V0x13, self.params.clone())
            .hash_password_into(password, salt, key.as_mut_bytes())
            .map_err(|e| SessionError::Cipher(format!("Argon2 key derivation error: {}", e)))?;
        Ok(key)
    }

    /// Encrypts `plaintext` under `password`.
    pub fn encrypt(&self, plaintext: &str, password: &[u8]) -> Result<String> {
        let mut header = [0u8; HEADER_SIZE];
        aes::fill_random(&mut header[..SALT_SIZE])?;
        header[SALT_SIZE..].copy_from_slice(&(plaintext.len() as u64).to_le_bytes());

        let key = self.derive_key(password, &header[..SALT_SIZE])?;

        let mut payload = Zeroizing::new(plaintext.as_bytes().to_vec());
        let remainder = payload.len() % PAD_BLOCK;
        if remainder != 0 {
            let mut padding = [0u8; PAD_BLOCK];
            let pad = &mut padding[..PAD_BLOCK - remainder];
            aes::fill_random(pad)?;
            payload.extend_from_slice(pad);
        }

        let (sealed, nonce) = aes::encrypt(&key, &payload, &header)?;

        let mut frame = Vec::with_capacity(HEADER_SIZE + NONCE_SIZE + sealed.len());
        frame.extend_from_slice(&header);
        frame.extend_from_slice(&nonce);
        frame.extend_from_slice(&sealed);

        Ok(general_purpose::STANDARD_NO_PAD.encode(frame))
    }

    /// Decrypts a frame produced by [`SecretCipher::encrypt`].
    pub fn decrypt(&self, ciphertext: &str, password: &[u8]) -> Result<Zeroizing<String>> {
        let frame = general_purpose::STANDARD_NO_PAD
            .decode(ciphertext)
            .map_err(|e| SessionError::Cipher(format!("failed to decode cipher text: {}", e)))?;

        if frame.len() < HEADER_SIZE + NONCE_SIZE + TAG_SIZE {
            return Err(SessionError::Cipher(format!(
                "cipher text is too short: {} bytes",
                frame.len()
            )));
        }

        let (header, rest) = frame.split_at(HEADER_SIZE);
        let (nonce, sealed) = rest.split_at(NONCE_SIZE);

        let mut len_bytes = [0u8; 8];
        len_bytes.copy_from_slice(&header[SALT_SIZE..]);
        let payload_size = u64::from_le_bytes(len_bytes);

        let nonce: [u8; NONCE_SIZE] = nonce
            .try_into()
            .map_err(|_| SessionError::Cipher("Invalid nonce size".to_string()))?;

        let key = self.derive_key(password, &header[..SALT_SIZE])?;
        let mut plain = Zeroizing::new(aes::decrypt(&key, sealed, &nonce, header)?);

        let payload_size = usize::try_from(payload_size)
            .ok()
            .filter(|size| *size <= plain.len())
            .ok_or_else(|| {
                SessionError::Cipher(format!(
                    "plain text is shorter than expected {} < {}",
                    plain.len(),
                    payload_size
                ))
            })?;
        plain.truncate(payload_size);

        let text = std::str::from_utf8(&plain)
            .map_err(|e| SessionError::Cipher(format!("service key is not valid UTF-8: {}", e)))?;
        Ok(Zeroizing::new(text.to_string()))
    }
}
