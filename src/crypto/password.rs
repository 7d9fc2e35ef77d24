use base64::{Engine as _, engine::general_purpose};
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use crate::crypto::aes::fill_random;
use crate::error::{SessionError, Result};

/// The number of random bytes in a session password.
pub const SERVICE_PASSWORD_SIZE: usize = 128;

/// Generates a new random session password.
///
/// # Returns
///
/// `SERVICE_PASSWORD_SIZE` random bytes, base64 encoded without padding.
pub fn generate_service_password() -> Result<Zeroizing<String>> {
    let mut raw = Zeroizing::new([0u8; SERVICE_PASSWORD_SIZE]);
    fill_random(&mut raw[..])?;

    Ok(Zeroizing::new(general_purpose::STANDARD_NO_PAD.encode(&raw[..])))
}

/// Decodes a session password into the raw bytes fed to the key derivation.
pub fn decode_password(password: &str) -> Result<Zeroizing<Vec<u8>>> {
    general_purpose::STANDARD_NO_PAD
        .decode(password)
        .map(Zeroizing::new)
        .map_err(|e| SessionError::Cipher(format!("failed to decode session password: {}", e)))
}

/// Encodes raw password bytes, as read back from the durable store.
pub fn encode_password(raw: &[u8]) -> Zeroizing<String> {
    Zeroizing::new(general_purpose::STANDARD_NO_PAD.encode(raw))
}

/// Compares two raw passwords in constant time.
pub fn same_password(a: &[u8], b: &[u8]) -> bool {
    a.ct_eq(b).into()
}
