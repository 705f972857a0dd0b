use crate::error::HubError;
use data_encoding::{BASE64, HEXLOWER, HEXLOWER_PERMISSIVE};
use openssl::symm::Cipher;

// Payloads are AES-CBC with PKCS#7 padding. The IV is chosen at random
// for every message and travels in front of the ciphertext.

const IV_LEN: usize = 16;

/// The per-installation symmetric key handed out by the cloud login.
#[derive(Clone, PartialEq, Eq)]
pub struct AesKey(Vec<u8>);

impl std::fmt::Debug for AesKey {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(fmt, "AesKey(<{} bytes>)", self.0.len())
    }
}

impl AesKey {
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, HubError> {
        match bytes.len() {
            16 | 24 | 32 => Ok(Self(bytes)),
            n => Err(HubError::Configuration(format!(
                "AES key must be 16, 24 or 32 bytes long, got {n}"
            ))),
        }
    }

    /// Accepts the key either hex encoded (as the cloud returns it)
    /// or base64 encoded.
    pub fn parse(text: &str) -> Result<Self, HubError> {
        let text = text.trim();
        let is_hex = matches!(text.len(), 32 | 48 | 64)
            && text.chars().all(|c| c.is_ascii_hexdigit());
        let bytes = if is_hex {
            HEXLOWER_PERMISSIVE.decode(text.as_bytes())
        } else {
            BASE64.decode(text.as_bytes())
        }
        .map_err(|err| {
            HubError::Configuration(format!("AES key is neither hex nor base64: {err}"))
        })?;
        Self::from_bytes(bytes)
    }

    fn cipher(&self) -> Cipher {
        match self.0.len() {
            24 => Cipher::aes_192_cbc(),
            32 => Cipher::aes_256_cbc(),
            _ => Cipher::aes_128_cbc(),
        }
    }
}

/// Encrypts `plaintext`, returning `IV || ciphertext`
pub fn encrypt_bytes(plaintext: &[u8], key: &AesKey) -> Result<Vec<u8>, HubError> {
    let mut iv = [0u8; IV_LEN];
    openssl::rand::rand_bytes(&mut iv)
        .map_err(|err| HubError::Upstream(format!("openssl rand_bytes: {err}")))?;

    let ciphertext = openssl::symm::encrypt(key.cipher(), &key.0, Some(&iv), plaintext)
        .map_err(|err| HubError::Upstream(format!("openssl encrypt: {err}")))?;

    let mut result = Vec::with_capacity(IV_LEN + ciphertext.len());
    result.extend_from_slice(&iv);
    result.extend_from_slice(&ciphertext);
    Ok(result)
}

/// Inverse of [encrypt_bytes]. The decrypted bytes must be UTF-8.
pub fn decrypt_bytes(data: &[u8], key: &AesKey) -> Result<String, HubError> {
    if data.len() <= IV_LEN || (data.len() - IV_LEN) % IV_LEN != 0 {
        return Err(HubError::Decryption(format!(
            "{} bytes is not a valid IV + ciphertext length",
            data.len()
        )));
    }
    let (iv, ciphertext) = data.split_at(IV_LEN);
    let plain = openssl::symm::decrypt(key.cipher(), &key.0, Some(iv), ciphertext)
        .map_err(|err| HubError::Decryption(format!("{err}")))?;
    String::from_utf8(plain).map_err(|err| HubError::Decryption(format!("{err}")))
}

pub fn encrypt(plaintext: &str, key: &AesKey) -> Result<String, HubError> {
    Ok(HEXLOWER.encode(&encrypt_bytes(plaintext.as_bytes(), key)?))
}

pub fn decrypt(cipher_hex: &str, key: &AesKey) -> Result<String, HubError> {
    let data = HEXLOWER_PERMISSIVE
        .decode(cipher_hex.trim().as_bytes())
        .map_err(|err| HubError::Decryption(format!("malformed hex: {err}")))?;
    decrypt_bytes(&data, key)
}

/// Cloud records carry their encrypted blobs base64 encoded
pub fn decrypt_base64(encoded: &str, key: &AesKey) -> Result<String, HubError> {
    let data = BASE64
        .decode(encoded.trim().as_bytes())
        .map_err(|err| HubError::Decryption(format!("malformed base64: {err}")))?;
    decrypt_bytes(&data, key)
}

pub fn encrypt_base64(plaintext: &str, key: &AesKey) -> Result<String, HubError> {
    Ok(BASE64.encode(&encrypt_bytes(plaintext.as_bytes(), key)?))
}
