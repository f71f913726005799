//! Password encryption at rest.
//!
//! - **Key derivation**: PBKDF2-HMAC-SHA256 from the master secret, once per cipher
//! - **Encryption**: AES-256-GCM with a random 96-bit nonce per value
//! - **Envelope**: `enc:v1:<base64 nonce>:<base64 ciphertext>`

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use rand::RngCore;
use remora_core::EngineError;
use secrecy::{ExposeSecret, SecretString};
use zeroize::Zeroizing;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Constants
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Marker that starts every encrypted value.
pub const ENVELOPE_PREFIX: &str = "enc:v1:";
/// PBKDF2 iteration count (OWASP 2023 recommendation for SHA-256).
pub const DEFAULT_PBKDF2_ITERATIONS: u32 = 600_000;
/// Salt used when the caller does not supply one.
pub const DEFAULT_SALT: &[u8] = b"remora.credentials.v1";
/// AES-256-GCM nonce length in bytes.
const NONCE_LEN: usize = 12;
/// Derived key length in bytes (256-bit for AES-256).
const KEY_LEN: usize = 32;

#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("value is not an encrypted envelope")]
    NotEnvelope,
    #[error("malformed envelope: {0}")]
    Malformed(String),
    #[error("encryption failed: {0}")]
    Encrypt(String),
    #[error("decryption failed: wrong master secret or corrupted data")]
    Decrypt,
}

impl CryptoError {
    /// True when the value was never encrypted by this cipher at all.
    pub fn is_unparseable(&self) -> bool {
        matches!(self, CryptoError::NotEnvelope | CryptoError::Malformed(_))
    }
}

impl From<CryptoError> for EngineError {
    fn from(e: CryptoError) -> Self {
        match e {
            CryptoError::Decrypt | CryptoError::Malformed(_) => EngineError::auth_failed(e.to_string()),
            CryptoError::NotEnvelope => EngineError::invalid_input(e.to_string()),
            CryptoError::Encrypt(_) => EngineError::io(e.to_string()),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Cipher
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Encrypts and decrypts individual secrets with a key derived once.
pub struct PasswordCipher {
    key: Zeroizing<[u8; KEY_LEN]>,
}

impl PasswordCipher {
    pub fn new(master_secret: &SecretString, salt: &[u8], iterations: u32) -> Self {
        let mut key = Zeroizing::new([0u8; KEY_LEN]);
        pbkdf2::pbkdf2_hmac::<sha2::Sha256>(
            master_secret.expose_secret().as_bytes(),
            salt,
            iterations.max(1),
            &mut key[..],
        );
        Self { key }
    }

    /// Cipher over the default salt.
    pub fn from_master(master_secret: &SecretString, iterations: u32) -> Self {
        Self::new(master_secret, DEFAULT_SALT, iterations)
    }

    /// Whether `value` parses as an envelope (says nothing about the key).
    pub fn is_envelope(value: &str) -> bool {
        parse_envelope(value).is_ok()
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<String, CryptoError> {
        let cipher = Aes256Gcm::new_from_slice(&self.key[..])
            .map_err(|e| CryptoError::Encrypt(format!("AES init: {}", e)))?;
        let mut nonce = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce);
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext.as_bytes())
            .map_err(|e| CryptoError::Encrypt(format!("AES encrypt: {}", e)))?;
        Ok(format!(
            "{}{}:{}",
            ENVELOPE_PREFIX,
            STANDARD.encode(nonce),
            STANDARD.encode(ciphertext)
        ))
    }

    pub fn decrypt(&self, envelope: &str) -> Result<SecretString, CryptoError> {
        let (nonce, ciphertext) = parse_envelope(envelope)?;
        let cipher = Aes256Gcm::new_from_slice(&self.key[..]).map_err(|_| CryptoError::Decrypt)?;
        let plaintext = Zeroizing::new(
            cipher
                .decrypt(Nonce::from_slice(&nonce), ciphertext.as_slice())
                .map_err(|_| CryptoError::Decrypt)?,
        );
        let text = std::str::from_utf8(&plaintext).map_err(|_| CryptoError::Decrypt)?;
        Ok(SecretString::new(text.to_string()))
    }
}

fn parse_envelope(value: &str) -> Result<([u8; NONCE_LEN], Vec<u8>), CryptoError> {
    let body = value.strip_prefix(ENVELOPE_PREFIX).ok_or(CryptoError::NotEnvelope)?;
    let (nonce_b64, ct_b64) = body
        .split_once(':')
        .ok_or_else(|| CryptoError::Malformed("missing separator".into()))?;
    let nonce_bytes = STANDARD
        .decode(nonce_b64)
        .map_err(|e| CryptoError::Malformed(format!("nonce: {}", e)))?;
    if nonce_bytes.len() != NONCE_LEN {
        return Err(CryptoError::Malformed(format!(
            "nonce length {} != expected {}",
            nonce_bytes.len(),
            NONCE_LEN
        )));
    }
    let ciphertext = STANDARD
        .decode(ct_b64)
        .map_err(|e| CryptoError::Malformed(format!("ciphertext: {}", e)))?;
    let mut nonce = [0u8; NONCE_LEN];
    nonce.copy_from_slice(&nonce_bytes);
    Ok((nonce, ciphertext))
}
