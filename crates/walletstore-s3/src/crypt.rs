//! Encryption at rest for stored records.
//!
//! [`Crypter`] decides *whether* to encrypt (only when a passphrase is set and the
//! payload is non-empty); a [`Cipher`] does the sealing. The default cipher derives
//! a per-record key with Argon2id and seals with AES-256-GCM.

use std::{fmt, sync::Arc};

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use argon2::Argon2;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::task;
use walletstore_core::wallet::StoreError;

/// Smallest payload accepted for encryption when a passphrase is set.
pub const MIN_SEALED_LEN: usize = 16;

const ENVELOPE_VERSION: u32 = 1;
const SALT_SIZE: usize = 16;
const NONCE_SIZE: usize = 12;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CipherError {
    #[error("encrypt failed: {0}")]
    Encrypt(String),
    /// Wrong key, corrupted data or a tag mismatch.
    #[error("decrypt failed")]
    Decrypt,
}

/// Authenticated symmetric cipher keyed by an opaque passphrase.
pub trait Cipher: Send + Sync {
    fn seal(&self, data: &[u8], passphrase: &[u8]) -> Result<Vec<u8>, CipherError>;

    fn open(&self, data: &[u8], passphrase: &[u8]) -> Result<Vec<u8>, CipherError>;
}

/// AES-256-GCM with an Argon2id key derived from the passphrase and a random salt.
#[derive(Debug, Default, Clone, Copy)]
pub struct AesGcmCipher;

#[derive(Debug, Serialize, Deserialize)]
struct SealedBlob {
    version: u32,
    salt: String,
    nonce: String,
    ciphertext: String,
}

impl Cipher for AesGcmCipher {
    fn seal(&self, data: &[u8], passphrase: &[u8]) -> Result<Vec<u8>, CipherError> {
        let mut salt = [0u8; SALT_SIZE];
        OsRng.fill_bytes(&mut salt);
        let cipher = build_cipher(passphrase, &salt).map_err(CipherError::Encrypt)?;
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = cipher
            .encrypt(&nonce, data)
            .map_err(|e| CipherError::Encrypt(e.to_string()))?;

        let blob = SealedBlob {
            version: ENVELOPE_VERSION,
            salt: URL_SAFE_NO_PAD.encode(salt),
            nonce: URL_SAFE_NO_PAD.encode(nonce.as_slice()),
            ciphertext: URL_SAFE_NO_PAD.encode(ciphertext),
        };
        serde_json::to_vec(&blob).map_err(|e| CipherError::Encrypt(e.to_string()))
    }

    fn open(&self, data: &[u8], passphrase: &[u8]) -> Result<Vec<u8>, CipherError> {
        let blob: SealedBlob = serde_json::from_slice(data).map_err(|_| CipherError::Decrypt)?;
        if blob.version != ENVELOPE_VERSION {
            return Err(CipherError::Decrypt);
        }
        let salt = decode(&blob.salt)?;
        let nonce = decode(&blob.nonce)?;
        if nonce.len() != NONCE_SIZE {
            return Err(CipherError::Decrypt);
        }
        let ciphertext = decode(&blob.ciphertext)?;

        let cipher = build_cipher(passphrase, &salt).map_err(|_| CipherError::Decrypt)?;
        cipher
            .decrypt(Nonce::from_slice(&nonce), ciphertext.as_ref())
            .map_err(|_| CipherError::Decrypt)
    }
}

fn build_cipher(passphrase: &[u8], salt: &[u8]) -> Result<Aes256Gcm, String> {
    let mut key = [0u8; 32];
    Argon2::default()
        .hash_password_into(passphrase, salt, &mut key)
        .map_err(|e| format!("key derivation failed: {e}"))?;
    Aes256Gcm::new_from_slice(&key).map_err(|e| format!("cipher init failed: {e}"))
}

fn decode(field: &str) -> Result<Vec<u8>, CipherError> {
    URL_SAFE_NO_PAD
        .decode(field)
        .map_err(|_| CipherError::Decrypt)
}

/// Applies the configured cipher around payloads when a passphrase is set.
#[derive(Clone)]
pub struct Crypter {
    passphrase: Arc<[u8]>,
    cipher: Arc<dyn Cipher>,
}

impl fmt::Debug for Crypter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Crypter")
            .field("active", &self.is_active())
            .finish_non_exhaustive()
    }
}

impl Default for Crypter {
    fn default() -> Self {
        Self::new(&[], Arc::new(AesGcmCipher))
    }
}

impl Crypter {
    pub fn new(passphrase: &[u8], cipher: Arc<dyn Cipher>) -> Self {
        Self {
            passphrase: Arc::from(passphrase),
            cipher,
        }
    }

    /// Whether payloads are encrypted at all.
    pub fn is_active(&self) -> bool {
        !self.passphrase.is_empty()
    }

    pub fn encrypt_if_required(&self, data: Vec<u8>) -> Result<Vec<u8>, StoreError> {
        if data.is_empty() || !self.is_active() {
            return Ok(data);
        }
        if data.len() < MIN_SEALED_LEN {
            return Err(StoreError::PayloadTooShort { len: data.len() });
        }
        self.cipher
            .seal(&data, &self.passphrase)
            .map_err(cipher_err)
    }

    pub fn decrypt_if_required(&self, data: Vec<u8>) -> Result<Vec<u8>, StoreError> {
        if data.is_empty() || !self.is_active() {
            return Ok(data);
        }
        if data.len() < MIN_SEALED_LEN {
            return Err(StoreError::PayloadTooShort { len: data.len() });
        }
        self.cipher
            .open(&data, &self.passphrase)
            .map_err(cipher_err)
    }

    /// [`Crypter::encrypt_if_required`] on the blocking pool.
    pub async fn encrypt(&self, data: Vec<u8>) -> Result<Vec<u8>, StoreError> {
        if data.is_empty() || !self.is_active() {
            return Ok(data);
        }
        let crypter = self.clone();
        task::spawn_blocking(move || crypter.encrypt_if_required(data))
            .await
            .map_err(|e| StoreError::Encryption(format!("cipher task failed: {e}")))?
    }

    /// [`Crypter::decrypt_if_required`] on the blocking pool.
    pub async fn decrypt(&self, data: Vec<u8>) -> Result<Vec<u8>, StoreError> {
        if data.is_empty() || !self.is_active() {
            return Ok(data);
        }
        let crypter = self.clone();
        task::spawn_blocking(move || crypter.decrypt_if_required(data))
            .await
            .map_err(|_| StoreError::Decryption)?
    }
}

fn cipher_err(err: CipherError) -> StoreError {
    match err {
        CipherError::Decrypt => StoreError::Decryption,
        CipherError::Encrypt(reason) => StoreError::Encryption(reason),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAYLOAD: &[u8] =
        br#"{"name":"test wallet","uuid":"c8b4a1c2-0c4b-4d1f-9a3e-1d1f0c6b8e2a"}"#;

    fn crypter(passphrase: &str) -> Crypter {
        Crypter::new(passphrase.as_bytes(), Arc::new(AesGcmCipher))
    }

    #[test]
    fn round_trip_with_passphrase() {
        let crypter = crypter("test passphrase");
        let sealed = crypter.encrypt_if_required(PAYLOAD.to_vec()).expect("seal");
        assert_ne!(sealed, PAYLOAD);
        assert!(
            !String::from_utf8_lossy(&sealed).contains("test wallet"),
            "plaintext must not be stored"
        );

        let opened = crypter.decrypt_if_required(sealed).expect("open");
        assert_eq!(opened, PAYLOAD);
    }

    #[test]
    fn sealing_is_not_deterministic() {
        let crypter = crypter("test passphrase");
        let a = crypter.encrypt_if_required(PAYLOAD.to_vec()).expect("seal");
        let b = crypter.encrypt_if_required(PAYLOAD.to_vec()).expect("seal");
        assert_ne!(a, b);
    }

    #[test]
    fn empty_passphrase_passes_through() {
        let crypter = Crypter::default();
        assert_eq!(crypter.encrypt_if_required(PAYLOAD.to_vec()).unwrap(), PAYLOAD);
        assert_eq!(crypter.decrypt_if_required(PAYLOAD.to_vec()).unwrap(), PAYLOAD);
        assert_eq!(crypter.encrypt_if_required(b"ab".to_vec()).unwrap(), b"ab");
    }

    #[test]
    fn empty_payload_passes_through() {
        let crypter = crypter("test passphrase");
        assert!(crypter.encrypt_if_required(Vec::new()).unwrap().is_empty());
        assert!(crypter.decrypt_if_required(Vec::new()).unwrap().is_empty());
    }

    #[test]
    fn short_payload_rejected_with_passphrase() {
        let crypter = crypter("test passphrase");
        let err = crypter
            .encrypt_if_required(br#"{"test":true}"#.to_vec())
            .expect_err("short");
        assert!(matches!(err, StoreError::PayloadTooShort { len: 13 }));
        assert_eq!(err.to_string(), "data must be at least 16 bytes (got 13)");

        let err = crypter
            .decrypt_if_required(br#"{"test":true}"#.to_vec())
            .expect_err("short");
        assert!(matches!(err, StoreError::PayloadTooShort { .. }));
    }

    #[test]
    fn wrong_passphrase_is_a_decryption_error() {
        let sealed = crypter("right")
            .encrypt_if_required(PAYLOAD.to_vec())
            .expect("seal");
        let err = crypter("wrong")
            .decrypt_if_required(sealed)
            .expect_err("wrong key");
        assert!(matches!(err, StoreError::Decryption));
    }

    #[test]
    fn corrupted_ciphertext_is_a_decryption_error() {
        let crypter = crypter("test passphrase");
        let sealed = crypter.encrypt_if_required(PAYLOAD.to_vec()).expect("seal");
        let mut blob: SealedBlob = serde_json::from_slice(&sealed).expect("envelope");
        let mut ciphertext = URL_SAFE_NO_PAD.decode(&blob.ciphertext).expect("b64");
        ciphertext[0] ^= 0xff;
        blob.ciphertext = URL_SAFE_NO_PAD.encode(ciphertext);
        let tampered = serde_json::to_vec(&blob).expect("encode");

        assert!(matches!(
            crypter.decrypt_if_required(tampered),
            Err(StoreError::Decryption)
        ));
        assert!(matches!(
            crypter.decrypt_if_required(b"not an envelope at all".to_vec()),
            Err(StoreError::Decryption)
        ));
    }

    #[test]
    fn debug_output_hides_passphrase() {
        let rendered = format!("{:?}", crypter("hunter2-passphrase"));
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("active: true"));
    }
}
