//! Encryption at rest for expansions in encrypted categories.
//!
//! Stored form of an encrypted replacement: base64(nonce ‖ ciphertext+tag),
//! XChaCha20-Poly1305 with a fresh random 24-byte nonce per message. The
//! 256-bit key lives in the platform secret store as base64, never in the
//! data files.

use crate::config::{KEYRING_SERVICE, KEYRING_TOKEN};
use crate::error::{Result, TexError};
use base64::{engine::general_purpose, Engine as _};
use chacha20poly1305::aead::rand_core::RngCore;
use chacha20poly1305::aead::{Aead, AeadCore, KeyInit, OsRng};
use chacha20poly1305::{Key, XChaCha20Poly1305, XNonce};
use parking_lot::Mutex;
use std::fmt;
use thiserror::Error;
use tracing::{info, warn};
use zeroize::Zeroizing;

pub const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 24;

/// Symmetric key material, wiped from memory on drop
#[derive(Clone)]
pub struct EncryptionKey(Zeroizing<[u8; KEY_LEN]>);

impl EncryptionKey {
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(Zeroizing::new(bytes))
    }

    pub fn from_base64(encoded: &str) -> Result<Self> {
        let decoded = Zeroizing::new(
            general_purpose::STANDARD
                .decode(encoded.trim())
                .map_err(|e| TexError::Crypto(format!("decode key: {e}")))?,
        );
        if decoded.len() != KEY_LEN {
            return Err(TexError::Crypto(format!(
                "key must be {} bytes, found {}",
                KEY_LEN,
                decoded.len()
            )));
        }
        let mut bytes = [0u8; KEY_LEN];
        bytes.copy_from_slice(&decoded);
        Ok(Self::from_bytes(bytes))
    }

    pub fn to_base64(&self) -> Zeroizing<String> {
        Zeroizing::new(general_purpose::STANDARD.encode(self.0.as_slice()))
    }

    fn as_bytes(&self) -> &[u8] {
        self.0.as_slice()
    }
}

impl fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("EncryptionKey(..)")
    }
}

/// Decryption did not yield plaintext: wrong key, tampered or malformed
/// ciphertext.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid encryption key or corrupted data")]
pub struct DecryptFailed;

pub fn generate_key() -> EncryptionKey {
    let generated = XChaCha20Poly1305::generate_key(&mut OsRng);
    let mut bytes = [0u8; KEY_LEN];
    bytes.copy_from_slice(generated.as_slice());
    EncryptionKey::from_bytes(bytes)
}

/// Random bearer token for the control API: 32 bytes, URL-safe base64
pub fn generate_token() -> String {
    let mut bytes = Zeroizing::new([0u8; 32]);
    OsRng.fill_bytes(bytes.as_mut_slice());
    general_purpose::URL_SAFE_NO_PAD.encode(bytes.as_slice())
}

pub fn encrypt(plaintext: &str, key: &EncryptionKey) -> Result<String> {
    let cipher = XChaCha20Poly1305::new(Key::from_slice(key.as_bytes()));
    let nonce = XChaCha20Poly1305::generate_nonce(&mut OsRng);
    let sealed = cipher
        .encrypt(&nonce, plaintext.as_bytes())
        .map_err(|e| TexError::Crypto(format!("encrypt: {e}")))?;

    let mut payload = Vec::with_capacity(NONCE_LEN + sealed.len());
    payload.extend_from_slice(nonce.as_slice());
    payload.extend_from_slice(&sealed);
    Ok(general_purpose::STANDARD.encode(payload))
}

pub fn decrypt(ciphertext: &str, key: &EncryptionKey) -> std::result::Result<String, DecryptFailed> {
    let payload = general_purpose::STANDARD
        .decode(ciphertext.trim())
        .map_err(|_| DecryptFailed)?;
    if payload.len() < NONCE_LEN {
        return Err(DecryptFailed);
    }

    let (nonce, sealed) = payload.split_at(NONCE_LEN);
    let cipher = XChaCha20Poly1305::new(Key::from_slice(key.as_bytes()));
    let plaintext = cipher
        .decrypt(XNonce::from_slice(nonce), sealed)
        .map_err(|_| DecryptFailed)?;

    String::from_utf8(plaintext).map_err(|_| DecryptFailed)
}

/// Where the encryption key is kept between runs
pub trait SecretStore: Send + Sync {
    /// `Ok(None)` when no secret has been stored yet
    fn get_secret(&self) -> Result<Option<String>>;
    fn set_secret(&self, value: &str) -> Result<()>;
}

/// The platform keychain / credential manager / keyutils
pub struct KeyringStore {
    service: String,
    token: String,
}

impl KeyringStore {
    pub fn new(service: &str, token: &str) -> Self {
        Self {
            service: service.to_string(),
            token: token.to_string(),
        }
    }

    fn entry(&self) -> Result<keyring::Entry> {
        keyring::Entry::new(&self.service, &self.token)
            .map_err(|e| TexError::SecretStore(format!("keyring init: {e}")))
    }
}

impl Default for KeyringStore {
    fn default() -> Self {
        Self::new(KEYRING_SERVICE, KEYRING_TOKEN)
    }
}

impl SecretStore for KeyringStore {
    fn get_secret(&self) -> Result<Option<String>> {
        match self.entry()?.get_password() {
            Ok(secret) => Ok(Some(secret)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(TexError::SecretStore(format!("load key: {e}"))),
        }
    }

    fn set_secret(&self, value: &str) -> Result<()> {
        self.entry()?
            .set_password(value)
            .map_err(|e| TexError::SecretStore(format!("store key: {e}")))
    }
}

/// Process-local secret store for tests and keyring-less setups
#[derive(Default)]
pub struct MemorySecretStore {
    secret: Mutex<Option<String>>,
    unavailable: bool,
}

impl MemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_secret(secret: &str) -> Self {
        Self {
            secret: Mutex::new(Some(secret.to_string())),
            unavailable: false,
        }
    }

    /// A store whose backend always fails, like a locked or missing keychain
    pub fn unavailable() -> Self {
        Self {
            secret: Mutex::new(None),
            unavailable: true,
        }
    }

    fn check(&self) -> Result<()> {
        if self.unavailable {
            return Err(TexError::SecretStore("secret store unavailable".into()));
        }
        Ok(())
    }
}

impl SecretStore for MemorySecretStore {
    fn get_secret(&self) -> Result<Option<String>> {
        self.check()?;
        Ok(self.secret.lock().clone())
    }

    fn set_secret(&self, value: &str) -> Result<()> {
        self.check()?;
        *self.secret.lock() = Some(value.to_string());
        Ok(())
    }
}

pub fn load_key(store: &dyn SecretStore) -> Result<Option<EncryptionKey>> {
    match store.get_secret()? {
        Some(encoded) => EncryptionKey::from_base64(&encoded).map(Some),
        None => Ok(None),
    }
}

pub fn save_key(store: &dyn SecretStore, key: &EncryptionKey) -> Result<()> {
    store.set_secret(&key.to_base64())
}

/// Load the installation key, creating and persisting one on first run.
///
/// `None` means encrypted categories stay locked: the store could not be
/// read, holds something that is not a key, or would not keep a new key.
/// A key that was not persisted is never handed out, since anything
/// encrypted with it would be unreadable after a restart.
pub fn load_or_create_key(store: &dyn SecretStore) -> Option<EncryptionKey> {
    match load_key(store) {
        Ok(Some(key)) => Some(key),
        Ok(None) => {
            let key = generate_key();
            match save_key(store, &key) {
                Ok(()) => {
                    info!("Generated new encryption key");
                    Some(key)
                }
                Err(e) => {
                    warn!(error = %e, "Could not persist new encryption key, encrypted categories locked");
                    None
                }
            }
        }
        Err(e) => {
            warn!(error = %e, "Encryption key unavailable, encrypted categories locked");
            None
        }
    }
}
