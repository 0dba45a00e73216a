//! Symmetric vault encryption.
//!
//! AES-256-GCM with a fresh random 96-bit IV per call.
//!
//! Packed wire format (single base64 string):
//!   [ iv (12 bytes) | ciphertext + tag (16 bytes) ]
//!
//! Split wire format ([`CipherBlob`]): `{"iv": "<base64>", "ct": "<base64>"}`.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::{engine::general_purpose, Engine as _};
use rand::RngCore;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use zeroize::Zeroizing;

use crate::blob::CipherBlob;
use crate::error::{Result, VaultError};
use crate::settings::Settings;

pub const KEY_LEN: usize = 32;
pub const IV_LEN: usize = 12;
pub const TAG_LEN: usize = 16;

// ── Key ─────────────────────────────────────────────────────────────────────

/// 256-bit vault key. There is no way to read the raw bytes back out; the key
/// can only be used through [`VaultCrypto`]. Zeroized on drop.
pub struct VaultKey {
    bytes: Zeroizing<[u8; KEY_LEN]>,
}

impl VaultKey {
    pub fn generate() -> Self {
        let mut bytes = Zeroizing::new([0u8; KEY_LEN]);
        rand::rngs::OsRng.fill_bytes(&mut bytes[..]);
        Self { bytes }
    }

    /// Import a base64-encoded 32-byte key (the development key format).
    pub fn from_base64(encoded: &str) -> Result<Self> {
        let decoded = Zeroizing::new(
            general_purpose::STANDARD
                .decode(encoded.trim())
                .map_err(|_| VaultError::Configuration("key is not valid base64".into()))?,
        );
        if decoded.len() != KEY_LEN {
            return Err(VaultError::Configuration(format!(
                "key must be {KEY_LEN} bytes, got {}",
                decoded.len()
            )));
        }
        let mut bytes = Zeroizing::new([0u8; KEY_LEN]);
        bytes.copy_from_slice(&decoded);
        Ok(Self { bytes })
    }

    pub(crate) fn from_bytes(bytes: Zeroizing<[u8; KEY_LEN]>) -> Self {
        Self { bytes }
    }

    fn cipher(&self) -> Result<Aes256Gcm> {
        Aes256Gcm::new_from_slice(&self.bytes[..])
            .map_err(|_| VaultError::Configuration("invalid key length".into()))
    }
}

impl fmt::Debug for VaultKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("VaultKey([REDACTED])")
    }
}

/// Generate a new random key and return it base64-encoded, for provisioning a
/// development key. The caller owns the only copy.
pub fn generate_dev_key() -> Zeroizing<String> {
    let mut bytes = Zeroizing::new([0u8; KEY_LEN]);
    rand::rngs::OsRng.fill_bytes(&mut bytes[..]);
    Zeroizing::new(general_purpose::STANDARD.encode(&bytes[..]))
}

/// Where [`VaultCrypto::initialize`] takes its key from.
pub enum KeySource<'a> {
    /// An already imported or derived key.
    Key(VaultKey),
    /// A base64-encoded raw key.
    Base64(&'a str),
    /// The development key from settings (`ELEUTHIA_DEV_KEY`).
    Configured,
}

// ── Crypto ──────────────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct VaultCrypto {
    key: VaultKey,
}

impl VaultCrypto {
    pub fn new(key: VaultKey) -> Self {
        Self { key }
    }

    pub fn initialize(source: KeySource<'_>, settings: &Settings) -> Result<Self> {
        let key = match source {
            KeySource::Key(key) => key,
            KeySource::Base64(encoded) => VaultKey::from_base64(encoded)?,
            KeySource::Configured => match settings.dev_key.as_deref() {
                Some(encoded) if !encoded.trim().is_empty() => VaultKey::from_base64(encoded)?,
                _ => {
                    return Err(VaultError::Configuration(
                        "no key given and ELEUTHIA_DEV_KEY is not set".into(),
                    ))
                }
            },
        };
        Ok(Self::new(key))
    }

    /// Encrypt a UTF-8 string to `base64(iv || ciphertext)`.
    pub fn encrypt(&self, plaintext: &str) -> Result<String> {
        let (iv, ciphertext) = self.seal(plaintext.as_bytes())?;
        let mut combined = Vec::with_capacity(IV_LEN + ciphertext.len());
        combined.extend_from_slice(&iv);
        combined.extend_from_slice(&ciphertext);
        Ok(general_purpose::STANDARD.encode(combined))
    }

    pub fn decrypt(&self, blob: &str) -> Result<Zeroizing<String>> {
        let combined = general_purpose::STANDARD
            .decode(blob.trim())
            .map_err(|_| VaultError::Decryption)?;
        if combined.len() < IV_LEN + TAG_LEN {
            return Err(VaultError::Decryption);
        }
        let (iv, ciphertext) = combined.split_at(IV_LEN);
        let plain = self.open(iv, ciphertext)?;
        into_utf8(plain)
    }

    pub fn encrypt_json<T: Serialize + ?Sized>(&self, value: &T) -> Result<String> {
        let json = Zeroizing::new(serde_json::to_string(value)?);
        self.encrypt(&json)
    }

    pub fn decrypt_json<T: DeserializeOwned>(&self, blob: &str) -> Result<T> {
        let json = self.decrypt(blob)?;
        serde_json::from_str(&json).map_err(|e| VaultError::MalformedPayload(e.to_string()))
    }

    /// Encrypt a JSON value into the split `{iv, ct}` form.
    pub fn encrypt_payload<T: Serialize + ?Sized>(&self, value: &T) -> Result<CipherBlob> {
        let json = Zeroizing::new(serde_json::to_vec(value)?);
        let (iv, ciphertext) = self.seal(&json)?;
        Ok(CipherBlob::from_parts(&iv, &ciphertext))
    }

    pub fn decrypt_payload<T: DeserializeOwned>(&self, blob: &CipherBlob) -> Result<T> {
        let iv = blob.iv_bytes()?;
        let ciphertext = blob.ct_bytes()?;
        if iv.len() != IV_LEN || ciphertext.len() < TAG_LEN {
            return Err(VaultError::Decryption);
        }
        let json = into_utf8(self.open(&iv, &ciphertext)?)?;
        serde_json::from_str(&json).map_err(|e| VaultError::MalformedPayload(e.to_string()))
    }

    fn seal(&self, plaintext: &[u8]) -> Result<([u8; IV_LEN], Vec<u8>)> {
        let iv = generate_iv();
        let ciphertext = self
            .key
            .cipher()?
            .encrypt(Nonce::from_slice(&iv), plaintext)
            .map_err(|_| VaultError::Encryption)?;
        Ok((iv, ciphertext))
    }

    fn open(&self, iv: &[u8], ciphertext: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
        let plain = self
            .key
            .cipher()
            .map_err(|_| VaultError::Decryption)?
            .decrypt(Nonce::from_slice(iv), ciphertext)
            .map_err(|_| VaultError::Decryption)?;
        Ok(Zeroizing::new(plain))
    }
}

pub fn generate_iv() -> [u8; IV_LEN] {
    let mut iv = [0u8; IV_LEN];
    rand::rngs::OsRng.fill_bytes(&mut iv);
    iv
}

fn into_utf8(bytes: Zeroizing<Vec<u8>>) -> Result<Zeroizing<String>> {
    let text = std::str::from_utf8(&bytes).map_err(|_| VaultError::Decryption)?;
    Ok(Zeroizing::new(text.to_owned()))
}
