//! Passphrase key derivation.
//!
//! Argon2id, 16-byte random salt. The parameters are stored in [`VaultMeta`]
//! next to the vault cipher so they can be raised without breaking existing
//! vaults.

use argon2::{Algorithm, Argon2, Params, Version};
use base64::{engine::general_purpose, Engine as _};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::crypto::{VaultKey, KEY_LEN};
use crate::error::{Result, VaultError};

pub const SALT_LEN: usize = 16;
pub const META_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KdfParams {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            memory_kib: 64 * 1024, // 64 MiB
            iterations: 3,
            parallelism: 1,
        }
    }
}

/// Non-secret unlock metadata for a vault.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultMeta {
    pub salt: String,
    pub kdf: KdfParams,
    pub ver: u32,
}

impl VaultMeta {
    pub fn new(params: KdfParams) -> Self {
        Self {
            salt: general_purpose::STANDARD.encode(generate_salt()),
            kdf: params,
            ver: META_VERSION,
        }
    }

    pub fn derive_key(&self, passphrase: &str) -> Result<VaultKey> {
        if self.ver != META_VERSION {
            return Err(VaultError::KeyDerivation(format!(
                "unsupported meta version {}",
                self.ver
            )));
        }
        let salt = general_purpose::STANDARD
            .decode(&self.salt)
            .map_err(|_| VaultError::KeyDerivation("salt is not valid base64".into()))?;
        derive_key(passphrase, &salt, &self.kdf)
    }
}

pub fn derive_key(passphrase: &str, salt: &[u8], params: &KdfParams) -> Result<VaultKey> {
    let params = Params::new(
        params.memory_kib,
        params.iterations,
        params.parallelism,
        Some(KEY_LEN),
    )
    .map_err(|e| VaultError::KeyDerivation(format!("argon2 params: {e}")))?;
    let argon = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);
    let mut key = Zeroizing::new([0u8; KEY_LEN]);
    argon
        .hash_password_into(passphrase.as_bytes(), salt, &mut key[..])
        .map_err(|e| VaultError::KeyDerivation(format!("argon2 derive: {e}")))?;
    Ok(VaultKey::from_bytes(key))
}

pub fn generate_salt() -> [u8; SALT_LEN] {
    let mut salt = [0u8; SALT_LEN];
    rand::rngs::OsRng.fill_bytes(&mut salt);
    salt
}

#[cfg(test)]
pub(crate) fn test_params() -> KdfParams {
    KdfParams {
        memory_kib: 1024,
        iterations: 1,
        parallelism: 1,
    }
}
