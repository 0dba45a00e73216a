use directories::ProjectDirs;
use std::path::{Path, PathBuf};

pub const APP_QUALIFIER: &str = "com";
pub const APP_ORG: &str = "eleuthia";
pub const APP_NAME: &str = "vault";

pub fn data_dir() -> crate::Result<PathBuf> {
    let dirs = ProjectDirs::from(APP_QUALIFIER, APP_ORG, APP_NAME).ok_or_else(|| {
        crate::VaultError::Configuration("cannot determine data directory".into())
    })?;
    Ok(dirs.data_dir().to_path_buf())
}

/// Directory holding the per-key JSON documents of the file store.
pub fn store_dir(data_dir: &Path) -> PathBuf {
    data_dir.join("store")
}
