use std::path::{Path, PathBuf};

use log::info;

use crate::container::error::{ContainerError, ContainerResult};
use crate::utils::fs::{clear_directory, sha256_hex};

const CACHE_KEY_FILE: &str = ".cache-key";

/// Framework bundle cache, keyed by the host export string.
///
/// Bundles resolved against one set of host exports may not resolve against
/// another, so the cache is wiped whenever the exports change.
#[derive(Debug, Clone)]
pub struct BundleCache {
    directory: PathBuf,
}

impl BundleCache {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn key_for(exports: &str) -> String {
        sha256_hex(exports.as_bytes())
    }

    /// Key recorded by the last validation, if any
    pub fn stored_key(&self) -> Option<String> {
        std::fs::read_to_string(self.directory.join(CACHE_KEY_FILE))
            .ok()
            .map(|k| k.trim().to_string())
    }

    /// Clears the cache unless it was built for `exports`.
    /// Returns true when the cache was cleared.
    pub fn validate(&self, exports: &str) -> ContainerResult<bool> {
        let key = Self::key_for(exports);
        if self.stored_key().as_deref() == Some(key.as_str()) {
            return Ok(false);
        }
        let io = |e, op: &str| ContainerError::io(e, op, self.directory.clone());
        if self.directory.exists() {
            info!("Host exports changed, clearing bundle cache {}", self.directory.display());
            clear_directory(&self.directory).map_err(|e| io(e, "clear_cache"))?;
        } else {
            std::fs::create_dir_all(&self.directory).map_err(|e| io(e, "create_cache"))?;
        }
        std::fs::write(self.directory.join(CACHE_KEY_FILE), &key).map_err(|e| io(e, "write_cache_key"))?;
        Ok(true)
    }
}
