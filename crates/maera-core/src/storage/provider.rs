use std::fmt::Debug;
use std::path::{Path, PathBuf};

use crate::storage::error::StorageResult;

/// Filesystem operations used by the state store and the plugin installer.
pub trait StorageProvider: Send + Sync + Debug {
    fn is_file(&self, path: &Path) -> bool;

    fn read_to_string(&self, path: &Path) -> StorageResult<String>;

    /// Write bytes to a file. The target is replaced atomically.
    fn write_bytes(&self, path: &Path, contents: &[u8]) -> StorageResult<()>;

    fn write_string(&self, path: &Path, contents: &str) -> StorageResult<()> {
        self.write_bytes(path, contents.as_bytes())
    }

    /// Absolute location of `path` as seen by this provider
    fn resolve(&self, path: &Path) -> PathBuf;
}
