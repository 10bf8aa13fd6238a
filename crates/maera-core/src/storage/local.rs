use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use crate::storage::error::{StorageResult, StorageSystemError};
use crate::storage::provider::StorageProvider;

/// Local filesystem storage provider rooted at a base path
#[derive(Clone, Debug)]
pub struct LocalStorageProvider {
    base_path: PathBuf,
}

impl LocalStorageProvider {
    pub fn new(base_path: PathBuf) -> Self {
        Self { base_path }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn resolve_path(&self, path: &Path) -> PathBuf {
        self.base_path.join(path)
    }
}

impl StorageProvider for LocalStorageProvider {
    fn is_file(&self, path: &Path) -> bool {
        self.resolve_path(path).is_file()
    }

    fn read_to_string(&self, path: &Path) -> StorageResult<String> {
        let full_path = self.resolve_path(path);
        fs::read_to_string(&full_path)
            .map_err(|e| StorageSystemError::io(e, "read_to_string", full_path))
    }

    fn write_bytes(&self, path: &Path, contents: &[u8]) -> StorageResult<()> {
        let full_path = self.resolve_path(path);
        let parent = full_path
            .parent()
            .ok_or_else(|| StorageSystemError::OperationFailed {
                operation: "write_bytes".to_string(),
                path: Some(full_path.clone()),
                message: "Cannot write to path without parent directory".to_string(),
            })?
            .to_path_buf();
        if !parent.is_dir() {
            fs::create_dir_all(&parent)
                .map_err(|e| StorageSystemError::io(e, "create_dir_all", parent.clone()))?;
        }

        // Write beside the target, then rename over it
        let mut temp_file = NamedTempFile::new_in(&parent)
            .map_err(|e| StorageSystemError::io(e, "create_temp_file", parent.clone()))?;
        temp_file
            .write_all(contents)
            .map_err(|e| StorageSystemError::io(e, "write_to_temp_file", temp_file.path().to_path_buf()))?;
        temp_file
            .persist(&full_path)
            .map_err(|e| StorageSystemError::io(e.error, "persist_temp_file", full_path.clone()))?;
        Ok(())
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        self.resolve_path(path)
    }
}
