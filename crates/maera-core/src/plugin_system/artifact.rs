//! Plugin artifacts: the raw, re-readable form a plugin is delivered in.
//!
//! Two shapes are understood: a zip archive (`.jar`) carrying a descriptor
//! and resources, and a bare descriptor file (`.json`).
use std::fmt;
use std::fs::File;
use std::io::{Cursor, Read, Seek};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::plugin_system::error::{PluginResult, PluginSystemError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    /// Zip archive with a descriptor and resources
    Jar,
    /// Bare descriptor document
    Descriptor,
}

impl ArtifactKind {
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_string_lossy().to_ascii_lowercase();
        match ext.as_str() {
            "jar" | "zip" => Some(ArtifactKind::Jar),
            "json" => Some(ArtifactKind::Descriptor),
            _ => None,
        }
    }
}

/// A plugin in its delivered form. Every accessor can be called repeatedly.
pub trait PluginArtifact: Send + Sync + fmt::Debug {
    /// File name of the artifact
    fn name(&self) -> &str;

    fn kind(&self) -> ArtifactKind;

    /// Backing file, when the artifact lives on disk
    fn file(&self) -> Option<&Path>;

    /// The complete artifact contents
    fn to_bytes(&self) -> PluginResult<Vec<u8>>;

    fn does_resource_exist(&self, name: &str) -> bool;

    /// Contents of a named entry, `None` when absent
    fn resource_as_bytes(&self, name: &str) -> PluginResult<Option<Vec<u8>>>;
}

fn read_zip_entry<R: Read + Seek>(
    artifact: &str,
    path: Option<&Path>,
    reader: R,
    name: &str,
) -> PluginResult<Option<Vec<u8>>> {
    let mut archive = zip::ZipArchive::new(reader)
        .map_err(|e| PluginSystemError::loading(artifact, path.map(Path::to_path_buf), e))?;
    let result = match archive.by_name(name) {
        Ok(mut entry) => {
            // The declared size is untrusted
            let mut buf = Vec::new();
            entry
                .read_to_end(&mut buf)
                .map_err(|e| PluginSystemError::loading(artifact, path.map(Path::to_path_buf), e))?;
            Some(buf)
        }
        Err(zip::result::ZipError::FileNotFound) => None,
        Err(e) => return Err(PluginSystemError::loading(artifact, path.map(Path::to_path_buf), e)),
    };
    Ok(result)
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Zip archive on disk
#[derive(Debug, Clone)]
pub struct JarPluginArtifact {
    path: PathBuf,
    name: String,
}

impl JarPluginArtifact {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = file_name_of(&path);
        Self { path, name }
    }

    fn open(&self) -> PluginResult<File> {
        File::open(&self.path)
            .map_err(|e| PluginSystemError::loading(&self.name, Some(self.path.clone()), e))
    }
}

impl PluginArtifact for JarPluginArtifact {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ArtifactKind {
        ArtifactKind::Jar
    }

    fn file(&self) -> Option<&Path> {
        Some(&self.path)
    }

    fn to_bytes(&self) -> PluginResult<Vec<u8>> {
        std::fs::read(&self.path)
            .map_err(|e| PluginSystemError::loading(&self.name, Some(self.path.clone()), e))
    }

    fn does_resource_exist(&self, name: &str) -> bool {
        matches!(self.resource_as_bytes(name), Ok(Some(_)))
    }

    fn resource_as_bytes(&self, name: &str) -> PluginResult<Option<Vec<u8>>> {
        read_zip_entry(&self.name, Some(&self.path), self.open()?, name)
    }
}

/// Bare descriptor document on disk
#[derive(Debug, Clone)]
pub struct DescriptorPluginArtifact {
    path: PathBuf,
    name: String,
}

impl DescriptorPluginArtifact {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = file_name_of(&path);
        Self { path, name }
    }
}

impl PluginArtifact for DescriptorPluginArtifact {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ArtifactKind {
        ArtifactKind::Descriptor
    }

    fn file(&self) -> Option<&Path> {
        Some(&self.path)
    }

    fn to_bytes(&self) -> PluginResult<Vec<u8>> {
        std::fs::read(&self.path)
            .map_err(|e| PluginSystemError::loading(&self.name, Some(self.path.clone()), e))
    }

    // A bare descriptor carries no resources of its own
    fn does_resource_exist(&self, _name: &str) -> bool {
        false
    }

    fn resource_as_bytes(&self, _name: &str) -> PluginResult<Option<Vec<u8>>> {
        Ok(None)
    }
}

/// Artifact held in memory, e.g. a descriptor compiled into the host
#[derive(Clone)]
pub struct BytesPluginArtifact {
    name: String,
    kind: ArtifactKind,
    bytes: Arc<[u8]>,
}

impl fmt::Debug for BytesPluginArtifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BytesPluginArtifact")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("len", &self.bytes.len())
            .finish()
    }
}

impl BytesPluginArtifact {
    pub fn new(name: impl Into<String>, kind: ArtifactKind, bytes: impl Into<Arc<[u8]>>) -> Self {
        Self {
            name: name.into(),
            kind,
            bytes: bytes.into(),
        }
    }
}

impl PluginArtifact for BytesPluginArtifact {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ArtifactKind {
        self.kind
    }

    fn file(&self) -> Option<&Path> {
        None
    }

    fn to_bytes(&self) -> PluginResult<Vec<u8>> {
        Ok(self.bytes.to_vec())
    }

    fn does_resource_exist(&self, name: &str) -> bool {
        matches!(self.resource_as_bytes(name), Ok(Some(_)))
    }

    fn resource_as_bytes(&self, name: &str) -> PluginResult<Option<Vec<u8>>> {
        match self.kind {
            ArtifactKind::Jar => read_zip_entry(&self.name, None, Cursor::new(&self.bytes[..]), name),
            ArtifactKind::Descriptor => Ok(None),
        }
    }
}

/// Creates artifacts from `file:` URIs or plain paths.
#[derive(Debug, Clone, Copy, Default)]
pub struct PluginArtifactFactory;

impl PluginArtifactFactory {
    pub fn new() -> Self {
        Self
    }

    /// Accepts `file:///path/x.jar`, `file:/path/x.jar` or a plain path.
    pub fn create(&self, uri: &str) -> PluginResult<Arc<dyn PluginArtifact>> {
        let path = match uri.split_once(':') {
            Some(("file", rest)) => {
                let rest = rest.strip_prefix("//").unwrap_or(rest);
                PathBuf::from(rest)
            }
            Some((scheme, _)) if scheme.len() > 1 => {
                return Err(PluginSystemError::Unsupported(format!(
                    "Artifact URI scheme '{}' is not supported: {}",
                    scheme, uri
                )));
            }
            _ => PathBuf::from(uri),
        };
        self.from_path(&path)
    }

    pub fn from_path(&self, path: &Path) -> PluginResult<Arc<dyn PluginArtifact>> {
        match ArtifactKind::from_path(path) {
            Some(ArtifactKind::Jar) => Ok(Arc::new(JarPluginArtifact::new(path))),
            Some(ArtifactKind::Descriptor) => Ok(Arc::new(DescriptorPluginArtifact::new(path))),
            None => Err(PluginSystemError::Unsupported(format!(
                "Cannot create an artifact for '{}': expected a .jar or .json file",
                path.display()
            ))),
        }
    }
}
