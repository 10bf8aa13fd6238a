//! Bundle manifest (`META-INF/MANIFEST.MF`) parsing.
//!
//! Manifests are `Name: value` lines; a line starting with a single space
//! continues the previous value. Package headers are comma separated
//! clauses with `;`-separated attributes, and commas inside double quotes
//! do not split clauses.
use std::collections::BTreeMap;
use std::fmt;
use std::io::{Cursor, Read, Seek};
use std::path::Path;

use crate::container::error::{ContainerError, ContainerResult};

pub const MANIFEST_PATH: &str = "META-INF/MANIFEST.MF";
/// Marks a bundle as the code of a Maera plugin
pub const PLUGIN_KEY_HEADER: &str = "Maera-Plugin-Key";
pub const SYMBOLIC_NAME_HEADER: &str = "Bundle-SymbolicName";
pub const VERSION_HEADER: &str = "Bundle-Version";
pub const NAME_HEADER: &str = "Bundle-Name";
pub const EXPORT_PACKAGE_HEADER: &str = "Export-Package";
pub const IMPORT_PACKAGE_HEADER: &str = "Import-Package";
pub const FRAGMENT_HOST_HEADER: &str = "Fragment-Host";

/// An exported package with its optional version
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PackageExport {
    pub name: String,
    pub version: Option<String>,
}

impl PackageExport {
    pub fn new(name: impl Into<String>, version: Option<String>) -> Self {
        Self {
            name: name.into(),
            version,
        }
    }

    /// Parses a single `name;version=x` clause
    pub fn parse(clause: &str) -> Option<Self> {
        let mut parts = clause.split(';').map(str::trim);
        let name = parts.next().filter(|n| !n.is_empty())?;
        let version = parts.find_map(|attr| attribute(attr, "version"));
        Some(Self::new(name, version))
    }
}

impl fmt::Display for PackageExport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.version {
            Some(v) => write!(f, "{};version={}", self.name, v),
            None => f.write_str(&self.name),
        }
    }
}

/// An imported package requirement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageImport {
    pub name: String,
    pub version_range: Option<String>,
    pub optional: bool,
}

fn attribute(attr: &str, name: &str) -> Option<String> {
    let (k, v) = attr.split_once('=')?;
    let k = k.trim().trim_end_matches(':');
    if k != name {
        return None;
    }
    Some(v.trim().trim_matches('"').to_string())
}

/// Splits a header value into clauses, honouring double quotes.
pub fn split_clauses(value: &str) -> Vec<String> {
    let mut clauses = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    for c in value.chars() {
        match c {
            '"' => {
                quoted = !quoted;
                current.push(c);
            }
            ',' if !quoted => {
                if !current.trim().is_empty() {
                    clauses.push(current.trim().to_string());
                }
                current.clear();
            }
            _ => current.push(c),
        }
    }
    if !current.trim().is_empty() {
        clauses.push(current.trim().to_string());
    }
    clauses
}

/// Main section headers of a bundle manifest
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BundleManifest {
    headers: BTreeMap<String, String>,
}

impl BundleManifest {
    pub fn parse(text: &str) -> Self {
        let mut headers = BTreeMap::new();
        let mut current: Option<(String, String)> = None;
        for line in text.lines() {
            let line = line.trim_end_matches('\r');
            if let Some(cont) = line.strip_prefix(' ') {
                if let Some((_, value)) = current.as_mut() {
                    value.push_str(cont);
                }
                continue;
            }
            if let Some((name, value)) = current.take() {
                headers.insert(name, value);
            }
            if line.is_empty() {
                // Only the main section is of interest
                break;
            }
            if let Some((name, value)) = line.split_once(':') {
                current = Some((name.trim().to_string(), value.trim_start().to_string()));
            }
        }
        if let Some((name, value)) = current.take() {
            headers.insert(name, value);
        }
        Self { headers }
    }

    pub fn from_headers<I, K, V>(headers: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            headers: headers.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }

    fn from_archive<R: Read + Seek>(reader: R, source: &str) -> ContainerResult<Option<Self>> {
        let mut archive = zip::ZipArchive::new(reader).map_err(|e| ContainerError::InvalidBundle {
            location: source.to_string(),
            message: e.to_string(),
        })?;
        let mut entry = match archive.by_name(MANIFEST_PATH) {
            Ok(entry) => entry,
            Err(zip::result::ZipError::FileNotFound) => return Ok(None),
            Err(e) => {
                return Err(ContainerError::InvalidBundle {
                    location: source.to_string(),
                    message: e.to_string(),
                });
            }
        };
        let mut text = String::new();
        entry
            .read_to_string(&mut text)
            .map_err(|e| ContainerError::InvalidBundle {
                location: source.to_string(),
                message: format!("unreadable manifest: {}", e),
            })?;
        Ok(Some(Self::parse(&text)))
    }

    /// Manifest of a jar on disk, `None` when the jar has none
    pub fn from_jar(path: &Path) -> ContainerResult<Option<Self>> {
        let file = std::fs::File::open(path)
            .map_err(|e| ContainerError::io(e, "open_bundle", path.to_path_buf()))?;
        Self::from_archive(file, &path.display().to_string())
    }

    pub fn from_jar_bytes(bytes: &[u8], source: &str) -> ContainerResult<Option<Self>> {
        Self::from_archive(Cursor::new(bytes), source)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    pub fn headers(&self) -> &BTreeMap<String, String> {
        &self.headers
    }

    pub fn plugin_key(&self) -> Option<&str> {
        self.header(PLUGIN_KEY_HEADER).map(str::trim).filter(|k| !k.is_empty())
    }

    /// Symbolic name without directives such as `;singleton:=true`
    pub fn symbolic_name(&self) -> Option<&str> {
        self.header(SYMBOLIC_NAME_HEADER)
            .and_then(|v| v.split(';').next())
            .map(str::trim)
            .filter(|n| !n.is_empty())
    }

    pub fn version(&self) -> &str {
        self.header(VERSION_HEADER).map(str::trim).unwrap_or("0.0.0")
    }

    pub fn is_fragment(&self) -> bool {
        self.header(FRAGMENT_HOST_HEADER).is_some()
    }

    pub fn export_packages(&self) -> Vec<PackageExport> {
        self.header(EXPORT_PACKAGE_HEADER)
            .map(|v| split_clauses(v).iter().filter_map(|c| PackageExport::parse(c)).collect())
            .unwrap_or_default()
    }

    pub fn import_packages(&self) -> Vec<PackageImport> {
        let Some(value) = self.header(IMPORT_PACKAGE_HEADER) else {
            return Vec::new();
        };
        split_clauses(value)
            .iter()
            .filter_map(|clause| {
                let mut parts = clause.split(';').map(str::trim);
                let name = parts.next().filter(|n| !n.is_empty())?.to_string();
                let mut import = PackageImport {
                    name,
                    version_range: None,
                    optional: false,
                };
                for attr in parts {
                    if let Some(v) = attribute(attr, "version") {
                        import.version_range = Some(v);
                    } else if let Some(v) = attribute(attr, "resolution") {
                        import.optional = v == "optional";
                    }
                }
                Some(import)
            })
            .collect()
    }

    /// Manifest text with 72 byte line folding
    pub fn to_manifest_string(&self) -> String {
        let mut out = String::from("Manifest-Version: 1.0\n");
        for (name, value) in &self.headers {
            if name == "Manifest-Version" {
                continue;
            }
            let line = format!("{}: {}", name, value);
            let mut chars = line.chars().peekable();
            let mut first = true;
            while chars.peek().is_some() {
                let width = if first { 72 } else { 71 };
                let chunk: String = chars.by_ref().take(width).collect();
                if !first {
                    out.push(' ');
                }
                out.push_str(&chunk);
                out.push('\n');
                first = false;
            }
        }
        out
    }
}
