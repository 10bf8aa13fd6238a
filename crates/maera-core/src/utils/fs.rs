use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use log::debug;
use sha2::{Digest, Sha256};

/// Marker written next to extracted zip contents, holding the source hash
const EXTRACTION_MARKER: &str = ".maera-extracted";

/// Find files recursively in a directory that match a predicate
pub fn find_files<P, F>(path: P, predicate: &F) -> io::Result<Vec<PathBuf>>
where
    P: AsRef<Path>,
    F: Fn(&Path) -> bool + ?Sized,
{
    let path = path.as_ref();
    let mut result = Vec::new();

    if !path.exists() {
        return Ok(result);
    }
    if path.is_file() {
        if predicate(path) {
            result.push(path.to_path_buf());
        }
        return Ok(result);
    }

    for entry in fs::read_dir(path)? {
        let entry_path = entry?.path();
        if entry_path.is_file() {
            if predicate(&entry_path) {
                result.push(entry_path);
            }
        } else if entry_path.is_dir() {
            result.append(&mut find_files(&entry_path, predicate)?);
        }
    }
    result.sort();
    Ok(result)
}

/// Find files with a specific extension (case-insensitive)
pub fn find_files_with_extension<P: AsRef<Path>>(path: P, extension: &str) -> io::Result<Vec<PathBuf>> {
    find_files(path, &|p: &Path| has_extension(p, extension))
}

pub fn has_extension(path: &Path, extension: &str) -> bool {
    path.extension()
        .map(|ext| ext.to_string_lossy().eq_ignore_ascii_case(extension))
        .unwrap_or(false)
}

/// Dot-prefixed names are skipped by directory scans
pub fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .map(|name| name.to_string_lossy().starts_with('.'))
        .unwrap_or(false)
}

/// Hex encoded SHA-256 of `data`
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Hex encoded SHA-256 of a file's contents
pub fn sha256_file<P: AsRef<Path>>(path: P) -> io::Result<String> {
    let mut file = fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 8192];
    loop {
        let read = file.read(&mut buf)?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Extracts the top-level file entries of a zip archive into `dest`.
///
/// Directory entries and nested paths are flattened to their file name.
pub fn extract_zip(zip_path: &Path, dest: &Path) -> io::Result<Vec<PathBuf>> {
    let file = fs::File::open(zip_path)?;
    let mut archive = zip::ZipArchive::new(file).map_err(io::Error::other)?;
    fs::create_dir_all(dest)?;

    let mut extracted = Vec::new();
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i).map_err(io::Error::other)?;
        if entry.is_dir() {
            continue;
        }
        let Some(file_name) = entry
            .enclosed_name()
            .and_then(|p| p.file_name().map(PathBuf::from))
        else {
            continue;
        };
        let target = dest.join(file_name);
        let mut out = fs::File::create(&target)?;
        io::copy(&mut entry, &mut out)?;
        extracted.push(target);
    }
    extracted.sort();
    Ok(extracted)
}

/// Extracts `zip_path` into `dest` unless `dest` already holds an
/// extraction of an identical zip. Returns true when extraction happened.
pub fn extract_zip_if_changed(zip_path: &Path, dest: &Path) -> io::Result<bool> {
    let hash = sha256_file(zip_path)?;
    let marker = dest.join(EXTRACTION_MARKER);
    if fs::read_to_string(&marker).map(|h| h.trim() == hash).unwrap_or(false) {
        debug!("{} unchanged, reusing {}", zip_path.display(), dest.display());
        return Ok(false);
    }

    if dest.exists() {
        clear_directory(dest)?;
    }
    extract_zip(zip_path, dest)?;
    fs::write(&marker, &hash)?;
    debug!("Extracted {} into {}", zip_path.display(), dest.display());
    Ok(true)
}

/// Removes every entry of `dir`, keeping the directory itself
pub fn clear_directory(dir: &Path) -> io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            fs::remove_dir_all(&path)?;
        } else {
            fs::remove_file(&path)?;
        }
    }
    Ok(())
}
