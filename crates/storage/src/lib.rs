//! Storage layer: the input directory that uploads land in and loaders read from.
//!
//! Holds collision-free saving, listing and name resolution.

use serde::Serialize;
use std::fs;
use std::io::{self, Write};
use std::path::{Component, Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("invalid file name: {0:?}")]
    InvalidName(String),
    #[error("path escapes the input directory: {0}")]
    OutsideRoot(String),
    #[error("io: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Clone, Serialize)]
pub struct StoredFile {
    pub filename: String,
    pub path: PathBuf,
    pub size: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ListedFile {
    pub name: String,
    pub size: u64,
    /// Unix seconds with sub-second precision.
    pub modified: f64,
}

#[derive(Debug, Clone)]
pub struct InputStore {
    root: PathBuf,
}

impl InputStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Writes `data` under `name`, or under `stem_N.ext` for the first free N.
    /// Each candidate is claimed with an exclusive create, so concurrent saves
    /// of the same name never overwrite one another.
    pub fn save_unique(&self, name: &str, data: &[u8]) -> Result<StoredFile, StorageError> {
        let name = sanitize_name(name)?;
        fs::create_dir_all(&self.root)?;
        let mut counter = 0u32;
        loop {
            let candidate = if counter == 0 {
                name.clone()
            } else {
                suffixed_name(&name, counter)
            };
            let path = self.root.join(&candidate);
            match fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
            {
                Ok(mut file) => {
                    fill_or_discard(&path, || {
                        file.write_all(data)?;
                        file.sync_all()
                    })?;
                    tracing::info!(filename = %candidate, size = data.len(), "stored upload");
                    return Ok(StoredFile {
                        filename: candidate,
                        path,
                        size: data.len() as u64,
                    });
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    counter += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Regular files directly under the root, sorted by name.
    pub fn list(&self) -> Result<Vec<ListedFile>, StorageError> {
        let mut files = Vec::new();
        if !self.root.exists() {
            return Ok(files);
        }
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            let meta = match entry.metadata() {
                Ok(m) if m.is_file() => m,
                _ => continue,
            };
            let modified = meta
                .modified()
                .ok()
                .map(|t| chrono::DateTime::<chrono::Utc>::from(t))
                .map(|dt| dt.timestamp_micros() as f64 / 1_000_000.0)
                .unwrap_or_default();
            files.push(ListedFile {
                name: entry.file_name().to_string_lossy().into_owned(),
                size: meta.len(),
                modified,
            });
        }
        files.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(files)
    }

    /// Resolves a relative name, optionally annotated as `name [input]`,
    /// against the root. Absolute paths and `..` components are rejected.
    pub fn resolve(&self, name: &str) -> Result<PathBuf, StorageError> {
        let name = strip_annotation(name);
        if name.is_empty() {
            return Err(StorageError::InvalidName(name.to_string()));
        }
        let rel = Path::new(name);
        for component in rel.components() {
            match component {
                Component::Normal(_) | Component::CurDir => {}
                _ => return Err(StorageError::OutsideRoot(name.to_string())),
            }
        }
        Ok(self.root.join(rel))
    }

    pub fn exists(&self, name: &str) -> bool {
        self.resolve(name).map(|p| p.is_file()).unwrap_or(false)
    }
}

/// Runs the write into a freshly claimed file. On failure the partial file is
/// removed so it neither lists as valid nor holds the name.
fn fill_or_discard(path: &Path, write: impl FnOnce() -> io::Result<()>) -> Result<(), StorageError> {
    write().map_err(|e| {
        if let Err(rm) = fs::remove_file(path) {
            tracing::warn!(path = ?path, error = %rm, "could not remove partial upload");
        }
        StorageError::Io(e)
    })
}

/// Folder tags the host appends to file names.
pub const ANNOTATIONS: [&str; 3] = ["[input]", "[output]", "[temp]"];

/// Drops a trailing ` [input]`, ` [output]` or ` [temp]` tag. Any other
/// bracketed suffix is part of the file name.
pub fn strip_annotation(name: &str) -> &str {
    let trimmed = name.trim();
    ANNOTATIONS
        .iter()
        .find_map(|tag| trimmed.strip_suffix(tag))
        .filter(|rest| rest.ends_with(' '))
        .map(str::trim_end)
        .unwrap_or(trimmed)
}

/// Keeps only the final path component of a client-supplied name.
fn sanitize_name(name: &str) -> Result<String, StorageError> {
    let base = name
        .rsplit(|c| c == '/' || c == '\\')
        .next()
        .unwrap_or("")
        .trim();
    if base.is_empty() || base == "." || base == ".." {
        return Err(StorageError::InvalidName(name.to_string()));
    }
    Ok(base.to_string())
}

fn suffixed_name(name: &str, counter: u32) -> String {
    let path = Path::new(name);
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("file")
        .to_string();
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_string();
    if ext.is_empty() {
        format!("{}_{}", stem, counter)
    } else {
        format!("{}_{}.{}", stem, counter, ext)
    }
}
