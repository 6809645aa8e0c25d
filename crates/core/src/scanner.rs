//! Walks the input directory for loadable files and computes change fingerprints.

use anyhow::Context;
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::fs;
use std::io::{self, Read};
use std::path::Path;
use walkdir::WalkDir;

use crate::classifier;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum HashMode {
    /// mtime + size only
    #[default]
    None,
    Fast, // first 64 KiB
    Full, // whole-file blake3
}

impl From<&str> for HashMode {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "fast" => HashMode::Fast,
            "full" => HashMode::Full,
            _ => HashMode::None,
        }
    }
}

/// Relative paths (forward slashes) of supported files under `root`, sorted.
pub fn list_supported(root: &Path, excludes: &[String]) -> anyhow::Result<Vec<String>> {
    let exclude_set = build_globset(excludes)?;
    let mut files = Vec::new();
    if !root.exists() {
        return Ok(files);
    }
    for entry in WalkDir::new(root)
        .follow_links(true)
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_hidden(e.path()))
    {
        let entry = match entry {
            Ok(e) => e,
            Err(_) => continue,
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = match entry.path().strip_prefix(root) {
            Ok(r) => r,
            Err(_) => continue,
        };
        if exclude_set.is_match(rel) || !classifier::is_supported_extension(rel) {
            continue;
        }
        files.push(rel.to_string_lossy().replace('\\', "/"));
    }
    files.sort();
    Ok(files)
}

/// Change token for a file; differs whenever the host should re-execute.
pub fn fingerprint(path: &Path, mode: HashMode) -> String {
    let meta = match fs::metadata(path) {
        Ok(m) if m.is_file() => m,
        Ok(_) | Err(_) => return "file_not_found".to_string(),
    };
    let result = match mode {
        HashMode::None => {
            let mtime = meta
                .modified()
                .ok()
                .map(chrono::DateTime::<chrono::Utc>::from)
                .map(|dt| dt.timestamp_micros() as f64 / 1_000_000.0)
                .unwrap_or_default();
            Ok(format!("{}_{}", mtime, meta.len()))
        }
        HashMode::Fast => fast_hash(path),
        HashMode::Full => full_hash(path),
    };
    result.unwrap_or_else(|e| {
        tracing::warn!(path = ?path, error = %e, "fingerprint failed");
        "error".to_string()
    })
}

fn build_globset(patterns: &[String]) -> anyhow::Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pat in patterns {
        let glob = Glob::new(pat).with_context(|| format!("bad exclude pattern {:?}", pat))?;
        builder.add(glob);
    }
    Ok(builder.build()?)
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|s| s.starts_with('.'))
        .unwrap_or(false)
}

pub fn fast_hash(path: &Path) -> io::Result<String> {
    const BYTES: u64 = 64 * 1024;
    let file = fs::File::open(path)?;
    let mut buf = Vec::with_capacity(BYTES as usize);
    file.take(BYTES).read_to_end(&mut buf)?;
    let mut hasher = blake3::Hasher::new();
    hasher.update(&buf);
    Ok(hasher.finalize().to_hex().to_string())
}

pub fn full_hash(path: &Path) -> io::Result<String> {
    let mut file = fs::File::open(path)?;
    let mut hasher = blake3::Hasher::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize().to_hex().to_string())
}
