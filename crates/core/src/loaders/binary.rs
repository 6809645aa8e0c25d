use serde::Serialize;
use std::fs;
use std::path::Path;

use crate::error::LoadError;
use crate::extractor::{hex_preview, read_head};
use crate::scanner::full_hash;

#[derive(Debug, Clone, Serialize)]
pub struct BinaryLoad {
    pub size: u64,
    /// Hex of the leading bytes.
    pub content_preview: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
}

/// Size and a short hex preview; the blake3 digest only when `with_hash` is set.
pub fn load_binary(path: &Path, preview_bytes: usize, with_hash: bool) -> Result<BinaryLoad, LoadError> {
    let size = fs::metadata(path)?.len();
    let head = read_head(path, preview_bytes)?;
    let hash = if with_hash { Some(full_hash(path)?) } else { None };
    Ok(BinaryLoad {
        size,
        content_preview: hex_preview(&head),
        hash,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preview_is_capped_and_hash_optional() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blob.bin");
        fs::write(&path, vec![0xABu8; 300]).unwrap();

        let loaded = load_binary(&path, 100, true).unwrap();
        assert_eq!(loaded.size, 300);
        assert_eq!(loaded.content_preview.len(), 200);
        assert!(loaded.content_preview.starts_with("abab"));
        assert_eq!(loaded.hash.as_deref().map(str::len), Some(64));

        let generic = load_binary(&path, 100, false).unwrap();
        assert!(generic.hash.is_none());
    }

    #[test]
    fn empty_file_has_empty_preview() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty");
        fs::write(&path, b"").unwrap();
        let loaded = load_binary(&path, 100, false).unwrap();
        assert_eq!(loaded.size, 0);
        assert_eq!(loaded.content_preview, "");
    }
}
