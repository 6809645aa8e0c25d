//! Header-only reader for safetensors containers.
//!
//! Layout: an 8-byte little-endian header length, a JSON header mapping tensor
//! names to `{dtype, shape, data_offsets}` plus an optional `__metadata__`
//! string map, then the raw tensor bytes. Offsets are relative to the end of
//! the header. Classification only needs names, shapes and metadata, so the
//! tensor bytes are never read; full decoding goes through the `safetensors`
//! crate.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Read};
use std::path::Path;
use thiserror::Error;

/// Headers above this size are rejected before allocation.
pub const MAX_HEADER_BYTES: u64 = 100_000_000;

const METADATA_KEY: &str = "__metadata__";

#[derive(Debug, Error)]
pub enum HeaderError {
    #[error("io: {0}")]
    Io(#[from] io::Error),
    #[error("header length {0} exceeds limit")]
    TooLarge(u64),
    #[error("header json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid container: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TensorInfo {
    pub dtype: String,
    pub shape: Vec<usize>,
    pub data_offsets: (u64, u64),
}

impl TensorInfo {
    pub fn element_count(&self) -> u64 {
        self.shape.iter().map(|d| *d as u64).product()
    }
}

#[derive(Debug, Clone, Default)]
pub struct SafetensorsHeader {
    pub metadata: BTreeMap<String, String>,
    pub tensors: BTreeMap<String, TensorInfo>,
    /// Absolute file offset of the first tensor byte.
    pub data_start: u64,
}

impl SafetensorsHeader {
    /// Reads only the header; tensor data is never touched.
    pub fn read(path: &Path) -> Result<Self, HeaderError> {
        let mut file = fs::File::open(path)?;
        let file_len = file.metadata()?.len();
        let mut len_buf = [0u8; 8];
        file.read_exact(&mut len_buf)?;
        let header_len = u64::from_le_bytes(len_buf);
        if header_len > MAX_HEADER_BYTES {
            return Err(HeaderError::TooLarge(header_len));
        }
        if 8 + header_len > file_len {
            return Err(HeaderError::Invalid(format!(
                "header length {} runs past end of file ({} bytes)",
                header_len, file_len
            )));
        }
        let mut json = vec![0u8; header_len as usize];
        file.read_exact(&mut json)?;
        let header = Self::from_json(&json, 8 + header_len)?;
        header.check_bounds(file_len)?;
        Ok(header)
    }

    fn from_json(json: &[u8], data_start: u64) -> Result<Self, HeaderError> {
        let root: serde_json::Map<String, serde_json::Value> = serde_json::from_slice(json)?;
        let mut header = SafetensorsHeader {
            data_start,
            ..Default::default()
        };
        for (name, value) in root {
            if name == METADATA_KEY {
                if let serde_json::Value::Object(map) = value {
                    for (k, v) in map {
                        let v = match v {
                            serde_json::Value::String(s) => s,
                            other => other.to_string(),
                        };
                        header.metadata.insert(k, v);
                    }
                }
                continue;
            }
            let info: TensorInfo = serde_json::from_value(value)?;
            header.tensors.insert(name, info);
        }
        Ok(header)
    }

    fn check_bounds(&self, container_len: u64) -> Result<(), HeaderError> {
        let available = container_len.saturating_sub(self.data_start);
        for (name, info) in &self.tensors {
            let (begin, end) = info.data_offsets;
            if begin > end || end > available {
                return Err(HeaderError::Invalid(format!(
                    "tensor {} offsets {:?} outside data section of {} bytes",
                    name, info.data_offsets, available
                )));
            }
        }
        Ok(())
    }

    pub fn parameter_count(&self) -> u64 {
        self.tensors.values().map(TensorInfo::element_count).sum()
    }
}

pub fn is_safetensors(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("safetensors") || e.eq_ignore_ascii_case("latent"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ::safetensors::tensor::TensorView;
    use ::safetensors::Dtype;
    use std::collections::HashMap;

    fn f32_bytes(values: &[f32]) -> Vec<u8> {
        values.iter().flat_map(|v| v.to_le_bytes()).collect()
    }

    fn write(path: &Path, buf: &[u8]) {
        fs::write(path, buf).unwrap();
    }

    #[test]
    fn reads_header_written_by_safetensors() {
        let data = f32_bytes(&[1.0, 2.0, 3.0, 4.0]);
        let mut tensors = HashMap::new();
        tensors.insert(
            "w".to_string(),
            TensorView::new(Dtype::F32, vec![2, 2], &data).unwrap(),
        );
        let mut meta = HashMap::new();
        meta.insert("format".to_string(), "pt".to_string());
        let buf = ::safetensors::serialize(&tensors, &Some(meta)).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("w.safetensors");
        write(&path, &buf);

        let header = SafetensorsHeader::read(&path).unwrap();
        assert_eq!(header.metadata.get("format").map(String::as_str), Some("pt"));
        assert_eq!(header.tensors["w"].dtype, "F32");
        assert_eq!(header.tensors["w"].shape, vec![2, 2]);
        assert_eq!(header.parameter_count(), 4);
        assert_eq!(header.data_start as usize, buf.len() - data.len());
    }

    #[test]
    fn rejects_truncated_and_oversized_headers() {
        let dir = tempfile::tempdir().unwrap();

        let tiny = dir.path().join("tiny.safetensors");
        write(&tiny, &[1, 2, 3]);
        assert!(matches!(SafetensorsHeader::read(&tiny), Err(HeaderError::Io(_))));

        let huge = dir.path().join("huge.safetensors");
        let mut buf = (MAX_HEADER_BYTES + 1).to_le_bytes().to_vec();
        buf.extend_from_slice(b"{}");
        write(&huge, &buf);
        assert!(matches!(
            SafetensorsHeader::read(&huge),
            Err(HeaderError::TooLarge(_))
        ));

        let short = dir.path().join("short.safetensors");
        let mut buf = 64u64.to_le_bytes().to_vec();
        buf.extend_from_slice(b"{}");
        write(&short, &buf);
        assert!(matches!(
            SafetensorsHeader::read(&short),
            Err(HeaderError::Invalid(_))
        ));
    }

    #[test]
    fn rejects_offsets_past_data_section() {
        let json = br#"{"w":{"dtype":"F32","shape":[4],"data_offsets":[0,16]}}"#;
        let mut buf = (json.len() as u64).to_le_bytes().to_vec();
        buf.extend_from_slice(json);
        buf.extend_from_slice(&[0u8; 8]);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cut.safetensors");
        write(&path, &buf);
        assert!(matches!(
            SafetensorsHeader::read(&path),
            Err(HeaderError::Invalid(_))
        ));
    }
}
