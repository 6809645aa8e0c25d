use encoding_rs::{Encoding, BIG5, EUC_KR, GBK, SHIFT_JIS, UTF_8};
use serde::Serialize;
use std::fs;
use std::path::Path;

use crate::error::LoadError;

#[derive(Debug, Clone, Serialize)]
pub struct TextLoad {
    pub content: String,
    pub encoding: &'static str,
    /// Characters, not bytes.
    pub length: usize,
    pub lines: usize,
}

pub fn default_encodings() -> Vec<&'static Encoding> {
    vec![UTF_8, GBK, BIG5, SHIFT_JIS, EUC_KR]
}

/// Resolves WHATWG labels, skipping (and logging) the ones encoding_rs does not know.
pub fn encodings_from_labels(labels: &[String]) -> Vec<&'static Encoding> {
    let resolved: Vec<_> = labels
        .iter()
        .filter_map(|label| {
            let enc = Encoding::for_label(label.trim().as_bytes());
            if enc.is_none() {
                tracing::warn!(label = %label, "unknown text encoding label, skipping");
            }
            enc
        })
        .collect();
    if resolved.is_empty() {
        default_encodings()
    } else {
        resolved
    }
}

/// Name of the first encoding that decodes `bytes` without errors.
pub fn detect_encoding(bytes: &[u8], encodings: &[&'static Encoding]) -> Option<&'static str> {
    decode(bytes, encodings).ok().map(|(_, enc)| enc)
}

/// A byte-order mark wins; otherwise the candidates are tried strictly, in order.
pub fn decode(bytes: &[u8], encodings: &[&'static Encoding]) -> Result<(String, &'static str), LoadError> {
    if let Some((enc, bom_len)) = Encoding::for_bom(bytes) {
        if let Some(text) = enc.decode_without_bom_handling_and_without_replacement(&bytes[bom_len..]) {
            return Ok((text.into_owned(), enc.name()));
        }
    }
    for enc in encodings {
        if let Some(text) = enc.decode_without_bom_handling_and_without_replacement(bytes) {
            return Ok((text.into_owned(), enc.name()));
        }
    }
    let tried = encodings
        .iter()
        .map(|e| e.name())
        .collect::<Vec<_>>()
        .join(", ");
    Err(LoadError::UnsupportedEncoding(tried))
}

pub fn load_text(path: &Path, encodings: &[&'static Encoding]) -> Result<TextLoad, LoadError> {
    let bytes = fs::read(path)?;
    let (content, encoding) = decode(&bytes, encodings)?;
    tracing::debug!(path = ?path, encoding, "text decoded");
    Ok(TextLoad {
        length: content.chars().count(),
        lines: content.lines().count(),
        content,
        encoding,
    })
}
