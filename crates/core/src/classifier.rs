//! File-type detection. Never fails: every heuristic that errors falls through
//! to the next one and the last step always yields a kind.

use std::fs;
use std::path::Path;

use providers::inspect;
use providers::safetensors::SafetensorsHeader;

use crate::config::ClassifierConfig;
use crate::extractor::{extension_of, read_head};
use crate::loaders::text;
use crate::models::{FileKind, ModelKind};

pub const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "bmp", "tiff", "tif", "webp"];
pub const VIDEO_EXTENSIONS: &[&str] = &["mp4", "avi", "mov", "mkv", "webm", "flv"];
pub const MODEL_EXTENSIONS: &[&str] = &["pt", "pth", "safetensors", "ckpt", "bin"];
pub const LATENT_EXTENSIONS: &[&str] = &["latent"];
pub const TEXT_EXTENSIONS: &[&str] = &["txt", "json", "yaml", "yml", "xml", "csv", "md"];

const MB: u64 = 1_000_000;
const TEXT_SNIFF_BYTES: usize = 8 * 1024;

pub fn is_supported_extension(path: &Path) -> bool {
    extension_of(path)
        .map(|ext| {
            [
                IMAGE_EXTENSIONS,
                VIDEO_EXTENSIONS,
                MODEL_EXTENSIONS,
                LATENT_EXTENSIONS,
                TEXT_EXTENSIONS,
            ]
            .iter()
            .any(|set| set.contains(&ext.as_str()))
        })
        .unwrap_or(false)
}

pub fn classify(path: &Path, cfg: &ClassifierConfig) -> FileKind {
    let size = match fs::metadata(path) {
        Ok(m) => m.len(),
        Err(e) => {
            tracing::debug!(path = ?path, error = %e, "cannot stat, classifying as generic");
            return FileKind::Generic;
        }
    };
    let ext = extension_of(path).unwrap_or_default();
    let ext = ext.as_str();

    let kind = if IMAGE_EXTENSIONS.contains(&ext) {
        FileKind::Image
    } else if VIDEO_EXTENSIONS.contains(&ext) {
        FileKind::Video
    } else if MODEL_EXTENSIONS.contains(&ext) {
        FileKind::Model {
            subkind: model_subkind(path, size, cfg),
        }
    } else if LATENT_EXTENSIONS.contains(&ext) {
        FileKind::Latent
    } else if TEXT_EXTENSIONS.contains(&ext) {
        FileKind::Text { encoding: None }
    } else {
        sniff_unknown(path, size, cfg)
    };
    tracing::debug!(path = ?path, kind = %kind, "classified");
    kind
}

/// Metadata markers, then filename keywords, then size.
fn model_subkind(path: &Path, size: u64, cfg: &ClassifierConfig) -> Option<ModelKind> {
    if extension_of(path).as_deref() == Some("safetensors") {
        match SafetensorsHeader::read(path) {
            Ok(header) => {
                if let Some(kind) = inspect::kind_from_header(&header) {
                    return Some(kind);
                }
            }
            Err(e) => tracing::debug!(path = ?path, error = %e, "header sniff failed"),
        }
    }
    kind_from_filename(path).or_else(|| kind_from_size(size, cfg))
}

pub fn kind_from_filename(path: &Path) -> Option<ModelKind> {
    let name = path.file_name()?.to_string_lossy().to_lowercase();
    let has = |words: &[&str]| words.iter().any(|w| name.contains(w));
    if has(&["vae", "autoencoder"]) {
        Some(ModelKind::Vae)
    } else if has(&["lora", "lycoris"]) {
        Some(ModelKind::Lora)
    } else if has(&["clip", "text_encoder"]) {
        Some(ModelKind::Clip)
    } else if has(&["unet", "diffusion"]) {
        Some(ModelKind::Unet)
    } else {
        None
    }
}

pub fn kind_from_size(size: u64, cfg: &ClassifierConfig) -> Option<ModelKind> {
    let mb = |n: u64| n.saturating_mul(MB);
    if size > mb(cfg.checkpoint_min_mb) {
        Some(ModelKind::Checkpoint)
    } else if size >= mb(cfg.vae_min_mb) && size <= mb(cfg.vae_max_mb) {
        Some(ModelKind::Vae)
    } else if size < mb(cfg.lora_max_mb) {
        Some(ModelKind::Lora)
    } else {
        None
    }
}

fn sniff_unknown(path: &Path, size: u64, cfg: &ClassifierConfig) -> FileKind {
    if sniff_image(path) {
        return FileKind::Image;
    }
    if size > cfg.unknown_model_min_mb.saturating_mul(MB) {
        return FileKind::Model {
            subkind: kind_from_filename(path),
        };
    }
    let head = match read_head(path, TEXT_SNIFF_BYTES) {
        Ok(h) => h,
        Err(_) => return FileKind::Binary,
    };
    // The sniff window may cut a multi-byte sequence; drop up to 3 trailing bytes.
    let truncated = size as usize > head.len();
    let candidates: &[usize] = if truncated { &[0, 1, 2, 3] } else { &[0] };
    for &cut in candidates {
        let window = &head[..head.len().saturating_sub(cut)];
        if window.contains(&0) {
            break;
        }
        if let Some(enc) = text::detect_encoding(window, &text::default_encodings()) {
            return FileKind::Text {
                encoding: Some(enc),
            };
        }
    }
    FileKind::Binary
}

fn sniff_image(path: &Path) -> bool {
    let reader = match image::ImageReader::open(path).and_then(|r| r.with_guessed_format()) {
        Ok(r) => r,
        Err(_) => return false,
    };
    if reader.format().is_none() {
        return false;
    }
    reader.decode().is_ok()
}
