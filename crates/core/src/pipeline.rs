//! Dispatch: resolve the load mode, run the matching loader, and shape the
//! result into a [`LoadOutput`]. Loader failures never escape; they become an
//! error payload with placeholder tensors.

use encoding_rs::Encoding;
use providers::{LoadedModel, ProviderRegistry};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::config::AppConfig;
use crate::error::LoadError;
use crate::loaders::binary::{self, BinaryLoad};
use crate::loaders::image::{self as image_loader, ImageInfo};
use crate::loaders::latent;
use crate::loaders::text::{self, TextLoad};
use crate::loaders::video::{self, VideoInfo};
use crate::models::{FileDescriptor, FileKind, LoadMode};
use crate::tensor::Tensor;
use crate::{classifier, extractor};

/// Everything a load needs besides the path: settings and the model strategy chain.
#[derive(Clone)]
pub struct LoadContext {
    config: AppConfig,
    registry: ProviderRegistry,
    encodings: Vec<&'static Encoding>,
}

impl LoadContext {
    pub fn new(config: AppConfig) -> Self {
        let encodings = text::encodings_from_labels(&config.loader.text_encodings);
        Self {
            config,
            registry: ProviderRegistry::standard(),
            encodings,
        }
    }

    pub fn with_registry(mut self, registry: ProviderRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }
}

/// Structured description of what was loaded; serialized as the `FILE_DATA` output.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LoadedPayload {
    Image(ImageInfo),
    Video(VideoInfo),
    Model(LoadedModel),
    Latent {
        shapes: BTreeMap<String, Vec<usize>>,
        multiplier: f32,
    },
    Text(TextLoad),
    Binary(BinaryLoad),
    Generic(BinaryLoad),
    Error {
        error: String,
        file_path: PathBuf,
        mode: LoadMode,
    },
}

impl LoadedPayload {
    pub fn type_name(&self) -> &'static str {
        match self {
            LoadedPayload::Image(_) => "image",
            LoadedPayload::Video(_) => "video",
            LoadedPayload::Model(_) => "model",
            LoadedPayload::Latent { .. } => "latent",
            LoadedPayload::Text(_) => "text",
            LoadedPayload::Binary(_) => "binary",
            LoadedPayload::Generic(_) => "generic",
            LoadedPayload::Error { .. } => "error",
        }
    }
}

#[derive(Debug, Clone)]
pub struct LoadOutput {
    /// The mode that actually ran (never `Auto`).
    pub mode: LoadMode,
    /// Set when the mode was chosen by classification.
    pub kind: Option<FileKind>,
    pub payload: LoadedPayload,
    pub info: Option<FileDescriptor>,
    pub image: Tensor,
    pub mask: Tensor,
    pub model: Option<LoadedModel>,
    pub latent: Option<BTreeMap<String, Tensor>>,
    pub text: Option<String>,
}

impl LoadOutput {
    pub fn failed(path: &Path, mode: LoadMode, err: &LoadError) -> Self {
        Self {
            mode,
            kind: None,
            payload: LoadedPayload::Error {
                error: err.to_string(),
                file_path: path.to_path_buf(),
                mode,
            },
            info: None,
            image: Tensor::placeholder_image(),
            mask: Tensor::placeholder_mask(),
            model: None,
            latent: None,
            text: None,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self.payload, LoadedPayload::Error { .. })
    }

    /// Pretty JSON of the file descriptor, or `{"error": ...}` when there is none.
    pub fn info_json(&self) -> String {
        let value = match (&self.info, &self.payload) {
            (Some(info), _) => serde_json::to_value(info),
            (None, LoadedPayload::Error { error, .. }) => Ok(serde_json::json!({ "error": error })),
            (None, _) => Ok(serde_json::json!({ "error": "file not found" })),
        };
        value
            .and_then(|v| serde_json::to_string_pretty(&v))
            .unwrap_or_else(|e| format!("{{\"error\": \"{}\"}}", e))
    }

    pub fn payload_json(&self) -> String {
        serde_json::to_string_pretty(&self.payload).unwrap_or_else(|e| format!("{{\"error\": \"{}\"}}", e))
    }
}

/// Loader result before placeholders are filled in.
struct Loaded {
    payload: LoadedPayload,
    image: Option<Tensor>,
    mask: Option<Tensor>,
    model: Option<LoadedModel>,
    latent: Option<BTreeMap<String, Tensor>>,
    text: Option<String>,
}

impl Loaded {
    fn payload(payload: LoadedPayload) -> Self {
        Self {
            payload,
            image: None,
            mask: None,
            model: None,
            latent: None,
            text: None,
        }
    }
}

pub fn load_file(ctx: &LoadContext, path: &Path, mode: LoadMode) -> LoadOutput {
    let info = match extractor::describe(path) {
        Ok(info) => info,
        Err(e) => {
            warn!(path = ?path, error = %e, "file not readable");
            let err = LoadError::from(e);
            return LoadOutput::failed(path, mode, &err);
        }
    };

    let (resolved, kind) = match mode {
        LoadMode::Auto => {
            let kind = classifier::classify(path, &ctx.config.classifier);
            (kind.load_mode(), Some(kind))
        }
        explicit => (explicit, None),
    };
    info!(path = ?path, mode = %resolved, "loading file");

    let mut out = match run_loader(ctx, path, resolved, kind) {
        Ok(loaded) => LoadOutput {
            mode: resolved,
            kind,
            payload: loaded.payload,
            info: None,
            image: loaded.image.unwrap_or_else(Tensor::placeholder_image),
            mask: loaded.mask.unwrap_or_else(Tensor::placeholder_mask),
            model: loaded.model,
            latent: loaded.latent,
            text: loaded.text,
        },
        Err(e) => {
            warn!(path = ?path, mode = %resolved, error = %e, "load failed");
            let mut failed = LoadOutput::failed(path, resolved, &e);
            failed.kind = kind;
            failed
        }
    };
    out.info = Some(info);
    out
}

fn run_loader(
    ctx: &LoadContext,
    path: &Path,
    mode: LoadMode,
    kind: Option<FileKind>,
) -> Result<Loaded, LoadError> {
    let cfg = &ctx.config.loader;
    let loaded = match mode {
        LoadMode::Image => {
            let img = image_loader::load_image(path, cfg.batch_frames)?;
            Loaded {
                image: Some(img.image),
                mask: Some(img.mask),
                ..Loaded::payload(LoadedPayload::Image(img.info))
            }
        }
        LoadMode::Video => {
            let vid = video::load_video(path, &cfg.ffmpeg_path, cfg.video_frame_cap)?;
            Loaded {
                image: Some(vid.frames),
                ..Loaded::payload(LoadedPayload::Video(vid.info))
            }
        }
        LoadMode::Model => {
            let model = ctx.registry.load(path)?;
            debug!(loader = %model.loader, "model strategy succeeded");
            Loaded {
                model: Some(model.clone()),
                ..Loaded::payload(LoadedPayload::Model(model))
            }
        }
        LoadMode::Latent => {
            let lat = latent::load_latent(path)?;
            let shapes = lat
                .tensors
                .iter()
                .map(|(name, t)| (name.clone(), t.shape().to_vec()))
                .collect();
            Loaded {
                latent: Some(lat.tensors),
                ..Loaded::payload(LoadedPayload::Latent {
                    shapes,
                    multiplier: lat.multiplier,
                })
            }
        }
        LoadMode::Text => {
            let encodings = text_candidates(&ctx.encodings, kind);
            let loaded = text::load_text(path, &encodings)?;
            Loaded {
                text: Some(loaded.content.clone()),
                ..Loaded::payload(LoadedPayload::Text(loaded))
            }
        }
        LoadMode::Binary => {
            Loaded::payload(LoadedPayload::Binary(binary::load_binary(path, cfg.preview_bytes, true)?))
        }
        LoadMode::Generic | LoadMode::Auto => {
            Loaded::payload(LoadedPayload::Generic(binary::load_binary(path, cfg.preview_bytes, false)?))
        }
    };
    Ok(loaded)
}

/// The encoding found while classifying goes first.
fn text_candidates(configured: &[&'static Encoding], kind: Option<FileKind>) -> Vec<&'static Encoding> {
    let sniffed = match kind {
        Some(FileKind::Text {
            encoding: Some(name),
        }) => Encoding::for_label(name.as_bytes()),
        _ => None,
    };
    let mut out: Vec<_> = sniffed.into_iter().collect();
    out.extend(configured.iter().copied().filter(|e| Some(*e) != sniffed));
    out
}
