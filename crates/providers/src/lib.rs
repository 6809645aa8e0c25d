//! Model-loading providers: ordered strategies that turn a checkpoint-like
//! file into model, clip, vae or lora handles.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

pub mod inspect;
pub mod safetensors;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("unsupported container: {0}")]
    UnsupportedContainer(String),
    #[error("not a {expected} file: {reason}")]
    Mismatch {
        expected: &'static str,
        reason: String,
    },
    #[error("header: {0}")]
    Header(#[from] safetensors::HeaderError),
    #[error("all model loaders failed: {}", summarize(.attempts))]
    Exhausted { attempts: Vec<FailedAttempt> },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailedAttempt {
    pub loader: String,
    pub error: String,
}

fn summarize(attempts: &[FailedAttempt]) -> String {
    attempts
        .iter()
        .map(|a| format!("{}: {}", a.loader, a.error))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Best-effort sub-model hint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    Checkpoint,
    Vae,
    Lora,
    Clip,
    Unet,
}

impl ModelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelKind::Checkpoint => "checkpoint",
            ModelKind::Vae => "vae",
            ModelKind::Lora => "lora",
            ModelKind::Clip => "clip",
            ModelKind::Unet => "unet",
        }
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelHandle {
    pub kind: ModelKind,
    pub path: PathBuf,
    pub format: String,
    pub tensor_count: usize,
    pub parameter_count: u64,
    pub metadata: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoadedModel {
    /// Name of the loader that produced this result.
    pub loader: String,
    pub model: Option<ModelHandle>,
    pub clip: Option<ModelHandle>,
    pub vae: Option<ModelHandle>,
    pub lora: Option<ModelHandle>,
}

pub trait ModelLoader: Send + Sync {
    fn name(&self) -> &'static str;
    fn attempt(&self, path: &Path) -> Result<LoadedModel, ProviderError>;
}

/// Ordered loader list; the first loader that succeeds wins.
#[derive(Default, Clone)]
pub struct ProviderRegistry {
    loaders: Vec<Arc<dyn ModelLoader>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Full checkpoint, then VAE only, then CLIP only, then LoRA validation.
    pub fn standard() -> Self {
        Self::new()
            .with_loader(Arc::new(inspect::CheckpointLoader))
            .with_loader(Arc::new(inspect::VaeLoader))
            .with_loader(Arc::new(inspect::ClipLoader))
            .with_loader(Arc::new(inspect::LoraLoader))
    }

    pub fn with_loader(mut self, loader: Arc<dyn ModelLoader>) -> Self {
        self.loaders.push(loader);
        self
    }

    /// Puts a loader ahead of the existing ones, e.g. a host's real checkpoint loader.
    pub fn with_preferred_loader(mut self, loader: Arc<dyn ModelLoader>) -> Self {
        self.loaders.insert(0, loader);
        self
    }

    pub fn loader_names(&self) -> Vec<&'static str> {
        self.loaders.iter().map(|l| l.name()).collect()
    }

    pub fn load(&self, path: &Path) -> Result<LoadedModel, ProviderError> {
        let mut attempts = Vec::with_capacity(self.loaders.len());
        for loader in &self.loaders {
            match loader.attempt(path) {
                Ok(mut loaded) => {
                    if loaded.loader.is_empty() {
                        loaded.loader = loader.name().to_string();
                    }
                    tracing::debug!(loader = loader.name(), path = ?path, "model loaded");
                    return Ok(loaded);
                }
                Err(e) => {
                    tracing::warn!(loader = loader.name(), path = ?path, error = %e, "model loader failed");
                    attempts.push(FailedAttempt {
                        loader: loader.name().to_string(),
                        error: e.to_string(),
                    });
                }
            }
        }
        Err(ProviderError::Exhausted { attempts })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Scripted {
        name: &'static str,
        succeed: bool,
        calls: Arc<AtomicUsize>,
    }

    impl ModelLoader for Scripted {
        fn name(&self) -> &'static str {
            self.name
        }

        fn attempt(&self, _path: &Path) -> Result<LoadedModel, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.succeed {
                Ok(LoadedModel::default())
            } else {
                Err(ProviderError::UnsupportedContainer(self.name.to_string()))
            }
        }
    }

    fn registry(outcomes: &[bool], calls: &Arc<AtomicUsize>) -> ProviderRegistry {
        let names = ["checkpoint", "vae", "clip", "lora"];
        outcomes
            .iter()
            .zip(names)
            .fold(ProviderRegistry::new(), |reg, (ok, name)| {
                reg.with_loader(Arc::new(Scripted {
                    name,
                    succeed: *ok,
                    calls: calls.clone(),
                }))
            })
    }

    #[test]
    fn first_failure_falls_through_to_next_loader() {
        let calls = Arc::new(AtomicUsize::new(0));
        let reg = registry(&[false, true, true, true], &calls);
        let loaded = reg.load(Path::new("x.safetensors")).unwrap();
        assert_eq!(loaded.loader, "vae");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn last_loader_can_still_succeed() {
        let calls = Arc::new(AtomicUsize::new(0));
        let reg = registry(&[false, false, false, true], &calls);
        let loaded = reg.load(Path::new("x.safetensors")).unwrap();
        assert_eq!(loaded.loader, "lora");
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn exhausting_every_loader_reports_each_attempt() {
        let calls = Arc::new(AtomicUsize::new(0));
        let reg = registry(&[false, false, false, false], &calls);
        let err = reg.load(Path::new("x.ckpt")).unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        match err {
            ProviderError::Exhausted { attempts } => {
                let names: Vec<_> = attempts.iter().map(|a| a.loader.as_str()).collect();
                assert_eq!(names, ["checkpoint", "vae", "clip", "lora"]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn preferred_loader_runs_first() {
        let calls = Arc::new(AtomicUsize::new(0));
        let reg = ProviderRegistry::standard().with_preferred_loader(Arc::new(Scripted {
            name: "host",
            succeed: true,
            calls: calls.clone(),
        }));
        assert_eq!(reg.loader_names()[0], "host");
        assert_eq!(reg.load(Path::new("any.ckpt")).unwrap().loader, "host");
    }
}
