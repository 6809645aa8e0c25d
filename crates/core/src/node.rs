//! The host-facing node: declared inputs and outputs, execution, change
//! detection and input validation over a single [`LoadContext`].

use providers::ModelHandle;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;
use storage::InputStore;

use crate::error::LoadError;
use crate::models::LoadMode;
use crate::pipeline::{self, LoadContext, LoadOutput, LoadedPayload};
use crate::scanner;
use crate::tensor::Tensor;

pub const NODE_NAME: &str = "LoadFile";
pub const DISPLAY_NAME: &str = "Load File (Universal)";
pub const CATEGORY: &str = "loaders";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputKind {
    FileData,
    FileInfo,
    Image,
    Mask,
    Model,
    Clip,
    Vae,
    Latent,
    Text,
}

impl OutputKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            OutputKind::FileData => "FILE_DATA",
            OutputKind::FileInfo | OutputKind::Text => "STRING",
            OutputKind::Image => "IMAGE",
            OutputKind::Mask => "MASK",
            OutputKind::Model => "MODEL",
            OutputKind::Clip => "CLIP",
            OutputKind::Vae => "VAE",
            OutputKind::Latent => "LATENT",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            OutputKind::FileData => "file_data",
            OutputKind::FileInfo => "file_info",
            OutputKind::Image => "image",
            OutputKind::Mask => "mask",
            OutputKind::Model => "model",
            OutputKind::Clip => "clip",
            OutputKind::Vae => "vae",
            OutputKind::Latent => "latent",
            OutputKind::Text => "text",
        }
    }
}

#[derive(Debug, Clone)]
pub enum OutputValue {
    FileData(LoadedPayload),
    String(String),
    Image(Tensor),
    Mask(Tensor),
    Model(Option<ModelHandle>),
    Clip(Option<ModelHandle>),
    Vae(Option<ModelHandle>),
    Latent(Option<BTreeMap<String, Tensor>>),
}

/// Declared inputs: the file selector and the mode selector.
#[derive(Debug, Clone, Serialize)]
pub struct InputSpec {
    pub files: Vec<String>,
    pub image_upload: bool,
    pub modes: Vec<&'static str>,
    pub default_mode: &'static str,
}

pub struct LoadFileNode {
    ctx: LoadContext,
    store: InputStore,
    outputs: Vec<OutputKind>,
}

impl LoadFileNode {
    pub const DEFAULT_OUTPUTS: [OutputKind; 4] = [
        OutputKind::FileData,
        OutputKind::FileInfo,
        OutputKind::Image,
        OutputKind::Mask,
    ];

    pub fn new(ctx: LoadContext) -> Self {
        let store = InputStore::new(&ctx.config().input.dir);
        Self {
            ctx,
            store,
            outputs: Self::DEFAULT_OUTPUTS.to_vec(),
        }
    }

    pub fn with_outputs(mut self, outputs: Vec<OutputKind>) -> Self {
        self.outputs = outputs;
        self
    }

    pub fn store(&self) -> &InputStore {
        &self.store
    }

    pub fn input_types(&self) -> InputSpec {
        let files = scanner::list_supported(self.store.root(), &self.ctx.config().input.exclude)
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "listing input directory failed");
                Vec::new()
            });
        InputSpec {
            files,
            image_upload: true,
            modes: LoadMode::ALL.iter().map(LoadMode::as_str).collect(),
            default_mode: LoadMode::default().as_str(),
        }
    }

    pub fn return_types(&self) -> Vec<&'static str> {
        self.outputs.iter().map(OutputKind::type_name).collect()
    }

    pub fn return_names(&self) -> Vec<&'static str> {
        self.outputs.iter().map(OutputKind::name).collect()
    }

    /// One value per declared output, in declaration order.
    pub fn execute(&self, file: &str, mode: &str) -> Vec<OutputValue> {
        let output = self.load(file, mode);
        self.outputs.iter().map(|kind| project(&output, *kind)).collect()
    }

    /// Runs the load and returns the full result, for callers that want every slot.
    pub fn load(&self, file: &str, mode: &str) -> LoadOutput {
        let parsed = mode.parse::<LoadMode>();
        let path = match self.store.resolve(file) {
            Ok(p) => p,
            Err(e) => {
                let mode = parsed.unwrap_or_default();
                return LoadOutput::failed(Path::new(file), mode, &LoadError::from(e));
            }
        };
        match parsed {
            Ok(mode) => pipeline::load_file(&self.ctx, &path, mode),
            Err(e) => LoadOutput::failed(&path, LoadMode::Auto, &e),
        }
    }

    pub fn is_changed(&self, file: &str) -> String {
        match self.store.resolve(file) {
            Ok(path) => scanner::fingerprint(&path, self.ctx.config().loader.hash_mode()),
            Err(_) => "file_not_found".to_string(),
        }
    }

    pub fn validate_inputs(&self, file: &str, mode: &str) -> Result<(), String> {
        mode.parse::<LoadMode>().map_err(|e| e.to_string())?;
        let path = self.store.resolve(file).map_err(|e| e.to_string())?;
        if !path.is_file() {
            return Err(format!("file not found: {}", storage::strip_annotation(file)));
        }
        Ok(())
    }
}

fn project(output: &LoadOutput, kind: OutputKind) -> OutputValue {
    let model = output.model.as_ref();
    match kind {
        OutputKind::FileData => OutputValue::FileData(output.payload.clone()),
        OutputKind::FileInfo => OutputValue::String(output.info_json()),
        OutputKind::Image => OutputValue::Image(output.image.clone()),
        OutputKind::Mask => OutputValue::Mask(output.mask.clone()),
        OutputKind::Model => OutputValue::Model(model.and_then(|m| m.model.clone())),
        OutputKind::Clip => OutputValue::Clip(model.and_then(|m| m.clip.clone())),
        OutputKind::Vae => OutputValue::Vae(model.and_then(|m| m.vae.clone())),
        OutputKind::Latent => OutputValue::Latent(output.latent.clone()),
        OutputKind::Text => OutputValue::String(output.text.clone().unwrap_or_default()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use std::fs;

    fn node(dir: &Path) -> LoadFileNode {
        let mut cfg = AppConfig::default();
        cfg.input.dir = dir.to_string_lossy().into_owned();
        LoadFileNode::new(LoadContext::new(cfg))
    }

    #[test]
    fn default_outputs_match_host_contract() {
        let dir = tempfile::tempdir().unwrap();
        let n = node(dir.path());
        assert_eq!(n.return_types(), ["FILE_DATA", "STRING", "IMAGE", "MASK"]);
        assert_eq!(n.return_names(), ["file_data", "file_info", "image", "mask"]);

        let n = n.with_outputs(vec![OutputKind::Vae, OutputKind::Text]);
        assert_eq!(n.return_types(), ["VAE", "STRING"]);
        assert_eq!(n.return_names(), ["vae", "text"]);
    }

    #[test]
    fn input_types_list_supported_files_and_modes() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("b.txt"), b"x").unwrap();
        fs::write(dir.path().join("sub/a.png"), b"x").unwrap();
        fs::write(dir.path().join("c.exe"), b"x").unwrap();

        let inputs = node(dir.path()).input_types();
        assert_eq!(inputs.files, ["b.txt", "sub/a.png"]);
        assert!(inputs.image_upload);
        assert_eq!(inputs.default_mode, "auto");
        assert!(inputs.modes.contains(&"latent"));
    }

    #[test]
    fn execute_resolves_annotated_names() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("hello.txt"), "hi there").unwrap();
        let n = node(dir.path()).with_outputs(vec![OutputKind::FileData, OutputKind::Text, OutputKind::Image]);

        let values = n.execute("hello.txt [input]", "auto");
        assert_eq!(values.len(), 3);
        assert!(matches!(&values[0], OutputValue::FileData(LoadedPayload::Text(_))));
        assert!(matches!(&values[1], OutputValue::String(s) if s == "hi there"));
        assert!(matches!(&values[2], OutputValue::Image(t) if t.shape() == [1, 64, 64, 3]));
    }

    #[test]
    fn traversal_and_bad_modes_become_error_payloads() {
        let dir = tempfile::tempdir().unwrap();
        let n = node(dir.path());
        assert!(n.load("../etc/passwd", "auto").is_error());

        fs::write(dir.path().join("ok.txt"), "x").unwrap();
        let out = n.load("ok.txt", "audio");
        assert!(out.is_error());
        assert_eq!(out.image.shape(), &[1, 64, 64, 3]);
    }

    #[test]
    fn validation_and_fingerprints() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("ok.txt"), "x").unwrap();
        let n = node(dir.path());

        assert!(n.validate_inputs("ok.txt", "text").is_ok());
        assert!(n.validate_inputs("missing.txt", "auto").unwrap_err().contains("not found"));
        assert!(n.validate_inputs("ok.txt", "audio").is_err());
        assert!(n.validate_inputs("/abs/ok.txt", "auto").is_err());

        assert_eq!(n.is_changed("missing.txt"), "file_not_found");
        assert_eq!(n.is_changed("ok.txt"), n.is_changed("ok.txt"));
        assert!(n.is_changed("ok.txt").ends_with("_1"));
    }
}
