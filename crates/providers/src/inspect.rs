//! Built-in loaders that inspect safetensors headers instead of materializing
//! weights. Tensor-name prefixes follow the common Stable Diffusion layouts.

use crate::safetensors::{is_safetensors, SafetensorsHeader};
use crate::{LoadedModel, ModelHandle, ModelKind, ModelLoader, ProviderError};
use std::collections::BTreeMap;
use std::path::Path;

const DIFFUSION_PREFIXES: &[&str] = &["model.diffusion_model."];
const BARE_UNET_PREFIXES: &[&str] = &[
    "input_blocks.",
    "middle_block.",
    "output_blocks.",
    "double_blocks.",
    "single_blocks.",
    "joint_blocks.",
];
const VAE_PREFIXES: &[&str] = &["first_stage_model.", "vae."];
const BARE_VAE_PREFIXES: &[&str] = &["encoder.", "decoder.", "quant_conv.", "post_quant_conv."];
const CLIP_PREFIXES: &[&str] = &["cond_stage_model.", "conditioner.embedders.", "text_encoders."];
const BARE_CLIP_PREFIXES: &[&str] = &[
    "text_model.",
    "transformer.text_model.",
    "text_projection",
    "logit_scale",
];
const LORA_MARKERS: &[&str] = &["lora_up", "lora_down", "lora_A", "lora_B", "lora_unet_", "lora_te"];

fn has_prefix(name: &str, prefixes: &[&str]) -> bool {
    prefixes.iter().any(|p| name.starts_with(p))
}

fn is_lora_tensor(name: &str) -> bool {
    LORA_MARKERS.iter().any(|m| name.contains(m))
}

/// Sub-model hint from embedded metadata keys and values.
pub fn kind_from_metadata(metadata: &BTreeMap<String, String>) -> Option<ModelKind> {
    if let Some(arch) = metadata.get("modelspec.architecture") {
        let arch = arch.to_lowercase();
        if arch.contains("lora") {
            return Some(ModelKind::Lora);
        }
        if arch.contains("vae") || arch.contains("autoencoder") {
            return Some(ModelKind::Vae);
        }
        if arch.contains("clip") || arch.contains("text-encoder") {
            return Some(ModelKind::Clip);
        }
    }
    if metadata.keys().any(|k| k.starts_with("ss_") || k.starts_with("lora")) {
        return Some(ModelKind::Lora);
    }
    if metadata.keys().any(|k| {
        let k = k.to_lowercase();
        k.contains("autoencoder") || k.contains("vae")
    }) {
        return Some(ModelKind::Vae);
    }
    if metadata.contains_key("config") || metadata.contains_key("model_config") {
        return Some(ModelKind::Checkpoint);
    }
    None
}

#[derive(Debug, Default, Clone, Copy)]
struct Layout {
    diffusion: usize,
    bare_unet: usize,
    vae: usize,
    bare_vae: usize,
    clip: usize,
    bare_clip: usize,
    lora: usize,
}

impl Layout {
    fn of<'a>(names: impl IntoIterator<Item = &'a str>) -> Self {
        let mut layout = Layout::default();
        for name in names {
            if is_lora_tensor(name) {
                layout.lora += 1;
            } else if has_prefix(name, DIFFUSION_PREFIXES) {
                layout.diffusion += 1;
            } else if has_prefix(name, VAE_PREFIXES) {
                layout.vae += 1;
            } else if has_prefix(name, CLIP_PREFIXES) {
                layout.clip += 1;
            } else if has_prefix(name, BARE_VAE_PREFIXES) {
                layout.bare_vae += 1;
            } else if has_prefix(name, BARE_CLIP_PREFIXES) {
                layout.bare_clip += 1;
            } else if has_prefix(name, BARE_UNET_PREFIXES) {
                layout.bare_unet += 1;
            }
        }
        layout
    }

    fn kind(&self) -> Option<ModelKind> {
        if self.lora > 0 {
            Some(ModelKind::Lora)
        } else if self.diffusion > 0 && (self.vae > 0 || self.clip > 0) {
            Some(ModelKind::Checkpoint)
        } else if self.diffusion > 0 || self.bare_unet > 0 {
            Some(ModelKind::Unet)
        } else if self.vae > 0 || self.bare_vae > 0 {
            Some(ModelKind::Vae)
        } else if self.clip > 0 || self.bare_clip > 0 {
            Some(ModelKind::Clip)
        } else {
            None
        }
    }
}

/// Sub-model hint from tensor names alone.
pub fn kind_from_tensor_names<'a>(names: impl IntoIterator<Item = &'a str>) -> Option<ModelKind> {
    Layout::of(names).kind()
}

/// Metadata first, then tensor layout.
pub fn kind_from_header(header: &SafetensorsHeader) -> Option<ModelKind> {
    kind_from_metadata(&header.metadata)
        .or_else(|| kind_from_tensor_names(header.tensors.keys().map(String::as_str)))
}

fn open_header(path: &Path) -> Result<SafetensorsHeader, ProviderError> {
    if !is_safetensors(path) {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("<none>")
            .to_string();
        return Err(ProviderError::UnsupportedContainer(ext));
    }
    Ok(SafetensorsHeader::read(path)?)
}

fn handle(
    kind: ModelKind,
    path: &Path,
    header: &SafetensorsHeader,
    keep: impl Fn(&str) -> bool,
) -> ModelHandle {
    let (tensor_count, parameter_count) = header
        .tensors
        .iter()
        .filter(|(name, _)| keep(name.as_str()))
        .fold((0usize, 0u64), |(n, p), (_, info)| (n + 1, p + info.element_count()));
    ModelHandle {
        kind,
        path: path.to_path_buf(),
        format: "safetensors".to_string(),
        tensor_count,
        parameter_count,
        metadata: header.metadata.clone(),
    }
}

fn expect_kind(
    header: &SafetensorsHeader,
    expected: &[ModelKind],
    label: &'static str,
) -> Result<ModelKind, ProviderError> {
    match kind_from_header(header) {
        Some(kind) if expected.contains(&kind) => Ok(kind),
        Some(kind) => Err(ProviderError::Mismatch {
            expected: label,
            reason: format!("layout looks like {}", kind),
        }),
        None => Err(ProviderError::Mismatch {
            expected: label,
            reason: format!("no known tensor layout in {} tensors", header.tensors.len()),
        }),
    }
}

/// Full checkpoint: diffusion weights plus whatever clip/vae it bundles.
pub struct CheckpointLoader;

impl ModelLoader for CheckpointLoader {
    fn name(&self) -> &'static str {
        "checkpoint"
    }

    fn attempt(&self, path: &Path) -> Result<LoadedModel, ProviderError> {
        let header = open_header(path)?;
        let layout = Layout::of(header.tensors.keys().map(String::as_str));
        if layout.lora > 0 || layout.diffusion + layout.bare_unet == 0 {
            return Err(ProviderError::Mismatch {
                expected: "checkpoint",
                reason: "no diffusion model weights".into(),
            });
        }
        let kind = if layout.vae > 0 || layout.clip > 0 {
            ModelKind::Checkpoint
        } else {
            ModelKind::Unet
        };
        let model = handle(kind, path, &header, |n| {
            has_prefix(n, DIFFUSION_PREFIXES) || has_prefix(n, BARE_UNET_PREFIXES)
        });
        let clip = (layout.clip > 0)
            .then(|| handle(ModelKind::Clip, path, &header, |n| has_prefix(n, CLIP_PREFIXES)));
        let vae = (layout.vae > 0)
            .then(|| handle(ModelKind::Vae, path, &header, |n| has_prefix(n, VAE_PREFIXES)));
        Ok(LoadedModel {
            loader: self.name().to_string(),
            model: Some(model),
            clip,
            vae,
            lora: None,
        })
    }
}

pub struct VaeLoader;

impl ModelLoader for VaeLoader {
    fn name(&self) -> &'static str {
        "vae"
    }

    fn attempt(&self, path: &Path) -> Result<LoadedModel, ProviderError> {
        let header = open_header(path)?;
        expect_kind(&header, &[ModelKind::Vae], "vae")?;
        Ok(LoadedModel {
            loader: self.name().to_string(),
            vae: Some(handle(ModelKind::Vae, path, &header, |_| true)),
            ..Default::default()
        })
    }
}

pub struct ClipLoader;

impl ModelLoader for ClipLoader {
    fn name(&self) -> &'static str {
        "clip"
    }

    fn attempt(&self, path: &Path) -> Result<LoadedModel, ProviderError> {
        let header = open_header(path)?;
        expect_kind(&header, &[ModelKind::Clip], "clip")?;
        Ok(LoadedModel {
            loader: self.name().to_string(),
            clip: Some(handle(ModelKind::Clip, path, &header, |_| true)),
            ..Default::default()
        })
    }
}

/// Validation only: LoRA deltas cannot be used without a base model.
pub struct LoraLoader;

impl ModelLoader for LoraLoader {
    fn name(&self) -> &'static str {
        "lora"
    }

    fn attempt(&self, path: &Path) -> Result<LoadedModel, ProviderError> {
        let header = open_header(path)?;
        expect_kind(&header, &[ModelKind::Lora], "lora")?;
        let ups = header
            .tensors
            .keys()
            .filter(|n| n.contains("lora_up") || n.contains("lora_B"))
            .count();
        let downs = header
            .tensors
            .keys()
            .filter(|n| n.contains("lora_down") || n.contains("lora_A"))
            .count();
        if ups != downs {
            return Err(ProviderError::Mismatch {
                expected: "lora",
                reason: format!("{} up tensors but {} down tensors", ups, downs),
            });
        }
        Ok(LoadedModel {
            loader: self.name().to_string(),
            lora: Some(handle(ModelKind::Lora, path, &header, is_lora_tensor)),
            ..Default::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ProviderRegistry;
    use ::safetensors::tensor::TensorView;
    use ::safetensors::Dtype;
    use std::collections::HashMap;
    use std::path::PathBuf;

    fn write_model(dir: &Path, file: &str, names: &[&str], metadata: &[(&str, &str)]) -> PathBuf {
        let data = [0u8; 8];
        let tensors: HashMap<String, TensorView<'_>> = names
            .iter()
            .map(|name| {
                let view = TensorView::new(Dtype::F32, vec![2], &data).unwrap();
                (name.to_string(), view)
            })
            .collect();
        let meta: HashMap<String, String> = metadata
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let meta = (!meta.is_empty()).then_some(meta);
        let path = dir.join(file);
        std::fs::write(&path, ::safetensors::serialize(&tensors, &meta).unwrap()).unwrap();
        path
    }

    #[test]
    fn tensor_layouts_map_to_kinds() {
        assert_eq!(
            kind_from_tensor_names([
                "model.diffusion_model.input_blocks.0.weight",
                "first_stage_model.decoder.conv_in.weight",
                "cond_stage_model.transformer.text_model.embeddings.weight",
            ]),
            Some(ModelKind::Checkpoint)
        );
        assert_eq!(
            kind_from_tensor_names(["encoder.conv_in.weight", "decoder.conv_out.weight"]),
            Some(ModelKind::Vae)
        );
        assert_eq!(
            kind_from_tensor_names(["text_model.encoder.layers.0.mlp.fc1.weight"]),
            Some(ModelKind::Clip)
        );
        assert_eq!(
            kind_from_tensor_names(["lora_unet_down_blocks_0.lora_down.weight"]),
            Some(ModelKind::Lora)
        );
        assert_eq!(
            kind_from_tensor_names(["double_blocks.0.img_attn.qkv.weight"]),
            Some(ModelKind::Unet)
        );
        assert_eq!(kind_from_tensor_names(["something.else"]), None);
    }

    #[test]
    fn metadata_markers_win_over_layout() {
        let mut meta = BTreeMap::new();
        meta.insert("ss_network_module".to_string(), "networks.lora".to_string());
        assert_eq!(kind_from_metadata(&meta), Some(ModelKind::Lora));

        let mut meta = BTreeMap::new();
        meta.insert(
            "modelspec.architecture".to_string(),
            "stable-diffusion-xl-v1-base/vae".to_string(),
        );
        assert_eq!(kind_from_metadata(&meta), Some(ModelKind::Vae));
    }

    #[test]
    fn standard_chain_picks_matching_loader() {
        let dir = tempfile::tempdir().unwrap();
        let reg = ProviderRegistry::standard();

        let ckpt = write_model(
            dir.path(),
            "sd.safetensors",
            &[
                "model.diffusion_model.out.0.weight",
                "first_stage_model.encoder.conv_in.weight",
                "cond_stage_model.transformer.text_model.final_layer_norm.weight",
            ],
            &[],
        );
        let loaded = reg.load(&ckpt).unwrap();
        assert_eq!(loaded.loader, "checkpoint");
        assert_eq!(loaded.model.as_ref().unwrap().kind, ModelKind::Checkpoint);
        assert_eq!(loaded.model.as_ref().unwrap().tensor_count, 1);
        assert!(loaded.clip.is_some() && loaded.vae.is_some());

        let vae = write_model(dir.path(), "ae.safetensors", &["decoder.conv_in.weight"], &[]);
        let loaded = reg.load(&vae).unwrap();
        assert_eq!(loaded.loader, "vae");
        assert_eq!(loaded.vae.unwrap().parameter_count, 2);

        let clip = write_model(dir.path(), "te.safetensors", &["text_model.embeddings.weight"], &[]);
        assert_eq!(reg.load(&clip).unwrap().loader, "clip");

        let lora = write_model(
            dir.path(),
            "style.safetensors",
            &["lora_unet_a.lora_down.weight", "lora_unet_a.lora_up.weight"],
            &[],
        );
        let loaded = reg.load(&lora).unwrap();
        assert_eq!(loaded.loader, "lora");
        assert_eq!(loaded.lora.unwrap().tensor_count, 2);
    }

    #[test]
    fn unbalanced_lora_and_pickles_exhaust_the_chain() {
        let dir = tempfile::tempdir().unwrap();
        let reg = ProviderRegistry::standard();

        let broken = write_model(
            dir.path(),
            "half.safetensors",
            &["lora_unet_a.lora_down.weight"],
            &[],
        );
        assert!(matches!(reg.load(&broken), Err(ProviderError::Exhausted { .. })));

        let pickle = dir.path().join("model.ckpt");
        std::fs::write(&pickle, b"PK\x03\x04not really").unwrap();
        match reg.load(&pickle) {
            Err(ProviderError::Exhausted { attempts }) => assert_eq!(attempts.len(), 4),
            other => panic!("unexpected: {:?}", other.map(|m| m.loader)),
        }
    }
}
