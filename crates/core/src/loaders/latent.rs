//! `.latent` files: a safetensors container holding `latent_tensor`.
//!
//! Files written before the format was versioned store samples pre-multiplied
//! by the SD1 scale factor; those are scaled back on load.

use half::{bf16, f16};
use safetensors::{Dtype, SafeTensors};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::error::LoadError;
use crate::tensor::Tensor;

pub const LATENT_TENSOR: &str = "latent_tensor";
pub const VERSION_MARKER: &str = "latent_format_version_0";
pub const LEGACY_MULTIPLIER: f32 = 1.0 / 0.18215;

#[derive(Debug, Clone)]
pub struct LatentLoad {
    /// Always contains `samples`.
    pub tensors: BTreeMap<String, Tensor>,
    pub multiplier: f32,
}

impl LatentLoad {
    pub fn samples(&self) -> Option<&Tensor> {
        self.tensors.get("samples")
    }
}

pub fn load_latent(path: &Path) -> Result<LatentLoad, LoadError> {
    let buf = fs::read(path)?;
    load_latent_bytes(&buf)
}

pub fn load_latent_bytes(buf: &[u8]) -> Result<LatentLoad, LoadError> {
    let container = SafeTensors::deserialize(buf)?;
    let view = container
        .tensor(LATENT_TENSOR)
        .map_err(|_| LoadError::MissingTensor(LATENT_TENSOR.to_string()))?;
    let values = decode_values(view.dtype(), view.data())?;
    let samples = Tensor::from_vec(view.shape(), values)?;

    let (_, metadata) = SafeTensors::read_metadata(buf)?;
    let versioned = container.names().iter().any(|n| n.as_str() == VERSION_MARKER)
        || metadata
            .metadata()
            .as_ref()
            .is_some_and(|m| m.contains_key(VERSION_MARKER));
    let multiplier = if versioned { 1.0 } else { LEGACY_MULTIPLIER };
    tracing::debug!(shape = ?view.shape(), dtype = ?view.dtype(), versioned, "latent decoded");

    let mut tensors = BTreeMap::new();
    tensors.insert("samples".to_string(), samples.scale(multiplier));
    Ok(LatentLoad {
        tensors,
        multiplier,
    })
}

/// Widens little-endian tensor bytes to f32. The container has already
/// checked that `bytes` holds exactly `shape` elements of `dtype`.
fn decode_values(dtype: Dtype, bytes: &[u8]) -> Result<Vec<f32>, LoadError> {
    let chunks = bytes.chunks_exact(dtype.size().max(1));
    let values = match dtype {
        Dtype::F16 => chunks.map(|c| f16::from_le_bytes([c[0], c[1]]).to_f32()).collect(),
        Dtype::BF16 => chunks.map(|c| bf16::from_le_bytes([c[0], c[1]]).to_f32()).collect(),
        Dtype::F32 => chunks
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect(),
        Dtype::F64 => chunks
            .map(|c| {
                let mut b = [0u8; 8];
                b.copy_from_slice(c);
                f64::from_le_bytes(b) as f32
            })
            .collect(),
        other => {
            return Err(LoadError::Decode(format!(
                "unsupported latent dtype {:?}",
                other
            )))
        }
    };
    Ok(values)
}
