//! Minimal owned f32 tensor used for the image, mask and latent outputs.

use serde::{Deserialize, Serialize};

use crate::error::LoadError;

pub const PLACEHOLDER_SIZE: usize = 64;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tensor {
    shape: Vec<usize>,
    data: Vec<f32>,
}

impl Tensor {
    pub fn zeros(shape: &[usize]) -> Self {
        let len = shape.iter().product();
        Self {
            shape: shape.to_vec(),
            data: vec![0.0; len],
        }
    }

    pub fn from_vec(shape: &[usize], data: Vec<f32>) -> Result<Self, LoadError> {
        let expected: usize = shape.iter().product();
        if expected != data.len() {
            return Err(LoadError::Decode(format!(
                "shape {:?} needs {} values, got {}",
                shape,
                expected,
                data.len()
            )));
        }
        Ok(Self {
            shape: shape.to_vec(),
            data,
        })
    }

    /// `(1, 64, 64, 3)` zeros.
    pub fn placeholder_image() -> Self {
        Self::zeros(&[1, PLACEHOLDER_SIZE, PLACEHOLDER_SIZE, 3])
    }

    /// `(1, 64, 64)` zeros.
    pub fn placeholder_mask() -> Self {
        Self::zeros(&[1, PLACEHOLDER_SIZE, PLACEHOLDER_SIZE])
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn get(&self, index: &[usize]) -> Option<f32> {
        if index.len() != self.shape.len() {
            return None;
        }
        let mut offset = 0;
        for (i, (&idx, &dim)) in index.iter().zip(&self.shape).enumerate() {
            if idx >= dim {
                return None;
            }
            let stride: usize = self.shape[i + 1..].iter().product();
            offset += idx * stride;
        }
        self.data.get(offset).copied()
    }

    pub fn scale(mut self, factor: f32) -> Self {
        for v in &mut self.data {
            *v *= factor;
        }
        self
    }

    /// Stacks equally shaped tensors along a new leading axis.
    pub fn stack(items: Vec<Tensor>) -> Result<Self, LoadError> {
        let first = items
            .first()
            .ok_or_else(|| LoadError::Decode("nothing to stack".into()))?;
        let inner = first.shape.clone();
        let mut data = Vec::with_capacity(first.len() * items.len());
        for t in &items {
            if t.shape != inner {
                return Err(LoadError::Decode(format!(
                    "cannot stack {:?} with {:?}",
                    t.shape, inner
                )));
            }
            data.extend_from_slice(&t.data);
        }
        let mut shape = Vec::with_capacity(inner.len() + 1);
        shape.push(items.len());
        shape.extend(inner);
        Ok(Self { shape, data })
    }
}
