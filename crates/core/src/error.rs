use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("io: {0}")]
    Io(#[from] io::Error),
    #[error("image: {0}")]
    Image(#[from] image::ImageError),
    #[error("decode failed: {0}")]
    Decode(String),
    #[error("no encoding in [{0}] decodes this file")]
    UnsupportedEncoding(String),
    #[error("video yielded no frames: {0}")]
    NoFrames(String),
    #[error("safetensors: {0}")]
    Safetensors(#[from] safetensors::SafeTensorError),
    #[error("model load failed: {0}")]
    ModelLoad(#[from] providers::ProviderError),
    #[error("unknown load mode: {0}")]
    InvalidMode(String),
    #[error("input path: {0}")]
    Storage(#[from] storage::StorageError),
    #[error("missing tensor: {0}")]
    MissingTensor(String),
}
