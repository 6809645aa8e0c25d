//! Core library: file classification, per-kind loaders, dispatch and the host node.

pub mod classifier;
pub mod config;
pub mod error;
pub mod extractor;
pub mod loaders;
pub mod models;
pub mod node;
pub mod pipeline;
pub mod scanner;
pub mod tensor;

pub use error::LoadError;
pub use models::{FileDescriptor, FileKind, LoadMode};
pub use node::{LoadFileNode, OutputKind, OutputValue};
pub use pipeline::{load_file, LoadContext, LoadOutput, LoadedPayload};
pub use tensor::Tensor;
