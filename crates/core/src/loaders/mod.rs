//! Per-kind loaders. Each returns a typed result or a [`LoadError`](crate::error::LoadError);
//! turning failures into error payloads is the dispatcher's job.

pub mod binary;
pub mod image;
pub mod latent;
pub mod text;
pub mod video;
