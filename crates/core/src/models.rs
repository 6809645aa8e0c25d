use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::LoadError;
pub use providers::ModelKind;

/// Stat-derived facts about a file, captured at call time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileDescriptor {
    pub filename: String,
    pub file_path: PathBuf,
    pub file_size: u64,
    pub file_extension: String,
    pub mime_type: Option<String>,
    pub modified_time: chrono::DateTime<chrono::Utc>,
}

/// Exactly one of these is produced per classified file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FileKind {
    Image,
    Video,
    Model { subkind: Option<ModelKind> },
    Latent,
    Text { encoding: Option<&'static str> },
    Binary,
    Generic,
}

impl FileKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileKind::Image => "image",
            FileKind::Video => "video",
            FileKind::Model { .. } => "model",
            FileKind::Latent => "latent",
            FileKind::Text { .. } => "text",
            FileKind::Binary => "binary",
            FileKind::Generic => "generic",
        }
    }

    pub fn load_mode(&self) -> LoadMode {
        match self {
            FileKind::Image => LoadMode::Image,
            FileKind::Video => LoadMode::Video,
            FileKind::Model { .. } => LoadMode::Model,
            FileKind::Latent => LoadMode::Latent,
            FileKind::Text { .. } => LoadMode::Text,
            FileKind::Binary => LoadMode::Binary,
            FileKind::Generic => LoadMode::Generic,
        }
    }
}

impl fmt::Display for FileKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileKind::Model { subkind: Some(k) } => write!(f, "model({})", k),
            FileKind::Text {
                encoding: Some(enc),
            } => write!(f, "text({})", enc),
            other => f.write_str(other.as_str()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadMode {
    #[default]
    Auto,
    Image,
    Video,
    Model,
    Latent,
    Text,
    Binary,
    Generic,
}

impl LoadMode {
    pub const ALL: [LoadMode; 8] = [
        LoadMode::Auto,
        LoadMode::Image,
        LoadMode::Video,
        LoadMode::Model,
        LoadMode::Latent,
        LoadMode::Text,
        LoadMode::Binary,
        LoadMode::Generic,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LoadMode::Auto => "auto",
            LoadMode::Image => "image",
            LoadMode::Video => "video",
            LoadMode::Model => "model",
            LoadMode::Latent => "latent",
            LoadMode::Text => "text",
            LoadMode::Binary => "binary",
            LoadMode::Generic => "generic",
        }
    }
}

impl fmt::Display for LoadMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LoadMode {
    type Err = LoadError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.trim().to_lowercase();
        LoadMode::ALL
            .iter()
            .copied()
            .find(|m| m.as_str() == lowered)
            .ok_or_else(|| LoadError::InvalidMode(s.to_string()))
    }
}
