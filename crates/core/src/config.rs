use serde::{Deserialize, Serialize};

use crate::scanner::HashMode;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub input: InputConfig,
    pub classifier: ClassifierConfig,
    pub loader: LoaderConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InputConfig {
    pub dir: String,
    /// Glob patterns hidden from the node's file selector.
    pub exclude: Vec<String>,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            dir: "input".to_string(),
            exclude: Vec::new(),
        }
    }
}

/// Size heuristics for model sub-kinds, in megabytes (10^6 bytes).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    pub checkpoint_min_mb: u64,
    pub vae_min_mb: u64,
    pub vae_max_mb: u64,
    pub lora_max_mb: u64,
    /// Unknown, non-image files above this size are treated as models.
    pub unknown_model_min_mb: u64,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            checkpoint_min_mb: 1000,
            vae_min_mb: 100,
            vae_max_mb: 400,
            lora_max_mb: 100,
            unknown_model_min_mb: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    /// Stack matching frames of animated images into one batch.
    pub batch_frames: bool,
    pub video_frame_cap: usize,
    pub ffmpeg_path: String,
    pub preview_bytes: usize,
    /// WHATWG encoding labels tried in order after BOM detection.
    pub text_encodings: Vec<String>,
    pub fingerprint: String,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            batch_frames: true,
            video_frame_cap: 300,
            ffmpeg_path: "ffmpeg".to_string(),
            preview_bytes: 100,
            text_encodings: ["utf-8", "gbk", "big5", "shift_jis", "euc-kr"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            fingerprint: "stat".to_string(),
        }
    }
}

impl LoaderConfig {
    pub fn hash_mode(&self) -> HashMode {
        HashMode::from(self.fingerprint.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub max_upload_mb: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8188".to_string(),
            max_upload_mb: 2048,
        }
    }
}

impl ServerConfig {
    pub fn max_upload_bytes(&self) -> usize {
        self.max_upload_mb.saturating_mul(1024 * 1024)
    }
}

pub fn load(path: Option<&str>) -> anyhow::Result<AppConfig> {
    let mut settings = config::Config::builder();
    if let Some(p) = path {
        settings = settings.add_source(config::File::with_name(p));
    } else {
        settings = settings.add_source(config::File::with_name("config/default").required(false));
    }
    settings = settings.add_source(
        config::Environment::with_prefix("LOADFILE")
            .separator("__")
            .try_parsing(true),
    );
    let cfg = settings.build()?;
    Ok(cfg.try_deserialize()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("loadfile.toml");
        std::fs::write(
            &path,
            "[input]\ndir = \"/srv/in\"\n[classifier]\nvae_max_mb = 512\n",
        )
        .unwrap();

        let cfg = load(Some(path.to_str().unwrap())).unwrap();
        assert_eq!(cfg.input.dir, "/srv/in");
        assert_eq!(cfg.classifier.vae_max_mb, 512);
        assert_eq!(cfg.classifier.checkpoint_min_mb, 1000);
        assert_eq!(cfg.loader.video_frame_cap, 300);
        assert_eq!(cfg.loader.text_encodings[0], "utf-8");
        assert_eq!(cfg.server.max_upload_bytes(), 2048 * 1024 * 1024);
    }
}
