//! Video frames via an external ffmpeg, falling back to a single still frame
//! decoded in-process when ffmpeg is missing or fails.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::process::{Command, Stdio};

use crate::error::LoadError;
use crate::loaders::image::load_image;
use crate::tensor::Tensor;

#[derive(Debug, Clone, Serialize)]
pub struct VideoInfo {
    pub frame_count: usize,
    pub width: u32,
    pub height: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fps: Option<f64>,
    /// `ffmpeg` or `still`.
    pub decoder: &'static str,
}

#[derive(Debug, Clone)]
pub struct VideoLoad {
    /// `(N, H, W, 3)` RGB in `[0, 1]`.
    pub frames: Tensor,
    pub info: VideoInfo,
}

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    streams: Option<Vec<FfprobeStream>>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    width: Option<u32>,
    height: Option<u32>,
    r_frame_rate: Option<String>,
    tags: Option<FfprobeTags>,
    #[serde(default)]
    side_data_list: Vec<FfprobeSideData>,
}

#[derive(Debug, Deserialize)]
struct FfprobeTags {
    rotate: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeSideData {
    rotation: Option<f64>,
}

impl FfprobeStream {
    /// Display rotation in degrees, normalized to `0..360`. Newer containers
    /// carry it as display-matrix side data, older ones as a `rotate` tag.
    fn rotation(&self) -> i64 {
        let side = self.side_data_list.iter().find_map(|d| d.rotation);
        let tag = self
            .tags
            .as_ref()
            .and_then(|t| t.rotate.as_deref())
            .and_then(|r| r.trim().parse::<f64>().ok());
        side.or(tag)
            .map(|deg| (deg.round() as i64).rem_euclid(360))
            .unwrap_or(0)
    }

    /// Size of the frames ffmpeg emits. It autorotates, so quarter turns swap
    /// the coded width and height.
    fn output_size(&self) -> Option<(u32, u32)> {
        match (self.width, self.height) {
            (Some(w), Some(h)) if w > 0 && h > 0 => match self.rotation() {
                90 | 270 => Some((h, w)),
                _ => Some((w, h)),
            },
            _ => None,
        }
    }
}

pub fn ffmpeg_available(ffmpeg_path: &str) -> bool {
    Command::new(ffmpeg_path)
        .arg("-version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

pub fn load_video(path: &Path, ffmpeg_path: &str, frame_cap: usize) -> Result<VideoLoad, LoadError> {
    if ffmpeg_available(ffmpeg_path) {
        match decode_with_ffmpeg(path, ffmpeg_path, frame_cap) {
            Ok(loaded) => return Ok(loaded),
            Err(e) => tracing::warn!(path = ?path, error = %e, "ffmpeg decode failed, trying still frame"),
        }
    } else {
        tracing::debug!(ffmpeg = ffmpeg_path, "ffmpeg not available, trying still frame");
    }
    decode_still(path)
}

fn ffprobe_path(ffmpeg_path: &str) -> String {
    ffmpeg_path.replace("ffmpeg", "ffprobe")
}

fn probe(ffprobe: &str, path: &Path) -> Result<FfprobeStream, LoadError> {
    let output = Command::new(ffprobe)
        .args([
            "-v",
            "error",
            "-select_streams",
            "v:0",
            "-show_entries",
            "stream=width,height,r_frame_rate:stream_tags=rotate:stream_side_data=rotation",
            "-of",
            "json",
        ])
        .arg(path)
        .output()?;
    if !output.status.success() {
        return Err(LoadError::Decode(format!(
            "ffprobe failed: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    let parsed: FfprobeOutput = serde_json::from_slice(&output.stdout)
        .map_err(|e| LoadError::Decode(format!("ffprobe output: {}", e)))?;
    parsed
        .streams
        .and_then(|s| s.into_iter().next())
        .ok_or_else(|| LoadError::NoFrames("no video stream".into()))
}

fn parse_rate(rate: &str) -> Option<f64> {
    let (num, den) = rate.split_once('/')?;
    let (num, den): (f64, f64) = (num.parse().ok()?, den.parse().ok()?);
    (den > 0.0).then(|| num / den)
}

fn decode_with_ffmpeg(path: &Path, ffmpeg_path: &str, frame_cap: usize) -> Result<VideoLoad, LoadError> {
    let stream = probe(&ffprobe_path(ffmpeg_path), path)?;
    let (width, height) = stream
        .output_size()
        .ok_or_else(|| LoadError::Decode("ffprobe reported no frame size".into()))?;

    // rgb24 makes ffmpeg emit packed RGB, so no channel reordering is needed here.
    let cap = frame_cap.to_string();
    let output = Command::new(ffmpeg_path)
        .args(["-v", "error", "-i"])
        .arg(path)
        .args(["-frames:v", cap.as_str()])
        .args(["-f", "rawvideo", "-pix_fmt", "rgb24", "-"])
        .output()?;
    if !output.status.success() {
        return Err(LoadError::Decode(format!(
            "ffmpeg failed: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }

    let frame_len = width as usize * height as usize * 3;
    let count = (output.stdout.len() / frame_len).min(frame_cap);
    if count == 0 {
        return Err(LoadError::NoFrames(path.display().to_string()));
    }
    let data: Vec<f32> = output.stdout[..count * frame_len]
        .iter()
        .map(|v| *v as f32 / 255.0)
        .collect();
    let frames = Tensor::from_vec(&[count, height as usize, width as usize, 3], data)?;
    tracing::debug!(path = ?path, count, width, height, "video decoded");
    Ok(VideoLoad {
        frames,
        info: VideoInfo {
            frame_count: count,
            width,
            height,
            fps: stream.r_frame_rate.as_deref().and_then(parse_rate),
            decoder: "ffmpeg",
        },
    })
}

fn decode_still(path: &Path) -> Result<VideoLoad, LoadError> {
    let still = load_image(path, false).map_err(|e| LoadError::NoFrames(e.to_string()))?;
    Ok(VideoLoad {
        info: VideoInfo {
            frame_count: 1,
            width: still.info.width,
            height: still.info.height,
            fps: None,
            decoder: "still",
        },
        frames: still.image,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probe_name_follows_ffmpeg_path() {
        assert_eq!(ffprobe_path("/opt/bin/ffmpeg"), "/opt/bin/ffprobe");
        assert_eq!(ffprobe_path("ffmpeg"), "ffprobe");
    }

    #[test]
    fn frame_rates_parse_as_fractions() {
        assert_eq!(parse_rate("30/1"), Some(30.0));
        assert!((parse_rate("30000/1001").unwrap() - 29.97).abs() < 0.01);
        assert_eq!(parse_rate("0/0"), None);
        assert_eq!(parse_rate("garbage"), None);
    }

    fn stream(json: &str) -> FfprobeStream {
        let parsed: FfprobeOutput = serde_json::from_str(json).unwrap();
        parsed.streams.unwrap().into_iter().next().unwrap()
    }

    #[test]
    fn portrait_phone_video_swaps_frame_size() {
        let side_data = stream(
            r#"{"streams":[{"width":1920,"height":1080,"r_frame_rate":"30/1",
                "side_data_list":[{"side_data_type":"Display Matrix","rotation":-90}]}]}"#,
        );
        assert_eq!(side_data.rotation(), 270);
        assert_eq!(side_data.output_size(), Some((1080, 1920)));

        let tagged = stream(r#"{"streams":[{"width":640,"height":480,"tags":{"rotate":"90"}}]}"#);
        assert_eq!(tagged.output_size(), Some((480, 640)));

        let flipped = stream(r#"{"streams":[{"width":640,"height":480,"tags":{"rotate":"180"}}]}"#);
        assert_eq!(flipped.output_size(), Some((640, 480)));
    }

    #[test]
    fn unrotated_or_sizeless_streams() {
        assert_eq!(stream(r#"{"streams":[{"width":4,"height":2}]}"#).output_size(), Some((4, 2)));
        assert_eq!(stream(r#"{"streams":[{"width":0,"height":2}]}"#).output_size(), None);
        assert_eq!(stream(r#"{"streams":[{}]}"#).output_size(), None);
    }

    #[test]
    fn missing_decoder_falls_back_to_still_frame() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.mp4");
        let img = image::RgbImage::from_pixel(6, 4, image::Rgb([10, 20, 30]));
        img.save_with_format(&path, image::ImageFormat::Png).unwrap();

        let loaded = load_video(&path, "/nonexistent/ffmpeg", 10).unwrap();
        assert_eq!(loaded.info.decoder, "still");
        assert_eq!(loaded.frames.shape(), &[1, 4, 6, 3]);
    }

    #[test]
    fn undecodable_without_ffmpeg_yields_no_frames() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.mp4");
        std::fs::write(&path, b"\x00\x00\x00\x18ftypmp42").unwrap();
        assert!(matches!(
            load_video(&path, "/nonexistent/ffmpeg", 10),
            Err(LoadError::NoFrames(_))
        ));
    }
}
