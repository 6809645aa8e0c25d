use image::codecs::gif::GifDecoder;
use image::codecs::webp::WebPDecoder;
use image::{AnimationDecoder, ColorType, DynamicImage, ImageFormat};
use serde::Serialize;
use std::fs;
use std::io::Cursor;
use std::path::Path;

use crate::error::LoadError;
use crate::extractor::read_exif_orientation;
use crate::tensor::Tensor;

#[derive(Debug, Clone, Serialize)]
pub struct ImageInfo {
    /// Size after orientation correction.
    pub width: u32,
    pub height: u32,
    pub mode: &'static str,
    pub format: String,
    pub has_alpha: bool,
    pub frames: usize,
    pub exif_orientation: u8,
}

#[derive(Debug, Clone)]
pub struct ImageLoad {
    /// `(N, H, W, 3)` in `[0, 1]`.
    pub image: Tensor,
    /// `(N, H, W)`, `1 - alpha` or zeros.
    pub mask: Tensor,
    pub info: ImageInfo,
}

pub fn load_image(path: &Path, batch_frames: bool) -> Result<ImageLoad, LoadError> {
    let data = fs::read(path)?;
    load_image_bytes(&data, batch_frames)
}

pub fn load_image_bytes(data: &[u8], batch_frames: bool) -> Result<ImageLoad, LoadError> {
    let format = image::guess_format(data)?;
    let orientation = read_exif_orientation(data);
    let decoded = decode_frames(data, format, batch_frames)?;
    let color = decoded
        .first()
        .map(|f| f.color())
        .ok_or_else(|| LoadError::Decode("image has no frames".into()))?;

    let frames: Vec<DynamicImage> = decoded
        .into_iter()
        .map(|f| apply_orientation(f, orientation))
        .collect();
    let (width, height) = (frames[0].width(), frames[0].height());

    let mut images = Vec::with_capacity(frames.len());
    let mut masks = Vec::with_capacity(frames.len());
    let mut dropped = 0usize;
    for frame in &frames {
        if frame.width() != width || frame.height() != height {
            dropped += 1;
            continue;
        }
        let (img, mask) = frame_tensors(frame)?;
        images.push(img);
        masks.push(mask);
    }
    if dropped > 0 {
        tracing::debug!(dropped, "skipped frames whose size differs from the first");
    }

    let info = ImageInfo {
        width,
        height,
        mode: mode_name(color),
        format: format!("{:?}", format).to_uppercase(),
        has_alpha: color.has_alpha(),
        frames: images.len(),
        exif_orientation: orientation,
    };
    Ok(ImageLoad {
        image: Tensor::stack(images)?,
        mask: Tensor::stack(masks)?,
        info,
    })
}

fn decode_frames(
    data: &[u8],
    format: ImageFormat,
    batch_frames: bool,
) -> Result<Vec<DynamicImage>, LoadError> {
    let frames = match format {
        ImageFormat::Gif if batch_frames => GifDecoder::new(Cursor::new(data))?
            .into_frames()
            .collect_frames()?
            .into_iter()
            .map(|f| DynamicImage::ImageRgba8(f.into_buffer()))
            .collect(),
        ImageFormat::WebP if batch_frames => {
            let decoder = WebPDecoder::new(Cursor::new(data))?;
            if decoder.has_animation() {
                decoder
                    .into_frames()
                    .collect_frames()?
                    .into_iter()
                    .map(|f| DynamicImage::ImageRgba8(f.into_buffer()))
                    .collect()
            } else {
                vec![DynamicImage::from_decoder(decoder)?]
            }
        }
        _ => vec![image::load_from_memory_with_format(data, format)?],
    };
    Ok(frames)
}

/// Undoes the EXIF orientation tag so pixels are upright.
pub fn apply_orientation(img: DynamicImage, orientation: u8) -> DynamicImage {
    match orientation {
        2 => img.fliph(),
        3 => img.rotate180(),
        4 => img.flipv(),
        5 => img.rotate90().fliph(),
        6 => img.rotate90(),
        7 => img.rotate270().fliph(),
        8 => img.rotate270(),
        _ => img,
    }
}

/// RGB tensor `(H, W, 3)` and mask `(H, W)` for one frame.
fn frame_tensors(frame: &DynamicImage) -> Result<(Tensor, Tensor), LoadError> {
    let (w, h) = (frame.width() as usize, frame.height() as usize);
    let rgb: Vec<f32> = frame
        .to_rgb8()
        .as_raw()
        .iter()
        .map(|v| *v as f32 / 255.0)
        .collect();
    let image = Tensor::from_vec(&[h, w, 3], rgb)?;

    let mask = if frame.color().has_alpha() {
        let alpha: Vec<f32> = frame
            .to_rgba8()
            .pixels()
            .map(|p| 1.0 - p.0[3] as f32 / 255.0)
            .collect();
        Tensor::from_vec(&[h, w], alpha)?
    } else {
        Tensor::zeros(&[h, w])
    };
    Ok((image, mask))
}

fn mode_name(color: ColorType) -> &'static str {
    match color {
        ColorType::L8 => "L",
        ColorType::La8 => "LA",
        ColorType::Rgb8 => "RGB",
        ColorType::Rgba8 => "RGBA",
        ColorType::L16 => "I;16",
        ColorType::La16 => "LA;16",
        ColorType::Rgb16 => "RGB;16",
        ColorType::Rgba16 => "RGBA;16",
        ColorType::Rgb32F => "RGB;F",
        ColorType::Rgba32F => "RGBA;F",
        _ => "unknown",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    fn encode(img: &DynamicImage, format: ImageFormat) -> Vec<u8> {
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), format).unwrap();
        buf
    }

    #[test]
    fn rgba_png_yields_inverted_alpha_mask() {
        let mut img = RgbaImage::from_pixel(10, 10, Rgba([255, 0, 0, 255]));
        img.put_pixel(3, 2, Rgba([0, 0, 255, 0]));
        img.put_pixel(5, 5, Rgba([0, 255, 0, 128]));
        let png = encode(&DynamicImage::ImageRgba8(img), ImageFormat::Png);

        let loaded = load_image_bytes(&png, true).unwrap();
        assert_eq!(loaded.image.shape(), &[1, 10, 10, 3]);
        assert_eq!(loaded.mask.shape(), &[1, 10, 10]);
        assert_eq!(loaded.image.get(&[0, 0, 0, 0]), Some(1.0));
        assert_eq!(loaded.image.get(&[0, 2, 3, 2]), Some(1.0));
        assert_eq!(loaded.mask.get(&[0, 0, 0]), Some(0.0));
        assert_eq!(loaded.mask.get(&[0, 2, 3]), Some(1.0));
        let half = loaded.mask.get(&[0, 5, 5]).unwrap();
        assert!((half - (1.0 - 128.0 / 255.0)).abs() < 1e-6);
        assert_eq!(loaded.image.get(&[0, 5, 5, 1]), Some(1.0));
        assert_eq!(loaded.info.mode, "RGBA");
        assert_eq!(loaded.info.format, "PNG");
        assert!(loaded.info.has_alpha);
        assert_eq!(loaded.info.frames, 1);
    }

    #[test]
    fn opaque_image_gets_zero_mask() {
        let img = DynamicImage::ImageRgb8(image::RgbImage::from_pixel(4, 3, image::Rgb([0, 128, 255])));
        let loaded = load_image_bytes(&encode(&img, ImageFormat::Png), true).unwrap();
        assert_eq!(loaded.image.shape(), &[1, 3, 4, 3]);
        assert!(loaded.mask.data().iter().all(|v| *v == 0.0));
        assert!(!loaded.info.has_alpha);
        assert_eq!((loaded.info.width, loaded.info.height), (4, 3));
    }

    #[test]
    fn orientation_six_turns_landscape_to_portrait() {
        let img = DynamicImage::ImageRgb8(image::RgbImage::new(4, 2));
        let rotated = apply_orientation(img.clone(), 6);
        assert_eq!((rotated.width(), rotated.height()), (2, 4));
        let same = apply_orientation(img, 1);
        assert_eq!((same.width(), same.height()), (4, 2));
    }

    #[test]
    fn transpose_orientation_swaps_axes() {
        let mut img = RgbaImage::new(3, 2);
        img.put_pixel(2, 0, Rgba([9, 9, 9, 255]));
        let out = apply_orientation(DynamicImage::ImageRgba8(img), 5).to_rgba8();
        assert_eq!(out.dimensions(), (2, 3));
        assert_eq!(out.get_pixel(0, 2).0, [9, 9, 9, 255]);
    }

    #[test]
    fn garbage_is_an_image_error() {
        assert!(matches!(
            load_image_bytes(b"definitely not pixels", true),
            Err(LoadError::Image(_))
        ));
    }
}
