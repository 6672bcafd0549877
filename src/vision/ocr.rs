// src/vision/ocr.rs
// module: vision | role: OCR engine + preprocessing
// summary: the texted-path OCR port (SPEC_FULL.md §4.2 OCR engine) plus the
// five preprocessing variants run against `image` crate pixel buffers before
// every OCR pass. Grounded on
// original_source/backend/tools/texted_icon_detection.py, which iterates the
// same preprocessing x PSM matrix through pytesseract; here the shell-out goes
// through `rusty-tesseract` instead, consistent with the teacher's philosophy
// of treating external device/vendor tools as subprocess collaborators.

use async_trait::async_trait;
use image::{GrayImage, Luma};

use crate::error::{AgentError, AgentResult};

/// One OCR hit, independent of which preprocessing/PSM pair produced it.
#[derive(Debug, Clone)]
pub struct OcrCandidate {
    pub text: String,
    pub x: i32,
    pub y: i32,
    pub w: i32,
    pub h: i32,
    pub confidence: u8,
}

/// Tesseract page segmentation modes relevant to icon-label recognition.
#[derive(Debug, Clone, Copy)]
pub enum PsmMode {
    /// Assume a single uniform block of text.
    SingleBlock,
    /// Treat the image as a single word.
    SingleWord,
    /// Sparse text, no particular layout assumed.
    SparseText,
}

impl PsmMode {
    fn as_arg(self) -> &'static str {
        match self {
            PsmMode::SingleBlock => "6",
            PsmMode::SingleWord => "8",
            PsmMode::SparseText => "11",
        }
    }
}

#[async_trait]
pub trait OcrEngine: Send + Sync {
    async fn recognize(&self, image: &GrayImage, psm_mode: PsmMode) -> AgentResult<Vec<OcrCandidate>>;
}

pub struct TesseractOcrEngine;

impl Default for TesseractOcrEngine {
    fn default() -> Self {
        Self
    }
}

#[async_trait]
impl OcrEngine for TesseractOcrEngine {
    async fn recognize(&self, image: &GrayImage, psm_mode: PsmMode) -> AgentResult<Vec<OcrCandidate>> {
        let tmp = tempfile::NamedTempFile::with_suffix(".png")
            .map_err(|e| AgentError::perception(format!("failed to create temp file: {e}")))?;
        image
            .save(tmp.path())
            .map_err(|e| AgentError::perception(format!("failed to write preprocessed image: {e}")))?;

        let path = tmp.path().to_path_buf();
        let psm = psm_mode.as_arg().to_string();

        tokio::task::spawn_blocking(move || run_tesseract(&path, &psm))
            .await
            .map_err(|e| AgentError::perception(format!("tesseract task panicked: {e}")))?
    }
}

fn run_tesseract(path: &std::path::Path, psm: &str) -> AgentResult<Vec<OcrCandidate>> {
    let mut args = rusty_tesseract::Args::default();
    args.psm = psm.parse().unwrap_or(6);
    args.config_variables
        .insert("tessedit_create_tsv".to_string(), "1".to_string());

    let image = rusty_tesseract::Image::from_path(path)
        .map_err(|e| AgentError::perception(format!("failed to load image for tesseract: {e}")))?;

    let data = rusty_tesseract::image_to_data(&image, &args)
        .map_err(|e| AgentError::perception(format!("tesseract invocation failed: {e}")))?;

    let candidates = data
        .data
        .into_iter()
        .filter(|row| !row.text.trim().is_empty())
        .map(|row| OcrCandidate {
            text: row.text.trim().to_string(),
            x: row.left,
            y: row.top,
            w: row.width,
            h: row.height,
            confidence: row.conf.clamp(0.0, 100.0) as u8,
        })
        .collect();

    Ok(candidates)
}

/// Grayscale conversion followed by a light denoise (median-ish box blur) and
/// an unsharp-mask sharpen pass.
pub fn preprocess_grayscale_denoise_sharpen(img: &image::DynamicImage) -> GrayImage {
    let gray = img.to_luma8();
    let blurred = imageproc::filter::gaussian_blur_f32(&gray, 1.0);
    unsharp_mask(&gray, &blurred, 1.5)
}

/// A CLAHE-style local-contrast stretch: per-pixel, remap against the local
/// neighborhood's min/max rather than a single global range.
pub fn preprocess_clahe_otsu(img: &image::DynamicImage) -> GrayImage {
    let gray = img.to_luma8();
    let stretched = local_contrast_stretch(&gray, 16);
    otsu_threshold(&stretched)
}

/// Simple channel inversion, useful for light-on-dark icon labels.
pub fn preprocess_invert(img: &image::DynamicImage) -> GrayImage {
    let mut gray = img.to_luma8();
    for pixel in gray.pixels_mut() {
        pixel.0[0] = 255 - pixel.0[0];
    }
    gray
}

/// Edge-enhance via an unsharp mask with a larger blur radius than the denoise
/// variant, emphasizing glyph boundaries over fine noise.
pub fn preprocess_edge_enhance(img: &image::DynamicImage) -> GrayImage {
    let gray = img.to_luma8();
    let blurred = imageproc::filter::gaussian_blur_f32(&gray, 2.5);
    unsharp_mask(&gray, &blurred, 2.0)
}

/// Otsu global thresholding alone, no contrast stretch.
pub fn preprocess_otsu(img: &image::DynamicImage) -> GrayImage {
    let gray = img.to_luma8();
    otsu_threshold(&gray)
}

fn unsharp_mask(sharp: &GrayImage, blurred: &GrayImage, amount: f32) -> GrayImage {
    let (w, h) = sharp.dimensions();
    GrayImage::from_fn(w, h, |x, y| {
        let s = sharp.get_pixel(x, y)[0] as f32;
        let b = blurred.get_pixel(x, y)[0] as f32;
        let value = s + amount * (s - b);
        Luma([value.clamp(0.0, 255.0) as u8])
    })
}

fn local_contrast_stretch(img: &GrayImage, tile: u32) -> GrayImage {
    let (w, h) = img.dimensions();
    GrayImage::from_fn(w, h, |x, y| {
        let x0 = (x / tile) * tile;
        let y0 = (y / tile) * tile;
        let x1 = (x0 + tile).min(w);
        let y1 = (y0 + tile).min(h);

        let mut min = 255u8;
        let mut max = 0u8;
        for ty in y0..y1 {
            for tx in x0..x1 {
                let v = img.get_pixel(tx, ty)[0];
                min = min.min(v);
                max = max.max(v);
            }
        }

        let v = img.get_pixel(x, y)[0];
        if max > min {
            let stretched = ((v as f32 - min as f32) / (max as f32 - min as f32)) * 255.0;
            Luma([stretched.clamp(0.0, 255.0) as u8])
        } else {
            Luma([v])
        }
    })
}

fn otsu_threshold(img: &GrayImage) -> GrayImage {
    let mut histogram = [0u32; 256];
    for pixel in img.pixels() {
        histogram[pixel[0] as usize] += 1;
    }

    let total = img.width() as u64 * img.height() as u64;
    let sum_total: f64 = histogram
        .iter()
        .enumerate()
        .map(|(i, &count)| i as f64 * count as f64)
        .sum();

    let mut sum_background = 0.0;
    let mut weight_background = 0u64;
    let mut best_threshold = 0u8;
    let mut best_variance = 0.0;

    for t in 0..256 {
        weight_background += histogram[t] as u64;
        if weight_background == 0 {
            continue;
        }
        let weight_foreground = total - weight_background;
        if weight_foreground == 0 {
            break;
        }

        sum_background += t as f64 * histogram[t] as f64;
        let mean_background = sum_background / weight_background as f64;
        let mean_foreground = (sum_total - sum_background) / weight_foreground as f64;

        let between_variance = weight_background as f64
            * weight_foreground as f64
            * (mean_background - mean_foreground).powi(2);

        if between_variance > best_variance {
            best_variance = between_variance;
            best_threshold = t as u8;
        }
    }

    let (w, h) = img.dimensions();
    GrayImage::from_fn(w, h, |x, y| {
        let v = img.get_pixel(x, y)[0];
        Luma([if v >= best_threshold { 255 } else { 0 }])
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::DynamicImage;

    fn checker(width: u32, height: u32) -> DynamicImage {
        DynamicImage::ImageLuma8(GrayImage::from_fn(width, height, |x, y| {
            Luma([if (x / 4 + y / 4) % 2 == 0 { 40 } else { 220 }])
        }))
    }

    #[test]
    fn invert_flips_all_pixels() {
        let img = checker(16, 16);
        let inverted = preprocess_invert(&img);
        let original = img.to_luma8();
        for (a, b) in original.pixels().zip(inverted.pixels()) {
            assert_eq!(a[0], 255 - b[0]);
        }
    }

    #[test]
    fn otsu_threshold_is_binary() {
        let img = checker(32, 32);
        let thresholded = preprocess_otsu(&img);
        for pixel in thresholded.pixels() {
            assert!(pixel[0] == 0 || pixel[0] == 255);
        }
    }

    #[test]
    fn local_contrast_stretch_preserves_dimensions() {
        let img = checker(20, 20);
        let stretched = preprocess_clahe_otsu(&img);
        assert_eq!(stretched.dimensions(), (20, 20));
    }
}
