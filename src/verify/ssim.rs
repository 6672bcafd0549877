// src/verify/ssim.rs
// module: verify | role: structural similarity
// summary: a self-contained SSIM implementation over 8x8 windows with the
// standard C1/C2 stabilizing constants (SPEC_FULL.md §4.3 SSIM implementation).
// No published SSIM crate appears anywhere in the reference corpus, so this is
// owned directly rather than wrapped.

use image::GrayImage;

const WINDOW: u32 = 8;
/// Stabilizing constants for an 8-bit dynamic range (L = 255), as in the
/// original Wang et al. formulation: C1 = (0.01L)^2, C2 = (0.03L)^2.
const C1: f64 = 0.01 * 0.01 * 255.0 * 255.0;
const C2: f64 = 0.03 * 0.03 * 255.0 * 255.0;

/// Mean SSIM over all non-overlapping `WINDOW x WINDOW` tiles shared by both
/// images. Images must be the same dimensions (callers resize first).
pub fn compute_ssim(a: &GrayImage, b: &GrayImage) -> f64 {
    let (w, h) = a.dimensions();
    if (w, h) != b.dimensions() || w == 0 || h == 0 {
        return 0.0;
    }

    let mut total = 0.0;
    let mut windows = 0u32;

    let mut y = 0;
    while y < h {
        let win_h = WINDOW.min(h - y);
        let mut x = 0;
        while x < w {
            let win_w = WINDOW.min(w - x);
            total += window_ssim(a, b, x, y, win_w, win_h);
            windows += 1;
            x += WINDOW;
        }
        y += WINDOW;
    }

    if windows == 0 {
        0.0
    } else {
        (total / windows as f64).clamp(-1.0, 1.0)
    }
}

fn window_ssim(a: &GrayImage, b: &GrayImage, x0: u32, y0: u32, w: u32, h: u32) -> f64 {
    let n = (w * h) as f64;
    let mut sum_a = 0.0;
    let mut sum_b = 0.0;

    for y in y0..y0 + h {
        for x in x0..x0 + w {
            sum_a += a.get_pixel(x, y)[0] as f64;
            sum_b += b.get_pixel(x, y)[0] as f64;
        }
    }

    let mean_a = sum_a / n;
    let mean_b = sum_b / n;

    let mut var_a = 0.0;
    let mut var_b = 0.0;
    let mut covar = 0.0;

    for y in y0..y0 + h {
        for x in x0..x0 + w {
            let da = a.get_pixel(x, y)[0] as f64 - mean_a;
            let db = b.get_pixel(x, y)[0] as f64 - mean_b;
            var_a += da * da;
            var_b += db * db;
            covar += da * db;
        }
    }

    var_a /= n;
    var_b /= n;
    covar /= n;

    let numerator = (2.0 * mean_a * mean_b + C1) * (2.0 * covar + C2);
    let denominator = (mean_a * mean_a + mean_b * mean_b + C1) * (var_a + var_b + C2);

    if denominator == 0.0 {
        1.0
    } else {
        numerator / denominator
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::ImageBuffer;

    #[test]
    fn identical_images_score_near_one() {
        let img: GrayImage = ImageBuffer::from_fn(32, 32, |x, y| image::Luma([((x + y) % 256) as u8]));
        let score = compute_ssim(&img, &img);
        assert!((score - 1.0).abs() < 1e-9);
    }

    #[test]
    fn inverted_images_score_low() {
        let a: GrayImage = ImageBuffer::from_fn(16, 16, |_, _| image::Luma([0u8]));
        let b: GrayImage = ImageBuffer::from_fn(16, 16, |_, _| image::Luma([255u8]));
        let score = compute_ssim(&a, &b);
        assert!(score < 0.5);
    }

    #[test]
    fn mismatched_dimensions_score_zero() {
        let a: GrayImage = ImageBuffer::from_fn(16, 16, |_, _| image::Luma([10u8]));
        let b: GrayImage = ImageBuffer::from_fn(8, 8, |_, _| image::Luma([10u8]));
        assert_eq!(compute_ssim(&a, &b), 0.0);
    }
}
