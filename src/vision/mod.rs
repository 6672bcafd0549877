// src/vision/mod.rs
// module: vision | role: Vision Resolver (C2)
// summary: resolves a natural-language element description to a screen
// coordinate, following the precedence pipeline of SPEC_FULL.md §4.2: device
// profile lookup, a texted/non-texted routing decision, the OCR+fuzzy-match
// texted path, the CV-grid/model non-texted path, and auto-learn gating.
// Grounded on original_source/backend/tools/texted_icon_detection.py and
// non_texted_icon_detection.py for the resolution algorithm, and on the
// teacher's agent_ports.rs for the external-collaborator trait boundaries
// (OcrEngine, ModelClient here play the role the teacher's AiProvider plays).

pub mod fuzzy;
pub mod grid;
pub mod model;
pub mod ocr;

use std::sync::Arc;

use image::{DynamicImage, GenericImageView};
use tracing::{debug, warn};

use crate::controller::ExecutionController;
use crate::domain::action::{CoordinateSource, TargetCoordinate};
use crate::domain::device_profile::{normalize_icon_name, DeviceProfile};
use crate::error::AgentResult;
use fuzzy::ratcliff_obershelp_similarity;
use grid::{detect_grid, NavBarRegion};
use model::ModelClient;
use ocr::{OcrCandidate, OcrEngine, PsmMode};

const OCR_CONFIDENCE_THRESHOLD: u8 = 55;
const FUZZY_SIMILARITY_THRESHOLD: f64 = 0.85;
const CLUSTER_DISTANCE_FRACTION: f64 = 0.15;

/// One piece of recognized text, independent of whether it matched a target
/// description (SPEC_FULL.md §4.2 `extract_text`).
#[derive(Debug, Clone)]
pub struct TextHit {
    pub text: String,
    pub x: i32,
    pub y: i32,
    pub w: i32,
    pub h: i32,
    pub confidence: u8,
}

/// The result of `analyze`: a free-text summary plus every text hit found.
#[derive(Debug, Clone)]
pub struct SceneAnalysis {
    pub summary: String,
    pub elements: Vec<TextHit>,
}

pub struct VisionResolver {
    controller: ExecutionController,
    ocr: Arc<dyn OcrEngine>,
    model: Arc<dyn ModelClient>,
}

impl VisionResolver {
    pub fn new(controller: ExecutionController, ocr: Arc<dyn OcrEngine>, model: Arc<dyn ModelClient>) -> Self {
        Self { controller, ocr, model }
    }

    /// The full resolution pipeline. `profile` is consulted first (step 1);
    /// the caller is responsible for writing an auto-learned coordinate back
    /// into the profile afterwards (`TargetCoordinate::should_auto_learn`).
    pub async fn find_element(
        &self,
        screenshot: &DynamicImage,
        description: &str,
        profile: Option<&DeviceProfile>,
    ) -> AgentResult<Option<TargetCoordinate>> {
        if !self.controller.check_and_wait() {
            return Ok(None);
        }

        // Step 1: device profile lookup, O(1), attempted first.
        if let Some(profile) = profile {
            let normalized = normalize_icon_name(description);
            if let Some((_, record)) = profile.get_fuzzy(&normalized) {
                debug!(%description, "resolved via device profile");
                return Ok(Some(TargetCoordinate::new(record.x, record.y, CoordinateSource::DeviceProfile, 100)));
            }
        }

        // Step 2: routing decision. Model errors default to texted.
        let is_texted = self.ask_is_texted(description).await;

        if is_texted {
            if let Some(coord) = self.texted_path(screenshot, description).await? {
                return Ok(Some(coord));
            }
            // No text found: automatic fallthrough to the non-texted path.
            return self.non_texted_path(screenshot, description).await;
        }

        self.non_texted_path(screenshot, description).await
    }

    async fn ask_is_texted(&self, description: &str) -> bool {
        let prompt = format!(
            "Does the UI element described as \"{description}\" carry a visible text label? Answer YES or NO only."
        );
        match self.model.complete(&prompt, None).await {
            Ok(response) => response.to_uppercase().contains("YES"),
            Err(e) => {
                warn!(error = %e, "routing decision failed, defaulting to texted");
                true
            }
        }
    }

    async fn texted_path(&self, screenshot: &DynamicImage, description: &str) -> AgentResult<Option<TargetCoordinate>> {
        let variants: Vec<image::GrayImage> = vec![
            ocr::preprocess_grayscale_denoise_sharpen(screenshot),
            ocr::preprocess_clahe_otsu(screenshot),
            ocr::preprocess_invert(screenshot),
            ocr::preprocess_edge_enhance(screenshot),
            ocr::preprocess_otsu(screenshot),
        ];
        let psm_modes = [PsmMode::SingleBlock, PsmMode::SingleWord, PsmMode::SparseText];

        let mut candidates: Vec<OcrCandidate> = Vec::new();
        for variant in &variants {
            for psm in psm_modes {
                if !self.controller.check_and_wait() {
                    return Ok(None);
                }
                match self.ocr.recognize(variant, psm).await {
                    Ok(hits) => candidates.extend(hits),
                    Err(e) => warn!(error = %e, "ocr pass failed, continuing with remaining variants"),
                }
            }
        }

        let normalized_target = description.trim().to_lowercase();
        let mut scored: Vec<(OcrCandidate, f64, bool)> = candidates
            .into_iter()
            .filter(|c| c.confidence as u32 >= OCR_CONFIDENCE_THRESHOLD as u32)
            .filter_map(|c| {
                let candidate_text = c.text.trim().to_lowercase();
                let is_exact = candidate_text == normalized_target;
                let similarity = ratcliff_obershelp_similarity(&candidate_text, &normalized_target);
                if is_exact || similarity >= FUZZY_SIMILARITY_THRESHOLD {
                    Some((c, similarity, is_exact))
                } else {
                    None
                }
            })
            .collect();

        if scored.is_empty() {
            return Ok(None);
        }

        let (width, height) = screenshot.dimensions();
        let diagonal = ((width * width + height * height) as f64).sqrt();

        // Weighted centroid: weight = confidence * similarity.
        let mut weight_sum = 0.0;
        let mut cx = 0.0;
        let mut cy = 0.0;
        for (c, similarity, _) in &scored {
            let weight = c.confidence as f64 * similarity;
            let (px, py) = candidate_center(c);
            cx += px * weight;
            cy += py * weight;
            weight_sum += weight;
        }
        if weight_sum > 0.0 {
            cx /= weight_sum;
            cy /= weight_sum;
        }

        let max_distance = diagonal * CLUSTER_DISTANCE_FRACTION;
        scored.retain(|(c, _, _)| {
            let (px, py) = candidate_center(c);
            let dist = ((px - cx).powi(2) + (py - cy).powi(2)).sqrt();
            dist <= max_distance
        });

        if scored.is_empty() {
            return Ok(None);
        }

        // Composite score: 0.5*confidence + 0.3*similarity*100 + 0.2*distance_score*100,
        // tie-broken exact > fuzzy > higher confidence > smaller distance > insertion order.
        let mut best_idx = 0;
        let mut best_score = f64::MIN;
        let mut best_is_exact = false;
        let mut best_distance = f64::MAX;

        for (idx, (c, similarity, is_exact)) in scored.iter().enumerate() {
            let (px, py) = candidate_center(c);
            let distance = ((px - cx).powi(2) + (py - cy).powi(2)).sqrt();
            let distance_score = 1.0 - (distance / max_distance.max(1.0)).min(1.0);
            let score = 0.5 * c.confidence as f64 + 0.3 * similarity * 100.0 + 0.2 * distance_score * 100.0;

            let better = match (*is_exact, best_is_exact) {
                (true, false) => true,
                (false, true) => false,
                _ => {
                    if (score - best_score).abs() > 1e-6 {
                        score > best_score
                    } else {
                        distance < best_distance
                    }
                }
            };

            if better {
                best_idx = idx;
                best_score = score;
                best_is_exact = *is_exact;
                best_distance = distance;
            }
        }

        let (winner, similarity, _) = &scored[best_idx];
        let (px, py) = candidate_center(winner);
        let confidence = ((winner.confidence as f64) * similarity.max(0.5)).clamp(0.0, 100.0) as u8;

        Ok(Some(TargetCoordinate::new(px as i32, py as i32, CoordinateSource::Ocr, confidence)))
    }

    async fn non_texted_path(&self, screenshot: &DynamicImage, description: &str) -> AgentResult<Option<TargetCoordinate>> {
        let lowered = description.to_lowercase();
        let is_launcher_grid = ["launcher", "drawer", "grid"].iter().any(|kw| lowered.contains(kw));

        if is_launcher_grid {
            let (width, height) = screenshot.dimensions();
            for region in NavBarRegion::all() {
                if !self.controller.check_and_wait() {
                    return Ok(None);
                }
                let (x, y, w, h) = region.bounds(width, height);
                if w == 0 || h == 0 {
                    continue;
                }
                let cropped = screenshot.view(x, y, w, h).to_image();
                let gray = image::DynamicImage::ImageRgba8(cropped).to_luma8();
                if let Some(detection) = detect_grid(&gray) {
                    let abs_x = x as f32 + detection.centroid_x;
                    let abs_y = y as f32 + detection.centroid_y;
                    return Ok(Some(TargetCoordinate::new(
                        abs_x as i32,
                        abs_y as i32,
                        CoordinateSource::GridDetector,
                        detection.confidence,
                    )));
                }
            }
        }

        self.model_fallback(screenshot, description).await
    }

    async fn model_fallback(&self, screenshot: &DynamicImage, description: &str) -> AgentResult<Option<TargetCoordinate>> {
        let (width, height) = screenshot.dimensions();
        let prompt = format!(
            "Locate the UI element described as \"{description}\" in this {width}x{height} screenshot. \
             Respond with exactly three lines:\nFOUND: YES/NO\nX: <pixel x>\nY: <pixel y>\nCONFIDENCE: <0-100>"
        );

        let mut png_bytes = Vec::new();
        if screenshot
            .write_to(&mut std::io::Cursor::new(&mut png_bytes), image::ImageFormat::Png)
            .is_err()
        {
            return Ok(None);
        }

        let response = match self.model.complete(&prompt, Some(&png_bytes)).await {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "model fallback failed, treating as not found");
                return Ok(None);
            }
        };

        match parse_localization_response(&response, width, height) {
            Some((x, y, confidence)) => Ok(Some(TargetCoordinate::new(x, y, CoordinateSource::Model, confidence))),
            None => Ok(None),
        }
    }

    pub async fn extract_text(&self, screenshot: &DynamicImage) -> AgentResult<Vec<TextHit>> {
        let gray = ocr::preprocess_otsu(screenshot);
        let mut hits = Vec::new();
        for psm in [PsmMode::SparseText, PsmMode::SingleBlock] {
            if let Ok(candidates) = self.ocr.recognize(&gray, psm).await {
                hits.extend(candidates.into_iter().map(|c| TextHit {
                    text: c.text,
                    x: c.x,
                    y: c.y,
                    w: c.w,
                    h: c.h,
                    confidence: c.confidence,
                }));
            }
        }
        Ok(hits)
    }

    pub async fn analyze(&self, screenshot: &DynamicImage, question: &str) -> AgentResult<SceneAnalysis> {
        let elements = self.extract_text(screenshot).await.unwrap_or_default();

        let mut png_bytes = Vec::new();
        let _ = screenshot.write_to(&mut std::io::Cursor::new(&mut png_bytes), image::ImageFormat::Png);

        let summary = self
            .model
            .complete(question, Some(&png_bytes))
            .await
            .unwrap_or_else(|e| format!("analysis unavailable: {e}"));

        Ok(SceneAnalysis { summary, elements })
    }
}

fn candidate_center(c: &OcrCandidate) -> (f64, f64) {
    (c.x as f64 + c.w as f64 / 2.0, c.y as f64 + c.h as f64 / 2.0)
}

/// Parses the strict `FOUND:/X:/Y:/CONFIDENCE:` grammar and rejects
/// out-of-bounds coordinates (SPEC_FULL.md §4.2 step 4).
fn parse_localization_response(response: &str, width: u32, height: u32) -> Option<(i32, i32, u8)> {
    let mut found = false;
    let mut x = None;
    let mut y = None;
    let mut confidence = 50u8;

    for line in response.lines() {
        let line = line.trim();
        if let Some(rest) = line.strip_prefix("FOUND:") {
            found = rest.trim().eq_ignore_ascii_case("YES");
        } else if let Some(rest) = line.strip_prefix("X:") {
            x = rest.trim().parse::<i32>().ok();
        } else if let Some(rest) = line.strip_prefix("Y:") {
            y = rest.trim().parse::<i32>().ok();
        } else if let Some(rest) = line.strip_prefix("CONFIDENCE:") {
            confidence = rest.trim().parse::<u8>().unwrap_or(50);
        }
    }

    if !found {
        return None;
    }

    let (x, y) = (x?, y?);
    if x < 0 || y < 0 || x as u32 >= width || y as u32 >= height {
        return None;
    }

    Some((x, y, confidence))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_formed_localization_response() {
        let response = "FOUND: YES\nX: 100\nY: 200\nCONFIDENCE: 80\n";
        assert_eq!(parse_localization_response(response, 1920, 1080), Some((100, 200, 80)));
    }

    #[test]
    fn rejects_out_of_bounds_coordinates() {
        let response = "FOUND: YES\nX: 5000\nY: 200\nCONFIDENCE: 80\n";
        assert_eq!(parse_localization_response(response, 1920, 1080), None);
    }

    #[test]
    fn not_found_returns_none() {
        let response = "FOUND: NO\nX: 0\nY: 0\nCONFIDENCE: 0\n";
        assert_eq!(parse_localization_response(response, 1920, 1080), None);
    }
}
