// src/verify/mod.rs
// module: verify | role: Verifier (C3)
// summary: post-action screen verification (SPEC_FULL.md §4.3). SSIM against a
// reference image is the primary signal; pixel-diff is the fallback when no
// reference exists; a multimodal model supplies an informational-only diagnostic
// that never changes the verdict. Grounded on the teacher's layered outcome
// structs (core/domain/agent_runtime) generalized to this domain's three-signal
// shape, since the teacher has no image-comparison logic of its own to adapt.

mod ssim;

use std::path::Path;

use async_trait::async_trait;
use image::{DynamicImage, GenericImage, GenericImageView};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::controller::ExecutionController;
use crate::error::{AgentError, AgentResult};

pub use ssim::compute_ssim;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SsimOutcome {
    pub similarity: f64,
    pub threshold: f64,
    pub passed: bool,
    pub reference_found: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PixelOutcome {
    pub change_percentage: f64,
    pub changed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiOutcome {
    pub verdict: String,
    pub reasoning: String,
    pub confidence: u8,
}

/// The full result of one `verify` call (SPEC_FULL.md §4.3 Outputs).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationResult {
    pub overall_passed: bool,
    pub ssim: SsimOutcome,
    pub pixel: PixelOutcome,
    pub ai: Option<AiOutcome>,
    pub comparison_path: Option<String>,
}

/// The multimodal model's diagnostic hook: informational only, never consulted
/// for the pass/fail verdict (SPEC_FULL.md §4.3 Diagnostic).
#[async_trait]
pub trait DiagnosticModel: Send + Sync {
    async fn assess(&self, before: &[u8], after: &[u8], goal: &str) -> AgentResult<AiOutcome>;
}

/// Drives the verification diagnostic prompt from SPEC_FULL.md §6 — structured
/// text `SUCCESS: YES/NO`, `REASONING: …`, `CONFIDENCE: …` — over any
/// `ModelClient`. The after-shot is the only image attached; the before-shot
/// adds little the model can use and doubles the upload cost.
pub struct ModelDiagnostic {
    model: std::sync::Arc<dyn crate::vision::model::ModelClient>,
}

impl ModelDiagnostic {
    pub fn new(model: std::sync::Arc<dyn crate::vision::model::ModelClient>) -> Self {
        Self { model }
    }
}

#[async_trait]
impl DiagnosticModel for ModelDiagnostic {
    async fn assess(&self, _before: &[u8], after: &[u8], goal: &str) -> AgentResult<AiOutcome> {
        let prompt = format!(
            "Looking at this screenshot, did the action \"{goal}\" succeed? Respond with exactly \
             three lines:\nSUCCESS: YES/NO\nREASONING: <one sentence>\nCONFIDENCE: <0-100>"
        );
        let response = self.model.complete(&prompt, Some(after)).await?;
        Ok(parse_diagnostic_response(&response))
    }
}

fn parse_diagnostic_response(response: &str) -> AiOutcome {
    let mut verdict = "unknown".to_string();
    let mut reasoning = String::new();
    let mut confidence = 50u8;

    for line in response.lines() {
        let line = line.trim();
        if let Some(rest) = line.strip_prefix("SUCCESS:") {
            verdict = if rest.trim().eq_ignore_ascii_case("YES") {
                "yes".to_string()
            } else {
                "no".to_string()
            };
        } else if let Some(rest) = line.strip_prefix("REASONING:") {
            reasoning = rest.trim().to_string();
        } else if let Some(rest) = line.strip_prefix("CONFIDENCE:") {
            confidence = rest.trim().parse().unwrap_or(50);
        }
    }

    AiOutcome {
        verdict,
        reasoning,
        confidence,
    }
}

pub struct Verifier {
    controller: ExecutionController,
    ssim_threshold: f64,
    change_threshold_pct: f64,
    diagnostic: Option<std::sync::Arc<dyn DiagnosticModel>>,
}

impl Verifier {
    pub fn new(controller: ExecutionController, ssim_threshold: f64, change_threshold_pct: f64) -> Self {
        Self {
            controller,
            ssim_threshold,
            change_threshold_pct,
            diagnostic: None,
        }
    }

    pub fn with_diagnostic_model(mut self, model: std::sync::Arc<dyn DiagnosticModel>) -> Self {
        self.diagnostic = Some(model);
        self
    }

    /// `reference_png` is `None` when the Knowledge Store has no reference image
    /// for the current device geometry; that is not an error, it routes to the
    /// pixel-diff fallback (SPEC_FULL.md §4.3 Fallback).
    pub async fn verify(
        &self,
        before_png: &[u8],
        after_png: &[u8],
        reference_png: Option<&[u8]>,
        goal: &str,
        comparison_out_path: Option<&Path>,
    ) -> AgentResult<VerificationResult> {
        if !self.controller.check_and_wait() {
            return Err(AgentError::verification("stopped before verification"));
        }

        let before = image::load_from_memory(before_png)?;
        let after = image::load_from_memory(after_png)?;

        let (ssim, comparison_path) = match reference_png {
            Some(reference_bytes) => {
                let reference = image::load_from_memory(reference_bytes)?;
                let similarity = compute_ssim_resized(&after, &reference)?;
                let passed = similarity >= self.ssim_threshold;
                let path = comparison_out_path
                    .map(|p| write_comparison_image(&after, &reference, p))
                    .transpose()?
                    .map(|p| p.to_string_lossy().to_string());
                (
                    SsimOutcome {
                        similarity,
                        threshold: self.ssim_threshold,
                        passed,
                        reference_found: true,
                    },
                    path,
                )
            }
            None => {
                debug!("no reference image for this geometry, ssim signal undefined");
                (
                    SsimOutcome {
                        similarity: 0.0,
                        threshold: self.ssim_threshold,
                        passed: false,
                        reference_found: false,
                    },
                    None,
                )
            }
        };

        let pixel = compute_pixel_diff(&before, &after, self.change_threshold_pct)?;

        let overall_passed = if ssim.reference_found {
            ssim.passed
        } else {
            pixel.changed
        };

        if !self.controller.check_and_wait() {
            return Err(AgentError::verification("stopped before diagnostic"));
        }

        let ai = match &self.diagnostic {
            Some(model) => match model.assess(before_png, after_png, goal).await {
                Ok(outcome) => Some(outcome),
                Err(e) => {
                    warn!(error = %e, "diagnostic model failed, continuing without it");
                    None
                }
            },
            None => None,
        };

        Ok(VerificationResult {
            overall_passed,
            ssim,
            pixel,
            ai,
            comparison_path,
        })
    }
}

/// Resizes `after` to `reference`'s dimensions before computing SSIM
/// (SPEC_FULL.md §4.3 Primary signal).
fn compute_ssim_resized(after: &DynamicImage, reference: &DynamicImage) -> AgentResult<f64> {
    let (rw, rh) = reference.dimensions();
    let resized = after.resize_exact(rw, rh, image::imageops::FilterType::Lanczos3);
    let after_gray = resized.to_luma8();
    let reference_gray = reference.to_luma8();
    Ok(compute_ssim(&after_gray, &reference_gray))
}

/// Pixel passes differing by more than 30 on the gray channel beyond
/// `change_threshold_pct` percent of total pixels (SPEC_FULL.md §4.3 Fallback).
fn compute_pixel_diff(
    before: &DynamicImage,
    after: &DynamicImage,
    change_threshold_pct: f64,
) -> AgentResult<PixelOutcome> {
    let before_gray = before.to_luma8();
    let (bw, bh) = before_gray.dimensions();
    let after_gray = after
        .resize_exact(bw, bh, image::imageops::FilterType::Triangle)
        .to_luma8();

    let total = (bw as u64) * (bh as u64);
    if total == 0 {
        return Ok(PixelOutcome {
            change_percentage: 0.0,
            changed: false,
        });
    }

    let mut differing = 0u64;
    for (b, a) in before_gray.pixels().zip(after_gray.pixels()) {
        let diff = (b[0] as i32 - a[0] as i32).unsigned_abs();
        if diff > 30 {
            differing += 1;
        }
    }

    let change_percentage = (differing as f64 / total as f64) * 100.0;
    Ok(PixelOutcome {
        change_percentage,
        changed: change_percentage > change_threshold_pct,
    })
}

/// Writes a side-by-side PNG of `after` and `reference` for operator inspection.
fn write_comparison_image(
    after: &DynamicImage,
    reference: &DynamicImage,
    out_path: &Path,
) -> AgentResult<std::path::PathBuf> {
    let (aw, ah) = after.dimensions();
    let (rw, rh) = reference.dimensions();
    let height = ah.max(rh);
    let width = aw + rw;

    let mut canvas = DynamicImage::new_rgba8(width, height);
    canvas.copy_from(after, 0, 0).map_err(|e| AgentError::verification(e.to_string()))?;
    canvas
        .copy_from(reference, aw, 0)
        .map_err(|e| AgentError::verification(e.to_string()))?;

    if let Some(parent) = out_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    canvas.save(out_path).map_err(|e| AgentError::verification(e.to_string()))?;
    Ok(out_path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Rgba};

    fn solid_png(width: u32, height: u32, gray: u8) -> Vec<u8> {
        let buf: ImageBuffer<Rgba<u8>, Vec<u8>> =
            ImageBuffer::from_fn(width, height, |_, _| Rgba([gray, gray, gray, 255]));
        let mut bytes = Vec::new();
        DynamicImage::ImageRgba8(buf)
            .write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageFormat::Png)
            .unwrap();
        bytes
    }

    #[tokio::test]
    async fn no_reference_falls_back_to_pixel_diff() {
        let controller = ExecutionController::new();
        controller.start();
        let verifier = Verifier::new(controller, 0.85, 1.0);

        let before = solid_png(20, 20, 10);
        let after = solid_png(20, 20, 250);

        let result = verifier
            .verify(&before, &after, None, "open settings", None)
            .await
            .unwrap();

        assert!(!result.ssim.reference_found);
        assert!(result.pixel.changed);
        assert!(result.overall_passed);
    }

    #[tokio::test]
    async fn identical_reference_passes_ssim() {
        let controller = ExecutionController::new();
        controller.start();
        let verifier = Verifier::new(controller, 0.85, 1.0);

        let before = solid_png(20, 20, 10);
        let after = solid_png(20, 20, 128);
        let reference = after.clone();

        let result = verifier
            .verify(&before, &after, Some(&reference), "open settings", None)
            .await
            .unwrap();

        assert!(result.ssim.reference_found);
        assert!(result.ssim.passed);
        assert!(result.overall_passed);
        assert!(result.ssim.similarity > 0.99);
    }

    #[tokio::test]
    async fn dissimilar_reference_fails_ssim() {
        let controller = ExecutionController::new();
        controller.start();
        let verifier = Verifier::new(controller, 0.85, 1.0);

        let before = solid_png(20, 20, 10);
        let after = solid_png(20, 20, 0);
        let reference = solid_png(20, 20, 255);

        let result = verifier
            .verify(&before, &after, Some(&reference), "open settings", None)
            .await
            .unwrap();

        assert!(!result.ssim.passed);
        assert!(!result.overall_passed);
    }

    #[tokio::test]
    async fn stop_short_circuits_verification() {
        let controller = ExecutionController::new();
        controller.start();
        controller.stop();
        let verifier = Verifier::new(controller, 0.85, 1.0);
        let before = solid_png(4, 4, 1);
        let after = solid_png(4, 4, 2);
        let result = verifier.verify(&before, &after, None, "goal", None).await;
        assert!(result.is_err());
    }

    #[test]
    fn parses_well_formed_diagnostic_response() {
        let response = "SUCCESS: YES\nREASONING: settings screen is visible\nCONFIDENCE: 90\n";
        let outcome = parse_diagnostic_response(response);
        assert_eq!(outcome.verdict, "yes");
        assert_eq!(outcome.confidence, 90);
    }

    #[test]
    fn malformed_diagnostic_response_defaults_gracefully() {
        let outcome = parse_diagnostic_response("not the expected grammar at all");
        assert_eq!(outcome.verdict, "unknown");
        assert_eq!(outcome.confidence, 50);
    }
}
