// src/domain/history.rs
// module: domain | layer: domain | role: history entities
// summary: append-only StepRecord/RunRecord rows written by the History Recorder (C8).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::action::{ActionKind, CoordinateSource};

/// One completed step, as written by C8.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRecord {
    pub run_id: String,
    pub test_id: String,
    pub step_index: usize,
    pub goal: String,
    pub action_kind: ActionKind,
    pub target_name: Option<String>,
    pub coordinate: Option<(i32, i32)>,
    pub coordinate_source: Option<CoordinateSource>,
    pub ssim_score: Option<f64>,
    pub ssim_passed: Option<bool>,
    pub ssim_threshold: f64,
    pub reference_name: Option<String>,
    pub before_path: Option<String>,
    pub after_path: Option<String>,
    pub comparison_path: Option<String>,
    pub duration_ms: u64,
    pub status: StepStatus,
    pub error: Option<String>,
    pub used_learned: bool,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Passed,
    Failed,
}

/// Totals written when a run completes, plus the index entry for pagination.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: String,
    pub test_id: Option<String>,
    pub total_steps: usize,
    pub passed_steps: usize,
    pub failed_steps: usize,
    pub average_ssim: Option<f64>,
    pub duration_ms: u64,
    pub status: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
}

impl RunRecord {
    pub fn from_steps(
        run_id: impl Into<String>,
        test_id: Option<String>,
        steps: &[StepRecord],
        status: impl Into<String>,
        started_at: DateTime<Utc>,
    ) -> Self {
        let passed_steps = steps.iter().filter(|s| s.status == StepStatus::Passed).count();
        let failed_steps = steps.len() - passed_steps;
        let ssim_scores: Vec<f64> = steps.iter().filter_map(|s| s.ssim_score).collect();
        let average_ssim = if ssim_scores.is_empty() {
            None
        } else {
            Some(ssim_scores.iter().sum::<f64>() / ssim_scores.len() as f64)
        };
        let duration_ms: u64 = steps.iter().map(|s| s.duration_ms).sum();
        let ended_at = Utc::now();

        Self {
            run_id: run_id.into(),
            test_id,
            total_steps: steps.len(),
            passed_steps,
            failed_steps,
            average_ssim,
            duration_ms,
            status: status.into(),
            started_at,
            ended_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn passed_step(ssim: f64) -> StepRecord {
        StepRecord {
            run_id: "run-1".into(),
            test_id: "T-001".into(),
            step_index: 0,
            goal: "Tap Settings".into(),
            action_kind: ActionKind::Tap,
            target_name: Some("settings".into()),
            coordinate: Some((850, 450)),
            coordinate_source: Some(CoordinateSource::Ocr),
            ssim_score: Some(ssim),
            ssim_passed: Some(true),
            ssim_threshold: 0.85,
            reference_name: Some("settings_opened".into()),
            before_path: None,
            after_path: None,
            comparison_path: None,
            duration_ms: 500,
            status: StepStatus::Passed,
            error: None,
            used_learned: false,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn run_record_averages_ssim() {
        let steps = vec![passed_step(0.9), passed_step(0.8)];
        let rec = RunRecord::from_steps("run-1", Some("T-001".into()), &steps, "success", Utc::now());
        assert_eq!(rec.total_steps, 2);
        assert_eq!(rec.passed_steps, 2);
        assert!((rec.average_ssim.unwrap() - 0.85).abs() < 1e-9);
    }
}
