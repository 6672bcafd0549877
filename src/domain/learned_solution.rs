// src/domain/learned_solution.rs
// module: domain | layer: domain | role: learned-solution entity
// summary: A replayable trace of a previously successful run, keyed by test_id
// and device geometry (SPEC_FULL.md §3, §4.4 state machine: absent -> created -> updated).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::action::ActionKind;

/// One step of a replayable solution.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LearnedStep {
    /// 1-based step number.
    pub step_number: u32,
    pub action_kind: ActionKind,
    pub target_name: Option<String>,
    pub coordinate: Option<(i32, i32)>,
    pub text: Option<String>,
    pub success: bool,
}

impl LearnedStep {
    pub fn has_coordinate(&self) -> bool {
        self.coordinate.is_some()
    }
}

/// test_id -> ordered LearnedSteps, plus success-rate bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LearnedSolution {
    pub test_id: String,
    /// Device geometry this replay trace was captured on
    /// (invariant 4 of SPEC_FULL.md §8: replays on a different geometry must not consume it).
    pub device_id: String,
    pub steps: Vec<LearnedStep>,
    pub execution_count: u32,
    pub success_count: u32,
    pub success_rate: f64,
    pub created_at: DateTime<Utc>,
    pub last_execution: DateTime<Utc>,
}

impl LearnedSolution {
    /// `absent -> created(success_rate=1.0)` transition.
    pub fn created(
        test_id: impl Into<String>,
        device_id: impl Into<String>,
        steps: Vec<LearnedStep>,
    ) -> Self {
        let now = Utc::now();
        Self {
            test_id: test_id.into(),
            device_id: device_id.into(),
            steps,
            execution_count: 1,
            success_count: 1,
            success_rate: 1.0,
            created_at: now,
            last_execution: now,
        }
    }

    /// `created -> updated(success_rate recomputed)` transition. Always records
    /// an execution; only increments `success_count` when `succeeded`.
    pub fn record_execution(&mut self, succeeded: bool, steps: Option<Vec<LearnedStep>>) {
        self.execution_count += 1;
        if succeeded {
            self.success_count += 1;
            if let Some(steps) = steps {
                self.steps = steps;
            }
        }
        self.success_rate = if self.execution_count == 0 {
            0.0
        } else {
            (self.success_count as f64 / self.execution_count as f64).max(0.0)
        };
        self.last_execution = Utc::now();
    }

    pub fn step_at(&self, index: usize) -> Option<&LearnedStep> {
        self.steps.get(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(n: u32, x: i32, y: i32) -> LearnedStep {
        LearnedStep {
            step_number: n,
            action_kind: ActionKind::Tap,
            target_name: Some("settings".into()),
            coordinate: Some((x, y)),
            text: None,
            success: true,
        }
    }

    #[test]
    fn created_has_success_rate_one() {
        let sol = LearnedSolution::created("T-001", "device_1920x1080", vec![step(1, 850, 450)]);
        assert_eq!(sol.execution_count, 1);
        assert_eq!(sol.success_rate, 1.0);
    }

    #[test]
    fn update_recomputes_success_rate() {
        let mut sol = LearnedSolution::created("T-001", "device_1920x1080", vec![step(1, 850, 450)]);
        sol.record_execution(true, None);
        assert_eq!(sol.execution_count, 2);
        assert_eq!(sol.success_count, 2);
        assert_eq!(sol.success_rate, 1.0);

        sol.record_execution(false, None);
        assert_eq!(sol.execution_count, 3);
        assert_eq!(sol.success_count, 2);
        assert!((sol.success_rate - (2.0 / 3.0)).abs() < 1e-9);
    }

    #[test]
    fn success_rate_never_negative() {
        let mut sol = LearnedSolution::created("T-001", "device_1920x1080", vec![step(1, 0, 0)]);
        sol.execution_count = 0;
        sol.success_count = 0;
        sol.record_execution(false, None);
        assert!(sol.success_rate >= 0.0);
    }
}
