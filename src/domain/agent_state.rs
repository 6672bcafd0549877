// src/domain/agent_state.rs
// module: domain | layer: domain | role: travelling state
// summary: AgentState, the value passed between Step Graph nodes (SPEC_FULL.md §3).
// Grounded on the teacher's core/domain/agent_runtime/agent_state.rs AgentRunState enum,
// generalized from a single-field run state to the full many-field travelling record
// the spec requires (mode, test identity, replay, perception, planning, outcome, HITL, log).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::action::{ActionKind, TargetCoordinate};
use super::learned_solution::LearnedSolution;
use super::test_case::Step;

/// Which kind of invocation this run is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentMode {
    Test,
    Standalone,
    Idle,
}

/// The run's externally-visible lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Idle,
    Running,
    WaitingHitl,
    Success,
    Failure,
    Incomplete,
    Stopped,
}

/// An element detected during `analyze`, independent of the planned target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectedElement {
    pub text: String,
    pub x: i32,
    pub y: i32,
    pub w: i32,
    pub h: i32,
    pub confidence: u8,
}

/// An already-executed step, accumulated for replay learning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutedStep {
    pub step_number: u32,
    pub action_kind: ActionKind,
    pub target_name: Option<String>,
    pub coordinate: Option<(i32, i32)>,
    pub text: Option<String>,
    pub success: bool,
}

/// The travelling value passed between every Step Graph node. Exclusively
/// owned by the currently-active run (SPEC_FULL.md §3 Ownership).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentState {
    // ---- Mode & lifecycle ----
    pub mode: AgentMode,
    pub status: AgentStatus,
    pub stop_requested: bool,
    pub should_continue: bool,
    /// Stamped once, at initial construction; untouched by resume re-invocations
    /// so `log_results` can compute a run's true wall-clock duration.
    pub started_at: DateTime<Utc>,

    // ---- Test identity ----
    pub run_id: String,
    pub test_id: Option<String>,
    pub test_description: Option<String>,
    pub steps: Vec<Step>,
    pub current_step: usize,
    pub total_steps: usize,

    // ---- Replay ----
    pub has_learned_solution: bool,
    pub learned_solution: Option<LearnedSolution>,
    pub use_learned: bool,

    // ---- Perception ----
    pub current_screenshot: Option<String>,
    pub screen_analysis: Option<String>,
    pub detected_elements: Vec<DetectedElement>,

    // ---- Planning ----
    pub planned_action: Option<String>,
    pub action_kind: Option<ActionKind>,
    pub target_name: Option<String>,
    pub target_coordinate: Option<TargetCoordinate>,
    pub action_parameters: serde_json::Value,

    // ---- Outcome ----
    pub last_action_result: Option<String>,
    pub action_success: bool,
    pub verification_result: Option<crate::verify::VerificationResult>,
    pub retry_count: u32,
    pub max_retries: u32,
    pub executed_steps: Vec<ExecutedStep>,

    // ---- HITL ----
    pub waiting_for_hitl: bool,
    pub hitl_problem: Option<String>,
    pub hitl_guidance: Option<String>,
    pub hitl_coordinate: Option<(i32, i32)>,
    pub hitl_action_kind: Option<ActionKind>,
    pub hitl_applied: bool,
    pub hitl_retry_pending: bool,
    pub failed_step: Option<usize>,

    // ---- Log ----
    pub execution_log: Vec<String>,
    pub errors: Vec<String>,
}

impl AgentState {
    pub fn new_test(run_id: impl Into<String>, test_id: impl Into<String>, max_retries: u32) -> Self {
        Self {
            mode: AgentMode::Test,
            status: AgentStatus::Idle,
            stop_requested: false,
            should_continue: true,
            started_at: Utc::now(),

            run_id: run_id.into(),
            test_id: Some(test_id.into()),
            test_description: None,
            steps: Vec::new(),
            current_step: 0,
            total_steps: 0,

            has_learned_solution: false,
            learned_solution: None,
            use_learned: true,

            current_screenshot: None,
            screen_analysis: None,
            detected_elements: Vec::new(),

            planned_action: None,
            action_kind: None,
            target_name: None,
            target_coordinate: None,
            action_parameters: serde_json::Value::Null,

            last_action_result: None,
            action_success: false,
            verification_result: None,
            retry_count: 0,
            max_retries,
            executed_steps: Vec::new(),

            waiting_for_hitl: false,
            hitl_problem: None,
            hitl_guidance: None,
            hitl_coordinate: None,
            hitl_action_kind: None,
            hitl_applied: false,
            hitl_retry_pending: false,
            failed_step: None,

            execution_log: Vec::new(),
            errors: Vec::new(),
        }
    }

    pub fn new_standalone(run_id: impl Into<String>, command: impl Into<String>, max_retries: u32) -> Self {
        let mut state = Self::new_test(run_id, String::new(), max_retries);
        state.mode = AgentMode::Standalone;
        state.test_id = None;
        state.test_description = Some(command.into());
        state
    }

    /// Invariant 1 of SPEC_FULL.md §8.
    pub fn is_complete(&self) -> bool {
        self.current_step >= self.total_steps
    }

    pub fn log(&mut self, message: impl Into<String>) {
        self.execution_log.push(message.into());
    }

    pub fn record_error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }

    /// Clears step-local fields on `advance`, preserving the learned-solution
    /// snapshot and use_learned flag (SPEC_FULL.md §4.6 step 5).
    pub fn clear_step_local_fields(&mut self) {
        self.planned_action = None;
        self.target_coordinate = None;
        self.action_kind = None;
        self.target_name = None;
        self.retry_count = 0;
        self.last_action_result = None;
        self.action_success = false;
        self.verification_result = None;
        self.hitl_problem = None;
        self.hitl_guidance = None;
        self.hitl_coordinate = None;
        self.hitl_action_kind = None;
        self.hitl_applied = false;
        self.detected_elements.clear();
        self.screen_analysis = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_test_state_starts_idle() {
        let state = AgentState::new_test("run-1", "T-001", 3);
        assert_eq!(state.mode, AgentMode::Test);
        assert_eq!(state.status, AgentStatus::Idle);
        assert!(!state.is_complete());
    }

    #[test]
    fn is_complete_matches_step_counters() {
        let mut state = AgentState::new_test("run-1", "T-001", 3);
        state.total_steps = 1;
        state.current_step = 1;
        assert!(state.is_complete());
    }

    #[test]
    fn clear_step_local_preserves_learned_snapshot() {
        let mut state = AgentState::new_test("run-1", "T-001", 3);
        state.has_learned_solution = true;
        state.use_learned = true;
        state.retry_count = 2;
        state.clear_step_local_fields();
        assert_eq!(state.retry_count, 0);
        assert!(state.has_learned_solution);
        assert!(state.use_learned);
    }
}
