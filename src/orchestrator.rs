// src/orchestrator.rs
// module: orchestrator | role: Orchestrator (C7)
// summary: owns the single in-flight AgentState and is the crate's entire
// public use-case surface (SPEC_FULL.md §4.7): run_test, execute_command,
// send_guidance, stop/pause/resume/reset/get_status. Grounded on the teacher's
// core/application/agent_service.rs AgentAppService — a single
// `tokio::sync::RwLock<Option<Session>>` guarding one active conversation,
// generalized here to one active AgentState guarded by a one-permit
// Semaphore so a second run waits briefly instead of racing the first.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Semaphore};
use tracing::{info, warn};

use crate::config::AgentConfig;
use crate::controller::ExecutionController;
use crate::device::DeviceDriver;
use crate::domain::action::ActionKind;
use crate::domain::agent_state::{AgentState, AgentStatus};
use crate::graph::{StepGraph, DEFAULT_NODE_BUDGET};
use crate::history::HistoryRecorder;
use crate::knowledge::KnowledgeStore;
use crate::verify::Verifier;
use crate::vision::model::ModelClient;
use crate::vision::VisionResolver;

/// How long a second `run_test`/`execute_command`/`send_guidance` call waits
/// for the active run to vacate the single run slot before reporting a
/// conflict (SPEC_FULL.md §4.7: "waits up to W seconds... otherwise reports a
/// conflict").
const CONFLICT_WAIT: Duration = Duration::from_secs(15);

/// The outcome every Orchestrator entry point returns (SPEC_FULL.md §4.7).
#[derive(Debug, Clone, serde::Serialize)]
pub struct RunResult {
    pub success: bool,
    pub status: String,
    pub steps_completed: usize,
    pub total_steps: usize,
    pub errors: Vec<String>,
}

impl RunResult {
    fn from_state(state: &AgentState) -> Self {
        Self {
            success: matches!(state.status, AgentStatus::Success),
            status: status_label(state.status),
            steps_completed: state.current_step,
            total_steps: state.total_steps,
            errors: state.errors.clone(),
        }
    }

    fn rejected(message: impl Into<String>) -> Self {
        Self {
            success: false,
            status: "rejected".to_string(),
            steps_completed: 0,
            total_steps: 0,
            errors: vec![message.into()],
        }
    }

    fn conflict() -> Self {
        Self::rejected("another run is already active; try again shortly")
    }

    fn no_active_run() -> Self {
        Self::rejected("no suspended run is waiting for guidance")
    }
}

fn status_label(status: AgentStatus) -> String {
    match status {
        AgentStatus::Idle => "idle",
        AgentStatus::Running => "running",
        AgentStatus::WaitingHitl => "waiting_hitl",
        AgentStatus::Success => "success",
        AgentStatus::Failure => "failure",
        AgentStatus::Incomplete => "incomplete",
        AgentStatus::Stopped => "stopped",
    }
    .to_string()
}

/// A read-only projection of the retained state, for `get_status` — callers
/// outside the crate never see the full `AgentState`.
#[derive(Debug, Clone, serde::Serialize)]
pub struct StatusSnapshot {
    pub run_id: String,
    pub status: String,
    pub current_step: usize,
    pub total_steps: usize,
    pub waiting_for_hitl: bool,
    pub hitl_problem: Option<String>,
}

/// Rejects the multi-id shorthand the request layer sometimes forwards
/// unfiltered (SPEC_FULL.md §4.7 `run_test`: "rejects comma/semicolon-joined ids").
fn validate_single_test_id(test_id: &str) -> Result<(), String> {
    if test_id.trim().is_empty() {
        return Err("test_id must not be empty".to_string());
    }
    if test_id.contains(',') || test_id.contains(';') {
        return Err(format!("test_id must name a single test, got \"{test_id}\""));
    }
    Ok(())
}

pub struct Orchestrator {
    graph: Arc<StepGraph>,
    controller: ExecutionController,
    run_slot: Semaphore,
    retained: Mutex<Option<AgentState>>,
    node_budget: u32,
}

impl Orchestrator {
    pub fn new(
        device: Arc<DeviceDriver>,
        vision: Arc<VisionResolver>,
        verifier: Arc<Verifier>,
        knowledge: Arc<KnowledgeStore>,
        history: Arc<HistoryRecorder>,
        model: Arc<dyn ModelClient>,
        controller: ExecutionController,
        config: AgentConfig,
    ) -> Self {
        let graph = Arc::new(StepGraph::new(
            device, vision, verifier, knowledge, history, model, controller.clone(), config,
        ));
        Self {
            graph,
            controller,
            run_slot: Semaphore::new(1),
            retained: Mutex::new(None),
            node_budget: DEFAULT_NODE_BUDGET,
        }
    }

    async fn acquire_run_slot(&self) -> Result<tokio::sync::SemaphorePermit<'_>, RunResult> {
        match tokio::time::timeout(CONFLICT_WAIT, self.run_slot.acquire()).await {
            Ok(Ok(permit)) => Ok(permit),
            Ok(Err(_)) => Err(RunResult::rejected("run slot unexpectedly closed")),
            Err(_) => Err(RunResult::conflict()),
        }
    }

    pub async fn run_test(&self, test_id: &str, use_learned: bool, max_retries: u32) -> RunResult {
        if let Err(message) = validate_single_test_id(test_id) {
            return RunResult::rejected(message);
        }

        let _permit = match self.acquire_run_slot().await {
            Ok(permit) => permit,
            Err(result) => return result,
        };

        self.controller.start();
        let run_id = uuid::Uuid::new_v4().to_string();
        let mut state = AgentState::new_test(run_id.clone(), test_id, max_retries);
        state.use_learned = use_learned;

        info!(run_id = %run_id, test_id, "starting test run");
        let final_state = self.graph.run(state, self.node_budget).await;
        let result = RunResult::from_state(&final_state);
        *self.retained.lock().await = Some(final_state);
        result
    }

    pub async fn execute_command(&self, text: &str, max_retries: u32) -> RunResult {
        if text.trim().is_empty() {
            return RunResult::rejected("command text must not be empty");
        }

        let _permit = match self.acquire_run_slot().await {
            Ok(permit) => permit,
            Err(result) => return result,
        };

        self.controller.start();
        let run_id = uuid::Uuid::new_v4().to_string();
        let state = AgentState::new_standalone(run_id.clone(), text, max_retries);

        info!(run_id = %run_id, "starting standalone command run");
        let final_state = self.graph.run(state, self.node_budget).await;
        let result = RunResult::from_state(&final_state);
        *self.retained.lock().await = Some(final_state);
        result
    }

    /// Writes guidance into the retained, suspended state and re-invokes the
    /// graph; re-entry always starts at `check_resume` (SPEC_FULL.md §4.7).
    pub async fn send_guidance(
        &self,
        text: Option<String>,
        coordinate: Option<(i32, i32)>,
        action_kind: Option<ActionKind>,
    ) -> RunResult {
        let _permit = match self.acquire_run_slot().await {
            Ok(permit) => permit,
            Err(result) => return result,
        };

        let mut guard = self.retained.lock().await;
        let Some(mut state) = guard.take() else {
            return RunResult::no_active_run();
        };
        if !state.waiting_for_hitl {
            *guard = Some(state);
            return RunResult::no_active_run();
        }
        drop(guard);

        state.hitl_guidance = text;
        state.hitl_coordinate = coordinate;
        state.hitl_action_kind = action_kind;

        if !self.controller.is_active() || self.controller.is_stopped() {
            self.controller.start();
        }

        let final_state = self.graph.run(state, self.node_budget).await;
        let result = RunResult::from_state(&final_state);
        *self.retained.lock().await = Some(final_state);
        result
    }

    pub fn stop(&self) {
        self.controller.stop();
    }

    pub fn pause(&self) {
        self.controller.pause();
    }

    pub fn resume(&self) {
        self.controller.resume();
    }

    /// Drops the retained state and stops the controller, returning the
    /// Orchestrator to a state where a fresh `run_test` can start cleanly.
    pub async fn reset(&self) {
        self.controller.stop();
        *self.retained.lock().await = None;
        warn!("orchestrator state reset, any suspended run is discarded");
    }

    pub async fn get_status(&self) -> Option<StatusSnapshot> {
        let guard = self.retained.lock().await;
        guard.as_ref().map(|state| StatusSnapshot {
            run_id: state.run_id.clone(),
            status: status_label(state.status),
            current_step: state.current_step,
            total_steps: state.total_steps,
            waiting_for_hitl: state.waiting_for_hitl,
            hitl_problem: state.hitl_problem.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_multi_id_shorthand() {
        assert!(validate_single_test_id("T-001,T-002").is_err());
        assert!(validate_single_test_id("T-001;T-002").is_err());
        assert!(validate_single_test_id("T-001").is_ok());
        assert!(validate_single_test_id("  ").is_err());
    }

    #[test]
    fn status_labels_match_spec_vocabulary() {
        assert_eq!(status_label(AgentStatus::WaitingHitl), "waiting_hitl");
        assert_eq!(status_label(AgentStatus::Success), "success");
    }
}
