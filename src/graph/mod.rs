// src/graph/mod.rs
// module: graph | role: Step Graph (C6) — the core algorithm
// summary: a directed graph of nodes with guarded transitions implementing the
// per-step plan/execute/verify/retry/HITL loop and the outer step-iteration
// loop (SPEC_FULL.md §4.6). Grounded on the teacher's core/application/agent_loop.rs
// `match current_state { ... }` dispatch, generalized from a five-state enum
// driving itself on a timer into an explicit node graph driven by guards over
// `AgentState`, per SPEC_FULL.md §9's "cyclic re-entry into the graph -> two
// entry points but one state" design note: there is exactly one compiled
// graph, `check_resume` picks the entry edge.

mod guards;
mod nodes;

use std::sync::Arc;

use tracing::{info_span, Instrument};

use crate::config::AgentConfig;
use crate::controller::ExecutionController;
use crate::device::DeviceDriver;
use crate::domain::agent_state::AgentState;
use crate::history::HistoryRecorder;
use crate::knowledge::KnowledgeStore;
use crate::verify::Verifier;
use crate::vision::model::ModelClient;
use crate::vision::VisionResolver;

/// Every node named in SPEC_FULL.md §4.6, plus `End` standing in for the
/// graph's terminal sink (a suspend point, not necessarily a finished run).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Node {
    CheckResume,
    DetectMode,
    RagRetrieval,
    CheckLearned,
    ParseIntent,
    CaptureScreen,
    Analyze,
    PlanAction,
    DirectExecute,
    Execute,
    Verify,
    IncrementRetry,
    WaitHuman,
    ApplyGuidance,
    Advance,
    SaveLearned,
    LogResults,
    End,
}

/// Per-invocation scratch holding the in-memory byte buffers and cached
/// geometry that don't belong on the serializable, persisted `AgentState`
/// (SPEC_FULL.md §3: `current_screenshot` is a *path*, not a pixel buffer).
#[derive(Default)]
pub(crate) struct Scratch {
    pub before_png: Option<Vec<u8>>,
    pub after_png: Option<Vec<u8>>,
    pub width: u32,
    pub height: u32,
    pub step_started_at: Option<std::time::Instant>,
}

/// Default cap on node transitions per `run` invocation. SPEC_FULL.md §4.7
/// requires the Orchestrator enforce "a recursion-budget cap >= 100 node
/// transitions"; this default comfortably covers a multi-step run with a
/// full retry budget on every step while still catching a guard cycle bug.
pub const DEFAULT_NODE_BUDGET: u32 = 500;

/// Wires every collaborator the Step Graph's nodes call out to. One instance
/// is shared by every run the Orchestrator drives (SPEC_FULL.md §9 Singletons:
/// "a reference passed into components at construction").
pub struct StepGraph {
    pub(crate) device: Arc<DeviceDriver>,
    pub(crate) vision: Arc<VisionResolver>,
    pub(crate) verifier: Arc<Verifier>,
    pub(crate) knowledge: Arc<KnowledgeStore>,
    pub(crate) history: Arc<HistoryRecorder>,
    pub(crate) model: Arc<dyn ModelClient>,
    pub(crate) controller: ExecutionController,
    pub(crate) config: AgentConfig,
}

impl StepGraph {
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
        Self {
            device,
            vision,
            verifier,
            knowledge,
            history,
            model,
            controller,
            config,
        }
    }

    /// Drives `state` through the graph starting at `check_resume` until it
    /// reaches `End` (completion or suspension) or the node budget is
    /// exhausted. Never panics and never propagates an `AgentError`: every
    /// node catches its own failures into `state.errors` (SPEC_FULL.md §4.6,
    /// §7 Propagation policy).
    pub async fn run(&self, mut state: AgentState, node_budget: u32) -> AgentState {
        let mut scratch = Scratch::default();
        let mut node = Node::CheckResume;
        let mut transitions = 0u32;

        loop {
            if node == Node::End {
                break;
            }

            transitions += 1;
            if transitions > node_budget {
                state.record_error(format!("node transition budget ({node_budget}) exceeded"));
                state.status = crate::domain::agent_state::AgentStatus::Failure;
                state.should_continue = false;
                break;
            }

            if !self.controller.check_and_wait() {
                state.status = crate::domain::agent_state::AgentStatus::Stopped;
                state.should_continue = false;
                state.log("stop observed at node entry");
                break;
            }

            let span = info_span!("graph_node", node = ?node, run_id = %state.run_id, step = state.current_step);
            node = self.dispatch(node, &mut state, &mut scratch).instrument(span).await;
        }

        state
    }

    async fn dispatch(&self, node: Node, state: &mut AgentState, scratch: &mut Scratch) -> Node {
        match node {
            Node::CheckResume => self.check_resume(state),
            Node::DetectMode => self.detect_mode(state),
            Node::RagRetrieval => self.rag_retrieval(state).await,
            Node::CheckLearned => self.check_learned(state).await,
            Node::ParseIntent => self.parse_intent(state).await,
            Node::CaptureScreen => self.capture_screen(state, scratch).await,
            Node::Analyze => self.analyze(state, scratch).await,
            Node::PlanAction => self.plan_action(state, scratch).await,
            Node::DirectExecute => self.direct_execute(state, scratch).await,
            Node::Execute => self.execute(state, scratch).await,
            Node::Verify => self.verify(state, scratch).await,
            Node::IncrementRetry => self.increment_retry(state),
            Node::WaitHuman => self.wait_human(state),
            Node::ApplyGuidance => self.apply_guidance(state).await,
            Node::Advance => self.advance(state),
            Node::SaveLearned => self.save_learned(state).await,
            Node::LogResults => self.log_results(state).await,
            Node::End => Node::End,
        }
    }
}
