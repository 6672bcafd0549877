// src/graph/guards.rs
// module: graph | role: guard predicates
// summary: the pure `state -> next node` functions named in SPEC_FULL.md §4.6.
// Kept free of side effects and collaborator calls so each one is independently
// testable against a hand-built AgentState, mirroring the teacher's preference
// for small free functions over methods where no shared state is touched.

use crate::domain::action::ActionKind;
use crate::domain::agent_state::AgentState;

use super::Node;

pub fn route_by_mode(state: &AgentState) -> Node {
    use crate::domain::agent_state::AgentMode;
    match state.mode {
        AgentMode::Test => Node::RagRetrieval,
        AgentMode::Standalone => Node::ParseIntent,
        AgentMode::Idle => Node::End,
    }
}

pub fn should_use_learned(state: &AgentState) -> Node {
    if state.has_learned_solution && state.use_learned {
        Node::DirectExecute
    } else {
        Node::CaptureScreen
    }
}

pub fn route_from_planning(state: &AgentState) -> Node {
    if state.errors.last().map(|e| e.contains("no goal")).unwrap_or(false) {
        return Node::WaitHuman;
    }
    match state.action_kind {
        Some(ActionKind::PressBack) | Some(ActionKind::PressHome) | Some(ActionKind::PressEnter) => {
            Node::DirectExecute
        }
        _ => Node::Execute,
    }
}

pub fn route_after_execution(state: &AgentState) -> Node {
    if state.action_success {
        Node::Verify
    } else {
        Node::IncrementRetry
    }
}

pub fn route_after_verification(state: &AgentState) -> Node {
    match &state.verification_result {
        Some(result) if result.overall_passed => Node::Advance,
        _ => Node::IncrementRetry,
    }
}

pub fn should_retry(state: &AgentState) -> Node {
    if state.retry_count < state.max_retries {
        Node::CaptureScreen
    } else {
        Node::WaitHuman
    }
}

pub fn route_hitl_ready(state: &AgentState) -> Node {
    if state.hitl_guidance.is_some() || state.hitl_coordinate.is_some() {
        Node::ApplyGuidance
    } else {
        Node::End
    }
}

pub fn should_resume_from_hitl(state: &AgentState) -> Node {
    let guidance_present = state.hitl_guidance.is_some() || state.hitl_coordinate.is_some();
    if state.waiting_for_hitl && guidance_present && !state.hitl_applied {
        Node::ApplyGuidance
    } else {
        Node::DetectMode
    }
}

pub fn route_after_advance(state: &AgentState) -> Node {
    if state.current_step >= state.total_steps {
        Node::SaveLearned
    } else if state.has_learned_solution && state.use_learned {
        Node::DirectExecute
    } else {
        Node::CaptureScreen
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::agent_state::AgentState;

    #[test]
    fn route_from_planning_sends_direct_keys_to_direct_execute() {
        let mut state = AgentState::new_test("r", "T-001", 3);
        state.action_kind = Some(ActionKind::PressHome);
        assert_eq!(route_from_planning(&state), Node::DirectExecute);
    }

    #[test]
    fn route_from_planning_sends_no_goal_error_to_wait_human() {
        let mut state = AgentState::new_test("r", "T-001", 3);
        state.record_error("planning error: no goal");
        assert_eq!(route_from_planning(&state), Node::WaitHuman);
    }

    #[test]
    fn route_from_planning_default_is_execute() {
        let mut state = AgentState::new_test("r", "T-001", 3);
        state.action_kind = Some(ActionKind::Tap);
        assert_eq!(route_from_planning(&state), Node::Execute);
    }

    #[test]
    fn should_retry_respects_max_retries() {
        let mut state = AgentState::new_test("r", "T-001", 2);
        state.retry_count = 1;
        assert_eq!(should_retry(&state), Node::CaptureScreen);
        state.retry_count = 2;
        assert_eq!(should_retry(&state), Node::WaitHuman);
    }

    #[test]
    fn route_after_advance_routes_to_save_learned_when_done() {
        let mut state = AgentState::new_test("r", "T-001", 3);
        state.total_steps = 1;
        state.current_step = 1;
        assert_eq!(route_after_advance(&state), Node::SaveLearned);
    }

    #[test]
    fn resume_guard_only_fires_once_per_guidance() {
        let mut state = AgentState::new_test("r", "T-001", 3);
        state.waiting_for_hitl = true;
        state.hitl_guidance = Some("press home".to_string());
        assert_eq!(should_resume_from_hitl(&state), Node::ApplyGuidance);
        state.hitl_applied = true;
        assert_eq!(should_resume_from_hitl(&state), Node::DetectMode);
    }
}
