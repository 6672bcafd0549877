// src/graph/nodes.rs
// module: graph | role: node implementations
// summary: one method per node named in SPEC_FULL.md §4.6. Every method takes
// `&mut AgentState` (plus `&mut Scratch` where it touches in-memory image
// bytes) and returns the `Node` to transition to next; none of them ever
// return an `Err` — failures are written into `state.errors` and routed via
// the guards in `guards.rs`, per the graph's no-throw contract.

use std::path::{Path, PathBuf};
use std::time::Instant;

use chrono::Utc;
use regex::Regex;
use serde_json::json;

use crate::domain::action::{ActionKind, CoordinateSource, TargetCoordinate};
use crate::domain::agent_state::{AgentMode, AgentState, AgentStatus, DetectedElement, ExecutedStep};
use crate::domain::device_profile::{device_id, normalize_icon_name, CoordinateRecord};
use crate::domain::history::{RunRecord, StepRecord, StepStatus};
use crate::domain::learned_solution::LearnedStep;
use crate::error::AgentResult;
use crate::knowledge::references::ReferenceImageStore;

use super::{guards, Node, Scratch, StepGraph};

impl StepGraph {
    pub(crate) fn check_resume(&self, state: &mut AgentState) -> Node {
        guards::should_resume_from_hitl(state)
    }

    pub(crate) fn detect_mode(&self, state: &mut AgentState) -> Node {
        state.status = AgentStatus::Running;
        guards::route_by_mode(state)
    }

    pub(crate) async fn rag_retrieval(&self, state: &mut AgentState) -> Node {
        if state.current_step == 0 && state.action_parameters.get("rag_candidates").is_none() {
            let query = state
                .test_description
                .clone()
                .filter(|d| !d.trim().is_empty())
                .or_else(|| state.steps.first().map(|s| s.goal.clone()))
                .unwrap_or_default();

            if !query.trim().is_empty() {
                match self.knowledge.test_cases.semantic_search(&query, 5).await {
                    Ok(hits) => {
                        let candidates: Vec<_> = hits
                            .iter()
                            .map(|(case, score)| json!({"test_id": case.id, "title": case.title, "score": score}))
                            .collect();
                        if !state.action_parameters.is_object() {
                            state.action_parameters = json!({});
                        }
                        state.action_parameters["rag_candidates"] = json!(candidates);
                    }
                    Err(e) => state.log(format!("rag retrieval skipped: {e}")),
                }
            }
        }
        Node::CheckLearned
    }

    pub(crate) async fn check_learned(&self, state: &mut AgentState) -> Node {
        if state.use_learned {
            if let Some(test_id) = state.test_id.clone() {
                if let Some(solution) = self.knowledge.learned_solutions.get(&test_id) {
                    let (w, h) = self.device.screen_dimensions().await;
                    if solution.device_id == device_id(w, h) {
                        state.has_learned_solution = true;
                        state.learned_solution = Some(solution);
                    } else {
                        state.log("learned solution exists for a different device geometry, ignoring");
                    }
                }
            }
        }
        guards::should_use_learned(state)
    }

    pub(crate) async fn parse_intent(&self, state: &mut AgentState) -> Node {
        let command = state.test_description.clone().unwrap_or_default();
        let prompt = format!(
            "Split this free-text instruction into an ordered list of UI test steps. \
             Respond as JSON: {{\"intent\": <string>, \"number_of_steps\": <int>, \
             \"steps\": [<string>, ...], \"initial_action\": <string>}}. Instruction: \"{command}\""
        );

        match self.model.complete(&prompt, None).await {
            Ok(response) => match parse_intent_json(&response) {
                Some(steps) if !steps.is_empty() => {
                    state.total_steps = steps.len();
                    state.steps = steps
                        .into_iter()
                        .map(crate::domain::test_case::Step::new)
                        .collect();
                    Node::CheckLearned
                }
                _ => {
                    state.record_error("planning error: no goal — unparseable intent split");
                    Node::WaitHuman
                }
            },
            Err(e) => {
                state.record_error(format!("planning error: intent split failed: {e}"));
                Node::WaitHuman
            }
        }
    }

    pub(crate) async fn capture_screen(&self, state: &mut AgentState, scratch: &mut Scratch) -> Node {
        self.mark_step_start(scratch);

        match self.device.screenshot().await {
            Ok((bytes, w, h)) => {
                scratch.width = w;
                scratch.height = h;
                let path = self.screenshot_path(&state.run_id, state.current_step, "before");
                if let Ok(path_str) = self.persist_png(&bytes, &path) {
                    state.current_screenshot = Some(path_str);
                }
                scratch.before_png = Some(bytes);
                Node::Analyze
            }
            Err(e) => {
                state.record_error(format!("transport error: {e}"));
                state.action_success = false;
                Node::IncrementRetry
            }
        }
    }

    pub(crate) async fn analyze(&self, state: &mut AgentState, scratch: &mut Scratch) -> Node {
        let goal = current_goal(state);
        let Some(before_png) = scratch.before_png.as_ref() else {
            state.record_error("internal error: analyze invoked without a captured screenshot");
            return Node::IncrementRetry;
        };

        let image = match image::load_from_memory(before_png) {
            Ok(img) => img,
            Err(e) => {
                state.record_error(format!("perception error: {e}"));
                return Node::IncrementRetry;
            }
        };

        let question = format!("Describe the current screen in relation to the goal: \"{goal}\"");
        match self.vision.analyze(&image, &question).await {
            Ok(scene) => {
                state.screen_analysis = Some(scene.summary);
                state.detected_elements = scene
                    .elements
                    .into_iter()
                    .map(|hit| DetectedElement {
                        text: hit.text,
                        x: hit.x,
                        y: hit.y,
                        w: hit.w,
                        h: hit.h,
                        confidence: hit.confidence,
                    })
                    .collect();
            }
            Err(e) => state.log(format!("scene analysis unavailable: {e}")),
        }
        Node::PlanAction
    }

    pub(crate) async fn plan_action(&self, state: &mut AgentState, scratch: &mut Scratch) -> Node {
        let step = match state.steps.get(state.current_step).cloned() {
            Some(step) => step,
            None => {
                state.record_error("planning error: no goal — step index out of range");
                return guards::route_from_planning(state);
            }
        };

        if step.is_empty_goal() {
            state.record_error("planning error: no goal");
            return guards::route_from_planning(state);
        }

        let action_kind = infer_action_kind(&step.goal);
        state.planned_action = Some(step.goal.clone());
        state.action_kind = Some(action_kind);

        if action_kind == ActionKind::InputText {
            let text = extract_input_text(&step.goal);
            if !state.action_parameters.is_object() {
                state.action_parameters = json!({});
            }
            state.action_parameters["input_text"] = json!(text);
            state.target_coordinate = None;
            return guards::route_from_planning(state);
        }

        if !action_kind.needs_coordinate() {
            state.target_coordinate = None;
            return guards::route_from_planning(state);
        }

        let target_name = self.extract_target_name(&step.goal).await;
        state.target_name = Some(target_name.clone());

        let Some(before_png) = scratch.before_png.as_ref() else {
            state.record_error("internal error: plan_action invoked without a captured screenshot");
            return guards::route_from_planning(state);
        };

        let image = match image::load_from_memory(before_png) {
            Ok(img) => img,
            Err(e) => {
                state.record_error(format!("perception error: {e}"));
                return guards::route_from_planning(state);
            }
        };

        let profile = self
            .knowledge
            .device_profiles
            .load_or_create(scratch.width, scratch.height)
            .ok();

        match self.vision.find_element(&image, &target_name, profile.as_ref()).await {
            Ok(Some(coordinate)) => state.target_coordinate = Some(coordinate),
            Ok(None) => {
                state.target_coordinate = None;
                state.record_error(format!("perception error: could not locate \"{target_name}\""));
            }
            Err(e) => {
                state.target_coordinate = None;
                state.record_error(format!("perception error: {e}"));
            }
        }

        guards::route_from_planning(state)
    }

    pub(crate) async fn direct_execute(&self, state: &mut AgentState, scratch: &mut Scratch) -> Node {
        self.mark_step_start(scratch);

        let is_replay = state.action_kind.is_none() && state.has_learned_solution && state.use_learned;
        if !is_replay {
            if let Err(e) = self.ensure_before_shot(scratch).await {
                state.record_error(format!("transport error: {e}"));
                state.action_success = false;
                return guards::route_after_execution(state);
            }
            self.perform_action(state, scratch).await;
            return guards::route_after_execution(state);
        }

        let learned_step = state
            .learned_solution
            .as_ref()
            .and_then(|sol| sol.step_at(state.current_step).cloned());

        let Some(learned_step) = learned_step else {
            state.use_learned = false;
            state.log(format!("no learned step at index {}, falling back to live capture", state.current_step));
            return Node::CaptureScreen;
        };

        if !learned_step.action_kind.needs_coordinate() {
            state.action_kind = Some(learned_step.action_kind);
            state.target_name = learned_step.target_name.clone();
            state.target_coordinate = None;
        } else {
            let mut coordinate = learned_step.coordinate;
            if coordinate.is_none() {
                coordinate = self.resolve_from_profile(&learned_step, scratch).await;
            }
            match coordinate {
                Some((x, y)) => {
                    state.action_kind = Some(learned_step.action_kind);
                    state.target_name = learned_step.target_name.clone();
                    state.target_coordinate = Some(TargetCoordinate::new(x, y, CoordinateSource::Learned, 100));
                }
                None => {
                    state.use_learned = false;
                    state.log(format!(
                        "learned step {} has no usable coordinate, falling back to live capture",
                        state.current_step
                    ));
                    return Node::CaptureScreen;
                }
            }
        }

        if let Err(e) = self.ensure_before_shot(scratch).await {
            state.record_error(format!("transport error: {e}"));
            state.action_success = false;
            return guards::route_after_execution(state);
        }
        self.perform_action(state, scratch).await;
        guards::route_after_execution(state)
    }

    pub(crate) async fn execute(&self, state: &mut AgentState, scratch: &mut Scratch) -> Node {
        self.mark_step_start(scratch);

        if let Err(e) = self.ensure_before_shot(scratch).await {
            state.record_error(format!("transport error: {e}"));
            state.action_success = false;
            return guards::route_after_execution(state);
        }

        let kind = state.action_kind.unwrap_or(ActionKind::Tap);
        if kind.needs_coordinate() && state.target_coordinate.is_none() {
            state.record_error("planning error: action-planning failure, missing coordinate");
            state.action_success = false;
        } else {
            self.perform_action(state, scratch).await;
        }

        guards::route_after_execution(state)
    }

    pub(crate) async fn verify(&self, state: &mut AgentState, scratch: &mut Scratch) -> Node {
        if !self.controller.check_and_wait() {
            state.status = AgentStatus::Stopped;
            state.should_continue = false;
            return Node::End;
        }

        tokio::time::sleep(std::time::Duration::from_secs(1)).await;

        let after_bytes = match self.device.screenshot().await {
            Ok((bytes, w, h)) => {
                scratch.width = w;
                scratch.height = h;
                bytes
            }
            Err(e) => {
                state.record_error(format!("verification error: could not capture after-shot: {e}"));
                return Node::IncrementRetry;
            }
        };
        scratch.after_png = Some(after_bytes.clone());

        let Some(before_bytes) = scratch.before_png.clone() else {
            state.record_error("internal error: verify invoked without a before-shot");
            return Node::IncrementRetry;
        };

        let goal = current_goal(state);
        let reference_name = state
            .steps
            .get(state.current_step)
            .and_then(|s| s.reference_hint.clone())
            .unwrap_or_else(|| {
                let name = state.target_name.clone().unwrap_or_else(|| goal.clone());
                ReferenceImageStore::derive_name(&name)
            });
        let reference_png = self.knowledge.references.get(scratch.width, scratch.height, &reference_name);

        let comparison_path = self
            .config
            .verification_comparisons_dir()
            .join(format!("comparison_{}.png", Utc::now().format("%Y%m%d_%H%M%S")));

        let result = self
            .verifier
            .verify(&before_bytes, &after_bytes, reference_png.as_deref(), &goal, Some(&comparison_path))
            .await;

        let duration_ms = scratch
            .step_started_at
            .map(|t| t.elapsed().as_millis() as u64)
            .unwrap_or(0);

        let result = match result {
            Ok(result) => result,
            Err(e) => {
                state.record_error(format!("verification error: {e}"));
                self.write_step_record(state, scratch, None, duration_ms, &reference_name);
                return Node::IncrementRetry;
            }
        };

        if result.overall_passed {
            if let Some(coordinate) = state.target_coordinate {
                if coordinate.should_auto_learn() {
                    let normalized = normalize_icon_name(state.target_name.as_deref().unwrap_or(&goal));
                    let record = CoordinateRecord::new(coordinate.x, coordinate.y, coordinate.source);
                    if let Err(e) = self
                        .knowledge
                        .device_profiles
                        .upsert_coordinate(scratch.width, scratch.height, &normalized, record)
                    {
                        state.log(format!("failed to auto-learn coordinate: {e}"));
                    }
                }
            }
        }

        state.verification_result = Some(result.clone());
        self.write_step_record(state, scratch, Some(&result), duration_ms, &reference_name);

        guards::route_after_verification(state)
    }

    pub(crate) fn increment_retry(&self, state: &mut AgentState) -> Node {
        state.retry_count += 1;
        guards::should_retry(state)
    }

    pub(crate) fn wait_human(&self, state: &mut AgentState) -> Node {
        state.waiting_for_hitl = true;
        state.failed_step = Some(state.current_step);
        state.status = AgentStatus::WaitingHitl;
        guards::route_hitl_ready(state)
    }

    pub(crate) async fn apply_guidance(&self, state: &mut AgentState) -> Node {
        if let Some((x, y)) = state.hitl_coordinate {
            state.target_coordinate = Some(TargetCoordinate::new(x, y, CoordinateSource::HumanGuidance, 100));
            state.action_kind = Some(state.hitl_action_kind.unwrap_or(ActionKind::Tap));
        } else if let Some(text) = state.hitl_guidance.clone() {
            if let Some((x, y)) = parse_coordinate_from_text(&text) {
                state.target_coordinate = Some(TargetCoordinate::new(x, y, CoordinateSource::HumanGuidance, 100));
                state.action_kind = Some(state.hitl_action_kind.unwrap_or(ActionKind::Tap));
            } else {
                self.interpret_guidance_via_model(state, &text).await;
            }
        } else {
            state.record_error("internal error: apply_guidance invoked with no guidance present");
        }

        state.waiting_for_hitl = false;
        state.hitl_applied = true;
        state.hitl_guidance = None;
        state.hitl_coordinate = None;
        state.hitl_action_kind = None;
        state.hitl_problem = None;
        state.status = AgentStatus::Running;

        Node::Execute
    }

    pub(crate) fn advance(&self, state: &mut AgentState) -> Node {
        let executed = ExecutedStep {
            step_number: state.current_step as u32 + 1,
            action_kind: state.action_kind.unwrap_or(ActionKind::Tap),
            target_name: state.target_name.clone(),
            coordinate: state.target_coordinate.map(|c| (c.x, c.y)),
            text: state
                .action_parameters
                .get("input_text")
                .and_then(|v| v.as_str())
                .map(String::from),
            success: state.action_success,
        };
        state.executed_steps.push(executed);

        if state.hitl_retry_pending {
            state.hitl_retry_pending = false;
            state.clear_step_local_fields();
        } else {
            state.current_step += 1;
            state.clear_step_local_fields();
        }

        guards::route_after_advance(state)
    }

    pub(crate) async fn save_learned(&self, state: &mut AgentState) -> Node {
        let run_succeeded = state.mode == AgentMode::Test && state.errors.is_empty() && !state.executed_steps.is_empty();

        if run_succeeded {
            if let Some(test_id) = state.test_id.clone() {
                let (w, h) = self.device.screen_dimensions().await;
                let geometry_id = device_id(w, h);
                let steps: Vec<LearnedStep> = state
                    .executed_steps
                    .iter()
                    .map(|e| LearnedStep {
                        step_number: e.step_number,
                        action_kind: e.action_kind,
                        target_name: e.target_name.clone(),
                        coordinate: e.coordinate,
                        text: e.text.clone(),
                        success: e.success,
                    })
                    .collect();
                // `route_after_verification` only reaches `Advance` (and so only
                // ever pushes an `ExecutedStep`) on a passed verification, so this
                // is true by construction along every path that reaches
                // `save_learned` today. Computed explicitly anyway, rather than
                // hard-coding `true`, so `record_execution`'s success-rate
                // bookkeeping stays correct if the graph ever grows a path that
                // advances past a step it doesn't consider fully successful.
                let succeeded = state.executed_steps.iter().all(|s| s.success);

                if let Err(e) = self
                    .knowledge
                    .learned_solutions
                    .record_execution(&test_id, &geometry_id, succeeded, Some(steps))
                {
                    state.log(format!("failed to persist learned solution: {e}"));
                }
            }
        }

        Node::LogResults
    }

    pub(crate) async fn log_results(&self, state: &mut AgentState) -> Node {
        state.status = if !state.errors.is_empty() {
            AgentStatus::Failure
        } else if state.is_complete() {
            AgentStatus::Success
        } else {
            AgentStatus::Incomplete
        };
        state.should_continue = false;

        let status_label = match state.status {
            AgentStatus::Success => "success",
            AgentStatus::Failure => "failure",
            AgentStatus::Incomplete => "incomplete",
            AgentStatus::WaitingHitl => "waiting_hitl",
            AgentStatus::Stopped => "stopped",
            _ => "unknown",
        };

        if let Ok(steps) = self.history.get_run_steps(&state.run_id) {
            let run = RunRecord::from_steps(
                state.run_id.clone(),
                state.test_id.clone(),
                &steps,
                status_label,
                state.started_at,
            );
            if let Err(e) = self.history.record_run(run) {
                state.log(format!("failed to write run summary: {e}"));
            }
        }

        Node::End
    }
}

// ---- shared helpers ----

impl StepGraph {
    fn mark_step_start(&self, scratch: &mut Scratch) {
        scratch.step_started_at = Some(Instant::now());
        scratch.before_png = None;
        scratch.after_png = None;
    }

    async fn ensure_before_shot(&self, scratch: &mut Scratch) -> AgentResult<()> {
        if scratch.before_png.is_none() {
            let (bytes, w, h) = self.device.screenshot().await?;
            scratch.width = w;
            scratch.height = h;
            scratch.before_png = Some(bytes);
        }
        Ok(())
    }

    async fn perform_action(&self, state: &mut AgentState, scratch: &Scratch) -> bool {
        let kind = state.action_kind.unwrap_or(ActionKind::Tap);

        let outcome = match kind {
            ActionKind::Tap => match state.target_coordinate {
                Some(c) => self.device.tap(c.x, c.y).await,
                None => return fail_missing_coordinate(state),
            },
            ActionKind::DoubleTap => match state.target_coordinate {
                Some(c) => self.device.double_tap(c.x, c.y, 300).await,
                None => return fail_missing_coordinate(state),
            },
            ActionKind::LongPress => match state.target_coordinate {
                Some(c) => self.device.long_press(c.x, c.y, 800).await,
                None => return fail_missing_coordinate(state),
            },
            ActionKind::Swipe => match state.target_coordinate {
                Some(c) => {
                    let (cx, cy) = (scratch.width as i32 / 2, scratch.height as i32 / 2);
                    self.device.swipe(c.x, c.y, cx, cy, 300).await
                }
                None => return fail_missing_coordinate(state),
            },
            ActionKind::InputText => {
                let text = state
                    .action_parameters
                    .get("input_text")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string();
                self.device.input_text(&text).await
            }
            ActionKind::PressHome => self.device.press_home().await,
            ActionKind::PressBack => self.device.press_back().await,
            ActionKind::PressEnter => self.device.press_enter().await,
            ActionKind::PressKey => self.device.press_key(crate::device::KeyCode::Menu).await,
        };

        state.last_action_result = outcome.output.clone().or_else(|| outcome.error.clone());
        state.action_success = outcome.success;
        outcome.success
    }

    async fn resolve_from_profile(&self, learned_step: &LearnedStep, scratch: &Scratch) -> Option<(i32, i32)> {
        let target = learned_step.target_name.as_ref()?;
        let (w, h) = if scratch.width > 0 && scratch.height > 0 {
            (scratch.width, scratch.height)
        } else {
            self.device.screen_dimensions().await
        };
        let profile = self.knowledge.device_profiles.load_or_create(w, h).ok()?;
        let normalized = normalize_icon_name(target);
        profile.get_fuzzy(&normalized).map(|(_, record)| (record.x, record.y))
    }

    async fn extract_target_name(&self, goal: &str) -> String {
        let prompt = format!(
            "Extract a 1-2 word noun phrase naming the UI element to interact with in this instruction. \
             Respond with only the phrase, no punctuation. Instruction: \"{goal}\""
        );
        match self.model.complete(&prompt, None).await {
            Ok(response) => {
                let trimmed = response.trim().trim_matches('"').to_string();
                if trimmed.is_empty() || trimmed.split_whitespace().count() > 4 {
                    fallback_target_name(goal)
                } else {
                    trimmed
                }
            }
            Err(_) => fallback_target_name(goal),
        }
    }

    async fn interpret_guidance_via_model(&self, state: &mut AgentState, text: &str) {
        let prompt = format!(
            "Interpret this human guidance for a stuck UI test step. Respond as JSON: \
             {{\"action_type\": <tap|double_tap|long_press|swipe|input_text|press_home|press_back|press_enter>, \
             \"target_element\": <string|null>, \"then_retry\": <bool>, \"reasoning\": <string>}}. \
             Guidance: \"{text}\""
        );

        match self.model.complete(&prompt, None).await {
            Ok(response) => match parse_guidance_json(&response) {
                Some(parsed) => {
                    state.action_kind = Some(parsed.action_kind);
                    state.target_name = parsed.target_name;
                    if parsed.then_retry {
                        if let Some(failed_step) = state.failed_step {
                            state.current_step = failed_step;
                        }
                        state.hitl_retry_pending = true;
                        state.retry_count = 0;
                    }
                }
                None => {
                    state.record_error("planning error: unparseable guidance interpretation");
                    state.action_kind = Some(ActionKind::Tap);
                }
            },
            Err(e) => {
                state.record_error(format!("planning error: guidance interpretation failed: {e}"));
                state.action_kind = Some(ActionKind::Tap);
            }
        }
    }

    fn screenshot_path(&self, run_id: &str, step: usize, suffix: &str) -> PathBuf {
        self.config.screenshots_dir().join(format!("{run_id}_{step}_{suffix}.png"))
    }

    fn persist_png(&self, bytes: &[u8], path: &Path) -> AgentResult<String> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, bytes)?;
        Ok(path.to_string_lossy().to_string())
    }

    fn write_step_record(
        &self,
        state: &AgentState,
        scratch: &Scratch,
        result: Option<&crate::verify::VerificationResult>,
        duration_ms: u64,
        reference_name: &str,
    ) {
        let after_path = scratch
            .after_png
            .as_ref()
            .and_then(|bytes| {
                let path = self.screenshot_path(&state.run_id, state.current_step, "after");
                self.persist_png(bytes, &path).ok()
            });

        let record = StepRecord {
            run_id: state.run_id.clone(),
            test_id: state.test_id.clone().unwrap_or_default(),
            step_index: state.current_step,
            goal: current_goal(state),
            action_kind: state.action_kind.unwrap_or(ActionKind::Tap),
            target_name: state.target_name.clone(),
            coordinate: state.target_coordinate.map(|c| (c.x, c.y)),
            coordinate_source: state.target_coordinate.map(|c| c.source),
            ssim_score: result.map(|r| r.ssim.similarity),
            ssim_passed: result.map(|r| r.ssim.passed),
            ssim_threshold: result.map(|r| r.ssim.threshold).unwrap_or(self.config_ssim_threshold()),
            reference_name: result.filter(|r| r.ssim.reference_found).map(|_| reference_name.to_string()),
            before_path: state.current_screenshot.clone(),
            after_path,
            comparison_path: result.and_then(|r| r.comparison_path.clone()),
            duration_ms,
            status: if result.map(|r| r.overall_passed).unwrap_or(false) {
                StepStatus::Passed
            } else {
                StepStatus::Failed
            },
            error: state.errors.last().cloned(),
            used_learned: state.use_learned && state.has_learned_solution,
            timestamp: Utc::now(),
        };

        if let Err(e) = self.history.record_step(record) {
            tracing::warn!(error = %e, "failed to record step history");
        }
    }

    fn config_ssim_threshold(&self) -> f64 {
        self.config.ssim_threshold
    }
}

fn fail_missing_coordinate(state: &mut AgentState) -> crate::device::ActionOutcome {
    state.record_error("planning error: action-planning failure, missing coordinate at execution time");
    crate::device::ActionOutcome {
        success: false,
        output: None,
        error: Some("missing coordinate".to_string()),
        duration_ms: 0,
    }
}

fn current_goal(state: &AgentState) -> String {
    state
        .steps
        .get(state.current_step)
        .map(|s| s.goal.clone())
        .unwrap_or_default()
}

fn fallback_target_name(goal: &str) -> String {
    goal.split_whitespace().rev().take(2).collect::<Vec<_>>().into_iter().rev().collect::<Vec<_>>().join(" ")
}

/// Heuristic action-kind inference from a step's natural-language goal text.
/// Grounded on the original_source planning prompts' keyword vocabulary,
/// expressed as a plain match instead of a model round-trip since the
/// vocabulary it recognizes is small and closed.
fn infer_action_kind(goal: &str) -> ActionKind {
    let g = goal.to_lowercase();
    if g.contains("press home") || g.contains("go home") || g.contains("go to home") {
        ActionKind::PressHome
    } else if g.contains("press back") || g.contains("go back") || g.contains("navigate back") {
        ActionKind::PressBack
    } else if g.contains("press enter") || g.contains("submit") {
        ActionKind::PressEnter
    } else if g.starts_with("type ") || g.starts_with("enter ") || g.contains("input text") {
        ActionKind::InputText
    } else if g.contains("double tap") || g.contains("double-tap") {
        ActionKind::DoubleTap
    } else if g.contains("long press") || g.contains("long-press") || g.contains("hold ") {
        ActionKind::LongPress
    } else if g.contains("swipe") {
        ActionKind::Swipe
    } else {
        ActionKind::Tap
    }
}

fn extract_input_text(goal: &str) -> String {
    let g = goal.trim();
    for prefix in ["type ", "enter ", "input text "] {
        if let Some(rest) = g.to_lowercase().strip_prefix(prefix).map(|_| &g[prefix.len()..]) {
            return rest.trim().trim_matches('"').to_string();
        }
    }
    g.to_string()
}

/// Recognizes `"click at X,Y"`, `"(X, Y)"`, and `"x=… y=…"` guidance text,
/// tried in that order (SPEC_FULL.md §4.6 `apply_guidance` policy).
fn parse_coordinate_from_text(text: &str) -> Option<(i32, i32)> {
    let click_at = Regex::new(r"(?i)click at\s*\(?\s*(-?\d+)\s*,\s*(-?\d+)\s*\)?").ok()?;
    if let Some(caps) = click_at.captures(text) {
        return Some((caps[1].parse().ok()?, caps[2].parse().ok()?));
    }

    let parens = Regex::new(r"\(\s*(-?\d+)\s*,\s*(-?\d+)\s*\)").ok()?;
    if let Some(caps) = parens.captures(text) {
        return Some((caps[1].parse().ok()?, caps[2].parse().ok()?));
    }

    let xy_eq = Regex::new(r"(?i)x\s*=\s*(-?\d+)[,\s]+y\s*=\s*(-?\d+)").ok()?;
    if let Some(caps) = xy_eq.captures(text) {
        return Some((caps[1].parse().ok()?, caps[2].parse().ok()?));
    }

    None
}

struct GuidanceInterpretation {
    action_kind: ActionKind,
    target_name: Option<String>,
    then_retry: bool,
}

fn parse_action_kind_str(s: &str) -> ActionKind {
    match s.to_lowercase().as_str() {
        "double_tap" | "double-tap" => ActionKind::DoubleTap,
        "long_press" | "long-press" => ActionKind::LongPress,
        "swipe" => ActionKind::Swipe,
        "input_text" | "type" => ActionKind::InputText,
        "press_home" | "home" => ActionKind::PressHome,
        "press_back" | "back" => ActionKind::PressBack,
        "press_enter" | "enter" => ActionKind::PressEnter,
        "press_key" | "key" => ActionKind::PressKey,
        _ => ActionKind::Tap,
    }
}

fn parse_guidance_json(response: &str) -> Option<GuidanceInterpretation> {
    let value = extract_json_object(response)?;
    let action_kind = value.get("action_type")?.as_str().map(parse_action_kind_str)?;
    let target_name = value.get("target_element").and_then(|v| v.as_str()).map(String::from);
    let then_retry = value.get("then_retry").and_then(|v| v.as_bool()).unwrap_or(false);
    Some(GuidanceInterpretation { action_kind, target_name, then_retry })
}

fn parse_intent_json(response: &str) -> Option<Vec<String>> {
    let value = extract_json_object(response)?;
    value.get("steps")?.as_array().map(|arr| {
        arr.iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .filter(|s| !s.trim().is_empty())
            .collect()
    })
}

/// Models occasionally wrap JSON in prose or code fences; take the first
/// balanced-looking `{...}` span and parse that.
fn extract_json_object(response: &str) -> Option<serde_json::Value> {
    if let Ok(v) = serde_json::from_str::<serde_json::Value>(response.trim()) {
        return Some(v);
    }
    let start = response.find('{')?;
    let end = response.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&response[start..=end]).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn infers_direct_key_actions() {
        assert_eq!(infer_action_kind("Press Home to return"), ActionKind::PressHome);
        assert_eq!(infer_action_kind("Go back to the previous screen"), ActionKind::PressBack);
        assert_eq!(infer_action_kind("Tap Settings"), ActionKind::Tap);
    }

    #[test]
    fn extracts_typed_text() {
        assert_eq!(extract_input_text("Type hello world"), "hello world");
        assert_eq!(extract_input_text("Enter \"search query\""), "search query");
    }

    #[test]
    fn parses_click_at_coordinates() {
        assert_eq!(parse_coordinate_from_text("please click at 100, 200"), Some((100, 200)));
        assert_eq!(parse_coordinate_from_text("try (50, 75)"), Some((50, 75)));
        assert_eq!(parse_coordinate_from_text("tap x=10 y=20"), Some((10, 20)));
        assert_eq!(parse_coordinate_from_text("no coordinate here"), None);
    }

    #[test]
    fn parses_guidance_json_from_fenced_response() {
        let response = "```json\n{\"action_type\": \"press_home\", \"target_element\": null, \"then_retry\": true, \"reasoning\": \"stuck\"}\n```";
        let parsed = parse_guidance_json(response).expect("should parse");
        assert_eq!(parsed.action_kind, ActionKind::PressHome);
        assert!(parsed.then_retry);
    }

    #[test]
    fn parses_intent_split_response() {
        let response = "{\"intent\": \"open media\", \"number_of_steps\": 2, \"steps\": [\"open app launcher\", \"tap Media\"], \"initial_action\": \"tap\"}";
        let steps = parse_intent_json(response).expect("should parse");
        assert_eq!(steps, vec!["open app launcher".to_string(), "tap Media".to_string()]);
    }
}
