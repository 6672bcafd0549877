// src/domain/action.rs
// module: domain | layer: domain | role: action & coordinate types
// summary: The action vocabulary the Step Graph plans and the Device Driver executes,
// grounded on the teacher's core/domain/agent_runtime/agent_action.rs ActionType enum.

use serde::{Deserialize, Serialize};

/// The action kinds the agent can plan and the Device Driver can execute.
/// Mirrors the LearnedStep action-kind vocabulary of SPEC_FULL.md §3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Tap,
    DoubleTap,
    LongPress,
    Swipe,
    InputText,
    PressHome,
    PressBack,
    PressEnter,
    PressKey,
}

impl ActionKind {
    /// Direct-key actions bypass coordinate planning and go straight to
    /// `direct_execute` (route_from_planning guard, SPEC_FULL.md §4.6).
    pub fn is_direct(&self) -> bool {
        matches!(self, Self::PressBack | Self::PressHome | Self::PressEnter)
    }

    /// Whether this action kind requires a target coordinate to execute.
    pub fn needs_coordinate(&self) -> bool {
        matches!(
            self,
            Self::Tap | Self::DoubleTap | Self::LongPress | Self::Swipe
        )
    }
}

/// Where a resolved coordinate came from. Used for tie-breaking, auto-learn
/// gating ("coordinate_source ∉ {learned, device_profile}"), and history
/// provenance columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoordinateSource {
    /// Served from a previously learned solution's replay step.
    Learned,
    /// Served from the Device Profile's O(1) lookup (C2 step 1).
    DeviceProfile,
    /// Resolved via OCR text matching (C2 step 3).
    Ocr,
    /// Resolved via the CV grid detector (C2 step 4, launcher path).
    GridDetector,
    /// Resolved via the multimodal model (C2 step 4, fallback path).
    Model,
    /// Supplied directly by a human via `send_guidance`.
    HumanGuidance,
}

/// A resolved screen coordinate, tagged with its provenance and confidence.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TargetCoordinate {
    pub x: i32,
    pub y: i32,
    pub source: CoordinateSource,
    /// Confidence in [0, 100].
    pub confidence: u8,
}

impl TargetCoordinate {
    pub fn new(x: i32, y: i32, source: CoordinateSource, confidence: u8) -> Self {
        Self {
            x,
            y,
            source,
            confidence: confidence.min(100),
        }
    }

    /// Invariant 3 of SPEC_FULL.md §8: successful verifications whose source
    /// is neither `learned` nor `device_profile` must be auto-learned.
    pub fn should_auto_learn(&self) -> bool {
        !matches!(
            self.source,
            CoordinateSource::Learned | CoordinateSource::DeviceProfile
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direct_actions_skip_coordinates() {
        assert!(ActionKind::PressHome.is_direct());
        assert!(!ActionKind::Tap.is_direct());
        assert!(ActionKind::Tap.needs_coordinate());
        assert!(!ActionKind::PressBack.needs_coordinate());
    }

    #[test]
    fn auto_learn_gating() {
        let learned = TargetCoordinate::new(1, 1, CoordinateSource::Learned, 100);
        let ocr = TargetCoordinate::new(1, 1, CoordinateSource::Ocr, 80);
        assert!(!learned.should_auto_learn());
        assert!(ocr.should_auto_learn());
    }
}
