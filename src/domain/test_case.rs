// src/domain/test_case.rs
// module: domain | layer: domain | role: test-case entity
// summary: An immutable ordered list of natural-language steps, identified by test_id.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single natural-language step within a test case.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Step {
    /// Natural-language goal text, e.g. "Tap Settings".
    pub goal: String,
    /// Optional hint naming the reference image to verify against
    /// (without device_id prefix or .png suffix).
    pub reference_hint: Option<String>,
}

impl Step {
    pub fn new(goal: impl Into<String>) -> Self {
        Self {
            goal: goal.into(),
            reference_hint: None,
        }
    }

    pub fn with_reference(mut self, reference_hint: impl Into<String>) -> Self {
        self.reference_hint = Some(reference_hint.into());
        self
    }

    pub fn is_empty_goal(&self) -> bool {
        self.goal.trim().is_empty()
    }
}

/// An immutable test case: id, title, component tag, ordered steps.
/// Created by ingestion; never mutated after indexing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TestCase {
    pub id: String,
    pub title: String,
    pub component: String,
    pub steps: Vec<Step>,
    pub description: String,
    pub expected: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl TestCase {
    pub fn new(id: impl Into<String>, title: impl Into<String>, steps: Vec<Step>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            component: String::new(),
            steps,
            description: String::new(),
            expected: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_component(mut self, component: impl Into<String>) -> Self {
        self.component = component.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn step_count(&self) -> usize {
        self.steps.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_goal_detected() {
        let s = Step::new("   ");
        assert!(s.is_empty_goal());
        let s2 = Step::new("Tap Settings");
        assert!(!s2.is_empty_goal());
    }

    #[test]
    fn builder_sets_fields() {
        let tc = TestCase::new("T-001", "Open settings", vec![Step::new("Tap Settings")])
            .with_component("settings")
            .with_description("Opens the settings app");
        assert_eq!(tc.step_count(), 1);
        assert_eq!(tc.component, "settings");
    }
}
