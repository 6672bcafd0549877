// src/knowledge/learned_solutions.rs
// module: knowledge | role: learned-solution corpus
// summary: keyed by test_id; upsert atomically recomputes success_rate
// (SPEC_FULL.md §4.4 Learned solutions, state machine absent -> created -> updated).

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::domain::learned_solution::{LearnedSolution, LearnedStep};
use crate::error::AgentResult;

use super::atomic::{read_json, write_json_atomic};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StoreFile {
    solutions: HashMap<String, LearnedSolution>,
}

pub struct LearnedSolutionStore {
    path: PathBuf,
    state: RwLock<StoreFile>,
}

impl LearnedSolutionStore {
    pub fn load(base_dir: &Path) -> AgentResult<Self> {
        let path = base_dir.join("learned_solutions.json");
        let state = read_json(&path)?.unwrap_or_default();
        Ok(Self {
            path,
            state: RwLock::new(state),
        })
    }

    pub fn get(&self, test_id: &str) -> Option<LearnedSolution> {
        self.state.read().solutions.get(test_id).cloned()
    }

    /// `absent -> created(success_rate=1.0)` on the first call for `test_id`;
    /// `created -> updated(success_rate recomputed)` on every subsequent call.
    pub fn record_execution(
        &self,
        test_id: &str,
        device_id: &str,
        succeeded: bool,
        steps: Option<Vec<LearnedStep>>,
    ) -> AgentResult<LearnedSolution> {
        let updated = {
            let mut state = self.state.write();
            if let Some(existing) = state.solutions.get_mut(test_id) {
                existing.record_execution(succeeded, steps);
                existing.clone()
            } else {
                let created = LearnedSolution::created(test_id, device_id, steps.unwrap_or_default());
                state.solutions.insert(test_id.to_string(), created.clone());
                created
            }
        };

        self.flush()?;
        Ok(updated)
    }

    pub fn delete(&self, test_id: &str) -> AgentResult<bool> {
        let removed = self.state.write().solutions.remove(test_id).is_some();
        self.flush()?;
        Ok(removed)
    }

    fn flush(&self) -> AgentResult<()> {
        let snapshot = self.state.read().clone();
        write_json_atomic(&self.path, &snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::action::ActionKind;

    fn step() -> LearnedStep {
        LearnedStep {
            step_number: 1,
            action_kind: ActionKind::Tap,
            target_name: Some("settings".into()),
            coordinate: Some((10, 20)),
            text: None,
            success: true,
        }
    }

    #[test]
    fn first_execution_creates_with_full_success_rate() {
        let dir = tempfile::tempdir().unwrap();
        let store = LearnedSolutionStore::load(dir.path()).unwrap();
        let solution = store
            .record_execution("T-001", "device_1920x1080", true, Some(vec![step()]))
            .unwrap();
        assert_eq!(solution.execution_count, 1);
        assert_eq!(solution.success_rate, 1.0);
    }

    #[test]
    fn second_failed_execution_lowers_success_rate() {
        let dir = tempfile::tempdir().unwrap();
        let store = LearnedSolutionStore::load(dir.path()).unwrap();
        store
            .record_execution("T-001", "device_1920x1080", true, Some(vec![step()]))
            .unwrap();
        let solution = store.record_execution("T-001", "device_1920x1080", false, None).unwrap();
        assert_eq!(solution.execution_count, 2);
        assert!((solution.success_rate - 0.5).abs() < 1e-9);
    }

    #[test]
    fn delete_removes_the_entry() {
        let dir = tempfile::tempdir().unwrap();
        let store = LearnedSolutionStore::load(dir.path()).unwrap();
        store
            .record_execution("T-001", "device_1920x1080", true, Some(vec![step()]))
            .unwrap();
        assert!(store.delete("T-001").unwrap());
        assert!(store.get("T-001").is_none());
    }
}
