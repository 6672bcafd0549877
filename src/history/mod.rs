// src/history/mod.rs
// module: history | role: History Recorder (C8)
// summary: append-only step/run records plus a paginable index
// (SPEC_FULL.md §4.8, persisted layout §6: data/test_history/index.json and
// data/test_history/executions/<run_id>.json). Grounded on the teacher's
// parking_lot-guarded shared-state pattern and on this crate's own
// write-temp+rename helper in knowledge::atomic.

use std::collections::HashMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::domain::history::{RunRecord, StepRecord};
use crate::error::AgentResult;
use crate::knowledge::atomic::{read_json, write_json_atomic};

/// One line of the shared index: enough to paginate runs without loading
/// every execution file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexEntry {
    pub run_id: String,
    pub test_id: Option<String>,
    pub status: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Index {
    entries: Vec<IndexEntry>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Execution {
    steps: Vec<StepRecord>,
    run: Option<RunRecord>,
}

pub struct HistoryRecorder {
    base_dir: PathBuf,
    /// Guards the shared index file; each run's own execution file is
    /// append-only and touched only by that run (SPEC_FULL.md §5).
    index_lock: Mutex<()>,
}

impl HistoryRecorder {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            index_lock: Mutex::new(()),
        }
    }

    fn execution_path(&self, run_id: &str) -> PathBuf {
        self.base_dir.join("executions").join(format!("{run_id}.json"))
    }

    fn index_path(&self) -> PathBuf {
        self.base_dir.join("index.json")
    }

    pub fn record_step(&self, step: StepRecord) -> AgentResult<()> {
        let path = self.execution_path(&step.run_id);
        let mut execution: Execution = read_json(&path)?.unwrap_or_default();
        execution.steps.push(step);
        write_json_atomic(&path, &execution)
    }

    pub fn record_run(&self, run: RunRecord) -> AgentResult<()> {
        let path = self.execution_path(&run.run_id);
        let mut execution: Execution = read_json(&path)?.unwrap_or_default();
        execution.run = Some(run.clone());
        write_json_atomic(&path, &execution)?;

        let _guard = self.index_lock.lock();
        let mut index: Index = read_json(&self.index_path())?.unwrap_or_default();
        index.entries.push(IndexEntry {
            run_id: run.run_id,
            test_id: run.test_id,
            status: run.status,
            started_at: run.started_at,
            ended_at: run.ended_at,
        });
        write_json_atomic(&self.index_path(), &index)
    }

    pub fn get_run_steps(&self, run_id: &str) -> AgentResult<Vec<StepRecord>> {
        let execution: Execution = read_json(&self.execution_path(run_id))?.unwrap_or_default();
        Ok(execution.steps)
    }

    pub fn list_runs(&self) -> AgentResult<Vec<IndexEntry>> {
        let _guard = self.index_lock.lock();
        let index: Index = read_json(&self.index_path())?.unwrap_or_default();
        Ok(index.entries)
    }

    /// Keyed convenience used by `save_learned`/`log_results` to look up the
    /// average SSIM for a just-completed run without re-reading the index.
    pub fn summarize(&self, run_id: &str) -> AgentResult<Option<RunRecord>> {
        let execution: Execution = read_json(&self.execution_path(run_id))?.unwrap_or_default();
        Ok(execution.run)
    }
}

#[allow(dead_code)]
fn group_by_test(entries: &[IndexEntry]) -> HashMap<String, Vec<&IndexEntry>> {
    let mut grouped: HashMap<String, Vec<&IndexEntry>> = HashMap::new();
    for entry in entries {
        if let Some(test_id) = &entry.test_id {
            grouped.entry(test_id.clone()).or_default().push(entry);
        }
    }
    grouped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::action::{ActionKind, CoordinateSource};
    use crate::domain::history::StepStatus;

    fn sample_step(run_id: &str, index: usize) -> StepRecord {
        StepRecord {
            run_id: run_id.to_string(),
            test_id: "T-001".to_string(),
            step_index: index,
            goal: "Tap Settings".to_string(),
            action_kind: ActionKind::Tap,
            target_name: Some("settings".to_string()),
            coordinate: Some((10, 20)),
            coordinate_source: Some(CoordinateSource::Ocr),
            ssim_score: Some(0.9),
            ssim_passed: Some(true),
            ssim_threshold: 0.85,
            reference_name: None,
            before_path: None,
            after_path: None,
            comparison_path: None,
            duration_ms: 200,
            status: StepStatus::Passed,
            error: None,
            used_learned: false,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn steps_accumulate_append_only() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = HistoryRecorder::new(dir.path());
        recorder.record_step(sample_step("run-1", 0)).unwrap();
        recorder.record_step(sample_step("run-1", 1)).unwrap();

        let steps = recorder.get_run_steps("run-1").unwrap();
        assert_eq!(steps.len(), 2);
    }

    #[test]
    fn run_record_appends_an_index_entry() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = HistoryRecorder::new(dir.path());
        let steps = vec![sample_step("run-1", 0)];
        let run = RunRecord::from_steps("run-1", Some("T-001".into()), &steps, "success", Utc::now());
        recorder.record_run(run).unwrap();

        let entries = recorder.list_runs().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].run_id, "run-1");
    }
}
