// src/knowledge/atomic.rs
// module: knowledge | role: crash-atomic persistence helper
// summary: write-temp-then-rename, shared by all three corpora so a crash
// mid-write never leaves a corpus file truncated (SPEC_FULL.md §4.4 Consistency).

use std::path::Path;

use crate::error::AgentResult;

pub fn write_json_atomic<T: serde::Serialize>(path: &Path, value: &T) -> AgentResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let tmp_path = path.with_extension("json.tmp");
    let bytes = serde_json::to_vec_pretty(value)?;
    std::fs::write(&tmp_path, &bytes)?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

pub fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> AgentResult<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }
    let bytes = std::fs::read(path)?;
    Ok(Some(serde_json::from_slice(&bytes)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Serialize, Deserialize, PartialEq, Debug)]
    struct Sample {
        value: u32,
    }

    #[test]
    fn round_trips_through_atomic_write() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sample.json");

        write_json_atomic(&path, &Sample { value: 42 }).unwrap();
        let loaded: Option<Sample> = read_json(&path).unwrap();
        assert_eq!(loaded, Some(Sample { value: 42 }));
    }

    #[test]
    fn missing_file_reads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.json");
        let loaded: Option<Sample> = read_json(&path).unwrap();
        assert_eq!(loaded, None);
    }
}
