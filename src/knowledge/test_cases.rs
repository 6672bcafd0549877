// src/knowledge/test_cases.rs
// module: knowledge | role: test-case corpus
// summary: keyed by test_id; exact get, semantic search via an EmbeddingProvider,
// idempotent spreadsheet ingestion keyed by content hash (SPEC_FULL.md §4.4).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::domain::test_case::TestCase;
use crate::error::AgentResult;

use super::atomic::{read_json, write_json_atomic};
use super::ports::{cosine_similarity, EmbeddingProvider, TestCaseSource};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct IndexedCase {
    case: TestCase,
    embedding: Vec<f32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StoreFile {
    cases: HashMap<String, IndexedCase>,
    /// SHA-based content hashes of already-ingested spreadsheet files, so a
    /// re-ingest of an unchanged file is a no-op (SPEC_FULL.md §4.4 Ingestion).
    ingested_file_hashes: HashMap<String, String>,
}

pub struct TestCaseStore {
    path: PathBuf,
    embedder: Arc<dyn EmbeddingProvider>,
    min_similarity: f32,
    state: RwLock<StoreFile>,
}

impl TestCaseStore {
    pub fn load(base_dir: &Path, embedder: Arc<dyn EmbeddingProvider>, min_similarity: f64) -> AgentResult<Self> {
        let path = base_dir.join("test_cases.json");
        let state = read_json(&path)?.unwrap_or_default();
        Ok(Self {
            path,
            embedder,
            min_similarity: min_similarity as f32,
            state: RwLock::new(state),
        })
    }

    pub async fn upsert(&self, case: TestCase) -> AgentResult<()> {
        let text = format!("{} {}", case.title, case.description);
        let embedding = self.embedder.embed(&text).await?;

        {
            let mut state = self.state.write();
            state.cases.insert(case.id.clone(), IndexedCase { case, embedding });
        }
        self.flush()
    }

    pub fn get(&self, test_id: &str) -> Option<TestCase> {
        self.state.read().cases.get(test_id).map(|ic| ic.case.clone())
    }

    pub async fn semantic_search(&self, query: &str, top_k: usize) -> AgentResult<Vec<(TestCase, f32)>> {
        let query_embedding = self.embedder.embed(query).await?;

        let mut scored: Vec<(TestCase, f32)> = self
            .state
            .read()
            .cases
            .values()
            .map(|ic| (ic.case.clone(), cosine_similarity(&query_embedding, &ic.embedding)))
            .filter(|(_, score)| *score >= self.min_similarity)
            .collect();

        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(top_k);
        Ok(scored)
    }

    /// Ingests every case from `source` unless `path`'s content hash is
    /// already recorded (idempotent re-ingestion).
    pub async fn ingest_file(
        &self,
        path: &Path,
        source: &dyn TestCaseSource,
    ) -> AgentResult<usize> {
        let bytes = std::fs::read(path)?;
        let hash = content_hash(&bytes);
        let key = path.to_string_lossy().to_string();

        if self.state.read().ingested_file_hashes.get(&key) == Some(&hash) {
            return Ok(0);
        }

        let cases = source.parse(path).await?;
        let count = cases.len();
        for case in cases {
            self.upsert(case).await?;
        }

        self.state.write().ingested_file_hashes.insert(key, hash);
        self.flush()?;
        Ok(count)
    }

    fn flush(&self) -> AgentResult<()> {
        let snapshot = self.state.read().clone();
        write_json_atomic(&self.path, &snapshot)
    }
}

fn content_hash(bytes: &[u8]) -> String {
    // FNV-1a: fast, dependency-free, adequate for change detection (not security).
    let mut hash: u64 = 0xcbf29ce484222325;
    for &byte in bytes {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    format!("{hash:016x}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct FakeEmbedder;

    #[async_trait]
    impl EmbeddingProvider for FakeEmbedder {
        async fn embed(&self, text: &str) -> AgentResult<Vec<f32>> {
            // Deterministic toy embedding: character-frequency histogram over a-z.
            let mut v = vec![0.0f32; 26];
            for c in text.to_lowercase().chars() {
                if c.is_ascii_lowercase() {
                    v[(c as u8 - b'a') as usize] += 1.0;
                }
            }
            Ok(v)
        }
    }

    fn sample_case(id: &str, title: &str) -> TestCase {
        TestCase::new(id, title, vec![crate::domain::test_case::Step::new("Tap Settings")])
    }

    #[tokio::test]
    async fn upsert_then_exact_get() {
        let dir = tempfile::tempdir().unwrap();
        let store = TestCaseStore::load(dir.path(), Arc::new(FakeEmbedder), 0.0).unwrap();
        store.upsert(sample_case("T-001", "open settings")).await.unwrap();
        assert!(store.get("T-001").is_some());
        assert!(store.get("T-999").is_none());
    }

    #[tokio::test]
    async fn semantic_search_ranks_closer_matches_higher() {
        let dir = tempfile::tempdir().unwrap();
        let store = TestCaseStore::load(dir.path(), Arc::new(FakeEmbedder), 0.0).unwrap();
        store.upsert(sample_case("T-001", "open settings menu")).await.unwrap();
        store.upsert(sample_case("T-002", "turn off bluetooth")).await.unwrap();

        let results = store.semantic_search("open settings", 5).await.unwrap();
        assert_eq!(results[0].0.id, "T-001");
    }

    #[test]
    fn content_hash_is_stable() {
        assert_eq!(content_hash(b"hello"), content_hash(b"hello"));
        assert_ne!(content_hash(b"hello"), content_hash(b"world"));
    }
}
