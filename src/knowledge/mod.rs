// src/knowledge/mod.rs
// module: knowledge | role: Knowledge Store (C4)
// summary: the three corpora (test cases, learned solutions, device profiles),
// each serialized per-process with crash-atomic writes (SPEC_FULL.md §4.4).
// Grounded on the teacher's repository-style persistence in core/shared plus
// the parking_lot::RwLock-per-corpus sharing policy named explicitly in
// SPEC_FULL.md §5.

pub mod atomic;
pub mod device_profiles;
pub mod learned_solutions;
pub mod ports;
pub mod references;
pub mod test_cases;

use std::path::Path;
use std::sync::Arc;

use crate::config::AgentConfig;
use crate::error::AgentResult;

pub use device_profiles::DeviceProfileStore;
pub use learned_solutions::LearnedSolutionStore;
pub use ports::{EmbeddingProvider, TestCaseSource};
pub use references::ReferenceImageStore;
pub use test_cases::TestCaseStore;

/// Aggregates the three corpora behind one handle, matching how the graph and
/// orchestrator reach persistence in SPEC_FULL.md §4.4/§4.6.
pub struct KnowledgeStore {
    pub test_cases: TestCaseStore,
    pub learned_solutions: LearnedSolutionStore,
    pub device_profiles: DeviceProfileStore,
    pub references: ReferenceImageStore,
}

impl KnowledgeStore {
    pub fn open(config: &AgentConfig, embedder: Arc<dyn EmbeddingProvider>) -> AgentResult<Self> {
        let data_dir = Path::new(&config.data_dir);
        Ok(Self {
            test_cases: TestCaseStore::load(data_dir, embedder, config.min_similarity)?,
            learned_solutions: LearnedSolutionStore::load(data_dir)?,
            device_profiles: DeviceProfileStore::new(config.device_profiles_dir()),
            references: ReferenceImageStore::new(config.verification_images_dir()),
        })
    }
}
