// src/knowledge/ports.rs
// module: knowledge | role: external-collaborator ports
// summary: the Knowledge Store only needs `embed` and `parse`; the vector-index
// backend and the spreadsheet parser live behind these traits
// (SPEC_FULL.md §4.4 Test cases). Grounded on the teacher's agent_ports.rs
// outbound-port pattern (AiProvider/ToolProvider), generalized to this
// domain's two external collaborators.

use async_trait::async_trait;

use crate::domain::test_case::TestCase;
use crate::error::AgentResult;

#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, text: &str) -> AgentResult<Vec<f32>>;
}

#[async_trait]
pub trait TestCaseSource: Send + Sync {
    async fn parse(&self, path: &std::path::Path) -> AgentResult<Vec<TestCase>>;
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_vectors_have_similarity_one() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn orthogonal_vectors_have_similarity_zero() {
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]), 0.0);
    }
}
