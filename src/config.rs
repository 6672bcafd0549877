// src/config.rs
// module: config | role: configuration
// Flat, strongly-typed runtime configuration (§4.10 of SPEC_FULL.md).
// Loading from a file format or environment is an external collaborator's job;
// this module only owns the shape and the defaults.

use serde::{Deserialize, Serialize};

/// Top-level agent configuration. Every field has a documented default so a
/// caller can start from `AgentConfig::default()` and override only what it needs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Specific ADB serial to target; `None` lets the transport pick the sole
    /// connected device.
    pub device_serial: Option<String>,
    /// Per-primitive transport timeout.
    pub device_timeout_ms: u64,
    /// Max transport retries per primitive before it is reported as failed.
    pub retry_count: u32,
    /// Pixel-diff fallback threshold, as a percentage of changed pixels.
    pub change_threshold_pct: f64,
    /// SSIM pass threshold used by the Verifier's primary signal.
    pub ssim_threshold: f64,
    /// Max per-step retries before escalating to a human.
    pub max_retries: u32,
    /// JPEG/PNG quality used when screenshots are persisted for history.
    pub screenshot_quality: u8,
    /// Screenshots wider than this are downscaled only for model uploads,
    /// never for the screenshot the Verifier and Device Driver see.
    pub screenshot_max_width: u32,
    /// Streaming frame rate for any live-preview collaborator (unused by the core).
    pub stream_fps: u32,
    /// Base path of the test-case vector index.
    pub vector_db_path: String,
    /// Minimum cosine similarity for a semantic test-case search hit.
    pub min_similarity: f64,
    /// Multimodal model endpoint (OpenAI-compatible chat completions URL).
    pub model_endpoint: String,
    /// Multimodal model API key. Prefer overlaying this from environment
    /// rather than committing it via `merge_env`.
    pub model_api_key: String,
    /// Multimodal model identifier passed in the request body.
    pub model_name: String,
    /// Sampling temperature for planning/guidance prompts.
    pub model_temperature: f64,
    /// Soft budget ceiling, in USD, for model spend across a run.
    pub budget_limit_usd: f64,
    /// Budget fraction at which a warning is logged.
    pub alert_threshold_usd: f64,
    /// Base directory for all persisted state (`data/` in SPEC_FULL.md §6).
    pub data_dir: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            device_serial: None,
            device_timeout_ms: 10_000,
            retry_count: 3,
            change_threshold_pct: 1.0,
            ssim_threshold: 0.85,
            max_retries: 3,
            screenshot_quality: 90,
            screenshot_max_width: 1280,
            stream_fps: 2,
            vector_db_path: "data/vector_index".to_string(),
            min_similarity: 0.75,
            model_endpoint: "https://api.openai.com/v1".to_string(),
            model_api_key: String::new(),
            model_name: "gpt-4o".to_string(),
            model_temperature: 0.2,
            budget_limit_usd: 5.0,
            alert_threshold_usd: 4.0,
            data_dir: "data".to_string(),
        }
    }
}

impl AgentConfig {
    /// Overlay the handful of secrets/operational knobs that should come from
    /// the environment rather than a committed config file.
    pub fn merge_env(mut self) -> Self {
        if let Ok(key) = std::env::var("AGENT_MODEL_API_KEY") {
            self.model_api_key = key;
        }
        if let Ok(endpoint) = std::env::var("AGENT_MODEL_ENDPOINT") {
            self.model_endpoint = endpoint;
        }
        if let Ok(serial) = std::env::var("AGENT_DEVICE_SERIAL") {
            self.device_serial = Some(serial);
        }
        self
    }

    pub fn device_profiles_dir(&self) -> std::path::PathBuf {
        std::path::Path::new(&self.data_dir).join("device-profiles")
    }

    pub fn verification_images_dir(&self) -> std::path::PathBuf {
        std::path::Path::new(&self.data_dir).join("verification_images")
    }

    pub fn verification_comparisons_dir(&self) -> std::path::PathBuf {
        std::path::Path::new(&self.data_dir).join("verification_comparisons")
    }

    pub fn test_history_dir(&self) -> std::path::PathBuf {
        std::path::Path::new(&self.data_dir).join("test_history")
    }

    pub fn screenshots_dir(&self) -> std::path::PathBuf {
        std::path::Path::new(&self.data_dir).join("screenshots")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let cfg = AgentConfig::default();
        assert_eq!(cfg.max_retries, 3);
        assert_eq!(cfg.ssim_threshold, 0.85);
        assert_eq!(cfg.change_threshold_pct, 1.0);
    }

    #[test]
    fn merge_env_overrides_api_key() {
        std::env::set_var("AGENT_MODEL_API_KEY", "sk-test-123");
        let cfg = AgentConfig::default().merge_env();
        assert_eq!(cfg.model_api_key, "sk-test-123");
        std::env::remove_var("AGENT_MODEL_API_KEY");
    }
}
