// src/vision/model.rs
// module: vision | role: multimodal model port
// summary: the single request-response RPC every model-backed prompt in the
// engine uses (SPEC_FULL.md §6 Multimodal model contract): `{prompt_text,
// image_bytes?} -> text blob`. Grounded on the teacher's
// core/adapters/outbound/ai_agent/openai_compatible_provider.rs, generalized
// from a chat-with-tools surface down to the single-shot completion this
// domain's prompts need, with base64 image attachment added for vision calls.

use async_trait::async_trait;
use base64::Engine;
use reqwest::Client;
use serde_json::json;
use tracing::{debug, warn};

use crate::error::{AgentError, AgentResult};

/// The multimodal model boundary. One method covers every prompt kind listed
/// in SPEC_FULL.md §6: routing, localization, target extraction, planning
/// fallback, intent split, guidance interpretation, reference naming, and the
/// verification diagnostic. Callers differ only in the prompt text and how
/// they parse the returned blob.
#[async_trait]
pub trait ModelClient: Send + Sync {
    async fn complete(&self, prompt_text: &str, image_bytes: Option<&[u8]>) -> AgentResult<String>;
}

pub struct OpenAiCompatibleModelClient {
    endpoint: String,
    api_key: String,
    model_name: String,
    temperature: f64,
    client: Client,
}

impl OpenAiCompatibleModelClient {
    pub fn new(endpoint: impl Into<String>, api_key: impl Into<String>, model_name: impl Into<String>, temperature: f64) -> Self {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(60))
            .build()
            .expect("failed to build http client");

        Self {
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            model_name: model_name.into(),
            temperature,
            client,
        }
    }

    fn build_content(prompt_text: &str, image_bytes: Option<&[u8]>) -> serde_json::Value {
        match image_bytes {
            Some(bytes) => {
                let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
                json!([
                    { "type": "text", "text": prompt_text },
                    { "type": "image_url", "image_url": { "url": format!("data:image/png;base64,{encoded}") } },
                ])
            }
            None => json!(prompt_text),
        }
    }
}

#[async_trait]
impl ModelClient for OpenAiCompatibleModelClient {
    async fn complete(&self, prompt_text: &str, image_bytes: Option<&[u8]>) -> AgentResult<String> {
        let url = format!("{}/chat/completions", self.endpoint);
        let body = json!({
            "model": self.model_name,
            "temperature": self.temperature,
            "messages": [
                { "role": "user", "content": Self::build_content(prompt_text, image_bytes) }
            ],
        });

        debug!(endpoint = %self.endpoint, "sending multimodal model request");

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| AgentError::perception(format!("model request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            warn!(%status, %text, "multimodal model returned an error status");
            return Err(AgentError::perception(format!("model error [{status}]: {text}")));
        }

        let parsed: serde_json::Value = response
            .json()
            .await
            .map_err(|e| AgentError::perception(format!("failed to parse model response: {e}")))?;

        parsed["choices"][0]["message"]["content"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| AgentError::perception("model response had no message content"))
    }
}
