use anyhow::Context;
use common::{LlmConfig, SearchConfig};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::citations::RawCitation;
use crate::error::WorkerError;

/// Core trait for the model invocation service. Every worker reaches the
/// language model through this seam; retry policy, if any, lives behind it.
#[async_trait::async_trait]
pub trait ModelService: Send + Sync {
    /// Call the model with a prompt and the JSON schema its answer must follow
    async fn call(&self, request: ModelCall) -> Result<ModelReply, WorkerError>;
}

/// Request structure for one structured model call
#[derive(Debug, Clone)]
pub struct ModelCall {
    pub prompt: String,
    /// Name reported to the service alongside the schema
    pub schema_name: String,
    pub schema: Value,
    pub search: SearchConfig,
    /// Time left before the caller gives up
    pub timeout: Duration,
    /// Overrides the service's default model
    pub model: Option<String>,
}

/// Structured reply from the model service
#[derive(Debug, Clone)]
pub struct ModelReply {
    pub content: Value,
    /// Sources reported by the live-search layer
    pub citations: Vec<RawCitation>,
    pub usage: UsageMetadata,
    pub model: String,
}

/// Token usage metadata
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UsageMetadata {
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
    pub total_tokens: usize,
}

pub mod remote;

/// Stand-in used when no model adapter is configured; every call fails as
/// unauthorized so the service still starts and reports per-type errors.
pub struct Unconfigured;

#[async_trait::async_trait]
impl ModelService for Unconfigured {
    async fn call(&self, _request: ModelCall) -> Result<ModelReply, WorkerError> {
        Err(WorkerError::Unauthorized("no model service configured".to_string()))
    }
}

/// Create the model service selected by `[llm]`.
pub fn create_model_service(llm_config: Option<&LlmConfig>) -> anyhow::Result<Arc<dyn ModelService>> {
    let Some(llm_config) = llm_config else {
        warn!("no [llm] section configured; every analysis will fail");
        return Ok(Arc::new(Unconfigured));
    };
    let adapter = llm_config.adapter.as_deref().unwrap_or("none");
    match adapter {
        "remote" => {
            let remote_config = llm_config
                .remote
                .as_ref()
                .ok_or_else(|| anyhow::anyhow!("Remote adapter selected but no [llm.remote] section found"))?;

            // Fetch API key from env var
            let api_key_env = remote_config
                .api_key_env
                .as_deref()
                .ok_or_else(|| anyhow::anyhow!("Missing api_key_env in remote config"))?;
            let api_key = std::env::var(api_key_env)
                .with_context(|| format!("LLM API key env var '{}' not set", api_key_env))?;

            let model = remote_config.model.clone().unwrap_or_else(|| "sonar".to_string());
            let api_url = remote_config
                .api_url
                .clone()
                .unwrap_or_else(|| "https://api.perplexity.ai/chat/completions".to_string());

            let mut service = remote::RemoteModelService::new(api_url.clone(), api_key, model.clone()).with_defaults(
                remote_config.max_tokens.unwrap_or(1500),
                remote_config.temperature.unwrap_or(0.2),
                remote_config.web_search.unwrap_or(true),
            );
            if let Some(secs) = remote_config.timeout_seconds {
                service = service.with_request_timeout(Duration::from_secs(secs));
            }
            info!("Model service initialized: remote ({}) at {}", model, api_url);
            Ok(Arc::new(service))
        }
        "none" => {
            warn!("LLM adapter 'none' configured; every analysis will fail");
            Ok(Arc::new(Unconfigured))
        }
        _ => anyhow::bail!("Unknown LLM adapter type: {}", adapter),
    }
}

/// Helper to extract JSON from text that might contain markdown backticks or preamble
pub fn extract_json_from_text(text: &str) -> Option<String> {
    // 1. Try to find content between ```json and ```
    if let Some(start) = text.find("```json") {
        let rest = &text[start + 7..];
        if let Some(end) = rest.find("```") {
            return Some(rest[..end].trim().to_string());
        }
    }

    // 2. Try to find content between ``` and ```
    if let Some(start) = text.find("```") {
        let rest = &text[start + 3..];
        if let Some(end) = rest.find("```") {
            return Some(rest[..end].trim().to_string());
        }
    }

    // 3. Try to find the first '{' and last '}'
    if let (Some(start), Some(end)) = (text.find('{'), text.rfind('}')) {
        if start < end {
            return Some(text[start..=end].to_string());
        }
    }

    None
}

/// Check the top-level `required` properties of an object schema, and
/// that at least one `anyOf` branch's `required` list is satisfied.
/// Only the outer shape is enforced here; field-level drift is the
/// normalizer's job.
pub fn check_required_fields(schema: &Value, value: &Value) -> Result<(), String> {
    let required = schema.get("required").and_then(Value::as_array);
    let alternatives = schema.get("anyOf").and_then(Value::as_array);
    if required.is_none() && alternatives.is_none() {
        return Ok(());
    }
    let Some(obj) = value.as_object() else {
        return Err(format!("expected a JSON object, got {}", json_type(value)));
    };

    let missing_from = |fields: &Vec<Value>| -> Vec<String> {
        fields
            .iter()
            .filter_map(Value::as_str)
            .filter(|field| !obj.contains_key(*field))
            .map(str::to_string)
            .collect()
    };

    if let Some(required) = required {
        let missing = missing_from(required);
        if !missing.is_empty() {
            return Err(format!("missing required field(s): {}", missing.join(", ")));
        }
    }

    // anyOf branches only count when they carry a `required` list
    if let Some(alternatives) = alternatives {
        let branches: Vec<&Vec<Value>> = alternatives
            .iter()
            .filter_map(|branch| branch.get("required").and_then(Value::as_array))
            .collect();
        if !branches.is_empty() && branches.iter().all(|fields| !missing_from(fields).is_empty()) {
            let expected: Vec<String> = branches
                .iter()
                .map(|fields| {
                    fields
                        .iter()
                        .filter_map(Value::as_str)
                        .collect::<Vec<_>>()
                        .join("+")
                })
                .collect();
            return Err(format!("expected one of: {}", expected.join(", ")));
        }
    }
    Ok(())
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
