use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, warn};

use super::{check_required_fields, extract_json_from_text, ModelCall, ModelReply, ModelService, UsageMetadata};
use crate::citations::RawCitation;
use crate::error::WorkerError;

/// Remote model service using an OpenAI-compatible chat completions API.
/// Live search options are sent both in the OpenAI (`web_search_options`) and
/// the Perplexity (`search_*_filter`) dialects; servers ignore what they do
/// not understand.
pub struct RemoteModelService {
    base_url: String,
    api_key: String,
    model: String,
    default_max_tokens: usize,
    default_temperature: f32,
    web_search: bool,
    client: reqwest::Client,
}

impl RemoteModelService {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
            default_max_tokens: 1500,
            default_temperature: 0.2,
            web_search: true,
            client: reqwest::Client::new(),
        }
    }

    pub fn with_defaults(mut self, max_tokens: usize, temperature: f32, web_search: bool) -> Self {
        self.default_max_tokens = max_tokens;
        self.default_temperature = temperature;
        self.web_search = web_search;
        self
    }

    /// Hard cap on any single HTTP exchange, on top of the per-call deadline.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        match reqwest::Client::builder().timeout(timeout).build() {
            Ok(client) => self.client = client,
            Err(e) => warn!("keeping default HTTP client: {}", e),
        }
        self
    }

    fn request_body(&self, call: &ModelCall) -> ChatRequest {
        let search_enabled = self.web_search && call.search.enabled.unwrap_or(true);
        ChatRequest {
            model: call.model.clone().unwrap_or_else(|| self.model.clone()),
            messages: vec![Message {
                role: "user".to_string(),
                content: call.prompt.clone(),
            }],
            max_tokens: Some(self.default_max_tokens),
            temperature: Some(self.default_temperature),
            response_format: Some(json!({
                "type": "json_schema",
                "json_schema": {
                    "name": call.schema_name,
                    "schema": call.schema,
                },
            })),
            web_search_options: search_enabled.then(|| {
                let size = match call.search.max_results {
                    Some(n) if n <= 3 => "low",
                    Some(n) if n > 8 => "high",
                    _ => "medium",
                };
                json!({ "search_context_size": size })
            }),
            search_recency_filter: call.search.recency.clone().filter(|_| search_enabled),
            search_domain_filter: if search_enabled && !call.search.domains.is_empty() {
                Some(call.search.domains.clone())
            } else {
                None
            },
        }
    }
}

#[async_trait::async_trait]
impl ModelService for RemoteModelService {
    async fn call(&self, call: ModelCall) -> Result<ModelReply, WorkerError> {
        let req_body = self.request_body(&call);
        let timeout = call.timeout;

        // Make HTTP request with timeout
        let response = tokio::time::timeout(
            timeout,
            self.client
                .post(&self.base_url)
                .header("Authorization", format!("Bearer {}", self.api_key))
                .header("Content-Type", "application/json")
                .json(&req_body)
                .send(),
        )
        .await
        .map_err(|_| WorkerError::Timeout(timeout))?
        .map_err(|e| classify_transport_error(e, timeout))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let detail = format!("{}: {}", status, truncate(&body, 300));
            warn!(%status, schema = %call.schema_name, "model service returned an error status");
            return Err(match status.as_u16() {
                401 | 403 => WorkerError::Unauthorized(detail),
                429 => WorkerError::RateLimited(detail),
                408 | 500..=599 => WorkerError::TransientNetwork(detail),
                _ => WorkerError::ModelOutput(detail),
            });
        }

        let body_text = tokio::time::timeout(timeout, response.text())
            .await
            .map_err(|_| WorkerError::Timeout(timeout))?
            .map_err(|e| classify_transport_error(e, timeout))?;
        let resp_body: ChatResponse = serde_json::from_str(&body_text)
            .map_err(|e| WorkerError::ModelOutput(format!("unparseable response body: {e}")))?;

        let choice = resp_body
            .choices
            .first()
            .ok_or_else(|| WorkerError::ModelOutput("response has no choices".to_string()))?;

        // Robust JSON extraction: handle markdown backticks, preamble, etc.
        let raw_content = choice.message.content.as_deref().unwrap_or_default();
        let cleaned = extract_json_from_text(raw_content)
            .ok_or_else(|| WorkerError::ModelOutput("no JSON object in model answer".to_string()))?;
        let content: Value = serde_json::from_str(&cleaned)
            .map_err(|e| WorkerError::ModelOutput(format!("model answer is not valid JSON: {e}")))?;
        check_required_fields(&call.schema, &content).map_err(WorkerError::ModelOutput)?;

        let mut citations: Vec<RawCitation> = resp_body
            .citations
            .iter()
            .map(|url| RawCitation::new(url.clone()))
            .collect();
        citations.extend(
            resp_body
                .search_results
                .iter()
                .map(|r| RawCitation { url: r.url.clone(), title: r.title.clone() }),
        );
        citations.extend(choice.message.annotations.iter().filter_map(|a| {
            let c = a.url_citation.as_ref()?;
            Some(RawCitation { url: c.url.clone(), title: c.title.clone() })
        }));
        debug!(schema = %call.schema_name, citations = citations.len(), "model call succeeded");

        let usage = resp_body.usage.unwrap_or_default();
        Ok(ModelReply {
            content,
            citations,
            usage: UsageMetadata {
                prompt_tokens: usage.prompt_tokens.unwrap_or(0),
                completion_tokens: usage.completion_tokens.unwrap_or(0),
                total_tokens: usage.total_tokens.unwrap_or(0),
            },
            model: resp_body.model.unwrap_or_else(|| self.model.clone()),
        })
    }
}

fn classify_transport_error(e: reqwest::Error, timeout: Duration) -> WorkerError {
    if e.is_timeout() {
        WorkerError::Timeout(timeout)
    } else {
        WorkerError::TransientNetwork(e.to_string())
    }
}

fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max_chars).collect();
        format!("{cut}...")
    }
}

// OpenAI API request/response structures
#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    web_search_options: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    search_recency_filter: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    search_domain_filter: Option<Vec<String>>,
}

#[derive(Debug, Serialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    model: Option<String>,
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
    /// Perplexity-style flat citation list
    #[serde(default)]
    citations: Vec<String>,
    #[serde(default)]
    search_results: Vec<SearchResult>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
    #[serde(default)]
    annotations: Vec<Annotation>,
}

#[derive(Debug, Deserialize)]
struct Annotation {
    url_citation: Option<UrlCitation>,
}

#[derive(Debug, Deserialize)]
struct UrlCitation {
    url: String,
    title: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SearchResult {
    url: String,
    title: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct Usage {
    #[serde(default)]
    prompt_tokens: Option<usize>,
    #[serde(default)]
    completion_tokens: Option<usize>,
    #[serde(default)]
    total_tokens: Option<usize>,
}
