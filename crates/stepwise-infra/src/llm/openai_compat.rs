//! OpenAiCompatGenerator -- [`Generator`] over any OpenAI-compatible
//! `/chat/completions` endpoint (OpenAI, Ollama, vLLM, LM Studio, ...).
//!
//! Structured generation sends a `response_format` of type `json_schema`.
//! Servers that reject it with a 400 mentioning `response_format` are
//! reported as [`GeneratorError::Unsupported`] so callers can fall back to
//! plain generation plus extraction.
//!
//! The API key is wrapped in [`secrecy::SecretString`] and is never logged
//! or included in `Debug` output.

use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use stepwise_core::llm::generator::Generator;
use stepwise_types::config::GeneratorConfig;
use stepwise_types::llm::{GenerationRequest, GeneratorError, StructuredRequest};

/// Upper bound for a single completion round trip.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f64,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

// ---------------------------------------------------------------------------
// Generator
// ---------------------------------------------------------------------------

/// Generator for OpenAI-compatible chat completion APIs.
///
/// Does NOT derive Debug so the API key cannot leak through formatting.
pub struct OpenAiCompatGenerator {
    client: reqwest::Client,
    api_key: Option<SecretString>,
    base_url: String,
    model: String,
}

impl OpenAiCompatGenerator {
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        api_key: Option<SecretString>,
    ) -> Result<Self, GeneratorError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| GeneratorError::Provider {
                message: format!("failed to create HTTP client: {e}"),
            })?;
        Ok(Self {
            client,
            api_key,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
        })
    }

    /// Build from configuration, reading the key from `config.api_key_env`.
    ///
    /// A missing key is allowed (local servers usually need none).
    pub fn from_config(config: &GeneratorConfig) -> Result<Self, GeneratorError> {
        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty())
            .map(SecretString::from);
        if api_key.is_none() {
            tracing::warn!(
                env = %config.api_key_env,
                "no API key set for generator, sending unauthenticated requests"
            );
        }
        Self::new(&config.base_url, &config.model, api_key)
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    async fn complete(
        &self,
        request: &GenerationRequest,
        response_format: Option<Value>,
    ) -> Result<String, GeneratorError> {
        let structured = response_format.is_some();
        let body = build_chat_request(&self.model, request, response_format);

        let mut builder = self.client.post(self.url()).json(&body);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key.expose_secret());
        }

        let response = builder.send().await.map_err(|e| GeneratorError::Provider {
            message: format!("HTTP request failed: {e}"),
        })?;

        let status = response.status().as_u16();
        if !(200..300).contains(&status) {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok());
            let error_body = response.text().await.unwrap_or_default();
            return Err(map_status(status, &error_body, retry_after, structured));
        }

        let parsed: ChatResponse = response.json().await.map_err(|e| {
            GeneratorError::Deserialization(format!("failed to parse response: {e}"))
        })?;
        let content = first_content(parsed)?;
        tracing::debug!(
            model = %self.model,
            structured,
            chars = content.len(),
            "completion received"
        );
        Ok(content)
    }
}

impl Generator for OpenAiCompatGenerator {
    fn name(&self) -> &str {
        "openai-compatible"
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String, GeneratorError> {
        self.complete(request, None).await
    }

    async fn generate_structured(
        &self,
        request: &StructuredRequest,
    ) -> Result<Value, GeneratorError> {
        let response_format = json!({
            "type": "json_schema",
            "json_schema": {
                "name": request.schema_name,
                "schema": request.schema,
                "strict": false,
            }
        });
        let content = self
            .complete(&request.request, Some(response_format))
            .await?;
        serde_json::from_str(&content).map_err(|e| {
            GeneratorError::Deserialization(format!("structured output is not JSON: {e}"))
        })
    }
}

fn build_chat_request<'a>(
    model: &'a str,
    request: &'a GenerationRequest,
    response_format: Option<Value>,
) -> ChatRequest<'a> {
    let mut messages = Vec::with_capacity(2);
    if let Some(system) = request.system.as_deref() {
        messages.push(ChatMessage {
            role: "system",
            content: system,
        });
    }
    messages.push(ChatMessage {
        role: "user",
        content: &request.prompt,
    });
    ChatRequest {
        model,
        messages,
        temperature: request.temperature,
        max_tokens: request.max_tokens,
        response_format,
    }
}

fn map_status(
    status: u16,
    body: &str,
    retry_after_secs: Option<u64>,
    structured: bool,
) -> GeneratorError {
    match status {
        401 | 403 => GeneratorError::AuthenticationFailed,
        429 => GeneratorError::RateLimited {
            retry_after_ms: retry_after_secs.map(|s| s * 1000),
        },
        400 | 422 if structured && body.contains("response_format") => {
            GeneratorError::Unsupported(format!("structured output: {body}"))
        }
        _ => GeneratorError::Provider {
            message: format!("HTTP {status}: {body}"),
        },
    }
}

fn first_content(response: ChatResponse) -> Result<String, GeneratorError> {
    response
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .ok_or_else(|| GeneratorError::Deserialization("response has no content".to_string()))
}
