//! `fetch` -- HTTP request tool.
//!
//! Inputs: `url` (required), `method` (default GET), `headers` (mapping),
//! `timeout` (duration, default 30s). No request body is sent. The response
//! body is returned as JSON when it parses, otherwise as a string.

use std::time::Duration;

use futures_util::future::BoxFuture;
use serde_json::{Map, Value, json};
use stepwise_types::config::{DEFAULT_FETCH_TIMEOUT_SECS, DEFAULT_USER_AGENT};
use stepwise_types::tool::ToolDescriptor;

use super::{Tool, ToolContext, ToolError, opt_duration, opt_str, req_str};
use crate::service::http::{HttpClient, HttpError, HttpRequest};
use crate::template::value_to_string;

pub const FETCH_TOOL: &str = "fetch";

/// HTTP fetch over any [`HttpClient`].
pub struct FetchTool<H: HttpClient> {
    client: H,
    default_timeout: Duration,
    user_agent: String,
}

impl<H: HttpClient> FetchTool<H> {
    pub fn new(client: H) -> Self {
        Self {
            client,
            default_timeout: Duration::from_secs(DEFAULT_FETCH_TIMEOUT_SECS),
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    fn build_request(&self, inputs: &Map<String, Value>) -> Result<HttpRequest, ToolError> {
        let url = req_str(inputs, "url")?;
        let method = opt_str(inputs, "method")
            .filter(|m| !m.trim().is_empty())
            .map(|m| m.trim().to_uppercase())
            .unwrap_or_else(|| "GET".to_string());

        let mut headers: Vec<(String, String)> = match inputs.get("headers") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Object(map)) => map
                .iter()
                .map(|(k, v)| (k.clone(), value_to_string(v)))
                .collect(),
            Some(_) => {
                return Err(ToolError::InvalidInput(
                    "'headers' must be a mapping".to_string(),
                ));
            }
        };
        if !headers
            .iter()
            .any(|(k, _)| k.eq_ignore_ascii_case("user-agent"))
        {
            headers.push(("User-Agent".to_string(), self.user_agent.clone()));
        }

        let timeout = opt_duration(inputs, "timeout")?.unwrap_or(self.default_timeout);

        Ok(HttpRequest {
            method,
            url,
            headers,
            timeout,
        })
    }
}

impl<H: HttpClient> Tool for FetchTool<H> {
    fn name(&self) -> &str {
        FETCH_TOOL
    }

    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor::new(
            FETCH_TOOL,
            "Make an HTTP request and return the response body (parsed as JSON when possible).",
            json!({
                "type": "object",
                "properties": {
                    "url": { "type": "string", "description": "Absolute URL to request" },
                    "method": { "type": "string", "description": "HTTP method, default GET" },
                    "headers": { "type": "object", "description": "Request headers" },
                    "timeout": { "type": "string", "description": "Timeout such as \"10s\"" }
                },
                "required": ["url"]
            }),
        )
    }

    fn call<'a>(
        &'a self,
        ctx: &'a ToolContext,
        inputs: Map<String, Value>,
    ) -> BoxFuture<'a, Result<Value, ToolError>> {
        Box::pin(async move {
            let request = self.build_request(&inputs)?;
            let url = request.url.clone();
            let timeout = request.timeout;

            tracing::debug!(
                step_id = %ctx.step_id,
                method = %request.method,
                url = %url,
                "fetch request"
            );

            let send = async {
                match tokio::time::timeout(timeout, self.client.send(request)).await {
                    Ok(Ok(response)) => Ok(response),
                    Ok(Err(HttpError::Timeout(d))) => Err(ToolError::Timeout(d)),
                    Ok(Err(e)) => Err(ToolError::Execution(format!("fetch {url}: {e}"))),
                    Err(_elapsed) => Err(ToolError::Timeout(timeout)),
                }
            };
            let response = ctx.run_cancellable(send).await?;

            if !response.is_success() {
                tracing::warn!(
                    step_id = %ctx.step_id,
                    url = %url,
                    status = response.status,
                    "fetch returned non-success status"
                );
            }

            Ok(serde_json::from_str::<Value>(&response.body)
                .unwrap_or(Value::String(response.body)))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::http::HttpResponse;
    use std::sync::{Arc, Mutex};

    /// Records requests; answers JSON for `/json` URLs and text otherwise.
    #[derive(Clone, Default)]
    struct MockHttp {
        seen: Arc<Mutex<Vec<HttpRequest>>>,
        delay: Option<Duration>,
    }

    impl HttpClient for MockHttp {
        async fn send(&self, request: HttpRequest) -> Result<HttpResponse, HttpError> {
            self.seen.lock().unwrap().push(request.clone());
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if !request.url.starts_with("http") {
                return Err(HttpError::Transport(format!(
                    "relative URL without a base: {}",
                    request.url
                )));
            }
            let body = if request.url.ends_with("/json") {
                r#"{"ok": true, "n": 1}"#.to_string()
            } else if request.url.ends_with("/missing") {
                r#"{"error": "not found"}"#.to_string()
            } else {
                "plain text".to_string()
            };
            let status = if request.url.ends_with("/missing") { 404 } else { 200 };
            Ok(HttpResponse {
                status,
                headers: vec![],
                body,
            })
        }
    }

    fn inputs(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_json_body_is_parsed() {
        let tool = FetchTool::new(MockHttp::default());
        let ctx = ToolContext::detached("s");
        let out = tool
            .call(&ctx, inputs(json!({ "url": "https://api.test/json" })))
            .await
            .unwrap();
        assert_eq!(out, json!({ "ok": true, "n": 1 }));
    }

    #[tokio::test]
    async fn test_text_body_is_string() {
        let tool = FetchTool::new(MockHttp::default());
        let ctx = ToolContext::detached("s");
        let out = tool
            .call(&ctx, inputs(json!({ "url": "https://api.test/page" })))
            .await
            .unwrap();
        assert_eq!(out, json!("plain text"));
    }

    #[tokio::test]
    async fn test_non_success_status_returns_body_only() {
        let tool = FetchTool::new(MockHttp::default());
        let ctx = ToolContext::detached("s");
        let out = tool
            .call(&ctx, inputs(json!({ "url": "https://api.test/missing" })))
            .await
            .unwrap();
        assert_eq!(out, json!({ "error": "not found" }));
    }

    #[tokio::test]
    async fn test_defaults_method_user_agent_and_timeout() {
        let http = MockHttp::default();
        let tool = FetchTool::new(http.clone());
        let ctx = ToolContext::detached("s");
        tool.call(&ctx, inputs(json!({ "url": "https://a.test/" })))
            .await
            .unwrap();
        let seen = http.seen.lock().unwrap();
        assert_eq!(seen[0].method, "GET");
        assert_eq!(seen[0].timeout, Duration::from_secs(30));
        assert!(seen[0].header("user-agent").unwrap().starts_with("stepwise/"));
    }

    #[tokio::test]
    async fn test_caller_headers_and_method_kept() {
        let http = MockHttp::default();
        let tool = FetchTool::new(http.clone());
        let ctx = ToolContext::detached("s");
        tool.call(
            &ctx,
            inputs(json!({
                "url": "https://a.test/",
                "method": "delete",
                "headers": { "User-Agent": "custom/1", "X-Count": 2 },
                "timeout": "5s"
            })),
        )
        .await
        .unwrap();
        let seen = http.seen.lock().unwrap();
        assert_eq!(seen[0].method, "DELETE");
        assert_eq!(seen[0].header("user-agent"), Some("custom/1"));
        assert_eq!(seen[0].header("x-count"), Some("2"));
        assert_eq!(seen[0].timeout, Duration::from_secs(5));
        assert_eq!(seen[0].headers.len(), 2);
    }

    #[tokio::test]
    async fn test_missing_url_is_input_error() {
        let tool = FetchTool::new(MockHttp::default());
        let ctx = ToolContext::detached("s");
        let err = tool.call(&ctx, Map::new()).await.unwrap_err();
        assert!(matches!(err, ToolError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_unresolved_template_url_is_transport_error() {
        let tool = FetchTool::new(MockHttp::default());
        let ctx = ToolContext::detached("s");
        let err = tool
            .call(&ctx, inputs(json!({ "url": "{{missing}}" })))
            .await
            .unwrap_err();
        match err {
            ToolError::Execution(msg) => assert!(msg.contains("transport error")),
            other => panic!("expected execution error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_timeout_input_enforced() {
        let http = MockHttp {
            delay: Some(Duration::from_secs(5)),
            ..Default::default()
        };
        let tool = FetchTool::new(http);
        let ctx = ToolContext::detached("s");
        let err = tool
            .call(&ctx, inputs(json!({ "url": "https://slow.test/", "timeout": "50ms" })))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_cancellation_interrupts_request() {
        let http = MockHttp {
            delay: Some(Duration::from_secs(5)),
            ..Default::default()
        };
        let tool = FetchTool::new(http);
        let ctx = ToolContext::detached("s");
        let cancel = ctx.cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            cancel.cancel();
        });
        let err = tool
            .call(&ctx, inputs(json!({ "url": "https://slow.test/" })))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Cancelled));
    }
}
