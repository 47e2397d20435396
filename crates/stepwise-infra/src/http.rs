//! `reqwest`-backed [`HttpClient`] for the `fetch` tool.

use reqwest::Method;
use stepwise_core::service::http::{HttpClient, HttpError, HttpRequest, HttpResponse};

/// Shared `reqwest` client. Cheap to clone; connections are pooled.
#[derive(Debug, Clone)]
pub struct ReqwestHttpClient {
    client: reqwest::Client,
}

impl ReqwestHttpClient {
    pub fn new() -> Result<Self, HttpError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| HttpError::Transport(format!("failed to create HTTP client: {e}")))?;
        Ok(Self { client })
    }

    /// Wrap an already configured client.
    pub fn from_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl HttpClient for ReqwestHttpClient {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, HttpError> {
        let method = Method::from_bytes(request.method.as_bytes())
            .map_err(|_| HttpError::InvalidRequest(format!("invalid method '{}'", request.method)))?;

        let mut builder = self
            .client
            .request(method, &request.url)
            .timeout(request.timeout);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                HttpError::Timeout(request.timeout)
            } else if e.is_builder() {
                HttpError::InvalidRequest(e.to_string())
            } else {
                HttpError::Transport(e.to_string())
            }
        })?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .map(|(k, v)| {
                (
                    k.as_str().to_string(),
                    String::from_utf8_lossy(v.as_bytes()).into_owned(),
                )
            })
            .collect();
        let body = response.text().await.map_err(|e| {
            if e.is_timeout() {
                HttpError::Timeout(request.timeout)
            } else {
                HttpError::Transport(format!("failed to read body: {e}"))
            }
        })?;

        tracing::debug!(url = %request.url, status, bytes = body.len(), "http response");
        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn request(method: &str, url: &str) -> HttpRequest {
        HttpRequest {
            method: method.to_string(),
            url: url.to_string(),
            headers: Vec::new(),
            timeout: Duration::from_secs(2),
        }
    }

    #[tokio::test]
    async fn test_invalid_url_is_rejected_before_sending() {
        let client = ReqwestHttpClient::new().unwrap();
        let err = client.send(request("GET", "{{missing}}")).await.unwrap_err();
        assert!(matches!(
            err,
            HttpError::InvalidRequest(_) | HttpError::Transport(_)
        ));
    }

    #[tokio::test]
    async fn test_invalid_method() {
        let client = ReqwestHttpClient::new().unwrap();
        let err = client
            .send(request("NOT A METHOD", "http://localhost/"))
            .await
            .unwrap_err();
        assert!(matches!(err, HttpError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn test_connection_refused_is_transport() {
        let client = ReqwestHttpClient::new().unwrap();
        // Port 9 (discard) on loopback is closed in test environments.
        let err = client
            .send(request("GET", "http://127.0.0.1:9/"))
            .await
            .unwrap_err();
        assert!(matches!(err, HttpError::Transport(_) | HttpError::Timeout(_)));
    }
}
