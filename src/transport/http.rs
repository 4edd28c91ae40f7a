use crate::drivers::{AuthScheme, DriverRequest};
use reqwest::Proxy;
use std::env;
use std::time::Duration;

use super::TransportError;

/// Header carrying our per-call correlation id.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Pooled HTTP client bound to one provider's base URL and credential.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl HttpTransport {
    pub fn new(
        base_url: &str,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, TransportError> {
        let mut builder = reqwest::Client::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(
                env::var("PROMPT_ENGINE_HTTP_POOL_MAX_IDLE_PER_HOST")
                    .ok()
                    .and_then(|s| s.parse::<usize>().ok())
                    .unwrap_or(32),
            )
            .pool_idle_timeout(Some(Duration::from_secs(
                env::var("PROMPT_ENGINE_HTTP_POOL_IDLE_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse::<u64>().ok())
                    .unwrap_or(90),
            )));

        if let Ok(proxy_url) = env::var("PROMPT_ENGINE_PROXY_URL") {
            let proxy = Proxy::all(&proxy_url).map_err(|e| {
                TransportError::Other(format!("invalid proxy url '{}': {}", proxy_url, e))
            })?;
            builder = builder.proxy(proxy);
        }

        let client = builder
            .build()
            .map_err(|e| TransportError::Other(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// POST the driver's JSON body and return the decoded 2xx response.
    ///
    /// Non-2xx answers become [`TransportError::Status`] with the body text.
    pub async fn post_json(
        &self,
        request: &DriverRequest,
    ) -> Result<serde_json::Value, TransportError> {
        let url = format!("{}{}", self.base_url, request.path);
        let request_id = uuid::Uuid::new_v4().to_string();

        let mut req = self
            .client
            .post(&url)
            .json(&request.body)
            .header(REQUEST_ID_HEADER, &request_id);

        req = match request.auth {
            AuthScheme::Bearer => req.bearer_auth(&self.api_key),
            AuthScheme::Header(name) => req.header(name, &self.api_key),
            AuthScheme::QueryParam(name) => req.query(&[(name, self.api_key.as_str())]),
        };

        for (k, v) in &request.headers {
            req = req.header(k, v);
        }

        tracing::debug!(url = %url, request_id = %request_id, "sending vendor request");

        let response = req.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let bytes = response.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|e| TransportError::Decode(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn request(auth: AuthScheme) -> DriverRequest {
        DriverRequest {
            path: "/chat/completions".into(),
            headers: HashMap::new(),
            body: serde_json::json!({"model": "gpt-4"}),
            auth,
        }
    }

    #[tokio::test]
    async fn test_bearer_auth_and_request_id() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/chat/completions")
            .match_header("authorization", "Bearer sk-test")
            .match_header(REQUEST_ID_HEADER, mockito::Matcher::Any)
            .with_status(200)
            .with_body(r#"{"ok": true}"#)
            .create_async()
            .await;

        let transport =
            HttpTransport::new(&server.url(), "sk-test", Duration::from_secs(5)).unwrap();
        let body = transport.post_json(&request(AuthScheme::Bearer)).await.unwrap();
        assert_eq!(body["ok"], true);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_query_param_auth() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/chat/completions")
            .match_query(mockito::Matcher::UrlEncoded("key".into(), "g-key".into()))
            .with_status(200)
            .with_body("{}")
            .create_async()
            .await;

        let transport =
            HttpTransport::new(&server.url(), "g-key", Duration::from_secs(5)).unwrap();
        transport
            .post_json(&request(AuthScheme::QueryParam("key")))
            .await
            .unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_non_success_status_carries_body() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/chat/completions")
            .with_status(429)
            .with_body("slow down")
            .create_async()
            .await;

        let transport = HttpTransport::new(&server.url(), "k", Duration::from_secs(5)).unwrap();
        let err = transport
            .post_json(&request(AuthScheme::Header("x-api-key")))
            .await
            .unwrap_err();
        match err {
            TransportError::Status { status, body } => {
                assert_eq!(status, 429);
                assert_eq!(body, "slow down");
            }
            other => panic!("expected status error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_non_json_body_is_decode_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/chat/completions")
            .with_status(200)
            .with_body("<html>")
            .create_async()
            .await;

        let transport = HttpTransport::new(&server.url(), "k", Duration::from_secs(5)).unwrap();
        let err = transport
            .post_json(&request(AuthScheme::Bearer))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Decode(_)));
    }
}
