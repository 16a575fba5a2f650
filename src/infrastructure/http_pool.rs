//! HTTP Session Pool
//!
//! Pooled `reqwest` clients bound to one base URL, with retry and linear
//! backoff on failed requests.

use crate::domain::ports::ConnectionFactory;
use crate::infrastructure::connection_pool::{Pool, PoolConfig, PoolError, PoolStats};
use crate::infrastructure::retry::retry_with_backoff;
use async_trait::async_trait;
use reqwest::Method;
use serde_json::Value;
use std::time::Duration;

/// Decoded response body.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseBody {
    Json(Value),
    Text(String),
}

/// A completed upstream response.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: ResponseBody,
}

impl HttpResponse {
    /// JSON payload, if the upstream answered with JSON.
    pub fn json(&self) -> Option<&Value> {
        match &self.body {
            ResponseBody::Json(value) => Some(value),
            ResponseBody::Text(_) => None,
        }
    }

    pub fn text(&self) -> Option<&str> {
        match &self.body {
            ResponseBody::Text(text) => Some(text),
            ResponseBody::Json(_) => None,
        }
    }
}

/// Join a base URL and a path without doubling slashes.
/// Absolute URLs are passed through unchanged.
pub(crate) fn join_url(base: &str, path: &str) -> String {
    if path.starts_with("http://") || path.starts_with("https://") {
        return path.to_string();
    }
    if path.is_empty() {
        return base.trim_end_matches('/').to_string();
    }
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

/// Read a response body as JSON when the content type says so, text otherwise.
pub(crate) async fn read_body(resp: reqwest::Response) -> Result<(u16, ResponseBody), String> {
    let status = resp.status().as_u16();
    let is_json = resp
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.contains("json"))
        .unwrap_or(false);

    if is_json {
        let value = resp
            .json::<Value>()
            .await
            .map_err(|e| format!("invalid json body: {}", e))?;
        Ok((status, ResponseBody::Json(value)))
    } else {
        let text = resp
            .text()
            .await
            .map_err(|e| format!("failed to read body: {}", e))?;
        Ok((status, ResponseBody::Text(text)))
    }
}

/// Opens `reqwest` clients for one upstream.
pub struct HttpSessionFactory {
    base_url: String,
    timeout: Duration,
}

impl HttpSessionFactory {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            base_url: base_url.into(),
            timeout,
        }
    }
}

#[async_trait]
impl ConnectionFactory for HttpSessionFactory {
    type Connection = reqwest::Client;

    fn target(&self) -> &str {
        &self.base_url
    }

    async fn connect(&self) -> Result<reqwest::Client, PoolError> {
        reqwest::Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|e| PoolError::Connect(format!("client error: {}", e)))
    }
}

/// Pool of HTTP sessions against a single base URL.
pub struct HttpPool {
    pool: Pool<HttpSessionFactory>,
}

impl HttpPool {
    pub fn new(base_url: impl Into<String>, config: PoolConfig) -> Self {
        let factory = HttpSessionFactory::new(base_url, config.timeout);
        Self {
            pool: Pool::new(factory, config),
        }
    }

    pub fn base_url(&self) -> &str {
        self.pool.factory().target()
    }

    pub fn pool(&self) -> &Pool<HttpSessionFactory> {
        &self.pool
    }

    pub async fn initialize(&self) -> Result<(), PoolError> {
        self.pool.initialize().await
    }

    /// GET `path` with query parameters.
    pub async fn get(&self, path: &str, query: &[(&str, &str)]) -> Result<HttpResponse, PoolError> {
        self.send(Method::GET, path, query, None).await
    }

    /// POST a JSON body to `path`.
    pub async fn post(&self, path: &str, body: &Value) -> Result<HttpResponse, PoolError> {
        self.send(Method::POST, path, &[], Some(body)).await
    }

    /// Send a request, retrying failures with linear backoff.
    ///
    /// Non-2xx statuses count as failures. After the last attempt the final
    /// error is returned.
    pub async fn send(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        body: Option<&Value>,
    ) -> Result<HttpResponse, PoolError> {
        let config = self.pool.config();
        let url = join_url(self.base_url(), path);

        retry_with_backoff(
            config.retry_attempts,
            config.retry_delay,
            PoolError::is_retryable,
            |attempt| {
                let method = method.clone();
                let url = url.clone();
                async move {
                    tracing::debug!("{} {} (attempt {})", method, url, attempt);
                    self.send_once(method, &url, query, body).await
                }
            },
        )
        .await
        .map_err(|e| {
            tracing::error!("request to {} failed: {}", url, e);
            e
        })
    }

    async fn send_once(
        &self,
        method: Method,
        url: &str,
        query: &[(&str, &str)],
        body: Option<&Value>,
    ) -> Result<HttpResponse, PoolError> {
        let client = self.pool.acquire().await?;

        let mut request = client.request(method, url);
        if !query.is_empty() {
            request = request.query(query);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let resp = request
            .send()
            .await
            .map_err(|e| PoolError::Request(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(PoolError::Status(resp.status().as_u16()));
        }

        let (status, body) = read_body(resp).await.map_err(PoolError::Request)?;
        Ok(HttpResponse { status, body })
    }

    pub fn stats(&self) -> PoolStats {
        self.pool.stats()
    }

    pub async fn close_all(&self) {
        self.pool.close_all().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_url() {
        assert_eq!(join_url("http://a:1", "/x"), "http://a:1/x");
        assert_eq!(join_url("http://a:1/", "x"), "http://a:1/x");
        assert_eq!(join_url("http://a:1/", "/x/y"), "http://a:1/x/y");
        assert_eq!(join_url("http://a:1/", ""), "http://a:1");
        assert_eq!(join_url("http://a:1", "https://b/z"), "https://b/z");
    }

    #[test]
    fn test_response_accessors() {
        let json = HttpResponse {
            status: 200,
            body: ResponseBody::Json(serde_json::json!({"ok": true})),
        };
        assert_eq!(json.json().unwrap()["ok"], true);
        assert!(json.text().is_none());

        let text = HttpResponse {
            status: 200,
            body: ResponseBody::Text("pong".to_string()),
        };
        assert_eq!(text.text(), Some("pong"));
        assert!(text.json().is_none());
    }

    #[tokio::test]
    async fn test_uninitialized_pool_is_not_retried() {
        let pool = HttpPool::new(
            "http://127.0.0.1:1",
            PoolConfig {
                retry_attempts: 3,
                retry_delay: Duration::from_secs(5),
                ..Default::default()
            },
        );
        let started = std::time::Instant::now();
        let result = pool.get("/", &[]).await;
        assert_eq!(result, Err(PoolError::NotInitialized));
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_factory_target() {
        let factory = HttpSessionFactory::new("http://upstream", Duration::from_secs(1));
        assert_eq!(factory.target(), "http://upstream");
        assert!(factory.connect().await.is_ok());
    }
}
