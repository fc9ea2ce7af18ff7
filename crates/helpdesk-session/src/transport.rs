//! HTTP transport seam.
//!
//! Everything that talks to the backend goes through [`HttpTransport`], so
//! the session core can be driven by reqwest in production and by a scripted
//! transport in tests.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;

use crate::error::SessionError;

/// Caller-supplied request options, mirroring the browser fetch shape.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    /// HTTP method (default: GET).
    pub method: Option<Method>,
    /// JSON body.
    pub body: Option<serde_json::Value>,
    /// Extra headers, merged over the defaults.
    pub headers: HeaderMap,
}

impl RequestOptions {
    pub fn get() -> Self {
        Self::default()
    }

    pub fn with_method(method: Method) -> Self {
        Self {
            method: Some(method),
            ..Default::default()
        }
    }

    pub fn json(method: Method, body: serde_json::Value) -> Self {
        Self {
            method: Some(method),
            body: Some(body),
            headers: HeaderMap::new(),
        }
    }

    /// Add a header. Invalid names or values are dropped with a warning.
    pub fn header(mut self, name: &str, value: &str) -> Self {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                self.headers.insert(name, value);
            }
            _ => tracing::warn!("Dropping invalid header: {}", name),
        }
        self
    }
}

/// Fully resolved request handed to the transport.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
    pub body: Option<serde_json::Value>,
}

impl ApiRequest {
    /// Bearer token carried by this request, if any.
    pub fn bearer_token(&self) -> Option<&str> {
        self.headers
            .get(reqwest::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
    }
}

/// Raw response; status and body are passed through untouched.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl ApiResponse {
    pub fn new(status: StatusCode, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }

    /// Equivalent of `response.ok`.
    pub fn ok(&self) -> bool {
        self.status.is_success()
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, SessionError> {
        Ok(serde_json::from_slice(&self.body)?)
    }
}

/// Sends a single request. Implementations must not retry.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse, SessionError>;
}

/// Production transport backed by reqwest.
#[derive(Clone, Debug)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();

        Self { client }
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse, SessionError> {
        let mut builder = self
            .client
            .request(request.method.clone(), &request.url)
            .headers(request.headers);

        if let Some(body) = &request.body {
            builder = builder.body(serde_json::to_vec(body)?);
        }

        let response = builder.send().await?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await?.to_vec();

        tracing::debug!("{} {} -> {}", request.method, request.url, status);

        Ok(ApiResponse {
            status,
            headers,
            body,
        })
    }
}

/// Join a relative API path onto the configured base origin.
pub fn join_url(base_url: &str, path: &str) -> String {
    if path.starts_with("http://") || path.starts_with("https://") {
        return path.to_string();
    }
    format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}
