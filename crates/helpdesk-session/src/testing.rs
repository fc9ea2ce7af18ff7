//! Scripted transport for unit tests.

use async_trait::async_trait;
use reqwest::StatusCode;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::SessionError;
use crate::transport::{ApiRequest, ApiResponse, HttpTransport};

type Scripted = Result<ApiResponse, SessionError>;

#[derive(Default)]
struct MockInner {
    default_queue: VecDeque<Scripted>,
    by_path: HashMap<String, VecDeque<Scripted>>,
    requests: Vec<ApiRequest>,
    delay: Option<Duration>,
}

/// Replays queued responses in order and records every request.
///
/// Responses queued with [`MockTransport::on`] are served to requests whose
/// URL ends with that path; everything else comes from the default queue.
#[derive(Clone, Default)]
pub struct MockTransport {
    inner: Arc<Mutex<MockInner>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, path: Option<&str>, item: Scripted) {
        let mut inner = self.inner.lock().unwrap();
        match path {
            Some(path) => inner
                .by_path
                .entry(path.to_string())
                .or_default()
                .push_back(item),
            None => inner.default_queue.push_back(item),
        }
    }

    pub fn push_json(&self, status: StatusCode, body: serde_json::Value) {
        self.push(None, Ok(ApiResponse::new(status, body.to_string())));
    }

    pub fn push_raw(&self, status: StatusCode, body: &str) {
        self.push(None, Ok(ApiResponse::new(status, body)));
    }

    pub fn push_status(&self, status: StatusCode) {
        self.push(None, Ok(ApiResponse::new(status, Vec::new())));
    }

    pub fn push_error(&self, error: SessionError) {
        self.push(None, Err(error));
    }

    /// Queue a JSON response for requests to `path`.
    pub fn on(&self, path: &str, status: StatusCode, body: serde_json::Value) {
        self.push(Some(path), Ok(ApiResponse::new(status, body.to_string())));
    }

    /// Queue a transport failure for requests to `path`.
    pub fn on_error(&self, path: &str, error: SessionError) {
        self.push(Some(path), Err(error));
    }

    /// Delay every response, to hold requests in flight.
    pub fn set_delay(&self, delay: Duration) {
        self.inner.lock().unwrap().delay = Some(delay);
    }

    pub fn requests(&self) -> Vec<ApiRequest> {
        self.inner.lock().unwrap().requests.clone()
    }

    pub fn count(&self, path: &str) -> usize {
        self.requests()
            .iter()
            .filter(|r| r.url.ends_with(path))
            .count()
    }
}

#[async_trait]
impl HttpTransport for MockTransport {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse, SessionError> {
        let (delay, scripted) = {
            let mut inner = self.inner.lock().unwrap();
            inner.requests.push(request.clone());
            let from_path = inner
                .by_path
                .iter_mut()
                .find(|(path, queue)| request.url.ends_with(path.as_str()) && !queue.is_empty())
                .and_then(|(_, queue)| queue.pop_front());
            let scripted = from_path.or_else(|| inner.default_queue.pop_front());
            (inner.delay, scripted)
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        scripted.unwrap_or_else(|| {
            Err(SessionError::Transport(format!(
                "no scripted response for {} {}",
                request.method, request.url
            )))
        })
    }
}
