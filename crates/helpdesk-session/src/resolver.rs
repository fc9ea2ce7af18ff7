//! Auth endpoint client: profile resolution and credential login.

use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Method, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;

use crate::error::SessionError;
use crate::profile::{truthy, UserProfile};
use crate::transport::{join_url, ApiRequest, ApiResponse, HttpTransport};

pub const PROFILE_PATH: &str = "/v1/auth/profile";
pub const LOGIN_PATH: &str = "/v1/auth/login";
pub const ONBOARDING_PATH: &str = "/v1/auth/onboarding";

/// `{success, message?, user?, token?}` body shared by the auth endpoints.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AuthEnvelope {
    #[serde(default)]
    pub success: Value,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub user: Option<Value>,
    #[serde(default)]
    pub token: Option<String>,
}

impl AuthEnvelope {
    /// Decode a 2xx body, turning `{success:false}` into `Rejected`.
    pub fn from_response(response: &ApiResponse) -> Result<Self, SessionError> {
        if response.status == StatusCode::UNAUTHORIZED {
            return Err(SessionError::Unauthorized);
        }
        if !response.ok() {
            return Err(SessionError::Http {
                status: response.status.as_u16(),
                body: response.text(),
            });
        }

        let envelope: AuthEnvelope = response.json()?;
        if !truthy(&envelope.success) {
            return Err(SessionError::Rejected(envelope.failure_message()));
        }
        Ok(envelope)
    }

    fn failure_message(&self) -> String {
        self.message
            .clone()
            .or_else(|| self.error.clone())
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| "request was not successful".to_string())
    }

    /// The normalized `user` object; missing counts as malformed.
    pub fn profile(&self) -> Result<UserProfile, SessionError> {
        let raw = self
            .user
            .as_ref()
            .ok_or_else(|| SessionError::Malformed("response has no user".to_string()))?;
        UserProfile::normalize(raw)
    }

    /// A non-empty `token` field, if the backend sent one.
    pub fn issued_token(&self) -> Option<String> {
        self.token
            .as_ref()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
    }
}

/// Result of a successful profile resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedProfile {
    pub user: UserProfile,
    /// Rolling renewal: a fresh token returned alongside the profile.
    pub renewed_token: Option<String>,
}

/// Result of a successful credential login.
#[derive(Debug, Clone, PartialEq)]
pub struct LoginGrant {
    pub token: String,
    pub user: UserProfile,
}

/// Talks to the `/v1/auth/*` endpoints.
#[derive(Clone)]
pub struct ProfileResolver {
    transport: Arc<dyn HttpTransport>,
    base_url: String,
}

impl ProfileResolver {
    pub fn new(transport: Arc<dyn HttpTransport>, base_url: impl Into<String>) -> Self {
        Self {
            transport,
            base_url: base_url.into(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn transport(&self) -> Arc<dyn HttpTransport> {
        self.transport.clone()
    }

    /// Exchange a token for the canonical user record.
    /// GET /v1/auth/profile
    pub async fn resolve(&self, token: &str) -> Result<ResolvedProfile, SessionError> {
        let mut headers = HeaderMap::new();
        let bearer = HeaderValue::from_str(&format!("Bearer {}", token))
            .map_err(|_| SessionError::Unauthorized)?;
        headers.insert(AUTHORIZATION, bearer);

        let response = self
            .transport
            .send(ApiRequest {
                method: Method::GET,
                url: join_url(&self.base_url, PROFILE_PATH),
                headers,
                body: None,
            })
            .await?;

        let envelope = AuthEnvelope::from_response(&response)?;
        let user = envelope.profile()?;
        let renewed_token = envelope.issued_token().filter(|t| t != token);

        tracing::debug!(
            "Profile resolved: user={}, admin={}, agent={}, renewed={}",
            user.id,
            user.is_admin,
            user.is_agent,
            renewed_token.is_some()
        );

        Ok(ResolvedProfile {
            user,
            renewed_token,
        })
    }

    /// Exchange credentials for a token and profile.
    /// POST /v1/auth/login with { email, password }
    pub async fn login(&self, email: &str, password: &str) -> Result<LoginGrant, SessionError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let response = self
            .transport
            .send(ApiRequest {
                method: Method::POST,
                url: join_url(&self.base_url, LOGIN_PATH),
                headers,
                body: Some(serde_json::json!({ "email": email, "password": password })),
            })
            .await?;

        // Bad credentials are a form error, not a lost session.
        let envelope = match AuthEnvelope::from_response(&response) {
            Err(SessionError::Unauthorized) => {
                let message = response
                    .json::<AuthEnvelope>()
                    .ok()
                    .map(|e| e.failure_message())
                    .unwrap_or_else(|| "Invalid credentials".to_string());
                return Err(SessionError::Rejected(message));
            }
            other => other?,
        };

        let token = envelope
            .issued_token()
            .ok_or_else(|| SessionError::Malformed("login response has no token".to_string()))?;
        let user = envelope.profile()?;

        tracing::info!("Login accepted for {}", email);
        Ok(LoginGrant { token, user })
    }
}

impl std::fmt::Debug for ProfileResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProfileResolver")
            .field("base_url", &self.base_url)
            .finish()
    }
}
