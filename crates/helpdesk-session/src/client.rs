//! Authenticated request client.
//!
//! Every screen talks to the backend through [`AuthClient::fetch_with_auth`].
//! It attaches the session's bearer token and, when the backend answers 401,
//! refreshes the session once and replays the call once.

use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Method, StatusCode};

use crate::error::SessionError;
use crate::profile::UserProfile;
use crate::resolver::{AuthEnvelope, ONBOARDING_PATH, PROFILE_PATH};
use crate::session::SessionManager;
use crate::transport::{join_url, ApiRequest, ApiResponse, RequestOptions};

/// HTTP client bound to one [`SessionManager`].
#[derive(Clone, Debug)]
pub struct AuthClient {
    session: SessionManager,
}

impl AuthClient {
    pub fn new(session: SessionManager) -> Self {
        Self { session }
    }

    pub fn session(&self) -> &SessionManager {
        &self.session
    }

    /// Send `path` (relative to the configured base) with the session token.
    ///
    /// The response comes back untouched, including non-401 failures and
    /// `200 {"success": false}` bodies; callers inspect both.
    pub async fn fetch_with_auth(
        &self,
        path: &str,
        options: RequestOptions,
    ) -> Result<ApiResponse, SessionError> {
        let token = match self.session.current_token().await {
            Some(token) => token,
            None => {
                tracing::warn!("fetch_with_auth({}) without a session, forcing logout", path);
                self.session.logout(true).await;
                return Err(SessionError::NoSession);
            }
        };

        let response = self.send(path, &options, &token).await?;
        if response.status != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        tracing::info!("{} returned 401, refreshing session once", path);
        match self.session.refresh_shared().await {
            Ok(_) => {}
            Err(e) if e.is_transient() => {
                tracing::warn!("Session refresh for {} failed transiently: {}", path, e);
                return Err(e);
            }
            Err(e) if e.is_unauthorized() => {
                tracing::info!("Session for {} is no longer valid, logging out", path);
                self.session.logout(true).await;
                return Err(e);
            }
            Err(e) => {
                tracing::warn!("Session refresh for {} failed, logging out: {}", path, e);
                self.session.logout(true).await;
                return Err(e);
            }
        }

        let token = match self.session.current_token().await {
            Some(token) => token,
            None => {
                self.session.logout(true).await;
                return Err(SessionError::NoSession);
            }
        };

        tracing::debug!("Replaying {} after session refresh", path);
        self.send(path, &options, &token).await
    }

    async fn send(
        &self,
        path: &str,
        options: &RequestOptions,
        token: &str,
    ) -> Result<ApiResponse, SessionError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.extend(options.headers.clone());
        let bearer = HeaderValue::from_str(&format!("Bearer {}", token))
            .map_err(|_| SessionError::Unauthorized)?;
        headers.insert(AUTHORIZATION, bearer);

        let resolver = self.session.resolver();
        let request = ApiRequest {
            method: options.method.clone().unwrap_or(Method::GET),
            url: join_url(resolver.base_url(), path),
            headers,
            body: options.body.clone(),
        };

        resolver.transport().send(request).await
    }

    /// Submit the onboarding form.
    /// POST /v1/auth/onboarding
    pub async fn complete_onboarding(
        &self,
        body: serde_json::Value,
    ) -> Result<Option<UserProfile>, SessionError> {
        self.profile_call(ONBOARDING_PATH, Method::POST, body).await
    }

    /// Update the current user's profile.
    /// PUT /v1/auth/profile
    pub async fn update_profile(
        &self,
        body: serde_json::Value,
    ) -> Result<Option<UserProfile>, SessionError> {
        self.profile_call(PROFILE_PATH, Method::PUT, body).await
    }

    async fn profile_call(
        &self,
        path: &str,
        method: Method,
        body: serde_json::Value,
    ) -> Result<Option<UserProfile>, SessionError> {
        let response = self
            .fetch_with_auth(path, RequestOptions::json(method, body))
            .await?;
        let envelope = AuthEnvelope::from_response(&response)?;

        match envelope.user.as_ref() {
            Some(raw) => {
                let profile = UserProfile::normalize(raw)?;
                self.session.apply_profile(profile.clone()).await;
                Ok(Some(profile))
            }
            None => Ok(self.session.refresh_session().await),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::ProfileResolver;
    use crate::session::{SessionEvent, SessionOptions, SessionState};
    use crate::testing::MockTransport;
    use crate::token_store::{MemoryTokenStore, TokenStore};
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    async fn client_with(store: &MemoryTokenStore, mock: &MockTransport) -> AuthClient {
        let resolver = ProfileResolver::new(Arc::new(mock.clone()), "http://api.test");
        let session =
            SessionManager::new(Arc::new(store.clone()), resolver, SessionOptions::default());
        AuthClient::new(session)
    }

    fn logged_in_store(token: &str) -> MemoryTokenStore {
        let store = MemoryTokenStore::default();
        store.set(token, 7);
        store
    }

    #[tokio::test]
    async fn test_attaches_bearer_and_default_content_type() {
        let store = logged_in_store("T1");
        let mock = MockTransport::new();
        mock.on("/v1/tickets", StatusCode::OK, json!({"success": true, "tickets": []}));
        let client = client_with(&store, &mock).await;

        let opts = RequestOptions::get()
            .header("Authorization", "Bearer spoofed")
            .header("X-Requested-With", "helpdesk");
        let resp = client.fetch_with_auth("/v1/tickets", opts).await.unwrap();
        assert!(resp.ok());

        let sent = &mock.requests()[0];
        assert_eq!(sent.url, "http://api.test/v1/tickets");
        assert_eq!(sent.bearer_token(), Some("T1"));
        assert_eq!(sent.headers.get(CONTENT_TYPE).unwrap(), "application/json");
        assert_eq!(sent.headers.get("x-requested-with").unwrap(), "helpdesk");
    }

    #[tokio::test]
    async fn test_caller_content_type_wins() {
        let store = logged_in_store("T1");
        let mock = MockTransport::new();
        mock.push_status(StatusCode::NO_CONTENT);
        let client = client_with(&store, &mock).await;

        let opts = RequestOptions::with_method(Method::DELETE).header("Content-Type", "text/plain");
        client.fetch_with_auth("/v1/roles/3", opts).await.unwrap();

        let sent = &mock.requests()[0];
        assert_eq!(sent.method, Method::DELETE);
        assert_eq!(sent.headers.get(CONTENT_TYPE).unwrap(), "text/plain");
    }

    #[tokio::test]
    async fn test_no_token_forces_logout_without_network() {
        let store = MemoryTokenStore::default();
        let mock = MockTransport::new();
        let client = client_with(&store, &mock).await;
        let mut events = client.session().events();

        let err = tokio_test::assert_err!(
            client.fetch_with_auth("/v1/tickets", RequestOptions::get()).await
        );

        assert_eq!(err, SessionError::NoSession);
        assert!(mock.requests().is_empty());
        let mut forced = false;
        while let Ok(event) = events.try_recv() {
            forced |= event == SessionEvent::ForcedLogout;
        }
        assert!(forced);
    }

    #[tokio::test]
    async fn test_401_refreshes_once_and_replays_with_new_token() {
        let store = logged_in_store("T1");
        let mock = MockTransport::new();
        mock.on("/v1/tickets", StatusCode::UNAUTHORIZED, json!({}));
        mock.on("/v1/tickets", StatusCode::OK, json!({"success": true}));
        mock.on(
            PROFILE_PATH,
            StatusCode::OK,
            json!({"success": true, "user": {"id": 1}, "token": "T2"}),
        );
        let client = client_with(&store, &mock).await;

        let resp = tokio_test::assert_ok!(
            client.fetch_with_auth("/v1/tickets", RequestOptions::get()).await
        );
        assert!(resp.ok());

        assert_eq!(mock.count(PROFILE_PATH), 1);
        assert_eq!(mock.count("/v1/tickets"), 2);
        let replay = mock.requests().into_iter().last().unwrap();
        assert_eq!(replay.bearer_token(), Some("T2"));
        assert_eq!(store.get().as_deref(), Some("T2"));
    }

    #[tokio::test]
    async fn test_replay_401_is_returned_without_second_retry() {
        let store = logged_in_store("T1");
        let mock = MockTransport::new();
        mock.on("/v1/webhooks", StatusCode::UNAUTHORIZED, json!({}));
        mock.on("/v1/webhooks", StatusCode::UNAUTHORIZED, json!({}));
        mock.on(PROFILE_PATH, StatusCode::OK, json!({"success": true, "user": {"id": 1}}));
        let client = client_with(&store, &mock).await;

        let resp = client
            .fetch_with_auth("/v1/webhooks", RequestOptions::get())
            .await
            .unwrap();
        assert_eq!(resp.status, StatusCode::UNAUTHORIZED);
        assert_eq!(mock.count(PROFILE_PATH), 1);
        assert_eq!(mock.count("/v1/webhooks"), 2);
    }

    #[tokio::test]
    async fn test_refresh_401_forces_logout() {
        let store = logged_in_store("T1");
        let mock = MockTransport::new();
        mock.on("/v1/clients", StatusCode::UNAUTHORIZED, json!({}));
        mock.on(PROFILE_PATH, StatusCode::UNAUTHORIZED, json!({}));
        let client = client_with(&store, &mock).await;
        let mut events = client.session().events();

        let err = client
            .fetch_with_auth("/v1/clients", RequestOptions::get())
            .await
            .unwrap_err();

        assert_eq!(err, SessionError::Unauthorized);
        assert_eq!(store.get(), None);
        assert!(matches!(
            client.session().state(),
            SessionState::Unauthenticated(_)
        ));
        assert_eq!(mock.count("/v1/clients"), 1);

        let mut forced = false;
        while let Ok(event) = events.try_recv() {
            forced |= event == SessionEvent::ForcedLogout;
        }
        assert!(forced);
    }

    #[tokio::test]
    async fn test_transient_refresh_failure_keeps_session() {
        let store = logged_in_store("T1");
        let mock = MockTransport::new();
        mock.on("/v1/inbox", StatusCode::UNAUTHORIZED, json!({}));
        mock.on_error(PROFILE_PATH, SessionError::Transport("timed out".into()));
        let client = client_with(&store, &mock).await;

        let err = client
            .fetch_with_auth("/v1/inbox", RequestOptions::get())
            .await
            .unwrap_err();
        assert!(err.is_transient());
        assert_eq!(store.get().as_deref(), Some("T1"));
        assert_eq!(client.session().current_token().await.as_deref(), Some("T1"));
    }

    #[tokio::test]
    async fn test_non_401_failures_pass_through() {
        let store = logged_in_store("T1");
        let mock = MockTransport::new();
        mock.on("/v1/roles", StatusCode::INTERNAL_SERVER_ERROR, json!({"error": "boom"}));
        mock.on("/v1/roles", StatusCode::OK, json!({"success": false, "message": "duplicate"}));
        let client = client_with(&store, &mock).await;

        let resp = client
            .fetch_with_auth("/v1/roles", RequestOptions::json(Method::POST, json!({"name": "x"})))
            .await
            .unwrap();
        assert_eq!(resp.status, StatusCode::INTERNAL_SERVER_ERROR);

        let resp = client
            .fetch_with_auth("/v1/roles", RequestOptions::json(Method::POST, json!({"name": "x"})))
            .await
            .unwrap();
        assert!(resp.ok());
        let body: serde_json::Value = resp.json().unwrap();
        assert_eq!(body["success"], false);
        assert_eq!(mock.count(PROFILE_PATH), 0);
    }

    #[tokio::test]
    async fn test_transport_error_does_not_touch_session() {
        let store = logged_in_store("T1");
        let mock = MockTransport::new();
        mock.on_error("/v1/tickets", SessionError::Transport("dns".into()));
        let client = client_with(&store, &mock).await;

        let err = client
            .fetch_with_auth("/v1/tickets", RequestOptions::get())
            .await
            .unwrap_err();
        assert!(err.is_transient());
        assert_eq!(client.session().state(), SessionState::Idle);
        assert_eq!(store.get().as_deref(), Some("T1"));
    }

    #[tokio::test]
    async fn test_concurrent_401s_share_one_refresh() {
        let store = logged_in_store("T1");
        let mock = MockTransport::new();
        mock.set_delay(Duration::from_millis(20));
        mock.on("/v1/tickets", StatusCode::UNAUTHORIZED, json!({}));
        mock.on("/v1/clients", StatusCode::UNAUTHORIZED, json!({}));
        mock.on("/v1/tickets", StatusCode::OK, json!({"success": true}));
        mock.on("/v1/clients", StatusCode::OK, json!({"success": true}));
        mock.on(PROFILE_PATH, StatusCode::OK, json!({"success": true, "user": {"id": 1}}));
        let client = client_with(&store, &mock).await;

        let (a, b) = tokio::join!(
            client.fetch_with_auth("/v1/tickets", RequestOptions::get()),
            client.fetch_with_auth("/v1/clients", RequestOptions::get()),
        );
        assert!(a.unwrap().ok());
        assert!(b.unwrap().ok());
        assert_eq!(mock.count(PROFILE_PATH), 1);
    }

    #[tokio::test]
    async fn test_update_profile_applies_returned_user() {
        let store = logged_in_store("T1");
        let mock = MockTransport::new();
        mock.on(
            PROFILE_PATH,
            StatusCode::OK,
            json!({"success": true, "user": {"id": 1, "name": "Renamed", "language": "en"}}),
        );
        let client = client_with(&store, &mock).await;

        let profile = client
            .update_profile(json!({"name": "Renamed"}))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(profile.name, "Renamed");
        assert_eq!(client.session().user().unwrap().language.as_deref(), Some("en"));
        assert_eq!(mock.requests()[0].method, Method::PUT);
    }

    #[tokio::test]
    async fn test_update_without_user_falls_back_to_refresh() {
        let store = logged_in_store("T1");
        let mock = MockTransport::new();
        mock.on(PROFILE_PATH, StatusCode::OK, json!({"success": true}));
        mock.on(
            PROFILE_PATH,
            StatusCode::OK,
            json!({"success": true, "user": {"id": 1, "name": "Fresh"}}),
        );
        let client = client_with(&store, &mock).await;

        let profile = client
            .update_profile(json!({"name": "Fresh"}))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(profile.name, "Fresh");
        assert_eq!(client.session().user().unwrap().name, "Fresh");

        let methods: Vec<Method> = mock.requests().iter().map(|r| r.method.clone()).collect();
        assert_eq!(methods, vec![Method::PUT, Method::GET]);
    }

    #[tokio::test]
    async fn test_onboarding_applies_returned_user() {
        let store = logged_in_store("T1");
        let mock = MockTransport::new();
        mock.on(
            ONBOARDING_PATH,
            StatusCode::OK,
            json!({"success": true, "user": {"id": 1, "name": "Onboarded", "isAdmin": "1"}}),
        );
        let client = client_with(&store, &mock).await;

        let profile = client
            .complete_onboarding(json!({"company": "Acme"}))
            .await
            .unwrap()
            .unwrap();
        assert!(profile.is_admin);
        assert!(client.session().is_admin());
        assert_eq!(store.read_cached_profile().unwrap().name, "Onboarded");
        assert_eq!(mock.count(PROFILE_PATH), 0);

        let sent = &mock.requests()[0];
        assert_eq!(sent.method, Method::POST);
        assert_eq!(sent.body, Some(json!({"company": "Acme"})));
    }

    #[tokio::test]
    async fn test_onboarding_rejected() {
        let store = logged_in_store("T1");
        let mock = MockTransport::new();
        mock.on(
            ONBOARDING_PATH,
            StatusCode::OK,
            json!({"success": false, "message": "company name required"}),
        );
        let client = client_with(&store, &mock).await;

        let err = client.complete_onboarding(json!({})).await.unwrap_err();
        assert_eq!(err, SessionError::Rejected("company name required".to_string()));
    }
}
