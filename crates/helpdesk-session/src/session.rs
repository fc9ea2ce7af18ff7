//! Session state machine.
//!
//! One [`SessionManager`] is constructed per application instance and
//! handed to everything that needs the current user or a token. It owns
//! the [`SessionState`]; other components only observe it (through
//! [`SessionManager::subscribe`] or [`SessionManager::events`]) or ask for a
//! transition (`login`, `logout`, `refresh_session`).
//!
//! The token store and profile mirror are read once, at construction, and
//! written through on every transition. While running, the in-memory token
//! is authoritative.
//!
//! Refreshes are single-flight: callers arriving while a refresh is in
//! flight await the same shared future instead of issuing another profile
//! request.

use futures::future::{BoxFuture, FutureExt, Shared};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch, Mutex, RwLock};

use crate::config::SessionConfig;
use crate::error::SessionError;
use crate::profile::UserProfile;
use crate::resolver::ProfileResolver;
use crate::token_store::{short, TokenStore, DEFAULT_PERSIST_DAYS, OAUTH_PERSIST_DAYS};
use crate::transport::{HttpTransport, ReqwestTransport};

/// Lifecycle state observed by the rest of the application.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum SessionState {
    #[default]
    Idle,
    Loading,
    Authenticated(UserProfile),
    /// Optional error explaining why resolution did not succeed.
    Unauthenticated(Option<SessionError>),
}

/// Tag of a [`SessionState`], for transition logs and events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Idle,
    Loading,
    Authenticated,
    Unauthenticated,
}

impl SessionState {
    pub fn phase(&self) -> SessionPhase {
        match self {
            SessionState::Idle => SessionPhase::Idle,
            SessionState::Loading => SessionPhase::Loading,
            SessionState::Authenticated(_) => SessionPhase::Authenticated,
            SessionState::Unauthenticated(_) => SessionPhase::Unauthenticated,
        }
    }

    /// True until a resolution outcome is known.
    pub fn loading(&self) -> bool {
        matches!(self, SessionState::Idle | SessionState::Loading)
    }

    pub fn user(&self) -> Option<&UserProfile> {
        match self {
            SessionState::Authenticated(user) => Some(user),
            _ => None,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.user().map(|u| u.is_admin).unwrap_or(false)
    }

    pub fn is_agent(&self) -> bool {
        self.user().map(|u| u.is_agent).unwrap_or(false)
    }

    pub fn error(&self) -> Option<&SessionError> {
        match self {
            SessionState::Unauthenticated(error) => error.as_ref(),
            _ => None,
        }
    }
}

/// Broadcast notifications about the session.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Transition { from: SessionPhase, to: SessionPhase },
    /// `logout(force = true)`; the guard layer must redirect to login now.
    ForcedLogout,
    /// The profile endpoint handed back a fresh token.
    TokenRenewed,
}

/// Cookie lifetimes used when the manager writes a token.
#[derive(Debug, Clone, Copy)]
pub struct SessionOptions {
    pub persist_days: i64,
    pub oauth_persist_days: i64,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            persist_days: DEFAULT_PERSIST_DAYS,
            oauth_persist_days: OAUTH_PERSIST_DAYS,
        }
    }
}

type RefreshOutcome = Result<UserProfile, SessionError>;
type SharedRefresh = Shared<BoxFuture<'static, RefreshOutcome>>;

/// Give up re-resolving after this many token swaps during one refresh.
const MAX_TOKEN_SWAPS: usize = 3;

struct Inner {
    store: Arc<dyn TokenStore>,
    resolver: ProfileResolver,
    options: SessionOptions,
    token: RwLock<Option<String>>,
    state: watch::Sender<SessionState>,
    events: broadcast::Sender<SessionEvent>,
    inflight: Mutex<Option<SharedRefresh>>,
    cached_profile: Option<UserProfile>,
}

/// Cloneable handle to the single session context.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

impl SessionManager {
    /// Build the session context, reading the token store once.
    pub fn new(
        store: Arc<dyn TokenStore>,
        resolver: ProfileResolver,
        options: SessionOptions,
    ) -> Self {
        let token = store.get();
        let cached_profile = store.read_cached_profile();
        tracing::debug!(
            "Session store loaded: token={}, cached_profile={}",
            token.as_deref().map(short).unwrap_or("-"),
            cached_profile.is_some()
        );

        let (state, _) = watch::channel(SessionState::Idle);
        let (events, _) = broadcast::channel(64);

        Self {
            inner: Arc::new(Inner {
                store,
                resolver,
                options,
                token: RwLock::new(token),
                state,
                events,
                inflight: Mutex::new(None),
                cached_profile,
            }),
        }
    }

    /// Build the session context from configuration with the reqwest transport.
    pub fn from_config(config: &SessionConfig, store: Arc<dyn TokenStore>) -> Self {
        let transport: Arc<dyn HttpTransport> = Arc::new(ReqwestTransport::new(
            Duration::from_secs(config.api.timeout_secs),
        ));
        let resolver = ProfileResolver::new(transport, config.base_url());
        let options = SessionOptions {
            persist_days: config.cookie.persist_days,
            oauth_persist_days: config.cookie.oauth_persist_days,
        };
        Self::new(store, resolver, options)
    }

    pub fn resolver(&self) -> &ProfileResolver {
        &self.inner.resolver
    }

    // Observation

    pub fn state(&self) -> SessionState {
        self.inner.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.inner.state.subscribe()
    }

    pub fn events(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    pub fn loading(&self) -> bool {
        self.inner.state.borrow().loading()
    }

    pub fn is_admin(&self) -> bool {
        self.inner.state.borrow().is_admin()
    }

    pub fn is_agent(&self) -> bool {
        self.inner.state.borrow().is_agent()
    }

    pub fn user(&self) -> Option<UserProfile> {
        self.inner.state.borrow().user().cloned()
    }

    pub fn last_error(&self) -> Option<SessionError> {
        self.inner.state.borrow().error().cloned()
    }

    /// Profile mirror as found at startup. For optimistic painting only.
    pub fn cached_profile(&self) -> Option<&UserProfile> {
        self.inner.cached_profile.as_ref()
    }

    pub async fn current_token(&self) -> Option<String> {
        self.inner.token.read().await.clone()
    }

    // Transitions

    /// Apply `next`, write the profile mirror through and announce it.
    fn transition(&self, next: SessionState) {
        match &next {
            SessionState::Authenticated(user) => self.inner.store.cache_profile(user),
            SessionState::Unauthenticated(_) => self.inner.store.clear_cached_profile(),
            SessionState::Idle | SessionState::Loading => {}
        }

        let to = next.phase();
        let from = self.inner.state.send_replace(next).phase();
        tracing::debug!("Session transition: {:?} -> {:?}", from, to);
        let _ = self.inner.events.send(SessionEvent::Transition { from, to });
    }

    /// Resolve the stored token on startup.
    pub async fn bootstrap(&self) -> Option<UserProfile> {
        self.refresh_session().await
    }

    /// Re-resolve the current token. Returns the profile, or `None` with the
    /// reason available from [`SessionManager::last_error`].
    pub async fn refresh_session(&self) -> Option<UserProfile> {
        self.refresh_shared().await.ok()
    }

    /// Single-flight refresh; concurrent callers share one outcome.
    pub(crate) async fn refresh_shared(&self) -> RefreshOutcome {
        let shared = {
            let mut slot = self.inner.inflight.lock().await;
            match slot.as_ref() {
                // A finished future left behind by cancelled waiters is stale.
                Some(pending) if pending.peek().is_none() => {
                    tracing::debug!("Joining in-flight session refresh");
                    pending.clone()
                }
                _ => {
                    let this = self.clone();
                    let pending = async move { this.run_refresh().await }.boxed().shared();
                    *slot = Some(pending.clone());
                    pending
                }
            }
        };

        let outcome = shared.clone().await;

        let mut slot = self.inner.inflight.lock().await;
        if slot.as_ref().is_some_and(|pending| pending.ptr_eq(&shared)) {
            *slot = None;
        }

        outcome
    }

    async fn run_refresh(&self) -> RefreshOutcome {
        let mut token = match self.current_token().await {
            Some(token) => token,
            None => {
                if !matches!(self.state(), SessionState::Unauthenticated(_)) {
                    self.transition(SessionState::Unauthenticated(None));
                }
                tracing::debug!("No session token, skipping profile resolution");
                return Err(SessionError::NoSession);
            }
        };

        if !matches!(self.state(), SessionState::Authenticated(_)) {
            self.transition(SessionState::Loading);
        }

        for _ in 0..MAX_TOKEN_SWAPS {
            let result = self.inner.resolver.resolve(&token).await;

            let mut current = self.inner.token.write().await;
            if current.as_deref() != Some(token.as_str()) {
                match (*current).clone() {
                    Some(next) => {
                        tracing::debug!(
                            "Token changed during refresh ({} -> {}), resolving again",
                            short(&token),
                            short(&next)
                        );
                        token = next;
                        continue;
                    }
                    None => {
                        tracing::debug!("Session ended during refresh, discarding result");
                        return Err(SessionError::NoSession);
                    }
                }
            }

            return match result {
                Ok(resolved) => {
                    if let Some(renewed) = resolved.renewed_token {
                        tracing::debug!("Session token renewed: {}", short(&renewed));
                        self.inner.store.set(&renewed, self.inner.options.persist_days);
                        *current = Some(renewed);
                        let _ = self.inner.events.send(SessionEvent::TokenRenewed);
                    }
                    self.transition(SessionState::Authenticated(resolved.user.clone()));
                    Ok(resolved.user)
                }
                Err(SessionError::Unauthorized) => {
                    tracing::info!("Session token rejected, clearing session");
                    *current = None;
                    self.inner.store.remove();
                    self.transition(SessionState::Unauthenticated(Some(
                        SessionError::Unauthorized,
                    )));
                    Err(SessionError::Unauthorized)
                }
                Err(e) => {
                    tracing::warn!("Session refresh failed, keeping token: {}", e);
                    // A login that landed mid-refresh stays authenticated.
                    if !matches!(self.state(), SessionState::Authenticated(_)) {
                        self.transition(SessionState::Unauthenticated(Some(e.clone())));
                    }
                    Err(e)
                }
            };
        }

        tracing::warn!("Session token kept changing during refresh, giving up");
        Err(SessionError::Transport(
            "session token changed repeatedly during refresh".to_string(),
        ))
    }

    /// Store `token` and move straight to `Authenticated(profile)`, then
    /// reconcile with the backend in the background.
    pub async fn login(&self, token: impl Into<String>, profile: UserProfile) {
        let token = token.into();
        self.install(&token, profile, self.inner.options.persist_days)
            .await;
        self.spawn_background_refresh();
    }

    async fn install(&self, token: &str, profile: UserProfile, persist_days: i64) {
        let mut current = self.inner.token.write().await;
        *current = Some(token.to_string());
        self.inner.store.set(token, persist_days);
        tracing::info!("Logged in: user={}, token={}", profile.id, short(token));
        self.transition(SessionState::Authenticated(profile));
    }

    fn spawn_background_refresh(&self) {
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let this = self.clone();
                handle.spawn(async move {
                    if this.refresh_session().await.is_none() {
                        tracing::debug!("Background session reconcile did not resolve a profile");
                    }
                });
            }
            Err(_) => tracing::debug!("No runtime, skipping background session reconcile"),
        }
    }

    /// Credentials-form login: POST /v1/auth/login, then [`SessionManager::login`].
    pub async fn login_with_credentials(
        &self,
        email: &str,
        password: &str,
    ) -> Result<UserProfile, SessionError> {
        let grant = self.inner.resolver.login(email, password).await?;
        self.login(grant.token, grant.user.clone()).await;
        Ok(grant.user)
    }

    /// OAuth callback: keep the issued token for the shorter OAuth lifetime
    /// and resolve its profile.
    pub async fn login_with_oauth_token(&self, token: &str) -> Result<UserProfile, SessionError> {
        {
            let mut current = self.inner.token.write().await;
            *current = Some(token.to_string());
            self.inner
                .store
                .set(token, self.inner.options.oauth_persist_days);
        }
        tracing::info!("OAuth token received: {}", short(token));
        self.refresh_shared().await
    }

    /// End the session. With `force`, announce [`SessionEvent::ForcedLogout`]
    /// so the guard layer redirects to login immediately.
    pub async fn logout(&self, force: bool) {
        {
            let mut current = self.inner.token.write().await;
            *current = None;
            self.inner.store.remove();
            self.transition(SessionState::Unauthenticated(None));
        }
        tracing::info!("Logged out (force={})", force);
        if force {
            let _ = self.inner.events.send(SessionEvent::ForcedLogout);
        }
    }

    /// Apply a profile returned by an authenticated update call.
    pub(crate) async fn apply_profile(&self, profile: UserProfile) {
        let current = self.inner.token.read().await;
        if current.is_some() {
            self.transition(SessionState::Authenticated(profile));
        }
    }
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("state", &self.inner.state.borrow().phase())
            .field("resolver", &self.inner.resolver)
            .finish()
    }
}
