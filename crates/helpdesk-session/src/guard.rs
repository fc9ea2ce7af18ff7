//! Role-based route admission.
//!
//! [`decide`] is a pure function of the session state and the route's admin
//! requirement. [`RouteGuard`] wraps it with the navigation effect.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;

use crate::session::{SessionEvent, SessionManager, SessionState};

/// Landing routes the guard redirects to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouteTable {
    /// Login screen (default: "/login")
    pub login: String,
    /// Admin landing (default: "/admin")
    pub admin_landing: String,
    /// Non-admin portal landing (default: "/portal")
    pub portal_landing: String,
    /// Agent landing (default: "/agent")
    pub agent_landing: String,
}

impl Default for RouteTable {
    fn default() -> Self {
        Self {
            login: "/login".to_string(),
            admin_landing: "/admin".to_string(),
            portal_landing: "/portal".to_string(),
            agent_landing: "/agent".to_string(),
        }
    }
}

/// The `adminOnly` flag of a guarded subtree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AdminRequirement {
    /// `adminOnly` unset.
    #[default]
    Unspecified,
    /// `adminOnly: true`.
    AdminOnly,
    /// `adminOnly: false`; keeps admins out of the portal.
    NonAdminOnly,
}

impl From<Option<bool>> for AdminRequirement {
    fn from(admin_only: Option<bool>) -> Self {
        match admin_only {
            None => AdminRequirement::Unspecified,
            Some(true) => AdminRequirement::AdminOnly,
            Some(false) => AdminRequirement::NonAdminOnly,
        }
    }
}

/// What a guarded route should do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteDecision {
    /// Session not resolved yet: show a neutral placeholder.
    Placeholder,
    Render,
    RedirectTo(String),
}

/// Admission decision for `requirement` under `state`.
pub fn decide(
    state: &SessionState,
    requirement: AdminRequirement,
    routes: &RouteTable,
) -> RouteDecision {
    if state.loading() {
        return RouteDecision::Placeholder;
    }

    let user = match state.user() {
        Some(user) => user,
        None => return RouteDecision::RedirectTo(routes.login.clone()),
    };

    match requirement {
        AdminRequirement::AdminOnly if !user.is_admin => {
            RouteDecision::RedirectTo(routes.portal_landing.clone())
        }
        AdminRequirement::NonAdminOnly if user.is_admin => {
            RouteDecision::RedirectTo(routes.admin_landing.clone())
        }
        AdminRequirement::Unspecified | AdminRequirement::NonAdminOnly if user.is_agent => {
            RouteDecision::RedirectTo(routes.agent_landing.clone())
        }
        _ => RouteDecision::Render,
    }
}

/// Navigation effect performed for redirect decisions.
pub trait Navigator: Send + Sync {
    fn current_path(&self) -> String;

    fn navigate(&self, path: &str);
}

/// A guarded subtree: requirement + routes + the navigator to act through.
pub struct RouteGuard<N: Navigator> {
    session: SessionManager,
    routes: RouteTable,
    requirement: AdminRequirement,
    navigator: Arc<N>,
}

impl<N: Navigator + 'static> RouteGuard<N> {
    pub fn new(
        session: SessionManager,
        routes: RouteTable,
        requirement: AdminRequirement,
        navigator: Arc<N>,
    ) -> Self {
        Self {
            session,
            routes,
            requirement,
            navigator,
        }
    }

    pub fn decision(&self) -> RouteDecision {
        decide(&self.session.state(), self.requirement, &self.routes)
    }

    /// Decide and perform the resulting navigation, if any.
    ///
    /// A redirect onto the path already displayed renders instead, so a
    /// landing route guarded by its own rule does not loop.
    pub fn evaluate(&self) -> RouteDecision {
        match self.decision() {
            RouteDecision::RedirectTo(target) => {
                if self.navigator.current_path() == target {
                    return RouteDecision::Render;
                }
                tracing::debug!("Route guard redirecting to {}", target);
                self.navigator.navigate(&target);
                RouteDecision::RedirectTo(target)
            }
            other => other,
        }
    }

    fn redirect_to_login(&self) {
        if self.navigator.current_path() != self.routes.login {
            tracing::info!("Forced logout, redirecting to {}", self.routes.login);
            self.navigator.navigate(&self.routes.login);
        }
    }

    /// Re-evaluate on every session change until the session goes away.
    pub async fn watch(self) {
        let mut states = self.session.subscribe();
        let mut events = self.session.events();
        self.evaluate();

        loop {
            tokio::select! {
                changed = states.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    self.evaluate();
                }
                event = events.recv() => match event {
                    Ok(SessionEvent::ForcedLogout) => self.redirect_to_login(),
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!("Route guard skipped {} session events", skipped);
                        self.evaluate();
                    }
                    Err(RecvError::Closed) => break,
                },
            }
        }
    }
}
