//! Helpdesk session core
//!
//! Client-side session handling for the helpdesk admin console.
//!
//! This crate provides:
//! - Token persistence (session cookie) and the local profile mirror
//! - Profile resolution against `/v1/auth/profile` with role normalization
//! - The session state machine with single-flight refresh
//! - `fetch_with_auth`: bearer-authenticated requests with one refresh-and-retry
//! - Role-based route admission

pub mod client;
pub mod config;
pub mod error;
pub mod guard;
pub mod profile;
pub mod resolver;
pub mod session;
pub mod token_store;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use client::AuthClient;
pub use config::{Environment, SessionConfig};
pub use error::SessionError;
pub use guard::{decide, AdminRequirement, Navigator, RouteDecision, RouteGuard, RouteTable};
pub use profile::{Notification, UserProfile};
pub use resolver::ProfileResolver;
pub use session::{SessionEvent, SessionManager, SessionPhase, SessionState};
pub use token_store::{FileTokenStore, MemoryTokenStore, TokenStore};
pub use transport::{ApiResponse, HttpTransport, RequestOptions, ReqwestTransport};
