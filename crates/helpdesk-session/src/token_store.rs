//! Bearer token persistence and the local profile mirror.
//!
//! The token lives in a `session` cookie (path `/`, `SameSite=Strict`,
//! `Secure` outside development, day-based expiry). The last resolved
//! profile is mirrored under a separate key so a UI can paint before the
//! network answers. Both are caches: the in-memory session state is the
//! authority once running.

use chrono::{DateTime, Duration, Utc};
use cookie::{Cookie, SameSite};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::SessionError;
use crate::profile::UserProfile;

/// Default cookie lifetime for credential logins.
pub const DEFAULT_PERSIST_DAYS: i64 = 7;

/// Cookie lifetime for tokens issued by the OAuth callback.
pub const OAUTH_PERSIST_DAYS: i64 = 6;

/// Attributes applied to every session cookie write.
#[derive(Debug, Clone, PartialEq)]
pub struct CookiePolicy {
    pub name: String,
    pub path: String,
    pub secure: bool,
    pub profile_key: String,
}

impl Default for CookiePolicy {
    fn default() -> Self {
        Self {
            name: "session".to_string(),
            path: "/".to_string(),
            secure: true,
            profile_key: "user".to_string(),
        }
    }
}

/// Stored session cookie.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionCookie {
    pub name: String,
    pub value: String,
    pub path: String,
    pub secure: bool,
    pub expires_at: DateTime<Utc>,
}

impl SessionCookie {
    pub fn issue(policy: &CookiePolicy, token: &str, persist_days: i64) -> Self {
        Self {
            name: policy.name.clone(),
            value: token.to_string(),
            path: policy.path.clone(),
            secure: policy.secure,
            expires_at: expiry_after(persist_days),
        }
    }

    pub fn is_expired(&self) -> bool {
        self.expires_at <= Utc::now()
    }

    /// `Set-Cookie` header value for this cookie.
    pub fn to_header_value(&self) -> String {
        let remaining = (self.expires_at - Utc::now()).num_seconds().max(0);
        Cookie::build((self.name.clone(), self.value.clone()))
            .path(self.path.clone())
            .same_site(SameSite::Strict)
            .secure(self.secure)
            .max_age(cookie::time::Duration::seconds(remaining))
            .build()
            .to_string()
    }
}

/// Expiry `persist_days` from now. Out-of-range lifetimes fall back to the default.
fn expiry_after(persist_days: i64) -> DateTime<Utc> {
    let now = Utc::now();
    Duration::try_days(persist_days)
        .and_then(|lifetime| now.checked_add_signed(lifetime))
        .unwrap_or_else(|| {
            tracing::warn!(
                "Cookie lifetime of {} days is out of range, using {}",
                persist_days,
                DEFAULT_PERSIST_DAYS
            );
            now + Duration::days(DEFAULT_PERSIST_DAYS)
        })
}

/// Synchronous token and profile-mirror storage.
pub trait TokenStore: Send + Sync {
    /// Current token. Missing, expired or unreadable cookies read as `None`.
    fn get(&self) -> Option<String>;

    /// Write the token cookie with the given lifetime.
    fn set(&self, token: &str, persist_days: i64);

    /// Delete the cookie and clear the profile mirror.
    fn remove(&self);

    fn cache_profile(&self, profile: &UserProfile);

    fn read_cached_profile(&self) -> Option<UserProfile>;

    /// Drop only the profile mirror.
    fn clear_cached_profile(&self);
}

/// First eight characters of a token, for log lines.
pub(crate) fn short(token: &str) -> &str {
    token
        .char_indices()
        .nth(8)
        .map_or(token, |(end, _)| &token[..end])
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Debug, Default)]
struct MemoryInner {
    cookie: Option<SessionCookie>,
    mirror: Option<String>,
}

/// In-process store. Clones share the same cookie jar and mirror.
#[derive(Debug, Clone)]
pub struct MemoryTokenStore {
    policy: CookiePolicy,
    inner: Arc<Mutex<MemoryInner>>,
}

impl MemoryTokenStore {
    pub fn new(policy: CookiePolicy) -> Self {
        Self {
            policy,
            inner: Arc::new(Mutex::new(MemoryInner::default())),
        }
    }

    /// Raw cookie as last written, expired or not.
    pub fn cookie(&self) -> Option<SessionCookie> {
        lock(&self.inner).cookie.clone()
    }

    /// Replace the stored cookie verbatim.
    pub fn put_cookie(&self, cookie: SessionCookie) {
        lock(&self.inner).cookie = Some(cookie);
    }
}

impl Default for MemoryTokenStore {
    fn default() -> Self {
        Self::new(CookiePolicy::default())
    }
}

impl TokenStore for MemoryTokenStore {
    fn get(&self) -> Option<String> {
        let guard = lock(&self.inner);
        match guard.cookie.as_ref() {
            Some(cookie) if !cookie.is_expired() => Some(cookie.value.clone()),
            Some(_) => {
                tracing::debug!("Session cookie expired");
                None
            }
            None => None,
        }
    }

    fn set(&self, token: &str, persist_days: i64) {
        let cookie = SessionCookie::issue(&self.policy, token, persist_days);
        tracing::debug!(
            "Session cookie set: token={}, days={}",
            short(token),
            persist_days
        );
        lock(&self.inner).cookie = Some(cookie);
    }

    fn remove(&self) {
        let mut guard = lock(&self.inner);
        guard.cookie = None;
        guard.mirror = None;
        tracing::debug!("Session cookie and profile mirror removed");
    }

    fn cache_profile(&self, profile: &UserProfile) {
        match serde_json::to_string(profile) {
            Ok(json) => lock(&self.inner).mirror = Some(json),
            Err(e) => tracing::warn!("Failed to serialize profile mirror: {}", e),
        }
    }

    fn read_cached_profile(&self) -> Option<UserProfile> {
        let guard = lock(&self.inner);
        let json = guard.mirror.as_ref()?;
        match serde_json::from_str(json) {
            Ok(profile) => Some(profile),
            Err(e) => {
                tracing::warn!("Discarding unreadable profile mirror: {}", e);
                None
            }
        }
    }

    fn clear_cached_profile(&self) {
        lock(&self.inner).mirror = None;
    }
}

/// Directory-backed store shared by every process pointed at the same
/// directory. Other writers become visible on the next `get`.
#[derive(Debug, Clone)]
pub struct FileTokenStore {
    policy: CookiePolicy,
    dir: PathBuf,
}

impl FileTokenStore {
    /// Open (creating if needed) the storage directory.
    pub fn open(dir: impl AsRef<Path>, policy: CookiePolicy) -> Result<Self, SessionError> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        tracing::debug!("Token store opened at {}", dir.display());
        Ok(Self { policy, dir })
    }

    pub fn cookie_path(&self) -> PathBuf {
        self.dir.join(format!("{}.json", self.policy.name))
    }

    pub fn profile_path(&self) -> PathBuf {
        self.dir.join(format!("{}.json", self.policy.profile_key))
    }

    fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Option<T> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                tracing::warn!("Failed to read {}: {}", path.display(), e);
                return None;
            }
        };
        match serde_json::from_str(&content) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!("Ignoring corrupt {}: {}", path.display(), e);
                None
            }
        }
    }

    fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), SessionError> {
        let content = serde_json::to_vec_pretty(value)?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, content)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    fn delete(path: &Path) {
        match std::fs::remove_file(path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!("Failed to delete {}: {}", path.display(), e),
        }
    }

    /// Raw cookie on disk, expired or not.
    pub fn cookie(&self) -> Option<SessionCookie> {
        Self::read_json(&self.cookie_path())
    }
}

impl TokenStore for FileTokenStore {
    fn get(&self) -> Option<String> {
        let cookie = self.cookie()?;
        if cookie.is_expired() {
            tracing::debug!("Session cookie expired at {}", cookie.expires_at);
            return None;
        }
        Some(cookie.value)
    }

    fn set(&self, token: &str, persist_days: i64) {
        let cookie = SessionCookie::issue(&self.policy, token, persist_days);
        match Self::write_json(&self.cookie_path(), &cookie) {
            Ok(()) => tracing::debug!(
                "Session cookie written: token={}, days={}",
                short(token),
                persist_days
            ),
            Err(e) => tracing::warn!("Failed to persist session cookie: {}", e),
        }
    }

    fn remove(&self) {
        Self::delete(&self.cookie_path());
        Self::delete(&self.profile_path());
        tracing::debug!("Session cookie and profile mirror removed");
    }

    fn cache_profile(&self, profile: &UserProfile) {
        if let Err(e) = Self::write_json(&self.profile_path(), profile) {
            tracing::warn!("Failed to persist profile mirror: {}", e);
        }
    }

    fn read_cached_profile(&self) -> Option<UserProfile> {
        Self::read_json(&self.profile_path())
    }

    fn clear_cached_profile(&self) {
        Self::delete(&self.profile_path());
    }
}
