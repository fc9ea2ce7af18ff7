//! Session core configuration.
//!
//! Supports loading configuration from:
//! 1. Config file (TOML, JSON, or YAML) named by `HELPDESK_CONFIG`
//! 2. Environment variables
//!
//! Environment variables take precedence over config file values.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::guard::RouteTable;
use crate::token_store::{CookiePolicy, DEFAULT_PERSIST_DAYS, OAUTH_PERSIST_DAYS};

/// Deployment environment. Drives the base origin and the `Secure` flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Production,
}

impl Environment {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" | "local" => Some(Environment::Development),
            "production" | "prod" => Some(Environment::Production),
            _ => None,
        }
    }
}

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct SessionConfig {
    pub environment: Environment,
    /// Backend API configuration
    pub api: ApiConfig,
    /// Session cookie configuration
    pub cookie: CookieConfig,
    /// Local storage configuration
    pub storage: StorageConfig,
    /// Landing routes used by the route guard
    pub routes: RouteTable,
}

/// Backend API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Origin used in development (default: "http://localhost:8080")
    pub development_url: String,
    /// Deployment-provided origin
    pub base_url: Option<String>,
    /// Request timeout in seconds (default: 30)
    pub timeout_secs: u64,
}

/// Session cookie configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CookieConfig {
    /// Cookie name (default: "session")
    pub name: String,
    /// Cookie path (default: "/")
    pub path: String,
    /// Lifetime for credential logins in days (default: 7)
    pub persist_days: i64,
    /// Lifetime for OAuth-issued tokens in days (default: 6)
    pub oauth_persist_days: i64,
    /// Force the `Secure` attribute; unset means "outside development"
    pub secure: Option<bool>,
}

/// Local storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory for the file-backed token store (default: ~/.helpdesk)
    pub dir: Option<PathBuf>,
    /// Key of the profile mirror (default: "user")
    pub profile_key: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            development_url: "http://localhost:8080".to_string(),
            base_url: None,
            timeout_secs: 30,
        }
    }
}

impl Default for CookieConfig {
    fn default() -> Self {
        Self {
            name: "session".to_string(),
            path: "/".to_string(),
            persist_days: DEFAULT_PERSIST_DAYS,
            oauth_persist_days: OAUTH_PERSIST_DAYS,
            secure: None,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            dir: None,
            profile_key: "user".to_string(),
        }
    }
}

impl SessionConfig {
    /// Load configuration from file and environment variables.
    /// Environment variables override file values.
    pub fn load() -> anyhow::Result<Self> {
        let mut config = Self::default();

        if let Ok(config_path) = std::env::var("HELPDESK_CONFIG") {
            config = Self::from_file(&config_path)?;
            tracing::info!("Loaded configuration from: {}", config_path);
        }

        config.apply_env_overrides();

        Ok(config)
    }

    /// Load configuration from a file (supports TOML, JSON, YAML)
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;

        let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        let config: SessionConfig = match extension {
            "toml" => toml::from_str(&content)?,
            "json" => serde_json::from_str(&content)?,
            "yaml" | "yml" => serde_yaml::from_str(&content)?,
            _ => {
                if content.trim().starts_with('{') {
                    serde_json::from_str(&content)?
                } else if content.contains("---") || content.contains(": ") {
                    serde_yaml::from_str(&content)?
                } else {
                    toml::from_str(&content)?
                }
            }
        };

        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("HELPDESK_ENV") {
            match Environment::parse(&val) {
                Some(env) => self.environment = env,
                None => tracing::warn!("Ignoring unknown HELPDESK_ENV: {}", val),
            }
        }

        // API config
        if let Ok(val) = std::env::var("HELPDESK_API_URL") {
            self.api.base_url = Some(val);
        }
        if let Ok(val) = std::env::var("HELPDESK_DEV_API_URL") {
            self.api.development_url = val;
        }
        if let Ok(val) = std::env::var("HELPDESK_API_TIMEOUT_SECS") {
            if let Ok(secs) = val.parse() {
                self.api.timeout_secs = secs;
            }
        }

        // Cookie config
        if let Ok(val) = std::env::var("HELPDESK_COOKIE_NAME") {
            self.cookie.name = val;
        }
        if let Ok(val) = std::env::var("HELPDESK_COOKIE_DAYS") {
            if let Ok(days) = val.parse() {
                self.cookie.persist_days = days;
            }
        }
        if let Ok(val) = std::env::var("HELPDESK_COOKIE_SECURE") {
            self.cookie.secure = val.parse().ok();
        }

        // Storage config
        if let Ok(val) = std::env::var("HELPDESK_STORAGE_DIR") {
            self.storage.dir = Some(PathBuf::from(val));
        }

        // Routes
        if let Ok(val) = std::env::var("HELPDESK_ROUTE_LOGIN") {
            self.routes.login = val;
        }
        if let Ok(val) = std::env::var("HELPDESK_ROUTE_ADMIN") {
            self.routes.admin_landing = val;
        }
        if let Ok(val) = std::env::var("HELPDESK_ROUTE_PORTAL") {
            self.routes.portal_landing = val;
        }
        if let Ok(val) = std::env::var("HELPDESK_ROUTE_AGENT") {
            self.routes.agent_landing = val;
        }
    }

    /// The single base origin for this instance.
    pub fn base_url(&self) -> String {
        match (self.environment, self.api.base_url.as_ref()) {
            (Environment::Development, _) => self.api.development_url.clone(),
            (Environment::Production, Some(url)) => url.clone(),
            (Environment::Production, None) => {
                tracing::warn!(
                    "No HELPDESK_API_URL configured for production, using {}",
                    self.api.development_url
                );
                self.api.development_url.clone()
            }
        }
    }

    /// Cookie attributes resolved for the current environment.
    pub fn cookie_policy(&self) -> CookiePolicy {
        CookiePolicy {
            name: self.cookie.name.clone(),
            path: self.cookie.path.clone(),
            secure: self
                .cookie
                .secure
                .unwrap_or(self.environment != Environment::Development),
            profile_key: self.storage.profile_key.clone(),
        }
    }

    /// Directory for the file-backed token store.
    pub fn storage_dir(&self) -> anyhow::Result<PathBuf> {
        if let Some(dir) = &self.storage.dir {
            return Ok(dir.clone());
        }
        let home = dirs::home_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find home directory"))?;
        Ok(home.join(".helpdesk"))
    }
}
