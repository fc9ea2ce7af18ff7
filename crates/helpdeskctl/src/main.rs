//! Helpdesk console command line client.
//!
//! Logs in against the helpdesk backend, keeps the session token in the
//! local token store and issues authenticated API calls through it.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::sync::{Arc, Mutex};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use helpdesk_session::transport::RequestOptions;
use helpdesk_session::{
    AdminRequirement, AuthClient, FileTokenStore, Navigator, RouteDecision, RouteGuard,
    SessionConfig, SessionManager, SessionState, UserProfile,
};

#[derive(Parser)]
#[command(name = "helpdeskctl")]
#[command(version, about = "Helpdesk console command line client", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Backend API URL (overrides configuration)
    #[arg(long, global = true)]
    api_url: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Log in with email and password
    Login {
        #[arg(short, long)]
        email: Option<String>,

        /// Password (prompted when omitted)
        #[arg(short, long)]
        password: Option<String>,
    },
    /// Show the current user
    Whoami {
        /// Print the raw profile as JSON
        #[arg(short, long)]
        json: bool,
    },
    /// Clear the stored session
    Logout,
    /// Send an authenticated request
    ///
    /// Examples:
    ///     helpdeskctl request GET /v1/tickets
    ///     helpdeskctl request POST /v1/roles --body '{"name":"triage"}'
    #[command(verbatim_doc_comment)]
    Request {
        #[arg(value_name = "METHOD")]
        method: String,

        #[arg(value_name = "PATH")]
        path: String,

        /// JSON request body
        #[arg(long)]
        body: Option<String>,
    },
    /// Show what the route guard decides for a path
    Guard {
        #[arg(value_name = "PATH")]
        path: String,

        /// adminOnly flag of the route (omit for unset)
        #[arg(long)]
        admin_only: Option<bool>,
    },
}

/// Navigator for a terminal: remembers the path and reports redirects.
struct TerminalNavigator {
    path: Mutex<String>,
}

impl Navigator for TerminalNavigator {
    fn current_path(&self) -> String {
        self.path
            .lock()
            .map(|p| p.clone())
            .unwrap_or_default()
    }

    fn navigate(&self, path: &str) {
        println!("redirect -> {}", path);
        if let Ok(mut current) = self.path.lock() {
            *current = path.to_string();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn,helpdesk_session=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let mut config = SessionConfig::load().context("Failed to load configuration")?;
    if let Some(url) = cli.api_url {
        config.api.base_url = Some(url.clone());
        config.api.development_url = url;
    }

    let storage_dir = config.storage_dir()?;
    let store = FileTokenStore::open(&storage_dir, config.cookie_policy())
        .with_context(|| format!("Failed to open token store at {}", storage_dir.display()))?;
    let session = SessionManager::from_config(&config, Arc::new(store));

    tracing::debug!(base_url = %config.base_url(), "Session configured");

    match cli.command {
        Commands::Login { email, password } => {
            let email = match email {
                Some(email) => email,
                None => prompt("Email: ")?,
            };
            let password = match password {
                Some(password) => password,
                None => rpassword::prompt_password("Password: ")
                    .context("Failed to read password")?,
            };

            let user = session
                .login_with_credentials(&email, &password)
                .await
                .context("Login failed")?;
            println!("Logged in as {} <{}>", display_name(&user.name), user.email);
            println!("Role: {}", role_label(user.is_admin, user.is_agent));
        }
        Commands::Whoami { json } => {
            match session.bootstrap().await {
                Some(user) if json => println!("{}", serde_json::to_string_pretty(&user)?),
                Some(user) => {
                    for line in describe_user(&user, false) {
                        println!("{}", line);
                    }
                }
                None => match (session.last_error(), session.cached_profile()) {
                    // Backend unreachable: show the last known profile.
                    (Some(e), Some(cached)) if e.is_transient() => {
                        eprintln!("Backend unreachable: {}", e);
                        if json {
                            println!("{}", serde_json::to_string_pretty(cached)?);
                        } else {
                            for line in describe_user(cached, true) {
                                println!("{}", line);
                            }
                        }
                    }
                    (Some(e), _) => anyhow::bail!("Not logged in: {}", e),
                    (None, _) => anyhow::bail!("Not logged in"),
                },
            }
        }
        Commands::Logout => {
            session.logout(false).await;
            println!("Logged out");
        }
        Commands::Request { method, path, body } => {
            let method = reqwest_method(&method)?;
            let mut options = RequestOptions::with_method(method);
            if let Some(body) = body {
                options.body = Some(serde_json::from_str(&body).context("Invalid JSON body")?);
            }

            let client = AuthClient::new(session);
            let response = client.fetch_with_auth(&path, options).await?;
            let text = response.text();
            match serde_json::from_str::<serde_json::Value>(&text) {
                Ok(json) => println!("{}", serde_json::to_string_pretty(&json)?),
                Err(_) => println!("{}", text),
            }
            if !response.ok() {
                anyhow::bail!("Request failed with status {}", response.status);
            }
        }
        Commands::Guard { path, admin_only } => {
            session.bootstrap().await;
            let navigator = Arc::new(TerminalNavigator {
                path: Mutex::new(path.clone()),
            });
            let guard = RouteGuard::new(
                session.clone(),
                config.routes.clone(),
                AdminRequirement::from(admin_only),
                navigator,
            );
            match guard.evaluate() {
                RouteDecision::Render => println!("render {}", path),
                RouteDecision::Placeholder => println!("loading"),
                RouteDecision::RedirectTo(_) => {}
            }
            if let SessionState::Unauthenticated(Some(e)) = session.state() {
                tracing::info!("Session unavailable: {}", e);
            }
        }
    }

    Ok(())
}

fn prompt(label: &str) -> Result<String> {
    use std::io::Write;

    print!("{}", label);
    std::io::stdout().flush()?;
    let mut line = String::new();
    std::io::stdin().read_line(&mut line)?;
    Ok(line.trim().to_string())
}

fn reqwest_method(method: &str) -> Result<reqwest::Method> {
    reqwest::Method::from_bytes(method.to_uppercase().as_bytes())
        .with_context(|| format!("Unsupported HTTP method: {}", method))
}

fn describe_user(user: &UserProfile, cached: bool) -> Vec<String> {
    let marker = if cached { " (cached)" } else { "" };
    let mut lines = vec![
        format!("{} <{}>{}", display_name(&user.name), user.email, marker),
        format!("Role: {}", role_label(user.is_admin, user.is_agent)),
    ];
    let unread = user.unread_notifications().count();
    if unread > 0 {
        lines.push(format!("Unread notifications: {}", unread));
    }
    lines
}

fn display_name(name: &str) -> &str {
    if name.is_empty() {
        "(no name)"
    } else {
        name
    }
}

fn role_label(is_admin: bool, is_agent: bool) -> &'static str {
    match (is_admin, is_agent) {
        (true, true) => "admin, agent",
        (true, false) => "admin",
        (false, true) => "agent",
        (false, false) => "user",
    }
}
