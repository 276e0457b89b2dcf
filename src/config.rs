use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::colab::session::ApprovalPolicy;

/// Application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Server host address
    #[serde(default = "default_host")]
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Environment (dev, staging, prod)
    #[serde(default = "default_environment")]
    pub environment: String,

    /// CORS allowed origins
    pub cors_origins: Option<String>,

    /// Log level for this crate
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Directory session workspaces are created under
    #[serde(default = "default_workspace_base")]
    pub workspace_base: String,

    /// Default participant cap per session
    #[serde(default = "default_max_participants")]
    pub max_participants: usize,

    /// Default admission policy for new sessions
    #[serde(default = "default_approval_policy")]
    pub approval_policy: ApprovalPolicy,

    /// Seconds a disconnected participant keeps their slot
    #[serde(default = "default_disconnect_grace_secs")]
    pub disconnect_grace_secs: u64,

    /// How many applied operations a document keeps for rebasing
    #[serde(default = "default_rebase_window")]
    pub rebase_window: usize,

    /// Seconds between periodic flushes of dirty documents
    #[serde(default = "default_flush_interval_secs")]
    pub flush_interval_secs: u64,
}

impl Config {
    /// Load configuration from environment variables or app.env file
    pub fn load() -> Result<Self, ConfigError> {
        // Try to load from app.env file first
        if std::path::Path::new("app.env").exists() {
            dotenvy::from_filename("app.env").ok();
        } else {
            // Fallback to .env file
            dotenvy::dotenv().ok();
        }

        // Load from environment variables using envy
        match envy::from_env::<Config>() {
            Ok(config) => {
                info!("✅ Configuration loaded successfully");
                Ok(config)
            }
            Err(e) => {
                error!("❌ Failed to load configuration: {}", e);
                Err(ConfigError::EnvError(e))
            }
        }
    }

    /// Get the full server address
    pub fn server_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            environment: default_environment(),
            cors_origins: None,
            log_level: default_log_level(),
            workspace_base: default_workspace_base(),
            max_participants: default_max_participants(),
            approval_policy: default_approval_policy(),
            disconnect_grace_secs: default_disconnect_grace_secs(),
            rebase_window: default_rebase_window(),
            flush_interval_secs: default_flush_interval_secs(),
        }
    }
}

#[derive(Debug)]
pub enum ConfigError {
    EnvError(envy::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::EnvError(e) => write!(f, "Environment variable error: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

// Default value functions
fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_environment() -> String {
    "development".to_string()
}

fn default_log_level() -> String {
    "debug".to_string()
}

fn default_workspace_base() -> String {
    "./workspaces".to_string()
}

fn default_max_participants() -> usize {
    5
}

fn default_approval_policy() -> ApprovalPolicy {
    ApprovalPolicy::Approval
}

fn default_disconnect_grace_secs() -> u64 {
    30
}

fn default_rebase_window() -> usize {
    128
}

fn default_flush_interval_secs() -> u64 {
    30
}
