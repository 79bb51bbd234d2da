//! Configuration loading with layered overrides.
//!
//! Config is loaded in order (each layer overrides the previous):
//! 1. Default values
//! 2. Config file (TOML)
//! 3. Environment variables (`<PREFIX>_HOST`, `<PREFIX>_PORT`,
//!    `DATABASE_URL`, `<PREFIX>_BUSY_TIMEOUT_MS`, `<PREFIX>_JWT_SECRET`)
//! 4. CLI arguments
//!
//! JWT secret is never read from config files - it must come from an
//! environment variable or CLI argument.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::Error;

/// Configuration shared by every request handler.
pub type SharedConfig = Arc<Config>;

/// Server configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: Server,
    #[serde(default)]
    pub database: Database,
    #[serde(default)]
    pub auth: Auth,
}

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Server {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for Server {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

/// Database settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Database {
    #[serde(default = "default_database_url")]
    pub url: String,

    /// How long a mutation waits for another one to release the writer lock.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

impl Database {
    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}

impl Default for Database {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            busy_timeout_ms: default_busy_timeout_ms(),
        }
    }
}

fn default_database_url() -> String {
    "pagetree.db".to_string()
}

fn default_busy_timeout_ms() -> u64 {
    5_000
}

/// Authentication settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Auth {
    /// Must be provided via environment variable or CLI - never from config file.
    #[serde(default)]
    pub jwt_secret: String,

    /// Token expiry in days.
    #[serde(default = "default_token_expiry_days")]
    pub token_expiry_days: u32,
}

impl Default for Auth {
    fn default() -> Self {
        Self {
            jwt_secret: String::new(),
            token_expiry_days: default_token_expiry_days(),
        }
    }
}

fn default_token_expiry_days() -> u32 {
    30
}

/// Command-line overrides, highest precedence.
#[derive(Debug, Clone, Default)]
pub struct Overrides<'a> {
    pub host: Option<&'a str>,
    pub port: Option<u16>,
    pub database_url: Option<&'a str>,
    pub jwt_secret: Option<&'a str>,
}

/// Builder for loading configuration with customizable options.
#[derive(Debug, Clone)]
pub struct Loader {
    /// Environment variable prefix (e.g., "PAGETREE" -> PAGETREE_HOST)
    pub env_prefix: String,
    /// Name of the JWT secret environment variable (without prefix)
    pub jwt_secret_env: String,
}

impl Default for Loader {
    fn default() -> Self {
        Self {
            env_prefix: "PAGETREE".to_string(),
            jwt_secret_env: "JWT_SECRET".to_string(),
        }
    }
}

impl Loader {
    /// Create a new config loader with the given environment prefix.
    pub fn new(env_prefix: impl Into<String>) -> Self {
        Self {
            env_prefix: env_prefix.into(),
            ..Default::default()
        }
    }

    /// Load configuration from file, environment, and CLI arguments.
    pub fn load(&self, config_path: Option<&Path>, cli: &Overrides<'_>) -> crate::Result<Config> {
        let mut config: Config = match config_path {
            Some(path) => {
                let content = std::fs::read_to_string(path)
                    .map_err(|e| Error::Config(format!("Failed to read config file: {e}")))?;
                toml::from_str(&content)
                    .map_err(|e| Error::Config(format!("Failed to parse config: {e}")))?
            }
            None => Config::default(),
        };

        // A secret in the file is ignored.
        config.auth.jwt_secret = String::new();

        let prefix = &self.env_prefix;

        if let Ok(host) = std::env::var(format!("{prefix}_HOST")) {
            config.server.host = host;
        }
        if let Ok(port) = std::env::var(format!("{prefix}_PORT"))
            && let Ok(p) = port.parse()
        {
            config.server.port = p;
        }
        if let Ok(url) = std::env::var("DATABASE_URL") {
            config.database.url = url;
        }
        if let Ok(ms) = std::env::var(format!("{prefix}_BUSY_TIMEOUT_MS")) {
            config.database.busy_timeout_ms = ms.parse().map_err(|e| {
                Error::Config(format!("{prefix}_BUSY_TIMEOUT_MS must be milliseconds: {e}"))
            })?;
        }
        if let Ok(secret) = std::env::var(format!("{}_{}", prefix, self.jwt_secret_env)) {
            config.auth.jwt_secret = secret;
        }

        if let Some(host) = cli.host {
            config.server.host = host.to_string();
        }
        if let Some(port) = cli.port {
            config.server.port = port;
        }
        if let Some(url) = cli.database_url {
            config.database.url = url.to_string();
        }
        if let Some(secret) = cli.jwt_secret {
            config.auth.jwt_secret = secret.to_string();
        }

        if config.auth.jwt_secret.is_empty() {
            return Err(Error::Config(format!(
                "{}_{} must be set via environment variable or --jwt-secret flag",
                prefix, self.jwt_secret_env
            )));
        }

        Ok(config)
    }
}
