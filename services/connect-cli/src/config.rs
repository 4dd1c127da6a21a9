//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! The client secret is loaded from CONNECT_CLIENT_SECRET or
//! client_secret_file, never stored in the TOML directly.

use common::Secret;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CLIENT_SECRET_ENV: &str = "CONNECT_CLIENT_SECRET";
pub const CONFIG_PATH_ENV: &str = "CONNECT_CONFIG";
const DEFAULT_CONFIG_FILE: &str = "vehicle-connect.toml";

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    pub environment: EnvironmentConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub http: HttpConfig,
}

/// Deployment the client talks to: API host, authorization server, client identity
#[derive(Debug, Deserialize)]
pub struct EnvironmentConfig {
    pub title: String,
    pub client_id: String,
    #[serde(skip)]
    pub client_secret: Option<Secret<String>>,
    /// Path to a file containing the client secret (alternative to the env var)
    #[serde(default)]
    pub client_secret_file: Option<PathBuf>,
    pub base_url: String,
    pub signin_url: String,
}

/// Credential storage and refresh bounds
#[derive(Debug, Deserialize)]
pub struct AuthConfig {
    #[serde(default = "default_credentials_path")]
    pub credentials_path: PathBuf,
    #[serde(default = "default_max_refresh_attempts")]
    pub max_refresh_attempts: u32,
    #[serde(default = "default_refresh_timeout")]
    pub refresh_timeout_secs: u64,
}

#[derive(Debug, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

fn default_credentials_path() -> PathBuf {
    PathBuf::from("credentials.json")
}

fn default_max_refresh_attempts() -> u32 {
    connect_session::DEFAULT_MAX_ATTEMPTS
}

fn default_refresh_timeout() -> u64 {
    connect_session::DEFAULT_REFRESH_TIMEOUT.as_secs()
}

fn default_timeout() -> u64 {
    60
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            credentials_path: default_credentials_path(),
            max_refresh_attempts: default_max_refresh_attempts(),
            refresh_timeout_secs: default_refresh_timeout(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file, then overlay environment variables.
    ///
    /// Client secret resolution order:
    /// 1. CONNECT_CLIENT_SECRET env var
    /// 2. client_secret_file path from config
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;
        config.validate()?;

        if let Ok(secret) = std::env::var(CLIENT_SECRET_ENV) {
            config.environment.client_secret = Some(Secret::new(secret));
        } else if let Some(ref secret_file) = config.environment.client_secret_file {
            let secret = std::fs::read_to_string(secret_file).map_err(|e| {
                common::Error::Config(format!(
                    "failed to read client_secret_file {}: {e}",
                    secret_file.display()
                ))
            })?;
            let secret = secret.trim().to_owned();
            if !secret.is_empty() {
                config.environment.client_secret = Some(Secret::new(secret));
            }
        }

        Ok(config)
    }

    fn validate(&self) -> common::Result<()> {
        for (field, url) in [
            ("base_url", &self.environment.base_url),
            ("signin_url", &self.environment.signin_url),
        ] {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(common::Error::Config(format!(
                    "{field} must start with http:// or https://, got: {url}"
                )));
            }
        }

        if self.environment.client_id.trim().is_empty() {
            return Err(common::Error::Config("client_id must not be empty".into()));
        }
        if self.auth.max_refresh_attempts == 0 {
            return Err(common::Error::Config(
                "max_refresh_attempts must be greater than 0".into(),
            ));
        }
        if self.auth.refresh_timeout_secs == 0 {
            return Err(common::Error::Config(
                "refresh_timeout_secs must be greater than 0".into(),
            ));
        }
        if self.http.timeout_secs == 0 {
            return Err(common::Error::Config(
                "timeout_secs must be greater than 0".into(),
            ));
        }
        Ok(())
    }

    /// Client secret for the token endpoint.
    pub fn client_secret(&self) -> common::Result<&Secret<String>> {
        let secret = self.environment.client_secret.as_ref();
        secret.filter(|s| !s.is_blank()).ok_or_else(|| {
            common::Error::MissingSecret(format!(
                "client secret: set {CLIENT_SECRET_ENV} or environment.client_secret_file"
            ))
        })
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.http.timeout_secs)
    }

    pub fn retry_policy(&self) -> connect_session::RetryPolicy {
        connect_session::RetryPolicy {
            max_attempts: self.auth.max_refresh_attempts,
            timeout: Duration::from_secs(self.auth.refresh_timeout_secs),
        }
    }

    /// Resolve config file path from CLI arg or CONNECT_CONFIG env var.
    pub fn resolve_path(cli_path: Option<&Path>) -> PathBuf {
        if let Some(p) = cli_path {
            return p.to_path_buf();
        }
        if let Ok(p) = std::env::var(CONFIG_PATH_ENV) {
            return PathBuf::from(p);
        }
        PathBuf::from(DEFAULT_CONFIG_FILE)
    }
}
