use anyhow::{Context, Result};
use std::path::PathBuf;
use std::time::Duration;

/// Suffix removed from `N8N_API_URL` when deriving the health check URL
const N8N_API_SUFFIX: &str = "/api/v1";

/// Updater configuration, read from the environment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// ngrok tunnel listing endpoint
    pub ngrok_api_url: String,

    /// n8n REST API base, only used to find the health endpoint
    pub n8n_api_url: String,

    /// Explicit health endpoint, overrides the derived one
    pub n8n_health_url: Option<String>,

    /// Seconds between tunnel polls
    pub update_interval: u64,

    /// Where the discovered URL is published
    pub webhook_file_path: PathBuf,

    /// Log file written next to stdout (None disables it)
    pub log_file: Option<PathBuf>,
}

// Default values
fn default_ngrok_api_url() -> String {
    "http://ngrok:4040/api/tunnels".to_string()
}

fn default_n8n_api_url() -> String {
    "http://n8n:5678/api/v1".to_string()
}

fn default_update_interval() -> u64 {
    30
}

fn default_webhook_file_path() -> PathBuf {
    PathBuf::from("/tmp/webhook-url.txt")
}

fn default_log_file() -> PathBuf {
    PathBuf::from("/app/logs/ngrok-updater.log")
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ngrok_api_url: default_ngrok_api_url(),
            n8n_api_url: default_n8n_api_url(),
            n8n_health_url: None,
            update_interval: default_update_interval(),
            webhook_file_path: default_webhook_file_path(),
            log_file: Some(default_log_file()),
        }
    }
}

impl Config {
    /// Load configuration from process environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup.
    ///
    /// Unset keys fall back to their defaults. Values are validated before
    /// returning.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let update_interval = match lookup("UPDATE_INTERVAL") {
            Some(raw) => raw
                .trim()
                .parse::<u64>()
                .with_context(|| format!("UPDATE_INTERVAL must be a whole number of seconds (got: {raw:?})"))?,
            None => default_update_interval(),
        };

        // An empty LOG_FILE turns file logging off
        let log_file = match lookup("LOG_FILE") {
            Some(raw) if raw.trim().is_empty() => None,
            Some(raw) => Some(PathBuf::from(raw)),
            None => Some(default_log_file()),
        };

        let config = Self {
            ngrok_api_url: lookup("NGROK_API_URL").unwrap_or_else(default_ngrok_api_url),
            n8n_api_url: lookup("N8N_API_URL").unwrap_or_else(default_n8n_api_url),
            n8n_health_url: lookup("N8N_HEALTH_URL").filter(|v| !v.trim().is_empty()),
            update_interval,
            webhook_file_path: lookup("WEBHOOK_FILE_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(default_webhook_file_path),
            log_file,
        };

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        validate_http_url("NGROK_API_URL", &self.ngrok_api_url)?;
        validate_http_url("N8N_API_URL", &self.n8n_api_url)?;

        if let Some(health_url) = &self.n8n_health_url {
            validate_http_url("N8N_HEALTH_URL", health_url)?;
        }

        if self.update_interval == 0 {
            anyhow::bail!("UPDATE_INTERVAL must be at least 1 second");
        }

        Ok(())
    }

    /// n8n health endpoint.
    ///
    /// Uses `N8N_HEALTH_URL` when set, otherwise strips a trailing `/api/v1`
    /// from the API base and appends `/healthz`.
    pub fn health_url(&self) -> String {
        if let Some(url) = &self.n8n_health_url {
            return url.clone();
        }

        let base = self.n8n_api_url.trim_end_matches('/');
        let base = base.strip_suffix(N8N_API_SUFFIX).unwrap_or(base);
        format!("{}/healthz", base.trim_end_matches('/'))
    }

    pub fn update_interval(&self) -> Duration {
        Duration::from_secs(self.update_interval)
    }
}

fn validate_http_url(name: &str, value: &str) -> Result<()> {
    let url = url::Url::parse(value).with_context(|| format!("Invalid {name}: {value}"))?;

    if !matches!(url.scheme(), "http" | "https") {
        anyhow::bail!("{name} must use http or https (got: {})", url.scheme());
    }

    Ok(())
}
