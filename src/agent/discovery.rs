use anyhow::{Context, Result};
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

/// Timeout for a single tunnel listing request
pub const DISCOVERY_TIMEOUT: Duration = Duration::from_secs(10);

/// Tunnel protocol as reported by the ngrok API
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Http,
    Https,
    #[default]
    #[serde(other)]
    Other,
}

/// One entry of the `tunnels` array
#[derive(Debug, Clone, Deserialize)]
pub struct TunnelRecord {
    /// Missing protocol never matches http or https
    #[serde(default)]
    pub proto: Protocol,
    #[serde(default)]
    pub public_url: Option<String>,
}

/// Body of `GET /api/tunnels`
#[derive(Debug, Deserialize)]
pub struct TunnelList {
    #[serde(default)]
    pub tunnels: Vec<TunnelRecord>,
}

/// Why no tunnel URL could be discovered
#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    #[error("failed to fetch ngrok tunnels: {0}")]
    Network(#[source] reqwest::Error),

    #[error("failed to parse ngrok API response: {0}")]
    Parse(#[source] serde_json::Error),

    #[error("no active ngrok tunnels found")]
    NotFound,
}

impl DiscoveryError {
    /// Stable classification attached to log lines
    pub fn kind(&self) -> &'static str {
        match self {
            DiscoveryError::Network(_) => "network_error",
            DiscoveryError::Parse(_) => "parse_error",
            DiscoveryError::NotFound => "not_found",
        }
    }
}

/// Outcome of a single discovery poll
pub type DiscoveryResult = std::result::Result<String, DiscoveryError>;

/// Pick the public URL to publish.
///
/// The first `http` tunnel wins; `https` is only a fallback. Records without a
/// URL are ignored.
pub fn select_public_url(tunnels: &[TunnelRecord]) -> Option<(&str, Protocol)> {
    [Protocol::Http, Protocol::Https].into_iter().find_map(|wanted| {
        tunnels
            .iter()
            .filter(|t| t.proto == wanted)
            .find_map(|t| t.public_url.as_deref().filter(|u| !u.is_empty()))
            .map(|url| (url, wanted))
    })
}

/// Client for the ngrok local control API
#[derive(Debug, Clone)]
pub struct TunnelDiscovery {
    client: Client,
    api_url: String,
}

impl TunnelDiscovery {
    /// Create a new discovery client
    pub fn new(api_url: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .user_agent(format!("ngrok-updater/{}", env!("CARGO_PKG_VERSION")))
            .timeout(DISCOVERY_TIMEOUT)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            api_url: api_url.into(),
        })
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    /// Query the tunnel API and select one public URL.
    ///
    /// Transport and decoding failures are folded into [`DiscoveryError`];
    /// this never panics on a misbehaving API.
    pub async fn discover(&self) -> DiscoveryResult {
        tracing::debug!("Fetching tunnels from: {}", self.api_url);

        let response = self
            .client
            .get(&self.api_url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(DiscoveryError::Network)?;

        let body = response.text().await.map_err(DiscoveryError::Network)?;

        let list: TunnelList = serde_json::from_str(&body).map_err(DiscoveryError::Parse)?;

        match select_public_url(&list.tunnels) {
            Some((url, Protocol::Https)) => {
                tracing::info!("Found ngrok tunnel URL (HTTPS): {}", url);
                Ok(url.to_string())
            }
            Some((url, _)) => {
                tracing::info!("Found ngrok tunnel URL: {}", url);
                Ok(url.to_string())
            }
            None => Err(DiscoveryError::NotFound),
        }
    }
}
