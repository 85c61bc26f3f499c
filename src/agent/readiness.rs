use anyhow::{Context, Result};
use reqwest::{Client, StatusCode};
use std::time::Duration;
use tokio::time::sleep;

/// Startup probe schedule
#[derive(Debug, Clone)]
pub struct GateSettings {
    /// Maximum number of probe rounds
    pub rounds: u32,

    /// Pause between rounds
    pub probe_interval: Duration,

    /// Timeout for the tunnel API reachability probe
    pub probe_timeout: Duration,

    /// Timeout for the n8n health check
    pub health_timeout: Duration,
}

impl Default for GateSettings {
    fn default() -> Self {
        Self {
            rounds: 60, // 5 minutes at 5s per round
            probe_interval: Duration::from_secs(5),
            probe_timeout: Duration::from_secs(2),
            health_timeout: Duration::from_secs(5),
        }
    }
}

impl GateSettings {
    /// Upper bound on time spent sleeping between rounds
    pub fn budget(&self) -> Duration {
        self.probe_interval * self.rounds
    }
}

/// Which dependencies answered before the gate gave up
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReadinessReport {
    pub tunnel_ready: bool,
    pub app_ready: bool,
}

impl ReadinessReport {
    pub fn all_ready(&self) -> bool {
        self.tunnel_ready && self.app_ready
    }
}

/// Waits for the ngrok API and n8n to come up before the first poll
#[derive(Debug, Clone)]
pub struct ReadinessGate {
    client: Client,
    tunnel_url: String,
    health_url: String,
    settings: GateSettings,
}

impl ReadinessGate {
    pub fn new(
        tunnel_url: impl Into<String>,
        health_url: impl Into<String>,
        settings: GateSettings,
    ) -> Result<Self> {
        // Per-request timeouts are set on each probe
        let client = Client::builder()
            .user_agent(format!("ngrok-updater/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            tunnel_url: tunnel_url.into(),
            health_url: health_url.into(),
            settings,
        })
    }

    /// Probe both dependencies until they are up or the round budget runs out.
    ///
    /// Never fails: a dependency that stays down is logged and the caller
    /// proceeds in degraded mode.
    pub async fn wait_for_services(&self) -> ReadinessReport {
        tracing::info!("Waiting for services to be ready...");

        let mut report = ReadinessReport::default();

        for round in 1..=self.settings.rounds {
            if !report.tunnel_ready && self.tunnel_reachable().await {
                report.tunnel_ready = true;
                tracing::info!("ngrok API is ready");
            }

            if !report.app_ready && self.app_healthy().await {
                report.app_ready = true;
                tracing::info!("n8n is ready");
            }

            if report.all_ready() {
                tracing::info!("All services are ready!");
                return report;
            }

            tracing::debug!("Readiness round {}/{} incomplete", round, self.settings.rounds);

            if round < self.settings.rounds {
                sleep(self.settings.probe_interval).await;
            }
        }

        let waited = self.settings.budget().as_secs();
        if !report.tunnel_ready {
            tracing::error!("ngrok service is not ready after {} seconds", waited);
        }
        if !report.app_ready {
            tracing::error!("n8n service is not ready after {} seconds", waited);
        }

        report
    }

    /// Any HTTP response counts, whatever the status
    async fn tunnel_reachable(&self) -> bool {
        self.client
            .get(&self.tunnel_url)
            .timeout(self.settings.probe_timeout)
            .send()
            .await
            .is_ok()
    }

    /// Only `200 OK` counts
    pub async fn app_healthy(&self) -> bool {
        match self
            .client
            .get(&self.health_url)
            .timeout(self.settings.health_timeout)
            .send()
            .await
        {
            Ok(response) => response.status() == StatusCode::OK,
            Err(e) => {
                tracing::trace!("n8n health check failed: {}", e);
                false
            }
        }
    }
}
