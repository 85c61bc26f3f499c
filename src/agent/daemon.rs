use std::future::Future;
use tokio::task::JoinError;

use super::{
    DiscoveryError, PollingScheduler, PublishError, ReadinessGate, TunnelDiscovery, WebhookSink,
};

/// What a single reconcile pass did
#[derive(Debug)]
pub enum TickOutcome {
    /// A new URL was written to the sink
    Published {
        previous: Option<String>,
        current: String,
    },
    /// Discovered URL matches the last published one
    Unchanged,
    /// No URL could be discovered
    Unavailable(DiscoveryError),
    /// A new URL was found but writing it failed
    PublishFailed(PublishError),
}

/// Keeps the webhook file in sync with the active ngrok tunnel
pub struct Reconciler {
    discovery: TunnelDiscovery,
    sink: WebhookSink,
    gate: Option<ReadinessGate>,
    scheduler: PollingScheduler,
    /// Last URL successfully written to the sink
    last_known_url: Option<String>,
}

impl Reconciler {
    pub fn new(
        discovery: TunnelDiscovery,
        sink: WebhookSink,
        gate: Option<ReadinessGate>,
        scheduler: PollingScheduler,
    ) -> Self {
        Self {
            discovery,
            sink,
            gate,
            scheduler,
            last_known_url: None,
        }
    }

    pub fn last_known_url(&self) -> Option<&str> {
        self.last_known_url.as_deref()
    }

    /// Run until `shutdown` resolves.
    ///
    /// Waits for dependencies, seeds the sink once, then polls every interval.
    /// A tick in progress is always finished; shutdown is only observed while
    /// waiting.
    pub async fn run_until<F>(mut self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tracing::info!("Starting ngrok URL updater...");
        tracing::info!("Tunnel API: {}", self.discovery.api_url());
        tracing::info!("Webhook file: {}", self.sink.path().display());
        tracing::info!("Update interval: {} seconds", self.scheduler.interval().as_secs());

        tokio::pin!(shutdown);

        if let Some(gate) = &self.gate {
            tokio::select! {
                _ = gate.wait_for_services() => {}
                _ = &mut shutdown => {
                    tracing::info!("Shutdown requested while waiting for services");
                    return;
                }
            }
        }

        self.seed().await;

        loop {
            tokio::select! {
                _ = self.scheduler.sleep_until_next_poll() => {}
                _ = &mut shutdown => {
                    tracing::info!("Shutdown requested, stopping updater");
                    return;
                }
            }

            match self.tick().await {
                Ok(outcome) => log_outcome(&outcome),
                Err(e) => tracing::error!("Error in main loop: {}", e),
            }
        }
    }

    /// Initial discovery and publish, before the steady-state loop
    pub async fn seed(&mut self) {
        match self.tick().await {
            Ok(TickOutcome::Unavailable(e)) => {
                tracing::warn!(kind = e.kind(), "Could not get initial webhook URL: {}", e);
            }
            Ok(outcome) => {
                log_outcome(&outcome);
                if let Some(url) = self.last_known_url() {
                    tracing::info!("Initial webhook URL set to: {}", url);
                }
            }
            Err(e) => tracing::error!("Error during initial webhook URL fetch: {}", e),
        }
    }

    /// One reconcile pass.
    ///
    /// The pass runs as its own task so a panic inside it is reported as a
    /// [`JoinError`] instead of taking the loop down. State only advances after
    /// a successful publish.
    pub async fn tick(&mut self) -> Result<TickOutcome, JoinError> {
        let outcome = tokio::spawn(reconcile(
            self.discovery.clone(),
            self.sink.clone(),
            self.last_known_url.clone(),
        ))
        .await?;

        if let TickOutcome::Published { current, .. } = &outcome {
            self.last_known_url = Some(current.clone());
        }

        Ok(outcome)
    }

    /// Single reconcile against whatever the sink currently holds.
    ///
    /// Skips the readiness gate. Used for one-shot runs.
    pub async fn run_once(&mut self) -> Result<TickOutcome, JoinError> {
        self.last_known_url = match self.sink.read_current() {
            Ok(current) => current,
            Err(e) => {
                tracing::warn!("Could not read {}: {}", self.sink.path().display(), e);
                None
            }
        };

        let outcome = self.tick().await?;
        log_outcome(&outcome);
        Ok(outcome)
    }
}

async fn reconcile(
    discovery: TunnelDiscovery,
    sink: WebhookSink,
    last_known_url: Option<String>,
) -> TickOutcome {
    let url = match discovery.discover().await {
        Ok(url) => url,
        Err(e) => return TickOutcome::Unavailable(e),
    };

    if last_known_url.as_deref() == Some(url.as_str()) {
        return TickOutcome::Unchanged;
    }

    match sink.publish(&url) {
        Ok(()) => TickOutcome::Published {
            previous: last_known_url,
            current: url,
        },
        Err(e) => TickOutcome::PublishFailed(e),
    }
}

fn log_outcome(outcome: &TickOutcome) {
    match outcome {
        TickOutcome::Published { previous, current } => {
            tracing::info!(
                "Webhook URL changed from {} to {}",
                previous.as_deref().unwrap_or("<none>"),
                current
            );
        }
        TickOutcome::Unchanged => tracing::debug!("Webhook URL unchanged"),
        TickOutcome::Unavailable(e) => {
            tracing::warn!(kind = e.kind(), "No webhook URL available: {}", e);
        }
        TickOutcome::PublishFailed(e) => {
            tracing::error!("Failed to update webhook configuration: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn tunnels_body(proto: &str, url: &str) -> String {
        format!(r#"{{"tunnels":[{{"proto":"{proto}","public_url":"{url}"}}]}}"#)
    }

    async fn serve_body(server: &MockServer, body: String) {
        server.reset().await;
        Mock::given(method("GET"))
            .and(path("/api/tunnels"))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(server)
            .await;
    }

    fn reconciler(server_uri: &str, sink_path: &Path, interval: Duration) -> Reconciler {
        Reconciler::new(
            TunnelDiscovery::new(format!("{server_uri}/api/tunnels")).unwrap(),
            WebhookSink::new(sink_path),
            None,
            PollingScheduler::new(interval),
        )
    }

    #[tokio::test]
    async fn tick_publishes_discovered_url() {
        let server = MockServer::start().await;
        serve_body(&server, tunnels_body("http", "http://abc123.ngrok.io")).await;
        let temp = tempfile::tempdir().unwrap();
        let sink_path = temp.path().join("webhook-url.txt");

        let mut reconciler = reconciler(&server.uri(), &sink_path, Duration::from_secs(30));
        let outcome = reconciler.tick().await.unwrap();

        assert!(matches!(
            outcome,
            TickOutcome::Published { previous: None, ref current } if current == "http://abc123.ngrok.io"
        ));
        assert_eq!(std::fs::read_to_string(&sink_path).unwrap(), "http://abc123.ngrok.io");
        assert_eq!(reconciler.last_known_url(), Some("http://abc123.ngrok.io"));
    }

    #[tokio::test]
    async fn equal_results_write_only_once() {
        let server = MockServer::start().await;
        serve_body(&server, tunnels_body("http", "http://abc123.ngrok.io")).await;
        let temp = tempfile::tempdir().unwrap();
        let sink_path = temp.path().join("webhook-url.txt");

        let mut reconciler = reconciler(&server.uri(), &sink_path, Duration::from_secs(30));
        reconciler.tick().await.unwrap();

        // If the second tick wrote, the file would reappear
        std::fs::remove_file(&sink_path).unwrap();
        let outcome = reconciler.tick().await.unwrap();

        assert!(matches!(outcome, TickOutcome::Unchanged));
        assert!(!sink_path.exists());
    }

    #[tokio::test]
    async fn empty_tunnel_list_keeps_previous_file() {
        let server = MockServer::start().await;
        serve_body(&server, r#"{"tunnels":[]}"#.to_string()).await;
        let temp = tempfile::tempdir().unwrap();
        let sink_path = temp.path().join("webhook-url.txt");
        std::fs::write(&sink_path, "http://old.ngrok.io").unwrap();

        let mut reconciler = reconciler(&server.uri(), &sink_path, Duration::from_secs(30));
        let outcome = reconciler.tick().await.unwrap();

        assert!(matches!(outcome, TickOutcome::Unavailable(DiscoveryError::NotFound)));
        assert_eq!(std::fs::read_to_string(&sink_path).unwrap(), "http://old.ngrok.io");
        assert_eq!(reconciler.last_known_url(), None);
    }

    #[tokio::test]
    async fn unreachable_api_leaves_state_alone() {
        let temp = tempfile::tempdir().unwrap();
        let sink_path = temp.path().join("webhook-url.txt");
        std::fs::write(&sink_path, "http://abc123.ngrok.io").unwrap();

        let mut reconciler = Reconciler::new(
            TunnelDiscovery::new(crate::agent::closed_port_url("/api/tunnels")).unwrap(),
            WebhookSink::new(&sink_path),
            None,
            PollingScheduler::new(Duration::from_secs(30)),
        );
        reconciler.last_known_url = Some("http://abc123.ngrok.io".to_string());

        let outcome = reconciler.tick().await.unwrap();

        assert!(matches!(
            outcome,
            TickOutcome::Unavailable(DiscoveryError::Network(ref e)) if e.is_connect()
        ));
        assert_eq!(reconciler.last_known_url(), Some("http://abc123.ngrok.io"));
        assert_eq!(std::fs::read_to_string(&sink_path).unwrap(), "http://abc123.ngrok.io");
    }

    #[tokio::test]
    async fn run_until_keeps_polling_while_api_is_down() {
        let temp = tempfile::tempdir().unwrap();
        let sink_path = temp.path().join("webhook-url.txt");

        let reconciler = Reconciler::new(
            TunnelDiscovery::new(crate::agent::closed_port_url("/api/tunnels")).unwrap(),
            WebhookSink::new(&sink_path),
            None,
            PollingScheduler::new(Duration::from_millis(20)),
        );
        reconciler
            .run_until(tokio::time::sleep(Duration::from_millis(100)))
            .await;

        assert!(!sink_path.exists());
    }

    #[tokio::test]
    async fn failed_publish_is_retried_until_it_succeeds() {
        let server = MockServer::start().await;
        serve_body(&server, tunnels_body("http", "http://a.ngrok.io")).await;
        let temp = tempfile::tempdir().unwrap();
        let dir = temp.path().join("shared");
        std::fs::create_dir(&dir).unwrap();
        let sink_path = dir.join("webhook-url.txt");

        let mut reconciler = reconciler(&server.uri(), &sink_path, Duration::from_secs(30));
        reconciler.tick().await.unwrap();
        assert_eq!(reconciler.last_known_url(), Some("http://a.ngrok.io"));

        // Tunnel moves while the volume is gone
        serve_body(&server, tunnels_body("http", "http://b.ngrok.io")).await;
        std::fs::remove_dir_all(&dir).unwrap();

        for _ in 0..2 {
            let outcome = reconciler.tick().await.unwrap();
            assert!(matches!(outcome, TickOutcome::PublishFailed(_)));
            assert_eq!(reconciler.last_known_url(), Some("http://a.ngrok.io"));
        }

        std::fs::create_dir(&dir).unwrap();
        let outcome = reconciler.tick().await.unwrap();

        assert!(matches!(
            outcome,
            TickOutcome::Published { previous: Some(ref previous), ref current }
                if previous == "http://a.ngrok.io" && current == "http://b.ngrok.io"
        ));
        assert_eq!(std::fs::read_to_string(&sink_path).unwrap(), "http://b.ngrok.io");
    }

    #[tokio::test]
    async fn https_fallback_is_published_when_no_http_tunnel() {
        let server = MockServer::start().await;
        serve_body(&server, tunnels_body("https", "https://abc123.ngrok.io")).await;
        let temp = tempfile::tempdir().unwrap();
        let sink_path = temp.path().join("webhook-url.txt");

        let mut reconciler = reconciler(&server.uri(), &sink_path, Duration::from_secs(30));
        reconciler.tick().await.unwrap();

        assert_eq!(std::fs::read_to_string(&sink_path).unwrap(), "https://abc123.ngrok.io");
    }

    #[tokio::test]
    async fn run_once_compares_against_published_file() {
        let server = MockServer::start().await;
        serve_body(&server, tunnels_body("http", "http://abc123.ngrok.io")).await;
        let temp = tempfile::tempdir().unwrap();
        let sink_path = temp.path().join("webhook-url.txt");
        std::fs::write(&sink_path, "http://abc123.ngrok.io").unwrap();

        let mut reconciler = reconciler(&server.uri(), &sink_path, Duration::from_secs(30));
        let outcome = reconciler.run_once().await.unwrap();

        assert!(matches!(outcome, TickOutcome::Unchanged));
        assert_eq!(reconciler.last_known_url(), Some("http://abc123.ngrok.io"));
    }

    #[tokio::test]
    async fn run_until_seeds_then_polls_until_shutdown() {
        let server = MockServer::start().await;
        serve_body(&server, tunnels_body("http", "http://abc123.ngrok.io")).await;
        let temp = tempfile::tempdir().unwrap();
        let sink_path = temp.path().join("webhook-url.txt");

        let reconciler = reconciler(&server.uri(), &sink_path, Duration::from_millis(20));
        reconciler
            .run_until(tokio::time::sleep(Duration::from_millis(200)))
            .await;

        assert_eq!(std::fs::read_to_string(&sink_path).unwrap(), "http://abc123.ngrok.io");
        let polls = server.received_requests().await.unwrap().len();
        assert!(polls >= 2, "expected seed plus at least one tick, got {polls}");
    }

    #[tokio::test]
    async fn run_until_survives_missing_tunnel_at_startup() {
        let server = MockServer::start().await;
        serve_body(&server, r#"{"tunnels":[]}"#.to_string()).await;
        let temp = tempfile::tempdir().unwrap();
        let sink_path = temp.path().join("webhook-url.txt");

        let reconciler = reconciler(&server.uri(), &sink_path, Duration::from_millis(20));
        reconciler
            .run_until(tokio::time::sleep(Duration::from_millis(100)))
            .await;

        assert!(!sink_path.exists());
    }
}
