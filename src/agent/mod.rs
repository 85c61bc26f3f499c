// Agent module for tunnel URL publishing
//
// This module keeps n8n's webhook URL in sync with the active ngrok tunnel.
// The agent waits for both services at startup, then polls the ngrok API on a
// fixed interval and rewrites the webhook file whenever the URL changes.

mod daemon;
mod discovery;
mod readiness;
mod scheduler;
mod sink;

pub use daemon::{Reconciler, TickOutcome};
pub use discovery::{DiscoveryError, TunnelDiscovery};
pub use readiness::{GateSettings, ReadinessGate};
pub use scheduler::PollingScheduler;
pub use sink::{PublishError, WebhookSink};

/// URL on a local port that nothing listens on
#[cfg(test)]
pub(crate) fn closed_port_url(path: &str) -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{addr}{path}")
}
