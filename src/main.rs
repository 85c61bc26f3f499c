use anyhow::{Context, Result};
use clap::Parser;

mod agent;
mod cli;
mod config;
mod logging;

use agent::{
    GateSettings, PollingScheduler, ReadinessGate, Reconciler, TickOutcome, TunnelDiscovery,
    WebhookSink,
};
use cli::Args;
use config::Config;

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let args = Args::parse();

    let config = Config::from_env().context("Invalid configuration")?;

    logging::init_logging(args.verbose, config.log_file.as_deref());

    let runtime = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;
    runtime.block_on(async_main(args, config))
}

async fn async_main(args: Args, config: Config) -> Result<i32> {
    let discovery = TunnelDiscovery::new(config.ngrok_api_url.clone())?;
    let sink = WebhookSink::new(config.webhook_file_path.clone());
    let scheduler = PollingScheduler::new(config.update_interval());

    if args.once {
        let mut reconciler = Reconciler::new(discovery, sink, None, scheduler);
        let outcome = reconciler.run_once().await.context("Tunnel check aborted")?;
        return Ok(match outcome {
            TickOutcome::Published { .. } | TickOutcome::Unchanged => 0,
            TickOutcome::Unavailable(_) | TickOutcome::PublishFailed(_) => 1,
        });
    }

    let gate = if args.skip_readiness {
        None
    } else {
        Some(ReadinessGate::new(
            config.ngrok_api_url.clone(),
            config.health_url(),
            GateSettings::default(),
        )?)
    };

    let reconciler = Reconciler::new(discovery, sink, gate, scheduler);
    reconciler.run_until(shutdown_signal()).await;

    tracing::info!("ngrok URL updater stopped");
    Ok(0)
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    #[cfg(unix)]
    let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
        Ok(signal) => Some(signal),
        Err(e) => {
            tracing::warn!("Failed to install SIGTERM handler: {}", e);
            None
        }
    };

    #[cfg(unix)]
    let sigterm_future = async {
        match sigterm.as_mut() {
            Some(signal) => {
                signal.recv().await;
            }
            None => std::future::pending::<()>().await,
        }
    };
    #[cfg(not(unix))]
    let sigterm_future = std::future::pending::<()>();

    let ctrl_c = async {
        // Without a Ctrl+C handler only SIGTERM can stop us
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C shutdown signal");
        }
        _ = sigterm_future => {
            tracing::info!("Received SIGTERM shutdown signal");
        }
    }
}
