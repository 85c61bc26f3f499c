use clap::Parser;

/// ngrok URL updater for n8n
///
/// Watches the ngrok API for the public tunnel URL and writes it to the
/// webhook file n8n reads. Settings come from the environment: NGROK_API_URL,
/// N8N_API_URL, N8N_HEALTH_URL, UPDATE_INTERVAL, WEBHOOK_FILE_PATH, LOG_FILE.
#[derive(Parser, Debug)]
#[command(name = "ngrok-updater")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Check the tunnel once, update the file if needed, and exit
    #[arg(long)]
    pub once: bool,

    /// Don't wait for ngrok and n8n before the first check
    #[arg(long)]
    pub skip_readiness: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,
}
