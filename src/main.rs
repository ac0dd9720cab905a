/// flowdeck: desktop automation core
///
/// Main entry point for the flowdeck server. Loads configuration from the
/// environment and serves the flow API until Ctrl-C.

use flowdeck::{config::Config, server::start_server};

/// Application entry point
///
/// The server provides:
/// - Flow management API at /api/flows/*
/// - Execution history at /api/executions/*
/// - Webhook triggers at /webhook/{path}
/// - Health check at /healthz
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::default();
    start_server(config).await
}
