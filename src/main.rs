use std::sync::Arc;

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use mcp_tool_server::config::{LogFormat, ServerConfig};
use mcp_tool_server::server::McpServer;
use mcp_tool_server::tools;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let config = match ServerConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("mcp-tool-server: configuration error: {e}");
            std::process::exit(1);
        }
    };

    init_tracing(config.log_format);
    info!(
        project_root = %config.project_root.display(),
        strategy = %config.fallback.fallback_strategy,
        max_retries = config.fallback.max_retries,
        "configuration loaded"
    );

    let server = Arc::new(McpServer::new(config.clone()));
    if let Err(e) = tools::register_builtin_tools(&server, &config) {
        error!(error = %e, "failed to register built-in tools");
        std::process::exit(1);
    }

    if let Err(e) = server.run().await {
        error!(error = %e, "fatal error");
        std::process::exit(1);
    }
}

/// Logs go to stderr; stdout carries the protocol.
fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.with_ansi(false).init(),
    }
}
