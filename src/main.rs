//! kdb+ MCP Server - Main entry point.
//!
//! This server provides MCP (Model Context Protocol) tools for AI assistants
//! to explore and query tables held by a kdb+ process.

use kdb_mcp_server::auth::AuthConfig;
use kdb_mcp_server::config::{Config, TransportMode};
use kdb_mcp_server::engine::{Gateway, TableRegistry};
use kdb_mcp_server::tools::Dispatcher;
use kdb_mcp_server::transport::{HttpTransport, StdioTransport, Transport};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Initialize the tracing subscriber. Logs go to stderr so stdout stays
/// free for the stdio transport.
fn init_tracing(config: &Config) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.json_logs {
        subscriber
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        subscriber
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::parse_args();

    if config.enable_logs {
        init_tracing(&config);
    }

    let engine_config = match config.engine_config() {
        Ok(engine_config) => Arc::new(engine_config),
        Err(e) => {
            eprintln!("Error: {e}");
            eprintln!();
            eprintln!("Usage: kdb-mcp-server --url kdb://[user[:password]@]host:port");
            eprintln!();
            eprintln!("Examples:");
            eprintln!("  kdb-mcp-server --url kdb://localhost:5000");
            eprintln!("  kdb-mcp-server --url kdb://analyst@10.0.0.5:5001 --mode session");
            eprintln!("  kdb-mcp-server --url localhost:5000 --data-dir /data/hdb");
            std::process::exit(1);
        }
    };

    info!(
        transport = %config.transport,
        engine = %engine_config.display_url(),
        mode = %engine_config.mode,
        "Starting kdb+ MCP Server v{}",
        env!("CARGO_PKG_VERSION")
    );

    let gateway = Arc::new(Gateway::from_config(engine_config));
    let registry = Arc::new(TableRegistry::new());
    let dispatcher =
        Arc::new(Dispatcher::new(gateway, registry).with_data_dir(config.data_dir.clone()));

    // Engine may not be up yet; tools report connection errors per call.
    dispatcher.startup().await;

    let result = match config.transport {
        TransportMode::Stdio => {
            info!("Using stdio transport");
            StdioTransport::new(dispatcher).run().await
        }
        TransportMode::Http => {
            info!(
                host = %config.http_host,
                port = config.http_port,
                endpoint = %config.mcp_endpoint,
                "Using HTTP transport"
            );
            let auth = AuthConfig::from_tokens(config.auth_tokens.clone())?;
            HttpTransport::new(
                dispatcher,
                &config.http_host,
                config.http_port,
                &config.mcp_endpoint,
            )
            .with_auth(auth)
            .run()
            .await
        }
    };

    if let Err(e) = result {
        error!(error = %e, "Server error");
        return Err(e.into());
    }

    info!("Server shutdown complete");
    Ok(())
}
