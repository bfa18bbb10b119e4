//! Stdio transport for the MCP server.
//!
//! This transport uses standard input/output for communication,
//! which is the standard mode for CLI-based MCP integrations.

use crate::error::{KdbError, KdbResult};
use crate::mcp::KdbService;
use crate::tools::Dispatcher;
use crate::transport::{Transport, wait_for_signal};
use rmcp::{ServiceExt, transport::stdio};
use std::sync::Arc;
use tracing::{info, warn};

/// Stdio transport implementation.
///
/// This transport reads JSON-RPC messages from stdin and writes
/// responses to stdout, following the MCP protocol specification.
pub struct StdioTransport {
    dispatcher: Arc<Dispatcher>,
}

impl StdioTransport {
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self { dispatcher }
    }
}

impl Transport for StdioTransport {
    async fn run(&self) -> KdbResult<()> {
        info!("Starting MCP server with stdio transport");

        let service = KdbService::new(self.dispatcher.clone());
        let running_service = service.serve(stdio()).await.map_err(|e| {
            KdbError::internal(format!("Failed to start stdio transport: {e}"))
        })?;

        let shutdown_requested = tokio::select! {
            result = running_service.waiting() => {
                match result {
                    Ok(_quit_reason) => info!("Stdio transport completed normally"),
                    Err(e) => {
                        warn!(error = %e, "Stdio transport error");
                        self.dispatcher.shutdown().await;
                        return Err(KdbError::internal(format!("Stdio transport error: {e}")));
                    }
                }
                false
            }
            _ = wait_for_signal() => {
                info!("Shutdown signal received (send again to force exit)");
                true
            }
        };

        if shutdown_requested {
            tokio::spawn(async {
                wait_for_signal().await;
                warn!("Received second signal, forcing immediate exit");
                std::process::exit(1);
            });
        }

        info!("Closing engine connections");
        self.dispatcher.shutdown().await;

        if shutdown_requested {
            // select! cannot interrupt a blocking stdin read
            info!("Exiting process");
            std::process::exit(0);
        }

        Ok(())
    }

    fn name(&self) -> &'static str {
        "stdio"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::engine::{Gateway, TableRegistry};

    #[test]
    fn test_stdio_transport_creation() {
        let config = Arc::new(EngineConfig::parse("localhost:5000").unwrap());
        let dispatcher = Dispatcher::new(
            Arc::new(Gateway::from_config(config)),
            Arc::new(TableRegistry::new()),
        );
        let transport = StdioTransport::new(Arc::new(dispatcher));
        assert_eq!(transport.name(), "stdio");
    }
}
