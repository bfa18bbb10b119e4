//! Engine gateway.
//!
//! Sends composed q to a running kdb+ process over IPC and returns the
//! decoded value. Two connection strategies are available:
//!
//! - [`RemoteGateway`]: connection per request, released on every path
//! - [`SessionGateway`]: one persistent connection, requests serialized

pub mod codec;
pub mod connection;
pub mod loader;
pub mod registry;
pub mod remote;
pub mod session;

pub use registry::TableRegistry;
pub use remote::RemoteGateway;
pub use session::SessionGateway;

use crate::config::{EngineConfig, EngineMode};
use crate::error::KdbResult;
use crate::models::query::ComposedQuery;
use crate::models::value::QValue;
use std::sync::Arc;

/// Anything that can evaluate composed q.
pub trait Engine: Send + Sync {
    /// Evaluate the query and return the decoded result.
    ///
    /// q errors are returned as [`KdbError::Engine`](crate::error::KdbError::Engine);
    /// transport failures as connection errors.
    fn execute(&self, query: &ComposedQuery) -> impl Future<Output = KdbResult<QValue>> + Send;

    /// Human-readable description of where queries go.
    fn endpoint(&self) -> String;

    /// Release any held connections.
    fn close(&self) -> impl Future<Output = ()> + Send {
        async {}
    }
}

/// The gateway selected by configuration.
#[derive(Debug)]
pub enum Gateway {
    Remote(RemoteGateway),
    Session(SessionGateway),
}

impl Gateway {
    pub fn from_config(config: Arc<EngineConfig>) -> Self {
        match config.mode {
            EngineMode::Remote => Self::Remote(RemoteGateway::new(config)),
            EngineMode::Session => Self::Session(SessionGateway::new(config)),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        match self {
            Self::Remote(gateway) => gateway.config(),
            Self::Session(gateway) => gateway.config(),
        }
    }

    pub fn mode(&self) -> EngineMode {
        self.config().mode
    }

    /// Connections currently open to the engine.
    pub async fn open_connections(&self) -> usize {
        match self {
            Self::Remote(gateway) => gateway.open_connections(),
            Self::Session(gateway) => gateway.open_connections().await,
        }
    }
}

impl Engine for Gateway {
    async fn execute(&self, query: &ComposedQuery) -> KdbResult<QValue> {
        match self {
            Self::Remote(gateway) => gateway.execute(query).await,
            Self::Session(gateway) => gateway.execute(query).await,
        }
    }

    fn endpoint(&self) -> String {
        format!("{} ({} mode)", self.config().display_url(), self.mode())
    }

    async fn close(&self) {
        if let Self::Session(gateway) = self {
            gateway.close().await;
        }
    }
}
