//! Remote gateway: one fresh connection per request.

use crate::config::EngineConfig;
use crate::engine::connection::IpcConnection;
use crate::error::{KdbError, KdbResult};
use crate::models::query::ComposedQuery;
use crate::models::value::QValue;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, warn};

/// Opens a connection for each query and closes it on every exit path.
#[derive(Debug, Clone)]
pub struct RemoteGateway {
    config: Arc<EngineConfig>,
    open: Arc<AtomicUsize>,
}

impl RemoteGateway {
    pub fn new(config: Arc<EngineConfig>) -> Self {
        Self {
            config,
            open: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Connections currently held by in-flight requests.
    pub fn open_connections(&self) -> usize {
        self.open.load(Ordering::SeqCst)
    }

    async fn acquire(&self) -> KdbResult<ConnectionGuard> {
        let connection = IpcConnection::connect(&self.config).await?;
        self.open.fetch_add(1, Ordering::SeqCst);
        Ok(ConnectionGuard {
            connection: Some(connection),
            open: Arc::clone(&self.open),
        })
    }

    pub async fn execute(&self, query: &ComposedQuery) -> KdbResult<QValue> {
        let mut guard = self.acquire().await?;
        let result = guard.query(query.as_str()).await;
        guard.release().await;
        result
    }
}

/// RAII guard for a per-request connection.
///
/// Closes the socket and decrements the open count when released, or when
/// dropped on an early return or panic.
#[derive(Debug)]
struct ConnectionGuard {
    connection: Option<IpcConnection>,
    open: Arc<AtomicUsize>,
}

impl ConnectionGuard {
    async fn query(&mut self, query: &str) -> KdbResult<QValue> {
        match self.connection.as_mut() {
            Some(connection) => connection.query(query).await,
            None => Err(KdbError::internal("connection already released")),
        }
    }

    /// Explicitly close the connection (preferred over relying on Drop).
    async fn release(mut self) {
        if let Some(connection) = self.connection.take() {
            connection.close().await;
            self.open.fetch_sub(1, Ordering::SeqCst);
            debug!("Connection released");
        }
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        if self.connection.take().is_some() {
            self.open.fetch_sub(1, Ordering::SeqCst);
            warn!("Connection released via Drop - consider using explicit release()");
        }
    }
}
