//! Session gateway: one persistent connection shared by every request.

use crate::config::EngineConfig;
use crate::engine::connection::IpcConnection;
use crate::error::{KdbError, KdbResult};
use crate::models::query::ComposedQuery;
use crate::models::value::QValue;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Holds one connection behind a mutex; requests run one at a time.
///
/// The connection is opened lazily. Transport failures and cancelled calls
/// drop it so the next request reconnects; q errors leave it in place.
#[derive(Debug)]
pub struct SessionGateway {
    config: Arc<EngineConfig>,
    handle: Mutex<Option<IpcConnection>>,
}

impl SessionGateway {
    pub fn new(config: Arc<EngineConfig>) -> Self {
        Self {
            config,
            handle: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// 1 while the session connection is established, else 0.
    pub async fn open_connections(&self) -> usize {
        usize::from(self.handle.lock().await.is_some())
    }

    /// Run one query on the session connection.
    ///
    /// The connection is out of the slot for the whole round trip. A call
    /// dropped mid-flight therefore leaves the slot empty and the next call
    /// reconnects instead of reading a stale response.
    pub async fn execute(&self, query: &ComposedQuery) -> KdbResult<QValue> {
        let mut slot = self.handle.lock().await;
        let mut connection = match slot.take() {
            Some(connection) => connection,
            None => {
                let connection = IpcConnection::connect(&self.config).await?;
                info!(
                    address = %self.config.address(),
                    capability = connection.capability(),
                    "Session established"
                );
                connection
            }
        };

        let result = connection.query(query.as_str()).await;
        match &result {
            Ok(_) | Err(KdbError::Engine { .. }) => *slot = Some(connection),
            Err(err) => {
                warn!(error = %err, "Dropping broken session connection");
                connection.close().await;
            }
        }
        result
    }

    /// Close the session connection, if open.
    pub async fn close(&self) {
        if let Some(connection) = self.handle.lock().await.take() {
            connection.close().await;
            info!("Session closed");
        }
    }
}
