//! A single kdb+ IPC connection.

use crate::config::EngineConfig;
use crate::engine::codec::{self, CAPABILITY, HEADER_SIZE, Header, MessageType};
use crate::error::{KdbError, KdbResult};
use crate::models::value::QValue;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

/// An authenticated TCP connection to a q process.
#[derive(Debug)]
pub struct IpcConnection {
    stream: TcpStream,
    host: String,
    port: u16,
    capability: u8,
    query_timeout: Option<Duration>,
}

impl IpcConnection {
    /// Connect and complete the handshake within the configured timeout.
    pub async fn connect(config: &EngineConfig) -> KdbResult<Self> {
        let address = config.address();
        let secs = config.connect_timeout.as_secs();

        let stream = timeout(config.connect_timeout, TcpStream::connect(&address))
            .await
            .map_err(|_| KdbError::timeout("connect", secs, &config.host, config.port))?
            .map_err(|e| {
                KdbError::connection(format!("failed to connect: {e}"), &config.host, config.port)
            })?;
        stream.set_nodelay(true).map_err(|e| {
            KdbError::connection(format!("socket setup failed: {e}"), &config.host, config.port)
        })?;

        let mut connection = Self {
            stream,
            host: config.host.clone(),
            port: config.port,
            capability: 0,
            query_timeout: config.query_timeout,
        };
        timeout(
            config.connect_timeout,
            connection.handshake(&config.credentials()),
        )
        .await
        .map_err(|_| KdbError::timeout("handshake", secs, &config.host, config.port))??;

        debug!(
            host = %connection.host,
            port = connection.port,
            capability = connection.capability,
            "Connected to kdb+"
        );
        Ok(connection)
    }

    async fn handshake(&mut self, credentials: &str) -> KdbResult<()> {
        let mut hello = Vec::with_capacity(credentials.len() + 2);
        hello.extend_from_slice(credentials.as_bytes());
        hello.push(CAPABILITY);
        hello.push(0);
        self.stream
            .write_all(&hello)
            .await
            .map_err(|e| self.io_error("handshake failed", e))?;

        let mut reply = [0u8; 1];
        match self.stream.read(&mut reply).await {
            Ok(1) => {
                self.capability = reply[0];
                Ok(())
            }
            Ok(_) => Err(KdbError::connection(
                "handshake rejected (check username and password)",
                &self.host,
                self.port,
            )),
            Err(e) => Err(self.io_error("handshake failed", e)),
        }
    }

    /// Capability negotiated with the server.
    pub fn capability(&self) -> u8 {
        self.capability
    }

    /// Evaluate `query` synchronously and decode the response.
    pub async fn query(&mut self, query: &str) -> KdbResult<QValue> {
        match self.query_timeout {
            Some(limit) => timeout(limit, self.round_trip(query)).await.map_err(|_| {
                KdbError::timeout("query", limit.as_secs(), &self.host, self.port)
            })?,
            None => self.round_trip(query).await,
        }
    }

    async fn round_trip(&mut self, query: &str) -> KdbResult<QValue> {
        let request = codec::encode_query(query)?;
        self.stream
            .write_all(&request)
            .await
            .map_err(|e| self.io_error("send failed", e))?;

        loop {
            let message = self.read_message().await?;
            let header = Header::unpack(&message)?;
            if header.message_type == MessageType::Response {
                return codec::decode_message(&message);
            }
            debug!(message_type = ?header.message_type, "Skipping unsolicited message");
        }
    }

    async fn read_message(&mut self) -> KdbResult<Vec<u8>> {
        let mut header_bytes = [0u8; HEADER_SIZE];
        self.stream
            .read_exact(&mut header_bytes)
            .await
            .map_err(|e| self.io_error("connection lost while reading response", e))?;
        let header = Header::unpack(&header_bytes)?;

        let mut message = vec![0u8; header.length as usize];
        message[..HEADER_SIZE].copy_from_slice(&header_bytes);
        self.stream
            .read_exact(&mut message[HEADER_SIZE..])
            .await
            .map_err(|e| self.io_error("connection lost while reading response", e))?;
        Ok(message)
    }

    /// Flush and close the socket.
    pub async fn close(mut self) {
        let _ = self.stream.shutdown().await;
    }

    fn io_error(&self, context: &str, err: std::io::Error) -> KdbError {
        KdbError::connection(format!("{context}: {err}"), &self.host, self.port)
    }
}
