//! Error types for the kdb+ MCP Server.
//!
//! This module defines all error types using `thiserror` for ergonomic error handling.
//! Each variant renders as a short classification followed by an actionable message,
//! so the text can be handed straight back to the AI assistant.

use thiserror::Error;

const CONNECTION_HINT: &str = "Verify that the kdb+ process is running and listening on this port.";

/// Coarse classification of a failure, used when rendering error text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad identifier, missing or mistyped argument. No engine call made.
    Validation,
    /// Named table is not loaded in the engine session.
    NotFound,
    /// Free-form query matched a dangerous pattern.
    SafetyBlock,
    /// The engine rejected the query.
    Engine,
    /// Engine unreachable, handshake refused, or timed out.
    Connection,
    /// Anything else.
    Unclassified,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::NotFound => "not_found",
            Self::SafetyBlock => "safety_block",
            Self::Engine => "engine",
            Self::Connection => "connection",
            Self::Unclassified => "unclassified",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug)]
pub enum KdbError {
    #[error("Validation error: {message}")]
    Validation { message: String },

    #[error("Not found: table '{table}' is not loaded. Call list_tables to see available tables.")]
    TableNotFound { table: String },

    #[error("Query blocked for safety. {reason}")]
    SafetyBlocked { reason: String },

    #[error("KDB+ error: {message}")]
    Engine { message: String },

    #[error("Connection error: {message} ({host}:{port}). {suggestion}")]
    Connection {
        message: String,
        host: String,
        port: u16,
        suggestion: String,
    },

    #[error(
        "Connection error: {operation} timed out after {elapsed_secs}s ({host}:{port}). {suggestion}"
    )]
    Timeout {
        operation: String,
        elapsed_secs: u64,
        host: String,
        port: u16,
        suggestion: String,
    },

    #[error("Protocol error: {message}")]
    Protocol { message: String },

    #[error("Error: {message}")]
    Internal { message: String },

    #[error("Unknown tool: {name}")]
    UnknownTool { name: String },
}

impl KdbError {
    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Create a table not found error.
    pub fn table_not_found(table: impl Into<String>) -> Self {
        Self::TableNotFound {
            table: table.into(),
        }
    }

    /// Create a safety block error carrying the matched pattern's reason.
    pub fn safety_blocked(reason: impl Into<String>) -> Self {
        Self::SafetyBlocked {
            reason: reason.into(),
        }
    }

    /// Create an engine error from the q error text.
    pub fn engine(message: impl Into<String>) -> Self {
        Self::Engine {
            message: message.into(),
        }
    }

    /// Create a connection error with host/port context.
    pub fn connection(message: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self::Connection {
            message: message.into(),
            host: host.into(),
            port,
            suggestion: CONNECTION_HINT.to_string(),
        }
    }

    /// Create a timeout error with host/port context.
    pub fn timeout(
        operation: impl Into<String>,
        elapsed_secs: u64,
        host: impl Into<String>,
        port: u16,
    ) -> Self {
        Self::Timeout {
            operation: operation.into(),
            elapsed_secs,
            host: host.into(),
            port,
            suggestion: CONNECTION_HINT.to_string(),
        }
    }

    /// Create a wire protocol error.
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Create an unknown tool error.
    pub fn unknown_tool(name: impl Into<String>) -> Self {
        Self::UnknownTool { name: name.into() }
    }

    /// Classify this error for rendering and logging.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation { .. } | Self::UnknownTool { .. } => ErrorKind::Validation,
            Self::TableNotFound { .. } => ErrorKind::NotFound,
            Self::SafetyBlocked { .. } => ErrorKind::SafetyBlock,
            Self::Engine { .. } => ErrorKind::Engine,
            Self::Connection { .. } | Self::Timeout { .. } | Self::Protocol { .. } => {
                ErrorKind::Connection
            }
            Self::Internal { .. } => ErrorKind::Unclassified,
        }
    }
}

/// Result type alias for kdb+ operations.
pub type KdbResult<T> = Result<T, KdbError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = KdbError::connection("Connection refused", "localhost", 5000);
        let text = err.to_string();
        assert!(text.starts_with("Connection error"));
        assert!(text.contains("localhost:5000"));
        assert!(text.contains("kdb+ process is running"));
    }

    #[test]
    fn test_unknown_tool_display() {
        let err = KdbError::unknown_tool("frobnicate");
        assert_eq!(err.to_string(), "Unknown tool: frobnicate");
    }

    #[test]
    fn test_engine_error_display() {
        let err = KdbError::engine("type");
        assert_eq!(err.to_string(), "KDB+ error: type");
    }

    #[test]
    fn test_error_kinds() {
        assert_eq!(KdbError::validation("x").kind(), ErrorKind::Validation);
        assert_eq!(KdbError::table_not_found("t").kind(), ErrorKind::NotFound);
        assert_eq!(KdbError::safety_blocked("r").kind(), ErrorKind::SafetyBlock);
        assert_eq!(KdbError::engine("e").kind(), ErrorKind::Engine);
        assert_eq!(KdbError::timeout("connect", 5, "h", 1).kind(), ErrorKind::Connection);
        assert_eq!(KdbError::protocol("bad").kind(), ErrorKind::Connection);
        assert_eq!(KdbError::internal("boom").kind(), ErrorKind::Unclassified);
    }

    #[test]
    fn test_timeout_names_endpoint() {
        let text = KdbError::timeout("query", 30, "kdb.local", 5001).to_string();
        assert_eq!(
            text,
            "Connection error: query timed out after 30s (kdb.local:5001). \
             Verify that the kdb+ process is running and listening on this port."
        );
    }
}
