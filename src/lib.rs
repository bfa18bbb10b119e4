//! kdb+ MCP Server Library
//!
//! This library provides MCP (Model Context Protocol) tools for AI assistants
//! to explore and query kdb+ tables over q IPC.

pub mod auth;
pub mod config;
pub mod engine;
pub mod error;
pub mod mcp;
pub mod models;
pub mod tools;
pub mod transport;

pub use config::Config;
pub use error::KdbError;
pub use mcp::KdbService;
