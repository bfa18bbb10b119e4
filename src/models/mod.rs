//! Data models for the kdb+ MCP Server.

pub mod query;
pub mod result;
pub mod value;

pub use query::{ComposedQuery, Limit};
pub use result::EngineResult;
pub use value::{QAtom, QTable, QValue};
