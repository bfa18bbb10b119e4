//! Tool handling.
//!
//! - `identifier`: identifier validation for table and column names
//! - `guard`: danger scanner for free-form q
//! - `args`: typed access to tool arguments
//! - `compose`: q query templates per tool
//! - `catalog`: the tool table
//! - `format`: bounded rendering of engine results
//! - `dispatch`: the per-call pipeline

pub mod args;
pub mod catalog;
pub mod compose;
pub mod dispatch;
pub mod format;
pub mod guard;
pub mod identifier;

pub use dispatch::{Dispatcher, ToolResponse};
pub use identifier::Identifier;
