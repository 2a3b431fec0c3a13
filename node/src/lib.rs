//! KEYLEDGER Dev Node
//!
//! Single-process state service for the record family:
//! - REST API compatible with the client
//! - Ordered batch executor with atomic batches
//! - In-memory or sled-backed state

mod api;
mod node;
mod runtime;

pub use api::*;
pub use node::*;
pub use runtime::*;
