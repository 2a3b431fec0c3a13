//! KEYLEDGER State Management
//!
//! Provides the key-value backends the dev node applies batches to.
//! Keys are state addresses, values are packed record blobs.

pub mod store;
pub mod memory;
pub mod persistent;

pub use store::*;
pub use memory::*;
pub use persistent::*;
