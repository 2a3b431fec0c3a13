//! KEYLEDGER client library
//!
//! Submits signed record transactions to a state service, waits for their
//! batches to commit and reads records back.

pub mod cache;
pub mod client;
pub mod error;
pub mod keyfile;

pub use cache::*;
pub use client::*;
pub use error::*;
pub use keyfile::*;
