//! KEYLEDGER Core Library
//!
//! Core types, traits, and abstractions for the KEYLEDGER record store.
//! This crate provides the foundation for all other KEYLEDGER components.

pub mod types;
pub mod traits;
pub mod error;
pub mod config;

pub use types::*;
pub use traits::*;
pub use error::*;
pub use config::*;
