//! Record transaction family for KEYLEDGER
//!
//! Implements named records addressed by key:
//! - Namespaced address derivation
//! - Payload and packed state codecs
//! - Signed transaction and batch envelopes
//! - The handler that applies create, update and delete to state

pub mod address;
pub mod payload;
pub mod record_set;
pub mod transaction;
pub mod context;
pub mod handler;
pub mod validator;

pub use address::*;
pub use payload::*;
pub use record_set::*;
pub use transaction::*;
pub use context::*;
pub use handler::*;
pub use validator::*;
