//! Shared types: errors and connection state

pub mod error;
pub mod state;

pub use error::{ClientError, Result};
pub use state::{AtomicConnectionState, ConnectionState};
