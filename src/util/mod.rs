//! Miscellaneous shared helpers (config paths, error types).

pub mod config;
pub mod error;

pub use config::{resolve_relative, state_dir_for_node};
pub use error::{ConcordError, Result, SerializationError, StateStoreError};
