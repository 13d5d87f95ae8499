//! Floatsync Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared building blocks for the floatsync workspace members:
//!
//! - **Logging**: `tracing` subscriber setup driven by `LOG_*` variables
//! - **Errors**: the shared [`Error`] type and [`Result`] alias
//! - **Env**: typed helpers for reading configuration from the environment
//! - **Types**: identifiers for entities and cycles
//!
//! # Example
//!
//! ```no_run
//! use floatsync_common::logging::{init_logging, LogConfig};
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = LogConfig::from_env()?;
//!     let _guard = init_logging(&config)?;
//!     tracing::info!("started");
//!     Ok(())
//! }
//! ```

pub mod env;
pub mod error;
pub mod logging;
pub mod types;

pub use error::{Error, Result};
pub use types::{CycleKey, CycleNumber, EntityId};
