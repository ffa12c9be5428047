//! HOT/RET Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared ambient plumbing for the HOT/RET loader workspace.
//!
//! # Overview
//!
//! - **Error Handling**: [`CommonError`] and the crate [`Result`] alias
//! - **Environment**: typed lookups of environment variables with defaults
//! - **Logging**: `tracing` subscriber setup for console and rolling files
//!
//! # Example
//!
//! ```no_run
//! use hotret_common::logging::{init_logging, LogConfig};
//!
//! fn main() -> hotret_common::Result<()> {
//!     let config = LogConfig::from_env()?;
//!     init_logging(&config)?;
//!     tracing::info!("Loader started");
//!     Ok(())
//! }
//! ```

pub mod env;
pub mod error;
pub mod logging;

pub use error::{CommonError, Result};
