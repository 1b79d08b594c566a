//! EIP Common - Shared types for the EIP offload engine
//!
//! This crate provides the pieces every engine component shares:
//! - Error taxonomy and hardware error classification
//! - Engine configuration (serde, JSON)
//! - Logging bootstrap

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod logging;

pub use config::*;
pub use error::*;
pub use logging::init_logging;
