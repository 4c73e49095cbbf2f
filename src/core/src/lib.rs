//! Skiff Core - Foundational Types
//!
//! Error taxonomy and engine configuration shared by the image engine
//! and the `skiff` command line.

pub mod config;
pub mod error;

// Re-export commonly used types
pub use config::{EngineConfig, RegistriesConf};
pub use error::{CandidateError, Result, SkiffError};

/// Skiff version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
