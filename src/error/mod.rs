//! Error handling module for discovery and export operations.
//!
//! This module provides structured error types covering connection setup,
//! configuration loading, schema discovery, and export execution. Setup
//! errors are fatal; per-document errors during export are recovered
//! locally by the engines and never surface through these types.

pub mod kinds;

// Re-export commonly used types
pub use kinds::{
    ConfigError, ConnectionError, DiscoveryError, ExportError, MongotabError, Result,
};
