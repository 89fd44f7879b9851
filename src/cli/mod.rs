//! CLI interface and argument parsing
//!
//! This module builds the command line from the configured jobs and runs the
//! selected one.

pub mod app;

// Re-export main types
pub use app::*;
