//! Kite - declarative task orchestration
//!
//! Jobs are trees of tasks and workflows described in a `kite.yml` file.
//! String values are templates with `{...}` expressions that are resolved
//! lazily against a hierarchy of variable scopes.

// Public modules
pub mod cli;
pub mod config;
pub mod error;
pub mod expression;
pub mod runner;
pub mod scope;

// Re-export commonly used types
pub use error::{KiteError, Result};

/// Current version of Kite
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
