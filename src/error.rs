// src/error.rs

//! Crate-wide error type
//!
//! Errors only cross unit boundaries during construction. Once a restore
//! pass is running, every failure is caught at the solution, project group
//! or package boundary, logged, and counted.

use thiserror::Error;

/// Errors raised by depfetch components
#[derive(Error, Debug)]
pub enum Error {
    /// Failed to set up a component (temp directories, thread pool, HTTP client)
    #[error("Initialization failed: {0}")]
    InitError(String),

    /// Filesystem operation failed
    #[error("I/O error: {0}")]
    IoError(String),

    /// A manifest, config or project file could not be parsed
    #[error("Parse error: {0}")]
    ParseError(String),

    /// A file or directory that should exist was not found
    #[error("Not found: {0}")]
    NotFoundError(String),

    /// An external executable could not be located
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    /// An external tool exited unsuccessfully
    #[error("Command failed: {0}")]
    CommandFailed(String),

    /// An external tool did not finish before its deadline
    #[error("Command '{command}' timed out after {seconds} seconds")]
    CommandTimeout { command: String, seconds: u64 },

    /// The synthesized scaffold project could not be located or edited
    #[error("Scaffold project error: {0}")]
    ScaffoldError(String),

    /// An environment option or proxy descriptor is malformed
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;
