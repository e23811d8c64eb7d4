//! Error taxonomy for the coordination core.
//!
//! Precondition failures (duplicate agent, resource already locked, terminal
//! session) are NOT errors; operations report them as `Ok(false)`. Variants
//! here cover storage, parsing, and lookup failures only.

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the coordination core.
#[derive(Debug, Error)]
pub enum Error {
    /// Underlying `SQLite` operation failed.
    #[error("database error: {0}")]
    Database(String),

    /// Stored data could not be parsed back into its typed form.
    #[error("parse error: {0}")]
    Parse(String),

    /// Filesystem operation failed.
    #[error("io error: {0}")]
    Io(String),

    /// Requested entity does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Caller-supplied value was rejected.
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl Error {
    /// Process exit code for CLI consumers.
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::NotFound(_) => 2,
            Self::InvalidInput(_) => 3,
            Self::Database(_) | Self::Parse(_) | Self::Io(_) => 1,
        }
    }
}
