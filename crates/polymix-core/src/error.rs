//! Error types for polymix-core
//!
//! A build never recovers locally: any error aborts composition and is
//! reported by the CLI as a single `Error: <message>` line.

use thiserror::Error;

/// Result type alias using the library's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for polymix-core
#[derive(Error, Debug)]
pub enum Error {
    /// A chunk was placed over an interval that is already occupied.
    #[error("overlapping chunks at [{start}, {end}): {existing} vs {incoming}")]
    Overlap {
        start: i64,
        end: i64,
        existing: String,
        incoming: String,
    },

    /// A flexible chunk's window holds no gap large enough for it.
    #[error("no free space for {chunk}")]
    NoFreeSpace { chunk: String },

    /// A module could not make sense of its input file.
    #[error("{0}")]
    InvalidInput(String),

    /// Missing required CLI option, unregistered module name, and the like.
    #[error("{0}")]
    Config(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Build an `InvalidInput` from anything stringly
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Build a `Config` from anything stringly
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}
