//! Error types for pool and store operations

/// Errors from account-store operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("malformed account line: expected 5 fields, found {0}")]
    MalformedLine(usize),

    #[error("account store io error: {0}")]
    Io(String),
}

/// Result alias for pool operations.
pub type Result<T> = std::result::Result<T, Error>;
