//! Error types for core model operations

use thiserror::Error;

/// Result type alias for core model operations
pub type CoreResult<T> = std::result::Result<T, CoreError>;

/// Errors raised while interpreting model values
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// The method name does not match any request bucket
    #[error("Invalid method: {0}")]
    InvalidMethod(String),
}
