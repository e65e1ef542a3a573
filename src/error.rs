//! # Error Types
//!
//! This module defines the error types of the optimizer. Only fatal conditions
//! travel through [`MadsError`]: an invalid configuration, a starting point that
//! cannot be used, or a direction that cannot be projected on the mesh. Local
//! failures (a search method that cannot build a model, a blackbox call that
//! crashes) are absorbed into stop reasons and evaluation statuses instead.
//!
//! ## Examples
//!
//! Using the `Result` type:
//!
//! ```rust
//! use mads::error::{MadsError, Result};
//!
//! fn check_dimension(n: usize) -> Result<()> {
//!     if n == 0 {
//!         return Err(MadsError::Configuration("dimension cannot be zero".to_string()));
//!     }
//!     Ok(())
//! }
//!
//! assert!(check_dimension(0).is_err());
//! ```
//!
//! Using the `OptionExt` trait to convert `Option` to `Result`:
//!
//! ```rust
//! use mads::error::{MadsError, OptionExt};
//!
//! fn first_start(points: &[f64]) -> mads::error::Result<f64> {
//!     points.first().copied().ok_or_else_mads(||
//!         MadsError::Initialization("no starting point".to_string())
//!     )
//! }
//! ```

use std::error::Error as StdError;
use std::fmt;
use thiserror::Error;

/// Represents the fatal errors that can abort an optimization run.
#[derive(Error, Debug)]
pub enum MadsError {
    /// Error that occurs when an invalid configuration is provided.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Error that occurs when the run cannot be initialized from its starting points.
    #[error("Initialization error: {0}")]
    Initialization(String),

    /// Error that occurs when two objects of different dimensions are combined.
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    Dimension { expected: usize, actual: usize },

    /// Error that occurs when trial points cannot be generated.
    #[error("Generation error: {0}")]
    Generation(String),

    /// Error that occurs when the evaluation pipeline itself breaks down.
    #[error("Evaluation error: {0}")]
    Evaluation(String),

    /// Error that occurs when NaN or infinity values are encountered.
    #[error("Invalid numeric value: {0}")]
    InvalidNumericValue(String),

    /// A generic error with a custom message.
    #[error("{0}")]
    Other(String),
}

/// A specialized Result type for optimizer operations.
pub type Result<T> = std::result::Result<T, MadsError>;

/// Extension trait for Result to add context to errors.
///
/// ## Examples
///
/// ```rust
/// use mads::error::ResultExt;
///
/// fn parse_seed(raw: &str) -> mads::error::Result<u64> {
///     raw.parse::<u64>().context("Failed to parse seed")
/// }
///
/// assert!(parse_seed("abc").is_err());
/// ```
pub trait ResultExt<T, E> {
    /// Adds context to an error.
    ///
    /// ## Arguments
    ///
    /// * `context` - A string providing context for the error.
    ///
    /// ## Returns
    ///
    /// A `Result<T, MadsError>` with the original value or a contextualized error.
    fn context<C>(self, context: C) -> Result<T>
    where
        C: fmt::Display + Send + Sync + 'static;
}

impl<T, E> ResultExt<T, E> for std::result::Result<T, E>
where
    E: StdError + Send + Sync + 'static,
{
    fn context<C>(self, context: C) -> Result<T>
    where
        C: fmt::Display + Send + Sync + 'static,
    {
        self.map_err(|e| MadsError::Other(format!("{}: {}", context, e)))
    }
}

/// Extension trait for Option to convert to Result with a custom error.
pub trait OptionExt<T> {
    /// Converts an Option to a Result, building the error lazily.
    fn ok_or_else_mads<F>(self, err_fn: F) -> Result<T>
    where
        F: FnOnce() -> MadsError;
}

impl<T> OptionExt<T> for Option<T> {
    fn ok_or_else_mads<F>(self, err_fn: F) -> Result<T>
    where
        F: FnOnce() -> MadsError,
    {
        self.ok_or_else(err_fn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_wraps_source_message() {
        let res: std::result::Result<u8, std::num::ParseIntError> = "x".parse::<u8>();
        let err = res.context("reading block size").unwrap_err();
        assert!(err.to_string().starts_with("reading block size: "));
    }

    #[test]
    fn test_dimension_message() {
        let err = MadsError::Dimension {
            expected: 3,
            actual: 2,
        };
        assert_eq!(err.to_string(), "Dimension mismatch: expected 3, got 2");
    }

    #[test]
    fn test_option_ext() {
        let none: Option<u8> = None;
        let err = none
            .ok_or_else_mads(|| MadsError::Other("missing".to_string()))
            .unwrap_err();
        assert_eq!(err.to_string(), "missing");
        assert_eq!(Some(4).ok_or_else_mads(|| MadsError::Other(String::new())).unwrap(), 4);
    }
}
