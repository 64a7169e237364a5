//! Status decode errors

use thiserror::Error;

/// Why a status line could not be decoded
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StatusDecodeError {
    /// Nothing but whitespace
    #[error("Empty status line")]
    Empty,

    /// Wrong number of comma-separated fields
    #[error("Expected {expected} fields, got {actual}")]
    FieldCount {
        /// Fields in a complete record
        expected: usize,
        /// Fields found on the line
        actual: usize,
    },

    /// A numeric field failed to parse
    #[error("Field '{field}' is not a valid number: '{value}'")]
    InvalidNumber {
        /// Name of the offending field
        field: &'static str,
        /// Raw field text
        value: String,
    },

    /// Run state code outside the known set
    #[error("Unknown run state code: '{0}'")]
    UnknownRunState(String),
}
