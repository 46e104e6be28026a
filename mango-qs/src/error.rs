//! Error types for URL query translation.

use thiserror::Error;

/// Errors raised while translating a URL query into criteria and options.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum QsError {
    /// The query string could not be split or decoded.
    #[error("Malformed query string: {0}")]
    Malformed(String),
    /// `limit` is not a non-negative integer.
    #[error("Invalid limit: {0}")]
    InvalidLimit(String),
    /// `offset` is not a non-negative integer.
    #[error("Invalid offset: {0}")]
    InvalidOffset(String),
    /// `sort`, `fields` or `omit` named an empty field.
    #[error("Invalid field list for {0}: {1}")]
    InvalidFieldList(String, String),
    /// A `q` full-text search was requested but no full-text fields are configured.
    #[error("Full-text search requires at least one full-text field")]
    MissingFullTextFields,
    /// A `/pattern/flags` value does not compile.
    #[error("Invalid regular expression {0}: {1}")]
    InvalidRegex(String, String),
    /// A configured date field holds a value that is not a date.
    #[error("Invalid date for {0}: {1}")]
    InvalidDate(String, String),
    /// A configured object id field holds a value that is not an object id.
    #[error("Invalid object id for {0}: {1}")]
    InvalidObjectId(String, String),
    /// A query object holds a value that cannot be used as criteria.
    #[error("Unsupported value for {0}")]
    UnsupportedValue(String),
}

/// A specialized `Result` type for query translation.
pub type QsResult<T> = Result<T, QsError>;
