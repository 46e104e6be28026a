//! Error types for query, projection, and pipeline evaluation.
//!
//! Every fallible engine operation returns a [`MingoResult<T>`].

use thiserror::Error;

/// Errors raised while parsing or evaluating queries and pipelines.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MingoError {
    /// The query criteria document is malformed.
    #[error("Invalid query: {0}")]
    InvalidQuery(String),
    /// A `$`-prefixed query operator is not supported.
    #[error("Unknown query operator: {0}")]
    UnknownQueryOperator(String),
    /// A pipeline stage is malformed (wrong shape or bad argument).
    #[error("Invalid pipeline stage: {0}")]
    InvalidStage(String),
    /// A pipeline stage name is not registered.
    #[error("Unknown pipeline stage: {0}")]
    UnknownStage(String),
    /// An aggregation expression operator or accumulator is not registered.
    #[error("Unknown expression operator: {0}")]
    UnknownOperator(String),
    /// An aggregation expression could not be evaluated.
    #[error("Invalid expression: {0}")]
    InvalidExpression(String),
    /// A projection document is malformed.
    #[error("Invalid projection: {0}")]
    InvalidProjection(String),
    /// A sort specification is malformed.
    #[error("Invalid sort: {0}")]
    InvalidSort(String),
}

/// A specialized `Result` type for engine operations.
pub type MingoResult<T> = Result<T, MingoError>;

impl From<regex::Error> for MingoError {
    fn from(err: regex::Error) -> Self {
        MingoError::InvalidQuery(err.to_string())
    }
}
