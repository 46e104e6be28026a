//! Error types and result types for finder and repository operations.
//!
//! Every failure surfaced by the core is a [`MangoError`]: an [`ErrorKind`],
//! a human-readable message and a BSON document of structured context. Errors
//! coming from the engine or the URL query translator are wrapped exactly once
//! at the boundary; afterwards, callers add context with
//! [`MangoError::merge_data`] instead of nesting new errors.

use std::fmt;

use bson::{Bson, Document, error::Error as BsonError};
use mango_mingo::MingoError;
use mango_qs::QsError;
use serde::{Deserialize, Serialize};
use serde_json::Error as SerdeJsonError;
use thiserror::Error;

use crate::document::deep_merge;

/// The category of a [`MangoError`], mirroring HTTP status semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// Malformed query, criteria or pipeline, translator failure, or validation failure.
    BadRequest,
    /// A required entity is missing.
    NotFound,
    /// An identity collision on create.
    Conflict,
    /// An identity of the wrong type.
    Unprocessable,
    /// Unexpected engine or validator failure, or cache corruption.
    Internal,
}

impl ErrorKind {
    /// HTTP status code for this kind.
    pub fn code(&self) -> u16 {
        match self {
            ErrorKind::BadRequest => 400,
            ErrorKind::NotFound => 404,
            ErrorKind::Conflict => 409,
            ErrorKind::Unprocessable => 422,
            ErrorKind::Internal => 500,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::BadRequest => "BAD_REQUEST",
            ErrorKind::NotFound => "NOT_FOUND",
            ErrorKind::Conflict => "CONFLICT",
            ErrorKind::Unprocessable => "UNPROCESSABLE",
            ErrorKind::Internal => "INTERNAL",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A typed failure with structured context.
///
/// # Example
///
/// ```ignore
/// use bson::doc;
/// use mango_core::error::{ErrorKind, MangoError};
///
/// let err = MangoError::not_found("Document with vin \"bad-vin\" does not exist")
///     .with_data(doc! { "errors": { "vin": "bad-vin" } })
///     .merge_data(doc! { "params": {} });
///
/// assert_eq!(err.kind(), ErrorKind::NotFound);
/// assert_eq!(err.code(), 404);
/// ```
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[error("{message}")]
pub struct MangoError {
    kind: ErrorKind,
    message: String,
    data: Document,
}

/// A specialized `Result` type for finder and repository operations.
pub type MangoResult<T> = Result<T, MangoError>;

impl MangoError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            data: Document::new(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::BadRequest, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Conflict, message)
    }

    pub fn unprocessable(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unprocessable, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    /// Replaces the structured context.
    pub fn with_data(mut self, data: Document) -> Self {
        self.data = data;
        self
    }

    /// Deep-merges `data` into the existing context. Nested documents are
    /// merged key by key, any other value is replaced.
    pub fn merge_data(mut self, data: Document) -> Self {
        deep_merge(&mut self.data, data);
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn code(&self) -> u16 {
        self.kind.code()
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn data(&self) -> &Document {
        &self.data
    }

    /// The `errors` entry of the context, when present.
    pub fn errors(&self) -> Option<&Bson> {
        self.data.get("errors")
    }
}

impl From<MingoError> for MangoError {
    fn from(err: MingoError) -> Self {
        MangoError::bad_request(err.to_string())
    }
}

impl From<QsError> for MangoError {
    fn from(err: QsError) -> Self {
        MangoError::bad_request(err.to_string())
    }
}

impl From<BsonError> for MangoError {
    fn from(err: BsonError) -> Self {
        MangoError::internal(err.to_string())
    }
}

impl From<SerdeJsonError> for MangoError {
    fn from(err: SerdeJsonError) -> Self {
        MangoError::internal(err.to_string())
    }
}

/// Attaches context to fallible results, wrapping foreign errors once.
pub trait ResultExt<T> {
    /// Converts the error into a [`MangoError`] and merges `data` into its context.
    fn context(self, data: Document) -> MangoResult<T>;
}

impl<T, E: Into<MangoError>> ResultExt<T> for Result<T, E> {
    fn context(self, data: Document) -> MangoResult<T> {
        self.map_err(|err| err.into().merge_data(data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[test]
    fn kinds_map_to_status_codes() {
        assert_eq!(MangoError::bad_request("x").code(), 400);
        assert_eq!(MangoError::not_found("x").code(), 404);
        assert_eq!(MangoError::conflict("x").code(), 409);
        assert_eq!(MangoError::unprocessable("x").code(), 422);
        assert_eq!(MangoError::internal("x").code(), 500);
        assert_eq!(ErrorKind::NotFound.to_string(), "NOT_FOUND");
    }

    #[test]
    fn merge_data_deep_merges_instead_of_nesting() {
        let err = MangoError::not_found("missing")
            .with_data(doc! { "errors": { "vin": "a" } })
            .merge_data(doc! { "errors": { "other": 1 }, "params": { "make": "Scion" } });

        assert_eq!(
            err.data(),
            &doc! { "errors": { "vin": "a", "other": 1 }, "params": { "make": "Scion" } },
        );
        assert_eq!(err.errors(), Some(&Bson::Document(doc! { "vin": "a", "other": 1 })));
    }

    #[test]
    fn context_wraps_foreign_errors_once_and_keeps_typed_ones() {
        let wrapped: MangoResult<()> = Err(MingoError::UnknownStage("$nope".into())).context(doc! { "pipeline": [] });
        let err = wrapped.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadRequest);
        assert_eq!(err.data(), &doc! { "pipeline": [] });

        let typed: MangoResult<()> = Err(err).context(doc! { "params": {} });
        let err = typed.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadRequest);
        assert_eq!(err.data(), &doc! { "pipeline": [], "params": {} });
    }
}
