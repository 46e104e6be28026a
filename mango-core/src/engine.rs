//! The query engine seam.
//!
//! The finder never interprets criteria or stages itself; it hands them to a
//! [`QueryEngine`]. [`Mingo`] is the default implementation.

use bson::Document;
use mango_mingo::{Cursor, Mingo, MingoError, MingoOptions};

/// Executes criteria and aggregation pipelines over a collection.
///
/// Implementations must reject malformed criteria and stages with an error
/// rather than ignoring them.
pub trait QueryEngine: Send + Sync {
    /// Runs `pipeline` over `collection`.
    fn aggregate(
        &self,
        collection: &[Document],
        pipeline: &[Document],
        options: &MingoOptions,
    ) -> Result<Vec<Document>, MingoError>;

    /// Matches `criteria` against `collection`, returning a cursor that can
    /// still be sorted and paginated.
    fn find<'a>(
        &self,
        collection: &'a [Document],
        criteria: &Document,
        projection: &Document,
        options: &MingoOptions,
    ) -> Result<Cursor<'a>, MingoError>;
}

impl QueryEngine for Mingo {
    fn aggregate(
        &self,
        collection: &[Document],
        pipeline: &[Document],
        options: &MingoOptions,
    ) -> Result<Vec<Document>, MingoError> {
        Mingo::aggregate(self, collection, pipeline, options)
    }

    fn find<'a>(
        &self,
        collection: &'a [Document],
        criteria: &Document,
        projection: &Document,
        options: &MingoOptions,
    ) -> Result<Cursor<'a>, MingoError> {
        Mingo::find(self, collection, criteria, projection, options)
    }
}
