//! Lazily ordered result sets returned by [`Mingo::find`](crate::Mingo::find).
//!
//! A [`Cursor`] borrows the collection it was built from and only clones
//! documents when results are taken. Sort, skip, and limit are always applied
//! in that order regardless of the order they were configured in.

use std::cmp::Ordering;
use bson::{Bson, Document};

use crate::{
    error::{MingoError, MingoResult},
    path,
    value::{as_i64, compare},
};

/// A parsed sort specification: `(field path, ascending)` pairs in priority order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SortSpec(Vec<(String, bool)>);

impl SortSpec {
    /// Parses `{ field: 1 | -1, ... }`.
    ///
    /// # Errors
    ///
    /// Returns [`MingoError::InvalidSort`] when a direction is not `1` or `-1`.
    pub fn parse(spec: &Document) -> MingoResult<Self> {
        spec.iter()
            .map(|(field, direction)| match as_i64(direction) {
                Some(1) => Ok((field.clone(), true)),
                Some(-1) => Ok((field.clone(), false)),
                _ => Err(MingoError::InvalidSort(format!("{field}: direction must be 1 or -1, got {direction}"))),
            })
            .collect::<MingoResult<Vec<_>>>()
            .map(SortSpec)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Orders two documents by this spec. Missing fields sort as null.
    pub fn compare(&self, left: &Document, right: &Document) -> Ordering {
        for (field, ascending) in &self.0 {
            let left_value = path::get_value(left, field).unwrap_or(Bson::Null);
            let right_value = path::get_value(right, field).unwrap_or(Bson::Null);

            let ordering = if *ascending {
                compare(&left_value, &right_value)
            } else {
                compare(&right_value, &left_value)
            };

            if ordering != Ordering::Equal {
                return ordering;
            }
        }

        Ordering::Equal
    }

    /// Stable in-place sort.
    pub fn sort(&self, documents: &mut [Document]) {
        if !self.is_empty() {
            documents.sort_by(|a, b| self.compare(a, b));
        }
    }
}

/// Result set of a query over a borrowed collection.
#[derive(Debug, Clone)]
pub struct Cursor<'a> {
    source: &'a [Document],
    matched: Vec<usize>,
    views: Option<Vec<Document>>,
    sort: SortSpec,
    skip: usize,
    limit: Option<usize>,
}

impl<'a> Cursor<'a> {
    /// A cursor over the documents of `source` at the `matched` positions,
    /// in the given order. Positions past the end of `source` are dropped.
    pub fn from_matches(source: &'a [Document], mut matched: Vec<usize>) -> Self {
        matched.retain(|index| *index < source.len());

        Self {
            source,
            matched,
            views: None,
            sort: SortSpec::default(),
            skip: 0,
            limit: None,
        }
    }

    /// Orders results by `spec`.
    ///
    /// # Errors
    ///
    /// Returns [`MingoError::InvalidSort`] for malformed specs.
    pub fn sort(mut self, spec: &Document) -> MingoResult<Self> {
        self.sort = SortSpec::parse(spec)?;
        Ok(self)
    }

    pub fn skip(mut self, skip: usize) -> Self {
        self.skip = skip;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Substitutes the returned shape of each document.
    ///
    /// `views` holds one document per source document, position for position.
    /// Matching and sorting keep using the source documents, only the emitted
    /// documents change.
    ///
    /// # Errors
    ///
    /// Returns [`MingoError::InvalidProjection`] when the view count differs
    /// from the collection size.
    pub fn with_views(mut self, views: Vec<Document>) -> MingoResult<Self> {
        if views.len() != self.source.len() {
            return Err(MingoError::InvalidProjection(format!(
                "expected {} projected documents, got {}",
                self.source.len(),
                views.len(),
            )));
        }

        self.views = Some(views);
        Ok(self)
    }

    fn selected(&self) -> Vec<usize> {
        let mut indices = self.matched.clone();

        if !self.sort.is_empty() {
            indices.sort_by(|a, b| self.sort.compare(&self.source[*a], &self.source[*b]));
        }

        indices
            .into_iter()
            .skip(self.skip)
            .take(self.limit.unwrap_or(usize::MAX))
            .collect()
    }

    /// Number of documents the cursor yields.
    pub fn count(&self) -> usize {
        self.matched
            .len()
            .saturating_sub(self.skip)
            .min(self.limit.unwrap_or(usize::MAX))
    }

    /// Takes every result.
    pub fn all(self) -> Vec<Document> {
        self.into_iter().collect()
    }

    /// Takes the first result, if any.
    pub fn first(self) -> Option<Document> {
        self.limit(1).into_iter().next()
    }
}

impl IntoIterator for Cursor<'_> {
    type Item = Document;
    type IntoIter = std::vec::IntoIter<Document>;

    fn into_iter(self) -> Self::IntoIter {
        let selected = self.selected();
        let rows = match &self.views {
            Some(views) => views.as_slice(),
            None => self.source,
        };

        selected
            .into_iter()
            .map(|index| rows[index].clone())
            .collect::<Vec<_>>()
            .into_iter()
    }
}
