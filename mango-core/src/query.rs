//! Search parameters, pipelines and identity lists.
//!
//! [`SearchParams`] splits a search into match criteria and the options the
//! finder applies around the match: a projection (`$project`), `sort`, `skip`
//! and `limit`.
//!
//! # Example
//!
//! ```ignore
//! use bson::doc;
//! use mango_core::query::SearchParams;
//!
//! let params = SearchParams::new(doc! { "make": "Scion" })
//!     .with_sort(doc! { "model_year": 1 })
//!     .with_skip(1)
//!     .with_limit(2);
//!
//! // Equivalent plain form, with options under the `options` key.
//! let same = SearchParams::from(doc! {
//!     "make": "Scion",
//!     "options": { "sort": { "model_year": 1 }, "skip": 1, "limit": 2 },
//! });
//! assert_eq!(params, same);
//! ```

use bson::{Bson, Document};
use serde::{Deserialize, Serialize};

use crate::document::Uid;

const OPTIONS_KEY: &str = "options";

/// Options applied by the finder around criteria matching.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryCriteriaOptions {
    /// Projection applied to the collection before matching.
    #[serde(rename = "$project", skip_serializing_if = "Option::is_none")]
    pub project: Option<Document>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sort: Option<Document>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,
}

fn count(value: Option<&Bson>) -> Option<u64> {
    value
        .and_then(mango_mingo::value::as_i64)
        .and_then(|count| u64::try_from(count).ok())
}

impl QueryCriteriaOptions {
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    /// Reads options from a plain document. Non-document projections and
    /// sorts, and counts that are not non-negative integers, are ignored.
    pub fn from_document(options: &Document) -> Self {
        Self {
            project: options.get_document("$project").ok().cloned(),
            sort: options.get_document("sort").ok().cloned(),
            skip: count(options.get("skip")),
            limit: count(options.get("limit")),
        }
    }

    pub fn to_document(&self) -> Document {
        let mut options = Document::new();

        if let Some(project) = &self.project {
            options.insert("$project", project.clone());
        }
        if let Some(sort) = &self.sort {
            options.insert("sort", sort.clone());
        }
        if let Some(skip) = self.skip {
            options.insert("skip", mango_mingo::value::int_to_bson(saturating_count(skip)));
        }
        if let Some(limit) = self.limit {
            options.insert("limit", mango_mingo::value::int_to_bson(saturating_count(limit)));
        }

        options
    }
}

fn saturating_count(count: u64) -> i64 {
    i64::try_from(count).unwrap_or(i64::MAX)
}

/// Criteria plus finder options.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchParams {
    pub criteria: Document,
    pub options: QueryCriteriaOptions,
}

impl SearchParams {
    pub fn new(criteria: Document) -> Self {
        Self {
            criteria,
            options: QueryCriteriaOptions::default(),
        }
    }

    pub fn with_options(mut self, options: QueryCriteriaOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_project(mut self, project: Document) -> Self {
        self.options.project = Some(project);
        self
    }

    pub fn with_sort(mut self, sort: Document) -> Self {
        self.options.sort = Some(sort);
        self
    }

    pub fn with_skip(mut self, skip: u64) -> Self {
        self.options.skip = Some(skip);
        self
    }

    pub fn with_limit(mut self, limit: u64) -> Self {
        self.options.limit = Some(limit);
        self
    }

    /// Forces `criteria[id_key] = uid`.
    pub fn with_uid(mut self, id_key: &str, uid: &Uid) -> Self {
        self.criteria.insert(id_key, Bson::from(uid));
        self
    }

    /// The plain form: criteria with the options under `options` when any are set.
    pub fn to_document(&self) -> Document {
        let mut document = self.criteria.clone();

        if !self.options.is_empty() {
            document.insert(OPTIONS_KEY, self.options.to_document());
        }

        document
    }
}

impl From<Document> for SearchParams {
    fn from(mut document: Document) -> Self {
        let options = match document.remove(OPTIONS_KEY) {
            Some(Bson::Document(options)) => QueryCriteriaOptions::from_document(&options),
            _ => QueryCriteriaOptions::default(),
        };

        Self { criteria: document, options }
    }
}

impl From<&SearchParams> for SearchParams {
    fn from(params: &SearchParams) -> Self {
        params.clone()
    }
}

/// An aggregation pipeline. A single stage converts into a one-stage pipeline.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Pipeline(Vec<Document>);

impl Pipeline {
    pub fn stages(&self) -> &[Document] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn to_bson(&self) -> Bson {
        Bson::Array(self.0.iter().cloned().map(Bson::Document).collect())
    }
}

impl From<Document> for Pipeline {
    fn from(stage: Document) -> Self {
        Pipeline(vec![stage])
    }
}

impl From<Vec<Document>> for Pipeline {
    fn from(stages: Vec<Document>) -> Self {
        Pipeline(stages)
    }
}

impl From<&[Document]> for Pipeline {
    fn from(stages: &[Document]) -> Self {
        Pipeline(stages.to_vec())
    }
}

impl<const N: usize> From<[Document; N]> for Pipeline {
    fn from(stages: [Document; N]) -> Self {
        Pipeline(stages.into())
    }
}

/// A single value or a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany<T> {
    One(T),
    Many(Vec<T>),
}

impl<T> OneOrMany<T> {
    pub fn into_vec(self) -> Vec<T> {
        match self {
            OneOrMany::One(value) => vec![value],
            OneOrMany::Many(values) => values,
        }
    }
}

impl<T> From<Vec<T>> for OneOrMany<T> {
    fn from(values: Vec<T>) -> Self {
        OneOrMany::Many(values)
    }
}

impl From<Uid> for OneOrMany<Uid> {
    fn from(uid: Uid) -> Self {
        OneOrMany::One(uid)
    }
}

impl From<&Uid> for OneOrMany<Uid> {
    fn from(uid: &Uid) -> Self {
        OneOrMany::One(uid.clone())
    }
}

impl From<&str> for OneOrMany<Uid> {
    fn from(uid: &str) -> Self {
        OneOrMany::One(Uid::from(uid))
    }
}

impl From<String> for OneOrMany<Uid> {
    fn from(uid: String) -> Self {
        OneOrMany::One(Uid::from(uid))
    }
}

impl From<i64> for OneOrMany<Uid> {
    fn from(uid: i64) -> Self {
        OneOrMany::One(Uid::from(uid))
    }
}

impl From<Vec<&str>> for OneOrMany<Uid> {
    fn from(uids: Vec<&str>) -> Self {
        OneOrMany::Many(uids.into_iter().map(Uid::from).collect())
    }
}

impl From<Document> for OneOrMany<Document> {
    fn from(document: Document) -> Self {
        OneOrMany::One(document)
    }
}
