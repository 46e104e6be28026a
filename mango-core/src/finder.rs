//! Query execution over a collection snapshot.
//!
//! [`MangoFinderCore`] holds the stateless search and aggregation steps; every
//! function takes the collection, the engine options and the engine itself.
//! [`FinderCore`] binds those steps to its own [`MangoCache`] and is shared by
//! the sync and async finder facades.

use std::{fmt, sync::Arc};

use bson::{Bson, Document, doc};
use mango_mingo::{Mingo, MingoOptions};
use mango_qs::UrlQuery;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::{
    cache::MangoCache,
    document::Uid,
    engine::QueryEngine,
    error::{MangoError, MangoResult, ResultExt},
    parser::{MangoParser, MangoParserOptions, QueryStringParser},
    query::{Pipeline, SearchParams},
};

const TARGET: &str = "mango::finder";

/// Finder configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MangoFinderOptions {
    /// Initial documents.
    pub collection: Vec<Document>,
    pub mingo: MingoOptions,
    pub parser: MangoParserOptions,
}

impl MangoFinderOptions {
    pub fn with_collection(mut self, collection: Vec<Document>) -> Self {
        self.collection = collection;
        self
    }

    pub fn with_mingo(mut self, mingo: MingoOptions) -> Self {
        self.mingo = mingo;
        self
    }

    pub fn with_id_key(mut self, id_key: impl Into<String>) -> Self {
        self.mingo = self.mingo.with_id_key(id_key);
        self
    }

    pub fn with_parser(mut self, parser: MangoParserOptions) -> Self {
        self.parser = parser;
        self
    }
}

fn uids_context(uids: &[Uid]) -> Bson {
    Bson::Array(uids.iter().map(Bson::from).collect())
}

/// Stateless search and aggregation steps.
pub struct MangoFinderCore;

impl MangoFinderCore {
    /// Runs an aggregation pipeline. A single stage document is treated as a
    /// one-stage pipeline.
    ///
    /// # Errors
    ///
    /// Engine failures become [`BadRequest`](crate::error::ErrorKind::BadRequest)
    /// errors carrying `{ pipeline }`.
    pub fn aggregate(
        pipeline: impl Into<Pipeline>,
        collection: &[Document],
        options: &MingoOptions,
        engine: &dyn QueryEngine,
    ) -> MangoResult<Vec<Document>> {
        let pipeline = pipeline.into();
        trace!(target: TARGET, stages = pipeline.stages().len(), documents = collection.len(), "aggregate");

        engine
            .aggregate(collection, pipeline.stages(), options)
            .context(doc! { "pipeline": pipeline.to_bson() })
    }

    /// Matches `params.criteria`, then sorts, skips and limits, in that order.
    ///
    /// A non-empty `$project` is applied to the whole collection before
    /// matching. Matching still sees the unprojected documents, so criteria
    /// may name fields the projection removes.
    ///
    /// # Errors
    ///
    /// Errors carry `{ params }`. Engine failures are wrapped as
    /// [`BadRequest`](crate::error::ErrorKind::BadRequest); errors that are
    /// already typed keep their kind.
    pub fn find(
        params: &SearchParams,
        collection: &[Document],
        options: &MingoOptions,
        engine: &dyn QueryEngine,
    ) -> MangoResult<Vec<Document>> {
        Self::run_find(params, collection, options, engine)
            .context(doc! { "params": params.to_document() })
    }

    fn run_find(
        params: &SearchParams,
        collection: &[Document],
        options: &MingoOptions,
        engine: &dyn QueryEngine,
    ) -> MangoResult<Vec<Document>> {
        let views = match &params.options.project {
            Some(project) if !project.is_empty() => Some(Self::aggregate(
                doc! { "$project": project.clone() },
                collection,
                options,
                engine,
            )?),
            _ => None,
        };

        trace!(target: TARGET, criteria = %params.criteria, documents = collection.len(), "find");
        let mut cursor = engine.find(collection, &params.criteria, &Document::new(), options)?;

        if let Some(views) = views {
            cursor = cursor.with_views(views)?;
        }
        if let Some(sort) = params.options.sort.as_ref().filter(|sort| !sort.is_empty()) {
            cursor = cursor.sort(sort)?;
        }
        if let Some(skip) = params.options.skip {
            cursor = cursor.skip(usize::try_from(skip).unwrap_or(usize::MAX));
        }
        if let Some(limit) = params.options.limit.filter(|limit| *limit > 0) {
            cursor = cursor.limit(usize::try_from(limit).unwrap_or(usize::MAX));
        }

        Ok(cursor.all())
    }

    /// Runs [`find`](Self::find) and keeps the rows whose identity is in `uids`.
    pub fn find_by_ids(
        uids: &[Uid],
        params: &SearchParams,
        collection: &[Document],
        options: &MingoOptions,
        engine: &dyn QueryEngine,
    ) -> MangoResult<Vec<Document>> {
        let context = doc! { "uids": uids_context(uids), "params": params.to_document() };
        let id_key = options.id_key();

        let found = Self::find(params, collection, options, engine).context(context.clone())?;

        found
            .into_iter()
            .filter_map(|document| match Uid::of(&document, id_key) {
                Ok(Some(uid)) if uids.contains(&uid) => Some(Ok(document)),
                Ok(_) => None,
                Err(err) => Some(Err(err)),
            })
            .collect::<MangoResult<Vec<_>>>()
            .context(context)
    }

    /// Finds the document whose identity is `uid`.
    ///
    /// The identity of the returned row is checked again, so an engine that
    /// ignores the forced criterion cannot return the wrong document.
    pub fn find_one(
        uid: &Uid,
        params: &SearchParams,
        collection: &[Document],
        options: &MingoOptions,
        engine: &dyn QueryEngine,
    ) -> MangoResult<Option<Document>> {
        let id_key = options.id_key();
        let params = params.clone().with_uid(id_key, uid);

        let first = Self::find(&params, collection, options, engine)?
            .into_iter()
            .next();

        match first {
            Some(document) if Uid::of(&document, id_key)?.as_ref() == Some(uid) => Ok(Some(document)),
            _ => Ok(None),
        }
    }

    /// Like [`find_one`](Self::find_one), but a missing document is an error.
    ///
    /// # Errors
    ///
    /// Returns [`NotFound`](crate::error::ErrorKind::NotFound) with
    /// `{ errors: { [id_key]: uid }, params }` when nothing matches.
    pub fn find_one_or_fail(
        uid: &Uid,
        params: &SearchParams,
        collection: &[Document],
        options: &MingoOptions,
        engine: &dyn QueryEngine,
    ) -> MangoResult<Document> {
        Self::find_one(uid, params, collection, options, engine)?
            .ok_or_else(|| Self::not_found(uid, params, options))
    }

    pub(crate) fn not_found(uid: &Uid, params: &SearchParams, options: &MingoOptions) -> MangoError {
        let id_key = options.id_key();

        MangoError::not_found(format!("Document with {id_key} {uid} does not exist"))
            .with_data(doc! {
                "errors": { id_key: Bson::from(uid) },
                "params": params.to_document(),
            })
    }
}

/// Finder state shared by [`MangoFinder`](crate::facade::MangoFinder) and
/// [`MangoFinderAsync`](crate::facade::MangoFinderAsync).
#[derive(Clone)]
pub struct FinderCore {
    cache: MangoCache,
    options: MingoOptions,
    engine: Arc<dyn QueryEngine>,
    parser: MangoParser,
}

impl fmt::Debug for FinderCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FinderCore")
            .field("documents", &self.cache.len())
            .field("options", &self.options)
            .field("parser", &self.parser)
            .finish_non_exhaustive()
    }
}

impl FinderCore {
    pub fn new(options: MangoFinderOptions) -> Self {
        Self {
            cache: MangoCache::new(options.collection),
            options: options.mingo,
            engine: Arc::new(Mingo::new()),
            parser: MangoParser::new(options.parser),
        }
    }

    pub fn with_engine(mut self, engine: Arc<dyn QueryEngine>) -> Self {
        self.engine = engine;
        self
    }

    pub fn with_parser(mut self, parser: Arc<dyn QueryStringParser>) -> Self {
        self.parser = self.parser.with_parser(parser);
        self
    }

    pub fn cache(&self) -> &MangoCache {
        &self.cache
    }

    pub fn options(&self) -> &MingoOptions {
        &self.options
    }

    pub fn parser(&self) -> &MangoParser {
        &self.parser
    }

    pub fn engine(&self) -> &dyn QueryEngine {
        self.engine.as_ref()
    }

    /// Name of the identity field.
    pub fn uid(&self) -> &str {
        self.options.id_key()
    }

    fn skip_empty(&self, operation: &str) -> bool {
        let empty = self.cache.is_empty();
        if empty {
            debug!(target: TARGET, operation, "empty collection, skipping engine");
        }
        empty
    }

    pub fn aggregate(&self, pipeline: impl Into<Pipeline>) -> MangoResult<Vec<Document>> {
        if self.skip_empty("aggregate") {
            return Ok(Vec::new());
        }

        MangoFinderCore::aggregate(pipeline, self.cache.collection(), &self.options, self.engine())
    }

    pub fn find(&self, params: impl Into<SearchParams>) -> MangoResult<Vec<Document>> {
        if self.skip_empty("find") {
            return Ok(Vec::new());
        }

        MangoFinderCore::find(&params.into(), self.cache.collection(), &self.options, self.engine())
    }

    pub fn find_by_ids(&self, uids: &[Uid], params: impl Into<SearchParams>) -> MangoResult<Vec<Document>> {
        if self.skip_empty("find_by_ids") {
            return Ok(Vec::new());
        }

        MangoFinderCore::find_by_ids(uids, &params.into(), self.cache.collection(), &self.options, self.engine())
    }

    pub fn find_one(&self, uid: &Uid, params: impl Into<SearchParams>) -> MangoResult<Option<Document>> {
        if self.skip_empty("find_one") {
            return Ok(None);
        }

        MangoFinderCore::find_one(uid, &params.into(), self.cache.collection(), &self.options, self.engine())
    }

    pub fn find_one_or_fail(&self, uid: &Uid, params: impl Into<SearchParams>) -> MangoResult<Document> {
        let params = params.into();

        if self.skip_empty("find_one_or_fail") {
            return Err(MangoFinderCore::not_found(uid, &params, &self.options));
        }

        MangoFinderCore::find_one_or_fail(uid, &params, self.cache.collection(), &self.options, self.engine())
    }

    pub fn query(&self, query: impl Into<UrlQuery>) -> MangoResult<Vec<Document>> {
        self.find(self.parser.params(query)?)
    }

    pub fn query_by_ids(&self, uids: &[Uid], query: impl Into<UrlQuery>) -> MangoResult<Vec<Document>> {
        self.find_by_ids(uids, self.parser.params(query)?)
    }

    pub fn query_one(&self, uid: &Uid, query: impl Into<UrlQuery>) -> MangoResult<Option<Document>> {
        self.find_one(uid, self.parser.params(query)?)
    }

    pub fn query_one_or_fail(&self, uid: &Uid, query: impl Into<UrlQuery>) -> MangoResult<Document> {
        self.find_one_or_fail(uid, self.parser.params(query)?)
    }

    /// Replaces the collection and returns the new cache.
    pub fn set_cache(&mut self, documents: impl IntoIterator<Item = Document>) -> MangoCache {
        self.publish(MangoCache::new(documents))
    }

    pub(crate) fn publish(&mut self, cache: MangoCache) -> MangoCache {
        debug!(target: TARGET, documents = cache.len(), "publishing cache");
        self.cache = cache;
        self.cache.clone()
    }
}
