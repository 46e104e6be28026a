//! Synchronous and asynchronous entry points.
//!
//! Each facade wraps a shared core ([`FinderCore`] or [`RepoCore`]); the
//! async variants run the same synchronous steps and only await the
//! validator.
//!
//! # Example
//!
//! ```ignore
//! use bson::doc;
//! use mango::prelude::*;
//!
//! let mut cars = MangoRepository::new(
//!     MangoRepoOptions::default()
//!         .with_id_key("vin")
//!         .with_collection(vec![doc! { "vin": "JTKDE177", "make": "Scion" }]),
//! )?;
//!
//! cars.patch(&Uid::from("JTKDE177"), &doc! { "model": "tC" }, &[])?;
//! let scions = cars.query("make=Scion&fields=model")?;
//! ```

use std::sync::Arc;

use bson::Document;
use mango_qs::UrlQuery;

use crate::{
    cache::{MangoCache, RepoCache},
    document::{Entity, Uid},
    engine::QueryEngine,
    error::MangoResult,
    finder::{FinderCore, MangoFinderOptions},
    parser::QueryStringParser,
    query::{OneOrMany, Pipeline, SearchParams},
    repository::{IdentityGenerator, MangoRepoOptions, RepoCore},
    validator::MangoValidator,
};

macro_rules! finder_reads {
    ($($qualifier:tt)?) => {
        pub $($qualifier)? fn aggregate(&self, pipeline: impl Into<Pipeline>) -> MangoResult<Vec<Document>> {
            self.core.aggregate(pipeline)
        }

        pub $($qualifier)? fn find(&self, params: impl Into<SearchParams>) -> MangoResult<Vec<Document>> {
            self.core.find(params)
        }

        pub $($qualifier)? fn find_by_ids(&self, uids: &[Uid], params: impl Into<SearchParams>) -> MangoResult<Vec<Document>> {
            self.core.find_by_ids(uids, params)
        }

        pub $($qualifier)? fn find_one(&self, uid: &Uid, params: impl Into<SearchParams>) -> MangoResult<Option<Document>> {
            self.core.find_one(uid, params)
        }

        pub $($qualifier)? fn find_one_or_fail(&self, uid: &Uid, params: impl Into<SearchParams>) -> MangoResult<Document> {
            self.core.find_one_or_fail(uid, params)
        }

        pub $($qualifier)? fn query(&self, query: impl Into<UrlQuery>) -> MangoResult<Vec<Document>> {
            self.core.query(query)
        }

        pub $($qualifier)? fn query_by_ids(&self, uids: &[Uid], query: impl Into<UrlQuery>) -> MangoResult<Vec<Document>> {
            self.core.query_by_ids(uids, query)
        }

        pub $($qualifier)? fn query_one(&self, uid: &Uid, query: impl Into<UrlQuery>) -> MangoResult<Option<Document>> {
            self.core.query_one(uid, query)
        }

        pub $($qualifier)? fn query_one_or_fail(&self, uid: &Uid, query: impl Into<UrlQuery>) -> MangoResult<Document> {
            self.core.query_one_or_fail(uid, query)
        }

        /// Name of the identity field.
        pub fn uid(&self) -> &str {
            self.core.uid()
        }
    };
}

/// Read-only queries over a collection snapshot.
#[derive(Debug, Clone)]
pub struct MangoFinder {
    core: FinderCore,
}

impl MangoFinder {
    pub fn new(options: MangoFinderOptions) -> Self {
        Self { core: FinderCore::new(options) }
    }

    pub fn with_engine(self, engine: Arc<dyn QueryEngine>) -> Self {
        Self { core: self.core.with_engine(engine) }
    }

    pub fn with_parser(self, parser: Arc<dyn QueryStringParser>) -> Self {
        Self { core: self.core.with_parser(parser) }
    }

    pub fn cache(&self) -> &MangoCache {
        self.core.cache()
    }

    pub fn set_cache(&mut self, documents: impl IntoIterator<Item = Document>) -> MangoCache {
        self.core.set_cache(documents)
    }

    finder_reads!();
}

/// [`MangoFinder`] with `async` reads.
#[derive(Debug, Clone)]
pub struct MangoFinderAsync {
    core: FinderCore,
}

impl MangoFinderAsync {
    pub fn new(options: MangoFinderOptions) -> Self {
        Self { core: FinderCore::new(options) }
    }

    pub fn with_engine(self, engine: Arc<dyn QueryEngine>) -> Self {
        Self { core: self.core.with_engine(engine) }
    }

    pub fn with_parser(self, parser: Arc<dyn QueryStringParser>) -> Self {
        Self { core: self.core.with_parser(parser) }
    }

    pub fn cache(&self) -> &MangoCache {
        self.core.cache()
    }

    pub async fn set_cache(&mut self, documents: impl IntoIterator<Item = Document>) -> MangoCache {
        self.core.set_cache(documents)
    }

    finder_reads!(async);
}

/// Identity-indexed CRUD with validation, plus every finder read.
#[derive(Debug, Clone)]
pub struct MangoRepository {
    core: RepoCore,
}

impl MangoRepository {
    /// # Errors
    ///
    /// Fails when an initial document has no usable identity.
    pub fn new(options: MangoRepoOptions) -> MangoResult<Self> {
        Ok(Self { core: RepoCore::new(options)? })
    }

    /// A repository validating against `E::schema()` and shaping candidates
    /// through `E`.
    pub fn for_entity<E: Entity>(options: MangoRepoOptions) -> MangoResult<Self> {
        let validator = MangoValidator::for_entity::<E>(options.validation.clone());
        Ok(Self::new(options)?.with_validator(validator))
    }

    pub fn with_validator(self, validator: MangoValidator) -> Self {
        Self { core: self.core.with_validator(validator) }
    }

    pub fn with_engine(self, engine: Arc<dyn QueryEngine>) -> Self {
        Self { core: self.core.with_engine(engine) }
    }

    pub fn with_parser(self, parser: Arc<dyn QueryStringParser>) -> Self {
        Self { core: self.core.with_parser(parser) }
    }

    pub fn with_identity_generator(self, ids: Arc<dyn IdentityGenerator>) -> Self {
        Self { core: self.core.with_identity_generator(ids) }
    }

    pub fn cache(&self) -> &RepoCache {
        self.core.cache()
    }

    pub fn validator(&self) -> &MangoValidator {
        self.core.validator()
    }

    pub fn create(&mut self, dto: &Document) -> MangoResult<Document> {
        self.core.create(dto)
    }

    pub fn patch(&mut self, uid: &Uid, dto: &Document, rfields: &[&str]) -> MangoResult<Document> {
        self.core.patch(uid, dto, rfields)
    }

    pub fn save(&mut self, dtos: impl Into<OneOrMany<Document>>) -> MangoResult<Vec<Document>> {
        self.core.save(dtos)
    }

    pub fn delete(&mut self, uids: impl Into<OneOrMany<Uid>>, should_exist: bool) -> MangoResult<Vec<Uid>> {
        self.core.delete(uids, should_exist)
    }

    pub fn clear(&mut self) -> bool {
        self.core.clear()
    }

    pub fn set_cache(&mut self, documents: impl IntoIterator<Item = Document>) -> MangoResult<RepoCache> {
        self.core.set_cache(documents)
    }

    finder_reads!();
}

/// [`MangoRepository`] with `async` operations. Writes await the validator.
#[derive(Debug, Clone)]
pub struct MangoRepositoryAsync {
    core: RepoCore,
}

impl MangoRepositoryAsync {
    /// # Errors
    ///
    /// Fails when an initial document has no usable identity.
    pub fn new(options: MangoRepoOptions) -> MangoResult<Self> {
        Ok(Self { core: RepoCore::new(options)? })
    }

    pub fn for_entity<E: Entity>(options: MangoRepoOptions) -> MangoResult<Self> {
        let validator = MangoValidator::for_entity::<E>(options.validation.clone());
        Ok(Self::new(options)?.with_validator(validator))
    }

    pub fn with_validator(self, validator: MangoValidator) -> Self {
        Self { core: self.core.with_validator(validator) }
    }

    pub fn with_engine(self, engine: Arc<dyn QueryEngine>) -> Self {
        Self { core: self.core.with_engine(engine) }
    }

    pub fn with_parser(self, parser: Arc<dyn QueryStringParser>) -> Self {
        Self { core: self.core.with_parser(parser) }
    }

    pub fn with_identity_generator(self, ids: Arc<dyn IdentityGenerator>) -> Self {
        Self { core: self.core.with_identity_generator(ids) }
    }

    pub fn cache(&self) -> &RepoCache {
        self.core.cache()
    }

    pub fn validator(&self) -> &MangoValidator {
        self.core.validator()
    }

    pub async fn create(&mut self, dto: &Document) -> MangoResult<Document> {
        let (uid, candidate) = self.core.prepare_create(dto)?;
        let entity = self.core.validator().check(candidate).await?;
        Ok(self.core.commit(uid, entity))
    }

    pub async fn patch(&mut self, uid: &Uid, dto: &Document, rfields: &[&str]) -> MangoResult<Document> {
        let candidate = self.core.prepare_patch(uid, dto, rfields)?;
        let entity = self.core.validator().check(candidate).await?;
        Ok(self.core.commit(uid.clone(), entity))
    }

    pub async fn save(&mut self, dtos: impl Into<OneOrMany<Document>>) -> MangoResult<Vec<Document>> {
        let mut saved = Vec::new();

        for dto in dtos.into().into_vec() {
            let (uid, candidate) = self.core.prepare_save(&dto)?;
            let entity = self.core.validator().check(candidate).await?;
            saved.push(self.core.commit(uid, entity));
        }

        Ok(saved)
    }

    pub async fn delete(&mut self, uids: impl Into<OneOrMany<Uid>>, should_exist: bool) -> MangoResult<Vec<Uid>> {
        self.core.delete(uids, should_exist)
    }

    pub async fn clear(&mut self) -> bool {
        self.core.clear()
    }

    pub async fn set_cache(&mut self, documents: impl IntoIterator<Item = Document>) -> MangoResult<RepoCache> {
        self.core.set_cache(documents)
    }

    finder_reads!(async);
}
