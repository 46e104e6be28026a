//! Identity-indexed CRUD over a repository cache.
//!
//! [`MangoRepoCore`] holds the stateless steps of every write: shaping a
//! create or patch candidate and computing the cache left after a delete.
//! [`RepoCore`] sequences those steps around the validator and publishes the
//! resulting [`RepoCache`]. Writes never touch the published snapshot in
//! place; they build a new root and swap it in.

use std::{collections::HashSet, fmt, sync::Arc};

use bson::{Bson, Document, doc};
use mango_mingo::MingoOptions;
use mango_qs::UrlQuery;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{
    cache::{MangoCache, RepoCache, RepoRoot},
    document::{Uid, deep_merge},
    engine::QueryEngine,
    error::{MangoError, MangoResult},
    finder::{FinderCore, MangoFinderCore, MangoFinderOptions},
    parser::{MangoParserOptions, QueryStringParser},
    query::{OneOrMany, Pipeline, SearchParams},
    validator::{MangoValidator, Schema, ValidatorOptions},
};

const TARGET: &str = "mango::repo";

/// Repository configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MangoRepoOptions {
    /// Initial documents. Every one must carry an identity.
    pub collection: Vec<Document>,
    pub mingo: MingoOptions,
    pub parser: MangoParserOptions,
    pub validation: ValidatorOptions,
}

impl MangoRepoOptions {
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

    pub fn with_validation(mut self, validation: ValidatorOptions) -> Self {
        self.validation = validation;
        self
    }
}

/// Source of identities for documents created without one.
pub trait IdentityGenerator: Send + Sync {
    fn generate(&self) -> Uid;
}

/// Random v4 UUID identities.
#[derive(Debug, Clone, Copy, Default)]
pub struct UuidGenerator;

impl IdentityGenerator for UuidGenerator {
    fn generate(&self) -> Uid {
        Uid::from(uuid::Uuid::new_v4())
    }
}

/// The cache left by a delete and the identities actually removed.
#[derive(Debug, Clone, PartialEq)]
pub struct Deleted {
    pub cache: RepoCache,
    pub uids: Vec<Uid>,
}

fn uids_context(uids: &[Uid]) -> Bson {
    Bson::Array(uids.iter().map(Bson::from).collect())
}

/// Stateless write steps.
pub struct MangoRepoCore;

impl MangoRepoCore {
    /// Indexes `documents` by identity. See [`RepoCache::create`].
    pub fn create_cache(id_key: &str, documents: impl IntoIterator<Item = Document>) -> MangoResult<RepoCache> {
        RepoCache::create(id_key, documents)
    }

    /// Shapes a create candidate: trims a string identity, generates one when
    /// it is absent, null or empty, and rejects identities already stored.
    ///
    /// The candidate is not validated.
    ///
    /// # Errors
    ///
    /// - [`Unprocessable`](crate::error::ErrorKind::Unprocessable) with
    ///   `{ dto }` for an identity that is neither a string nor an integer.
    /// - [`Conflict`](crate::error::ErrorKind::Conflict) with
    ///   `{ dto, errors: { [id_key]: uid } }` when the identity exists.
    pub fn format_create_entity_dto(
        dto: &Document,
        collection: &[Document],
        options: &MingoOptions,
        engine: &dyn QueryEngine,
        ids: &dyn IdentityGenerator,
    ) -> MangoResult<(Uid, Document)> {
        let id_key = options.id_key();

        let uid = match dto.get(id_key) {
            None | Some(Bson::Null) => None,
            Some(Bson::String(value)) => Some(value.trim())
                .filter(|value| !value.is_empty())
                .map(Uid::from),
            Some(value) => Some(
                Uid::try_from(value).map_err(|err| err.merge_data(doc! { "dto": dto.clone() }))?,
            ),
        };
        let uid = uid.unwrap_or_else(|| ids.generate());

        let mut candidate = dto.clone();
        candidate.insert(id_key, Bson::from(&uid));

        if !collection.is_empty()
            && MangoFinderCore::find_one(&uid, &SearchParams::default(), collection, options, engine)?.is_some()
        {
            return Err(
                MangoError::conflict(format!("Entity with {id_key} {uid} already exists")).with_data(doc! {
                    "dto": candidate,
                    "errors": { id_key: Bson::from(&uid) },
                }),
            );
        }

        Ok((uid, candidate))
    }

    /// Shapes a patch candidate: the stored entity deep-merged with `dto`,
    /// minus the identity field and `rfields`.
    ///
    /// The candidate is not validated.
    ///
    /// # Errors
    ///
    /// Returns the [`NotFound`](crate::error::ErrorKind::NotFound) error of
    /// [`MangoFinderCore::find_one_or_fail`] when `uid` is not stored.
    pub fn format_patch_entity_dto(
        uid: &Uid,
        dto: &Document,
        rfields: &[&str],
        collection: &[Document],
        options: &MingoOptions,
        engine: &dyn QueryEngine,
    ) -> MangoResult<Document> {
        let mut entity =
            MangoFinderCore::find_one_or_fail(uid, &SearchParams::default(), collection, options, engine)?;

        let readonly = std::iter::once(options.id_key())
            .chain(rfields.iter().copied())
            .collect::<HashSet<_>>();

        let sanitized = dto
            .iter()
            .filter(|(key, _)| !readonly.contains(key.as_str()))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect::<Document>();

        deep_merge(&mut entity, sanitized);
        Ok(entity)
    }

    /// Computes the cache left after removing `uids`.
    ///
    /// With `should_exist`, every identity must be stored or nothing is
    /// removed. Otherwise identities that are not stored are skipped.
    ///
    /// # Errors
    ///
    /// Returns the [`NotFound`](crate::error::ErrorKind::NotFound) error of
    /// [`MangoFinderCore::find_one_or_fail`] for the first missing identity,
    /// extended with `{ uids, should_exist }`, when `should_exist` is set.
    pub fn delete(
        uids: impl Into<OneOrMany<Uid>>,
        should_exist: bool,
        cache: &RepoCache,
        options: &MingoOptions,
    ) -> MangoResult<Deleted> {
        let mut requested = uids.into().into_vec();
        let mut seen = HashSet::new();
        requested.retain(|uid| seen.insert(uid.clone()));

        let (found, missing): (Vec<Uid>, Vec<Uid>) = requested.iter().cloned().partition(|uid| cache.contains(uid));

        if !missing.is_empty() {
            if should_exist {
                return Err(
                    MangoFinderCore::not_found(&missing[0], &SearchParams::default(), options).merge_data(doc! {
                        "uids": uids_context(&requested),
                        "should_exist": should_exist,
                    }),
                );
            }

            for uid in &missing {
                warn!(target: TARGET, %uid, "skipping delete of a missing document");
            }
        }

        if found.is_empty() {
            return Ok(Deleted { cache: cache.clone(), uids: found });
        }

        let removed = found.iter().collect::<HashSet<_>>();
        let remaining = cache
            .root()
            .iter()
            .filter(|(uid, _)| !removed.contains(uid))
            .map(|(_, entity)| entity.clone());

        Ok(Deleted {
            cache: Self::create_cache(options.id_key(), remaining)?,
            uids: found,
        })
    }
}

/// Repository state shared by [`MangoRepository`](crate::facade::MangoRepository)
/// and [`MangoRepositoryAsync`](crate::facade::MangoRepositoryAsync).
///
/// Writes are split into a `prepare_*` step, validation, and [`commit`](Self::commit),
/// so both facades run the same steps and differ only in how they await the
/// validator.
#[derive(Clone)]
pub struct RepoCore {
    finder: FinderCore,
    cache: RepoCache,
    validator: MangoValidator,
    ids: Arc<dyn IdentityGenerator>,
}

impl fmt::Debug for RepoCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RepoCore")
            .field("finder", &self.finder)
            .field("validator", &self.validator)
            .finish_non_exhaustive()
    }
}

impl RepoCore {
    /// Indexes the initial collection. Candidates are checked against an
    /// empty `Document` schema until a validator is set.
    ///
    /// # Errors
    ///
    /// Fails when an initial document has no usable identity.
    pub fn new(options: MangoRepoOptions) -> MangoResult<Self> {
        let validator = MangoValidator::new(Schema::new("Document"), options.validation);
        let finder = FinderCore::new(
            MangoFinderOptions::default()
                .with_mingo(options.mingo)
                .with_parser(options.parser),
        );

        let mut core = Self {
            cache: RepoCache::default(),
            finder,
            validator,
            ids: Arc::new(UuidGenerator),
        };
        core.set_cache(options.collection)?;

        Ok(core)
    }

    pub fn with_validator(mut self, validator: MangoValidator) -> Self {
        self.validator = validator;
        self
    }

    pub fn with_engine(mut self, engine: Arc<dyn QueryEngine>) -> Self {
        self.finder = self.finder.with_engine(engine);
        self
    }

    pub fn with_parser(mut self, parser: Arc<dyn QueryStringParser>) -> Self {
        self.finder = self.finder.with_parser(parser);
        self
    }

    pub fn with_identity_generator(mut self, ids: Arc<dyn IdentityGenerator>) -> Self {
        self.ids = ids;
        self
    }

    pub fn finder(&self) -> &FinderCore {
        &self.finder
    }

    pub fn validator(&self) -> &MangoValidator {
        &self.validator
    }

    pub fn cache(&self) -> &RepoCache {
        &self.cache
    }

    pub fn uid(&self) -> &str {
        self.finder.uid()
    }

    fn options(&self) -> &MingoOptions {
        self.finder.options()
    }

    pub fn aggregate(&self, pipeline: impl Into<Pipeline>) -> MangoResult<Vec<Document>> {
        self.finder.aggregate(pipeline)
    }

    pub fn find(&self, params: impl Into<SearchParams>) -> MangoResult<Vec<Document>> {
        self.finder.find(params)
    }

    pub fn find_by_ids(&self, uids: &[Uid], params: impl Into<SearchParams>) -> MangoResult<Vec<Document>> {
        self.finder.find_by_ids(uids, params)
    }

    pub fn find_one(&self, uid: &Uid, params: impl Into<SearchParams>) -> MangoResult<Option<Document>> {
        self.finder.find_one(uid, params)
    }

    pub fn find_one_or_fail(&self, uid: &Uid, params: impl Into<SearchParams>) -> MangoResult<Document> {
        self.finder.find_one_or_fail(uid, params)
    }

    pub fn query(&self, query: impl Into<UrlQuery>) -> MangoResult<Vec<Document>> {
        self.finder.query(query)
    }

    pub fn query_by_ids(&self, uids: &[Uid], query: impl Into<UrlQuery>) -> MangoResult<Vec<Document>> {
        self.finder.query_by_ids(uids, query)
    }

    pub fn query_one(&self, uid: &Uid, query: impl Into<UrlQuery>) -> MangoResult<Option<Document>> {
        self.finder.query_one(uid, query)
    }

    pub fn query_one_or_fail(&self, uid: &Uid, query: impl Into<UrlQuery>) -> MangoResult<Document> {
        self.finder.query_one_or_fail(uid, query)
    }

    /// An unvalidated create candidate and its identity.
    pub fn prepare_create(&self, dto: &Document) -> MangoResult<(Uid, Document)> {
        MangoRepoCore::format_create_entity_dto(
            dto,
            self.cache.collection(),
            self.options(),
            self.finder.engine(),
            self.ids.as_ref(),
        )
    }

    /// An unvalidated patch candidate.
    pub fn prepare_patch(&self, uid: &Uid, dto: &Document, rfields: &[&str]) -> MangoResult<Document> {
        MangoRepoCore::format_patch_entity_dto(
            uid,
            dto,
            rfields,
            self.cache.collection(),
            self.options(),
            self.finder.engine(),
        )
    }

    /// Decides between create and patch for an upsert and shapes the
    /// candidate accordingly.
    pub fn prepare_save(&self, dto: &Document) -> MangoResult<(Uid, Document)> {
        let existing = match Uid::of(dto, self.uid()) {
            Ok(Some(uid)) => self.find_one(&uid, SearchParams::default())?.map(|_| uid),
            Ok(None) => None,
            Err(err) => return Err(err.merge_data(doc! { "dto": dto.clone() })),
        };

        match existing {
            Some(uid) => {
                let candidate = self.prepare_patch(&uid, dto, &[])?;
                Ok((uid, candidate))
            },
            None => self.prepare_create(dto),
        }
    }

    /// Publishes `root ∪ { uid: entity }` and returns the stored entity.
    ///
    /// The identity is written back into `entity` in case validation
    /// stripped it.
    pub fn commit(&mut self, uid: Uid, mut entity: Document) -> Document {
        entity.insert(self.uid().to_string(), Bson::from(&uid));

        let mut root: RepoRoot = self.cache.root().clone();
        root.insert(uid, entity.clone());
        self.publish(RepoCache::from_root(root));

        entity
    }

    pub fn create(&mut self, dto: &Document) -> MangoResult<Document> {
        let (uid, candidate) = self.prepare_create(dto)?;
        let entity = self.validator.check_sync(candidate)?;
        Ok(self.commit(uid, entity))
    }

    pub fn patch(&mut self, uid: &Uid, dto: &Document, rfields: &[&str]) -> MangoResult<Document> {
        let candidate = self.prepare_patch(uid, dto, rfields)?;
        let entity = self.validator.check_sync(candidate)?;
        Ok(self.commit(uid.clone(), entity))
    }

    /// Upserts every dto in order. Each upsert is published before the next
    /// one starts; a failure leaves earlier upserts in place.
    pub fn save(&mut self, dtos: impl Into<OneOrMany<Document>>) -> MangoResult<Vec<Document>> {
        let mut saved = Vec::new();

        for dto in dtos.into().into_vec() {
            let (uid, candidate) = self.prepare_save(&dto)?;
            let entity = self.validator.check_sync(candidate)?;
            saved.push(self.commit(uid, entity));
        }

        Ok(saved)
    }

    /// Removes `uids` and returns the identities actually removed.
    pub fn delete(&mut self, uids: impl Into<OneOrMany<Uid>>, should_exist: bool) -> MangoResult<Vec<Uid>> {
        let Deleted { cache, uids } = MangoRepoCore::delete(uids, should_exist, &self.cache, self.options())?;

        if !uids.is_empty() {
            self.publish(cache);
        }

        Ok(uids)
    }

    /// Empties the repository.
    pub fn clear(&mut self) -> bool {
        self.publish(RepoCache::default());
        true
    }

    /// Replaces the whole collection and returns the new cache.
    ///
    /// # Errors
    ///
    /// Fails when a document has no usable identity; the published cache is
    /// left untouched.
    pub fn set_cache(&mut self, documents: impl IntoIterator<Item = Document>) -> MangoResult<RepoCache> {
        let cache = MangoRepoCore::create_cache(self.uid(), documents)?;
        self.publish(cache.clone());
        Ok(cache)
    }

    fn publish(&mut self, cache: RepoCache) {
        debug!(target: TARGET, documents = cache.len(), "publishing cache");

        let collection: MangoCache = cache.clone().into_finder_cache();
        self.finder.publish(collection);
        self.cache = cache;
    }
}
