//! The orchestration core of the mango document store.
//!
//! This crate ties a query engine, a URL query translator and a validation
//! engine into finders and repositories over an in-memory collection:
//!
//! - **Errors** ([`error`]) - typed failures with structured context
//! - **Documents** ([`document`]) - identities, typed entities and merging
//! - **Search parameters** ([`query`]) - criteria, options and pipelines
//! - **Caches** ([`cache`]) - immutable collection snapshots and the identity root
//! - **Engine and parser seams** ([`engine`], [`parser`]) - traits over the collaborators
//! - **Finder** ([`finder`]) - search and aggregation over a snapshot
//! - **Validator** ([`validator`]) - schemas and the validation engine seam
//! - **Repository** ([`repository`]) - create, patch, save and delete
//! - **Facades** ([`facade`]) - the sync and async entry points
//!
//! # Example
//!
//! ```ignore
//! use bson::doc;
//! use mango_core::{facade::MangoFinder, finder::MangoFinderOptions};
//!
//! let finder = MangoFinder::new(
//!     MangoFinderOptions::default().with_collection(vec![
//!         doc! { "id": 1, "make": "Scion" },
//!         doc! { "id": 2, "make": "Subaru" },
//!     ]),
//! );
//!
//! let scions = finder.query("make=Scion")?;
//! assert_eq!(scions.len(), 1);
//! ```

#[allow(unused_extern_crates)]
extern crate self as mango_core;

pub mod cache;
pub mod document;
pub mod engine;
pub mod error;
pub mod facade;
pub mod finder;
pub mod parser;
pub mod query;
pub mod repository;
pub mod validator;

pub use cache::{MangoCache, RepoCache, RepoRoot};
pub use document::{Entity, EntityExt, Uid};
pub use engine::QueryEngine;
pub use error::{ErrorKind, MangoError, MangoResult, ResultExt};
pub use facade::{MangoFinder, MangoFinderAsync, MangoRepository, MangoRepositoryAsync};
pub use finder::{FinderCore, MangoFinderCore, MangoFinderOptions};
pub use parser::{MangoParser, MangoParserOptions, QueryStringParser};
pub use query::{OneOrMany, Pipeline, QueryCriteriaOptions, SearchParams};
pub use repository::{Deleted, IdentityGenerator, MangoRepoCore, MangoRepoOptions, RepoCore, UuidGenerator};
pub use validator::{
    MangoValidator, Rule, Schema, SchemaEngine, TransformerOptions, TypedEngine, ValidationEngine,
    ValidationError, ValidationFailure, ValidationOptions, ValidatorOptions,
};
