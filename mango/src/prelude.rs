//! Convenient re-exports of commonly used types from mango.
//!
//! ```ignore
//! use mango::prelude::*;
//! ```

pub use mango_core::{
    document::{Entity, EntityExt, Uid},
    error::{ErrorKind, MangoError, MangoResult},
    facade::{MangoFinder, MangoFinderAsync, MangoRepository, MangoRepositoryAsync},
    finder::MangoFinderOptions,
    query::{OneOrMany, Pipeline, SearchParams},
    repository::{IdentityGenerator, MangoRepoOptions},
    validator::{MangoValidator, Rule, Schema, ValidatorOptions},
};
pub use mango_mingo::MingoOptions;
pub use mango_qs::{QsOptions, UrlQuery};
