//! An in-memory, MongoDB-flavored document store.
//!
//! This crate is the entry point of the mango workspace. It re-exports the
//! finders and repositories of [`mango_core`] together with their default
//! collaborators: the [`mingo`] query engine and the [`qs`] URL query
//! translator.
//!
//! # Features
//!
//! - **Finders** - MongoDB-style criteria, projections, sorting, pagination and aggregation pipelines
//! - **Repositories** - identity-indexed create, patch, save and delete with schema validation
//! - **URL queries** - `make=Scion&sort=-model_year&limit=2` translated into criteria and options
//! - **Snapshots** - every write publishes a new immutable cache; readers keep theirs
//!
//! # Quick Start
//!
//! ```ignore
//! use mango::{prelude::*, bson::doc};
//!
//! let mut cars = MangoRepository::new(
//!     MangoRepoOptions::default()
//!         .with_id_key("vin")
//!         .with_collection(vec![
//!             doc! { "vin": "JTKDE177", "make": "Scion", "model_year": 2008 },
//!             doc! { "vin": "JF1GD296", "make": "Subaru", "model_year": 2002 },
//!         ]),
//! )?;
//!
//! let created = cars.create(&doc! { "make": "Toyota", "model_year": 2011 })?;
//! let recent = cars.query("model_year>2005&sort=-model_year")?;
//!
//! cars.delete("JF1GD296", true)?;
//! ```
//!
//! # Typed entities
//!
//! ```ignore
//! use mango::prelude::*;
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Debug, Clone, Serialize, Deserialize)]
//! pub struct Car {
//!     pub vin: String,
//!     pub make: String,
//!     pub model_year: i32,
//! }
//!
//! impl Entity for Car {
//!     fn model_name() -> &'static str { "Car" }
//!
//!     fn schema() -> Schema {
//!         Schema::new("Car")
//!             .field("make", [Rule::IsString, Rule::NotEmpty])
//!             .field("model_year", [Rule::IsInt, Rule::Min(1886.0)])
//!     }
//! }
//!
//! let mut cars = MangoRepositoryAsync::for_entity::<Car>(MangoRepoOptions::default().with_id_key("vin"))?;
//! let car = Car::from_document(cars.create(&doc! { "make": "Scion", "model_year": 2008 }).await?)?;
//! ```

pub mod prelude;

pub use mango_core::{
    cache, document, engine, error, facade, finder, parser, query, repository, validator,
};

pub use bson;

/// The default query and aggregation engine.
pub mod mingo {
    pub use mango_mingo::{Cursor, Mingo, MingoError, MingoOptions, MingoResult};
}

/// The default URL query translator.
pub mod qs {
    pub use mango_qs::{ParsedOptions, ParsedQuery, QsError, QsOptions, QsResult, QsToMongo, UrlQuery};
}
