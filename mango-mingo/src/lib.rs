//! In-memory MongoDB-style query and aggregation engine.
//!
//! This crate evaluates MongoDB query documents, projections, and aggregation
//! pipelines over plain `Vec<bson::Document>` collections. It has no storage
//! of its own; callers hand it a slice of documents on every call.
//!
//! # Features
//!
//! - **Query matching** - comparison, logical, array, regex and `$elemMatch` operators
//! - **Cursors** - sort, skip and limit with a stable, type-bracketed ordering
//! - **Projection** - inclusion, exclusion and computed fields
//! - **Aggregation** - `$match`, `$project`, `$group`, `$unwind`, `$facet` and more
//! - **Extensible** - register custom stages, operators and accumulators per engine
//!
//! # Quick Start
//!
//! ```ignore
//! use bson::doc;
//! use mango_mingo::{Mingo, MingoOptions};
//!
//! let mingo = Mingo::new();
//! let cars = vec![
//!     doc! { "id": 1, "make": "Scion", "year": 2010 },
//!     doc! { "id": 2, "make": "Subaru", "year": 1994 },
//! ];
//!
//! let by_year = mingo.aggregate(
//!     &cars,
//!     &[doc! { "$group": { "_id": "$year", "count": { "$sum": 1 } } }],
//!     &MingoOptions::default(),
//! )?;
//! ```

#[allow(unused_extern_crates)]
extern crate self as mango_mingo;

pub mod cursor;
pub mod engine;
pub mod error;
pub mod evaluator;
pub mod expr;
pub mod operators;
pub mod path;
pub mod pipeline;
pub mod projection;
pub mod value;

pub use cursor::{Cursor, SortSpec};
pub use engine::{Mingo, MingoOptions};
pub use error::{MingoError, MingoResult};
pub use expr::{Expr, FieldOp, QueryVisitor};
pub use operators::ExpressionContext;
