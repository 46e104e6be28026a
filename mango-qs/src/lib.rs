//! URL query string translation for mango.
//!
//! Turns query parameters such as `make=Scion&year>=2000&sort=-year&limit=5`
//! into MongoDB-style criteria plus result options (projection, sort, skip,
//! limit) that the mango finder understands.
//!
//! # Example
//!
//! ```ignore
//! use mango_qs::{QsOptions, QsToMongo, UrlQuery};
//!
//! let options = QsOptions::default().with_full_text_fields(["make", "model"]);
//! let parsed = QsToMongo::parse(&UrlQuery::from("q=scion&fields=make,model"), &options)?;
//! ```

#[allow(unused_extern_crates)]
extern crate self as mango_qs;

pub mod criteria;
pub mod error;
pub mod options;
pub mod parser;
pub mod query;

pub use criteria::{CompareOp, Condition, ConditionVisitor};
pub use error::{QsError, QsResult};
pub use options::{QsOptions, RESERVED_KEYS};
pub use parser::{ParsedOptions, ParsedQuery, QsToMongo};
pub use query::UrlQuery;
