//! Identities, typed entities and document helpers.
//!
//! Stored documents are plain [`bson::Document`]s. One field of every document
//! is its identity field; its value is read as a [`Uid`]. Typed models
//! implement [`Entity`] and convert to and from documents through
//! [`EntityExt`].

use std::fmt;

use bson::{Bson, Document, de::deserialize_from_bson, ser::serialize_to_bson};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::{Value, from_value, to_value};

use crate::{
    error::{MangoError, MangoResult},
    validator::Schema,
};

/// An identity value: a string or an integer.
///
/// Displayed the way errors name identities: strings quoted, numbers bare.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Uid {
    Int(i64),
    Str(String),
}

impl Uid {
    /// Reads the identity of `document`.
    ///
    /// Returns `Ok(None)` when the field is absent or null.
    ///
    /// # Errors
    ///
    /// Returns an [`Unprocessable`](crate::error::ErrorKind::Unprocessable)
    /// error when the value cannot be used as an identity.
    pub fn of(document: &Document, id_key: &str) -> MangoResult<Option<Uid>> {
        match document.get(id_key) {
            None | Some(Bson::Null) => Ok(None),
            Some(value) => Uid::try_from(value).map(Some),
        }
    }

    /// The raw identity, without quoting.
    pub fn key(&self) -> String {
        match self {
            Uid::Int(value) => value.to_string(),
            Uid::Str(value) => value.clone(),
        }
    }
}

impl fmt::Display for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Uid::Int(value) => write!(f, "{value}"),
            Uid::Str(value) => write!(f, "\"{value}\""),
        }
    }
}

impl TryFrom<&Bson> for Uid {
    type Error = MangoError;

    fn try_from(value: &Bson) -> MangoResult<Self> {
        match value {
            Bson::String(value) => Ok(Uid::Str(value.clone())),
            Bson::Int32(value) => Ok(Uid::Int(i64::from(*value))),
            Bson::Int64(value) => Ok(Uid::Int(*value)),
            Bson::Double(value) if value.fract() == 0.0 && value.abs() < i64::MAX as f64 => Ok(Uid::Int(*value as i64)),
            other => Err(MangoError::unprocessable(format!(
                "Identity must be a string or an integer, got {other}"
            ))),
        }
    }
}

// `&Uid` converts through bson's blanket `From<&T>` impl.
impl From<Uid> for Bson {
    fn from(uid: Uid) -> Self {
        match uid {
            Uid::Int(value) => match i32::try_from(value) {
                Ok(small) => Bson::Int32(small),
                Err(_) => Bson::Int64(value),
            },
            Uid::Str(value) => Bson::String(value),
        }
    }
}

impl From<&str> for Uid {
    fn from(value: &str) -> Self {
        Uid::Str(value.to_string())
    }
}

impl From<String> for Uid {
    fn from(value: String) -> Self {
        Uid::Str(value)
    }
}

impl From<i64> for Uid {
    fn from(value: i64) -> Self {
        Uid::Int(value)
    }
}

impl From<i32> for Uid {
    fn from(value: i32) -> Self {
        Uid::Int(i64::from(value))
    }
}

impl From<uuid::Uuid> for Uid {
    fn from(value: uuid::Uuid) -> Self {
        Uid::Str(value.to_string())
    }
}

/// A typed model stored by a repository.
///
/// # Example
///
/// ```ignore
/// use mango_core::{document::Entity, validator::{Rule, Schema}};
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Debug, Clone, Serialize, Deserialize)]
/// pub struct Car {
///     pub vin: String,
///     pub make: String,
///     pub model_year: i32,
/// }
///
/// impl Entity for Car {
///     fn model_name() -> &'static str {
///         "Car"
///     }
///
///     fn schema() -> Schema {
///         Schema::new(Self::model_name())
///             .field("make", [Rule::IsString, Rule::NotEmpty])
///             .field("model_year", [Rule::IsInt, Rule::Min(1886.0)])
///     }
/// }
/// ```
pub trait Entity: Serialize + DeserializeOwned + Send + Sync + Clone + 'static {
    /// Name used in validation failure messages.
    fn model_name() -> &'static str;

    /// Field rules checked before writes. No rules by default.
    fn schema() -> Schema {
        Schema::new(Self::model_name())
    }
}

/// Conversions between entities and their stored form.
///
/// Implemented for every [`Entity`].
pub trait EntityExt: Entity {
    fn to_bson(&self) -> MangoResult<Bson>;
    fn from_bson(bson: Bson) -> MangoResult<Self>;

    /// # Errors
    ///
    /// Fails when the entity does not serialize to a document.
    fn to_document(&self) -> MangoResult<Document>;
    fn from_document(document: Document) -> MangoResult<Self>;

    fn to_json(&self) -> MangoResult<Value>;
    fn from_json(value: Value) -> MangoResult<Self>;
}

impl<E: Entity> EntityExt for E {
    fn to_bson(&self) -> MangoResult<Bson> {
        Ok(serialize_to_bson(self)?)
    }

    fn from_bson(bson: Bson) -> MangoResult<Self> {
        Ok(deserialize_from_bson(bson)?)
    }

    fn to_document(&self) -> MangoResult<Document> {
        match self.to_bson()? {
            Bson::Document(document) => Ok(document),
            other => Err(MangoError::internal(format!(
                "{} serialized to {other} instead of a document",
                E::model_name(),
            ))),
        }
    }

    fn from_document(document: Document) -> MangoResult<Self> {
        Self::from_bson(Bson::Document(document))
    }

    fn to_json(&self) -> MangoResult<Value> {
        Ok(to_value(self)?)
    }

    fn from_json(value: Value) -> MangoResult<Self> {
        Ok(from_value(value)?)
    }
}

/// Merges `patch` into `base`. Nested documents are merged key by key, any
/// other value (arrays included) replaces the existing one.
pub fn deep_merge(base: &mut Document, patch: Document) {
    for (key, value) in patch {
        match value {
            Bson::Document(nested) => match base.get_mut(&key) {
                Some(Bson::Document(existing)) => deep_merge(existing, nested),
                _ => {
                    base.insert(key, nested);
                },
            },
            value => {
                base.insert(key, value);
            },
        }
    }
}

/// Converts any serializable value to BSON for error context, falling back to null.
pub(crate) fn to_context<T: Serialize>(value: &T) -> Bson {
    serialize_to_bson(value).unwrap_or(Bson::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Car {
        vin: String,
        make: String,
    }

    impl Entity for Car {
        fn model_name() -> &'static str {
            "Car"
        }
    }

    #[test]
    fn uid_reads_strings_and_integral_numbers() {
        assert_eq!(Uid::try_from(&Bson::String("a".into())).unwrap(), Uid::Str("a".into()));
        assert_eq!(Uid::try_from(&Bson::Int32(5)).unwrap(), Uid::Int(5));
        assert_eq!(Uid::try_from(&Bson::Double(5.0)).unwrap(), Uid::Int(5));
        assert!(Uid::try_from(&Bson::Double(5.5)).is_err());
        assert!(Uid::try_from(&Bson::Boolean(true)).is_err());
    }

    #[test]
    fn uid_of_treats_null_as_absent() {
        assert_eq!(Uid::of(&doc! { "vin": Bson::Null }, "vin").unwrap(), None);
        assert_eq!(Uid::of(&doc! {}, "vin").unwrap(), None);
        assert_eq!(Uid::of(&doc! { "vin": "x" }, "vin").unwrap(), Some(Uid::from("x")));
    }

    #[test]
    fn uid_display_quotes_strings_only() {
        assert_eq!(Uid::from("bad-vin").to_string(), "\"bad-vin\"");
        assert_eq!(Uid::from(7_i64).to_string(), "7");
        assert_eq!(Bson::from(Uid::from(7_i64)), Bson::Int32(7));
    }

    #[test]
    fn uid_converts_to_bson_by_value_and_by_reference() {
        let big = Uid::from(i64::MAX);
        let vin = Uid::from("JTKDE177");

        assert_eq!(Bson::from(&big), Bson::Int64(i64::MAX));
        assert_eq!(Bson::from(&Uid::from(-3_i64)), Bson::Int32(-3));
        assert_eq!(Bson::from(&vin), Bson::String("JTKDE177".into()));
        assert_eq!(Bson::from(vin), Bson::String("JTKDE177".into()));
    }

    #[test]
    fn deep_merge_merges_nested_documents() {
        let mut base = doc! { "a": { "b": 1, "c": 2 }, "tags": [1, 2] };
        deep_merge(&mut base, doc! { "a": { "c": 3 }, "tags": [3] });

        assert_eq!(base, doc! { "a": { "b": 1, "c": 3 }, "tags": [3] });
    }

    #[test]
    fn entities_round_trip_through_documents() {
        let car = Car { vin: "1".into(), make: "Scion".into() };
        let document = car.to_document().unwrap();

        assert_eq!(document, doc! { "vin": "1", "make": "Scion" });
        assert_eq!(Car::from_document(document).unwrap(), car);
        assert_eq!(car.to_json().unwrap()["make"], "Scion");
    }
}
