//! Schema validation for repository writes.
//!
//! Entities declare their constraints once as a [`Schema`]: field paths
//! mapped to [`Rule`]s. A [`MangoValidator`] checks candidates against the
//! schema through a [`ValidationEngine`] before a repository publishes them,
//! and turns engine failures into [`MangoError`]s.
//!
//! # Example
//!
//! ```ignore
//! use bson::doc;
//! use mango_core::validator::{MangoValidator, Rule, Schema, ValidatorOptions};
//!
//! let schema = Schema::new("Car")
//!     .field("make", [Rule::IsString, Rule::NotEmpty])
//!     .field("model_year", [Rule::IsInt, Rule::Min(1886.0)]);
//!
//! let validator = MangoValidator::new(schema, ValidatorOptions::default());
//! let car = validator.check_sync(doc! { "make": "Scion", "model_year": 2008 })?;
//! ```

use std::{fmt, marker::PhantomData, sync::Arc};

use async_trait::async_trait;
use bson::{Bson, Document, doc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::{
    document::{Entity, EntityExt, to_context},
    error::{MangoError, MangoResult},
};

/// Largest magnitude, in milliseconds, of a representable timestamp.
const MAX_TIMESTAMP_MILLIS: f64 = 8.64e15;

/// A constraint on a single field.
#[derive(Clone)]
pub enum Rule {
    /// The value must be present and not null.
    IsDefined,
    /// Skips the other rules when the value is absent or null.
    IsOptional,
    IsString,
    IsNumber,
    IsInt,
    IsBoolean,
    IsArray,
    IsObject,
    /// Not null, not an empty string.
    NotEmpty,
    /// Minimum length of a string, in characters.
    MinLength(usize),
    /// Maximum length of a string, in characters.
    MaxLength(usize),
    Min(f64),
    Max(f64),
    OneOf(Vec<Bson>),
    Matches(Regex),
    /// A number of milliseconds since the Unix epoch.
    IsUnixTimestamp,
    Custom {
        name: String,
        check: Arc<dyn Fn(&Bson) -> bool + Send + Sync>,
    },
}

impl fmt::Debug for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rule::MinLength(n) => write!(f, "MinLength({n})"),
            Rule::MaxLength(n) => write!(f, "MaxLength({n})"),
            Rule::Min(n) => write!(f, "Min({n})"),
            Rule::Max(n) => write!(f, "Max({n})"),
            Rule::OneOf(values) => write!(f, "OneOf({values:?})"),
            Rule::Matches(regex) => write!(f, "Matches({})", regex.as_str()),
            Rule::Custom { name, .. } => write!(f, "Custom({name})"),
            other => f.write_str(other.name()),
        }
    }
}

fn number(value: &Bson) -> Option<f64> {
    match value {
        Bson::Int32(n) => Some(f64::from(*n)),
        Bson::Int64(n) => Some(*n as f64),
        Bson::Double(n) if n.is_finite() => Some(*n),
        _ => None,
    }
}

fn length(value: &Bson) -> Option<usize> {
    match value {
        Bson::String(text) => Some(text.chars().count()),
        _ => None,
    }
}

impl Rule {
    /// Constraint name reported in validation errors.
    pub fn name(&self) -> &str {
        match self {
            Rule::IsDefined => "isDefined",
            Rule::IsOptional => "isOptional",
            Rule::IsString => "isString",
            Rule::IsNumber => "isNumber",
            Rule::IsInt => "isInt",
            Rule::IsBoolean => "isBoolean",
            Rule::IsArray => "isArray",
            Rule::IsObject => "isObject",
            Rule::NotEmpty => "isNotEmpty",
            Rule::MinLength(_) => "minLength",
            Rule::MaxLength(_) => "maxLength",
            Rule::Min(_) => "min",
            Rule::Max(_) => "max",
            Rule::OneOf(_) => "isIn",
            Rule::Matches(_) => "matches",
            Rule::IsUnixTimestamp => "isUnixTimestamp",
            Rule::Custom { name, .. } => name.as_str(),
        }
    }

    /// Whether `value` satisfies the rule. Absent values are checked as null.
    pub fn check(&self, value: &Bson) -> bool {
        match self {
            Rule::IsDefined => !matches!(value, Bson::Null | Bson::Undefined),
            Rule::IsOptional => true,
            Rule::IsString => matches!(value, Bson::String(_)),
            Rule::IsNumber => number(value).is_some(),
            Rule::IsInt => number(value).is_some_and(|n| n.fract() == 0.0),
            Rule::IsBoolean => matches!(value, Bson::Boolean(_)),
            Rule::IsArray => matches!(value, Bson::Array(_)),
            Rule::IsObject => matches!(value, Bson::Document(_)),
            Rule::NotEmpty => !matches!(value, Bson::Null | Bson::Undefined) && value != &Bson::String(String::new()),
            Rule::MinLength(min) => length(value).is_some_and(|len| len >= *min),
            Rule::MaxLength(max) => length(value).is_some_and(|len| len <= *max),
            Rule::Min(min) => number(value).is_some_and(|n| n >= *min),
            Rule::Max(max) => number(value).is_some_and(|n| n <= *max),
            Rule::OneOf(values) => values.iter().any(|allowed| mango_mingo::value::values_equal(allowed, value)),
            Rule::Matches(regex) => matches!(value, Bson::String(text) if regex.is_match(text)),
            Rule::IsUnixTimestamp => number(value).is_some_and(|n| n.abs() <= MAX_TIMESTAMP_MILLIS),
            Rule::Custom { check, .. } => check(value),
        }
    }

    /// Failure message for `property`.
    pub fn message(&self, property: &str, value: &Bson) -> String {
        match self {
            Rule::IsDefined => format!("{property} should not be null or undefined"),
            Rule::IsOptional => format!("{property} is optional"),
            Rule::IsString => format!("{property} must be a string"),
            Rule::IsNumber => format!("{property} must be a number conforming to the specified constraints"),
            Rule::IsInt => format!("{property} must be an integer number"),
            Rule::IsBoolean => format!("{property} must be a boolean value"),
            Rule::IsArray => format!("{property} must be an array"),
            Rule::IsObject => format!("{property} must be an object"),
            Rule::NotEmpty => format!("{property} should not be empty"),
            Rule::MinLength(min) => format!("{property} must be longer than or equal to {min} characters"),
            Rule::MaxLength(max) => format!("{property} must be shorter than or equal to {max} characters"),
            Rule::Min(min) => format!("{property} must not be less than {min}"),
            Rule::Max(max) => format!("{property} must not be greater than {max}"),
            Rule::OneOf(values) => format!(
                "{property} must be one of the following values: {}",
                values.iter().map(ToString::to_string).collect::<Vec<_>>().join(", "),
            ),
            Rule::Matches(regex) => format!("{property} must match {} regular expression", regex.as_str()),
            Rule::IsUnixTimestamp => format!("{property} must be unix timestamp; received {value}"),
            Rule::Custom { name, .. } => format!("{property} failed the {name} constraint"),
        }
    }
}

/// Field rules for one model.
#[derive(Debug, Clone)]
pub struct Schema {
    name: String,
    fields: Vec<(String, Vec<Rule>)>,
}

impl Schema {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
        }
    }

    /// Adds rules for a field. `path` may be dotted to reach nested fields.
    pub fn field(mut self, path: impl Into<String>, rules: impl IntoIterator<Item = Rule>) -> Self {
        let path = path.into();
        let rules = rules.into_iter().collect::<Vec<_>>();

        match self.fields.iter_mut().find(|(existing, _)| *existing == path) {
            Some((_, existing)) => existing.extend(rules),
            None => self.fields.push((path, rules)),
        }

        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fields(&self) -> &[(String, Vec<Rule>)] {
        &self.fields
    }

    /// Whether a top-level key is covered by a declared field.
    pub fn declares(&self, key: &str) -> bool {
        self.fields
            .iter()
            .any(|(path, _)| path.split('.').next() == Some(key))
    }
}

/// How candidates are checked.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationOptions {
    /// Skip rules for fields that are absent or null.
    pub skip_missing_properties: bool,
    /// Strip fields that no rule declares.
    pub whitelist: bool,
    /// Report undeclared fields as errors instead of stripping them.
    pub forbid_non_whitelisted: bool,
    /// Stop checking a field after its first failed rule.
    pub stop_at_first_error: bool,
}

/// How validated candidates are shaped.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransformerOptions {
    /// Drop fields that no rule declares from the validated entity.
    pub exclude_extraneous_values: bool,
}

/// Validator configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidatorOptions {
    pub enabled: bool,
    pub transformer: TransformerOptions,
    pub validator: ValidationOptions,
}

impl Default for ValidatorOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            transformer: TransformerOptions::default(),
            validator: ValidationOptions::default(),
        }
    }
}

impl ValidatorOptions {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_transformer(mut self, transformer: TransformerOptions) -> Self {
        self.transformer = transformer;
        self
    }

    pub fn with_validator(mut self, validator: ValidationOptions) -> Self {
        self.validator = validator;
        self
    }
}

/// A field-level validation failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationError {
    pub property: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<Bson>,
    /// Constraint name → message.
    pub constraints: Document,
}

/// Why a candidate was rejected.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationFailure {
    /// One or more fields broke their rules.
    #[error("{} field(s) failed validation", .0.len())]
    Invalid(Vec<ValidationError>),
    /// The engine itself failed.
    #[error("{0}")]
    Engine(String),
}

/// Checks candidates against a schema.
///
/// `validate` defaults to the synchronous check, so engines that never
/// suspend only implement `validate_sync`.
#[async_trait]
pub trait ValidationEngine: Send + Sync {
    async fn validate(
        &self,
        schema: &Schema,
        candidate: Document,
        options: &ValidatorOptions,
    ) -> Result<Document, ValidationFailure> {
        self.validate_sync(schema, candidate, options)
    }

    fn validate_sync(
        &self,
        schema: &Schema,
        candidate: Document,
        options: &ValidatorOptions,
    ) -> Result<Document, ValidationFailure>;
}

/// Rule-by-rule validation of plain documents.
#[derive(Debug, Clone, Copy, Default)]
pub struct SchemaEngine;

impl SchemaEngine {
    fn check_field(path: &str, rules: &[Rule], candidate: &Document, options: &ValidationOptions) -> Option<ValidationError> {
        let value = mango_mingo::path::get_value(candidate, path);
        let missing = matches!(value, None | Some(Bson::Null) | Some(Bson::Undefined));

        if missing && (options.skip_missing_properties || rules.iter().any(|rule| matches!(rule, Rule::IsOptional))) {
            return None;
        }

        let checked = value.clone().unwrap_or(Bson::Null);
        let mut constraints = Document::new();

        for rule in rules.iter().filter(|rule| !matches!(rule, Rule::IsOptional)) {
            if !rule.check(&checked) {
                constraints.insert(rule.name(), rule.message(path, &checked));
                if options.stop_at_first_error {
                    break;
                }
            }
        }

        match constraints.is_empty() {
            true => None,
            false => Some(ValidationError {
                property: path.to_string(),
                value,
                constraints,
            }),
        }
    }
}

impl ValidationEngine for SchemaEngine {
    fn validate_sync(
        &self,
        schema: &Schema,
        candidate: Document,
        options: &ValidatorOptions,
    ) -> Result<Document, ValidationFailure> {
        let mut errors = schema
            .fields()
            .iter()
            .filter_map(|(path, rules)| Self::check_field(path, rules, &candidate, &options.validator))
            .collect::<Vec<_>>();

        let strip = options.validator.whitelist || options.transformer.exclude_extraneous_values;
        let mut validated = Document::new();

        for (key, value) in candidate {
            if schema.declares(&key) {
                validated.insert(key, value);
            } else if options.validator.whitelist && options.validator.forbid_non_whitelisted {
                errors.push(ValidationError {
                    property: key.clone(),
                    value: Some(value),
                    constraints: doc! { "whitelistValidation": format!("property {key} should not exist") },
                });
            } else if !strip {
                validated.insert(key, value);
            }
        }

        match errors.is_empty() {
            true => Ok(validated),
            false => Err(ValidationFailure::Invalid(errors)),
        }
    }
}

/// Validates with a schema, then round-trips the candidate through `E`.
///
/// Candidates that pass the rules but do not deserialize into `E` are
/// rejected as invalid.
pub struct TypedEngine<E> {
    inner: SchemaEngine,
    _entity: PhantomData<fn() -> E>,
}

impl<E> Default for TypedEngine<E> {
    fn default() -> Self {
        Self {
            inner: SchemaEngine,
            _entity: PhantomData,
        }
    }
}

impl<E: Entity> ValidationEngine for TypedEngine<E> {
    fn validate_sync(
        &self,
        schema: &Schema,
        candidate: Document,
        options: &ValidatorOptions,
    ) -> Result<Document, ValidationFailure> {
        let validated = self.inner.validate_sync(schema, candidate, options)?;

        E::from_document(validated.clone())
            .and_then(|entity| entity.to_document())
            .map_err(|err| ValidationFailure::Invalid(vec![ValidationError {
                property: E::model_name().to_string(),
                value: Some(Bson::Document(validated)),
                constraints: doc! { "isTypeOf": err.message() },
            }]))
    }
}

/// Checks repository candidates before they are written.
#[derive(Clone)]
pub struct MangoValidator {
    enabled: bool,
    model_name: String,
    schema: Arc<Schema>,
    options: ValidatorOptions,
    engine: Arc<dyn ValidationEngine>,
}

impl fmt::Debug for MangoValidator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MangoValidator")
            .field("enabled", &self.enabled)
            .field("model_name", &self.model_name)
            .field("schema", &self.schema)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl MangoValidator {
    /// Validates plain documents against `schema`.
    pub fn new(schema: Schema, options: ValidatorOptions) -> Self {
        Self {
            enabled: options.enabled,
            model_name: schema.name().to_string(),
            schema: Arc::new(schema),
            options,
            engine: Arc::new(SchemaEngine),
        }
    }

    /// Validates against `E::schema()` and shapes candidates through `E`.
    pub fn for_entity<E: Entity>(options: ValidatorOptions) -> Self {
        Self {
            model_name: E::model_name().to_string(),
            engine: Arc::new(TypedEngine::<E>::default()),
            ..Self::new(E::schema(), options)
        }
    }

    /// A validator that accepts every candidate unchanged.
    pub fn disabled() -> Self {
        Self::new(Schema::new("Document"), ValidatorOptions::disabled())
    }

    pub fn with_engine(mut self, engine: Arc<dyn ValidationEngine>) -> Self {
        self.engine = engine;
        self
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    pub fn options(&self) -> &ValidatorOptions {
        &self.options
    }

    /// Validates `candidate`, awaiting the engine.
    ///
    /// # Errors
    ///
    /// Field failures become [`BadRequest`](crate::error::ErrorKind::BadRequest)
    /// errors, engine failures [`Internal`](crate::error::ErrorKind::Internal) ones.
    pub async fn check(&self, candidate: Document) -> MangoResult<Document> {
        if !self.enabled {
            return Ok(candidate);
        }

        self.engine
            .validate(&self.schema, candidate, &self.options)
            .await
            .map_err(|failure| self.handle_failure(failure))
    }

    /// Synchronous twin of [`check`](Self::check).
    pub fn check_sync(&self, candidate: Document) -> MangoResult<Document> {
        if !self.enabled {
            return Ok(candidate);
        }

        self.engine
            .validate_sync(&self.schema, candidate, &self.options)
            .map_err(|failure| self.handle_failure(failure))
    }

    fn handle_failure(&self, failure: ValidationFailure) -> MangoError {
        let error = match failure {
            ValidationFailure::Invalid(errors) => {
                let properties = errors
                    .iter()
                    .map(|error| error.property.as_str())
                    .collect::<Vec<_>>()
                    .join(",");

                debug!(target: "mango::validator", model = %self.model_name, %properties, "entity validation failure");

                MangoError::bad_request(format!("{} entity validation failure: [{properties}]", self.model_name))
                    .with_data(doc! { "errors": to_context(&errors) })
            },
            ValidationFailure::Engine(message) => MangoError::internal(message),
        };

        error.merge_data(doc! {
            "model_name": self.model_name.as_str(),
            "options": to_context(&self.options),
        })
    }
}
