//! Translator configuration.

use serde::{Deserialize, Serialize};

/// Query parameters that configure the result set instead of filtering it.
pub const RESERVED_KEYS: [&str; 6] = ["fields", "omit", "sort", "offset", "limit", "q"];

/// Options controlling how URL queries become criteria.
///
/// # Example
///
/// ```ignore
/// use mango_qs::QsOptions;
///
/// let options = QsOptions::default()
///     .with_full_text_fields(["make", "model"])
///     .with_max_limit(50);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QsOptions {
    /// Fields whose values are parsed as dates. When empty, any RFC 3339
    /// string is parsed as a date.
    pub date_fields: Vec<String>,
    /// Fields searched by the `q` parameter.
    pub full_text_fields: Vec<String>,
    /// Query parameters skipped in addition to the reserved ones.
    pub ignored_fields: Vec<String>,
    /// Upper bound applied to `limit`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_limit: Option<u64>,
    /// Fields whose values are parsed as object ids.
    pub object_id_fields: Vec<String>,
    /// Name of a single parameter that carries the actual query string.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameters: Option<String>,
}

fn owned(fields: impl IntoIterator<Item = impl Into<String>>) -> Vec<String> {
    fields.into_iter().map(Into::into).collect()
}

impl QsOptions {
    pub fn with_date_fields(mut self, fields: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.date_fields = owned(fields);
        self
    }

    pub fn with_full_text_fields(mut self, fields: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.full_text_fields = owned(fields);
        self
    }

    pub fn with_ignored_fields(mut self, fields: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.ignored_fields = owned(fields);
        self
    }

    pub fn with_max_limit(mut self, max_limit: u64) -> Self {
        self.max_limit = Some(max_limit);
        self
    }

    pub fn with_object_id_fields(mut self, fields: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.object_id_fields = owned(fields);
        self
    }

    pub fn with_parameters(mut self, parameter: impl Into<String>) -> Self {
        self.parameters = Some(parameter.into());
        self
    }

    /// Whether `key` is consumed as an option or ignored rather than used as criteria.
    pub fn is_skipped(&self, key: &str) -> bool {
        RESERVED_KEYS.contains(&key) || self.ignored_fields.iter().any(|field| field == key)
    }
}
