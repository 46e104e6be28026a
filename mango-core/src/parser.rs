//! URL query translation for finders.
//!
//! [`MangoParser`] turns a URL query into [`SearchParams`] through a
//! [`QueryStringParser`], by default [`QsToMongo`].

use std::{fmt, sync::Arc};

use bson::doc;
use mango_qs::{ParsedOptions, ParsedQuery, QsError, QsOptions, QsToMongo, UrlQuery};

use crate::{
    document::to_context,
    error::{MangoError, MangoResult},
    query::{QueryCriteriaOptions, SearchParams},
};

/// Options handed to the URL query translator.
pub type MangoParserOptions = QsOptions;

/// Translates URL queries into criteria and result options.
pub trait QueryStringParser: Send + Sync {
    /// # Errors
    ///
    /// Fails on malformed input.
    fn parse(&self, query: &UrlQuery, options: &MangoParserOptions) -> Result<ParsedQuery, QsError>;
}

impl QueryStringParser for QsToMongo {
    fn parse(&self, query: &UrlQuery, options: &MangoParserOptions) -> Result<ParsedQuery, QsError> {
        QsToMongo::parse(query, options)
    }
}

/// Builds [`SearchParams`] from URL queries.
///
/// Object id fields and the wrapped-parameter option are cleared on
/// construction: stored identities are plain strings or integers.
///
/// # Example
///
/// ```ignore
/// use mango_core::parser::{MangoParser, MangoParserOptions};
///
/// let parser = MangoParser::new(MangoParserOptions::default());
/// let params = parser.params("make=Scion&sort=-model_year&limit=2")?;
///
/// assert_eq!(params.options.limit, Some(2));
/// ```
#[derive(Clone)]
pub struct MangoParser {
    options: MangoParserOptions,
    parser: Arc<dyn QueryStringParser>,
}

impl fmt::Debug for MangoParser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MangoParser")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl Default for MangoParser {
    fn default() -> Self {
        Self::new(MangoParserOptions::default())
    }
}

impl MangoParser {
    pub fn new(mut options: MangoParserOptions) -> Self {
        options.object_id_fields = Vec::new();
        options.parameters = None;

        Self {
            options,
            parser: Arc::new(QsToMongo),
        }
    }

    /// Replaces the translator.
    pub fn with_parser(mut self, parser: Arc<dyn QueryStringParser>) -> Self {
        self.parser = parser;
        self
    }

    pub fn options(&self) -> &MangoParserOptions {
        &self.options
    }

    /// Translates `query` into search parameters.
    ///
    /// # Errors
    ///
    /// Translator failures become [`BadRequest`](crate::error::ErrorKind::BadRequest)
    /// errors carrying `{ parser_options, query }`.
    pub fn params(&self, query: impl Into<UrlQuery>) -> MangoResult<SearchParams> {
        let query = query.into();

        let parsed = self.parser.parse(&query, &self.options).map_err(|err| {
            MangoError::from(err).with_data(doc! {
                "parser_options": to_context(&self.options),
                "query": to_context(&query),
            })
        })?;

        Ok(
            SearchParams::new(parsed.criteria)
                .with_options(Self::query_criteria_options(&parsed.options))
        )
    }

    /// Maps translator options onto finder options.
    pub fn query_criteria_options(options: &ParsedOptions) -> QueryCriteriaOptions {
        QueryCriteriaOptions {
            project: options.projection.clone(),
            sort: options.sort.clone(),
            skip: options.skip,
            limit: options.limit,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use bson::{Bson, doc};

    #[test]
    fn new_strips_translator_only_options() {
        let parser = MangoParser::new(
            MangoParserOptions::default()
                .with_object_id_fields(["owner"])
                .with_parameters("filter")
                .with_max_limit(10),
        );

        assert!(parser.options().object_id_fields.is_empty());
        assert_eq!(parser.options().parameters, None);
        assert_eq!(parser.options().max_limit, Some(10));
    }

    #[test]
    fn params_split_criteria_and_options() {
        let params = MangoParser::default()
            .params("make=Scion&fields=make,model&sort=-model_year&offset=1&limit=2")
            .unwrap();

        assert_eq!(params.criteria, doc! { "make": "Scion" });
        assert_eq!(params.options.project, Some(doc! { "make": 1, "model": 1 }));
        assert_eq!(params.options.sort, Some(doc! { "model_year": -1 }));
        assert_eq!(params.options.skip, Some(1));
        assert_eq!(params.options.limit, Some(2));
    }

    #[test]
    fn translator_failures_are_bad_requests_with_context() {
        let err = MangoParser::default().params("q=will cause error").unwrap_err();

        assert_eq!(err.kind(), ErrorKind::BadRequest);
        assert_eq!(err.data().get("query"), Some(&Bson::String("q=will cause error".into())));
        assert!(err.data().get_document("parser_options").is_ok());
    }
}
