//! Translation of URL queries into criteria and result options.

use bson::{Bson, Document, oid::ObjectId};
use chrono::{DateTime, NaiveDate};
use regex::RegexBuilder;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    criteria::{CompareOp, Condition, ConditionVisitor, CriteriaTranslator, merge_criteria},
    error::{QsError, QsResult},
    options::QsOptions,
    query::{Pair, UrlQuery},
};

/// Result-shaping options taken from the reserved keys.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParsedOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub projection: Option<Document>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sort: Option<Document>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,
}

/// A translated URL query.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParsedQuery {
    pub criteria: Document,
    pub options: ParsedOptions,
}

/// Translates URL query parameters into MongoDB criteria.
///
/// # Example
///
/// ```ignore
/// use mango_qs::{QsOptions, QsToMongo};
///
/// let parsed = QsToMongo::parse(&"make=Scion&year>=2000&sort=-year&limit=5".into(), &QsOptions::default())?;
///
/// assert_eq!(parsed.criteria, bson::doc! { "make": "Scion", "year": { "$gte": 2000 } });
/// assert_eq!(parsed.options.limit, Some(5));
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct QsToMongo;

impl QsToMongo {
    /// Parses `query` according to `options`.
    ///
    /// # Errors
    ///
    /// Fails on malformed reserved keys, undecodable input, invalid regexes,
    /// or typed fields whose values do not parse.
    pub fn parse(query: &UrlQuery, options: &QsOptions) -> QsResult<ParsedQuery> {
        let query = match &options.parameters {
            Some(name) => match query.parameter(name)? {
                Some(inner) => UrlQuery::String(inner),
                None => query.clone(),
            },
            None => query.clone(),
        };

        let pairs = query.pairs()?;
        let mut parsed = ParsedQuery { options: Self::parse_options(&pairs, options)?, ..Default::default() };

        for pair in pairs.iter().filter(|pair| !options.is_skipped(&pair.key)) {
            let condition = Self::parse_condition(pair, options)?;
            merge_criteria(&mut parsed.criteria, CriteriaTranslator.visit_condition(&condition)?);
        }

        if let Some(text) = Self::reserved(&pairs, "q")
            .map(|value| Self::text(value, "q"))
            .transpose()?
            .filter(|text| !text.trim().is_empty())
        {
            let condition = Self::full_text(text.trim(), options)?;
            merge_criteria(&mut parsed.criteria, CriteriaTranslator.visit_condition(&condition)?);
        }

        Ok(parsed)
    }

    fn reserved<'a>(pairs: &'a [Pair], key: &str) -> Option<&'a Value> {
        pairs
            .iter()
            .rev()
            .find(|pair| pair.key == key)
            .and_then(|pair| pair.value.as_ref())
    }

    fn text(value: &Value, key: &str) -> QsResult<String> {
        match value {
            Value::String(text) => Ok(text.clone()),
            Value::Number(number) => Ok(number.to_string()),
            Value::Array(items) => items
                .iter()
                .map(|item| Self::text(item, key))
                .collect::<QsResult<Vec<_>>>()
                .map(|items| items.join(",")),
            _ => Err(QsError::UnsupportedValue(key.to_string())),
        }
    }

    fn parse_options(pairs: &[Pair], options: &QsOptions) -> QsResult<ParsedOptions> {
        let mut parsed = ParsedOptions::default();
        let mut projection = Document::new();

        if let Some(fields) = Self::reserved(pairs, "fields") {
            for field in Self::field_list(&Self::text(fields, "fields")?, "fields")? {
                match field.strip_prefix('-') {
                    Some(excluded) => projection.insert(excluded, 0),
                    None => projection.insert(field.trim_start_matches('+'), 1),
                };
            }
        }

        if let Some(omit) = Self::reserved(pairs, "omit") {
            for field in Self::field_list(&Self::text(omit, "omit")?, "omit")? {
                projection.insert(field, 0);
            }
        }

        if !projection.is_empty() {
            parsed.projection = Some(projection);
        }

        if let Some(sort) = Self::reserved(pairs, "sort") {
            let mut spec = Document::new();
            for field in Self::field_list(&Self::text(sort, "sort")?, "sort")? {
                match field.strip_prefix('-') {
                    Some(descending) => spec.insert(descending, -1),
                    None => spec.insert(field.trim_start_matches('+'), 1),
                };
            }
            parsed.sort = Some(spec);
        }

        if let Some(limit) = Self::reserved(pairs, "limit") {
            let limit = Self::count(limit).ok_or_else(|| QsError::InvalidLimit(limit.to_string()))?;
            parsed.limit = Some(match options.max_limit {
                Some(max) => limit.min(max),
                None => limit,
            });
        }

        if let Some(offset) = Self::reserved(pairs, "offset") {
            parsed.skip = Some(Self::count(offset).ok_or_else(|| QsError::InvalidOffset(offset.to_string()))?);
        }

        Ok(parsed)
    }

    fn field_list(list: &str, key: &str) -> QsResult<Vec<String>> {
        list.split(',')
            .map(str::trim)
            .map(|field| match field.trim_start_matches(['-', '+']) {
                "" => Err(QsError::InvalidFieldList(key.to_string(), list.to_string())),
                _ => Ok(field.to_string()),
            })
            .collect()
    }

    fn count(value: &Value) -> Option<u64> {
        match value {
            Value::Number(number) => number.as_u64(),
            Value::String(text) => text.trim().parse::<u64>().ok(),
            _ => None,
        }
    }

    fn full_text(text: &str, options: &QsOptions) -> QsResult<Condition> {
        if options.full_text_fields.is_empty() {
            return Err(QsError::MissingFullTextFields);
        }

        let pattern = regex::escape(text);

        Ok(Condition::Any(
            options
                .full_text_fields
                .iter()
                .map(|field| Condition::Regex {
                    field: field.clone(),
                    pattern: pattern.clone(),
                    options: "i".to_string(),
                    negated: false,
                })
                .collect(),
        ))
    }

    /// Splits a key into field and comparison, e.g. `year>` with a value, or `year>2000` without one.
    fn parse_condition(pair: &Pair, options: &QsOptions) -> QsResult<Condition> {
        let key = pair.key.trim();

        let (field, op, raw) = match &pair.value {
            Some(value) => {
                let (field, op) = match key.char_indices().last() {
                    Some((at, '!')) => (&key[..at], CompareOp::Ne),
                    Some((at, '>')) => (&key[..at], CompareOp::Gte),
                    Some((at, '<')) => (&key[..at], CompareOp::Lte),
                    _ => (key, CompareOp::Eq),
                };
                (field, op, value.clone())
            },
            None => match key.find(['>', '<']) {
                Some(at) => {
                    let op = match &key[at..at + 1] {
                        ">" => CompareOp::Gt,
                        _ => CompareOp::Lt,
                    };
                    (&key[..at], op, Value::String(key[at + 1..].to_string()))
                },
                None => {
                    return Ok(match key.strip_prefix('!') {
                        Some(field) => Condition::Exists { field: field.to_string(), exists: false },
                        None => Condition::Exists { field: key.to_string(), exists: true },
                    });
                },
            },
        };

        let field = field.trim();
        if field.is_empty() {
            return Err(QsError::Malformed(pair.key.clone()));
        }

        if let Value::String(text) = &raw {
            if let Some((pattern, flags)) = Self::regex_literal(text) {
                RegexBuilder::new(pattern)
                    .build()
                    .map_err(|err| QsError::InvalidRegex(text.clone(), err.to_string()))?;

                return match op {
                    CompareOp::Eq | CompareOp::Ne => Ok(Condition::Regex {
                        field: field.to_string(),
                        pattern: pattern.to_string(),
                        options: flags.to_string(),
                        negated: op == CompareOp::Ne,
                    }),
                    _ => Err(QsError::UnsupportedValue(field.to_string())),
                };
            }
        }

        let list = match &raw {
            Value::Array(items) => Some(items.clone()),
            Value::String(text) if text.contains(',') => Some(
                text.split(',')
                    .map(|item| Value::String(item.to_string()))
                    .collect(),
            ),
            _ => None,
        };

        match list {
            Some(items) => {
                let op = match op {
                    CompareOp::Eq => CompareOp::In,
                    CompareOp::Ne => CompareOp::Nin,
                    _ => return Err(QsError::UnsupportedValue(field.to_string())),
                };
                let values = items
                    .iter()
                    .map(|item| Self::coerce(field, item, options))
                    .collect::<QsResult<Vec<_>>>()?;

                Ok(Condition::Compare { field: field.to_string(), op, value: Bson::Array(values) })
            },
            None => Ok(Condition::Compare {
                field: field.to_string(),
                op,
                value: Self::coerce(field, &raw, options)?,
            }),
        }
    }

    /// Recognizes `/pattern/flags`.
    fn regex_literal(text: &str) -> Option<(&str, &str)> {
        let rest = text.strip_prefix('/')?;
        let end = rest.rfind('/')?;
        let (pattern, flags) = (&rest[..end], &rest[end + 1..]);

        match flags.chars().all(|flag| "imsx".contains(flag)) {
            true => Some((pattern, flags)),
            false => None,
        }
    }

    fn coerce(field: &str, value: &Value, options: &QsOptions) -> QsResult<Bson> {
        let text = match value {
            Value::String(text) => text.as_str(),
            Value::Null => return Ok(Bson::Null),
            Value::Bool(flag) => return Ok(Bson::Boolean(*flag)),
            Value::Number(number) => return Self::number(field, number),
            Value::Array(_) | Value::Object(_) => return Err(QsError::UnsupportedValue(field.to_string())),
        };

        if options.object_id_fields.iter().any(|name| name == field) {
            return ObjectId::parse_str(text)
                .map(Bson::ObjectId)
                .map_err(|_| QsError::InvalidObjectId(field.to_string(), text.to_string()));
        }

        if options.date_fields.iter().any(|name| name == field) {
            return Self::date(text).ok_or_else(|| QsError::InvalidDate(field.to_string(), text.to_string()));
        }

        Ok(match text {
            "true" => Bson::Boolean(true),
            "false" => Bson::Boolean(false),
            "null" => Bson::Null,
            _ => {
                if let Ok(integer) = text.parse::<i64>() {
                    match i32::try_from(integer) {
                        Ok(small) => Bson::Int32(small),
                        Err(_) => Bson::Int64(integer),
                    }
                } else if let Some(float) = text.parse::<f64>().ok().filter(|float| float.is_finite()) {
                    Bson::Double(float)
                } else if options.date_fields.is_empty() && DateTime::parse_from_rfc3339(text).is_ok() {
                    Self::date(text).unwrap_or_else(|| Bson::String(text.to_string()))
                } else {
                    Bson::String(text.to_string())
                }
            },
        })
    }

    fn number(field: &str, number: &serde_json::Number) -> QsResult<Bson> {
        if let Some(integer) = number.as_i64() {
            return Ok(match i32::try_from(integer) {
                Ok(small) => Bson::Int32(small),
                Err(_) => Bson::Int64(integer),
            });
        }

        number
            .as_f64()
            .map(Bson::Double)
            .ok_or_else(|| QsError::UnsupportedValue(field.to_string()))
    }

    /// RFC 3339 timestamps, plain `YYYY-MM-DD` dates, or epoch milliseconds.
    fn date(text: &str) -> Option<Bson> {
        if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
            return Some(Bson::DateTime(bson::DateTime::from_chrono(parsed)));
        }

        if let Some(midnight) = NaiveDate::parse_from_str(text, "%Y-%m-%d")
            .ok()
            .and_then(|date| date.and_hms_opt(0, 0, 0))
        {
            return Some(Bson::DateTime(bson::DateTime::from_chrono(midnight.and_utc())));
        }

        text.parse::<i64>()
            .ok()
            .map(|millis| Bson::DateTime(bson::DateTime::from_millis(millis)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;
    use serde_json::json;

    fn parse(query: &str) -> ParsedQuery {
        QsToMongo::parse(&query.into(), &QsOptions::default()).unwrap()
    }

    #[test]
    fn plain_values_are_coerced() {
        let parsed = parse("make=Scion&year=2010&price=19.5&sold=false&owner=null");

        assert_eq!(
            parsed.criteria,
            doc! { "make": "Scion", "year": 2010, "price": 19.5, "sold": false, "owner": Bson::Null },
        );
        assert_eq!(parsed.options, ParsedOptions::default());
    }

    #[test]
    fn key_operators() {
        let parsed = parse("year>=2000&year<=2010&price>100&miles<5000&make!=Tesla&sold&!recalled");

        assert_eq!(
            parsed.criteria,
            doc! {
                "year": { "$gte": 2000, "$lte": 2010 },
                "price": { "$gt": 100 },
                "miles": { "$lt": 5000 },
                "make": { "$ne": "Tesla" },
                "sold": { "$exists": true },
                "recalled": { "$exists": false },
            },
        );
    }

    #[test]
    fn lists_and_regexes() {
        let parsed = parse("make=Scion,Subaru&color!=red,blue&model=/^im/i");

        assert_eq!(
            parsed.criteria,
            doc! {
                "make": { "$in": ["Scion", "Subaru"] },
                "color": { "$nin": ["red", "blue"] },
                "model": { "$regex": "^im", "$options": "i" },
            },
        );
        assert!(matches!(
            QsToMongo::parse(&"model=/(/".into(), &QsOptions::default()),
            Err(QsError::InvalidRegex(_, _)),
        ));
    }

    #[test]
    fn reserved_keys_become_options() {
        let parsed = parse("fields=make,-updated_at&omit=vin&sort=-year,+make&offset=10&limit=5&make=Scion");

        assert_eq!(parsed.criteria, doc! { "make": "Scion" });
        assert_eq!(
            parsed.options,
            ParsedOptions {
                projection: Some(doc! { "make": 1, "updated_at": 0, "vin": 0 }),
                sort: Some(doc! { "year": -1, "make": 1 }),
                skip: Some(10),
                limit: Some(5),
            },
        );
    }

    #[test]
    fn limit_is_capped_and_validated() {
        let options = QsOptions::default().with_max_limit(20);
        let parsed = QsToMongo::parse(&"limit=500".into(), &options).unwrap();
        assert_eq!(parsed.options.limit, Some(20));

        assert!(matches!(QsToMongo::parse(&"limit=-1".into(), &options), Err(QsError::InvalidLimit(_))));
        assert!(matches!(QsToMongo::parse(&"offset=abc".into(), &options), Err(QsError::InvalidOffset(_))));
        assert!(matches!(QsToMongo::parse(&"sort=a,,b".into(), &options), Err(QsError::InvalidFieldList(_, _))));
    }

    #[test]
    fn full_text_search_needs_fields() {
        assert_eq!(
            QsToMongo::parse(&"q=will cause error".into(), &QsOptions::default()),
            Err(QsError::MissingFullTextFields),
        );

        let options = QsOptions::default().with_full_text_fields(["make", "model"]);
        let parsed = QsToMongo::parse(&"q=im.p".into(), &options).unwrap();

        assert_eq!(
            parsed.criteria,
            doc! { "$or": [
                { "make": { "$regex": "im\\.p", "$options": "i" } },
                { "model": { "$regex": "im\\.p", "$options": "i" } },
            ] },
        );
    }

    #[test]
    fn typed_fields() {
        let options = QsOptions::default()
            .with_date_fields(["created_at"])
            .with_object_id_fields(["owner"]);
        let parsed = QsToMongo::parse(&"created_at>=2020-01-01&owner=507f1f77bcf86cd799439011".into(), &options).unwrap();

        assert_eq!(
            parsed.criteria.get_document("created_at").unwrap().get("$gte"),
            Some(&Bson::DateTime(bson::DateTime::from_millis(1_577_836_800_000))),
        );
        assert!(matches!(parsed.criteria.get("owner"), Some(Bson::ObjectId(_))));

        assert!(matches!(QsToMongo::parse(&"created_at=soon".into(), &options), Err(QsError::InvalidDate(_, _))));
        assert!(matches!(QsToMongo::parse(&"owner=nope".into(), &options), Err(QsError::InvalidObjectId(_, _))));
    }

    #[test]
    fn rfc3339_strings_are_dates_without_date_fields() {
        let parsed = parse("seen=2020-01-01T00:00:00Z&code=2020-01-01");

        assert_eq!(parsed.criteria.get("seen"), Some(&Bson::DateTime(bson::DateTime::from_millis(1_577_836_800_000))));
        assert_eq!(parsed.criteria.get("code"), Some(&Bson::String("2020-01-01".into())));
    }

    #[test]
    fn object_queries_and_wrapped_parameters() {
        let query = UrlQuery::try_from(json!({ "make": ["Scion", "Subaru"], "year>": 2000, "limit": 2 })).unwrap();
        let parsed = QsToMongo::parse(&query, &QsOptions::default()).unwrap();

        assert_eq!(parsed.criteria, doc! { "make": { "$in": ["Scion", "Subaru"] }, "year": { "$gte": 2000 } });
        assert_eq!(parsed.options.limit, Some(2));

        let options = QsOptions::default().with_parameters("filter");
        let parsed = QsToMongo::parse(&"filter=make%3DScion%26limit%3D1".into(), &options).unwrap();
        assert_eq!(parsed.criteria, doc! { "make": "Scion" });
        assert_eq!(parsed.options.limit, Some(1));
    }

    #[test]
    fn ignored_fields_are_skipped() {
        let options = QsOptions::default().with_ignored_fields(["token"]);
        let parsed = QsToMongo::parse(&"token=abc&make=Scion".into(), &options).unwrap();

        assert_eq!(parsed.criteria, doc! { "make": "Scion" });
    }
}
