//! URL query inputs and query string decoding.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{QsError, QsResult};

/// A URL query, either raw (`"make=Scion&limit=2"`) or already split into an object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UrlQuery {
    String(String),
    Object(Map<String, Value>),
}

impl Default for UrlQuery {
    fn default() -> Self {
        UrlQuery::String(String::new())
    }
}

impl From<&str> for UrlQuery {
    fn from(query: &str) -> Self {
        UrlQuery::String(query.to_string())
    }
}

impl From<String> for UrlQuery {
    fn from(query: String) -> Self {
        UrlQuery::String(query)
    }
}

impl From<Map<String, Value>> for UrlQuery {
    fn from(query: Map<String, Value>) -> Self {
        UrlQuery::Object(query)
    }
}

impl TryFrom<Value> for UrlQuery {
    type Error = QsError;

    fn try_from(value: Value) -> QsResult<Self> {
        match value {
            Value::String(query) => Ok(UrlQuery::String(query)),
            Value::Object(query) => Ok(UrlQuery::Object(query)),
            Value::Null => Ok(UrlQuery::default()),
            other => Err(QsError::Malformed(format!("expected a string or an object, got {other}"))),
        }
    }
}

/// One `key[=value]` pair.
///
/// `value` is `None` when the pair had no `=` at all (`"make"`, `"year>2000"`).
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Pair {
    pub key: String,
    pub value: Option<Value>,
}

impl UrlQuery {
    /// Splits the query into decoded pairs, in order.
    pub(crate) fn pairs(&self) -> QsResult<Vec<Pair>> {
        match self {
            UrlQuery::String(query) => QueryDecoder::split(query),
            UrlQuery::Object(object) => Ok(
                object
                    .iter()
                    .map(|(key, value)| Pair { key: key.clone(), value: Some(value.clone()) })
                    .collect()
            ),
        }
    }

    /// Finds the raw value of a top-level parameter.
    pub(crate) fn parameter(&self, name: &str) -> QsResult<Option<String>> {
        Ok(
            self.pairs()?
                .into_iter()
                .find(|pair| pair.key == name)
                .and_then(|pair| match pair.value {
                    Some(Value::String(value)) => Some(value),
                    _ => None,
                })
        )
    }
}

/// Percent-decoding for `application/x-www-form-urlencoded` query strings.
pub(crate) struct QueryDecoder;

impl QueryDecoder {
    /// Splits `a=1&b=2` into pairs. A leading `?` is ignored, empty segments are skipped.
    pub(crate) fn split(query: &str) -> QsResult<Vec<Pair>> {
        let query = query.strip_prefix('?').unwrap_or(query);

        query
            .split('&')
            .filter(|segment| !segment.is_empty())
            .map(|segment| match segment.split_once('=') {
                Some((key, value)) => Ok(Pair {
                    key: Self::decode_component(key)?,
                    value: Some(Value::String(Self::decode_component(value)?)),
                }),
                None => Ok(Pair { key: Self::decode_component(segment)?, value: None }),
            })
            .collect()
    }

    /// Decodes `%XX` escapes and `+` as space. Stray `%` signs are kept literally.
    pub(crate) fn decode_component(input: &str) -> QsResult<String> {
        let bytes = input.as_bytes();
        let mut decoded = Vec::with_capacity(bytes.len());
        let mut index = 0;

        while index < bytes.len() {
            match bytes[index] {
                b'+' => decoded.push(b' '),
                b'%' => match (bytes.get(index + 1).and_then(Self::hex), bytes.get(index + 2).and_then(Self::hex)) {
                    (Some(high), Some(low)) => {
                        decoded.push(high << 4 | low);
                        index += 2;
                    },
                    _ => decoded.push(b'%'),
                },
                byte => decoded.push(byte),
            }
            index += 1;
        }

        String::from_utf8(decoded).map_err(|err| QsError::Malformed(err.to_string()))
    }

    fn hex(byte: &u8) -> Option<u8> {
        match byte {
            b'0'..=b'9' => Some(byte - b'0'),
            b'a'..=b'f' => Some(byte - b'a' + 10),
            b'A'..=b'F' => Some(byte - b'A' + 10),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_escapes_and_plus() {
        assert_eq!(QueryDecoder::decode_component("a%20b+c").unwrap(), "a b c");
        assert_eq!(QueryDecoder::decode_component("100%").unwrap(), "100%");
        assert_eq!(QueryDecoder::decode_component("%E2%9C%93").unwrap(), "\u{2713}");
        assert!(QueryDecoder::decode_component("%FF").is_err());
    }

    #[test]
    fn splits_pairs_in_order() {
        let pairs = UrlQuery::from("?make=Scion&&year>2000&sold").pairs().unwrap();

        assert_eq!(
            pairs,
            vec![
                Pair { key: "make".into(), value: Some(json!("Scion")) },
                Pair { key: "year>2000".into(), value: None },
                Pair { key: "sold".into(), value: None },
            ],
        );
    }

    #[test]
    fn converts_from_json_values() {
        assert_eq!(UrlQuery::try_from(json!("a=1")).unwrap(), UrlQuery::from("a=1"));
        assert!(matches!(UrlQuery::try_from(json!({ "a": 1 })), Ok(UrlQuery::Object(_))));
        assert!(UrlQuery::try_from(json!(5)).is_err());
    }
}
