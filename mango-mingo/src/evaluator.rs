//! Query expression evaluation against in-memory documents.

use std::cmp::Ordering;
use bson::{Bson, Document};
use regex::Regex;

use crate::{
    error::{MingoError, MingoResult},
    expr::{ELEMENT_FIELD, Expr, FieldOp, QueryVisitor},
    path,
    value::{as_f64, as_i64, compare, type_rank, values_equal},
};

/// Evaluates an [`Expr`] against a single document.
pub struct DocumentEvaluator<'a> {
    document: &'a Document,
}

impl<'a> DocumentEvaluator<'a> {
    pub fn new(document: &'a Document) -> Self {
        Self { document }
    }

    pub fn evaluate(&mut self, expr: &Expr) -> MingoResult<bool> {
        self.visit_expr(expr)
    }

    /// Positions of the documents matching `expr`, in collection order.
    pub fn matching_indices(documents: &[Document], expr: &Expr) -> MingoResult<Vec<usize>> {
        let mut matched = Vec::new();

        for (index, document) in documents.iter().enumerate() {
            if DocumentEvaluator::new(document).evaluate(expr)? {
                matched.push(index);
            }
        }

        Ok(matched)
    }

    /// Clones the documents matching `expr`, in collection order.
    pub fn filter_documents(documents: &[Document], expr: &Expr) -> MingoResult<Vec<Document>> {
        Ok(
            Self::matching_indices(documents, expr)?
                .into_iter()
                .map(|index| documents[index].clone())
                .collect()
        )
    }
}

/// Every candidate a single resolved value offers to a comparison: the value
/// itself and, for arrays, each of its elements.
fn candidates(value: &Bson) -> impl Iterator<Item = &Bson> {
    let elements: &[Bson] = match value {
        Bson::Array(items) => items,
        _ => &[],
    };

    std::iter::once(value).chain(elements.iter())
}

fn matches_eq(leaves: &[&Bson], expected: &Bson) -> bool {
    if leaves.is_empty() {
        return matches!(expected, Bson::Null);
    }

    leaves
        .iter()
        .any(|leaf| candidates(*leaf).any(|candidate| match expected {
            Bson::RegularExpression(re) => candidate_matches_regex(candidate, re.pattern.as_str(), re.options.as_str()),
            _ => values_equal(candidate, expected),
        }))
}

fn candidate_matches_regex(candidate: &Bson, pattern: &str, options: &str) -> bool {
    match (candidate, crate::expr::build_regex(pattern, options)) {
        (Bson::String(text), Ok(regex)) => regex.is_match(text),
        _ => false,
    }
}

fn matches_range(leaves: &[&Bson], expected: &Bson, accept: fn(Ordering) -> bool) -> bool {
    leaves
        .iter()
        .flat_map(|leaf| candidates(*leaf))
        .filter(|candidate| type_rank(candidate) == type_rank(expected))
        .any(|candidate| accept(compare(candidate, expected)))
}

fn expected_list(value: &Bson) -> MingoResult<&[Bson]> {
    match value {
        Bson::Array(items) => Ok(items),
        _ => Err(MingoError::InvalidQuery("expected an array of values".into())),
    }
}

impl QueryVisitor for DocumentEvaluator<'_> {
    type Output = bool;
    type Error = MingoError;

    fn visit_and(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error> {
        for expr in exprs {
            if !self.visit_expr(expr)? {
                return Ok(false);
            }
        }

        Ok(true)
    }

    fn visit_or(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error> {
        for expr in exprs {
            if self.visit_expr(expr)? {
                return Ok(true);
            }
        }

        Ok(false)
    }

    fn visit_nor(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error> {
        Ok(!self.visit_or(exprs)?)
    }

    fn visit_not(&mut self, expr: &Expr) -> Result<Self::Output, Self::Error> {
        Ok(!self.visit_expr(expr)?)
    }

    fn visit_exists(&mut self, field: &str, should_exist: bool) -> Result<Self::Output, Self::Error> {
        Ok(!path::resolve(self.document, field).is_empty() == should_exist)
    }

    fn visit_field(&mut self, field: &str, op: &FieldOp, value: &Bson) -> Result<Self::Output, Self::Error> {
        let leaves = path::resolve(self.document, field);

        Ok(match op {
            FieldOp::Eq => matches_eq(&leaves, value),
            FieldOp::Ne => !matches_eq(&leaves, value),
            FieldOp::Gt => matches_range(&leaves, value, Ordering::is_gt),
            FieldOp::Gte => matches_range(&leaves, value, Ordering::is_ge),
            FieldOp::Lt => matches_range(&leaves, value, Ordering::is_lt),
            FieldOp::Lte => matches_range(&leaves, value, Ordering::is_le),
            FieldOp::In => expected_list(value)?
                .iter()
                .any(|expected| matches_eq(&leaves, expected)),
            FieldOp::Nin => !expected_list(value)?
                .iter()
                .any(|expected| matches_eq(&leaves, expected)),
            FieldOp::All => {
                let expected = expected_list(value)?;
                !expected.is_empty() && expected.iter().all(|item| matches_eq(&leaves, item))
            },
            FieldOp::Size => {
                let size = as_i64(value).unwrap_or(-1);
                leaves
                    .iter()
                    .any(|leaf| matches!(leaf, Bson::Array(items) if items.len() as i64 == size))
            },
            FieldOp::Mod => {
                let pair = expected_list(value)?;
                let (divisor, remainder) = match (
                    pair.first().and_then(as_f64).and_then(truncated),
                    pair.get(1).and_then(as_f64).and_then(truncated),
                ) {
                    (Some(d), Some(r)) => (d, r),
                    _ => return Err(MingoError::InvalidQuery("$mod expects [divisor, remainder]".into())),
                };
                leaves
                    .iter()
                    .flat_map(|leaf| candidates(*leaf))
                    .filter_map(as_f64)
                    .filter_map(truncated)
                    .any(|number| divisor != 0 && number.wrapping_rem(divisor) == remainder)
            },
        })
    }

    fn visit_regex(&mut self, field: &str, regex: &Regex) -> Result<Self::Output, Self::Error> {
        Ok(
            path::resolve(self.document, field)
                .iter()
                .flat_map(|leaf| candidates(*leaf))
                .any(|candidate| matches!(candidate, Bson::String(text) if regex.is_match(text)))
        )
    }

    fn visit_elem_match(&mut self, field: &str, expr: &Expr, scalar: bool) -> Result<Self::Output, Self::Error> {
        for leaf in path::resolve(self.document, field) {
            let Bson::Array(items) = leaf else { continue };

            for item in items {
                let matched = match (scalar, item) {
                    (true, _) => {
                        let mut wrapper = Document::new();
                        wrapper.insert(ELEMENT_FIELD, item.clone());
                        DocumentEvaluator::new(&wrapper).evaluate(expr)?
                    },
                    (false, Bson::Document(element)) => DocumentEvaluator::new(element).evaluate(expr)?,
                    (false, _) => false,
                };

                if matched {
                    return Ok(true);
                }
            }
        }

        Ok(false)
    }
}

/// Integer part of `number` when it fits an `i64`.
fn truncated(number: f64) -> Option<i64> {
    let number = number.trunc();
    (number.is_finite() && number >= i64::MIN as f64 && number < i64::MAX as f64).then_some(number as i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    fn matches(document: &Document, criteria: Document) -> bool {
        let expr = Expr::parse(&criteria).unwrap();
        DocumentEvaluator::new(document).evaluate(&expr).unwrap()
    }

    fn car() -> Document {
        doc! {
            "vin": "3221085d-6f55-4d23-842a-aeb0e413fca8",
            "make": "Scion",
            "model": "tC",
            "model_year": 2010,
            "tags": ["coupe", "compact"],
            "owners": [{ "name": "ann", "years": 3 }, { "name": "bob", "years": 1 }],
        }
    }

    #[test]
    fn equality_and_comparison() {
        let car = car();

        assert!(matches(&car, doc! { "make": "Scion" }));
        assert!(!matches(&car, doc! { "make": "Subaru" }));
        assert!(matches(&car, doc! { "model_year": { "$gte": 2010.0 } }));
        assert!(!matches(&car, doc! { "model_year": { "$gt": 2010 } }));
        assert!(!matches(&car, doc! { "model_year": { "$gt": "1999" } }));
        assert!(matches(&car, doc! { "make": { "$ne": "Subaru" } }));
    }

    #[test]
    fn missing_fields_equal_null() {
        let car = car();

        assert!(matches(&car, doc! { "color": null }));
        assert!(matches(&car, doc! { "color": { "$exists": false } }));
        assert!(!matches(&car, doc! { "make": { "$exists": false } }));
    }

    #[test]
    fn arrays_match_elements_and_whole_values() {
        let car = car();

        assert!(matches(&car, doc! { "tags": "coupe" }));
        assert!(matches(&car, doc! { "tags": ["coupe", "compact"] }));
        assert!(matches(&car, doc! { "tags": { "$all": ["compact", "coupe"] } }));
        assert!(matches(&car, doc! { "tags": { "$size": 2 } }));
        assert!(matches(&car, doc! { "owners.name": "bob" }));
        assert!(matches(&car, doc! { "tags": { "$in": ["sedan", "coupe"] } }));
        assert!(matches(&car, doc! { "tags": { "$nin": ["sedan"] } }));
    }

    #[test]
    fn logical_operators() {
        let car = car();

        assert!(matches(&car, doc! { "$or": [{ "make": "Subaru" }, { "model": "tC" }] }));
        assert!(!matches(&car, doc! { "$and": [{ "make": "Scion" }, { "model": "Aveo" }] }));
        assert!(matches(&car, doc! { "$nor": [{ "make": "Subaru" }] }));
        assert!(matches(&car, doc! { "model_year": { "$not": { "$lt": 2000 } } }));
    }

    #[test]
    fn regex_mod_and_elem_match() {
        let car = car();

        assert!(matches(&car, doc! { "make": { "$regex": "^sc", "$options": "i" } }));
        assert!(matches(&car, doc! { "model_year": { "$mod": [5, 0] } }));
        assert!(matches(&car, doc! { "owners": { "$elemMatch": { "name": "ann", "years": { "$gt": 2 } } } }));
        assert!(!matches(&car, doc! { "owners": { "$elemMatch": { "name": "bob", "years": { "$gt": 2 } } } }));
        assert!(matches(&car, doc! { "tags": { "$elemMatch": { "$regex": "^comp" } } }));
    }

    #[test]
    fn mod_handles_extreme_operands() {
        let floor = doc! { "n": i64::MIN };
        let huge = doc! { "n": -1e19 };

        assert!(matches(&floor, doc! { "n": { "$mod": [-1, 0] } }));
        assert!(!matches(&huge, doc! { "n": { "$mod": [-1, 0] } }));
        assert!(!matches(&doc! { "n": f64::NAN }, doc! { "n": { "$mod": [2, 0] } }));
        assert!(!matches(&floor, doc! { "n": { "$mod": [0, 0] } }));

        let expr = Expr::parse(&doc! { "n": { "$mod": [1e19, 0] } }).unwrap();
        assert!(matches!(
            DocumentEvaluator::new(&floor).evaluate(&expr),
            Err(MingoError::InvalidQuery(_))
        ));
    }

    #[test]
    fn matching_indices_preserve_collection_order() {
        let documents = vec![
            doc! { "n": 3 },
            doc! { "n": 1 },
            doc! { "n": 2 },
        ];
        let expr = Expr::parse(&doc! { "n": { "$gte": 2 } }).unwrap();

        assert_eq!(DocumentEvaluator::matching_indices(&documents, &expr).unwrap(), vec![0, 2]);
    }
}
