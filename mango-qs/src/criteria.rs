//! Query conditions and their translation into MongoDB criteria.
//!
//! Each URL parameter becomes one [`Condition`]. The [`CriteriaTranslator`]
//! turns a condition into a single-field criteria document, and
//! [`merge_criteria`] folds those documents together so that
//! `year>=2000&year<=2010` yields `{ year: { $gte: 2000, $lte: 2010 } }`.

use bson::{Bson, Document, doc};

use crate::error::{QsError, QsResult};

/// Comparison applied by a [`Condition::Compare`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
    Nin,
}

impl CompareOp {
    /// Parses the operator between a key and its value (`""`, `"!"`, `">"`, `">="`, ...).
    pub fn from_symbol(symbol: &str) -> Option<Self> {
        match symbol {
            "" => Some(CompareOp::Eq),
            "!" => Some(CompareOp::Ne),
            ">" => Some(CompareOp::Gt),
            ">=" => Some(CompareOp::Gte),
            "<" => Some(CompareOp::Lt),
            "<=" => Some(CompareOp::Lte),
            _ => None,
        }
    }

    fn operator(&self) -> &'static str {
        match self {
            CompareOp::Eq => "$eq",
            CompareOp::Ne => "$ne",
            CompareOp::Gt => "$gt",
            CompareOp::Gte => "$gte",
            CompareOp::Lt => "$lt",
            CompareOp::Lte => "$lte",
            CompareOp::In => "$in",
            CompareOp::Nin => "$nin",
        }
    }
}

/// A single filter derived from the query string.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Exists { field: String, exists: bool },
    Compare { field: String, op: CompareOp, value: Bson },
    Regex { field: String, pattern: String, options: String, negated: bool },
    Any(Vec<Condition>),
}

/// Walks a [`Condition`] tree.
pub trait ConditionVisitor {
    type Output;
    type Error;

    fn visit_condition(&mut self, condition: &Condition) -> Result<Self::Output, Self::Error> {
        match condition {
            Condition::Exists { field, exists } => self.visit_exists(field, *exists),
            Condition::Compare { field, op, value } => self.visit_compare(field, op, value),
            Condition::Regex { field, pattern, options, negated } => self.visit_regex(field, pattern, options, *negated),
            Condition::Any(conditions) => self.visit_any(conditions),
        }
    }

    fn visit_exists(&mut self, field: &str, exists: bool) -> Result<Self::Output, Self::Error>;
    fn visit_compare(&mut self, field: &str, op: &CompareOp, value: &Bson) -> Result<Self::Output, Self::Error>;
    fn visit_regex(
        &mut self,
        field: &str,
        pattern: &str,
        options: &str,
        negated: bool,
    ) -> Result<Self::Output, Self::Error>;
    fn visit_any(&mut self, conditions: &[Condition]) -> Result<Self::Output, Self::Error>;
}

/// Translates conditions into MongoDB query documents.
pub(crate) struct CriteriaTranslator;

impl ConditionVisitor for CriteriaTranslator {
    type Output = Document;
    type Error = QsError;

    fn visit_exists(&mut self, field: &str, exists: bool) -> QsResult<Document> {
        Ok(doc! {
            field: { "$exists": exists },
        })
    }

    fn visit_compare(&mut self, field: &str, op: &CompareOp, value: &Bson) -> QsResult<Document> {
        if matches!(op, CompareOp::In | CompareOp::Nin) && !matches!(value, Bson::Array(_)) {
            return Err(QsError::UnsupportedValue(field.to_string()));
        }

        Ok(match op {
            CompareOp::Eq => doc! { field: value.clone() },
            _ => doc! { field: { op.operator(): value.clone() } },
        })
    }

    fn visit_regex(&mut self, field: &str, pattern: &str, options: &str, negated: bool) -> QsResult<Document> {
        let regex = doc! { "$regex": pattern, "$options": options };

        Ok(match negated {
            true => doc! { field: { "$not": regex } },
            false => doc! { field: regex },
        })
    }

    fn visit_any(&mut self, conditions: &[Condition]) -> QsResult<Document> {
        Ok(doc! {
            "$or": conditions
                .iter()
                .map(|condition| self.visit_condition(condition))
                .collect::<QsResult<Vec<_>>>()?,
        })
    }
}

fn is_operator_document(doc: &Document) -> bool {
    doc.keys().next().is_some_and(|key| key.starts_with('$'))
}

fn is_operator_value(value: &Bson) -> bool {
    matches!(value, Bson::Document(doc) if is_operator_document(doc))
}

/// Folds a translated condition into `criteria`.
///
/// Operator documents on the same field are merged, repeated equality values
/// collapse into `$in`, and anything that cannot be merged in place is
/// appended to a top-level `$and`.
pub(crate) fn merge_criteria(criteria: &mut Document, addition: Document) {
    for (key, value) in addition {
        let leftover = match criteria.get_mut(&key) {
            Some(existing) if !key.starts_with('$') => merge_value(existing, value),
            Some(_) => Some(value),
            None => {
                criteria.insert(key, value);
                continue;
            },
        };

        if let Some(value) = leftover {
            let clause = Bson::Document(doc! { key: value });
            match criteria.get_mut("$and") {
                Some(Bson::Array(clauses)) => clauses.push(clause),
                _ => {
                    criteria.insert("$and", vec![clause]);
                },
            }
        }
    }
}

/// Merges `value` into `existing`, handing it back when the two cannot share a field.
fn merge_value(existing: &mut Bson, value: Bson) -> Option<Bson> {
    match (existing, value) {
        (Bson::Document(ops), Bson::Document(more))
            if is_operator_document(ops)
                && is_operator_document(&more)
                && !more.keys().any(|op| ops.contains_key(op)) =>
        {
            ops.extend(more);
            None
        },
        (Bson::Document(ops), value) if ops.len() == 1 && !is_operator_value(&value) => match ops.get_mut("$in") {
            Some(Bson::Array(values)) => {
                values.push(value);
                None
            },
            _ => Some(value),
        },
        (existing, value) if !is_operator_value(existing) && !is_operator_value(&value) => {
            let first = std::mem::replace(existing, Bson::Null);
            *existing = Bson::Document(doc! { "$in": [first, value] });
            None
        },
        (_, value) => Some(value),
    }
}
