//! Query criteria AST and the visitor used to evaluate it.
//!
//! A MongoDB-style criteria document such as
//!
//! ```ignore
//! doc! { "year": { "$gte": 2000 }, "$or": [{ "make": "Scion" }, { "make": "Subaru" }] }
//! ```
//!
//! is parsed once with [`Expr::parse`] into an [`Expr`] tree, which any
//! [`QueryVisitor`] can then walk.

use bson::{Bson, Document};
use regex::{Regex, RegexBuilder};

use crate::error::{MingoError, MingoResult};

/// Placeholder field used to match scalar array elements in `$elemMatch`.
pub(crate) const ELEMENT_FIELD: &str = "__element";

/// Field comparison operators.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldOp {
    /// `$eq`, or a bare value.
    Eq,
    /// `$ne`
    Ne,
    /// `$gt`
    Gt,
    /// `$gte`
    Gte,
    /// `$lt`
    Lt,
    /// `$lte`
    Lte,
    /// `$in`: the field equals any listed value.
    In,
    /// `$nin`: the field equals none of the listed values.
    Nin,
    /// `$all`: the array field contains every listed value.
    All,
    /// `$size`: the array field has exactly this many elements.
    Size,
    /// `$mod`: `[divisor, remainder]`.
    Mod,
}

/// A parsed query predicate.
#[derive(Debug, Clone)]
pub enum Expr {
    /// All expressions must match.
    And(Vec<Expr>),
    /// Any expression must match.
    Or(Vec<Expr>),
    /// No expression may match.
    Nor(Vec<Expr>),
    /// Inverts the wrapped expression.
    Not(Box<Expr>),
    /// The field is present (`true`) or absent (`false`).
    Exists(String, bool),
    /// Field comparison.
    Field {
        field: String,
        op: FieldOp,
        value: Bson,
    },
    /// A string field matches the pattern.
    Regex {
        field: String,
        regex: Regex,
    },
    /// Some element of the array field matches the nested expression.
    ElemMatch {
        field: String,
        expr: Box<Expr>,
        /// Elements are scalars wrapped under a placeholder field.
        scalar: bool,
    },
}

impl Expr {
    /// Creates a field comparison expression.
    pub fn field(field: impl Into<String>, op: FieldOp, value: impl Into<Bson>) -> Self {
        Expr::Field { field: field.into(), op, value: value.into() }
    }

    /// Combines this expression with another using logical AND.
    pub fn and(self, other: Expr) -> Self {
        match self {
            Expr::And(mut list) => {
                list.push(other);
                Expr::And(list)
            }
            _ => Expr::And(vec![self, other]),
        }
    }

    /// Combines this expression with another using logical OR.
    pub fn or(self, other: Expr) -> Self {
        match self {
            Expr::Or(mut list) => {
                list.push(other);
                Expr::Or(list)
            }
            _ => Expr::Or(vec![self, other]),
        }
    }

    /// Negates this expression.
    pub fn not(self) -> Self {
        Expr::Not(Box::new(self))
    }

    /// Parses a criteria document. An empty document matches everything.
    ///
    /// # Errors
    ///
    /// Returns [`MingoError::UnknownQueryOperator`] for unsupported `$`
    /// operators and [`MingoError::InvalidQuery`] for malformed arguments.
    pub fn parse(criteria: &Document) -> MingoResult<Expr> {
        let mut exprs = Vec::with_capacity(criteria.len());

        for (key, value) in criteria {
            match key.as_str() {
                "$and" => exprs.push(Expr::And(parse_list(key, value)?)),
                "$or" => exprs.push(Expr::Or(parse_list(key, value)?)),
                "$nor" => exprs.push(Expr::Nor(parse_list(key, value)?)),
                "$comment" => {},
                op if op.starts_with('$') => {
                    return Err(MingoError::UnknownQueryOperator(op.to_string()));
                },
                field => exprs.push(parse_field(field, value)?),
            }
        }

        Ok(match exprs.len() {
            1 => exprs.remove(0),
            _ => Expr::And(exprs),
        })
    }
}

fn parse_list(op: &str, value: &Bson) -> MingoResult<Vec<Expr>> {
    let Bson::Array(items) = value else {
        return Err(MingoError::InvalidQuery(format!("{op} expects an array")));
    };

    if items.is_empty() {
        return Err(MingoError::InvalidQuery(format!("{op} expects a non-empty array")));
    }

    items
        .iter()
        .map(|item| match item {
            Bson::Document(doc) => Expr::parse(doc),
            _ => Err(MingoError::InvalidQuery(format!("{op} expects an array of documents"))),
        })
        .collect()
}

fn is_operator_document(doc: &Document) -> bool {
    doc.keys().next().is_some_and(|key| key.starts_with('$'))
}

fn parse_field(field: &str, value: &Bson) -> MingoResult<Expr> {
    match value {
        Bson::Document(ops) if is_operator_document(ops) => parse_operators(field, ops),
        Bson::RegularExpression(re) => Ok(Expr::Regex {
            field: field.to_string(),
            regex: build_regex(re.pattern.as_str(), re.options.as_str())?,
        }),
        _ => Ok(Expr::field(field, FieldOp::Eq, value.clone())),
    }
}

fn parse_operators(field: &str, ops: &Document) -> MingoResult<Expr> {
    let mut exprs = Vec::with_capacity(ops.len());

    for (op, arg) in ops {
        let expr = match op.as_str() {
            "$eq" => Expr::field(field, FieldOp::Eq, arg.clone()),
            "$ne" => Expr::field(field, FieldOp::Ne, arg.clone()),
            "$gt" => Expr::field(field, FieldOp::Gt, arg.clone()),
            "$gte" => Expr::field(field, FieldOp::Gte, arg.clone()),
            "$lt" => Expr::field(field, FieldOp::Lt, arg.clone()),
            "$lte" => Expr::field(field, FieldOp::Lte, arg.clone()),
            "$in" | "$nin" | "$all" => {
                if !matches!(arg, Bson::Array(_)) {
                    return Err(MingoError::InvalidQuery(format!("{op} expects an array")));
                }
                let field_op = match op.as_str() {
                    "$in" => FieldOp::In,
                    "$nin" => FieldOp::Nin,
                    _ => FieldOp::All,
                };
                Expr::field(field, field_op, arg.clone())
            },
            "$size" => match crate::value::as_i64(arg) {
                Some(size) if size >= 0 => Expr::field(field, FieldOp::Size, Bson::Int64(size)),
                _ => return Err(MingoError::InvalidQuery("$size expects a non-negative integer".into())),
            },
            "$mod" => match arg {
                Bson::Array(pair) if pair.len() == 2 && pair.iter().all(|v| crate::value::as_f64(v).is_some()) => {
                    if crate::value::as_f64(&pair[0]) == Some(0.0) {
                        return Err(MingoError::InvalidQuery("$mod divisor cannot be 0".into()));
                    }
                    Expr::field(field, FieldOp::Mod, arg.clone())
                },
                _ => return Err(MingoError::InvalidQuery("$mod expects [divisor, remainder]".into())),
            },
            "$exists" => Expr::Exists(field.to_string(), crate::value::is_truthy(arg)),
            "$regex" => {
                let options = match ops.get("$options") {
                    Some(Bson::String(options)) => options.as_str(),
                    _ => "",
                };
                match arg {
                    Bson::String(pattern) => Expr::Regex {
                        field: field.to_string(),
                        regex: build_regex(pattern, options)?,
                    },
                    Bson::RegularExpression(re) => Expr::Regex {
                        field: field.to_string(),
                        regex: build_regex(re.pattern.as_str(), re.options.as_str())?,
                    },
                    _ => return Err(MingoError::InvalidQuery("$regex expects a string pattern".into())),
                }
            },
            "$options" => continue,
            "$not" => match arg {
                Bson::Document(inner) if is_operator_document(inner) => parse_operators(field, inner)?.not(),
                Bson::RegularExpression(_) => parse_field(field, arg)?.not(),
                _ => return Err(MingoError::InvalidQuery("$not expects an operator document or regex".into())),
            },
            "$elemMatch" => match arg {
                Bson::Document(inner) if is_operator_document(inner) => Expr::ElemMatch {
                    field: field.to_string(),
                    expr: Box::new(parse_operators(ELEMENT_FIELD, inner)?),
                    scalar: true,
                },
                Bson::Document(inner) => Expr::ElemMatch {
                    field: field.to_string(),
                    expr: Box::new(Expr::parse(inner)?),
                    scalar: false,
                },
                _ => return Err(MingoError::InvalidQuery("$elemMatch expects a document".into())),
            },
            unknown => return Err(MingoError::UnknownQueryOperator(unknown.to_string())),
        };

        exprs.push(expr);
    }

    Ok(match exprs.len() {
        1 => exprs.remove(0),
        _ => Expr::And(exprs),
    })
}

/// Compiles a pattern with MongoDB-style option letters (`i`, `m`, `s`, `x`).
pub fn build_regex(pattern: &str, options: &str) -> MingoResult<Regex> {
    Ok(
        RegexBuilder::new(pattern)
            .case_insensitive(options.contains('i'))
            .multi_line(options.contains('m'))
            .dot_matches_new_line(options.contains('s'))
            .ignore_whitespace(options.contains('x'))
            .build()?
    )
}

/// Walks an [`Expr`] tree.
///
/// `visit_expr` dispatches on the node kind; implementors provide one method
/// per node.
pub trait QueryVisitor {
    type Output;
    type Error;

    fn visit_and(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error>;
    fn visit_or(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error>;
    fn visit_nor(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error>;
    fn visit_not(&mut self, expr: &Expr) -> Result<Self::Output, Self::Error>;
    fn visit_exists(
        &mut self,
        field: &str,
        should_exist: bool,
    ) -> Result<Self::Output, Self::Error>;
    fn visit_field(
        &mut self,
        field: &str,
        op: &FieldOp,
        value: &Bson,
    ) -> Result<Self::Output, Self::Error>;
    fn visit_regex(&mut self, field: &str, regex: &Regex) -> Result<Self::Output, Self::Error>;
    fn visit_elem_match(
        &mut self,
        field: &str,
        expr: &Expr,
        scalar: bool,
    ) -> Result<Self::Output, Self::Error>;

    fn visit_expr(&mut self, expr: &Expr) -> Result<Self::Output, Self::Error> {
        match expr {
            Expr::And(exprs) => self.visit_and(exprs),
            Expr::Or(exprs) => self.visit_or(exprs),
            Expr::Nor(exprs) => self.visit_nor(exprs),
            Expr::Not(expr) => self.visit_not(expr),
            Expr::Exists(field, should_exist) => self.visit_exists(field, *should_exist),
            Expr::Field { field, op, value } => self.visit_field(field, op, value),
            Expr::Regex { field, regex } => self.visit_regex(field, regex),
            Expr::ElemMatch { field, expr, scalar } => self.visit_elem_match(field, expr, *scalar),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[test]
    fn empty_criteria_is_an_empty_conjunction() {
        assert!(matches!(Expr::parse(&doc! {}), Ok(Expr::And(list)) if list.is_empty()));
    }

    #[test]
    fn single_field_collapses_to_comparison() {
        let expr = Expr::parse(&doc! { "make": "Scion" }).unwrap();

        assert!(matches!(expr, Expr::Field { ref field, op: FieldOp::Eq, .. } if field == "make"));
    }

    #[test]
    fn multiple_operators_on_a_field_are_conjoined() {
        let expr = Expr::parse(&doc! { "year": { "$gte": 1994, "$lt": 2000 } }).unwrap();

        assert!(matches!(expr, Expr::And(ref list) if list.len() == 2));
    }

    #[test]
    fn regex_operator_honors_options() {
        let expr = Expr::parse(&doc! { "make": { "$regex": "^sci", "$options": "i" } }).unwrap();

        match expr {
            Expr::Regex { regex, .. } => assert!(regex.is_match("Scion")),
            other => panic!("unexpected expression: {other:?}"),
        }
    }

    #[test]
    fn rejects_unknown_and_malformed_operators() {
        assert_eq!(
            Expr::parse(&doc! { "year": { "$near": 1 } }).unwrap_err(),
            MingoError::UnknownQueryOperator("$near".into()),
        );
        assert_eq!(
            Expr::parse(&doc! { "$where": "true" }).unwrap_err(),
            MingoError::UnknownQueryOperator("$where".into()),
        );
        assert!(matches!(Expr::parse(&doc! { "year": { "$in": 1 } }), Err(MingoError::InvalidQuery(_))));
        assert!(matches!(Expr::parse(&doc! { "$or": [] }), Err(MingoError::InvalidQuery(_))));
        assert!(matches!(Expr::parse(&doc! { "a": { "$regex": "(" } }), Err(MingoError::InvalidQuery(_))));
    }
}
