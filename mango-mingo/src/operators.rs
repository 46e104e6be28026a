//! Aggregation expression operators and group accumulators.
//!
//! Expressions follow MongoDB conventions: `"$field.path"` reads from the
//! current document, `"$$ROOT"` / `"$$CURRENT"` name the document itself,
//! `{ "$op": args }` applies a registered operator, and any other document or
//! array is evaluated element by element.

use std::{collections::HashMap, sync::Arc};
use bson::{Bson, DateTime, Document};

use crate::{
    error::{MingoError, MingoResult},
    path,
    value::{compare, int_to_bson, is_truthy, values_equal},
};

/// An expression operator: receives the raw (unevaluated) operator argument.
pub type OperatorFn = Arc<dyn Fn(&ExpressionContext<'_>, &Bson) -> MingoResult<Bson> + Send + Sync>;

/// A `$group` accumulator: receives one evaluated value per grouped document,
/// `None` where the expression resolved to a missing field.
pub type AccumulatorFn = Arc<dyn Fn(&[Option<Bson>]) -> MingoResult<Bson> + Send + Sync>;

/// Evaluation scope for a single document.
pub struct ExpressionContext<'a> {
    root: &'a Document,
    operators: &'a HashMap<String, OperatorFn>,
}

impl<'a> ExpressionContext<'a> {
    pub fn new(root: &'a Document, operators: &'a HashMap<String, OperatorFn>) -> Self {
        Self { root, operators }
    }

    pub fn root(&self) -> &Document {
        self.root
    }

    /// Evaluates `expr`, returning `None` when it names a missing field.
    pub fn resolve(&self, expr: &Bson) -> MingoResult<Option<Bson>> {
        match expr {
            Bson::String(text) if text.starts_with("$$") => self.variable(&text[2..]),
            Bson::String(text) if text.starts_with('$') => Ok(path::get_value(self.root, &text[1..])),
            Bson::Document(doc) => match doc.iter().next() {
                Some((key, arg)) if key.starts_with('$') => {
                    if doc.len() != 1 {
                        return Err(MingoError::InvalidExpression(format!(
                            "an operator document must have a single key, found {}",
                            doc.len(),
                        )));
                    }

                    let operator = self
                        .operators
                        .get(key.as_str())
                        .ok_or_else(|| MingoError::UnknownOperator(key.clone()))?;

                    operator(self, arg).map(Some)
                },
                _ => {
                    let mut out = Document::new();
                    for (key, value) in doc {
                        if let Some(value) = self.resolve(value)? {
                            out.insert(key.clone(), value);
                        }
                    }
                    Ok(Some(Bson::Document(out)))
                },
            },
            Bson::Array(items) => Ok(Some(Bson::Array(
                items
                    .iter()
                    .map(|item| self.evaluate(item))
                    .collect::<MingoResult<Vec<_>>>()?
            ))),
            other => Ok(Some(other.clone())),
        }
    }

    /// Evaluates `expr`; missing fields evaluate to null.
    pub fn evaluate(&self, expr: &Bson) -> MingoResult<Bson> {
        Ok(self.resolve(expr)?.unwrap_or(Bson::Null))
    }

    /// Evaluates operator arguments: each element of an array, or a lone value.
    pub fn arguments(&self, args: &Bson) -> MingoResult<Vec<Bson>> {
        match args {
            Bson::Array(items) => items.iter().map(|item| self.evaluate(item)).collect(),
            other => Ok(vec![self.evaluate(other)?]),
        }
    }

    fn arguments_exact<const N: usize>(&self, name: &str, args: &Bson) -> MingoResult<[Bson; N]> {
        let values = self.arguments(args)?;
        let count = values.len();

        values
            .try_into()
            .map_err(|_| MingoError::InvalidExpression(format!("{name} expects {N} argument(s), got {count}")))
    }

    fn variable(&self, name: &str) -> MingoResult<Option<Bson>> {
        let (variable, rest) = match name.split_once('.') {
            Some((variable, rest)) => (variable, Some(rest)),
            None => (name, None),
        };

        match (variable, rest) {
            ("ROOT" | "CURRENT", None) => Ok(Some(Bson::Document(self.root.clone()))),
            ("ROOT" | "CURRENT", Some(rest)) => Ok(path::get_value(self.root, rest)),
            ("REMOVE", _) => Ok(None),
            _ => Err(MingoError::InvalidExpression(format!("unknown variable $${variable}"))),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Number {
    Int(i64),
    Float(f64),
}

impl Number {
    fn from_bson(value: &Bson) -> Option<Self> {
        match value {
            Bson::Int32(v) => Some(Number::Int(*v as i64)),
            Bson::Int64(v) => Some(Number::Int(*v)),
            Bson::Double(v) => Some(Number::Float(*v)),
            _ => None,
        }
    }

    fn as_f64(self) -> f64 {
        match self {
            Number::Int(v) => v as f64,
            Number::Float(v) => v,
        }
    }

    fn into_bson(self) -> Bson {
        match self {
            Number::Int(v) => int_to_bson(v),
            Number::Float(v) => Bson::Double(v),
        }
    }

    fn combine(self, other: Number, int_op: fn(i64, i64) -> Option<i64>, float_op: fn(f64, f64) -> f64) -> Number {
        match (self, other) {
            (Number::Int(a), Number::Int(b)) => match int_op(a, b) {
                Some(value) => Number::Int(value),
                None => Number::Float(float_op(a as f64, b as f64)),
            },
            (a, b) => Number::Float(float_op(a.as_f64(), b.as_f64())),
        }
    }
}

fn numeric(name: &str, value: &Bson) -> MingoResult<Number> {
    Number::from_bson(value)
        .ok_or_else(|| MingoError::InvalidExpression(format!("{name} only supports numeric types, got {value}")))
}

fn is_nullish(value: &Bson) -> bool {
    matches!(value, Bson::Null | Bson::Undefined)
}

fn op_add(ctx: &ExpressionContext<'_>, args: &Bson) -> MingoResult<Bson> {
    let values = ctx.arguments(args)?;
    if values.iter().any(is_nullish) {
        return Ok(Bson::Null);
    }

    let mut date: Option<i64> = None;
    let mut total = Number::Int(0);

    for value in &values {
        match value {
            Bson::DateTime(dt) if date.is_none() => date = Some(dt.timestamp_millis()),
            Bson::DateTime(_) => return Err(MingoError::InvalidExpression("$add supports only one date".into())),
            other => total = total.combine(numeric("$add", other)?, i64::checked_add, |a, b| a + b),
        }
    }

    Ok(match date {
        Some(millis) => Bson::DateTime(DateTime::from_millis(shift_millis("$add", millis, total.as_f64(), i64::checked_add)?)),
        None => total.into_bson(),
    })
}

fn date_overflow(op: &str) -> MingoError {
    MingoError::InvalidExpression(format!("{op} overflows the date range"))
}

/// Applies a millisecond offset to a date, rejecting results outside `i64`.
fn shift_millis(op: &str, millis: i64, offset: f64, shift: fn(i64, i64) -> Option<i64>) -> MingoResult<i64> {
    let offset = offset.trunc();

    if !offset.is_finite() || offset < i64::MIN as f64 || offset >= i64::MAX as f64 {
        return Err(date_overflow(op));
    }

    shift(millis, offset as i64).ok_or_else(|| date_overflow(op))
}

fn op_subtract(ctx: &ExpressionContext<'_>, args: &Bson) -> MingoResult<Bson> {
    let [left, right] = ctx.arguments_exact::<2>("$subtract", args)?;

    Ok(match (&left, &right) {
        (l, r) if is_nullish(l) || is_nullish(r) => Bson::Null,
        (Bson::DateTime(a), Bson::DateTime(b)) => Bson::Int64(
            a.timestamp_millis()
                .checked_sub(b.timestamp_millis())
                .ok_or_else(|| date_overflow("$subtract"))?,
        ),
        (Bson::DateTime(a), other) => Bson::DateTime(DateTime::from_millis(shift_millis(
            "$subtract",
            a.timestamp_millis(),
            numeric("$subtract", other)?.as_f64(),
            i64::checked_sub,
        )?)),
        (l, r) => numeric("$subtract", l)?
            .combine(numeric("$subtract", r)?, i64::checked_sub, |a, b| a - b)
            .into_bson(),
    })
}

fn op_multiply(ctx: &ExpressionContext<'_>, args: &Bson) -> MingoResult<Bson> {
    let values = ctx.arguments(args)?;
    if values.iter().any(is_nullish) {
        return Ok(Bson::Null);
    }

    let mut product = Number::Int(1);
    for value in &values {
        product = product.combine(numeric("$multiply", value)?, i64::checked_mul, |a, b| a * b);
    }

    Ok(product.into_bson())
}

fn op_divide(ctx: &ExpressionContext<'_>, args: &Bson) -> MingoResult<Bson> {
    let [left, right] = ctx.arguments_exact::<2>("$divide", args)?;
    if is_nullish(&left) || is_nullish(&right) {
        return Ok(Bson::Null);
    }

    let divisor = numeric("$divide", &right)?.as_f64();
    if divisor == 0.0 {
        return Err(MingoError::InvalidExpression("$divide by zero".into()));
    }

    Ok(Bson::Double(numeric("$divide", &left)?.as_f64() / divisor))
}

fn op_mod(ctx: &ExpressionContext<'_>, args: &Bson) -> MingoResult<Bson> {
    let [left, right] = ctx.arguments_exact::<2>("$mod", args)?;
    if is_nullish(&left) || is_nullish(&right) {
        return Ok(Bson::Null);
    }

    let (dividend, divisor) = (numeric("$mod", &left)?, numeric("$mod", &right)?);
    if divisor.as_f64() == 0.0 {
        return Err(MingoError::InvalidExpression("$mod by zero".into()));
    }

    Ok(dividend.combine(divisor, i64::checked_rem, |a, b| a % b).into_bson())
}

fn op_abs(ctx: &ExpressionContext<'_>, args: &Bson) -> MingoResult<Bson> {
    let [value] = ctx.arguments_exact::<1>("$abs", args)?;

    Ok(match value {
        v if is_nullish(&v) => Bson::Null,
        v => match numeric("$abs", &v)? {
            Number::Int(i) => match i.checked_abs() {
                Some(abs) => int_to_bson(abs),
                None => Bson::Double((i as f64).abs()),
            },
            Number::Float(f) => Bson::Double(f.abs()),
        },
    })
}

fn comparison(name: &'static str, accept: fn(std::cmp::Ordering) -> bool) -> OperatorFn {
    Arc::new(move |ctx: &ExpressionContext<'_>, args: &Bson| -> MingoResult<Bson> {
        let [left, right] = ctx.arguments_exact::<2>(name, args)?;
        Ok(Bson::Boolean(accept(compare(&left, &right))))
    })
}

fn op_cmp(ctx: &ExpressionContext<'_>, args: &Bson) -> MingoResult<Bson> {
    let [left, right] = ctx.arguments_exact::<2>("$cmp", args)?;

    Ok(Bson::Int32(compare(&left, &right) as i32))
}

fn op_and(ctx: &ExpressionContext<'_>, args: &Bson) -> MingoResult<Bson> {
    Ok(Bson::Boolean(ctx.arguments(args)?.iter().all(is_truthy)))
}

fn op_or(ctx: &ExpressionContext<'_>, args: &Bson) -> MingoResult<Bson> {
    Ok(Bson::Boolean(ctx.arguments(args)?.iter().any(is_truthy)))
}

fn op_not(ctx: &ExpressionContext<'_>, args: &Bson) -> MingoResult<Bson> {
    let [value] = ctx.arguments_exact::<1>("$not", args)?;

    Ok(Bson::Boolean(!is_truthy(&value)))
}

fn op_cond(ctx: &ExpressionContext<'_>, args: &Bson) -> MingoResult<Bson> {
    let (condition, then, otherwise) = match args {
        Bson::Document(doc) => match (doc.get("if"), doc.get("then"), doc.get("else")) {
            (Some(c), Some(t), Some(e)) => (c, t, e),
            _ => return Err(MingoError::InvalidExpression("$cond requires if, then and else".into())),
        },
        Bson::Array(items) if items.len() == 3 => (&items[0], &items[1], &items[2]),
        _ => return Err(MingoError::InvalidExpression("$cond expects a document or 3 arguments".into())),
    };

    match is_truthy(&ctx.evaluate(condition)?) {
        true => ctx.evaluate(then),
        false => ctx.evaluate(otherwise),
    }
}

fn op_if_null(ctx: &ExpressionContext<'_>, args: &Bson) -> MingoResult<Bson> {
    let Bson::Array(items) = args else {
        return Err(MingoError::InvalidExpression("$ifNull expects an array".into()));
    };

    let Some((fallback, candidates)) = items.split_last() else {
        return Err(MingoError::InvalidExpression("$ifNull expects at least 2 arguments".into()));
    };

    for candidate in candidates {
        let value = ctx.evaluate(candidate)?;
        if !is_nullish(&value) {
            return Ok(value);
        }
    }

    ctx.evaluate(fallback)
}

fn op_concat(ctx: &ExpressionContext<'_>, args: &Bson) -> MingoResult<Bson> {
    let mut out = String::new();

    for value in ctx.arguments(args)? {
        match value {
            Bson::String(text) => out.push_str(&text),
            v if is_nullish(&v) => return Ok(Bson::Null),
            other => return Err(MingoError::InvalidExpression(format!("$concat only supports strings, got {other}"))),
        }
    }

    Ok(Bson::String(out))
}

fn string_argument(name: &str, value: Bson) -> MingoResult<String> {
    match value {
        Bson::String(text) => Ok(text),
        v if is_nullish(&v) => Ok(String::new()),
        Bson::Int32(v) => Ok(v.to_string()),
        Bson::Int64(v) => Ok(v.to_string()),
        Bson::Double(v) => Ok(v.to_string()),
        other => Err(MingoError::InvalidExpression(format!("{name} expects a string, got {other}"))),
    }
}

fn op_to_upper(ctx: &ExpressionContext<'_>, args: &Bson) -> MingoResult<Bson> {
    let [value] = ctx.arguments_exact::<1>("$toUpper", args)?;

    Ok(Bson::String(string_argument("$toUpper", value)?.to_uppercase()))
}

fn op_to_lower(ctx: &ExpressionContext<'_>, args: &Bson) -> MingoResult<Bson> {
    let [value] = ctx.arguments_exact::<1>("$toLower", args)?;

    Ok(Bson::String(string_argument("$toLower", value)?.to_lowercase()))
}

fn op_trim(ctx: &ExpressionContext<'_>, args: &Bson) -> MingoResult<Bson> {
    let Bson::Document(spec) = args else {
        return Err(MingoError::InvalidExpression("$trim expects { input, chars }".into()));
    };

    let input = match spec.get("input") {
        Some(input) => ctx.evaluate(input)?,
        None => return Err(MingoError::InvalidExpression("$trim requires input".into())),
    };
    if is_nullish(&input) {
        return Ok(Bson::Null);
    }
    let input = string_argument("$trim", input)?;

    Ok(Bson::String(match spec.get("chars") {
        Some(chars) => {
            let chars = string_argument("$trim", ctx.evaluate(chars)?)?;
            input.trim_matches(|c| chars.contains(c)).to_string()
        },
        None => input.trim().to_string(),
    }))
}

fn op_str_len_cp(ctx: &ExpressionContext<'_>, args: &Bson) -> MingoResult<Bson> {
    let [value] = ctx.arguments_exact::<1>("$strLenCP", args)?;

    match value {
        Bson::String(text) => Ok(int_to_bson(text.chars().count() as i64)),
        other => Err(MingoError::InvalidExpression(format!("$strLenCP expects a string, got {other}"))),
    }
}

fn op_split(ctx: &ExpressionContext<'_>, args: &Bson) -> MingoResult<Bson> {
    let [value, delimiter] = ctx.arguments_exact::<2>("$split", args)?;

    match (value, delimiter) {
        (v, _) if is_nullish(&v) => Ok(Bson::Null),
        (Bson::String(text), Bson::String(delimiter)) if !delimiter.is_empty() => Ok(Bson::Array(
            text.split(delimiter.as_str()).map(Bson::from).collect()
        )),
        _ => Err(MingoError::InvalidExpression("$split expects a string and a non-empty delimiter".into())),
    }
}

fn op_strcasecmp(ctx: &ExpressionContext<'_>, args: &Bson) -> MingoResult<Bson> {
    let [left, right] = ctx.arguments_exact::<2>("$strcasecmp", args)?;
    let left = string_argument("$strcasecmp", left)?.to_lowercase();
    let right = string_argument("$strcasecmp", right)?.to_lowercase();

    Ok(Bson::Int32(left.cmp(&right) as i32))
}

fn op_size(ctx: &ExpressionContext<'_>, args: &Bson) -> MingoResult<Bson> {
    let [value] = ctx.arguments_exact::<1>("$size", args)?;

    match value {
        Bson::Array(items) => Ok(int_to_bson(items.len() as i64)),
        other => Err(MingoError::InvalidExpression(format!("$size expects an array, got {other}"))),
    }
}

fn op_array_elem_at(ctx: &ExpressionContext<'_>, args: &Bson) -> MingoResult<Bson> {
    let [array, index] = ctx.arguments_exact::<2>("$arrayElemAt", args)?;

    let items = match array {
        Bson::Array(items) => items,
        v if is_nullish(&v) => return Ok(Bson::Null),
        _ => return Err(MingoError::InvalidExpression("$arrayElemAt expects an array".into())),
    };
    let Number::Int(index) = numeric("$arrayElemAt", &index)? else {
        return Err(MingoError::InvalidExpression("$arrayElemAt expects an integer index".into()));
    };

    let position = match index {
        i if i < 0 => items.len() as i64 + i,
        i => i,
    };

    Ok(
        usize::try_from(position)
            .ok()
            .and_then(|p| items.get(p).cloned())
            .unwrap_or(Bson::Null)
    )
}

fn op_in(ctx: &ExpressionContext<'_>, args: &Bson) -> MingoResult<Bson> {
    let [value, array] = ctx.arguments_exact::<2>("$in", args)?;

    match array {
        Bson::Array(items) => Ok(Bson::Boolean(items.iter().any(|item| values_equal(item, &value)))),
        other => Err(MingoError::InvalidExpression(format!("$in expects an array, got {other}"))),
    }
}

fn op_is_array(ctx: &ExpressionContext<'_>, args: &Bson) -> MingoResult<Bson> {
    let [value] = ctx.arguments_exact::<1>("$isArray", args)?;

    Ok(Bson::Boolean(matches!(value, Bson::Array(_))))
}

fn op_literal(_: &ExpressionContext<'_>, args: &Bson) -> MingoResult<Bson> {
    Ok(args.clone())
}

/// The default expression operator registry.
pub fn builtin_operators() -> HashMap<String, OperatorFn> {
    let plain: [(&str, fn(&ExpressionContext<'_>, &Bson) -> MingoResult<Bson>); 26] = [
        ("$add", op_add),
        ("$subtract", op_subtract),
        ("$multiply", op_multiply),
        ("$divide", op_divide),
        ("$mod", op_mod),
        ("$abs", op_abs),
        ("$cmp", op_cmp),
        ("$and", op_and),
        ("$or", op_or),
        ("$not", op_not),
        ("$cond", op_cond),
        ("$ifNull", op_if_null),
        ("$concat", op_concat),
        ("$toUpper", op_to_upper),
        ("$toLower", op_to_lower),
        ("$trim", op_trim),
        ("$strLenCP", op_str_len_cp),
        ("$split", op_split),
        ("$strcasecmp", op_strcasecmp),
        ("$size", op_size),
        ("$arrayElemAt", op_array_elem_at),
        ("$in", op_in),
        ("$isArray", op_is_array),
        ("$literal", op_literal),
        ("$max", op_max),
        ("$min", op_min),
    ];

    let mut operators = plain
        .into_iter()
        .map(|(name, f)| (name.to_string(), Arc::new(f) as OperatorFn))
        .collect::<HashMap<_, _>>();

    let comparisons: [(&'static str, fn(std::cmp::Ordering) -> bool); 6] = [
        ("$eq", std::cmp::Ordering::is_eq),
        ("$ne", std::cmp::Ordering::is_ne),
        ("$gt", std::cmp::Ordering::is_gt),
        ("$gte", std::cmp::Ordering::is_ge),
        ("$lt", std::cmp::Ordering::is_lt),
        ("$lte", std::cmp::Ordering::is_le),
    ];
    for (name, accept) in comparisons {
        operators.insert(name.to_string(), comparison(name, accept));
    }

    operators
}

fn op_max(ctx: &ExpressionContext<'_>, args: &Bson) -> MingoResult<Bson> {
    let values = ctx.arguments(args)?.into_iter().map(Some).collect::<Vec<_>>();
    acc_max(&values)
}

fn op_min(ctx: &ExpressionContext<'_>, args: &Bson) -> MingoResult<Bson> {
    let values = ctx.arguments(args)?.into_iter().map(Some).collect::<Vec<_>>();
    acc_min(&values)
}

fn present(values: &[Option<Bson>]) -> impl Iterator<Item = &Bson> {
    values.iter().flatten().filter(|value| !is_nullish(value))
}

fn acc_sum(values: &[Option<Bson>]) -> MingoResult<Bson> {
    let total = present(values)
        .filter_map(Number::from_bson)
        .fold(Number::Int(0), |total, n| total.combine(n, i64::checked_add, |a, b| a + b));

    Ok(total.into_bson())
}

fn acc_avg(values: &[Option<Bson>]) -> MingoResult<Bson> {
    let numbers = present(values)
        .filter_map(Number::from_bson)
        .map(Number::as_f64)
        .collect::<Vec<_>>();

    Ok(match numbers.is_empty() {
        true => Bson::Null,
        false => Bson::Double(numbers.iter().sum::<f64>() / numbers.len() as f64),
    })
}

fn acc_min(values: &[Option<Bson>]) -> MingoResult<Bson> {
    Ok(
        present(values)
            .min_by(|a, b| compare(a, b))
            .cloned()
            .unwrap_or(Bson::Null)
    )
}

fn acc_max(values: &[Option<Bson>]) -> MingoResult<Bson> {
    Ok(
        present(values)
            .max_by(|a, b| compare(a, b))
            .cloned()
            .unwrap_or(Bson::Null)
    )
}

fn acc_first(values: &[Option<Bson>]) -> MingoResult<Bson> {
    Ok(values.first().cloned().flatten().unwrap_or(Bson::Null))
}

fn acc_last(values: &[Option<Bson>]) -> MingoResult<Bson> {
    Ok(values.last().cloned().flatten().unwrap_or(Bson::Null))
}

fn acc_push(values: &[Option<Bson>]) -> MingoResult<Bson> {
    Ok(Bson::Array(values.iter().flatten().cloned().collect()))
}

fn acc_add_to_set(values: &[Option<Bson>]) -> MingoResult<Bson> {
    let mut set: Vec<Bson> = Vec::new();

    for value in values.iter().flatten() {
        if !set.iter().any(|existing| values_equal(existing, value)) {
            set.push(value.clone());
        }
    }

    Ok(Bson::Array(set))
}

fn acc_count(values: &[Option<Bson>]) -> MingoResult<Bson> {
    Ok(int_to_bson(values.len() as i64))
}

/// The default `$group` accumulator registry.
pub fn builtin_accumulators() -> HashMap<String, AccumulatorFn> {
    let plain: [(&str, fn(&[Option<Bson>]) -> MingoResult<Bson>); 9] = [
        ("$sum", acc_sum),
        ("$avg", acc_avg),
        ("$min", acc_min),
        ("$max", acc_max),
        ("$first", acc_first),
        ("$last", acc_last),
        ("$push", acc_push),
        ("$addToSet", acc_add_to_set),
        ("$count", acc_count),
    ];

    plain
        .into_iter()
        .map(|(name, f)| (name.to_string(), Arc::new(f) as AccumulatorFn))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    fn eval(expr: Bson, root: &Document) -> MingoResult<Bson> {
        let operators = builtin_operators();
        ExpressionContext::new(root, &operators).evaluate(&expr)
    }

    #[test]
    fn field_paths_and_variables() {
        let root = doc! { "make": "Scion", "engine": { "hp": 161 } };

        assert_eq!(eval(Bson::String("$engine.hp".into()), &root), Ok(Bson::Int32(161)));
        assert_eq!(eval(Bson::String("$missing".into()), &root), Ok(Bson::Null));
        assert_eq!(eval(Bson::String("$$ROOT.make".into()), &root), Ok(Bson::String("Scion".into())));
        assert_eq!(eval(Bson::String("$$CURRENT".into()), &root), Ok(Bson::Document(root.clone())));
        assert!(matches!(eval(Bson::String("$$NOPE".into()), &root), Err(MingoError::InvalidExpression(_))));
    }

    #[test]
    fn arithmetic_keeps_integers_narrow() {
        let root = doc! { "a": 2, "b": 3_i64, "c": 0.5 };

        assert_eq!(eval(Bson::Document(doc! { "$add": ["$a", "$b"] }), &root), Ok(Bson::Int32(5)));
        assert_eq!(eval(Bson::Document(doc! { "$add": ["$a", "$c"] }), &root), Ok(Bson::Double(2.5)));
        assert_eq!(eval(Bson::Document(doc! { "$multiply": ["$a", "$b", 2] }), &root), Ok(Bson::Int32(12)));
        assert_eq!(eval(Bson::Document(doc! { "$subtract": ["$b", "$a"] }), &root), Ok(Bson::Int32(1)));
        assert_eq!(eval(Bson::Document(doc! { "$divide": ["$b", "$a"] }), &root), Ok(Bson::Double(1.5)));
        assert_eq!(eval(Bson::Document(doc! { "$add": ["$a", null] }), &root), Ok(Bson::Null));
        assert!(eval(Bson::Document(doc! { "$divide": ["$a", 0] }), &root).is_err());
    }

    #[test]
    fn date_arithmetic_rejects_overflow() {
        let root = doc! {
            "at": DateTime::from_millis(1_000),
            "latest": DateTime::from_millis(i64::MAX),
            "earliest": DateTime::from_millis(i64::MIN),
        };

        assert_eq!(
            eval(Bson::Document(doc! { "$add": ["$at", 500] }), &root),
            Ok(Bson::DateTime(DateTime::from_millis(1_500)))
        );
        assert_eq!(
            eval(Bson::Document(doc! { "$subtract": ["$at", "$at"] }), &root),
            Ok(Bson::Int64(0))
        );
        assert!(matches!(
            eval(Bson::Document(doc! { "$add": ["$latest", 1] }), &root),
            Err(MingoError::InvalidExpression(_))
        ));
        assert!(matches!(
            eval(Bson::Document(doc! { "$add": ["$at", 1e30] }), &root),
            Err(MingoError::InvalidExpression(_))
        ));
        assert!(matches!(
            eval(Bson::Document(doc! { "$subtract": ["$latest", "$earliest"] }), &root),
            Err(MingoError::InvalidExpression(_))
        ));
        assert!(matches!(
            eval(Bson::Document(doc! { "$subtract": ["$earliest", 1] }), &root),
            Err(MingoError::InvalidExpression(_))
        ));
    }

    #[test]
    fn conditionals_and_strings() {
        let root = doc! { "make": "Scion", "model": "tC", "year": 2010 };

        assert_eq!(
            eval(Bson::Document(doc! { "$concat": ["$make", " ", "$model"] }), &root),
            Ok(Bson::String("Scion tC".into())),
        );
        assert_eq!(
            eval(Bson::Document(doc! { "$cond": { "if": { "$gte": ["$year", 2000] }, "then": "new", "else": "old" } }), &root),
            Ok(Bson::String("new".into())),
        );
        assert_eq!(
            eval(Bson::Document(doc! { "$ifNull": ["$color", "unpainted"] }), &root),
            Ok(Bson::String("unpainted".into())),
        );
        assert_eq!(eval(Bson::Document(doc! { "$toUpper": "$model" }), &root), Ok(Bson::String("TC".into())));
        assert_eq!(
            eval(Bson::Document(doc! { "$split": ["a,b", ","] }), &root),
            Ok(Bson::Array(vec!["a".into(), "b".into()])),
        );
    }

    #[test]
    fn unknown_operator_is_reported() {
        assert_eq!(
            eval(Bson::Document(doc! { "$frobnicate": 1 }), &doc! {}),
            Err(MingoError::UnknownOperator("$frobnicate".into())),
        );
    }

    #[test]
    fn accumulators_skip_missing_values() {
        let values = vec![Some(Bson::Int32(2)), None, Some(Bson::Int32(5)), Some(Bson::Null)];

        assert_eq!(acc_sum(&values), Ok(Bson::Int32(7)));
        assert_eq!(acc_avg(&values), Ok(Bson::Double(3.5)));
        assert_eq!(acc_min(&values), Ok(Bson::Int32(2)));
        assert_eq!(acc_max(&values), Ok(Bson::Int32(5)));
        assert_eq!(acc_push(&values), Ok(Bson::Array(vec![Bson::Int32(2), Bson::Int32(5), Bson::Null])));
        assert_eq!(acc_count(&values), Ok(Bson::Int32(4)));
    }
}
