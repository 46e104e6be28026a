//! `$project` semantics: inclusion, exclusion, and computed fields.
//!
//! A projection is either inclusive (only the named fields survive, plus the
//! identity key unless it is explicitly excluded) or exclusive (the named fields
//! are dropped). Computed fields count as inclusions. Mixing inclusions and
//! exclusions is rejected, except for excluding the identity key.

use bson::{Bson, Document};

use crate::{
    engine::Mingo,
    error::{MingoError, MingoResult},
    path,
    value::as_f64,
};

#[derive(Debug, Clone)]
enum Rule {
    Include,
    Exclude,
    Computed(Bson),
}

/// A validated projection specification.
#[derive(Debug, Clone)]
pub struct Projection {
    rules: Vec<(String, Rule)>,
    id_key: String,
    inclusive: bool,
    id_excluded: bool,
}

impl Projection {
    /// Validates `spec` for a collection keyed by `id_key`.
    ///
    /// # Errors
    ///
    /// Returns [`MingoError::InvalidProjection`] for operator keys or when
    /// inclusions and exclusions are mixed.
    pub fn parse(spec: &Document, id_key: &str) -> MingoResult<Self> {
        let mut rules = Vec::with_capacity(spec.len());
        flatten(spec, "", &mut rules)?;

        let mut inclusive = false;
        let mut exclusive = false;
        let mut id_excluded = false;

        for (field, rule) in &rules {
            match (field == id_key, rule) {
                (true, Rule::Exclude) => id_excluded = true,
                (_, Rule::Exclude) => exclusive = true,
                _ => inclusive = true,
            }
        }

        if inclusive && exclusive {
            return Err(MingoError::InvalidProjection(
                "cannot mix inclusion and exclusion in a projection".into(),
            ));
        }

        Ok(Self { rules, id_key: id_key.to_string(), inclusive, id_excluded })
    }

    /// Shapes a single document.
    pub fn apply(&self, mingo: &Mingo, document: &Document) -> MingoResult<Document> {
        if !self.inclusive {
            let mut out = document.clone();
            for (field, _) in &self.rules {
                path::remove_path(&mut out, field);
            }
            return Ok(out);
        }

        let mut out = Document::new();

        if !self.id_excluded {
            if let Some(id) = document.get(&self.id_key) {
                out.insert(self.id_key.clone(), id.clone());
            }
        }

        let context = mingo.context(document);

        for (field, rule) in &self.rules {
            match rule {
                Rule::Include => include_path(document, &mut out, field),
                Rule::Computed(expr) => {
                    if let Some(value) = context.resolve(expr)? {
                        path::set_path(&mut out, field, value);
                    }
                },
                Rule::Exclude => {},
            }
        }

        Ok(out)
    }
}

fn flatten(spec: &Document, prefix: &str, rules: &mut Vec<(String, Rule)>) -> MingoResult<()> {
    for (key, value) in spec {
        if key.starts_with('$') {
            return Err(MingoError::InvalidProjection(format!("unsupported projection operator {key}")));
        }

        let field = match prefix {
            "" => key.clone(),
            _ => format!("{prefix}.{key}"),
        };

        let rule = match value {
            Bson::Boolean(flag) => if *flag { Rule::Include } else { Rule::Exclude },
            Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_) => match as_f64(value) {
                Some(n) if n == 0.0 => Rule::Exclude,
                _ => Rule::Include,
            },
            Bson::Document(nested) if !nested.is_empty() && !nested.keys().any(|k| k.starts_with('$')) => {
                flatten(nested, &field, rules)?;
                continue;
            },
            other => Rule::Computed(other.clone()),
        };

        rules.push((field, rule));
    }

    Ok(())
}

fn include_path(source: &Document, target: &mut Document, field: &str) {
    match field.split_once('.') {
        None => {
            if let Some(value) = source.get(field) {
                merge(target, field, value.clone());
            }
        },
        Some((head, tail)) => {
            if let Some(value) = source.get(head).and_then(|value| pick(value, tail)) {
                merge(target, head, value);
            }
        },
    }
}

fn pick(value: &Bson, tail: &str) -> Option<Bson> {
    match value {
        Bson::Document(child) => {
            let mut sub = Document::new();
            include_path(child, &mut sub, tail);
            Some(Bson::Document(sub))
        },
        Bson::Array(items) => Some(Bson::Array(
            items
                .iter()
                .filter_map(|item| match item {
                    Bson::Document(_) | Bson::Array(_) => pick(item, tail),
                    _ => None,
                })
                .collect()
        )),
        _ => None,
    }
}

fn merge(target: &mut Document, key: &str, value: Bson) {
    let leftover = match (target.get_mut(key), value) {
        (Some(Bson::Document(existing)), Bson::Document(incoming)) => {
            for (k, v) in incoming {
                merge(existing, &k, v);
            }
            None
        },
        (Some(Bson::Array(existing)), Bson::Array(incoming)) if existing.len() == incoming.len() => {
            for (slot, item) in existing.iter_mut().zip(incoming) {
                match (slot, item) {
                    (Bson::Document(slot), Bson::Document(item)) => {
                        for (k, v) in item {
                            merge(slot, &k, v);
                        }
                    },
                    (slot, item) => *slot = item,
                }
            }
            None
        },
        (_, value) => Some(value),
    };

    if let Some(value) = leftover {
        target.insert(key, value);
    }
}
