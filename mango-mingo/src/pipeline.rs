//! Built-in aggregation pipeline stages.
//!
//! Each stage is registered by name and receives the engine (for expression
//! evaluation and nested pipelines), the documents produced by the previous
//! stage, and its raw argument.

use std::{collections::HashMap, sync::Arc};
use bson::{Bson, Document};

use crate::{
    cursor::SortSpec,
    engine::{Mingo, MingoOptions},
    error::{MingoError, MingoResult},
    evaluator::DocumentEvaluator,
    expr::Expr,
    path,
    value::{as_i64, int_to_bson, values_equal},
};

/// A pipeline stage implementation.
pub type StageFn = Arc<
    dyn Fn(&Mingo, Vec<Document>, &Bson, &MingoOptions) -> MingoResult<Vec<Document>> + Send + Sync
>;

fn expect_document<'a>(stage: &str, arg: &'a Bson) -> MingoResult<&'a Document> {
    match arg {
        Bson::Document(doc) => Ok(doc),
        _ => Err(MingoError::InvalidStage(format!("{stage} expects a document"))),
    }
}

fn expect_count(stage: &str, arg: &Bson, allow_zero: bool) -> MingoResult<usize> {
    match as_i64(arg) {
        Some(n) if n > 0 || (allow_zero && n == 0) => Ok(n as usize),
        _ => Err(MingoError::InvalidStage(format!("{stage} expects a non-negative integer, got {arg}"))),
    }
}

fn stage_match(_: &Mingo, documents: Vec<Document>, arg: &Bson, _: &MingoOptions) -> MingoResult<Vec<Document>> {
    let expr = Expr::parse(expect_document("$match", arg)?)?;

    DocumentEvaluator::filter_documents(&documents, &expr)
}

fn stage_project(mingo: &Mingo, documents: Vec<Document>, arg: &Bson, options: &MingoOptions) -> MingoResult<Vec<Document>> {
    let spec = match arg {
        Bson::Document(spec) => spec,
        _ => return Err(MingoError::InvalidProjection("$project expects a document".into())),
    };

    mingo.project(&documents, spec, options)
}

fn stage_add_fields(mingo: &Mingo, documents: Vec<Document>, arg: &Bson, _: &MingoOptions) -> MingoResult<Vec<Document>> {
    let spec = expect_document("$addFields", arg)?;

    documents
        .into_iter()
        .map(|mut document| {
            let context = mingo.context(&document);
            let computed = spec
                .iter()
                .map(|(field, expr)| Ok((field.clone(), context.resolve(expr)?)))
                .collect::<MingoResult<Vec<_>>>()?;

            for (field, value) in computed {
                match value {
                    Some(value) => path::set_path(&mut document, &field, value),
                    None => {
                        path::remove_path(&mut document, &field);
                    },
                }
            }

            Ok(document)
        })
        .collect()
}

fn stage_unset(_: &Mingo, documents: Vec<Document>, arg: &Bson, _: &MingoOptions) -> MingoResult<Vec<Document>> {
    let fields = match arg {
        Bson::String(field) => vec![field.clone()],
        Bson::Array(items) => items
            .iter()
            .map(|item| match item {
                Bson::String(field) => Ok(field.clone()),
                _ => Err(MingoError::InvalidStage("$unset expects field names".into())),
            })
            .collect::<MingoResult<Vec<_>>>()?,
        _ => return Err(MingoError::InvalidStage("$unset expects a string or an array of strings".into())),
    };

    Ok(
        documents
            .into_iter()
            .map(|mut document| {
                for field in &fields {
                    path::remove_path(&mut document, field);
                }
                document
            })
            .collect()
    )
}

fn stage_sort(_: &Mingo, mut documents: Vec<Document>, arg: &Bson, _: &MingoOptions) -> MingoResult<Vec<Document>> {
    let spec = match arg {
        Bson::Document(spec) if !spec.is_empty() => SortSpec::parse(spec)?,
        _ => return Err(MingoError::InvalidSort("$sort expects a non-empty document".into())),
    };

    spec.sort(&mut documents);
    Ok(documents)
}

fn stage_skip(_: &Mingo, documents: Vec<Document>, arg: &Bson, _: &MingoOptions) -> MingoResult<Vec<Document>> {
    let skip = expect_count("$skip", arg, true)?;

    Ok(documents.into_iter().skip(skip).collect())
}

fn stage_limit(_: &Mingo, mut documents: Vec<Document>, arg: &Bson, _: &MingoOptions) -> MingoResult<Vec<Document>> {
    let limit = expect_count("$limit", arg, false)?;

    documents.truncate(limit);
    Ok(documents)
}

fn stage_count(_: &Mingo, documents: Vec<Document>, arg: &Bson, _: &MingoOptions) -> MingoResult<Vec<Document>> {
    let name = match arg {
        Bson::String(name) if !name.is_empty() && !name.starts_with('$') && !name.contains('.') => name,
        _ => return Err(MingoError::InvalidStage("$count expects a plain field name".into())),
    };

    if documents.is_empty() {
        return Ok(Vec::new());
    }

    let mut out = Document::new();
    out.insert(name.clone(), int_to_bson(documents.len() as i64));
    Ok(vec![out])
}

/// Partitions documents by the value of `key`, keeping first-seen order.
fn partition<'a>(mingo: &Mingo, documents: &'a [Document], key: &Bson) -> MingoResult<Vec<(Bson, Vec<&'a Document>)>> {
    let mut groups: Vec<(Bson, Vec<&'a Document>)> = Vec::new();

    for document in documents {
        let value = mingo.context(document).evaluate(key)?;

        match groups.iter_mut().find(|(existing, _)| values_equal(existing, &value)) {
            Some((_, members)) => members.push(document),
            None => groups.push((value, vec![document])),
        }
    }

    Ok(groups)
}

fn stage_group(mingo: &Mingo, documents: Vec<Document>, arg: &Bson, _: &MingoOptions) -> MingoResult<Vec<Document>> {
    let spec = expect_document("$group", arg)?;
    let key = spec
        .get("_id")
        .ok_or_else(|| MingoError::InvalidStage("$group requires an _id".into()))?;

    let fields = spec
        .iter()
        .filter(|(field, _)| field.as_str() != "_id")
        .map(|(field, accumulator)| {
            let mut entries = match accumulator {
                Bson::Document(doc) if doc.len() == 1 => doc.iter(),
                _ => return Err(MingoError::InvalidStage(format!("$group field {field} must be a single accumulator"))),
            };
            let (name, expr) = entries
                .next()
                .ok_or_else(|| MingoError::InvalidStage(format!("$group field {field} is empty")))?;

            Ok((field.clone(), mingo.accumulator(name)?, expr.clone()))
        })
        .collect::<MingoResult<Vec<_>>>()?;

    partition(mingo, &documents, key)?
        .into_iter()
        .map(|(id, members)| {
            let mut out = Document::new();
            out.insert("_id", id);

            for (field, accumulator, expr) in &fields {
                let values = members
                    .iter()
                    .map(|member| mingo.context(member).resolve(expr))
                    .collect::<MingoResult<Vec<_>>>()?;

                out.insert(field.clone(), accumulator(&values)?);
            }

            Ok(out)
        })
        .collect()
}

fn stage_sort_by_count(mingo: &Mingo, documents: Vec<Document>, arg: &Bson, _: &MingoOptions) -> MingoResult<Vec<Document>> {
    let mut counted = partition(mingo, &documents, arg)?
        .into_iter()
        .map(|(id, members)| (id, members.len()))
        .collect::<Vec<_>>();

    counted.sort_by(|a, b| b.1.cmp(&a.1));

    Ok(
        counted
            .into_iter()
            .map(|(id, count)| {
                let mut out = Document::new();
                out.insert("_id", id);
                out.insert("count", int_to_bson(count as i64));
                out
            })
            .collect()
    )
}

fn replace_each(mingo: &Mingo, documents: Vec<Document>, expr: &Bson, stage: &str) -> MingoResult<Vec<Document>> {
    documents
        .iter()
        .map(|document| match mingo.context(document).evaluate(expr)? {
            Bson::Document(root) => Ok(root),
            other => Err(MingoError::InvalidStage(format!("{stage} must produce a document, got {other}"))),
        })
        .collect()
}

fn stage_replace_root(mingo: &Mingo, documents: Vec<Document>, arg: &Bson, _: &MingoOptions) -> MingoResult<Vec<Document>> {
    let new_root = expect_document("$replaceRoot", arg)?
        .get("newRoot")
        .ok_or_else(|| MingoError::InvalidStage("$replaceRoot requires newRoot".into()))?;

    replace_each(mingo, documents, new_root, "$replaceRoot")
}

fn stage_replace_with(mingo: &Mingo, documents: Vec<Document>, arg: &Bson, _: &MingoOptions) -> MingoResult<Vec<Document>> {
    replace_each(mingo, documents, arg, "$replaceWith")
}

fn stage_unwind(_: &Mingo, documents: Vec<Document>, arg: &Bson, _: &MingoOptions) -> MingoResult<Vec<Document>> {
    let (field_path, index_field, preserve) = match arg {
        Bson::String(field_path) => (field_path.as_str(), None, false),
        Bson::Document(spec) => (
            spec.get_str("path")
                .map_err(|_| MingoError::InvalidStage("$unwind requires a path".into()))?,
            spec.get_str("includeArrayIndex").ok(),
            spec.get_bool("preserveNullAndEmptyArrays").unwrap_or(false),
        ),
        _ => return Err(MingoError::InvalidStage("$unwind expects a path or a document".into())),
    };

    let field = field_path
        .strip_prefix('$')
        .ok_or_else(|| MingoError::InvalidStage("$unwind path must start with $".into()))?;

    let mut out = Vec::with_capacity(documents.len());

    for document in documents {
        let items = match path::get_value(&document, field) {
            Some(Bson::Array(items)) => items,
            Some(Bson::Null) | None => Vec::new(),
            Some(scalar) => vec![scalar],
        };

        if items.is_empty() {
            if preserve {
                let mut kept = document;
                if let Some(index_field) = index_field {
                    kept.insert(index_field, Bson::Null);
                }
                out.push(kept);
            }
            continue;
        }

        for (index, item) in items.into_iter().enumerate() {
            let mut unwound = document.clone();
            path::set_path(&mut unwound, field, item);
            if let Some(index_field) = index_field {
                unwound.insert(index_field, int_to_bson(index as i64));
            }
            out.push(unwound);
        }
    }

    Ok(out)
}

fn stage_facet(mingo: &Mingo, documents: Vec<Document>, arg: &Bson, options: &MingoOptions) -> MingoResult<Vec<Document>> {
    let spec = expect_document("$facet", arg)?;
    let mut out = Document::new();

    for (name, stages) in spec {
        let stages = match stages {
            Bson::Array(stages) => stages
                .iter()
                .map(|stage| match stage {
                    Bson::Document(stage) => Ok(stage.clone()),
                    _ => Err(MingoError::InvalidStage(format!("$facet {name} expects stage documents"))),
                })
                .collect::<MingoResult<Vec<_>>>()?,
            _ => return Err(MingoError::InvalidStage(format!("$facet {name} expects an array"))),
        };

        let results = mingo.run_stages(documents.clone(), &stages, options)?;
        out.insert(name.clone(), results.into_iter().map(Bson::Document).collect::<Vec<_>>());
    }

    Ok(vec![out])
}

/// The default stage registry.
pub fn builtin_stages() -> HashMap<String, StageFn> {
    let stages: [(&str, fn(&Mingo, Vec<Document>, &Bson, &MingoOptions) -> MingoResult<Vec<Document>>); 15] = [
        ("$match", stage_match),
        ("$project", stage_project),
        ("$addFields", stage_add_fields),
        ("$set", stage_add_fields),
        ("$unset", stage_unset),
        ("$sort", stage_sort),
        ("$skip", stage_skip),
        ("$limit", stage_limit),
        ("$count", stage_count),
        ("$group", stage_group),
        ("$sortByCount", stage_sort_by_count),
        ("$replaceRoot", stage_replace_root),
        ("$replaceWith", stage_replace_with),
        ("$unwind", stage_unwind),
        ("$facet", stage_facet),
    ];

    stages
        .into_iter()
        .map(|(name, stage)| (name.to_string(), Arc::new(stage) as StageFn))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    fn run(pipeline: Vec<Document>, documents: &[Document]) -> MingoResult<Vec<Document>> {
        Mingo::new().aggregate(documents, &pipeline, &MingoOptions::default())
    }

    fn cars() -> Vec<Document> {
        vec![
            doc! { "id": 1, "make": "Nissan", "year": 1994, "tags": ["van"] },
            doc! { "id": 2, "make": "Subaru", "year": 1994, "tags": ["awd", "compact"] },
            doc! { "id": 3, "make": "Scion", "year": 2010, "tags": [] },
        ]
    }

    #[test]
    fn match_sort_skip_limit() {
        let out = run(
            vec![
                doc! { "$match": { "year": { "$lt": 2000 } } },
                doc! { "$sort": { "make": -1 } },
                doc! { "$limit": 1 },
            ],
            &cars(),
        )
        .unwrap();

        assert_eq!(out.len(), 1);
        assert_eq!(out[0].get_str("make").unwrap(), "Subaru");
    }

    #[test]
    fn group_with_accumulators() {
        let out = run(
            vec![
                doc! { "$group": { "_id": "$year", "count": { "$sum": 1 }, "makes": { "$push": "$make" } } },
                doc! { "$sort": { "_id": 1 } },
            ],
            &cars(),
        )
        .unwrap();

        assert_eq!(
            out,
            vec![
                doc! { "_id": 1994, "count": 2, "makes": ["Nissan", "Subaru"] },
                doc! { "_id": 2010, "count": 1, "makes": ["Scion"] },
            ],
        );
    }

    #[test]
    fn unwind_count_and_facet() {
        let unwound = run(vec![doc! { "$unwind": "$tags" }], &cars()).unwrap();
        assert_eq!(unwound.len(), 3);

        let preserved = run(
            vec![doc! { "$unwind": { "path": "$tags", "preserveNullAndEmptyArrays": true } }],
            &cars(),
        )
        .unwrap();
        assert_eq!(preserved.len(), 4);

        let counted = run(vec![doc! { "$count": "total" }], &cars()).unwrap();
        assert_eq!(counted, vec![doc! { "total": 3 }]);

        let faceted = run(
            vec![doc! { "$facet": { "old": [{ "$match": { "year": 1994 } }, { "$count": "n" }] } }],
            &cars(),
        )
        .unwrap();
        assert_eq!(faceted, vec![doc! { "old": [{ "n": 2 }] }]);
    }

    #[test]
    fn add_fields_and_replace_root() {
        let out = run(
            vec![
                doc! { "$set": { "label": { "$concat": ["$make", "!"] } } },
                doc! { "$replaceRoot": { "newRoot": { "label": "$label" } } },
            ],
            &cars()[..1],
        )
        .unwrap();

        assert_eq!(out, vec![doc! { "label": "Nissan!" }]);
    }

    #[test]
    fn malformed_stages_are_rejected() {
        assert_eq!(
            run(vec![doc! { "$bogus": 1 }], &cars()).unwrap_err(),
            MingoError::UnknownStage("$bogus".into()),
        );
        assert!(matches!(
            run(vec![doc! { "$match": {}, "$limit": 1 }], &cars()),
            Err(MingoError::InvalidStage(_)),
        ));
        assert!(matches!(run(vec![doc! { "$limit": -1 }], &cars()), Err(MingoError::InvalidStage(_))));
        assert!(matches!(
            run(vec![doc! { "$project": { "make": 1, "year": 0 } }], &cars()),
            Err(MingoError::InvalidProjection(_)),
        ));
    }
}
