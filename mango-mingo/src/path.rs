//! Dotted field path access over BSON documents.
//!
//! Query matching fans out across arrays (`"tags.name"` reaches the `name` of
//! every element of `tags`), while expression lookups collect the reached
//! values into an array the way aggregation field paths do.

use bson::{Bson, Document};

fn segments(path: &str) -> Vec<&str> {
    path.split('.').collect()
}

/// Collects every value reachable by `path`, fanning out across arrays.
///
/// A numeric segment indexes into an array in addition to being tried as a
/// field name on each array element.
pub fn resolve<'a>(document: &'a Document, path: &str) -> Vec<&'a Bson> {
    let segments = segments(path);
    let mut out = Vec::new();

    if let Some((first, rest)) = segments.split_first() {
        if let Some(value) = document.get(*first) {
            collect(value, rest, &mut out);
        }
    }

    out
}

fn collect<'a>(value: &'a Bson, segments: &[&str], out: &mut Vec<&'a Bson>) {
    let Some((first, rest)) = segments.split_first() else {
        out.push(value);
        return;
    };

    match value {
        Bson::Document(doc) => {
            if let Some(next) = doc.get(*first) {
                collect(next, rest, out);
            }
        },
        Bson::Array(items) => {
            if let Ok(index) = first.parse::<usize>() {
                if let Some(item) = items.get(index) {
                    collect(item, rest, out);
                }
            }

            for item in items.iter().filter(|item| matches!(item, Bson::Document(_))) {
                collect(item, segments, out);
            }
        },
        _ => {},
    }
}

/// Looks up a path the way aggregation field references do.
///
/// Arrays along the path map over their document elements and the found
/// values are returned as an array. Returns `None` when the path is missing.
pub fn get_value(document: &Document, path: &str) -> Option<Bson> {
    let segments = segments(path);
    let (first, rest) = segments.split_first()?;

    lookup(document.get(*first)?, rest)
}

fn lookup(value: &Bson, segments: &[&str]) -> Option<Bson> {
    let Some((first, rest)) = segments.split_first() else {
        return Some(value.clone());
    };

    match value {
        Bson::Document(doc) => lookup(doc.get(*first)?, rest),
        Bson::Array(items) => Some(Bson::Array(
            items
                .iter()
                .filter_map(|item| match item {
                    Bson::Document(_) | Bson::Array(_) => lookup(item, segments),
                    _ => None,
                })
                .collect()
        )),
        _ => None,
    }
}

/// Writes `value` at `path`, creating intermediate documents as needed.
///
/// A non-document value in the middle of the path is replaced by a document.
pub fn set_path(document: &mut Document, path: &str, value: Bson) {
    match path.split_once('.') {
        None => {
            document.insert(path, value);
        },
        Some((head, tail)) => {
            let needs_document = !matches!(document.get(head), Some(Bson::Document(_)));
            if needs_document {
                document.insert(head, Document::new());
            }

            if let Some(Bson::Document(child)) = document.get_mut(head) {
                set_path(child, tail, value);
            }
        },
    }
}

/// Removes the value at `path`, returning it if it was present.
///
/// Arrays of documents along the path have the field removed from each element.
pub fn remove_path(document: &mut Document, path: &str) -> Option<Bson> {
    match path.split_once('.') {
        None => document.remove(path),
        Some((head, tail)) => match document.get_mut(head)? {
            Bson::Document(child) => remove_path(child, tail),
            Bson::Array(items) => {
                let mut removed = Vec::new();

                for item in items.iter_mut() {
                    if let Bson::Document(child) = item {
                        if let Some(value) = remove_path(child, tail) {
                            removed.push(value);
                        }
                    }
                }

                (!removed.is_empty()).then_some(Bson::Array(removed))
            },
            _ => None,
        },
    }
}
