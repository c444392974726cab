//! A small selector/modifier evaluator covering the subset of the
//! MongoDB query dialect this crate needs: equality, the common comparison
//! and membership operators, `$and`/`$or`/`$not`, dotted paths, and
//! `$set`/`$unset` modifiers.
//!
//! This is not a general-purpose query engine — matching and update
//! semantics are all that the rest of the crate depends on, and the
//! contract (`matches`, `apply_modifier`) is deliberately small enough to
//! replace with a real engine later without touching any caller.

use crate::document::Document;
use crate::error::{Error, Result};
use serde_json::Value;

/// Returns true if `doc` satisfies `selector`.
pub fn matches(selector: &Document, doc: &Document) -> bool {
    selector
        .iter()
        .all(|(key, expected)| match_field(key, expected, doc))
}

fn match_field(key: &str, expected: &Value, doc: &Document) -> bool {
    match key {
        "$and" => expected
            .as_array()
            .map(|clauses| clauses.iter().all(|c| matches_value(c, doc)))
            .unwrap_or(false),
        "$or" => expected
            .as_array()
            .map(|clauses| clauses.iter().any(|c| matches_value(c, doc)))
            .unwrap_or(false),
        "$not" => !matches_value(expected, doc),
        _ => {
            let actual = resolve_path(doc, key);
            match expected {
                Value::Object(ops) if is_operator_doc(ops) => {
                    ops.iter().all(|(op, arg)| apply_operator(op, arg, actual))
                }
                _ => actual == Some(expected),
            }
        }
    }
}

fn matches_value(clause: &Value, doc: &Document) -> bool {
    match clause.as_object() {
        Some(sel) => matches(sel, doc),
        None => false,
    }
}

fn is_operator_doc(obj: &Document) -> bool {
    !obj.is_empty() && obj.keys().all(|k| k.starts_with('$'))
}

fn apply_operator(op: &str, arg: &Value, actual: Option<&Value>) -> bool {
    match op {
        "$eq" => actual == Some(arg),
        "$ne" => actual != Some(arg),
        "$exists" => {
            let want = arg.as_bool().unwrap_or(true);
            actual.is_some() == want
        }
        "$in" => arg
            .as_array()
            .map(|vals| actual.map(|a| vals.contains(a)).unwrap_or(false))
            .unwrap_or(false),
        "$nin" => arg
            .as_array()
            .map(|vals| actual.map(|a| !vals.contains(a)).unwrap_or(true))
            .unwrap_or(true),
        "$gt" => compare(actual, arg) == Some(std::cmp::Ordering::Greater),
        "$gte" => matches!(
            compare(actual, arg),
            Some(std::cmp::Ordering::Greater) | Some(std::cmp::Ordering::Equal)
        ),
        "$lt" => compare(actual, arg) == Some(std::cmp::Ordering::Less),
        "$lte" => matches!(
            compare(actual, arg),
            Some(std::cmp::Ordering::Less) | Some(std::cmp::Ordering::Equal)
        ),
        _ => false,
    }
}

fn compare(actual: Option<&Value>, expected: &Value) -> Option<std::cmp::Ordering> {
    let a = actual?.as_f64()?;
    let b = expected.as_f64()?;
    a.partial_cmp(&b)
}

/// Resolves a (possibly dotted) field path against a document, e.g.
/// `"a.b"` looks up `doc["a"]["b"]`.
fn resolve_path<'a>(doc: &'a Document, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let first = segments.next()?;
    let mut current = doc.get(first)?;
    for segment in segments {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

/// The structured side effects of a write, returned directly as Rust
/// values rather than parsed out of a side-channel log.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryEffects {
    /// Ids of documents that already existed and were updated in place.
    pub updated: Vec<String>,
    /// Id of a document inserted because no existing document matched and
    /// the caller requested upsert semantics.
    pub upserted: Option<String>,
}

/// Applies `modifier` to `doc` in place. `modifier` must contain at least
/// one of `$set`/`$unset`; any other shape is rejected.
pub fn apply_modifier(doc: &mut Document, modifier: &Document) -> Result<()> {
    if modifier.is_empty() {
        return Err(Error::query_engine("modifier must not be empty"));
    }
    let mut recognised = false;
    if let Some(set) = modifier.get("$set") {
        let set = set
            .as_object()
            .ok_or_else(|| Error::query_engine("$set must be an object"))?;
        for (k, v) in set {
            if k == "_id" {
                continue;
            }
            doc.insert(k.clone(), v.clone());
        }
        recognised = true;
    }
    if let Some(unset) = modifier.get("$unset") {
        let unset = unset
            .as_object()
            .ok_or_else(|| Error::query_engine("$unset must be an object"))?;
        for k in unset.keys() {
            doc.remove(k);
        }
        recognised = true;
    }
    if !recognised {
        return Err(Error::query_engine(
            "modifier must contain $set and/or $unset",
        ));
    }
    Ok(())
}
