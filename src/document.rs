//! The document type shared by the local store, the query engine, and live
//! queries: an order-preserving JSON object with an object-id `_id`.

use crate::error::{Error, Result};
use serde_json::{Map, Value};

/// A document is an ordered string-to-value mapping. Field order is
/// preserved (via `serde_json`'s `preserve_order` feature) so it round-trips
/// the way it arrived over the wire, though equality between documents does
/// not depend on it.
pub type Document = Map<String, Value>;

/// The result of diffing two documents: the fields present in the new
/// document that differ from the old one, and the keys dropped entirely.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldDiff {
    pub changed: Document,
    pub cleared: Vec<String>,
}

impl FieldDiff {
    pub fn is_empty(&self) -> bool {
        self.changed.is_empty() && self.cleared.is_empty()
    }
}

/// Computes the field-level diff from `before` to `after`: entries in
/// `after` not identical to the corresponding entry in `before` count as
/// changed; keys present in `before` but absent from `after` count as
/// cleared. The `_id` field is never included in either half.
pub fn diff_fields(before: &Document, after: &Document) -> FieldDiff {
    let mut changed = Document::new();
    for (k, v) in after {
        if k == "_id" {
            continue;
        }
        if before.get(k) != Some(v) {
            changed.insert(k.clone(), v.clone());
        }
    }
    let mut cleared = Vec::new();
    for k in before.keys() {
        if k == "_id" {
            continue;
        }
        if !after.contains_key(k) {
            cleared.push(k.clone());
        }
    }
    FieldDiff { changed, cleared }
}

/// Returns a copy of `doc` with the `_id` field removed, matching the
/// "fields without `_id`" shape used by `document_added`/`added` payloads.
pub fn without_id(doc: &Document) -> Document {
    let mut out = doc.clone();
    out.remove("_id");
    out
}

/// Validates that `id` is a 24 hex character object id string.
pub fn validate_id(id: &str) -> Result<()> {
    bson::oid::ObjectId::parse_str(id)
        .map(|_| ())
        .map_err(|_| Error::InvalidId(id.to_string()))
}

/// Generates a fresh object id as its 24 hex character string form.
pub fn generate_id() -> String {
    bson::oid::ObjectId::new().to_hex()
}

/// Extracts and validates the `_id` string from a document, if present.
pub fn id_of(doc: &Document) -> Result<Option<String>> {
    match doc.get("_id") {
        None => Ok(None),
        Some(Value::String(s)) => {
            validate_id(s)?;
            Ok(Some(s.clone()))
        }
        Some(other) => Err(Error::InvalidId(other.to_string())),
    }
}
