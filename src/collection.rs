//! A local, in-memory document collection with MongoDB-like selector and
//! modifier semantics, and the four change signals the rest of the crate
//! (live queries, DDP-backed collections) observes.

use crate::document::{self, diff_fields, Document, FieldDiff};
use crate::error::{Error, Result};
use crate::query::{self, QueryEffects};
use crate::signal::{ListenerToken, Signal};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::{Mutex, OnceLock};

/// Payload of [`Collection::on_document_added`].
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentAdded {
    pub id: String,
    pub fields: Document,
}

/// Payload of [`Collection::on_document_pre_changed`]: fires before the
/// store commits the change, carrying both images. Live queries rely on
/// the `before` image to classify set-membership transitions.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentPreChanged {
    pub id: String,
    pub before: Document,
    pub after: Document,
}

/// Payload of [`Collection::on_document_changed`]: the public delta.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentChanged {
    pub id: String,
    pub diff: FieldDiff,
}

/// Payload of [`Collection::on_document_pre_removed`].
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentPreRemoved {
    pub id: String,
    pub doc: Document,
}

/// Payload of [`Collection::on_document_removed`].
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentRemoved {
    pub id: String,
}

#[derive(Default)]
struct Store {
    order: Vec<String>,
    docs: HashMap<String, Document>,
}

impl Store {
    fn insert(&mut self, id: String, doc: Document) {
        if !self.docs.contains_key(&id) {
            self.order.push(id.clone());
        }
        self.docs.insert(id, doc);
    }

    fn remove(&mut self, id: &str) -> Option<Document> {
        self.order.retain(|x| x != id);
        self.docs.remove(id)
    }
}

type SharedStore = Rc<RefCell<Store>>;

fn registry() -> &'static Mutex<HashMap<String, std::sync::Weak<RefCell<Store>>>> {
    static REGISTRY: OnceLock<Mutex<HashMap<String, std::sync::Weak<RefCell<Store>>>>> =
        OnceLock::new();
    REGISTRY.get_or_init(|| Mutex::new(HashMap::new()))
}

/// A named, in-memory document collection.
///
/// Two [`Collection`] handles constructed with the same `name` via
/// [`Collection::new`] share the same underlying store (a process-wide
/// registry keyed by name, cleared once the last handle for a name is
/// dropped) — matching the original's process-wide database handle while
/// avoiding a single implicit global.
pub struct Collection {
    name: String,
    store: SharedStore,
    pub(crate) document_added: Signal<DocumentAdded>,
    pub(crate) document_pre_changed: Signal<DocumentPreChanged>,
    pub(crate) document_changed: Signal<DocumentChanged>,
    pub(crate) document_pre_removed: Signal<DocumentPreRemoved>,
    pub(crate) document_removed: Signal<DocumentRemoved>,
}

impl Collection {
    /// Opens (creating if necessary) the process-wide shared store named
    /// `name`.
    pub fn new(name: impl Into<String>) -> Result<Rc<Collection>> {
        let name = name.into();
        if name.is_empty() {
            return Err(Error::InvalidCollectionName(name));
        }
        let mut reg = registry().lock().expect("collection registry poisoned");
        let store = match reg.get(&name).and_then(|w| w.upgrade()) {
            Some(existing) => existing,
            None => {
                let fresh: SharedStore = Rc::new(RefCell::new(Store::default()));
                reg.insert(name.clone(), Rc::downgrade(&fresh));
                fresh
            }
        };
        drop(reg);
        Ok(Rc::new(Collection::with_store(name, store)))
    }

    /// Opens a collection backed by an explicit store handle, for
    /// embedding scenarios that want isolation from the process-wide
    /// registry.
    pub fn detached(name: impl Into<String>) -> Result<Rc<Collection>> {
        let name = name.into();
        if name.is_empty() {
            return Err(Error::InvalidCollectionName(name));
        }
        Ok(Rc::new(Collection::with_store(
            name,
            Rc::new(RefCell::new(Store::default())),
        )))
    }

    fn with_store(name: String, store: SharedStore) -> Self {
        Collection {
            name,
            store,
            document_added: Signal::new(),
            document_pre_changed: Signal::new(),
            document_changed: Signal::new(),
            document_pre_removed: Signal::new(),
            document_removed: Signal::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn on_document_added(&self, f: impl FnMut(&DocumentAdded) + 'static) -> ListenerToken {
        self.document_added.connect(f)
    }

    pub fn on_document_pre_changed(
        &self,
        f: impl FnMut(&DocumentPreChanged) + 'static,
    ) -> ListenerToken {
        self.document_pre_changed.connect(f)
    }

    pub fn on_document_changed(&self, f: impl FnMut(&DocumentChanged) + 'static) -> ListenerToken {
        self.document_changed.connect(f)
    }

    pub fn on_document_pre_removed(
        &self,
        f: impl FnMut(&DocumentPreRemoved) + 'static,
    ) -> ListenerToken {
        self.document_pre_removed.connect(f)
    }

    pub fn on_document_removed(&self, f: impl FnMut(&DocumentRemoved) + 'static) -> ListenerToken {
        self.document_removed.connect(f)
    }

    /// Returns every document matching `selector`, in store order.
    pub fn find(&self, selector: &Document) -> Vec<Document> {
        let store = self.store.borrow();
        store
            .order
            .iter()
            .filter_map(|id| store.docs.get(id))
            .filter(|doc| query::matches(selector, doc))
            .cloned()
            .collect()
    }

    /// Returns the first document matching `selector`, or an empty
    /// document if none match.
    pub fn find_one(&self, selector: &Document) -> Document {
        let store = self.store.borrow();
        store
            .order
            .iter()
            .filter_map(|id| store.docs.get(id))
            .find(|doc| query::matches(selector, doc))
            .cloned()
            .unwrap_or_default()
    }

    pub fn count(&self, selector: &Document) -> usize {
        let store = self.store.borrow();
        store
            .docs
            .values()
            .filter(|doc| query::matches(selector, doc))
            .count()
    }

    /// Inserts `doc`. If `doc._id` is present it must be a valid object id;
    /// otherwise one is generated. Fires `document_added` with the fields
    /// minus `_id`.
    pub fn insert(&self, mut doc: Document) -> Result<String> {
        let id = match document::id_of(&doc)? {
            Some(id) => id,
            None => document::generate_id(),
        };
        doc.insert("_id".to_string(), id.clone().into());
        let fields = document::without_id(&doc);
        self.store.borrow_mut().insert(id.clone(), doc);
        self.document_added.fire(&DocumentAdded {
            id: id.clone(),
            fields,
        });
        Ok(id)
    }

    /// Applies `modifier` to every document matching `selector`. Returns
    /// the number of documents matched, whether or not the modifier
    /// actually changed each one (an idempotent `$set` re-applying an
    /// already-current value still counts as matched).
    pub fn update(&self, selector: &Document, modifier: &Document) -> Result<usize> {
        let (matched, _effects) = self.apply_update(selector, modifier, false)?;
        Ok(matched)
    }

    /// Update-or-insert: behaves like [`Collection::update`], except that
    /// when no document matches `selector`, a new document built from
    /// `selector`'s equality clauses plus `modifier`'s `$set` is inserted.
    pub fn upsert(&self, selector: &Document, modifier: &Document) -> Result<QueryEffects> {
        let (_matched, effects) = self.apply_update(selector, modifier, true)?;
        Ok(effects)
    }

    fn apply_update(
        &self,
        selector: &Document,
        modifier: &Document,
        upsert: bool,
    ) -> Result<(usize, QueryEffects)> {
        let matching_ids: Vec<String> = {
            let store = self.store.borrow();
            store
                .order
                .iter()
                .filter(|id| {
                    store
                        .docs
                        .get(*id)
                        .map(|d| query::matches(selector, d))
                        .unwrap_or(false)
                })
                .cloned()
                .collect()
        };

        if matching_ids.is_empty() {
            if !upsert {
                // Still validate the modifier shape even when nothing matches.
                let mut probe = Document::new();
                query::apply_modifier(&mut probe, modifier)?;
                return Ok((0, QueryEffects::default()));
            }
            let mut seed = selector_equality_seed(selector);
            query::apply_modifier(&mut seed, modifier)?;
            let id = self.insert(seed)?;
            return Ok((
                0,
                QueryEffects {
                    updated: Vec::new(),
                    upserted: Some(id),
                },
            ));
        }

        let matched = matching_ids.len();
        let mut updated = Vec::new();
        for id in matching_ids {
            let before = self
                .store
                .borrow()
                .docs
                .get(&id)
                .cloned()
                .expect("id came from a snapshot of the store taken moments ago");
            let mut after = before.clone();
            query::apply_modifier(&mut after, modifier)?;
            if after == before {
                // Matched, but nothing actually changed: still counts
                // towards `matched`, but no signal fires and the id is not
                // recorded as updated.
                continue;
            }
            self.document_pre_changed.fire(&DocumentPreChanged {
                id: id.clone(),
                before: before.clone(),
                after: after.clone(),
            });
            self.store.borrow_mut().insert(id.clone(), after.clone());
            let diff = diff_fields(&before, &after);
            self.document_changed.fire(&DocumentChanged {
                id: id.clone(),
                diff,
            });
            updated.push(id);
        }
        Ok((
            matched,
            QueryEffects {
                updated,
                upserted: None,
            },
        ))
    }

    /// Removes every document matching `selector`. Returns the number
    /// removed.
    pub fn remove(&self, selector: &Document) -> Result<usize> {
        let matching_ids: Vec<String> = {
            let store = self.store.borrow();
            store
                .order
                .iter()
                .filter(|id| {
                    store
                        .docs
                        .get(*id)
                        .map(|d| query::matches(selector, d))
                        .unwrap_or(false)
                })
                .cloned()
                .collect()
        };
        let mut removed = 0;
        for id in matching_ids {
            let doc = self.store.borrow().docs.get(&id).cloned();
            let Some(doc) = doc else { continue };
            self.document_pre_removed.fire(&DocumentPreRemoved {
                id: id.clone(),
                doc,
            });
            self.store.borrow_mut().remove(&id);
            self.document_removed.fire(&DocumentRemoved { id });
            removed += 1;
        }
        Ok(removed)
    }
}

/// Builds the seed document for an upsert-triggered insert from a
/// selector's top-level equality clauses (operator clauses like `$and`
/// or comparison documents contribute nothing, matching the common
/// MongoDB upsert convention).
fn selector_equality_seed(selector: &Document) -> Document {
    let mut seed = Document::new();
    for (k, v) in selector {
        if k.starts_with('$') {
            continue;
        }
        if v.is_object() && v.as_object().unwrap().keys().all(|k| k.starts_with('$')) {
            continue;
        }
        seed.insert(k.clone(), v.clone());
    }
    seed
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(v: serde_json::Value) -> Document {
        v.as_object().unwrap().clone()
    }

    #[test]
    fn insert_then_find_one_round_trips() {
        let coll = Collection::detached("things").unwrap();
        let id = coll.insert(doc(json!({"foo": "bar"}))).unwrap();
        let found = coll.find_one(&Document::new());
        assert_eq!(found.get("foo").unwrap(), "bar");
        assert_eq!(found.get("_id").unwrap(), &id);
    }

    #[test]
    fn insert_rejects_invalid_supplied_id() {
        let coll = Collection::detached("things").unwrap();
        let err = coll
            .insert(doc(json!({"_id": "not-valid", "foo": 1})))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidId(_)));
    }

    #[test]
    fn update_matches_and_mutates_all() {
        let coll = Collection::detached("things").unwrap();
        coll.insert(doc(json!({"foo": "bar"}))).unwrap();
        coll.insert(doc(json!({"foo": "baz"}))).unwrap();
        let n = coll
            .update(&Document::new(), &doc(json!({"$set": {"bar": "foo"}})))
            .unwrap();
        assert_eq!(n, 2);
        for d in coll.find(&Document::new()) {
            assert_eq!(d.get("bar").unwrap(), "foo");
        }
    }

    #[test]
    fn update_is_idempotent() {
        let coll = Collection::detached("things").unwrap();
        coll.insert(doc(json!({"foo": "bar"}))).unwrap();
        let modifier = doc(json!({"$set": {"bar": "foo"}}));
        coll.update(&Document::new(), &modifier).unwrap();
        let before = coll.find(&Document::new());
        coll.update(&Document::new(), &modifier).unwrap();
        let after = coll.find(&Document::new());
        assert_eq!(before, after);
    }

    #[test]
    fn update_returns_matched_count_even_when_nothing_actually_changes() {
        let coll = Collection::detached("things").unwrap();
        coll.insert(doc(json!({"foo": "bar"}))).unwrap();
        coll.insert(doc(json!({"foo": "baz"}))).unwrap();
        let modifier = doc(json!({"$set": {"x": 1}}));
        let first = coll.update(&Document::new(), &modifier).unwrap();
        assert_eq!(first, 2);
        // Re-applying the same modifier changes nothing, but both documents
        // still matched the selector and must still be counted.
        let second = coll.update(&Document::new(), &modifier).unwrap();
        assert_eq!(second, 2);
    }

    #[test]
    fn selective_remove_leaves_others() {
        let coll = Collection::detached("things").unwrap();
        let id1 = coll.insert(doc(json!({"foo": 1}))).unwrap();
        coll.insert(doc(json!({"foo": 2}))).unwrap();
        let n = coll.remove(&doc(json!({"_id": id1}))).unwrap();
        assert_eq!(n, 1);
        assert_eq!(coll.count(&Document::new()), 1);
        assert_eq!(coll.find_one(&Document::new()).get("foo").unwrap(), 2);
    }

    #[test]
    fn insert_then_remove_then_find_one_is_empty() {
        let coll = Collection::detached("things").unwrap();
        let id = coll.insert(doc(json!({"foo": 1}))).unwrap();
        coll.remove(&doc(json!({"_id": id.clone()}))).unwrap();
        assert!(coll.find_one(&doc(json!({"_id": id}))).is_empty());
    }

    #[test]
    fn upsert_inserts_when_nothing_matches() {
        let coll = Collection::detached("things").unwrap();
        let effects = coll
            .upsert(
                &doc(json!({"sku": "abc"})),
                &doc(json!({"$set": {"qty": 3}})),
            )
            .unwrap();
        assert!(effects.upserted.is_some());
        let found = coll.find_one(&doc(json!({"sku": "abc"})));
        assert_eq!(found.get("qty").unwrap(), 3);
    }

    #[test]
    fn same_name_collections_share_a_store() {
        let a = Collection::new("shared_test_case").unwrap();
        a.insert(doc(json!({"foo": 1}))).unwrap();
        let b = Collection::new("shared_test_case").unwrap();
        assert_eq!(b.count(&Document::new()), 1);
    }

    #[test]
    fn update_with_no_matches_still_validates_modifier() {
        let coll = Collection::detached("things").unwrap();
        let err = coll.update(&doc(json!({"missing": true})), &Document::new());
        assert!(err.is_err());
    }

    #[test]
    fn empty_collection_name_is_rejected() {
        assert!(matches!(
            Collection::detached("").unwrap_err(),
            Error::InvalidCollectionName(_)
        ));
    }
}
