//! A materialised view over a [`Collection`]: the subset of documents
//! matching a fixed selector, kept continuously up to date as the
//! collection changes.

use crate::collection::{Collection, DocumentAdded, DocumentPreChanged, DocumentPreRemoved};
use crate::document::{diff_fields, Document};
use crate::query;
use crate::signal::{ListenerToken, Signal};
use std::cell::RefCell;
use std::rc::Rc;

/// Payload of [`LiveQuery::on_document_added`].
#[derive(Debug, Clone, PartialEq)]
pub struct Added {
    pub id: String,
    pub fields: Document,
}

/// Payload of [`LiveQuery::on_document_changed`].
#[derive(Debug, Clone, PartialEq)]
pub struct Changed {
    pub id: String,
    pub changed: Document,
    pub cleared: Vec<String>,
}

/// Payload of [`LiveQuery::on_document_removed`].
#[derive(Debug, Clone, PartialEq)]
pub struct Removed {
    pub id: String,
}

struct Inner {
    selector: Document,
    results: RefCell<Vec<Document>>,
    added_sig: Signal<Added>,
    changed_sig: Signal<Changed>,
    removed_sig: Signal<Removed>,
    updated_sig: Signal<()>,
}

/// A continuously maintained view of `collection.find(selector)`.
///
/// Holds listener tokens on the backing collection for its lifetime; once
/// dropped, the live query stops tracking the collection but the
/// collection itself is unaffected.
pub struct LiveQuery {
    inner: Rc<Inner>,
    _added_token: ListenerToken,
    _pre_changed_token: ListenerToken,
    _pre_removed_token: ListenerToken,
}

impl LiveQuery {
    pub fn new(collection: &Rc<Collection>, selector: Document) -> LiveQuery {
        let initial = collection.find(&selector);
        let inner = Rc::new(Inner {
            selector,
            results: RefCell::new(initial),
            added_sig: Signal::new(),
            changed_sig: Signal::new(),
            removed_sig: Signal::new(),
            updated_sig: Signal::new(),
        });

        let added_inner = inner.clone();
        let added_token = collection.on_document_added(move |event: &DocumentAdded| {
            added_inner.handle_document_added(event);
        });

        let pre_changed_inner = inner.clone();
        let pre_changed_token =
            collection.on_document_pre_changed(move |event: &DocumentPreChanged| {
                pre_changed_inner.handle_document_pre_changed(event);
            });

        let pre_removed_inner = inner.clone();
        let pre_removed_token =
            collection.on_document_pre_removed(move |event: &DocumentPreRemoved| {
                pre_removed_inner.handle_document_pre_removed(event);
            });

        LiveQuery {
            inner,
            _added_token: added_token,
            _pre_changed_token: pre_changed_token,
            _pre_removed_token: pre_removed_token,
        }
    }

    /// The current matching result set, in the order documents were added.
    pub fn data(&self) -> Vec<Document> {
        self.inner.results.borrow().clone()
    }

    pub fn on_document_added(&self, f: impl FnMut(&Added) + 'static) -> ListenerToken {
        self.inner.added_sig.connect(f)
    }

    pub fn on_document_changed(&self, f: impl FnMut(&Changed) + 'static) -> ListenerToken {
        self.inner.changed_sig.connect(f)
    }

    pub fn on_document_removed(&self, f: impl FnMut(&Removed) + 'static) -> ListenerToken {
        self.inner.removed_sig.connect(f)
    }

    pub fn on_updated(&self, f: impl FnMut(&()) + 'static) -> ListenerToken {
        self.inner.updated_sig.connect(f)
    }
}

impl Inner {
    fn matches(&self, doc: &Document) -> bool {
        query::matches(&self.selector, doc)
    }

    fn position(&self, id: &str) -> Option<usize> {
        self.results
            .borrow()
            .iter()
            .position(|d| d.get("_id").and_then(|v| v.as_str()) == Some(id))
    }

    fn handle_document_added(&self, event: &DocumentAdded) {
        let mut full = event.fields.clone();
        full.insert("_id".to_string(), event.id.clone().into());
        if !self.matches(&full) {
            return;
        }
        self.results.borrow_mut().push(full);
        self.added_sig.fire(&Added {
            id: event.id.clone(),
            fields: event.fields.clone(),
        });
        self.updated_sig.fire(&());
    }

    fn handle_document_pre_changed(&self, event: &DocumentPreChanged) {
        let before_matches = self.matches(&event.before);
        let after_matches = self.matches(&event.after);

        if before_matches && after_matches {
            if let Some(pos) = self.position(&event.id) {
                self.results.borrow_mut()[pos] = event.after.clone();
            }
            let diff = diff_fields(&event.before, &event.after);
            self.changed_sig.fire(&Changed {
                id: event.id.clone(),
                changed: diff.changed,
                cleared: diff.cleared,
            });
            self.updated_sig.fire(&());
        } else if before_matches && !after_matches {
            if let Some(pos) = self.position(&event.id) {
                self.results.borrow_mut().remove(pos);
            }
            self.removed_sig.fire(&Removed {
                id: event.id.clone(),
            });
            self.updated_sig.fire(&());
        } else if !before_matches && after_matches {
            self.results.borrow_mut().push(event.after.clone());
            let mut fields = event.after.clone();
            fields.remove("_id");
            self.added_sig.fire(&Added {
                id: event.id.clone(),
                fields,
            });
            self.updated_sig.fire(&());
        }
        // Neither matches: no-op, no `updated` fired.
    }

    fn handle_document_pre_removed(&self, event: &DocumentPreRemoved) {
        if !self.matches(&event.doc) {
            return;
        }
        if let Some(pos) = self.position(&event.id) {
            self.results.borrow_mut().remove(pos);
        }
        self.removed_sig.fire(&Removed {
            id: event.id.clone(),
        });
        self.updated_sig.fire(&());
    }
}
