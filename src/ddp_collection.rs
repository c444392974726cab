//! Bridges a [`Session`] and a local [`Collection`]: server-sent document
//! events are mirrored into the local store, and local mutations are
//! forwarded to the server as method calls — each side suppressed on the
//! other's echo.

use crate::collection::Collection;
use crate::document::Document;
use crate::error::{Error, Result};
use crate::protocol::oid_extended_json;
use crate::query::QueryEffects;
use crate::session::Session;
use crate::signal::{BlockHandle, ListenerToken, Signal};
use crate::transport::Transport;
use serde_json::Value;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

#[derive(Default)]
struct Pending {
    by_method: HashMap<String, String>,
    by_doc: HashMap<String, String>,
}

impl Pending {
    fn insert(&mut self, method_id: String, doc_id: String) {
        self.by_method.insert(method_id.clone(), doc_id.clone());
        self.by_doc.insert(doc_id, method_id);
    }

    fn remove_by_method(&mut self, method_id: &str) {
        if let Some(doc_id) = self.by_method.remove(method_id) {
            self.by_doc.remove(&doc_id);
        }
    }

    fn contains_doc(&self, doc_id: &str) -> bool {
        self.by_doc.contains_key(doc_id)
    }
}

struct ForwardPushes {
    insert_token: ListenerToken,
    insert_block: BlockHandle,
    update_token: ListenerToken,
    update_block: BlockHandle,
    remove_token: ListenerToken,
    remove_block: BlockHandle,
}

/// A local [`Collection`] kept in sync with a DDP subscription of the same
/// name: server changes flow in, local mutations flow out, and a
/// `(methodId, documentId)` bijection ensures each side sees every change
/// exactly once.
pub struct DdpCollection<T: Transport + 'static> {
    session: Rc<Session<T>>,
    collection: Rc<Collection>,
    name: String,
    sub_id: RefCell<Option<String>>,
    pending: RefCell<Pending>,
    forward: RefCell<Option<ForwardPushes>>,
    ready: Cell<bool>,
    pub on_ready: Signal<()>,
    _session_tokens: RefCell<Vec<ListenerToken>>,
}

impl<T: Transport + 'static> DdpCollection<T> {
    /// Subscribes to `name` on `session` with `params`, mirroring the
    /// result into a local collection also named `name`. `params` accepts
    /// either a literal array or any iterator of JSON-convertible values,
    /// subsuming what the original expressed as two separate constructors.
    pub fn new(
        session: Rc<Session<T>>,
        name: impl Into<String>,
        params: impl IntoIterator<Item = impl Into<Value>>,
    ) -> Result<Rc<DdpCollection<T>>> {
        let name = name.into();
        let collection = Collection::new(name.clone())?;
        let params: Vec<Value> = params.into_iter().map(Into::into).collect();

        let this = Rc::new(DdpCollection {
            session: session.clone(),
            collection,
            name: name.clone(),
            sub_id: RefCell::new(None),
            pending: RefCell::new(Pending::default()),
            forward: RefCell::new(None),
            ready: Cell::new(false),
            on_ready: Signal::new(),
            _session_tokens: RefCell::new(Vec::new()),
        });

        this.init(&session, name, params)?;
        Ok(this)
    }

    fn init(
        self: &Rc<Self>,
        session: &Rc<Session<T>>,
        name: String,
        params: Vec<Value>,
    ) -> Result<()> {
        let mut tokens = Vec::new();

        let weak = Rc::downgrade(self);
        let collection_name = name.clone();
        tokens.push(session.added.connect(move |event| {
            if event.collection != collection_name {
                return;
            }
            if let Some(this) = weak.upgrade() {
                this.on_server_added(&event.id, &event.fields);
            }
        }));

        let weak = Rc::downgrade(self);
        let collection_name = name.clone();
        tokens.push(session.changed.connect(move |event| {
            if event.collection != collection_name {
                return;
            }
            if let Some(this) = weak.upgrade() {
                this.on_server_changed(&event.id, &event.fields, &event.cleared);
            }
        }));

        let weak = Rc::downgrade(self);
        let collection_name = name.clone();
        tokens.push(session.removed.connect(move |event| {
            if event.collection != collection_name {
                return;
            }
            if let Some(this) = weak.upgrade() {
                this.on_server_removed(&event.id);
            }
        }));

        let weak = Rc::downgrade(self);
        tokens.push(session.synchronized.connect(move |method_id| {
            if let Some(this) = weak.upgrade() {
                this.pending.borrow_mut().remove_by_method(method_id);
            }
        }));

        *self._session_tokens.borrow_mut() = tokens;

        let weak = Rc::downgrade(self);
        let sub_id = session.subscribe(
            name,
            params,
            Some(move |result: Result<()>| {
                let Some(this) = weak.upgrade() else {
                    return;
                };
                match result {
                    Ok(()) => {
                        this.install_forward_pushes();
                        this.ready.set(true);
                        this.on_ready.fire(&());
                    }
                    Err(err) => {
                        tracing::error!(%err, "ddp subscription failed");
                    }
                }
            }),
        )?;
        *self.sub_id.borrow_mut() = Some(sub_id);
        Ok(())
    }

    /// Installs the three forward-push connections. This happens only
    /// once, right after the subscription's first `ready` — doing it any
    /// earlier would cause the initial snapshot's inserts to echo straight
    /// back to the server.
    fn install_forward_pushes(self: &Rc<Self>) {
        let weak = Rc::downgrade(self);
        let (insert_token, insert_block) = self.collection.document_added.connect_blockable(
            move |event| {
                if let Some(this) = weak.upgrade() {
                    this.commit_insert(&event.id, &event.fields);
                }
            },
        );

        let weak = Rc::downgrade(self);
        let (update_token, update_block) = self.collection.document_changed.connect_blockable(
            move |event| {
                if let Some(this) = weak.upgrade() {
                    this.commit_update(&event.id, &event.diff.changed, &event.diff.cleared);
                }
            },
        );

        let weak = Rc::downgrade(self);
        let (remove_token, remove_block) = self.collection.document_removed.connect_blockable(
            move |event| {
                if let Some(this) = weak.upgrade() {
                    this.commit_remove(&event.id);
                }
            },
        );

        *self.forward.borrow_mut() = Some(ForwardPushes {
            insert_token,
            insert_block,
            update_token,
            update_block,
            remove_token,
            remove_block,
        });
    }

    pub fn collection(&self) -> &Rc<Collection> {
        &self.collection
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_ready(&self) -> bool {
        self.ready.get()
    }

    pub fn subscription_id(&self) -> Option<String> {
        self.sub_id.borrow().clone()
    }

    // ---- application-facing mutators ----

    pub fn insert(self: &Rc<Self>, doc: Document) -> Result<String> {
        let forward = self.forward.borrow();
        let handles = forward.as_ref().ok_or(Error::NotReady)?;
        let temp = handles
            .insert_block
            .is_blocked()
            .then(|| self.attach_temp_insert_forward());
        drop(forward);
        let id = self.collection.insert(doc)?;
        drop(temp);
        Ok(id)
    }

    pub fn update(self: &Rc<Self>, selector: &Document, modifier: &Document) -> Result<usize> {
        let forward = self.forward.borrow();
        let handles = forward.as_ref().ok_or(Error::NotReady)?;
        let temp = handles
            .update_block
            .is_blocked()
            .then(|| self.attach_temp_update_forward());
        drop(forward);
        let n = self.collection.update(selector, modifier)?;
        drop(temp);
        Ok(n)
    }

    pub fn upsert(
        self: &Rc<Self>,
        selector: &Document,
        modifier: &Document,
    ) -> Result<QueryEffects> {
        let forward = self.forward.borrow();
        let handles = forward.as_ref().ok_or(Error::NotReady)?;
        let temp_insert = handles
            .insert_block
            .is_blocked()
            .then(|| self.attach_temp_insert_forward());
        let temp_update = handles
            .update_block
            .is_blocked()
            .then(|| self.attach_temp_update_forward());
        drop(forward);
        let effects = self.collection.upsert(selector, modifier)?;
        drop(temp_insert);
        drop(temp_update);
        Ok(effects)
    }

    pub fn remove(self: &Rc<Self>, selector: &Document) -> Result<usize> {
        let forward = self.forward.borrow();
        let handles = forward.as_ref().ok_or(Error::NotReady)?;
        let temp = handles
            .remove_block
            .is_blocked()
            .then(|| self.attach_temp_remove_forward());
        drop(forward);
        let n = self.collection.remove(selector)?;
        drop(temp);
        Ok(n)
    }

    fn attach_temp_insert_forward(self: &Rc<Self>) -> ListenerToken {
        let weak = Rc::downgrade(self);
        self.collection.document_added.connect_once(move |event| {
            if let Some(this) = weak.upgrade() {
                this.commit_insert(&event.id, &event.fields);
            }
        })
    }

    fn attach_temp_update_forward(self: &Rc<Self>) -> ListenerToken {
        let weak = Rc::downgrade(self);
        self.collection.document_changed.connect_once(move |event| {
            if let Some(this) = weak.upgrade() {
                this.commit_update(&event.id, &event.diff.changed, &event.diff.cleared);
            }
        })
    }

    fn attach_temp_remove_forward(self: &Rc<Self>) -> ListenerToken {
        let weak = Rc::downgrade(self);
        self.collection.document_removed.connect_once(move |event| {
            if let Some(this) = weak.upgrade() {
                this.commit_remove(&event.id);
            }
        })
    }

    // ---- forward push: local mutation -> server method call ----

    fn commit_insert(self: &Rc<Self>, id: &str, fields: &Document) {
        let mut payload = fields.clone();
        payload.insert("_id".to_string(), oid_extended_json(id));
        let method = format!("/{}/insert", self.name);
        let weak = Rc::downgrade(self);
        let method_id = self.session.call_method(
            method,
            vec![Value::Object(payload)],
            Some(move |result: Result<Value>| {
                if let (Some(this), Err(err)) = (weak.upgrade(), result) {
                    tracing::warn!(%err, "insert method failed");
                    let _ = this;
                }
            }),
        );
        if let Ok(method_id) = method_id {
            self.pending.borrow_mut().insert(method_id, id.to_string());
        }
    }

    fn commit_update(self: &Rc<Self>, id: &str, changed: &Document, cleared: &[String]) {
        let modifier = build_modifier(changed, cleared);
        if modifier.is_empty() {
            return;
        }
        let selector = Value::Object(Document::from_iter([(
            "_id".to_string(),
            oid_extended_json(id),
        )]));
        let method = format!("/{}/update", self.name);
        let weak = Rc::downgrade(self);
        let method_id = self.session.call_method(
            method,
            vec![selector, Value::Object(modifier)],
            Some(move |result: Result<Value>| {
                if let (Some(this), Err(err)) = (weak.upgrade(), result) {
                    tracing::warn!(%err, "update method failed");
                    let _ = this;
                }
            }),
        );
        if let Ok(method_id) = method_id {
            self.pending.borrow_mut().insert(method_id, id.to_string());
        }
    }

    fn commit_remove(self: &Rc<Self>, id: &str) {
        let selector = Value::Object(Document::from_iter([(
            "_id".to_string(),
            oid_extended_json(id),
        )]));
        let method = format!("/{}/remove", self.name);
        let weak = Rc::downgrade(self);
        let method_id = self.session.call_method(
            method,
            vec![selector],
            Some(move |result: Result<Value>| {
                if let (Some(this), Err(err)) = (weak.upgrade(), result) {
                    tracing::warn!(%err, "remove method failed");
                    let _ = this;
                }
            }),
        );
        if let Ok(method_id) = method_id {
            self.pending.borrow_mut().insert(method_id, id.to_string());
        }
    }

    // ---- server events -> local store, with echo suppression ----

    fn on_server_added(self: &Rc<Self>, id: &str, fields: &Value) {
        if self.pending.borrow().contains_doc(id) {
            return;
        }
        let mut doc = fields.as_object().cloned().unwrap_or_default();
        doc.insert("_id".to_string(), id.to_string().into());
        self.apply_blocked(
            |f| &f.insert_block,
            || {
                let _ = self.collection.insert(doc.clone());
            },
        );
    }

    fn on_server_changed(self: &Rc<Self>, id: &str, fields: &Value, cleared: &[String]) {
        if self.pending.borrow().contains_doc(id) {
            return;
        }
        let changed = fields.as_object().cloned().unwrap_or_default();
        let modifier = build_modifier(&changed, cleared);
        if modifier.is_empty() {
            return;
        }
        let selector =
            Document::from_iter([("_id".to_string(), Value::String(id.to_string()))]);
        self.apply_blocked(
            |f| &f.update_block,
            || {
                let _ = self.collection.update(&selector, &modifier);
            },
        );
    }

    fn on_server_removed(self: &Rc<Self>, id: &str) {
        if self.pending.borrow().contains_doc(id) {
            return;
        }
        let selector =
            Document::from_iter([("_id".to_string(), Value::String(id.to_string()))]);
        self.apply_blocked(
            |f| &f.remove_block,
            || {
                let _ = self.collection.remove(&selector);
            },
        );
    }

    fn apply_blocked(
        self: &Rc<Self>,
        pick: impl Fn(&ForwardPushes) -> &BlockHandle,
        apply: impl FnOnce(),
    ) {
        let forward = self.forward.borrow();
        match forward.as_ref() {
            Some(handles) => {
                let block = pick(handles);
                drop(forward);
                block.with_blocked(apply);
            }
            None => {
                drop(forward);
                apply();
            }
        }
    }
}

impl<T: Transport + 'static> Drop for DdpCollection<T> {
    fn drop(&mut self) {
        if let Some(id) = self.sub_id.borrow_mut().take() {
            let _ = self.session.unsubscribe(id);
        }
    }
}

fn build_modifier(changed: &Document, cleared: &[String]) -> Document {
    let mut modifier = Document::new();
    if !changed.is_empty() {
        modifier.insert("$set".to_string(), Value::Object(changed.clone()));
    }
    if !cleared.is_empty() {
        let unset: Document = cleared
            .iter()
            .map(|k| (k.clone(), Value::Bool(true)))
            .collect();
        modifier.insert("$unset".to_string(), Value::Object(unset));
    }
    modifier
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    struct FakeTransport {
        sent: Rc<RefCell<Vec<Value>>>,
        to_deliver: VecDeque<String>,
    }

    #[async_trait::async_trait(?Send)]
    impl Transport for FakeTransport {
        async fn send_text(&mut self, text: String) -> Result<()> {
            self.sent.borrow_mut().push(serde_json::from_str(&text).unwrap());
            Ok(())
        }

        async fn recv_text(&mut self) -> Result<Option<String>> {
            Ok(self.to_deliver.pop_front())
        }
    }

    fn doc(v: Value) -> Document {
        v.as_object().unwrap().clone()
    }

    #[test]
    fn mutation_before_ready_fails_not_ready() {
        let sent = Rc::new(RefCell::new(Vec::new()));
        let transport = FakeTransport {
            sent: sent.clone(),
            to_deliver: VecDeque::new(),
        };
        let session = Rc::new(Session::new(transport));
        let ddp_coll =
            DdpCollection::new(session, "not_ready_things", Vec::<Value>::new()).unwrap();
        let err = ddp_coll.insert(doc(serde_json::json!({"a": 1}))).unwrap_err();
        assert!(matches!(err, Error::NotReady));
    }

    #[test]
    fn ready_callback_installs_forward_push_and_local_mutation_forwards_once() {
        let sent = Rc::new(RefCell::new(Vec::new()));
        let transport = FakeTransport {
            sent: sent.clone(),
            to_deliver: VecDeque::new(),
        };
        let session = Rc::new(Session::new(transport));
        let ddp_coll = DdpCollection::new(
            session.clone(),
            "ready_things",
            Vec::<Value>::new(),
        )
        .unwrap();

        let sub_id = ddp_coll.sub_id.borrow().clone().unwrap();
        session.dispatch(&serde_json::json!({"msg": "ready", "subs": [sub_id]}).to_string());
        assert!(ddp_coll.is_ready());

        let id = ddp_coll.insert(doc(serde_json::json!({"foo": 1}))).unwrap();
        let sent = sent.borrow();
        let insert_call = sent
            .iter()
            .find(|f| f["msg"] == "method" && f["method"] == "/ready_things/insert")
            .expect("expected one insert method call");
        assert_eq!(insert_call["params"][0]["foo"], 1);
        assert_eq!(
            insert_call["params"][0]["_id"]["$value"],
            Value::String(id)
        );
    }

    #[test]
    fn server_echo_of_pending_mutation_is_swallowed() {
        let sent = Rc::new(RefCell::new(Vec::new()));
        let transport = FakeTransport {
            sent: sent.clone(),
            to_deliver: VecDeque::new(),
        };
        let session = Rc::new(Session::new(transport));
        let ddp_coll =
            DdpCollection::new(session.clone(), "echo_things", Vec::<Value>::new()).unwrap();
        let sub_id = ddp_coll.sub_id.borrow().clone().unwrap();
        session.dispatch(&serde_json::json!({"msg": "ready", "subs": [sub_id]}).to_string());

        let id = ddp_coll.insert(doc(serde_json::json!({"foo": 1}))).unwrap();
        assert_eq!(ddp_coll.collection().count(&Document::new()), 1);

        // The server replays our own insert back as `added` before acking
        // the method: the local store must not gain a second document.
        session.dispatch(
            &serde_json::json!({
                "msg": "added", "collection": "echo_things", "id": id, "fields": {"foo": 1}
            })
            .to_string(),
        );
        assert_eq!(ddp_coll.collection().count(&Document::new()), 1);
    }
}
