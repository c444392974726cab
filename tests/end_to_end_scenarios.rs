//! Black-box scenarios exercising the full session/collection/live-query
//! stack together, driven entirely through the public API and an
//! in-process fake transport (no real network).

use async_trait::async_trait;
use ddp_client::document::Document;
use ddp_client::error::Result;
use ddp_client::{Collection, DdpCollection, LiveQuery, Session};
use serde_json::{json, Value};
use std::cell::RefCell;
use std::rc::Rc;

/// A transport that never produces real frames; used for tests that only
/// exercise `Session::inject_frame` and never call `run`.
struct InertTransport {
    sent: Rc<RefCell<Vec<Value>>>,
}

impl InertTransport {
    fn new() -> (Self, Rc<RefCell<Vec<Value>>>) {
        let sent = Rc::new(RefCell::new(Vec::new()));
        (InertTransport { sent: sent.clone() }, sent)
    }
}

#[async_trait(?Send)]
impl ddp_client::transport::Transport for InertTransport {
    async fn send_text(&mut self, text: String) -> Result<()> {
        self.sent
            .borrow_mut()
            .push(serde_json::from_str(&text).unwrap());
        Ok(())
    }

    async fn recv_text(&mut self) -> Result<Option<String>> {
        std::future::pending().await
    }
}

fn doc(v: Value) -> Document {
    v.as_object().unwrap().clone()
}

#[tokio::test]
async fn find_one_round_trips_a_freshly_inserted_document() {
    let coll = Collection::detached("things").unwrap();
    let id = coll.insert(doc(json!({"foo": "bar"}))).unwrap();
    let found = coll.find_one(&Document::new());
    assert_eq!(found.get("foo").unwrap(), "bar");
    assert_eq!(found.get("_id").unwrap(), &id);
}

#[tokio::test]
async fn multi_update_touches_every_matching_document() {
    let coll = Collection::detached("things").unwrap();
    coll.insert(doc(json!({"foo": "bar"}))).unwrap();
    coll.insert(doc(json!({"foo": "baz"}))).unwrap();
    let n = coll
        .update(&Document::new(), &doc(json!({"$set": {"bar": "foo"}})))
        .unwrap();
    assert_eq!(n, 2);
    assert!(coll
        .find(&Document::new())
        .iter()
        .all(|d| d.get("bar").unwrap() == "foo"));
}

#[tokio::test]
async fn live_query_tracks_add_change_remove_across_a_collection() {
    let coll = Collection::detached("items").unwrap();
    let lq = LiveQuery::new(&coll, doc(json!({"kind": "a"})));

    coll.insert(doc(json!({"kind": "b"}))).unwrap();
    assert!(lq.data().is_empty(), "non-matching insert must not appear");

    let id = coll.insert(doc(json!({"kind": "a", "v": 1}))).unwrap();
    assert_eq!(lq.data().len(), 1);

    coll.update(
        &doc(json!({"_id": id.clone()})),
        &doc(json!({"$set": {"kind": "b"}})),
    )
    .unwrap();
    assert!(
        lq.data().is_empty(),
        "document must leave the view once it stops matching"
    );

    coll.update(
        &doc(json!({"_id": id.clone()})),
        &doc(json!({"$set": {"kind": "a"}})),
    )
    .unwrap();
    assert_eq!(lq.data().len(), 1);

    coll.remove(&doc(json!({"_id": id}))).unwrap();
    assert!(lq.data().is_empty());
}

#[tokio::test]
async fn ddp_collection_applies_initial_batch_without_echoing_it_back() {
    let (transport, sent) = InertTransport::new();
    let session = Rc::new(Session::new(transport));
    let ddp_coll =
        DdpCollection::new(session.clone(), "scenario_things", Vec::<Value>::new()).unwrap();

    session.inject_frame(&json!({"msg": "connected", "session": "s1"}).to_string());
    session.inject_frame(
        &json!({
            "msg": "added",
            "collection": "scenario_things",
            "id": "507f1f77bcf86cd799439011",
            "fields": {"foo": 1}
        })
        .to_string(),
    );
    assert_eq!(ddp_coll.collection().count(&Document::new()), 1);
    assert!(!ddp_coll.is_ready(), "forward pushes install only after ready");

    let sub_id = ddp_coll.subscription_id().unwrap();
    session.inject_frame(&json!({"msg": "ready", "subs": [sub_id]}).to_string());
    assert!(ddp_coll.is_ready());

    // The initial batch must not have triggered an insert method call back
    // to the server.
    assert!(!sent
        .borrow()
        .iter()
        .any(|f| f["msg"] == "method" && f["method"] == "/scenario_things/insert"));
}

#[tokio::test]
async fn local_mutation_after_ready_is_forwarded_exactly_once_and_its_echo_is_swallowed() {
    let (transport, sent) = InertTransport::new();
    let session = Rc::new(Session::new(transport));
    let ddp_coll =
        DdpCollection::new(session.clone(), "scenario_echo", Vec::<Value>::new()).unwrap();

    let sub_id = ddp_coll.subscription_id().unwrap();
    session.inject_frame(&json!({"msg": "ready", "subs": [sub_id]}).to_string());

    let id = ddp_coll.insert(doc(json!({"foo": 1}))).unwrap();
    assert_eq!(ddp_coll.collection().count(&Document::new()), 1);

    let insert_calls: Vec<_> = sent
        .borrow()
        .iter()
        .filter(|f| f["msg"] == "method" && f["method"] == "/scenario_echo/insert")
        .cloned()
        .collect();
    assert_eq!(insert_calls.len(), 1, "exactly one method frame per local insert");
    let method_id = insert_calls[0]["id"].as_str().unwrap().to_string();

    // Server replays our own document back as `added` before acking the
    // method call.
    session.inject_frame(
        &json!({"msg": "added", "collection": "scenario_echo", "id": id, "fields": {"foo": 1}})
            .to_string(),
    );
    assert_eq!(
        ddp_coll.collection().count(&Document::new()),
        1,
        "echo of our own insert must not duplicate the document"
    );

    session.inject_frame(&json!({"msg": "updated", "methods": [method_id]}).to_string());
}

#[tokio::test]
async fn local_insert_before_ready_is_rejected() {
    let (transport, _sent) = InertTransport::new();
    let session = Rc::new(Session::new(transport));
    let ddp_coll = DdpCollection::new(session, "scenario_not_ready", Vec::<Value>::new()).unwrap();
    let err = ddp_coll.insert(doc(json!({"foo": 1}))).unwrap_err();
    assert!(matches!(err, ddp_client::Error::NotReady));
}
