//! The DDP session: frames the wire protocol, correlates method calls and
//! subscriptions with their server responses, and fans out per-document
//! change events to whatever is listening (typically a
//! [`DdpCollection`](crate::ddp_collection::DdpCollection)).
//!
//! A session owns exactly one [`Transport`] and is driven by a single
//! [`Session::run`] future — the "single I/O reactor" the rest of the
//! crate assumes. Methods like [`Session::call_method`] do not themselves
//! await the network: they hand their frame to an outbound queue that
//! `run` drains, so they can be called synchronously from within a signal
//! handler dispatched by `run` itself.

use crate::error::{Error, Result};
use crate::id::{random_id, MethodIdAllocator};
use crate::protocol::{ClientMessage, ServerMessage};
use crate::signal::Signal;
use crate::transport::Transport;
use serde_json::Value;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use tokio::sync::mpsc;

/// The state of the connect handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    Failed,
}

/// Payload of [`Session::added`].
#[derive(Debug, Clone, PartialEq)]
pub struct Added {
    pub collection: String,
    pub id: String,
    pub fields: Value,
}

/// Payload of [`Session::changed`].
#[derive(Debug, Clone, PartialEq)]
pub struct Changed {
    pub collection: String,
    pub id: String,
    pub fields: Value,
    pub cleared: Vec<String>,
}

/// Payload of [`Session::removed`].
#[derive(Debug, Clone, PartialEq)]
pub struct Removed {
    pub collection: String,
    pub id: String,
}

type ResultListener = Box<dyn FnOnce(Result<Value>)>;
type ReadyListener = Box<dyn FnOnce(Result<()>)>;

/// A DDP session bound to a single [`Transport`].
pub struct Session<T: Transport> {
    transport: RefCell<Option<T>>,
    outbound_tx: mpsc::UnboundedSender<String>,
    outbound_rx: RefCell<Option<mpsc::UnboundedReceiver<String>>>,
    state: Cell<SessionState>,
    session_id: RefCell<Option<String>>,
    method_ids: MethodIdAllocator,
    result_listeners: RefCell<HashMap<String, ResultListener>>,
    ready_listeners: RefCell<HashMap<String, ReadyListener>>,

    pub connected: Signal<String>,
    /// Fired with [`Error::ConnectRejected`] when the server sends `failed`
    /// in response to the connect handshake.
    pub failed: Signal<Error>,
    pub added: Signal<Added>,
    pub changed: Signal<Changed>,
    pub removed: Signal<Removed>,
    /// Fired once per subscription id named in a `ready` frame.
    pub ready: Signal<String>,
    /// Fired once per method id named in an `updated` frame — the data
    /// effects of that method are now visible to subscriptions.
    pub synchronized: Signal<String>,
    /// Fired with [`Error::ServerError`] for a top-level `error` frame not
    /// tied to any method or sub.
    pub server_error: Signal<Error>,
}

impl<T: Transport> Session<T> {
    pub fn new(transport: T) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Session {
            transport: RefCell::new(Some(transport)),
            outbound_tx: tx,
            outbound_rx: RefCell::new(Some(rx)),
            state: Cell::new(SessionState::Disconnected),
            session_id: RefCell::new(None),
            method_ids: MethodIdAllocator::new(),
            result_listeners: RefCell::new(HashMap::new()),
            ready_listeners: RefCell::new(HashMap::new()),
            connected: Signal::new(),
            failed: Signal::new(),
            added: Signal::new(),
            changed: Signal::new(),
            removed: Signal::new(),
            ready: Signal::new(),
            synchronized: Signal::new(),
            server_error: Signal::new(),
        }
    }

    /// Presents `id` as the prior session to resume during the next
    /// `connect` handshake sent by [`Session::run`].
    pub fn resume(transport: T, prior_session_id: impl Into<String>) -> Self {
        let mut session = Self::new(transport);
        session.session_id = RefCell::new(Some(prior_session_id.into()));
        session
    }

    pub fn state(&self) -> SessionState {
        self.state.get()
    }

    pub fn session_id(&self) -> Option<String> {
        self.session_id.borrow().clone()
    }

    /// Invokes a remote method, returning its method id. `on_result`, if
    /// given, is called exactly once with the server's `result` as `Ok`, or
    /// [`Error::MethodFailed`] as `Err` if the server reported one.
    pub fn call_method(
        &self,
        method: impl Into<String>,
        params: Vec<Value>,
        on_result: Option<impl FnOnce(Result<Value>) + 'static>,
    ) -> Result<String> {
        let id = self.method_ids.next();
        if let Some(cb) = on_result {
            self.result_listeners
                .borrow_mut()
                .insert(id.clone(), Box::new(cb));
        }
        self.send(ClientMessage::Method {
            method: method.into(),
            params,
            id: id.clone(),
        })?;
        Ok(id)
    }

    /// Opens a subscription, returning its id. `on_ready` is called once,
    /// with `Ok(())` when the subscription's initial batch completes, or
    /// [`Error::SubscriptionFailed`] as `Err` if the server sent `nosub`
    /// instead.
    pub fn subscribe(
        &self,
        name: impl Into<String>,
        params: Vec<Value>,
        on_ready: Option<impl FnOnce(Result<()>) + 'static>,
    ) -> Result<String> {
        let id = random_id();
        if let Some(cb) = on_ready {
            self.ready_listeners.borrow_mut().insert(id.clone(), Box::new(cb));
        }
        self.send(ClientMessage::Sub {
            name: name.into(),
            params,
            id: id.clone(),
        })?;
        Ok(id)
    }

    pub fn unsubscribe(&self, id: impl Into<String>) -> Result<()> {
        self.send(ClientMessage::Unsub { id: id.into() })
    }

    /// Feeds a single server frame through the dispatcher without going
    /// through a transport. Mainly useful for tests that want to drive the
    /// session's reaction to specific frames without scripting an entire
    /// transport around `run`.
    pub fn inject_frame(&self, frame: &str) {
        self.dispatch(frame);
    }

    fn send(&self, msg: ClientMessage) -> Result<()> {
        let encoded = serde_json::to_string(&msg)?;
        // The receiving half only goes away once `run` has returned, at
        // which point further sends are simply dropped.
        let _ = self.outbound_tx.send(encoded);
        Ok(())
    }

    /// Drives the connect handshake and then loops forever, dispatching
    /// inbound frames and flushing outbound ones, until the transport
    /// closes. This is the crate's single I/O reactor.
    pub async fn run(&self) -> Result<()> {
        let mut transport = self
            .transport
            .borrow_mut()
            .take()
            .expect("Session::run called more than once");
        let mut outbound_rx = self
            .outbound_rx
            .borrow_mut()
            .take()
            .expect("Session::run called more than once");

        self.state.set(SessionState::Connecting);
        let handshake = serde_json::to_string(&ClientMessage::Connect {
            version: "1".to_string(),
            support: vec!["1".to_string()],
            session: self.session_id(),
        })?;
        transport.send_text(handshake).await?;

        loop {
            tokio::select! {
                outgoing = outbound_rx.recv() => {
                    match outgoing {
                        Some(frame) => transport.send_text(frame).await?,
                        None => continue,
                    }
                }
                incoming = transport.recv_text() => {
                    match incoming? {
                        Some(frame) => self.dispatch(&frame),
                        None => {
                            self.state.set(SessionState::Disconnected);
                            return Ok(());
                        }
                    }
                }
            }
        }
    }

    pub(crate) fn dispatch(&self, frame: &str) {
        let msg: ServerMessage = match serde_json::from_str(frame) {
            Ok(msg) => msg,
            Err(err) => {
                tracing::warn!(%err, frame, "dropping undecodable ddp frame");
                return;
            }
        };
        match msg {
            ServerMessage::Connected { session } => {
                self.state.set(SessionState::Connected);
                *self.session_id.borrow_mut() = Some(session.clone());
                self.connected.fire(&session);
            }
            ServerMessage::Failed { .. } => {
                self.state.set(SessionState::Failed);
                self.failed.fire(&Error::ConnectRejected);
            }
            ServerMessage::Ping { id } => {
                let _ = self.send(ClientMessage::Pong { id });
            }
            ServerMessage::Error { reason, .. } => {
                tracing::warn!(?reason, "server reported a protocol error");
                self.server_error.fire(&Error::ServerError(reason));
            }
            ServerMessage::Nosub { id, error } => {
                if let Some(cb) = self.ready_listeners.borrow_mut().remove(&id) {
                    cb(Err(Error::SubscriptionFailed {
                        id: id.clone(),
                        reason: error.and_then(|err| err.summary()),
                    }));
                }
            }
            ServerMessage::Added {
                collection,
                id,
                fields,
            } => self.added.fire(&Added {
                collection,
                id,
                fields: fields.unwrap_or_else(|| Value::Object(Default::default())),
            }),
            ServerMessage::Changed {
                collection,
                id,
                fields,
                cleared,
            } => self.changed.fire(&Changed {
                collection,
                id,
                fields: fields.unwrap_or_else(|| Value::Object(Default::default())),
                cleared: cleared.unwrap_or_default(),
            }),
            ServerMessage::Removed { collection, id } => {
                self.removed.fire(&Removed { collection, id })
            }
            ServerMessage::Ready { subs } => {
                for id in subs {
                    if let Some(cb) = self.ready_listeners.borrow_mut().remove(&id) {
                        cb(Ok(()));
                    }
                    self.ready.fire(&id);
                }
            }
            ServerMessage::Updated { methods } => {
                for id in methods {
                    self.synchronized.fire(&id);
                }
            }
            ServerMessage::Result { id, result, error } => {
                if let Some(cb) = self.result_listeners.borrow_mut().remove(&id) {
                    match error {
                        Some(err) => cb(Err(Error::MethodFailed {
                            id: id.clone(),
                            reason: err.summary(),
                        })),
                        None => cb(Ok(result.unwrap_or(Value::Null))),
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell as StdRefCell;
    use std::collections::VecDeque;
    use std::rc::Rc;

    /// An in-memory transport for exercising the session without a real
    /// socket: outbound frames land in `sent`, inbound frames are drained
    /// from `to_deliver` in order.
    struct FakeTransport {
        sent: Rc<StdRefCell<Vec<String>>>,
        to_deliver: VecDeque<String>,
    }

    #[async_trait::async_trait(?Send)]
    impl Transport for FakeTransport {
        async fn send_text(&mut self, text: String) -> Result<()> {
            self.sent.borrow_mut().push(text);
            Ok(())
        }

        async fn recv_text(&mut self) -> Result<Option<String>> {
            Ok(self.to_deliver.pop_front())
        }
    }

    #[tokio::test]
    async fn connect_handshake_reaches_connected_state() {
        let sent = Rc::new(StdRefCell::new(Vec::new()));
        let transport = FakeTransport {
            sent: sent.clone(),
            to_deliver: VecDeque::from(vec![serde_json::json!({
                "msg": "connected", "session": "abc"
            })
            .to_string()]),
        };
        let session = Rc::new(Session::new(transport));
        let seen_session_id = Rc::new(StdRefCell::new(None));
        let seen_inner = seen_session_id.clone();
        let _token = session.connected.connect(move |id| *seen_inner.borrow_mut() = Some(id.clone()));
        // The fake transport reports the connection closed right after
        // delivering the one frame queued above, so by the time `run`
        // returns the session has already gone back to `Disconnected` —
        // assert against the signal fired mid-flight instead of final state.
        session.run().await.unwrap();
        assert_eq!(*seen_session_id.borrow(), Some("abc".to_string()));
        assert_eq!(session.session_id(), Some("abc".to_string()));
        assert!(sent.borrow()[0].contains("\"msg\":\"connect\""));
    }

    #[tokio::test]
    async fn ping_is_answered_with_matching_pong() {
        let sent = Rc::new(StdRefCell::new(Vec::new()));
        let transport = FakeTransport {
            sent: sent.clone(),
            to_deliver: VecDeque::from(vec![
                serde_json::json!({"msg": "ping", "id": "7"}).to_string(),
            ]),
        };
        let session = Session::new(transport);
        session.run().await.unwrap();
        assert!(sent.borrow().iter().any(|f| f.contains("\"pong\"") && f.contains("\"7\"")));
    }

    #[tokio::test]
    async fn result_listener_fires_exactly_once() {
        let sent = Rc::new(StdRefCell::new(Vec::new()));
        let transport = FakeTransport {
            sent: sent.clone(),
            to_deliver: VecDeque::new(),
        };
        let session = Rc::new(Session::new(transport));
        let calls = Rc::new(StdRefCell::new(0));
        let calls_inner = calls.clone();
        let id = session
            .call_method(
                "/things/insert",
                vec![],
                Some(move |_result: Result<Value>| {
                    *calls_inner.borrow_mut() += 1;
                }),
            )
            .unwrap();
        session.dispatch(&serde_json::json!({"msg": "result", "id": id}).to_string());
        assert_eq!(*calls.borrow(), 1);
        assert!(session.result_listeners.borrow().is_empty());
    }

    #[tokio::test]
    async fn ready_fires_registered_listener_and_signal() {
        let sent = Rc::new(StdRefCell::new(Vec::new()));
        let transport = FakeTransport {
            sent: sent.clone(),
            to_deliver: VecDeque::new(),
        };
        let session = Rc::new(Session::new(transport));
        let fired = Rc::new(StdRefCell::new(false));
        let fired_inner = fired.clone();
        let id = session
            .subscribe(
                "things",
                vec![],
                Some(move |_result: Result<()>| *fired_inner.borrow_mut() = true),
            )
            .unwrap();
        session.dispatch(&serde_json::json!({"msg": "ready", "subs": [id]}).to_string());
        assert!(*fired.borrow());
    }
}
