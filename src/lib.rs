//! A client library for the Distributed Data Protocol (DDP): the
//! JSON-over-WebSocket RPC and publish/subscribe protocol used by
//! reactive application servers in the Meteor family.
//!
//! The pieces compose bottom-up:
//!
//! - [`session`] frames the wire protocol and correlates method calls and
//!   subscriptions with their responses.
//! - [`collection`] is a local, in-memory document store with a
//!   MongoDB-like selector/modifier dialect ([`query`]).
//! - [`live_query`] maintains a materialised view of a collection for a
//!   fixed selector.
//! - [`ddp_collection`] bridges a session and a collection bidirectionally,
//!   forwarding local writes to the server and suppressing their echoes.
//!
//! ```no_run
//! use ddp_client::{config::SessionConfig, ddp_collection::DdpCollection, session::Session, transport::WebSocketTransport};
//! use std::rc::Rc;
//!
//! # async fn run() -> ddp_client::error::Result<()> {
//! let config = SessionConfig::default();
//! let transport = match config.connect_timeout {
//!     Some(timeout) => WebSocketTransport::connect_with_timeout(&config.url, timeout).await?,
//!     None => WebSocketTransport::connect(&config.url).await?,
//! };
//! let session = Rc::new(Session::new(transport));
//! let things = DdpCollection::new(session.clone(), "things", Vec::<serde_json::Value>::new())?;
//!
//! let local = tokio::task::LocalSet::new();
//! local
//!     .run_until(async move {
//!         session.run().await.unwrap();
//!     })
//!     .await;
//! # let _ = things;
//! # Ok(())
//! # }
//! ```

pub mod collection;
pub mod config;
pub mod ddp_collection;
pub mod document;
pub mod error;
pub mod id;
pub mod live_query;
pub mod protocol;
pub mod query;
pub mod session;
pub mod signal;
pub mod transport;

pub use collection::Collection;
pub use ddp_collection::DdpCollection;
pub use document::Document;
pub use error::{Error, Result};
pub use live_query::LiveQuery;
pub use session::Session;
