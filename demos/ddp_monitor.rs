//! Connects to a DDP server, subscribes to a named record set, and prints
//! its live-query result set as JSON every time it changes.
//!
//! ```text
//! ddp-monitor <name> [--ws <url>]
//! ```

use clap::Parser;
use ddp_client::config::{SessionConfig, DEFAULT_URL};
use ddp_client::ddp_collection::DdpCollection;
use ddp_client::live_query::LiveQuery;
use ddp_client::session::Session;
use ddp_client::transport::WebSocketTransport;
use std::cell::RefCell;
use std::rc::Rc;

#[derive(Parser)]
#[command(name = "ddp-monitor", version)]
struct Args {
    /// Name of the published record set to subscribe to.
    name: String,

    /// DDP websocket url to connect to.
    #[arg(long, default_value = DEFAULT_URL)]
    ws: String,
}

fn print_live_query(live_query: &LiveQuery) {
    print!("\x1B[2J\x1B[H");
    match serde_json::to_string_pretty(&live_query.data()) {
        Ok(json) => println!("{json}"),
        Err(err) => eprintln!("failed to render live query results: {err}"),
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ddp_client::error::Result<()> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();
    let config = SessionConfig::new(args.ws);

    let transport = match config.connect_timeout {
        Some(timeout) => WebSocketTransport::connect_with_timeout(&config.url, timeout).await?,
        None => WebSocketTransport::connect(&config.url).await?,
    };
    let session = Rc::new(Session::new(transport));

    let live_query: Rc<RefCell<Option<Rc<LiveQuery>>>> = Rc::new(RefCell::new(None));
    let collection = DdpCollection::new(session.clone(), args.name, Vec::<serde_json::Value>::new())?;

    let live_query_for_ready = live_query.clone();
    let collection_for_ready = Rc::downgrade(&collection);
    let _ready_token = collection.on_ready.connect(move |_| {
        let Some(collection) = collection_for_ready.upgrade() else {
            return;
        };
        let lq = Rc::new(LiveQuery::new(collection.collection(), Default::default()));
        print_live_query(&lq);
        let print_lq = lq.clone();
        // Leaked on purpose for the lifetime of the process: a CLI monitor
        // never tears this down before exit.
        Box::leak(Box::new(lq.on_updated(move |_| print_live_query(&print_lq))));
        *live_query_for_ready.borrow_mut() = Some(lq);
    });

    let local = tokio::task::LocalSet::new();
    local.run_until(async move { session.run().await }).await
}
