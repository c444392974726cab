//! ID generation for subscriptions/sessions and method calls.
//!
//! Subscription and session identifiers are random alphanumeric strings;
//! method identifiers are a monotonically increasing decimal counter. Both
//! schemes only need to be unique within a single client process, not
//! cryptographically unguessable.

use rand::Rng;
use std::sync::atomic::{AtomicU64, Ordering};

const RANDOM_ID_LEN: usize = 17;
const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

/// Generates a random 17-character alphanumeric identifier, used for
/// subscription ids and (implicitly) the client's view of a session id.
pub fn random_id() -> String {
    let mut rng = rand::thread_rng();
    (0..RANDOM_ID_LEN)
        .map(|_| {
            let idx = rng.gen_range(0..ALPHABET.len());
            ALPHABET[idx] as char
        })
        .collect()
}

/// Allocates decimal method ids, unique for the lifetime of the process.
#[derive(Debug, Default)]
pub struct MethodIdAllocator {
    next: AtomicU64,
}

impl MethodIdAllocator {
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(0),
        }
    }

    /// Returns the next method id and advances the counter.
    pub fn next(&self) -> String {
        self.next.fetch_add(1, Ordering::Relaxed).to_string()
    }
}
