//! Implements the `Ledger` trait using in-memory TonAPI responses.
//!
//! Like `TestSheet`, this is compiled into the binary so that the whole app can be run without
//! talking to TonAPI (see `Mode::Testing`).

use crate::api::{parse_page, Ledger, LedgerError};
use crate::model::Transaction;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Serves pages from response bodies held in memory. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct TestLedger {
    state: Arc<Mutex<TestLedgerState>>,
}

#[derive(Debug, Default)]
struct TestLedgerState {
    /// Response bodies by page index. Pages past the end are empty.
    bodies: Vec<Value>,
    /// Pages that fail every time they are fetched.
    failures: HashMap<usize, LedgerError>,
    /// Every page index that was requested, in order.
    fetches: Vec<usize>,
}

impl TestLedger {
    /// Creates a ledger that serves `bodies`, one per page.
    pub fn new(bodies: Vec<Value>) -> Self {
        let ledger = Self::default();
        ledger.set_bodies(bodies);
        ledger
    }

    /// Creates a ledger whose pages are `{"transactions": [...]}` bodies holding `pages`.
    pub fn with_pages(pages: Vec<Vec<Value>>) -> Self {
        Self::new(
            pages
                .into_iter()
                .map(|txs| json!({ "transactions": txs }))
                .collect(),
        )
    }

    /// A few donations so that `Mode::Testing` has something to count.
    pub fn seeded() -> Self {
        Self::with_pages(vec![vec![
            incoming_json("seed-4", 1_718_000_400, 2_500_000_000, "Japan"),
            incoming_json("seed-3", 1_718_000_300, 1_000_000_000, "usa"),
            incoming_json("seed-2", 1_718_000_200, 750_000_000, "thank you!"),
            incoming_json("seed-1", 1_718_000_100, 500_000_000, "germany"),
        ]])
    }

    pub fn set_bodies(&self, bodies: Vec<Value>) {
        self.lock().bodies = bodies;
    }

    /// Makes every fetch of `page` fail with `error`.
    pub fn fail_page(&self, page: usize, error: LedgerError) {
        self.lock().failures.insert(page, error);
    }

    /// The page indexes that have been requested so far.
    pub fn fetches(&self) -> Vec<usize> {
        self.lock().fetches.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TestLedgerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait::async_trait]
impl Ledger for TestLedger {
    async fn fetch_page(&self, page: usize) -> Result<Vec<Transaction>, LedgerError> {
        let mut state = self.lock();
        state.fetches.push(page);
        if let Some(e) = state.failures.get(&page) {
            return Err(e.clone());
        }
        Ok(state.bodies.get(page).map(parse_page).unwrap_or_default())
    }
}

/// Builds one element of a TonAPI `transactions` array for an incoming transfer with a comment.
pub fn incoming_json(hash: &str, utime: i64, nano: i64, comment: &str) -> Value {
    json!({
        "hash": hash,
        "utime": utime,
        "in_msg": {
            "value": nano,
            "decoded": { "comment": comment }
        }
    })
}

/// Builds one element of a TonAPI `transactions` array for a transaction without an incoming
/// message.
pub fn outgoing_json(hash: &str, utime: i64) -> Value {
    json!({ "hash": hash, "utime": utime, "out_msgs": [{ "value": 1 }] })
}
