//! One ingestion cycle: page through the wallet's transaction history newest-first, count the
//! donations that have not been counted yet, and advance the watermark.

use crate::api::{Ledger, LedgerError};
use crate::country;
use crate::cursor::CursorTracker;
use crate::model::{Amount, CountryTotals, Snapshot, Transaction};
use serde::{Serialize, Serializer};
use std::fmt;
use tokio::sync::Mutex;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, trace, warn};

/// Where a cycle is. Only used for tracing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleState {
    Idle,
    FetchingPage(usize),
    Filtering,
    Aggregating,
    Committing,
    Aborted,
}

impl fmt::Display for CycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CycleState::Idle => f.write_str("idle"),
            CycleState::FetchingPage(n) => write!(f, "fetching page {n}"),
            CycleState::Filtering => f.write_str("filtering"),
            CycleState::Aggregating => f.write_str("aggregating"),
            CycleState::Committing => f.write_str("committing"),
            CycleState::Aborted => f.write_str("aborted"),
        }
    }
}

/// What a cycle did.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CycleReport {
    /// Pages fetched successfully, including the empty page that ended the scan.
    pub pages: usize,
    /// Donations added to the totals.
    pub counted: usize,
    /// New incoming transactions that were not counted, because of their amount or comment.
    pub skipped: usize,
    /// The watermark after the cycle.
    #[serde(rename = "lastSeenTxId")]
    pub watermark: Option<String>,
    /// Whether the watermark moved.
    pub advanced: bool,
    /// Set when a page could not be fetched. Whatever was counted before that is kept.
    #[serde(serialize_with = "serialize_error")]
    pub aborted: Option<LedgerError>,
}

impl CycleReport {
    pub fn is_aborted(&self) -> bool {
        self.aborted.is_some()
    }
}

fn serialize_error<S: Serializer>(e: &Option<LedgerError>, s: S) -> Result<S::Ok, S::Error> {
    match e {
        Some(e) => s.serialize_some(&e.to_string()),
        None => s.serialize_none(),
    }
}

/// Runs one cycle against `ledger`, fetching at most `page_limit` pages. Every fetch must finish
/// before `deadline`; one that does not is treated as `LedgerError::Timeout`.
///
/// The lock on `snapshot` is only held while a fetched page is applied and while the watermark is
/// committed, never across a fetch. The candidate watermark is committed even when the cycle is
/// aborted, so that the donations already added are not counted again by the next cycle.
pub async fn run(
    ledger: &dyn Ledger,
    snapshot: &Mutex<Snapshot>,
    page_limit: usize,
    deadline: Instant,
) -> CycleReport {
    let mut tracker = CursorTracker::new(snapshot.lock().await.cursor());
    let mut report = CycleReport::default();
    let mut state = CycleState::Idle;

    for page in 0..page_limit {
        transition(&mut state, CycleState::FetchingPage(page));
        let transactions = match timeout_at(deadline, ledger.fetch_page(page)).await {
            Ok(Ok(transactions)) => transactions,
            Ok(Err(e)) => {
                transition(&mut state, CycleState::Aborted);
                warn!("Aborting the cycle at page {page}: {e}");
                report.aborted = Some(e);
                break;
            }
            Err(_) => {
                transition(&mut state, CycleState::Aborted);
                warn!("Aborting the cycle at page {page}: the cycle ran out of time");
                report.aborted = Some(LedgerError::Timeout);
                break;
            }
        };
        report.pages += 1;
        if transactions.is_empty() {
            debug!("Page {page} is empty, nothing older to scan");
            break;
        }

        let mut guard = snapshot.lock().await;
        let stopped = apply_page(
            transactions,
            &mut tracker,
            &mut guard.totals,
            &mut report,
            &mut state,
        );
        drop(guard);
        if stopped {
            debug!("Reached the watermark on page {page}");
            break;
        }
    }

    if state != CycleState::Aborted {
        transition(&mut state, CycleState::Committing);
    }
    let mut guard = snapshot.lock().await;
    report.advanced = tracker.commit(&mut guard.cursor);
    report.watermark = guard.cursor().last_seen_tx_id().map(String::from);
    drop(guard);
    if state != CycleState::Aborted {
        transition(&mut state, CycleState::Idle);
    }
    report
}

/// Applies one page to `totals`. Returns `true` when the watermark was reached, which ends the
/// scan.
fn apply_page(
    mut transactions: Vec<Transaction>,
    tracker: &mut CursorTracker,
    totals: &mut CountryTotals,
    report: &mut CycleReport,
    state: &mut CycleState,
) -> bool {
    transition(state, CycleState::Filtering);
    // stable, so equal times keep their upstream order
    transactions.sort_by(|a, b| b.time().cmp(&a.time()));

    transition(state, CycleState::Aggregating);
    for tx in &transactions {
        let Some(msg) = tx.incoming_message() else {
            continue;
        };
        // can't be matched against the watermark, so counting it would count it every cycle
        if tx.id().is_none() {
            trace!("Skipping an incoming transaction with no identifier at {}", tx.time());
            report.skipped += 1;
            continue;
        }
        if !tracker.is_new(tx) {
            break;
        }
        tracker.observe(tx);

        let Some(amount) = Amount::from_nano(msg.nano()).filter(Amount::is_positive) else {
            trace!("Skipping {:?}: no positive amount", tx.id());
            report.skipped += 1;
            continue;
        };
        let Some(country) = msg.comment().and_then(country::normalize) else {
            debug!("Skipping {:?}: no country in {:?}", tx.id(), msg.comment());
            report.skipped += 1;
            continue;
        };
        totals.add(country, amount);
        report.counted += 1;
        debug!("Counted {amount} TON for {country} from {:?}", tx.id());
    }
    tracker.stopped()
}

fn transition(state: &mut CycleState, next: CycleState) {
    trace!("Cycle {state} -> {next}");
    *state = next;
}
