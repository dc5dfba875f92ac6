//! Types that represent the core data model, such as `Transaction` and `CountryTotals`.
mod amount;
mod totals;
mod transaction;

pub use amount::{Amount, AmountError, PRECISION};
use serde::{Deserialize, Serialize};
pub use totals::{CountryTotals, TotalsError};
pub use transaction::{IncomingMessage, Transaction};

/// The watermark: the identifier of the newest transaction that a committed cycle has accounted
/// for. This is the contents of `state.json`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CursorState {
    #[serde(rename = "lastSeenTxId", default)]
    pub(crate) last_seen_tx_id: Option<String>,
}

impl CursorState {
    pub fn new(last_seen_tx_id: Option<String>) -> Self {
        Self { last_seen_tx_id }
    }

    pub fn last_seen_tx_id(&self) -> Option<&str> {
        self.last_seen_tx_id.as_deref()
    }
}

/// Everything that is persisted: the totals and the watermark.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Snapshot {
    pub(crate) totals: CountryTotals,
    pub(crate) cursor: CursorState,
}

impl Snapshot {
    pub fn new(totals: CountryTotals, cursor: CursorState) -> Self {
        Self { totals, cursor }
    }

    pub fn totals(&self) -> &CountryTotals {
        &self.totals
    }

    pub fn cursor(&self) -> &CursorState {
        &self.cursor
    }

    /// Brings in what another writer changed between `base` and `theirs`. See
    /// `CountryTotals::merge`. The watermark from `theirs` is taken only if ours has not moved
    /// since `base`.
    pub fn merge(&mut self, base: &Snapshot, theirs: &Snapshot) {
        self.totals.merge(&base.totals, &theirs.totals);
        if self.cursor == base.cursor {
            self.cursor = theirs.cursor.clone();
        }
    }
}
