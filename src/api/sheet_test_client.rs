//! Implements the `Sink` trait using in-memory data for testing purposes.
//!
//! Note: this is compiled even in the "production" version of this app so that we can run the whole
//! app, top-to-bottom, without using Google Sheets.

use crate::api::sheet::rows;
use crate::api::{SheetError, Sink};
use crate::model::CountryTotals;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// An in-memory stand-in for the Google sheet. Clones share the same state so that a test can hold
/// on to one copy while the app publishes to another.
#[derive(Debug, Clone, Default)]
pub struct TestSheet {
    state: Arc<Mutex<TestSheetState>>,
}

/// What has been written to a `TestSheet`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TestSheetState {
    /// The rows as they would appear in the sheet, header included.
    pub rows: Vec<Vec<String>>,
    /// The number of calls to `publish`, including failed ones.
    pub attempts: usize,
    /// HTTP statuses that the next calls to `publish` fail with, in order.
    pub failures: VecDeque<u16>,
}

impl TestSheet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next calls to `publish` fail with these HTTP statuses.
    pub fn fail_with(&self, statuses: impl IntoIterator<Item = u16>) {
        self.lock().failures.extend(statuses);
    }

    pub fn get_state(&self) -> TestSheetState {
        self.lock().clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TestSheetState> {
        // a panic while holding the lock can only happen in a test that is already failing
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait::async_trait]
impl Sink for TestSheet {
    async fn publish(&self, totals: &CountryTotals) -> Result<usize, SheetError> {
        let mut state = self.lock();
        state.attempts += 1;
        if let Some(status) = state.failures.pop_front() {
            return Err(SheetError::Http {
                status,
                message: "injected failure".to_string(),
            });
        }
        state.rows = rows(totals);
        Ok(state.rows.len() - 1)
    }
}
