//! Clients for the two external services: TonAPI, where donations come from, and the Google sheet
//! that the totals are mirrored to. Each is behind a trait so that `Mode::Testing` can swap in an
//! in-memory implementation.

mod files;
mod oauth;
mod sheet;
mod sheet_test_client;
mod test_ledger;
mod tonapi;

use crate::error::Res;
use crate::model::{CountryTotals, Transaction};
use crate::Config;
use anyhow::Context;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

pub(crate) use oauth::TokenProvider;
pub use sheet::SheetError;
pub use sheet_test_client::{TestSheet, TestSheetState};
pub use test_ledger::{incoming_json, outgoing_json, TestLedger};
pub use tonapi::TonApi;

// OAuth scopes required for Sheets API access
const OAUTH_SCOPES: &[&str] = &["https://www.googleapis.com/auth/spreadsheets"];

/// When this environment variable is set and non-empty, `Mode::from_env` returns `Mode::Testing`.
pub const TEST_MODE_ENV: &str = "DONATIONS_IN_TEST_MODE";

/// Whether we talk to the real services or to in-memory fakes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    #[default]
    Live,
    Testing,
}

impl Mode {
    pub fn from_env() -> Self {
        match std::env::var(TEST_MODE_ENV) {
            Ok(v) if !v.is_empty() => Mode::Testing,
            _ => Mode::Live,
        }
    }
}

/// Errors from fetching a page of transactions.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    #[error("the request to TonAPI timed out")]
    Timeout,
    #[error("the request to TonAPI failed: {message}")]
    Http {
        /// The HTTP status code, if a response was received at all.
        status: Option<u16>,
        message: String,
    },
    #[error("TonAPI sent a response that could not be read: {0}")]
    InvalidResponse(String),
}

impl From<reqwest::Error> for LedgerError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            LedgerError::Timeout
        } else {
            LedgerError::Http {
                status: e.status().map(|s| s.as_u16()),
                message: e.to_string(),
            }
        }
    }
}

/// A source of transactions for one account, addressed by page.
#[async_trait::async_trait]
pub trait Ledger: Send + Sync {
    /// Fetches page `page` (zero-based). Pages are fixed-size windows of the transaction history,
    /// which TonAPI returns newest-first, although that is not relied on.
    async fn fetch_page(&self, page: usize) -> Result<Vec<Transaction>, LedgerError>;
}

/// Somewhere that a snapshot of the totals can be published to.
#[async_trait::async_trait]
pub trait Sink: Send + Sync {
    /// Replaces whatever was published before with `totals`. Returns the number of country rows
    /// written.
    async fn publish(&self, totals: &CountryTotals) -> Result<usize, SheetError>;
}

/// Pulls the transactions out of a TonAPI response body. The array may be under `transactions` or
/// `items`. Any other shape is treated as an empty page rather than an error, and elements that
/// are not objects are dropped.
pub fn parse_page(body: &Value) -> Vec<Transaction> {
    let items = ["transactions", "items"]
        .into_iter()
        .find_map(|key| body.get(key).and_then(Value::as_array));
    let Some(items) = items else {
        debug!("No transaction array in TonAPI response, treating it as an empty page");
        return Vec::new();
    };
    items.iter().filter_map(Transaction::from_json).collect()
}

/// Creates the `Ledger` for `mode`.
///
/// # Errors
/// - In `Mode::Live`, returns an error if no wallet is configured.
pub(crate) fn ledger(config: &Config, mode: Mode) -> Res<Arc<dyn Ledger>> {
    match mode {
        Mode::Live => {
            let wallet = config.require_wallet()?;
            let client = TonApi::new(
                config.tonapi_url(),
                wallet,
                config.tonapi_key().map(String::from),
                config.page_size(),
                config.request_timeout(),
            )?;
            Ok(Arc::new(client))
        }
        Mode::Testing => Ok(Arc::new(TestLedger::seeded())),
    }
}

/// Creates the `Sink` that totals are mirrored to, if one is configured.
///
/// In `Mode::Live` this is the Google sheet from `sheet_url`. If there is no sheet URL, or the
/// OAuth files cannot be loaded, `None` is returned and mirroring is disabled for the life of the
/// process.
pub(crate) async fn sheet(config: &Config, mode: Mode) -> Option<Arc<dyn Sink>> {
    match mode {
        Mode::Testing => Some(Arc::new(TestSheet::default())),
        Mode::Live => {
            let spreadsheet_id = config.spreadsheet_id()?;
            match google_sheet(config, spreadsheet_id).await {
                Ok(sheet) => Some(Arc::new(sheet)),
                Err(e) => {
                    warn!("Google sheet mirroring is disabled: {e:#}");
                    None
                }
            }
        }
    }
}

async fn google_sheet(config: &Config, spreadsheet_id: &str) -> Res<sheet::GoogleSheet> {
    let token_provider = TokenProvider::load(config.client_secret_path(), config.token_path())
        .await
        .context("Unable to load the Google OAuth files")?;
    sheet::GoogleSheet::new(
        spreadsheet_id.to_string(),
        config.sheet_tab().to_string(),
        token_provider,
    )
    .await
}
