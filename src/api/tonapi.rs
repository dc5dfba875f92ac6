//! Implements the `Ledger` trait against the TonAPI transaction history endpoint.

use crate::api::{parse_page, Ledger, LedgerError};
use crate::error::Res;
use crate::model::Transaction;
use anyhow::Context;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, trace};
use url::Url;

/// Response bodies longer than this are cut short in error messages.
const MAX_ERROR_BODY: usize = 300;

/// Fetches pages of `GET /v2/blockchain/accounts/{wallet}/transactions`.
#[derive(Debug, Clone)]
pub struct TonApi {
    client: reqwest::Client,
    endpoint: Url,
    api_key: Option<String>,
    page_size: usize,
}

impl TonApi {
    /// # Errors
    /// - `base_url` is not a valid URL.
    /// - The HTTP client cannot be built.
    pub fn new(
        base_url: &str,
        wallet: &str,
        api_key: Option<String>,
        page_size: usize,
        timeout: Duration,
    ) -> Res<Self> {
        let endpoint = Url::parse(&format!(
            "{}/v2/blockchain/accounts/{}/transactions",
            base_url.trim_end_matches('/'),
            wallet
        ))
        .with_context(|| format!("Invalid TonAPI URL '{base_url}'"))?;
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Unable to build the HTTP client for TonAPI")?;
        Ok(Self {
            client,
            endpoint,
            api_key: api_key.filter(|k| !k.is_empty()),
            page_size,
        })
    }

    fn page_url(&self, page: usize) -> Url {
        let mut url = self.endpoint.clone();
        url.query_pairs_mut()
            .append_pair("limit", &self.page_size.to_string())
            .append_pair("offset", &(page * self.page_size).to_string());
        url
    }
}

#[async_trait::async_trait]
impl Ledger for TonApi {
    async fn fetch_page(&self, page: usize) -> Result<Vec<Transaction>, LedgerError> {
        let url = self.page_url(page);
        trace!("GET {url}");
        let mut request = self.client.get(url);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        let response = request.send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LedgerError::Http {
                status: Some(status.as_u16()),
                message: format!("HTTP {status}: {}", truncate(&body)),
            });
        }

        let body = response.text().await?;
        let value: Value = serde_json::from_str(&body)
            .map_err(|e| LedgerError::InvalidResponse(format!("{e}: {}", truncate(&body))))?;
        let transactions = parse_page(&value);
        debug!("Page {page} had {} transactions", transactions.len());
        Ok(transactions)
    }
}

fn truncate(s: &str) -> &str {
    match s.char_indices().nth(MAX_ERROR_BODY) {
        Some((i, _)) => &s[..i],
        None => s,
    }
}
