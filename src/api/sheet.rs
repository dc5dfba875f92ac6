//! Implements the `Sink` trait using the `sheets::Client` to mirror the totals to a Google sheet.

use crate::api::{Sink, TokenProvider};
use crate::error::Res;
use crate::model::CountryTotals;
use anyhow::anyhow;
use sheets::types::{
    BatchClearValuesRequest, BatchUpdateValuesRequest, Dimension, ValueInputOption, ValueRange,
};
use sheets::ClientError;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::trace;

/// The header row written above the totals.
pub(crate) const HEADER: [&str; 2] = ["Country", "Amount"];

/// Errors from publishing to a sheet.
#[derive(Debug, Error)]
pub enum SheetError {
    #[error("the sheets API returned HTTP {status}: {message}")]
    Http { status: u16, message: String },
    #[error("unable to reach the sheets API: {0}")]
    Transport(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl SheetError {
    /// Rate limiting, server errors and transport failures are worth another try.
    pub fn is_retryable(&self) -> bool {
        match self {
            SheetError::Http { status, .. } => *status == 429 || (500..600).contains(status),
            SheetError::Transport(_) => true,
            SheetError::Other(_) => false,
        }
    }
}

/// Writes the totals to the two-column `Country | Amount` layout, largest amount first. It takes a
/// `TokenProvider`, on which it calls refresh to keep the token up-to-date.
pub(super) struct GoogleSheet {
    spreadsheet_id: String,
    tab: String,
    token_provider: Mutex<TokenProvider>,
}

impl GoogleSheet {
    pub(super) async fn new(
        spreadsheet_id: String,
        tab: String,
        mut token_provider: TokenProvider,
    ) -> Res<Self> {
        // fail at startup rather than on the first publish if the token cannot be refreshed
        let _ = token_provider.token_with_refresh().await?;
        Ok(Self {
            spreadsheet_id,
            tab,
            token_provider: Mutex::new(token_provider),
        })
    }

    async fn client(&self) -> Result<sheets::Client, SheetError> {
        let mut token_provider = self.token_provider.lock().await;
        let access_token = token_provider.token_with_refresh().await?;
        // The sheets crate wants client_id, client_secret, redirect_uri and refresh_token too, but
        // we handle refresh ourselves so only the access token matters.
        Ok(sheets::Client::new(
            String::new(),
            String::new(),
            String::new(),
            access_token.to_string(),
            String::new(),
        ))
    }
}

#[async_trait::async_trait]
impl Sink for GoogleSheet {
    async fn publish(&self, totals: &CountryTotals) -> Result<usize, SheetError> {
        let values = rows(totals);
        let count = values.len() - 1;
        trace!("Publishing {count} rows to {}", self.tab);
        let client = self.client().await?;

        let clear = BatchClearValuesRequest {
            ranges: vec![format!("{}!A:B", self.tab)],
        };
        client
            .spreadsheets()
            .values_batch_clear(&self.spreadsheet_id, &clear)
            .await
            .map_err(map_client_error)?;

        let update = BatchUpdateValuesRequest {
            data: vec![ValueRange {
                major_dimension: Some(Dimension::Rows),
                range: format!("{}!A1", self.tab),
                values,
            }],
            include_values_in_response: Some(false),
            response_date_time_render_option: None,
            response_value_render_option: None,
            value_input_option: Some(ValueInputOption::UserEntered),
        };
        client
            .spreadsheets()
            .values_batch_update(&self.spreadsheet_id, &update)
            .await
            .map_err(map_client_error)?;
        Ok(count)
    }
}

/// The header followed by one row per country, largest amount first.
pub(crate) fn rows(totals: &CountryTotals) -> Vec<Vec<String>> {
    let mut rows = vec![HEADER.iter().map(|s| s.to_string()).collect::<Vec<_>>()];
    rows.extend(
        totals
            .ranked()
            .into_iter()
            .filter(|(country, _)| !country.is_empty())
            .map(|(country, amount)| vec![country.to_string(), amount.to_string()]),
    );
    rows
}

fn map_client_error(e: ClientError) -> SheetError {
    match e {
        ClientError::HttpError { status, error, .. } => SheetError::Http {
            status: status.as_u16(),
            message: error,
        },
        ClientError::ReqwestError(inner) => SheetError::Transport(inner.to_string()),
        ClientError::ReqwestMiddleWareError(inner) => SheetError::Transport(inner.to_string()),
        other => SheetError::Other(anyhow!("sheets client error: {other}")),
    }
}
