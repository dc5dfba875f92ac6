//! The best-effort copy of the totals kept in an external sink (the Google sheet).
//!
//! Whether a sink exists is decided once, at startup. After that the rest of the program just
//! calls `publish` and the `Disabled` variant quietly does nothing.

use crate::api::{SheetError, Sink};
use crate::model::CountryTotals;
use crate::retry::RetryPolicy;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum MirrorError {
    #[error("no Google sheet is configured")]
    NotConfigured,
    #[error(transparent)]
    Sink(#[from] SheetError),
}

pub enum Mirror {
    Configured {
        sink: Arc<dyn Sink>,
        retry: RetryPolicy,
    },
    Disabled,
}

impl Mirror {
    /// `Configured` with the default retry policy when there is a sink, otherwise `Disabled`.
    pub fn new(sink: Option<Arc<dyn Sink>>) -> Self {
        match sink {
            Some(sink) => Mirror::Configured {
                sink,
                retry: RetryPolicy::default(),
            },
            None => Mirror::Disabled,
        }
    }

    pub fn with_retry(self, retry: RetryPolicy) -> Self {
        match self {
            Mirror::Configured { sink, .. } => Mirror::Configured { sink, retry },
            Mirror::Disabled => Mirror::Disabled,
        }
    }

    pub fn is_configured(&self) -> bool {
        matches!(self, Mirror::Configured { .. })
    }

    /// Publishes `totals`, retrying transient failures. Returns the number of rows written.
    pub async fn publish(&self, totals: &CountryTotals) -> Result<usize, MirrorError> {
        let Mirror::Configured { sink, retry } = self else {
            return Err(MirrorError::NotConfigured);
        };
        let rows = retry
            .run(|| sink.publish(totals), SheetError::is_retryable)
            .await?;
        Ok(rows)
    }

    /// Like `publish`, but failures are logged instead of returned.
    pub async fn publish_best_effort(&self, totals: &CountryTotals) {
        match self.publish(totals).await {
            Ok(rows) => info!("Google sheet updated with {rows} countries"),
            Err(MirrorError::NotConfigured) => debug!("No Google sheet, skipping the mirror"),
            Err(e) => warn!("Unable to update the Google sheet: {e}"),
        }
    }
}

impl std::fmt::Debug for Mirror {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Mirror::Configured { retry, .. } => {
                f.debug_struct("Configured").field("retry", retry).finish()
            }
            Mirror::Disabled => f.write_str("Disabled"),
        }
    }
}
