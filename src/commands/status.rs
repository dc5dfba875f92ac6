use crate::commands::Out;
use crate::donations::{Donations, Health};
use crate::model::CountryTotals;
use crate::{Config, Result};
use std::fmt::Write;

/// Reports the watermark. Only reads the state files, it does not contact any service.
pub async fn health(config: Config) -> Result<Out<Health>> {
    let health = Donations::open_local(&config).await.health().await;
    let message = match &health.last_seen_tx_id {
        Some(id) => format!("OK, the last counted transaction is {id}"),
        None => "OK, no transactions have been counted yet".to_string(),
    };
    Ok(Out::new(message, health))
}

/// Reports the totals for every country. Only reads the state files, it does not contact any
/// service.
pub async fn stats(config: Config) -> Result<Out<CountryTotals>> {
    let totals = Donations::open_local(&config).await.stats().await;
    let mut message = String::from("Donations by country (TON):");
    let mut any = false;
    for (country, amount) in totals.ranked() {
        if amount.is_positive() {
            any = true;
            let _ = write!(message, "\n  {country}: {amount}");
        }
    }
    if !any {
        message.push_str("\n  none yet");
    }
    Ok(Out::new(message, totals))
}
