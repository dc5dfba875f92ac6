use crate::api::Mode;
use crate::commands::Out;
use crate::donations::{Correction, Donations};
use crate::{Config, Result};

/// Replaces the total for `country`, then saves and mirrors the totals.
///
/// # Errors
/// - `Validation` if the country is not recognized or the amount is negative or not finite.
/// - `Persistence` if the new total could not be saved.
pub async fn set_country(
    config: Config,
    mode: Mode,
    country: &str,
    amount: f64,
) -> Result<Out<Correction>> {
    let donations = Donations::open(&config, mode).await;
    let correction = donations.set_country(country, amount).await?;
    donations.flush().await?;
    let message = format!(
        "Set {} to {} TON",
        correction.country, correction.amount
    );
    Ok(Out::new(message, correction))
}

/// Adds `delta`, which may be negative, to the total for `country`, then saves and mirrors the
/// totals. The total never goes below zero.
///
/// # Errors
/// - `Validation` if the country is not recognized or the delta is not finite.
/// - `Persistence` if the new total could not be saved.
pub async fn add_country(
    config: Config,
    mode: Mode,
    country: &str,
    delta: f64,
) -> Result<Out<Correction>> {
    let donations = Donations::open(&config, mode).await;
    let correction = donations.add_country(country, delta).await?;
    donations.flush().await?;
    let message = format!(
        "Added {delta} TON to {}, the total is now {} TON",
        correction.country, correction.amount
    );
    Ok(Out::new(message, correction))
}

/// Pushes the current totals to the Google sheet.
///
/// # Errors
/// - `Config` if no sheet is configured or it could not be connected to.
/// - `Mirror` if the sheet could not be updated.
pub async fn sync_sheets(config: Config, mode: Mode) -> Result<Out<usize>> {
    let rows = Donations::open(&config, mode).await.sync_mirror().await?;
    Ok(Out::new(
        format!("Wrote {rows} countries to the Google sheet"),
        rows,
    ))
}
