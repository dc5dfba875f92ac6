use crate::commands::Out;
use crate::error::{ErrorType, IntoResult};
use crate::{Config, Result};
use anyhow::Context;
use std::path::Path;

/// Creates the home directory, its subdirectories and an initial `config.json`.
///
/// # Arguments
/// - `home` - The directory that will be the home directory, e.g. `$HOME/donations`
/// - `wallet` - The TON address to watch for donations.
/// - `sheet_url` - The Google Sheet that totals are mirrored to, if any.
/// - `client_secret` - The downloaded OAuth 2.0 client credentials JSON, if any. It is copied to
///   its default location in the home directory.
///
/// # Errors
/// - Returns an error if any file operations fail or the sheet URL is not valid.
pub async fn init(
    home: &Path,
    wallet: Option<&str>,
    sheet_url: Option<&str>,
    client_secret: Option<&Path>,
) -> Result<Out<()>> {
    let config = Config::create(home, wallet, sheet_url, client_secret)
        .await
        .context("Unable to create the home directory and config")
        .pub_result(ErrorType::Config)?;
    let mut message = format!(
        "Successfully created the donations directory at '{}'",
        config.root().display()
    );
    if config.wallet().is_none() {
        message.push_str(". Add a wallet to config.json before running 'donations run'");
    }
    Ok(message.into())
}
