use crate::api::Mode;
use crate::commands::Out;
use crate::donations::Donations;
use crate::error::{ErrorType, IntoResult};
use crate::scheduler::Scheduler;
use crate::{Config, Result};
use anyhow::Context;
use tracing::info;

/// Polls for donations on the configured interval until ctrl-c is pressed.
///
/// # Errors
/// - `Config` if no wallet is configured (not checked in `Mode::Testing`).
pub async fn run(config: Config, mode: Mode) -> Result<Out<()>> {
    if mode == Mode::Live {
        config.require_wallet().pub_result(ErrorType::Config)?;
    }
    let donations = Donations::open(&config, mode).await;
    let handle = Scheduler::new(donations, config.poll_interval()).spawn();

    tokio::signal::ctrl_c()
        .await
        .context("Unable to listen for ctrl-c")
        .pub_result(ErrorType::Internal)?;
    info!("Shutting down after the current cycle");
    handle.stop().await;
    Ok("Stopped polling for donations".into())
}
