use crate::api::Mode;
use crate::commands::Out;
use crate::cycle::CycleReport;
use crate::donations::Donations;
use crate::error::{Error, ErrorType};
use crate::{Config, Result};
use anyhow::anyhow;

/// Runs a single ingestion cycle and reports what it did.
///
/// # Errors
/// - `Config` if no wallet is configured.
/// - `Upstream` if a page could not be fetched. Anything counted before that has still been saved.
/// - `Persistence` if the state could not be saved.
pub async fn poll(config: Config, mode: Mode) -> Result<Out<CycleReport>> {
    let donations = Donations::open(&config, mode).await;
    let report = donations.poll_once().await?;
    donations.flush().await?;
    if let Some(e) = &report.aborted {
        return Err(Error::new(
            ErrorType::Upstream,
            anyhow!(
                "{e}; {} donations were counted before the cycle stopped",
                report.counted
            ),
        ));
    }
    let message = format!(
        "Counted {} donations from {} pages, skipped {}",
        report.counted, report.pages, report.skipped
    );
    Ok(Out::new(message, report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test::TestEnv;

    #[tokio::test]
    async fn test_poll_in_test_mode() {
        let env = TestEnv::new();
        let config = env.config().await;
        let out = poll(config.clone(), Mode::Testing).await.unwrap();
        assert_eq!(out.message(), "Counted 3 donations from 2 pages, skipped 1");
        assert_eq!(
            out.structure().unwrap().watermark.as_deref(),
            Some("seed-4")
        );

        // the second run starts from the saved watermark
        let out = poll(config, Mode::Testing).await.unwrap();
        assert_eq!(out.structure().unwrap().counted, 0);
    }
}
