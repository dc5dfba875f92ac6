//! The `Donations` handle owns the totals and the watermark and is the only way to read or change
//! them. The CLI commands, the scheduler and any future HTTP router all go through it.

use crate::api::{self, Ledger, Mode};
use crate::country;
use crate::cycle::{self, CycleReport};
use crate::error::{ErrorType, IntoResult, Res, Result};
use crate::mirror::{Mirror, MirrorError};
use crate::model::{Amount, CountryTotals, Snapshot, TotalsError};
use crate::store::JsonStore;
use crate::Config;
use anyhow::anyhow;
use serde::Serialize;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

/// The number of countries logged at the end of each cycle.
const TOP_COUNTRIES: usize = 5;

/// The answer to a health probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Health {
    pub ok: bool,
    #[serde(rename = "lastSeenTxId")]
    pub last_seen_tx_id: Option<String>,
}

/// The outcome of a successful correction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Correction {
    pub ok: bool,
    pub country: String,
    /// The new total for `country`.
    pub amount: Amount,
}

/// How a cycle is bounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleSettings {
    /// The most pages fetched in one cycle.
    pub page_limit: usize,
    /// How long one cycle may take in total.
    pub timeout: Duration,
}

impl CycleSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            page_limit: config.page_limit(),
            timeout: config.cycle_timeout(),
        }
    }
}

/// A cheaply cloneable handle to the donation totals. Clones share everything.
#[derive(Debug, Clone)]
pub struct Donations {
    inner: Arc<Inner>,
}

struct Inner {
    snapshot: Mutex<Snapshot>,
    store: JsonStore,
    /// What was last read from or written to the store by this handle. Other processes' changes
    /// are whatever differs from it. Holding this serializes writes from this handle.
    persisted: Mutex<Snapshot>,
    mirror: Mirror,
    /// Serializes publishing, so that an older snapshot never replaces a newer one in the sheet.
    publish_lock: Mutex<()>,
    /// The ledger, or why there is none.
    ledger: std::result::Result<Arc<dyn Ledger>, String>,
    /// Held for the whole of a cycle, so only one runs at a time.
    cycle_lock: Mutex<()>,
    settings: CycleSettings,
}

impl std::fmt::Debug for Inner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Inner")
            .field("store", &self.store)
            .field("mirror", &self.mirror)
            .field("ingesting", &self.ledger.is_ok())
            .field("settings", &self.settings)
            .finish()
    }
}

impl Donations {
    /// Loads the persisted state from the data directory of `config` and connects to TonAPI and
    /// the Google sheet, or their fakes in `Mode::Testing`.
    ///
    /// A missing wallet does not fail this: stats and corrections still work, and `poll_once`
    /// returns a `Config` error. A Google sheet that cannot be reached disables the mirror.
    pub async fn open(config: &Config, mode: Mode) -> Self {
        let ledger = api::ledger(config, mode);
        if let Err(e) = &ledger {
            warn!("Donations will not be fetched: {e:#}");
        }
        let mirror = Mirror::new(api::sheet(config, mode).await);
        Self::new(
            JsonStore::new(config.data_dir()),
            ledger,
            mirror,
            CycleSettings::from_config(config),
        )
        .await
    }

    /// Loads the persisted state without connecting to anything. For reading health and stats.
    pub async fn open_local(config: &Config) -> Self {
        Self::new(
            JsonStore::new(config.data_dir()),
            Err(anyhow!("opened without a connection to TonAPI")),
            Mirror::Disabled,
            CycleSettings::from_config(config),
        )
        .await
    }

    /// Creates a handle over the state in `store`.
    pub async fn new(
        store: JsonStore,
        ledger: Res<Arc<dyn Ledger>>,
        mirror: Mirror,
        settings: CycleSettings,
    ) -> Self {
        let snapshot = store.load().await;
        debug!(
            "Loaded {} countries, watermark {:?}",
            snapshot.totals().len(),
            snapshot.cursor().last_seen_tx_id()
        );
        Self {
            inner: Arc::new(Inner {
                persisted: Mutex::new(snapshot.clone()),
                snapshot: Mutex::new(snapshot),
                store,
                mirror,
                publish_lock: Mutex::new(()),
                ledger: ledger.map_err(|e| format!("{e:#}")),
                cycle_lock: Mutex::new(()),
                settings,
            }),
        }
    }

    pub async fn health(&self) -> Health {
        let snapshot = self.inner.snapshot.lock().await;
        Health {
            ok: true,
            last_seen_tx_id: snapshot.cursor().last_seen_tx_id().map(String::from),
        }
    }

    /// The totals, with every default country present.
    pub async fn stats(&self) -> CountryTotals {
        self.inner.snapshot.lock().await.totals().snapshot()
    }

    pub fn is_mirrored(&self) -> bool {
        self.inner.mirror.is_configured()
    }

    /// Replaces the total for `country`.
    ///
    /// # Errors
    /// - `Validation` if `country` is not recognized or `amount` is negative or not finite.
    pub async fn set_country(&self, country: &str, amount: f64) -> Result<Correction> {
        self.correct(country, |totals, c| totals.set_absolute(c, amount))
            .await
    }

    /// Adds `delta` to the total for `country`. The total never goes below zero.
    ///
    /// # Errors
    /// - `Validation` if `country` is not recognized or `delta` is not finite.
    pub async fn add_country(&self, country: &str, delta: f64) -> Result<Correction> {
        self.correct(country, |totals, c| totals.add_delta(c, delta))
            .await
    }

    async fn correct<F>(&self, raw: &str, apply: F) -> Result<Correction>
    where
        F: FnOnce(&mut CountryTotals, &str) -> std::result::Result<Amount, TotalsError>,
    {
        let country = country::normalize(raw)
            .ok_or_else(|| anyhow!("Unknown country '{}'", raw.trim()))
            .pub_result(ErrorType::Validation)?;
        let (amount, saved) = self
            .write_through(|snapshot| apply(&mut snapshot.totals, country))
            .await;
        let amount = amount.pub_result(ErrorType::Validation)?;
        info!("The total for {country} is now {amount} TON");
        if let Err(e) = saved {
            error!("Unable to save the correction: {e:#}");
        }
        self.publish_best_effort().await;
        Ok(Correction {
            ok: true,
            country: country.to_string(),
            amount,
        })
    }

    /// Pushes the current totals to the Google sheet. Returns the number of country rows written.
    ///
    /// # Errors
    /// - `Config` if no sheet is configured.
    /// - `Mirror` if the sheet could not be updated.
    pub async fn sync_mirror(&self) -> Result<usize> {
        let _publishing = self.inner.publish_lock.lock().await;
        let totals = self.stats().await;
        match self.inner.mirror.publish(&totals).await {
            Ok(rows) => Ok(rows),
            Err(e @ MirrorError::NotConfigured) => Err(e).pub_result(ErrorType::Config),
            Err(e) => Err(e).pub_result(ErrorType::Mirror),
        }
    }

    /// Runs one ingestion cycle, then saves the state and, unless the cycle was aborted, updates
    /// the mirror. Waits for any cycle that is already running to finish first.
    ///
    /// An aborted cycle is not an error here; look at `CycleReport::aborted`.
    ///
    /// # Errors
    /// - `Config` if no wallet is configured.
    pub async fn poll_once(&self) -> Result<CycleReport> {
        let ledger = match &self.inner.ledger {
            Ok(ledger) => ledger.clone(),
            Err(reason) => return Err(anyhow!("{reason}")).pub_result(ErrorType::Config),
        };
        let _cycle = self.inner.cycle_lock.lock().await;
        let span = info_span!("cycle", id = %Uuid::new_v4());
        Ok(self.poll_with(ledger.as_ref()).instrument(span).await)
    }

    async fn poll_with(&self, ledger: &dyn Ledger) -> CycleReport {
        let settings = self.inner.settings;
        let deadline = Instant::now() + settings.timeout;
        let report = cycle::run(ledger, &self.inner.snapshot, settings.page_limit, deadline).await;

        self.inner.snapshot.lock().await.totals.ensure_defaults();
        self.save().await;

        match &report.aborted {
            Some(e) => warn!(
                "Cycle aborted after {} pages and {} donations: {e}",
                report.pages, report.counted
            ),
            None => {
                info!(
                    "Cycle finished: {} pages, {} donations counted, watermark {:?}",
                    report.pages, report.counted, report.watermark
                );
                self.publish_best_effort().await;
            }
        }
        self.log_top().await;
        report
    }

    /// Saves the state, first bringing in any changes another process saved since this handle last
    /// read the store.
    ///
    /// # Errors
    /// - `Persistence` if the state could not be saved. The in-memory state is unaffected.
    pub async fn flush(&self) -> Result<()> {
        let (_, saved) = self
            .write_through(|_| Ok::<_, Infallible>(()))
            .await;
        saved.pub_result(ErrorType::Persistence)
    }

    /// Writes the state to disk. Failures are logged; the in-memory state stays authoritative.
    async fn save(&self) {
        let (_, saved) = self
            .write_through(|snapshot| {
                snapshot.totals.ensure_defaults();
                Ok::<_, Infallible>(())
            })
            .await;
        if let Err(e) = saved {
            error!("Unable to save the donation state: {e:#}");
        }
    }

    /// With the store locked, merges what is on disk into memory, applies `change`, and writes the
    /// result if `change` succeeded. Returns the outcome of `change` and of the write separately,
    /// because `change` is applied in memory even when the store cannot be written.
    async fn write_through<T, E>(
        &self,
        change: impl FnOnce(&mut Snapshot) -> std::result::Result<T, E>,
    ) -> (std::result::Result<T, E>, Res<()>) {
        let mut persisted = self.inner.persisted.lock().await;
        let lock = self.inner.store.lock().await;
        let theirs = match &lock {
            Ok(_) => Some(self.inner.store.load_or(&persisted).await),
            Err(_) => None,
        };
        let (outcome, merged) = {
            let mut snapshot = self.inner.snapshot.lock().await;
            if let Some(theirs) = &theirs {
                if theirs != &*persisted {
                    debug!("Bringing in changes saved by another process");
                }
                snapshot.merge(&*persisted, theirs);
            }
            let outcome = change(&mut *snapshot);
            (outcome, snapshot.clone())
        };
        if let Some(theirs) = theirs {
            *persisted = theirs;
        }
        let saved = match (lock, &outcome) {
            (Err(e), _) => Err(e),
            (Ok(_lock), Ok(_)) => match self.inner.store.persist(&merged).await {
                Ok(()) => {
                    *persisted = merged;
                    Ok(())
                }
                Err(e) => Err(e),
            },
            (Ok(_), Err(_)) => Ok(()),
        };
        (outcome, saved)
    }

    async fn publish_best_effort(&self) {
        let _publishing = self.inner.publish_lock.lock().await;
        let totals = self.stats().await;
        self.inner.mirror.publish_best_effort(&totals).await;
    }

    async fn log_top(&self) {
        let totals = self.stats().await;
        let top: Vec<String> = totals
            .ranked()
            .into_iter()
            .filter(|(_, amount)| amount.is_positive())
            .take(TOP_COUNTRIES)
            .map(|(country, amount)| format!("{country} {amount}"))
            .collect();
        if !top.is_empty() {
            info!("Top countries: {}", top.join(", "));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{incoming_json, LedgerError};
    use crate::store::{STATE, STATS};
    use crate::test::TestEnv;
    use crate::utils;
    use std::str::FromStr;

    fn amt(s: &str) -> Amount {
        Amount::from_str(s).unwrap()
    }

    #[tokio::test]
    async fn test_fresh_state() {
        let env = TestEnv::new();
        let donations = env.donations().await;
        let health = donations.health().await;
        assert!(health.ok);
        assert_eq!(health.last_seen_tx_id, None);
        assert_eq!(donations.stats().await, CountryTotals::new());
        assert_eq!(
            serde_json::to_value(&health).unwrap(),
            serde_json::json!({"ok": true, "lastSeenTxId": null})
        );
    }

    #[tokio::test]
    async fn test_poll_once_counts_persists_and_mirrors() {
        let env = TestEnv::new();
        env.ledger.set_bodies(vec![serde_json::json!({"transactions": [
            incoming_json("T3", 300, 2_000_000_000, "france"),
            incoming_json("T2", 200, 1_000_000_000, "Unknown Place"),
            incoming_json("T1", 100, 500_000_000, "USA"),
        ]})]);
        let donations = env.donations().await;

        let report = donations.poll_once().await.unwrap();
        assert_eq!(report.counted, 2);

        let stats = donations.stats().await;
        assert_eq!(stats.get("France"), Some(amt("2")));
        assert_eq!(stats.get("United States"), Some(amt("0.5")));
        assert_eq!(
            donations.health().await.last_seen_tx_id.as_deref(),
            Some("T3")
        );

        // the state survives a restart
        let reopened = env.donations().await;
        assert_eq!(reopened.stats().await, stats);
        assert_eq!(reopened.health().await.last_seen_tx_id.as_deref(), Some("T3"));

        let rows = env.sheet.get_state().rows;
        assert_eq!(rows[0], vec!["Country".to_string(), "Amount".to_string()]);
        assert_eq!(rows[1], vec!["France".to_string(), "2".to_string()]);
    }

    #[tokio::test]
    async fn test_aborted_cycle_is_saved_but_not_mirrored() {
        let env = TestEnv::new();
        env.ledger.set_bodies(vec![serde_json::json!({"transactions": [
            incoming_json("T2", 200, 1_000_000_000, "Kazakhstan"),
        ]})]);
        env.ledger.fail_page(
            1,
            LedgerError::Http {
                status: Some(500),
                message: "boom".into(),
            },
        );
        let donations = env.donations().await;
        let report = donations.poll_once().await.unwrap();
        assert!(report.is_aborted());
        assert_eq!(env.sheet.get_state().attempts, 0);

        let reopened = env.donations().await;
        assert_eq!(reopened.stats().await.get("Kazakhstan"), Some(amt("1")));
        assert_eq!(reopened.health().await.last_seen_tx_id.as_deref(), Some("T2"));
    }

    #[tokio::test]
    async fn test_poll_without_wallet_is_config_error() {
        let env = TestEnv::new();
        let donations = env
            .donations_with(Err(anyhow!("No wallet is configured")), true)
            .await;
        let e = donations.poll_once().await.unwrap_err();
        assert_eq!(e.error_type(), ErrorType::Config);
        assert!(e.to_string().contains("No wallet"));
        // everything else still works
        assert!(donations.set_country("Japan", 1.0).await.is_ok());
        assert_eq!(donations.stats().await.get("Japan"), Some(amt("1")));
    }

    #[tokio::test]
    async fn test_corrections() {
        let env = TestEnv::new();
        let donations = env.donations().await;

        let set = donations.set_country("japan", 10.0).await.unwrap();
        assert_eq!(
            set,
            Correction {
                ok: true,
                country: "Japan".into(),
                amount: amt("10"),
            }
        );
        let added = donations.add_country("Japan", -15.0).await.unwrap();
        assert_eq!(added.amount, Amount::ZERO);

        let added = donations.add_country("uk", 0.1234567).await.unwrap();
        assert_eq!(added.country, "United Kingdom");
        assert_eq!(added.amount, amt("0.123457"));
        assert_eq!(
            serde_json::to_value(&added).unwrap(),
            serde_json::json!({"ok": true, "country": "United Kingdom", "amount": 0.123457})
        );

        // persisted and mirrored
        let raw: serde_json::Value = utils::deserialize(&env.store.path(STATS)).await.unwrap();
        assert_eq!(raw["United Kingdom"], 0.123457);
        assert_eq!(env.sheet.get_state().attempts, 3);
    }

    #[tokio::test]
    async fn test_correction_rejections() {
        let env = TestEnv::new();
        let donations = env.donations().await;

        let e = donations.set_country("Atlantis", 1.0).await.unwrap_err();
        assert_eq!(e.error_type(), ErrorType::Validation);
        let e = donations.set_country("", 1.0).await.unwrap_err();
        assert_eq!(e.error_type(), ErrorType::Validation);
        let e = donations.set_country("France", -1.0).await.unwrap_err();
        assert_eq!(e.error_type(), ErrorType::Validation);
        let e = donations.set_country("France", f64::NAN).await.unwrap_err();
        assert_eq!(e.error_type(), ErrorType::Validation);
        let e = donations
            .add_country("France", f64::INFINITY)
            .await
            .unwrap_err();
        assert_eq!(e.error_type(), ErrorType::Validation);

        assert_eq!(donations.stats().await, CountryTotals::new());
        assert!(!env.store.path(STATS).exists());
        assert_eq!(env.sheet.get_state().attempts, 0);
    }

    #[tokio::test]
    async fn test_sync_mirror() {
        let env = TestEnv::new();
        let donations = env.donations().await;
        assert_eq!(donations.sync_mirror().await.unwrap(), 40);

        env.sheet.fail_with([403]);
        let e = donations.sync_mirror().await.unwrap_err();
        assert_eq!(e.error_type(), ErrorType::Mirror);

        let unmirrored = env.donations_with(Ok(env.ledger_arc()), false).await;
        assert!(!unmirrored.is_mirrored());
        let e = unmirrored.sync_mirror().await.unwrap_err();
        assert_eq!(e.error_type(), ErrorType::Config);
    }

    #[tokio::test]
    async fn test_persist_failure_is_not_fatal() {
        let env = TestEnv::new();
        let donations = env.donations().await;
        tokio::fs::remove_dir_all(env.store.dir()).await.unwrap();
        let correction = donations.set_country("Egypt", 3.0).await.unwrap();
        assert_eq!(correction.amount, amt("3"));
        assert_eq!(donations.stats().await.get("Egypt"), Some(amt("3")));
        assert!(!env.store.path(STATE).exists());
    }

    #[tokio::test]
    async fn test_flush_reports_persistence_failure() {
        let env = TestEnv::new();
        let donations = env.donations().await;
        donations.flush().await.unwrap();
        assert!(env.store.path(STATS).is_file());

        tokio::fs::remove_dir_all(env.store.dir()).await.unwrap();
        let e = donations.flush().await.unwrap_err();
        assert_eq!(e.error_type(), ErrorType::Persistence);
    }

    #[tokio::test]
    async fn test_correction_from_another_handle_survives_a_cycle() {
        let env = TestEnv::new();
        env.ledger.set_bodies(vec![serde_json::json!({"transactions": [
            incoming_json("T1", 100, 2_000_000_000, "France"),
        ]})]);
        let runner = env.donations().await;
        let admin = env.donations().await;

        admin.set_country("Japan", 10.0).await.unwrap();
        let report = runner.poll_once().await.unwrap();
        assert_eq!(report.counted, 1);

        let stats = runner.stats().await;
        assert_eq!(stats.get("Japan"), Some(amt("10")));
        assert_eq!(stats.get("France"), Some(amt("2")));
        let reopened = env.donations().await.stats().await;
        assert_eq!(reopened, stats);
        assert!(!env.store.dir().join(crate::store::LOCK).exists());
    }

    /// Holds the first fetch until it is released, so that something can happen mid-cycle.
    struct GatedLedger {
        inner: crate::api::TestLedger,
        entered: tokio::sync::Notify,
        release: tokio::sync::Notify,
    }

    #[async_trait::async_trait]
    impl Ledger for GatedLedger {
        async fn fetch_page(
            &self,
            page: usize,
        ) -> std::result::Result<Vec<crate::model::Transaction>, LedgerError> {
            if page == 0 {
                self.entered.notify_one();
                self.release.notified().await;
            }
            self.inner.fetch_page(page).await
        }
    }

    #[tokio::test]
    async fn test_correction_during_a_cycle_is_kept() {
        let env = TestEnv::new();
        env.ledger.set_bodies(vec![serde_json::json!({"transactions": [
            incoming_json("T2", 200, 1_000_000_000, "Japan"),
            incoming_json("T1", 100, 2_000_000_000, "France"),
        ]})]);
        let gated = Arc::new(GatedLedger {
            inner: env.ledger.clone(),
            entered: tokio::sync::Notify::new(),
            release: tokio::sync::Notify::new(),
        });
        let runner = env
            .donations_with(Ok(gated.clone() as Arc<dyn Ledger>), false)
            .await;
        let admin = env.donations().await;

        let polling = {
            let runner = runner.clone();
            tokio::spawn(async move { runner.poll_once().await })
        };
        gated.entered.notified().await;
        admin.set_country("Japan", 10.0).await.unwrap();
        admin.add_country("Chile", 4.0).await.unwrap();
        gated.release.notify_one();
        let report = polling.await.unwrap().unwrap();
        assert_eq!(report.counted, 2);

        // the correction came first, then the cycle added its donation on top
        let stats = env.donations().await.stats().await;
        assert_eq!(stats.get("Japan"), Some(amt("11")));
        assert_eq!(stats.get("Chile"), Some(amt("4")));
        assert_eq!(stats.get("France"), Some(amt("2")));
        assert_eq!(runner.stats().await, stats);
        assert_eq!(
            env.donations().await.health().await.last_seen_tx_id.as_deref(),
            Some("T2")
        );
    }

    #[tokio::test]
    async fn test_open_in_test_mode() {
        let env = TestEnv::new();
        let config = env.config().await;
        let donations = Donations::open(&config, Mode::Testing).await;
        assert!(donations.is_mirrored());
        let report = donations.poll_once().await.unwrap();
        assert_eq!(report.counted, 3);
        assert_eq!(report.watermark.as_deref(), Some("seed-4"));
        assert_eq!(donations.stats().await.get("Japan"), Some(amt("2.5")));
    }
}
