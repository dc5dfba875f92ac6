//! Durable storage of the totals and the watermark as JSON files in the data directory.
//!
//! Every write goes to `{key}.json.tmp` first and is then renamed over `{key}.json`, so a crash
//! part way through a write leaves the previous value intact.
//!
//! More than one process may use the same data directory, e.g. `donations run` and a
//! `donations set-country` issued while it is running. Writers take a `StoreLock` around each
//! read-merge-write so that they do not overwrite each other.

use crate::error::Res;
use crate::model::{CountryTotals, CursorState, Snapshot};
use crate::utils;
use anyhow::{bail, Context};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

/// The key of the totals, `stats.json`.
pub const STATS: &str = "stats";

/// The key of the watermark, `state.json`.
pub const STATE: &str = "state";

/// The name of the lock file in the data directory.
pub const LOCK: &str = ".lock";

/// A lock is only held for one read-merge-write, so one this old was left by a process that died.
const LOCK_STALE_AFTER: Duration = Duration::from_secs(30);

/// How long `lock` waits before giving up. Longer than `LOCK_STALE_AFTER`, so that a stale lock is
/// always broken first.
const LOCK_WAIT: Duration = Duration::from_secs(35);

const LOCK_RETRY: Duration = Duration::from_millis(50);

/// A directory of JSON documents addressed by key.
#[derive(Debug, Clone)]
pub struct JsonStore {
    dir: PathBuf,
}

impl JsonStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }

    /// Reads the document at `key`. A missing document is `T::default()`. So is one that cannot be
    /// read or parsed, although that is logged as a warning.
    pub async fn read_json<T>(&self, key: &str) -> T
    where
        T: DeserializeOwned + Default,
    {
        self.read_existing(key).await.unwrap_or_default()
    }

    /// Reads the document at `key`, or `None` if it is missing or unreadable.
    async fn read_existing<T>(&self, key: &str) -> Option<T>
    where
        T: DeserializeOwned,
    {
        let path = self.path(key);
        if !path.is_file() {
            debug!("{} does not exist yet", path.display());
            return None;
        }
        match utils::deserialize(&path).await {
            Ok(value) => Some(value),
            Err(e) => {
                warn!("Ignoring the contents of {}: {e:#}", path.display());
                None
            }
        }
    }

    /// Atomically replaces the document at `key`.
    pub async fn write_json<T>(&self, key: &str, value: &T) -> Res<()>
    where
        T: Serialize + ?Sized,
    {
        utils::serialize_atomic(self.path(key), value)
            .await
            .with_context(|| format!("Unable to save '{key}'"))
    }

    /// Loads the persisted totals, with every default country present, and the watermark.
    pub async fn load(&self) -> Snapshot {
        let mut totals: CountryTotals = self.read_json(STATS).await;
        totals.ensure_defaults();
        let cursor: CursorState = self.read_json(STATE).await;
        Snapshot::new(totals, cursor)
    }

    /// Reads what is on disk now. A document that is missing or unreadable is taken from
    /// `fallback` instead, as if nobody had changed it.
    pub async fn load_or(&self, fallback: &Snapshot) -> Snapshot {
        let totals = match self.read_existing(STATS).await {
            Some(totals) => totals,
            None => fallback.totals().clone(),
        };
        let cursor = match self.read_existing(STATE).await {
            Some(cursor) => cursor,
            None => fallback.cursor().clone(),
        };
        Snapshot::new(totals, cursor)
    }

    /// Takes the lock on the data directory, waiting for another holder to release it. A lock
    /// file older than `LOCK_STALE_AFTER` is removed.
    ///
    /// # Errors
    /// - If the lock file cannot be created, e.g. because the data directory is gone.
    /// - If the lock is still held after `LOCK_WAIT`.
    pub async fn lock(&self) -> Res<StoreLock> {
        let path = self.dir.join(LOCK);
        let started = Instant::now();
        loop {
            let created = fs::OpenOptions::new()
                .create_new(true)
                .write(true)
                .open(&path)
                .await;
            match created {
                Ok(_) => {
                    trace!("Locked {}", path.display());
                    return Ok(StoreLock { path });
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    if is_stale(&path).await {
                        warn!("Removing the stale lock {}", path.display());
                        match fs::remove_file(&path).await {
                            Ok(()) => continue,
                            Err(e) => debug!("Unable to remove {}: {e}", path.display()),
                        }
                    }
                    if started.elapsed() >= LOCK_WAIT {
                        bail!("Timed out waiting for the lock {}", path.display());
                    }
                    tokio::time::sleep(LOCK_RETRY).await;
                }
                Err(e) => {
                    return Err(e)
                        .with_context(|| format!("Unable to create the lock {}", path.display()))
                }
            }
        }
    }

    /// Writes the totals and then the watermark. If the process dies between the two writes, the
    /// next run sees the new totals with the old watermark.
    pub async fn persist(&self, snapshot: &Snapshot) -> Res<()> {
        self.write_json(STATS, snapshot.totals()).await?;
        self.write_json(STATE, snapshot.cursor()).await
    }
}

/// Held while the data directory is locked. The lock file is removed on drop.
#[derive(Debug)]
pub struct StoreLock {
    path: PathBuf,
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            warn!("Unable to remove the lock {}: {e}", self.path.display());
        }
    }
}

async fn is_stale(path: &Path) -> bool {
    let Ok(modified) = fs::metadata(path).await.and_then(|m| m.modified()) else {
        return false;
    };
    modified
        .elapsed()
        .map(|age| age > LOCK_STALE_AFTER)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::country::COUNTRIES;
    use crate::model::Amount;
    use std::str::FromStr;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_load_empty_dir() {
        let dir = TempDir::new().unwrap();
        let store = JsonStore::new(dir.path());
        let snapshot = store.load().await;
        assert_eq!(snapshot.totals().len(), COUNTRIES.len());
        assert_eq!(snapshot.cursor().last_seen_tx_id(), None);
    }

    #[tokio::test]
    async fn test_persist_and_load() {
        let dir = TempDir::new().unwrap();
        let store = JsonStore::new(dir.path());
        let mut totals = CountryTotals::new();
        totals.add("France", Amount::from_str("2").unwrap());
        let snapshot = Snapshot::new(totals, CursorState::new(Some("T3".into())));
        store.persist(&snapshot).await.unwrap();

        assert!(store.path(STATS).is_file());
        assert!(store.path(STATE).is_file());
        let loaded = JsonStore::new(dir.path()).load().await;
        assert_eq!(loaded, snapshot);

        let raw: serde_json::Value = utils::deserialize(&store.path(STATE)).await.unwrap();
        assert_eq!(raw, serde_json::json!({"lastSeenTxId": "T3"}));
    }

    #[tokio::test]
    async fn test_corrupt_file_reads_as_default() {
        let dir = TempDir::new().unwrap();
        let store = JsonStore::new(dir.path());
        utils::write(store.path(STATS), "{ not json").await.unwrap();
        utils::write(store.path(STATE), r#"{"lastSeenTxId": "abc"}"#)
            .await
            .unwrap();
        let snapshot = store.load().await;
        assert_eq!(snapshot.totals(), &CountryTotals::new());
        assert_eq!(snapshot.cursor().last_seen_tx_id(), Some("abc"));
    }

    #[tokio::test]
    async fn test_loaded_totals_keep_extra_countries() {
        let dir = TempDir::new().unwrap();
        let store = JsonStore::new(dir.path());
        utils::write(store.path(STATS), r#"{"Japan": 3.5, "Atlantis": 1}"#)
            .await
            .unwrap();
        let totals = store.load().await.totals().clone();
        assert_eq!(totals.get("Japan"), Some(Amount::from_str("3.5").unwrap()));
        assert_eq!(totals.get("Atlantis"), Some(Amount::from_str("1").unwrap()));
        assert_eq!(totals.len(), COUNTRIES.len() + 1);
    }

    #[tokio::test]
    async fn test_load_or_falls_back_per_document() {
        let dir = TempDir::new().unwrap();
        let store = JsonStore::new(dir.path());
        utils::write(store.path(STATS), r#"{"Chile": 4}"#)
            .await
            .unwrap();
        utils::write(store.path(STATE), "garbage").await.unwrap();
        let fallback = Snapshot::new(CountryTotals::new(), CursorState::new(Some("T9".into())));

        let snapshot = store.load_or(&fallback).await;
        assert_eq!(
            snapshot.totals().get("Chile"),
            Some(Amount::from_str("4").unwrap())
        );
        assert_eq!(snapshot.totals().len(), 1);
        assert_eq!(snapshot.cursor().last_seen_tx_id(), Some("T9"));
    }

    #[tokio::test]
    async fn test_lock_is_exclusive_and_released_on_drop() {
        let dir = TempDir::new().unwrap();
        let store = JsonStore::new(dir.path());
        let lock = store.lock().await.unwrap();
        assert!(dir.path().join(LOCK).is_file());

        let waiting = {
            let store = store.clone();
            tokio::spawn(async move { store.lock().await.map(|_| ()) })
        };
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!waiting.is_finished());

        drop(lock);
        waiting.await.unwrap().unwrap();
        assert!(!dir.path().join(LOCK).exists());
    }

    #[tokio::test]
    async fn test_stale_lock_is_broken() {
        let dir = TempDir::new().unwrap();
        let store = JsonStore::new(dir.path());
        let path = dir.path().join(LOCK);
        let file = std::fs::File::create(&path).unwrap();
        file.set_modified(std::time::SystemTime::now() - Duration::from_secs(120))
            .unwrap();
        drop(file);

        let lock = store.lock().await.unwrap();
        assert!(path.is_file());
        drop(lock);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_lock_in_missing_dir_fails() {
        let dir = TempDir::new().unwrap();
        let store = JsonStore::new(dir.path().join("nope"));
        assert!(store.lock().await.is_err());
    }

    #[tokio::test]
    async fn test_write_to_missing_dir_fails() {
        let dir = TempDir::new().unwrap();
        let store = JsonStore::new(dir.path().join("nope"));
        assert!(store
            .persist(&Snapshot::new(CountryTotals::new(), CursorState::default()))
            .await
            .is_err());
    }
}
