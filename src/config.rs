//! Configuration file handling.
//!
//! The configuration file is stored at `$DONATIONS_HOME/config.json` and holds the wallet to watch,
//! the TonAPI and polling settings, and the optional Google Sheet to mirror totals to. The TonAPI
//! key is deliberately not part of the file; it is passed in with `with_tonapi_key`.

use crate::error::Res;
use crate::utils;
use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

const APP_NAME: &str = "donations";
const CONFIG_VERSION: u8 = 1;
const SECRETS: &str = ".secrets";
const DATA: &str = "data";
const CLIENT_SECRET_JSON: &str = "client_secret.json";
const TOKEN_JSON: &str = "token.json";
const CONFIG_JSON: &str = "config.json";

const DEFAULT_TONAPI_URL: &str = "https://tonapi.io";
const DEFAULT_POLL_INTERVAL_MS: u64 = 30_000;
const DEFAULT_PAGE_LIMIT: usize = 5;
const DEFAULT_PAGE_SIZE: usize = 50;
const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 15_000;
const DEFAULT_SHEET_TAB: &str = "Sheet1";

/// The `Config` object represents the configuration of the app. You instantiate it by providing
/// the path to `$DONATIONS_HOME` and from there it loads `$DONATIONS_HOME/config.json`. It provides
/// paths to other items that are either configurable or are expected in a certain location within
/// the home directory.
#[derive(Debug, Clone)]
pub struct Config {
    root: PathBuf,
    data: PathBuf,
    secrets: PathBuf,
    config_path: PathBuf,
    config_file: ConfigFile,
    spreadsheet_id: Option<String>,
    tonapi_key: Option<String>,
}

impl Config {
    /// Creates the home directory, its subdirectories and an initial `config.json` with default
    /// settings.
    ///
    /// # Arguments
    /// - `dir` - The directory that will be the home directory, e.g. `$HOME/donations`
    /// - `wallet` - The TON address whose incoming transfers are counted.
    /// - `sheet_url` - The URL of the Google Sheet that totals are mirrored to, if any.
    /// - `secret_file` - The downloaded OAuth 2.0 client credentials JSON, if any. It is copied to
    ///   its default location in the home directory.
    ///
    /// # Errors
    /// - Returns an error if any file operations fail or `sheet_url` is not a Google Sheets URL.
    pub async fn create(
        dir: impl Into<PathBuf>,
        wallet: Option<&str>,
        sheet_url: Option<&str>,
        secret_file: Option<&Path>,
    ) -> Res<Self> {
        let maybe_relative = dir.into();
        utils::make_dir(&maybe_relative)
            .await
            .context("Unable to create the donations home directory")?;
        let root = utils::canonicalize(&maybe_relative).await?;

        let data = root.join(DATA);
        utils::make_dir(&data).await?;
        let secrets = root.join(SECRETS);
        utils::make_dir(&secrets).await?;

        if let Some(secret_file) = secret_file {
            utils::copy(secret_file, secrets.join(CLIENT_SECRET_JSON)).await?;
        }

        let config_file = ConfigFile {
            wallet: wallet.map(String::from),
            sheet_url: sheet_url.map(String::from),
            ..ConfigFile::default()
        };
        let spreadsheet_id = spreadsheet_id(&config_file)?;
        let config_path = root.join(CONFIG_JSON);
        config_file.save(&config_path).await?;

        Ok(Self {
            root,
            data,
            secrets,
            config_path,
            config_file,
            spreadsheet_id,
            tonapi_key: None,
        })
    }

    /// This will
    /// - validate that `donations_home` exists and that the config file exists
    /// - load the config file
    /// - validate that the data directory exists
    /// - return the loaded configuration object
    pub async fn load(donations_home: impl Into<PathBuf>) -> Res<Self> {
        let maybe_relative = donations_home.into();
        let root = utils::canonicalize(&maybe_relative)
            .await
            .context("The donations home directory is missing")?;

        let config_path = root.join(CONFIG_JSON);
        if !config_path.is_file() {
            bail!("The config file is missing '{}'", config_path.display())
        }
        let config_file = ConfigFile::load(&config_path).await?;
        let spreadsheet_id = spreadsheet_id(&config_file)?;

        let config = Self {
            root: root.clone(),
            data: root.join(DATA),
            secrets: root.join(SECRETS),
            config_path,
            config_file,
            spreadsheet_id,
            tonapi_key: None,
        };
        if !config.data.is_dir() {
            bail!("The data directory is missing '{}'", config.data.display())
        }
        Ok(config)
    }

    /// Sets the TonAPI key. An empty key is the same as no key.
    pub fn with_tonapi_key(mut self, key: Option<String>) -> Self {
        self.tonapi_key = key.filter(|k| !k.trim().is_empty());
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Where `stats.json` and `state.json` live.
    pub fn data_dir(&self) -> &Path {
        &self.data
    }

    pub fn secrets(&self) -> &Path {
        &self.secrets
    }

    pub fn wallet(&self) -> Option<&str> {
        self.config_file
            .wallet
            .as_deref()
            .filter(|w| !w.trim().is_empty())
    }

    /// The wallet, or an error saying that ingestion cannot run without one.
    pub fn require_wallet(&self) -> Res<&str> {
        match self.wallet() {
            Some(wallet) => Ok(wallet),
            None => bail!(
                "No wallet is configured in '{}', so donations cannot be fetched",
                self.config_path.display()
            ),
        }
    }

    pub fn tonapi_url(&self) -> &str {
        &self.config_file.tonapi_url
    }

    pub fn tonapi_key(&self) -> Option<&str> {
        self.tonapi_key.as_deref()
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.config_file.poll_interval_ms)
    }

    /// The most pages one cycle fetches. Never less than 1.
    pub fn page_limit(&self) -> usize {
        self.config_file.page_limit.max(1)
    }

    /// Transactions per page. Never less than 1.
    pub fn page_size(&self) -> usize {
        self.config_file.page_size.max(1)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.config_file.request_timeout_ms)
    }

    /// How long one cycle may take: the request timeout once for every page.
    pub fn cycle_timeout(&self) -> Duration {
        self.request_timeout()
            .saturating_mul(u32::try_from(self.page_limit()).unwrap_or(u32::MAX))
    }

    pub fn sheet_url(&self) -> Option<&str> {
        self.config_file.sheet_url.as_deref()
    }

    /// The spreadsheet ID from `sheet_url`, or `None` if no sheet is configured.
    pub fn spreadsheet_id(&self) -> Option<&str> {
        self.spreadsheet_id.as_deref()
    }

    pub fn sheet_tab(&self) -> &str {
        &self.config_file.sheet_tab
    }

    /// Returns the stored `client_secret_path` if it is absolute, otherwise resolves the relative path.
    pub fn client_secret_path(&self) -> PathBuf {
        self.resolve_secrets_file_path(self.config_file.client_secret_path())
    }

    /// Returns the stored `token_path` if it is absolute, otherwise resolves the relative path.
    pub fn token_path(&self) -> PathBuf {
        self.resolve_secrets_file_path(self.config_file.token_path())
    }

    fn resolve_secrets_file_path(&self, p: PathBuf) -> PathBuf {
        if p.is_absolute() {
            return p;
        }
        self.root.join(p)
    }
}

/// Represents the serialization and deserialization format of the configuration file.
///
/// Example configuration:
/// ```json
/// {
///   "app_name": "donations",
///   "config_version": 1,
///   "wallet": "UQBvW8Z5huBkMJYdnfAEM5JqTNkuWX3diqYENkWsIL0XggGG",
///   "tonapi_url": "https://tonapi.io",
///   "poll_interval_ms": 30000,
///   "page_limit": 5,
///   "page_size": 50,
///   "request_timeout_ms": 15000,
///   "sheet_url": "https://docs.google.com/spreadsheets/d/7KpXm2RfZwNJgs84QhVYno5DU6iM9Wlr3bCzAv1txRpL",
///   "sheet_tab": "Sheet1"
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
#[serde(default)]
struct ConfigFile {
    /// Application name, should always be "donations"
    app_name: String,

    config_version: u8,

    /// The TON address to watch. Required to fetch donations.
    #[serde(skip_serializing_if = "Option::is_none")]
    wallet: Option<String>,

    tonapi_url: String,

    /// Base time between the end of one cycle and the start of the next.
    poll_interval_ms: u64,

    page_limit: usize,

    page_size: usize,

    request_timeout_ms: u64,

    /// URL of the Google Sheet that totals are mirrored to.
    #[serde(skip_serializing_if = "Option::is_none")]
    sheet_url: Option<String>,

    sheet_tab: String,

    /// Path to the OAuth 2.0 client credentials file (optional, relative to config.json or absolute)
    /// Defaults to $DONATIONS_HOME/.secrets/client_secret.json if not specified
    #[serde(skip_serializing_if = "Option::is_none")]
    client_secret_path: Option<PathBuf>,

    /// Path to the OAuth token file (optional, relative to config.json or absolute)
    /// Defaults to $DONATIONS_HOME/.secrets/token.json if not specified
    #[serde(skip_serializing_if = "Option::is_none")]
    token_path: Option<PathBuf>,
}

impl Default for ConfigFile {
    fn default() -> Self {
        Self {
            app_name: APP_NAME.to_string(),
            config_version: CONFIG_VERSION,
            wallet: None,
            tonapi_url: DEFAULT_TONAPI_URL.to_string(),
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            page_limit: DEFAULT_PAGE_LIMIT,
            page_size: DEFAULT_PAGE_SIZE,
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            sheet_url: None,
            sheet_tab: DEFAULT_SHEET_TAB.to_string(),
            client_secret_path: None,
            token_path: None,
        }
    }
}

impl ConfigFile {
    /// # Errors
    /// Returns an error if the file cannot be read or parsed, or is not a donations config file.
    async fn load(path: impl AsRef<Path>) -> Res<Self> {
        let path = path.as_ref();
        let content = utils::read(path)
            .await
            .with_context(|| format!("Failed to read config file at {}", path.display()))?;

        let config: ConfigFile = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file at {}", path.display()))?;

        anyhow::ensure!(
            config.app_name == APP_NAME,
            "Invalid app_name in config file: expected '{}', got '{}'",
            APP_NAME,
            config.app_name
        );

        Ok(config)
    }

    async fn save(&self, path: impl AsRef<Path>) -> Res<()> {
        let data = serde_json::to_string_pretty(self).context("Unable to serialize config")?;
        utils::write(path, data)
            .await
            .context("Unable to write config file")
    }

    fn client_secret_path(&self) -> PathBuf {
        self.client_secret_path
            .clone()
            .unwrap_or_else(|| PathBuf::from(SECRETS).join(CLIENT_SECRET_JSON))
    }

    fn token_path(&self) -> PathBuf {
        self.token_path
            .clone()
            .unwrap_or_else(|| PathBuf::from(SECRETS).join(TOKEN_JSON))
    }
}

fn spreadsheet_id(config_file: &ConfigFile) -> Res<Option<String>> {
    match config_file.sheet_url.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(url) => extract_spreadsheet_id(url)
            .map(|id| Some(id.to_string()))
            .context("Failed to extract spreadsheet ID from sheet URL"),
    }
}

/// Extracts the spreadsheet ID from a Google Sheets URL, e.g.
/// `https://docs.google.com/spreadsheets/d/SPREADSHEET_ID/edit` or `.../d/SPREADSHEET_ID?foo=bar`.
fn extract_spreadsheet_id(url: &str) -> Res<&str> {
    let mut parts = url.split('/');
    while let Some(part) = parts.next() {
        if part != "d" {
            continue;
        }
        let id = parts
            .next()
            .unwrap_or_default()
            .split(['?', '#'])
            .next()
            .unwrap_or_default();
        if !id.is_empty() {
            return Ok(id);
        }
    }
    bail!(
        "Invalid Google Sheets URL format. Expected: https://docs.google.com/spreadsheets/d/SPREADSHEET_ID"
    )
}
