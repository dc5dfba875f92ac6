//! These structs provide the CLI interface for the donations CLI.

use clap::{Parser, Subcommand};
use std::convert::Infallible;
use std::fmt::{Display, Formatter};
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::error;
use tracing_subscriber::filter::LevelFilter;

/// donations: Tallies TON donations by the country named in each transfer's comment.
///
/// The program watches the transaction history of one TON wallet through TonAPI, reads the
/// comment of every incoming transfer as a country name, and keeps a running total per country
/// in `$DONATIONS_HOME/data`. The totals can be mirrored to a Google Sheet.
#[derive(Debug, Parser, Clone)]
pub struct Args {
    #[clap(flatten)]
    common: Common,

    #[command(subcommand)]
    command: Command,
}

impl Args {
    pub fn new(common: Common, command: Command) -> Self {
        Self { common, command }
    }

    pub fn common(&self) -> &Common {
        &self.common
    }

    pub fn command(&self) -> &Command {
        &self.command
    }
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Create the home directory and the configuration file.
    ///
    /// This is the first command you should run. By default the home directory is
    /// $HOME/donations; pass --donations-home to put it somewhere else.
    Init(InitArgs),
    /// Poll for donations until ctrl-c is pressed.
    Run,
    /// Run one polling cycle and exit.
    Poll,
    /// Print the last counted transaction.
    Health,
    /// Print the totals for every country.
    Stats,
    /// Replace the total for a country.
    SetCountry(SetCountryArgs),
    /// Add to (or, with a negative delta, subtract from) the total for a country.
    AddCountry(AddCountryArgs),
    /// Push the current totals to the Google Sheet.
    SyncSheets,
}

/// Arguments common to all subcommands.
#[derive(Debug, Parser, Clone)]
pub struct Common {
    /// The logging verbosity. One of, from least to most verbose:
    /// off, error, warn, info, debug, trace
    ///
    /// This can be overridden by RUST_LOG.
    #[arg(long, default_value_t = LevelFilter::INFO)]
    log_level: LevelFilter,

    /// The directory where the configuration and the totals are held. Defaults to ~/donations
    #[arg(long, env = "DONATIONS_HOME", default_value_t = default_donations_home())]
    donations_home: DisplayPath,

    /// The TonAPI key. Requests are made without one when it is not given, which TonAPI rate
    /// limits heavily.
    #[arg(long, env = "TONAPI_KEY", hide_env_values = true)]
    tonapi_key: Option<String>,
}

impl Common {
    pub fn new(log_level: LevelFilter, donations_home: PathBuf, tonapi_key: Option<String>) -> Self {
        Self {
            log_level,
            donations_home: donations_home.into(),
            tonapi_key,
        }
    }

    pub fn log_level(&self) -> LevelFilter {
        self.log_level
    }

    pub fn donations_home(&self) -> &DisplayPath {
        &self.donations_home
    }

    pub fn tonapi_key(&self) -> Option<&str> {
        self.tonapi_key.as_deref()
    }
}

/// (Not shown): Args for the `donations init` command.
#[derive(Debug, Parser, Clone)]
pub struct InitArgs {
    /// The TON wallet address whose incoming transfers are counted.
    #[arg(long)]
    wallet: Option<String>,

    /// The URL of the Google Sheet to mirror the totals to. It looks like this:
    /// https://docs.google.com/spreadsheets/d/1a7Km9FxQwRbPt82JvN4LzYpH5OcGnWsT6iDuE3VhMjX
    #[arg(long)]
    sheet_url: Option<String>,

    /// The path to your downloaded OAuth client credentials. This file will be copied to the
    /// default secrets location in the home directory.
    #[arg(long)]
    client_secret: Option<PathBuf>,
}

impl InitArgs {
    pub fn new(
        wallet: Option<String>,
        sheet_url: Option<String>,
        client_secret: Option<PathBuf>,
    ) -> Self {
        Self {
            wallet,
            sheet_url,
            client_secret,
        }
    }

    pub fn wallet(&self) -> Option<&str> {
        self.wallet.as_deref()
    }

    pub fn sheet_url(&self) -> Option<&str> {
        self.sheet_url.as_deref()
    }

    pub fn client_secret(&self) -> Option<&Path> {
        self.client_secret.as_deref()
    }
}

/// (Not shown): Args for the `donations set-country` command.
#[derive(Debug, Parser, Clone)]
pub struct SetCountryArgs {
    /// The country, e.g. "Japan" or "usa".
    country: String,

    /// The new total in TON.
    amount: f64,
}

impl SetCountryArgs {
    pub fn new(country: impl Into<String>, amount: f64) -> Self {
        Self {
            country: country.into(),
            amount,
        }
    }

    pub fn country(&self) -> &str {
        &self.country
    }

    pub fn amount(&self) -> f64 {
        self.amount
    }
}

/// (Not shown): Args for the `donations add-country` command.
#[derive(Debug, Parser, Clone)]
pub struct AddCountryArgs {
    /// The country, e.g. "Japan" or "usa".
    country: String,

    /// The amount in TON to add. May be negative.
    #[arg(allow_negative_numbers = true)]
    delta: f64,
}

impl AddCountryArgs {
    pub fn new(country: impl Into<String>, delta: f64) -> Self {
        Self {
            country: country.into(),
            delta,
        }
    }

    pub fn country(&self) -> &str {
        &self.country
    }

    pub fn delta(&self) -> f64 {
        self.delta
    }
}

fn default_donations_home() -> DisplayPath {
    DisplayPath(match dirs::home_dir() {
        Some(home) => home.join("donations"),
        None => {
            error!(
                "There was an error when trying to get your home directory. You can get around \
                this by providing --donations-home or DONATIONS_HOME instead of relying on the \
                default home directory. If you continue using the program right now, you may have \
                problems!",
            );
            PathBuf::from("donations")
        }
    })
}

#[derive(Debug, Default, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct DisplayPath(PathBuf);

impl From<PathBuf> for DisplayPath {
    fn from(value: PathBuf) -> Self {
        DisplayPath(value)
    }
}

impl Deref for DisplayPath {
    type Target = Path;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl AsRef<Path> for DisplayPath {
    fn as_ref(&self) -> &Path {
        &self.0
    }
}

impl Display for DisplayPath {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.to_string_lossy())
    }
}

impl FromStr for DisplayPath {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(PathBuf::from(s)))
    }
}

impl DisplayPath {
    pub fn new(path: PathBuf) -> Self {
        Self(path)
    }

    pub fn path(&self) -> &Path {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Args {
        Args::try_parse_from(std::iter::once("donations").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_parse_add_country_negative() {
        let args = parse(&["--donations-home", "/tmp/d", "add-country", "France", "-2.5"]);
        assert_eq!(args.common().donations_home().path(), Path::new("/tmp/d"));
        match args.command() {
            Command::AddCountry(a) => {
                assert_eq!(a.country(), "France");
                assert_eq!(a.delta(), -2.5);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_parse_init() {
        let args = parse(&[
            "--log-level",
            "debug",
            "init",
            "--wallet",
            "UQx",
            "--sheet-url",
            "https://docs.google.com/spreadsheets/d/abc",
        ]);
        assert_eq!(args.common().log_level(), LevelFilter::DEBUG);
        match args.command() {
            Command::Init(a) => {
                assert_eq!(a.wallet(), Some("UQx"));
                assert_eq!(
                    a.sheet_url(),
                    Some("https://docs.google.com/spreadsheets/d/abc")
                );
                assert_eq!(a.client_secret(), None);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_parse_set_country_rejects_text_amount() {
        assert!(Args::try_parse_from(["donations", "set-country", "Japan", "lots"]).is_err());
    }
}
