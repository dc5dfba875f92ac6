use clap::Parser;
use std::process::ExitCode;
use ton_donations::args::{Args, Command, Common};
use ton_donations::{commands, Config, Error, ErrorType, Mode, Result};
use tracing::{debug, error, trace};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    let log_level = args.common().log_level();
    init_logger(log_level);
    debug!("Log level set to {}", log_level.to_string().to_lowercase());

    match main_inner(args).await {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Exiting with error: {e}");
            ExitCode::FAILURE
        }
    }
}

pub async fn main_inner(args: Args) -> Result<()> {
    // Args holds the TonAPI key, so only the command is traced.
    trace!("{:?}", args.command());
    let home = args.common().donations_home().path();

    // This allows for running the program without hitting TonAPI or the Google APIs. When
    // DONATIONS_IN_TEST_MODE is set and non-zero in length, then the mode will be Mode::Testing,
    // otherwise it will be Mode::Live.
    let mode = Mode::from_env();

    let common = args.common();
    let _: () = match args.command() {
        Command::Init(init_args) => commands::init(
            home,
            init_args.wallet(),
            init_args.sheet_url(),
            init_args.client_secret(),
        )
        .await?
        .print(),

        Command::Run => commands::run(load_config(common).await?, mode)
            .await?
            .print(),

        Command::Poll => commands::poll(load_config(common).await?, mode)
            .await?
            .print(),

        Command::Health => commands::health(load_config(common).await?).await?.print(),

        Command::Stats => commands::stats(load_config(common).await?).await?.print(),

        Command::SetCountry(a) => {
            let config = load_config(common).await?;
            commands::set_country(config, mode, a.country(), a.amount())
                .await?
                .print()
        }

        Command::AddCountry(a) => {
            let config = load_config(common).await?;
            commands::add_country(config, mode, a.country(), a.delta())
                .await?
                .print()
        }

        Command::SyncSheets => commands::sync_sheets(load_config(common).await?, mode)
            .await?
            .print(),
    };
    Ok(())
}

/// Loads `config.json` from the home directory and adds the TonAPI key from the command line.
async fn load_config(common: &Common) -> Result<Config> {
    Config::load(common.donations_home().path())
        .await
        .map(|config| config.with_tonapi_key(common.tonapi_key().map(String::from)))
        .map_err(|e| Error::new(ErrorType::Config, e))
}

/// Initializes the tracing subscriber.
pub fn init_logger(level: LevelFilter) {
    let filter = match std::env::var("RUST_LOG").ok() {
        Some(_) => {
            // RUST_LOG exists; use it.
            EnvFilter::from_default_env()
        }
        None => {
            // RUST_LOG does not exist; use default log level for this crate only.
            EnvFilter::new(format!(
                "{}={},{}={}",
                env!("CARGO_CRATE_NAME"),
                level,
                "ton_donations",
                level
            ))
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
