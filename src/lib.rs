//! Tallies TON donations by the country that each donor names in their transfer comment.
//!
//! The `Donations` handle owns the running totals and the watermark of the last counted
//! transaction. `Scheduler` drives ingestion cycles against TonAPI through the `api::Ledger`
//! trait, and every change is saved to `$DONATIONS_HOME/data` and mirrored, best effort, to a
//! Google Sheet through the `api::Sink` trait.

pub mod api;
pub mod args;
pub mod commands;
mod config;
pub mod country;
pub mod cursor;
pub mod cycle;
pub mod donations;
mod error;
pub mod mirror;
pub mod model;
pub mod retry;
pub mod scheduler;
pub mod store;
mod utils;


pub use api::Mode;
pub use config::Config;
pub use donations::Donations;
pub use error::{Error, ErrorType, Result};
