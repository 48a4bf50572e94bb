//! Hours-of-Service duty log CLI library.
//!
//! This crate provides the CLI interface and the ledger service that
//! serializes status reports per log day.

mod cli;
pub mod commands;
mod config;
mod estimator;
mod ledger;

pub use cli::{Cli, Commands, LogAction, ReportArgs, TripAction, TripStartArgs};
pub use config::{Config, EstimatorKind};
pub use estimator::Estimator;
pub use ledger::{Correction, Ledger, LogDayLocks};
