//! Command-line argument definitions.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use hos_core::{CycleType, DutyStatus};

/// Hours-of-Service duty log.
///
/// Records driver duty-status changes for a trip, accrues driving mileage
/// from GPS reports, and keeps daily and rolling on-duty totals.
#[derive(Debug, Parser)]
#[command(name = "hos", version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to config file.
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Manage trips.
    #[command(subcommand)]
    Trip(TripAction),

    /// Manage log days.
    #[command(subcommand)]
    Log(LogAction),

    /// Report a duty status (or, with the same status, a new position).
    Report(ReportArgs),

    /// Recompute derived totals from stored intervals.
    Recompute {
        /// Only this trip.
        #[arg(long)]
        trip: Option<i64>,
    },
}

/// Trip subcommands.
#[derive(Debug, Subcommand)]
pub enum TripAction {
    /// Start a new trip.
    Start(TripStartArgs),

    /// Complete a trip and record its compliance recap.
    End {
        trip_id: i64,
    },

    /// Show a trip with its log days.
    Show {
        trip_id: i64,

        /// Output as JSON.
        #[arg(long)]
        json: bool,
    },

    /// List trips.
    List {
        /// Output as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Delete a trip and everything recorded for it.
    Delete {
        trip_id: i64,
    },
}

#[derive(Debug, Args)]
pub struct TripStartArgs {
    #[arg(long)]
    pub driver: String,

    /// Origin.
    #[arg(long)]
    pub from: String,

    /// Destination.
    #[arg(long)]
    pub to: String,

    #[arg(long)]
    pub carrier: String,

    /// Carrier main office address.
    #[arg(long)]
    pub main_office: String,

    #[arg(long)]
    pub truck: String,

    #[arg(long)]
    pub home_terminal: String,

    /// Duty cycle: 70/8 or 60/7.
    #[arg(long, default_value = "70/8")]
    pub cycle: CycleType,

    /// Shipping document number.
    #[arg(long)]
    pub document: Option<String>,

    #[arg(long)]
    pub shipper: Option<String>,

    #[arg(long)]
    pub commodity: Option<String>,

    #[arg(long)]
    pub remarks: Option<String>,
}

/// Log day subcommands.
#[derive(Debug, Subcommand)]
pub enum LogAction {
    /// Open (or look up) a trip's log day for a date.
    Open {
        #[arg(long)]
        trip: i64,

        /// Calendar date, YYYY-MM-DD.
        #[arg(long)]
        date: String,
    },

    /// End a log day: set remarks and optionally close the open interval.
    End {
        log_id: i64,

        #[arg(long)]
        remarks: Option<String>,

        /// Close the open interval at this time.
        #[arg(long)]
        at: Option<String>,

        #[arg(long, allow_negative_numbers = true)]
        lat: Option<f64>,

        #[arg(long, allow_negative_numbers = true)]
        lon: Option<f64>,
    },

    /// Show a log day's totals and intervals.
    Show {
        log_id: i64,

        /// Output as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Insert a manual correction interval.
    Correct {
        log_id: i64,

        #[arg(long)]
        status: DutyStatus,

        #[arg(long)]
        start: String,

        #[arg(long)]
        end: String,

        #[arg(long)]
        remarks: Option<String>,
    },

    /// Delete an interval.
    RemoveInterval {
        interval_id: i64,
    },
}

#[derive(Debug, Args)]
pub struct ReportArgs {
    /// Log day to report on.
    #[arg(long, conflicts_with = "trip", required_unless_present = "trip")]
    pub log: Option<i64>,

    /// Trip to report on; the log day for the report's date is opened as needed.
    #[arg(long)]
    pub trip: Option<i64>,

    /// off_duty, sleeper, driving or on_duty.
    #[arg(long)]
    pub status: DutyStatus,

    /// Epoch milliseconds, ISO 8601, or e.g. "15 minutes ago". Defaults to now.
    #[arg(long)]
    pub at: Option<String>,

    #[arg(long, allow_negative_numbers = true)]
    pub lat: Option<f64>,

    #[arg(long, allow_negative_numbers = true)]
    pub lon: Option<f64>,
}
