//! Core domain logic for Hours-of-Service duty logs.
//!
//! This crate contains the fundamental types and logic for:
//! - Interval timeline: the non-overlapping duty-status intervals of a log day
//! - Status transitions: applying driver status reports to the timeline
//! - Compliance: per-day totals and rolling 6/7/8-day on-duty sums
//! - Recap: the terminal compliance snapshot of a completed trip

pub mod compliance;
pub mod distance;
mod error;
pub mod model;
pub mod recap;
pub mod timeline;
pub mod timestamp;
pub mod transition;
mod types;

pub use compliance::{DaySummary, LogDayRepository, recompute, recompute_from, recompute_trip};
pub use distance::DistanceEstimator;
pub use error::LedgerError;
pub use model::{
    CarrierInfo, ComplianceSnapshot, DerivedTotals, Interval, LogDay, ShippingInfo, Trip,
};
pub use timeline::IntervalTimeline;
pub use timestamp::{RawTimestamp, format_timestamp};
pub use transition::{StatusReport, Transition, TransitionState};
pub use types::{
    CycleType, DutyStatus, GpsPoint, Hours, IntervalId, LogDayId, TripId, TripStatus,
    ValidationError,
};
