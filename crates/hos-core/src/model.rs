//! Trip, log-day and interval records.

use chrono::{DateTime, NaiveDate, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{
    CycleType, DutyStatus, GpsPoint, Hours, IntervalId, LogDayId, TripId, TripStatus,
};

/// Carrier and equipment details printed on the log header.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CarrierInfo {
    pub carrier_name: String,
    pub main_office_address: String,
    pub truck_number: String,
    pub home_terminal_address: String,
}

/// Optional shipping document details.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShippingInfo {
    pub document_number: Option<String>,
    pub shipper: Option<String>,
    pub commodity: Option<String>,
}

/// One multi-day driving trip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trip {
    pub id: TripId,
    pub driver_id: String,
    pub from_location: String,
    pub to_location: String,
    pub carrier: CarrierInfo,
    pub shipping: ShippingInfo,
    pub cycle_type: CycleType,
    pub status: TripStatus,
    /// Sum of `miles_today` over the trip's log days.
    pub total_mileage: f64,
    pub remarks: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Trip {
    pub fn is_completed(&self) -> bool {
        self.status == TripStatus::Completed
    }
}

/// Totals derived from a log day's intervals and its trip's neighbouring days.
///
/// Only ever produced by recomputation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DerivedTotals {
    pub off_duty_hours: Hours,
    pub sleeper_hours: Hours,
    pub driving_hours: Hours,
    pub on_duty_hours: Hours,
    pub on_duty_last_6_days: Hours,
    pub on_duty_last_7_days: Hours,
    pub on_duty_last_8_days: Hours,
    pub on_duty_last_7_days_60: Hours,
    pub available_hours_tomorrow: Hours,
    pub miles_driving_today: f64,
    pub miles_today: f64,
    pub latest_gps: Option<GpsPoint>,
}

/// A trip's record for one calendar date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogDay {
    pub id: LogDayId,
    pub trip_id: TripId,
    pub date: NaiveDate,
    #[serde(flatten)]
    pub totals: DerivedTotals,
    pub remarks: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A span of time the driver spent in one duty status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Interval {
    /// `None` until the interval has been persisted.
    pub id: Option<IntervalId>,
    pub status: DutyStatus,
    pub start: DateTime<Utc>,
    /// `None` while the interval is open.
    pub end: Option<DateTime<Utc>>,
    pub start_gps: Option<GpsPoint>,
    pub end_gps: Option<GpsPoint>,
    /// Miles accrued while open; only meaningful for driving.
    pub mileage: f64,
    pub remarks: Option<String>,
    /// `false` for manual corrections.
    pub automated: bool,
}

impl Interval {
    /// A freshly opened, automated interval.
    pub fn opened(status: DutyStatus, start: DateTime<Utc>, gps: Option<GpsPoint>) -> Self {
        Self {
            id: None,
            status,
            start,
            end: None,
            start_gps: gps,
            end_gps: None,
            mileage: 0.0,
            remarks: None,
            automated: true,
        }
    }

    pub const fn is_open(&self) -> bool {
        self.end.is_none()
    }

    /// Closed duration. Open intervals count as zero.
    pub fn duration(&self) -> TimeDelta {
        self.end.map_or(TimeDelta::zero(), |end| end - self.start)
    }

    /// Most recent known position: the end GPS, else the start GPS.
    pub fn last_known_gps(&self) -> Option<GpsPoint> {
        self.end_gps.or(self.start_gps)
    }
}

/// Terminal compliance recap written once when a trip completes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComplianceSnapshot {
    pub trip_id: TripId,
    /// On-duty total over the cycle's period as of the latest log day.
    pub total_on_duty_last_period: Hours,
    pub available_hours_tomorrow: Hours,
    /// Whether a 34-hour restart ended the trip.
    pub reset_applied: bool,
    pub consecutive_hours_off: Hours,
}
