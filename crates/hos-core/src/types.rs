//! Core type definitions with validation.

use std::fmt;
use std::ops::{Add, AddAssign, Sub};

use chrono::TimeDelta;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Validation errors for core types.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ValidationError {
    /// Invalid duty status value.
    #[error("invalid duty status: {value}")]
    InvalidDutyStatus { value: String },

    /// Invalid cycle type value.
    #[error("invalid cycle type: {value} (expected 70/8 or 60/7)")]
    InvalidCycleType { value: String },

    /// Invalid trip status value.
    #[error("invalid trip status: {value}")]
    InvalidTripStatus { value: String },

    /// A coordinate was outside its valid range.
    #[error("{field} must be between -{limit} and {limit}, got {value}")]
    CoordinateOutOfRange {
        field: &'static str,
        limit: f64,
        value: f64,
    },

    /// A row identifier was not positive.
    #[error("{field} must be positive, got {value}")]
    NonPositiveId { field: &'static str, value: i64 },
}

/// The four duty statuses recorded on a driver's log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DutyStatus {
    OffDuty,
    Sleeper,
    Driving,
    OnDuty,
}

impl DutyStatus {
    /// String representation for database storage.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::OffDuty => "off_duty",
            Self::Sleeper => "sleeper",
            Self::Driving => "driving",
            Self::OnDuty => "on_duty",
        }
    }

    /// Whether this status counts as rest toward a 34-hour restart.
    #[must_use]
    pub const fn is_rest(&self) -> bool {
        matches!(self, Self::OffDuty | Self::Sleeper)
    }
}

impl fmt::Display for DutyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for DutyStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "off_duty" | "off-duty" => Ok(Self::OffDuty),
            "sleeper" => Ok(Self::Sleeper),
            "driving" => Ok(Self::Driving),
            "on_duty" | "on-duty" => Ok(Self::OnDuty),
            _ => Err(ValidationError::InvalidDutyStatus {
                value: s.to_string(),
            }),
        }
    }
}

/// Regulatory duty cycle a trip is logged under.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CycleType {
    /// 70 hours on duty in 8 consecutive days.
    #[default]
    #[serde(rename = "70/8")]
    Seventy8,
    /// 60 hours on duty in 7 consecutive days.
    #[serde(rename = "60/7")]
    Sixty7,
}

impl CycleType {
    /// String representation for database storage.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Seventy8 => "70/8",
            Self::Sixty7 => "60/7",
        }
    }

    /// Maximum on-duty hours permitted within the cycle.
    #[must_use]
    pub const fn max_hours(&self) -> Hours {
        match self {
            Self::Seventy8 => Hours::from_whole(70),
            Self::Sixty7 => Hours::from_whole(60),
        }
    }
}

impl fmt::Display for CycleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for CycleType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "70/8" => Ok(Self::Seventy8),
            "60/7" => Ok(Self::Sixty7),
            _ => Err(ValidationError::InvalidCycleType {
                value: s.to_string(),
            }),
        }
    }
}

/// Coarse trip lifecycle. `Completed` is terminal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TripStatus {
    #[default]
    Ongoing,
    Completed,
}

impl TripStatus {
    /// String representation for database storage.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Ongoing => "ongoing",
            Self::Completed => "completed",
        }
    }
}

impl fmt::Display for TripStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for TripStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ongoing" => Ok(Self::Ongoing),
            "completed" => Ok(Self::Completed),
            _ => Err(ValidationError::InvalidTripStatus {
                value: s.to_string(),
            }),
        }
    }
}

/// Generates a row ID newtype over a positive integer with common trait implementations.
macro_rules! define_row_id {
    (
        $(#[$meta:meta])*
        $name:ident, $field_name:literal
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(try_from = "i64", into = "i64")]
        pub struct $name(i64);

        impl $name {
            /// Creates a new ID after validation.
            pub const fn new(id: i64) -> Result<Self, ValidationError> {
                if id <= 0 {
                    return Err(ValidationError::NonPositiveId {
                        field: $field_name,
                        value: id,
                    });
                }
                Ok(Self(id))
            }

            /// Returns the raw row ID.
            pub const fn get(self) -> i64 {
                self.0
            }
        }

        impl TryFrom<i64> for $name {
            type Error = ValidationError;

            fn try_from(value: i64) -> Result<Self, Self::Error> {
                Self::new(value)
            }
        }

        impl From<$name> for i64 {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

define_row_id!(
    /// Identifier of a multi-day trip.
    TripId, "trip ID"
);

define_row_id!(
    /// Identifier of a trip's per-calendar-day log.
    LogDayId, "log day ID"
);

define_row_id!(
    /// Identifier of a single duty-status interval.
    IntervalId, "interval ID"
);

/// A GPS position in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "UncheckedGpsPoint")]
pub struct GpsPoint {
    pub latitude: f64,
    pub longitude: f64,
}

/// Wire form of [`GpsPoint`], range-checked on conversion.
#[derive(Deserialize)]
struct UncheckedGpsPoint {
    #[serde(alias = "lat")]
    latitude: f64,
    #[serde(alias = "lon", alias = "lng")]
    longitude: f64,
}

impl TryFrom<UncheckedGpsPoint> for GpsPoint {
    type Error = ValidationError;

    fn try_from(point: UncheckedGpsPoint) -> Result<Self, Self::Error> {
        Self::new(point.latitude, point.longitude)
    }
}

impl GpsPoint {
    /// Creates a point after range validation.
    pub fn new(latitude: f64, longitude: f64) -> Result<Self, ValidationError> {
        if latitude.is_nan() || !(-90.0..=90.0).contains(&latitude) {
            return Err(ValidationError::CoordinateOutOfRange {
                field: "latitude",
                limit: 90.0,
                value: latitude,
            });
        }
        if longitude.is_nan() || !(-180.0..=180.0).contains(&longitude) {
            return Err(ValidationError::CoordinateOutOfRange {
                field: "longitude",
                limit: 180.0,
                value: longitude,
            });
        }
        Ok(Self {
            latitude,
            longitude,
        })
    }
}

impl fmt::Display for GpsPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.6},{:.6}", self.latitude, self.longitude)
    }
}

const MS_PER_HOUR: i64 = 3_600_000;

/// A non-negative number of hours held at two decimal digits.
///
/// Conversions from durations and floats truncate toward zero, never round:
/// an on-duty total is never understated and available time is never overstated
/// by more than the truncation already accepted by the log.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Hours(i64);

impl Hours {
    pub const ZERO: Self = Self(0);

    /// Whole hours.
    #[must_use]
    pub const fn from_whole(hours: i64) -> Self {
        Self::from_hundredths(hours * 100)
    }

    /// Hundredths of an hour. Negative values clamp to zero.
    #[must_use]
    pub const fn from_hundredths(hundredths: i64) -> Self {
        if hundredths < 0 { Self(0) } else { Self(hundredths) }
    }

    /// Truncates a duration to hundredths of an hour.
    #[must_use]
    pub fn from_duration(duration: TimeDelta) -> Self {
        let ms = duration.num_milliseconds();
        Self::from_hundredths(ms.saturating_mul(100) / MS_PER_HOUR)
    }

    /// Truncates a float to hundredths of an hour. NaN and negatives become zero.
    #[must_use]
    #[expect(
        clippy::cast_possible_truncation,
        reason = "truncation to hundredths is the intended conversion"
    )]
    pub fn from_f64(hours: f64) -> Self {
        if hours.is_nan() || hours <= 0.0 {
            return Self::ZERO;
        }
        Self::from_hundredths((hours * 100.0).trunc() as i64)
    }

    #[must_use]
    pub const fn hundredths(self) -> i64 {
        self.0
    }

    #[must_use]
    #[expect(
        clippy::cast_precision_loss,
        reason = "hour totals are far below f64 integer precision"
    )]
    pub fn as_f64(self) -> f64 {
        self.0 as f64 / 100.0
    }

    /// Subtraction clamped at zero.
    #[must_use]
    pub const fn saturating_sub(self, other: Self) -> Self {
        Self::from_hundredths(self.0 - other.0)
    }
}

impl Add for Hours {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Self(self.0.saturating_add(rhs.0))
    }
}

impl AddAssign for Hours {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl Sub for Hours {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self::Output {
        self.saturating_sub(rhs)
    }
}

impl std::iter::Sum for Hours {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::ZERO, Add::add)
    }
}

impl fmt::Display for Hours {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.0 / 100, self.0 % 100)
    }
}

impl Serialize for Hours {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.as_f64().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Hours {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let value = f64::deserialize(deserializer)?;
        Ok(Self::from_f64(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duty_status_from_str() {
        assert_eq!("off_duty".parse::<DutyStatus>().unwrap(), DutyStatus::OffDuty);
        assert_eq!("sleeper".parse::<DutyStatus>().unwrap(), DutyStatus::Sleeper);
        assert_eq!("driving".parse::<DutyStatus>().unwrap(), DutyStatus::Driving);
        assert_eq!("on_duty".parse::<DutyStatus>().unwrap(), DutyStatus::OnDuty);
        assert!("resting".parse::<DutyStatus>().is_err());
    }

    #[test]
    fn duty_status_serde_uses_snake_case() {
        let json = serde_json::to_string(&DutyStatus::OffDuty).unwrap();
        assert_eq!(json, "\"off_duty\"");
        let parsed: DutyStatus = serde_json::from_str("\"on_duty\"").unwrap();
        assert_eq!(parsed, DutyStatus::OnDuty);
    }

    #[test]
    fn cycle_type_round_trips_through_regulatory_labels() {
        assert_eq!("70/8".parse::<CycleType>().unwrap(), CycleType::Seventy8);
        assert_eq!("60/7".parse::<CycleType>().unwrap(), CycleType::Sixty7);
        assert!("80/8".parse::<CycleType>().is_err());
        assert_eq!(
            serde_json::to_string(&CycleType::Sixty7).unwrap(),
            "\"60/7\""
        );
        assert_eq!(CycleType::default(), CycleType::Seventy8);
    }

    #[test]
    fn cycle_type_caps() {
        assert_eq!(CycleType::Seventy8.max_hours(), Hours::from_whole(70));
        assert_eq!(CycleType::Sixty7.max_hours(), Hours::from_whole(60));
    }

    #[test]
    fn trip_status_from_str() {
        assert_eq!("ongoing".parse::<TripStatus>().unwrap(), TripStatus::Ongoing);
        assert_eq!(
            "completed".parse::<TripStatus>().unwrap(),
            TripStatus::Completed
        );
        assert!("paused".parse::<TripStatus>().is_err());
    }

    #[test]
    fn row_ids_reject_non_positive() {
        assert!(TripId::new(0).is_err());
        assert!(LogDayId::new(-3).is_err());
        assert_eq!(IntervalId::new(7).unwrap().get(), 7);
    }

    #[test]
    fn row_id_serde_rejects_zero() {
        let result: Result<LogDayId, _> = serde_json::from_str("0");
        assert!(result.is_err());
        let parsed: LogDayId = serde_json::from_str("12").unwrap();
        assert_eq!(parsed.get(), 12);
    }

    #[test]
    fn gps_point_validates_range() {
        assert!(GpsPoint::new(41.88, -87.63).is_ok());
        assert!(GpsPoint::new(91.0, 0.0).is_err());
        assert!(GpsPoint::new(0.0, -181.0).is_err());
        assert!(GpsPoint::new(f64::NAN, 0.0).is_err());
    }

    #[test]
    fn gps_point_accepts_short_field_names() {
        let point: GpsPoint = serde_json::from_str(r#"{"lat":1.5,"lon":2.5}"#).unwrap();
        assert_eq!(point, GpsPoint::new(1.5, 2.5).unwrap());
    }

    #[test]
    fn gps_point_deserialization_checks_range() {
        let err = serde_json::from_str::<GpsPoint>(r#"{"latitude":200.0,"longitude":0.0}"#)
            .unwrap_err();
        assert!(err.to_string().contains("latitude"), "{err}");
        assert!(serde_json::from_str::<GpsPoint>(r#"{"lat":0.0,"lng":-180.5}"#).is_err());
    }

    #[test]
    fn hours_truncate_durations() {
        // 1h 59m 59s is 1.9997h, which truncates to 1.99
        let duration = TimeDelta::seconds(3600 + 59 * 60 + 59);
        assert_eq!(Hours::from_duration(duration).hundredths(), 199);
        assert_eq!(Hours::from_duration(TimeDelta::minutes(20)).hundredths(), 33);
        assert_eq!(Hours::from_duration(TimeDelta::minutes(-5)), Hours::ZERO);
    }

    #[test]
    fn hours_truncate_floats() {
        assert_eq!(Hours::from_f64(2.999).hundredths(), 299);
        assert_eq!(Hours::from_f64(-1.0), Hours::ZERO);
        assert_eq!(Hours::from_f64(f64::NAN), Hours::ZERO);
    }

    #[test]
    fn hours_subtraction_clamps_at_zero() {
        let cap = Hours::from_whole(70);
        assert_eq!(cap - Hours::from_whole(80), Hours::ZERO);
        assert_eq!(cap - Hours::from_hundredths(2550), Hours::from_hundredths(4450));
    }

    #[test]
    fn hours_display_and_serde() {
        let hours = Hours::from_hundredths(805);
        assert_eq!(hours.to_string(), "8.05");
        assert_eq!(serde_json::to_string(&hours).unwrap(), "8.05");
        let parsed: Hours = serde_json::from_str("3.333").unwrap();
        assert_eq!(parsed.hundredths(), 333);
    }
}
