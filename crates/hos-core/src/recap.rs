//! End-of-trip compliance recap.

use chrono::TimeDelta;

use crate::model::{ComplianceSnapshot, Interval, LogDay, Trip};
use crate::types::{CycleType, Hours};

/// Consecutive off-duty time that restarts the cycle.
pub const RESTART_HOURS: Hours = Hours::from_whole(34);

/// Builds the recap for a completing trip.
///
/// `latest` is the trip's most recent log day and `intervals` every interval
/// of the trip in chronological order.
pub fn summarize(
    trip: &Trip,
    latest: Option<&LogDay>,
    intervals: &[Interval],
) -> ComplianceSnapshot {
    let consecutive_hours_off = trailing_rest(intervals);
    let reset_applied = consecutive_hours_off >= RESTART_HOURS;
    let cap = trip.cycle_type.max_hours();

    let total_on_duty_last_period = latest.map_or(Hours::ZERO, |day| match trip.cycle_type {
        CycleType::Seventy8 => day.totals.on_duty_last_8_days,
        CycleType::Sixty7 => day.totals.on_duty_last_7_days_60,
    });
    let available_hours_tomorrow = if reset_applied {
        cap
    } else {
        latest.map_or(cap, |day| day.totals.available_hours_tomorrow)
    };

    ComplianceSnapshot {
        trip_id: trip.id,
        total_on_duty_last_period,
        available_hours_tomorrow,
        reset_applied,
        consecutive_hours_off,
    }
}

/// Off-duty and sleeper time at the end of the timeline, back to the last
/// driving or on-duty interval.
fn trailing_rest(intervals: &[Interval]) -> Hours {
    let rest: TimeDelta = intervals
        .iter()
        .rev()
        .take_while(|i| i.status.is_rest())
        .map(Interval::duration)
        .sum();
    Hours::from_duration(rest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, NaiveDate, TimeZone, Utc};

    use crate::model::{CarrierInfo, DerivedTotals, ShippingInfo};
    use crate::types::{DutyStatus, LogDayId, TripId, TripStatus};

    fn at(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 4, day, hour, 0, 0).unwrap()
    }

    fn trip(cycle_type: CycleType) -> Trip {
        Trip {
            id: TripId::new(1).unwrap(),
            driver_id: "D-1".to_string(),
            from_location: "Chicago".to_string(),
            to_location: "Denver".to_string(),
            carrier: CarrierInfo::default(),
            shipping: ShippingInfo::default(),
            cycle_type,
            status: TripStatus::Ongoing,
            total_mileage: 0.0,
            remarks: None,
            created_at: at(1, 0),
        }
    }

    fn closed(status: DutyStatus, start: DateTime<Utc>, end: DateTime<Utc>) -> Interval {
        Interval {
            end: Some(end),
            ..Interval::opened(status, start, None)
        }
    }

    fn latest_day() -> LogDay {
        LogDay {
            id: LogDayId::new(3).unwrap(),
            trip_id: TripId::new(1).unwrap(),
            date: NaiveDate::from_ymd_opt(2025, 4, 3).unwrap(),
            totals: DerivedTotals {
                on_duty_last_8_days: Hours::from_whole(52),
                on_duty_last_7_days_60: Hours::from_whole(41),
                available_hours_tomorrow: Hours::from_whole(18),
                ..DerivedTotals::default()
            },
            remarks: None,
            created_at: at(3, 0),
        }
    }

    #[test]
    fn recap_without_reset_carries_latest_totals() {
        let intervals = vec![
            closed(DutyStatus::Driving, at(3, 6), at(3, 14)),
            closed(DutyStatus::OffDuty, at(3, 14), at(3, 22)),
        ];
        let day = latest_day();
        let recap = summarize(&trip(CycleType::Seventy8), Some(&day), &intervals);
        assert_eq!(recap.total_on_duty_last_period, Hours::from_whole(52));
        assert_eq!(recap.available_hours_tomorrow, Hours::from_whole(18));
        assert_eq!(recap.consecutive_hours_off, Hours::from_whole(8));
        assert!(!recap.reset_applied);
    }

    #[test]
    fn recap_applies_restart_after_34_hours_off() {
        let intervals = vec![
            closed(DutyStatus::OnDuty, at(1, 6), at(1, 10)),
            closed(DutyStatus::OffDuty, at(1, 10), at(2, 8)),
            closed(DutyStatus::Sleeper, at(2, 8), at(2, 20)),
        ];
        let day = latest_day();
        let recap = summarize(&trip(CycleType::Sixty7), Some(&day), &intervals);
        assert_eq!(recap.consecutive_hours_off, Hours::from_whole(34));
        assert!(recap.reset_applied);
        assert_eq!(recap.available_hours_tomorrow, Hours::from_whole(60));
        assert_eq!(recap.total_on_duty_last_period, Hours::from_whole(41));
    }

    #[test]
    fn recap_for_trip_without_logs() {
        let recap = summarize(&trip(CycleType::Seventy8), None, &[]);
        assert_eq!(recap.total_on_duty_last_period, Hours::ZERO);
        assert_eq!(recap.available_hours_tomorrow, Hours::from_whole(70));
        assert!(!recap.reset_applied);
    }
}
