//! Compliance aggregation.
//!
//! Derived totals are a pure function of a log day's intervals and the
//! on-duty totals of its trip's neighbouring days:
//!
//! 1. Per day: closed interval durations summed by status and truncated to
//!    hundredths of an hour, mileage sums, latest known position.
//! 2. Across days: on-duty sums over the trailing 6/7/8 calendar days
//!    (inclusive of the day itself) and the hours left in the trip's cycle.
//!
//! Sibling days are fetched through [`LogDayRepository`] so storage can serve
//! them from a single consistent snapshot.

use std::collections::HashMap;

use chrono::{NaiveDate, TimeDelta};
use rayon::prelude::*;

use crate::model::{DerivedTotals, Interval, LogDay, Trip};
use crate::types::{CycleType, DutyStatus, GpsPoint, Hours, LogDayId, TripId};

/// Widest rolling window, in days.
pub const WIDEST_WINDOW_DAYS: i64 = 8;

/// The slice of a log day the rolling windows need.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DaySummary {
    pub log_day_id: LogDayId,
    pub date: NaiveDate,
    pub on_duty_hours: Hours,
}

impl From<&LogDay> for DaySummary {
    fn from(day: &LogDay) -> Self {
        Self {
            log_day_id: day.id,
            date: day.date,
            on_duty_hours: day.totals.on_duty_hours,
        }
    }
}

/// Read access to a trip's log days for rolling-window sums.
pub trait LogDayRepository {
    type Error;

    /// Every log day of `trip_id` dated within `[start, end]`, inclusive.
    fn log_days_in_range(
        &self,
        trip_id: TripId,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<DaySummary>, Self::Error>;
}

/// Totals that depend only on one day's intervals.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DayTotals {
    pub off_duty_hours: Hours,
    pub sleeper_hours: Hours,
    pub driving_hours: Hours,
    pub on_duty_hours: Hours,
    pub miles_driving: f64,
    pub miles_total: f64,
    pub latest_gps: Option<GpsPoint>,
}

/// Totals over the trailing windows ending on a day.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RollingTotals {
    pub on_duty_last_6_days: Hours,
    pub on_duty_last_7_days: Hours,
    pub on_duty_last_8_days: Hours,
    pub on_duty_last_7_days_60: Hours,
    pub available_hours_tomorrow: Hours,
}

/// Sums one day's intervals. Open intervals contribute no hours.
pub fn day_totals(intervals: &[Interval]) -> DayTotals {
    let mut durations: HashMap<DutyStatus, TimeDelta> = HashMap::new();
    let mut miles_driving = 0.0;
    let mut miles_total = 0.0;
    for interval in intervals {
        *durations.entry(interval.status).or_default() += interval.duration();
        miles_total += interval.mileage;
        if interval.status == DutyStatus::Driving {
            miles_driving += interval.mileage;
        }
    }
    let hours = |status: DutyStatus| {
        Hours::from_duration(durations.get(&status).copied().unwrap_or_default())
    };

    // Unsaved intervals are the newest; otherwise the highest ID wins.
    let latest_gps = intervals
        .iter()
        .max_by_key(|i| (i.id.is_none(), i.id))
        .and_then(Interval::last_known_gps);

    DayTotals {
        off_duty_hours: hours(DutyStatus::OffDuty),
        sleeper_hours: hours(DutyStatus::Sleeper),
        driving_hours: hours(DutyStatus::Driving),
        on_duty_hours: hours(DutyStatus::OnDuty),
        miles_driving,
        miles_total,
        latest_gps,
    }
}

/// First date of the `window`-day range ending on `date`.
pub fn window_start(date: NaiveDate, window: i64) -> NaiveDate {
    date - TimeDelta::days(window - 1)
}

/// Rolling sums for `log_day_id` on `date`.
///
/// `today_on_duty` replaces whatever `siblings` holds for the day itself, so
/// stale stored totals for the day being recomputed never leak in.
pub fn rolling_totals(
    log_day_id: LogDayId,
    date: NaiveDate,
    today_on_duty: Hours,
    siblings: &[DaySummary],
    cycle: CycleType,
) -> RollingTotals {
    let window_sum = |window: i64| -> Hours {
        let start = window_start(date, window);
        let others: Hours = siblings
            .iter()
            .filter(|s| s.log_day_id != log_day_id && s.date >= start && s.date <= date)
            .map(|s| s.on_duty_hours)
            .sum();
        others + today_on_duty
    };

    let on_duty_last_7_days = window_sum(7);
    RollingTotals {
        on_duty_last_6_days: window_sum(6),
        on_duty_last_7_days,
        on_duty_last_8_days: window_sum(8),
        on_duty_last_7_days_60: window_sum(7),
        available_hours_tomorrow: cycle.max_hours().saturating_sub(on_duty_last_7_days),
    }
}

/// Recomputes every derived total for one log day.
pub fn recompute(
    log_day: &LogDay,
    intervals: &[Interval],
    siblings: &[DaySummary],
    cycle: CycleType,
) -> DerivedTotals {
    let day = day_totals(intervals);
    let rolling = rolling_totals(log_day.id, log_day.date, day.on_duty_hours, siblings, cycle);
    combine(day, rolling)
}

/// Fetches the widest window through `repo`, then recomputes.
pub fn recompute_from<R: LogDayRepository>(
    repo: &R,
    trip: &Trip,
    log_day: &LogDay,
    intervals: &[Interval],
) -> Result<DerivedTotals, R::Error> {
    let start = window_start(log_day.date, WIDEST_WINDOW_DAYS);
    let siblings = repo.log_days_in_range(trip.id, start, log_day.date)?;
    let totals = recompute(log_day, intervals, &siblings, trip.cycle_type);
    tracing::debug!(
        log_day_id = %log_day.id,
        date = %log_day.date,
        siblings = siblings.len(),
        on_duty = %totals.on_duty_hours,
        available_tomorrow = %totals.available_hours_tomorrow,
        "recomputed log day"
    );
    Ok(totals)
}

/// Recomputes every log day of a trip at once.
///
/// Per-day totals are independent and computed in parallel; rolling windows
/// are then taken over the fresh per-day on-duty totals.
pub fn recompute_trip(
    cycle: CycleType,
    days: &[(LogDay, Vec<Interval>)],
) -> Vec<(LogDayId, DerivedTotals)> {
    let per_day: Vec<(&LogDay, DayTotals)> = days
        .par_iter()
        .map(|(day, intervals)| (day, day_totals(intervals)))
        .collect();

    let summaries: Vec<DaySummary> = per_day
        .iter()
        .map(|(day, totals)| DaySummary {
            log_day_id: day.id,
            date: day.date,
            on_duty_hours: totals.on_duty_hours,
        })
        .collect();

    per_day
        .into_iter()
        .map(|(day, totals)| {
            let rolling = rolling_totals(day.id, day.date, totals.on_duty_hours, &summaries, cycle);
            (day.id, combine(totals, rolling))
        })
        .collect()
}

fn combine(day: DayTotals, rolling: RollingTotals) -> DerivedTotals {
    DerivedTotals {
        off_duty_hours: day.off_duty_hours,
        sleeper_hours: day.sleeper_hours,
        driving_hours: day.driving_hours,
        on_duty_hours: day.on_duty_hours,
        on_duty_last_6_days: rolling.on_duty_last_6_days,
        on_duty_last_7_days: rolling.on_duty_last_7_days,
        on_duty_last_8_days: rolling.on_duty_last_8_days,
        on_duty_last_7_days_60: rolling.on_duty_last_7_days_60,
        available_hours_tomorrow: rolling.available_hours_tomorrow,
        miles_driving_today: day.miles_driving,
        miles_today: day.miles_total,
        latest_gps: day.latest_gps,
    }
}
