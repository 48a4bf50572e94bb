//! Status transition engine.
//!
//! Applying a report is split in two so that the distance lookup (the only
//! slow step) can happen between deciding and mutating:
//!
//! 1. [`plan`] inspects the timeline and decides what the report means.
//! 2. The caller resolves [`Transition::distance_leg`], if any, to miles.
//! 3. [`apply`] mutates the timeline.
//!
//! Both steps validate before touching anything, so a failed report leaves
//! the timeline unchanged.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::LedgerError;
use crate::timeline::IntervalTimeline;
use crate::timestamp::RawTimestamp;
use crate::types::{DutyStatus, GpsPoint, LogDayId};

/// An inbound duty-status (or position-only) report for one log day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub log_day_id: LogDayId,
    pub status: DutyStatus,
    pub timestamp: RawTimestamp,
    #[serde(default)]
    pub gps: Option<GpsPoint>,
}

/// Per-log-day engine state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TransitionState {
    NoOpenInterval,
    OpenInterval(DutyStatus),
}

impl TransitionState {
    pub fn of(timeline: &IntervalTimeline) -> Self {
        timeline
            .open_interval()
            .map_or(Self::NoOpenInterval, |open| Self::OpenInterval(open.status))
    }
}

/// What a report will do to the timeline.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// No interval is open: start one.
    Open {
        status: DutyStatus,
        at: DateTime<Utc>,
        gps: Option<GpsPoint>,
    },
    /// Same status as the open interval: move its end position and, when
    /// driving, accrue the distance travelled.
    Extend {
        status: DutyStatus,
        gps: Option<GpsPoint>,
        leg: Option<(GpsPoint, GpsPoint)>,
    },
    /// Status changed: close the open interval and start a new one.
    Switch {
        from: DutyStatus,
        to: DutyStatus,
        at: DateTime<Utc>,
        gps: Option<GpsPoint>,
    },
}

impl Transition {
    /// The pair of points whose road distance should be added as mileage.
    pub const fn distance_leg(&self) -> Option<(GpsPoint, GpsPoint)> {
        match self {
            Self::Extend { leg, .. } => *leg,
            Self::Open { .. } | Self::Switch { .. } => None,
        }
    }

    /// Engine state after this transition is applied.
    pub const fn resulting_state(&self) -> TransitionState {
        match self {
            Self::Open { status, .. }
            | Self::Extend { status, .. }
            | Self::Switch { to: status, .. } => TransitionState::OpenInterval(*status),
        }
    }
}

/// Decides how a report at `at` with `status` and optional `gps` applies.
///
/// Reports older than the open interval's start (or, with nothing open, older
/// than the last closed interval's end) fail with `InvalidTimestamp`.
pub fn plan(
    timeline: &IntervalTimeline,
    status: DutyStatus,
    at: DateTime<Utc>,
    gps: Option<GpsPoint>,
) -> Result<Transition, LedgerError> {
    let Some(open) = timeline.open_interval() else {
        if timeline.latest_end().is_some_and(|latest| at < latest) {
            return Err(LedgerError::invalid_timestamp(at));
        }
        return Ok(Transition::Open { status, at, gps });
    };

    if at < open.start {
        return Err(LedgerError::invalid_timestamp(at));
    }

    if open.status == status {
        let leg = match (status, open.last_known_gps(), gps) {
            (DutyStatus::Driving, Some(previous), Some(current)) => Some((previous, current)),
            _ => None,
        };
        return Ok(Transition::Extend { status, gps, leg });
    }

    Ok(Transition::Switch {
        from: open.status,
        to: status,
        at,
        gps,
    })
}

/// Applies a planned transition. `miles` is the resolved distance for
/// [`Transition::distance_leg`] and is ignored for other transitions.
pub fn apply(
    timeline: &mut IntervalTimeline,
    transition: &Transition,
    miles: f64,
) -> Result<TransitionState, LedgerError> {
    match transition {
        Transition::Open { status, at, gps } => {
            timeline.open(*status, *at, *gps)?;
        }
        Transition::Extend { gps, leg, .. } => {
            let current = TransitionState::of(timeline);
            if current != transition.resulting_state() {
                return Err(LedgerError::invalid_state(format!(
                    "planned to extend but timeline is {current:?}"
                )));
            }
            if leg.is_some() && (miles.is_nan() || miles < 0.0) {
                return Err(LedgerError::InvalidInput(format!(
                    "distance must be non-negative, got {miles}"
                )));
            }
            if let Some(gps) = gps {
                timeline.update_position(*gps)?;
            }
            if leg.is_some() && miles > 0.0 {
                timeline.append_mileage(miles)?;
            }
        }
        Transition::Switch { from, to, at, gps } => {
            let current = TransitionState::of(timeline);
            if current != TransitionState::OpenInterval(*from) {
                return Err(LedgerError::invalid_state(format!(
                    "planned to close {from} but timeline is {current:?}"
                )));
            }
            timeline.close(*at, *gps)?;
            timeline.open(*to, *at, *gps)?;
        }
    }
    tracing::debug!(?transition, "applied status transition");
    Ok(transition.resulting_state())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Interval;
    use chrono::TimeZone;

    fn at(hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 4, 5, hour, minute, 0).unwrap()
    }

    fn gps(lat: f64, lon: f64) -> GpsPoint {
        GpsPoint::new(lat, lon).unwrap()
    }

    /// Plans and applies with a fixed distance for every driving leg.
    fn report(
        timeline: &mut IntervalTimeline,
        status: DutyStatus,
        when: DateTime<Utc>,
        position: Option<GpsPoint>,
        miles: f64,
    ) -> Result<TransitionState, LedgerError> {
        let transition = plan(timeline, status, when, position)?;
        let miles = if transition.distance_leg().is_some() { miles } else { 0.0 };
        apply(timeline, &transition, miles)
    }

    #[test]
    fn first_report_opens_interval() {
        let mut timeline = IntervalTimeline::new();
        let state = report(&mut timeline, DutyStatus::OnDuty, at(6, 0), None, 0.0).unwrap();
        assert_eq!(state, TransitionState::OpenInterval(DutyStatus::OnDuty));
        assert_eq!(timeline.intervals().len(), 1);
        assert!(timeline.is_dirty());
    }

    #[test]
    fn repeated_status_without_position_leaves_timeline_clean() {
        let mut timeline = IntervalTimeline::from_intervals(vec![Interval::opened(
            DutyStatus::OnDuty,
            at(6, 0),
            None,
        )])
        .unwrap();
        let state = report(&mut timeline, DutyStatus::OnDuty, at(7, 0), None, 0.0).unwrap();
        assert_eq!(state, TransitionState::OpenInterval(DutyStatus::OnDuty));
        assert!(!timeline.is_dirty());
    }

    #[test]
    fn same_driving_status_accrues_mileage_without_new_interval() {
        let mut timeline = IntervalTimeline::new();
        let p1 = gps(41.88, -87.63);
        let p2 = gps(41.60, -87.33);
        report(&mut timeline, DutyStatus::Driving, at(8, 0), Some(p1), 0.0).unwrap();

        let transition = plan(&timeline, DutyStatus::Driving, at(8, 30), Some(p2)).unwrap();
        assert_eq!(transition.distance_leg(), Some((p1, p2)));
        let state = apply(&mut timeline, &transition, 12.5).unwrap();

        assert_eq!(state, TransitionState::OpenInterval(DutyStatus::Driving));
        assert_eq!(timeline.intervals().len(), 1);
        let open = timeline.open_interval().unwrap();
        assert!((open.mileage - 12.5).abs() < f64::EPSILON);
        assert_eq!(open.end_gps, Some(p2));
    }

    #[test]
    fn later_legs_start_from_previous_end_position() {
        let mut timeline = IntervalTimeline::new();
        let p1 = gps(1.0, 1.0);
        let p2 = gps(2.0, 2.0);
        let p3 = gps(3.0, 3.0);
        report(&mut timeline, DutyStatus::Driving, at(8, 0), Some(p1), 0.0).unwrap();
        report(&mut timeline, DutyStatus::Driving, at(8, 30), Some(p2), 10.0).unwrap();

        let transition = plan(&timeline, DutyStatus::Driving, at(9, 0), Some(p3)).unwrap();
        assert_eq!(transition.distance_leg(), Some((p2, p3)));
    }

    #[test]
    fn same_non_driving_status_only_moves_position() {
        let mut timeline = IntervalTimeline::new();
        report(&mut timeline, DutyStatus::OnDuty, at(6, 0), Some(gps(1.0, 1.0)), 0.0).unwrap();
        let transition =
            plan(&timeline, DutyStatus::OnDuty, at(6, 10), Some(gps(1.1, 1.1))).unwrap();
        assert_eq!(transition.distance_leg(), None);
        apply(&mut timeline, &transition, 0.0).unwrap();
        let open = timeline.open_interval().unwrap();
        assert_eq!(open.end_gps, Some(gps(1.1, 1.1)));
        assert!(open.mileage.abs() < f64::EPSILON);
    }

    #[test]
    fn missing_gps_skips_distance_lookup() {
        let mut timeline = IntervalTimeline::new();
        report(&mut timeline, DutyStatus::Driving, at(8, 0), None, 0.0).unwrap();
        let transition =
            plan(&timeline, DutyStatus::Driving, at(8, 30), Some(gps(2.0, 2.0))).unwrap();
        assert_eq!(transition.distance_leg(), None);

        report(&mut timeline, DutyStatus::Driving, at(9, 0), None, 99.0).unwrap();
        let open = timeline.open_interval().unwrap();
        assert!(open.mileage.abs() < f64::EPSILON);
        assert_eq!(open.end_gps, None);
    }

    #[test]
    fn status_change_closes_and_opens_at_same_instant() {
        let mut timeline = IntervalTimeline::new();
        let p = gps(5.0, 5.0);
        report(&mut timeline, DutyStatus::Driving, at(8, 0), None, 0.0).unwrap();
        let state = report(&mut timeline, DutyStatus::OffDuty, at(11, 0), Some(p), 0.0).unwrap();

        assert_eq!(state, TransitionState::OpenInterval(DutyStatus::OffDuty));
        let intervals = timeline.intervals();
        assert_eq!(intervals.len(), 2);
        assert_eq!(intervals[0].status, DutyStatus::Driving);
        assert_eq!(intervals[0].end, Some(at(11, 0)));
        assert_eq!(intervals[0].end_gps, Some(p));
        assert_eq!(intervals[1].status, DutyStatus::OffDuty);
        assert_eq!(intervals[1].start, at(11, 0));
        assert_eq!(intervals[1].start_gps, Some(p));
        assert!(intervals[1].mileage.abs() < f64::EPSILON);
    }

    #[test]
    fn out_of_order_report_leaves_timeline_unchanged() {
        let mut timeline = IntervalTimeline::new();
        report(&mut timeline, DutyStatus::Driving, at(8, 0), None, 0.0).unwrap();
        let before = timeline.clone();

        let err = report(&mut timeline, DutyStatus::OnDuty, at(7, 0), None, 0.0).unwrap_err();
        assert!(matches!(err, LedgerError::InvalidTimestamp { .. }));
        assert_eq!(timeline, before);
    }

    #[test]
    fn report_after_closed_day_must_not_overlap() {
        let mut timeline = IntervalTimeline::new();
        timeline.open(DutyStatus::OnDuty, at(6, 0), None).unwrap();
        timeline.close(at(9, 0), None).unwrap();
        let err = plan(&timeline, DutyStatus::Driving, at(8, 0), None).unwrap_err();
        assert!(matches!(err, LedgerError::InvalidTimestamp { .. }));
    }

    #[test]
    fn stale_plan_is_rejected() {
        let mut timeline = IntervalTimeline::new();
        report(&mut timeline, DutyStatus::Driving, at(8, 0), None, 0.0).unwrap();
        let transition = plan(&timeline, DutyStatus::OffDuty, at(9, 0), None).unwrap();
        report(&mut timeline, DutyStatus::OnDuty, at(8, 30), None, 0.0).unwrap();

        let err = apply(&mut timeline, &transition, 0.0).unwrap_err();
        assert!(matches!(err, LedgerError::InvalidState(_)));
    }

    #[test]
    fn at_most_one_interval_open_across_report_sequences() {
        let statuses = [
            DutyStatus::OffDuty,
            DutyStatus::OffDuty,
            DutyStatus::Sleeper,
            DutyStatus::Driving,
            DutyStatus::Driving,
            DutyStatus::OnDuty,
            DutyStatus::Driving,
            DutyStatus::OffDuty,
        ];
        let mut timeline = IntervalTimeline::new();
        for (hour, status) in (0u32..).zip(statuses) {
            report(&mut timeline, status, at(hour * 2, 0), Some(gps(1.0, 1.0)), 3.0).unwrap();
            let open = timeline.intervals().iter().filter(|i| i.is_open()).count();
            assert_eq!(open, 1);
            for pair in timeline.intervals().windows(2) {
                assert!(pair[0].end.is_some_and(|end| end <= pair[1].start));
            }
        }
        // 8 reports, 2 repeats
        assert_eq!(timeline.intervals().len(), 6);
    }

    #[test]
    fn status_report_deserializes_wire_shape() {
        let json = concat!(
            r#"{"logDayId":3,"status":"driving","timestamp":1743817698000,"#,
            r#""gps":{"latitude":1.0,"longitude":2.0}}"#
        );
        let parsed: StatusReport = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.log_day_id.get(), 3);
        assert_eq!(parsed.timestamp, RawTimestamp::EpochMillis(1_743_817_698_000));
        assert_eq!(parsed.gps, Some(gps(1.0, 2.0)));

        let json = r#"{"logDayId":3,"status":"off_duty","timestamp":"2025-04-05T01:48:18Z"}"#;
        let parsed: StatusReport = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.gps, None);
    }

    #[test]
    fn status_report_rejects_out_of_range_position() {
        let json = concat!(
            r#"{"logDayId":1,"status":"driving","timestamp":"2025-04-05T08:00:00Z","#,
            r#""gps":{"latitude":200.0,"longitude":0.0}}"#
        );
        let err = serde_json::from_str::<StatusReport>(json).unwrap_err();
        assert!(err.to_string().contains("latitude must be between"), "{err}");
    }
}
