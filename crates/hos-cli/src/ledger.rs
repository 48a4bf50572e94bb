//! The duty-status ledger service.
//!
//! Serializes every mutation of one log day behind a per-log-day lock, so
//! reports for the same day apply one at a time in arrival order while other
//! days and other trips proceed independently. The database mutex is only
//! ever held inside synchronous calls, never across an `.await`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use hos_core::transition;
use hos_core::{
    DistanceEstimator, DutyStatus, GpsPoint, Interval, IntervalId, LedgerError, LogDay, LogDayId,
    RawTimestamp, StatusReport, TripId,
};
use hos_db::{Database, DbError, TripEnd};
use hos_route::estimate_or_zero;
use tokio::sync::OwnedMutexGuard;

use crate::estimator::Estimator;

/// Registry of per-log-day locks.
#[derive(Debug, Default)]
pub struct LogDayLocks {
    locks: Mutex<HashMap<LogDayId, Arc<tokio::sync::Mutex<()>>>>,
}

impl LogDayLocks {
    /// Waits for exclusive access to a log day. Released when the guard drops.
    pub async fn acquire(&self, id: LogDayId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            // Drop locks nobody holds or waits on.
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            Arc::clone(locks.entry(id).or_default())
        };
        lock.lock_owned().await
    }
}

/// A manual interval correction.
#[derive(Debug, Clone)]
pub struct Correction {
    pub status: DutyStatus,
    pub start: RawTimestamp,
    pub end: RawTimestamp,
    pub remarks: Option<String>,
}

/// Database, estimator and per-log-day locking.
pub struct Ledger<E = Estimator> {
    db: Mutex<Database>,
    locks: LogDayLocks,
    estimator: E,
    estimator_timeout: Duration,
}

impl<E: DistanceEstimator> Ledger<E> {
    pub fn new(db: Database, estimator: E, estimator_timeout: Duration) -> Self {
        Self {
            db: Mutex::new(db),
            locks: LogDayLocks::default(),
            estimator,
            estimator_timeout,
        }
    }

    /// Runs a synchronous database operation.
    pub fn with_db<T>(
        &self,
        f: impl FnOnce(&mut Database) -> Result<T, DbError>,
    ) -> Result<T, DbError> {
        let mut db = self.db.lock().map_err(|_| {
            DbError::Ledger(LedgerError::InvalidState(
                "database lock poisoned".to_string(),
            ))
        })?;
        f(&mut db)
    }

    /// Applies a status report to its log day.
    pub async fn apply_status_report(&self, report: &StatusReport) -> Result<LogDay, DbError> {
        let at = report.timestamp.parse()?;
        self.apply_at(report.log_day_id, report.status, at, report.gps)
            .await
    }

    /// Applies a report addressed to a trip, opening the log day for the
    /// timestamp's UTC date if needed. An interval still open on the trip's
    /// previous log day is carried across midnight first.
    pub async fn report_for_trip(
        &self,
        trip_id: TripId,
        status: DutyStatus,
        timestamp: &RawTimestamp,
        gps: Option<GpsPoint>,
    ) -> Result<LogDay, DbError> {
        let at = timestamp.parse()?;
        let date = at.date_naive();
        let previous = self.with_db(|db| db.previous_log_day(trip_id, date))?;
        let log_day = {
            let _guard = match &previous {
                Some(previous) => Some(self.locks.acquire(previous.id).await),
                None => None,
            };
            self.with_db(|db| db.open_log_day_carrying(trip_id, date))?
        };
        self.apply_at(log_day.id, status, at, gps).await
    }

    async fn apply_at(
        &self,
        log_day_id: LogDayId,
        status: DutyStatus,
        at: DateTime<Utc>,
        gps: Option<GpsPoint>,
    ) -> Result<LogDay, DbError> {
        let _guard = self.locks.acquire(log_day_id).await;
        let mut loaded = self.with_db(|db| db.load_timeline(log_day_id))?;
        let planned = transition::plan(&loaded.timeline, status, at, gps)?;
        let miles = match planned.distance_leg() {
            Some((from, to)) => {
                estimate_or_zero(&self.estimator, from, to, self.estimator_timeout).await
            }
            None => 0.0,
        };
        let state = transition::apply(&mut loaded.timeline, &planned, miles)?;
        let log_day =
            self.with_db(|db| db.commit_timeline(log_day_id, loaded.revision, &loaded.timeline))?;
        tracing::debug!(log_day_id = %log_day_id, ?state, miles, "status report applied");
        Ok(log_day)
    }

    /// Ends a log day. Remarks, when given, replace the existing remarks.
    /// With `close`, the open interval is closed at that time and the day is
    /// recomputed; without it totals are left alone.
    pub async fn end_log(
        &self,
        log_day_id: LogDayId,
        remarks: Option<&str>,
        close: Option<(&RawTimestamp, Option<GpsPoint>)>,
    ) -> Result<LogDay, DbError> {
        let close = close
            .map(|(timestamp, gps)| timestamp.parse().map(|at| (at, gps)))
            .transpose()?;
        let _guard = self.locks.acquire(log_day_id).await;
        self.with_db(|db| {
            if let Some((at, gps)) = close {
                let mut loaded = db.load_timeline(log_day_id)?;
                loaded.timeline.close(at, gps)?;
                return db.close_log_day(log_day_id, loaded.revision, &loaded.timeline, remarks);
            }
            if let Some(remarks) = remarks {
                db.end_log(log_day_id, Some(remarks))?;
            }
            db.get_log_day(log_day_id)
        })
    }

    /// Inserts a closed, non-automated interval and recomputes.
    pub async fn correct(
        &self,
        log_day_id: LogDayId,
        correction: &Correction,
    ) -> Result<LogDay, DbError> {
        let start = correction.start.parse()?;
        let end = correction.end.parse()?;
        let interval = Interval {
            end: Some(end),
            remarks: correction.remarks.clone(),
            automated: false,
            ..Interval::opened(correction.status, start, None)
        };
        let _guard = self.locks.acquire(log_day_id).await;
        self.with_db(|db| {
            let mut loaded = db.load_timeline(log_day_id)?;
            loaded.timeline.insert_closed(interval)?;
            db.commit_timeline(log_day_id, loaded.revision, &loaded.timeline)
        })
    }

    /// Deletes an interval and recomputes its log day.
    pub async fn remove_interval(&self, interval_id: IntervalId) -> Result<LogDay, DbError> {
        let log_day_id = self.with_db(|db| db.interval_log_day(interval_id))?;
        let _guard = self.locks.acquire(log_day_id).await;
        self.with_db(|db| {
            let mut loaded = db.load_timeline(log_day_id)?;
            loaded.timeline.remove(interval_id)?;
            db.commit_timeline(log_day_id, loaded.revision, &loaded.timeline)
        })
    }

    /// Completes a trip and records its compliance snapshot.
    pub fn end_trip(&self, trip_id: TripId) -> Result<TripEnd, DbError> {
        self.with_db(|db| db.end_trip(trip_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeZone};
    use hos_core::{CycleType, Hours};
    use hos_db::NewTrip;
    use hos_route::EstimatorError;

    fn at(hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 4, 5, hour, minute, 0).unwrap()
    }

    fn gps(lat: f64, lon: f64) -> GpsPoint {
        GpsPoint::new(lat, lon).unwrap()
    }

    /// Returns a fixed distance after an optional delay.
    struct Fixed {
        miles: f64,
        delay: Duration,
    }

    impl DistanceEstimator for Fixed {
        type Error = EstimatorError;

        async fn miles_between(&self, _: GpsPoint, _: GpsPoint) -> Result<f64, Self::Error> {
            tokio::time::sleep(self.delay).await;
            Ok(self.miles)
        }
    }

    struct Hanging;

    impl DistanceEstimator for Hanging {
        type Error = EstimatorError;

        async fn miles_between(&self, _: GpsPoint, _: GpsPoint) -> Result<f64, Self::Error> {
            std::future::pending().await
        }
    }

    fn ledger<E: DistanceEstimator>(estimator: E) -> (Ledger<E>, TripId, LogDayId) {
        let mut db = Database::open_in_memory().unwrap();
        let trip = db
            .create_trip(&NewTrip {
                driver_id: "D-7".to_string(),
                from_location: "Gary, IN".to_string(),
                to_location: "Joliet, IL".to_string(),
                cycle_type: CycleType::Seventy8,
                ..NewTrip::default()
            })
            .unwrap();
        let log_day = db
            .open_log_day(trip.id, NaiveDate::from_ymd_opt(2025, 4, 5).unwrap())
            .unwrap();
        let ledger = Ledger::new(db, estimator, Duration::from_millis(200));
        (ledger, trip.id, log_day.id)
    }

    fn report(
        log_day_id: LogDayId,
        status: DutyStatus,
        when: DateTime<Utc>,
        position: Option<GpsPoint>,
    ) -> StatusReport {
        StatusReport {
            log_day_id,
            status,
            timestamp: when.into(),
            gps: position,
        }
    }

    #[tokio::test]
    async fn driving_reports_accrue_estimated_miles() {
        let (ledger, _, log_day_id) = ledger(Fixed {
            miles: 12.5,
            delay: Duration::ZERO,
        });
        let a = gps(41.59, -87.34);
        let b = gps(41.52, -88.08);
        ledger
            .apply_status_report(&report(log_day_id, DutyStatus::Driving, at(8, 0), Some(a)))
            .await
            .unwrap();
        let day = ledger
            .apply_status_report(&report(log_day_id, DutyStatus::Driving, at(9, 0), Some(b)))
            .await
            .unwrap();
        assert!((day.totals.miles_driving_today - 12.5).abs() < 1e-9);
        assert_eq!(day.totals.latest_gps, Some(b));
    }

    #[tokio::test]
    async fn hanging_estimator_counts_zero_miles() {
        let (ledger, _, log_day_id) = ledger(Hanging);
        ledger
            .apply_status_report(&report(
                log_day_id,
                DutyStatus::Driving,
                at(8, 0),
                Some(gps(41.59, -87.34)),
            ))
            .await
            .unwrap();
        let day = ledger
            .apply_status_report(&report(
                log_day_id,
                DutyStatus::Driving,
                at(9, 0),
                Some(gps(41.52, -88.08)),
            ))
            .await
            .unwrap();
        assert!(day.totals.miles_driving_today.abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn reports_by_trip_open_the_log_day() {
        let (ledger, trip_id, log_day_id) = ledger(Fixed {
            miles: 0.0,
            delay: Duration::ZERO,
        });
        let day = ledger
            .report_for_trip(trip_id, DutyStatus::OnDuty, &at(6, 0).into(), None)
            .await
            .unwrap();
        assert_eq!(day.id, log_day_id);

        let next = ledger
            .report_for_trip(
                trip_id,
                DutyStatus::OffDuty,
                &RawTimestamp::Iso("2025-04-06T01:00:00Z".to_string()),
                None,
            )
            .await
            .unwrap();
        assert_ne!(next.id, log_day_id);
        assert_eq!(next.date, NaiveDate::from_ymd_opt(2025, 4, 6).unwrap());
    }

    #[tokio::test]
    async fn trip_reports_split_duty_time_at_midnight() {
        let (ledger, trip_id, log_day_id) = ledger(Fixed {
            miles: 0.0,
            delay: Duration::ZERO,
        });
        ledger
            .report_for_trip(trip_id, DutyStatus::Driving, &at(20, 0).into(), None)
            .await
            .unwrap();
        let next = ledger
            .report_for_trip(
                trip_id,
                DutyStatus::OffDuty,
                &RawTimestamp::Iso("2025-04-06T02:00:00Z".to_string()),
                None,
            )
            .await
            .unwrap();
        assert_eq!(next.totals.driving_hours, Hours::from_whole(2));

        let first = ledger.with_db(|db| db.get_log_day(log_day_id)).unwrap();
        assert_eq!(first.totals.driving_hours, Hours::from_whole(4));
        let first_intervals = ledger.with_db(|db| db.list_intervals(log_day_id)).unwrap();
        assert!(first_intervals.iter().all(|i| !i.is_open()));

        let intervals = ledger.with_db(|db| db.list_intervals(next.id)).unwrap();
        let statuses: Vec<_> = intervals.iter().map(|i| i.status).collect();
        assert_eq!(statuses, [DutyStatus::Driving, DutyStatus::OffDuty]);
        assert!(intervals[1].is_open());
    }

    #[tokio::test]
    async fn invalid_reports_leave_the_day_untouched() {
        let (ledger, _, log_day_id) = ledger(Fixed {
            miles: 0.0,
            delay: Duration::ZERO,
        });
        ledger
            .apply_status_report(&report(log_day_id, DutyStatus::OnDuty, at(8, 0), None))
            .await
            .unwrap();

        let err = ledger
            .apply_status_report(&report(log_day_id, DutyStatus::Driving, at(7, 0), None))
            .await
            .unwrap_err();
        assert!(matches!(
            err.ledger(),
            Some(LedgerError::InvalidTimestamp { .. })
        ));

        let garbled = StatusReport {
            timestamp: RawTimestamp::Iso("yesterday-ish".to_string()),
            ..report(log_day_id, DutyStatus::Driving, at(9, 0), None)
        };
        let err = ledger.apply_status_report(&garbled).await.unwrap_err();
        assert!(matches!(
            err.ledger(),
            Some(LedgerError::InvalidTimestamp { .. })
        ));

        let missing = report(LogDayId::new(99).unwrap(), DutyStatus::Driving, at(9, 0), None);
        let err = ledger.apply_status_report(&missing).await.unwrap_err();
        assert!(matches!(err.ledger(), Some(LedgerError::NotFound { .. })));

        let intervals = ledger.with_db(|db| db.list_intervals(log_day_id)).unwrap();
        assert_eq!(intervals.len(), 1);
        assert_eq!(intervals[0].status, DutyStatus::OnDuty);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_reports_for_one_day_are_serialized() {
        let (ledger, _, log_day_id) = ledger(Fixed {
            miles: 1.0,
            delay: Duration::from_millis(5),
        });
        let ledger = Arc::new(ledger);
        ledger
            .apply_status_report(&report(
                log_day_id,
                DutyStatus::Driving,
                at(6, 0),
                Some(gps(41.0, -87.0)),
            ))
            .await
            .unwrap();

        let mut tasks = Vec::new();
        for i in 1..=12_u32 {
            let ledger = Arc::clone(&ledger);
            tasks.push(tokio::spawn(async move {
                let status = if i % 3 == 0 {
                    DutyStatus::OnDuty
                } else {
                    DutyStatus::Driving
                };
                let position = gps(41.0, -87.0 + f64::from(i) / 100.0);
                ledger
                    .apply_status_report(&report(log_day_id, status, at(6, i), Some(position)))
                    .await
            }));
        }
        for task in tasks {
            match task.await.unwrap() {
                Ok(_) => {}
                // Arrival order may differ from timestamp order.
                Err(err) => assert!(
                    matches!(err.ledger(), Some(LedgerError::InvalidTimestamp { .. })),
                    "unexpected error: {err}"
                ),
            }
        }

        let intervals = ledger.with_db(|db| db.list_intervals(log_day_id)).unwrap();
        assert_eq!(intervals.iter().filter(|i| i.is_open()).count(), 1);
        assert!(intervals.windows(2).all(|pair| pair[0].end <= Some(pair[1].start)));
    }

    #[tokio::test]
    async fn end_log_closes_and_keeps_remarks() {
        let (ledger, _, log_day_id) = ledger(Fixed {
            miles: 0.0,
            delay: Duration::ZERO,
        });
        ledger
            .apply_status_report(&report(log_day_id, DutyStatus::OnDuty, at(6, 0), None))
            .await
            .unwrap();

        let remarks_only = ledger
            .end_log(log_day_id, Some("fueled at Gary"), None)
            .await
            .unwrap();
        assert_eq!(remarks_only.totals.on_duty_hours, Hours::ZERO);
        assert_eq!(remarks_only.remarks.as_deref(), Some("fueled at Gary"));

        let closed_at: RawTimestamp = at(8, 30).into();
        let closed = ledger
            .end_log(log_day_id, None, Some((&closed_at, None)))
            .await
            .unwrap();
        assert_eq!(closed.totals.on_duty_hours, Hours::from_hundredths(250));
        assert_eq!(closed.remarks.as_deref(), Some("fueled at Gary"));

        let err = ledger
            .end_log(log_day_id, None, Some((&closed_at, None)))
            .await
            .unwrap_err();
        assert!(matches!(err.ledger(), Some(LedgerError::InvalidState(_))));
    }

    #[tokio::test]
    async fn corrections_insert_and_remove_intervals() {
        let (ledger, _, log_day_id) = ledger(Fixed {
            miles: 0.0,
            delay: Duration::ZERO,
        });
        ledger
            .apply_status_report(&report(log_day_id, DutyStatus::Driving, at(10, 0), None))
            .await
            .unwrap();

        let inspection = Correction {
            status: DutyStatus::OnDuty,
            start: at(7, 0).into(),
            end: at(7, 45).into(),
            remarks: Some("pre-trip inspection".to_string()),
        };
        let day = ledger.correct(log_day_id, &inspection).await.unwrap();
        assert_eq!(day.totals.on_duty_hours, Hours::from_hundredths(75));

        let overlapping = Correction {
            start: at(9, 30).into(),
            end: at(10, 30).into(),
            ..inspection.clone()
        };
        let err = ledger.correct(log_day_id, &overlapping).await.unwrap_err();
        assert!(matches!(err.ledger(), Some(LedgerError::InvalidState(_))));

        let intervals = ledger.with_db(|db| db.list_intervals(log_day_id)).unwrap();
        assert!(!intervals[0].automated);
        let day = ledger
            .remove_interval(intervals[0].id.unwrap())
            .await
            .unwrap();
        assert_eq!(day.totals.on_duty_hours, Hours::ZERO);
    }
}
