//! Storage layer for Hours-of-Service duty logs.
//!
//! Provides persistence for trips, log days, duty-status intervals and
//! end-of-trip compliance snapshots using `rusqlite`.
//!
//! # Thread Safety
//!
//! The [`Database`] type wraps a `rusqlite::Connection`, which is `Send` but not `Sync`.
//! Callers that share one database across tasks wrap it in a `Mutex` and keep
//! each lock scoped to a single call.
//!
//! # Consistency
//!
//! Every mutation of a log day's intervals goes through
//! [`Database::commit_timeline`], which writes the intervals, recomputes the
//! derived totals of the log day and of the later days whose rolling windows
//! include it (reading sibling days inside the same transaction) and bumps
//! the log day's `revision`, all in one transaction.
//! A caller that loaded an older revision is rejected with `InvalidState`.
//! A timeline that was not mutated is not written.
//!
//! # Schema
//!
//! ## Timestamp Format
//!
//! Instants are stored as TEXT in RFC 3339 with milliseconds
//! (e.g., `2025-04-05T01:48:18.000Z`); calendar dates as `YYYY-MM-DD`.
//! Both orderings match lexicographic ordering.
//!
//! ## Hour Totals
//!
//! Hour totals are stored as INTEGER hundredths of an hour, already
//! truncated, so storage never rounds.

use std::path::Path;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use hos_core::compliance::{self, DaySummary, LogDayRepository};
use hos_core::{
    CarrierInfo, ComplianceSnapshot, CycleType, DerivedTotals, DutyStatus, GpsPoint, Hours,
    Interval, IntervalId, IntervalTimeline, LedgerError, LogDay, LogDayId, ShippingInfo, Trip,
    TripId, ValidationError, format_timestamp, recap,
};
use rusqlite::{Connection, OptionalExtension, Row, Transaction, params};
use thiserror::Error;

/// Database errors.
#[derive(Debug, Error)]
pub enum DbError {
    /// An error from the underlying database.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// A ledger rule rejected the operation.
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    /// A stored row could not be decoded.
    #[error("corrupt {table} row {id}: {message}")]
    Corrupt {
        table: &'static str,
        id: i64,
        message: String,
    },
}

impl DbError {
    /// The ledger error behind this failure, if any.
    pub const fn ledger(&self) -> Option<&LedgerError> {
        match self {
            Self::Ledger(err) => Some(err),
            Self::Sqlite(_) | Self::Corrupt { .. } => None,
        }
    }
}

/// Database connection wrapper.
///
/// See the [module documentation](self) for thread safety considerations.
pub struct Database {
    conn: Connection,
}

/// Input for [`Database::create_trip`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewTrip {
    pub driver_id: String,
    pub from_location: String,
    pub to_location: String,
    pub carrier: CarrierInfo,
    pub shipping: ShippingInfo,
    pub cycle_type: CycleType,
    pub remarks: Option<String>,
}

/// A log day's intervals together with the context needed to mutate them.
#[derive(Debug, Clone)]
pub struct LoadedLogDay {
    pub trip: Trip,
    pub log_day: LogDay,
    pub timeline: IntervalTimeline,
    /// Pass back to [`Database::commit_timeline`].
    pub revision: i64,
}

/// Outcome of ending a trip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TripEnd {
    /// The trip was ongoing and is now completed with this recap.
    Completed(ComplianceSnapshot),
    /// The trip had already been completed; nothing changed.
    AlreadyCompleted(Option<ComplianceSnapshot>),
}

impl Database {
    /// Opens a database at the given path, creating it if necessary.
    ///
    /// The database schema is automatically initialized on first open.
    pub fn open(path: &Path) -> Result<Self, DbError> {
        let conn = Connection::open(path)?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Opens an in-memory database.
    ///
    /// Useful for testing. The database is destroyed when the connection closes.
    pub fn open_in_memory() -> Result<Self, DbError> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Initializes the database schema.
    ///
    /// This is idempotent - safe to call on an already-initialized database.
    fn init(&self) -> Result<(), DbError> {
        self.conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS trips (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                driver_id TEXT NOT NULL,
                from_location TEXT NOT NULL,
                to_location TEXT NOT NULL,
                carrier_name TEXT NOT NULL,
                main_office_address TEXT NOT NULL,
                truck_number TEXT NOT NULL,
                home_terminal_address TEXT NOT NULL,
                cycle_type TEXT NOT NULL DEFAULT '70/8',
                document_number TEXT,
                shipper TEXT,
                commodity TEXT,
                status TEXT NOT NULL DEFAULT 'ongoing',
                total_mileage REAL NOT NULL DEFAULT 0,
                remarks TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            -- log_date: YYYY-MM-DD
            -- *_hundredths: hour totals truncated to hundredths of an hour
            CREATE TABLE IF NOT EXISTS log_days (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                trip_id INTEGER NOT NULL,
                log_date TEXT NOT NULL,
                off_duty_hundredths INTEGER NOT NULL DEFAULT 0,
                sleeper_hundredths INTEGER NOT NULL DEFAULT 0,
                driving_hundredths INTEGER NOT NULL DEFAULT 0,
                on_duty_hundredths INTEGER NOT NULL DEFAULT 0,
                on_duty_last_6_days_hundredths INTEGER NOT NULL DEFAULT 0,
                on_duty_last_7_days_hundredths INTEGER NOT NULL DEFAULT 0,
                on_duty_last_8_days_hundredths INTEGER NOT NULL DEFAULT 0,
                on_duty_last_7_days_60_hundredths INTEGER NOT NULL DEFAULT 0,
                available_tomorrow_hundredths INTEGER NOT NULL DEFAULT 0,
                miles_driving_today REAL NOT NULL DEFAULT 0,
                miles_today REAL NOT NULL DEFAULT 0,
                latest_latitude REAL,
                latest_longitude REAL,
                remarks TEXT,
                revision INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                UNIQUE (trip_id, log_date),
                FOREIGN KEY (trip_id) REFERENCES trips(id) ON DELETE CASCADE
            );

            -- end_time NULL: the interval is open
            CREATE TABLE IF NOT EXISTS intervals (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                log_day_id INTEGER NOT NULL,
                status TEXT NOT NULL,
                start_time TEXT NOT NULL,
                end_time TEXT,
                start_latitude REAL,
                start_longitude REAL,
                end_latitude REAL,
                end_longitude REAL,
                mileage REAL NOT NULL DEFAULT 0,
                remarks TEXT,
                automated INTEGER NOT NULL DEFAULT 1,
                FOREIGN KEY (log_day_id) REFERENCES log_days(id) ON DELETE CASCADE
            );

            CREATE INDEX IF NOT EXISTS idx_intervals_log_day ON intervals(log_day_id, start_time);
            CREATE UNIQUE INDEX IF NOT EXISTS idx_intervals_one_open
                ON intervals(log_day_id) WHERE end_time IS NULL;

            CREATE TABLE IF NOT EXISTS compliance_snapshots (
                trip_id INTEGER PRIMARY KEY,
                total_on_duty_last_period_hundredths INTEGER NOT NULL,
                available_tomorrow_hundredths INTEGER NOT NULL,
                reset_applied INTEGER NOT NULL,
                consecutive_off_hundredths INTEGER NOT NULL,
                created_at TEXT NOT NULL,
                FOREIGN KEY (trip_id) REFERENCES trips(id) ON DELETE CASCADE
            );

            CREATE TRIGGER IF NOT EXISTS compliance_snapshots_immutable
            BEFORE UPDATE ON compliance_snapshots
            BEGIN
                SELECT RAISE(ABORT, 'compliance snapshots are immutable');
            END;
            ",
        )?;
        Ok(())
    }

    // ========== Trips ==========

    /// Starts a new ongoing trip.
    pub fn create_trip(&mut self, trip: &NewTrip) -> Result<Trip, DbError> {
        let now = format_timestamp(Utc::now());
        self.conn.execute(
            "
            INSERT INTO trips
            (driver_id, from_location, to_location, carrier_name, main_office_address,
             truck_number, home_terminal_address, cycle_type, document_number, shipper,
             commodity, status, remarks, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 'ongoing', ?, ?, ?)
            ",
            params![
                trip.driver_id,
                trip.from_location,
                trip.to_location,
                trip.carrier.carrier_name,
                trip.carrier.main_office_address,
                trip.carrier.truck_number,
                trip.carrier.home_terminal_address,
                trip.cycle_type.as_str(),
                trip.shipping.document_number,
                trip.shipping.shipper,
                trip.shipping.commodity,
                trip.remarks,
                now,
                now,
            ],
        )?;
        let id = row_id::<TripId>(self.conn.last_insert_rowid(), "trips")?;
        tracing::debug!(trip_id = %id, cycle = %trip.cycle_type, "created trip");
        fetch_trip(&self.conn, id)
    }

    /// Loads a trip, failing with `NotFound` if it does not exist.
    pub fn get_trip(&self, id: TripId) -> Result<Trip, DbError> {
        fetch_trip(&self.conn, id)
    }

    /// Lists trips, newest first.
    pub fn list_trips(&self) -> Result<Vec<Trip>, DbError> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {TRIP_COLUMNS} FROM trips ORDER BY id DESC"))?;
        let rows = stmt.query_map([], TripRow::from_row)?;
        let mut trips = Vec::new();
        for row in rows {
            trips.push(row?.into_trip()?);
        }
        Ok(trips)
    }

    /// Deletes a trip together with its log days, intervals and snapshot.
    pub fn delete_trip(&mut self, id: TripId) -> Result<(), DbError> {
        let deleted = self
            .conn
            .execute("DELETE FROM trips WHERE id = ?", params![id.get()])?;
        if deleted == 0 {
            return Err(not_found("trip", id.get()));
        }
        Ok(())
    }

    /// Marks a trip completed and writes its compliance snapshot.
    ///
    /// Ending an already-completed trip changes nothing and reports the
    /// existing snapshot.
    pub fn end_trip(&mut self, id: TripId) -> Result<TripEnd, DbError> {
        let tx = self.conn.transaction()?;
        let trip = fetch_trip(&tx, id)?;
        if trip.is_completed() {
            let existing = fetch_snapshot(&tx, id)?;
            return Ok(TripEnd::AlreadyCompleted(existing));
        }

        let now = format_timestamp(Utc::now());
        tx.execute(
            "UPDATE trips SET status = 'completed', updated_at = ? WHERE id = ?",
            params![now, id.get()],
        )?;

        let latest = latest_log_day(&tx, id)?;
        let intervals = trip_intervals(&tx, id)?;
        let snapshot = recap::summarize(&trip, latest.as_ref(), &intervals);
        tx.execute(
            "
            INSERT INTO compliance_snapshots
            (trip_id, total_on_duty_last_period_hundredths, available_tomorrow_hundredths,
             reset_applied, consecutive_off_hundredths, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ",
            params![
                id.get(),
                snapshot.total_on_duty_last_period.hundredths(),
                snapshot.available_hours_tomorrow.hundredths(),
                snapshot.reset_applied,
                snapshot.consecutive_hours_off.hundredths(),
                now,
            ],
        )?;
        tx.commit()?;
        tracing::debug!(trip_id = %id, reset = snapshot.reset_applied, "completed trip");
        Ok(TripEnd::Completed(snapshot))
    }

    /// Loads a trip's compliance snapshot, if it has been completed.
    pub fn compliance_snapshot(&self, id: TripId) -> Result<Option<ComplianceSnapshot>, DbError> {
        fetch_snapshot(&self.conn, id)
    }

    // ========== Log days ==========

    /// Returns the trip's log day for `date`, creating it if needed.
    ///
    /// Completed trips accept no new log days.
    pub fn open_log_day(&mut self, trip_id: TripId, date: NaiveDate) -> Result<LogDay, DbError> {
        let tx = self.conn.transaction()?;
        let trip = fetch_trip(&tx, trip_id)?;
        let id = log_day_for(&tx, &trip, date)?;
        let log_day = fetch_log_day(&tx, id)?;
        tx.commit()?;
        Ok(log_day)
    }

    /// Like [`open_log_day`](Self::open_log_day), but first carries an
    /// interval left open on the trip's previous log day across each
    /// midnight up to `date`.
    ///
    /// The open interval is closed at midnight and reopened with the same
    /// status at midnight on the next day, creating the days in between.
    /// Carrying stops at a day that already has intervals. Everything happens
    /// in one transaction.
    pub fn open_log_day_carrying(
        &mut self,
        trip_id: TripId,
        date: NaiveDate,
    ) -> Result<LogDay, DbError> {
        let tx = self.conn.transaction()?;
        let trip = fetch_trip(&tx, trip_id)?;
        let mut carried = if trip.is_completed() {
            None
        } else {
            previous_log_day(&tx, trip_id, date)?
        };
        while let Some(day) = carried.take() {
            let mut timeline = IntervalTimeline::from_intervals(log_day_intervals(&tx, day.id)?)?;
            let Some(open) = timeline.open_interval().cloned() else {
                break;
            };
            let next_date = day.date.succ_opt().ok_or_else(|| {
                LedgerError::InvalidInput(format!("no calendar day follows {}", day.date))
            })?;
            let midnight = next_date.and_time(NaiveTime::MIN).and_utc();
            if open.start >= midnight {
                break;
            }
            let next_id = log_day_for(&tx, &trip, next_date)?;
            let mut next = IntervalTimeline::from_intervals(log_day_intervals(&tx, next_id)?)?;
            timeline.close(midnight, None)?;
            write_timeline(&tx, &trip, day.id, &timeline)?;
            if !next.intervals().is_empty() {
                break;
            }
            next.open(open.status, midnight, open.last_known_gps())?;
            write_timeline(&tx, &trip, next_id, &next)?;
            tracing::debug!(
                trip_id = %trip_id,
                status = %open.status,
                date = %next_date,
                "carried open interval past midnight"
            );
            if next_date < date {
                carried = Some(fetch_log_day(&tx, next_id)?);
            }
        }
        let id = log_day_for(&tx, &trip, date)?;
        let log_day = fetch_log_day(&tx, id)?;
        tx.commit()?;
        Ok(log_day)
    }

    /// The trip's latest log day dated before `date`.
    pub fn previous_log_day(
        &self,
        trip_id: TripId,
        date: NaiveDate,
    ) -> Result<Option<LogDay>, DbError> {
        previous_log_day(&self.conn, trip_id, date)
    }

    /// Loads a log day, failing with `NotFound` if it does not exist.
    pub fn get_log_day(&self, id: LogDayId) -> Result<LogDay, DbError> {
        fetch_log_day(&self.conn, id)
    }

    /// Lists a trip's log days in date order.
    pub fn list_log_days(&self, trip_id: TripId) -> Result<Vec<LogDay>, DbError> {
        fetch_trip(&self.conn, trip_id)?;
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {LOG_DAY_COLUMNS} FROM log_days WHERE trip_id = ? ORDER BY log_date ASC"
        ))?;
        let rows = stmt.query_map(params![trip_id.get()], LogDayRow::from_row)?;
        let mut days = Vec::new();
        for row in rows {
            days.push(row?.into_log_day()?);
        }
        Ok(days)
    }

    /// Lists a log day's intervals in chronological order.
    pub fn list_intervals(&self, log_day_id: LogDayId) -> Result<Vec<Interval>, DbError> {
        fetch_log_day(&self.conn, log_day_id)?;
        log_day_intervals(&self.conn, log_day_id)
    }

    /// Finds the log day owning an interval.
    pub fn interval_log_day(&self, interval_id: IntervalId) -> Result<LogDayId, DbError> {
        let id: Option<i64> = self
            .conn
            .query_row(
                "SELECT log_day_id FROM intervals WHERE id = ?",
                params![interval_id.get()],
                |row| row.get(0),
            )
            .optional()?;
        let id = id.ok_or_else(|| not_found("interval", interval_id.get()))?;
        row_id(id, "intervals")
    }

    /// Replaces a log day's remarks. Totals are untouched.
    pub fn end_log(&mut self, id: LogDayId, remarks: Option<&str>) -> Result<(), DbError> {
        set_remarks(&self.conn, id, remarks)
    }

    /// Commits a timeline whose open interval was closed and, when given,
    /// replaces the remarks, in one transaction.
    pub fn close_log_day(
        &mut self,
        id: LogDayId,
        expected_revision: i64,
        timeline: &IntervalTimeline,
        remarks: Option<&str>,
    ) -> Result<LogDay, DbError> {
        let tx = self.conn.transaction()?;
        commit_checked(&tx, id, expected_revision, timeline)?;
        if remarks.is_some() {
            set_remarks(&tx, id, remarks)?;
        }
        let log_day = fetch_log_day(&tx, id)?;
        tx.commit()?;
        Ok(log_day)
    }

    // ========== Timeline mutation ==========

    /// Loads everything a status transition needs for one log day.
    pub fn load_timeline(&self, id: LogDayId) -> Result<LoadedLogDay, DbError> {
        let log_day = fetch_log_day(&self.conn, id)?;
        let trip = fetch_trip(&self.conn, log_day.trip_id)?;
        let intervals = log_day_intervals(&self.conn, id)?;
        let timeline = IntervalTimeline::from_intervals(intervals)?;
        let revision = log_day_revision(&self.conn, id)?;
        Ok(LoadedLogDay {
            trip,
            log_day,
            timeline,
            revision,
        })
    }

    /// Persists a mutated timeline and recomputes the log day, atomically.
    ///
    /// Fails with `InvalidState` if the trip is completed or the log day was
    /// modified since `expected_revision` was loaded. Nothing is written on
    /// failure, or when the timeline was not mutated.
    pub fn commit_timeline(
        &mut self,
        id: LogDayId,
        expected_revision: i64,
        timeline: &IntervalTimeline,
    ) -> Result<LogDay, DbError> {
        let tx = self.conn.transaction()?;
        commit_checked(&tx, id, expected_revision, timeline)?;
        let log_day = fetch_log_day(&tx, id)?;
        tx.commit()?;
        Ok(log_day)
    }

    // ========== Batch recomputation ==========

    /// Recomputes every log day of a trip. Returns the number of log days.
    pub fn recompute_trip(&mut self, trip_id: TripId) -> Result<usize, DbError> {
        let tx = self.conn.transaction()?;
        let trip = fetch_trip(&tx, trip_id)?;
        let mut days = Vec::new();
        {
            let mut stmt = tx.prepare(&format!(
                "SELECT {LOG_DAY_COLUMNS} FROM log_days WHERE trip_id = ? ORDER BY log_date ASC"
            ))?;
            let rows = stmt.query_map(params![trip_id.get()], LogDayRow::from_row)?;
            for row in rows {
                let day = row?.into_log_day()?;
                let intervals = log_day_intervals(&tx, day.id)?;
                days.push((day, intervals));
            }
        }
        let results = compliance::recompute_trip(trip.cycle_type, &days);
        for (log_day_id, totals) in &results {
            write_totals(&tx, *log_day_id, totals)?;
        }
        update_trip_mileage(&tx, trip_id)?;
        tx.commit()?;
        tracing::debug!(trip_id = %trip_id, log_days = results.len(), "recomputed trip");
        Ok(results.len())
    }

    /// Recomputes every trip. Returns the number of log days.
    pub fn recompute_all(&mut self) -> Result<usize, DbError> {
        let trip_ids: Vec<TripId> = self.list_trips()?.into_iter().map(|t| t.id).collect();
        let mut count = 0;
        for trip_id in trip_ids {
            count += self.recompute_trip(trip_id)?;
        }
        Ok(count)
    }
}

/// Serves rolling-window reads from an open transaction.
struct SnapshotReader<'a> {
    conn: &'a Connection,
}

impl LogDayRepository for SnapshotReader<'_> {
    type Error = DbError;

    fn log_days_in_range(
        &self,
        trip_id: TripId,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<DaySummary>, Self::Error> {
        let mut stmt = self.conn.prepare(
            "
            SELECT id, log_date, on_duty_hundredths
            FROM log_days
            WHERE trip_id = ? AND log_date >= ? AND log_date <= ?
            ORDER BY log_date ASC
            ",
        )?;
        let rows = stmt.query_map(
            params![trip_id.get(), format_date(start), format_date(end)],
            |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                ))
            },
        )?;
        let mut summaries = Vec::new();
        for row in rows {
            let (id, date, on_duty) = row?;
            summaries.push(DaySummary {
                log_day_id: row_id(id, "log_days")?,
                date: parse_date(&date, "log_days", id)?,
                on_duty_hours: Hours::from_hundredths(on_duty),
            });
        }
        Ok(summaries)
    }
}

/// Returns the ID of the trip's log day for `date`, creating it if needed.
fn log_day_for(tx: &Transaction<'_>, trip: &Trip, date: NaiveDate) -> Result<LogDayId, DbError> {
    let existing: Option<i64> = tx
        .query_row(
            "SELECT id FROM log_days WHERE trip_id = ? AND log_date = ?",
            params![trip.id.get(), format_date(date)],
            |row| row.get(0),
        )
        .optional()?;
    if let Some(id) = existing {
        return row_id(id, "log_days");
    }
    if trip.is_completed() {
        return Err(LedgerError::InvalidState(format!(
            "trip {} is completed; cannot open a log day for {date}",
            trip.id
        ))
        .into());
    }
    tx.execute(
        "INSERT INTO log_days (trip_id, log_date, created_at) VALUES (?, ?, ?)",
        params![
            trip.id.get(),
            format_date(date),
            format_timestamp(Utc::now())
        ],
    )?;
    let id = row_id::<LogDayId>(tx.last_insert_rowid(), "log_days")?;
    // Seed rolling sums from the trip's earlier days.
    recompute_log_day(tx, trip, id)?;
    tracing::debug!(trip_id = %trip.id, log_day_id = %id, %date, "opened log day");
    Ok(id)
}

/// Checks the trip and revision, then writes a mutated timeline.
fn commit_checked(
    tx: &Transaction<'_>,
    id: LogDayId,
    expected_revision: i64,
    timeline: &IntervalTimeline,
) -> Result<(), DbError> {
    let log_day = fetch_log_day(tx, id)?;
    let trip = fetch_trip(tx, log_day.trip_id)?;
    if trip.is_completed() {
        return Err(LedgerError::InvalidState(format!(
            "trip {} is completed; its intervals are final",
            trip.id
        ))
        .into());
    }
    let revision = log_day_revision(tx, id)?;
    if revision != expected_revision {
        return Err(LedgerError::InvalidState(format!(
            "log day {id} changed concurrently (revision {revision}, expected {expected_revision})"
        ))
        .into());
    }
    if timeline.is_dirty() {
        write_timeline(tx, &trip, id, timeline)?;
    }
    Ok(())
}

/// Writes a timeline, bumps the revision and recomputes.
fn write_timeline(
    tx: &Transaction<'_>,
    trip: &Trip,
    id: LogDayId,
    timeline: &IntervalTimeline,
) -> Result<(), DbError> {
    write_intervals(tx, id, timeline)?;
    tx.execute(
        "UPDATE log_days SET revision = revision + 1 WHERE id = ?",
        params![id.get()],
    )?;
    recompute_log_day(tx, trip, id)
}

fn set_remarks(conn: &Connection, id: LogDayId, remarks: Option<&str>) -> Result<(), DbError> {
    let updated = conn.execute(
        "UPDATE log_days SET remarks = ? WHERE id = ?",
        params![remarks, id.get()],
    )?;
    if updated == 0 {
        return Err(not_found("log day", id.get()));
    }
    Ok(())
}

/// Recomputes a log day, then the later days whose windows include it.
fn recompute_log_day(tx: &Transaction<'_>, trip: &Trip, id: LogDayId) -> Result<(), DbError> {
    let log_day = recompute_one(tx, trip, id)?;
    let window_end =
        log_day.date + chrono::Days::new(compliance::WIDEST_WINDOW_DAYS.unsigned_abs() - 1);
    let later: Vec<i64> = {
        let mut stmt = tx.prepare(
            "
            SELECT id FROM log_days
            WHERE trip_id = ? AND log_date > ? AND log_date <= ?
            ORDER BY log_date ASC
            ",
        )?;
        let rows = stmt.query_map(
            params![
                trip.id.get(),
                format_date(log_day.date),
                format_date(window_end)
            ],
            |row| row.get(0),
        )?;
        rows.collect::<Result<_, _>>()?
    };
    for later_id in later {
        recompute_one(tx, trip, row_id(later_id, "log_days")?)?;
    }
    update_trip_mileage(tx, trip.id)
}

fn recompute_one(tx: &Transaction<'_>, trip: &Trip, id: LogDayId) -> Result<LogDay, DbError> {
    let log_day = fetch_log_day(tx, id)?;
    let intervals = log_day_intervals(tx, id)?;
    let reader = SnapshotReader { conn: tx };
    let totals = compliance::recompute_from(&reader, trip, &log_day, &intervals)?;
    write_totals(tx, id, &totals)?;
    Ok(log_day)
}

fn write_intervals(
    tx: &Transaction<'_>,
    log_day_id: LogDayId,
    timeline: &IntervalTimeline,
) -> Result<(), DbError> {
    let stored: Vec<i64> = {
        let mut stmt = tx.prepare("SELECT id FROM intervals WHERE log_day_id = ?")?;
        let rows = stmt.query_map(params![log_day_id.get()], |row| row.get(0))?;
        rows.collect::<Result<_, _>>()?
    };
    let kept: Vec<i64> = timeline
        .intervals()
        .iter()
        .filter_map(|i| i.id.map(IntervalId::get))
        .collect();
    if let Some(unknown) = kept.iter().find(|id| !stored.contains(id)) {
        return Err(LedgerError::InvalidState(format!(
            "interval {unknown} does not belong to log day {log_day_id}"
        ))
        .into());
    }

    for id in stored.iter().filter(|id| !kept.contains(id)) {
        tx.execute("DELETE FROM intervals WHERE id = ?", params![id])?;
    }
    // Updates first so a closed interval frees the open slot before a new
    // open interval is inserted.
    for interval in timeline.intervals() {
        if let Some(id) = interval.id {
            let (start_lat, start_lon) = split_gps(interval.start_gps);
            let (end_lat, end_lon) = split_gps(interval.end_gps);
            tx.execute(
                "
                UPDATE intervals
                SET status = ?, start_time = ?, end_time = ?, start_latitude = ?,
                    start_longitude = ?, end_latitude = ?, end_longitude = ?,
                    mileage = ?, remarks = ?, automated = ?
                WHERE id = ?
                ",
                params![
                    interval.status.as_str(),
                    format_timestamp(interval.start),
                    interval.end.map(format_timestamp),
                    start_lat,
                    start_lon,
                    end_lat,
                    end_lon,
                    interval.mileage,
                    interval.remarks,
                    interval.automated,
                    id.get(),
                ],
            )?;
        }
    }
    for interval in timeline.intervals().iter().filter(|i| i.id.is_none()) {
        let (start_lat, start_lon) = split_gps(interval.start_gps);
        let (end_lat, end_lon) = split_gps(interval.end_gps);
        tx.execute(
            "
            INSERT INTO intervals
            (log_day_id, status, start_time, end_time, start_latitude, start_longitude,
             end_latitude, end_longitude, mileage, remarks, automated)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ",
            params![
                log_day_id.get(),
                interval.status.as_str(),
                format_timestamp(interval.start),
                interval.end.map(format_timestamp),
                start_lat,
                start_lon,
                end_lat,
                end_lon,
                interval.mileage,
                interval.remarks,
                interval.automated,
            ],
        )?;
    }
    Ok(())
}

fn write_totals(conn: &Connection, id: LogDayId, totals: &DerivedTotals) -> Result<(), DbError> {
    let (latitude, longitude) = split_gps(totals.latest_gps);
    conn.execute(
        "
        UPDATE log_days
        SET off_duty_hundredths = ?, sleeper_hundredths = ?, driving_hundredths = ?,
            on_duty_hundredths = ?, on_duty_last_6_days_hundredths = ?,
            on_duty_last_7_days_hundredths = ?, on_duty_last_8_days_hundredths = ?,
            on_duty_last_7_days_60_hundredths = ?, available_tomorrow_hundredths = ?,
            miles_driving_today = ?, miles_today = ?, latest_latitude = ?, latest_longitude = ?
        WHERE id = ?
        ",
        params![
            totals.off_duty_hours.hundredths(),
            totals.sleeper_hours.hundredths(),
            totals.driving_hours.hundredths(),
            totals.on_duty_hours.hundredths(),
            totals.on_duty_last_6_days.hundredths(),
            totals.on_duty_last_7_days.hundredths(),
            totals.on_duty_last_8_days.hundredths(),
            totals.on_duty_last_7_days_60.hundredths(),
            totals.available_hours_tomorrow.hundredths(),
            totals.miles_driving_today,
            totals.miles_today,
            latitude,
            longitude,
            id.get(),
        ],
    )?;
    Ok(())
}

fn update_trip_mileage(conn: &Connection, trip_id: TripId) -> Result<(), DbError> {
    conn.execute(
        "
        UPDATE trips
        SET total_mileage = (SELECT COALESCE(SUM(miles_today), 0) FROM log_days WHERE trip_id = ?)
        WHERE id = ?
        ",
        params![trip_id.get(), trip_id.get()],
    )?;
    Ok(())
}

// ========== Row decoding ==========

const TRIP_COLUMNS: &str = "id, driver_id, from_location, to_location, carrier_name, \
    main_office_address, truck_number, home_terminal_address, cycle_type, document_number, \
    shipper, commodity, status, total_mileage, remarks, created_at";

const LOG_DAY_COLUMNS: &str = "id, trip_id, log_date, off_duty_hundredths, sleeper_hundredths, \
    driving_hundredths, on_duty_hundredths, on_duty_last_6_days_hundredths, \
    on_duty_last_7_days_hundredths, on_duty_last_8_days_hundredths, \
    on_duty_last_7_days_60_hundredths, available_tomorrow_hundredths, miles_driving_today, \
    miles_today, latest_latitude, latest_longitude, remarks, created_at";

const INTERVAL_COLUMNS: &str = "id, status, start_time, end_time, start_latitude, \
    start_longitude, end_latitude, end_longitude, mileage, remarks, automated";

#[derive(Debug)]
struct TripRow {
    id: i64,
    driver_id: String,
    from_location: String,
    to_location: String,
    carrier: CarrierInfo,
    shipping: ShippingInfo,
    cycle_type: String,
    status: String,
    total_mileage: f64,
    remarks: Option<String>,
    created_at: String,
}

impl TripRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            driver_id: row.get(1)?,
            from_location: row.get(2)?,
            to_location: row.get(3)?,
            carrier: CarrierInfo {
                carrier_name: row.get(4)?,
                main_office_address: row.get(5)?,
                truck_number: row.get(6)?,
                home_terminal_address: row.get(7)?,
            },
            cycle_type: row.get(8)?,
            shipping: ShippingInfo {
                document_number: row.get(9)?,
                shipper: row.get(10)?,
                commodity: row.get(11)?,
            },
            status: row.get(12)?,
            total_mileage: row.get(13)?,
            remarks: row.get(14)?,
            created_at: row.get(15)?,
        })
    }

    fn into_trip(self) -> Result<Trip, DbError> {
        let id = self.id;
        let corrupt = |err: ValidationError| DbError::Corrupt {
            table: "trips",
            id,
            message: err.to_string(),
        };
        Ok(Trip {
            id: row_id(id, "trips")?,
            cycle_type: self.cycle_type.parse().map_err(corrupt)?,
            status: self.status.parse().map_err(corrupt)?,
            created_at: parse_timestamp(&self.created_at, "trips", id)?,
            driver_id: self.driver_id,
            from_location: self.from_location,
            to_location: self.to_location,
            carrier: self.carrier,
            shipping: self.shipping,
            total_mileage: self.total_mileage,
            remarks: self.remarks,
        })
    }
}

#[derive(Debug)]
struct LogDayRow {
    id: i64,
    trip_id: i64,
    log_date: String,
    hundredths: [i64; 9],
    miles_driving_today: f64,
    miles_today: f64,
    latest: (Option<f64>, Option<f64>),
    remarks: Option<String>,
    created_at: String,
}

impl LogDayRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let mut hundredths = [0; 9];
        for (offset, slot) in hundredths.iter_mut().enumerate() {
            *slot = row.get(3 + offset)?;
        }
        Ok(Self {
            id: row.get(0)?,
            trip_id: row.get(1)?,
            log_date: row.get(2)?,
            hundredths,
            miles_driving_today: row.get(12)?,
            miles_today: row.get(13)?,
            latest: (row.get(14)?, row.get(15)?),
            remarks: row.get(16)?,
            created_at: row.get(17)?,
        })
    }

    fn into_log_day(self) -> Result<LogDay, DbError> {
        let [
            off_duty,
            sleeper,
            driving,
            on_duty,
            last_6,
            last_7,
            last_8,
            last_7_60,
            available,
        ] = self.hundredths.map(Hours::from_hundredths);
        Ok(LogDay {
            id: row_id(self.id, "log_days")?,
            trip_id: row_id(self.trip_id, "log_days")?,
            date: parse_date(&self.log_date, "log_days", self.id)?,
            totals: DerivedTotals {
                off_duty_hours: off_duty,
                sleeper_hours: sleeper,
                driving_hours: driving,
                on_duty_hours: on_duty,
                on_duty_last_6_days: last_6,
                on_duty_last_7_days: last_7,
                on_duty_last_8_days: last_8,
                on_duty_last_7_days_60: last_7_60,
                available_hours_tomorrow: available,
                miles_driving_today: self.miles_driving_today,
                miles_today: self.miles_today,
                latest_gps: join_gps(self.latest, "log_days", self.id)?,
            },
            remarks: self.remarks,
            created_at: parse_timestamp(&self.created_at, "log_days", self.id)?,
        })
    }
}

#[derive(Debug)]
struct IntervalRow {
    id: i64,
    status: String,
    start_time: String,
    end_time: Option<String>,
    start_gps: (Option<f64>, Option<f64>),
    end_gps: (Option<f64>, Option<f64>),
    mileage: f64,
    remarks: Option<String>,
    automated: bool,
}

impl IntervalRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            status: row.get(1)?,
            start_time: row.get(2)?,
            end_time: row.get(3)?,
            start_gps: (row.get(4)?, row.get(5)?),
            end_gps: (row.get(6)?, row.get(7)?),
            mileage: row.get(8)?,
            remarks: row.get(9)?,
            automated: row.get(10)?,
        })
    }

    fn into_interval(self) -> Result<Interval, DbError> {
        let status: DutyStatus =
            self.status
                .parse()
                .map_err(|err: ValidationError| DbError::Corrupt {
                    table: "intervals",
                    id: self.id,
                    message: err.to_string(),
                })?;
        Ok(Interval {
            id: Some(row_id(self.id, "intervals")?),
            status,
            start: parse_timestamp(&self.start_time, "intervals", self.id)?,
            end: self
                .end_time
                .as_deref()
                .map(|end| parse_timestamp(end, "intervals", self.id))
                .transpose()?,
            start_gps: join_gps(self.start_gps, "intervals", self.id)?,
            end_gps: join_gps(self.end_gps, "intervals", self.id)?,
            mileage: self.mileage,
            remarks: self.remarks,
            automated: self.automated,
        })
    }
}

fn fetch_trip(conn: &Connection, id: TripId) -> Result<Trip, DbError> {
    conn.query_row(
        &format!("SELECT {TRIP_COLUMNS} FROM trips WHERE id = ?"),
        params![id.get()],
        TripRow::from_row,
    )
    .optional()?
    .ok_or_else(|| not_found("trip", id.get()))?
    .into_trip()
}

fn fetch_log_day(conn: &Connection, id: LogDayId) -> Result<LogDay, DbError> {
    conn.query_row(
        &format!("SELECT {LOG_DAY_COLUMNS} FROM log_days WHERE id = ?"),
        params![id.get()],
        LogDayRow::from_row,
    )
    .optional()?
    .ok_or_else(|| not_found("log day", id.get()))?
    .into_log_day()
}

fn log_day_revision(conn: &Connection, id: LogDayId) -> Result<i64, DbError> {
    conn.query_row(
        "SELECT revision FROM log_days WHERE id = ?",
        params![id.get()],
        |row| row.get(0),
    )
    .optional()?
    .ok_or_else(|| not_found("log day", id.get()))
}

fn latest_log_day(conn: &Connection, trip_id: TripId) -> Result<Option<LogDay>, DbError> {
    conn.query_row(
        &format!(
            "SELECT {LOG_DAY_COLUMNS} FROM log_days
             WHERE trip_id = ? ORDER BY log_date DESC LIMIT 1"
        ),
        params![trip_id.get()],
        LogDayRow::from_row,
    )
    .optional()?
    .map(LogDayRow::into_log_day)
    .transpose()
}

fn previous_log_day(
    conn: &Connection,
    trip_id: TripId,
    date: NaiveDate,
) -> Result<Option<LogDay>, DbError> {
    conn.query_row(
        &format!(
            "SELECT {LOG_DAY_COLUMNS} FROM log_days
             WHERE trip_id = ? AND log_date < ?
             ORDER BY log_date DESC LIMIT 1"
        ),
        params![trip_id.get(), format_date(date)],
        LogDayRow::from_row,
    )
    .optional()?
    .map(LogDayRow::into_log_day)
    .transpose()
}

fn log_day_intervals(conn: &Connection, log_day_id: LogDayId) -> Result<Vec<Interval>, DbError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {INTERVAL_COLUMNS} FROM intervals
         WHERE log_day_id = ? ORDER BY start_time ASC, id ASC"
    ))?;
    let rows = stmt.query_map(params![log_day_id.get()], IntervalRow::from_row)?;
    let mut intervals = Vec::new();
    for row in rows {
        intervals.push(row?.into_interval()?);
    }
    Ok(intervals)
}

fn trip_intervals(conn: &Connection, trip_id: TripId) -> Result<Vec<Interval>, DbError> {
    let columns = INTERVAL_COLUMNS
        .split(", ")
        .map(|column| format!("i.{}", column.trim()))
        .collect::<Vec<_>>()
        .join(", ");
    let mut stmt = conn.prepare(&format!(
        "
        SELECT {columns}
        FROM intervals i
        JOIN log_days d ON d.id = i.log_day_id
        WHERE d.trip_id = ?
        ORDER BY d.log_date ASC, i.start_time ASC, i.id ASC
        "
    ))?;
    let rows = stmt.query_map(params![trip_id.get()], IntervalRow::from_row)?;
    let mut intervals = Vec::new();
    for row in rows {
        intervals.push(row?.into_interval()?);
    }
    Ok(intervals)
}

fn fetch_snapshot(
    conn: &Connection,
    trip_id: TripId,
) -> Result<Option<ComplianceSnapshot>, DbError> {
    conn.query_row(
        "
        SELECT total_on_duty_last_period_hundredths, available_tomorrow_hundredths,
               reset_applied, consecutive_off_hundredths
        FROM compliance_snapshots
        WHERE trip_id = ?
        ",
        params![trip_id.get()],
        |row| {
            Ok(ComplianceSnapshot {
                trip_id,
                total_on_duty_last_period: Hours::from_hundredths(row.get(0)?),
                available_hours_tomorrow: Hours::from_hundredths(row.get(1)?),
                reset_applied: row.get(2)?,
                consecutive_hours_off: Hours::from_hundredths(row.get(3)?),
            })
        },
    )
    .optional()
    .map_err(DbError::from)
}

fn not_found(entity: &'static str, id: i64) -> DbError {
    LedgerError::NotFound { entity, id }.into()
}

fn row_id<T>(id: i64, table: &'static str) -> Result<T, DbError>
where
    T: TryFrom<i64, Error = ValidationError>,
{
    T::try_from(id).map_err(|err| DbError::Corrupt {
        table,
        id,
        message: err.to_string(),
    })
}

fn format_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

fn parse_date(value: &str, table: &'static str, id: i64) -> Result<NaiveDate, DbError> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d").map_err(|err| DbError::Corrupt {
        table,
        id,
        message: format!("invalid date {value}: {err}"),
    })
}

fn parse_timestamp(value: &str, table: &'static str, id: i64) -> Result<DateTime<Utc>, DbError> {
    DateTime::parse_from_rfc3339(value)
        .map(|parsed| parsed.with_timezone(&Utc))
        .map_err(|err| DbError::Corrupt {
            table,
            id,
            message: format!("invalid timestamp {value}: {err}"),
        })
}

const fn split_gps(gps: Option<GpsPoint>) -> (Option<f64>, Option<f64>) {
    match gps {
        Some(point) => (Some(point.latitude), Some(point.longitude)),
        None => (None, None),
    }
}

fn join_gps(
    (latitude, longitude): (Option<f64>, Option<f64>),
    table: &'static str,
    id: i64,
) -> Result<Option<GpsPoint>, DbError> {
    match (latitude, longitude) {
        (Some(latitude), Some(longitude)) => GpsPoint::new(latitude, longitude)
            .map(Some)
            .map_err(|err| DbError::Corrupt {
                table,
                id,
                message: err.to_string(),
            }),
        (None, None) => Ok(None),
        _ => Err(DbError::Corrupt {
            table,
            id,
            message: "half of a GPS position is missing".to_string(),
        }),
    }
}
