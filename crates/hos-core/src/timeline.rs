//! The ordered set of duty-status intervals for one log day.
//!
//! Invariants held by every [`IntervalTimeline`]:
//! - intervals are sorted by start time;
//! - closed intervals satisfy `start <= end`;
//! - consecutive intervals never overlap (zero-length intervals may touch);
//! - at most one interval is open, and it is the last one.
//!
//! Every successful mutation marks the timeline dirty so the caller knows the
//! owning log day's totals must be recomputed.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};

use crate::error::LedgerError;
use crate::model::Interval;
use crate::types::{DutyStatus, GpsPoint, IntervalId};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct IntervalTimeline {
    intervals: Vec<Interval>,
    dirty: bool,
}

impl IntervalTimeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a timeline from stored intervals, rejecting sets that violate
    /// the ordering invariants.
    pub fn from_intervals(mut intervals: Vec<Interval>) -> Result<Self, LedgerError> {
        intervals.sort_by(chronological);
        let timeline = Self {
            intervals,
            dirty: false,
        };
        timeline.validate()?;
        Ok(timeline)
    }

    fn validate(&self) -> Result<(), LedgerError> {
        let open_count = self.intervals.iter().filter(|i| i.is_open()).count();
        if open_count > 1 {
            return Err(LedgerError::invalid_state(format!(
                "{open_count} intervals are open"
            )));
        }
        for interval in &self.intervals {
            if let Some(end) = interval.end {
                if end < interval.start {
                    return Err(LedgerError::invalid_state(format!(
                        "interval ends before it starts ({} < {})",
                        end, interval.start
                    )));
                }
            }
        }
        for pair in self.intervals.windows(2) {
            let (earlier, later) = (&pair[0], &pair[1]);
            match earlier.end {
                None => {
                    return Err(LedgerError::invalid_state(
                        "open interval is followed by another interval",
                    ));
                }
                Some(end) if end > later.start => {
                    return Err(LedgerError::invalid_state(format!(
                        "intervals overlap at {}",
                        later.start
                    )));
                }
                Some(_) => {}
            }
        }
        Ok(())
    }

    pub fn intervals(&self) -> &[Interval] {
        &self.intervals
    }

    /// Whether any mutation happened since the timeline was built.
    pub const fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn open_interval(&self) -> Option<&Interval> {
        self.intervals.last().filter(|i| i.is_open())
    }

    fn open_interval_mut(&mut self) -> Result<&mut Interval, LedgerError> {
        self.intervals
            .last_mut()
            .filter(|i| i.is_open())
            .ok_or_else(|| LedgerError::invalid_state("no interval is open"))
    }

    /// Latest end time among closed intervals.
    pub fn latest_end(&self) -> Option<DateTime<Utc>> {
        self.intervals.iter().filter_map(|i| i.end).max()
    }

    /// Opens a new interval. Fails with `InvalidState` if one is already open,
    /// or `InvalidTimestamp` if `start` precedes the end of an existing interval.
    pub fn open(
        &mut self,
        status: DutyStatus,
        start: DateTime<Utc>,
        gps: Option<GpsPoint>,
    ) -> Result<&Interval, LedgerError> {
        if let Some(open) = self.open_interval() {
            return Err(LedgerError::invalid_state(format!(
                "a {} interval is already open since {}",
                open.status, open.start
            )));
        }
        if let Some(latest) = self.latest_end() {
            if start < latest {
                return Err(LedgerError::invalid_timestamp(start));
            }
        }
        self.intervals.push(Interval::opened(status, start, gps));
        self.dirty = true;
        Ok(&self.intervals[self.intervals.len() - 1])
    }

    /// Closes the open interval at `end`. A missing `gps` keeps whatever end
    /// position the interval already had.
    pub fn close(
        &mut self,
        end: DateTime<Utc>,
        gps: Option<GpsPoint>,
    ) -> Result<&Interval, LedgerError> {
        let open = self.open_interval_mut()?;
        if end < open.start {
            return Err(LedgerError::invalid_timestamp(end));
        }
        open.end = Some(end);
        if gps.is_some() {
            open.end_gps = gps;
        }
        self.dirty = true;
        Ok(&self.intervals[self.intervals.len() - 1])
    }

    /// Adds `delta` miles to the open interval and returns its new mileage.
    pub fn append_mileage(&mut self, delta: f64) -> Result<f64, LedgerError> {
        if delta.is_nan() || delta < 0.0 {
            return Err(LedgerError::InvalidInput(format!(
                "mileage delta must be non-negative, got {delta}"
            )));
        }
        let open = self.open_interval_mut()?;
        open.mileage += delta;
        let mileage = open.mileage;
        self.dirty = true;
        Ok(mileage)
    }

    /// Records the driver's latest position on the open interval.
    pub fn update_position(&mut self, gps: GpsPoint) -> Result<(), LedgerError> {
        let open = self.open_interval_mut()?;
        open.end_gps = Some(gps);
        self.dirty = true;
        Ok(())
    }

    /// Inserts a closed interval (a manual correction) at its chronological
    /// position. It must not overlap any existing interval, open or closed.
    pub fn insert_closed(&mut self, interval: Interval) -> Result<(), LedgerError> {
        let Some(end) = interval.end else {
            return Err(LedgerError::InvalidInput(
                "only closed intervals can be inserted".to_string(),
            ));
        };
        if end < interval.start {
            return Err(LedgerError::invalid_timestamp(end));
        }
        let overlapping = self.intervals.iter().find(|existing| {
            let existing_ends_after_start = existing.end.is_none_or(|e| interval.start < e);
            existing_ends_after_start && existing.start < end
        });
        if let Some(existing) = overlapping {
            return Err(LedgerError::invalid_state(format!(
                "interval {}..{} overlaps a {} interval starting {}",
                interval.start, end, existing.status, existing.start
            )));
        }
        let position = self
            .intervals
            .partition_point(|existing| chronological(existing, &interval) != Ordering::Greater);
        self.intervals.insert(position, interval);
        self.dirty = true;
        Ok(())
    }

    /// Removes a persisted interval by ID.
    pub fn remove(&mut self, id: IntervalId) -> Result<Interval, LedgerError> {
        let position = self
            .intervals
            .iter()
            .position(|i| i.id == Some(id))
            .ok_or(LedgerError::NotFound {
                entity: "interval",
                id: id.get(),
            })?;
        self.dirty = true;
        Ok(self.intervals.remove(position))
    }
}

/// Orders by start, then closed before open, then by end, then by ID.
fn chronological(a: &Interval, b: &Interval) -> Ordering {
    a.start
        .cmp(&b.start)
        .then_with(|| a.is_open().cmp(&b.is_open()))
        .then_with(|| a.end.cmp(&b.end))
        .then_with(|| a.id.cmp(&b.id))
}
