//! Recompute derived totals from stored intervals.
//!
//! Totals are normally kept current on every write; this rebuilds them, for
//! example after intervals were edited outside the ledger.

use anyhow::{Context, Result};
use hos_core::TripId;

use crate::Ledger;

/// Recompute one trip, or every trip when `trip_id` is `None`.
pub fn run(ledger: &Ledger, trip_id: Option<i64>) -> Result<usize> {
    let count = match trip_id {
        Some(id) => {
            let trip_id = TripId::new(id)?;
            ledger
                .with_db(|db| db.recompute_trip(trip_id))
                .with_context(|| format!("failed to recompute trip {trip_id}"))?
        }
        None => ledger
            .with_db(|db| db.recompute_all())
            .context("failed to recompute trips")?,
    };
    println!("Recomputed {count} log day(s).");
    Ok(count)
}
