//! Trip commands: start, end, show, list and delete.

use std::fmt::Write;

use anyhow::{Context, Result};
use hos_core::{ComplianceSnapshot, LogDay, Trip, TripId};
use hos_db::{NewTrip, TripEnd};
use serde::Serialize;

use super::util::format_hours;
use crate::{Ledger, TripStartArgs};

/// A trip with everything recorded for it.
#[derive(Debug, Clone, Serialize)]
pub struct TripView {
    pub trip: Trip,
    pub log_days: Vec<LogDay>,
    pub snapshot: Option<ComplianceSnapshot>,
}

impl From<&TripStartArgs> for NewTrip {
    fn from(args: &TripStartArgs) -> Self {
        Self {
            driver_id: args.driver.clone(),
            from_location: args.from.clone(),
            to_location: args.to.clone(),
            carrier: hos_core::CarrierInfo {
                carrier_name: args.carrier.clone(),
                main_office_address: args.main_office.clone(),
                truck_number: args.truck.clone(),
                home_terminal_address: args.home_terminal.clone(),
            },
            shipping: hos_core::ShippingInfo {
                document_number: args.document.clone(),
                shipper: args.shipper.clone(),
                commodity: args.commodity.clone(),
            },
            cycle_type: args.cycle,
            remarks: args.remarks.clone(),
        }
    }
}

pub fn start(ledger: &Ledger, args: &TripStartArgs) -> Result<Trip> {
    let new_trip = NewTrip::from(args);
    let trip = ledger
        .with_db(|db| db.create_trip(&new_trip))
        .context("failed to create trip")?;
    println!(
        "Started trip {} ({} → {}, cycle {}).",
        trip.id, trip.from_location, trip.to_location, trip.cycle_type
    );
    Ok(trip)
}

pub fn end(ledger: &Ledger, trip_id: i64) -> Result<()> {
    let trip_id = TripId::new(trip_id)?;
    let outcome = ledger.end_trip(trip_id)?;
    print!("{}", format_trip_end(trip_id, &outcome));
    Ok(())
}

pub fn show(ledger: &Ledger, trip_id: i64, json: bool) -> Result<()> {
    let view = load_view(ledger, TripId::new(trip_id)?)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&view)?);
    } else {
        print!("{}", format_trip_detail(&view));
    }
    Ok(())
}

pub fn list(ledger: &Ledger, json: bool) -> Result<()> {
    let trips = ledger
        .with_db(|db| db.list_trips())
        .context("failed to list trips")?;
    if json {
        println!("{}", serde_json::to_string_pretty(&trips)?);
    } else {
        print!("{}", format_trip_list(&trips));
    }
    Ok(())
}

pub fn delete(ledger: &Ledger, trip_id: i64) -> Result<()> {
    let trip_id = TripId::new(trip_id)?;
    ledger.with_db(|db| db.delete_trip(trip_id))?;
    println!("Deleted trip {trip_id}.");
    Ok(())
}

fn load_view(ledger: &Ledger, trip_id: TripId) -> Result<TripView> {
    ledger
        .with_db(|db| {
            Ok(TripView {
                trip: db.get_trip(trip_id)?,
                log_days: db.list_log_days(trip_id)?,
                snapshot: db.compliance_snapshot(trip_id)?,
            })
        })
        .with_context(|| format!("failed to load trip {trip_id}"))
}

// ========== Human-Readable Output ==========

/// Format the outcome of ending a trip.
pub fn format_trip_end(trip_id: TripId, outcome: &TripEnd) -> String {
    let mut output = String::new();
    match outcome {
        TripEnd::Completed(snapshot) => {
            writeln!(output, "Trip {trip_id} completed.").unwrap();
            writeln!(output).unwrap();
            output.push_str(&format_recap(snapshot));
        }
        TripEnd::AlreadyCompleted(snapshot) => {
            writeln!(output, "Trip {trip_id} was already completed.").unwrap();
            if let Some(snapshot) = snapshot {
                writeln!(output).unwrap();
                output.push_str(&format_recap(snapshot));
            }
        }
    }
    output
}

/// Format a compliance recap.
pub fn format_recap(snapshot: &ComplianceSnapshot) -> String {
    let mut output = String::new();
    let rows = [
        ("On duty last period", format_hours(snapshot.total_on_duty_last_period)),
        ("Available tomorrow", format_hours(snapshot.available_hours_tomorrow)),
        ("Consecutive off", format_hours(snapshot.consecutive_hours_off)),
    ];
    for (label, value) in rows {
        writeln!(output, "{label:<20}{value}").unwrap();
    }
    let restart = if snapshot.reset_applied { "yes" } else { "no" };
    writeln!(output, "{:<20}{restart:>6}", "34-hour restart").unwrap();
    output
}

/// Format the trip list.
pub fn format_trip_list(trips: &[Trip]) -> String {
    let mut output = String::new();

    if trips.is_empty() {
        writeln!(output, "No trips recorded.").unwrap();
        writeln!(output).unwrap();
        writeln!(output, "Hint: Run 'hos trip start' to begin one.").unwrap();
        return output;
    }

    writeln!(
        output,
        "{:<5}{:<11}{:<7}{:>8}  {:<10}  Route",
        "ID", "Status", "Cycle", "Miles", "Driver"
    )
    .unwrap();
    writeln!(
        output,
        "───  ─────────  ─────  ────────  ──────────  ─────────────────────"
    )
    .unwrap();
    for trip in trips {
        writeln!(
            output,
            "{:<5}{:<11}{:<7}{:>8.2}  {:<10}  {} → {}",
            trip.id.to_string(),
            trip.status.as_str(),
            trip.cycle_type.as_str(),
            trip.total_mileage,
            trip.driver_id,
            trip.from_location,
            trip.to_location
        )
        .unwrap();
    }
    output
}

/// Format a trip with its log days and recap.
pub fn format_trip_detail(view: &TripView) -> String {
    let mut output = String::new();
    let trip = &view.trip;

    writeln!(
        output,
        "TRIP {}  {} → {}  [{}]",
        trip.id, trip.from_location, trip.to_location, trip.status
    )
    .unwrap();
    writeln!(output).unwrap();

    let or_dash = |value: &Option<String>| value.clone().unwrap_or_else(|| "-".to_string());
    let fields = [
        ("Driver", trip.driver_id.clone()),
        (
            "Carrier",
            format!(
                "{} (truck {})",
                trip.carrier.carrier_name, trip.carrier.truck_number
            ),
        ),
        ("Main office", trip.carrier.main_office_address.clone()),
        ("Home terminal", trip.carrier.home_terminal_address.clone()),
        ("Cycle", trip.cycle_type.to_string()),
        ("Document", or_dash(&trip.shipping.document_number)),
        ("Shipper", or_dash(&trip.shipping.shipper)),
        ("Commodity", or_dash(&trip.shipping.commodity)),
        ("Total miles", format!("{:.2}", trip.total_mileage)),
        ("Remarks", or_dash(&trip.remarks)),
    ];
    for (label, value) in fields {
        writeln!(output, "{label:<15}{value}").unwrap();
    }

    writeln!(output).unwrap();
    writeln!(output, "LOG DAYS").unwrap();
    if view.log_days.is_empty() {
        writeln!(output, "No log days yet.").unwrap();
    } else {
        writeln!(
            output,
            "{:<12}{:<6}{:>8}{:>9}{:>11}{:>9}",
            "Date", "ID", "On duty", "Driving", "Available", "Miles"
        )
        .unwrap();
        for day in &view.log_days {
            writeln!(
                output,
                "{:<12}{:<6}{:>8}{:>9}{:>11}{:>9.2}",
                day.date.to_string(),
                day.id.to_string(),
                day.totals.on_duty_hours.to_string(),
                day.totals.driving_hours.to_string(),
                day.totals.available_hours_tomorrow.to_string(),
                day.totals.miles_today
            )
            .unwrap();
        }
    }

    if let Some(snapshot) = &view.snapshot {
        writeln!(output).unwrap();
        writeln!(output, "RECAP").unwrap();
        output.push_str(&format_recap(snapshot));
    }
    output
}
