//! Status report command.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use hos_core::{DutyStatus, LogDay, LogDayId, StatusReport, TripId};

use super::util::{format_hours, parse_gps, parse_timestamp_arg};
use crate::{Ledger, ReportArgs};

/// Applies one status report from the command line.
pub async fn run(ledger: &Ledger, args: &ReportArgs, now: DateTime<Utc>) -> Result<LogDay> {
    let timestamp = parse_timestamp_arg(args.at.as_deref(), now)?;
    let gps = parse_gps(args.lat, args.lon)?;

    let log_day = match (args.log, args.trip) {
        (Some(log_id), _) => {
            let report = StatusReport {
                log_day_id: LogDayId::new(log_id)?,
                status: args.status,
                timestamp,
                gps,
            };
            ledger
                .apply_status_report(&report)
                .await
                .with_context(|| format!("failed to apply report to log day {log_id}"))?
        }
        (None, Some(trip_id)) => ledger
            .report_for_trip(TripId::new(trip_id)?, args.status, &timestamp, gps)
            .await
            .with_context(|| format!("failed to apply report to trip {trip_id}"))?,
        (None, None) => anyhow::bail!("either --log or --trip is required"),
    };

    print!("{}", format_report(args.status, &log_day));
    Ok(log_day)
}

/// Format the log day state after a report.
pub fn format_report(status: DutyStatus, log_day: &LogDay) -> String {
    let totals = &log_day.totals;
    format!(
        "{status} on log day {} ({}): driving {}h, on duty {}h, {:.2} mi, available tomorrow {}h\n",
        log_day.id,
        log_day.date,
        format_hours(totals.driving_hours).trim_start(),
        format_hours(totals.on_duty_hours).trim_start(),
        totals.miles_today,
        format_hours(totals.available_hours_tomorrow).trim_start(),
    )
}
