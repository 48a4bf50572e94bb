//! Log day commands.

use std::fmt::Write;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use hos_core::{DutyStatus, Interval, IntervalId, LogDay, LogDayId, TripId};
use serde::Serialize;

use super::util::{format_hours, format_instant, parse_date, parse_gps, parse_timestamp_arg};
use crate::{Correction, Ledger};

/// A log day with its intervals.
#[derive(Debug, Clone, Serialize)]
pub struct LogDayView {
    pub log_day: LogDay,
    pub intervals: Vec<Interval>,
}

pub fn open(ledger: &Ledger, trip_id: i64, date: &str) -> Result<LogDay> {
    let trip_id = TripId::new(trip_id)?;
    let date = parse_date(date)?;
    let log_day = ledger
        .with_db(|db| db.open_log_day(trip_id, date))
        .with_context(|| format!("failed to open log day {date} for trip {trip_id}"))?;
    println!(
        "Log day {} for trip {} on {}.",
        log_day.id, log_day.trip_id, log_day.date
    );
    Ok(log_day)
}

/// Options for `hos log end`.
#[derive(Debug, Clone, Default)]
pub struct EndOptions<'a> {
    pub remarks: Option<&'a str>,
    pub at: Option<&'a str>,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
}

pub async fn end(
    ledger: &Ledger,
    log_id: i64,
    options: EndOptions<'_>,
    now: DateTime<Utc>,
) -> Result<LogDay> {
    let log_day_id = LogDayId::new(log_id)?;
    let gps = parse_gps(options.lat, options.lon)?;
    let close = options
        .at
        .map(|at| parse_timestamp_arg(Some(at), now))
        .transpose()?;
    if close.is_none() && gps.is_some() {
        anyhow::bail!("--lat/--lon need --at");
    }
    let log_day = ledger
        .end_log(
            log_day_id,
            options.remarks,
            close.as_ref().map(|timestamp| (timestamp, gps)),
        )
        .await
        .with_context(|| format!("failed to end log day {log_day_id}"))?;
    println!("Ended log day {log_day_id}.");
    Ok(log_day)
}

pub fn show(ledger: &Ledger, log_id: i64, json: bool) -> Result<()> {
    let log_day_id = LogDayId::new(log_id)?;
    let view = ledger
        .with_db(|db| {
            Ok(LogDayView {
                log_day: db.get_log_day(log_day_id)?,
                intervals: db.list_intervals(log_day_id)?,
            })
        })
        .with_context(|| format!("failed to load log day {log_day_id}"))?;
    if json {
        println!("{}", serde_json::to_string_pretty(&view)?);
    } else {
        print!("{}", format_log_day(&view));
    }
    Ok(())
}

pub async fn correct(
    ledger: &Ledger,
    log_id: i64,
    status: DutyStatus,
    start: &str,
    end: &str,
    remarks: Option<String>,
    now: DateTime<Utc>,
) -> Result<LogDay> {
    let log_day_id = LogDayId::new(log_id)?;
    let correction = Correction {
        status,
        start: parse_timestamp_arg(Some(start), now)?,
        end: parse_timestamp_arg(Some(end), now)?,
        remarks,
    };
    let log_day = ledger
        .correct(log_day_id, &correction)
        .await
        .with_context(|| format!("failed to correct log day {log_day_id}"))?;
    println!("Recorded {status} interval on log day {log_day_id}.");
    Ok(log_day)
}

pub async fn remove_interval(ledger: &Ledger, interval_id: i64) -> Result<LogDay> {
    let interval_id = IntervalId::new(interval_id)?;
    let log_day = ledger
        .remove_interval(interval_id)
        .await
        .with_context(|| format!("failed to remove interval {interval_id}"))?;
    println!("Removed interval {interval_id} from log day {}.", log_day.id);
    Ok(log_day)
}

// ========== Human-Readable Output ==========

/// Format a log day's totals and intervals.
pub fn format_log_day(view: &LogDayView) -> String {
    let mut output = String::new();
    let day = &view.log_day;
    let totals = &day.totals;

    writeln!(
        output,
        "LOG DAY {}  trip {}  {}",
        day.id, day.trip_id, day.date
    )
    .unwrap();
    writeln!(output).unwrap();

    let hours = [
        ("Off duty", totals.off_duty_hours),
        ("Sleeper", totals.sleeper_hours),
        ("Driving", totals.driving_hours),
        ("On duty", totals.on_duty_hours),
        ("Last 6 days", totals.on_duty_last_6_days),
        ("Last 7 days", totals.on_duty_last_7_days),
        ("Last 8 days", totals.on_duty_last_8_days),
        ("Last 7 (60h)", totals.on_duty_last_7_days_60),
        ("Available", totals.available_hours_tomorrow),
    ];
    for (label, value) in hours {
        writeln!(output, "{label:<14}{}", format_hours(value)).unwrap();
    }
    writeln!(
        output,
        "{:<14}{:>6.2} (driving {:.2})",
        "Miles", totals.miles_today, totals.miles_driving_today
    )
    .unwrap();
    let gps = totals
        .latest_gps
        .map_or_else(|| "-".to_string(), |gps| gps.to_string());
    writeln!(output, "{:<14}{gps}", "Latest GPS").unwrap();
    writeln!(
        output,
        "{:<14}{}",
        "Remarks",
        day.remarks.as_deref().unwrap_or("-")
    )
    .unwrap();

    writeln!(output).unwrap();
    if view.intervals.is_empty() {
        writeln!(output, "No intervals recorded.").unwrap();
        return output;
    }
    writeln!(
        output,
        "{:<6}{:<10}{:<18}{:<18}{:>7}  Source",
        "ID", "Status", "Start", "End", "Miles"
    )
    .unwrap();
    for interval in &view.intervals {
        let id = interval.id.map_or_else(|| "-".to_string(), |id| id.to_string());
        let end = interval.end.map_or_else(|| "open".to_string(), format_instant);
        let source = if interval.automated { "auto" } else { "manual" };
        let mut line = format!(
            "{id:<6}{:<10}{:<18}{end:<18}{:>7.2}  {source}",
            interval.status.as_str(),
            format_instant(interval.start),
            interval.mileage
        );
        if let Some(remarks) = &interval.remarks {
            write!(line, " ({remarks})").unwrap();
        }
        writeln!(output, "{line}").unwrap();
    }
    output
}
