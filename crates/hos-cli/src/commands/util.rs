//! Shared utilities for CLI commands.

use std::sync::LazyLock;

use anyhow::Context;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use hos_core::{GpsPoint, Hours, RawTimestamp};
use regex::Regex;

/// Pre-compiled regex for relative time parsing.
static RELATIVE_TIME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d+)\s+(minute|hour|day|week)s?\s+ago$").unwrap());

/// Conservative bounds for relative time parsing (~1000 years in minutes).
const MAX_RELATIVE_MINUTES: i64 = 1000 * 365 * 24 * 60;

/// Turns a `--at` argument into a report timestamp.
///
/// Supports:
/// - Epoch milliseconds: "1743817698000"
/// - ISO 8601: "2025-04-05T01:48:18Z", passed through for the ledger to validate
/// - Relative: "2 hours ago", "30 minutes ago", "1 day ago", "1 week ago"
///
/// `None` means now.
pub fn parse_timestamp_arg(s: Option<&str>, now: DateTime<Utc>) -> anyhow::Result<RawTimestamp> {
    let Some(s) = s.map(str::trim) else {
        return Ok(now.into());
    };
    if let Ok(ms) = s.parse::<i64>() {
        return Ok(RawTimestamp::EpochMillis(ms));
    }
    if let Some(caps) = RELATIVE_TIME_RE.captures(s) {
        let n: i64 = caps[1]
            .parse()
            .context("failed to parse number in relative time")?;

        let (max_for_unit, minutes_per_unit) = match &caps[2] {
            "minute" => (MAX_RELATIVE_MINUTES, 1),
            "hour" => (MAX_RELATIVE_MINUTES / 60, 60),
            "day" => (MAX_RELATIVE_MINUTES / (60 * 24), 60 * 24),
            "week" => (MAX_RELATIVE_MINUTES / (60 * 24 * 7), 60 * 24 * 7),
            unit => anyhow::bail!("Unknown time unit: {unit}"),
        };
        if n > max_for_unit {
            anyhow::bail!("Relative time value too large: {n} {}", &caps[2]);
        }
        return Ok((now - Duration::minutes(n * minutes_per_unit)).into());
    }
    Ok(RawTimestamp::Iso(s.to_string()))
}

/// Parses a `YYYY-MM-DD` calendar date.
pub fn parse_date(s: &str) -> anyhow::Result<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
        .with_context(|| format!("Invalid date: {s}. Use YYYY-MM-DD"))
}

/// Builds a GPS point from `--lat`/`--lon`, which must be given together.
pub fn parse_gps(lat: Option<f64>, lon: Option<f64>) -> anyhow::Result<Option<GpsPoint>> {
    match (lat, lon) {
        (Some(lat), Some(lon)) => Ok(Some(GpsPoint::new(lat, lon)?)),
        (None, None) => Ok(None),
        _ => anyhow::bail!("--lat and --lon must be given together"),
    }
}

/// Formats hours with two decimals, as they are stored.
pub fn format_hours(hours: Hours) -> String {
    format!("{:>6}", hours.to_string())
}

/// Formats an instant for tables: `2025-04-05 06:00`.
pub fn format_instant(instant: DateTime<Utc>) -> String {
    instant.format("%Y-%m-%d %H:%M").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 4, 5, 12, 0, 0).unwrap()
    }

    #[test]
    fn timestamp_defaults_to_now() {
        let ts = parse_timestamp_arg(None, now()).unwrap();
        assert_eq!(ts.parse().unwrap(), now());
    }

    #[test]
    fn timestamp_accepts_epoch_millis() {
        let ts = parse_timestamp_arg(Some("1743817698000"), now()).unwrap();
        assert_eq!(ts, RawTimestamp::EpochMillis(1_743_817_698_000));
    }

    #[test]
    fn timestamp_accepts_relative() {
        let ts = parse_timestamp_arg(Some("90 minutes ago"), now()).unwrap();
        assert_eq!(
            ts.parse().unwrap(),
            Utc.with_ymd_and_hms(2025, 4, 5, 10, 30, 0).unwrap()
        );
        let ts = parse_timestamp_arg(Some("1 day ago"), now()).unwrap();
        assert_eq!(
            ts.parse().unwrap(),
            Utc.with_ymd_and_hms(2025, 4, 4, 12, 0, 0).unwrap()
        );
    }

    #[test]
    fn timestamp_rejects_huge_relative() {
        assert!(parse_timestamp_arg(Some("99999999 weeks ago"), now()).is_err());
    }

    #[test]
    fn timestamp_passes_iso_through() {
        let ts = parse_timestamp_arg(Some("2025-04-05T01:48:18Z"), now()).unwrap();
        assert_eq!(ts, RawTimestamp::Iso("2025-04-05T01:48:18Z".to_string()));
    }

    #[test]
    fn gps_needs_both_coordinates() {
        assert!(parse_gps(Some(41.0), None).is_err());
        assert!(parse_gps(Some(91.0), Some(0.0)).is_err());
        assert_eq!(parse_gps(None, None).unwrap(), None);
        assert!(parse_gps(Some(41.0), Some(-87.0)).unwrap().is_some());
    }

    #[test]
    fn date_parsing() {
        assert_eq!(
            parse_date("2025-04-05").unwrap(),
            NaiveDate::from_ymd_opt(2025, 4, 5).unwrap()
        );
        assert!(parse_date("04/05/2025").is_err());
    }
}
