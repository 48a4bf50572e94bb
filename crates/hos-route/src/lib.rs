//! Driving distance estimators.
//!
//! Provides [`DistanceEstimator`] implementations:
//! - [`OsrmClient`]: road distance from an OSRM routing server
//! - [`StraightLineEstimator`]: great-circle distance, for offline use
//!
//! Status transitions never fail because of an estimator. Callers go through
//! [`estimate_or_zero`], which bounds the wait and turns every failure into
//! zero miles.

use std::time::Duration;

use hos_core::{DistanceEstimator, GpsPoint};
use serde::Deserialize;
use thiserror::Error;

/// Default public OSRM server.
pub const DEFAULT_OSRM_URL: &str = "http://router.project-osrm.org";
/// Default bound on one estimate, including connect time.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

const METERS_PER_MILE: f64 = 1609.34;
const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

/// Estimator errors. None of these ever reach a status transition.
#[derive(Debug, Error)]
pub enum EstimatorError {
    /// Failed to build HTTP client.
    #[error("failed to build HTTP client: {0}")]
    ClientBuild(#[source] reqwest::Error),
    /// HTTP request failed.
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    /// Routing server returned an error status.
    #[error("routing server returned status {status}")]
    Api { status: u16 },
    /// Failed to parse response.
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    /// Routing server found no route between the points.
    #[error("no route between points")]
    NoRoute,
    /// No answer within the allowed time.
    #[error("estimate timed out after {0:?}")]
    Timeout(Duration),
}

/// OSRM routing client.
///
/// # Thread Safety
///
/// The client is safe to clone and share across threads. Each clone shares
/// the underlying HTTP connection pool.
#[derive(Debug, Clone)]
pub struct OsrmClient {
    http: reqwest::Client,
    base_url: String,
}

impl OsrmClient {
    /// Creates a client for the OSRM server at `base_url`.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, EstimatorError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(EstimatorError::ClientBuild)?;
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Ok(Self { http, base_url })
    }

    fn route_url(&self, from: GpsPoint, to: GpsPoint) -> String {
        format!(
            "{}/route/v1/driving/{},{};{},{}?overview=false",
            self.base_url, from.longitude, from.latitude, to.longitude, to.latitude
        )
    }
}

impl DistanceEstimator for OsrmClient {
    type Error = EstimatorError;

    async fn miles_between(&self, from: GpsPoint, to: GpsPoint) -> Result<f64, Self::Error> {
        let response = self.http.get(self.route_url(from, to)).send().await?;
        let status = response.status();
        let body = response.text().await?;
        // OSRM answers 400 with code "NoRoute" for unroutable pairs.
        if !status.is_success() && !body.contains("NoRoute") {
            return Err(EstimatorError::Api {
                status: status.as_u16(),
            });
        }
        parse_route_miles(&body)
    }
}

#[derive(Debug, Deserialize)]
struct RouteResponse {
    code: String,
    #[serde(default)]
    routes: Vec<Route>,
}

#[derive(Debug, Deserialize)]
struct Route {
    /// Meters.
    distance: f64,
}

fn parse_route_miles(body: &str) -> Result<f64, EstimatorError> {
    let payload: RouteResponse = serde_json::from_str(body)
        .map_err(|err| EstimatorError::InvalidResponse(err.to_string()))?;
    if payload.code == "NoRoute" {
        return Err(EstimatorError::NoRoute);
    }
    if payload.code != "Ok" {
        return Err(EstimatorError::InvalidResponse(format!(
            "unexpected code {}",
            payload.code
        )));
    }
    let route = payload.routes.first().ok_or(EstimatorError::NoRoute)?;
    Ok(route.distance / METERS_PER_MILE)
}

/// Great-circle distance. Always available, shorter than any road.
#[derive(Debug, Clone, Copy, Default)]
pub struct StraightLineEstimator;

impl DistanceEstimator for StraightLineEstimator {
    type Error = std::convert::Infallible;

    async fn miles_between(&self, from: GpsPoint, to: GpsPoint) -> Result<f64, Self::Error> {
        Ok(haversine_meters(from, to) / METERS_PER_MILE)
    }
}

fn haversine_meters(from: GpsPoint, to: GpsPoint) -> f64 {
    let dlat = (to.latitude - from.latitude).to_radians();
    let dlon = (to.longitude - from.longitude).to_radians();
    let a = (dlat / 2.0).sin().powi(2)
        + from.latitude.to_radians().cos()
            * to.latitude.to_radians().cos()
            * (dlon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
    EARTH_RADIUS_METERS * c
}

/// Estimates miles from `from` to `to`, or `0.0` on any failure.
///
/// Errors, timeouts and negative or non-finite answers are logged and
/// count as zero distance.
pub async fn estimate_or_zero<E: DistanceEstimator>(
    estimator: &E,
    from: GpsPoint,
    to: GpsPoint,
    timeout: Duration,
) -> f64 {
    match tokio::time::timeout(timeout, estimator.miles_between(from, to)).await {
        Ok(Ok(miles)) if miles.is_finite() && miles >= 0.0 => {
            tracing::debug!(%from, %to, miles, "estimated distance");
            miles
        }
        Ok(Ok(miles)) => {
            tracing::warn!(%from, %to, miles, "estimator returned an invalid distance; using 0");
            0.0
        }
        Ok(Err(err)) => {
            tracing::warn!(%from, %to, error = %err, "distance estimate failed; using 0");
            0.0
        }
        Err(_) => {
            let err = EstimatorError::Timeout(timeout);
            tracing::warn!(%from, %to, error = %err, "distance estimate failed; using 0");
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gps(lat: f64, lon: f64) -> GpsPoint {
        GpsPoint::new(lat, lon).unwrap()
    }

    struct Fixed(f64);

    impl DistanceEstimator for Fixed {
        type Error = EstimatorError;

        async fn miles_between(&self, _: GpsPoint, _: GpsPoint) -> Result<f64, Self::Error> {
            Ok(self.0)
        }
    }

    struct Failing;

    impl DistanceEstimator for Failing {
        type Error = EstimatorError;

        async fn miles_between(&self, _: GpsPoint, _: GpsPoint) -> Result<f64, Self::Error> {
            Err(EstimatorError::NoRoute)
        }
    }

    struct Hanging;

    impl DistanceEstimator for Hanging {
        type Error = EstimatorError;

        async fn miles_between(&self, _: GpsPoint, _: GpsPoint) -> Result<f64, Self::Error> {
            std::future::pending().await
        }
    }

    #[test]
    fn route_url_puts_longitude_first() {
        let client = OsrmClient::new("http://osrm.local/", DEFAULT_TIMEOUT).unwrap();
        let url = client.route_url(gps(41.5, -87.25), gps(40.0, -88.5));
        assert_eq!(
            url,
            "http://osrm.local/route/v1/driving/-87.25,41.5;-88.5,40?overview=false"
        );
    }

    #[test]
    fn parse_route_converts_meters_to_miles() {
        let body =
            r#"{"code":"Ok","routes":[{"distance":20116.75,"duration":900.0}],"waypoints":[]}"#;
        let miles = parse_route_miles(body).unwrap();
        assert!((miles - 12.5).abs() < 1e-3);
    }

    #[test]
    fn parse_route_reports_missing_route() {
        assert!(matches!(
            parse_route_miles(r#"{"code":"NoRoute","message":"Impossible route"}"#),
            Err(EstimatorError::NoRoute)
        ));
        assert!(matches!(
            parse_route_miles(r#"{"code":"Ok","routes":[]}"#),
            Err(EstimatorError::NoRoute)
        ));
        assert!(matches!(
            parse_route_miles("not json"),
            Err(EstimatorError::InvalidResponse(_))
        ));
    }

    #[test]
    fn haversine_one_degree_at_equator() {
        let meters = haversine_meters(gps(0.0, 0.0), gps(0.0, 1.0));
        assert!((meters - 111_195.0).abs() < 200.0);
    }

    #[tokio::test]
    async fn straight_line_is_symmetric() {
        let a = gps(41.88, -87.63);
        let b = gps(39.74, -104.99);
        let there = StraightLineEstimator.miles_between(a, b).await.unwrap();
        let back = StraightLineEstimator.miles_between(b, a).await.unwrap();
        assert!((there - back).abs() < 1e-9);
        // Chicago to Denver is roughly 920 miles as the crow flies.
        assert!((900.0..950.0).contains(&there));
    }

    #[tokio::test]
    async fn estimate_passes_through_valid_distance() {
        let miles =
            estimate_or_zero(&Fixed(12.5), gps(0.0, 0.0), gps(0.0, 0.1), DEFAULT_TIMEOUT).await;
        assert!((miles - 12.5).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn estimate_degrades_to_zero() {
        let a = gps(0.0, 0.0);
        let b = gps(0.0, 0.1);
        assert!(estimate_or_zero(&Failing, a, b, DEFAULT_TIMEOUT).await.abs() < f64::EPSILON);
        assert!(estimate_or_zero(&Fixed(-3.0), a, b, DEFAULT_TIMEOUT).await.abs() < f64::EPSILON);
        assert!(
            estimate_or_zero(&Fixed(f64::NAN), a, b, DEFAULT_TIMEOUT)
                .await
                .abs()
                < f64::EPSILON
        );
    }

    #[tokio::test]
    async fn hanging_estimator_times_out_to_zero() {
        let miles = estimate_or_zero(
            &Hanging,
            gps(0.0, 0.0),
            gps(0.0, 0.1),
            Duration::from_millis(20),
        )
        .await;
        assert!(miles.abs() < f64::EPSILON);
    }
}
