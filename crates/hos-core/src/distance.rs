//! Distance estimation seam.

use std::future::Future;

use crate::types::GpsPoint;

/// Estimates driven distance between two positions.
///
/// Implementations may be remote and slow. The ledger bounds every call with
/// a timeout and treats any error as zero miles, so an estimator never fails
/// a status transition.
pub trait DistanceEstimator: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Non-negative distance in miles from `from` to `to`.
    fn miles_between(
        &self,
        from: GpsPoint,
        to: GpsPoint,
    ) -> impl Future<Output = Result<f64, Self::Error>> + Send;
}
