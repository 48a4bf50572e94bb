//! Estimator selected by configuration.

use hos_core::{DistanceEstimator, GpsPoint};
use hos_route::{EstimatorError, OsrmClient, StraightLineEstimator};

use crate::config::{Config, EstimatorKind};

/// The configured distance estimator.
#[derive(Debug, Clone)]
pub enum Estimator {
    Osrm(OsrmClient),
    StraightLine(StraightLineEstimator),
    Disabled,
}

impl Estimator {
    pub fn from_config(config: &Config) -> Result<Self, EstimatorError> {
        Ok(match config.estimator {
            EstimatorKind::Osrm => Self::Osrm(OsrmClient::new(
                config.osrm_url.clone(),
                config.estimator_timeout(),
            )?),
            EstimatorKind::StraightLine => Self::StraightLine(StraightLineEstimator),
            EstimatorKind::None => Self::Disabled,
        })
    }
}

impl DistanceEstimator for Estimator {
    type Error = EstimatorError;

    async fn miles_between(&self, from: GpsPoint, to: GpsPoint) -> Result<f64, Self::Error> {
        match self {
            Self::Osrm(client) => client.miles_between(from, to).await,
            Self::StraightLine(estimator) => match estimator.miles_between(from, to).await {
                Ok(miles) => Ok(miles),
                Err(never) => match never {},
            },
            Self::Disabled => Ok(0.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_selects_estimator() {
        let mut config = Config::default();
        assert!(matches!(Estimator::from_config(&config), Ok(Estimator::Osrm(_))));
        config.estimator = EstimatorKind::StraightLine;
        assert!(matches!(
            Estimator::from_config(&config),
            Ok(Estimator::StraightLine(_))
        ));
        config.estimator = EstimatorKind::None;
        assert!(matches!(Estimator::from_config(&config), Ok(Estimator::Disabled)));
    }

    #[tokio::test]
    async fn disabled_estimator_reports_zero() {
        let a = GpsPoint::new(41.0, -87.0).unwrap();
        let b = GpsPoint::new(42.0, -88.0).unwrap();
        let miles = Estimator::Disabled.miles_between(a, b).await.unwrap();
        assert!(miles.abs() < f64::EPSILON);
    }
}
