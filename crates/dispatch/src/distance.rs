//! Travel distance and time between a responder and a case.
//!
//! A routing provider is consulted when configured; any failure or timeout
//! falls back to the spherical distance with a fixed minutes-per-kilometer
//! rate. Estimates are informational and never fail a request.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};
use vetline_core::{haversine_km, Error, GeoPoint, Result};

/// Where an estimate came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EstimateSource {
    Provider,
    Haversine,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TravelEstimate {
    pub distance_km: f64,
    pub duration_minutes: u32,
    pub source: EstimateSource,
}

/// Road distance lookups
#[async_trait]
pub trait DistanceProvider: Send + Sync {
    async fn travel(&self, from: GeoPoint, to: GeoPoint) -> Result<TravelEstimate>;
}

#[derive(Debug, Deserialize)]
struct MatrixResponse {
    status: String,
    #[serde(default)]
    rows: Vec<MatrixRow>,
}

#[derive(Debug, Deserialize)]
struct MatrixRow {
    #[serde(default)]
    elements: Vec<MatrixElement>,
}

#[derive(Debug, Deserialize)]
struct MatrixElement {
    status: String,
    distance: Option<MatrixValue>,
    duration: Option<MatrixValue>,
}

#[derive(Debug, Deserialize)]
struct MatrixValue {
    value: f64,
}

/// Google Distance Matrix client
pub struct DistanceMatrixClient {
    http: reqwest::Client,
    api_key: String,
    url: String,
}

impl DistanceMatrixClient {
    pub fn new(api_key: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key: api_key.into(),
            url: url.into(),
        }
    }

    fn parse(body: MatrixResponse) -> Result<TravelEstimate> {
        if body.status != "OK" {
            return Err(Error::Unavailable(format!(
                "Distance matrix status {}",
                body.status
            )));
        }
        let element = body
            .rows
            .into_iter()
            .next()
            .and_then(|row| row.elements.into_iter().next())
            .ok_or_else(|| Error::Unavailable("Distance matrix returned no elements".to_string()))?;
        if element.status != "OK" {
            return Err(Error::Unavailable(format!(
                "Distance matrix element status {}",
                element.status
            )));
        }
        match (element.distance, element.duration) {
            (Some(distance), Some(duration)) => Ok(TravelEstimate {
                distance_km: distance.value / 1000.0,
                duration_minutes: (duration.value / 60.0).ceil() as u32,
                source: EstimateSource::Provider,
            }),
            _ => Err(Error::Unavailable(
                "Distance matrix element missing distance or duration".to_string(),
            )),
        }
    }
}

#[async_trait]
impl DistanceProvider for DistanceMatrixClient {
    async fn travel(&self, from: GeoPoint, to: GeoPoint) -> Result<TravelEstimate> {
        let origins = format!("{},{}", from.lat, from.lon);
        let destinations = format!("{},{}", to.lat, to.lon);

        let body = self
            .http
            .get(&self.url)
            .query(&[
                ("origins", origins.as_str()),
                ("destinations", destinations.as_str()),
                ("key", self.api_key.as_str()),
                ("units", "metric"),
            ])
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|e| Error::Unavailable(format!("Distance matrix request failed: {}", e)))?
            .json::<MatrixResponse>()
            .await
            .map_err(|e| Error::Unavailable(format!("Distance matrix response unreadable: {}", e)))?;

        Self::parse(body)
    }
}

/// Provider lookups bounded by a timeout, with a haversine fallback
#[derive(Clone)]
pub struct DistanceEstimator {
    provider: Option<Arc<dyn DistanceProvider>>,
    timeout: Duration,
    eta_minutes_per_km: f64,
}

impl DistanceEstimator {
    pub fn new(
        provider: Option<Arc<dyn DistanceProvider>>,
        timeout: Duration,
        eta_minutes_per_km: f64,
    ) -> Self {
        Self {
            provider,
            timeout,
            eta_minutes_per_km,
        }
    }

    /// Estimator that never calls out
    pub fn haversine_only(eta_minutes_per_km: f64) -> Self {
        Self::new(None, Duration::ZERO, eta_minutes_per_km)
    }

    pub async fn estimate(&self, from: GeoPoint, to: GeoPoint) -> TravelEstimate {
        if let Some(provider) = &self.provider {
            match tokio::time::timeout(self.timeout, provider.travel(from, to)).await {
                Ok(Ok(estimate)) => return estimate,
                Ok(Err(e)) => warn!(error = %e, "Distance provider failed, using haversine"),
                Err(_) => warn!(
                    timeout_ms = self.timeout.as_millis() as u64,
                    "Distance provider timed out, using haversine"
                ),
            }
        }
        self.fallback(from, to)
    }

    /// Spherical distance and `ceil(km * eta_minutes_per_km)` minutes
    pub fn fallback(&self, from: GeoPoint, to: GeoPoint) -> TravelEstimate {
        let distance_km = haversine_km(&from, &to);
        let duration_minutes = (distance_km * self.eta_minutes_per_km).ceil() as u32;
        debug!(distance_km, duration_minutes, "Haversine travel estimate");
        TravelEstimate {
            distance_km,
            duration_minutes,
            source: EstimateSource::Haversine,
        }
    }
}
