use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use serde::Serialize;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::config::{DEFAULT_BATCH_WINDOW_DELAY_MS, DEFAULT_BATCH_WINDOW_SIZE};
use crate::errors::{AppError, AppResult};
use crate::locations::{GeocodingStatus, LocationGateway, LocationUpdate};
use crate::normalize::{normalize, MIN_ADDRESS_CHARS};
use crate::strategy::{Resolution, StrategyChain};
use crate::validate::ValidationFailure;

/// Result of geocoding one stored location. A resolution can succeed while
/// the write-back fails; both are reported.
#[derive(Debug, Clone, Serialize)]
pub struct LocationOutcome {
    pub location_id: String,
    pub address: String,
    pub status: GeocodingStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolution: Option<Resolution>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub persistence_error: Option<String>,
}

impl LocationOutcome {
    pub fn is_resolved(&self) -> bool {
        self.resolution.is_some()
    }
}

/// A location that could not be attempted at all, e.g. an unknown id.
#[derive(Debug, Clone, Serialize)]
pub struct SkippedLocation {
    pub location_id: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct LocationBatchSummary {
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub outcomes: Vec<LocationOutcome>,
    pub skipped: Vec<SkippedLocation>,
}

impl LocationBatchSummary {
    fn record(&mut self, location_id: &str, attempt: AppResult<LocationOutcome>) {
        match attempt {
            Ok(outcome) => {
                self.attempted += 1;
                if outcome.is_resolved() {
                    self.succeeded += 1;
                } else {
                    self.failed += 1;
                }
                self.outcomes.push(outcome);
            }
            Err(err) => {
                warn!(target: "locations", ?err, location_id, "location skipped");
                self.skipped.push(SkippedLocation {
                    location_id: location_id.to_string(),
                    error: err.to_string(),
                });
            }
        }
    }
}

/// Resolves stored locations through the strategy chain and records the
/// outcome on the location itself.
pub struct LocationGeocoder {
    chain: Arc<StrategyChain>,
    gateway: LocationGateway,
    window_size: usize,
    window_delay: Duration,
}

impl LocationGeocoder {
    pub fn new(chain: Arc<StrategyChain>, gateway: LocationGateway) -> Self {
        Self {
            chain,
            gateway,
            window_size: DEFAULT_BATCH_WINDOW_SIZE,
            window_delay: Duration::from_millis(DEFAULT_BATCH_WINDOW_DELAY_MS),
        }
    }

    /// Window size and pause used by [`LocationGeocoder::geocode_locations`].
    pub fn with_windows(mut self, window_size: usize, window_delay: Duration) -> Self {
        self.window_size = window_size.max(1);
        self.window_delay = window_delay;
        self
    }

    pub async fn geocode_location(
        &self,
        location_id: &str,
        address_override: Option<&str>,
    ) -> AppResult<LocationOutcome> {
        let record = self
            .gateway
            .load(location_id)?
            .ok_or_else(|| AppError::Persistence(format!("location {location_id} not found")))?;
        let address = address_override
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .unwrap_or(&record.address)
            .to_string();

        if matches!(
            record.geocoding_status,
            GeocodingStatus::Success | GeocodingStatus::Failed
        ) {
            self.gateway.mark_retry(location_id)?;
        }

        let (status, update, resolution, error) = match self.resolve_address(&address).await {
            Ok(resolution) => (
                GeocodingStatus::Success,
                LocationUpdate::success(&resolution.candidate, resolution.coordinates),
                Some(resolution),
                None,
            ),
            Err(err) => {
                let message = err.to_string();
                (
                    GeocodingStatus::Failed,
                    LocationUpdate::failure(message.clone()),
                    None,
                    Some(message),
                )
            }
        };

        let persistence_error = match self.gateway.upsert(location_id, &update) {
            Ok(()) => None,
            Err(err) => {
                warn!(
                    target: "locations",
                    ?err,
                    location_id,
                    "failed to persist geocoding outcome"
                );
                Some(err.to_string())
            }
        };

        Ok(LocationOutcome {
            location_id: location_id.to_string(),
            address,
            status,
            resolution,
            error,
            persistence_error,
        })
    }

    /// Geocodes stored locations window by window; the locations of one
    /// window run concurrently and each writes back its own outcome.
    pub async fn geocode_locations(&self, location_ids: &[String]) -> LocationBatchSummary {
        let windows = location_ids.len().div_ceil(self.window_size);
        let mut summary = LocationBatchSummary::default();

        for (index, window) in location_ids.chunks(self.window_size).enumerate() {
            if index > 0 && !self.window_delay.is_zero() {
                sleep(self.window_delay).await;
            }

            let attempts = window
                .iter()
                .map(|location_id| self.geocode_location(location_id, None));
            let results = join_all(attempts).await;
            for (location_id, attempt) in window.iter().zip(results) {
                summary.record(location_id, attempt);
            }

            debug!(
                target: "locations",
                window = index + 1,
                windows,
                succeeded = summary.succeeded,
                "location window complete"
            );
        }

        info!(
            target: "locations",
            attempted = summary.attempted,
            succeeded = summary.succeeded,
            skipped = summary.skipped.len(),
            "geocoded stored locations"
        );
        summary
    }

    /// Re-queues up to `limit` failed locations and resolves them again.
    pub async fn retry_failed(&self, limit: usize) -> AppResult<LocationBatchSummary> {
        let failed = self.gateway.failed(limit)?;
        let mut ids = Vec::with_capacity(failed.len());
        for record in failed {
            self.gateway.mark_retry(&record.id)?;
            ids.push(record.id);
        }
        Ok(self.geocode_locations(&ids).await)
    }

    /// Stores a new location and geocodes it straight away.
    pub async fn create_and_geocode(
        &self,
        name: &str,
        address: &str,
    ) -> AppResult<LocationOutcome> {
        let record = self.gateway.create_pending(name, address)?;
        self.geocode_location(&record.id, None).await
    }

    pub fn gateway(&self) -> &LocationGateway {
        &self.gateway
    }

    async fn resolve_address(&self, address: &str) -> AppResult<Resolution> {
        let normalized = normalize(address);
        match normalized.chars().count() {
            0 => return Err(AppError::from(ValidationFailure::EmptyAddress)),
            count if count < MIN_ADDRESS_CHARS => {
                return Err(AppError::from(ValidationFailure::AddressTooShort(normalized)));
            }
            _ => {}
        }
        let city_hint = self.chain.city_hint(&normalized);
        self.chain.resolve(&normalized, city_hint.as_deref()).await
    }
}
