use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::amap::{geocode_with_timeout, GeocodeProvider};
use crate::config::AppConfig;
use crate::errors::{AppError, AppResult};
use crate::model::{GeocodeQuery, GeocodingResult};
use crate::normalize::normalize;
use crate::validate::{validate, ValidationFailure};

/// Outcome for one input address, in input order.
#[derive(Debug, Clone, Serialize)]
pub struct BatchEntry {
    pub address: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<GeocodingResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BatchEntry {
    fn failed(address: &str, result: Option<GeocodingResult>, err: &AppError) -> Self {
        Self {
            address: address.to_string(),
            success: false,
            result,
            error: Some(err.to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchProgress {
    pub window: usize,
    pub windows: usize,
    pub processed: usize,
    pub total: usize,
    pub succeeded: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchStats {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
}

impl BatchStats {
    pub fn from_entries(entries: &[BatchEntry]) -> Self {
        let succeeded = entries.iter().filter(|entry| entry.success).count();
        Self {
            total: entries.len(),
            succeeded,
            failed: entries.len() - succeeded,
        }
    }
}

/// Runs Direct-only lookups for many addresses in fixed windows, pausing
/// between windows to stay under the provider's per-second quota.
pub struct BatchOrchestrator {
    provider: Arc<dyn GeocodeProvider>,
    window_size: usize,
    window_delay: Duration,
    call_timeout: Duration,
}

impl BatchOrchestrator {
    pub fn new(
        provider: Arc<dyn GeocodeProvider>,
        window_size: usize,
        window_delay: Duration,
        call_timeout: Duration,
    ) -> Self {
        Self {
            provider,
            window_size: window_size.max(1),
            window_delay,
            call_timeout,
        }
    }

    pub fn from_config(provider: Arc<dyn GeocodeProvider>, config: &AppConfig) -> Self {
        Self::new(
            provider,
            config.batch_window_size,
            config.batch_window_delay(),
            config.provider_timeout(),
        )
    }

    pub async fn resolve_batch(&self, addresses: &[String]) -> Vec<BatchEntry> {
        self.resolve_batch_with_progress(addresses, None).await
    }

    pub async fn resolve_batch_with_progress(
        &self,
        addresses: &[String],
        observer: Option<Arc<dyn Fn(BatchProgress) + Send + Sync>>,
    ) -> Vec<BatchEntry> {
        let total = addresses.len();
        let windows = total.div_ceil(self.window_size);
        let semaphore = Arc::new(Semaphore::new(self.window_size));
        let mut entries = Vec::with_capacity(total);
        let mut succeeded = 0;

        for (index, window) in addresses.chunks(self.window_size).enumerate() {
            if index > 0 && !self.window_delay.is_zero() {
                sleep(self.window_delay).await;
            }

            let lookups = window
                .iter()
                .map(|address| self.resolve_one(address, Arc::clone(&semaphore)));
            let results = join_all(lookups).await;
            succeeded += results.iter().filter(|entry| entry.success).count();
            entries.extend(results);

            debug!(
                target: "batch",
                window = index + 1,
                windows,
                processed = entries.len(),
                succeeded,
                "batch window complete"
            );
            if let Some(callback) = &observer {
                callback(BatchProgress {
                    window: index + 1,
                    windows,
                    processed: entries.len(),
                    total,
                    succeeded,
                });
            }
        }

        info!(
            target: "batch",
            total,
            succeeded,
            failed = total - succeeded,
            "batch geocoding finished"
        );
        entries
    }

    async fn resolve_one(&self, address: &str, semaphore: Arc<Semaphore>) -> BatchEntry {
        let normalized = normalize(address);
        if normalized.is_empty() {
            return BatchEntry::failed(
                address,
                None,
                &AppError::from(ValidationFailure::EmptyAddress),
            );
        }

        let _permit = match semaphore.acquire_owned().await {
            Ok(permit) => permit,
            Err(err) => {
                return BatchEntry::failed(
                    address,
                    None,
                    &AppError::provider("closed", err.to_string()),
                );
            }
        };

        let query = GeocodeQuery::new(normalized, None);
        match self.lookup(&query).await {
            Ok(result) => {
                let verdict = validate(&result).map(|_| ());
                match verdict {
                    Ok(()) => BatchEntry {
                        address: address.to_string(),
                        success: true,
                        result: Some(result),
                        error: None,
                    },
                    Err(failure) => {
                        BatchEntry::failed(address, Some(result), &AppError::from(failure))
                    }
                }
            }
            Err(err) => {
                warn!(target: "batch", ?err, address = %address, "batch lookup failed");
                BatchEntry::failed(address, None, &err)
            }
        }
    }

    async fn lookup(&self, query: &GeocodeQuery) -> AppResult<GeocodingResult> {
        geocode_with_timeout(self.provider.as_ref(), query, self.call_timeout).await
    }
}
