mod amap;
mod auth;
mod batch;
mod config;
mod db;
mod errors;
mod extract;
mod locations;
mod model;
mod normalize;
mod scoring;
mod service;
mod strategy;
mod validate;

#[cfg(test)]
mod test_support;

use std::sync::Arc;

use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use rusqlite::Connection as SqlConnection;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub use crate::amap::{geocode_with_timeout, AmapClient, GeocodeProvider};
pub use crate::auth::{CallerIdentity, SessionVerifier, StaticTokenVerifier};
pub use crate::batch::{BatchEntry, BatchOrchestrator, BatchProgress, BatchStats};
pub use crate::config::{AppConfig, PublicAppConfig, DEFAULT_GEOCODE_ENDPOINT};
pub use crate::db::{bootstrap, open_in_memory, DatabaseContext};
pub use crate::errors::{AppError, AppResult};
pub use crate::extract::{simplify, AdminComponents, AdminExtractor, RegexAdminExtractor};
pub use crate::locations::{
    GeocodingStats, GeocodingStatus, LocationGateway, LocationRecord, LocationUpdate,
};
pub use crate::model::{
    Coordinates, Descriptor, GeocodeCandidate, GeocodeQuery, GeocodingResult, PrecisionLevel,
};
pub use crate::normalize::{normalize, MAX_ADDRESS_CHARS, MIN_ADDRESS_CHARS};
pub use crate::scoring::{is_fuzzy, provider_confidence, reconcile, score, strip_fuzzy};
pub use crate::service::{
    LocationBatchSummary, LocationGeocoder, LocationOutcome, SkippedLocation,
};
pub use crate::strategy::{Resolution, StrategyChain, StrategyKind, STRATEGY_ORDER};
pub use crate::validate::{is_valid, validate, ValidationFailure};

/// Everything a caller needs to resolve and persist addresses, wired from one
/// configuration. Every operation goes through [`GeocodingService::authorize`].
pub struct GeocodingService {
    config: AppConfig,
    chain: Arc<StrategyChain>,
    batch: BatchOrchestrator,
    locations: LocationGeocoder,
    verifier: Arc<dyn SessionVerifier>,
}

impl GeocodingService {
    /// Builds the AMap client and opens the location store named by `config`.
    pub fn from_config(config: AppConfig) -> AppResult<Self> {
        init_tracing();
        let provider: Arc<dyn GeocodeProvider> = Arc::new(AmapClient::from_config(&config)?);
        let DatabaseContext { connection, path } = bootstrap(&config.database_path)?;
        let verifier: Arc<dyn SessionVerifier> = Arc::new(StaticTokenVerifier::from_config(&config));
        info!(
            database = %path.display(),
            endpoint = %config.geocode_endpoint,
            "geocoding service initialized"
        );
        Ok(Self::with_parts(config, provider, connection, verifier))
    }

    pub fn with_parts(
        config: AppConfig,
        provider: Arc<dyn GeocodeProvider>,
        connection: SqlConnection,
        verifier: Arc<dyn SessionVerifier>,
    ) -> Self {
        let chain = Arc::new(StrategyChain::new(
            Arc::clone(&provider),
            config.provider_timeout(),
        ));
        let batch = BatchOrchestrator::from_config(provider, &config);
        let gateway = LocationGateway::new(Arc::new(Mutex::new(connection)));
        let locations = LocationGeocoder::new(Arc::clone(&chain), gateway)
            .with_windows(config.batch_window_size, config.batch_window_delay());
        Self {
            config,
            chain,
            batch,
            locations,
            verifier,
        }
    }

    pub fn public_profile(&self) -> PublicAppConfig {
        self.config.public_profile()
    }

    pub fn authorize(&self, bearer: Option<&str>) -> AppResult<Session<'_>> {
        let identity = self.verifier.verify(bearer)?;
        Ok(Session {
            service: self,
            identity,
        })
    }
}

/// A verified caller's handle on the service.
pub struct Session<'a> {
    service: &'a GeocodingService,
    identity: CallerIdentity,
}

impl Session<'_> {
    pub fn identity(&self) -> &CallerIdentity {
        &self.identity
    }

    pub async fn resolve(&self, address: &str, city: Option<&str>) -> AppResult<Resolution> {
        self.service.chain.resolve(address, city).await
    }

    pub async fn resolve_batch(&self, addresses: &[String]) -> Vec<BatchEntry> {
        self.service.batch.resolve_batch(addresses).await
    }

    pub async fn resolve_batch_with_progress(
        &self,
        addresses: &[String],
        observer: Option<Arc<dyn Fn(BatchProgress) + Send + Sync>>,
    ) -> Vec<BatchEntry> {
        self.service
            .batch
            .resolve_batch_with_progress(addresses, observer)
            .await
    }

    pub fn persist(&self, location_id: &str, update: &LocationUpdate) -> AppResult<()> {
        self.gateway().upsert(location_id, update)
    }

    pub fn persist_batch(&self, records: &[(String, LocationUpdate)]) -> AppResult<usize> {
        self.gateway().batch_upsert(records)
    }

    pub fn create_pending(&self, name: &str, address: &str) -> AppResult<LocationRecord> {
        self.gateway().create_pending(name, address)
    }

    pub async fn geocode_location(
        &self,
        location_id: &str,
        address_override: Option<&str>,
    ) -> AppResult<LocationOutcome> {
        self.service
            .locations
            .geocode_location(location_id, address_override)
            .await
    }

    pub async fn geocode_locations(&self, location_ids: &[String]) -> LocationBatchSummary {
        self.service.locations.geocode_locations(location_ids).await
    }

    pub async fn create_and_geocode(&self, name: &str, address: &str) -> AppResult<LocationOutcome> {
        self.service.locations.create_and_geocode(name, address).await
    }

    pub async fn retry_failed(&self, limit: usize) -> AppResult<LocationBatchSummary> {
        self.service.locations.retry_failed(limit).await
    }

    pub fn pending(&self, limit: usize) -> AppResult<Vec<LocationRecord>> {
        self.gateway().pending(limit)
    }

    pub fn stats(&self) -> AppResult<GeocodingStats> {
        self.gateway().stats()
    }

    fn gateway(&self) -> &LocationGateway {
        self.service.locations.gateway()
    }
}

pub fn init_tracing() {
    static INIT: OnceCell<()> = OnceCell::new();
    let _ = INIT.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("info,amap_geocoder=debug"));
        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .try_init();
    });
}
