use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::amap::GeocodeProvider;
use crate::errors::AppResult;
use crate::model::{GeocodeCandidate, GeocodeQuery, GeocodingResult};

type Responder = Box<dyn Fn(&GeocodeQuery) -> AppResult<GeocodingResult> + Send + Sync>;

/// Provider double that records every query and answers from a closure.
pub(crate) struct StubProvider {
    respond: Responder,
    calls: Mutex<Vec<GeocodeQuery>>,
    delay: Duration,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl StubProvider {
    pub fn new(
        respond: impl Fn(&GeocodeQuery) -> AppResult<GeocodingResult> + Send + Sync + 'static,
    ) -> Self {
        Self {
            respond: Box::new(respond),
            calls: Mutex::new(Vec::new()),
            delay: Duration::ZERO,
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    pub fn always_empty() -> Self {
        Self::new(|_| Ok(empty_result()))
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> Vec<GeocodeQuery> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GeocodeProvider for StubProvider {
    async fn geocode(&self, query: &GeocodeQuery) -> AppResult<GeocodingResult> {
        self.calls.lock().push(query.clone());
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(current, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        (self.respond)(query)
    }
}

pub(crate) fn empty_result() -> GeocodingResult {
    GeocodingResult {
        status: "1".into(),
        info: "OK".into(),
        infocode: Some("10000".into()),
        count: 0,
        candidates: Vec::new(),
    }
}

pub(crate) fn candidate_result(formatted: &str, location: &str, level: &str) -> GeocodingResult {
    GeocodingResult {
        count: 1,
        candidates: vec![GeocodeCandidate {
            formatted_address: Some(formatted.into()),
            country: Some("中国".into()),
            location: Some(location.into()),
            level: Some(level.into()),
            ..GeocodeCandidate::default()
        }],
        ..empty_result()
    }
}
