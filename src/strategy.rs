use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::amap::{geocode_with_timeout, GeocodeProvider};
use crate::errors::{AppError, AppResult};
use crate::extract::{remove_token, simplify, AdminExtractor, RegexAdminExtractor};
use crate::model::{Coordinates, GeocodeCandidate, GeocodeQuery, GeocodingResult};
use crate::normalize::normalize;
use crate::scoring;
use crate::validate::{validate, ValidationFailure};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    Direct,
    CityExtracted,
    Simplified,
    Coarse,
}

pub const STRATEGY_ORDER: [StrategyKind; 4] = [
    StrategyKind::Direct,
    StrategyKind::CityExtracted,
    StrategyKind::Simplified,
    StrategyKind::Coarse,
];

impl StrategyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::Direct => "direct",
            StrategyKind::CityExtracted => "city_extracted",
            StrategyKind::Simplified => "simplified",
            StrategyKind::Coarse => "coarse",
        }
    }

    /// Builds the provider query this strategy issues for an already
    /// normalized address. Never touches the network.
    pub fn plan(
        self,
        normalized: &str,
        hint: Option<&str>,
        extractor: &dyn AdminExtractor,
    ) -> GeocodeQuery {
        match self {
            StrategyKind::Direct => GeocodeQuery::new(normalized, hint),
            StrategyKind::CityExtracted => match extractor.extract_city(normalized) {
                Some(token) => {
                    let remainder = remove_token(normalized, &token);
                    if remainder.is_empty() {
                        GeocodeQuery::new(token, hint)
                    } else {
                        GeocodeQuery::new(remainder, Some(&token))
                    }
                }
                None => GeocodeQuery::new(normalized, hint),
            },
            StrategyKind::Simplified => {
                let simplified = simplify(normalized);
                if simplified.is_empty() {
                    GeocodeQuery::new(normalized, hint)
                } else {
                    GeocodeQuery::new(simplified, hint)
                }
            }
            StrategyKind::Coarse => {
                let coarse = extractor
                    .admin_components(normalized)
                    .joined()
                    .unwrap_or_else(|| normalized.to_string());
                GeocodeQuery::new(coarse, hint)
            }
        }
    }
}

/// Accepted outcome of the strategy chain for one address.
#[derive(Debug, Clone, Serialize)]
pub struct Resolution {
    pub address: String,
    pub strategy: StrategyKind,
    pub attempts: usize,
    pub query: String,
    pub confidence: f64,
    pub heuristic_score: f64,
    pub coordinates: Coordinates,
    pub candidate: GeocodeCandidate,
    pub result: GeocodingResult,
}

pub struct StrategyChain {
    provider: Arc<dyn GeocodeProvider>,
    extractor: Arc<dyn AdminExtractor>,
    call_timeout: Duration,
}

impl StrategyChain {
    pub fn new(provider: Arc<dyn GeocodeProvider>, call_timeout: Duration) -> Self {
        Self {
            provider,
            extractor: Arc::new(RegexAdminExtractor),
            call_timeout,
        }
    }

    pub fn with_extractor(mut self, extractor: Arc<dyn AdminExtractor>) -> Self {
        self.extractor = extractor;
        self
    }

    /// Tries each strategy in order and returns the first result the
    /// validator accepts. Individual strategy failures are logged, not
    /// returned; only exhaustion surfaces the last one.
    /// City token of `raw`, suitable as the hint for [`StrategyChain::resolve`].
    pub fn city_hint(&self, raw: &str) -> Option<String> {
        self.extractor.extract_city(&normalize(raw))
    }

    pub async fn resolve(&self, raw: &str, city_hint: Option<&str>) -> AppResult<Resolution> {
        let normalized = normalize(raw);
        if normalized.is_empty() {
            return Err(ValidationFailure::EmptyAddress.into());
        }
        let heuristic_score = scoring::score(raw);

        let mut last_error = None;
        for (index, kind) in STRATEGY_ORDER.into_iter().enumerate() {
            let query = kind.plan(&normalized, city_hint, self.extractor.as_ref());
            debug!(
                target: "strategy",
                strategy = kind.as_str(),
                address = %query.address,
                city = ?query.city,
                "attempting strategy"
            );
            match self.attempt(&query).await {
                Ok((result, candidate, coordinates)) => {
                    let provider_confidence = scoring::provider_confidence(candidate.level.as_deref());
                    let confidence = scoring::reconcile(heuristic_score, provider_confidence);
                    info!(
                        target: "strategy",
                        strategy = kind.as_str(),
                        attempts = index + 1,
                        confidence,
                        "address resolved"
                    );
                    return Ok(Resolution {
                        address: normalized,
                        strategy: kind,
                        attempts: index + 1,
                        query: query.address,
                        confidence,
                        heuristic_score,
                        coordinates,
                        candidate,
                        result,
                    });
                }
                Err(err) => {
                    warn!(
                        target: "strategy",
                        ?err,
                        strategy = kind.as_str(),
                        address = %query.address,
                        "geocoding strategy failed"
                    );
                    last_error = Some(err);
                }
            }
        }

        Err(AppError::ExhaustedStrategies {
            attempts: STRATEGY_ORDER.len(),
            source: Box::new(
                last_error.unwrap_or_else(|| ValidationFailure::NoCandidates.into()),
            ),
        })
    }

    async fn attempt(
        &self,
        query: &GeocodeQuery,
    ) -> AppResult<(GeocodingResult, GeocodeCandidate, Coordinates)> {
        let result = geocode_with_timeout(self.provider.as_ref(), query, self.call_timeout).await?;
        let candidate = validate(&result)?.clone();
        let coordinates = candidate
            .coordinates()
            .ok_or(ValidationFailure::MissingLocation)?;
        Ok((result, candidate, coordinates))
    }
}
