use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Url};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tokio::time::timeout;
use tracing::debug;

use crate::config::AppConfig;
use crate::errors::{AppError, AppResult};
use crate::model::{loose_string, GeocodeCandidate, GeocodeQuery, GeocodingResult};

const SUCCESS_STATUS: &str = "1";
const TIMEOUT_STATUS: &str = "timeout";

/// A single geocoding request against the external provider. Implementations
/// never retry; fallback belongs to the caller.
#[async_trait]
pub trait GeocodeProvider: Send + Sync {
    async fn geocode(&self, query: &GeocodeQuery) -> AppResult<GeocodingResult>;
}

/// Runs one provider call under `limit`. An expired call is reported the same
/// way as a provider-side failure.
pub async fn geocode_with_timeout(
    provider: &dyn GeocodeProvider,
    query: &GeocodeQuery,
    limit: Duration,
) -> AppResult<GeocodingResult> {
    match timeout(limit, provider.geocode(query)).await {
        Ok(result) => result,
        Err(_) => Err(AppError::Provider {
            status: TIMEOUT_STATUS.to_string(),
            info: format!("no response within {} ms", limit.as_millis()),
            infocode: None,
        }),
    }
}

pub struct AmapClient {
    http: Client,
    endpoint: Url,
    api_key: SecretString,
}

impl AmapClient {
    /// Fails fast when no API key is configured.
    pub fn from_config(config: &AppConfig) -> AppResult<Self> {
        let api_key = config
            .amap_api_key
            .clone()
            .ok_or_else(|| AppError::Configuration("AMAP_API_KEY is not configured".into()))?;
        let endpoint = Url::parse(&config.geocode_endpoint).map_err(|err| {
            AppError::Configuration(format!(
                "invalid geocode endpoint {}: {err}",
                config.geocode_endpoint
            ))
        })?;
        let http = Client::builder()
            .user_agent(concat!("amap-geocoder/", env!("CARGO_PKG_VERSION")))
            .timeout(config.provider_timeout())
            .build()?;

        Ok(Self {
            http,
            endpoint,
            api_key,
        })
    }

    fn request_url(&self, query: &GeocodeQuery) -> Url {
        let mut url = self.endpoint.clone();
        {
            let mut pairs = url.query_pairs_mut();
            pairs
                .append_pair("key", self.api_key.expose_secret())
                .append_pair("address", &query.address)
                .append_pair("output", "JSON");
            if let Some(city) = &query.city {
                pairs.append_pair("city", city);
            }
            if query.batch {
                pairs.append_pair("batch", "true");
            }
        }
        url
    }
}

#[async_trait]
impl GeocodeProvider for AmapClient {
    async fn geocode(&self, query: &GeocodeQuery) -> AppResult<GeocodingResult> {
        debug!(
            target: "amap",
            address = %query.address,
            city = ?query.city,
            batch = query.batch,
            "issuing geocode request"
        );
        let response = self
            .http
            .get(self.request_url(query))
            .send()
            .await?
            .error_for_status()?;

        let envelope: GeocodeEnvelope = response.json().await?;
        envelope.into_result()
    }
}

#[derive(Deserialize)]
struct GeocodeEnvelope {
    #[serde(default, deserialize_with = "loose_string")]
    status: Option<String>,
    #[serde(default, deserialize_with = "loose_string")]
    info: Option<String>,
    #[serde(default, deserialize_with = "loose_string")]
    infocode: Option<String>,
    #[serde(default, deserialize_with = "loose_string")]
    count: Option<String>,
    #[serde(default)]
    geocodes: Option<Vec<GeocodeCandidate>>,
}

impl GeocodeEnvelope {
    fn into_result(self) -> AppResult<GeocodingResult> {
        let status = self.status.unwrap_or_default();
        let info = self.info.unwrap_or_default();
        if status != SUCCESS_STATUS {
            return Err(AppError::Provider {
                status,
                info,
                infocode: self.infocode,
            });
        }

        let candidates = self.geocodes.unwrap_or_default();
        let count = self
            .count
            .and_then(|c| c.parse::<usize>().ok())
            .unwrap_or(candidates.len());
        Ok(GeocodingResult {
            status,
            info,
            infocode: self.infocode,
            count,
            candidates,
        })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn test_client(endpoint: &str) -> AmapClient {
        let config = AppConfig {
            amap_api_key: Some(SecretString::new("test-key".into())),
            geocode_endpoint: endpoint.into(),
            ..AppConfig::default()
        };
        AmapClient::from_config(&config).unwrap()
    }

    #[test]
    fn requires_api_key() {
        let err = AmapClient::from_config(&AppConfig::default()).err().unwrap();
        assert!(matches!(err, AppError::Configuration(_)));
    }

    #[test]
    fn rejects_invalid_endpoint() {
        let config = AppConfig {
            amap_api_key: Some(SecretString::new("test-key".into())),
            geocode_endpoint: "not a url".into(),
            ..AppConfig::default()
        };
        assert!(matches!(
            AmapClient::from_config(&config),
            Err(AppError::Configuration(_))
        ));
    }

    #[test]
    fn builds_provider_query_string() {
        let client = test_client("https://restapi.amap.com/v3/geocode/geo");
        let url = client.request_url(&GeocodeQuery::new("朝阳区 建国路", Some("北京")));
        let pairs: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        assert_eq!(
            pairs,
            vec![
                ("key".to_string(), "test-key".to_string()),
                ("address".to_string(), "朝阳区 建国路".to_string()),
                ("output".to_string(), "JSON".to_string()),
                ("city".to_string(), "北京".to_string()),
            ]
        );

        let batched = client.request_url(&GeocodeQuery::batched(&["a", "b"], None));
        assert!(batched.query().unwrap().ends_with("batch=true"));
        assert!(!batched.query().unwrap().contains("city="));
    }

    #[test]
    fn parses_successful_envelope() {
        let envelope: GeocodeEnvelope = serde_json::from_value(json!({
            "status": "1",
            "info": "OK",
            "infocode": "10000",
            "count": "1",
            "geocodes": [{
                "formatted_address": "上海市浦东新区",
                "country": "中国",
                "province": "上海市",
                "city": "上海市",
                "district": "浦东新区",
                "township": [],
                "neighborhood": { "name": [], "type": [] },
                "building": { "name": [], "type": [] },
                "adcode": "310115",
                "citycode": "021",
                "street": [],
                "number": [],
                "location": "121.544346,31.221461",
                "level": "区县"
            }]
        }))
        .unwrap();

        let result = envelope.into_result().unwrap();
        assert_eq!(result.count, 1);
        assert_eq!(result.infocode.as_deref(), Some("10000"));
        assert_eq!(result.top().unwrap().adcode.as_deref(), Some("310115"));
    }

    #[test]
    fn empty_geocodes_is_a_successful_but_empty_result() {
        let envelope: GeocodeEnvelope = serde_json::from_value(json!({
            "status": "1",
            "info": "OK",
            "infocode": "10000",
            "count": "0",
            "geocodes": []
        }))
        .unwrap();
        let result = envelope.into_result().unwrap();
        assert!(result.is_empty());
        assert_eq!(result.count, 0);
    }

    #[test]
    fn non_success_status_is_a_provider_error() {
        let envelope: GeocodeEnvelope = serde_json::from_value(json!({
            "status": "0",
            "info": "INVALID_USER_KEY",
            "infocode": "10001"
        }))
        .unwrap();
        match envelope.into_result() {
            Err(AppError::Provider {
                status,
                info,
                infocode,
            }) => {
                assert_eq!(status, "0");
                assert_eq!(info, "INVALID_USER_KEY");
                assert_eq!(infocode.as_deref(), Some("10001"));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    struct SlowProvider;

    #[async_trait]
    impl GeocodeProvider for SlowProvider {
        async fn geocode(&self, _query: &GeocodeQuery) -> AppResult<GeocodingResult> {
            tokio::time::sleep(Duration::from_millis(500)).await;
            Ok(GeocodingResult::default())
        }
    }

    #[tokio::test]
    async fn timeout_is_reported_as_provider_error() {
        let err = geocode_with_timeout(
            &SlowProvider,
            &GeocodeQuery::new("北京", None),
            Duration::from_millis(20),
        )
        .await
        .unwrap_err();
        match err {
            AppError::Provider { status, .. } => assert_eq!(status, TIMEOUT_STATUS),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
