use std::time::Duration;
use std::{env, io};

use secrecy::SecretString;
use serde::Serialize;
use tracing::debug;

pub const DEFAULT_GEOCODE_ENDPOINT: &str = "https://restapi.amap.com/v3/geocode/geo";
const DEFAULT_PROVIDER_TIMEOUT_MS: u64 = 10_000;
pub(crate) const DEFAULT_BATCH_WINDOW_SIZE: usize = 5;
pub(crate) const DEFAULT_BATCH_WINDOW_DELAY_MS: u64 = 200;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub amap_api_key: Option<SecretString>,
    pub geocode_endpoint: String,
    pub provider_timeout_ms: u64,
    pub batch_window_size: usize,
    pub batch_window_delay_ms: u64,
    pub database_path: String,
    pub access_token: Option<SecretString>,
}

#[derive(Clone, Debug, Serialize)]
pub struct PublicAppConfig {
    pub geocode_endpoint: String,
    pub provider_timeout_ms: u64,
    pub batch_window_size: usize,
    pub batch_window_delay_ms: u64,
    pub database_path: String,
    pub has_amap_api_key: bool,
    pub requires_access_token: bool,
}

impl AppConfig {
    pub fn from_env() -> Self {
        load_dotenv_if_applicable();
        Self {
            amap_api_key: parse_secret("AMAP_API_KEY"),
            geocode_endpoint: env::var("AMAP_GEOCODE_ENDPOINT")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_GEOCODE_ENDPOINT.to_string()),
            provider_timeout_ms: parse_u64("PROVIDER_TIMEOUT_MS", DEFAULT_PROVIDER_TIMEOUT_MS)
                .max(1),
            batch_window_size: parse_usize("BATCH_WINDOW_SIZE", DEFAULT_BATCH_WINDOW_SIZE).max(1),
            batch_window_delay_ms: parse_u64(
                "BATCH_WINDOW_DELAY_MS",
                DEFAULT_BATCH_WINDOW_DELAY_MS,
            ),
            database_path: env::var("DATABASE_PATH")
                .unwrap_or_else(|_| "geocoding.db".to_string()),
            access_token: parse_secret("GEOCODER_ACCESS_TOKEN"),
        }
    }

    pub fn provider_timeout(&self) -> Duration {
        Duration::from_millis(self.provider_timeout_ms)
    }

    pub fn batch_window_delay(&self) -> Duration {
        Duration::from_millis(self.batch_window_delay_ms)
    }

    pub fn public_profile(&self) -> PublicAppConfig {
        PublicAppConfig {
            geocode_endpoint: self.geocode_endpoint.clone(),
            provider_timeout_ms: self.provider_timeout_ms,
            batch_window_size: self.batch_window_size,
            batch_window_delay_ms: self.batch_window_delay_ms,
            database_path: self.database_path.clone(),
            has_amap_api_key: self.amap_api_key.is_some(),
            requires_access_token: self.access_token.is_some(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            amap_api_key: None,
            geocode_endpoint: DEFAULT_GEOCODE_ENDPOINT.to_string(),
            provider_timeout_ms: DEFAULT_PROVIDER_TIMEOUT_MS,
            batch_window_size: DEFAULT_BATCH_WINDOW_SIZE,
            batch_window_delay_ms: DEFAULT_BATCH_WINDOW_DELAY_MS,
            database_path: "geocoding.db".to_string(),
            access_token: None,
        }
    }
}

fn load_dotenv_if_applicable() {
    if !should_load_dotenv() {
        debug!("skipping .env load outside dev mode");
        return;
    }

    if let Err(err) = dotenvy::dotenv() {
        match &err {
            dotenvy::Error::Io(io_err) if io_err.kind() == io::ErrorKind::NotFound => {}
            _ => debug!(?err, "unable to load .env file"),
        }
    }
}

fn should_load_dotenv() -> bool {
    cfg!(debug_assertions) || parse_bool("ALLOW_DOTENV", false)
}

fn parse_secret(key: &str) -> Option<SecretString> {
    env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .map(|v| SecretString::new(v.into()))
}

fn parse_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .map(|v| matches!(v.trim(), "1" | "true" | "TRUE" | "True"))
        .unwrap_or(default)
}

fn parse_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .unwrap_or(default)
}

fn parse_usize(key: &str, default: usize) -> usize {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<usize>().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_public_profile_without_secrets() {
        env::set_var("AMAP_API_KEY", "secret");
        env::set_var("AMAP_GEOCODE_ENDPOINT", "http://localhost:9999/v3/geocode/geo");
        env::set_var("BATCH_WINDOW_SIZE", "0");
        env::set_var("BATCH_WINDOW_DELAY_MS", "50");
        env::set_var("DATABASE_PATH", "custom.db");

        let config = AppConfig::from_env();
        let public = config.public_profile();

        assert!(public.has_amap_api_key);
        assert!(config.amap_api_key.is_some());
        assert_eq!(public.geocode_endpoint, "http://localhost:9999/v3/geocode/geo");
        assert_eq!(public.batch_window_size, 1);
        assert_eq!(config.batch_window_delay(), Duration::from_millis(50));
        assert_eq!(public.database_path, "custom.db");
        assert_eq!(
            config.provider_timeout(),
            Duration::from_millis(DEFAULT_PROVIDER_TIMEOUT_MS)
        );
        let rendered = serde_json::to_string(&public).unwrap();
        assert!(!rendered.contains("secret"));
    }
}
