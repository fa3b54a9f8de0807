use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use tracing::warn;

use crate::config::AppConfig;
use crate::errors::{AppError, AppResult};

const LOCAL_SUBJECT: &str = "local";
const TOKEN_SUBJECT: &str = "token";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CallerIdentity {
    pub subject: String,
}

/// Confirms the caller may use the geocoder before any provider quota is
/// spent.
pub trait SessionVerifier: Send + Sync {
    fn verify(&self, bearer: Option<&str>) -> AppResult<CallerIdentity>;
}

/// Compares the presented bearer token against one configured secret. With
/// no secret configured every caller is treated as the local operator.
pub struct StaticTokenVerifier {
    token: Option<SecretString>,
}

impl StaticTokenVerifier {
    pub fn new(token: Option<SecretString>) -> Self {
        Self { token }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(config.access_token.clone())
    }
}

impl SessionVerifier for StaticTokenVerifier {
    fn verify(&self, bearer: Option<&str>) -> AppResult<CallerIdentity> {
        let Some(expected) = &self.token else {
            return Ok(CallerIdentity {
                subject: LOCAL_SUBJECT.to_string(),
            });
        };

        let presented = bearer
            .map(|value| value.trim())
            .map(|value| value.strip_prefix("Bearer ").unwrap_or(value))
            .filter(|value| !value.is_empty())
            .ok_or_else(|| AppError::Authentication("missing access token".into()))?;

        if !constant_time_eq(presented.as_bytes(), expected.expose_secret().as_bytes()) {
            warn!(target: "auth", "rejected caller with invalid access token");
            return Err(AppError::Authentication("invalid access token".into()));
        }

        Ok(CallerIdentity {
            subject: TOKEN_SUBJECT.to_string(),
        })
    }
}

fn constant_time_eq(left: &[u8], right: &[u8]) -> bool {
    if left.len() != right.len() {
        return false;
    }
    left.iter()
        .zip(right)
        .fold(0_u8, |acc, (a, b)| acc | (a ^ b))
        == 0
}
