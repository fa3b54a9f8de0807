use thiserror::Error;

use crate::model::{GeocodeCandidate, GeocodingResult, PrecisionLevel};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationFailure {
    #[error("address is empty after normalization")]
    EmptyAddress,
    #[error("address {0:?} is too short to geocode")]
    AddressTooShort(String),
    #[error("provider returned no candidates")]
    NoCandidates,
    #[error("top candidate has no location")]
    MissingLocation,
    #[error("top candidate location {0:?} is not a valid lng,lat pair")]
    InvalidCoordinates(String),
    #[error("top candidate has no precision level")]
    MissingLevel,
    #[error("precision level {0:?} is not an accepted administrative level")]
    UnsupportedLevel(String),
}

/// Accepts a result only when its top candidate carries in-range coordinates
/// and a recognized administrative precision level.
pub fn validate(result: &GeocodingResult) -> Result<&GeocodeCandidate, ValidationFailure> {
    let candidate = result.top().ok_or(ValidationFailure::NoCandidates)?;

    let location = candidate
        .location
        .as_deref()
        .ok_or(ValidationFailure::MissingLocation)?;
    if candidate.coordinates().is_none() {
        return Err(ValidationFailure::InvalidCoordinates(location.to_string()));
    }

    let level = candidate
        .level
        .as_deref()
        .ok_or(ValidationFailure::MissingLevel)?;
    if PrecisionLevel::parse(level).is_none() {
        return Err(ValidationFailure::UnsupportedLevel(level.to_string()));
    }

    Ok(candidate)
}

pub fn is_valid(result: &GeocodingResult) -> bool {
    validate(result).is_ok()
}
