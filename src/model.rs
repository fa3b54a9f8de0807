use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Administrative granularity reported for a geocode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PrecisionLevel {
    Country,
    Province,
    City,
    District,
    Township,
    Street,
    HouseNumber,
}

impl PrecisionLevel {
    /// Accepts the provider's Chinese labels and their English equivalents.
    /// Anything else is unrecognized.
    pub fn parse(label: &str) -> Option<Self> {
        let level = match label.trim() {
            "国家" | "country" => PrecisionLevel::Country,
            "省" | "province" => PrecisionLevel::Province,
            "市" | "city" => PrecisionLevel::City,
            "区县" | "district" => PrecisionLevel::District,
            "乡镇" | "township" => PrecisionLevel::Township,
            "街道" | "street" => PrecisionLevel::Street,
            "门牌号" | "house_number" | "housenumber" => PrecisionLevel::HouseNumber,
            _ => return None,
        };
        Some(level)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PrecisionLevel::Country => "country",
            PrecisionLevel::Province => "province",
            PrecisionLevel::City => "city",
            PrecisionLevel::District => "district",
            PrecisionLevel::Township => "township",
            PrecisionLevel::Street => "street",
            PrecisionLevel::HouseNumber => "house_number",
        }
    }

    pub fn confidence(self) -> f64 {
        match self {
            PrecisionLevel::Country => 0.1,
            PrecisionLevel::Province => 0.2,
            PrecisionLevel::City => 0.4,
            PrecisionLevel::District => 0.6,
            PrecisionLevel::Township => 0.8,
            PrecisionLevel::Street => 0.9,
            PrecisionLevel::HouseNumber => 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Coordinates {
    pub longitude: f64,
    pub latitude: f64,
}

impl Coordinates {
    /// Decodes the provider's `"lng,lat"` form. `None` unless both parts are
    /// finite numbers inside the valid ranges.
    pub fn parse(location: &str) -> Option<Self> {
        let mut parts = location.split(',');
        let longitude = parts.next()?.trim().parse::<f64>().ok()?;
        let latitude = parts.next()?.trim().parse::<f64>().ok()?;
        if parts.next().is_some() {
            return None;
        }
        let coordinates = Self {
            longitude,
            latitude,
        };
        coordinates.is_valid().then_some(coordinates)
    }

    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }

    /// Great-circle distance in metres.
    pub fn distance_m(&self, other: &Coordinates) -> f64 {
        let d_lat = (other.latitude - self.latitude).to_radians();
        let d_lng = (other.longitude - self.longitude).to_radians();
        let a = (d_lat / 2.0).sin().powi(2)
            + self.latitude.to_radians().cos()
                * other.latitude.to_radians().cos()
                * (d_lng / 2.0).sin().powi(2);
        let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
        EARTH_RADIUS_M * c
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Descriptor {
    #[serde(default, deserialize_with = "loose_string")]
    pub name: Option<String>,
    #[serde(rename = "type", default, deserialize_with = "loose_string")]
    pub kind: Option<String>,
}

impl Descriptor {
    fn is_empty(&self) -> bool {
        self.name.is_none() && self.kind.is_none()
    }
}

/// One geocode as returned by the provider. Every field is optional: the
/// provider sends `[]` instead of a string when it has no value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GeocodeCandidate {
    #[serde(default, deserialize_with = "loose_string")]
    pub formatted_address: Option<String>,
    #[serde(default, deserialize_with = "loose_string")]
    pub country: Option<String>,
    #[serde(default, deserialize_with = "loose_string")]
    pub province: Option<String>,
    #[serde(default, deserialize_with = "loose_string")]
    pub city: Option<String>,
    #[serde(default, deserialize_with = "loose_string")]
    pub district: Option<String>,
    #[serde(default, deserialize_with = "loose_string")]
    pub township: Option<String>,
    #[serde(default, deserialize_with = "loose_descriptor")]
    pub neighborhood: Option<Descriptor>,
    #[serde(default, deserialize_with = "loose_descriptor")]
    pub building: Option<Descriptor>,
    #[serde(default, deserialize_with = "loose_string")]
    pub adcode: Option<String>,
    #[serde(default, deserialize_with = "loose_string")]
    pub citycode: Option<String>,
    #[serde(default, deserialize_with = "loose_string")]
    pub street: Option<String>,
    #[serde(rename = "number", default, deserialize_with = "loose_string")]
    pub street_number: Option<String>,
    #[serde(default, deserialize_with = "loose_string")]
    pub location: Option<String>,
    #[serde(default, deserialize_with = "loose_string")]
    pub level: Option<String>,
}

impl GeocodeCandidate {
    pub fn coordinates(&self) -> Option<Coordinates> {
        self.location.as_deref().and_then(Coordinates::parse)
    }

    pub fn precision(&self) -> Option<PrecisionLevel> {
        self.level.as_deref().and_then(PrecisionLevel::parse)
    }
}

/// Parsed provider answer for one query.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GeocodingResult {
    pub status: String,
    pub info: String,
    pub infocode: Option<String>,
    pub count: usize,
    pub candidates: Vec<GeocodeCandidate>,
}

impl GeocodingResult {
    pub fn top(&self) -> Option<&GeocodeCandidate> {
        self.candidates.first()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeocodeQuery {
    pub address: String,
    pub city: Option<String>,
    /// Provider multi-address mode; `address` holds `|`-separated entries.
    pub batch: bool,
}

impl GeocodeQuery {
    pub fn new(address: impl Into<String>, city: Option<&str>) -> Self {
        Self {
            address: address.into(),
            city: city
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .map(str::to_string),
            batch: false,
        }
    }

    pub fn batched(addresses: &[&str], city: Option<&str>) -> Self {
        Self {
            batch: true,
            ..Self::new(addresses.join("|"), city)
        }
    }
}

pub(crate) fn loose_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(string_from_value))
}

fn loose_descriptor<'de, D>(deserializer: D) -> Result<Option<Descriptor>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    let descriptor = match value {
        Some(Value::Object(map)) => Descriptor {
            name: map.get("name").and_then(string_from_value),
            kind: map.get("type").and_then(string_from_value),
        },
        _ => return Ok(None),
    };
    Ok((!descriptor.is_empty()).then_some(descriptor))
}

fn string_from_value(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => {
            let text = text.trim();
            (!text.is_empty()).then(|| text.to_string())
        }
        Value::Number(number) => Some(number.to_string()),
        Value::Array(items) => items.iter().find_map(string_from_value),
        _ => None,
    }
}
