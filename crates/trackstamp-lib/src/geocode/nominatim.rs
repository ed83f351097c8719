//! OpenStreetMap Nominatim reverse geocoding over HTTP

use super::{Place, ReverseGeocoder};
use crate::{Error, Result};
use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde_json::Value;
use std::time::Duration;

pub const DEFAULT_URL: &str = "https://nominatim.openstreetmap.org";

/// Nominatim's usage policy requires an identifying user agent
pub const DEFAULT_USER_AGENT: &str = concat!("trackstamp/", env!("CARGO_PKG_VERSION"));

/// Address keys holding the settlement name, in order of preference
const SETTLEMENT_KEYS: [&str; 5] = ["city", "town", "village", "municipality", "hamlet"];

/// Connection settings for a Nominatim instance
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NominatimConfig {
    pub base_url: String,
    pub user_agent: String,
    /// Per-request timeout enforced by the HTTP client
    pub timeout: Duration,
}

impl Default for NominatimConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_URL.to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            timeout: Duration::from_secs(10),
        }
    }
}

pub struct NominatimGeocoder {
    client: Client,
    base_url: String,
}

impl NominatimGeocoder {
    pub fn new(config: &NominatimConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&config.user_agent)
                .map_err(|e| Error::Geocode(format!("invalid user agent: {}", e)))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(config.timeout)
            .build()
            .map_err(|e| Error::Geocode(e.to_string()))?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl ReverseGeocoder for NominatimGeocoder {
    async fn reverse(&self, latitude: f64, longitude: f64) -> Result<Place> {
        let url = format!("{}/reverse", self.base_url);
        let response = self
            .client
            .get(url)
            .query(&[
                ("format", "jsonv2".to_string()),
                ("addressdetails", "1".to_string()),
                ("zoom", "10".to_string()),
                ("lat", latitude.to_string()),
                ("lon", longitude.to_string()),
            ])
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| Error::Geocode(e.to_string()))?;
        let json: Value = response
            .json()
            .await
            .map_err(|e| Error::Geocode(e.to_string()))?;
        parse_response(&json)
    }

    fn name(&self) -> &str {
        "nominatim"
    }
}

/// Extract a place from a `/reverse?format=jsonv2` response
fn parse_response(json: &Value) -> Result<Place> {
    if let Some(error) = json.get("error").and_then(Value::as_str) {
        // "Unable to geocode" for positions at sea or outside any area
        tracing::debug!("Nominatim returned no place: {}", error);
        return Ok(Place::default());
    }

    let address = json
        .get("address")
        .ok_or_else(|| Error::Geocode("response has no address".to_string()))?;
    let text = |key: &str| {
        address
            .get(key)
            .and_then(Value::as_str)
            .map(str::to_string)
            .filter(|s| !s.is_empty())
    };
    Ok(Place {
        city: SETTLEMENT_KEYS.iter().find_map(|key| text(key)),
        region: text("state").or_else(|| text("province")),
        country: text("country"),
    })
}
