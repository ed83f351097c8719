//! Reverse geocoding: coordinates to human-readable place names
//!
//! Geocoding is decoration. A lookup that fails, times out or finds nothing yields a
//! blank [`Place`] and a warning; it never holds up or fails correlation.

mod cache;
mod nominatim;
pub(crate) mod places;

pub use cache::CachedGeocoder;
pub use nominatim::{NominatimConfig, NominatimGeocoder};
pub use places::{City, PlaceDatabase};

use crate::Result;
use async_trait::async_trait;
use std::fmt;
use std::time::Duration;

/// Location names for a position; any component may be unknown
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Place {
    pub city: Option<String>,
    /// State, province or similar first-level subdivision
    pub region: Option<String>,
    pub country: Option<String>,
}

impl Place {
    pub fn is_empty(&self) -> bool {
        [&self.city, &self.region, &self.country]
            .iter()
            .all(|part| part.as_deref().is_none_or(str::is_empty))
    }

    /// Known components joined with commas, e.g. `Edmonton, Alberta, Canada`
    pub fn summary(&self) -> String {
        [&self.city, &self.region, &self.country]
            .iter()
            .filter_map(|part| part.as_deref())
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl fmt::Display for Place {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.summary())
    }
}

/// A source of place names for coordinates
#[async_trait]
pub trait ReverseGeocoder: Send + Sync {
    /// Resolve a position; an empty `Place` means nothing was found
    async fn reverse(&self, latitude: f64, longitude: f64) -> Result<Place>;

    /// Short name for logs
    fn name(&self) -> &str;
}

/// Resolve a position, degrading every failure to a blank place
pub async fn lookup_or_blank(
    geocoder: &dyn ReverseGeocoder,
    latitude: f64,
    longitude: f64,
    timeout: Duration,
) -> Place {
    match tokio::time::timeout(timeout, geocoder.reverse(latitude, longitude)).await {
        Ok(Ok(place)) => place,
        Ok(Err(err)) => {
            tracing::warn!(
                "{} lookup of {:.5}, {:.5} failed: {}",
                geocoder.name(),
                latitude,
                longitude,
                err
            );
            Place::default()
        }
        Err(_) => {
            tracing::warn!(
                "{} lookup of {:.5}, {:.5} timed out after {:?}",
                geocoder.name(),
                latitude,
                longitude,
                timeout
            );
            Place::default()
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::Error;

    /// Answers every query with the same outcome
    pub(crate) struct StaticGeocoder {
        pub place: Option<Place>,
        pub delay: Duration,
    }

    #[async_trait]
    impl ReverseGeocoder for StaticGeocoder {
        async fn reverse(&self, _latitude: f64, _longitude: f64) -> Result<Place> {
            tokio::time::sleep(self.delay).await;
            self.place
                .clone()
                .ok_or_else(|| Error::Geocode("offline".to_string()))
        }

        fn name(&self) -> &str {
            "static"
        }
    }

    pub(crate) fn edmonton() -> Place {
        Place {
            city: Some("Edmonton".to_string()),
            region: Some("Alberta".to_string()),
            country: Some("Canada".to_string()),
        }
    }

    #[test]
    fn test_place_summary() {
        assert_eq!(edmonton().summary(), "Edmonton, Alberta, Canada");
        let partial = Place {
            city: None,
            region: Some(String::new()),
            country: Some("Canada".to_string()),
        };
        assert_eq!(partial.to_string(), "Canada");
        assert!(!partial.is_empty());
        assert!(Place::default().is_empty());
    }

    #[tokio::test]
    async fn test_lookup_or_blank() {
        let ok = StaticGeocoder {
            place: Some(edmonton()),
            delay: Duration::ZERO,
        };
        assert_eq!(
            lookup_or_blank(&ok, 53.5, -113.5, Duration::from_secs(1)).await,
            edmonton()
        );

        let failing = StaticGeocoder {
            place: None,
            delay: Duration::ZERO,
        };
        assert!(
            lookup_or_blank(&failing, 53.5, -113.5, Duration::from_secs(1))
                .await
                .is_empty()
        );

        let slow = StaticGeocoder {
            place: Some(edmonton()),
            delay: Duration::from_secs(5),
        };
        assert!(
            lookup_or_blank(&slow, 53.5, -113.5, Duration::from_millis(20))
                .await
                .is_empty()
        );
    }
}
