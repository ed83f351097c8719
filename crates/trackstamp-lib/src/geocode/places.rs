//! Offline place lookup from a GeoNames extract
//!
//! The dataset is tab-separated, one city per line:
//! `name, latitude, longitude, country code, admin1 code, IANA timezone`
//! (columns 1, 4, 5, 8, 10 and 17 of GeoNames `cities1000.txt`).

use super::{Place, ReverseGeocoder};
use crate::{Error, Result, ZoneLookup, coords};
use async_trait::async_trait;
use chrono_tz::Tz;
use std::io::Read;
use std::path::Path;

/// One populated place
#[derive(Clone, Debug, PartialEq)]
pub struct City {
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    pub country: String,
    pub region: String,
    pub timezone: Option<Tz>,
}

impl City {
    pub fn place(&self) -> Place {
        let part = |s: &str| Some(s.to_string()).filter(|s| !s.is_empty());
        Place {
            city: part(&self.name),
            region: part(&self.region),
            country: part(&self.country),
        }
    }

    /// Squared planar distance in degrees; only meaningful for ranking
    fn distance_sq(&self, latitude: f64, longitude: f64) -> f64 {
        let x = self.longitude - longitude;
        let y = self.latitude - latitude;
        x * x + y * y
    }
}

/// In-memory city list answering nearest-city queries
#[derive(Clone, Debug, Default)]
pub struct PlaceDatabase {
    cities: Vec<City>,
}

#[cfg_attr(feature = "profiling", profiling::all_functions)]
impl PlaceDatabase {
    pub fn new(cities: Vec<City>) -> Self {
        Self { cities }
    }

    pub fn open(path: &Path) -> Result<Self> {
        let db = Self::from_reader(std::fs::File::open(path)?)?;
        tracing::info!("Loaded {} places from {}", db.len(), path.display());
        Ok(db)
    }

    /// Parse the tab-separated dataset; malformed lines are skipped
    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let mut reader = ::csv::ReaderBuilder::new()
            .delimiter(b'\t')
            .has_headers(false)
            .flexible(true)
            .quoting(false)
            .from_reader(reader);

        let mut cities = Vec::new();
        for (line, record) in reader.records().enumerate() {
            let record = record.map_err(|e| Error::Geocode(format!("place dataset: {}", e)))?;
            match parse_city(&record) {
                Some(city) => cities.push(city),
                None => tracing::debug!("Skipping malformed place on line {}", line + 1),
            }
        }
        Ok(Self { cities })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.cities.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.cities.is_empty()
    }

    /// The closest city by planar distance in degrees
    pub fn nearest(&self, latitude: f64, longitude: f64) -> Option<&City> {
        if !coords::valid_coords(latitude, longitude) {
            return None;
        }
        self.cities.iter().min_by(|a, b| {
            a.distance_sq(latitude, longitude)
                .total_cmp(&b.distance_sq(latitude, longitude))
        })
    }
}

fn parse_city(record: &::csv::StringRecord) -> Option<City> {
    let field = |i: usize| record.get(i).map(str::trim);
    let name = field(0).filter(|s| !s.is_empty())?.to_string();
    let latitude = field(1)?.parse().ok()?;
    let longitude = field(2)?.parse().ok()?;
    if !coords::valid_coords(latitude, longitude) {
        return None;
    }
    Some(City {
        name,
        latitude,
        longitude,
        country: field(3).unwrap_or_default().to_string(),
        region: field(4).unwrap_or_default().to_string(),
        timezone: field(5).and_then(|tz| tz.parse().ok()),
    })
}

#[async_trait]
impl ReverseGeocoder for PlaceDatabase {
    async fn reverse(&self, latitude: f64, longitude: f64) -> Result<Place> {
        Ok(self
            .nearest(latitude, longitude)
            .map(City::place)
            .unwrap_or_default())
    }

    fn name(&self) -> &str {
        "places"
    }
}

impl ZoneLookup for PlaceDatabase {
    fn zone_at(&self, latitude: f64, longitude: f64) -> Option<Tz> {
        self.nearest(latitude, longitude)?.timezone
    }
}
