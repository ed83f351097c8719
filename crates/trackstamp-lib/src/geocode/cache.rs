//! Fuzzy in-memory cache in front of a slower geocoder
//!
//! Photos taken on the same walk tend to be within a few hundred meters of each other, so
//! positions are keyed at two decimal places (roughly 1 km) and share one lookup.

use super::{Place, ReverseGeocoder};
use crate::Result;
use async_trait::async_trait;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::{Mutex, PoisonError};

/// Position rounded to hundredths of a degree
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
struct CacheKey(i64, i64);

impl CacheKey {
    fn new(latitude: f64, longitude: f64) -> Self {
        Self(
            (latitude * 100.0).round() as i64,
            (longitude * 100.0).round() as i64,
        )
    }
}

pub struct CachedGeocoder<G> {
    inner: G,
    cache: Mutex<LruCache<CacheKey, Place>>,
}

impl<G: ReverseGeocoder> CachedGeocoder<G> {
    pub fn new(inner: G, capacity: NonZeroUsize) -> Self {
        Self {
            inner,
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn inner(&self) -> &G {
        &self.inner
    }

    fn cached(&self, key: &CacheKey) -> Option<Place> {
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }
}

#[async_trait]
impl<G: ReverseGeocoder> ReverseGeocoder for CachedGeocoder<G> {
    async fn reverse(&self, latitude: f64, longitude: f64) -> Result<Place> {
        let key = CacheKey::new(latitude, longitude);
        if let Some(place) = self.cached(&key) {
            return Ok(place);
        }

        // Failures are not cached so a later attempt can succeed
        let place = self.inner.reverse(latitude, longitude).await?;
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .put(key, place.clone());
        Ok(place)
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}
