//! Track storage module
//!
//! This module provides the `Track` struct for storing parsed track points
//! with precomputed metadata like bounding boxes, time ranges and distances.

use crate::{Error, Result, coords};
use chrono::{DateTime, Utc};
use geo::Rect;
use std::sync::Arc;

/// A single timestamped GPS fix
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TrackPoint {
    /// Absolute time of the fix
    pub time: DateTime<Utc>,
    /// Latitude in degrees
    pub latitude: f64,
    /// Longitude in degrees
    pub longitude: f64,
    /// Elevation in meters above sea level, if recorded
    pub elevation: Option<f64>,
}

impl TrackPoint {
    pub fn new(time: DateTime<Utc>, latitude: f64, longitude: f64, elevation: Option<f64>) -> Self {
        Self {
            time,
            latitude,
            longitude,
            elevation,
        }
    }

    /// Position as a `geo::Point` (x = longitude, y = latitude)
    #[inline]
    pub fn point(&self) -> geo::Point<f64> {
        geo::Point::new(self.longitude, self.latitude)
    }
}

/// Represents a single parsed track with precomputed metadata
#[derive(Clone, Debug)]
pub struct Track {
    /// Display name (usually the file stem)
    name: String,
    /// Points sorted by time
    points: Vec<TrackPoint>,
    /// Precomputed bounding box in degrees (x = longitude, y = latitude)
    bounding_box: Rect<f64>,
    /// Cached total distance in meters (computed once during construction)
    cached_total_distance: f64,
}

#[cfg_attr(feature = "profiling", profiling::all_functions)]
impl Track {
    /// Create a new Track from parsed points
    ///
    /// Points with coordinates outside the globe are dropped, the rest are sorted by time.
    /// The sort is stable, so points sharing a timestamp keep their file order.
    ///
    /// # Returns
    /// An `Arc<Track>` on success, or `Error::EmptyTrack` if no usable point remains
    pub fn new(name: impl Into<String>, mut points: Vec<TrackPoint>) -> Result<Arc<Self>> {
        #[cfg(feature = "profiling")]
        profiling::scope!("track::new");
        let name = name.into();

        let before = points.len();
        points.retain(|p| coords::valid_coords(p.latitude, p.longitude));
        if points.len() != before {
            tracing::warn!(
                "Skipping {} points with invalid coordinates in {}",
                before - points.len(),
                name
            );
        }

        if points.is_empty() {
            return Err(Error::EmptyTrack);
        }

        points.sort_by_key(|p| p.time);

        let (bounding_box, total_distance) = Self::compute_metadata(&points);

        Ok(Arc::new(Track {
            name,
            points,
            bounding_box,
            cached_total_distance: total_distance,
        }))
    }

    /// Compute the bounding box and total distance in a single pass
    fn compute_metadata(points: &[TrackPoint]) -> (Rect<f64>, f64) {
        let mut min_x = f64::INFINITY;
        let mut min_y = f64::INFINITY;
        let mut max_x = f64::NEG_INFINITY;
        let mut max_y = f64::NEG_INFINITY;
        let mut total_distance = 0.0;

        let mut prev: Option<&TrackPoint> = None;
        for point in points {
            min_x = min_x.min(point.longitude);
            min_y = min_y.min(point.latitude);
            max_x = max_x.max(point.longitude);
            max_y = max_y.max(point.latitude);

            if let Some(prev) = prev {
                total_distance += coords::haversine_distance(
                    prev.latitude,
                    prev.longitude,
                    point.latitude,
                    point.longitude,
                );
            }
            prev = Some(point);
        }

        let bounding_box = Rect::new(
            geo::Coord { x: min_x, y: min_y },
            geo::Coord { x: max_x, y: max_y },
        );
        (bounding_box, total_distance)
    }

    /// Get the track name
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get all points, sorted by time
    #[inline]
    pub fn points(&self) -> &[TrackPoint] {
        &self.points
    }

    /// Get the bounding box in degrees
    #[inline]
    pub fn bounding_box(&self) -> Rect<f64> {
        self.bounding_box
    }

    /// First point in time
    #[inline]
    pub fn start(&self) -> &TrackPoint {
        // Never empty, enforced by `new`
        &self.points[0]
    }

    /// Last point in time
    #[inline]
    pub fn end(&self) -> &TrackPoint {
        &self.points[self.points.len() - 1]
    }

    /// Time covered by the track, from first to last point
    #[inline]
    pub fn time_range(&self) -> (DateTime<Utc>, DateTime<Utc>) {
        (self.start().time, self.end().time)
    }

    /// Get total number of points
    #[inline]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Always false, kept for API symmetry with `len`
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Total distance along the track in meters
    ///
    /// This is O(1) as the value is cached during construction.
    #[inline]
    pub fn total_distance(&self) -> f64 {
        self.cached_total_distance
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).unwrap()
    }

    fn create_test_points() -> Vec<TrackPoint> {
        // Deliberately out of order (around London)
        vec![
            TrackPoint::new(at(20), 51.5078, -0.1274, Some(12.0)),
            TrackPoint::new(at(0), 51.5074, -0.1278, Some(10.0)),
            TrackPoint::new(at(10), 51.5076, -0.1276, None),
        ]
    }

    #[test]
    fn test_track_creation_sorts_points() {
        let track = Track::new("london", create_test_points()).unwrap();

        assert_eq!(track.len(), 3);
        assert_eq!(track.name(), "london");
        let times: Vec<_> = track.points().iter().map(|p| p.time).collect();
        assert_eq!(times, vec![at(0), at(10), at(20)]);
        assert_eq!(track.time_range(), (at(0), at(20)));
    }

    #[test]
    fn test_empty_track_fails() {
        let result = Track::new("empty", Vec::new());
        assert!(matches!(result, Err(Error::EmptyTrack)));
    }

    #[test]
    fn test_invalid_points_are_dropped() {
        let points = vec![
            TrackPoint::new(at(0), 95.0, 0.0, None),
            TrackPoint::new(at(1), 10.0, 20.0, None),
        ];
        let track = Track::new("mixed", points).unwrap();
        assert_eq!(track.len(), 1);

        let only_invalid = vec![TrackPoint::new(at(0), 0.0, 200.0, None)];
        assert!(matches!(
            Track::new("bad", only_invalid),
            Err(Error::EmptyTrack)
        ));
    }

    #[test]
    fn test_sort_is_stable_for_equal_timestamps() {
        let points = vec![
            TrackPoint::new(at(5), 1.0, 1.0, None),
            TrackPoint::new(at(5), 2.0, 2.0, None),
        ];
        let track = Track::new("dupes", points).unwrap();
        assert_eq!(track.points()[0].latitude, 1.0);
        assert_eq!(track.points()[1].latitude, 2.0);
    }

    #[test]
    fn test_bounding_box() {
        let track = Track::new("london", create_test_points()).unwrap();

        let bbox = track.bounding_box();
        assert!(bbox.width() > 0.0);
        assert!(bbox.height() > 0.0);
        assert!((bbox.min().y - 51.5074).abs() < 1e-9);
    }

    #[test]
    fn test_total_distance() {
        let track = Track::new("london", create_test_points()).unwrap();

        let distance = track.total_distance();
        // The test points are very close together
        assert!(distance > 0.0);
        assert!(distance < 1000.0);
    }
}
