//! Timestamp correlation: the rule that turns a capture time into a position
//!
//! A photo taken at an instant for which a track point exists gets that point verbatim. A
//! photo taken between two points gets a position linearly interpolated between them. A photo
//! taken outside every loaded track gets nothing, unless it is within the configured tolerance
//! of the first or last point, in which case it snaps to that point.
//!
//! Interpolation is planar in latitude/longitude, not great-circle. Track points are
//! assumed to be closely spaced in both time and distance.

use crate::timeline::Position;
use crate::{Error, Result, Timeline, TrackPoint};
use chrono::{DateTime, TimeDelta, Utc};
use std::sync::Arc;

/// Configuration for the correlator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CorrelatorConfig {
    /// How far before the first or after the last track point a photo may be taken and
    /// still snap to that point. There is no default: the right value depends on how the
    /// tracks were recorded, so callers must choose one.
    pub tolerance: TimeDelta,
}

impl CorrelatorConfig {
    pub fn new(tolerance: TimeDelta) -> Self {
        Self {
            tolerance: tolerance.abs(),
        }
    }
}

/// How a geotag was derived from the track data
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum Confidence {
    /// Matched a point exactly, or snapped to a boundary point within tolerance
    Exact,
    /// Computed between two bracketing points
    Interpolated,
}

/// A geographic position assigned to a photo
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Geotag {
    pub latitude: f64,
    pub longitude: f64,
    pub elevation: Option<f64>,
}

impl Geotag {
    pub fn new(latitude: f64, longitude: f64, elevation: Option<f64>) -> Self {
        Self {
            latitude,
            longitude,
            elevation,
        }
    }
}

impl From<&TrackPoint> for Geotag {
    fn from(point: &TrackPoint) -> Self {
        Self::new(point.latitude, point.longitude, point.elevation)
    }
}

/// The result of correlating one timestamp
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Assignment {
    pub geotag: Geotag,
    pub confidence: Confidence,
}

impl Assignment {
    fn exact(point: &TrackPoint) -> Self {
        Self {
            geotag: point.into(),
            confidence: Confidence::Exact,
        }
    }
}

/// Resolves timestamps against a shared, immutable timeline
#[derive(Clone, Debug)]
pub struct Correlator {
    timeline: Arc<Timeline>,
    config: CorrelatorConfig,
}

#[cfg_attr(feature = "profiling", profiling::all_functions)]
impl Correlator {
    pub fn new(timeline: Arc<Timeline>, config: CorrelatorConfig) -> Self {
        Self { timeline, config }
    }

    #[inline]
    pub fn timeline(&self) -> &Arc<Timeline> {
        &self.timeline
    }

    #[inline]
    pub fn config(&self) -> &CorrelatorConfig {
        &self.config
    }

    /// Assign a position to a photo taken at `time`
    ///
    /// # Errors
    /// `Error::NoCoverage` when the timeline is empty or `time` is further than the tolerance
    /// from both ends of the timeline.
    pub fn correlate(&self, time: DateTime<Utc>) -> Result<Assignment> {
        let points = self.timeline.points();
        let no_coverage = |gap| Error::NoCoverage {
            timestamp: time,
            gap,
        };

        match self.timeline.locate(time) {
            Position::Empty => Err(no_coverage(None)),
            Position::Before => {
                let first = &points[0];
                self.snap(first, first.time - time)
                    .ok_or_else(|| no_coverage(Some(first.time - time)))
            }
            Position::After => {
                let last = &points[points.len() - 1];
                self.snap(last, time - last.time)
                    .ok_or_else(|| no_coverage(Some(time - last.time)))
            }
            Position::Exact(idx) => Ok(Assignment::exact(&points[idx])),
            Position::Between(lo) => {
                let (p1, p2) = (&points[lo], &points[lo + 1]);
                let fraction = interpolation_fraction(time, p1.time, p2.time);
                Ok(Assignment {
                    geotag: interpolate(p1, p2, fraction),
                    confidence: Confidence::Interpolated,
                })
            }
        }
    }

    /// Correlate many keyed timestamps; every item gets its own outcome
    pub fn correlate_all<K>(
        &self,
        items: impl IntoIterator<Item = (K, DateTime<Utc>)>,
    ) -> Vec<(K, Result<Assignment>)> {
        #[cfg(feature = "profiling")]
        profiling::scope!("correlator::correlate_all");

        items
            .into_iter()
            .map(|(key, time)| (key, self.correlate(time)))
            .collect()
    }

    fn snap(&self, point: &TrackPoint, gap: TimeDelta) -> Option<Assignment> {
        (gap <= self.config.tolerance).then(|| Assignment::exact(point))
    }
}

/// Fraction of the way from `start` to `end` at which `time` lies, clamped to [0, 1]
///
/// Identical bounds (duplicate timestamps) yield 0, selecting the first point.
pub fn interpolation_fraction(
    time: DateTime<Utc>,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> f64 {
    if end <= start {
        return 0.0;
    }
    (seconds(time - start) / seconds(end - start)).clamp(0.0, 1.0)
}

/// Nanosecond precision unless the delta spans centuries
fn seconds(delta: TimeDelta) -> f64 {
    match delta.num_nanoseconds() {
        Some(nanos) => nanos as f64 / 1e9,
        None => delta.num_milliseconds() as f64 / 1e3,
    }
}

/// Linear interpolation of every coordinate independently
///
/// Elevation is only produced when both points carry one.
pub fn interpolate(p1: &TrackPoint, p2: &TrackPoint, fraction: f64) -> Geotag {
    let lerp = |a: f64, b: f64| a + fraction * (b - a);
    Geotag {
        latitude: lerp(p1.latitude, p2.latitude),
        longitude: lerp(p1.longitude, p2.longitude),
        elevation: match (p1.elevation, p2.elevation) {
            (Some(a), Some(b)) => Some(lerp(a, b)),
            _ => None,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Track;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).unwrap()
    }

    fn example_correlator(tolerance: i64) -> Correlator {
        let track = Track::new(
            "example",
            vec![
                TrackPoint::new(at(100), 10.0, 20.0, Some(100.0)),
                TrackPoint::new(at(200), 10.5, 20.5, Some(200.0)),
            ],
        )
        .unwrap();
        Correlator::new(
            Arc::new(Timeline::merge([track.as_ref()])),
            CorrelatorConfig::new(TimeDelta::seconds(tolerance)),
        )
    }

    fn wiggly_track(name: &str, offset: i64) -> Arc<Track> {
        let points = (0..50)
            .map(|i| {
                let t = i as f64;
                TrackPoint::new(
                    at(offset + i * 17),
                    45.0 + (t * 0.3).sin() * 0.01,
                    -75.0 + (t * 0.7).cos() * 0.01,
                    Some(100.0 + t),
                )
            })
            .collect();
        Track::new(name, points).unwrap()
    }

    #[test]
    fn test_interpolated_example() {
        let result = example_correlator(10).correlate(at(150)).unwrap();
        assert_eq!(result.confidence, Confidence::Interpolated);
        assert!((result.geotag.latitude - 10.25).abs() < 1e-9);
        assert!((result.geotag.longitude - 20.25).abs() < 1e-9);
        assert!((result.geotag.elevation.unwrap() - 150.0).abs() < 1e-9);
    }

    #[test]
    fn test_exact_example() {
        let result = example_correlator(10).correlate(at(100)).unwrap();
        assert_eq!(result.confidence, Confidence::Exact);
        assert_eq!(result.geotag, Geotag::new(10.0, 20.0, Some(100.0)));
    }

    #[test]
    fn test_no_coverage_example() {
        let result = example_correlator(10).correlate(at(500));
        match result {
            Err(Error::NoCoverage { timestamp, gap }) => {
                assert_eq!(timestamp, at(500));
                assert_eq!(gap, Some(TimeDelta::seconds(300)));
            }
            other => panic!("expected NoCoverage, got {:?}", other),
        }
    }

    #[test]
    fn test_boundary_snaps_within_tolerance() {
        let correlator = example_correlator(10);

        let before = correlator.correlate(at(90)).unwrap();
        assert_eq!(before.confidence, Confidence::Exact);
        assert_eq!(before.geotag.latitude, 10.0);

        let after = correlator.correlate(at(210)).unwrap();
        assert_eq!(after.confidence, Confidence::Exact);
        assert_eq!(after.geotag.latitude, 10.5);

        assert!(correlator.correlate(at(89)).is_err());
        assert!(correlator.correlate(at(211)).is_err());
    }

    #[test]
    fn test_empty_timeline_has_no_coverage() {
        let correlator = Correlator::new(
            Arc::new(Timeline::default()),
            CorrelatorConfig::new(TimeDelta::seconds(1_000_000)),
        );
        assert!(matches!(
            correlator.correlate(at(0)),
            Err(Error::NoCoverage { gap: None, .. })
        ));
    }

    #[test]
    fn test_exact_match_returns_point_unchanged() {
        let track = wiggly_track("w", 1_000);
        let correlator = Correlator::new(
            Arc::new(Timeline::merge([track.as_ref()])),
            CorrelatorConfig::new(TimeDelta::zero()),
        );
        for point in track.points() {
            let result = correlator.correlate(point.time).unwrap();
            assert_eq!(result.confidence, Confidence::Exact);
            assert_eq!(result.geotag, Geotag::from(point));
        }
    }

    #[test]
    fn test_interpolation_stays_within_bracket() {
        let track = wiggly_track("w", 0);
        let correlator = Correlator::new(
            Arc::new(Timeline::merge([track.as_ref()])),
            CorrelatorConfig::new(TimeDelta::zero()),
        );
        for pair in track.points().windows(2) {
            let (p1, p2) = (&pair[0], &pair[1]);
            for step in 1..17 {
                let time = p1.time + TimeDelta::seconds(step);
                let geotag = correlator.correlate(time).unwrap().geotag;
                let within = |v: f64, a: f64, b: f64| v >= a.min(b) - 1e-12 && v <= a.max(b) + 1e-12;
                assert!(within(geotag.latitude, p1.latitude, p2.latitude));
                assert!(within(geotag.longitude, p1.longitude, p2.longitude));
                assert!(within(
                    geotag.elevation.unwrap(),
                    p1.elevation.unwrap(),
                    p2.elevation.unwrap()
                ));
            }
        }
    }

    #[test]
    fn test_fraction_is_monotonic() {
        let (start, end) = (at(1_000), at(1_060));
        let mut previous = -1.0;
        for ms in (0..=60_000).step_by(250) {
            let time = start + TimeDelta::milliseconds(ms);
            let fraction = interpolation_fraction(time, start, end);
            assert!(fraction >= previous);
            assert!((0.0..=1.0).contains(&fraction));
            previous = fraction;
        }
        assert_eq!(interpolation_fraction(at(5), at(0), at(0)), 0.0);
        assert_eq!(interpolation_fraction(at(-5), at(0), at(10)), 0.0);
        assert_eq!(interpolation_fraction(at(50), at(0), at(10)), 1.0);
    }

    #[test]
    fn test_fraction_below_one_millisecond() {
        let start = at(1_000);
        let end = start + TimeDelta::microseconds(800);
        let time = start + TimeDelta::microseconds(200);
        assert!((interpolation_fraction(time, start, end) - 0.25).abs() < 1e-9);

        // Bounds centuries apart still interpolate
        let far = start + TimeDelta::days(400 * 365);
        let midway = start + TimeDelta::days(200 * 365);
        assert!((interpolation_fraction(midway, start, far) - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_far_outside_tolerance_never_covered() {
        let correlator = example_correlator(10);
        for secs in [-1_000, 0, 89, 211, 10_000] {
            assert!(matches!(
                correlator.correlate(at(secs)),
                Err(Error::NoCoverage { .. })
            ));
        }
    }

    #[test]
    fn test_merge_is_order_independent() {
        let a = wiggly_track("a", 0);
        let b = wiggly_track("b", 5);
        let config = CorrelatorConfig::new(TimeDelta::seconds(30));

        let ab = Correlator::new(Arc::new(Timeline::merge([a.as_ref(), b.as_ref()])), config);
        let ba = Correlator::new(Arc::new(Timeline::merge([b.as_ref(), a.as_ref()])), config);

        let mut union: Vec<TrackPoint> = a.points().iter().chain(b.points()).copied().collect();
        union.sort_by_key(|p| p.time);
        let single = Correlator::new(
            Arc::new(Timeline::merge([Track::new("union", union).unwrap().as_ref()])),
            config,
        );

        for secs in (-40..900).step_by(7) {
            let time = at(secs);
            let expected = single.correlate(time).ok();
            assert_eq!(ab.correlate(time).ok(), expected);
            assert_eq!(ba.correlate(time).ok(), expected);
        }
    }

    #[test]
    fn test_missing_elevation_is_not_invented() {
        let p1 = TrackPoint::new(at(0), 0.0, 0.0, Some(10.0));
        let p2 = TrackPoint::new(at(10), 1.0, 1.0, None);
        assert_eq!(interpolate(&p1, &p2, 0.5).elevation, None);
    }

    #[test]
    fn test_correlate_all_keeps_per_item_outcomes() {
        let results = example_correlator(10).correlate_all([("a", at(150)), ("b", at(9_999))]);
        assert_eq!(results.len(), 2);
        assert!(results[0].1.is_ok());
        assert!(results[1].1.is_err());
    }
}
