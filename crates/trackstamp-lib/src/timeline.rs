//! Merged, time-sorted view over every loaded track
//!
//! Several files frequently belong to the same journey (one per day, one per device), so
//! photos are resolved against the union of all of them rather than file by file.

use crate::{Track, TrackPoint};
use chrono::{DateTime, Utc};

/// Where a timestamp falls relative to the timeline
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Position {
    /// No points loaded
    Empty,
    /// Strictly before the first point
    Before,
    /// Strictly after the last point
    After,
    /// A point has exactly this timestamp (first such point in merge order)
    Exact(usize),
    /// Strictly between the points at `lo` and `lo + 1`
    Between(usize),
}

/// All track points merged into a single sequence sorted by time
///
/// Built once per set of loaded tracks and never mutated afterwards.
#[derive(Clone, Debug, Default)]
pub struct Timeline {
    points: Vec<TrackPoint>,
}

#[cfg_attr(feature = "profiling", profiling::all_functions)]
impl Timeline {
    /// Merge tracks given in load order
    ///
    /// The sort is stable: points sharing a timestamp keep the order of the files that
    /// provided them.
    pub fn merge<'a>(tracks: impl IntoIterator<Item = &'a Track>) -> Self {
        #[cfg(feature = "profiling")]
        profiling::scope!("timeline::merge");

        let mut points: Vec<TrackPoint> = tracks
            .into_iter()
            .flat_map(|track| track.points().iter().copied())
            .collect();
        points.sort_by_key(|p| p.time);
        Self { points }
    }

    /// Get all merged points
    #[inline]
    pub fn points(&self) -> &[TrackPoint] {
        &self.points
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    #[inline]
    pub fn first(&self) -> Option<&TrackPoint> {
        self.points.first()
    }

    #[inline]
    pub fn last(&self) -> Option<&TrackPoint> {
        self.points.last()
    }

    /// Locate a timestamp with a binary search
    pub fn locate(&self, time: DateTime<Utc>) -> Position {
        let (Some(first), Some(last)) = (self.points.first(), self.points.last()) else {
            return Position::Empty;
        };
        if time < first.time {
            return Position::Before;
        }
        if time > last.time {
            return Position::After;
        }

        // Index of the first point not earlier than `time`; in range because time <= last
        let idx = self.points.partition_point(|p| p.time < time);
        if self.points[idx].time == time {
            Position::Exact(idx)
        } else {
            // time > first.time here, so idx >= 1
            Position::Between(idx - 1)
        }
    }

    /// Point closest in time, clamped to the ends of the timeline
    pub fn nearest(&self, time: DateTime<Utc>) -> Option<&TrackPoint> {
        match self.locate(time) {
            Position::Empty => None,
            Position::Before => self.first(),
            Position::After => self.last(),
            Position::Exact(idx) => self.points.get(idx),
            Position::Between(lo) => {
                let (a, b) = (&self.points[lo], &self.points[lo + 1]);
                if time - a.time <= b.time - time {
                    Some(a)
                } else {
                    Some(b)
                }
            }
        }
    }
}
