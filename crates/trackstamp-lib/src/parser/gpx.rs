//! GPX track parsing

use super::{TrackFormat, point_or_skip};
use crate::{Error, Result, TrackPoint};
use chrono::{DateTime, Utc};
use std::io::Read;

/// Collect every `trk/trkseg/trkpt` of a GPX document
pub(super) fn parse<R: Read>(reader: R) -> Result<Vec<TrackPoint>> {
    let gpx = ::gpx::read(reader).map_err(|e| Error::Parse {
        format: TrackFormat::Gpx,
        reason: e.to_string(),
    })?;

    let points = gpx
        .tracks
        .iter()
        .flat_map(|track| &track.segments)
        .flat_map(|segment| &segment.points)
        .filter_map(|waypoint| {
            let point = waypoint.point();
            point_or_skip(
                waypoint.time.clone().and_then(to_utc),
                Some(point.y()),
                Some(point.x()),
                waypoint.elevation,
                TrackFormat::Gpx,
            )
        })
        .collect();
    Ok(points)
}

/// `None` when the instant is outside chrono's range; the point is then skipped rather
/// than pinned to the epoch
fn to_utc(stamp: ::gpx::Time) -> Option<DateTime<Utc>> {
    let stamp = time::OffsetDateTime::from(stamp);
    unix_to_utc(stamp.unix_timestamp(), stamp.nanosecond())
}

fn unix_to_utc(seconds: i64, nanos: u32) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(seconds, nanos)
}
