//! Trackstamp Library - Geotagging Photos from GPS Tracks
//!
//! This library binds GPS track data to photo capture timestamps. Tracks are parsed from
//! GPX, KML, TCX or CSV files, merged into a single time-sorted [`Timeline`], and every photo
//! is assigned a position by exact match or linear interpolation between the two track points
//! that bracket its capture time.
//!
//! # Architecture
//!
//! - **[`Track`]**: Immutable, time-sorted points parsed from one file
//! - **[`Timeline`]**: All loaded tracks merged for O(log N) lookups
//! - **[`Correlator`]**: Turns a timestamp into an [`Assignment`] or a `NoCoverage` error
//! - **[`TimezoneResolver`]**: Converts naive camera clocks into absolute UTC timestamps
//! - **[`MetadataBridge`]**: Reads capture times and writes geotags (EXIF + IPTC)
//! - **[`ReverseGeocoder`]**: Resolves coordinates into city, region and country names
//! - **[`Session`]**: Explicit context tying tracks, photos and configuration together
//! - **[`worker`]**: Background, cancellable batch operations
//!
//! # Failure Model
//!
//! Batches never abort on a single item: every track file, photo read, correlation and write
//! produces its own [`Result`], so one corrupt file only affects itself.

pub mod coords;
mod correlate;
pub mod geocode;
pub mod metadata;
pub mod parser;
mod photo;
mod session;
mod timeline;
mod timezone;
mod track;
pub mod worker;

// Public API exports
pub use correlate::{Assignment, Confidence, Correlator, CorrelatorConfig, Geotag};
pub use geocode::{Place, ReverseGeocoder};
pub use metadata::{ExifBridge, MetadataBridge, WriteError};
pub use parser::TrackFormat;
pub use photo::{GeotagSource, Photo};
pub use session::{
    ApplySummary, CameraSettings, Command, CorrelationJob, CorrelationOutcome, Event, Session,
    SessionConfig,
};
pub use timeline::{Position as TimelinePosition, Timeline};
pub use timezone::{
    CaptureTime, ResolvedTime, TimezonePolicy, TimezoneResolver, ZoneLookup, parse_utc_offset,
    parse_zone,
};
pub use track::{Track, TrackPoint};

use chrono::{DateTime, TimeDelta, Utc};
use std::path::PathBuf;

/// Error types for the library
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Failed to parse {format} track: {reason}")]
    Parse { format: TrackFormat, reason: String },

    #[error("Track contains no usable points")]
    EmptyTrack,

    #[error("No track covers {timestamp}{}", fmt_gap(.gap))]
    NoCoverage {
        timestamp: DateTime<Utc>,
        /// Distance to the nearest track endpoint, `None` when nothing is loaded
        gap: Option<TimeDelta>,
    },

    #[error("Failed to write geotag to {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: WriteError,
    },

    #[error("Timezone resolution failed: {0}")]
    TimezoneResolution(String),

    #[error("Metadata error: {0}")]
    Metadata(#[from] exif::Error),

    #[error("Reverse geocoding failed: {0}")]
    Geocode(String),

    #[error("Unknown track format: {0}")]
    UnknownFormat(String),

    #[error("Photo is not in the session: {}", .0.display())]
    UnknownPhoto(PathBuf),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

fn fmt_gap(gap: &Option<TimeDelta>) -> String {
    match gap {
        Some(gap) => format!(" (nearest point is {}s away)", gap.num_seconds().abs()),
        None => " (no tracks loaded)".to_string(),
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_exports() {
        // Verify that all public types are accessible
        let _: fn(SessionConfig) -> Session = Session::new;
        let _: fn(TimeDelta) -> CorrelatorConfig = CorrelatorConfig::new;
    }

    #[test]
    fn test_no_coverage_message() {
        let timestamp = DateTime::from_timestamp(500, 0).unwrap();
        let err = Error::NoCoverage {
            timestamp,
            gap: Some(TimeDelta::seconds(300)),
        };
        assert!(err.to_string().contains("300s"));

        let err = Error::NoCoverage {
            timestamp,
            gap: None,
        };
        assert!(err.to_string().contains("no tracks loaded"));
    }
}
