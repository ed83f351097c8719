//! Track file parsing
//!
//! Each supported format turns a byte stream into an [`Arc<Track>`]. Individual points that
//! cannot be used (no timestamp, no coordinates) are skipped; a file fails only when it is not
//! well-formed for its format or when no usable point is left.

mod csv;
mod gpx;
mod kml;
mod tcx;

use crate::{Error, Result, Track, TrackPoint};
use chrono::{DateTime, NaiveDateTime, Utc};
use rayon::prelude::*;
use std::fmt;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Supported track file formats
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum TrackFormat {
    Gpx,
    Kml,
    Tcx,
    Csv,
}

impl TrackFormat {
    pub fn all() -> &'static [Self] {
        &[Self::Gpx, Self::Kml, Self::Tcx, Self::Csv]
    }

    /// Lowercase file extension for this format
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Gpx => "gpx",
            Self::Kml => "kml",
            Self::Tcx => "tcx",
            Self::Csv => "csv",
        }
    }

    /// Guess the format from a path's extension
    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|ext| ext.to_str())
            .and_then(|ext| ext.parse().ok())
    }

    /// Guess the format from the first bytes of a file
    ///
    /// Anything that does not look like one of the XML formats is assumed to be CSV.
    pub fn sniff(bytes: &[u8]) -> Self {
        let head = String::from_utf8_lossy(&bytes[..bytes.len().min(1024)]);
        if head.contains("<gpx") {
            Self::Gpx
        } else if head.contains("<kml") {
            Self::Kml
        } else if head.contains("<TrainingCenterDatabase") {
            Self::Tcx
        } else {
            Self::Csv
        }
    }
}

impl fmt::Display for TrackFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Gpx => "GPX",
            Self::Kml => "KML",
            Self::Tcx => "TCX",
            Self::Csv => "CSV",
        })
    }
}

impl FromStr for TrackFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::all()
            .iter()
            .copied()
            .find(|format| format.extension().eq_ignore_ascii_case(s))
            .ok_or_else(|| Error::UnknownFormat(s.to_string()))
    }
}

/// Parse a byte stream of a known format into a track
#[cfg_attr(feature = "profiling", profiling::function)]
pub fn parse_track<R: Read>(reader: R, format: TrackFormat, name: &str) -> Result<Arc<Track>> {
    let points = match format {
        TrackFormat::Gpx => gpx::parse(reader)?,
        TrackFormat::Kml => kml::parse(read_text(reader, format)?.as_str())?,
        TrackFormat::Tcx => tcx::parse(read_text(reader, format)?.as_str())?,
        TrackFormat::Csv => csv::parse(reader)?,
    };
    tracing::debug!("Parsed {} points from {} ({})", points.len(), name, format);
    Track::new(name, points)
}

/// Load one track file, detecting its format from the extension or content
#[cfg_attr(feature = "profiling", profiling::function)]
pub fn load_track_file(path: &Path) -> Result<Arc<Track>> {
    let bytes = std::fs::read(path)?;
    let format = TrackFormat::from_path(path).unwrap_or_else(|| TrackFormat::sniff(&bytes));
    let name = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    parse_track(bytes.as_slice(), format, &name)
}

/// Load track files in parallel
///
/// Results keep the order of `paths`. Files not yet started when `cancel` fires report
/// `Error::Cancelled`; files already parsed keep their result.
pub fn load_track_files(
    paths: Vec<PathBuf>,
    cancel: &CancellationToken,
) -> Vec<(PathBuf, Result<Arc<Track>>)> {
    #[cfg(feature = "profiling")]
    profiling::scope!("parser::load_track_files");

    paths
        .into_par_iter()
        .map(|path| {
            if cancel.is_cancelled() {
                return (path, Err(Error::Cancelled));
            }
            let result = load_track_file(&path);
            (path, result)
        })
        .collect()
}

fn read_text<R: Read>(mut reader: R, format: TrackFormat) -> Result<String> {
    let mut text = String::new();
    reader.read_to_string(&mut text).map_err(|e| match e.kind() {
        std::io::ErrorKind::InvalidData => Error::Parse {
            format,
            reason: "file is not valid UTF-8".to_string(),
        },
        _ => Error::Io(e),
    })?;
    Ok(text)
}

/// Parse a timestamp as written by GPS loggers
///
/// Accepts RFC 3339 (`2010-10-16T20:09:13Z`) and zone-less ISO 8601 or
/// `YYYY-MM-DD HH:MM:SS` forms, which are taken to be UTC.
pub(crate) fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    if let Ok(time) = DateTime::parse_from_rfc3339(text) {
        return Some(time.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(text, format).ok())
        .map(|naive| naive.and_utc())
}

/// Build a point if both coordinates parsed; otherwise log and skip
pub(crate) fn point_or_skip(
    time: Option<DateTime<Utc>>,
    latitude: Option<f64>,
    longitude: Option<f64>,
    elevation: Option<f64>,
    format: TrackFormat,
) -> Option<TrackPoint> {
    match (time, latitude, longitude) {
        (Some(time), Some(latitude), Some(longitude)) => {
            Some(TrackPoint::new(time, latitude, longitude, elevation))
        }
        _ => {
            tracing::debug!(
                "Skipping {} point without time or coordinates (time: {:?}, lat: {:?}, lon: {:?})",
                format,
                time,
                latitude,
                longitude
            );
            None
        }
    }
}
