//! Human and machine readable run reports

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use trackstamp_lib::coords::{format_altitude, format_coords};
use trackstamp_lib::{ApplySummary, Confidence, Geotag, GeotagSource, Photo, Place, Track};

/// Everything a run did, in input order for tracks and path order for photos
#[derive(Debug, Default, Serialize)]
pub struct Report {
    pub tracks: Vec<TrackEntry>,
    pub photos: Vec<PhotoEntry>,
    /// Files that are neither a known track format nor a photo
    pub ignored: Vec<PathBuf>,
    pub summary: ApplySummary,
    pub cancelled: bool,
}

#[derive(Debug, Serialize)]
pub struct TrackEntry {
    pub path: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub points: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TrackEntry {
    pub fn loaded(path: PathBuf, track: &Track) -> Self {
        let (start, end) = track.time_range();
        Self {
            path,
            points: Some(track.len()),
            start: Some(start),
            end: Some(end),
            error: None,
        }
    }

    pub fn failed(path: PathBuf, error: &trackstamp_lib::Error) -> Self {
        Self {
            path,
            points: None,
            start: None,
            end: None,
            error: Some(error.to_string()),
        }
    }
}

/// Outcome for one photo
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PhotoStatus {
    Exact,
    Interpolated,
    /// Outside every track's time range (plus tolerance)
    Uncovered,
    /// Already geotagged and left alone
    Existing,
    Manual,
    NoTimestamp,
    /// Not reached before cancellation
    Skipped,
    Unreadable,
}

#[derive(Debug, Serialize)]
pub struct PhotoEntry {
    pub path: PathBuf,
    pub status: PhotoStatus,
    /// Key for `--camera-offset`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub camera: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    /// Zone the capture time was interpreted in
    #[serde(skip_serializing_if = "Option::is_none")]
    pub zone: Option<String>,
    /// The camera time could not be interpreted as configured and was taken as UTC
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub timezone_fallback: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub geotag: Option<Geotag>,
    #[serde(skip_serializing_if = "Place::is_empty")]
    pub place: Place,
    pub saved: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PhotoEntry {
    pub fn new(photo: &Photo, summary: &ApplySummary) -> Self {
        let status = if summary.uncovered.iter().any(|p| p == photo.path()) {
            PhotoStatus::Uncovered
        } else {
            match photo.source() {
                Some(GeotagSource::Correlated(Confidence::Exact)) => PhotoStatus::Exact,
                Some(GeotagSource::Correlated(Confidence::Interpolated)) => {
                    PhotoStatus::Interpolated
                }
                Some(GeotagSource::Manual) => PhotoStatus::Manual,
                Some(GeotagSource::Existing) => PhotoStatus::Existing,
                None if photo.timestamp().is_none() => PhotoStatus::NoTimestamp,
                None => PhotoStatus::Skipped,
            }
        };
        let resolved = photo.resolved();
        Self {
            path: photo.path().to_path_buf(),
            status,
            camera: photo.camera().map(str::to_string),
            timestamp: photo.timestamp(),
            zone: resolved.map(|r| r.zone.clone()),
            timezone_fallback: resolved.is_some_and(|r| r.fallback),
            geotag: photo.geotag().copied(),
            place: photo.place().clone(),
            saved: false,
            error: None,
        }
    }

    pub fn unreadable(path: PathBuf, error: &trackstamp_lib::Error) -> Self {
        Self {
            path,
            status: PhotoStatus::Unreadable,
            camera: None,
            timestamp: None,
            zone: None,
            timezone_fallback: false,
            geotag: None,
            place: Place::default(),
            saved: false,
            error: Some(error.to_string()),
        }
    }
}

impl Report {
    pub fn saved(&self) -> usize {
        self.photos.iter().filter(|p| p.saved).count()
    }

    /// Photos whose requested write failed
    pub fn failed_writes(&self) -> usize {
        self.photos
            .iter()
            .filter(|p| p.status != PhotoStatus::Unreadable && p.error.is_some())
            .count()
    }

    /// Only failed writes make a run unsuccessful
    pub fn exit_code(&self) -> ExitCode {
        if self.failed_writes() > 0 {
            ExitCode::FAILURE
        } else {
            ExitCode::SUCCESS
        }
    }

    pub fn write_json<W: Write>(&self, mut out: W) -> io::Result<()> {
        serde_json::to_writer_pretty(&mut out, self)?;
        writeln!(out)
    }

    pub fn write_text<W: Write>(&self, mut out: W) -> io::Result<()> {
        if !self.tracks.is_empty() {
            writeln!(out, "Tracks:")?;
        }
        for track in &self.tracks {
            match (&track.error, track.points, track.start, track.end) {
                (Some(error), ..) => writeln!(out, "  {}: {}", track.path.display(), error)?,
                (None, Some(points), Some(start), Some(end)) => writeln!(
                    out,
                    "  {}: {} points, {} to {}",
                    track.path.display(),
                    points,
                    start.format("%Y-%m-%d %H:%M:%S"),
                    end.format("%Y-%m-%d %H:%M:%S UTC")
                )?,
                _ => writeln!(out, "  {}", track.path.display())?,
            }
        }

        if !self.photos.is_empty() {
            writeln!(out, "Photos:")?;
        }
        for photo in &self.photos {
            write!(out, "  {}: {}", photo.path.display(), status_label(photo.status))?;
            if let Some(geotag) = &photo.geotag {
                write!(out, ", {}", format_coords(geotag.latitude, geotag.longitude))?;
                if let Some(elevation) = geotag.elevation {
                    write!(out, ", {}", format_altitude(elevation))?;
                }
            }
            if !photo.place.is_empty() {
                write!(out, " ({})", photo.place)?;
            }
            if photo.timezone_fallback {
                write!(out, " [camera time taken as UTC]")?;
            }
            if photo.saved {
                write!(out, " [saved]")?;
            }
            if let Some(error) = &photo.error {
                write!(out, ": {}", error)?;
            }
            writeln!(out)?;
        }

        for path in &self.ignored {
            writeln!(out, "Ignored {}", path.display())?;
        }

        writeln!(
            out,
            "{} correlated ({} exact, {} interpolated), {} uncovered, {} saved, {} failed to save",
            self.summary.correlated(),
            self.summary.exact,
            self.summary.interpolated,
            self.summary.uncovered.len(),
            self.saved(),
            self.failed_writes()
        )?;
        if self.cancelled {
            writeln!(out, "Cancelled; results above are partial")?;
        }
        Ok(())
    }
}

fn status_label(status: PhotoStatus) -> &'static str {
    match status {
        PhotoStatus::Exact => "exact",
        PhotoStatus::Interpolated => "interpolated",
        PhotoStatus::Uncovered => "no track coverage",
        PhotoStatus::Existing => "already geotagged",
        PhotoStatus::Manual => "placed manually",
        PhotoStatus::NoTimestamp => "no capture time",
        PhotoStatus::Skipped => "skipped",
        PhotoStatus::Unreadable => "unreadable",
    }
}
