use chrono::{FixedOffset, TimeDelta};
use chrono_tz::Tz;
use clap::{Parser, ValueEnum};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;
use trackstamp_lib::{CameraSettings, TimezonePolicy, parse_utc_offset, parse_zone};

/// Where place names for geotagged photos come from
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum GeocoderKind {
    /// Do not look up place names
    None,
    /// Nearest city from the `--places` dataset
    Local,
    /// OpenStreetMap Nominatim over HTTP
    Nominatim,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum ReportFormat {
    Text,
    Json,
}

#[derive(Parser, Debug, Clone)]
#[clap(author, version, about, long_about = None)]
/// Trackstamp - Geotag photos by matching their capture times against GPS tracks
pub struct Settings {
    /// Track files (GPX, KML, TCX, CSV) and photos, classified by extension
    #[clap(required = true, value_name = "FILE")]
    pub files: Vec<PathBuf>,

    /// Largest gap in seconds between a photo and the nearest track point
    #[clap(short, long, value_name = "SECONDS", value_parser = parse_tolerance)]
    pub tolerance: TimeDelta,

    /// Fixed UTC offset of the camera clock, e.g. +02:00
    #[clap(long, value_name = "OFFSET", value_parser = parse_utc_offset_arg,
        conflicts_with_all = ["timezone", "lookup_timezone"], allow_hyphen_values = true)]
    pub utc_offset: Option<FixedOffset>,

    /// IANA timezone of the camera clock, e.g. America/Edmonton
    #[clap(long, value_name = "ZONE", value_parser = parse_zone_arg,
        conflicts_with = "lookup_timezone")]
    pub timezone: Option<Tz>,

    /// Take the camera timezone from where the track was at capture time (needs --places)
    #[clap(long, default_value = "false", requires = "places")]
    pub lookup_timezone: bool,

    /// Seconds to add to every capture time to correct a drifting camera clock
    #[clap(long, value_name = "SECONDS", default_value = "0", allow_negative_numbers = true)]
    pub clock_offset: i64,

    /// Clock correction for one camera instead of --clock-offset (repeatable). Camera IDs
    /// are listed in the JSON report.
    #[clap(long = "camera-offset", value_name = "CAMERA=SECONDS",
        value_parser = parse_camera_offset, allow_hyphen_values = true)]
    pub camera_offsets: Vec<(String, i64)>,

    /// Tab-separated city dataset used for place names and timezone lookups
    #[clap(long, value_name = "FILE")]
    pub places: Option<PathBuf>,

    /// Reverse geocoder used to name places
    #[clap(long, value_enum, default_value = "none")]
    pub geocoder: GeocoderKind,

    /// Nominatim server
    #[clap(long, value_name = "URL")]
    pub nominatim_url: Option<String>,

    /// User agent sent to Nominatim
    #[clap(long)]
    pub user_agent: Option<String>,

    /// Seconds to wait for each reverse geocoding request
    #[clap(long, value_name = "SECONDS", default_value = "10")]
    pub geocode_timeout: u64,

    /// Reverse geocoding requests in flight at once
    #[clap(long, default_value = "4")]
    pub concurrency: usize,

    /// Write geotags and place names into the photos
    #[clap(short, long, default_value = "false")]
    pub write: bool,

    /// Leave photos that already carry a geotag untouched
    #[clap(long, default_value = "false")]
    pub keep_existing: bool,

    /// Report format
    #[clap(long, value_enum, default_value = "text")]
    pub format: ReportFormat,
}

impl Settings {
    pub fn from_cli() -> Self {
        Self::parse()
    }

    pub fn timezone_policy(&self) -> TimezonePolicy {
        if self.lookup_timezone {
            TimezonePolicy::Lookup
        } else if let Some(zone) = self.timezone {
            TimezonePolicy::Named(zone)
        } else if let Some(offset) = self.utc_offset {
            TimezonePolicy::Fixed(offset)
        } else {
            TimezonePolicy::default()
        }
    }

    pub fn clock_offset(&self) -> TimeDelta {
        TimeDelta::seconds(self.clock_offset)
    }

    /// Per-camera overrides; a camera given twice keeps the last offset
    pub fn cameras(&self) -> BTreeMap<String, CameraSettings> {
        self.camera_offsets
            .iter()
            .map(|(camera, seconds)| {
                let settings = CameraSettings {
                    timezone: None,
                    clock_offset: Some(TimeDelta::seconds(*seconds)),
                };
                (camera.clone(), settings)
            })
            .collect()
    }

    pub fn geocode_timeout(&self) -> Duration {
        Duration::from_secs(self.geocode_timeout)
    }
}

fn parse_tolerance(text: &str) -> Result<TimeDelta, String> {
    let seconds: u32 = text
        .parse()
        .map_err(|_| format!("expected a whole number of seconds, got {text:?}"))?;
    Ok(TimeDelta::seconds(seconds.into()))
}

fn parse_camera_offset(text: &str) -> Result<(String, i64), String> {
    let (camera, seconds) = text
        .rsplit_once('=')
        .ok_or_else(|| format!("expected CAMERA=SECONDS, got {text:?}"))?;
    let camera = camera.trim();
    if camera.is_empty() {
        return Err(format!("missing camera ID in {text:?}"));
    }
    let seconds = seconds
        .trim()
        .parse()
        .map_err(|_| format!("expected a whole number of seconds, got {seconds:?}"))?;
    Ok((camera.to_string(), seconds))
}

fn parse_utc_offset_arg(text: &str) -> Result<FixedOffset, String> {
    parse_utc_offset(text).map_err(|e| e.to_string())
}

fn parse_zone_arg(text: &str) -> Result<Tz, String> {
    parse_zone(text).map_err(|e| e.to_string())
}
