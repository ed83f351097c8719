//! CSV track parsing
//!
//! Exports such as Google's MyTracks start with a free-form preamble, so rows are skipped until
//! one looks like a header naming latitude, longitude and time columns.

use super::{TrackFormat, parse_timestamp, point_or_skip};
use crate::{Error, Result, TrackPoint};
use chrono::{DateTime, Utc};
use std::io::Read;

/// Epoch values above this are taken to be milliseconds
const EPOCH_MILLIS_THRESHOLD: f64 = 1e11;

/// Column positions found in the header row
#[derive(Debug, Clone, Copy)]
struct Columns {
    latitude: usize,
    longitude: usize,
    time: usize,
    elevation: Option<usize>,
}

impl Columns {
    fn detect(header: &::csv::StringRecord) -> Option<Self> {
        let find = |matches: fn(&str) -> bool| {
            header
                .iter()
                .position(|name| matches(name.trim().to_ascii_lowercase().as_str()))
        };
        Some(Self {
            latitude: find(|n| n.starts_with("lat"))?,
            longitude: find(|n| n.starts_with("lon") || n.starts_with("lng"))?,
            time: find(|n| n.contains("time") || n == "date")?,
            elevation: find(|n| n.starts_with("alt") || n.starts_with("ele")),
        })
    }
}

pub(super) fn parse<R: Read>(reader: R) -> Result<Vec<TrackPoint>> {
    let mut reader = ::csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(::csv::Trim::All)
        .from_reader(reader);

    let mut columns: Option<Columns> = None;
    let mut points = Vec::new();

    for record in reader.records() {
        let record = record.map_err(|e| Error::Parse {
            format: TrackFormat::Csv,
            reason: e.to_string(),
        })?;

        let Some(cols) = columns else {
            columns = Columns::detect(&record);
            continue;
        };

        let number = |idx: usize| record.get(idx).and_then(|v| v.parse::<f64>().ok());
        let time = record.get(cols.time).and_then(parse_csv_timestamp);
        points.extend(point_or_skip(
            time,
            number(cols.latitude),
            number(cols.longitude),
            cols.elevation.and_then(number),
            TrackFormat::Csv,
        ));
    }

    if columns.is_none() {
        return Err(Error::Parse {
            format: TrackFormat::Csv,
            reason: "no header row with latitude, longitude and time columns".to_string(),
        });
    }
    Ok(points)
}

/// Textual timestamps, or epoch seconds (milliseconds for large values)
fn parse_csv_timestamp(text: &str) -> Option<DateTime<Utc>> {
    if let Some(time) = parse_timestamp(text) {
        return Some(time);
    }
    let epoch = text.trim().parse::<f64>().ok().filter(|v| v.is_finite())?;
    let millis = if epoch.abs() > EPOCH_MILLIS_THRESHOLD {
        epoch
    } else {
        epoch * 1000.0
    };
    DateTime::from_timestamp_millis(millis.round() as i64)
}
