//! KML track parsing
//!
//! Two shapes carry timestamps: `gx:Track` elements, which list `when` and `gx:coord`
//! children as parallel arrays, and `Placemark`s with a `TimeStamp` and a `Point`.

use super::{TrackFormat, parse_timestamp, point_or_skip};
use crate::{Error, Result, TrackPoint};
use roxmltree::{Document, Node};

pub(super) fn parse(text: &str) -> Result<Vec<TrackPoint>> {
    let doc = Document::parse(text).map_err(|e| Error::Parse {
        format: TrackFormat::Kml,
        reason: e.to_string(),
    })?;

    let root = doc.root_element();
    if root.tag_name().name() != "kml" {
        return Err(Error::Parse {
            format: TrackFormat::Kml,
            reason: format!("unexpected root element <{}>", root.tag_name().name()),
        });
    }

    let mut points = Vec::new();
    for node in root.descendants().filter(Node::is_element) {
        match node.tag_name().name() {
            "Track" => points.extend(parse_gx_track(node)),
            "Placemark" => points.extend(parse_placemark(node)),
            _ => {}
        }
    }
    Ok(points)
}

/// Pair the n-th `when` with the n-th `gx:coord`
fn parse_gx_track(track: Node) -> Vec<TrackPoint> {
    let whens = track
        .children()
        .filter(|n| is(*n, "when"))
        .map(|n| n.text().and_then(parse_timestamp));
    let coords = track
        .children()
        .filter(|n| is(*n, "coord"))
        .map(|n| n.text().map(|t| split_coords(t, char::is_whitespace)));

    whens
        .zip(coords)
        .filter_map(|(time, coord)| {
            let (lon, lat, ele) = coord.unwrap_or_default();
            point_or_skip(time, lat, lon, ele, TrackFormat::Kml)
        })
        .collect()
}

/// A single timestamped `Point` placemark
fn parse_placemark(placemark: Node) -> Option<TrackPoint> {
    let time = placemark
        .children()
        .find(|n| is(*n, "TimeStamp"))?
        .children()
        .find(|n| is(*n, "when"))
        .and_then(|n| n.text())
        .and_then(parse_timestamp);
    let coordinates = placemark
        .children()
        .find(|n| is(*n, "Point"))?
        .children()
        .find(|n| is(*n, "coordinates"))
        .and_then(|n| n.text());
    let (lon, lat, ele) = coordinates
        .map(|t| split_coords(t.trim(), |c| c == ','))
        .unwrap_or_default();
    point_or_skip(time, lat, lon, ele, TrackFormat::Kml)
}

/// Match on the local name, ignoring the `gx:` and default namespaces
fn is(node: Node, name: &str) -> bool {
    node.is_element() && node.tag_name().name() == name
}

/// KML orders coordinates as longitude, latitude, altitude
fn split_coords(
    text: &str,
    separator: fn(char) -> bool,
) -> (Option<f64>, Option<f64>, Option<f64>) {
    let mut values = text
        .split(separator)
        .filter(|s| !s.is_empty())
        .map(|s| s.trim().parse::<f64>().ok());
    (
        values.next().flatten(),
        values.next().flatten(),
        values.next().flatten(),
    )
}
