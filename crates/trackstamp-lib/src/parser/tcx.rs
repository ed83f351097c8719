//! Garmin Training Center (TCX) parsing

use super::{TrackFormat, parse_timestamp, point_or_skip};
use crate::{Error, Result, TrackPoint};
use roxmltree::{Document, Node};

pub(super) fn parse(text: &str) -> Result<Vec<TrackPoint>> {
    let doc = Document::parse(text).map_err(|e| Error::Parse {
        format: TrackFormat::Tcx,
        reason: e.to_string(),
    })?;

    let root = doc.root_element();
    if root.tag_name().name() != "TrainingCenterDatabase" {
        return Err(Error::Parse {
            format: TrackFormat::Tcx,
            reason: format!("unexpected root element <{}>", root.tag_name().name()),
        });
    }

    Ok(root
        .descendants()
        .filter(|n| n.is_element() && n.tag_name().name() == "Trackpoint")
        .filter_map(parse_trackpoint)
        .collect())
}

fn parse_trackpoint(trackpoint: Node) -> Option<TrackPoint> {
    let time = child_text(trackpoint, "Time").and_then(parse_timestamp);
    let position = trackpoint
        .children()
        .find(|n| n.is_element() && n.tag_name().name() == "Position");
    let degrees = |name| {
        position
            .and_then(|p| child_text(p, name))
            .and_then(|t| t.trim().parse::<f64>().ok())
    };
    let elevation = child_text(trackpoint, "AltitudeMeters").and_then(|t| t.trim().parse().ok());

    point_or_skip(
        time,
        degrees("LatitudeDegrees"),
        degrees("LongitudeDegrees"),
        elevation,
        TrackFormat::Tcx,
    )
}

fn child_text<'a>(node: Node<'a, '_>, name: &str) -> Option<&'a str> {
    node.children()
        .find(|n| n.is_element() && n.tag_name().name() == name)
        .and_then(|n| n.text())
}
