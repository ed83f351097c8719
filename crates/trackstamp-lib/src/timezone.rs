//! Timezone resolution for camera clocks
//!
//! Cameras record wall-clock time without a zone, while GPS loggers record UTC. A
//! [`TimezonePolicy`] decides how the former is turned into the latter. Resolution never
//! fails outright: anything that goes wrong is logged and the naive time is taken as UTC.

use crate::{Error, Result, Timeline};
use chrono::{DateTime, FixedOffset, NaiveDateTime, Offset, TimeDelta, TimeZone, Utc};
use chrono_tz::Tz;

/// Largest camera clock correction accepted, in either direction
pub const MAX_CLOCK_OFFSET: TimeDelta = TimeDelta::seconds(3600);

/// How naive capture times are placed in absolute time
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TimezonePolicy {
    /// The same UTC offset for every photo
    Fixed(FixedOffset),
    /// A named IANA zone, DST-aware
    Named(Tz),
    /// The zone found at the photo's approximate position on the loaded tracks
    Lookup,
}

impl Default for TimezonePolicy {
    fn default() -> Self {
        Self::Fixed(utc_offset())
    }
}

/// Anything that can tell which timezone a coordinate lies in
pub trait ZoneLookup: Send + Sync {
    fn zone_at(&self, latitude: f64, longitude: f64) -> Option<Tz>;
}

/// A capture time as read from a photo
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(tag = "kind", content = "time", rename_all = "snake_case"))]
pub enum CaptureTime {
    /// Wall-clock time without a zone (EXIF `DateTimeOriginal`)
    Naive(NaiveDateTime),
    /// Already absolute (explicit EXIF offset, or file modification time)
    Absolute(DateTime<Utc>),
}

/// The outcome of placing a capture time in absolute time
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ResolvedTime {
    pub timestamp: DateTime<Utc>,
    /// Human-readable zone that was applied (`"+02:00"`, `"Europe/Paris"`, ...)
    pub zone: String,
    /// True when resolution failed and the zero-offset fallback was used
    pub fallback: bool,
}

/// Applies a [`TimezonePolicy`] and camera clock correction to capture times
#[derive(Clone, Debug, Default)]
pub struct TimezoneResolver {
    policy: TimezonePolicy,
    clock_offset: TimeDelta,
}

impl TimezoneResolver {
    pub fn new(policy: TimezonePolicy, clock_offset: TimeDelta) -> Self {
        Self {
            policy,
            clock_offset: clamp_clock_offset(clock_offset),
        }
    }

    #[inline]
    pub fn policy(&self) -> &TimezonePolicy {
        &self.policy
    }

    #[inline]
    pub fn clock_offset(&self) -> TimeDelta {
        self.clock_offset
    }

    /// Resolve a capture time; never fails
    ///
    /// `timeline` and `zones` are only consulted by [`TimezonePolicy::Lookup`].
    pub fn resolve(
        &self,
        capture: CaptureTime,
        timeline: &Timeline,
        zones: Option<&dyn ZoneLookup>,
    ) -> ResolvedTime {
        let resolved = match capture {
            CaptureTime::Absolute(timestamp) => Ok(ResolvedTime {
                timestamp,
                zone: "embedded".to_string(),
                fallback: false,
            }),
            CaptureTime::Naive(naive) => self.try_resolve(naive, timeline, zones),
        };

        let mut resolved = resolved.unwrap_or_else(|err| {
            tracing::warn!("{}; assuming the camera clock is UTC", err);
            let naive = match capture {
                CaptureTime::Naive(naive) => naive,
                CaptureTime::Absolute(timestamp) => timestamp.naive_utc(),
            };
            ResolvedTime {
                timestamp: naive.and_utc(),
                zone: "+00:00".to_string(),
                fallback: true,
            }
        });
        resolved.timestamp += self.clock_offset;
        resolved
    }

    fn try_resolve(
        &self,
        naive: NaiveDateTime,
        timeline: &Timeline,
        zones: Option<&dyn ZoneLookup>,
    ) -> Result<ResolvedTime> {
        match &self.policy {
            TimezonePolicy::Fixed(offset) => localize(offset, naive, offset.to_string()),
            TimezonePolicy::Named(tz) => localize(tz, naive, tz.name().to_string()),
            TimezonePolicy::Lookup => {
                let zones = zones.ok_or_else(|| {
                    Error::TimezoneResolution("no place dataset loaded for lookup".to_string())
                })?;
                // Approximate the position by pretending the camera was on UTC, then
                // resolve again in the zone found there
                let near = timeline
                    .nearest(naive.and_utc() + self.clock_offset)
                    .ok_or_else(|| {
                        Error::TimezoneResolution("no track loaded to locate photo".to_string())
                    })?;
                let tz = zones.zone_at(near.latitude, near.longitude).ok_or_else(|| {
                    Error::TimezoneResolution(format!(
                        "no timezone known near {:.4}, {:.4}",
                        near.latitude, near.longitude
                    ))
                })?;
                localize(&tz, naive, tz.name().to_string())
            }
        }
    }
}

/// Place a wall-clock time in a zone; ambiguous times take the earlier instant
fn localize<Z: TimeZone>(zone: &Z, naive: NaiveDateTime, name: String) -> Result<ResolvedTime> {
    let local = zone.from_local_datetime(&naive).earliest().ok_or_else(|| {
        Error::TimezoneResolution(format!("{} does not exist in {}", naive, name))
    })?;
    Ok(ResolvedTime {
        timestamp: local.with_timezone(&Utc),
        zone: name,
        fallback: false,
    })
}

fn utc_offset() -> FixedOffset {
    Utc.fix()
}

fn clamp_clock_offset(offset: TimeDelta) -> TimeDelta {
    if offset.abs() > MAX_CLOCK_OFFSET {
        tracing::warn!(
            "Clock offset of {}s exceeds {}s, clamping",
            offset.num_seconds(),
            MAX_CLOCK_OFFSET.num_seconds()
        );
    }
    offset.clamp(-MAX_CLOCK_OFFSET, MAX_CLOCK_OFFSET)
}

/// Parse a UTC offset such as `+02:00`, `-0530`, `3` or `Z`
pub fn parse_utc_offset(text: &str) -> Result<FixedOffset> {
    let text = text.trim();
    let invalid = || Error::TimezoneResolution(format!("invalid UTC offset '{}'", text));
    if text.eq_ignore_ascii_case("z") || text.eq_ignore_ascii_case("utc") {
        return Ok(utc_offset());
    }

    let (sign, digits) = match text.as_bytes().first() {
        Some(b'-') => (-1, &text[1..]),
        Some(b'+') => (1, &text[1..]),
        _ => (1, text),
    };
    let (hours, minutes) = match digits.split_once(':') {
        Some((h, m)) => (h, m),
        None if digits.len() == 4 => digits.split_at(2),
        None => (digits, "0"),
    };
    let hours: i32 = hours.parse().map_err(|_| invalid())?;
    let minutes: i32 = minutes.parse().map_err(|_| invalid())?;
    if !(0..60).contains(&minutes) {
        return Err(invalid());
    }
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60)).ok_or_else(invalid)
}

/// Parse an IANA zone name such as `America/Edmonton`
pub fn parse_zone(name: &str) -> Result<Tz> {
    name.trim()
        .parse::<Tz>()
        .map_err(|_| Error::TimezoneResolution(format!("unknown timezone '{}'", name)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Track, TrackPoint};
    use chrono::NaiveDate;

    struct FixedZones(Option<Tz>);

    impl ZoneLookup for FixedZones {
        fn zone_at(&self, _latitude: f64, _longitude: f64) -> Option<Tz> {
            self.0
        }
    }

    fn naive(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2010, 10, 16)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    fn edmonton_timeline() -> Timeline {
        let track = Track::new(
            "edmonton",
            vec![TrackPoint::new(
                naive(20, 0).and_utc(),
                53.53,
                -113.45,
                None,
            )],
        )
        .unwrap();
        Timeline::merge([track.as_ref()])
    }

    #[test]
    fn test_fixed_offset() {
        let resolver =
            TimezoneResolver::new(TimezonePolicy::Fixed(parse_utc_offset("-06:00").unwrap()), TimeDelta::zero());
        let resolved = resolver.resolve(CaptureTime::Naive(naive(14, 9)), &Timeline::default(), None);

        assert_eq!(resolved.timestamp, naive(20, 9).and_utc());
        assert!(!resolved.fallback);
    }

    #[test]
    fn test_named_zone_respects_dst() {
        let resolver = TimezoneResolver::new(
            TimezonePolicy::Named(parse_zone("America/Edmonton").unwrap()),
            TimeDelta::zero(),
        );
        // Mid-October: Mountain Daylight Time, UTC-6
        let resolved = resolver.resolve(CaptureTime::Naive(naive(14, 9)), &Timeline::default(), None);
        assert_eq!(resolved.timestamp, naive(20, 9).and_utc());
        assert_eq!(resolved.zone, "America/Edmonton");
    }

    #[test]
    fn test_lookup_uses_zone_near_track() {
        let resolver = TimezoneResolver::new(TimezonePolicy::Lookup, TimeDelta::zero());
        let zones = FixedZones(Some(chrono_tz::America::Edmonton));
        let resolved = resolver.resolve(
            CaptureTime::Naive(naive(14, 9)),
            &edmonton_timeline(),
            Some(&zones),
        );
        assert_eq!(resolved.timestamp, naive(20, 9).and_utc());
        assert!(!resolved.fallback);
    }

    #[test]
    fn test_lookup_failures_fall_back_to_utc() {
        let resolver = TimezoneResolver::new(TimezonePolicy::Lookup, TimeDelta::zero());
        let capture = CaptureTime::Naive(naive(14, 9));

        let no_dataset = resolver.resolve(capture, &edmonton_timeline(), None);
        assert!(no_dataset.fallback);
        assert_eq!(no_dataset.timestamp, naive(14, 9).and_utc());

        let zones = FixedZones(Some(chrono_tz::America::Edmonton));
        let no_track = resolver.resolve(capture, &Timeline::default(), Some(&zones));
        assert!(no_track.fallback);

        let unknown = resolver.resolve(capture, &edmonton_timeline(), Some(&FixedZones(None)));
        assert!(unknown.fallback);
    }

    #[test]
    fn test_nonexistent_local_time_falls_back() {
        let resolver = TimezoneResolver::new(
            TimezonePolicy::Named(chrono_tz::America::Edmonton),
            TimeDelta::zero(),
        );
        // Clocks jumped from 02:00 to 03:00 on 2010-03-14
        let gap = NaiveDate::from_ymd_opt(2010, 3, 14)
            .unwrap()
            .and_hms_opt(2, 30, 0)
            .unwrap();
        let resolved = resolver.resolve(CaptureTime::Naive(gap), &Timeline::default(), None);
        assert!(resolved.fallback);
        assert_eq!(resolved.timestamp, gap.and_utc());
    }

    #[test]
    fn test_clock_offset_applies_to_every_capture() {
        let resolver = TimezoneResolver::new(TimezonePolicy::default(), TimeDelta::seconds(90));
        let naive_result =
            resolver.resolve(CaptureTime::Naive(naive(10, 0)), &Timeline::default(), None);
        assert_eq!(naive_result.timestamp, naive(10, 0).and_utc() + TimeDelta::seconds(90));

        let absolute = naive(12, 0).and_utc();
        let absolute_result =
            resolver.resolve(CaptureTime::Absolute(absolute), &Timeline::default(), None);
        assert_eq!(absolute_result.timestamp, absolute + TimeDelta::seconds(90));
    }

    #[test]
    fn test_clock_offset_is_clamped() {
        let resolver = TimezoneResolver::new(TimezonePolicy::default(), TimeDelta::seconds(7200));
        assert_eq!(resolver.clock_offset(), MAX_CLOCK_OFFSET);
    }

    #[test]
    fn test_parse_utc_offset() {
        assert_eq!(parse_utc_offset("+02:00").unwrap().local_minus_utc(), 7200);
        assert_eq!(parse_utc_offset("-0530").unwrap().local_minus_utc(), -19800);
        assert_eq!(parse_utc_offset("3").unwrap().local_minus_utc(), 10800);
        assert_eq!(parse_utc_offset("Z").unwrap().local_minus_utc(), 0);
        assert!(parse_utc_offset("+02:75").is_err());
        assert!(parse_utc_offset("nope").is_err());
        assert!(parse_zone("Mars/Olympus").is_err());
    }
}
