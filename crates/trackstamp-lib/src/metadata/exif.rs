//! EXIF/IPTC metadata bridge backed by kamadak-exif

use super::jpeg::{self, EXIF_PREFIX};
use super::{MetadataBridge, WriteError, iptc};
use crate::{CaptureTime, Geotag, Place, Result, coords, parse_utc_offset};
use ::exif::experimental::Writer;
use ::exif::{Context, Exif, Field, In, Rational, Tag, Value};
use chrono::{DateTime, NaiveDateTime, TimeDelta, Utc};
use std::fs::{self, File};
use std::io::{self, BufReader, Cursor, Write};
use std::path::Path;

const EXIF_DATE_FORMAT: &str = "%Y:%m:%d %H:%M:%S";

/// Altitude is stored in millimetres
const ALTITUDE_DENOMINATOR: u32 = 1000;

/// Date tags in order of preference, with their sub-second and offset companions
const DATE_TAGS: [(Tag, Tag, Tag); 3] = [
    (
        Tag::DateTimeOriginal,
        Tag::SubSecTimeOriginal,
        Tag::OffsetTimeOriginal,
    ),
    (
        Tag::DateTimeDigitized,
        Tag::SubSecTimeDigitized,
        Tag::OffsetTimeDigitized,
    ),
    (Tag::DateTime, Tag::SubSecTime, Tag::OffsetTime),
];

/// DNG `CameraSerialNumber`, which kamadak-exif has no name for
const CAMERA_SERIAL_NUMBER: Tag = Tag(Context::Tiff, 0xC62F);

/// Tags the writer derives from the layout it produces
const LAYOUT_TAGS: [Tag; 9] = [
    Tag::ExifIFDPointer,
    Tag::GPSInfoIFDPointer,
    Tag::InteropIFDPointer,
    Tag::StripOffsets,
    Tag::StripByteCounts,
    Tag::TileOffsets,
    Tag::TileByteCounts,
    Tag::JPEGInterchangeFormat,
    Tag::JPEGInterchangeFormatLength,
];

/// Reads EXIF from JPEG, TIFF, HEIF, PNG and WebP; writes JPEG
#[derive(Clone, Copy, Debug, Default)]
pub struct ExifBridge;

#[cfg_attr(feature = "profiling", profiling::all_functions)]
impl MetadataBridge for ExifBridge {
    fn read_capture_timestamp(&self, path: &Path) -> Result<CaptureTime> {
        if let Some(capture) = read_exif(path)?.as_ref().and_then(capture_time) {
            return Ok(capture);
        }

        tracing::debug!(
            "No EXIF date in {}, using the file modification time",
            path.display()
        );
        let modified = fs::metadata(path)?.modified()?;
        Ok(CaptureTime::Absolute(DateTime::<Utc>::from(modified)))
    }

    fn read_existing_geotag(&self, path: &Path) -> Result<Option<Geotag>> {
        Ok(read_exif(path)?.as_ref().and_then(geotag))
    }

    fn read_camera_id(&self, path: &Path) -> Result<Option<String>> {
        Ok(read_exif(path)?.as_ref().and_then(camera_id))
    }

    fn read_place(&self, path: &Path) -> Result<Place> {
        let bytes = fs::read(path)?;
        if !jpeg::is_jpeg(&bytes) {
            return Ok(Place::default());
        }
        let place = jpeg::parse(&bytes)
            .and_then(|jpeg| match jpeg.segments.iter().find(|s| s.is_photoshop()) {
                Some(segment) => iptc::read_place(segment.data),
                None => Ok(Place::default()),
            })
            .unwrap_or_else(|err| {
                tracing::warn!("Ignoring IPTC data in {}: {}", path.display(), err);
                Place::default()
            });
        Ok(place)
    }

    fn write_geotag(
        &self,
        path: &Path,
        geotag: &Geotag,
        place: &Place,
    ) -> std::result::Result<(), WriteError> {
        let bytes = fs::read(path)?;
        let jpeg = jpeg::parse(&bytes)?;

        let existing = jpeg
            .segments
            .iter()
            .find(|s| s.is_exif())
            .map(|s| ::exif::Reader::new().read_raw(s.data[EXIF_PREFIX.len()..].to_vec()))
            .transpose()?;
        let app1 = encode_exif(existing.as_ref(), geotag)?;

        let photoshop = jpeg.segments.iter().find(|s| s.is_photoshop()).map(|s| s.data);
        let app13 = iptc::with_place(photoshop, place)?;

        let output = jpeg::assemble(&jpeg, Some(&app1), app13.as_deref())?;
        replace_atomically(path, &output)?;

        tracing::debug!(
            "Wrote {} to {}",
            coords::format_coords(geotag.latitude, geotag.longitude),
            path.display()
        );
        Ok(())
    }
}

/// Read EXIF from any supported container; a file without EXIF is not an error
fn read_exif(path: &Path) -> Result<Option<Exif>> {
    let mut reader = BufReader::new(File::open(path)?);
    match ::exif::Reader::new().read_from_container(&mut reader) {
        Ok(exif) => Ok(Some(exif)),
        Err(
            ::exif::Error::NotFound(_)
            | ::exif::Error::NotSupported(_)
            | ::exif::Error::BlankValue(_),
        ) => Ok(None),
        Err(::exif::Error::Io(err)) => Err(err.into()),
        Err(err) => Err(err.into()),
    }
}

fn ascii(exif: &Exif, tag: Tag) -> Option<&str> {
    match &exif.get_field(tag, In::PRIMARY)?.value {
        Value::Ascii(parts) => parts
            .first()
            .and_then(|bytes| std::str::from_utf8(bytes).ok())
            .map(|s| s.trim_matches(|c: char| c.is_whitespace() || c == '\0'))
            .filter(|s| !s.is_empty()),
        _ => None,
    }
}

fn rationals(exif: &Exif, tag: Tag) -> Option<Vec<f64>> {
    match &exif.get_field(tag, In::PRIMARY)?.value {
        Value::Rational(values) => values
            .iter()
            .map(|r| Some(r.to_f64()).filter(|v| v.is_finite()))
            .collect(),
        _ => None,
    }
}

fn capture_time(exif: &Exif) -> Option<CaptureTime> {
    DATE_TAGS.iter().find_map(|&(date, subsec, offset)| {
        let naive = NaiveDateTime::parse_from_str(ascii(exif, date)?, EXIF_DATE_FORMAT).ok()?;
        let naive = naive + ascii(exif, subsec).map_or_else(TimeDelta::zero, subsec_delta);

        match ascii(exif, offset).and_then(|o| parse_utc_offset(o).ok()) {
            Some(offset) => Some(CaptureTime::Absolute(
                (naive - TimeDelta::seconds(offset.local_minus_utc().into())).and_utc(),
            )),
            None => Some(CaptureTime::Naive(naive)),
        }
    })
}

/// Make, model and serial number, lowercased and joined: `12345_canon_canon_eos_7d`
fn camera_id(exif: &Exif) -> Option<String> {
    let mut parts: Vec<String> = [
        Tag::Make,
        Tag::Model,
        Tag::BodySerialNumber,
        CAMERA_SERIAL_NUMBER,
    ]
    .into_iter()
    .filter_map(|tag| ascii(exif, tag))
    .map(|part| part.to_lowercase().replace(' ', "_"))
    .collect();
    parts.sort();
    parts.dedup();

    let id = parts.join("_");
    let id = id.trim_matches('_');
    (!id.is_empty()).then(|| id.to_string())
}

/// `SubSecTime*` holds the leading decimal digits of the second
fn subsec_delta(digits: &str) -> TimeDelta {
    let digits: String = digits.chars().take_while(char::is_ascii_digit).take(9).collect();
    let nanos = format!("{:0<9}", digits).parse::<i64>().unwrap_or(0);
    TimeDelta::nanoseconds(nanos)
}

fn geotag(exif: &Exif) -> Option<Geotag> {
    let angle = |value: Tag, reference: Tag| {
        let dms = rationals(exif, value)?;
        let part = |i: usize| dms.get(i).copied().unwrap_or(0.0);
        Some(coords::dms_to_decimal(
            part(0),
            part(1),
            part(2),
            ascii(exif, reference).unwrap_or(""),
        ))
    };
    let latitude = angle(Tag::GPSLatitude, Tag::GPSLatitudeRef)?;
    let longitude = angle(Tag::GPSLongitude, Tag::GPSLongitudeRef)?;
    if !coords::valid_coords(latitude, longitude) {
        return None;
    }

    let below_sea_level = exif
        .get_field(Tag::GPSAltitudeRef, In::PRIMARY)
        .and_then(|f| f.value.get_uint(0))
        == Some(1);
    let elevation = rationals(exif, Tag::GPSAltitude)
        .and_then(|v| v.first().copied())
        .map(|alt| if below_sea_level { -alt } else { alt });

    Some(Geotag::new(latitude, longitude, elevation))
}

fn dms_rationals(decimal: f64) -> Vec<Rational> {
    let (degrees, minutes, seconds) = coords::decimal_to_dms(decimal);
    vec![
        Rational {
            num: degrees,
            denom: 1,
        },
        Rational {
            num: minutes,
            denom: 1,
        },
        Rational {
            num: (seconds * coords::DMS_SECONDS_DENOMINATOR as f64).round() as u32,
            denom: coords::DMS_SECONDS_DENOMINATOR,
        },
    ]
}

/// The complete GPS IFD describing `geotag`
fn gps_fields(geotag: &Geotag) -> Vec<Field> {
    let field = |tag, value| Field {
        tag,
        ifd_num: In::PRIMARY,
        value,
    };
    let ascii = |text: &str| Value::Ascii(vec![text.as_bytes().to_vec()]);

    let mut fields = vec![
        field(Tag::GPSVersionID, Value::Byte(vec![2, 3, 0, 0])),
        field(
            Tag::GPSLatitudeRef,
            ascii(if geotag.latitude >= 0.0 { "N" } else { "S" }),
        ),
        field(Tag::GPSLatitude, Value::Rational(dms_rationals(geotag.latitude))),
        field(
            Tag::GPSLongitudeRef,
            ascii(if geotag.longitude >= 0.0 { "E" } else { "W" }),
        ),
        field(
            Tag::GPSLongitude,
            Value::Rational(dms_rationals(geotag.longitude)),
        ),
    ];
    if let Some(elevation) = geotag.elevation.filter(|e| e.is_finite()) {
        fields.push(field(
            Tag::GPSAltitudeRef,
            Value::Byte(vec![u8::from(elevation < 0.0)]),
        ));
        fields.push(field(
            Tag::GPSAltitude,
            Value::Rational(vec![Rational {
                num: (elevation.abs() * ALTITUDE_DENOMINATOR as f64).round() as u32,
                denom: ALTITUDE_DENOMINATOR,
            }]),
        ));
    }
    fields.push(field(Tag::GPSMapDatum, ascii("WGS-84")));
    fields
}

fn is_preserved(field: &Field) -> bool {
    (field.ifd_num == In::PRIMARY || field.ifd_num == In::THUMBNAIL)
        && field.tag.context() != Context::Gps
        && !LAYOUT_TAGS.contains(&field.tag)
        && !matches!(field.value, Value::Unknown(..))
}

fn thumbnail(exif: &Exif) -> Option<&[u8]> {
    let uint = |tag| {
        exif.get_field(tag, In::THUMBNAIL)
            .and_then(|f| f.value.get_uint(0))
            .map(|v| v as usize)
    };
    let offset = uint(Tag::JPEGInterchangeFormat)?;
    let length = uint(Tag::JPEGInterchangeFormatLength)?;
    exif.buf().get(offset..offset.checked_add(length)?)
}

/// Build the `APP1` payload: existing fields minus GPS, plus the new GPS IFD
fn encode_exif(
    existing: Option<&Exif>,
    geotag: &Geotag,
) -> std::result::Result<Vec<u8>, WriteError> {
    let gps = gps_fields(geotag);
    let mut writer = Writer::new();

    if let Some(exif) = existing {
        for field in exif.fields().filter(|f| is_preserved(f)) {
            writer.push_field(field);
        }
        if let Some(jpeg) = thumbnail(exif) {
            writer.set_jpeg(jpeg, In::THUMBNAIL);
        }
    }
    for field in &gps {
        writer.push_field(field);
    }

    let mut tiff = Cursor::new(Vec::new());
    writer.write(&mut tiff, existing.is_none_or(Exif::little_endian))?;

    let mut payload = EXIF_PREFIX.to_vec();
    payload.extend_from_slice(&tiff.into_inner());
    Ok(payload)
}

/// Replace `path` with `contents` via a synced temporary file and a rename
fn replace_atomically(path: &Path, contents: &[u8]) -> io::Result<()> {
    let permissions = fs::metadata(path)?.permissions();
    if permissions.readonly() {
        return Err(io::Error::new(
            io::ErrorKind::PermissionDenied,
            "file is read-only",
        ));
    }

    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(contents)?;
    tmp.as_file().sync_all()?;
    fs::set_permissions(tmp.path(), permissions)?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}
