//! Minimal JPEG segment splitting and reassembly
//!
//! Only the header segments before the first `SOS` marker are parsed. The entropy-coded
//! image data and everything after it is carried over byte for byte.

use super::WriteError;

pub(crate) const SOI: u8 = 0xD8;
pub(crate) const EOI: u8 = 0xD9;
pub(crate) const SOS: u8 = 0xDA;
pub(crate) const APP0: u8 = 0xE0;
pub(crate) const APP1: u8 = 0xE1;
pub(crate) const APP13: u8 = 0xED;

/// Largest payload a length-prefixed segment can hold
pub(crate) const MAX_PAYLOAD: usize = u16::MAX as usize - 2;

pub(crate) const EXIF_PREFIX: &[u8] = b"Exif\0\0";
pub(crate) const PHOTOSHOP_PREFIX: &[u8] = b"Photoshop 3.0\0";

/// A header segment; `data` excludes the marker and length bytes
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct Segment<'a> {
    pub marker: u8,
    pub data: &'a [u8],
}

impl Segment<'_> {
    pub fn is_exif(&self) -> bool {
        self.marker == APP1 && self.data.starts_with(EXIF_PREFIX)
    }

    pub fn is_photoshop(&self) -> bool {
        self.marker == APP13 && self.data.starts_with(PHOTOSHOP_PREFIX)
    }
}

/// A parsed JPEG: header segments plus the untouched remainder
#[derive(Debug)]
pub(crate) struct Jpeg<'a> {
    pub segments: Vec<Segment<'a>>,
    /// Starts at the `SOS` (or `EOI`) marker
    pub tail: &'a [u8],
}

pub(crate) fn is_jpeg(bytes: &[u8]) -> bool {
    bytes.len() >= 2 && bytes[0] == 0xFF && bytes[1] == SOI
}

pub(crate) fn parse(bytes: &[u8]) -> Result<Jpeg<'_>, WriteError> {
    if !is_jpeg(bytes) {
        return Err(WriteError::UnsupportedFormat);
    }
    let corrupt = |what: &str| WriteError::CorruptMetadata(format!("JPEG {}", what));

    let mut segments = Vec::new();
    let mut pos = 2;
    loop {
        if bytes.get(pos) != Some(&0xFF) {
            return Err(corrupt("segment does not start with a marker"));
        }
        // Any number of 0xFF fill bytes may precede a marker
        while bytes.get(pos + 1) == Some(&0xFF) {
            pos += 1;
        }
        let marker = *bytes.get(pos + 1).ok_or_else(|| corrupt("ends before image data"))?;
        match marker {
            SOS | EOI => {
                return Ok(Jpeg {
                    segments,
                    tail: &bytes[pos..],
                });
            }
            // Standalone markers carry no length
            0x01 | 0xD0..=0xD7 => pos += 2,
            _ => {
                let len = bytes
                    .get(pos + 2..pos + 4)
                    .map(|b| u16::from_be_bytes([b[0], b[1]]) as usize)
                    .ok_or_else(|| corrupt("segment length is truncated"))?;
                if len < 2 {
                    return Err(corrupt("segment length is invalid"));
                }
                let data = bytes
                    .get(pos + 4..pos + 2 + len)
                    .ok_or_else(|| corrupt("segment runs past the end of the file"))?;
                segments.push(Segment { marker, data });
                pos += 2 + len;
            }
        }
    }
}

/// Write a length-prefixed segment
pub(crate) fn write_segment(out: &mut Vec<u8>, marker: u8, data: &[u8]) -> Result<(), WriteError> {
    if data.len() > MAX_PAYLOAD {
        return Err(WriteError::CorruptMetadata(format!(
            "segment 0x{:02X} would be {} bytes, more than the {} a JPEG segment can hold",
            marker,
            data.len(),
            MAX_PAYLOAD
        )));
    }
    out.extend_from_slice(&[0xFF, marker]);
    out.extend_from_slice(&((data.len() + 2) as u16).to_be_bytes());
    out.extend_from_slice(data);
    Ok(())
}

/// Rebuild a JPEG with new EXIF and Photoshop segments
///
/// The old segments of those kinds are dropped. The new ones go right after any leading
/// `APP0` (JFIF) segments, which readers expect to come first.
pub(crate) fn assemble(
    jpeg: &Jpeg<'_>,
    exif: Option<&[u8]>,
    photoshop: Option<&[u8]>,
) -> Result<Vec<u8>, WriteError> {
    let mut out = Vec::with_capacity(
        jpeg.tail.len() + jpeg.segments.iter().map(|s| s.data.len() + 4).sum::<usize>() + 1024,
    );
    out.extend_from_slice(&[0xFF, SOI]);

    let kept: Vec<&Segment> = jpeg
        .segments
        .iter()
        .filter(|s| !(exif.is_some() && s.is_exif()) && !(photoshop.is_some() && s.is_photoshop()))
        .collect();
    let leading = kept.iter().take_while(|s| s.marker == APP0).count();

    for segment in &kept[..leading] {
        write_segment(&mut out, segment.marker, segment.data)?;
    }
    if let Some(exif) = exif {
        write_segment(&mut out, APP1, exif)?;
    }
    if let Some(photoshop) = photoshop {
        write_segment(&mut out, APP13, photoshop)?;
    }
    for segment in &kept[leading..] {
        write_segment(&mut out, segment.marker, segment.data)?;
    }

    out.extend_from_slice(jpeg.tail);
    Ok(out)
}
