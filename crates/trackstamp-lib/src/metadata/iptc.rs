//! IPTC-IIM place fields stored in the Photoshop `APP13` segment
//!
//! The segment holds a list of "8BIM" image resource blocks; resource `0x0404` is the IPTC
//! record, itself a list of tagged datasets. Only the location datasets are rewritten,
//! every other dataset and resource block is kept as found.

use super::WriteError;
use super::jpeg::PHOTOSHOP_PREFIX;
use crate::Place;

const RESOURCE_SIGNATURE: &[u8] = b"8BIM";
const IPTC_RESOURCE: u16 = 0x0404;
const DATASET_TAG: u8 = 0x1C;

/// (record, dataset) pairs
const CODED_CHARACTER_SET: (u8, u8) = (1, 90);
const RECORD_VERSION: (u8, u8) = (2, 0);
const CITY: (u8, u8) = (2, 90);
const PROVINCE_STATE: (u8, u8) = (2, 95);
const COUNTRY: (u8, u8) = (2, 101);

/// ISO 2022 escape sequence declaring UTF-8
const UTF8_ESCAPE: &[u8] = b"\x1B%G";

#[derive(Clone, Debug, PartialEq, Eq)]
struct ResourceBlock {
    id: u16,
    name: Vec<u8>,
    data: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
struct DataSet {
    record: u8,
    number: u8,
    data: Vec<u8>,
}

impl DataSet {
    fn new((record, number): (u8, u8), data: impl Into<Vec<u8>>) -> Self {
        Self {
            record,
            number,
            data: data.into(),
        }
    }

    fn is(&self, (record, number): (u8, u8)) -> bool {
        self.record == record && self.number == number
    }
}

fn corrupt(what: &str) -> WriteError {
    WriteError::CorruptMetadata(format!("Photoshop segment {}", what))
}

fn parse_resources(payload: &[u8]) -> Result<Vec<ResourceBlock>, WriteError> {
    let body = payload
        .strip_prefix(PHOTOSHOP_PREFIX)
        .ok_or_else(|| corrupt("has no Photoshop 3.0 header"))?;

    let mut blocks = Vec::new();
    let mut pos = 0;
    while pos < body.len() {
        if body.get(pos..pos + 4) != Some(RESOURCE_SIGNATURE) {
            return Err(corrupt("contains a block without 8BIM signature"));
        }
        let id = body
            .get(pos + 4..pos + 6)
            .map(|b| u16::from_be_bytes([b[0], b[1]]))
            .ok_or_else(|| corrupt("is truncated"))?;
        pos += 6;

        // Pascal string, padded so that length byte + text is even
        let name_len = *body.get(pos).ok_or_else(|| corrupt("is truncated"))? as usize;
        let name = body
            .get(pos + 1..pos + 1 + name_len)
            .ok_or_else(|| corrupt("is truncated"))?
            .to_vec();
        pos += (1 + name_len).next_multiple_of(2);

        let size = body
            .get(pos..pos + 4)
            .map(|b| u32::from_be_bytes([b[0], b[1], b[2], b[3]]) as usize)
            .ok_or_else(|| corrupt("is truncated"))?;
        pos += 4;
        let data = body
            .get(pos..pos + size)
            .ok_or_else(|| corrupt("has a block running past its end"))?
            .to_vec();
        pos += size.next_multiple_of(2);

        blocks.push(ResourceBlock { id, name, data });
    }
    Ok(blocks)
}

fn encode_resources(blocks: &[ResourceBlock]) -> Vec<u8> {
    let mut out = PHOTOSHOP_PREFIX.to_vec();
    for block in blocks {
        out.extend_from_slice(RESOURCE_SIGNATURE);
        out.extend_from_slice(&block.id.to_be_bytes());
        let name = &block.name[..block.name.len().min(u8::MAX as usize)];
        out.push(name.len() as u8);
        out.extend_from_slice(name);
        if (1 + name.len()) % 2 == 1 {
            out.push(0);
        }
        out.extend_from_slice(&(block.data.len() as u32).to_be_bytes());
        out.extend_from_slice(&block.data);
        if block.data.len() % 2 == 1 {
            out.push(0);
        }
    }
    out
}

fn parse_datasets(data: &[u8]) -> Result<Vec<DataSet>, WriteError> {
    let corrupt = |what: &str| WriteError::CorruptMetadata(format!("IPTC record {}", what));

    let mut datasets = Vec::new();
    let mut pos = 0;
    while pos < data.len() {
        match data[pos] {
            DATASET_TAG => {}
            // Some writers pad the record with zeros
            0 => break,
            _ => return Err(corrupt("contains an untagged dataset")),
        }
        let header = data
            .get(pos + 1..pos + 5)
            .ok_or_else(|| corrupt("is truncated"))?;
        let (record, number) = (header[0], header[1]);
        let size = u16::from_be_bytes([header[2], header[3]]);
        pos += 5;

        // Extended datasets store the length of their length in the low 15 bits
        let size = if size & 0x8000 != 0 {
            let count = (size & 0x7FFF) as usize;
            let bytes = data
                .get(pos..pos + count)
                .filter(|b| b.len() <= 4)
                .ok_or_else(|| corrupt("has an invalid extended dataset"))?;
            pos += count;
            bytes.iter().fold(0usize, |acc, b| (acc << 8) | *b as usize)
        } else {
            size as usize
        };

        let value = data
            .get(pos..pos + size)
            .ok_or_else(|| corrupt("has a dataset running past its end"))?;
        datasets.push(DataSet {
            record,
            number,
            data: value.to_vec(),
        });
        pos += size;
    }
    Ok(datasets)
}

fn encode_datasets(datasets: &[DataSet]) -> Vec<u8> {
    let mut out = Vec::new();
    for dataset in datasets {
        out.extend_from_slice(&[DATASET_TAG, dataset.record, dataset.number]);
        if dataset.data.len() < 0x8000 {
            out.extend_from_slice(&(dataset.data.len() as u16).to_be_bytes());
        } else {
            out.extend_from_slice(&0x8004u16.to_be_bytes());
            out.extend_from_slice(&(dataset.data.len() as u32).to_be_bytes());
        }
        out.extend_from_slice(&dataset.data);
    }
    out
}

/// Replace the place datasets, declaring UTF-8 text
fn set_place(datasets: &mut Vec<DataSet>, place: &Place) {
    datasets.retain(|d| !d.is(CITY) && !d.is(PROVINCE_STATE) && !d.is(COUNTRY));
    datasets.retain(|d| !d.is(CODED_CHARACTER_SET));
    datasets.push(DataSet::new(CODED_CHARACTER_SET, UTF8_ESCAPE));
    if !datasets.iter().any(|d| d.is(RECORD_VERSION)) {
        datasets.push(DataSet::new(RECORD_VERSION, 4u16.to_be_bytes()));
    }

    for (key, value) in [
        (CITY, &place.city),
        (PROVINCE_STATE, &place.region),
        (COUNTRY, &place.country),
    ] {
        if let Some(value) = value.as_deref().filter(|v| !v.is_empty()) {
            datasets.push(DataSet::new(key, value.as_bytes()));
        }
    }

    // Readers expect records in ascending order with the version first; the sort is stable
    // so repeated datasets such as keywords keep their order
    datasets.sort_by_key(|d| (d.record, d.number));
}

/// Produce the new Photoshop payload carrying `place`
///
/// A blank place removes any previous City, Province/State and Country so a moved photo
/// does not keep naming its old location. Returns `None` when there is nothing to write:
/// the place is blank and the file carries no IPTC block, so the segment (if any) stays
/// as it is.
pub(crate) fn with_place(
    existing: Option<&[u8]>,
    place: &Place,
) -> Result<Option<Vec<u8>>, WriteError> {
    let mut blocks = existing.map(parse_resources).transpose()?.unwrap_or_default();
    if place.is_empty() && !blocks.iter().any(|b| b.id == IPTC_RESOURCE) {
        return Ok(None);
    }

    let mut datasets = match blocks.iter().find(|b| b.id == IPTC_RESOURCE) {
        Some(block) => parse_datasets(&block.data)?,
        None => Vec::new(),
    };
    set_place(&mut datasets, place);
    let data = encode_datasets(&datasets);

    match blocks.iter_mut().find(|b| b.id == IPTC_RESOURCE) {
        Some(block) => block.data = data,
        None => blocks.push(ResourceBlock {
            id: IPTC_RESOURCE,
            name: Vec::new(),
            data,
        }),
    }
    Ok(Some(encode_resources(&blocks)))
}

/// Read the place datasets from a Photoshop payload
pub(crate) fn read_place(payload: &[u8]) -> Result<Place, WriteError> {
    let blocks = parse_resources(payload)?;
    let Some(block) = blocks.iter().find(|b| b.id == IPTC_RESOURCE) else {
        return Ok(Place::default());
    };
    let datasets = parse_datasets(&block.data)?;
    let text = |key| {
        datasets
            .iter()
            .find(|d| d.is(key))
            .map(|d| String::from_utf8_lossy(&d.data).trim().to_string())
            .filter(|s| !s.is_empty())
    };
    Ok(Place {
        city: text(CITY),
        region: text(PROVINCE_STATE),
        country: text(COUNTRY),
    })
}
