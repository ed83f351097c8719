//! Photo metadata access
//!
//! [`MetadataBridge`] is the seam between correlation and the files on disk. The default
//! [`ExifBridge`] reads EXIF from any container kamadak-exif understands and writes geotags
//! into JPEG files.

mod exif;
mod iptc;
mod jpeg;

pub use self::exif::ExifBridge;

use crate::{CaptureTime, Geotag, Place, Result};
use std::path::Path;

/// Why a geotag could not be written to one photo
#[derive(Debug, thiserror::Error)]
pub enum WriteError {
    #[error("Unsupported file format (only JPEG can be written)")]
    UnsupportedFormat,

    #[error("Corrupt metadata: {0}")]
    CorruptMetadata(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<::exif::Error> for WriteError {
    fn from(err: ::exif::Error) -> Self {
        match err {
            ::exif::Error::Io(err) => Self::Io(err),
            err => Self::CorruptMetadata(err.to_string()),
        }
    }
}

/// Reads capture times and geotags from photos and writes geotags back
///
/// Implementations must be usable from worker threads.
pub trait MetadataBridge: Send + Sync {
    /// When the photo was taken
    fn read_capture_timestamp(&self, path: &Path) -> Result<CaptureTime>;

    /// The position already stored in the photo, if any
    fn read_existing_geotag(&self, path: &Path) -> Result<Option<Geotag>>;

    /// Stable identifier of the camera that took the photo
    fn read_camera_id(&self, _path: &Path) -> Result<Option<String>> {
        Ok(None)
    }

    /// Location names already stored in the photo
    fn read_place(&self, _path: &Path) -> Result<Place> {
        Ok(Place::default())
    }

    /// Store a position and its location names
    ///
    /// Must either fully succeed or leave the file untouched.
    fn write_geotag(
        &self,
        path: &Path,
        geotag: &Geotag,
        place: &Place,
    ) -> std::result::Result<(), WriteError>;
}
