//! Photos tracked by a session

use crate::{
    CaptureTime, Confidence, Geotag, MetadataBridge, Place, ResolvedTime, Result,
};
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};

/// Where a photo's current geotag came from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum GeotagSource {
    /// Already stored in the file when it was loaded
    Existing,
    /// Placed by the user; never overwritten by correlation
    Manual,
    /// Assigned from the loaded tracks
    Correlated(Confidence),
}

/// A photo file with its capture time and (possibly pending) geotag
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct Photo {
    path: PathBuf,
    /// Identifies the camera for per-camera timezone and clock settings
    camera: Option<String>,
    capture: Option<CaptureTime>,
    resolved: Option<ResolvedTime>,
    geotag: Option<Geotag>,
    source: Option<GeotagSource>,
    place: Place,
    modified: bool,
    /// Bumped whenever the timestamp or manual placement changes
    #[cfg_attr(feature = "serde", serde(skip))]
    revision: u64,
}

impl Photo {
    pub fn new(path: impl Into<PathBuf>, capture: Option<CaptureTime>) -> Self {
        Self {
            path: path.into(),
            camera: None,
            capture,
            resolved: None,
            geotag: None,
            source: None,
            place: Place::default(),
            modified: false,
            revision: 0,
        }
    }

    /// Read capture time, existing geotag and place names from the file
    #[cfg_attr(feature = "profiling", profiling::function)]
    pub fn load(path: &Path, bridge: &dyn MetadataBridge) -> Result<Self> {
        let capture = bridge.read_capture_timestamp(path)?;
        let mut photo = Self::new(path, Some(capture));
        photo.camera = bridge.read_camera_id(path).unwrap_or_else(|err| {
            tracing::warn!("Could not identify the camera of {}: {}", path.display(), err);
            None
        });

        if let Some(geotag) = bridge.read_existing_geotag(path)? {
            photo.geotag = Some(geotag);
            photo.source = Some(GeotagSource::Existing);
        }
        photo.place = bridge.read_place(path).unwrap_or_else(|err| {
            tracing::warn!("Could not read place names from {}: {}", path.display(), err);
            Place::default()
        });
        Ok(photo)
    }

    /// A photo that already carries a geotag in its metadata
    pub fn with_existing_geotag(mut self, geotag: Geotag) -> Self {
        self.geotag = Some(geotag);
        self.source = Some(GeotagSource::Existing);
        self
    }

    pub fn with_camera(mut self, camera: impl Into<String>) -> Self {
        self.camera = Some(camera.into());
        self
    }

    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[inline]
    pub fn camera(&self) -> Option<&str> {
        self.camera.as_deref()
    }

    #[inline]
    pub fn capture(&self) -> Option<CaptureTime> {
        self.capture
    }

    #[inline]
    pub fn resolved(&self) -> Option<&ResolvedTime> {
        self.resolved.as_ref()
    }

    /// Absolute capture time after timezone and clock correction
    #[inline]
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.resolved.as_ref().map(|r| r.timestamp)
    }

    #[inline]
    pub fn geotag(&self) -> Option<&Geotag> {
        self.geotag.as_ref()
    }

    #[inline]
    pub fn source(&self) -> Option<GeotagSource> {
        self.source
    }

    #[inline]
    pub fn place(&self) -> &Place {
        &self.place
    }

    /// Whether there are changes not yet written to the file
    #[inline]
    pub fn is_modified(&self) -> bool {
        self.modified
    }

    #[inline]
    pub fn is_manual(&self) -> bool {
        self.source == Some(GeotagSource::Manual)
    }

    pub(crate) fn revision(&self) -> u64 {
        self.revision
    }

    /// Returns true if the timestamp changed
    pub(crate) fn set_resolved(&mut self, resolved: Option<ResolvedTime>) -> bool {
        let changed = self.timestamp() != resolved.as_ref().map(|r| r.timestamp);
        if changed {
            self.revision += 1;
        }
        self.resolved = resolved;
        changed
    }

    /// Take the place of `old` so results computed for it are recognised as stale
    pub(crate) fn supersede(&mut self, old: &Photo) {
        self.revision = self.revision.max(old.revision) + 1;
    }

    pub(crate) fn set_geotag(&mut self, geotag: Geotag, source: GeotagSource) {
        if source == GeotagSource::Manual {
            self.revision += 1;
        }
        if self.geotag != Some(geotag) {
            self.modified = true;
            // Names describing the previous position no longer apply
            self.place = Place::default();
        }
        self.geotag = Some(geotag);
        self.source = Some(source);
    }

    pub(crate) fn set_place(&mut self, place: Place) {
        if self.place != place {
            self.modified = true;
            self.place = place;
        }
    }

    pub(crate) fn mark_saved(&mut self) {
        self.modified = false;
    }
}
