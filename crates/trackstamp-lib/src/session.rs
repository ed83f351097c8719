//! Explicit geotagging session state
//!
//! A [`Session`] owns everything a geotagging run needs: the loaded tracks, the photos,
//! and the configuration. Correlation works on a [`CorrelationJob`] snapshot so it can run
//! on a worker while the session stays untouched, and its [`CorrelationOutcome`] is applied
//! afterwards. Photos that changed in the meantime are left alone.

use crate::worker::SaveRequest;
use crate::{
    Assignment, Confidence, Correlator, CorrelatorConfig, Error, Geotag, GeotagSource, Photo,
    Place, Result, Timeline, TimezonePolicy, TimezoneResolver, Track, ZoneLookup,
};
use chrono::{DateTime, TimeDelta, Utc};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Settings governing correlation and timestamp resolution
#[derive(Clone, Debug, PartialEq)]
pub struct SessionConfig {
    pub correlator: CorrelatorConfig,
    pub timezone: TimezonePolicy,
    /// Added to every capture time to correct a drifting camera clock
    pub clock_offset: TimeDelta,
    /// Leave photos that already carry a geotag alone
    pub keep_existing: bool,
    /// Overrides for photos whose camera ID matches the key
    pub cameras: BTreeMap<String, CameraSettings>,
}

impl SessionConfig {
    /// Camera clock on UTC, no clock correction, existing geotags replaced
    pub fn new(correlator: CorrelatorConfig) -> Self {
        Self {
            correlator,
            timezone: TimezonePolicy::default(),
            clock_offset: TimeDelta::zero(),
            keep_existing: false,
            cameras: BTreeMap::new(),
        }
    }
}

/// Timezone and clock settings of one camera; unset fields follow the session
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CameraSettings {
    pub timezone: Option<TimezonePolicy>,
    pub clock_offset: Option<TimeDelta>,
}

/// A correlation run detached from the session
#[derive(Clone, Debug)]
pub struct CorrelationJob {
    correlator: Correlator,
    items: Vec<JobItem>,
}

#[derive(Clone, Debug)]
struct JobItem {
    path: PathBuf,
    revision: u64,
    timestamp: DateTime<Utc>,
}

impl CorrelationJob {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Correlate every photo, stopping early if `cancel` fires
    ///
    /// Photos handled before cancellation keep their results.
    #[cfg_attr(feature = "profiling", profiling::function)]
    pub fn run(self, cancel: &CancellationToken) -> CorrelationOutcome {
        let mut results = Vec::with_capacity(self.items.len());
        let mut cancelled = false;
        for item in self.items {
            if cancel.is_cancelled() {
                cancelled = true;
                break;
            }
            let result = self.correlator.correlate(item.timestamp);
            results.push(JobResult {
                path: item.path,
                revision: item.revision,
                result,
            });
        }
        CorrelationOutcome { results, cancelled }
    }
}

#[derive(Debug)]
struct JobResult {
    path: PathBuf,
    revision: u64,
    result: Result<Assignment>,
}

/// Results of a [`CorrelationJob`], to be applied to the session
#[derive(Debug)]
pub struct CorrelationOutcome {
    results: Vec<JobResult>,
    cancelled: bool,
}

impl CorrelationOutcome {
    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }
}

/// What applying a correlation outcome changed
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ApplySummary {
    /// Photos matched exactly or snapped to a track end
    pub exact: usize,
    pub interpolated: usize,
    /// Photos outside every track; any previous geotag is kept
    pub uncovered: Vec<PathBuf>,
    /// Photos removed, placed manually or re-timed since the snapshot
    pub stale: usize,
    pub cancelled: bool,
}

impl ApplySummary {
    pub fn correlated(&self) -> usize {
        self.exact + self.interpolated
    }
}

/// User actions a front end can send to a session
#[derive(Clone, Debug)]
pub enum Command {
    AddTrack { path: PathBuf, track: Arc<Track> },
    RemoveTrack(PathBuf),
    ClearTracks,
    AddPhoto(Photo),
    RemovePhoto(PathBuf),
    PlaceManually { path: PathBuf, geotag: Geotag },
    SetTimezonePolicy(TimezonePolicy),
    SetClockOffset(TimeDelta),
    /// `None` makes the camera follow the session policy again
    SetCameraTimezone {
        camera: String,
        policy: Option<TimezonePolicy>,
    },
    SetCameraClockOffset {
        camera: String,
        offset: Option<TimeDelta>,
    },
    Correlate,
    SetPlace { path: PathBuf, place: Place },
    MarkSaved(PathBuf),
}

/// What a dispatched [`Command`] did
#[derive(Clone, Debug, PartialEq)]
pub enum Event {
    TrackAdded { path: PathBuf, points: usize, replaced: bool },
    TrackRemoved { path: PathBuf, found: bool },
    TracksCleared { count: usize },
    PhotoAdded { path: PathBuf, replaced: bool },
    PhotoRemoved { path: PathBuf, found: bool },
    PhotoPlaced { path: PathBuf },
    TimestampsResolved { retimed: usize, fallbacks: usize },
    Correlated(ApplySummary),
    PlaceSet { path: PathBuf },
    Saved { path: PathBuf },
}

/// Tracks, photos and settings of one geotagging run
pub struct Session {
    config: SessionConfig,
    resolver: TimezoneResolver,
    /// One per camera in `config.cameras`
    camera_resolvers: BTreeMap<String, TimezoneResolver>,
    /// In load order; re-loading a path replaces its entry in place
    tracks: Vec<(PathBuf, Arc<Track>)>,
    timeline: Arc<Timeline>,
    photos: BTreeMap<PathBuf, Photo>,
    zones: Option<Arc<dyn ZoneLookup>>,
}

#[cfg_attr(feature = "profiling", profiling::all_functions)]
impl Session {
    pub fn new(config: SessionConfig) -> Self {
        let resolver = TimezoneResolver::new(config.timezone.clone(), config.clock_offset);
        let mut session = Self {
            config,
            resolver,
            camera_resolvers: BTreeMap::new(),
            tracks: Vec::new(),
            timeline: Arc::new(Timeline::default()),
            photos: BTreeMap::new(),
            zones: None,
        };
        session.rebuild_resolvers();
        session
    }

    #[inline]
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    #[inline]
    pub fn timeline(&self) -> &Arc<Timeline> {
        &self.timeline
    }

    pub fn tracks(&self) -> impl Iterator<Item = (&Path, &Arc<Track>)> {
        self.tracks.iter().map(|(path, track)| (path.as_path(), track))
    }

    pub fn photos(&self) -> impl Iterator<Item = &Photo> {
        self.photos.values()
    }

    pub fn photo(&self, path: &Path) -> Option<&Photo> {
        self.photos.get(path)
    }

    /// Source of timezones for [`TimezonePolicy::Lookup`]
    pub fn set_zone_lookup(&mut self, zones: Option<Arc<dyn ZoneLookup>>) {
        self.zones = zones;
        self.resolve_timestamps();
    }

    /// Load a track; returns true if it replaced one with the same path
    pub fn add_track(&mut self, path: PathBuf, track: Arc<Track>) -> bool {
        let replaced = match self.tracks.iter_mut().find(|(p, _)| *p == path) {
            Some(entry) => {
                entry.1 = track;
                true
            }
            None => {
                self.tracks.push((path, track));
                false
            }
        };
        self.rebuild_timeline();
        replaced
    }

    pub fn remove_track(&mut self, path: &Path) -> Option<Arc<Track>> {
        let idx = self.tracks.iter().position(|(p, _)| p == path)?;
        let (_, track) = self.tracks.remove(idx);
        self.rebuild_timeline();
        Some(track)
    }

    /// Unload every track; returns how many there were
    pub fn clear_tracks(&mut self) -> usize {
        let count = self.tracks.len();
        self.tracks.clear();
        self.rebuild_timeline();
        count
    }

    fn rebuild_timeline(&mut self) {
        self.timeline = Arc::new(Timeline::merge(
            self.tracks.iter().map(|(_, track)| track.as_ref()),
        ));
        tracing::debug!(
            "Timeline rebuilt from {} tracks ({} points)",
            self.tracks.len(),
            self.timeline.len()
        );
        // Zone lookups depend on where the tracks go
        if self.uses_zone_lookup() {
            self.resolve_timestamps();
        }
    }

    fn uses_zone_lookup(&self) -> bool {
        std::iter::once(&self.resolver)
            .chain(self.camera_resolvers.values())
            .any(|resolver| *resolver.policy() == TimezonePolicy::Lookup)
    }

    /// Add a photo and resolve its timestamp; returns true if it replaced one
    pub fn add_photo(&mut self, mut photo: Photo) -> bool {
        let resolver = resolver_for(&self.resolver, &self.camera_resolvers, photo.camera());
        let resolved = photo
            .capture()
            .map(|capture| resolver.resolve(capture, &self.timeline, self.zones.as_deref()));
        photo.set_resolved(resolved);
        if let Some(old) = self.photos.get(photo.path()) {
            photo.supersede(old);
        }
        self.photos.insert(photo.path().to_path_buf(), photo).is_some()
    }

    pub fn remove_photo(&mut self, path: &Path) -> Option<Photo> {
        self.photos.remove(path)
    }

    /// Pin a photo to a position; correlation never overrides it
    pub fn place_manually(&mut self, path: &Path, geotag: Geotag) -> Result<()> {
        self.photo_mut(path)?.set_geotag(geotag, GeotagSource::Manual);
        Ok(())
    }

    /// Session-wide policy; cameras with their own timezone keep it
    pub fn set_timezone_policy(&mut self, policy: TimezonePolicy) -> (usize, usize) {
        self.config.timezone = policy;
        self.rebuild_resolvers();
        self.resolve_timestamps()
    }

    /// Session-wide clock correction; cameras with their own offset keep it
    pub fn set_clock_offset(&mut self, offset: TimeDelta) -> (usize, usize) {
        self.config.clock_offset = offset;
        self.rebuild_resolvers();
        self.resolve_timestamps()
    }

    /// Timezone for one camera's photos; `None` follows the session policy again
    pub fn set_camera_timezone(
        &mut self,
        camera: &str,
        policy: Option<TimezonePolicy>,
    ) -> (usize, usize) {
        self.update_camera(camera, |settings| settings.timezone = policy)
    }

    /// Clock correction for one camera's photos; `None` follows the session offset again
    pub fn set_camera_clock_offset(
        &mut self,
        camera: &str,
        offset: Option<TimeDelta>,
    ) -> (usize, usize) {
        self.update_camera(camera, |settings| settings.clock_offset = offset)
    }

    fn update_camera(
        &mut self,
        camera: &str,
        update: impl FnOnce(&mut CameraSettings),
    ) -> (usize, usize) {
        let settings = self.config.cameras.entry(camera.to_string()).or_default();
        update(settings);
        if *settings == CameraSettings::default() {
            self.config.cameras.remove(camera);
        }
        self.rebuild_resolvers();
        self.resolve_matching(|photo| photo.camera() == Some(camera))
    }

    /// Build resolvers from the config, clamping clock offsets to what they accept
    fn rebuild_resolvers(&mut self) {
        self.resolver =
            TimezoneResolver::new(self.config.timezone.clone(), self.config.clock_offset);
        self.config.clock_offset = self.resolver.clock_offset();

        let default = &self.resolver;
        self.camera_resolvers = self
            .config
            .cameras
            .iter_mut()
            .map(|(camera, settings)| {
                let resolver = TimezoneResolver::new(
                    settings
                        .timezone
                        .clone()
                        .unwrap_or_else(|| default.policy().clone()),
                    settings.clock_offset.unwrap_or(default.clock_offset()),
                );
                if settings.clock_offset.is_some() {
                    settings.clock_offset = Some(resolver.clock_offset());
                }
                (camera.clone(), resolver)
            })
            .collect();
    }

    /// Recompute every photo's absolute timestamp
    ///
    /// Returns (photos whose timestamp changed, photos that fell back to UTC).
    pub fn resolve_timestamps(&mut self) -> (usize, usize) {
        self.resolve_matching(|_| true)
    }

    fn resolve_matching(&mut self, filter: impl Fn(&Photo) -> bool) -> (usize, usize) {
        let (mut retimed, mut fallbacks) = (0, 0);
        for photo in self.photos.values_mut().filter(|photo| filter(photo)) {
            let resolver = resolver_for(&self.resolver, &self.camera_resolvers, photo.camera());
            let resolved = photo
                .capture()
                .map(|capture| resolver.resolve(capture, &self.timeline, self.zones.as_deref()));
            if resolved.as_ref().is_some_and(|r| r.fallback) {
                fallbacks += 1;
            }
            if photo.set_resolved(resolved) {
                retimed += 1;
            }
        }
        (retimed, fallbacks)
    }

    /// Capture the state a correlation run needs
    ///
    /// Manually placed photos, photos without a timestamp and, with `keep_existing`,
    /// photos that already had a geotag are left out.
    pub fn snapshot(&self) -> CorrelationJob {
        let items = self
            .photos
            .values()
            .filter(|photo| !photo.is_manual())
            .filter(|photo| {
                !(self.config.keep_existing && photo.source() == Some(GeotagSource::Existing))
            })
            .filter_map(|photo| {
                Some(JobItem {
                    path: photo.path().to_path_buf(),
                    revision: photo.revision(),
                    timestamp: photo.timestamp()?,
                })
            })
            .collect();
        CorrelationJob {
            correlator: Correlator::new(self.timeline.clone(), self.config.correlator),
            items,
        }
    }

    /// Store correlation results, skipping photos that changed since the snapshot
    pub fn apply(&mut self, outcome: CorrelationOutcome) -> ApplySummary {
        let mut summary = ApplySummary {
            cancelled: outcome.cancelled,
            ..ApplySummary::default()
        };

        for JobResult {
            path,
            revision,
            result,
        } in outcome.results
        {
            let Some(photo) = self
                .photos
                .get_mut(&path)
                .filter(|p| p.revision() == revision && !p.is_manual())
            else {
                summary.stale += 1;
                continue;
            };

            match result {
                Ok(assignment) => {
                    match assignment.confidence {
                        Confidence::Exact => summary.exact += 1,
                        Confidence::Interpolated => summary.interpolated += 1,
                    }
                    photo.set_geotag(
                        assignment.geotag,
                        GeotagSource::Correlated(assignment.confidence),
                    );
                }
                Err(err) => {
                    tracing::info!("{}: {}", path.display(), err);
                    summary.uncovered.push(path);
                }
            }
        }

        tracing::info!(
            "Correlated {} photos ({} exact, {} interpolated), {} uncovered",
            summary.correlated(),
            summary.exact,
            summary.interpolated,
            summary.uncovered.len()
        );
        summary
    }

    /// Snapshot, correlate and apply in one step on the current thread
    pub fn correlate(&mut self) -> ApplySummary {
        let outcome = self.snapshot().run(&CancellationToken::new());
        self.apply(outcome)
    }

    pub fn set_place(&mut self, path: &Path, place: Place) -> Result<()> {
        self.photo_mut(path)?.set_place(place);
        Ok(())
    }

    /// Photos with unsaved changes, in path order
    pub fn modified_photos(&self) -> impl Iterator<Item = &Photo> {
        self.photos.values().filter(|photo| photo.is_modified())
    }

    /// Writes needed to persist every modified, geotagged photo
    pub fn save_requests(&self) -> Vec<SaveRequest> {
        self.modified_photos()
            .filter_map(|photo| {
                Some(SaveRequest {
                    path: photo.path().to_path_buf(),
                    geotag: *photo.geotag()?,
                    place: photo.place().clone(),
                })
            })
            .collect()
    }

    /// Geotagged photos that have no place names yet
    pub fn unnamed_photos(&self) -> Vec<(PathBuf, Geotag)> {
        self.photos
            .values()
            .filter(|photo| photo.place().is_empty())
            .filter_map(|photo| Some((photo.path().to_path_buf(), *photo.geotag()?)))
            .collect()
    }

    pub fn mark_saved(&mut self, path: &Path) -> Result<()> {
        self.photo_mut(path)?.mark_saved();
        Ok(())
    }

    fn photo_mut(&mut self, path: &Path) -> Result<&mut Photo> {
        self.photos
            .get_mut(path)
            .ok_or_else(|| Error::UnknownPhoto(path.to_path_buf()))
    }

    /// Route a front-end command to the matching operation
    pub fn dispatch(&mut self, command: Command) -> Result<Event> {
        let event = match command {
            Command::AddTrack { path, track } => {
                let points = track.len();
                let replaced = self.add_track(path.clone(), track);
                Event::TrackAdded {
                    path,
                    points,
                    replaced,
                }
            }
            Command::RemoveTrack(path) => {
                let found = self.remove_track(&path).is_some();
                Event::TrackRemoved { path, found }
            }
            Command::ClearTracks => Event::TracksCleared {
                count: self.clear_tracks(),
            },
            Command::AddPhoto(photo) => {
                let path = photo.path().to_path_buf();
                let replaced = self.add_photo(photo);
                Event::PhotoAdded { path, replaced }
            }
            Command::RemovePhoto(path) => {
                let found = self.remove_photo(&path).is_some();
                Event::PhotoRemoved { path, found }
            }
            Command::PlaceManually { path, geotag } => {
                self.place_manually(&path, geotag)?;
                Event::PhotoPlaced { path }
            }
            Command::SetTimezonePolicy(policy) => {
                let (retimed, fallbacks) = self.set_timezone_policy(policy);
                Event::TimestampsResolved { retimed, fallbacks }
            }
            Command::SetClockOffset(offset) => {
                let (retimed, fallbacks) = self.set_clock_offset(offset);
                Event::TimestampsResolved { retimed, fallbacks }
            }
            Command::SetCameraTimezone { camera, policy } => {
                let (retimed, fallbacks) = self.set_camera_timezone(&camera, policy);
                Event::TimestampsResolved { retimed, fallbacks }
            }
            Command::SetCameraClockOffset { camera, offset } => {
                let (retimed, fallbacks) = self.set_camera_clock_offset(&camera, offset);
                Event::TimestampsResolved { retimed, fallbacks }
            }
            Command::Correlate => Event::Correlated(self.correlate()),
            Command::SetPlace { path, place } => {
                self.set_place(&path, place)?;
                Event::PlaceSet { path }
            }
            Command::MarkSaved(path) => {
                self.mark_saved(&path)?;
                Event::Saved { path }
            }
        };
        Ok(event)
    }
}

/// Resolver for photos from `camera`, falling back to the session-wide one
fn resolver_for<'a>(
    default: &'a TimezoneResolver,
    cameras: &'a BTreeMap<String, TimezoneResolver>,
    camera: Option<&str>,
) -> &'a TimezoneResolver {
    camera.and_then(|id| cameras.get(id)).unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CaptureTime, TrackPoint};
    use chrono::NaiveDateTime;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).unwrap()
    }

    fn track(points: &[(i64, f64, f64)]) -> Arc<Track> {
        Track::new(
            "test",
            points
                .iter()
                .map(|&(t, lat, lon)| TrackPoint::new(at(t), lat, lon, None))
                .collect(),
        )
        .unwrap()
    }

    fn photo(name: &str, secs: i64) -> Photo {
        Photo::new(name, Some(CaptureTime::Absolute(at(secs))))
    }

    fn session() -> Session {
        let mut session = Session::new(SessionConfig::new(CorrelatorConfig::new(
            TimeDelta::seconds(10),
        )));
        session.add_track(
            "a.gpx".into(),
            track(&[(100, 10.0, 20.0), (200, 11.0, 21.0)]),
        );
        session
    }

    #[test]
    fn test_correlate_photos() {
        let mut session = session();
        session.add_photo(photo("exact.jpg", 100));
        session.add_photo(photo("between.jpg", 150));
        session.add_photo(photo("outside.jpg", 500));

        let summary = session.correlate();
        assert_eq!(summary.exact, 1);
        assert_eq!(summary.interpolated, 1);
        assert_eq!(summary.uncovered, vec![PathBuf::from("outside.jpg")]);

        let between = session.photo(Path::new("between.jpg")).unwrap();
        assert_eq!(between.geotag().unwrap().latitude, 10.5);
        assert_eq!(
            between.source(),
            Some(GeotagSource::Correlated(Confidence::Interpolated))
        );
        assert!(session.photo(Path::new("outside.jpg")).unwrap().geotag().is_none());
        assert_eq!(session.modified_photos().count(), 2);
    }

    #[test]
    fn test_manual_placement_survives_correlation() {
        let mut session = session();
        session.add_photo(photo("pinned.jpg", 150));
        let pinned = Geotag::new(1.0, 2.0, None);
        session.place_manually(Path::new("pinned.jpg"), pinned).unwrap();

        session.correlate();
        assert_eq!(
            session.photo(Path::new("pinned.jpg")).unwrap().geotag(),
            Some(&pinned)
        );
    }

    #[test]
    fn test_keep_existing() {
        let mut config = SessionConfig::new(CorrelatorConfig::new(TimeDelta::seconds(10)));
        config.keep_existing = true;
        let mut session = Session::new(config);
        session.add_track("a.gpx".into(), track(&[(100, 10.0, 20.0)]));
        let existing = Geotag::new(5.0, 5.0, None);
        session.add_photo(photo("old.jpg", 100).with_existing_geotag(existing));

        assert!(session.snapshot().is_empty());
        session.correlate();
        assert_eq!(
            session.photo(Path::new("old.jpg")).unwrap().geotag(),
            Some(&existing)
        );
    }

    #[test]
    fn test_rerun_without_coverage_keeps_previous_geotag() {
        let mut session = session();
        session.add_photo(photo("a.jpg", 150));
        session.correlate();
        let before = *session.photo(Path::new("a.jpg")).unwrap().geotag().unwrap();

        session.clear_tracks();
        let summary = session.correlate();
        assert_eq!(summary.uncovered.len(), 1);
        assert_eq!(
            session.photo(Path::new("a.jpg")).unwrap().geotag(),
            Some(&before)
        );
    }

    #[test]
    fn test_added_track_extends_coverage_without_moving_geotags() {
        let mut session = session();
        session.add_photo(photo("early.jpg", 100));
        session.add_photo(photo("middle.jpg", 150));
        session.add_photo(photo("later.jpg", 1_050));
        let geotags = |session: &Session| -> Vec<Option<Geotag>> {
            session.photos().map(|p| p.geotag().copied()).collect()
        };

        let first = session.correlate();
        assert_eq!(first.uncovered, vec![PathBuf::from("later.jpg")]);
        let before = geotags(&session);
        for name in ["early.jpg", "later.jpg", "middle.jpg"] {
            session.mark_saved(Path::new(name)).unwrap();
        }

        // No points inside the first track's range
        session.add_track(
            "b.gpx".into(),
            track(&[(1_000, 40.0, -3.0), (1_100, 41.0, -4.0)]),
        );
        let second = session.correlate();
        assert_eq!((second.exact, second.interpolated), (1, 2));
        assert!(second.uncovered.is_empty());

        // Path order: early, later, middle
        let after = geotags(&session);
        assert_eq!(after[0], before[0]);
        assert_eq!(after[2], before[2]);
        assert_eq!(after[1], Some(Geotag::new(40.5, -3.5, None)));
        let modified: Vec<_> = session.modified_photos().map(|p| p.path()).collect();
        assert_eq!(modified, vec![Path::new("later.jpg")]);

        session.mark_saved(Path::new("later.jpg")).unwrap();
        let third = session.correlate();
        assert_eq!(third, second);
        assert_eq!(geotags(&session), after);
        assert_eq!(session.modified_photos().count(), 0);
    }

    #[test]
    fn test_apply_skips_stale_photos() {
        let mut session = session();
        for name in ["replaced.jpg", "gone.jpg", "pinned.jpg", "kept.jpg"] {
            session.add_photo(photo(name, 150));
        }

        let job = session.snapshot();
        assert_eq!(job.len(), 4);

        // Changes made while the job runs elsewhere
        session.add_photo(photo("replaced.jpg", 150));
        session.remove_photo(Path::new("gone.jpg"));
        session
            .place_manually(Path::new("pinned.jpg"), Geotag::new(0.0, 0.0, None))
            .unwrap();

        let summary = session.apply(job.run(&CancellationToken::new()));
        assert_eq!(summary.stale, 3);
        assert_eq!(summary.interpolated, 1);
        assert!(session.photo(Path::new("kept.jpg")).unwrap().geotag().is_some());
        assert!(session.photo(Path::new("replaced.jpg")).unwrap().geotag().is_none());
        assert_eq!(
            session.photo(Path::new("pinned.jpg")).unwrap().geotag(),
            Some(&Geotag::new(0.0, 0.0, None))
        );
    }

    #[test]
    fn test_retiming_makes_snapshot_stale() {
        let mut session = session();
        session.add_photo(photo("a.jpg", 150));
        let job = session.snapshot();

        let (retimed, _) = session.set_clock_offset(TimeDelta::seconds(5));
        assert_eq!(retimed, 1);

        let summary = session.apply(job.run(&CancellationToken::new()));
        assert_eq!(summary.stale, 1);
        assert!(session.photo(Path::new("a.jpg")).unwrap().geotag().is_none());
    }

    #[test]
    fn test_cancelled_job_keeps_nothing_unfinished() {
        let mut session = session();
        session.add_photo(photo("a.jpg", 150));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome = session.snapshot().run(&cancel);
        assert!(outcome.is_cancelled());
        let summary = session.apply(outcome);
        assert!(summary.cancelled);
        assert_eq!(summary.correlated(), 0);
    }

    #[test]
    fn test_track_replace_and_remove() {
        let mut session = session();
        assert!(session.add_track("a.gpx".into(), track(&[(300, 1.0, 1.0)])));
        assert_eq!(session.timeline().len(), 1);
        assert!(!session.add_track("b.gpx".into(), track(&[(400, 2.0, 2.0)])));
        assert_eq!(session.timeline().len(), 2);

        let order: Vec<_> = session.tracks().map(|(p, _)| p.to_path_buf()).collect();
        assert_eq!(order, vec![PathBuf::from("a.gpx"), PathBuf::from("b.gpx")]);

        assert!(session.remove_track(Path::new("a.gpx")).is_some());
        assert!(session.remove_track(Path::new("a.gpx")).is_none());
        assert_eq!(session.timeline().len(), 1);
    }

    #[test]
    fn test_timezone_policy_retimes_photos() {
        let mut session = session();
        let naive = NaiveDateTime::parse_from_str("1970-01-01 00:02:30", "%Y-%m-%d %H:%M:%S")
            .unwrap();
        session.add_photo(Photo::new("naive.jpg", Some(CaptureTime::Naive(naive))));
        assert_eq!(
            session.photo(Path::new("naive.jpg")).unwrap().timestamp(),
            Some(at(150))
        );

        let offset = crate::parse_utc_offset("+00:01").unwrap();
        let (retimed, fallbacks) = session.set_timezone_policy(TimezonePolicy::Fixed(offset));
        assert_eq!((retimed, fallbacks), (1, 0));
        assert_eq!(
            session.photo(Path::new("naive.jpg")).unwrap().timestamp(),
            Some(at(90))
        );
    }

    #[test]
    fn test_camera_clock_offset_retimes_only_that_camera() {
        let mut session = session();
        session.add_photo(photo("canon.jpg", 150).with_camera("canon_eos"));
        session.add_photo(photo("nikon.jpg", 150).with_camera("nikon_d90"));
        session.add_photo(photo("unknown.jpg", 150));
        let timestamp = |session: &Session, name: &str| {
            session.photo(Path::new(name)).unwrap().timestamp()
        };

        let event = session
            .dispatch(Command::SetCameraClockOffset {
                camera: "canon_eos".to_string(),
                offset: Some(TimeDelta::seconds(-30)),
            })
            .unwrap();
        assert_eq!(
            event,
            Event::TimestampsResolved {
                retimed: 1,
                fallbacks: 0
            }
        );
        assert_eq!(timestamp(&session, "canon.jpg"), Some(at(120)));
        assert_eq!(timestamp(&session, "nikon.jpg"), Some(at(150)));
        assert_eq!(timestamp(&session, "unknown.jpg"), Some(at(150)));

        // The session offset reaches every camera without its own
        let (retimed, _) = session.set_clock_offset(TimeDelta::seconds(10));
        assert_eq!(retimed, 2);
        assert_eq!(timestamp(&session, "canon.jpg"), Some(at(120)));
        assert_eq!(timestamp(&session, "nikon.jpg"), Some(at(160)));

        session.set_camera_clock_offset("canon_eos", None);
        assert_eq!(timestamp(&session, "canon.jpg"), Some(at(160)));
        assert!(session.config().cameras.is_empty());
    }

    #[test]
    fn test_camera_timezone_overrides_session_policy() {
        let naive = NaiveDateTime::parse_from_str("1970-01-01 01:02:30", "%Y-%m-%d %H:%M:%S")
            .unwrap();
        let mut config = SessionConfig::new(CorrelatorConfig::new(TimeDelta::seconds(10)));
        config.cameras.insert(
            "travel_cam".to_string(),
            CameraSettings {
                timezone: Some(TimezonePolicy::Fixed(
                    crate::parse_utc_offset("+01:00").unwrap(),
                )),
                clock_offset: None,
            },
        );
        let mut session = Session::new(config);
        session.add_photo(
            Photo::new("travel.jpg", Some(CaptureTime::Naive(naive))).with_camera("travel_cam"),
        );
        session.add_photo(Photo::new("home.jpg", Some(CaptureTime::Naive(naive))));

        let timestamp = |session: &Session, name: &str| {
            session.photo(Path::new(name)).unwrap().timestamp()
        };
        assert_eq!(timestamp(&session, "travel.jpg"), Some(at(150)));
        assert_eq!(timestamp(&session, "home.jpg"), Some(at(3_750)));

        let (retimed, _) = session.set_camera_timezone("home_cam", None);
        assert_eq!(retimed, 0);
        let (retimed, _) = session.set_camera_timezone("travel_cam", None);
        assert_eq!(retimed, 1);
        assert_eq!(timestamp(&session, "travel.jpg"), Some(at(3_750)));
    }

    #[test]
    fn test_save_and_geocode_requests() {
        let mut session = session();
        session.add_photo(photo("a.jpg", 150));
        session.add_photo(photo("outside.jpg", 900));
        session.correlate();

        let requests = session.save_requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].path, PathBuf::from("a.jpg"));
        assert_eq!(session.unnamed_photos().len(), 1);

        let place = Place {
            city: Some("Somewhere".to_string()),
            ..Place::default()
        };
        session.set_place(Path::new("a.jpg"), place.clone()).unwrap();
        assert!(session.unnamed_photos().is_empty());
        assert_eq!(session.save_requests()[0].place, place);
    }

    #[test]
    fn test_dispatch() {
        let mut session = session();
        let event = session
            .dispatch(Command::AddPhoto(photo("a.jpg", 150)))
            .unwrap();
        assert_eq!(
            event,
            Event::PhotoAdded {
                path: "a.jpg".into(),
                replaced: false
            }
        );

        let Event::Correlated(summary) = session.dispatch(Command::Correlate).unwrap() else {
            panic!("expected a correlation event");
        };
        assert_eq!(summary.interpolated, 1);

        session
            .dispatch(Command::MarkSaved("a.jpg".into()))
            .unwrap();
        assert_eq!(session.modified_photos().count(), 0);

        let missing = session.dispatch(Command::PlaceManually {
            path: "missing.jpg".into(),
            geotag: Geotag::new(0.0, 0.0, None),
        });
        assert!(matches!(missing, Err(Error::UnknownPhoto(_))));
    }
}
