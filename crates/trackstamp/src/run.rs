use crate::report::{PhotoEntry, Report, TrackEntry};
use crate::settings::{GeocoderKind, Settings};
use std::collections::BTreeMap;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use trackstamp_lib::geocode::{CachedGeocoder, NominatimConfig, NominatimGeocoder, PlaceDatabase};
use trackstamp_lib::{
    CorrelatorConfig, ExifBridge, MetadataBridge, ReverseGeocoder, Session, SessionConfig,
    TrackFormat, ZoneLookup, worker,
};

/// Photo extensions the metadata bridge can read
const PHOTO_EXTENSIONS: &[&str] = &["jpg", "jpeg", "tif", "tiff", "heic", "heif", "png", "webp"];

const NOMINATIM_CACHE_SIZE: usize = 1024;

/// Problems that stop a run before any photo is touched
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("--geocoder local needs a --places dataset")]
    MissingPlaces,

    #[error(transparent)]
    Lib(#[from] trackstamp_lib::Error),
}

/// Input files sorted by kind
#[derive(Debug, Default, PartialEq)]
pub struct Inputs {
    pub tracks: Vec<PathBuf>,
    pub photos: Vec<PathBuf>,
    pub ignored: Vec<PathBuf>,
}

impl Inputs {
    pub fn classify(files: &[PathBuf]) -> Self {
        let mut inputs = Self::default();
        for path in files {
            if TrackFormat::from_path(path).is_some() {
                inputs.tracks.push(path.clone());
            } else if is_photo(path) {
                inputs.photos.push(path.clone());
            } else {
                tracing::warn!("Ignoring {}: unknown file type", path.display());
                inputs.ignored.push(path.clone());
            }
        }
        inputs
    }
}

fn is_photo(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| {
            PHOTO_EXTENSIONS
                .iter()
                .any(|known| ext.eq_ignore_ascii_case(known))
        })
}

/// Load, correlate, name and optionally save everything named on the command line
///
/// Cancelling `cancel` stops after the current batch step; whatever finished is reported.
pub async fn run(settings: &Settings, cancel: CancellationToken) -> Result<Report, RunError> {
    let inputs = Inputs::classify(&settings.files);
    let places = match &settings.places {
        Some(path) => Some(open_places(path.clone()).await?),
        None => None,
    };
    let geocoder = build_geocoder(settings, places.as_ref())?;

    let mut config = SessionConfig::new(CorrelatorConfig::new(settings.tolerance));
    config.timezone = settings.timezone_policy();
    config.clock_offset = settings.clock_offset();
    config.cameras = settings.cameras();
    config.keep_existing = settings.keep_existing;
    let mut session = Session::new(config);
    if let Some(places) = &places {
        let zones: Arc<dyn ZoneLookup> = places.clone();
        session.set_zone_lookup(Some(zones));
    }

    let mut report = Report {
        ignored: inputs.ignored,
        ..Report::default()
    };

    // Tracks first so timezone lookups can see them when photos are added
    tracing::info!("Loading {} track files", inputs.tracks.len());
    for (path, result) in worker::load_tracks(inputs.tracks, cancel.clone()).await {
        match result {
            Ok(track) => {
                report.tracks.push(TrackEntry::loaded(path.clone(), &track));
                session.add_track(path, track);
            }
            Err(err) => {
                tracing::warn!("Skipping track {}: {}", path.display(), err);
                report.tracks.push(TrackEntry::failed(path, &err));
            }
        }
    }

    let bridge: Arc<dyn MetadataBridge> = Arc::new(ExifBridge);
    tracing::info!("Reading {} photos", inputs.photos.len());
    let mut unreadable = Vec::new();
    for (path, result) in worker::load_photos(inputs.photos, bridge.clone(), cancel.clone()).await
    {
        match result {
            Ok(photo) => {
                session.add_photo(photo);
            }
            Err(err) => {
                tracing::warn!("Skipping photo {}: {}", path.display(), err);
                unreadable.push(PhotoEntry::unreadable(path, &err));
            }
        }
    }

    let outcome = worker::correlate(session.snapshot(), cancel.clone()).await?;
    report.summary = session.apply(outcome);

    if let Some(geocoder) = geocoder {
        name_places(&mut session, geocoder, settings, &cancel).await;
    }

    // Path to write error, `None` once saved
    let mut writes = BTreeMap::new();
    if settings.write {
        let requests = session.save_requests();
        tracing::info!("Writing {} photos", requests.len());
        for (path, result) in worker::save_photos(requests, bridge, cancel.clone()).await {
            match result {
                Ok(()) => {
                    session.mark_saved(&path)?;
                    writes.insert(path, None);
                }
                Err(err) => {
                    writes.insert(path, Some(err.to_string()));
                }
            }
        }
    }

    for photo in session.photos() {
        let mut entry = PhotoEntry::new(photo, &report.summary);
        if let Some(outcome) = writes.remove(photo.path()) {
            entry.saved = outcome.is_none();
            entry.error = outcome;
        }
        report.photos.push(entry);
    }
    report.photos.extend(unreadable);
    report.cancelled = cancel.is_cancelled();
    Ok(report)
}

async fn open_places(path: PathBuf) -> Result<Arc<PlaceDatabase>, RunError> {
    let db = tokio::task::spawn_blocking(move || PlaceDatabase::open(&path))
        .await
        .map_err(trackstamp_lib::Error::from)??;
    Ok(Arc::new(db))
}

fn build_geocoder(
    settings: &Settings,
    places: Option<&Arc<PlaceDatabase>>,
) -> Result<Option<Arc<dyn ReverseGeocoder>>, RunError> {
    let geocoder: Arc<dyn ReverseGeocoder> = match settings.geocoder {
        GeocoderKind::None => return Ok(None),
        GeocoderKind::Local => places.ok_or(RunError::MissingPlaces)?.clone(),
        GeocoderKind::Nominatim => {
            let mut config = NominatimConfig {
                timeout: settings.geocode_timeout(),
                ..NominatimConfig::default()
            };
            if let Some(url) = &settings.nominatim_url {
                config.base_url = url.clone();
            }
            if let Some(agent) = &settings.user_agent {
                config.user_agent = agent.clone();
            }
            let capacity = NonZeroUsize::new(NOMINATIM_CACHE_SIZE).unwrap_or(NonZeroUsize::MIN);
            Arc::new(CachedGeocoder::new(NominatimGeocoder::new(&config)?, capacity))
        }
    };
    tracing::info!("Naming places with {}", geocoder.name());
    Ok(Some(geocoder))
}

/// Look up place names for photos that got a new geotag in this run
async fn name_places(
    session: &mut Session,
    geocoder: Arc<dyn ReverseGeocoder>,
    settings: &Settings,
    cancel: &CancellationToken,
) {
    let requests: Vec<_> = session
        .unnamed_photos()
        .into_iter()
        .filter(|(path, _)| session.photo(path).is_some_and(|p| p.is_modified()))
        .collect();
    if requests.is_empty() || cancel.is_cancelled() {
        return;
    }

    tracing::info!("Looking up place names for {} photos", requests.len());
    let places = worker::geocode_photos(
        requests,
        geocoder,
        settings.concurrency,
        settings.geocode_timeout(),
        cancel.clone(),
    )
    .await;
    for (path, place) in places {
        if place.is_empty() {
            continue;
        }
        if let Err(err) = session.set_place(&path, place) {
            tracing::warn!("{}", err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::PhotoStatus;
    use clap::Parser;
    use std::fs;
    use std::time::{Duration, SystemTime};

    const GPX: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<gpx version="1.1" creator="test" xmlns="http://www.topografix.com/GPX/1/1">
  <trk><trkseg>
    <trkpt lat="53.5" lon="-113.5"><ele>600</ele><time>1970-01-01T00:01:40Z</time></trkpt>
    <trkpt lat="53.6" lon="-113.4"><ele>700</ele><time>1970-01-01T00:03:20Z</time></trkpt>
  </trkseg></trk>
</gpx>"#;

    const CITIES: &str = "Edmonton\t53.55014\t-113.46871\tCA\t01\tAmerica/Edmonton\n";

    /// A JPEG without EXIF, so its capture time is the file's modification time
    fn write_jpeg(path: &Path, modified_secs: u64) {
        let mut bytes = vec![0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10];
        bytes.extend_from_slice(b"JFIF\0\x01\x01\0\0\x01\0\x01\0\0");
        bytes.extend_from_slice(&[0xFF, 0xDA, 0x00, 0x02, 0x12, 0x34, 0xFF, 0xD9]);
        fs::write(path, bytes).unwrap();
        fs::File::options()
            .write(true)
            .open(path)
            .unwrap()
            .set_modified(SystemTime::UNIX_EPOCH + Duration::from_secs(modified_secs))
            .unwrap();
    }

    fn settings(dir: &Path, extra: &[&str], files: &[&str]) -> Settings {
        let files = files.iter().map(|f| dir.join(f).display().to_string());
        let args = ["trackstamp", "--tolerance", "30"]
            .into_iter()
            .map(str::to_string)
            .chain(extra.iter().map(|s| s.to_string()))
            .chain(files);
        Settings::try_parse_from(args).unwrap()
    }

    #[test]
    fn test_classify() {
        let files: Vec<PathBuf> = ["ride.GPX", "a.JPG", "b.heic", "notes.txt", "walk.csv"]
            .iter()
            .map(PathBuf::from)
            .collect();
        let inputs = Inputs::classify(&files);

        assert_eq!(inputs.tracks, [PathBuf::from("ride.GPX"), PathBuf::from("walk.csv")]);
        assert_eq!(inputs.photos, [PathBuf::from("a.JPG"), PathBuf::from("b.heic")]);
        assert_eq!(inputs.ignored, [PathBuf::from("notes.txt")]);
    }

    #[tokio::test]
    async fn test_run_and_write() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("ride.gpx"), GPX).unwrap();
        fs::write(dir.path().join("cities.txt"), CITIES).unwrap();
        write_jpeg(&dir.path().join("a.jpg"), 150);
        write_jpeg(&dir.path().join("b.jpg"), 5000);

        let places = dir.path().join("cities.txt").display().to_string();
        let settings = settings(
            dir.path(),
            &["--write", "--geocoder", "local", "--places", places.as_str()],
            &["ride.gpx", "a.jpg", "b.jpg"],
        );
        let report = run(&settings, CancellationToken::new()).await.unwrap();

        assert_eq!(report.tracks[0].points, Some(2));
        assert_eq!(report.photos[0].status, PhotoStatus::Interpolated);
        assert!(report.photos[0].saved);
        assert_eq!(report.photos[0].place.city.as_deref(), Some("Edmonton"));
        assert_eq!(report.photos[1].status, PhotoStatus::Uncovered);
        assert!(!report.photos[1].saved);
        assert_eq!(report.failed_writes(), 0);

        let geotag = ExifBridge
            .read_existing_geotag(&dir.path().join("a.jpg"))
            .unwrap()
            .unwrap();
        assert!((geotag.latitude - 53.55).abs() < 1e-6);
        assert!((geotag.longitude + 113.45).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_dry_run_leaves_files_alone() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("ride.gpx"), GPX).unwrap();
        write_jpeg(&dir.path().join("a.jpg"), 150);
        let before = fs::read(dir.path().join("a.jpg")).unwrap();

        let settings = settings(dir.path(), &[], &["ride.gpx", "a.jpg"]);
        let report = run(&settings, CancellationToken::new()).await.unwrap();

        assert_eq!(report.summary.interpolated, 1);
        assert!(!report.photos[0].saved);
        assert_eq!(fs::read(dir.path().join("a.jpg")).unwrap(), before);
    }

    #[tokio::test]
    async fn test_bad_files_do_not_stop_the_run() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("ride.gpx"), GPX).unwrap();
        fs::write(dir.path().join("broken.gpx"), "<gpx").unwrap();
        write_jpeg(&dir.path().join("a.jpg"), 150);

        let settings = settings(
            dir.path(),
            &[],
            &["broken.gpx", "ride.gpx", "a.jpg", "missing.jpg", "notes.txt"],
        );
        let report = run(&settings, CancellationToken::new()).await.unwrap();

        assert!(report.tracks[0].error.is_some());
        assert_eq!(report.tracks[1].points, Some(2));
        assert_eq!(report.photos[0].status, PhotoStatus::Interpolated);
        assert_eq!(report.photos[1].status, PhotoStatus::Unreadable);
        assert_eq!(report.ignored.len(), 1);
        // Read failures are reported but are not write failures
        assert_eq!(report.failed_writes(), 0);
    }

    #[tokio::test]
    async fn test_local_geocoder_needs_places() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings(dir.path(), &["--geocoder", "local"], &["a.jpg"]);
        assert!(matches!(
            run(&settings, CancellationToken::new()).await,
            Err(RunError::MissingPlaces)
        ));
    }

    #[tokio::test]
    async fn test_cancelled_run_is_partial() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("ride.gpx"), GPX).unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let settings = settings(dir.path(), &[], &["ride.gpx"]);
        let report = run(&settings, cancel).await.unwrap();

        assert!(report.cancelled);
        assert!(report.tracks[0].error.is_some());
    }
}
