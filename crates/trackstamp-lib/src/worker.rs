//! Background batch operations
//!
//! Every long-running step of a geotagging run lives here as an async function: parsing
//! runs on the blocking pool (and rayon inside it), network lookups run as tasks with
//! bounded concurrency. Each function takes a [`CancellationToken`] checked between units
//! of work and returns what finished before cancellation instead of discarding it.

use crate::geocode::lookup_or_blank;
use crate::{
    CorrelationJob, CorrelationOutcome, Error, Geotag, MetadataBridge, Photo, Place,
    ReverseGeocoder, Result, Track, parser,
};
use rayon::prelude::*;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// A pending write of one photo's geotag and place names
#[derive(Clone, Debug, PartialEq)]
pub struct SaveRequest {
    pub path: PathBuf,
    pub geotag: Geotag,
    pub place: Place,
}

/// Run blocking work on tokio's blocking pool
///
/// Wraps the closure in a profiling scope so tasks are identifiable in traces.
async fn spawn_blocking<F, R>(f: F) -> Result<R>
where
    F: FnOnce() -> R + Send + 'static,
    R: Send + 'static,
{
    let handle = tokio::task::spawn_blocking(move || {
        #[cfg(feature = "profiling")]
        profiling::scope!(
            "worker::spawn_blocking",
            format!("task_type={}", std::any::type_name::<F>()).as_str()
        );
        f()
    });
    Ok(handle.await?)
}

/// Parse track files in parallel
pub async fn load_tracks(
    paths: Vec<PathBuf>,
    cancel: CancellationToken,
) -> Vec<(PathBuf, Result<Arc<Track>>)> {
    let fallback = paths.clone();
    match spawn_blocking(move || parser::load_track_files(paths, &cancel)).await {
        Ok(results) => results,
        Err(err) => failed_all(fallback, &err),
    }
}

/// Read capture times, existing geotags and place names in parallel
pub async fn load_photos(
    paths: Vec<PathBuf>,
    bridge: Arc<dyn MetadataBridge>,
    cancel: CancellationToken,
) -> Vec<(PathBuf, Result<Photo>)> {
    let fallback = paths.clone();
    let task = move || {
        paths
            .into_par_iter()
            .map(|path| {
                if cancel.is_cancelled() {
                    return (path, Err(Error::Cancelled));
                }
                let result = Photo::load(&path, bridge.as_ref());
                (path, result)
            })
            .collect::<Vec<_>>()
    };
    match spawn_blocking(task).await {
        Ok(results) => results,
        Err(err) => failed_all(fallback, &err),
    }
}

/// Run a correlation job off the async threads
pub async fn correlate(
    job: CorrelationJob,
    cancel: CancellationToken,
) -> Result<CorrelationOutcome> {
    spawn_blocking(move || job.run(&cancel)).await
}

/// Reverse-geocode positions with at most `concurrency` lookups in flight
///
/// Every lookup has its own `timeout`; failures yield blank places. Positions not yet
/// looked up when `cancel` fires are left out of the result.
pub async fn geocode_photos(
    requests: Vec<(PathBuf, Geotag)>,
    geocoder: Arc<dyn ReverseGeocoder>,
    concurrency: usize,
    timeout: Duration,
    cancel: CancellationToken,
) -> Vec<(PathBuf, Place)> {
    let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
    let mut tasks = JoinSet::new();

    for (path, geotag) in requests {
        let geocoder = geocoder.clone();
        let semaphore = semaphore.clone();
        let cancel = cancel.clone();
        tasks.spawn(async move {
            let _permit = tokio::select! {
                _ = cancel.cancelled() => return None,
                permit = semaphore.acquire_owned() => permit.ok()?,
            };
            let lookup = lookup_or_blank(
                geocoder.as_ref(),
                geotag.latitude,
                geotag.longitude,
                timeout,
            );
            let place = tokio::select! {
                _ = cancel.cancelled() => return None,
                place = lookup => place,
            };
            Some((path, place))
        });
    }

    let mut places = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(Some(done)) => places.push(done),
            Ok(None) => {}
            Err(err) => tracing::error!("Geocoding task failed: {}", err),
        }
    }
    // Tasks complete in any order
    places.sort_by(|a, b| a.0.cmp(&b.0));
    places
}

/// Write geotags into photo files, one at a time
pub async fn save_photos(
    requests: Vec<SaveRequest>,
    bridge: Arc<dyn MetadataBridge>,
    cancel: CancellationToken,
) -> Vec<(PathBuf, Result<()>)> {
    let fallback: Vec<PathBuf> = requests.iter().map(|r| r.path.clone()).collect();
    let task = move || {
        requests
            .into_iter()
            .map(|request| {
                if cancel.is_cancelled() {
                    return (request.path, Err(Error::Cancelled));
                }
                let result = bridge
                    .write_geotag(&request.path, &request.geotag, &request.place)
                    .map_err(|source| Error::Write {
                        path: request.path.clone(),
                        source,
                    });
                if let Err(err) = &result {
                    tracing::warn!("{}", err);
                }
                (request.path, result)
            })
            .collect::<Vec<_>>()
    };
    match spawn_blocking(task).await {
        Ok(results) => results,
        Err(err) => failed_all(fallback, &err),
    }
}

/// Report a crashed batch against each of its items
fn failed_all<T>(paths: Vec<PathBuf>, err: &Error) -> Vec<(PathBuf, Result<T>)> {
    tracing::error!("Background batch failed: {}", err);
    paths
        .into_iter()
        .map(|path| {
            let result = Err(Error::Io(std::io::Error::other(err.to_string())));
            (path, result)
        })
        .collect()
}
