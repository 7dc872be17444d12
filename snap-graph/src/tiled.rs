use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use geo::{Coord, LineString, Rect};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use snap_graph_model::{PayloadError, Segment, SegmentId, TilePayload};

use crate::limiter::ConcurrencyLimiter;
use crate::source::{TileResponse, TileSource};
use crate::tiles::{tiles_covering, TileCoord};
use crate::{SnapConfig, SnapGraph};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TiledGraphConfig {
    pub tiles_per_degree: f64,
    /// Across every request
    pub max_concurrent_fetches: usize,
    /// How long to wait before fetching a failed tile again
    pub retry_delay_ms: u64,
    pub snap: SnapConfig,
}

impl Default for TiledGraphConfig {
    fn default() -> Self {
        Self {
            tiles_per_degree: 10.0,
            max_concurrent_fetches: 2,
            retry_delay_ms: 1000,
            snap: SnapConfig::default(),
        }
    }
}

impl TiledGraphConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

/// How the fetch of one tile ended up.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TileProgress {
    Pending,
    /// Ingested, or known to be empty
    Loaded,
    /// Nobody wanted it anymore
    Cancelled,
}

struct InFlight {
    // Distinguishes this fetch from a later fetch of the same tile
    generation: u64,
    requesters: HashSet<u64>,
    cancel: CancellationToken,
    progress: watch::Receiver<TileProgress>,
}

#[derive(Default)]
struct TileBook {
    loaded: BTreeSet<TileCoord>,
    in_flight: HashMap<TileCoord, InFlight>,
    next_generation: u64,
}

struct Shared<S> {
    source: S,
    config: TiledGraphConfig,
    graph: RwLock<SnapGraph>,
    book: Arc<Mutex<TileBook>>,
    limiter: ConcurrencyLimiter,
    next_request: AtomicU64,
}

/// A graph that's loaded one tile at a time, as areas are requested. Queries only see the tiles
/// that have finished loading.
///
/// Cloning is cheap and every clone shares the same graph.
pub struct TiledRoutingGraph<S> {
    shared: Arc<Shared<S>>,
}

impl<S> Clone for TiledRoutingGraph<S> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

/// Interest in the tiles covering one area. Dropping this leaves the fetches running; use
/// `cancel` to stop the ones nobody else needs.
pub struct AreaRequest {
    id: u64,
    tiles: Vec<TileCoord>,
    progress: Vec<watch::Receiver<TileProgress>>,
    book: Arc<Mutex<TileBook>>,
}

impl<S: TileSource> TiledRoutingGraph<S> {
    pub fn new(source: S, config: TiledGraphConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                source,
                graph: RwLock::new(SnapGraph::new(config.snap.clone())),
                book: Arc::new(Mutex::new(TileBook::default())),
                limiter: ConcurrencyLimiter::new(config.max_concurrent_fetches),
                next_request: AtomicU64::new(1),
                config,
            }),
        }
    }

    pub fn config(&self) -> &TiledGraphConfig {
        &self.shared.config
    }

    /// Starts loading every tile covering `bbox` that isn't loaded yet. Tiles already being
    /// fetched for another request are shared, not fetched twice. Must be called from within a
    /// tokio runtime.
    pub fn request_area(&self, bbox: Rect) -> AreaRequest {
        let id = self.shared.next_request.fetch_add(1, Ordering::Relaxed);
        let tiles = tiles_covering(bbox, self.shared.config.tiles_per_degree);

        let mut progress = Vec::new();
        let mut book = lock(&self.shared.book);
        for tile in &tiles {
            if book.loaded.contains(tile) {
                continue;
            }
            if let Some(in_flight) = book.in_flight.get_mut(tile) {
                in_flight.requesters.insert(id);
                progress.push(in_flight.progress.clone());
                continue;
            }

            let generation = book.next_generation;
            book.next_generation += 1;
            let cancel = CancellationToken::new();
            let (tx, rx) = watch::channel(TileProgress::Pending);
            book.in_flight.insert(
                *tile,
                InFlight {
                    generation,
                    requesters: HashSet::from([id]),
                    cancel: cancel.clone(),
                    progress: rx.clone(),
                },
            );
            progress.push(rx);

            debug!("Request {id} starts fetching tile {tile}");
            tokio::spawn(load_tile(
                self.shared.clone(),
                *tile,
                generation,
                cancel,
                tx,
            ));
        }
        drop(book);

        AreaRequest {
            id,
            tiles,
            progress,
            book: self.shared.book.clone(),
        }
    }

    /// Parses a tile payload and merges it into the graph. Returns false if the tile was already
    /// loaded, in which case nothing changes.
    pub fn ingest_tile(&self, tile: TileCoord, bytes: &[u8]) -> Result<bool, PayloadError> {
        self.shared.ingest_tile(tile, bytes)
    }

    pub fn find_nearest(&self, pt: Coord) -> Option<Arc<Segment>> {
        read(&self.shared.graph).find_nearest(pt)
    }

    /// Snaps both points to whatever is loaded and routes between them. See
    /// [`SnapGraph::find_path`].
    pub fn find_path(
        &self,
        start: Coord,
        goal: Coord,
        max_meters: Option<f64>,
    ) -> Option<LineString> {
        read(&self.shared.graph).find_path(start, goal, max_meters)
    }

    pub fn reachable(&self, pt: Coord, max_depth: Option<usize>) -> Option<Vec<Arc<Segment>>> {
        read(&self.shared.graph).reachable(pt, max_depth)
    }

    /// Runs something against one consistent view of the loaded graph. Tiles can't be ingested
    /// while `f` runs, so keep it short. `f` may look at tile bookkeeping (`loaded_tiles`,
    /// `request_area`), but shouldn't query through `self` again.
    pub fn with_graph<T>(&self, f: impl FnOnce(&SnapGraph) -> T) -> T {
        f(&read(&self.shared.graph))
    }

    /// Every loaded segment, sorted by ID
    pub fn segments(&self) -> Vec<Arc<Segment>> {
        let mut segments: Vec<_> = read(&self.shared.graph).segments().cloned().collect();
        segments.sort_by(|a, b| a.id.cmp(&b.id));
        segments
    }

    /// Every link, sorted by the ID it starts from
    pub fn links(&self) -> Vec<(SegmentId, Vec<SegmentId>)> {
        let mut links: Vec<(SegmentId, Vec<SegmentId>)> = read(&self.shared.graph)
            .links()
            .map(|(from, to)| (from.clone(), to.iter().cloned().collect()))
            .collect();
        links.sort_by(|a, b| a.0.cmp(&b.0));
        links
    }

    pub fn dump_node_points(&self) -> String {
        read(&self.shared.graph).dump_node_points()
    }

    pub fn dump_nodes(&self) -> String {
        read(&self.shared.graph).dump_nodes()
    }

    pub fn dump_links(&self) -> String {
        read(&self.shared.graph).dump_links()
    }

    pub fn loaded_tiles(&self) -> Vec<TileCoord> {
        lock(&self.shared.book).loaded.iter().copied().collect()
    }

    pub fn in_flight_tiles(&self) -> Vec<TileCoord> {
        let mut tiles: Vec<_> = lock(&self.shared.book).in_flight.keys().copied().collect();
        tiles.sort();
        tiles
    }
}

impl<S> Shared<S> {
    fn ingest_tile(&self, tile: TileCoord, bytes: &[u8]) -> Result<bool, PayloadError> {
        let decoded = TilePayload::from_slice(bytes)?.decode()?;

        // Always the graph before the book. with_graph callers may read the book while holding
        // the graph.
        let mut graph = write(&self.graph);
        let mut book = lock(&self.book);
        if book.loaded.contains(&tile) {
            return Ok(false);
        }
        let summary = graph.ingest(decoded.segments, decoded.links);
        book.loaded.insert(tile);
        info!(
            "Loaded tile {tile}: {} new segments, {} already known, {} new links",
            summary.new_segments, summary.known_segments, summary.new_links
        );
        Ok(true)
    }

    fn mark_empty(&self, tile: TileCoord) {
        debug!("Tile {tile} has no data");
        lock(&self.book).loaded.insert(tile);
    }
}

async fn load_tile<S: TileSource>(
    shared: Arc<Shared<S>>,
    tile: TileCoord,
    generation: u64,
    cancel: CancellationToken,
    progress: watch::Sender<TileProgress>,
) {
    let delay = shared.config.retry_delay();
    let outcome = loop {
        let attempt = shared
            .limiter
            .run(async {
                // Waiting for a slot can take a while
                if cancel.is_cancelled() {
                    return None;
                }
                Some(shared.source.fetch(tile).await)
            })
            .await;

        let error = match attempt {
            None => break TileProgress::Cancelled,
            Some(Ok(TileResponse::Missing)) => {
                shared.mark_empty(tile);
                break TileProgress::Loaded;
            }
            Some(Ok(TileResponse::Found(bytes))) => match shared.ingest_tile(tile, &bytes) {
                Ok(_) => break TileProgress::Loaded,
                Err(err) => format!("couldn't ingest it: {err}"),
            },
            Some(Err(err)) => err.to_string(),
        };
        warn!("Failed to load tile {tile}, retrying in {delay:?}: {error}");

        tokio::select! {
            _ = cancel.cancelled() => break TileProgress::Cancelled,
            _ = tokio::time::sleep(delay) => {}
        }
    };

    {
        let mut book = lock(&shared.book);
        if book
            .in_flight
            .get(&tile)
            .is_some_and(|x| x.generation == generation)
        {
            book.in_flight.remove(&tile);
        }
    }
    if outcome == TileProgress::Cancelled {
        debug!("Stopped fetching tile {tile}");
    }
    progress.send_replace(outcome);
}

impl AreaRequest {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Every tile covering the requested area, including ones that were already loaded
    pub fn tiles(&self) -> &[TileCoord] {
        &self.tiles
    }

    /// Withdraws interest in this request's tiles. A fetch is only stopped once no other request
    /// needs the tile. Tiles that already loaded stay loaded.
    pub fn cancel(self) {
        let mut book = lock(&self.book);
        for tile in &self.tiles {
            let Some(in_flight) = book.in_flight.get_mut(tile) else {
                continue;
            };
            if !in_flight.requesters.remove(&self.id) || !in_flight.requesters.is_empty() {
                continue;
            }
            in_flight.cancel.cancel();
            book.in_flight.remove(tile);
            debug!("Request {} cancelled tile {tile}", self.id);
        }
    }

    /// Waits until every tile this request started or joined has loaded (or been cancelled by
    /// everyone).
    pub async fn loaded(&mut self) {
        for progress in &mut self.progress {
            // Only fails if the fetching task panicked
            let _ = progress.wait_for(|x| *x != TileProgress::Pending).await;
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}
