//! Snaps points onto a network of lines and finds paths between them. The network comes either
//! from a set of GeoJSON features ([`build_graph`]) or from graph tiles fetched as areas are
//! needed ([`TiledRoutingGraph`]).

mod astar;
mod builder;
mod geometry;
mod graph;
mod lazy_map;
mod limiter;
mod priority_queue;
mod source;
mod spatial;
mod tiled;
mod tiles;

use thiserror::Error;

pub use snap_graph_model::{NodeId, PayloadError, Segment, SegmentId, TilePayload};

pub use self::astar::search;
pub use self::builder::{build_graph, features_from_geojson, InputFeature, COINCIDENT_DEGREES};
pub use self::geometry::{project, segments_to_line, Projection};
pub use self::graph::{IngestSummary, SnapConfig, SnapGraph};
pub use self::lazy_map::LazyPriorityMap;
pub use self::limiter::ConcurrencyLimiter;
pub use self::priority_queue::PriorityQueue;
pub use self::source::{FetchError, HttpTileSource, TileResponse, TileSource};
pub use self::spatial::SpatialIndex;
pub use self::tiled::{AreaRequest, TileProgress, TiledGraphConfig, TiledRoutingGraph};
pub use self::tiles::{tiles_covering, tiles_touching, TileCoord};

#[derive(Debug, Error)]
pub enum GraphError {
    #[error("feature {id} has fewer than two distinct points")]
    DegenerateFeature { id: String },
    #[error("feature {id} isn't a LineString or MultiLineString")]
    UnsupportedGeometry { id: String },
    #[error("feature #{index} has no ID")]
    MissingFeatureId { index: usize },
    #[error("more than one segment is called {id}")]
    DuplicateSegmentId { id: SegmentId },
    #[error("input isn't a FeatureCollection")]
    NotFeatures,
    #[error(transparent)]
    GeoJson(#[from] geojson::Error),
    #[error(transparent)]
    Payload(#[from] PayloadError),
}
