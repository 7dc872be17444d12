use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use geo::{Coord, Geometry, LineString};
use geojson::feature::Id;
use geojson::{GeoJson, JsonObject};
use log::info;

use snap_graph_model::{NodeId, Segment, SegmentId};

use crate::{GraphError, SnapConfig, SnapGraph};

/// One line feature to build a graph from.
#[derive(Clone, Debug)]
pub struct InputFeature {
    pub id: String,
    /// A LineString or MultiLineString
    pub geometry: Geometry,
    pub properties: Option<JsonObject>,
}

/// Reads the features out of a GeoJSON FeatureCollection. Every feature needs an ID; numeric
/// IDs are turned into text.
pub fn features_from_geojson(input: &str) -> Result<Vec<InputFeature>, GraphError> {
    let GeoJson::FeatureCollection(collection) = input.parse::<GeoJson>()? else {
        return Err(GraphError::NotFeatures);
    };

    let mut features = Vec::new();
    for (index, feature) in collection.features.into_iter().enumerate() {
        let id = match feature.id {
            Some(Id::String(x)) => x,
            Some(Id::Number(x)) => x.to_string(),
            None => return Err(GraphError::MissingFeatureId { index }),
        };
        let Some(geometry) = feature.geometry else {
            return Err(GraphError::UnsupportedGeometry { id });
        };
        features.push(InputFeature {
            id,
            geometry: Geometry::try_from(geometry)?,
            properties: feature.properties,
        });
    }
    Ok(features)
}

impl SnapGraph {
    pub fn from_features(
        features: Vec<InputFeature>,
        config: SnapConfig,
    ) -> Result<SnapGraph, GraphError> {
        build_graph(features, config)
    }
}

/// Vertices closer than this on both axes are the same point
pub const COINCIDENT_DEGREES: f64 = 9e-7;

/// Splits features wherever they touch another feature, then links every pair of segments that
/// share an endpoint.
///
/// Vertices coincide when they're within [`COINCIDENT_DEGREES`] of each other on both axes. A
/// segment keeps its feature's ID if the feature wasn't split, and is otherwise called
/// `<feature>/<n>`, counting from 1. Each part of a MultiLineString is first treated as its own
/// feature, `<feature>_<i>`.
pub fn build_graph(
    features: Vec<InputFeature>,
    config: SnapConfig,
) -> Result<SnapGraph, GraphError> {
    let num_features = features.len();
    let lines = explode(features)?;

    let mut vertices = Vertices::default();
    let vertex_ids: Vec<Vec<usize>> = lines
        .iter()
        .map(|line| line.coords.iter().map(|pt| vertices.id(*pt)).collect())
        .collect();
    for (line, ids) in lines.iter().zip(&vertex_ids) {
        if ids.iter().all(|id| *id == ids[0]) {
            return Err(GraphError::DegenerateFeature {
                id: line.id.clone(),
            });
        }
    }

    // Which lines have each vertex
    let mut touching: HashMap<usize, Vec<usize>> = HashMap::new();
    for (idx, ids) in vertex_ids.iter().enumerate() {
        for vertex in ids {
            let users = touching.entry(*vertex).or_default();
            if users.last() != Some(&idx) {
                users.push(idx);
            }
        }
    }

    let mut pieces: Vec<(SegmentId, &[Coord], usize, usize)> = Vec::new();
    let mut seen_ids = HashSet::new();
    for (idx, (line, ids)) in lines.iter().zip(&vertex_ids).enumerate() {
        let split = split_line(idx, ids, &touching);
        let single = split.len() == 1;
        for (ordinal, (first, last)) in split.into_iter().enumerate() {
            let id = if single {
                SegmentId(line.id.clone())
            } else {
                SegmentId(format!("{}/{}", line.id, ordinal + 1))
            };
            if !seen_ids.insert(id.clone()) {
                return Err(GraphError::DuplicateSegmentId { id });
            }
            pieces.push((id, &line.coords[first..=last], ids[first], ids[last]));
        }
    }

    let mut node_ids: HashMap<usize, NodeId> = HashMap::new();
    let mut node = |vertex: usize| -> NodeId {
        let next = NodeId(node_ids.len() as u64);
        *node_ids.entry(vertex).or_insert(next)
    };
    let mut segments = Vec::new();
    for (id, coords, first, last) in pieces {
        let start = node(first);
        let end = node(last);
        segments.push(Segment::new(
            id,
            LineString::new(coords.to_vec()),
            start,
            end,
        )?);
    }

    let mut at_node: BTreeMap<NodeId, Vec<usize>> = BTreeMap::new();
    for (idx, segment) in segments.iter().enumerate() {
        at_node.entry(segment.start).or_default().push(idx);
        if segment.end != segment.start {
            at_node.entry(segment.end).or_default().push(idx);
        }
    }
    let mut links = Vec::new();
    for (idx, segment) in segments.iter().enumerate() {
        let mut neighbors = BTreeSet::new();
        for node in [segment.start, segment.end] {
            for other in &at_node[&node] {
                if *other != idx {
                    neighbors.insert(*other);
                }
            }
        }
        if !neighbors.is_empty() {
            links.push((
                segment.id.clone(),
                neighbors
                    .into_iter()
                    .map(|other| segments[other].id.clone())
                    .collect(),
            ));
        }
    }

    let mut graph = SnapGraph::new(config);
    let summary = graph.ingest(segments, links);
    info!(
        "Built a graph with {} segments and {} links from {} features ({} nodes)",
        summary.new_segments,
        summary.new_links,
        num_features,
        node_ids.len()
    );
    Ok(graph)
}

struct Line {
    id: String,
    coords: Vec<Coord>,
}

fn explode(features: Vec<InputFeature>) -> Result<Vec<Line>, GraphError> {
    let mut lines = Vec::new();
    for feature in features {
        match feature.geometry {
            Geometry::LineString(ls) => lines.push(Line {
                id: feature.id,
                coords: ls.0,
            }),
            Geometry::MultiLineString(mls) => {
                for (i, ls) in mls.0.into_iter().enumerate() {
                    lines.push(Line {
                        id: format!("{}_{i}", feature.id),
                        coords: ls.0,
                    });
                }
            }
            _ => return Err(GraphError::UnsupportedGeometry { id: feature.id }),
        }
    }
    Ok(lines)
}

// Groups coincident vertices. A vertex joins the first known vertex close enough to it, so the
// grid only narrows down the candidates; cells are COINCIDENT_DEGREES wide, so anything close
// enough is in the same or a neighboring cell.
#[derive(Default)]
struct Vertices {
    cells: HashMap<(i64, i64), Vec<usize>>,
    points: Vec<Coord>,
}

impl Vertices {
    fn id(&mut self, pt: Coord) -> usize {
        let (x, y) = cell(pt);
        for dx in -1..=1 {
            for dy in -1..=1 {
                let Some(candidates) = self.cells.get(&(x + dx, y + dy)) else {
                    continue;
                };
                if let Some(id) = candidates
                    .iter()
                    .find(|id| coincide(self.points[**id], pt))
                {
                    return *id;
                }
            }
        }

        let id = self.points.len();
        self.points.push(pt);
        self.cells.entry((x, y)).or_default().push(id);
        id
    }
}

fn cell(pt: Coord) -> (i64, i64) {
    (
        (pt.x / COINCIDENT_DEGREES).floor() as i64,
        (pt.y / COINCIDENT_DEGREES).floor() as i64,
    )
}

fn coincide(a: Coord, b: Coord) -> bool {
    (a.x - b.x).abs() < COINCIDENT_DEGREES && (a.y - b.y).abs() < COINCIDENT_DEGREES
}

// Cuts a line at every interior vertex that another line also has. Returns the first and last
// index of each piece.
fn split_line(
    idx: usize,
    ids: &[usize],
    touching: &HashMap<usize, Vec<usize>>,
) -> Vec<(usize, usize)> {
    let mut pieces = Vec::new();
    let mut offset = 0;
    for p in 1..ids.len() - 1 {
        if ids[p] == ids[offset] {
            continue;
        }
        if touching[&ids[p]].iter().any(|other| *other != idx) {
            pieces.push((offset, p));
            offset = p;
        }
    }

    let last = ids.len() - 1;
    match pieces.last_mut() {
        // Repeated vertices after the last cut would make an empty segment
        Some(piece) if ids[offset..].iter().all(|id| *id == ids[offset]) => piece.1 = last,
        _ => pieces.push((offset, last)),
    }
    pieces
}
