use std::collections::BTreeMap;

use anyhow::{bail, Result};
use log::info;

use snap_graph::{
    build_graph, features_from_geojson, tiles_touching, SnapConfig, SnapGraph, TileCoord,
};
use snap_graph_model::{LinkRecord, Segment, SegmentId, TilePayload};

/// Builds a graph from a GeoJSON FeatureCollection of LineStrings and MultiLineStrings, then
/// splits it into tiles. Every feature needs an ID.
pub fn convert_geojson(
    input_string: &str,
    tiles_per_degree: f64,
) -> Result<BTreeMap<TileCoord, TilePayload>> {
    let graph = graph_from_geojson(input_string)?;
    partition(&graph, tiles_per_degree)
}

pub fn graph_from_geojson(input_string: &str) -> Result<SnapGraph> {
    let features = features_from_geojson(input_string)?;
    if features.is_empty() {
        bail!("The input has no features");
    }
    Ok(build_graph(features, SnapConfig::default())?)
}

/// Puts each segment, with its links, into every tile its bbox touches.
pub fn partition(
    graph: &SnapGraph,
    tiles_per_degree: f64,
) -> Result<BTreeMap<TileCoord, TilePayload>> {
    if !(tiles_per_degree > 0.0) {
        bail!("tiles_per_degree must be positive, not {tiles_per_degree}");
    }

    let mut tiles: BTreeMap<TileCoord, TilePayload> = BTreeMap::new();
    for segment in sorted_segments(graph) {
        let record = segment.to_record()?;
        let links = links_from(graph, &segment.id);
        for tile in tiles_touching(segment.bbox, tiles_per_degree) {
            let payload = tiles.entry(tile).or_default();
            payload.segments.push(record.clone());
            if let Some(links) = &links {
                payload.links.push(links.clone());
            }
        }
    }

    info!("Split {} segments into {} tiles", graph.len(), tiles.len());
    Ok(tiles)
}

/// The whole graph as one payload
pub fn single_payload(graph: &SnapGraph) -> Result<TilePayload> {
    let mut payload = TilePayload::default();
    for segment in sorted_segments(graph) {
        payload.segments.push(segment.to_record()?);
        if let Some(links) = links_from(graph, &segment.id) {
            payload.links.push(links);
        }
    }
    Ok(payload)
}

fn sorted_segments(graph: &SnapGraph) -> Vec<&Segment> {
    let mut segments: Vec<_> = graph.segments().map(|x| x.as_ref()).collect();
    segments.sort_by(|a, b| a.id.cmp(&b.id));
    segments
}

fn links_from(graph: &SnapGraph, id: &SegmentId) -> Option<LinkRecord> {
    let to: Vec<SegmentId> = graph.neighbors(id).cloned().collect();
    if to.is_empty() {
        return None;
    }
    Some(LinkRecord {
        from: id.clone(),
        to,
    })
}

#[cfg(target_arch = "wasm32")]
use std::sync::Once;
#[cfg(target_arch = "wasm32")]
use wasm_bindgen::prelude::*;

#[cfg(target_arch = "wasm32")]
static START: Once = Once::new();

/// Returns one tile payload, as JSON, holding the whole graph.
#[cfg(target_arch = "wasm32")]
#[wasm_bindgen()]
pub fn convert(input_string: String) -> Result<String, JsValue> {
    START.call_once(|| {
        console_log::init_with_level(log::Level::Info).unwrap();
        console_error_panic_hook::set_once();
    });

    let payload = graph_from_geojson(&input_string)
        .and_then(|graph| single_payload(&graph))
        .map_err(|err| JsValue::from_str(&err.to_string()))?;
    serde_json::to_string(&payload).map_err(|err| JsValue::from_str(&err.to_string()))
}
