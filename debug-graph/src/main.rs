use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use geo::{Coord, LineString, Rect};
use geojson::{Feature, FeatureCollection, GeoJson, Geometry};
use log::info;

use snap_graph::{
    build_graph, features_from_geojson, HttpTileSource, NodeId, SnapGraph, TiledGraphConfig,
    TiledRoutingGraph,
};

/// Dumps a snap graph, and optionally a path through it, as GeoJSON
#[derive(Parser)]
struct Args {
    /// Build the graph from a GeoJSON file of LineStrings
    #[arg(long, conflicts_with = "endpoint", required_unless_present = "endpoint")]
    geojson: Option<String>,

    /// Load the graph from tiles served under this URL
    #[arg(long, requires = "bbox")]
    endpoint: Option<String>,

    /// The area to load tiles for, as minX,minY,maxX,maxY
    #[arg(long, value_parser = parse_bbox)]
    bbox: Option<Rect>,

    /// Find a path from here, as lon,lat
    #[arg(long, value_parser = parse_pt, requires = "to")]
    from: Option<Coord>,

    /// Find a path to here, as lon,lat
    #[arg(long, value_parser = parse_pt, requires = "from")]
    to: Option<Coord>,

    /// Give up on paths longer than this
    #[arg(long)]
    max_meters: Option<f64>,

    /// A JSON file overriding the graph settings
    #[arg(long)]
    config: Option<String>,

    #[arg(long, default_value = "debug.geojson")]
    output: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    simple_logger::init_with_level(log::Level::Info)?;
    let args = Args::parse();

    let config: TiledGraphConfig = match &args.config {
        Some(path) => serde_json::from_str(
            &std::fs::read_to_string(path).with_context(|| format!("couldn't read {path}"))?,
        )?,
        None => TiledGraphConfig::default(),
    };

    let gj = if let Some(path) = &args.geojson {
        let input =
            std::fs::read_to_string(path).with_context(|| format!("couldn't read {path}"))?;
        let graph = build_graph(features_from_geojson(&input)?, config.snap)?;
        render(&graph, &args)
    } else {
        // clap makes sure these are both present
        let endpoint = args.endpoint.clone().context("--endpoint is required")?;
        let bbox = args.bbox.context("--bbox is required")?;

        let graph = TiledRoutingGraph::new(HttpTileSource::new(endpoint), config);
        let mut request = graph.request_area(bbox);
        info!("Waiting for {} tiles", request.tiles().len());
        request.loaded().await;
        graph.with_graph(|graph| render(graph, &args))
    };

    std::fs::write(&args.output, serde_json::to_string_pretty(&gj)?)?;
    info!("Wrote {}", args.output.display());
    Ok(())
}

fn render(graph: &SnapGraph, args: &Args) -> GeoJson {
    let mut segments: Vec<_> = graph.segments().collect();
    segments.sort_by(|a, b| a.id.cmp(&b.id));

    let mut features = Vec::new();
    let mut nodes: BTreeMap<NodeId, Coord> = BTreeMap::new();
    for segment in segments {
        let mut f = Feature::from(Geometry::from(&segment.geometry));
        f.set_property("segment_id", segment.id.to_string());
        f.set_property("start", segment.start.0);
        f.set_property("end", segment.end.0);
        f.set_property("length_meters", segment.length_meters);
        f.set_property(
            "links",
            graph
                .neighbors(&segment.id)
                .map(|x| x.to_string())
                .collect::<Vec<_>>(),
        );
        features.push(f);

        nodes.insert(segment.start, segment.first_pt());
        nodes.insert(segment.end, segment.last_pt());
    }
    for (id, pt) in nodes {
        let mut f = Feature::from(Geometry::from(geojson::Value::Point(vec![pt.x, pt.y])));
        f.set_property("node_id", id.0);
        features.push(f);
    }

    if let (Some(from), Some(to)) = (args.from, args.to) {
        for pt in [from, to] {
            let mut f = Feature::from(Geometry::from(geojson::Value::Point(vec![pt.x, pt.y])));
            f.set_property(
                "snapped_to",
                graph.find_nearest(pt).map(|x| x.id.to_string()),
            );
            features.push(f);
        }

        match graph.find_path(from, to, args.max_meters) {
            Some(path) => {
                info!("Found a path with {} points", path.0.len());
                features.push(path_feature(&path));
            }
            None => info!("No path from {from:?} to {to:?}"),
        }
    }

    GeoJson::from(features.into_iter().collect::<FeatureCollection>())
}

fn path_feature(path: &LineString) -> Feature {
    let mut f = Feature::from(Geometry::from(path));
    f.set_property("path", true);
    f
}

fn parse_pt(input: &str) -> Result<Coord, String> {
    let values = parse_numbers(input, 2)?;
    Ok(Coord {
        x: values[0],
        y: values[1],
    })
}

fn parse_bbox(input: &str) -> Result<Rect, String> {
    let values = parse_numbers(input, 4)?;
    Ok(Rect::new(
        Coord {
            x: values[0],
            y: values[1],
        },
        Coord {
            x: values[2],
            y: values[3],
        },
    ))
}

fn parse_numbers(input: &str, count: usize) -> Result<Vec<f64>, String> {
    let values = input
        .split(',')
        .map(|x| x.trim().parse::<f64>().map_err(|err| format!("{x}: {err}")))
        .collect::<Result<Vec<_>, _>>()?;
    if values.len() != count {
        return Err(format!("expected {count} comma-separated numbers"));
    }
    Ok(values)
}
