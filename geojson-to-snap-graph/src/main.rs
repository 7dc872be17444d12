use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use geojson_to_snap_graph::convert_geojson;

#[derive(Parser)]
struct Args {
    /// Path to a .geojson file to convert
    #[arg(long)]
    input: String,

    /// Directory to write tiles into, as <tileY>/<tileX>
    #[arg(long, default_value = "tiles")]
    output: PathBuf,

    /// How many tiles to split each degree of longitude and latitude into
    #[arg(long, default_value_t = 10.0)]
    tiles_per_degree: f64,
}

fn main() -> Result<()> {
    simple_logger::init_with_level(log::Level::Info)?;
    let args = Args::parse();
    let input = std::fs::read_to_string(&args.input)
        .with_context(|| format!("couldn't read {}", args.input))?;
    let tiles = convert_geojson(&input, args.tiles_per_degree)?;

    for (tile, payload) in tiles {
        let dir = args.output.join(tile.y.to_string());
        std::fs::create_dir_all(&dir)?;
        let path = dir.join(tile.x.to_string());
        let output = BufWriter::new(
            File::create(&path).with_context(|| format!("couldn't create {}", path.display()))?,
        );
        serde_json::to_writer(output, &payload)?;
    }
    Ok(())
}
