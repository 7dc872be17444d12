use std::fmt;

use geo::{Coord, Rect};

/// One cell of the fixed grid that graph tiles are served on.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct TileCoord {
    pub x: i64,
    pub y: i64,
}

impl TileCoord {
    /// The tile containing a point.
    pub fn containing(pt: Coord, tiles_per_degree: f64) -> TileCoord {
        TileCoord {
            x: (pt.x * tiles_per_degree).floor() as i64,
            y: (pt.y * tiles_per_degree).floor() as i64,
        }
    }
}

/// Formats as the tile's path under the endpoint, `<tileY>/<tileX>`
impl fmt::Display for TileCoord {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}/{}", self.y, self.x)
    }
}

/// Every tile that a request for `bbox` should load. The min corner rounds down and the max
/// corner rounds up, so this errs on the side of loading a neighboring tile.
pub fn tiles_covering(bbox: Rect, tiles_per_degree: f64) -> Vec<TileCoord> {
    let min_x = (bbox.min().x * tiles_per_degree).floor() as i64;
    let min_y = (bbox.min().y * tiles_per_degree).floor() as i64;
    let max_x = (bbox.max().x * tiles_per_degree).ceil() as i64;
    let max_y = (bbox.max().y * tiles_per_degree).ceil() as i64;

    let mut tiles = Vec::new();
    for x in min_x..=max_x {
        for y in min_y..=max_y {
            tiles.push(TileCoord { x, y });
        }
    }
    tiles
}

/// The tiles that actually contain some part of `bbox`. Used when partitioning a graph into
/// tiles, where every segment must land in each tile it touches.
pub fn tiles_touching(bbox: Rect, tiles_per_degree: f64) -> Vec<TileCoord> {
    let min = TileCoord::containing(bbox.min(), tiles_per_degree);
    let max = TileCoord::containing(bbox.max(), tiles_per_degree);

    let mut tiles = Vec::new();
    for x in min.x..=max.x {
        for y in min.y..=max.y {
            tiles.push(TileCoord { x, y });
        }
    }
    tiles
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tiles_covering() {
        let bbox = Rect::new(
            Coord { x: -3.75, y: 56.71 },
            Coord { x: -3.72, y: 56.74 },
        );
        let tiles = tiles_covering(bbox, 10.0);
        assert_eq!(
            tiles,
            vec![
                TileCoord { x: -38, y: 567 },
                TileCoord { x: -38, y: 568 },
                TileCoord { x: -37, y: 567 },
                TileCoord { x: -37, y: 568 },
            ]
        );
        assert_eq!(tiles[1].to_string(), "568/-38");
    }

    #[test]
    fn test_tiles_touching() {
        let bbox = Rect::new(Coord { x: 0.05, y: 0.15 }, Coord { x: 0.25, y: 0.18 });
        assert_eq!(
            tiles_touching(bbox, 10.0),
            vec![
                TileCoord { x: 0, y: 1 },
                TileCoord { x: 1, y: 1 },
                TileCoord { x: 2, y: 1 },
            ]
        );
    }
}
