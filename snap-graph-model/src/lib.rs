//! Shared data model for snap graphs: segment and node identities, the immutable
//! [`Segment`], and the wire schema of graph tiles.

use std::fmt;

use geo::line_measures::LengthMeasurable;
use geo::{BoundingRect, Coord, Haversine, LineString, Rect};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Precision of the encoded polylines carried by tile payloads.
pub const POLYLINE_PRECISION: u32 = 5;

#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("malformed tile payload: {0}")]
    Json(#[from] serde_json::Error),
    #[error("segment {id} has an invalid polyline: {reason}")]
    InvalidPolyline { id: SegmentId, reason: String },
    #[error("segment {id} has fewer than two coordinates")]
    TooFewCoordinates { id: SegmentId },
    #[error("segment {id} has an invalid length of {meters} meters")]
    InvalidLength { id: SegmentId, meters: f64 },
    #[error("segment {id} has an invalid bbox {bbox:?}")]
    InvalidBbox { id: SegmentId, bbox: [f64; 4] },
}

/// Identifies a segment within one graph. Tiles may send these as numbers or
/// strings; both end up as text.
#[derive(Serialize, Deserialize, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
#[serde(from = "RawId", into = "String")]
pub struct SegmentId(pub String);

#[derive(Deserialize)]
#[serde(untagged)]
enum RawId {
    Number(i64),
    Text(String),
}

impl From<RawId> for SegmentId {
    fn from(raw: RawId) -> Self {
        match raw {
            RawId::Number(x) => SegmentId(x.to_string()),
            RawId::Text(x) => SegmentId(x),
        }
    }
}

impl From<SegmentId> for String {
    fn from(id: SegmentId) -> Self {
        id.0
    }
}

impl From<&str> for SegmentId {
    fn from(id: &str) -> Self {
        SegmentId(id.to_string())
    }
}

impl fmt::Display for SegmentId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A point where segments meet. Nodes only exist as the shared value of
/// [`Segment::start`] and [`Segment::end`].
#[derive(Serialize, Deserialize, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
#[serde(transparent)]
pub struct NodeId(pub u64);

/// An immutable routable edge.
#[derive(Clone, Debug, PartialEq)]
pub struct Segment {
    pub id: SegmentId,
    pub geometry: LineString,
    pub length_meters: f64,
    /// Always covers every coordinate of `geometry`.
    pub bbox: Rect,
    pub start: NodeId,
    pub end: NodeId,
}

impl Segment {
    /// Builds a segment from raw geometry, measuring its haversine length.
    pub fn new(
        id: SegmentId,
        geometry: LineString,
        start: NodeId,
        end: NodeId,
    ) -> Result<Segment, PayloadError> {
        let length_meters = geometry.length(&Haversine);
        Segment::with_length(id, geometry, length_meters, start, end)
    }

    fn with_length(
        id: SegmentId,
        geometry: LineString,
        length_meters: f64,
        start: NodeId,
        end: NodeId,
    ) -> Result<Segment, PayloadError> {
        if geometry.0.len() < 2 {
            return Err(PayloadError::TooFewCoordinates { id });
        }
        if !length_meters.is_finite() || length_meters < 0.0 {
            return Err(PayloadError::InvalidLength {
                id,
                meters: length_meters,
            });
        }
        let Some(bbox) = geometry.bounding_rect() else {
            return Err(PayloadError::TooFewCoordinates { id });
        };
        Ok(Segment {
            id,
            geometry,
            length_meters,
            bbox,
            start,
            end,
        })
    }

    /// Decodes and validates one segment from a tile. The stored bbox is
    /// recomputed from the decoded geometry; the sent one only has to be sane.
    pub fn from_record(record: SegmentRecord) -> Result<Segment, PayloadError> {
        let [min_x, min_y, max_x, max_y] = record.bbox;
        if record.bbox.iter().any(|x| !x.is_finite()) || min_x > max_x || min_y > max_y {
            return Err(PayloadError::InvalidBbox {
                id: record.id,
                bbox: record.bbox,
            });
        }
        let geometry = match polyline::decode_polyline(&record.polyline, POLYLINE_PRECISION) {
            Ok(geometry) => geometry,
            Err(err) => {
                return Err(PayloadError::InvalidPolyline {
                    id: record.id,
                    reason: err.to_string(),
                })
            }
        };
        Segment::with_length(
            record.id,
            geometry,
            record.meters,
            record.start,
            record.end,
        )
    }

    pub fn to_record(&self) -> Result<SegmentRecord, PayloadError> {
        let encoded =
            polyline::encode_coordinates(self.geometry.coords().copied(), POLYLINE_PRECISION)
                .map_err(|err| PayloadError::InvalidPolyline {
                    id: self.id.clone(),
                    reason: err.to_string(),
                })?;
        Ok(SegmentRecord {
            id: self.id.clone(),
            polyline: encoded,
            meters: self.length_meters,
            bbox: [
                self.bbox.min().x,
                self.bbox.min().y,
                self.bbox.max().x,
                self.bbox.max().y,
            ],
            start: self.start,
            end: self.end,
        })
    }

    pub fn first_pt(&self) -> Coord {
        self.geometry.0[0]
    }

    pub fn last_pt(&self) -> Coord {
        self.geometry.0[self.geometry.0.len() - 1]
    }

    /// The middle of the bbox, used as the search heuristic's reference point.
    pub fn center(&self) -> Coord {
        self.bbox.center()
    }

    /// True if the two segments meet at either end.
    pub fn shares_node_with(&self, other: &Segment) -> bool {
        self.start == other.start
            || self.start == other.end
            || self.end == other.start
            || self.end == other.end
    }
}

/// The body of a `200` tile response.
#[derive(Serialize, Deserialize, Debug, Default)]
pub struct TilePayload {
    pub segments: Vec<SegmentRecord>,
    pub links: Vec<LinkRecord>,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct SegmentRecord {
    pub id: SegmentId,
    pub polyline: String,
    pub meters: f64,
    pub bbox: [f64; 4],
    pub start: NodeId,
    pub end: NodeId,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct LinkRecord {
    pub from: SegmentId,
    pub to: Vec<SegmentId>,
}

/// A tile after validation, ready to be merged into a graph.
pub struct DecodedTile {
    pub segments: Vec<Segment>,
    pub links: Vec<(SegmentId, Vec<SegmentId>)>,
}

impl TilePayload {
    pub fn from_slice(bytes: &[u8]) -> Result<TilePayload, PayloadError> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Validates every segment. One bad segment rejects the whole tile.
    pub fn decode(self) -> Result<DecodedTile, PayloadError> {
        let segments = self
            .segments
            .into_iter()
            .map(Segment::from_record)
            .collect::<Result<Vec<_>, _>>()?;
        let links = self
            .links
            .into_iter()
            .map(|link| (link.from, link.to))
            .collect();
        Ok(DecodedTile { segments, links })
    }
}
