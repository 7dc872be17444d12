use geo::{Coord, Rect};
use rstar::primitives::{GeomWithData, Rectangle};
use rstar::{RTree, AABB};

use snap_graph_model::{Segment, SegmentId};

type Entry = GeomWithData<Rectangle<[f64; 2]>, SegmentId>;

/// An R-tree over segment bboxes. Entries refer to segments by ID only.
pub struct SpatialIndex {
    tree: RTree<Entry>,
}

impl SpatialIndex {
    pub fn new() -> Self {
        Self { tree: RTree::new() }
    }

    pub fn bulk_load<'a>(segments: impl IntoIterator<Item = &'a Segment>) -> Self {
        Self {
            tree: RTree::bulk_load(segments.into_iter().map(entry).collect()),
        }
    }

    pub fn insert(&mut self, segment: &Segment) {
        self.tree.insert(entry(segment));
    }

    pub fn len(&self) -> usize {
        self.tree.size()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.size() == 0
    }

    /// Segments whose bbox intersects (or touches) `bbox`
    pub fn overlapping(&self, bbox: Rect) -> impl Iterator<Item = &SegmentId> {
        let envelope = AABB::from_corners(
            [bbox.min().x, bbox.min().y],
            [bbox.max().x, bbox.max().y],
        );
        self.tree
            .locate_in_envelope_intersecting(&envelope)
            .map(|x| &x.data)
    }

    /// Segments whose bbox comes within `slop` degrees of a point
    pub fn around(&self, pt: Coord, slop: f64) -> impl Iterator<Item = &SegmentId> {
        self.overlapping(Rect::new(
            Coord {
                x: pt.x - slop,
                y: pt.y - slop,
            },
            Coord {
                x: pt.x + slop,
                y: pt.y + slop,
            },
        ))
    }
}

impl Default for SpatialIndex {
    fn default() -> Self {
        Self::new()
    }
}

fn entry(segment: &Segment) -> Entry {
    GeomWithData::new(
        Rectangle::from_corners(
            [segment.bbox.min().x, segment.bbox.min().y],
            [segment.bbox.max().x, segment.bbox.max().y],
        ),
        segment.id.clone(),
    )
}
