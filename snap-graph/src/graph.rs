use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::Arc;

use geo::{Coord, LineString};
use serde::{Deserialize, Serialize};

use snap_graph_model::{Segment, SegmentId};

use crate::astar;
use crate::geometry::{project, segments_to_line};
use crate::spatial::SpatialIndex;

/// How far from a query point to look for segments.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapConfig {
    /// Half the width of the box searched around a query point, in degrees
    pub slop_degrees: f64,
    /// Points further than this from every segment don't snap
    pub max_snap_meters: f64,
}

impl Default for SnapConfig {
    fn default() -> Self {
        Self {
            // 5 arc-seconds
            slop_degrees: 5.0 / 3600.0,
            max_snap_meters: 100.0,
        }
    }
}

/// What one call to [`SnapGraph::ingest`] changed.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct IngestSummary {
    pub new_segments: usize,
    /// Segments skipped because a segment with the same ID was already present
    pub known_segments: usize,
    pub new_links: usize,
}

/// Segments, the links between them, and a spatial index over them. These only change together,
/// through `ingest`.
pub struct SnapGraph {
    segments: HashMap<SegmentId, Arc<Segment>>,
    // Symmetric. May refer to segments that aren't loaded.
    links: HashMap<SegmentId, BTreeSet<SegmentId>>,
    index: SpatialIndex,
    config: SnapConfig,
}

impl SnapGraph {
    pub fn new(config: SnapConfig) -> Self {
        Self {
            segments: HashMap::new(),
            links: HashMap::new(),
            index: SpatialIndex::new(),
            config,
        }
    }

    /// Merges segments and links into the graph. Segments that are already known keep their
    /// existing entry. Links are added in both directions.
    pub fn ingest(
        &mut self,
        segments: Vec<Segment>,
        links: Vec<(SegmentId, Vec<SegmentId>)>,
    ) -> IngestSummary {
        let mut summary = IngestSummary::default();

        let mut fresh = Vec::new();
        for segment in segments {
            if self.segments.contains_key(&segment.id) {
                summary.known_segments += 1;
                continue;
            }
            let segment = Arc::new(segment);
            self.segments.insert(segment.id.clone(), segment.clone());
            fresh.push(segment);
        }
        summary.new_segments = fresh.len();

        if self.index.is_empty() {
            self.index = SpatialIndex::bulk_load(fresh.iter().map(|x| x.as_ref()));
        } else {
            for segment in &fresh {
                self.index.insert(segment);
            }
        }

        for (from, to) in links {
            for to in to {
                if to == from {
                    continue;
                }
                let forwards = self
                    .links
                    .entry(from.clone())
                    .or_default()
                    .insert(to.clone());
                let backwards = self.links.entry(to).or_default().insert(from.clone());
                if forwards || backwards {
                    summary.new_links += 1;
                }
            }
        }

        summary
    }

    pub fn config(&self) -> &SnapConfig {
        &self.config
    }

    pub fn segment(&self, id: &SegmentId) -> Option<&Arc<Segment>> {
        self.segments.get(id)
    }

    /// IDs linked to a segment, in order. Some may not be loaded.
    pub fn neighbors(&self, id: &SegmentId) -> impl Iterator<Item = &SegmentId> {
        self.links.get(id).into_iter().flatten()
    }

    pub fn segments(&self) -> impl Iterator<Item = &Arc<Segment>> {
        self.segments.values()
    }

    pub fn links(&self) -> impl Iterator<Item = (&SegmentId, &BTreeSet<SegmentId>)> {
        self.links.iter()
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn index_len(&self) -> usize {
        self.index.len()
    }

    /// The segment closest to `pt`, if any is within `max_snap_meters`. Ties go to the smallest
    /// ID.
    pub fn find_nearest(&self, pt: Coord) -> Option<Arc<Segment>> {
        let mut candidates: Vec<&SegmentId> =
            self.index.around(pt, self.config.slop_degrees).collect();
        candidates.sort();

        let mut best: Option<(&Arc<Segment>, f64)> = None;
        for id in candidates {
            let Some(segment) = self.segments.get(id) else {
                continue;
            };
            let Some(hit) = project(&segment.geometry, pt) else {
                continue;
            };
            if best.map_or(true, |(_, meters)| hit.meters < meters) {
                best = Some((segment, hit.meters));
            }
        }

        match best {
            Some((segment, meters)) if meters < self.config.max_snap_meters => {
                Some(segment.clone())
            }
            _ => None,
        }
    }

    /// Snaps both points and routes between them, returning the exact line from `start` to
    /// `goal`.
    pub fn find_path(
        &self,
        start: Coord,
        goal: Coord,
        max_meters: Option<f64>,
    ) -> Option<LineString> {
        let start_segment = self.find_nearest(start)?;
        let goal_segment = self.find_nearest(goal)?;
        let chain = astar::search(self, &start_segment, &goal_segment, max_meters)?;
        let line = segments_to_line(start, goal, &goal_segment, &chain);
        if line.0.len() < 2 {
            return None;
        }
        Some(line)
    }

    /// Every loaded segment connected to `from`, including itself, up to `max_depth` links away.
    /// Sorted by ID.
    pub fn reachable_from(&self, from: &SegmentId, max_depth: Option<usize>) -> Vec<Arc<Segment>> {
        let mut seen = HashSet::new();
        let mut result = Vec::new();
        let mut queue = VecDeque::new();
        seen.insert(from.clone());
        queue.push_back((from.clone(), 0));

        while let Some((id, depth)) = queue.pop_front() {
            let Some(segment) = self.segments.get(&id) else {
                continue;
            };
            result.push(segment.clone());
            if max_depth.is_some_and(|max| depth >= max) {
                continue;
            }
            for next in self.neighbors(&id) {
                if seen.insert(next.clone()) {
                    queue.push_back((next.clone(), depth + 1));
                }
            }
        }

        result.sort_by(|a, b| a.id.cmp(&b.id));
        result
    }

    /// Like `reachable_from`, starting from whatever `pt` snaps to.
    pub fn reachable(&self, pt: Coord, max_depth: Option<usize>) -> Option<Vec<Arc<Segment>>> {
        let start = self.find_nearest(pt)?;
        Some(self.reachable_from(&start.id, max_depth))
    }

    /// One line per segment, `"id": x y, x y, ...`, sorted
    pub fn dump_node_points(&self) -> String {
        let mut lines: Vec<String> = self
            .segments
            .values()
            .map(|segment| {
                let coords = segment
                    .geometry
                    .coords()
                    .map(|c| format!("{} {}", c.x, c.y))
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("\"{}\": {}", segment.id, coords)
            })
            .collect();
        lines.sort();
        lines.join("\n")
    }

    /// One line per segment, `"id";`, sorted
    pub fn dump_nodes(&self) -> String {
        let mut lines: Vec<String> = self
            .segments
            .keys()
            .map(|id| format!("\"{id}\";"))
            .collect();
        lines.sort();
        lines.join("\n")
    }

    /// Each link once, `"a" -- "b";` with the smaller ID first, sorted
    pub fn dump_links(&self) -> String {
        let mut lines = Vec::new();
        for (from, to) in &self.links {
            for to in to {
                // Links are symmetric, so this sees every pair exactly once
                if from < to {
                    lines.push(format!("\"{from}\" -- \"{to}\";"));
                }
            }
        }
        lines.sort();
        lines.join("\n")
    }
}

impl Default for SnapGraph {
    fn default() -> Self {
        Self::new(SnapConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use snap_graph_model::NodeId;

    use super::*;

    fn segment(id: &str, pts: Vec<(f64, f64)>, start: u64, end: u64) -> Segment {
        Segment::new(
            SegmentId::from(id),
            LineString::from(pts),
            NodeId(start),
            NodeId(end),
        )
        .unwrap()
    }

    fn ids(ids: &[&str]) -> Vec<SegmentId> {
        ids.iter().map(|x| SegmentId::from(*x)).collect()
    }

    #[test]
    fn test_ingest_twice() {
        let mut graph = SnapGraph::default();
        let batch = || {
            (
                vec![
                    segment("a", vec![(0.0, 0.0), (0.001, 0.0)], 1, 2),
                    segment("b", vec![(0.001, 0.0), (0.002, 0.0)], 2, 3),
                ],
                vec![(SegmentId::from("a"), ids(&["b"]))],
            )
        };

        let (segments, links) = batch();
        let summary = graph.ingest(segments, links);
        assert_eq!(
            summary,
            IngestSummary {
                new_segments: 2,
                known_segments: 0,
                new_links: 1
            }
        );

        let (segments, links) = batch();
        let summary = graph.ingest(segments, links);
        assert_eq!(
            summary,
            IngestSummary {
                new_segments: 0,
                known_segments: 2,
                new_links: 0
            }
        );
        assert_eq!(graph.len(), 2);
        assert_eq!(graph.index_len(), 2);
        assert_eq!(graph.dump_links(), "\"a\" -- \"b\";");
        assert_eq!(
            graph.neighbors(&SegmentId::from("b")).collect::<Vec<_>>(),
            vec![&SegmentId::from("a")]
        );
    }

    #[test]
    fn test_links_to_unloaded_segments() {
        let mut graph = SnapGraph::default();
        graph.ingest(
            vec![segment("a", vec![(0.0, 0.0), (0.001, 0.0)], 1, 2)],
            vec![(SegmentId::from("a"), ids(&["a", "elsewhere"]))],
        );
        assert_eq!(graph.dump_links(), "\"a\" -- \"elsewhere\";");
        assert!(graph.segment(&SegmentId::from("elsewhere")).is_none());

        // The link starts working once the other side shows up
        graph.ingest(
            vec![segment("elsewhere", vec![(0.001, 0.0), (0.002, 0.0)], 2, 3)],
            Vec::new(),
        );
        let found = graph
            .find_path(
                Coord { x: 0.0002, y: 0.0 },
                Coord { x: 0.0018, y: 0.0 },
                None,
            )
            .unwrap();
        assert_eq!(found.0.first(), Some(&Coord { x: 0.0002, y: 0.0 }));
        assert_eq!(found.0.last(), Some(&Coord { x: 0.0018, y: 0.0 }));
    }

    #[test]
    fn test_find_nearest() {
        let mut graph = SnapGraph::default();
        graph.ingest(
            vec![
                segment("near", vec![(0.0, 0.0), (0.001, 0.0)], 1, 2),
                segment("far", vec![(0.0, 0.0008), (0.001, 0.0008)], 3, 4),
            ],
            Vec::new(),
        );

        let hit = graph.find_nearest(Coord { x: 0.0005, y: 0.0001 }).unwrap();
        assert_eq!(hit.id, SegmentId::from("near"));
        let hit = graph.find_nearest(Coord { x: 0.0005, y: 0.0007 }).unwrap();
        assert_eq!(hit.id, SegmentId::from("far"));

        // Inside the search box, but more than 100m away
        assert!(graph.find_nearest(Coord { x: 0.0005, y: -0.00125 }).is_none());
        // Outside the search box entirely
        assert!(graph.find_nearest(Coord { x: 1.0, y: 1.0 }).is_none());

        // Exactly the same distance away; the smaller ID wins
        graph.ingest(
            vec![segment("double", vec![(0.0, 0.0), (0.001, 0.0)], 1, 2)],
            Vec::new(),
        );
        let hit = graph.find_nearest(Coord { x: 0.0005, y: 0.0001 }).unwrap();
        assert_eq!(hit.id, SegmentId::from("double"));
    }

    #[test]
    fn test_reachable() {
        let mut graph = SnapGraph::default();
        graph.ingest(
            vec![
                segment("a", vec![(0.0, 0.0), (0.001, 0.0)], 1, 2),
                segment("b", vec![(0.001, 0.0), (0.002, 0.0)], 2, 3),
                segment("c", vec![(0.002, 0.0), (0.003, 0.0)], 3, 4),
                segment("island", vec![(0.0, 0.01), (0.001, 0.01)], 5, 6),
            ],
            vec![
                (SegmentId::from("a"), ids(&["b"])),
                (SegmentId::from("b"), ids(&["c", "unloaded"])),
            ],
        );

        let names = |segments: Vec<Arc<Segment>>| -> Vec<String> {
            segments.into_iter().map(|x| x.id.0.clone()).collect()
        };
        assert_eq!(
            names(graph.reachable_from(&SegmentId::from("a"), None)),
            vec!["a", "b", "c"]
        );
        assert_eq!(
            names(graph.reachable_from(&SegmentId::from("a"), Some(1))),
            vec!["a", "b"]
        );
        assert_eq!(
            names(graph.reachable(Coord { x: 0.0005, y: 0.01 }, None).unwrap()),
            vec!["island"]
        );
    }
}
