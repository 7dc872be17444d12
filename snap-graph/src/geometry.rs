use std::sync::Arc;

use geo::{Closest, ClosestPoint, Coord, Distance, Haversine, LineString, Point};

use snap_graph_model::Segment;

/// Where a point lands when snapped onto a line.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Projection {
    pub pt: Coord,
    /// The vertex at or before `pt`. If `pt` is exactly on a vertex, that vertex.
    pub index: usize,
    /// Great-circle distance from the query point to `pt`
    pub meters: f64,
}

/// Finds the closest point on `line` to `pt`. Vertices win ties against interior points, and
/// earlier positions win ties against later ones.
pub fn project(line: &LineString, pt: Coord) -> Option<Projection> {
    let target = Point::from(pt);
    let mut best: Option<Projection> = None;
    let mut consider = |candidate: Coord, index: usize| {
        let meters = Haversine.distance(target, Point::from(candidate));
        if best.map_or(true, |b| meters < b.meters) {
            best = Some(Projection {
                pt: candidate,
                index,
                meters,
            });
        }
    };

    for (idx, piece) in line.lines().enumerate() {
        consider(piece.start, idx);
        consider(piece.end, idx + 1);
        match piece.closest_point(&target) {
            Closest::Intersection(p) | Closest::SinglePoint(p) => consider(p.0, idx),
            Closest::Indeterminate => {}
        }
    }
    best
}

/// Turns the chain of segments found by the search into one line from `start` to `goal`. Each
/// segment is oriented using the node IDs it shares with its neighbors in the chain, and the
/// first and last segments are trimmed to where `start` and `goal` snap onto them.
///
/// The goal is only appended when the chain actually ends on `goal_segment`.
pub fn segments_to_line(
    start: Coord,
    goal: Coord,
    goal_segment: &Segment,
    chain: &[Arc<Segment>],
) -> LineString {
    let mut pts = Vec::new();

    match chain {
        [] => {}
        [only] => {
            let coords = &only.geometry.0;
            let (Some(on_start), Some(on_goal)) =
                (project(&only.geometry, start), project(&only.geometry, goal))
            else {
                return LineString::new(Vec::new());
            };

            pts.push(start);
            pts.push(on_start.pt);
            if on_goal.index >= on_start.index {
                pts.extend_from_slice(&coords[on_start.index + 1..on_goal.index + 1]);
            } else {
                pts.extend(coords[on_goal.index + 1..on_start.index + 1].iter().rev());
            }
            pts.push(on_goal.pt);
            pts.push(goal);
        }
        [first, .., last] => {
            let Some(on_start) = project(&first.geometry, start) else {
                return LineString::new(Vec::new());
            };
            pts.push(start);
            pts.push(on_start.pt);
            let coords = &first.geometry.0;
            if leaves_by_end(first, &chain[1]) {
                pts.extend_from_slice(&coords[on_start.index + 1..]);
            } else {
                pts.extend(coords[..on_start.index + 1].iter().rev());
            }

            // Everything strictly between the first and last segment
            for pair in chain[1..].windows(2) {
                let (current, next) = (&pair[0], &pair[1]);
                if leaves_by_end(current, next) {
                    pts.extend_from_slice(&current.geometry.0);
                } else {
                    pts.extend(current.geometry.0.iter().rev());
                }
            }

            let prev = &chain[chain.len() - 2];
            let forwards = last.start == prev.start || last.start == prev.end;
            let coords = &last.geometry.0;
            if last.id == goal_segment.id {
                let Some(on_goal) = project(&last.geometry, goal) else {
                    return LineString::new(Vec::new());
                };
                if forwards {
                    pts.extend_from_slice(&coords[..on_goal.index + 1]);
                } else {
                    pts.extend(coords[on_goal.index + 1..].iter().rev());
                }
                pts.push(on_goal.pt);
                pts.push(goal);
            } else if forwards {
                pts.extend_from_slice(coords);
            } else {
                pts.extend(coords.iter().rev());
            }
        }
    }

    // Neighboring segments share their endpoint, and snapped points often land on a vertex
    pts.dedup();
    LineString::new(pts)
}

// True if `current` connects to `next` through its end node
fn leaves_by_end(current: &Segment, next: &Segment) -> bool {
    current.end == next.start || current.end == next.end
}

#[cfg(test)]
mod tests {
    use snap_graph_model::{NodeId, SegmentId};

    use super::*;

    fn segment(id: &str, pts: Vec<(f64, f64)>, start: u64, end: u64) -> Arc<Segment> {
        Arc::new(
            Segment::new(
                SegmentId::from(id),
                LineString::from(pts),
                NodeId(start),
                NodeId(end),
            )
            .unwrap(),
        )
    }

    fn coords(line: &LineString) -> Vec<(f64, f64)> {
        line.coords().map(|c| (c.x, c.y)).collect()
    }

    #[test]
    fn test_project_prefers_vertices() {
        let line = LineString::from(vec![(0.0, 0.0), (1.0, 0.0), (2.0, 0.0)]);

        let hit = project(&line, Coord { x: 1.0, y: 0.0 }).unwrap();
        assert_eq!(hit.index, 1);
        assert_eq!(hit.pt, Coord { x: 1.0, y: 0.0 });
        assert_eq!(hit.meters, 0.0);

        let hit = project(&line, Coord { x: 1.5, y: 0.001 }).unwrap();
        assert_eq!(hit.index, 1);
        assert_eq!(hit.pt, Coord { x: 1.5, y: 0.0 });

        let hit = project(&line, Coord { x: 2.5, y: 0.0 }).unwrap();
        assert_eq!(hit.index, 2);
        assert_eq!(hit.pt, Coord { x: 2.0, y: 0.0 });
    }

    #[test]
    fn test_one_segment_both_directions() {
        let seg = segment(
            "1",
            vec![(0.0, 0.0), (1.0, 0.0), (2.0, 0.0), (3.0, 0.0)],
            1,
            2,
        );

        let start = Coord { x: 0.5, y: 0.001 };
        let goal = Coord { x: 2.5, y: -0.001 };
        let line = segments_to_line(start, goal, &seg, &[seg.clone()]);
        assert_eq!(
            coords(&line),
            vec![
                (0.5, 0.001),
                (0.5, 0.0),
                (1.0, 0.0),
                (2.0, 0.0),
                (2.5, 0.0),
                (2.5, -0.001)
            ]
        );

        let line = segments_to_line(goal, start, &seg, &[seg.clone()]);
        assert_eq!(
            coords(&line),
            vec![
                (2.5, -0.001),
                (2.5, 0.0),
                (2.0, 0.0),
                (1.0, 0.0),
                (0.5, 0.0),
                (0.5, 0.001)
            ]
        );
    }

    #[test]
    fn test_chain_orientation() {
        // Drawn against the direction of travel
        let first = segment("a", vec![(1.0, 0.0), (0.5, 0.0), (0.0, 0.0)], 10, 11);
        let middle = segment("b", vec![(1.0, 0.0), (2.0, 0.0)], 10, 12);
        // Also drawn backwards
        let last = segment("c", vec![(3.0, 0.0), (2.5, 0.0), (2.0, 0.0)], 13, 12);
        let chain = vec![first, middle, last.clone()];

        let line = segments_to_line(
            Coord { x: 0.25, y: 0.0 },
            Coord { x: 2.75, y: 0.0 },
            &last,
            &chain,
        );
        assert_eq!(
            coords(&line),
            vec![
                (0.25, 0.0),
                (0.5, 0.0),
                (1.0, 0.0),
                (2.0, 0.0),
                (2.5, 0.0),
                (2.75, 0.0)
            ]
        );
    }

    #[test]
    fn test_chain_stopping_short_of_goal() {
        let first = segment("a", vec![(0.0, 0.0), (1.0, 0.0)], 1, 2);
        let second = segment("b", vec![(2.0, 0.0), (1.0, 0.0)], 3, 2);
        let goal = segment("c", vec![(2.0, 0.0), (3.0, 0.0)], 3, 4);

        let line = segments_to_line(
            Coord { x: 0.5, y: 0.0 },
            Coord { x: 2.5, y: 0.0 },
            &goal,
            &[first, second],
        );
        assert_eq!(
            coords(&line),
            vec![(0.5, 0.0), (1.0, 0.0), (2.0, 0.0)]
        );
    }

    #[test]
    fn test_empty_chain() {
        let seg = segment("a", vec![(0.0, 0.0), (1.0, 0.0)], 1, 2);
        let line = segments_to_line(Coord { x: 0.0, y: 0.0 }, Coord { x: 1.0, y: 0.0 }, &seg, &[]);
        assert!(line.0.is_empty());
    }
}
