use std::collections::HashMap;
use std::sync::Arc;

use geo::{Distance, Haversine, Point};

use snap_graph_model::{Segment, SegmentId};

use crate::lazy_map::LazyPriorityMap;
use crate::priority_queue::PriorityQueue;
use crate::SnapGraph;

/// A* over segments. Moving off a segment costs that segment's whole length, and the heuristic
/// is the great-circle distance between bbox centers. Returns the chain of segments from `start`
/// to `goal`, inclusive.
///
/// With `max_meters`, the search gives up as soon as it pops a segment that is already more than
/// `max_meters` away, and returns the chain leading to that segment instead of `None`. Callers
/// have to check whether the chain actually ends on `goal`.
pub fn search(
    graph: &SnapGraph,
    start: &Arc<Segment>,
    goal: &Arc<Segment>,
    max_meters: Option<f64>,
) -> Option<Vec<Arc<Segment>>> {
    let mut came_from: HashMap<SegmentId, SegmentId> = HashMap::new();
    let mut g_score = LazyPriorityMap::new(f64::INFINITY);
    let mut f_score = LazyPriorityMap::new(f64::INFINITY);
    g_score.set(start.id.clone(), 0.0);
    f_score.set(start.id.clone(), heuristic(start, goal));

    let mut open = PriorityQueue::new();
    open.push(start.id.clone(), |id| f_score.get(id));

    while let Some(current_id) = open.pop(|id| f_score.get(id)) {
        let Some(current) = graph.segment(&current_id) else {
            continue;
        };
        let current_g = g_score.get(&current_id);

        if current_id == goal.id || max_meters.is_some_and(|max| current_g > max) {
            return Some(reconstruct(graph, &came_from, current_id));
        }

        for neighbor_id in graph.neighbors(&current_id) {
            // Links can point into tiles that haven't loaded yet
            let Some(neighbor) = graph.segment(neighbor_id) else {
                continue;
            };
            let tentative = current_g + current.length_meters;
            if tentative < g_score.get(neighbor_id) {
                came_from.insert(neighbor_id.clone(), current_id.clone());
                g_score.set(neighbor_id.clone(), tentative);
                f_score.set(neighbor_id.clone(), tentative + heuristic(neighbor, goal));
                if !open.has(neighbor_id) {
                    open.push(neighbor_id.clone(), |id| f_score.get(id));
                }
            }
        }
    }

    None
}

fn heuristic(segment: &Segment, goal: &Segment) -> f64 {
    Haversine.distance(Point::from(segment.center()), Point::from(goal.center()))
}

fn reconstruct(
    graph: &SnapGraph,
    came_from: &HashMap<SegmentId, SegmentId>,
    last: SegmentId,
) -> Vec<Arc<Segment>> {
    let mut ids = vec![last];
    while let Some(prev) = came_from.get(&ids[ids.len() - 1]) {
        ids.push(prev.clone());
    }
    ids.reverse();
    // Everything in came_from was resolved when it was recorded, and segments are never removed
    ids.iter()
        .filter_map(|id| graph.segment(id).cloned())
        .collect()
}
