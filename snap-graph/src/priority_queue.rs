// Based on https://github.com/mourner/tinyqueue (ISC)

use std::collections::HashSet;
use std::hash::Hash;

/// A binary min-heap that doesn't own the priorities of its items. Every call that reorders the
/// heap takes a lookup for the current priority of an item, and comparisons are re-evaluated on
/// every sift. Callers are free to change priorities between calls.
pub struct PriorityQueue<T> {
    data: Vec<T>,
    members: HashSet<T>,
}

impl<T: Clone + Eq + Hash> PriorityQueue<T> {
    pub fn new() -> Self {
        Self {
            data: Vec::new(),
            members: HashSet::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn has(&self, item: &T) -> bool {
        self.members.contains(item)
    }

    /// The caller must check `has` first; pushing an item twice corrupts membership tracking.
    pub fn push<F: FnMut(&T) -> f64>(&mut self, item: T, mut priority: F) {
        debug_assert!(!self.has(&item));
        self.members.insert(item.clone());
        self.data.push(item);
        self.sift_up(self.data.len() - 1, &mut priority);
    }

    pub fn pop<F: FnMut(&T) -> f64>(&mut self, mut priority: F) -> Option<T> {
        if self.data.is_empty() {
            return None;
        }
        let top = self.data.swap_remove(0);
        if !self.data.is_empty() {
            self.sift_down(0, &mut priority);
        }
        self.members.remove(&top);
        Some(top)
    }

    fn sift_up<F: FnMut(&T) -> f64>(&mut self, mut pos: usize, priority: &mut F) {
        while pos > 0 {
            let parent = (pos - 1) / 2;
            if priority(&self.data[pos]) >= priority(&self.data[parent]) {
                break;
            }
            self.data.swap(pos, parent);
            pos = parent;
        }
    }

    fn sift_down<F: FnMut(&T) -> f64>(&mut self, mut pos: usize, priority: &mut F) {
        let half = self.data.len() / 2;
        while pos < half {
            let mut best = 2 * pos + 1;
            let right = best + 1;
            if right < self.data.len() && priority(&self.data[right]) < priority(&self.data[best])
            {
                best = right;
            }
            if priority(&self.data[best]) >= priority(&self.data[pos]) {
                break;
            }
            self.data.swap(pos, best);
            pos = best;
        }
    }
}

impl<T: Clone + Eq + Hash> Default for PriorityQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}
