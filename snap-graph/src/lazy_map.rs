use std::collections::HashMap;
use std::hash::Hash;

/// A map from keys to scores, where absent keys read as a fixed default. Reading a missing key
/// stores the default, so the map only grows to cover keys that have been touched.
pub struct LazyPriorityMap<K> {
    values: HashMap<K, f64>,
    default: f64,
}

impl<K: Clone + Eq + Hash> LazyPriorityMap<K> {
    pub fn new(default: f64) -> Self {
        Self {
            values: HashMap::new(),
            default,
        }
    }

    pub fn get(&mut self, key: &K) -> f64 {
        if let Some(value) = self.values.get(key) {
            return *value;
        }
        self.values.insert(key.clone(), self.default);
        self.default
    }

    pub fn set(&mut self, key: K, value: f64) {
        self.values.insert(key, value);
    }

    /// How many keys have been read or written
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_materialize() {
        let mut map = LazyPriorityMap::new(f64::INFINITY);
        assert!(map.is_empty());
        assert_eq!(map.get(&"a"), f64::INFINITY);
        assert_eq!(map.len(), 1);

        map.set("b", 3.0);
        assert_eq!(map.get(&"b"), 3.0);
        map.set("a", 1.5);
        assert_eq!(map.get(&"a"), 1.5);
        assert_eq!(map.len(), 2);
    }
}
