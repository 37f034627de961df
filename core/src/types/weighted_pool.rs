//! Weighted random selection.

use crate::types::random::{static_random_f64, RandomSource};
use serde::{Deserialize, Serialize};

/// A pool of items selected proportionally to their weights.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "Vec<(f64, T)>", into = "Vec<(f64, T)>")]
pub struct WeightedPool<T: Clone> {
    items: Vec<(f64, T)>,
    total_weight: f64,
}

impl<T: Clone> Default for WeightedPool<T> {
    fn default() -> Self {
        WeightedPool {
            items: Vec::new(),
            total_weight: 0.0,
        }
    }
}

impl<T: Clone> From<Vec<(f64, T)>> for WeightedPool<T> {
    fn from(entries: Vec<(f64, T)>) -> Self {
        let mut pool = WeightedPool::default();
        for (weight, item) in entries {
            pool.add(weight, item);
        }
        pool
    }
}

impl<T: Clone> From<WeightedPool<T>> for Vec<(f64, T)> {
    fn from(pool: WeightedPool<T>) -> Self {
        pool.items
    }
}

impl<T: Clone> WeightedPool<T> {
    pub fn new() -> Self {
        WeightedPool::default()
    }

    /// Entries with non-positive weight are ignored.
    pub fn add(&mut self, weight: f64, item: T) {
        if weight <= 0.0 {
            return;
        }
        self.total_weight += weight;
        self.items.push((weight, item));
    }

    pub fn clear(&mut self) {
        self.items.clear();
        self.total_weight = 0.0;
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn item(&self, index: usize) -> Option<&T> {
        self.items.get(index).map(|(_, item)| item)
    }

    pub fn items(&self) -> impl Iterator<Item = &T> {
        self.items.iter().map(|(_, item)| item)
    }

    pub fn select(&self, random: &mut RandomSource) -> Option<T> {
        self.select_target(random.randd())
    }

    /// Stateless selection from hash randomness on `seed`.
    pub fn select_seeded(&self, seed: u64) -> Option<T> {
        self.select_target(static_random_f64(seed, &[]))
    }

    pub fn select_index_seeded(&self, seed: u64) -> Option<usize> {
        self.index_for_target(static_random_f64(seed, &[]))
    }

    fn select_target(&self, target: f64) -> Option<T> {
        self.index_for_target(target)
            .map(|i| self.items[i].1.clone())
    }

    fn index_for_target(&self, target: f64) -> Option<usize> {
        if self.items.is_empty() {
            return None;
        }
        // Walk the accumulated weight until it crosses the target; float
        // error at the tail falls through to the last item.
        let mut accumulated = 0.0;
        for (i, (weight, _)) in self.items.iter().enumerate() {
            accumulated += weight / self.total_weight;
            if target <= accumulated {
                return Some(i);
            }
        }
        Some(self.items.len() - 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selection_is_weight_proportional() {
        let mut pool = WeightedPool::new();
        pool.add(9.0, "common");
        pool.add(1.0, "rare");

        let mut random = RandomSource::with_seed(1);
        let mut commons = 0;
        for _ in 0..1000 {
            if pool.select(&mut random) == Some("common") {
                commons += 1;
            }
        }
        assert!((800..=980).contains(&commons), "got {commons}");
    }

    #[test]
    fn zero_weight_items_never_selected() {
        let mut pool = WeightedPool::new();
        pool.add(0.0, "never");
        pool.add(-1.0, "never");
        pool.add(1.0, "always");
        let mut random = RandomSource::with_seed(2);
        for _ in 0..50 {
            assert_eq!(pool.select(&mut random), Some("always"));
        }
    }

    #[test]
    fn empty_pool_selects_nothing() {
        let pool: WeightedPool<i32> = WeightedPool::new();
        assert_eq!(pool.select_seeded(1), None);
    }

    #[test]
    fn seeded_selection_is_stable() {
        let mut pool = WeightedPool::new();
        pool.add(1.0, 'a');
        pool.add(1.0, 'b');
        pool.add(1.0, 'c');
        assert_eq!(pool.select_seeded(42), pool.select_seeded(42));
    }

    #[test]
    fn serde_round_trip() {
        let mut pool = WeightedPool::new();
        pool.add(2.0, "rain".to_string());
        pool.add(1.0, "clear".to_string());
        let json = serde_json::to_string(&pool).unwrap();
        let back: WeightedPool<String> = serde_json::from_str(&json).unwrap();
        assert_eq!(pool, back);
    }
}
