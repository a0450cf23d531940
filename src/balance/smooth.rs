//! Smooth weighted round robin.
//!
//! Every call raises each route's current priority by its weight, picks the
//! highest, and lowers the winner by the total weight. Over a cycle of
//! `sum(weights)` calls each route wins exactly `weight` times, and the winners
//! are interleaved rather than clustered.

use super::{RouteSet, WeightedSelector};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

#[derive(Debug)]
struct Entry {
    name: String,
    weight: i64,
    current: i64,
}

#[derive(Debug, Default)]
struct Inner {
    entries: Vec<Entry>,
    total: i64,
}

impl Inner {
    fn add(&mut self, name: &str, weight: u32) {
        if weight == 0 {
            tracing::debug!(route = name, "ignoring route with zero weight");
            return;
        }
        let weight = weight as i64;
        match self.entries.iter_mut().find(|e| e.name == name) {
            Some(entry) => entry.weight += weight,
            None => self.entries.push(Entry {
                name: name.to_string(),
                weight,
                current: 0,
            }),
        }
        self.total += weight;
    }

    fn reset(&mut self) {
        for entry in &mut self.entries {
            entry.current = 0;
        }
    }

    fn clear(&mut self) {
        self.entries.clear();
        self.total = 0;
    }
}

/// Smooth weighted round robin selector, safe to share across tasks.
#[derive(Debug, Default)]
pub struct SmoothWeighted {
    inner: Mutex<Inner>,
}

impl SmoothWeighted {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_routes(routes: &RouteSet) -> Self {
        let selector = Self::new();
        {
            let mut inner = selector.lock();
            for item in &routes.items {
                inner.add(&item.name, item.weight);
            }
        }
        selector
    }

    // Nothing in the critical sections can leave `Inner` half-updated, so a
    // poisoned lock still holds consistent data.
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }
}

impl WeightedSelector for SmoothWeighted {
    fn next(&self) -> Option<String> {
        let mut inner = self.lock();
        let total = inner.total;
        let mut best: Option<usize> = None;
        let mut best_current = i64::MIN;
        for (idx, entry) in inner.entries.iter_mut().enumerate() {
            entry.current += entry.weight;
            if entry.current > best_current {
                best_current = entry.current;
                best = Some(idx);
            }
        }
        let entry = &mut inner.entries[best?];
        entry.current -= total;
        Some(entry.name.clone())
    }

    fn add(&self, name: &str, weight: u32) {
        self.lock().add(name, weight);
    }

    fn all(&self) -> HashMap<String, u32> {
        self.lock()
            .entries
            .iter()
            .map(|e| (e.name.clone(), e.weight as u32))
            .collect()
    }

    fn reset(&self) {
        self.lock().reset();
    }

    fn remove_all(&self) {
        self.lock().clear();
    }

    fn len(&self) -> usize {
        self.lock().entries.len()
    }

    fn on_change(&self, routes: &RouteSet) {
        if routes.is_empty() {
            tracing::debug!("empty route set, keeping current routes");
            return;
        }
        // Rebuild under one lock so `next` never observes an empty selector.
        let mut inner = self.lock();
        inner.clear();
        for item in &routes.items {
            inner.add(&item.name, item.weight);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn abc() -> SmoothWeighted {
        SmoothWeighted::from_routes(&RouteSet::from_pairs([("a", 5), ("b", 2), ("c", 3)]))
    }

    #[test]
    fn test_distribution_is_proportional() {
        let selector = abc();
        let mut counts: HashMap<String, u32> = HashMap::new();
        for _ in 0..10_000 {
            *counts.entry(selector.next().unwrap()).or_default() += 1;
        }
        assert_eq!(counts["a"], 5_000);
        assert_eq!(counts["b"], 2_000);
        assert_eq!(counts["c"], 3_000);
    }

    #[test]
    fn test_selection_is_interleaved() {
        let selector = abc();
        let picks: Vec<String> = (0..1_000).map(|_| selector.next().unwrap()).collect();
        for window in picks.windows(10) {
            assert!(window.iter().any(|p| p == "a"), "window without a: {:?}", window);
        }
        // "a" never wins more than twice in a row with a 5/10 share.
        for window in picks.windows(3) {
            assert!(!window.iter().all(|p| p == "a"));
        }
    }

    #[test]
    fn test_exact_counts_per_cycle() {
        let selector = abc();
        for _ in 0..5 {
            let mut counts: HashMap<String, u32> = HashMap::new();
            for _ in 0..10 {
                *counts.entry(selector.next().unwrap()).or_default() += 1;
            }
            assert_eq!(counts, selector.all());
        }
    }

    #[test]
    fn test_empty_selector_returns_none() {
        let selector = SmoothWeighted::new();
        assert!(selector.next().is_none());
        assert!(selector.is_empty());
    }

    #[test]
    fn test_remove_all_then_add() {
        let selector = abc();
        selector.remove_all();
        assert!(selector.next().is_none());
        selector.add("x", 1);
        assert_eq!(selector.next().as_deref(), Some("x"));
    }

    #[test]
    fn test_add_is_cumulative_and_keeps_order() {
        let selector = SmoothWeighted::new();
        selector.add("direct", 1);
        selector.add("proxy", 1);
        selector.add("direct", 2);
        let all = selector.all();
        assert_eq!(all["direct"], 3);
        assert_eq!(all["proxy"], 1);
        // Insertion order decides ties, so "direct" still wins the first pick.
        assert_eq!(selector.next().as_deref(), Some("direct"));
    }

    #[test]
    fn test_zero_weight_is_ignored() {
        let selector = SmoothWeighted::new();
        selector.add("proxy", 0);
        assert!(selector.is_empty());
        assert!(selector.next().is_none());
    }

    #[test]
    fn test_reset_restarts_cycle_keeping_weights() {
        let selector = abc();
        let first: Vec<String> = (0..4).map(|_| selector.next().unwrap()).collect();
        selector.reset();
        let again: Vec<String> = (0..4).map(|_| selector.next().unwrap()).collect();
        assert_eq!(first, again);
        assert_eq!(selector.all().len(), 3);
    }

    #[test]
    fn test_on_change_replaces_and_ignores_empty() {
        let selector = abc();
        selector.on_change(&RouteSet::from_pairs([("proxy", 1)]));
        assert_eq!(selector.all(), HashMap::from([("proxy".to_string(), 1)]));

        selector.on_change(&RouteSet::default());
        assert_eq!(selector.all(), HashMap::from([("proxy".to_string(), 1)]));
    }

    #[test]
    fn test_all_is_a_copy() {
        let selector = abc();
        let mut snapshot = selector.all();
        snapshot.insert("z".to_string(), 99);
        assert!(!selector.all().contains_key("z"));
    }

    #[test]
    fn test_concurrent_next_preserves_totals() {
        let selector = Arc::new(abc());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let s = Arc::clone(&selector);
                std::thread::spawn(move || {
                    let mut local: HashMap<String, u32> = HashMap::new();
                    for _ in 0..1_250 {
                        *local.entry(s.next().unwrap()).or_default() += 1;
                    }
                    local
                })
            })
            .collect();

        let mut counts: HashMap<String, u32> = HashMap::new();
        for h in handles {
            for (k, v) in h.join().unwrap() {
                *counts.entry(k).or_default() += v;
            }
        }
        // 10_000 calls is a whole number of cycles, so the totals are exact.
        assert_eq!(counts["a"], 5_000);
        assert_eq!(counts["b"], 2_000);
        assert_eq!(counts["c"], 3_000);
    }
}
