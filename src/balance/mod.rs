//! Weighted route selection.
//!
//! The dispatcher asks a [`WeightedSelector`] for the next route name on every
//! request. Route names are plain strings here; the dispatcher maps them onto its
//! own typed route kinds.
//!
//! | Item | Description |
//! |------|-------------|
//! | [`RouteItem`] | A named route with a relative weight |
//! | [`RouteSet`] | Ordered routes, the scheduling input |
//! | [`WeightedSelector`] | Selection contract (internally synchronized) |
//! | [`SmoothWeighted`] | Smooth weighted round robin implementation |

use crate::{Error, ErrorContext, Result};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

pub mod smooth;

pub use smooth::SmoothWeighted;

/// A named route and its relative share of traffic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteItem {
    pub name: String,
    pub weight: u32,
}

impl RouteItem {
    pub fn new(name: impl Into<String>, weight: u32) -> Self {
        Self {
            name: name.into(),
            weight,
        }
    }
}

/// Ordered collection of routes.
///
/// An empty set means "no route": selectors built from it return `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteSet {
    #[serde(default)]
    pub items: Vec<RouteItem>,
}

impl RouteSet {
    pub fn new(items: Vec<RouteItem>) -> Self {
        Self { items }
    }

    /// Build a set from `(name, weight)` pairs.
    pub fn from_pairs<'a>(pairs: impl IntoIterator<Item = (&'a str, u32)>) -> Self {
        Self {
            items: pairs
                .into_iter()
                .map(|(name, weight)| RouteItem::new(name, weight))
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn total_weight(&self) -> u64 {
        self.items.iter().map(|i| i.weight as u64).sum()
    }

    /// Reject empty or duplicate names and non-positive weights.
    ///
    /// Every problem is reported, not just the first one.
    pub fn validate(&self) -> Result<()> {
        let mut problems = Vec::new();
        let mut seen = HashSet::new();
        for (idx, item) in self.items.iter().enumerate() {
            if item.name.trim().is_empty() {
                problems.push(format!("items[{}]: empty route name", idx));
            } else if !seen.insert(item.name.as_str()) {
                problems.push(format!("items[{}]: duplicate route name '{}'", idx, item.name));
            }
            if item.weight == 0 {
                problems.push(format!("items[{}]: weight must be > 0", idx));
            }
        }
        if problems.is_empty() {
            Ok(())
        } else {
            Err(Error::configuration_with_context(
                "malformed weight set",
                ErrorContext::new()
                    .with_field_path("balance.items")
                    .with_details(problems.join("; "))
                    .with_source("route_set"),
            ))
        }
    }
}

/// Weighted route selection.
///
/// Implementations synchronize internally: callers never hold a lock around
/// [`WeightedSelector::next`].
pub trait WeightedSelector: Send + Sync {
    /// Next route according to the weighted schedule, `None` when no routes exist.
    fn next(&self) -> Option<String>;

    /// Add `weight` to route `name`, appending it if absent. A zero weight is ignored.
    fn add(&self, name: &str, weight: u32);

    /// Copy of the configured weights.
    fn all(&self) -> HashMap<String, u32>;

    /// Restart the schedule from a clean cycle, keeping the weights.
    fn reset(&self);

    /// Drop every route.
    fn remove_all(&self);

    /// Number of configured routes.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Replace the whole configuration. An empty set is ignored.
    fn on_change(&self, routes: &RouteSet) {
        if routes.is_empty() {
            return;
        }
        self.remove_all();
        for item in &routes.items {
            self.add(&item.name, item.weight);
        }
    }
}
