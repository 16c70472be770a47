//! Edge sinks: where accepted links end up.

use std::collections::{BTreeSet, HashMap};
use std::sync::{PoisonError, RwLock, RwLockWriteGuard};

use crate::integration::spot::SpotId;

/// A weighted link between two spots, source earlier in time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Edge {
    pub source: SpotId,
    pub target: SpotId,
    pub weight: f64,
}

/// Write handle obtained from [`EdgeCreator::pre_addition`].
pub trait EdgeSink {
    /// Adds one edge. Returns `false` if the two spots were already linked
    /// or `source == target`.
    fn create_edge(&mut self, source: SpotId, target: SpotId, weight: f64) -> bool;
}

/// A graph the trackers can read from and write links into.
///
/// All edges of one batch are written through a single sink; the sink holds
/// the exclusive lock and releases it when dropped.
pub trait EdgeCreator: Send + Sync {
    type Sink<'a>: EdgeSink
    where
        Self: 'a;

    fn pre_addition(&self) -> Self::Sink<'_>;

    /// Snapshot of the edges created so far.
    fn edges(&self) -> Vec<Edge>;
}

#[derive(Debug, Default)]
struct Links {
    edges: Vec<Edge>,
    adjacency: HashMap<SpotId, BTreeSet<(SpotId, usize)>>,
}

impl Links {
    fn find(&self, a: SpotId, b: SpotId) -> Option<usize> {
        self.adjacency
            .get(&a)?
            .range((b, 0)..=(b, usize::MAX))
            .next()
            .map(|&(_, idx)| idx)
    }
}

/// Undirected link graph over spot ids.
#[derive(Debug, Default)]
pub struct TrackGraph {
    inner: RwLock<Links>,
}

impl TrackGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn edge_count(&self) -> usize {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .edges
            .len()
    }

    /// Spots linked to `spot`, in id order.
    pub fn neighbours(&self, spot: SpotId) -> Vec<SpotId> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner
            .adjacency
            .get(&spot)
            .map(|n| n.iter().map(|&(id, _)| id).collect())
            .unwrap_or_default()
    }

    /// Weight of the edge between `a` and `b`, in either direction.
    pub fn weight(&self, a: SpotId, b: SpotId) -> Option<f64> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner.find(a, b).map(|idx| inner.edges[idx].weight)
    }

    pub fn contains_edge(&self, a: SpotId, b: SpotId) -> bool {
        self.weight(a, b).is_some()
    }
}

/// Exclusive write access to a [`TrackGraph`].
pub struct GraphWriter<'a> {
    guard: RwLockWriteGuard<'a, Links>,
}

impl EdgeSink for GraphWriter<'_> {
    fn create_edge(&mut self, source: SpotId, target: SpotId, weight: f64) -> bool {
        if source == target || self.guard.find(source, target).is_some() {
            return false;
        }
        let links = &mut *self.guard;
        let idx = links.edges.len();
        links.edges.push(Edge {
            source,
            target,
            weight,
        });
        links.adjacency.entry(source).or_default().insert((target, idx));
        links.adjacency.entry(target).or_default().insert((source, idx));
        true
    }
}

impl EdgeCreator for TrackGraph {
    type Sink<'a> = GraphWriter<'a>;

    fn pre_addition(&self) -> GraphWriter<'_> {
        GraphWriter {
            guard: self.inner.write().unwrap_or_else(PoisonError::into_inner),
        }
    }

    fn edges(&self) -> Vec<Edge> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .edges
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_and_query_edges() {
        let graph = TrackGraph::new();
        {
            let mut sink = graph.pre_addition();
            assert!(sink.create_edge(SpotId(1), SpotId(2), 3.0));
            assert!(sink.create_edge(SpotId(2), SpotId(5), 1.5));
            assert!(sink.create_edge(SpotId(2), SpotId(4), 0.5));
        }
        assert_eq!(graph.edge_count(), 3);
        assert_eq!(graph.neighbours(SpotId(2)), vec![SpotId(1), SpotId(4), SpotId(5)]);
        assert_eq!(graph.weight(SpotId(2), SpotId(1)), Some(3.0));
        assert_eq!(graph.weight(SpotId(1), SpotId(5)), None);
        assert!(graph.neighbours(SpotId(9)).is_empty());
    }

    #[test]
    fn test_duplicates_and_loops_are_ignored() {
        let graph = TrackGraph::new();
        let mut sink = graph.pre_addition();
        assert!(sink.create_edge(SpotId(1), SpotId(2), 1.0));
        assert!(!sink.create_edge(SpotId(2), SpotId(1), 4.0));
        assert!(!sink.create_edge(SpotId(3), SpotId(3), 0.0));
        drop(sink);
        assert_eq!(graph.edges().len(), 1);
        assert_eq!(graph.edges()[0].weight, 1.0);
    }
}
