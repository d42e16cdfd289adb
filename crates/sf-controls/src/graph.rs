//! Publish/subscribe dependency graph.
//!
//! Nodes are sensors, per-fan algorithms and fans, stored in an arena and
//! addressed by [`NodeId`]. Each node has a subscriber list and an atomic
//! *dirty* flag:
//! - every node starts dirty
//! - [`DependencyGraph::publish`] marks all transitive subscribers dirty
//! - [`Memo::get_or_update`] recomputes only when its node was dirty
//!
//! Links are wired once at construction; afterwards the graph is shared
//! read-only and only the flags change.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use sf_core::{FanId, Id, NodeId, SensorId};

use crate::error::{ControlError, ControlResult};

/// What a graph node stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Sensor(SensorId),
    /// The `index`-th algorithm of `fan`.
    Algorithm { fan: FanId, index: usize },
    Fan(FanId),
}

/// Collects nodes and subscriptions before the graph is frozen.
#[derive(Debug, Default)]
pub struct GraphBuilder {
    kinds: Vec<NodeKind>,
    subscribers: Vec<Vec<NodeId>>,
    lookup: HashMap<NodeKind, NodeId>,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node, or return the existing node of the same kind.
    pub fn add_node(&mut self, kind: NodeKind) -> NodeId {
        if let Some(&id) = self.lookup.get(&kind) {
            return id;
        }
        let id = Id::from_index(self.kinds.len());
        self.kinds.push(kind);
        self.subscribers.push(Vec::new());
        self.lookup.insert(kind, id);
        id
    }

    /// Make `subscriber` depend on `publisher`.
    pub fn subscribe(&mut self, subscriber: NodeId, publisher: NodeId) -> ControlResult<()> {
        if subscriber.index() >= self.kinds.len() || publisher.index() >= self.kinds.len() {
            return Err(ControlError::InvalidArg {
                what: "subscription references a node that was never added",
            });
        }
        let subs = &mut self.subscribers[publisher.index()];
        if !subs.contains(&subscriber) {
            subs.push(subscriber);
        }
        Ok(())
    }

    pub fn build(self) -> DependencyGraph {
        let dirty = self.kinds.iter().map(|_| AtomicBool::new(true)).collect();
        DependencyGraph {
            kinds: self.kinds,
            subscribers: self.subscribers,
            lookup: self.lookup,
            dirty,
        }
    }
}

/// Frozen dependency graph with shared dirty flags.
#[derive(Debug)]
pub struct DependencyGraph {
    kinds: Vec<NodeKind>,
    subscribers: Vec<Vec<NodeId>>,
    lookup: HashMap<NodeKind, NodeId>,
    dirty: Vec<AtomicBool>,
}

impl DependencyGraph {
    pub fn len(&self) -> usize {
        self.kinds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }

    pub fn node(&self, kind: NodeKind) -> Option<NodeId> {
        self.lookup.get(&kind).copied()
    }

    pub fn sensor_node(&self, sensor: SensorId) -> Option<NodeId> {
        self.node(NodeKind::Sensor(sensor))
    }

    pub fn fan_node(&self, fan: FanId) -> Option<NodeId> {
        self.node(NodeKind::Fan(fan))
    }

    pub fn kind(&self, node: NodeId) -> Option<NodeKind> {
        self.kinds.get(node.index()).copied()
    }

    pub fn subscribers(&self, node: NodeId) -> &[NodeId] {
        self.subscribers
            .get(node.index())
            .map_or(&[], Vec::as_slice)
    }

    pub fn is_dirty(&self, node: NodeId) -> bool {
        self.dirty
            .get(node.index())
            .is_some_and(|d| d.load(Ordering::Acquire))
    }

    /// Clear the dirty flag and return whether it was set.
    pub fn take_dirty(&self, node: NodeId) -> bool {
        self.dirty
            .get(node.index())
            .is_some_and(|d| d.swap(false, Ordering::AcqRel))
    }

    pub fn mark_dirty(&self, node: NodeId) {
        if let Some(d) = self.dirty.get(node.index()) {
            d.store(true, Ordering::Release);
        }
    }

    /// Announce a new value of `node`: every transitive subscriber becomes dirty.
    pub fn publish(&self, node: NodeId) {
        let mut visited = vec![false; self.kinds.len()];
        let mut stack: Vec<NodeId> = self.subscribers(node).to_vec();
        while let Some(next) = stack.pop() {
            let Some(seen) = visited.get_mut(next.index()) else {
                continue;
            };
            if *seen {
                continue;
            }
            *seen = true;
            self.mark_dirty(next);
            stack.extend_from_slice(self.subscribers(next));
        }
    }
}

/// Memoized value of one graph node.
#[derive(Debug, Clone, Default)]
pub struct Memo<T> {
    value: Option<T>,
}

impl<T: Clone> Memo<T> {
    pub fn new() -> Self {
        Self { value: None }
    }

    pub fn value(&self) -> Option<&T> {
        self.value.as_ref()
    }

    /// Return the cached value, recomputing it first if `node` is dirty.
    ///
    /// A failed recomputation leaves the node dirty.
    pub fn get_or_update<E>(
        &mut self,
        graph: &DependencyGraph,
        node: NodeId,
        compute: impl FnOnce() -> Result<T, E>,
    ) -> Result<T, E> {
        let dirty = graph.take_dirty(node);
        if let (false, Some(value)) = (dirty, &self.value) {
            return Ok(value.clone());
        }
        match compute() {
            Ok(value) => {
                self.value = Some(value.clone());
                Ok(value)
            }
            Err(e) => {
                graph.mark_dirty(node);
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;

    fn chain() -> (DependencyGraph, NodeId, NodeId, NodeId) {
        let mut b = GraphBuilder::new();
        let sensor = b.add_node(NodeKind::Sensor(Id::from_index(0)));
        let algo = b.add_node(NodeKind::Algorithm {
            fan: Id::from_index(0),
            index: 0,
        });
        let fan = b.add_node(NodeKind::Fan(Id::from_index(0)));
        b.subscribe(algo, sensor).unwrap();
        b.subscribe(fan, algo).unwrap();
        (b.build(), sensor, algo, fan)
    }

    #[test]
    fn nodes_are_deduplicated_by_kind() {
        let mut b = GraphBuilder::new();
        let a = b.add_node(NodeKind::Fan(Id::from_index(1)));
        let c = b.add_node(NodeKind::Fan(Id::from_index(1)));
        assert_eq!(a, c);
        assert_eq!(b.build().len(), 1);
    }

    #[test]
    fn subscribe_rejects_unknown_nodes() {
        let mut b = GraphBuilder::new();
        let a = b.add_node(NodeKind::Fan(Id::from_index(0)));
        assert!(b.subscribe(a, Id::from_index(5)).is_err());
    }

    #[test]
    fn nodes_start_dirty() {
        let (graph, sensor, algo, fan) = chain();
        assert!(graph.is_dirty(sensor));
        assert!(graph.is_dirty(algo));
        assert!(graph.take_dirty(fan));
        assert!(!graph.is_dirty(fan));
    }

    #[test]
    fn publish_reaches_transitive_subscribers_only() {
        let (graph, sensor, algo, fan) = chain();
        for n in [sensor, algo, fan] {
            graph.take_dirty(n);
        }
        graph.publish(sensor);
        assert!(!graph.is_dirty(sensor));
        assert!(graph.is_dirty(algo));
        assert!(graph.is_dirty(fan));

        for n in [algo, fan] {
            graph.take_dirty(n);
        }
        graph.publish(fan);
        assert!(!graph.is_dirty(algo));
        assert!(!graph.is_dirty(sensor));
    }

    #[test]
    fn memo_skips_recomputation_while_clean() {
        let (graph, sensor, algo, _) = chain();
        let calls = Cell::new(0);
        let compute = || -> Result<f64, ()> {
            calls.set(calls.get() + 1);
            Ok(42.0)
        };
        let mut memo = Memo::new();
        assert_eq!(memo.get_or_update(&graph, algo, compute), Ok(42.0));
        assert_eq!(memo.get_or_update(&graph, algo, compute), Ok(42.0));
        assert_eq!(calls.get(), 1);

        graph.publish(sensor);
        assert_eq!(memo.get_or_update(&graph, algo, compute), Ok(42.0));
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn failed_update_keeps_node_dirty() {
        let (graph, _, algo, _) = chain();
        let mut memo: Memo<f64> = Memo::new();
        assert_eq!(memo.get_or_update(&graph, algo, || Err("boom")), Err("boom"));
        assert!(graph.is_dirty(algo));
        assert!(memo.value().is_none());
    }
}
