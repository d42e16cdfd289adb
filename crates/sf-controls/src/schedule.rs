//! Fan update schedule.
//!
//! [`Schedule::build`] wires the dependency graph in a second pass over the
//! configured fans:
//! 1. one node per sensor, per algorithm and per fan
//! 2. each algorithm subscribes to the sensors and fans it reads
//! 3. each fan subscribes to its own algorithms
//!
//! It then partitions the fan-to-fan dependencies into *waves*. A fan only
//! reads duties of fans in earlier waves, so all fans of one wave can be
//! updated concurrently.

use std::collections::{BTreeMap, BTreeSet};

use sf_core::{DutyRange, FanId};

use crate::context::AlgorithmContext;
use crate::error::{ControlError, ControlResult, RefKind};
use crate::expression::Expression;
use crate::fan::DutyCalculator;
use crate::graph::{DependencyGraph, GraphBuilder, NodeKind};
use crate::store::ValueStore;

/// Directed "reads the duty of" relation between fans.
#[derive(Debug, Clone, Default)]
pub struct FanGraph {
    dependencies: BTreeMap<FanId, BTreeSet<FanId>>,
}

impl FanGraph {
    /// Graph with `fans` and no dependencies yet.
    pub fn new(fans: impl IntoIterator<Item = FanId>) -> Self {
        Self {
            dependencies: fans.into_iter().map(|f| (f, BTreeSet::new())).collect(),
        }
    }

    pub fn add_fan(&mut self, fan: FanId) {
        self.dependencies.entry(fan).or_default();
    }

    /// Record that `dependent` reads the duty of `dependency`.
    pub fn add_dependency(&mut self, dependent: FanId, dependency: FanId) {
        self.dependencies.entry(dependency).or_default();
        self.dependencies.entry(dependent).or_default().insert(dependency);
    }

    /// Fans whose duty `fan` reads.
    pub fn dependencies(&self, fan: FanId) -> impl Iterator<Item = FanId> + '_ {
        self.dependencies.get(&fan).into_iter().flatten().copied()
    }

    /// Kahn layering into waves, fans in id order within a wave.
    ///
    /// Fails with [`ControlError::CyclicDependency`] naming the fans on a
    /// cycle. A fan reading its own duty is a cycle.
    pub fn waves(&self, store: &ValueStore) -> ControlResult<Vec<Vec<FanId>>> {
        let mut remaining: BTreeMap<FanId, usize> = self
            .dependencies
            .iter()
            .map(|(fan, deps)| (*fan, deps.len()))
            .collect();
        let mut dependents: BTreeMap<FanId, Vec<FanId>> = BTreeMap::new();
        for (fan, deps) in &self.dependencies {
            for dep in deps {
                dependents.entry(*dep).or_default().push(*fan);
            }
        }

        let mut waves = Vec::new();
        loop {
            let wave: Vec<FanId> = remaining
                .iter()
                .filter(|(_, deg)| **deg == 0)
                .map(|(fan, _)| *fan)
                .collect();
            if wave.is_empty() {
                break;
            }
            for fan in &wave {
                remaining.remove(fan);
                for dependent in dependents.get(fan).into_iter().flatten() {
                    if let Some(deg) = remaining.get_mut(dependent) {
                        *deg -= 1;
                    }
                }
            }
            waves.push(wave);
        }

        if remaining.is_empty() {
            return Ok(waves);
        }

        // Drop fans that merely sit downstream of a cycle.
        let mut stuck: BTreeSet<FanId> = remaining.into_keys().collect();
        loop {
            let leaf = stuck.iter().copied().find(|fan| {
                !dependents
                    .get(fan)
                    .into_iter()
                    .flatten()
                    .any(|d| stuck.contains(d))
            });
            match leaf {
                Some(fan) => {
                    stuck.remove(&fan);
                }
                None => break,
            }
        }
        let mut fans: Vec<String> = stuck
            .into_iter()
            .map(|f| store.fan_name(f).to_string())
            .collect();
        fans.sort();
        Err(ControlError::CyclicDependency { fans })
    }
}

/// Configured algorithms of one fan, before wiring.
#[derive(Debug)]
pub struct FanPlan {
    pub name: String,
    pub range: DutyRange,
    pub algorithms: Vec<(String, Expression)>,
}

impl FanPlan {
    /// Plan for fan `name` with no algorithms yet.
    pub fn new(name: impl Into<String>, range: DutyRange) -> Self {
        Self {
            name: name.into(),
            range,
            algorithms: Vec::new(),
        }
    }

    /// Add an algorithm; evaluation follows insertion order.
    pub fn with_algorithm(mut self, name: impl Into<String>, expression: Expression) -> Self {
        self.algorithms.push((name.into(), expression));
        self
    }
}

/// Wired dependency graph, wave order and one duty calculator per fan.
#[derive(Debug)]
pub struct Schedule {
    pub graph: DependencyGraph,
    pub waves: Vec<Vec<FanId>>,
    pub calculators: Vec<DutyCalculator>,
}

impl Schedule {
    /// Wire sensors, algorithms and fans into one graph and order the fans.
    ///
    /// Fails on duplicate fans, undeclared references or fan cycles.
    pub fn build(store: &ValueStore, fans: Vec<FanPlan>) -> ControlResult<Self> {
        let mut builder = GraphBuilder::new();
        for sensor in store.sensor_ids() {
            builder.add_node(NodeKind::Sensor(sensor));
        }

        let mut fan_graph = FanGraph::default();
        let mut seen = BTreeSet::new();
        let mut calculators = Vec::with_capacity(fans.len());
        for plan in fans {
            let fan = store.fan_id(&plan.name)?;
            if !seen.insert(fan) {
                return Err(ControlError::DuplicateId {
                    kind: RefKind::Fan,
                    id: plan.name,
                });
            }
            if plan.algorithms.is_empty() {
                return Err(ControlError::InvalidArg {
                    what: "every fan needs at least one algorithm",
                });
            }

            let fan_node = builder.add_node(NodeKind::Fan(fan));
            fan_graph.add_fan(fan);

            let mut calculator =
                DutyCalculator::new(fan, plan.name, fan_node, AlgorithmContext::new(plan.range));
            for (index, (name, expression)) in plan.algorithms.into_iter().enumerate() {
                let node = builder.add_node(NodeKind::Algorithm { fan, index });
                for sensor in expression.referenced_sensors() {
                    let publisher = builder.add_node(NodeKind::Sensor(*sensor));
                    builder.subscribe(node, publisher)?;
                }
                for other in expression.referenced_fans() {
                    let publisher = builder.add_node(NodeKind::Fan(*other));
                    builder.subscribe(node, publisher)?;
                    fan_graph.add_dependency(fan, *other);
                }
                builder.subscribe(fan_node, node)?;
                calculator.push_algorithm(name, node, expression);
            }
            calculators.push(calculator);
        }

        let waves = fan_graph.waves(store)?;
        Ok(Self {
            graph: builder.build(),
            waves,
            calculators,
        })
    }

    /// Index into `calculators` of `fan`.
    pub fn calculator_index(&self, fan: FanId) -> Option<usize> {
        self.calculators.iter().position(|c| c.fan() == fan)
    }
}
