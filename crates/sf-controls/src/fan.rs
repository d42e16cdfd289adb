//! Per-fan duty decision.

use std::time::Instant;

use sf_core::{Duty, FanId, NodeId, Real};
use tracing::debug;

use crate::context::{AlgorithmContext, Evaluation};
use crate::error::ControlResult;
use crate::expression::Expression;
use crate::graph::{DependencyGraph, Memo};
use crate::store::ValueStore;

/// One named algorithm of a fan, with its graph node and memoized output.
#[derive(Debug)]
pub struct AlgorithmSlot {
    name: String,
    node: NodeId,
    expression: Expression,
    memo: Memo<Real>,
}

impl AlgorithmSlot {
    /// Algorithm name as written in the configuration.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Graph node holding the memoized output.
    pub fn node(&self) -> NodeId {
        self.node
    }

    pub fn expression(&self) -> &Expression {
        &self.expression
    }

    /// Last computed raw output.
    pub fn last_output(&self) -> Option<Real> {
        self.memo.value().copied()
    }
}

/// Outcome of one duty calculation.
#[derive(Debug, Clone, PartialEq)]
pub struct DutyDecision {
    /// Clamped duty to apply.
    pub duty: Duty,
    /// Raw output of the winning algorithm.
    pub raw: Real,
    /// Name of the winning algorithm.
    pub algorithm: String,
}

/// Evaluates every algorithm of one fan and picks the highest request.
#[derive(Debug)]
pub struct DutyCalculator {
    fan: FanId,
    name: String,
    node: NodeId,
    context: AlgorithmContext,
    algorithms: Vec<AlgorithmSlot>,
}

impl DutyCalculator {
    pub(crate) fn new(fan: FanId, name: String, node: NodeId, context: AlgorithmContext) -> Self {
        Self {
            fan,
            name,
            node,
            context,
            algorithms: Vec::new(),
        }
    }

    pub(crate) fn push_algorithm(&mut self, name: String, node: NodeId, expression: Expression) {
        self.algorithms.push(AlgorithmSlot {
            name,
            node,
            expression,
            memo: Memo::new(),
        });
    }

    /// Id of the fan this calculator drives.
    pub fn fan(&self) -> FanId {
        self.fan
    }

    /// Fan name as configured.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Graph node of the fan's duty.
    pub fn node(&self) -> NodeId {
        self.node
    }

    /// Duty range and last duty the algorithms see.
    pub fn context(&self) -> &AlgorithmContext {
        &self.context
    }

    /// Algorithms in declaration order.
    pub fn algorithms(&self) -> &[AlgorithmSlot] {
        &self.algorithms
    }

    /// Duty applied last, if any.
    pub fn last_duty(&self) -> Option<Duty> {
        self.context.last_duty
    }

    /// Seed `last_duty`, e.g. from the duty an actuator reports at setup.
    pub fn set_last_duty(&mut self, duty: Option<Duty>) {
        self.context.last_duty = duty;
    }

    /// Clear the fan's dirty flag and return whether it needs an update.
    pub fn take_dirty(&self, graph: &DependencyGraph) -> bool {
        graph.take_dirty(self.node)
    }

    /// Evaluate every algorithm and select the highest raw output.
    ///
    /// Ties keep the first algorithm. A NaN output always wins, which clamps
    /// to `max_duty`.
    pub fn calculate(
        &mut self,
        store: &ValueStore,
        graph: &DependencyGraph,
        now: Instant,
    ) -> ControlResult<DutyDecision> {
        let context = self.context;
        let eval = Evaluation::new(store, &context, now);

        let mut best: Option<(usize, Real)> = None;
        for (index, slot) in self.algorithms.iter_mut().enumerate() {
            let raw = slot
                .memo
                .get_or_update(graph, slot.node, || slot.expression.value(&eval))?;
            let better = match best {
                None => true,
                Some((_, current)) => raw.is_nan() || raw > current,
            };
            if better {
                best = Some((index, raw));
            }
        }

        let (index, raw) = best.unwrap_or((usize::MAX, Real::NAN));
        let algorithm = self
            .algorithms
            .get(index)
            .map_or_else(String::new, |slot| slot.name.clone());
        let duty = context.range.clamp_raw(raw);
        debug!(fan = %self.name, %algorithm, raw, %duty, "duty decision");
        Ok(DutyDecision {
            duty,
            raw,
            algorithm,
        })
    }

    /// Record the applied duty in the store and as `last_duty`.
    pub fn commit(&mut self, store: &ValueStore, duty: Duty) -> ControlResult<()> {
        store.set_fan(self.fan, duty)?;
        self.context.last_duty = Some(duty);
        Ok(())
    }

    /// Announce the fan's new duty to its dependents.
    pub fn publish(&self, graph: &DependencyGraph) {
        graph.publish(self.node);
    }
}
