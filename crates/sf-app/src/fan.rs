//! A fan zone: duty calculator plus the actuator driving it.

use std::sync::Arc;
use std::time::Instant;

use sf_controls::{DependencyGraph, DutyCalculator, DutyDecision, ValueStore};
use sf_core::{Duty, FanId};
use tracing::debug;

use crate::error::{AppError, AppResult, DriverError};
use crate::interface::{FanActuator, FanSpeed};

pub struct FanController {
    calculator: DutyCalculator,
    actuator: Arc<dyn FanActuator>,
    written: Option<Duty>,
}

impl FanController {
    pub fn new(calculator: DutyCalculator, actuator: Arc<dyn FanActuator>) -> Self {
        Self {
            calculator,
            actuator,
            written: None,
        }
    }

    pub fn id(&self) -> FanId {
        self.calculator.fan()
    }

    pub fn name(&self) -> &str {
        self.calculator.name()
    }

    pub fn calculator(&self) -> &DutyCalculator {
        &self.calculator
    }

    pub fn actuator(&self) -> &Arc<dyn FanActuator> {
        &self.actuator
    }

    pub fn speeds(&self) -> Vec<FanSpeed> {
        self.actuator.speeds()
    }

    fn actuation(&self, source: DriverError) -> AppError {
        AppError::Actuation {
            fan: self.name().to_string(),
            source,
        }
    }

    /// Seed `last_duty` (and the store) from what the hardware currently runs at.
    pub async fn setup(&mut self, store: &ValueStore) -> AppResult<()> {
        let current = self
            .actuator
            .duty()
            .await
            .map_err(|e| self.actuation(e))?;
        self.calculator.set_last_duty(current);
        if let Some(duty) = current {
            store.set_fan(self.id(), duty)?;
        }
        self.written = current;
        self.actuator
            .refresh()
            .await
            .map_err(|e| self.actuation(e))?;
        debug!(fan = %self.name(), ?current, "fan set up");
        Ok(())
    }

    /// Recompute and apply the duty if any input changed.
    ///
    /// Returns `None` when the fan was clean.
    pub async fn update(
        &mut self,
        store: &ValueStore,
        graph: &DependencyGraph,
        now: Instant,
    ) -> AppResult<Option<DutyDecision>> {
        if !self.calculator.take_dirty(graph) {
            return Ok(None);
        }
        let decision = match self.calculator.calculate(store, graph, now) {
            Ok(decision) => decision,
            Err(source) => {
                graph.mark_dirty(self.calculator.node());
                return Err(AppError::Evaluation {
                    fan: self.name().to_string(),
                    source,
                });
            }
        };
        self.calculator.commit(store, decision.duty)?;
        self.apply(decision.duty, false).await?;
        self.actuator
            .refresh()
            .await
            .map_err(|e| self.actuation(e))?;
        self.calculator.publish(graph);
        Ok(Some(decision))
    }

    /// Write `duty` unless it equals the last written one and `force` is off.
    pub async fn apply(&mut self, duty: Duty, force: bool) -> AppResult<()> {
        if !force && self.written == Some(duty) {
            debug!(fan = %self.name(), %duty, "duty unchanged, write skipped");
            return Ok(());
        }
        self.actuator
            .set_duty(duty)
            .await
            .map_err(|e| self.actuation(e))?;
        self.written = Some(duty);
        Ok(())
    }

    /// Drive the fan to its maximum duty regardless of the last write.
    pub async fn force_max(&mut self, store: &ValueStore) -> AppResult<()> {
        let max = self.calculator.context().max_duty();
        self.apply(max, true).await?;
        self.calculator.commit(store, max)?;
        Ok(())
    }
}
