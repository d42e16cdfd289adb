//! A polled temperature source feeding the value store.

use std::sync::Arc;
use std::time::Duration;

use sf_controls::{DependencyGraph, ValueStore};
use sf_core::{NodeId, SensorId, Temperature};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{AppError, AppResult};
use crate::interface::TemperatureSource;

pub struct Sensor {
    id: SensorId,
    name: String,
    node: NodeId,
    interval: Duration,
    source: Arc<dyn TemperatureSource>,
}

impl Sensor {
    pub fn new(
        id: SensorId,
        name: impl Into<String>,
        node: NodeId,
        interval: Duration,
        source: Arc<dyn TemperatureSource>,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            node,
            interval,
            source,
        }
    }

    pub fn id(&self) -> SensorId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Read the source, store the temperature and dirty its dependents.
    pub async fn update(
        &self,
        store: &ValueStore,
        graph: &DependencyGraph,
    ) -> AppResult<Temperature> {
        let temperature = self
            .source
            .temperature()
            .await
            .map_err(|source| AppError::SourceRead {
                sensor: self.name.clone(),
                source,
            })?;
        debug!(sensor = %self.name, %temperature, "sensor read");
        store.set_sensor(self.id, temperature.clone())?;
        graph.publish(self.node);
        Ok(temperature)
    }

    /// Poll every `interval` until `token` is cancelled or a read fails.
    pub async fn run(
        &self,
        store: &ValueStore,
        graph: &DependencyGraph,
        token: CancellationToken,
    ) -> AppResult<()> {
        loop {
            tokio::select! {
                _ = token.cancelled() => return Ok(()),
                _ = tokio::time::sleep(self.interval) => {}
            }
            self.update(store, graph).await?;
        }
    }
}
