//! Collaborator traits implemented by drivers.
//!
//! An [`Interface`] is one piece of hardware (or a simulation of it). It hands
//! out [`TemperatureSource`] and [`FanActuator`] channels for the sensors and
//! fans that reference it, and is set up before the controller runs.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::Serialize;
use sf_config::Options;
use sf_core::{Duty, Temperature};

use crate::error::DriverResult;

/// Measured speed of one fan of a zone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FanSpeed {
    pub label: String,
    pub rpm: u32,
}

impl fmt::Display for FanSpeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} RPM", self.label, self.rpm)
    }
}

#[async_trait]
pub trait TemperatureSource: Send + Sync + 'static {
    async fn temperature(&self) -> DriverResult<Temperature>;
}

#[async_trait]
pub trait FanActuator: Send + Sync + 'static {
    /// Duty currently applied by the hardware, if it can be read back.
    async fn duty(&self) -> DriverResult<Option<Duty>>;

    async fn set_duty(&self, duty: Duty) -> DriverResult<()>;

    /// Re-read fan-local metadata such as RPMs.
    async fn refresh(&self) -> DriverResult<()> {
        Ok(())
    }

    /// Speeds measured by the last [`refresh`](FanActuator::refresh).
    fn speeds(&self) -> Vec<FanSpeed> {
        Vec::new()
    }
}

/// Consumed once to hand hardware control back after the controller stops.
pub type Teardown = BoxFuture<'static, DriverResult<()>>;

/// A teardown with nothing to undo.
pub fn no_teardown() -> Teardown {
    Box::pin(async { Ok(()) })
}

#[async_trait]
pub trait Interface: Send + Sync + 'static {
    /// Name of the driver, as written in the configuration.
    fn driver(&self) -> &str;

    /// Prepare the hardware. Channels can no longer be added afterwards.
    async fn setup(&self) -> DriverResult<Teardown>;

    /// Refresh shared state once per controller cycle.
    async fn update(&self) -> DriverResult<()> {
        Ok(())
    }

    /// Get or create the temperature channel described by `params`.
    fn sensor(&self, params: &Options) -> DriverResult<Arc<dyn TemperatureSource>>;

    /// Get or create the fan channel described by `params`.
    fn fan(&self, params: &Options) -> DriverResult<Arc<dyn FanActuator>>;
}
