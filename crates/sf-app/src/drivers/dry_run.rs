//! Actuator wrapper that logs duty changes instead of applying them.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use sf_core::Duty;
use tracing::info;

use super::lock;
use crate::error::DriverResult;
use crate::interface::{FanActuator, FanSpeed};

pub struct DryRunActuator {
    fan: String,
    inner: Arc<dyn FanActuator>,
    duty: Mutex<Option<Duty>>,
}

impl DryRunActuator {
    pub fn new(fan: impl Into<String>, inner: Arc<dyn FanActuator>) -> Self {
        Self {
            fan: fan.into(),
            inner,
            duty: Mutex::new(None),
        }
    }
}

#[async_trait]
impl FanActuator for DryRunActuator {
    /// The duty last requested, falling back to what the hardware reports.
    async fn duty(&self) -> DriverResult<Option<Duty>> {
        let requested = *lock(&self.duty);
        match requested {
            Some(duty) => Ok(Some(duty)),
            None => self.inner.duty().await,
        }
    }

    async fn set_duty(&self, duty: Duty) -> DriverResult<()> {
        info!(fan = %self.fan, %duty, "dry run: duty not applied");
        *lock(&self.duty) = Some(duty);
        Ok(())
    }

    async fn refresh(&self) -> DriverResult<()> {
        self.inner.refresh().await
    }

    fn speeds(&self) -> Vec<FanSpeed> {
        self.inner.speeds()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::DummyInterface;

    #[tokio::test]
    async fn writes_never_reach_the_hardware() {
        let interface = DummyInterface::new();
        let fan = interface.fan_channel("case").unwrap();
        fan.preset(Duty::new(30).unwrap());

        let dry = DryRunActuator::new("case", fan.clone());
        assert_eq!(dry.duty().await.unwrap(), Some(Duty::new(30).unwrap()));

        dry.set_duty(Duty::MAX).await.unwrap();
        assert_eq!(dry.duty().await.unwrap(), Some(Duty::MAX));
        assert_eq!(fan.current(), Some(Duty::new(30).unwrap()));
        assert_eq!(fan.writes(), 0);
    }
}
