//! In-memory driver for simulations and tests.
//!
//! Temperatures are set through [`DummySensor`] handles and fan zones simply
//! remember the duty they were last given.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use sf_config::Options;
use sf_core::{Duty, Temperature};
use tracing::debug;

use super::{ChannelRegistry, lock, number_map, string_option};
use crate::error::{DriverError, DriverResult};
use crate::interface::{FanActuator, FanSpeed, Interface, Teardown, TemperatureSource};

pub const DRIVER: &str = "dummy";

/// Channel used when a reference has no `channel` parameter.
pub const DEFAULT_CHANNEL: &str = "default";

/// Reported speed of a dummy fan at 100% duty.
pub const FULL_SPEED_RPM: u32 = 2000;

fn channel_param(params: &Options) -> DriverResult<&str> {
    Ok(string_option(params, "channel")?.unwrap_or(DEFAULT_CHANNEL))
}

#[derive(Debug)]
pub struct DummySensor {
    channel: String,
    temperature: Mutex<Option<f64>>,
    failure: Mutex<Option<String>>,
    reads: AtomicUsize,
}

impl DummySensor {
    fn new(channel: &str, temperature: Option<f64>) -> Self {
        Self {
            channel: channel.to_string(),
            temperature: Mutex::new(temperature),
            failure: Mutex::new(None),
            reads: AtomicUsize::new(0),
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn set_temperature(&self, value: f64) {
        *lock(&self.temperature) = Some(value);
    }

    /// Make every following read fail with `message`, or succeed again on `None`.
    pub fn fail_with(&self, message: Option<&str>) {
        *lock(&self.failure) = message.map(str::to_string);
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl TemperatureSource for DummySensor {
    async fn temperature(&self) -> DriverResult<Temperature> {
        self.reads.fetch_add(1, Ordering::Relaxed);
        if let Some(message) = lock(&self.failure).clone() {
            return Err(DriverError::Device(message));
        }
        let value = lock(&self.temperature)
            .ok_or_else(|| DriverError::NoReading(self.channel.clone()))?;
        Ok(Temperature::new(value, self.channel.clone()))
    }
}

#[derive(Debug)]
pub struct DummyFan {
    channel: String,
    duty: Mutex<Option<Duty>>,
    failure: Mutex<Option<String>>,
    writes: AtomicUsize,
}

impl DummyFan {
    fn new(channel: &str) -> Self {
        Self {
            channel: channel.to_string(),
            duty: Mutex::new(None),
            failure: Mutex::new(None),
            writes: AtomicUsize::new(0),
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Duty the fan was last given, or the preset one.
    pub fn current(&self) -> Option<Duty> {
        *lock(&self.duty)
    }

    /// Pretend the hardware already runs at `duty`, without counting a write.
    pub fn preset(&self, duty: Duty) {
        *lock(&self.duty) = Some(duty);
    }

    /// Make every following write fail with `message`, or succeed again on `None`.
    pub fn fail_with(&self, message: Option<&str>) {
        *lock(&self.failure) = message.map(str::to_string);
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl FanActuator for DummyFan {
    async fn duty(&self) -> DriverResult<Option<Duty>> {
        Ok(self.current())
    }

    async fn set_duty(&self, duty: Duty) -> DriverResult<()> {
        if let Some(message) = lock(&self.failure).clone() {
            return Err(DriverError::Device(message));
        }
        *lock(&self.duty) = Some(duty);
        self.writes.fetch_add(1, Ordering::Relaxed);
        debug!(channel = %self.channel, %duty, "dummy fan duty set");
        Ok(())
    }

    fn speeds(&self) -> Vec<FanSpeed> {
        self.current()
            .map(|duty| FanSpeed {
                label: self.channel.clone(),
                rpm: FULL_SPEED_RPM * u32::from(duty.percent()) / 100,
            })
            .into_iter()
            .collect()
    }
}

/// Simulated hardware.
///
/// Options:
/// - `temperatures`: initial temperature per sensor channel
///
/// Sensor and fan references select a channel with `channel` (default
/// `"default"`).
#[derive(Debug, Default)]
pub struct DummyInterface {
    initial: BTreeMap<String, f64>,
    sensors: ChannelRegistry<Arc<DummySensor>>,
    fans: ChannelRegistry<Arc<DummyFan>>,
    setup_failure: Mutex<Option<String>>,
    setups: AtomicUsize,
    updates: AtomicUsize,
    teardowns: Arc<AtomicUsize>,
}

impl DummyInterface {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_temperatures<I, S>(temperatures: I) -> Self
    where
        I: IntoIterator<Item = (S, f64)>,
        S: Into<String>,
    {
        Self {
            initial: temperatures
                .into_iter()
                .map(|(name, value)| (name.into(), value))
                .collect(),
            ..Self::default()
        }
    }

    pub fn from_options(options: &Options) -> DriverResult<Self> {
        Ok(Self::with_temperatures(number_map(options, "temperatures")?))
    }

    /// Handle of a sensor channel, created if it does not exist yet.
    pub fn sensor_channel(&self, channel: &str) -> DriverResult<Arc<DummySensor>> {
        self.sensors.get_or_insert_with(channel, || {
            Ok(Arc::new(DummySensor::new(
                channel,
                self.initial.get(channel).copied(),
            )))
        })
    }

    /// Handle of a fan channel, created if it does not exist yet.
    pub fn fan_channel(&self, channel: &str) -> DriverResult<Arc<DummyFan>> {
        self.fans
            .get_or_insert_with(channel, || Ok(Arc::new(DummyFan::new(channel))))
    }

    /// Make the next setups fail with `message`, or succeed again on `None`.
    pub fn fail_setup(&self, message: Option<&str>) {
        *lock(&self.setup_failure) = message.map(str::to_string);
    }

    pub fn setup_count(&self) -> usize {
        self.setups.load(Ordering::Relaxed)
    }

    pub fn update_count(&self) -> usize {
        self.updates.load(Ordering::Relaxed)
    }

    pub fn teardown_count(&self) -> usize {
        self.teardowns.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Interface for DummyInterface {
    fn driver(&self) -> &str {
        DRIVER
    }

    async fn setup(&self) -> DriverResult<Teardown> {
        if let Some(message) = lock(&self.setup_failure).clone() {
            return Err(DriverError::Device(message));
        }
        let sensors = self.sensors.seal().len();
        let fans = self.fans.seal().len();
        self.setups.fetch_add(1, Ordering::Relaxed);
        debug!(sensors, fans, "dummy interface set up");

        let teardowns = Arc::clone(&self.teardowns);
        Ok(Box::pin(async move {
            teardowns.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }))
    }

    async fn update(&self) -> DriverResult<()> {
        self.updates.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn sensor(&self, params: &Options) -> DriverResult<Arc<dyn TemperatureSource>> {
        let sensor: Arc<dyn TemperatureSource> = self.sensor_channel(channel_param(params)?)?;
        Ok(sensor)
    }

    fn fan(&self, params: &Options) -> DriverResult<Arc<dyn FanActuator>> {
        let fan: Arc<dyn FanActuator> = self.fan_channel(channel_param(params)?)?;
        Ok(fan)
    }
}
