//! Linux hwmon sysfs driver.
//!
//! Sensor parameters:
//! - `inputs`: one or more `temp*_input` files (millidegrees Celsius)
//! - `label`: label of the combined reading (defaults to the input labels)
//! - `aggregate`: `max` (default) or `mean` over several inputs
//!
//! Fan parameters:
//! - `pwm`: the `pwm*` file (0..=255)
//! - `fan_inputs`: `fan*_input` files reporting RPMs
//!
//! Setup switches every used `pwm*_enable` to manual mode (1). The teardown
//! restores the saved modes.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::future::try_join_all;
use sf_config::Options;
use sf_core::{Duty, Temperature};
use tracing::{debug, info, warn};

use super::{ChannelRegistry, lock, path_list, required_string, string_option};
use crate::error::{DriverError, DriverResult};
use crate::interface::{FanActuator, FanSpeed, Interface, Teardown, TemperatureSource};

pub const DRIVER: &str = "hwmon";

/// `pwm*_enable` value for manual control.
const MANUAL_MODE: u8 = 1;
const PWM_MAX: f64 = 255.0;

async fn read_value<T: FromStr>(path: &Path) -> DriverResult<T> {
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| DriverError::Io {
            path: path.to_path_buf(),
            source,
        })?;
    content.trim().parse().map_err(|_| DriverError::Parse {
        path: path.to_path_buf(),
        content: content.trim().to_string(),
    })
}

async fn write_value(path: &Path, value: impl ToString) -> DriverResult<()> {
    tokio::fs::write(path, value.to_string())
        .await
        .map_err(|source| DriverError::Io {
            path: path.to_path_buf(),
            source,
        })
}

fn file_stem(path: &Path) -> String {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    name.strip_suffix("_input").map(str::to_string).unwrap_or(name)
}

/// `temp1_input` -> `temp1_label`, when the file follows the hwmon naming.
fn label_path(input: &Path) -> Option<PathBuf> {
    let name = input.file_name()?.to_str()?;
    let stem = name.strip_suffix("_input")?;
    Some(input.with_file_name(format!("{stem}_label")))
}

fn enable_path(pwm: &Path) -> PathBuf {
    let mut name = pwm
        .file_name()
        .map(OsString::from)
        .unwrap_or_default();
    name.push("_enable");
    pwm.with_file_name(name)
}

/// How readings of several inputs are combined.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Aggregate {
    #[default]
    Max,
    Mean,
}

impl FromStr for Aggregate {
    type Err = DriverError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "max" => Ok(Aggregate::Max),
            "mean" => Ok(Aggregate::Mean),
            other => Err(DriverError::InvalidOption {
                option: "aggregate".to_string(),
                reason: format!("expected 'max' or 'mean', got '{other}'"),
            }),
        }
    }
}

#[derive(Debug)]
pub struct HwmonSensor {
    inputs: Vec<PathBuf>,
    label: Option<String>,
    aggregate: Aggregate,
}

impl HwmonSensor {
    pub fn new(inputs: Vec<PathBuf>, label: Option<String>, aggregate: Aggregate) -> DriverResult<Self> {
        if inputs.is_empty() {
            return Err(DriverError::MissingOption("inputs"));
        }
        Ok(Self {
            inputs,
            label,
            aggregate,
        })
    }

    async fn read_input(input: &Path) -> DriverResult<Temperature> {
        let millidegrees: i64 = read_value(input).await?;
        let label = match label_path(input) {
            Some(path) => tokio::fs::read_to_string(&path)
                .await
                .map(|l| l.trim().to_string())
                .unwrap_or_else(|_| file_stem(input)),
            None => file_stem(input),
        };
        Ok(Temperature::new(millidegrees as f64 / 1000.0, label))
    }
}

#[async_trait]
impl TemperatureSource for HwmonSensor {
    async fn temperature(&self) -> DriverResult<Temperature> {
        let mut readings = try_join_all(self.inputs.iter().map(|p| Self::read_input(p))).await?;
        if readings.len() == 1 {
            let reading = readings.remove(0);
            return Ok(match &self.label {
                Some(label) => Temperature::new(reading.value(), label.clone()),
                None => reading,
            });
        }
        let label = self.label.clone().unwrap_or_else(|| {
            readings
                .iter()
                .map(Temperature::label)
                .collect::<Vec<_>>()
                .join("+")
        });
        let temperature = match self.aggregate {
            Aggregate::Max => Temperature::max_of(label, readings)?,
            Aggregate::Mean => Temperature::mean_of(label, readings)?,
        };
        Ok(temperature)
    }
}

#[derive(Debug)]
pub struct HwmonFan {
    pwm: PathBuf,
    fan_inputs: Vec<PathBuf>,
    speeds: Mutex<Vec<FanSpeed>>,
}

impl HwmonFan {
    pub fn new(pwm: PathBuf, fan_inputs: Vec<PathBuf>) -> Self {
        Self {
            pwm,
            fan_inputs,
            speeds: Mutex::new(Vec::new()),
        }
    }

    pub fn pwm(&self) -> &Path {
        &self.pwm
    }

    pub fn enable_path(&self) -> PathBuf {
        enable_path(&self.pwm)
    }
}

fn duty_from_pwm(raw: u16) -> DriverResult<Duty> {
    let percent = (f64::from(raw) * 100.0 / PWM_MAX).round() as i64;
    Ok(Duty::new(percent.min(100))?)
}

fn pwm_from_duty(duty: Duty) -> u8 {
    (duty.as_real() * PWM_MAX / 100.0).round() as u8
}

#[async_trait]
impl FanActuator for HwmonFan {
    async fn duty(&self) -> DriverResult<Option<Duty>> {
        let raw: u16 = read_value(&self.pwm).await?;
        duty_from_pwm(raw).map(Some)
    }

    async fn set_duty(&self, duty: Duty) -> DriverResult<()> {
        let raw = pwm_from_duty(duty);
        debug!(pwm = %self.pwm.display(), %duty, raw, "writing pwm");
        write_value(&self.pwm, raw).await
    }

    async fn refresh(&self) -> DriverResult<()> {
        let speeds = try_join_all(self.fan_inputs.iter().map(|input| async move {
            let rpm: u32 = read_value(input).await?;
            Ok::<_, DriverError>(FanSpeed {
                label: file_stem(input),
                rpm,
            })
        }))
        .await?;
        *lock(&self.speeds) = speeds;
        Ok(())
    }

    fn speeds(&self) -> Vec<FanSpeed> {
        lock(&self.speeds).clone()
    }
}

#[derive(Debug, Default)]
pub struct HwmonInterface {
    sensors: ChannelRegistry<Arc<HwmonSensor>>,
    fans: ChannelRegistry<Arc<HwmonFan>>,
}

impl HwmonInterface {
    pub fn new() -> Self {
        Self::default()
    }

    /// The interface itself takes no options; every path is per channel.
    pub fn from_options(_options: &Options) -> DriverResult<Self> {
        Ok(Self::new())
    }
}

async fn restore_modes(saved: Vec<(PathBuf, u8)>) -> DriverResult<()> {
    let mut first_error = None;
    for (path, mode) in saved {
        if let Err(err) = write_value(&path, mode).await {
            warn!(path = %path.display(), mode, error = %err, "failed to restore pwm mode");
            first_error.get_or_insert(err);
        }
    }
    first_error.map_or(Ok(()), Err)
}

#[async_trait]
impl Interface for HwmonInterface {
    fn driver(&self) -> &str {
        DRIVER
    }

    async fn setup(&self) -> DriverResult<Teardown> {
        self.sensors.seal();
        let fans = self.fans.seal();

        let mut saved = Vec::with_capacity(fans.len());
        for fan in &fans {
            let enable = fan.enable_path();
            let result = async {
                let mode: u8 = read_value(&enable).await?;
                write_value(&enable, MANUAL_MODE).await?;
                Ok::<_, DriverError>(mode)
            }
            .await;
            match result {
                Ok(mode) => saved.push((enable, mode)),
                Err(err) => {
                    if let Err(restore) = restore_modes(saved).await {
                        warn!(error = %restore, "failed to roll back pwm modes");
                    }
                    return Err(err);
                }
            }
        }
        info!(fans = saved.len(), "hwmon pwm channels switched to manual control");
        Ok(Box::pin(restore_modes(saved)))
    }

    fn sensor(&self, params: &Options) -> DriverResult<Arc<dyn TemperatureSource>> {
        let inputs = path_list(params, "inputs")?;
        let label = string_option(params, "label")?.map(str::to_string);
        let aggregate = string_option(params, "aggregate")?
            .map(Aggregate::from_str)
            .transpose()?
            .unwrap_or_default();
        let key = format!(
            "{}|{:?}|{}",
            inputs
                .iter()
                .map(|p| p.display().to_string())
                .collect::<Vec<_>>()
                .join(","),
            aggregate,
            label.as_deref().unwrap_or_default()
        );
        let sensor: Arc<dyn TemperatureSource> = self.sensors.get_or_insert_with(&key, || {
            Ok(Arc::new(HwmonSensor::new(inputs, label, aggregate)?))
        })?;
        Ok(sensor)
    }

    fn fan(&self, params: &Options) -> DriverResult<Arc<dyn FanActuator>> {
        let pwm = PathBuf::from(required_string(params, "pwm")?);
        let fan_inputs = path_list(params, "fan_inputs")?;
        let key = pwm.display().to_string();
        let fan: Arc<dyn FanActuator> = self
            .fans
            .get_or_insert_with(&key, || Ok(Arc::new(HwmonFan::new(pwm, fan_inputs))))?;
        Ok(fan)
    }
}
