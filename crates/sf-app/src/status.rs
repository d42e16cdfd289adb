//! Live status of a running controller.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Local};
use serde::Serialize;
use sf_controls::ValueStore;
use sf_core::FanId;

use crate::interface::{FanActuator, FanSpeed};

/// One flattened reading of a sensor.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReadingStatus {
    pub label: String,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SensorStatus {
    pub name: String,
    /// `None` until the sensor was read once.
    pub value: Option<f64>,
    pub readings: Vec<ReadingStatus>,
    /// The value was already shown by an earlier snapshot.
    pub stale: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FanStatus {
    pub name: String,
    pub duty: Option<u8>,
    pub stale: bool,
    pub speeds: Vec<FanSpeed>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ControllerStatus {
    pub timestamp: DateTime<Local>,
    pub sensors: Vec<SensorStatus>,
    pub fans: Vec<FanStatus>,
}

/// Cloneable view used to take status snapshots while the controller runs.
#[derive(Clone)]
pub struct StatusHandle {
    store: Arc<ValueStore>,
    fans: Vec<(FanId, Arc<dyn FanActuator>)>,
}

impl StatusHandle {
    pub fn new(store: Arc<ValueStore>, fans: Vec<(FanId, Arc<dyn FanActuator>)>) -> Self {
        Self { store, fans }
    }

    pub fn store(&self) -> &ValueStore {
        &self.store
    }

    /// Take a snapshot. Every value it shows is marked displayed.
    pub fn snapshot(&self) -> ControllerStatus {
        let store = &self.store;
        let sensors = store
            .sensor_ids()
            .map(|id| {
                let shown = store.sensor_display(id).ok().flatten();
                SensorStatus {
                    name: store.sensor_name(id).to_string(),
                    value: shown.as_ref().map(|s| s.value.value()),
                    readings: shown
                        .as_ref()
                        .map(|s| {
                            s.value
                                .readings()
                                .map(|r| ReadingStatus {
                                    label: r.label.to_string(),
                                    value: r.value,
                                })
                                .collect()
                        })
                        .unwrap_or_default(),
                    stale: shown.is_some_and(|s| s.stale),
                }
            })
            .collect();

        let fans = self
            .fans
            .iter()
            .map(|(id, actuator)| {
                let shown = store.fan_display(*id).ok().flatten();
                FanStatus {
                    name: store.fan_name(*id).to_string(),
                    duty: shown.as_ref().map(|s| s.value.percent()),
                    stale: shown.is_some_and(|s| s.stale),
                    speeds: actuator.speeds(),
                }
            })
            .collect();

        ControllerStatus {
            timestamp: Local::now(),
            sensors,
            fans,
        }
    }
}

fn stale_marker(stale: bool) -> &'static str {
    if stale { " (stale)" } else { "" }
}

impl fmt::Display for ControllerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.timestamp.format("%Y-%m-%d %H:%M:%S"))?;
        let width = self
            .sensors
            .iter()
            .map(|s| s.name.len())
            .chain(self.fans.iter().map(|f| f.name.len()))
            .max()
            .unwrap_or(0);

        writeln!(f, "Sensors:")?;
        for sensor in &self.sensors {
            match sensor.value {
                None => writeln!(f, "  {:width$}  -", sensor.name)?,
                Some(value) => {
                    write!(f, "  {:width$}  {value:>5.1}°C", sensor.name)?;
                    let details: Vec<String> = sensor
                        .readings
                        .iter()
                        .map(|r| format!("{}: {:.1}°C", r.label, r.value))
                        .collect();
                    if !details.is_empty() {
                        write!(f, "  [{}]", details.join(", "))?;
                    }
                    writeln!(f, "{}", stale_marker(sensor.stale))?;
                }
            }
        }

        writeln!(f, "Fans:")?;
        for fan in &self.fans {
            match fan.duty {
                None => write!(f, "  {:width$}  -", fan.name)?,
                Some(duty) => write!(f, "  {:width$}  {duty:>3}%", fan.name)?,
            }
            if !fan.speeds.is_empty() {
                let speeds: Vec<String> = fan.speeds.iter().map(ToString::to_string).collect();
                write!(f, "  [{}]", speeds.join(", "))?;
            }
            writeln!(f, "{}", stale_marker(fan.stale))?;
        }
        Ok(())
    }
}
