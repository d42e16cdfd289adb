//! Configuration schema definitions.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Driver-specific key/value options.
pub type Options = BTreeMap<String, serde_yaml::Value>;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub shutdown: ShutdownPolicy,
    #[serde(default)]
    pub interfaces: BTreeMap<String, InterfaceDef>,
    #[serde(default)]
    pub sensors: BTreeMap<String, SensorDef>,
    #[serde(default)]
    pub fans: BTreeMap<String, FanDef>,
}

/// What happens to the fans when the controller stops.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ShutdownPolicy {
    /// Drive every fan to its `max_duty` before interfaces are torn down.
    #[default]
    ForceMax,
    /// Leave the last duty in place and let teardown hand control back.
    Release,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InterfaceDef {
    pub driver: String,
    #[serde(flatten)]
    pub options: Options,
}

/// Reference to an interface, either by bare id or with channel parameters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum InterfaceRef {
    Id(String),
    Channel {
        id: String,
        #[serde(flatten)]
        params: Options,
    },
}

impl InterfaceRef {
    pub fn id(&self) -> &str {
        match self {
            InterfaceRef::Id(id) | InterfaceRef::Channel { id, .. } => id,
        }
    }

    /// Channel parameters; empty for a bare id.
    pub fn params(&self) -> Options {
        match self {
            InterfaceRef::Id(_) => Options::new(),
            InterfaceRef::Channel { params, .. } => params.clone(),
        }
    }
}

impl From<&str> for InterfaceRef {
    fn from(id: &str) -> Self {
        InterfaceRef::Id(id.to_string())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SensorDef {
    pub interface: InterfaceRef,
    /// Polling interval in seconds.
    pub interval_s: f64,
}

pub const DEFAULT_MIN_DUTY: i64 = 0;
pub const DEFAULT_MAX_DUTY: i64 = 100;

fn default_min_duty() -> i64 {
    DEFAULT_MIN_DUTY
}

fn default_max_duty() -> i64 {
    DEFAULT_MAX_DUTY
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FanDef {
    pub interface: InterfaceRef,
    #[serde(default = "default_min_duty")]
    pub min_duty: i64,
    #[serde(default = "default_max_duty")]
    pub max_duty: i64,
    /// Algorithm name -> expression text.
    #[serde(default)]
    pub algorithms: BTreeMap<String, String>,
}

impl Config {
    /// Shortest sensor polling interval, in seconds.
    pub fn min_interval_s(&self) -> Option<f64> {
        self.sensors
            .values()
            .map(|s| s.interval_s)
            .min_by(f64::total_cmp)
    }
}
