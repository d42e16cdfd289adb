//! Built-in drivers.
//!
//! - `dummy`: in-memory temperatures and fan zones
//! - `hwmon`: Linux hwmon sysfs files
//!
//! [`DryRunActuator`] wraps any actuator so duty changes are only logged.

pub mod dry_run;
pub mod dummy;
pub mod hwmon;
pub mod registry;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use sf_config::{InterfaceDef, Options};

use crate::error::{DriverError, DriverResult};
use crate::interface::Interface;

pub use dry_run::DryRunActuator;
pub use dummy::{DummyFan, DummyInterface, DummySensor};
pub use hwmon::{Aggregate, HwmonFan, HwmonInterface, HwmonSensor};
pub use registry::ChannelRegistry;

/// Names of the drivers [`create`] knows.
pub const DRIVERS: [&str; 2] = [dummy::DRIVER, hwmon::DRIVER];

/// Create the interface described by `def`.
pub fn create(def: &InterfaceDef) -> DriverResult<Arc<dyn Interface>> {
    match def.driver.as_str() {
        dummy::DRIVER => Ok(Arc::new(DummyInterface::from_options(&def.options)?)),
        hwmon::DRIVER => Ok(Arc::new(HwmonInterface::from_options(&def.options)?)),
        other => Err(DriverError::UnknownDriver(other.to_string())),
    }
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn invalid(option: &str, reason: impl Into<String>) -> DriverError {
    DriverError::InvalidOption {
        option: option.to_string(),
        reason: reason.into(),
    }
}

pub(crate) fn string_option<'a>(
    options: &'a Options,
    key: &'static str,
) -> DriverResult<Option<&'a str>> {
    match options.get(key) {
        None => Ok(None),
        Some(value) => value
            .as_str()
            .map(Some)
            .ok_or_else(|| invalid(key, "expected a string")),
    }
}

pub(crate) fn required_string<'a>(options: &'a Options, key: &'static str) -> DriverResult<&'a str> {
    string_option(options, key)?.ok_or(DriverError::MissingOption(key))
}

/// A single path or a list of paths.
pub(crate) fn path_list(options: &Options, key: &'static str) -> DriverResult<Vec<PathBuf>> {
    match options.get(key) {
        None => Ok(Vec::new()),
        Some(serde_yaml::Value::String(path)) => Ok(vec![PathBuf::from(path)]),
        Some(serde_yaml::Value::Sequence(items)) => items
            .iter()
            .map(|item| {
                item.as_str()
                    .map(PathBuf::from)
                    .ok_or_else(|| invalid(key, "expected a list of paths"))
            })
            .collect(),
        Some(_) => Err(invalid(key, "expected a path or a list of paths")),
    }
}

pub(crate) fn number_map(options: &Options, key: &'static str) -> DriverResult<BTreeMap<String, f64>> {
    let Some(value) = options.get(key) else {
        return Ok(BTreeMap::new());
    };
    let mapping = value
        .as_mapping()
        .ok_or_else(|| invalid(key, "expected a mapping of names to numbers"))?;
    mapping
        .iter()
        .map(|(name, value)| {
            let name = name
                .as_str()
                .ok_or_else(|| invalid(key, "names must be strings"))?;
            let value = value
                .as_f64()
                .ok_or_else(|| invalid(key, format!("value of '{name}' must be a number")))?;
            Ok((name.to_string(), value))
        })
        .collect()
}
