//! Shared store of last known sensor temperatures and fan duties.
//!
//! The store is the single synchronization point between sensor polling
//! tasks, fan updates and status queries. Every entry sits behind its own
//! lock and has exactly one writer, so readers always see the last completed
//! write.
//!
//! Each entry also tracks whether it has been *displayed* since it was last
//! written. Display reads return that flag as `stale` and then set it.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use sf_core::{Duty, FanId, Id, Real, SensorId, Temperature};

use crate::error::{ControlError, ControlResult, RefKind};

#[derive(Debug)]
struct Entry<T> {
    value: T,
    displayed: bool,
}

type Slot<T> = Mutex<Option<Entry<T>>>;

/// A value returned by a display read.
#[derive(Debug, Clone, PartialEq)]
pub struct Displayed<T> {
    pub value: T,
    /// `true` when the value was already displayed once since it was written.
    pub stale: bool,
}

fn lock<T>(slot: &Mutex<T>) -> MutexGuard<'_, T> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

fn read_display<T: Clone>(slot: &Slot<T>) -> Option<Displayed<T>> {
    let mut guard = lock(slot);
    let entry = guard.as_mut()?;
    let stale = entry.displayed;
    entry.displayed = true;
    Some(Displayed {
        value: entry.value.clone(),
        stale,
    })
}

/// Index of declared names for one namespace.
#[derive(Debug, Default)]
struct Names {
    names: Vec<String>,
    index: HashMap<String, Id>,
}

impl Names {
    fn new<I, S>(kind: RefKind, names: I) -> ControlResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut out = Names::default();
        for name in names {
            let name = name.into();
            let id = Id::from_index(out.names.len());
            if out.index.insert(name.clone(), id).is_some() {
                return Err(ControlError::DuplicateId { kind, id: name });
            }
            out.names.push(name);
        }
        Ok(out)
    }

    fn resolve(&self, kind: RefKind, name: &str) -> ControlResult<Id> {
        self.index
            .get(name)
            .copied()
            .ok_or_else(|| ControlError::UnknownId {
                kind,
                id: name.to_string(),
            })
    }

    fn check(&self, kind: RefKind, id: Id) -> ControlResult<usize> {
        if id.index() < self.names.len() {
            Ok(id.index())
        } else {
            Err(ControlError::UnknownId {
                kind,
                id: id.to_string(),
            })
        }
    }
}

/// Last known values of every declared sensor and fan.
#[derive(Debug)]
pub struct ValueStore {
    sensor_names: Names,
    fan_names: Names,
    sensors: Vec<Slot<Temperature>>,
    fans: Vec<Slot<Duty>>,
}

impl ValueStore {
    /// Create a store for exactly these sensor and fan names.
    pub fn new<S, F>(
        sensor_names: impl IntoIterator<Item = S>,
        fan_names: impl IntoIterator<Item = F>,
    ) -> ControlResult<Self>
    where
        S: Into<String>,
        F: Into<String>,
    {
        let sensor_names = Names::new(RefKind::Sensor, sensor_names)?;
        let fan_names = Names::new(RefKind::Fan, fan_names)?;
        let sensors = sensor_names.names.iter().map(|_| Mutex::new(None)).collect();
        let fans = fan_names.names.iter().map(|_| Mutex::new(None)).collect();
        Ok(Self {
            sensor_names,
            fan_names,
            sensors,
            fans,
        })
    }

    /// Number of declared sensors.
    pub fn sensor_count(&self) -> usize {
        self.sensors.len()
    }

    /// Number of declared fans.
    pub fn fan_count(&self) -> usize {
        self.fans.len()
    }

    /// Resolve a sensor name; undeclared names are an error.
    pub fn sensor_id(&self, name: &str) -> ControlResult<SensorId> {
        self.sensor_names.resolve(RefKind::Sensor, name)
    }

    /// Resolve a fan name; undeclared names are an error.
    pub fn fan_id(&self, name: &str) -> ControlResult<FanId> {
        self.fan_names.resolve(RefKind::Fan, name)
    }

    /// Name of a sensor id, `<unknown>` for foreign ids.
    pub fn sensor_name(&self, id: SensorId) -> &str {
        self.sensor_names
            .names
            .get(id.index())
            .map_or("<unknown>", String::as_str)
    }

    /// Name of a fan id, `<unknown>` for foreign ids.
    pub fn fan_name(&self, id: FanId) -> &str {
        self.fan_names
            .names
            .get(id.index())
            .map_or("<unknown>", String::as_str)
    }

    /// Declared sensor ids in declaration order.
    pub fn sensor_ids(&self) -> impl Iterator<Item = SensorId> + '_ {
        (0..self.sensors.len()).map(Id::from_index)
    }

    /// Declared fan ids in declaration order.
    pub fn fan_ids(&self) -> impl Iterator<Item = FanId> + '_ {
        (0..self.fans.len()).map(Id::from_index)
    }

    /// Store a reading by sensor name.
    pub fn set_sensor_temperature(&self, name: &str, temperature: Temperature) -> ControlResult<()> {
        let id = self.sensor_id(name)?;
        self.set_sensor(id, temperature)
    }

    /// Store a duty by fan name.
    pub fn set_fan_duty(&self, name: &str, duty: Duty) -> ControlResult<()> {
        let id = self.fan_id(name)?;
        self.set_fan(id, duty)
    }

    /// Store a reading and mark it not yet displayed.
    pub fn set_sensor(&self, id: SensorId, temperature: Temperature) -> ControlResult<()> {
        let index = self.sensor_names.check(RefKind::Sensor, id)?;
        *lock(&self.sensors[index]) = Some(Entry {
            value: temperature,
            displayed: false,
        });
        Ok(())
    }

    /// Store a duty and mark it not yet displayed.
    pub fn set_fan(&self, id: FanId, duty: Duty) -> ControlResult<()> {
        let index = self.fan_names.check(RefKind::Fan, id)?;
        *lock(&self.fans[index]) = Some(Entry {
            value: duty,
            displayed: false,
        });
        Ok(())
    }

    /// Numeric value of a sensor, without touching its display flag.
    pub fn sensor_value(&self, id: SensorId) -> ControlResult<Option<Real>> {
        let index = self.sensor_names.check(RefKind::Sensor, id)?;
        Ok(lock(&self.sensors[index]).as_ref().map(|e| e.value.value()))
    }

    /// Last full reading of a sensor.
    pub fn sensor_temperature(&self, id: SensorId) -> ControlResult<Option<Temperature>> {
        let index = self.sensor_names.check(RefKind::Sensor, id)?;
        Ok(lock(&self.sensors[index]).as_ref().map(|e| e.value.clone()))
    }

    /// Duty of a fan, without touching its display flag.
    pub fn fan_duty(&self, id: FanId) -> ControlResult<Option<Duty>> {
        let index = self.fan_names.check(RefKind::Fan, id)?;
        Ok(lock(&self.fans[index]).as_ref().map(|e| e.value))
    }

    /// Sensor reading for display; marks it displayed.
    pub fn sensor_display(&self, id: SensorId) -> ControlResult<Option<Displayed<Temperature>>> {
        let index = self.sensor_names.check(RefKind::Sensor, id)?;
        Ok(read_display(&self.sensors[index]))
    }

    /// Fan duty for display; marks it displayed.
    pub fn fan_display(&self, id: FanId) -> ControlResult<Option<Displayed<Duty>>> {
        let index = self.fan_names.check(RefKind::Fan, id)?;
        Ok(read_display(&self.fans[index]))
    }

    /// Display values of every sensor that has a value, in declaration order.
    pub fn sensor_display_values(&self) -> Vec<(&str, Displayed<Temperature>)> {
        self.sensor_names
            .names
            .iter()
            .zip(&self.sensors)
            .filter_map(|(name, slot)| read_display(slot).map(|v| (name.as_str(), v)))
            .collect()
    }

    /// Display values of every fan that has a duty, in declaration order.
    pub fn fan_display_values(&self) -> Vec<(&str, Displayed<Duty>)> {
        self.fan_names
            .names
            .iter()
            .zip(&self.fans)
            .filter_map(|(name, slot)| read_display(slot).map(|v| (name.as_str(), v)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> ValueStore {
        ValueStore::new(["cpu", "disk"], ["case"]).unwrap()
    }

    #[test]
    fn unknown_ids_are_rejected() {
        let store = store();
        let err = store
            .set_sensor_temperature("gpu", Temperature::new(40.0, "gpu"))
            .unwrap_err();
        assert!(matches!(err, ControlError::UnknownId { kind: RefKind::Sensor, .. }));
        assert!(store.set_fan_duty("rear", Duty::MAX).is_err());
        assert!(store.set_fan(Id::from_index(7), Duty::MAX).is_err());
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let err = ValueStore::new(["cpu", "cpu"], Vec::<String>::new()).unwrap_err();
        assert!(matches!(err, ControlError::DuplicateId { .. }));
    }

    #[test]
    fn values_start_unset() {
        let store = store();
        let cpu = store.sensor_id("cpu").unwrap();
        assert_eq!(store.sensor_value(cpu).unwrap(), None);
        assert!(store.sensor_display(cpu).unwrap().is_none());
        assert!(store.sensor_display_values().is_empty());
    }

    #[test]
    fn display_marks_value_stale_until_next_write() {
        let store = store();
        let case = store.fan_id("case").unwrap();
        store.set_fan(case, Duty::new(40).unwrap()).unwrap();

        let first = store.fan_display(case).unwrap().unwrap();
        assert!(!first.stale);
        let second = store.fan_display(case).unwrap().unwrap();
        assert!(second.stale);

        store.set_fan_duty("case", Duty::new(45).unwrap()).unwrap();
        let third = store.fan_display(case).unwrap().unwrap();
        assert!(!third.stale);
        assert_eq!(third.value.percent(), 45);
    }

    #[test]
    fn plain_reads_do_not_mark_displayed() {
        let store = store();
        store
            .set_sensor_temperature("cpu", Temperature::new(55.0, "CPU"))
            .unwrap();
        let cpu = store.sensor_id("cpu").unwrap();
        assert_eq!(store.sensor_value(cpu).unwrap(), Some(55.0));
        let shown = store.sensor_display_values();
        assert_eq!(shown.len(), 1);
        assert_eq!(shown[0].0, "cpu");
        assert!(!shown[0].1.stale);
    }
}
