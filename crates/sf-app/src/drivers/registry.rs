//! Get-or-insert registry of driver channels.

use std::collections::BTreeMap;
use std::sync::Mutex;

use super::lock;
use crate::error::{DriverError, DriverResult};

#[derive(Debug)]
struct Channels<V> {
    channels: BTreeMap<String, V>,
    sealed: bool,
}

/// Channels keyed by their parameters.
///
/// Two sensors or fans with the same parameters share one channel. Once the
/// interface is set up the registry is sealed and only existing channels are
/// handed out.
#[derive(Debug)]
pub struct ChannelRegistry<V> {
    inner: Mutex<Channels<V>>,
}

impl<V> Default for ChannelRegistry<V> {
    fn default() -> Self {
        Self {
            inner: Mutex::new(Channels {
                channels: BTreeMap::new(),
                sealed: false,
            }),
        }
    }
}

impl<V: Clone> ChannelRegistry<V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_insert_with(
        &self,
        key: &str,
        create: impl FnOnce() -> DriverResult<V>,
    ) -> DriverResult<V> {
        let mut inner = lock(&self.inner);
        if let Some(existing) = inner.channels.get(key) {
            return Ok(existing.clone());
        }
        if inner.sealed {
            return Err(DriverError::Sealed(key.to_string()));
        }
        let channel = create()?;
        inner.channels.insert(key.to_string(), channel.clone());
        Ok(channel)
    }

    pub fn get(&self, key: &str) -> Option<V> {
        lock(&self.inner).channels.get(key).cloned()
    }

    /// Refuse new channels and return the existing ones.
    pub fn seal(&self) -> Vec<V> {
        let mut inner = lock(&self.inner);
        inner.sealed = true;
        inner.channels.values().cloned().collect()
    }

    pub fn is_sealed(&self) -> bool {
        lock(&self.inner).sealed
    }

    pub fn len(&self) -> usize {
        lock(&self.inner).channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn same_key_shares_a_channel() {
        let registry = ChannelRegistry::new();
        let a = registry
            .get_or_insert_with("pwm1", || Ok(Arc::new(1)))
            .unwrap();
        let b = registry
            .get_or_insert_with("pwm1", || Ok(Arc::new(2)))
            .unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn sealed_registry_only_returns_existing_channels() {
        let registry = ChannelRegistry::new();
        registry.get_or_insert_with("a", || Ok(1)).unwrap();
        assert_eq!(registry.seal(), vec![1]);
        assert!(registry.is_sealed());
        assert_eq!(registry.get_or_insert_with("a", || Ok(5)).unwrap(), 1);
        assert!(matches!(
            registry.get_or_insert_with("b", || Ok(2)),
            Err(DriverError::Sealed(key)) if key == "b"
        ));
    }

    #[test]
    fn failed_creation_inserts_nothing() {
        let registry: ChannelRegistry<u8> = ChannelRegistry::new();
        let err = registry.get_or_insert_with("x", || Err(DriverError::MissingOption("pwm")));
        assert!(err.is_err());
        assert!(registry.is_empty());
    }
}
