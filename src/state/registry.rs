//! Device registry.
//!
//! Tracks every known die, connected or not, and writes a snapshot to the
//! settings store whenever the set of known dice changes.

use std::collections::{BTreeMap, HashMap};

use log::{debug, warn};

use super::device::{DeviceConfig, DeviceSnapshot};
use super::settings::{SettingsStore, DEVICES_KEY, NAMESPACE};

/// Registry of known dice keyed by device id.
pub struct DeviceRegistry {
    /// Configurations by device ID
    devices: HashMap<String, DeviceConfig>,

    /// Device IDs in the order they were first seen
    order: Vec<String>,

    store: Box<dyn SettingsStore>,
}

impl DeviceRegistry {
    /// Create an empty registry writing to `store`.
    pub fn new(store: Box<dyn SettingsStore>) -> Self {
        Self {
            devices: HashMap::new(),
            order: Vec::new(),
            store,
        }
    }

    /// Load the registry from the snapshot in `store`.
    ///
    /// Every restored device is inactive. Entries without a device id, or
    /// that fail to parse, are skipped without affecting the rest.
    pub fn load(store: Box<dyn SettingsStore>) -> Self {
        let mut registry = Self::new(store);
        let Some(value) = registry.store.get(NAMESPACE, DEVICES_KEY) else {
            return registry;
        };

        let entries: BTreeMap<String, serde_json::Value> = match serde_json::from_value(value) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Pixels | Ignoring malformed device snapshot: {}", e);
                return registry;
            }
        };

        for (key, entry) in entries {
            let snapshot: DeviceSnapshot = match serde_json::from_value(entry) {
                Ok(snapshot) => snapshot,
                Err(e) => {
                    warn!("Pixels | Skipping malformed stored device {}: {}", key, e);
                    continue;
                }
            };
            if snapshot.device_id.is_empty() {
                debug!("Pixels | Skipping stored device {} without an id", key);
                continue;
            }
            let config = DeviceConfig::from_snapshot(snapshot);
            registry.order.push(config.device_id.clone());
            registry.devices.insert(config.device_id.clone(), config);
        }
        registry
    }

    /// Add or replace a configuration, then persist.
    pub fn insert(&mut self, config: DeviceConfig) {
        if !self.devices.contains_key(&config.device_id) {
            self.order.push(config.device_id.clone());
        }
        self.devices.insert(config.device_id.clone(), config);
        self.save();
    }

    /// Forget a device, then persist if anything was removed.
    pub fn remove(&mut self, device_id: &str) -> Option<DeviceConfig> {
        let config = self.devices.remove(device_id)?;
        self.order.retain(|id| id != device_id);
        self.save();
        Some(config)
    }

    pub fn get(&self, device_id: &str) -> Option<&DeviceConfig> {
        self.devices.get(device_id)
    }

    pub fn get_mut(&mut self, device_id: &str) -> Option<&mut DeviceConfig> {
        self.devices.get_mut(device_id)
    }

    pub fn contains(&self, device_id: &str) -> bool {
        self.devices.contains_key(device_id)
    }

    /// Iterate configurations in first-seen order.
    pub fn iter(&self) -> impl Iterator<Item = &DeviceConfig> {
        self.order.iter().filter_map(|id| self.devices.get(id))
    }

    /// Device IDs in first-seen order.
    pub fn ids(&self) -> Vec<String> {
        self.order.clone()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Count connected devices.
    pub fn active_count(&self) -> usize {
        self.devices.values().filter(|c| c.is_active()).count()
    }

    /// Serializable view of every known device.
    pub fn snapshot(&self) -> BTreeMap<String, DeviceSnapshot> {
        self.devices
            .iter()
            .map(|(id, config)| (id.clone(), config.snapshot()))
            .collect()
    }

    /// Write the snapshot to the settings store.
    pub fn save(&mut self) {
        let value = match serde_json::to_value(self.snapshot()) {
            Ok(value) => value,
            Err(e) => {
                warn!("Pixels | Failed to serialize device registry: {}", e);
                return;
            }
        };
        if let Err(e) = self.store.set(NAMESPACE, DEVICES_KEY, value) {
            warn!("Pixels | Failed to persist device registry: {}", e);
        }
    }

    pub fn store(&self) -> &dyn SettingsStore {
        self.store.as_ref()
    }

    pub fn store_mut(&mut self) -> &mut dyn SettingsStore {
        self.store.as_mut()
    }
}
