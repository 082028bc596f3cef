//! Persisted settings.
//!
//! The host owns the actual key-value store; this module defines the
//! interface and the typed feature toggles read from it.

use std::collections::HashMap;
use std::time::Duration;

use log::warn;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::transport::Color;

/// Namespace for every key this crate reads or writes.
pub const NAMESPACE: &str = "pixels";

/// Key holding the [`PixelsSettings`] object.
pub const SETTINGS_KEY: &str = "settings";

/// Key holding the device registry snapshot.
pub const DEVICES_KEY: &str = "devices";

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Settings store rejected write to {namespace}.{key}: {reason}")]
    Rejected {
        namespace: String,
        key: String,
        reason: String,
    },
}

/// A namespaced key-value store with JSON values.
pub trait SettingsStore: Send + Sync {
    fn get(&self, namespace: &str, key: &str) -> Option<serde_json::Value>;

    fn set(
        &mut self,
        namespace: &str,
        key: &str,
        value: serde_json::Value,
    ) -> Result<(), SettingsError>;
}

/// Settings store backed by a map, for tests and hosts without persistence.
#[derive(Debug, Default, Clone)]
pub struct MemorySettings {
    values: HashMap<(String, String), serde_json::Value>,
}

impl MemorySettings {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SettingsStore for MemorySettings {
    fn get(&self, namespace: &str, key: &str) -> Option<serde_json::Value> {
        self.values
            .get(&(namespace.to_string(), key.to_string()))
            .cloned()
    }

    fn set(
        &mut self,
        namespace: &str,
        key: &str,
        value: serde_json::Value,
    ) -> Result<(), SettingsError> {
        self.values
            .insert((namespace.to_string(), key.to_string()), value);
        Ok(())
    }
}

/// Feature toggles and timings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PixelsSettings {
    /// Post stray rolls nobody asked for as a roll of their own.
    pub allow_unprompted: bool,

    /// Quiet period before pending rolls are flushed.
    pub debounce_ms: u64,

    /// How long a completed resolver stays open before resolving.
    pub resolve_delay_ms: u64,

    /// Connection attempts per reconnect.
    pub reconnect_attempts: u32,

    /// Pause between reconnect attempts.
    pub reconnect_backoff_ms: u64,

    /// Colour of the confirmation blink.
    pub blink_color: String,
}

impl Default for PixelsSettings {
    fn default() -> Self {
        Self {
            allow_unprompted: true,
            debounce_ms: 1000,
            resolve_delay_ms: 1000,
            reconnect_attempts: 1,
            reconnect_backoff_ms: 250,
            blink_color: Color::CONFIRM.to_string(),
        }
    }
}

impl PixelsSettings {
    /// Read settings from the store, falling back to defaults.
    pub fn load(store: &dyn SettingsStore) -> Self {
        let Some(value) = store.get(NAMESPACE, SETTINGS_KEY) else {
            return Self::default();
        };
        match serde_json::from_value(value) {
            Ok(settings) => settings,
            Err(e) => {
                warn!("Pixels | Ignoring malformed settings: {}", e);
                Self::default()
            }
        }
    }

    pub fn save(&self, store: &mut dyn SettingsStore) -> Result<(), SettingsError> {
        store.set(NAMESPACE, SETTINGS_KEY, serde_json::to_value(self)?)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn resolve_delay(&self) -> Duration {
        Duration::from_millis(self.resolve_delay_ms)
    }

    pub fn reconnect_backoff(&self) -> Duration {
        Duration::from_millis(self.reconnect_backoff_ms)
    }

    pub fn blink_color(&self) -> Color {
        Color::from_hex(&self.blink_color).unwrap_or(Color::CONFIRM)
    }
}
