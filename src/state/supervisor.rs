//! Connection supervisor.
//!
//! Owns the device registry and every transport call. Failures never
//! escape: each one ends in a registry update plus a notification.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use log::{info, warn};
use thiserror::Error;

use super::denomination::Denomination;
use super::device::{DeviceConfig, InvalidTransition};
use super::host::{DisplayAdapter, NoticeLevel};
use super::registry::DeviceRegistry;
use super::settings::PixelsSettings;
use crate::transport::{Color, PixelDriver, PixelLink, TransportError, STATUS_DISCONNECTED};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SupervisorError {
    #[error("Unknown device: {0}")]
    UnknownDevice(String),

    #[error("Device {0} can no longer be found")]
    NotFound(String),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransition),
}

/// How hard to try when reconnecting a known die.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub attempts: u32,
    pub backoff: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            attempts: 1,
            backoff: Duration::from_millis(250),
        }
    }
}

impl ReconnectPolicy {
    pub fn from_settings(settings: &PixelsSettings) -> Self {
        Self {
            attempts: settings.reconnect_attempts.max(1),
            backoff: settings.reconnect_backoff(),
        }
    }
}

/// Connect with bounded retries. Returns the last error if every attempt
/// failed.
async fn connect_with_retry(
    link: &dyn PixelLink,
    policy: ReconnectPolicy,
) -> Result<(), TransportError> {
    let mut attempt = 1;
    loop {
        match link.connect().await {
            Ok(()) => return Ok(()),
            Err(e) if attempt >= policy.attempts => return Err(e),
            Err(e) => {
                warn!(
                    "Pixels | [{}] Connection attempt {} failed: {}",
                    link.name(),
                    attempt,
                    e
                );
                attempt += 1;
                tokio::time::sleep(policy.backoff).await;
            }
        }
    }
}

/// What a status event led to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusOutcome {
    /// Not a disconnect of an active die.
    Ignored,
    /// The link dropped and came back.
    Recovered,
    /// The link dropped and the die needs re-pairing.
    Lost,
}

/// A known die as the UI lists it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceSummary {
    pub device_id: String,
    pub name: String,
    pub denomination: Denomination,
    pub active: bool,
    pub rssi: Option<i16>,
    pub battery: Option<u8>,
}

/// Supervises every die's connection.
pub struct ConnectionSupervisor {
    registry: DeviceRegistry,
    driver: Arc<dyn PixelDriver>,
    /// Devices whose events are currently delivered
    dispatch: HashSet<String>,
    policy: ReconnectPolicy,
    blink_color: Color,
}

impl ConnectionSupervisor {
    pub fn new(registry: DeviceRegistry, driver: Arc<dyn PixelDriver>) -> Self {
        Self {
            registry,
            driver,
            dispatch: HashSet::new(),
            policy: ReconnectPolicy::default(),
            blink_color: Color::CONFIRM,
        }
    }

    pub fn with_settings(mut self, settings: &PixelsSettings) -> Self {
        self.policy = ReconnectPolicy::from_settings(settings);
        self.blink_color = settings.blink_color();
        self
    }

    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut DeviceRegistry {
        &mut self.registry
    }

    /// Whether arriving events for `device_id` are delivered.
    pub fn is_routed(&self, device_id: &str) -> bool {
        self.dispatch.contains(device_id)
    }

    /// The active configuration for a routed device.
    pub fn listening(&self, device_id: &str) -> Option<&DeviceConfig> {
        if !self.is_routed(device_id) {
            return None;
        }
        self.registry.get(device_id).filter(|c| c.is_active())
    }

    /// Pair a new die chosen by the user.
    ///
    /// On failure the user is notified and nothing is added to the registry.
    pub async fn request(
        &mut self,
        display: &mut dyn DisplayAdapter,
    ) -> Result<String, SupervisorError> {
        let result = match self.driver.request_pixel().await {
            Ok(link) => self.connect(link, 1).await,
            Err(e) => Err(e.into()),
        };
        match &result {
            Ok(device_id) => {
                if let Some(config) = self.registry.get(device_id) {
                    display.notify(
                        NoticeLevel::Info,
                        &format!("Connected to {}", config.name),
                    );
                }
            }
            Err(e) => {
                warn!("Pixels | Pairing failed: {}", e);
                display.notify(NoticeLevel::Error, &format!("Pairing failed: {}", e));
            }
        }
        display.registry_changed();
        result
    }

    /// Try reconnecting every known die. Returns whether all succeeded.
    ///
    /// Every die is attempted even after an earlier one fails.
    pub async fn try_reconnect_all(&mut self, display: &mut dyn DisplayAdapter) -> bool {
        if self.registry.is_empty() {
            return true;
        }
        info!("Pixels | Reconnecting to Pixels devices");

        let mut all_reconnected = true;
        for device_id in self.registry.ids() {
            let name = self
                .registry
                .get(&device_id)
                .map(|c| c.name.clone())
                .unwrap_or_default();
            match self.reconnect_quiet(&device_id).await {
                Ok(()) => info!("Pixels | Reconnected to Pixel {}", name),
                Err(e) => {
                    all_reconnected = false;
                    warn!("Pixels | Unable to reconnect to Pixel {}: {}", name, e);
                }
            }
        }
        info!(
            "Pixels | {} of {} Pixels connected",
            self.registry.active_count(),
            self.registry.len()
        );
        display.registry_changed();
        all_reconnected
    }

    /// Reconnect one known die by its stored identity.
    pub async fn reconnect(
        &mut self,
        device_id: &str,
        display: &mut dyn DisplayAdapter,
    ) -> Result<(), SupervisorError> {
        let result = self.reconnect_quiet(device_id).await;
        if let Err(e) = &result {
            display.notify(
                NoticeLevel::Warn,
                &format!("Unable to reconnect {}: {}", device_id, e),
            );
        }
        display.registry_changed();
        result
    }

    async fn reconnect_quiet(&mut self, device_id: &str) -> Result<(), SupervisorError> {
        let config = self
            .registry
            .get(device_id)
            .ok_or_else(|| SupervisorError::UnknownDevice(device_id.to_string()))?;
        if config.is_active() {
            return Ok(());
        }
        let system_id = config.system_id.clone();

        let link = self
            .driver
            .get_pixel(&system_id)
            .await?
            .ok_or_else(|| SupervisorError::NotFound(device_id.to_string()))?;
        self.connect(link, self.policy.attempts).await?;
        Ok(())
    }

    /// Connect a link, register it and start routing its events.
    async fn connect(
        &mut self,
        link: Arc<dyn PixelLink>,
        attempts: u32,
    ) -> Result<String, SupervisorError> {
        let device_id = link.device_id().to_string();
        let known = match self.registry.get_mut(&device_id) {
            Some(config) if config.is_active() => return Ok(device_id),
            Some(config) => {
                config.begin_connect()?;
                true
            }
            None => false,
        };

        let policy = ReconnectPolicy {
            attempts,
            ..self.policy
        };
        if let Err(e) = connect_with_retry(link.as_ref(), policy).await {
            if let Some(config) = self.registry.get_mut(&device_id) {
                config.fail()?;
            }
            return Err(e.into());
        }

        let denomination = if known {
            let config = self
                .registry
                .get_mut(&device_id)
                .ok_or_else(|| SupervisorError::UnknownDevice(device_id.clone()))?;
            config.establish(Arc::clone(&link))?;
            let denomination = config.denomination;
            self.registry.save();
            denomination
        } else {
            let mut config = DeviceConfig::from_link(link.as_ref());
            config.begin_connect()?;
            config.establish(Arc::clone(&link))?;
            let denomination = config.denomination;
            self.registry.insert(config);
            denomination
        };

        if !denomination.is_rollable() {
            warn!(
                "Pixels | [{}] Die type {} cannot fulfil rolls; tracking connection only",
                link.name(),
                link.die_type()
            );
        }
        self.dispatch.insert(device_id.clone());

        if let Err(e) = link.blink(self.blink_color).await {
            warn!("Pixels | [{}] Confirmation blink failed: {}", link.name(), e);
        }
        Ok(device_id)
    }

    /// Disconnect an active die, or forget an inactive one.
    pub async fn disconnect(
        &mut self,
        device_id: &str,
        display: &mut dyn DisplayAdapter,
    ) -> Result<(), SupervisorError> {
        let config = self
            .registry
            .get_mut(device_id)
            .ok_or_else(|| SupervisorError::UnknownDevice(device_id.to_string()))?;

        if !config.is_active() {
            self.dispatch.remove(device_id);
            if let Some(config) = self.registry.remove(device_id) {
                info!("Pixels | Forgot Pixel {}", config.name);
            }
            display.registry_changed();
            return Ok(());
        }

        self.dispatch.remove(device_id);
        let name = config.name.clone();
        let link = config.close()?;
        if let Some(link) = link {
            if let Err(e) = link.disconnect().await {
                warn!("Pixels | [{}] Transport disconnect failed: {}", name, e);
            }
        }
        info!("Pixels | Disconnected Pixel {}", name);
        display.registry_changed();
        Ok(())
    }

    /// React to a connectivity change reported by the driver.
    ///
    /// Only a disconnect of an active die acts: it is marked inactive and one
    /// (bounded) reconnect is attempted.
    pub async fn handle_status(
        &mut self,
        device_id: &str,
        status: &str,
        display: &mut dyn DisplayAdapter,
    ) -> StatusOutcome {
        if status != STATUS_DISCONNECTED {
            return StatusOutcome::Ignored;
        }
        let Some(config) = self.registry.get_mut(device_id) else {
            return StatusOutcome::Ignored;
        };
        if !config.is_active() {
            return StatusOutcome::Ignored;
        }

        let name = config.name.clone();
        let link = match config.lose() {
            Ok(link) => link,
            Err(e) => {
                warn!("Pixels | [{}] {}", name, e);
                return StatusOutcome::Ignored;
            }
        };
        self.dispatch.remove(device_id);
        display.registry_changed();
        display.notify(
            NoticeLevel::Warn,
            &format!("Lost connection to {}, attempting to reconnect", name),
        );

        let recovered = match link {
            Some(link) => match connect_with_retry(link.as_ref(), self.policy).await {
                Ok(()) => Some(link),
                Err(e) => {
                    warn!("Pixels | [{}] Reconnect failed: {}", name, e);
                    None
                }
            },
            None => None,
        };

        let Some(config) = self.registry.get_mut(device_id) else {
            return StatusOutcome::Lost;
        };
        let outcome = match recovered.map(|link| config.establish(link)) {
            Some(Ok(())) => {
                self.dispatch.insert(device_id.to_string());
                self.registry.save();
                display.notify(NoticeLevel::Info, &format!("Reconnected to {}", name));
                StatusOutcome::Recovered
            }
            failed => {
                if let Some(Err(e)) = failed {
                    warn!("Pixels | [{}] {}", name, e);
                }
                if let Err(e) = config.fail() {
                    warn!("Pixels | [{}] {}", name, e);
                }
                self.registry.save();
                display.notify(
                    NoticeLevel::Warn,
                    &format!("Unable to reconnect to {}, please pair it again", name),
                );
                StatusOutcome::Lost
            }
        };
        display.registry_changed();
        outcome
    }

    /// List every known die with live signal and battery readings.
    pub async fn device_summaries(&self) -> Vec<DeviceSummary> {
        let mut summaries = Vec::with_capacity(self.registry.len());
        for config in self.registry.iter() {
            let (rssi, battery) = match config.connection() {
                Some(link) => (link.query_rssi().await.ok(), link.battery_level()),
                None => (None, None),
            };
            summaries.push(DeviceSummary {
                device_id: config.device_id.clone(),
                name: config.name.clone(),
                denomination: config.denomination,
                active: config.is_active(),
                rssi,
                battery,
            });
        }
        summaries
    }
}
