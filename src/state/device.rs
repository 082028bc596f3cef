//! Device configuration and link state machine.
//!
//! # State Diagram
//!
//! ```text
//! ┌──────────────┐  connect   ┌────────────┐  established  ┌───────────┐
//! │ Disconnected │───────────▶│ Connecting │──────────────▶│ Connected │
//! └──────────────┘            └─────┬──────┘               └─────┬─────┘
//!        ▲  ▲                       │ failed                     │ │
//!        │  └───────────────────────┘                            │ │
//!        │                   close                               │ │
//!        ├───────────────────────────────────────────────────────┘ │
//!        │                                                         │ lost
//!        │ failed          ┌──────────────┐                        │
//!        └─────────────────│ Reconnecting │◀───────────────────────┘
//!                          └──────┬───────┘
//!                                 │ established
//!                                 ▼
//!                            Connected
//! ```

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::denomination::Denomination;
use crate::transport::PixelLink;

/// Where a device's link currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LinkState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    /// The link dropped unexpectedly and a reconnect is in flight.
    Reconnecting,
}

impl LinkState {
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Connected)
    }
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Connected => write!(f, "Connected"),
            Self::Reconnecting => write!(f, "Reconnecting"),
        }
    }
}

/// Link transition events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkEvent {
    Connect,
    Established,
    Failed,
    Lost,
    Close,
}

/// Error when a link transition is invalid.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid transition from {from} via {event:?}: {reason}")]
pub struct InvalidTransition {
    pub from: LinkState,
    pub event: LinkEvent,
    pub reason: &'static str,
}

impl LinkState {
    /// Calculate the next state for an event.
    pub fn transition(&self, event: LinkEvent) -> Result<LinkState, InvalidTransition> {
        use LinkEvent::*;
        use LinkState::*;

        let invalid = |reason: &'static str| InvalidTransition {
            from: *self,
            event,
            reason,
        };

        match (self, event) {
            (Disconnected, Connect) => Ok(Connecting),
            (Connected, Connect) => Err(invalid("Already connected")),
            (_, Connect) => Err(invalid("Connection attempt already in flight")),

            (Connecting | Reconnecting, Established) => Ok(Connected),
            (_, Established) => Err(invalid("No connection attempt in flight")),

            (Connecting | Reconnecting, Failed) => Ok(Disconnected),
            (_, Failed) => Err(invalid("No connection attempt in flight")),

            (Connected, Lost) => Ok(Reconnecting),
            (_, Lost) => Err(invalid("Not connected")),

            (Connected, Close) => Ok(Disconnected),
            (_, Close) => Err(invalid("Not connected")),
        }
    }
}

/// Persisted part of a device configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceSnapshot {
    pub name: String,
    #[serde(default)]
    pub system_id: String,
    #[serde(default)]
    pub device_id: String,
    #[serde(default)]
    pub denomination: Denomination,
    #[serde(default = "Utc::now")]
    pub paired_at: DateTime<Utc>,
}

/// A known die, paired now or in an earlier session.
///
/// The live link is held only while the state is `Connected`, so
/// `is_active()` and `connection().is_some()` always agree.
#[derive(Clone)]
pub struct DeviceConfig {
    pub device_id: String,
    pub system_id: String,
    pub name: String,
    pub denomination: Denomination,
    pub paired_at: DateTime<Utc>,
    state: LinkState,
    connection: Option<Arc<dyn PixelLink>>,
}

impl fmt::Debug for DeviceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceConfig")
            .field("device_id", &self.device_id)
            .field("system_id", &self.system_id)
            .field("name", &self.name)
            .field("denomination", &self.denomination)
            .field("state", &self.state)
            .field("connected", &self.connection.is_some())
            .finish()
    }
}

impl DeviceConfig {
    /// Create a disconnected configuration.
    pub fn new(
        device_id: impl Into<String>,
        system_id: impl Into<String>,
        name: impl Into<String>,
        denomination: Denomination,
    ) -> Self {
        Self {
            device_id: device_id.into(),
            system_id: system_id.into(),
            name: name.into(),
            denomination,
            paired_at: Utc::now(),
            state: LinkState::Disconnected,
            connection: None,
        }
    }

    /// Create a configuration describing a freshly discovered die.
    pub fn from_link(link: &dyn PixelLink) -> Self {
        Self::new(
            link.device_id(),
            link.system_id(),
            link.name(),
            Denomination::from_die_type(link.die_type()),
        )
    }

    /// Restore from a snapshot. Connections never survive a restart.
    pub fn from_snapshot(snapshot: DeviceSnapshot) -> Self {
        Self {
            device_id: snapshot.device_id,
            system_id: snapshot.system_id,
            name: snapshot.name,
            denomination: snapshot.denomination,
            paired_at: snapshot.paired_at,
            state: LinkState::Disconnected,
            connection: None,
        }
    }

    pub fn snapshot(&self) -> DeviceSnapshot {
        DeviceSnapshot {
            name: self.name.clone(),
            system_id: self.system_id.clone(),
            device_id: self.device_id.clone(),
            denomination: self.denomination,
            paired_at: self.paired_at,
        }
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    /// Connected and receiving events.
    pub fn is_active(&self) -> bool {
        self.state.is_active()
    }

    pub fn connection(&self) -> Option<&Arc<dyn PixelLink>> {
        self.connection.as_ref()
    }

    /// Enter `Connecting`.
    pub fn begin_connect(&mut self) -> Result<(), InvalidTransition> {
        self.state = self.state.transition(LinkEvent::Connect)?;
        Ok(())
    }

    /// A connection attempt succeeded; take ownership of the link and refresh
    /// identity from what the die reports.
    pub fn establish(&mut self, link: Arc<dyn PixelLink>) -> Result<(), InvalidTransition> {
        self.state = self.state.transition(LinkEvent::Established)?;
        self.name = link.name().to_string();
        self.system_id = link.system_id().to_string();
        self.denomination = Denomination::from_die_type(link.die_type());
        self.connection = Some(link);
        Ok(())
    }

    /// A connection attempt failed.
    pub fn fail(&mut self) -> Result<(), InvalidTransition> {
        self.state = self.state.transition(LinkEvent::Failed)?;
        self.connection = None;
        Ok(())
    }

    /// The link dropped unexpectedly. Hands the link back to the caller for
    /// the reconnect attempt.
    pub fn lose(&mut self) -> Result<Option<Arc<dyn PixelLink>>, InvalidTransition> {
        self.state = self.state.transition(LinkEvent::Lost)?;
        Ok(self.connection.take())
    }

    /// Deliberate disconnect. Hands the link back to the caller for teardown.
    pub fn close(&mut self) -> Result<Option<Arc<dyn PixelLink>>, InvalidTransition> {
        self.state = self.state.transition(LinkEvent::Close)?;
        Ok(self.connection.take())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::simulated::SimDriver;

    #[test]
    fn test_connect_cycle() {
        let state = LinkState::default();
        let state = state.transition(LinkEvent::Connect).unwrap();
        assert_eq!(state, LinkState::Connecting);
        let state = state.transition(LinkEvent::Established).unwrap();
        assert!(state.is_active());
        let state = state.transition(LinkEvent::Close).unwrap();
        assert_eq!(state, LinkState::Disconnected);
    }

    #[test]
    fn test_reconnecting_only_from_connected() {
        assert_eq!(
            LinkState::Connected.transition(LinkEvent::Lost),
            Ok(LinkState::Reconnecting)
        );
        assert!(LinkState::Disconnected.transition(LinkEvent::Lost).is_err());
        assert!(LinkState::Connecting.transition(LinkEvent::Lost).is_err());

        assert_eq!(
            LinkState::Reconnecting.transition(LinkEvent::Failed),
            Ok(LinkState::Disconnected)
        );
    }

    #[test]
    fn test_invalid_transitions() {
        let err = LinkState::Connected
            .transition(LinkEvent::Connect)
            .unwrap_err();
        assert_eq!(err.reason, "Already connected");
        assert!(LinkState::Disconnected.transition(LinkEvent::Close).is_err());
        assert!(LinkState::Disconnected
            .transition(LinkEvent::Established)
            .is_err());
    }

    #[test]
    fn test_display_error() {
        let err = LinkState::Disconnected
            .transition(LinkEvent::Close)
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Invalid transition from Disconnected via Close: Not connected"
        );
    }

    #[tokio::test]
    async fn test_active_iff_connection() {
        let (driver, _events) = SimDriver::new();
        let pixel = driver.add_pixel("px-1", "Red d20", "d20").await;

        let mut config = DeviceConfig::from_link(pixel.as_ref());
        assert!(!config.is_active());
        assert!(config.connection().is_none());

        config.begin_connect().unwrap();
        assert!(!config.is_active());
        assert!(config.connection().is_none());

        config.establish(pixel.clone()).unwrap();
        assert!(config.is_active());
        assert!(config.connection().is_some());

        let link = config.lose().unwrap();
        assert!(link.is_some());
        assert!(!config.is_active());
        assert!(config.connection().is_none());

        config.fail().unwrap();
        assert_eq!(config.state(), LinkState::Disconnected);
        assert!(config.connection().is_none());
    }

    #[test]
    fn test_snapshot_restore_is_inactive() {
        let config = DeviceConfig::new("px-1", "sys-1", "Red d20", Denomination::D20);
        let restored = DeviceConfig::from_snapshot(config.snapshot());
        assert_eq!(restored.snapshot(), config.snapshot());
        assert!(!restored.is_active());
    }
}
