//! Transport layer boundary for Pixels dice.
//!
//! The real device driver (wireless pairing, GATT plumbing, message
//! framing) lives outside this crate. This module only describes the
//! capabilities the connection supervisor consumes, plus an in-process
//! simulator used by tests and demos.

pub mod simulated;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

/// Status string the driver reports when a link drops.
pub const STATUS_DISCONNECTED: &str = "disconnected";

/// Status string the driver reports once a link is up.
pub const STATUS_READY: &str = "ready";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Device not found: {0}")]
    NotFound(String),

    #[error("Device selection cancelled")]
    Cancelled,

    #[error("Peer disconnected")]
    Disconnected,

    #[error("Operation timed out")]
    Timeout,
}

/// An RGB colour used for the confirmation blink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    /// The orange flash shown after a successful pairing.
    pub const CONFIRM: Color = Color {
        r: 0xcc,
        g: 0x66,
        b: 0x00,
    };

    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Parse a `#rrggbb` hex string.
    pub fn from_hex(hex: &str) -> Option<Self> {
        let digits = hex.strip_prefix('#').unwrap_or(hex);
        if digits.len() != 6 || !digits.is_ascii() {
            return None;
        }
        let channel = |i: usize| u8::from_str_radix(&digits[i..i + 2], 16).ok();
        Some(Self {
            r: channel(0)?,
            g: channel(2)?,
            b: channel(4)?,
        })
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }
}

/// Payload of a peripheral event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeripheralEventKind {
    /// The die came to rest showing this face value.
    Roll(u32),

    /// Connectivity changed. At minimum the driver reports
    /// [`STATUS_DISCONNECTED`].
    Status(String),
}

/// An event emitted by the driver for one device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeripheralEvent {
    pub device_id: String,
    pub kind: PeripheralEventKind,
}

impl PeripheralEvent {
    pub fn roll(device_id: impl Into<String>, value: u32) -> Self {
        Self {
            device_id: device_id.into(),
            kind: PeripheralEventKind::Roll(value),
        }
    }

    pub fn status(device_id: impl Into<String>, status: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            kind: PeripheralEventKind::Status(status.into()),
        }
    }
}

/// A handle on one physical die.
///
/// Events for the die are not delivered through this trait; the driver
/// pushes them, tagged with [`PixelLink::device_id`], onto the channel it
/// was constructed with.
#[async_trait]
pub trait PixelLink: Send + Sync {
    /// Stable device identifier.
    fn device_id(&self) -> &str;

    /// Identity used by [`PixelDriver::get_pixel`] to rediscover the die.
    fn system_id(&self) -> &str;

    /// Human readable name.
    fn name(&self) -> &str;

    /// Die type as reported by the firmware, e.g. `d20` or `d6pipped`.
    fn die_type(&self) -> &str;

    /// Last known battery level in percent.
    fn battery_level(&self) -> Option<u8>;

    async fn connect(&self) -> Result<(), TransportError>;

    async fn disconnect(&self) -> Result<(), TransportError>;

    /// Flash the die's LEDs.
    async fn blink(&self, color: Color) -> Result<(), TransportError>;

    /// Query the received signal strength.
    async fn query_rssi(&self) -> Result<i16, TransportError>;
}

/// Discovery primitives of the device driver.
#[async_trait]
pub trait PixelDriver: Send + Sync {
    /// Prompt the user to pick a new die.
    async fn request_pixel(&self) -> Result<Arc<dyn PixelLink>, TransportError>;

    /// Find a previously paired die by its system identity.
    async fn get_pixel(&self, system_id: &str)
        -> Result<Option<Arc<dyn PixelLink>>, TransportError>;
}
