//! In-process Pixels simulator.
//!
//! Simulated dice share one event channel, the same way a real driver
//! funnels every device's notifications into a single stream. Used for
//! integration testing without hardware.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};

use super::{
    Color, PeripheralEvent, PixelDriver, PixelLink, TransportError, STATUS_DISCONNECTED,
    STATUS_READY,
};

/// A simulated die.
pub struct SimPixel {
    device_id: String,
    system_id: String,
    name: String,
    die_type: String,
    battery: u8,
    rssi: i16,
    events: mpsc::UnboundedSender<PeripheralEvent>,
    connected: AtomicBool,
    /// Number of upcoming connect() calls that will fail.
    failing_connects: AtomicU32,
    connect_calls: AtomicU32,
    blinks: AtomicU32,
}

impl SimPixel {
    /// Report a roll. Dropped unless the die is connected.
    pub fn roll(&self, value: u32) -> bool {
        if !self.is_connected() {
            return false;
        }
        self.events
            .send(PeripheralEvent::roll(&self.device_id, value))
            .is_ok()
    }

    /// Drop the link as if the die went out of range.
    pub fn drop_link(&self) {
        self.connected.store(false, Ordering::SeqCst);
        let _ = self
            .events
            .send(PeripheralEvent::status(&self.device_id, STATUS_DISCONNECTED));
    }

    /// Make the next `count` connection attempts fail.
    pub fn fail_next_connects(&self, count: u32) {
        self.failing_connects.store(count, Ordering::SeqCst);
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn connect_calls(&self) -> u32 {
        self.connect_calls.load(Ordering::SeqCst)
    }

    pub fn blink_count(&self) -> u32 {
        self.blinks.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PixelLink for SimPixel {
    fn device_id(&self) -> &str {
        &self.device_id
    }

    fn system_id(&self) -> &str {
        &self.system_id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn die_type(&self) -> &str {
        &self.die_type
    }

    fn battery_level(&self) -> Option<u8> {
        Some(self.battery)
    }

    async fn connect(&self) -> Result<(), TransportError> {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);
        let failing = self.failing_connects.load(Ordering::SeqCst);
        if failing > 0 {
            self.failing_connects.store(failing - 1, Ordering::SeqCst);
            return Err(TransportError::Connection(format!(
                "{} did not respond",
                self.name
            )));
        }
        self.connected.store(true, Ordering::SeqCst);
        let _ = self
            .events
            .send(PeripheralEvent::status(&self.device_id, STATUS_READY));
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        if self.connected.swap(false, Ordering::SeqCst) {
            let _ = self
                .events
                .send(PeripheralEvent::status(&self.device_id, STATUS_DISCONNECTED));
        }
        Ok(())
    }

    async fn blink(&self, _color: Color) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::Disconnected);
        }
        self.blinks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn query_rssi(&self) -> Result<i16, TransportError> {
        if !self.is_connected() {
            return Err(TransportError::Disconnected);
        }
        Ok(self.rssi)
    }
}

/// A simulated driver holding every die in "radio range".
pub struct SimDriver {
    events: mpsc::UnboundedSender<PeripheralEvent>,
    pixels: Mutex<Vec<Arc<SimPixel>>>,
    /// Dice the user will pick on the next request_pixel() calls.
    selections: Mutex<VecDeque<Arc<SimPixel>>>,
    /// System ids that discovery cannot currently see.
    unreachable: Mutex<HashSet<String>>,
}

impl SimDriver {
    /// Create a driver and the receiving end of its event stream.
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<PeripheralEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let driver = Arc::new(Self {
            events,
            pixels: Mutex::new(Vec::new()),
            selections: Mutex::new(VecDeque::new()),
            unreachable: Mutex::new(HashSet::new()),
        });
        (driver, rx)
    }

    /// Power on a new simulated die.
    pub async fn add_pixel(&self, device_id: &str, name: &str, die_type: &str) -> Arc<SimPixel> {
        let pixel = Arc::new(SimPixel {
            device_id: device_id.to_string(),
            system_id: format!("sys-{}", device_id),
            name: name.to_string(),
            die_type: die_type.to_string(),
            battery: 87,
            rssi: -58,
            events: self.events.clone(),
            connected: AtomicBool::new(false),
            failing_connects: AtomicU32::new(0),
            connect_calls: AtomicU32::new(0),
            blinks: AtomicU32::new(0),
        });
        self.pixels.lock().await.push(Arc::clone(&pixel));
        pixel
    }

    /// Queue the die the user will choose in the next pairing prompt.
    pub async fn select_next(&self, pixel: &Arc<SimPixel>) {
        self.selections.lock().await.push_back(Arc::clone(pixel));
    }

    /// Hide or reveal a die from discovery by system id.
    pub async fn set_reachable(&self, pixel: &SimPixel, reachable: bool) {
        let mut unreachable = self.unreachable.lock().await;
        if reachable {
            unreachable.remove(&pixel.system_id);
        } else {
            unreachable.insert(pixel.system_id.clone());
        }
    }
}

#[async_trait]
impl PixelDriver for SimDriver {
    async fn request_pixel(&self) -> Result<Arc<dyn PixelLink>, TransportError> {
        match self.selections.lock().await.pop_front() {
            Some(pixel) => Ok(pixel),
            None => Err(TransportError::Cancelled),
        }
    }

    async fn get_pixel(
        &self,
        system_id: &str,
    ) -> Result<Option<Arc<dyn PixelLink>>, TransportError> {
        if self.unreachable.lock().await.contains(system_id) {
            return Ok(None);
        }
        let pixels = self.pixels.lock().await;
        Ok(pixels
            .iter()
            .find(|p| p.system_id == system_id)
            .map(|p| Arc::clone(p) as Arc<dyn PixelLink>))
    }
}
