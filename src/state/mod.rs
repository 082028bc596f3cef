//! State management for Pixels dice.
//!
//! This module provides the core state types and managers:
//!
//! - `device` - Device configuration and link state machine
//! - `registry` - Known devices and their persisted snapshot
//! - `supervisor` - Connect, reconnect and disconnect
//! - `aggregation` - Debounced roll batching and percentile pairing
//! - `resolver` - Outstanding logical rolls awaiting physical dice
//! - `unprompted` - Rolls nobody asked for
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                              Session                                  │
//! │                                                                       │
//! │  ┌──────────────────────┐                                             │
//! │  │ ConnectionSupervisor │   status ─▶ reconnect / mark lost           │
//! │  │                      │                                             │
//! │  │  DeviceRegistry      │   roll ───┐                                 │
//! │  │  device_id → config  │           │                                 │
//! │  │  dispatch table      │           ▼                                 │
//! │  └──────────────────────┘   ┌──────────────┐  debounce  ┌───────────┐ │
//! │                             │  RollEngine  │───────────▶│   flush   │ │
//! │                             │ device → roll│            └─────┬─────┘ │
//! │                             └──────────────┘                  │       │
//! │                                                               ▼       │
//! │  ┌──────────────────────┐   head only   ┌──────────────────────────┐  │
//! │  │    ResolverQueue     │◀──────────────│ offer / pair d100 / offer│  │
//! │  └──────────────────────┘               └────────────┬─────────────┘  │
//! │                                                      │ leftovers      │
//! │                                                      ▼                │
//! │                                               unprompted roll         │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Everything runs on one logical thread. The session owns every component
//! and is driven either by direct method calls or by [`Session::run`].

pub mod aggregation;
pub mod denomination;
pub mod device;
pub mod host;
pub mod registry;
pub mod resolver;
pub mod settings;
pub mod supervisor;
pub mod unprompted;

use std::sync::Arc;

use log::debug;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

pub use aggregation::{FlushReport, PendingRoll, RollEngine, RollGroup, RollGroups, PROVIDER};
pub use denomination::Denomination;
pub use device::{DeviceConfig, DeviceSnapshot, InvalidTransition, LinkEvent, LinkState};
pub use host::{
    DisplayAdapter, FulfillmentRegistry, NoticeLevel, NullDisplay, RecordingDisplay, RollSink,
};
pub use registry::DeviceRegistry;
pub use resolver::{
    FulfillmentMethod, Resolver, ResolverError, ResolverId, ResolverQueue, RollOutcome, Term,
};
pub use settings::{MemorySettings, PixelsSettings, SettingsError, SettingsStore};
pub use supervisor::{
    ConnectionSupervisor, DeviceSummary, ReconnectPolicy, StatusOutcome, SupervisorError,
};
pub use unprompted::{DieTerm, RollRecord};

use crate::transport::{PeripheralEvent, PeripheralEventKind, PixelDriver};

/// Requests from the UI, delivered to [`Session::run`].
#[derive(Debug)]
pub enum SessionCommand {
    /// Pair a new die.
    Request,
    Reconnect(String),
    /// Disconnect an active die or forget an inactive one.
    Disconnect(String),
    OpenResolver {
        formula: String,
        terms: Vec<Term>,
        reply: oneshot::Sender<(ResolverId, oneshot::Receiver<RollOutcome>)>,
    },
    Submit {
        id: ResolverId,
        values: Vec<(String, u32)>,
    },
    Cancel(ResolverId),
    Shutdown,
}

/// Offers results to the head resolver and keeps its form in sync.
struct FrontResolver<'a> {
    queue: &'a mut ResolverQueue,
    display: &'a mut dyn DisplayAdapter,
}

impl FulfillmentRegistry for FrontResolver<'_> {
    fn register_result(&mut self, provider: &str, denomination: Denomination, value: u32) -> bool {
        if provider != PROVIDER {
            return false;
        }
        let Some(id) = self.queue.register_result(denomination, value) else {
            return false;
        };
        if let Some(resolver) = self.queue.get(id) {
            self.display.resolver_changed(resolver);
            if resolver.is_locked() {
                self.display.resolver_locked(id);
            }
        }
        true
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending::<()>().await,
    }
}

/// Combined dice state, constructed once at startup.
pub struct Session {
    supervisor: ConnectionSupervisor,
    engine: RollEngine,
    resolvers: ResolverQueue,
    settings: PixelsSettings,
    display: Box<dyn DisplayAdapter>,
    sink: Box<dyn RollSink>,
}

impl Session {
    /// Load settings and known devices from `store`.
    pub fn new(
        store: Box<dyn SettingsStore>,
        driver: Arc<dyn PixelDriver>,
        display: Box<dyn DisplayAdapter>,
        sink: Box<dyn RollSink>,
    ) -> Self {
        let settings = PixelsSettings::load(store.as_ref());
        let registry = DeviceRegistry::load(store);
        Self {
            supervisor: ConnectionSupervisor::new(registry, driver).with_settings(&settings),
            engine: RollEngine::new(settings.debounce(), settings.allow_unprompted),
            resolvers: ResolverQueue::new(settings.resolve_delay()),
            settings,
            display,
            sink,
        }
    }

    pub fn supervisor(&self) -> &ConnectionSupervisor {
        &self.supervisor
    }

    pub fn engine(&self) -> &RollEngine {
        &self.engine
    }

    pub fn resolvers(&self) -> &ResolverQueue {
        &self.resolvers
    }

    pub fn settings(&self) -> &PixelsSettings {
        &self.settings
    }

    /// Toggle unprompted rolls and persist the choice.
    pub fn set_allow_unprompted(&mut self, allow: bool) -> Result<(), SettingsError> {
        self.settings.allow_unprompted = allow;
        self.engine.set_allow_unprompted(allow);
        self.settings
            .save(self.supervisor.registry_mut().store_mut())
    }

    /// Reconnect every die known from earlier sessions.
    pub async fn startup(&mut self) -> bool {
        self.supervisor
            .try_reconnect_all(self.display.as_mut())
            .await
    }

    pub async fn request(&mut self) -> Result<String, SupervisorError> {
        self.supervisor.request(self.display.as_mut()).await
    }

    pub async fn reconnect(&mut self, device_id: &str) -> Result<(), SupervisorError> {
        self.supervisor
            .reconnect(device_id, self.display.as_mut())
            .await
    }

    pub async fn disconnect(&mut self, device_id: &str) -> Result<(), SupervisorError> {
        self.engine.discard(device_id);
        self.supervisor
            .disconnect(device_id, self.display.as_mut())
            .await
    }

    pub async fn device_summaries(&self) -> Vec<DeviceSummary> {
        self.supervisor.device_summaries().await
    }

    /// Route one peripheral event through the dispatch table.
    pub async fn handle_event(&mut self, event: PeripheralEvent) {
        match event.kind {
            PeripheralEventKind::Roll(value) => match self.supervisor.listening(&event.device_id) {
                Some(config) => {
                    self.engine.record_roll(config, value);
                }
                None => debug!(
                    "Pixels | Ignoring roll from unrouted device {}",
                    event.device_id
                ),
            },
            PeripheralEventKind::Status(status) => {
                let outcome = self
                    .supervisor
                    .handle_status(&event.device_id, &status, self.display.as_mut())
                    .await;
                if outcome != StatusOutcome::Ignored {
                    self.engine.discard(&event.device_id);
                }
            }
        }
    }

    /// Queue a logical roll for physical fulfillment.
    pub fn open_resolver(
        &mut self,
        formula: impl Into<String>,
        terms: Vec<Term>,
    ) -> (ResolverId, oneshot::Receiver<RollOutcome>) {
        let (id, outcome) = self.resolvers.open(formula, terms);
        if let Some(resolver) = self.resolvers.get(id) {
            self.display.resolver_changed(resolver);
        }
        (id, outcome)
    }

    /// Manual submission of a resolver form.
    pub fn submit_resolver(
        &mut self,
        id: ResolverId,
        values: impl IntoIterator<Item = (String, u32)>,
    ) -> Result<(), ResolverError> {
        self.resolvers.submit(id, values)?;
        self.display.resolver_closed(id);
        Ok(())
    }

    pub fn cancel_resolver(&mut self, id: ResolverId) -> Result<(), ResolverError> {
        self.resolvers.cancel(id)?;
        self.display.resolver_closed(id);
        Ok(())
    }

    /// Flush pending rolls now.
    pub fn flush(&mut self) -> FlushReport {
        let mut front = FrontResolver {
            queue: &mut self.resolvers,
            display: self.display.as_mut(),
        };
        self.engine.flush(&mut front, self.sink.as_mut())
    }

    /// Resolve completed resolvers whose delay has elapsed.
    pub fn resolve_due(&mut self) -> Vec<ResolverId> {
        let resolved = self.resolvers.resolve_due(Instant::now());
        for id in &resolved {
            self.display.resolver_closed(*id);
        }
        resolved
    }

    async fn handle_command(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::Request => {
                let _ = self.request().await;
            }
            SessionCommand::Reconnect(device_id) => {
                let _ = self.reconnect(&device_id).await;
            }
            SessionCommand::Disconnect(device_id) => {
                if let Err(e) = self.disconnect(&device_id).await {
                    debug!("Pixels | Disconnect of {} failed: {}", device_id, e);
                }
            }
            SessionCommand::OpenResolver {
                formula,
                terms,
                reply,
            } => {
                let opened = self.open_resolver(formula, terms);
                if reply.send(opened).is_err() {
                    debug!("Pixels | Resolver opened with nobody waiting");
                }
            }
            SessionCommand::Submit { id, values } => {
                if let Err(e) = self.submit_resolver(id, values) {
                    debug!("Pixels | {}", e);
                }
            }
            SessionCommand::Cancel(id) => {
                if let Err(e) = self.cancel_resolver(id) {
                    debug!("Pixels | {}", e);
                }
            }
            SessionCommand::Shutdown => {}
        }
    }

    /// Drive the session until shutdown or until either channel closes.
    ///
    /// One loop serves peripheral events, UI commands, the debounce timer
    /// and resolver completion, so no two of them ever run concurrently.
    pub async fn run(
        &mut self,
        events: &mut mpsc::UnboundedReceiver<PeripheralEvent>,
        commands: &mut mpsc::UnboundedReceiver<SessionCommand>,
    ) {
        loop {
            let flush_at = self.engine.deadline();
            let resolve_at = self.resolvers.next_deadline();
            tokio::select! {
                event = events.recv() => match event {
                    Some(event) => self.handle_event(event).await,
                    None => break,
                },
                command = commands.recv() => match command {
                    Some(SessionCommand::Shutdown) | None => break,
                    Some(command) => self.handle_command(command).await,
                },
                _ = sleep_until(flush_at) => {
                    self.flush();
                }
                _ = sleep_until(resolve_at) => {
                    self.resolve_due();
                }
            }
        }
    }
}
