//! Pixels State Library
//!
//! This crate provides roll aggregation and connection state for Pixels
//! electronic dice.
//!
//! # Overview
//!
//! The state module provides:
//!
//! - **Device Link State Machine** - Tracks each die's connection (disconnected,
//!   connecting, connected, reconnecting) with validated transitions.
//!
//! - **Connection Supervision** - Pairs new dice, reconnects known ones on
//!   startup and after a dropped link, and persists the set of known dice.
//!
//! - **Roll Aggregation** - Debounces results from several dice into one batch,
//!   pairs d10s into percentile results and offers them to pending rolls.
//!
//! - **Resolvers** - Logical rolls waiting on physical dice, fulfilled in the
//!   order they were opened.
//!
//! The transport module defines the radio boundary plus a simulated driver.
//!
//! # Design Principles
//!
//! 1. **One owner** - A [`Session`] owns every component; nothing is global.
//!
//! 2. **State machines validate transitions** - Invalid link changes are
//!    rejected with clear errors.
//!
//! 3. **No radio** - Bluetooth lives behind [`transport::PixelDriver`].
//!
//! 4. **Serialization-ready** - Snapshots and rolls convert to JSON for the host.
//!
//! # Example
//!
//! ```rust
//! use pixels_state::state::{
//!     aggregation::RollEngine,
//!     resolver::{ResolverQueue, RollOutcome, Term},
//!     DeviceConfig, Denomination, RollRecord,
//! };
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let mut resolvers = ResolverQueue::default();
//! let (_id, mut outcome) = resolvers.open("1d20", vec![Term::peripheral("attack", 20)]);
//!
//! let die = DeviceConfig::new("px-1", "sys-1", "Red", Denomination::D20);
//! let mut engine = RollEngine::default();
//! engine.record_roll(&die, 18);
//!
//! let mut unprompted: Vec<RollRecord> = Vec::new();
//! let report = engine.flush(&mut resolvers, &mut unprompted);
//! assert_eq!(report.registered, 1);
//! assert!(unprompted.is_empty());
//!
//! let head = resolvers.head().map(|r| r.id()).unwrap();
//! resolvers.resolve(head).unwrap();
//! assert!(matches!(outcome.try_recv(), Ok(RollOutcome::Fulfilled(_))));
//! # }
//! ```

pub mod state;
pub mod transport;

pub use state::Session;
