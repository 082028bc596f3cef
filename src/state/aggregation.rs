//! Roll aggregation.
//!
//! Physical dice report independently. The engine keeps the latest result
//! per die until the table has been quiet for the debounce period, then
//! flushes everything at once:
//!
//! ```text
//! pending ──▶ group by denomination ──▶ offer ──▶ pair d10/d00 ──▶ offer ──▶ unprompted
//! ```
//!
//! The first offer lets resolvers that asked for d10s take them before they
//! are combined into percentile results.

use std::collections::VecDeque;
use std::time::Duration;

use log::debug;
use tokio::time::Instant;

use super::denomination::Denomination;
use super::device::DeviceConfig;
use super::host::{FulfillmentRegistry, RollSink};
use super::unprompted;

/// Provider name used when offering results to the fulfillment registry.
pub const PROVIDER: &str = "pixels";

/// Default quiet period before a flush.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(1000);

/// Latest unflushed result of one die.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRoll {
    pub device_id: String,
    pub denomination: Denomination,
    pub result: u32,
}

/// Results of one denomination, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RollGroup {
    pub denomination: Denomination,
    pub results: Vec<u32>,
}

/// Roll groups in order of each denomination's first result.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RollGroups {
    groups: Vec<RollGroup>,
}

impl RollGroups {
    /// Group pending rolls by denomination.
    pub fn from_pending(pending: impl IntoIterator<Item = PendingRoll>) -> Self {
        let mut groups = Self::default();
        for roll in pending {
            groups.push(roll.denomination, roll.result);
        }
        groups
    }

    /// Append a result, creating the group if needed.
    pub fn push(&mut self, denomination: Denomination, result: u32) {
        match self.get_mut(denomination) {
            Some(group) => group.results.push(result),
            None => self.groups.push(RollGroup {
                denomination,
                results: vec![result],
            }),
        }
    }

    pub fn get(&self, denomination: Denomination) -> Option<&RollGroup> {
        self.groups.iter().find(|g| g.denomination == denomination)
    }

    pub fn get_mut(&mut self, denomination: Denomination) -> Option<&mut RollGroup> {
        self.groups
            .iter_mut()
            .find(|g| g.denomination == denomination)
    }

    pub fn remove(&mut self, denomination: Denomination) -> Option<RollGroup> {
        let index = self
            .groups
            .iter()
            .position(|g| g.denomination == denomination)?;
        Some(self.groups.remove(index))
    }

    /// Results of a denomination, empty if there are none.
    pub fn results(&self, denomination: Denomination) -> &[u32] {
        self.get(denomination)
            .map(|g| g.results.as_slice())
            .unwrap_or(&[])
    }

    pub fn iter(&self) -> impl Iterator<Item = &RollGroup> {
        self.groups.iter()
    }

    /// True when no group holds a result.
    pub fn is_empty(&self) -> bool {
        self.groups.iter().all(|g| g.results.is_empty())
    }

    /// Total number of results over all groups.
    pub fn count(&self) -> usize {
        self.groups.iter().map(|g| g.results.len()).sum()
    }

    fn prune(&mut self) {
        self.groups.retain(|g| !g.results.is_empty());
    }
}

/// Offer every group, in order, to the fulfillment registry.
///
/// Within a group only a prefix is consumed: the first refused result stops
/// that group for this pass. Emptied groups are removed. Returns the number
/// of results consumed.
pub fn handle_rolls(groups: &mut RollGroups, registry: &mut dyn FulfillmentRegistry) -> usize {
    let mut consumed = 0;
    for group in groups.groups.iter_mut() {
        let denomination = group.denomination;
        let taken = group
            .results
            .iter()
            .take_while(|&&result| {
                let handled = registry.register_result(PROVIDER, denomination, result);
                debug!(
                    "Pixels | Registering result ({}) - {} handled: {}",
                    denomination, result, handled
                );
                handled
            })
            .count();
        group.results.drain(..taken);
        consumed += taken;
    }
    groups.prune();
    consumed
}

/// Combine a units d10 with a tens value into a percentile result.
///
/// The d10 reads 10 as 0; a 0 on both dice is 100.
pub fn percentile(units: u32, tens: u32) -> u32 {
    let units = units % 10;
    if units == 0 && tens == 0 {
        100
    } else {
        units + tens
    }
}

/// Pair d10 results into d100 results.
///
/// Each d10 takes the next d00 while any remain, otherwise the next d10
/// (which then reads as the tens die). Paired entries leave their groups,
/// leftover d00s are discarded, and the products extend a `d100` group.
pub fn pair_percentiles(groups: &mut RollGroups) {
    let mut tens: VecDeque<u32> = groups
        .remove(Denomination::D00)
        .map(|g| g.results.into())
        .unwrap_or_default();

    let Some(d10) = groups.get_mut(Denomination::D10) else {
        if !tens.is_empty() {
            debug!("Pixels | Discarding {} unpaired d00 results", tens.len());
        }
        return;
    };

    let mut units: VecDeque<u32> = std::mem::take(&mut d10.results).into();
    let mut pairs = Vec::new();
    while let Some(unit) = units.pop_front() {
        let tens_value = if let Some(t) = tens.pop_front() {
            debug!("Pixels | Pairing d10 {} with d00 {}", unit, t);
            if t >= 100 {
                debug!("Pixels | Reading d00 {} as {} on the tens die", t, t % 100);
            }
            t % 100
        } else if let Some(t) = units.pop_front() {
            debug!("Pixels | Pairing d10 {} with d10 {}", unit, t);
            (t % 10) * 10
        } else {
            debug!("Pixels | No result to pair with d10 {}", unit);
            units.push_front(unit);
            break;
        };
        pairs.push(percentile(unit, tens_value));
    }
    d10.results = units.into();

    if !tens.is_empty() {
        debug!("Pixels | Discarding {} unpaired d00 results", tens.len());
    }
    for result in pairs {
        groups.push(Denomination::D100, result);
    }
    groups.prune();
}

/// What a flush did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlushReport {
    /// Results accepted by the fulfillment registry.
    pub registered: usize,
    /// Results nobody took.
    pub leftover: RollGroups,
    /// Whether the leftovers were posted as an unprompted roll.
    pub unprompted: bool,
}

/// Debounced aggregation of physical rolls.
#[derive(Debug)]
pub struct RollEngine {
    /// Pending rolls in order of each device's first report
    pending: Vec<PendingRoll>,
    debounce: Duration,
    deadline: Option<Instant>,
    allow_unprompted: bool,
}

impl Default for RollEngine {
    fn default() -> Self {
        Self::new(DEFAULT_DEBOUNCE, true)
    }
}

impl RollEngine {
    pub fn new(debounce: Duration, allow_unprompted: bool) -> Self {
        Self {
            pending: Vec::new(),
            debounce,
            deadline: None,
            allow_unprompted,
        }
    }

    pub fn set_allow_unprompted(&mut self, allow: bool) {
        self.allow_unprompted = allow;
    }

    /// Record a result, replacing any earlier unflushed result of the same
    /// die, and restart the debounce period.
    ///
    /// Rolls from dice of unknown denomination are ignored. Returns whether
    /// the roll was recorded.
    pub fn record_roll(&mut self, config: &DeviceConfig, raw: u32) -> bool {
        let denomination = config.denomination;
        if !denomination.is_rollable() {
            debug!(
                "Pixels | [{}] [{}] Ignoring roll from unsupported die",
                config.name, config.device_id
            );
            return false;
        }
        let result = if denomination == Denomination::D10 && raw < 1 {
            10
        } else {
            raw
        };
        debug!(
            "Pixels | [{}] [{}] Pending roll ({}) - {}",
            config.name, config.device_id, denomination, result
        );

        match self
            .pending
            .iter_mut()
            .find(|p| p.device_id == config.device_id)
        {
            Some(entry) => {
                entry.denomination = denomination;
                entry.result = result;
            }
            None => self.pending.push(PendingRoll {
                device_id: config.device_id.clone(),
                denomination,
                result,
            }),
        }
        self.deadline = Some(Instant::now() + self.debounce);
        true
    }

    /// Drop a die's unflushed result.
    pub fn discard(&mut self, device_id: &str) -> Option<PendingRoll> {
        let index = self.pending.iter().position(|p| p.device_id == device_id)?;
        let roll = self.pending.remove(index);
        if self.pending.is_empty() {
            self.deadline = None;
        }
        Some(roll)
    }

    pub fn pending(&self) -> &[PendingRoll] {
        &self.pending
    }

    /// When the armed flush fires.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Flush if the quiet period has elapsed by `now`.
    pub fn flush_if_due(
        &mut self,
        now: Instant,
        registry: &mut dyn FulfillmentRegistry,
        sink: &mut dyn RollSink,
    ) -> Option<FlushReport> {
        match self.deadline {
            Some(deadline) if deadline <= now => Some(self.flush(registry, sink)),
            _ => None,
        }
    }

    /// Drain every pending roll and route the results.
    pub fn flush(
        &mut self,
        registry: &mut dyn FulfillmentRegistry,
        sink: &mut dyn RollSink,
    ) -> FlushReport {
        self.deadline = None;
        let mut groups = RollGroups::from_pending(std::mem::take(&mut self.pending));
        if groups.is_empty() {
            return FlushReport::default();
        }
        debug!("Pixels | Flushing {} pending rolls", groups.count());

        let mut registered = handle_rolls(&mut groups, registry);
        pair_percentiles(&mut groups);
        registered += handle_rolls(&mut groups, registry);

        let mut report = FlushReport {
            registered,
            leftover: groups,
            unprompted: false,
        };
        if report.leftover.is_empty() {
            return report;
        }

        if self.allow_unprompted {
            if let Some(record) = unprompted::synthesize(&report.leftover) {
                debug!("Pixels | Posting unprompted roll {}", record.formula);
                sink.submit(record);
                report.unprompted = true;
            }
        } else {
            debug!(
                "Pixels | Dropping {} unclaimed results",
                report.leftover.count()
            );
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::resolver::{ResolverQueue, Term};
    use crate::state::unprompted::RollRecord;
    use pretty_assertions::assert_eq;

    fn die(id: &str, denomination: Denomination) -> DeviceConfig {
        DeviceConfig::new(id, format!("sys-{}", id), format!("Die {}", id), denomination)
    }

    fn refuse_all(_: &str, _: Denomination, _: u32) -> bool {
        false
    }

    #[test]
    fn test_zero_on_d10_is_ten() {
        let mut engine = RollEngine::default();
        engine.record_roll(&die("a", Denomination::D10), 0);
        engine.record_roll(&die("b", Denomination::D00), 0);
        engine.record_roll(&die("c", Denomination::D20), 0);

        let results: Vec<u32> = engine.pending().iter().map(|p| p.result).collect();
        assert_eq!(results, vec![10, 0, 0]);
    }

    #[test]
    fn test_latest_result_per_device() {
        let mut engine = RollEngine::default();
        let a = die("a", Denomination::D6);
        let b = die("b", Denomination::D6);
        engine.record_roll(&a, 1);
        engine.record_roll(&b, 2);
        engine.record_roll(&a, 5);

        assert_eq!(
            engine.pending(),
            &[
                PendingRoll {
                    device_id: "a".to_string(),
                    denomination: Denomination::D6,
                    result: 5
                },
                PendingRoll {
                    device_id: "b".to_string(),
                    denomination: Denomination::D6,
                    result: 2
                },
            ]
        );
    }

    #[test]
    fn test_unknown_denomination_ignored() {
        let mut engine = RollEngine::default();
        assert!(!engine.record_roll(&die("f", Denomination::Unknown), 1));
        assert!(engine.pending().is_empty());
        assert!(engine.deadline().is_none());
    }

    #[test]
    fn test_pair_with_d00() {
        let mut groups = RollGroups::default();
        groups.push(Denomination::D10, 7);
        groups.push(Denomination::D10, 3);
        groups.push(Denomination::D00, 20);

        pair_percentiles(&mut groups);
        assert_eq!(groups.results(Denomination::D100), &[27]);
        assert_eq!(groups.results(Denomination::D10), &[3]);
        assert!(groups.get(Denomination::D00).is_none());
    }

    #[test]
    fn test_pair_two_d10_zeroes() {
        let mut engine = RollEngine::default();
        engine.record_roll(&die("a", Denomination::D10), 0);
        engine.record_roll(&die("b", Denomination::D10), 0);
        let mut groups = RollGroups::from_pending(engine.pending().to_vec());
        assert_eq!(groups.results(Denomination::D10), &[10, 10]);

        pair_percentiles(&mut groups);
        assert_eq!(groups.results(Denomination::D100), &[100]);
        assert!(groups.get(Denomination::D10).is_none());
    }

    #[test]
    fn test_pair_two_d10_second_is_tens() {
        let mut groups = RollGroups::default();
        groups.push(Denomination::D10, 7);
        groups.push(Denomination::D10, 3);
        pair_percentiles(&mut groups);
        assert_eq!(groups.results(Denomination::D100), &[37]);
    }

    #[test]
    fn test_double_zero_d00_is_hundred() {
        let mut groups = RollGroups::default();
        groups.push(Denomination::D10, 10);
        groups.push(Denomination::D00, 0);
        pair_percentiles(&mut groups);
        assert_eq!(groups.results(Denomination::D100), &[100]);

        let mut groups = RollGroups::default();
        groups.push(Denomination::D10, 10);
        groups.push(Denomination::D00, 90);
        pair_percentiles(&mut groups);
        assert_eq!(groups.results(Denomination::D100), &[90]);
    }

    #[test]
    fn test_d00_hundred_reads_as_zero_tens() {
        let mut groups = RollGroups::default();
        groups.push(Denomination::D10, 5);
        groups.push(Denomination::D00, 100);
        groups.push(Denomination::D10, 10);
        groups.push(Denomination::D00, 100);
        pair_percentiles(&mut groups);
        assert_eq!(groups.results(Denomination::D100), &[5, 100]);
    }

    #[test]
    fn test_naked_d00_discarded() {
        let mut groups = RollGroups::default();
        groups.push(Denomination::D00, 40);
        groups.push(Denomination::D20, 12);
        pair_percentiles(&mut groups);
        assert!(groups.get(Denomination::D00).is_none());
        assert_eq!(groups.results(Denomination::D20), &[12]);

        let mut groups = RollGroups::default();
        groups.push(Denomination::D10, 4);
        groups.push(Denomination::D00, 40);
        groups.push(Denomination::D00, 60);
        pair_percentiles(&mut groups);
        assert_eq!(groups.results(Denomination::D100), &[44]);
        assert!(groups.get(Denomination::D00).is_none());
    }

    #[test]
    fn test_prefix_only_consumption() {
        let mut groups = RollGroups::default();
        for r in [5, 8, 2] {
            groups.push(Denomination::D6, r);
        }

        let mut calls = Vec::new();
        let mut first_only = |_: &str, _: Denomination, value: u32| {
            calls.push(value);
            calls.len() == 1
        };
        let consumed = handle_rolls(&mut groups, &mut first_only);

        assert_eq!(consumed, 1);
        assert_eq!(groups.results(Denomination::D6), &[8, 2]);
        // The refusal of 8 stops the group; 2 is never offered
        assert_eq!(calls, vec![5, 8]);
    }

    #[test]
    fn test_flush_debounced_single_batch() {
        let mut engine = RollEngine::default();
        engine.record_roll(&die("a", Denomination::D20), 3);
        engine.record_roll(&die("a", Denomination::D20), 19);
        engine.record_roll(&die("b", Denomination::D8), 6);
        let deadline = engine.deadline().unwrap();

        let mut sink: Vec<RollRecord> = Vec::new();
        let mut registry = refuse_all;
        assert!(engine
            .flush_if_due(deadline - Duration::from_millis(1), &mut registry, &mut sink)
            .is_none());

        let report = engine.flush_if_due(deadline, &mut registry, &mut sink).unwrap();
        assert!(report.unprompted);
        assert_eq!(sink.len(), 1);
        assert_eq!(sink[0].formula, "1d20 + 1d8");
        assert_eq!(sink[0].terms[0].results, vec![19]);

        assert!(engine.pending().is_empty());
        assert!(engine.deadline().is_none());
    }

    #[test]
    fn test_d10_offered_before_pairing() {
        let mut queue = ResolverQueue::default();
        queue.open("1d10", vec![Term::peripheral("a", 10)]);

        let mut engine = RollEngine::default();
        engine.record_roll(&die("a", Denomination::D10), 4);
        engine.record_roll(&die("b", Denomination::D10), 6);

        let mut sink: Vec<RollRecord> = Vec::new();
        let report = engine.flush(&mut queue, &mut sink);

        // The first d10 fulfils the resolver; the second cannot pair alone
        assert_eq!(report.registered, 1);
        assert_eq!(queue.head().unwrap().terms()[0].value, Some(4));
        assert_eq!(sink[0].formula, "1d10");
    }

    #[test]
    fn test_d100_offered_on_second_pass() {
        let mut queue = ResolverQueue::default();
        queue.open("1d100", vec![Term::peripheral("p", 100)]);

        let mut engine = RollEngine::default();
        engine.record_roll(&die("a", Denomination::D10), 5);
        engine.record_roll(&die("b", Denomination::D00), 30);

        let mut sink: Vec<RollRecord> = Vec::new();
        let report = engine.flush(&mut queue, &mut sink);

        assert_eq!(report.registered, 1);
        assert_eq!(queue.head().unwrap().terms()[0].value, Some(35));
        assert!(report.leftover.is_empty());
        assert!(sink.is_empty());
    }

    #[test]
    fn test_unmatched_head_falls_through() {
        let mut queue = ResolverQueue::default();
        queue.open("1d4", vec![Term::peripheral("a", 4)]);

        let mut engine = RollEngine::default();
        engine.record_roll(&die("a", Denomination::D12), 9);
        let mut sink: Vec<RollRecord> = Vec::new();
        let report = engine.flush(&mut queue, &mut sink);
        assert_eq!(report.registered, 0);
        assert_eq!(sink[0].formula, "1d12");

        let mut engine = RollEngine::new(DEFAULT_DEBOUNCE, false);
        engine.record_roll(&die("a", Denomination::D12), 9);
        let mut sink: Vec<RollRecord> = Vec::new();
        let report = engine.flush(&mut queue, &mut sink);
        assert!(!report.unprompted);
        assert_eq!(report.leftover.results(Denomination::D12), &[9]);
        assert!(sink.is_empty());
    }

    #[test]
    fn test_discard() {
        let mut engine = RollEngine::default();
        engine.record_roll(&die("a", Denomination::D20), 4);
        assert!(engine.discard("a").is_some());
        assert!(engine.discard("a").is_none());
        assert!(engine.deadline().is_none());
    }
}
