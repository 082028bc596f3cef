//! Resolver queue.
//!
//! A resolver is an outstanding logical roll that wants one or more of its
//! terms fulfilled by a physical die. Resolvers queue in the order they were
//! opened and only the frontmost one receives physical results.

use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;

use log::debug;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::time::Instant;

use super::aggregation::PROVIDER;
use super::denomination::Denomination;
use super::host::FulfillmentRegistry;

/// Default pause between completion and resolution.
pub const DEFAULT_RESOLVE_DELAY: Duration = Duration::from_millis(1000);

pub type ResolverId = u64;

/// How a term expects to receive its value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FulfillmentMethod {
    /// A physical wireless die.
    Peripheral,
    /// Typed in by the user.
    Manual,
    /// Rolled by the host's random number generator.
    Digital,
}

/// One die of a logical roll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Term {
    pub id: String,
    pub faces: u32,
    pub fulfillment: FulfillmentMethod,
    pub value: Option<u32>,
}

impl Term {
    pub fn new(id: impl Into<String>, faces: u32, fulfillment: FulfillmentMethod) -> Self {
        Self {
            id: id.into(),
            faces,
            fulfillment,
            value: None,
        }
    }

    pub fn peripheral(id: impl Into<String>, faces: u32) -> Self {
        Self::new(id, faces, FulfillmentMethod::Peripheral)
    }

    pub fn is_peripheral(&self) -> bool {
        self.fulfillment == FulfillmentMethod::Peripheral
    }
}

/// How a resolver ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RollOutcome {
    /// Term id to value; unset terms map to `None`.
    Fulfilled(BTreeMap<String, Option<u32>>),
    Cancelled,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolverError {
    #[error("No open resolver with id {0}")]
    UnknownResolver(ResolverId),

    #[error("Resolver {0} is complete and waiting to resolve")]
    Locked(ResolverId),
}

/// An outstanding logical roll.
#[derive(Debug)]
pub struct Resolver {
    id: ResolverId,
    /// Formula of the logical roll, for display
    pub formula: String,
    terms: Vec<Term>,
    /// When set, the resolver is complete and resolves at this instant
    resolve_at: Option<Instant>,
    reply: Option<oneshot::Sender<RollOutcome>>,
}

impl Resolver {
    pub fn id(&self) -> ResolverId {
        self.id
    }

    pub fn terms(&self) -> &[Term] {
        &self.terms
    }

    /// Every peripheral term has a value.
    pub fn is_complete(&self) -> bool {
        self.terms
            .iter()
            .filter(|t| t.is_peripheral())
            .all(|t| t.value.is_some())
    }

    /// Complete and waiting out the resolve delay; submit is disabled.
    pub fn is_locked(&self) -> bool {
        self.resolve_at.is_some()
    }

    /// Assign a physical result to the first open peripheral term with a
    /// matching face count, in declaration order.
    fn assign(&mut self, denomination: Denomination, value: u32) -> bool {
        let Some(faces) = denomination.faces() else {
            return false;
        };
        let next = self
            .terms
            .iter_mut()
            .find(|t| t.is_peripheral() && t.faces == faces && t.value.is_none());
        match next {
            Some(term) => {
                term.value = Some(value);
                true
            }
            None => false,
        }
    }

    fn values(&self) -> BTreeMap<String, Option<u32>> {
        self.terms
            .iter()
            .map(|t| (t.id.clone(), t.value))
            .collect()
    }

    fn finish(mut self, outcome: RollOutcome) {
        if let Some(reply) = self.reply.take() {
            if reply.send(outcome).is_err() {
                debug!("Pixels | Resolver {} outcome had no listener", self.id);
            }
        }
    }
}

/// FIFO of open resolvers.
#[derive(Debug)]
pub struct ResolverQueue {
    resolvers: VecDeque<Resolver>,
    next_id: ResolverId,
    resolve_delay: Duration,
}

impl Default for ResolverQueue {
    fn default() -> Self {
        Self::new(DEFAULT_RESOLVE_DELAY)
    }
}

impl ResolverQueue {
    pub fn new(resolve_delay: Duration) -> Self {
        Self {
            resolvers: VecDeque::new(),
            next_id: 1,
            resolve_delay,
        }
    }

    /// Queue a logical roll for physical fulfillment.
    ///
    /// The receiver yields the outcome once the resolver resolves, is
    /// submitted manually, or is cancelled.
    pub fn open(
        &mut self,
        formula: impl Into<String>,
        terms: Vec<Term>,
    ) -> (ResolverId, oneshot::Receiver<RollOutcome>) {
        let (reply, outcome) = oneshot::channel();
        let id = self.next_id;
        self.next_id += 1;

        let mut resolver = Resolver {
            id,
            formula: formula.into(),
            terms,
            resolve_at: None,
            reply: Some(reply),
        };
        if resolver.is_complete() {
            resolver.resolve_at = Some(Instant::now());
        }
        debug!(
            "Pixels | Opened resolver {} for {} ({} terms)",
            id,
            resolver.formula,
            resolver.terms.len()
        );
        self.resolvers.push_back(resolver);
        (id, outcome)
    }

    /// The only resolver that receives physical results.
    pub fn head(&self) -> Option<&Resolver> {
        self.resolvers.front()
    }

    pub fn get(&self, id: ResolverId) -> Option<&Resolver> {
        self.resolvers.iter().find(|r| r.id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Resolver> {
        self.resolvers.iter()
    }

    pub fn len(&self) -> usize {
        self.resolvers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resolvers.is_empty()
    }

    /// Offer a physical result to the head resolver.
    ///
    /// Returns the id of the resolver that took it. A result the head cannot
    /// use is never passed on to later resolvers.
    pub fn register_result(&mut self, denomination: Denomination, value: u32) -> Option<ResolverId> {
        let delay = self.resolve_delay;
        let head = self.resolvers.front_mut()?;
        if !head.assign(denomination, value) {
            return None;
        }
        debug!(
            "Pixels | Resolver {} took {} result {}",
            head.id, denomination, value
        );
        if head.is_complete() && head.resolve_at.is_none() {
            head.resolve_at = Some(Instant::now() + delay);
        }
        Some(head.id)
    }

    /// Manually submit values for unset terms and resolve immediately.
    ///
    /// Values for term ids the resolver does not have are ignored. A locked
    /// resolver rejects submission and resolves on its own schedule.
    pub fn submit(
        &mut self,
        id: ResolverId,
        values: impl IntoIterator<Item = (String, u32)>,
    ) -> Result<(), ResolverError> {
        let index = self.position(id)?;
        let resolver = &mut self.resolvers[index];
        if resolver.is_locked() {
            return Err(ResolverError::Locked(id));
        }
        for (term_id, value) in values {
            if let Some(term) = resolver
                .terms
                .iter_mut()
                .find(|t| t.id == term_id && t.value.is_none())
            {
                term.value = Some(value);
            }
        }
        self.resolve(id)
    }

    /// Remove a resolver and deliver its values.
    pub fn resolve(&mut self, id: ResolverId) -> Result<(), ResolverError> {
        let index = self.position(id)?;
        if let Some(resolver) = self.resolvers.remove(index) {
            let values = resolver.values();
            resolver.finish(RollOutcome::Fulfilled(values));
        }
        Ok(())
    }

    /// Remove a resolver without fulfilling it.
    pub fn cancel(&mut self, id: ResolverId) -> Result<(), ResolverError> {
        let index = self.position(id)?;
        if let Some(resolver) = self.resolvers.remove(index) {
            resolver.finish(RollOutcome::Cancelled);
        }
        Ok(())
    }

    /// Earliest pending resolution.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.resolvers.iter().filter_map(|r| r.resolve_at).min()
    }

    /// Resolve every completed resolver whose delay has elapsed.
    /// Returns the resolved ids.
    pub fn resolve_due(&mut self, now: Instant) -> Vec<ResolverId> {
        let due: Vec<ResolverId> = self
            .resolvers
            .iter()
            .filter(|r| r.resolve_at.is_some_and(|at| at <= now))
            .map(|r| r.id)
            .collect();
        for id in &due {
            let _ = self.resolve(*id);
        }
        due
    }

    fn position(&self, id: ResolverId) -> Result<usize, ResolverError> {
        self.resolvers
            .iter()
            .position(|r| r.id == id)
            .ok_or(ResolverError::UnknownResolver(id))
    }
}

impl FulfillmentRegistry for ResolverQueue {
    fn register_result(&mut self, provider: &str, denomination: Denomination, value: u32) -> bool {
        provider == PROVIDER && ResolverQueue::register_result(self, denomination, value).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn d20_and_d6() -> Vec<Term> {
        vec![
            Term::peripheral("t1", 20),
            Term::new("t2", 6, FulfillmentMethod::Manual),
            Term::peripheral("t3", 6),
        ]
    }

    #[test]
    fn test_first_fit_in_declaration_order() {
        let mut queue = ResolverQueue::default();
        let (id, _rx) = queue.open(
            "2d6",
            vec![Term::peripheral("a", 6), Term::peripheral("b", 6)],
        );

        assert_eq!(queue.register_result(Denomination::D6, 4), Some(id));
        assert_eq!(queue.register_result(Denomination::D6, 2), Some(id));
        let values: Vec<Option<u32>> = queue.head().unwrap().terms().iter().map(|t| t.value).collect();
        assert_eq!(values, vec![Some(4), Some(2)]);
    }

    #[test]
    fn test_ignores_manual_terms_and_wrong_faces() {
        let mut queue = ResolverQueue::default();
        queue.open("1d20 + 2d6", d20_and_d6());

        assert_eq!(queue.register_result(Denomination::D8, 3), None);
        assert!(queue.register_result(Denomination::D6, 5).is_some());

        let head = queue.head().unwrap();
        assert_eq!(head.terms()[1].value, None);
        assert_eq!(head.terms()[2].value, Some(5));
        assert!(!head.is_complete());
    }

    #[test]
    fn test_only_head_consumes() {
        let mut queue = ResolverQueue::default();
        queue.open("1d20", vec![Term::peripheral("a", 20)]);
        let (second, _rx) = queue.open("1d8", vec![Term::peripheral("b", 8)]);

        // The d8 resolver is not at the head, so the d8 result is refused
        assert_eq!(queue.register_result(Denomination::D8, 7), None);
        assert_eq!(queue.get(second).unwrap().terms()[0].value, None);
    }

    #[test]
    fn test_completion_schedules_resolution() {
        let mut queue = ResolverQueue::new(Duration::from_millis(1000));
        let (id, _rx) = queue.open("1d20", vec![Term::peripheral("a", 20)]);
        assert!(queue.next_deadline().is_none());

        queue.register_result(Denomination::D20, 18);
        let head = queue.head().unwrap();
        assert!(head.is_complete());
        assert!(head.is_locked());

        // Complete resolvers accept nothing more
        assert_eq!(queue.register_result(Denomination::D20, 1), None);

        let deadline = queue.next_deadline().unwrap();
        assert!(queue.resolve_due(deadline - Duration::from_millis(1)).is_empty());
        assert_eq!(queue.resolve_due(deadline), vec![id]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_outcome_delivered() {
        let mut queue = ResolverQueue::default();
        let (id, mut rx) = queue.open("1d20 + 2d6", d20_and_d6());
        queue.register_result(Denomination::D20, 11);
        queue.resolve(id).unwrap();

        let mut expected = BTreeMap::new();
        expected.insert("t1".to_string(), Some(11));
        expected.insert("t2".to_string(), None);
        expected.insert("t3".to_string(), None);
        assert_eq!(rx.try_recv().unwrap(), RollOutcome::Fulfilled(expected));
    }

    #[test]
    fn test_manual_submit_fills_unset_only() {
        let mut queue = ResolverQueue::default();
        let (id, mut rx) = queue.open("1d20 + 2d6", d20_and_d6());
        queue.register_result(Denomination::D20, 11);

        queue
            .submit(
                id,
                vec![
                    ("t1".to_string(), 3),
                    ("t2".to_string(), 4),
                    ("t3".to_string(), 6),
                    ("bogus".to_string(), 1),
                ],
            )
            .unwrap();
        assert!(queue.is_empty());

        match rx.try_recv().unwrap() {
            RollOutcome::Fulfilled(values) => {
                assert_eq!(values["t1"], Some(11));
                assert_eq!(values["t2"], Some(4));
                assert_eq!(values["t3"], Some(6));
                assert!(!values.contains_key("bogus"));
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[test]
    fn test_locked_resolver_rejects_submit() {
        let mut queue = ResolverQueue::default();
        let (id, mut rx) = queue.open(
            "1d20 + 1d6",
            vec![
                Term::peripheral("a", 20),
                Term::new("m", 6, FulfillmentMethod::Manual),
            ],
        );
        queue.register_result(Denomination::D20, 7);
        assert!(queue.get(id).unwrap().is_locked());

        assert_eq!(
            queue.submit(id, vec![("m".to_string(), 3)]),
            Err(ResolverError::Locked(id))
        );
        assert_eq!(queue.len(), 1);
        assert!(rx.try_recv().is_err());

        let deadline = queue.next_deadline().unwrap();
        assert_eq!(queue.resolve_due(deadline), vec![id]);
        let mut expected = BTreeMap::new();
        expected.insert("a".to_string(), Some(7));
        expected.insert("m".to_string(), None);
        assert_eq!(rx.try_recv().unwrap(), RollOutcome::Fulfilled(expected));
    }

    #[test]
    fn test_cancel() {
        let mut queue = ResolverQueue::default();
        let (id, mut rx) = queue.open("1d4", vec![Term::peripheral("a", 4)]);
        queue.cancel(id).unwrap();
        assert_eq!(rx.try_recv().unwrap(), RollOutcome::Cancelled);
        assert_eq!(queue.cancel(id), Err(ResolverError::UnknownResolver(id)));
    }

    #[test]
    fn test_registry_checks_provider() {
        let mut queue = ResolverQueue::default();
        queue.open("1d12", vec![Term::peripheral("a", 12)]);
        assert!(!FulfillmentRegistry::register_result(&mut queue, "other", Denomination::D12, 5));
        assert!(FulfillmentRegistry::register_result(&mut queue, PROVIDER, Denomination::D12, 5));
    }
}
