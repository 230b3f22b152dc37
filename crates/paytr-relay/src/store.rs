use dashmap::DashMap;
use std::time::{Duration, Instant};

use crate::notification::{minor_to_major, Outcome};

/// Shortest and longest retention the store accepts.
pub const MIN_TTL: Duration = Duration::from_secs(5 * 60);
pub const MAX_TTL: Duration = Duration::from_secs(10 * 60);

/// Snapshot of one recorded payment outcome.
///
/// The store owns the live record; callers only ever receive copies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorrelationEntry {
    pub order_reference: String,
    pub outcome: Outcome,
    pub amount_minor_units: u64,
    pub recorded_at: Instant,
    pub forwarded: bool,
    /// Already consumed by an anonymous redirect.
    pub bound: bool,
}

impl CorrelationEntry {
    pub fn amount_major_units(&self) -> u64 {
        minor_to_major(self.amount_minor_units)
    }
}

#[derive(Debug, Clone)]
struct Slot {
    outcome: Outcome,
    amount_minor_units: u64,
    recorded_at: Instant,
    forwarded: bool,
    bound: bool,
}

impl Slot {
    fn snapshot(&self, order_reference: &str) -> CorrelationEntry {
        CorrelationEntry {
            order_reference: order_reference.to_string(),
            outcome: self.outcome,
            amount_minor_units: self.amount_minor_units,
            recorded_at: self.recorded_at,
            forwarded: self.forwarded,
            bound: self.bound,
        }
    }

    fn claimable(&self, now: Instant, window: Duration) -> bool {
        self.outcome.is_success() && !self.bound && self.age(now) < window
    }

    fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.recorded_at)
    }
}

/// Short-lived record of recent payment outcomes, keyed by order reference.
///
/// Written by the notification path and read by the redirect path. Entries
/// are visible while `now - recorded_at < ttl`; expired entries are swept
/// inline on every access, so there is no background cleanup task. Losing
/// the contents on restart is acceptable.
///
/// Every operation has an `_at` variant taking the current instant, which
/// the plain variants call with `Instant::now()`.
pub struct CorrelationStore {
    entries: DashMap<String, Slot>,
    ttl: Duration,
}

impl CorrelationStore {
    /// Create an empty store. `ttl` is clamped to [`MIN_TTL`]..=[`MAX_TTL`].
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl: ttl.clamp(MIN_TTL, MAX_TTL),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Insert or overwrite the entry for `order_reference`.
    pub fn record(&self, order_reference: &str, outcome: Outcome, amount_minor_units: u64) {
        self.record_at(order_reference, outcome, amount_minor_units, Instant::now());
    }

    pub fn record_at(
        &self,
        order_reference: &str,
        outcome: Outcome,
        amount_minor_units: u64,
        now: Instant,
    ) {
        self.sweep(now);
        if order_reference.is_empty() {
            tracing::warn!("refusing to record outcome with empty order reference");
            return;
        }
        self.entries.insert(
            order_reference.to_string(),
            Slot {
                outcome,
                amount_minor_units,
                recorded_at: now,
                forwarded: false,
                bound: false,
            },
        );
    }

    /// Exact lookup of a live entry.
    pub fn find_by_reference(&self, order_reference: &str) -> Option<CorrelationEntry> {
        self.find_by_reference_at(order_reference, Instant::now())
    }

    pub fn find_by_reference_at(
        &self,
        order_reference: &str,
        now: Instant,
    ) -> Option<CorrelationEntry> {
        self.sweep(now);
        self.entries
            .get(order_reference)
            .filter(|slot| slot.age(now) < self.ttl)
            .map(|slot| slot.snapshot(order_reference))
    }

    /// Most recently recorded unbound success younger than `within` (and the
    /// TTL). Read-only; see [`claim_recent_success`](Self::claim_recent_success).
    pub fn find_recent_success(&self, within: Duration) -> Option<CorrelationEntry> {
        self.find_recent_success_at(within, Instant::now())
    }

    pub fn find_recent_success_at(
        &self,
        within: Duration,
        now: Instant,
    ) -> Option<CorrelationEntry> {
        self.sweep(now);
        let window = within.min(self.ttl);
        self.entries
            .iter()
            .filter(|e| e.value().claimable(now, window))
            .max_by_key(|e| e.value().recorded_at)
            .map(|e| e.value().snapshot(e.key()))
    }

    /// Pick the same entry as [`find_recent_success`](Self::find_recent_success)
    /// and mark it bound, so no later anonymous redirect can pick it again.
    ///
    /// Assumes at most one payment completes per window: with overlapping
    /// checkouts the newest success goes to whichever browser asks first.
    pub fn claim_recent_success(&self, within: Duration) -> Option<CorrelationEntry> {
        self.claim_recent_success_at(within, Instant::now())
    }

    pub fn claim_recent_success_at(
        &self,
        within: Duration,
        now: Instant,
    ) -> Option<CorrelationEntry> {
        self.sweep(now);
        let window = within.min(self.ttl);
        loop {
            // the iterator's shard guards must be gone before get_mut
            let (key, recorded_at) = self
                .entries
                .iter()
                .filter(|e| e.value().claimable(now, window))
                .max_by_key(|e| e.value().recorded_at)
                .map(|e| (e.key().clone(), e.value().recorded_at))?;

            if let Some(mut slot) = self.entries.get_mut(&key) {
                if slot.recorded_at == recorded_at && slot.claimable(now, window) {
                    slot.bound = true;
                    return Some(slot.snapshot(&key));
                }
            }
            // lost a race with another claim or an overwrite; pick again
        }
    }

    /// Flag an entry as sent to the order system. Absent keys are ignored.
    pub fn mark_forwarded(&self, order_reference: &str) {
        self.mark_forwarded_at(order_reference, Instant::now());
    }

    pub fn mark_forwarded_at(&self, order_reference: &str, now: Instant) {
        self.sweep(now);
        if let Some(mut slot) = self.entries.get_mut(order_reference) {
            slot.forwarded = true;
        }
    }

    /// Flag an entry as forwarded only if it still holds `outcome`.
    ///
    /// A notification that overwrote the entry while a send was in flight
    /// leaves it unflagged, so the newer outcome still goes out.
    pub fn mark_forwarded_if(&self, order_reference: &str, outcome: Outcome) {
        self.mark_forwarded_if_at(order_reference, outcome, Instant::now());
    }

    pub fn mark_forwarded_if_at(&self, order_reference: &str, outcome: Outcome, now: Instant) {
        self.sweep(now);
        if let Some(mut slot) = self.entries.get_mut(order_reference) {
            if slot.outcome == outcome {
                slot.forwarded = true;
            }
        }
    }

    /// Drop every entry with `now - recorded_at >= ttl`. Returns number removed.
    pub fn sweep(&self, now: Instant) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, slot| slot.age(now) < self.ttl);
        before.saturating_sub(self.entries.len())
    }

    /// Number of entries currently held, including any not yet swept.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for CorrelationStore {
    fn default() -> Self {
        Self::new(MAX_TTL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    const TTL: Duration = Duration::from_secs(600);
    const EPSILON: Duration = Duration::from_millis(1);

    #[test]
    fn test_record_then_find() {
        let store = CorrelationStore::new(TTL);
        store.record("ORD1", Outcome::Success, 29900);

        let entry = store.find_by_reference("ORD1").unwrap();
        assert_eq!(entry.order_reference, "ORD1");
        assert_eq!(entry.outcome, Outcome::Success);
        assert_eq!(entry.amount_minor_units, 29900);
        assert_eq!(entry.amount_major_units(), 299);
        assert!(!entry.forwarded);
    }

    #[test]
    fn test_missing_reference_is_none() {
        let store = CorrelationStore::default();
        assert!(store.find_by_reference("nope").is_none());
        assert!(store.find_by_reference("").is_none());
    }

    #[test]
    fn test_overwrite_resets_forwarded() {
        let store = CorrelationStore::new(TTL);
        store.record("ORD1", Outcome::Failure, 100);
        store.mark_forwarded("ORD1");
        store.record("ORD1", Outcome::Success, 200);

        let entry = store.find_by_reference("ORD1").unwrap();
        assert_eq!(entry.outcome, Outcome::Success);
        assert_eq!(entry.amount_minor_units, 200);
        assert!(!entry.forwarded);
    }

    #[test]
    fn test_empty_reference_not_recorded() {
        let store = CorrelationStore::new(TTL);
        store.record("", Outcome::Success, 100);
        assert!(store.is_empty());
    }

    #[test]
    fn test_ttl_boundary() {
        let store = CorrelationStore::new(TTL);
        let t0 = Instant::now();
        store.record_at("ORD1", Outcome::Success, 29900, t0);

        assert!(store.find_by_reference_at("ORD1", t0 + TTL - EPSILON).is_some());
        assert!(store.find_by_reference_at("ORD1", t0 + TTL + EPSILON).is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn test_ttl_is_clamped() {
        assert_eq!(CorrelationStore::new(Duration::from_secs(1)).ttl(), MIN_TTL);
        assert_eq!(CorrelationStore::new(Duration::from_secs(3600)).ttl(), MAX_TTL);
    }

    #[test]
    fn test_mark_forwarded_idempotent() {
        let store = CorrelationStore::new(TTL);
        store.record("ORD1", Outcome::Success, 100);
        store.mark_forwarded("ORD1");
        store.mark_forwarded("ORD1");
        assert!(store.find_by_reference("ORD1").unwrap().forwarded);

        // unknown keys are a no-op
        store.mark_forwarded("ORD404");
        assert!(store.find_by_reference("ORD404").is_none());
    }

    #[test]
    fn test_recent_success_picks_latest() {
        let store = CorrelationStore::new(TTL);
        let t0 = Instant::now();
        store.record_at("OLD", Outcome::Success, 100, t0);
        store.record_at("NEW", Outcome::Success, 200, t0 + Duration::from_secs(10));
        store.record_at("FAIL", Outcome::Failure, 300, t0 + Duration::from_secs(20));

        let found = store
            .find_recent_success_at(Duration::from_secs(300), t0 + Duration::from_secs(30))
            .unwrap();
        assert_eq!(found.order_reference, "NEW");
    }

    #[test]
    fn test_recent_success_respects_window() {
        let store = CorrelationStore::new(TTL);
        let t0 = Instant::now();
        store.record_at("ORD1", Outcome::Success, 100, t0);

        let window = Duration::from_secs(300);
        assert!(store
            .find_recent_success_at(window, t0 + window - EPSILON)
            .is_some());
        assert!(store
            .find_recent_success_at(window, t0 + window + EPSILON)
            .is_none());
        // still retrievable by reference until the TTL runs out
        assert!(store
            .find_by_reference_at("ORD1", t0 + window + EPSILON)
            .is_some());
    }

    #[test]
    fn test_claim_consumes_success_once() {
        let store = CorrelationStore::new(TTL);
        let window = Duration::from_secs(300);
        store.record("ORD1", Outcome::Success, 29900);

        let first = store.claim_recent_success(window).unwrap();
        assert_eq!(first.order_reference, "ORD1");
        assert!(first.bound);
        assert!(store.claim_recent_success(window).is_none());
        assert!(store.find_recent_success(window).is_none());

        // still reachable by reference
        assert!(store.find_by_reference("ORD1").unwrap().bound);
    }

    #[test]
    fn test_claim_skips_bound_for_older_success() {
        let store = CorrelationStore::new(TTL);
        let t0 = Instant::now();
        let window = Duration::from_secs(300);
        store.record_at("OLD", Outcome::Success, 100, t0);
        store.record_at("NEW", Outcome::Success, 200, t0 + Duration::from_secs(5));

        let now = t0 + Duration::from_secs(10);
        assert_eq!(store.claim_recent_success_at(window, now).unwrap().order_reference, "NEW");
        assert_eq!(store.claim_recent_success_at(window, now).unwrap().order_reference, "OLD");
        assert!(store.claim_recent_success_at(window, now).is_none());
    }

    #[test]
    fn test_rerecord_clears_bound() {
        let store = CorrelationStore::new(TTL);
        store.record("ORD1", Outcome::Success, 100);
        store.claim_recent_success(Duration::from_secs(300)).unwrap();
        store.record("ORD1", Outcome::Success, 100);
        assert!(!store.find_by_reference("ORD1").unwrap().bound);
    }

    #[test]
    fn test_concurrent_claims_hand_out_each_success_once() {
        let store = Arc::new(CorrelationStore::new(TTL));
        for i in 0..50u64 {
            store.record(&format!("ORD{i}"), Outcome::Success, i);
        }

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                thread::spawn(move || {
                    let mut won = Vec::new();
                    while let Some(e) = store.claim_recent_success(Duration::from_secs(300)) {
                        won.push(e.order_reference);
                    }
                    won
                })
            })
            .collect();

        let mut all: Vec<String> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        assert_eq!(all.len(), 50);
        all.sort();
        all.dedup();
        assert_eq!(all.len(), 50);
    }

    #[test]
    fn test_mark_forwarded_if_checks_outcome() {
        let store = CorrelationStore::new(TTL);
        store.record("ORD1", Outcome::Failure, 100);
        store.mark_forwarded_if("ORD1", Outcome::Success);
        assert!(!store.find_by_reference("ORD1").unwrap().forwarded);

        store.mark_forwarded_if("ORD1", Outcome::Failure);
        assert!(store.find_by_reference("ORD1").unwrap().forwarded);
    }

    #[test]
    fn test_recent_success_ignores_failures() {
        let store = CorrelationStore::new(TTL);
        store.record("ORD1", Outcome::Failure, 100);
        assert!(store.find_recent_success(Duration::from_secs(300)).is_none());
    }

    #[test]
    fn test_sweep_counts_removed() {
        let store = CorrelationStore::new(TTL);
        let t0 = Instant::now();
        store.record_at("A", Outcome::Success, 1, t0);
        store.record_at("B", Outcome::Failure, 1, t0 + Duration::from_secs(120));

        assert_eq!(store.sweep(t0 + TTL), 1);
        assert_eq!(store.sweep(t0 + TTL), 0);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_concurrent_record_and_sweep() {
        let store = Arc::new(CorrelationStore::new(TTL));
        let sweeper = store.clone();

        let t1 = thread::spawn(move || {
            for _ in 0..100 {
                sweeper.sweep(Instant::now() + TTL);
            }
        });

        let writer = store.clone();
        let t2 = thread::spawn(move || {
            for i in 0..1000u64 {
                writer.record(&format!("ORD{i}"), Outcome::Success, i);
                writer.mark_forwarded(&format!("ORD{i}"));
            }
        });

        t1.join().unwrap();
        t2.join().unwrap();
        assert!(store.len() <= 1000);
    }
}
