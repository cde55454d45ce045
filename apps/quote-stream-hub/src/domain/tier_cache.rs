//! Priority Tier Cache
//!
//! Holds the latest quote per instrument in three bounded LRU tiers
//! (HOT, WARM, COLD) and publishes every ingested quote to the fan-out.
//!
//! # Locking
//!
//! One mutex guards the priority map and all three tiers. Tier moves and
//! ingest updates therefore serialize per cache, and a reader never sees an
//! instrument in two tiers or missing mid-move. Publication happens under
//! the same lock so that per-instrument publish order matches apply order;
//! publishers must not block.
//!
//! # Eviction
//!
//! Each tier evicts its own least-recently-used entry when full. Tiers never
//! borrow capacity from one another.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;

use super::lru::LruMap;
use super::quote::{InstrumentId, PriorityTier, Quote};

// =============================================================================
// Publisher Port
// =============================================================================

/// Receives each quote after it has been applied to its tier.
///
/// Implementations must return immediately; they are called with the cache
/// lock held.
pub trait TierPublisher: Send + Sync {
    /// Publish `quote`, which now lives in `tier`.
    fn publish(&self, quote: &Quote, tier: PriorityTier);
}

/// Publisher that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct DiscardPublisher;

impl TierPublisher for DiscardPublisher {
    fn publish(&self, _quote: &Quote, _tier: PriorityTier) {}
}

// =============================================================================
// Configuration
// =============================================================================

/// Per-tier entry limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TierCapacities {
    /// HOT tier capacity.
    pub hot: usize,
    /// WARM tier capacity.
    pub warm: usize,
    /// COLD tier capacity.
    pub cold: usize,
}

impl Default for TierCapacities {
    fn default() -> Self {
        Self {
            hot: 50,
            warm: 200,
            cold: 1000,
        }
    }
}

impl TierCapacities {
    const fn for_tier(self, tier: PriorityTier) -> usize {
        match tier {
            PriorityTier::Hot => self.hot,
            PriorityTier::Warm => self.warm,
            PriorityTier::Cold => self.cold,
        }
    }
}

// =============================================================================
// Cache
// =============================================================================

struct TierState {
    priorities: HashMap<InstrumentId, PriorityTier>,
    tiers: [LruMap<InstrumentId, Quote>; 3],
}

impl TierState {
    fn new(capacities: TierCapacities) -> Self {
        Self {
            priorities: HashMap::new(),
            tiers: PriorityTier::ALL.map(|tier| LruMap::new(capacities.for_tier(tier))),
        }
    }

    fn priority(&self, instrument_id: &str) -> PriorityTier {
        self.priorities
            .get(instrument_id)
            .copied()
            .unwrap_or_default()
    }

    fn tier_mut(&mut self, tier: PriorityTier) -> &mut LruMap<InstrumentId, Quote> {
        &mut self.tiers[tier.index()]
    }

    /// Take the instrument's quote out of whichever tier holds it.
    fn take(&mut self, instrument_id: &str) -> Option<Quote> {
        self.tiers
            .iter_mut()
            .find_map(|tier| tier.remove(instrument_id))
    }

    fn place(&mut self, tier: PriorityTier, quote: Quote) {
        let evicted = self
            .tier_mut(tier)
            .insert(quote.instrument_id.clone(), quote);
        if let Some((instrument_id, _)) = evicted {
            tracing::debug!(
                instrument = %instrument_id,
                tier = tier.as_str(),
                "Evicted least recently used quote"
            );
        }
    }

    fn assign(&mut self, instrument_id: &str, tier: PriorityTier) {
        if tier == PriorityTier::Cold {
            self.priorities.remove(instrument_id);
        } else {
            self.priorities.insert(instrument_id.to_string(), tier);
        }

        if let Some(quote) = self.take(instrument_id) {
            self.place(tier, quote);
        }
    }
}

/// Tiered latest-quote cache.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
///
/// use chrono::Utc;
/// use quote_stream_hub::domain::quote::{PriorityTier, Quote};
/// use quote_stream_hub::domain::tier_cache::{DiscardPublisher, PriorityTierCache, TierCapacities};
///
/// let cache = PriorityTierCache::new(TierCapacities::default(), Arc::new(DiscardPublisher));
/// cache.update(Quote::new("005930", Utc::now()));
/// assert_eq!(cache.tier_of("005930"), Some(PriorityTier::Cold));
///
/// cache.set_priority("005930", PriorityTier::Hot);
/// assert_eq!(cache.tier_of("005930"), Some(PriorityTier::Hot));
/// ```
pub struct PriorityTierCache {
    capacities: TierCapacities,
    state: Mutex<TierState>,
    publisher: Arc<dyn TierPublisher>,
}

impl PriorityTierCache {
    /// Create an empty cache.
    #[must_use]
    pub fn new(capacities: TierCapacities, publisher: Arc<dyn TierPublisher>) -> Self {
        Self {
            capacities,
            state: Mutex::new(TierState::new(capacities)),
            publisher,
        }
    }

    /// Apply a quote to the tier of its instrument's current priority.
    ///
    /// Unknown instruments are COLD. Returns the tier written to.
    pub fn update(&self, quote: Quote) -> PriorityTier {
        let mut state = self.state.lock();
        let tier = state.priority(&quote.instrument_id);

        // Exactly one tier may hold the instrument.
        let _previous = state.take(&quote.instrument_id);

        self.publisher.publish(&quote, tier);
        state.place(tier, quote);
        tier
    }

    /// Latest quote for an instrument, searching HOT, WARM, then COLD.
    #[must_use]
    pub fn get(&self, instrument_id: &str) -> Option<Quote> {
        self.get_with_tier(instrument_id).map(|(_, quote)| quote)
    }

    /// Latest quote together with the tier that served it.
    #[must_use]
    pub fn get_with_tier(&self, instrument_id: &str) -> Option<(PriorityTier, Quote)> {
        let mut state = self.state.lock();
        PriorityTier::ALL.into_iter().find_map(|tier| {
            state
                .tier_mut(tier)
                .get(instrument_id)
                .map(|quote| (tier, quote.clone()))
        })
    }

    /// Tier currently holding the instrument's quote, if cached.
    #[must_use]
    pub fn tier_of(&self, instrument_id: &str) -> Option<PriorityTier> {
        let state = self.state.lock();
        PriorityTier::ALL
            .into_iter()
            .find(|tier| state.tiers[tier.index()].contains_key(instrument_id))
    }

    /// Current priority of an instrument (COLD when never assigned).
    #[must_use]
    pub fn priority(&self, instrument_id: &str) -> PriorityTier {
        self.state.lock().priority(instrument_id)
    }

    /// Assign a priority and move any cached quote into the matching tier.
    pub fn set_priority(&self, instrument_id: &str, tier: PriorityTier) {
        self.state.lock().assign(instrument_id, tier);
    }

    /// Assign several priorities under a single lock acquisition.
    pub fn set_priorities<I, S>(&self, assignments: I)
    where
        I: IntoIterator<Item = (S, PriorityTier)>,
        S: AsRef<str>,
    {
        let mut state = self.state.lock();
        for (instrument_id, tier) in assignments {
            state.assign(instrument_id.as_ref(), tier);
        }
    }

    /// Demote an instrument to COLD.
    pub fn clear_priority(&self, instrument_id: &str) {
        self.set_priority(instrument_id, PriorityTier::Cold);
    }

    /// Drop every cached quote and priority.
    pub fn clear(&self) {
        *self.state.lock() = TierState::new(self.capacities);
    }

    /// Entry counts per tier.
    #[must_use]
    pub fn stats(&self) -> TierStats {
        let state = self.state.lock();
        let tier_stat = |tier: PriorityTier| TierStat {
            entries: state.tiers[tier.index()].len(),
            capacity: self.capacities.for_tier(tier),
        };

        TierStats {
            hot: tier_stat(PriorityTier::Hot),
            warm: tier_stat(PriorityTier::Warm),
            cold: tier_stat(PriorityTier::Cold),
            prioritized_instruments: state.priorities.len(),
        }
    }
}

impl std::fmt::Debug for PriorityTierCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PriorityTierCache")
            .field("capacities", &self.capacities)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

/// Size of one tier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TierStat {
    /// Cached quotes.
    pub entries: usize,
    /// Maximum entries.
    pub capacity: usize,
}

/// Sizes of all tiers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TierStats {
    /// HOT tier.
    pub hot: TierStat,
    /// WARM tier.
    pub warm: TierStat,
    /// COLD tier.
    pub cold: TierStat,
    /// Instruments with a non-default priority.
    pub prioritized_instruments: usize,
}

impl TierStats {
    /// Total cached quotes across tiers.
    #[must_use]
    pub const fn total_entries(&self) -> usize {
        self.hot.entries + self.warm.entries + self.cold.entries
    }
}

impl std::fmt::Display for TierStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "hot {}/{}, warm {}/{}, cold {}/{}, prioritized {}",
            self.hot.entries,
            self.hot.capacity,
            self.warm.entries,
            self.warm.capacity,
            self.cold.entries,
            self.cold.capacity,
            self.prioritized_instruments
        )
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use proptest::prelude::*;
    use rust_decimal::Decimal;

    use super::*;

    #[derive(Default)]
    struct RecordingPublisher {
        published: Mutex<Vec<(InstrumentId, PriorityTier)>>,
    }

    impl TierPublisher for RecordingPublisher {
        fn publish(&self, quote: &Quote, tier: PriorityTier) {
            self.published
                .lock()
                .push((quote.instrument_id.clone(), tier));
        }
    }

    fn quote(code: &str, price: i64) -> Quote {
        Quote {
            trade_price: Some(Decimal::from(price)),
            ..Quote::new(code, Utc::now())
        }
    }

    fn cache_with(capacities: TierCapacities) -> (PriorityTierCache, Arc<RecordingPublisher>) {
        let publisher = Arc::new(RecordingPublisher::default());
        let cache = PriorityTierCache::new(capacities, publisher.clone());
        (cache, publisher)
    }

    #[test]
    fn unknown_instrument_lands_in_cold() {
        let (cache, publisher) = cache_with(TierCapacities::default());

        let tier = cache.update(quote("005930", 75_000));

        assert_eq!(tier, PriorityTier::Cold);
        let (served_from, q) = cache.get_with_tier("005930").unwrap();
        assert_eq!(served_from, PriorityTier::Cold);
        assert_eq!(q.price(), Decimal::from(75_000));
        assert_eq!(
            publisher.published.lock().as_slice(),
            &[("005930".to_string(), PriorityTier::Cold)]
        );
    }

    #[test]
    fn get_miss_returns_none() {
        let (cache, _) = cache_with(TierCapacities::default());
        assert!(cache.get("999999").is_none());
        assert!(cache.tier_of("999999").is_none());
    }

    #[test]
    fn set_priority_moves_cached_quote() {
        let (cache, _) = cache_with(TierCapacities::default());
        cache.update(quote("005930", 75_000));

        cache.set_priority("005930", PriorityTier::Hot);

        let (tier, q) = cache.get_with_tier("005930").unwrap();
        assert_eq!(tier, PriorityTier::Hot);
        assert_eq!(q.price(), Decimal::from(75_000));
        assert_eq!(cache.stats().cold.entries, 0);
        assert_eq!(cache.stats().hot.entries, 1);
    }

    #[test]
    fn update_follows_priority() {
        let (cache, publisher) = cache_with(TierCapacities::default());
        cache.set_priority("000660", PriorityTier::Warm);

        assert_eq!(cache.update(quote("000660", 120_000)), PriorityTier::Warm);
        assert_eq!(cache.tier_of("000660"), Some(PriorityTier::Warm));
        assert_eq!(publisher.published.lock()[0].1, PriorityTier::Warm);
    }

    #[test]
    fn clear_priority_demotes_to_cold() {
        let (cache, _) = cache_with(TierCapacities::default());
        cache.set_priority("035420", PriorityTier::Hot);
        cache.update(quote("035420", 200_000));

        cache.clear_priority("035420");

        assert_eq!(cache.priority("035420"), PriorityTier::Cold);
        assert_eq!(cache.tier_of("035420"), Some(PriorityTier::Cold));
        assert_eq!(cache.stats().prioritized_instruments, 0);
    }

    #[test]
    fn batch_assignment() {
        let (cache, _) = cache_with(TierCapacities::default());
        cache.update(quote("a", 1));
        cache.update(quote("b", 2));
        cache.update(quote("c", 3));

        cache.set_priorities([
            ("a", PriorityTier::Hot),
            ("b", PriorityTier::Warm),
            ("c", PriorityTier::Cold),
        ]);

        assert_eq!(cache.tier_of("a"), Some(PriorityTier::Hot));
        assert_eq!(cache.tier_of("b"), Some(PriorityTier::Warm));
        assert_eq!(cache.tier_of("c"), Some(PriorityTier::Cold));
    }

    #[test]
    fn full_tier_evicts_only_its_own_lru_entry() {
        let (cache, _) = cache_with(TierCapacities {
            hot: 2,
            warm: 2,
            cold: 2,
        });
        cache.set_priority("w1", PriorityTier::Warm);
        cache.update(quote("w1", 1));

        cache.update(quote("c1", 1));
        cache.update(quote("c2", 2));
        cache.update(quote("c3", 3));

        assert!(cache.get("c1").is_none());
        assert!(cache.get("c2").is_some());
        assert!(cache.get("c3").is_some());
        assert!(cache.get("w1").is_some());
        assert_eq!(cache.stats().cold.entries, 2);
        assert_eq!(cache.stats().warm.entries, 1);
    }

    #[test]
    fn read_refreshes_recency_within_tier() {
        let (cache, _) = cache_with(TierCapacities {
            hot: 1,
            warm: 1,
            cold: 2,
        });
        cache.update(quote("c1", 1));
        cache.update(quote("c2", 2));

        let _ = cache.get("c1");
        cache.update(quote("c3", 3));

        assert!(cache.get("c1").is_some());
        assert!(cache.get("c2").is_none());
    }

    #[test]
    fn newer_quote_replaces_previous() {
        let (cache, _) = cache_with(TierCapacities::default());
        cache.update(quote("005930", 75_000));
        cache.update(quote("005930", 75_100));

        assert_eq!(cache.get("005930").unwrap().price(), Decimal::from(75_100));
        assert_eq!(cache.stats().total_entries(), 1);
    }

    #[test]
    fn clear_drops_everything() {
        let (cache, _) = cache_with(TierCapacities::default());
        cache.set_priority("a", PriorityTier::Hot);
        cache.update(quote("a", 1));
        cache.clear();

        assert!(cache.get("a").is_none());
        assert_eq!(cache.priority("a"), PriorityTier::Cold);
    }

    #[test]
    fn stats_display() {
        let (cache, _) = cache_with(TierCapacities::default());
        cache.update(quote("a", 1));
        assert_eq!(
            cache.stats().to_string(),
            "hot 0/50, warm 0/200, cold 1/1000, prioritized 0"
        );
    }

    #[derive(Debug, Clone)]
    enum Op {
        Update(usize),
        SetPriority(usize, PriorityTier),
        Clear(usize),
    }

    fn tier_strategy() -> impl Strategy<Value = PriorityTier> {
        prop_oneof![
            Just(PriorityTier::Hot),
            Just(PriorityTier::Warm),
            Just(PriorityTier::Cold)
        ]
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0..8usize).prop_map(Op::Update),
            (0..8usize, tier_strategy()).prop_map(|(i, t)| Op::SetPriority(i, t)),
            (0..8usize).prop_map(Op::Clear),
        ]
    }

    proptest! {
        #[test]
        fn instrument_lives_in_at_most_one_tier(ops in prop::collection::vec(op_strategy(), 1..64)) {
            let cache = PriorityTierCache::new(
                TierCapacities { hot: 2, warm: 3, cold: 4 },
                Arc::new(DiscardPublisher),
            );
            let ids: Vec<String> = (0..8).map(|i| format!("{i:06}")).collect();

            for op in ops {
                match op {
                    Op::Update(i) => { cache.update(quote(&ids[i], 1)); }
                    Op::SetPriority(i, t) => cache.set_priority(&ids[i], t),
                    Op::Clear(i) => cache.clear_priority(&ids[i]),
                }

                let state = cache.state.lock();
                for id in &ids {
                    let holders = state.tiers.iter().filter(|t| t.contains_key(id.as_str())).count();
                    prop_assert!(holders <= 1, "{id} held by {holders} tiers");
                    if holders == 1 {
                        let tier = state.priority(id);
                        prop_assert!(state.tiers[tier.index()].contains_key(id.as_str()));
                    }
                }
                prop_assert!(state.tiers[0].len() <= 2);
                prop_assert!(state.tiers[1].len() <= 3);
                prop_assert!(state.tiers[2].len() <= 4);
            }
        }
    }
}
