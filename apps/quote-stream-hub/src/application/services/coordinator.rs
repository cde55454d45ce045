//! Subscription Coordinator Service
//!
//! Translates "what is on screen" into tier priorities and upstream topic
//! subscriptions.
//!
//! # Priority Rules
//!
//! - The detail instrument is HOT.
//! - Instruments in the visible list, the portfolio or the watchlist are WARM.
//! - Any instrument this coordinator promoted earlier that is no longer
//!   visible anywhere is demoted to COLD.
//!
//! # Subscriptions
//!
//! Subscriptions are additive. An instrument that drops out of view keeps
//! its topic, since COLD quotes still feed the cache. Such topics are
//! reported by [`SubscriptionCoordinator::stale_subscriptions`] but never
//! torn down here.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::application::ports::{DirectoryError, InstrumentDirectory, TopicSubscriber};
use crate::domain::chart::Timeframe;
use crate::domain::quote::{InstrumentId, PriorityTier};
use crate::domain::tier_cache::PriorityTierCache;
use crate::domain::topic::{Topic, TopicLayout};

#[derive(Debug, Default)]
struct VisibilityState {
    detail: Option<InstrumentId>,
    detail_timeframe: Option<Timeframe>,
    list: BTreeSet<InstrumentId>,
    portfolio: BTreeSet<InstrumentId>,
    watchlist: BTreeSet<InstrumentId>,
    /// Non-COLD priorities this coordinator has assigned.
    assigned: HashMap<InstrumentId, PriorityTier>,
    /// Every topic this coordinator has subscribed.
    subscribed: BTreeSet<Topic>,
    /// Set once any visibility setter has been called.
    signalled: bool,
}

impl VisibilityState {
    fn desired(&self) -> HashMap<InstrumentId, PriorityTier> {
        let mut desired: HashMap<InstrumentId, PriorityTier> = self
            .list
            .iter()
            .chain(&self.portfolio)
            .chain(&self.watchlist)
            .map(|id| (id.clone(), PriorityTier::Warm))
            .collect();
        if let Some(detail) = &self.detail {
            desired.insert(detail.clone(), PriorityTier::Hot);
        }
        desired
    }
}

/// Outcome of one recomputation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Recomputed {
    /// Instruments now HOT.
    pub hot: Vec<InstrumentId>,
    /// Instruments now WARM.
    pub warm: Vec<InstrumentId>,
    /// Instruments demoted to COLD by this recomputation.
    pub demoted: Vec<InstrumentId>,
    /// Topics subscribed for the first time.
    pub new_topics: Vec<Topic>,
}

/// Visibility-driven priority and subscription management.
pub struct SubscriptionCoordinator {
    tiers: Arc<PriorityTierCache>,
    subscriber: Arc<dyn TopicSubscriber>,
    layout: TopicLayout,
    state: Mutex<VisibilityState>,
}

impl SubscriptionCoordinator {
    /// Create a coordinator with no visibility signals.
    #[must_use]
    pub fn new(
        tiers: Arc<PriorityTierCache>,
        subscriber: Arc<dyn TopicSubscriber>,
        layout: TopicLayout,
    ) -> Self {
        Self {
            tiers,
            subscriber,
            layout,
            state: Mutex::new(VisibilityState::default()),
        }
    }

    /// Set or clear the instrument shown in the detail view.
    pub fn set_visible_detail_instrument(&self, instrument_id: Option<&str>) -> Recomputed {
        self.apply(|state| state.detail = instrument_id.map(ToString::to_string))
    }

    /// Set or clear the chart timeframe of the detail view.
    pub fn set_detail_timeframe(&self, timeframe: Option<Timeframe>) -> Recomputed {
        self.apply(|state| state.detail_timeframe = timeframe)
    }

    /// Replace the set of instruments visible in a list.
    pub fn set_visible_list_instruments<I, S>(&self, instrument_ids: I) -> Recomputed
    where
        I: IntoIterator<Item = S>,
        S: Into<InstrumentId>,
    {
        let ids = collect_ids(instrument_ids);
        self.apply(|state| state.list = ids)
    }

    /// Replace the set of portfolio instruments.
    pub fn set_portfolio_instruments<I, S>(&self, instrument_ids: I) -> Recomputed
    where
        I: IntoIterator<Item = S>,
        S: Into<InstrumentId>,
    {
        let ids = collect_ids(instrument_ids);
        self.apply(|state| state.portfolio = ids)
    }

    /// Replace the set of watchlist instruments.
    pub fn set_watchlist_instruments<I, S>(&self, instrument_ids: I) -> Recomputed
    where
        I: IntoIterator<Item = S>,
        S: Into<InstrumentId>,
    {
        let ids = collect_ids(instrument_ids);
        self.apply(|state| state.watchlist = ids)
    }

    /// Subscribe every instrument from `directory` until the first visibility
    /// signal arrives. Returns the number of topics subscribed.
    ///
    /// # Errors
    ///
    /// Returns the directory's error; nothing is subscribed in that case.
    pub async fn seed_defaults(
        &self,
        directory: &dyn InstrumentDirectory,
    ) -> Result<usize, DirectoryError> {
        let codes = directory.instrument_codes().await?;

        let mut state = self.state.lock();
        if state.signalled {
            tracing::debug!("Visibility already reported, skipping default subscriptions");
            return Ok(0);
        }

        let mut seeded = 0;
        for code in &codes {
            let topic = self.layout.instrument(code);
            self.subscriber.subscribe(&topic);
            if state.subscribed.insert(topic) {
                seeded += 1;
            }
        }
        tracing::info!(seeded, "Seeded default instrument subscriptions");
        Ok(seeded)
    }

    /// Instruments that currently need live data, with their priority.
    #[must_use]
    pub fn needed_instruments(&self) -> Vec<(InstrumentId, PriorityTier)> {
        let mut needed: Vec<_> = self.state.lock().desired().into_iter().collect();
        needed.sort();
        needed
    }

    /// Topics still subscribed although nothing visible needs them.
    #[must_use]
    pub fn stale_subscriptions(&self) -> Vec<Topic> {
        let state = self.state.lock();
        let needed = self.needed_topics(&state);
        state
            .subscribed
            .iter()
            .filter(|topic| !needed.contains(*topic))
            .cloned()
            .collect()
    }

    /// Whether any visibility signal has been received.
    #[must_use]
    pub fn has_visibility_signal(&self) -> bool {
        self.state.lock().signalled
    }

    fn needed_topics(&self, state: &VisibilityState) -> BTreeSet<Topic> {
        let mut topics: BTreeSet<Topic> = state
            .desired()
            .keys()
            .map(|id| self.layout.instrument(id))
            .collect();
        if let (Some(detail), Some(timeframe)) = (&state.detail, &state.detail_timeframe) {
            topics.insert(self.layout.chart(detail, timeframe));
        }
        topics
    }

    /// Mutate the visibility state and recompute under one lock.
    fn apply(&self, mutate: impl FnOnce(&mut VisibilityState)) -> Recomputed {
        let mut state = self.state.lock();
        mutate(&mut state);
        state.signalled = true;

        let desired = state.desired();
        let demoted: Vec<InstrumentId> = state
            .assigned
            .keys()
            .filter(|id| !desired.contains_key(*id))
            .cloned()
            .collect();

        self.tiers.set_priorities(
            desired
                .iter()
                .map(|(id, tier)| (id.as_str(), *tier))
                .chain(demoted.iter().map(|id| (id.as_str(), PriorityTier::Cold))),
        );
        state.assigned = desired.clone();

        let mut new_topics = Vec::new();
        for topic in self.needed_topics(&state) {
            self.subscriber.subscribe(&topic);
            if state.subscribed.insert(topic.clone()) {
                new_topics.push(topic);
            }
        }

        let mut recomputed = Recomputed {
            demoted,
            new_topics,
            ..Recomputed::default()
        };
        for (id, tier) in desired {
            match tier {
                PriorityTier::Hot => recomputed.hot.push(id),
                PriorityTier::Warm => recomputed.warm.push(id),
                PriorityTier::Cold => {}
            }
        }
        recomputed.hot.sort();
        recomputed.warm.sort();
        recomputed.demoted.sort();

        tracing::debug!(
            hot = recomputed.hot.len(),
            warm = recomputed.warm.len(),
            demoted = recomputed.demoted.len(),
            new_topics = recomputed.new_topics.len(),
            "Recomputed instrument priorities"
        );
        recomputed
    }
}

impl std::fmt::Debug for SubscriptionCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("SubscriptionCoordinator")
            .field("detail", &state.detail)
            .field("assigned", &state.assigned.len())
            .field("subscribed", &state.subscribed.len())
            .finish_non_exhaustive()
    }
}

fn collect_ids<I, S>(instrument_ids: I) -> BTreeSet<InstrumentId>
where
    I: IntoIterator<Item = S>,
    S: Into<InstrumentId>,
{
    instrument_ids.into_iter().map(Into::into).collect()
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use mockall::predicate::function;
    use rust_decimal::Decimal;

    use super::*;
    use crate::application::ports::{MockTopicSubscriber, StaticInstrumentDirectory};
    use crate::domain::quote::Quote;
    use crate::domain::tier_cache::{DiscardPublisher, TierCapacities};

    #[derive(Default)]
    struct RecordingSubscriber {
        topics: Mutex<Vec<Topic>>,
    }

    impl RecordingSubscriber {
        fn distinct(&self) -> BTreeSet<String> {
            self.topics.lock().iter().map(|t| t.as_str().to_string()).collect()
        }
    }

    impl TopicSubscriber for RecordingSubscriber {
        fn subscribe(&self, topic: &Topic) {
            self.topics.lock().push(topic.clone());
        }

        fn unsubscribe(&self, _topic: &Topic) {
            panic!("coordinator must never unsubscribe");
        }

        fn is_subscribed(&self, topic: &Topic) -> bool {
            self.topics.lock().contains(topic)
        }
    }

    fn tiers() -> Arc<PriorityTierCache> {
        Arc::new(PriorityTierCache::new(
            TierCapacities::default(),
            Arc::new(DiscardPublisher),
        ))
    }

    fn coordinator() -> (SubscriptionCoordinator, Arc<PriorityTierCache>, Arc<RecordingSubscriber>) {
        let tiers = tiers();
        let subscriber = Arc::new(RecordingSubscriber::default());
        let coordinator =
            SubscriptionCoordinator::new(Arc::clone(&tiers), subscriber.clone(), TopicLayout::default());
        (coordinator, tiers, subscriber)
    }

    fn quote(code: &str) -> Quote {
        Quote {
            trade_price: Some(Decimal::from(1000)),
            ..Quote::new(code, Utc::now())
        }
    }

    #[test]
    fn detail_is_hot_and_lists_are_warm() {
        let (coordinator, tiers, _) = coordinator();
        coordinator.set_visible_list_instruments(["005930", "000660"]);
        coordinator.set_portfolio_instruments(["035420"]);
        let recomputed = coordinator.set_visible_detail_instrument(Some("005930"));

        assert_eq!(recomputed.hot, vec!["005930".to_string()]);
        assert_eq!(recomputed.warm, vec!["000660".to_string(), "035420".to_string()]);
        assert_eq!(tiers.priority("005930"), PriorityTier::Hot);
        assert_eq!(tiers.priority("000660"), PriorityTier::Warm);
        assert_eq!(tiers.priority("035420"), PriorityTier::Warm);
        assert_eq!(tiers.priority("999999"), PriorityTier::Cold);
    }

    #[test]
    fn leaving_view_demotes_and_moves_cached_quote() {
        let (coordinator, tiers, _) = coordinator();
        coordinator.set_visible_detail_instrument(Some("005930"));
        tiers.update(quote("005930"));
        assert_eq!(tiers.tier_of("005930"), Some(PriorityTier::Hot));

        let recomputed = coordinator.set_visible_detail_instrument(None);

        assert_eq!(recomputed.demoted, vec!["005930".to_string()]);
        assert_eq!(tiers.tier_of("005930"), Some(PriorityTier::Cold));
    }

    #[test]
    fn detail_instrument_also_in_list_stays_hot() {
        let (coordinator, tiers, _) = coordinator();
        coordinator.set_watchlist_instruments(["005930"]);
        coordinator.set_visible_detail_instrument(Some("005930"));
        assert_eq!(tiers.priority("005930"), PriorityTier::Hot);

        coordinator.set_visible_detail_instrument(None);
        assert_eq!(tiers.priority("005930"), PriorityTier::Warm);
    }

    #[test]
    fn subscriptions_are_additive() {
        let (coordinator, _, subscriber) = coordinator();
        coordinator.set_visible_list_instruments(["005930", "000660"]);
        coordinator.set_visible_list_instruments(["035420"]);

        assert_eq!(
            subscriber.distinct(),
            BTreeSet::from([
                "/topic/stocks/000660".to_string(),
                "/topic/stocks/005930".to_string(),
                "/topic/stocks/035420".to_string(),
            ])
        );
        let stale: Vec<_> = coordinator
            .stale_subscriptions()
            .into_iter()
            .map(|t| t.as_str().to_string())
            .collect();
        assert_eq!(stale, vec!["/topic/stocks/000660", "/topic/stocks/005930"]);
    }

    #[test]
    fn only_new_topics_are_reported() {
        let (coordinator, _, _) = coordinator();
        let first = coordinator.set_visible_list_instruments(["005930"]);
        let second = coordinator.set_portfolio_instruments(["005930"]);

        assert_eq!(first.new_topics.len(), 1);
        assert!(second.new_topics.is_empty());
    }

    #[test]
    fn chart_topic_follows_detail_and_timeframe() {
        let mut subscriber = MockTopicSubscriber::new();
        subscriber
            .expect_subscribe()
            .with(function(|t: &Topic| t.as_str() == "/topic/stocks/005930"))
            .times(2)
            .return_const(());
        subscriber
            .expect_subscribe()
            .with(function(|t: &Topic| t.as_str() == "/topic/chart/005930/5"))
            .times(1)
            .return_const(());
        subscriber.expect_unsubscribe().never();

        let coordinator =
            SubscriptionCoordinator::new(tiers(), Arc::new(subscriber), TopicLayout::default());
        coordinator.set_visible_detail_instrument(Some("005930"));
        let recomputed = coordinator.set_detail_timeframe(Some(Timeframe::Minutes(5)));

        assert_eq!(recomputed.new_topics, vec![Topic::new("/topic/chart/005930/5")]);
    }

    #[tokio::test]
    async fn seeds_defaults_before_any_signal() {
        let (coordinator, _, subscriber) = coordinator();
        let directory = StaticInstrumentDirectory::new(["005930", "000660"]);

        let seeded = coordinator.seed_defaults(&directory).await.unwrap();

        assert_eq!(seeded, 2);
        assert!(subscriber.is_subscribed(&Topic::new("/topic/stocks/000660")));
    }

    #[tokio::test]
    async fn seeding_is_skipped_after_a_signal() {
        let mut subscriber = MockTopicSubscriber::new();
        subscriber
            .expect_subscribe()
            .with(function(|t: &Topic| t.as_str() == "/topic/stocks/005930"))
            .times(1)
            .return_const(());

        let coordinator =
            SubscriptionCoordinator::new(tiers(), Arc::new(subscriber), TopicLayout::default());
        coordinator.set_visible_detail_instrument(Some("005930"));
        let directory = StaticInstrumentDirectory::new(["000660"]);

        assert_eq!(coordinator.seed_defaults(&directory).await.unwrap(), 0);
        assert!(coordinator.has_visibility_signal());
    }

    #[test]
    fn needed_instruments_are_sorted_with_tiers() {
        let (coordinator, _, _) = coordinator();
        coordinator.set_watchlist_instruments(["b", "a"]);
        coordinator.set_visible_detail_instrument(Some("c"));

        assert_eq!(
            coordinator.needed_instruments(),
            vec![
                ("a".to_string(), PriorityTier::Warm),
                ("b".to_string(), PriorityTier::Warm),
                ("c".to_string(), PriorityTier::Hot),
            ]
        );
    }
}
