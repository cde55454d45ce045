//! Chart Data Cache
//!
//! TTL- and size-bounded caches for the four chart artifact kinds:
//! instrument info, candlestick series, volume series and indicator bundles.
//!
//! # Bounds
//!
//! - Each kind is an LRU map with its own entry limit and default TTL.
//! - Series payloads are capped at `max_points`, trimming the oldest points.
//! - Expired entries are purged lazily on read, or by [`ChartDataCache::clear_expired`].
//!
//! # Locking
//!
//! Every kind has its own mutex; kinds never reference each other's data.
//!
//! # Streaming Append
//!
//! [`ChartDataCache::append`] folds a streamed candle into a cached series:
//! a point in the same time bucket as the last point replaces it, anything
//! else is appended. The entry's load time is kept, so freshness is judged
//! from the first load.

mod entry;
mod timeframe;
mod types;

use std::hash::Hash;
use std::time::Duration;

use chrono::{FixedOffset, Offset, Utc};
use parking_lot::Mutex;
use serde::Serialize;

pub use entry::CachedEntry;
pub use timeframe::Timeframe;
pub use types::{
    CandlePoint, CandleSeries, IndicatorBundle, IndicatorKey, IndicatorPoint, InstrumentInfo,
    SeriesKey, VolumePoint, VolumeSeries,
};

use super::lru::LruMap;
use types::trim_oldest;

// =============================================================================
// Artifact Kinds
// =============================================================================

/// The four cached artifact kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChartKind {
    /// Instrument description.
    InstrumentInfo,
    /// Candlestick series.
    Candlesticks,
    /// Volume series.
    Volume,
    /// Indicator bundle.
    Indicators,
}

impl ChartKind {
    /// All kinds.
    pub const ALL: [Self; 4] = [
        Self::InstrumentInfo,
        Self::Candlesticks,
        Self::Volume,
        Self::Indicators,
    ];

    /// Kinds derived from the live stream; these go stale across a gap.
    pub const STREAMED: [Self; 3] = [Self::Candlesticks, Self::Volume, Self::Indicators];
}

/// A payload type cached by [`ChartDataCache`].
///
/// Selects the kind map for [`ChartDataCache::get`] and [`ChartDataCache::put`].
pub trait ChartArtifact: Clone + Send + Sized + 'static {
    /// Cache key type.
    type Key: Hash + Eq + Clone + Send;

    /// Kind map holding this artifact.
    const KIND: ChartKind;

    /// The kind map inside `cache`.
    fn store(cache: &ChartDataCache) -> &KindStore<Self::Key, Self>;

    /// Cap list payloads at `max_points`, dropping the oldest.
    fn trim(&mut self, _max_points: usize) {}
}

impl ChartArtifact for InstrumentInfo {
    type Key = String;
    const KIND: ChartKind = ChartKind::InstrumentInfo;

    fn store(cache: &ChartDataCache) -> &KindStore<Self::Key, Self> {
        &cache.info
    }
}

impl ChartArtifact for CandleSeries {
    type Key = SeriesKey;
    const KIND: ChartKind = ChartKind::Candlesticks;

    fn store(cache: &ChartDataCache) -> &KindStore<Self::Key, Self> {
        &cache.candles
    }

    fn trim(&mut self, max_points: usize) {
        trim_oldest(&mut self.points, max_points);
    }
}

impl ChartArtifact for VolumeSeries {
    type Key = SeriesKey;
    const KIND: ChartKind = ChartKind::Volume;

    fn store(cache: &ChartDataCache) -> &KindStore<Self::Key, Self> {
        &cache.volume
    }

    fn trim(&mut self, max_points: usize) {
        trim_oldest(&mut self.points, max_points);
    }
}

impl ChartArtifact for IndicatorBundle {
    type Key = IndicatorKey;
    const KIND: ChartKind = ChartKind::Indicators;

    fn store(cache: &ChartDataCache) -> &KindStore<Self::Key, Self> {
        &cache.indicators
    }

    fn trim(&mut self, max_points: usize) {
        for line in self.lines.values_mut() {
            trim_oldest(line, max_points);
        }
    }
}

// =============================================================================
// Kind Store
// =============================================================================

/// One LRU-bounded, TTL-checked map behind its own lock.
pub struct KindStore<K, V> {
    entries: Mutex<LruMap<K, CachedEntry<V>>>,
    default_ttl: Duration,
}

impl<K, V> KindStore<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    fn new(capacity: usize, default_ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(LruMap::new(capacity)),
            default_ttl,
        }
    }

    /// Default TTL of this kind.
    #[must_use]
    pub const fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Number of entries, expired ones included until purged.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    fn get(&self, key: &K) -> Option<V> {
        let mut entries = self.entries.lock();
        if entries.peek(key)?.is_expired() {
            entries.remove(key);
            return None;
        }
        entries.get(key).map(|entry| entry.payload.clone())
    }

    fn put(&self, key: K, payload: V, ttl: Duration) {
        self.entries
            .lock()
            .insert(key, CachedEntry::new(payload, ttl));
    }

    /// Mutate a fresh entry in place, keeping its load time.
    fn modify<R>(&self, key: &K, f: impl FnOnce(&mut V) -> R) -> Option<R> {
        let mut entries = self.entries.lock();
        if entries.peek(key)?.is_expired() {
            entries.remove(key);
            return None;
        }
        entries.get_mut(key).map(|entry| f(&mut entry.payload))
    }

    fn remove_where(&self, mut matches: impl FnMut(&K) -> bool) -> usize {
        self.entries.lock().retain(|key, _| !matches(key))
    }

    fn clear_expired(&self) -> usize {
        self.entries.lock().retain(|_, entry| !entry.is_expired())
    }

    fn clear(&self) {
        self.entries.lock().clear();
    }
}

// =============================================================================
// Configuration
// =============================================================================

/// Limits and TTLs for the chart cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChartCacheConfig {
    /// Instrument info entries.
    pub info_capacity: usize,
    /// Candlestick series entries.
    pub candle_capacity: usize,
    /// Volume series entries.
    pub volume_capacity: usize,
    /// Indicator bundle entries.
    pub indicator_capacity: usize,
    /// Instrument info TTL.
    pub info_ttl: Duration,
    /// Candlestick series TTL.
    pub candle_ttl: Duration,
    /// Volume series TTL.
    pub volume_ttl: Duration,
    /// Indicator bundle TTL.
    pub indicator_ttl: Duration,
    /// Maximum points per series.
    pub max_points: usize,
    /// Market time zone, used for daily buckets.
    pub market_offset: FixedOffset,
}

impl Default for ChartCacheConfig {
    fn default() -> Self {
        Self {
            info_capacity: 100,
            candle_capacity: 50,
            volume_capacity: 50,
            indicator_capacity: 30,
            info_ttl: Duration::from_secs(5 * 60),
            candle_ttl: Duration::from_secs(15 * 60),
            volume_ttl: Duration::from_secs(15 * 60),
            indicator_ttl: Duration::from_secs(30 * 60),
            max_points: 2000,
            market_offset: seoul_offset(),
        }
    }
}

/// UTC+09:00.
#[must_use]
pub fn seoul_offset() -> FixedOffset {
    FixedOffset::east_opt(9 * 3600).unwrap_or_else(|| Utc.fix())
}

// =============================================================================
// Cache
// =============================================================================

/// Result of [`ChartDataCache::append`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    /// The last point was in the same bucket and was replaced.
    Replaced,
    /// The point opened a new bucket.
    Appended,
    /// No fresh series was cached; nothing changed.
    NotCached,
}

/// Chart artifact cache.
///
/// # Example
///
/// ```rust
/// use quote_stream_hub::domain::chart::{
///     AppendOutcome, CandlePoint, CandleSeries, ChartCacheConfig, ChartDataCache, SeriesKey, Timeframe,
/// };
///
/// let cache = ChartDataCache::new(ChartCacheConfig::default());
/// let key = SeriesKey::new("005930", Timeframe::Minutes(1));
/// let candle = |time, close| CandlePoint { time, open: close, high: close, low: close, close, volume: 1.0 };
///
/// cache.put(key.clone(), CandleSeries { points: vec![candle(0, 100.0)] });
/// assert_eq!(cache.append("005930", &Timeframe::Minutes(1), candle(30_000, 101.0)), AppendOutcome::Replaced);
/// assert_eq!(cache.get::<CandleSeries>(&key).unwrap().points.len(), 1);
/// ```
pub struct ChartDataCache {
    info: KindStore<String, InstrumentInfo>,
    candles: KindStore<SeriesKey, CandleSeries>,
    volume: KindStore<SeriesKey, VolumeSeries>,
    indicators: KindStore<IndicatorKey, IndicatorBundle>,
    max_points: usize,
    market_offset: FixedOffset,
}

impl ChartDataCache {
    /// Create an empty cache.
    #[must_use]
    pub fn new(config: ChartCacheConfig) -> Self {
        Self {
            info: KindStore::new(config.info_capacity, config.info_ttl),
            candles: KindStore::new(config.candle_capacity, config.candle_ttl),
            volume: KindStore::new(config.volume_capacity, config.volume_ttl),
            indicators: KindStore::new(config.indicator_capacity, config.indicator_ttl),
            max_points: config.max_points.max(1),
            market_offset: config.market_offset,
        }
    }

    /// Fresh cached artifact, or `None`. A stale entry is purged.
    #[must_use]
    pub fn get<A: ChartArtifact>(&self, key: &A::Key) -> Option<A> {
        A::store(self).get(key)
    }

    /// Cache an artifact with its kind's default TTL.
    pub fn put<A: ChartArtifact>(&self, key: A::Key, payload: A) {
        let ttl = A::store(self).default_ttl();
        self.put_with_ttl(key, payload, ttl);
    }

    /// Cache an artifact with an explicit TTL, trimming list payloads.
    pub fn put_with_ttl<A: ChartArtifact>(&self, key: A::Key, mut payload: A, ttl: Duration) {
        payload.trim(self.max_points);
        A::store(self).put(key, payload, ttl);
    }

    /// Fold a streamed candle into the cached candlestick series.
    ///
    /// A cached volume series for the same key gets the matching bar.
    /// Load times are preserved.
    pub fn append(&self, instrument_id: &str, timeframe: &Timeframe, point: CandlePoint) -> AppendOutcome {
        let key = SeriesKey::new(instrument_id, timeframe.clone());
        let max_points = self.max_points;
        let offset = self.market_offset;

        let outcome = self
            .candles
            .modify(&key, |series| {
                let outcome = fold_point(&mut series.points, point, |p| p.time, timeframe, offset);
                trim_oldest(&mut series.points, max_points);
                outcome
            })
            .unwrap_or(AppendOutcome::NotCached);

        let bar = VolumePoint::from(&point);
        let _ = self.volume.modify(&key, |series| {
            fold_point(&mut series.points, bar, |p| p.time, timeframe, offset);
            trim_oldest(&mut series.points, max_points);
        });

        outcome
    }

    /// Remove an instrument's entries across all kinds.
    ///
    /// With a timeframe, only that timeframe's series and indicator bundles
    /// go; instrument info is kept. Returns the number of removed entries.
    pub fn invalidate(&self, instrument_id: &str, timeframe: Option<&Timeframe>) -> usize {
        ChartKind::ALL
            .into_iter()
            .map(|kind| self.invalidate_kind(kind, instrument_id, timeframe))
            .sum()
    }

    /// Remove an instrument's entries from one kind.
    pub fn invalidate_kind(
        &self,
        kind: ChartKind,
        instrument_id: &str,
        timeframe: Option<&Timeframe>,
    ) -> usize {
        let series_matches = |key: &SeriesKey| {
            key.instrument_id == instrument_id && timeframe.is_none_or(|tf| &key.timeframe == tf)
        };

        match kind {
            ChartKind::InstrumentInfo if timeframe.is_none() => {
                self.info.remove_where(|key| key == instrument_id)
            }
            ChartKind::InstrumentInfo => 0,
            ChartKind::Candlesticks => self.candles.remove_where(series_matches),
            ChartKind::Volume => self.volume.remove_where(series_matches),
            ChartKind::Indicators => self.indicators.remove_where(|key| {
                key.instrument_id == instrument_id
                    && timeframe.is_none_or(|tf| &key.timeframe == tf)
            }),
        }
    }

    /// Drop every entry of one kind.
    pub fn clear_kind(&self, kind: ChartKind) {
        match kind {
            ChartKind::InstrumentInfo => self.info.clear(),
            ChartKind::Candlesticks => self.candles.clear(),
            ChartKind::Volume => self.volume.clear(),
            ChartKind::Indicators => self.indicators.clear(),
        }
    }

    /// Drop every stream-derived entry, keeping instrument info.
    pub fn clear_series(&self) {
        for kind in ChartKind::STREAMED {
            self.clear_kind(kind);
        }
    }

    /// Purge expired entries in every kind. Returns the number purged.
    pub fn clear_expired(&self) -> usize {
        let purged = self.info.clear_expired()
            + self.candles.clear_expired()
            + self.volume.clear_expired()
            + self.indicators.clear_expired();
        if purged > 0 {
            tracing::debug!(purged, "Purged expired chart entries");
        }
        purged
    }

    /// Drop everything.
    pub fn clear_all(&self) {
        for kind in ChartKind::ALL {
            self.clear_kind(kind);
        }
    }

    /// Entry counts per kind.
    #[must_use]
    pub fn stats(&self) -> ChartCacheStats {
        ChartCacheStats {
            instrument_info: self.info.len(),
            candlesticks: self.candles.len(),
            volume: self.volume.len(),
            indicators: self.indicators.len(),
            max_points: self.max_points,
        }
    }
}

impl std::fmt::Debug for ChartDataCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChartDataCache")
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

/// Apply the same-bucket-replace-else-append rule.
fn fold_point<T>(
    points: &mut Vec<T>,
    point: T,
    time_of: impl Fn(&T) -> i64,
    timeframe: &Timeframe,
    offset: FixedOffset,
) -> AppendOutcome {
    match points.last_mut() {
        Some(last) if timeframe.same_bucket(time_of(last), time_of(&point), offset) => {
            *last = point;
            AppendOutcome::Replaced
        }
        _ => {
            points.push(point);
            AppendOutcome::Appended
        }
    }
}

/// Entry counts of the chart cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ChartCacheStats {
    /// Instrument info entries.
    pub instrument_info: usize,
    /// Candlestick series entries.
    pub candlesticks: usize,
    /// Volume series entries.
    pub volume: usize,
    /// Indicator bundle entries.
    pub indicators: usize,
    /// Per-series point cap.
    pub max_points: usize,
}

impl ChartCacheStats {
    /// Entries across all kinds.
    #[must_use]
    pub const fn total_entries(&self) -> usize {
        self.instrument_info + self.candlesticks + self.volume + self.indicators
    }
}
