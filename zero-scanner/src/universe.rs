//! Universe cache: the ranked, capped working set of symbols every task scans.
//!
//! A snapshot is rebuilt from the provider once its entry expires. Rebuilds are
//! single-flight: callers that miss the cache while a rebuild is running wait
//! for that rebuild and share its result instead of starting their own.
//!
//! When a rebuild cannot produce a usable list the cache falls back, in order,
//! to the last dynamic snapshot (while it is within the stale window), the
//! configured static list, and the hardcoded emergency list.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::Mutex;

use zero_common::config::UniverseConfig;

use crate::calendar::saturating_add;
use crate::data::{ProviderError, ProviderGateway, RankedSymbol};

// ============================================================================
// Snapshot
// ============================================================================

/// Where a snapshot's symbols came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum UniverseSource {
    Dynamic,
    CacheStaleFallback,
    StaticFallback,
    Emergency,
}

impl fmt::Display for UniverseSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Dynamic => "dynamic",
            Self::CacheStaleFallback => "cache-stale-fallback",
            Self::StaticFallback => "static-fallback",
            Self::Emergency => "emergency",
        };
        f.write_str(s)
    }
}

/// Immutable, cheaply cloneable view of the universe.
///
/// Narrowed views share the same symbol buffer; only `len` differs.
#[derive(Debug, Clone)]
pub struct UniverseSnapshot {
    symbols: Arc<[String]>,
    /// Ranking key of each symbol, present for provider-built snapshots.
    weights: Option<Arc<[f64]>>,
    /// Sum of the ranking keys of every usable symbol the provider returned,
    /// including those cut by the hard cap.
    total_weight: f64,
    len: usize,
    computed_at: DateTime<Utc>,
    source: UniverseSource,
}

impl UniverseSnapshot {
    pub fn new(symbols: Vec<String>, computed_at: DateTime<Utc>, source: UniverseSource) -> Self {
        let len = symbols.len();
        Self {
            symbols: symbols.into(),
            weights: None,
            total_weight: 0.0,
            len,
            computed_at,
            source,
        }
    }

    fn from_ranked(ranked: RankedUniverse, computed_at: DateTime<Utc>) -> Self {
        let len = ranked.symbols.len();
        Self {
            symbols: ranked.symbols.into(),
            weights: Some(ranked.weights.into()),
            total_weight: ranked.total_weight,
            len,
            computed_at,
            source: UniverseSource::Dynamic,
        }
    }

    pub fn symbols(&self) -> &[String] {
        &self.symbols[..self.len]
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn computed_at(&self) -> DateTime<Utc> {
        self.computed_at
    }

    pub fn source(&self) -> UniverseSource {
        self.source
    }

    /// The leading part of this snapshot a single task scans: at most `cap`
    /// symbols, and with `coverage` set, only as many as it takes for the
    /// cumulative ranking key to reach that share of the provider's total.
    /// Coverage is ignored for fallback lists, which carry no ranking keys.
    pub fn narrowed(&self, cap: Option<usize>, coverage: Option<f64>) -> Self {
        let mut len = cap.map_or(self.len, |cap| cap.min(self.len));

        if let (Some(coverage), Some(weights)) = (coverage, &self.weights) {
            if self.total_weight > 0.0 {
                let mut running = 0.0;
                for (i, weight) in weights[..len].iter().enumerate() {
                    running += weight.max(0.0);
                    if running / self.total_weight >= coverage {
                        len = i + 1;
                        break;
                    }
                }
            }
        }

        Self {
            len,
            ..self.clone()
        }
    }

    fn retagged(&self, source: UniverseSource) -> Self {
        Self {
            source,
            ..self.clone()
        }
    }
}

// ============================================================================
// Ranking
// ============================================================================

/// Provider list after ranking and capping, with the keys kept for coverage
/// cuts.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RankedUniverse {
    pub symbols: Vec<String>,
    pub weights: Vec<f64>,
    pub total_weight: f64,
}

/// Sort by ranking key descending (ties by symbol ascending), drop duplicate
/// symbols keeping their best entry, and keep at most `hard_cap`.
///
/// Symbols are trimmed and uppercased; blank ones are dropped. A NaN key ranks
/// below every real key.
pub fn rank_and_cap(entries: Vec<RankedSymbol>, hard_cap: usize) -> Vec<String> {
    rank_weighted(entries, hard_cap).symbols
}

/// [`rank_and_cap`], also returning each kept symbol's key and the total key
/// of every distinct symbol (finite positive keys only).
pub fn rank_weighted(entries: Vec<RankedSymbol>, hard_cap: usize) -> RankedUniverse {
    let mut entries: Vec<(String, f64)> = entries
        .into_iter()
        .filter_map(|e| {
            let symbol = e.symbol.trim().to_uppercase();
            if symbol.is_empty() {
                return None;
            }
            let key = if e.rank_key.is_nan() {
                f64::NEG_INFINITY
            } else {
                e.rank_key
            };
            Some((symbol, key))
        })
        .collect();

    entries.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

    let mut seen = HashSet::with_capacity(entries.len());
    let mut ranked = RankedUniverse {
        symbols: Vec::with_capacity(hard_cap.min(entries.len())),
        weights: Vec::with_capacity(hard_cap.min(entries.len())),
        total_weight: 0.0,
    };
    for (symbol, key) in entries {
        if !seen.insert(symbol.clone()) {
            continue;
        }
        if key.is_finite() && key > 0.0 {
            ranked.total_weight += key;
        }
        if ranked.symbols.len() < hard_cap {
            ranked.symbols.push(symbol);
            ranked.weights.push(if key.is_finite() { key } else { 0.0 });
        }
    }
    ranked
}

/// Normalize a configured symbol list: trim, uppercase, drop blanks and
/// duplicates (first occurrence wins), cap.
fn normalize_list(symbols: &[String], hard_cap: usize) -> Vec<String> {
    let mut seen = HashSet::new();
    symbols
        .iter()
        .map(|s| s.trim().to_uppercase())
        .filter(|s| !s.is_empty() && seen.insert(s.clone()))
        .take(hard_cap)
        .collect()
}

// ============================================================================
// Configuration
// ============================================================================

/// Runtime settings of the universe cache.
#[derive(Debug, Clone)]
pub struct UniverseCacheConfig {
    pub hard_cap: usize,
    pub ttl: Duration,
    pub stale_ttl: Duration,
    pub min_size: usize,
    pub fetch_timeout: Duration,
    pub static_symbols: Vec<String>,
    pub emergency_symbols: Vec<String>,
}

impl From<&UniverseConfig> for UniverseCacheConfig {
    fn from(config: &UniverseConfig) -> Self {
        Self {
            hard_cap: config.hard_cap,
            ttl: Duration::from_secs(config.ttl_secs),
            stale_ttl: Duration::from_secs(config.stale_ttl_secs),
            min_size: config.min_size,
            fetch_timeout: Duration::from_secs(config.fetch_timeout_secs),
            static_symbols: config.static_symbols.clone(),
            emergency_symbols: config.emergency_symbols.clone(),
        }
    }
}

impl Default for UniverseCacheConfig {
    fn default() -> Self {
        Self::from(&UniverseConfig::default())
    }
}

fn chrono_duration(d: Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or_else(|_| chrono::Duration::days(3650))
}

// ============================================================================
// Cache
// ============================================================================

#[derive(Debug, Clone)]
struct CacheEntry {
    snapshot: UniverseSnapshot,
    expires_at: DateTime<Utc>,
}

/// Counters exposed on the status surface.
#[derive(Debug, Clone, Serialize)]
pub struct UniverseStats {
    pub source: Option<UniverseSource>,
    pub size: usize,
    pub computed_at: Option<DateTime<Utc>>,
    pub hard_cap: usize,
    pub cache_hits: u64,
    pub rebuilds: u64,
    pub fetch_attempts: u64,
    pub fallbacks: u64,
    pub resolution_failures: u64,
}

/// Shared universe cache.
pub struct UniverseCache {
    config: UniverseCacheConfig,
    gateway: ProviderGateway,
    entry: RwLock<Option<CacheEntry>>,
    last_dynamic: RwLock<Option<UniverseSnapshot>>,
    /// Held for the whole duration of a rebuild.
    rebuild_lock: Mutex<()>,
    /// Bumped after every finished rebuild.
    generation: AtomicU64,
    cache_hits: AtomicU64,
    rebuilds: AtomicU64,
    fetch_attempts: AtomicU64,
    fallbacks: AtomicU64,
    resolution_failures: AtomicU64,
}

impl UniverseCache {
    pub fn new(config: UniverseCacheConfig, gateway: ProviderGateway) -> Self {
        Self {
            config,
            gateway,
            entry: RwLock::new(None),
            last_dynamic: RwLock::new(None),
            rebuild_lock: Mutex::new(()),
            generation: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
            rebuilds: AtomicU64::new(0),
            fetch_attempts: AtomicU64::new(0),
            fallbacks: AtomicU64::new(0),
            resolution_failures: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &UniverseCacheConfig {
        &self.config
    }

    /// Get the universe in effect at `now`, rebuilding it if the cached entry
    /// has expired. Never fails; in the worst case the snapshot is empty and
    /// the resolution-failure counter is bumped.
    pub async fn get_universe(&self, now: DateTime<Utc>) -> UniverseSnapshot {
        if let Some(snapshot) = self.fresh(now) {
            self.cache_hits.fetch_add(1, Ordering::Relaxed);
            return snapshot;
        }

        let observed = self.generation.load(Ordering::Acquire);
        let _guard = self.rebuild_lock.lock().await;

        if let Some(snapshot) = self.fresh(now) {
            return snapshot;
        }
        // Someone else finished a rebuild while we were queued: share it.
        if self.generation.load(Ordering::Acquire) != observed {
            if let Some(snapshot) = self.current() {
                return snapshot;
            }
        }

        let snapshot = self.rebuild(now).await;
        self.generation.fetch_add(1, Ordering::Release);
        snapshot
    }

    /// The last snapshot handed out, regardless of freshness.
    pub fn current(&self) -> Option<UniverseSnapshot> {
        self.entry
            .read()
            .ok()
            .and_then(|entry| entry.as_ref().map(|e| e.snapshot.clone()))
    }

    fn fresh(&self, now: DateTime<Utc>) -> Option<UniverseSnapshot> {
        let entry = self.entry.read().ok()?;
        entry
            .as_ref()
            .filter(|e| now < e.expires_at)
            .map(|e| e.snapshot.clone())
    }

    fn store(&self, snapshot: &UniverseSnapshot, expires_at: DateTime<Utc>) {
        if let Ok(mut entry) = self.entry.write() {
            let previous = entry.as_ref().map(|e| e.snapshot.source);
            if previous != Some(snapshot.source) {
                tracing::info!(
                    from = ?previous,
                    to = %snapshot.source,
                    size = snapshot.len(),
                    "Universe source changed"
                );
            }
            *entry = Some(CacheEntry {
                snapshot: snapshot.clone(),
                expires_at,
            });
        }
    }

    async fn rebuild(&self, now: DateTime<Utc>) -> UniverseSnapshot {
        self.rebuilds.fetch_add(1, Ordering::Relaxed);

        match self.fetch_ranked().await {
            Ok(ranked) => {
                let snapshot = UniverseSnapshot::from_ranked(ranked, now);
                if let Ok(mut last) = self.last_dynamic.write() {
                    *last = Some(snapshot.clone());
                }
                self.store(&snapshot, saturating_add(now, self.config.ttl));
                tracing::debug!(size = snapshot.len(), "Universe rebuilt from provider");
                snapshot
            }
            Err(e) => {
                tracing::warn!(error = %e, "Universe rebuild failed, falling back");
                let (snapshot, expires_at) = self.fallback(now);
                self.store(&snapshot, expires_at);
                snapshot
            }
        }
    }

    async fn fetch_ranked(&self) -> Result<RankedUniverse, ProviderError> {
        let hard_cap = self.config.hard_cap;
        let min_size = self.config.min_size.max(1);
        let fetch_attempts = &self.fetch_attempts;

        self.gateway
            .call_with_timeout(self.config.fetch_timeout, |provider| async move {
                fetch_attempts.fetch_add(1, Ordering::Relaxed);
                let raw = provider.list_ranked_symbols().await?;
                let raw_len = raw.len();
                let ranked = rank_weighted(raw, hard_cap);
                if ranked.symbols.len() < min_size {
                    return Err(ProviderError::InvalidResponse(format!(
                        "undersized universe: {} usable of {} returned, need {}",
                        ranked.symbols.len(),
                        raw_len,
                        min_size
                    )));
                }
                Ok(ranked)
            })
            .await
    }

    /// Pick the best available fallback tier. The returned entry expires one
    /// TTL from now, or when a stale snapshot leaves its stale window, whichever
    /// comes first.
    fn fallback(&self, now: DateTime<Utc>) -> (UniverseSnapshot, DateTime<Utc>) {
        self.fallbacks.fetch_add(1, Ordering::Relaxed);
        let retry_at = saturating_add(now, self.config.ttl);
        let stale_ttl = chrono_duration(self.config.stale_ttl);

        let stale = self
            .last_dynamic
            .read()
            .ok()
            .and_then(|last| last.clone())
            .filter(|s| !s.is_empty() && now - s.computed_at() < stale_ttl);
        if let Some(previous) = stale {
            let snapshot = previous.retagged(UniverseSource::CacheStaleFallback);
            tracing::warn!(
                size = snapshot.len(),
                age_secs = (now - snapshot.computed_at()).num_seconds(),
                "Serving stale universe"
            );
            return (
                snapshot,
                retry_at.min(saturating_add(previous.computed_at(), self.config.stale_ttl)),
            );
        }

        let static_list = normalize_list(&self.config.static_symbols, self.config.hard_cap);
        if !static_list.is_empty() {
            tracing::warn!(size = static_list.len(), "Serving static fallback universe");
            return (
                UniverseSnapshot::new(static_list, now, UniverseSource::StaticFallback),
                retry_at,
            );
        }

        let emergency = normalize_list(&self.config.emergency_symbols, self.config.hard_cap);
        if emergency.is_empty() {
            self.resolution_failures.fetch_add(1, Ordering::Relaxed);
            tracing::error!("Universe resolution failed: every fallback tier is empty");
        } else {
            tracing::warn!(size = emergency.len(), "Serving emergency universe");
        }
        (
            UniverseSnapshot::new(emergency, now, UniverseSource::Emergency),
            retry_at,
        )
    }

    pub fn stats(&self) -> UniverseStats {
        let current = self.current();
        UniverseStats {
            source: current.as_ref().map(UniverseSnapshot::source),
            size: current.as_ref().map_or(0, UniverseSnapshot::len),
            computed_at: current.as_ref().map(UniverseSnapshot::computed_at),
            hard_cap: self.config.hard_cap,
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            rebuilds: self.rebuilds.load(Ordering::Relaxed),
            fetch_attempts: self.fetch_attempts.load(Ordering::Relaxed),
            fallbacks: self.fallbacks.load(Ordering::Relaxed),
            resolution_failures: self.resolution_failures.load(Ordering::Relaxed),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
    use crate::data::{shared_limiter, DataProvider};
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::sync::atomic::AtomicBool;

    struct ScriptedProvider {
        calls: AtomicU64,
        failing: AtomicBool,
        symbols: Vec<RankedSymbol>,
    }

    impl ScriptedProvider {
        fn new(symbols: Vec<RankedSymbol>) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicU64::new(0),
                failing: AtomicBool::new(false),
                symbols,
            })
        }
    }

    #[async_trait]
    impl DataProvider for ScriptedProvider {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn list_ranked_symbols(&self) -> Result<Vec<RankedSymbol>, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.failing.load(Ordering::SeqCst) {
                return Err(ProviderError::Network("connection reset".into()));
            }
            Ok(self.symbols.clone())
        }
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 5, 15, 0, 0).unwrap()
    }

    fn cache_with(
        provider: Arc<ScriptedProvider>,
        config: UniverseCacheConfig,
        threshold: u32,
    ) -> UniverseCache {
        let breaker = Arc::new(CircuitBreaker::new(
            CircuitBreakerConfig::with_name("universe").failure_threshold(threshold),
        ));
        let gateway = ProviderGateway::new(
            provider,
            breaker,
            shared_limiter("universe", 60_000),
            Duration::from_secs(5),
        );
        UniverseCache::new(config, gateway)
    }

    fn ranked(pairs: &[(&str, f64)]) -> Vec<RankedSymbol> {
        pairs.iter().map(|(s, k)| RankedSymbol::new(*s, *k)).collect()
    }

    #[test]
    fn test_rank_and_cap_orders_and_breaks_ties() {
        let list = ranked(&[("MSFT", 5.0), ("AAPL", 5.0), ("NVDA", 9.0), ("IWM", 1.0)]);
        assert_eq!(rank_and_cap(list, 3), vec!["NVDA", "AAPL", "MSFT"]);
    }

    #[test]
    fn test_rank_and_cap_dedups_and_normalizes() {
        let list = ranked(&[("aapl", 1.0), ("AAPL ", 7.0), ("", 100.0), ("qqq", f64::NAN)]);
        assert_eq!(rank_and_cap(list, 10), vec!["AAPL", "QQQ"]);
    }

    #[test]
    fn test_rank_and_cap_zero_cap() {
        assert!(rank_and_cap(ranked(&[("SPY", 1.0)]), 0).is_empty());
    }

    #[test]
    fn test_total_weight_includes_capped_symbols() {
        let list = ranked(&[("SPY", 50.0), ("QQQ", 30.0), ("IWM", 20.0), ("spy", 5.0)]);
        let universe = rank_weighted(list, 2);
        assert_eq!(universe.symbols, vec!["SPY", "QQQ"]);
        assert_eq!(universe.weights, vec![50.0, 30.0]);
        assert_eq!(universe.total_weight, 100.0);
    }

    #[test]
    fn test_narrowed_by_cap_and_coverage() {
        let list = ranked(&[("SPY", 50.0), ("QQQ", 30.0), ("IWM", 15.0), ("DIA", 5.0)]);
        let full = UniverseSnapshot::from_ranked(rank_weighted(list, 10), t0());

        assert_eq!(full.narrowed(Some(2), None).symbols(), &["SPY", "QQQ"]);
        // 50 + 30 reaches 80% of the total.
        assert_eq!(full.narrowed(None, Some(0.8)).symbols(), &["SPY", "QQQ"]);
        assert_eq!(full.narrowed(None, Some(0.81)).len(), 3);
        assert_eq!(full.narrowed(Some(1), Some(0.95)).symbols(), &["SPY"]);
        assert_eq!(full.narrowed(Some(99), None).len(), 4);
        assert_eq!(full.len(), 4);
    }

    #[test]
    fn test_coverage_ignored_for_fallback_lists() {
        let fallback = UniverseSnapshot::new(
            vec!["SPY".into(), "QQQ".into(), "IWM".into()],
            t0(),
            UniverseSource::StaticFallback,
        );
        assert_eq!(fallback.narrowed(None, Some(0.1)).len(), 3);
        assert_eq!(fallback.narrowed(Some(2), Some(0.1)).len(), 2);
    }

    #[tokio::test]
    async fn test_cache_hit_within_ttl() {
        let provider = ScriptedProvider::new(ranked(&[("SPY", 2.0), ("QQQ", 1.0)]));
        let cache = cache_with(provider.clone(), UniverseCacheConfig::default(), 3);

        let first = cache.get_universe(t0()).await;
        assert_eq!(first.source(), UniverseSource::Dynamic);
        assert_eq!(first.symbols(), &["SPY".to_string(), "QQQ".to_string()]);

        let again = cache
            .get_universe(t0() + chrono::Duration::seconds(179))
            .await;
        assert_eq!(again.computed_at(), first.computed_at());
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);

        cache
            .get_universe(t0() + chrono::Duration::seconds(180))
            .await;
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
        assert_eq!(cache.stats().cache_hits, 1);
    }

    #[tokio::test]
    async fn test_stale_fallback_within_window() {
        let provider = ScriptedProvider::new(ranked(&[("SPY", 2.0)]));
        let config = UniverseCacheConfig {
            static_symbols: vec!["DIA".into()],
            ..UniverseCacheConfig::default()
        };
        let cache = cache_with(provider.clone(), config, 10);
        cache.get_universe(t0()).await;

        provider.failing.store(true, Ordering::SeqCst);
        let stale = cache
            .get_universe(t0() + chrono::Duration::seconds(200))
            .await;
        assert_eq!(stale.source(), UniverseSource::CacheStaleFallback);
        assert_eq!(stale.symbols(), &["SPY".to_string()]);
        assert_eq!(stale.computed_at(), t0());

        // Beyond the stale window the static list takes over.
        let fallback = cache
            .get_universe(t0() + chrono::Duration::seconds(901))
            .await;
        assert_eq!(fallback.source(), UniverseSource::StaticFallback);
        assert_eq!(fallback.symbols(), &["DIA".to_string()]);
    }

    #[tokio::test]
    async fn test_emergency_when_no_static_list() {
        let provider = ScriptedProvider::new(vec![]);
        provider.failing.store(true, Ordering::SeqCst);
        let cache = cache_with(provider, UniverseCacheConfig::default(), 3);

        let snapshot = cache.get_universe(t0()).await;
        assert_eq!(snapshot.source(), UniverseSource::Emergency);
        assert_eq!(snapshot.len(), 6);
        assert_eq!(snapshot.symbols()[0], "SPY");
    }

    #[tokio::test]
    async fn test_undersized_result_is_a_failure() {
        let provider = ScriptedProvider::new(ranked(&[("SPY", 1.0)]));
        let config = UniverseCacheConfig {
            min_size: 5,
            static_symbols: vec!["AAPL".into(), "aapl".into(), "MSFT".into()],
            ..UniverseCacheConfig::default()
        };
        let cache = cache_with(provider, config, 3);

        let snapshot = cache.get_universe(t0()).await;
        assert_eq!(snapshot.source(), UniverseSource::StaticFallback);
        assert_eq!(snapshot.symbols(), &["AAPL".to_string(), "MSFT".to_string()]);
        assert_eq!(cache.gateway.breaker().stats().consecutive_failures, 1);
    }

    #[tokio::test]
    async fn test_open_breaker_skips_provider() {
        let provider = ScriptedProvider::new(ranked(&[("SPY", 1.0)]));
        let cache = cache_with(provider.clone(), UniverseCacheConfig::default(), 1);
        cache.gateway.breaker().report_failure();

        let snapshot = cache.get_universe(t0()).await;
        assert_eq!(snapshot.source(), UniverseSource::Emergency);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_resolution_failure_counted() {
        let provider = ScriptedProvider::new(vec![]);
        provider.failing.store(true, Ordering::SeqCst);
        let config = UniverseCacheConfig {
            emergency_symbols: vec![],
            ..UniverseCacheConfig::default()
        };
        let cache = cache_with(provider, config, 3);

        let snapshot = cache.get_universe(t0()).await;
        assert!(snapshot.is_empty());
        assert_eq!(cache.stats().resolution_failures, 1);
    }

    #[tokio::test]
    async fn test_fallback_caps_static_list() {
        let provider = ScriptedProvider::new(vec![]);
        provider.failing.store(true, Ordering::SeqCst);
        let config = UniverseCacheConfig {
            hard_cap: 2,
            static_symbols: vec!["A".into(), "B".into(), "C".into()],
            ..UniverseCacheConfig::default()
        };
        let cache = cache_with(provider, config, 3);
        assert_eq!(cache.get_universe(t0()).await.len(), 2);
    }
}
