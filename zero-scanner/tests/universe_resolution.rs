//! Integration tests for universe resolution.
//!
//! Hard cap and ranking, single-flight rebuilds under concurrent misses, and
//! the fallback tiers when the provider is down.

mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;

use common::{gateway, market_morning, MockProvider};
use zero_scanner::calendar::{ManualClock, SharedClock};
use zero_scanner::universe::{UniverseCache, UniverseCacheConfig, UniverseSource};

fn cache_config(hard_cap: usize) -> UniverseCacheConfig {
    UniverseCacheConfig {
        hard_cap,
        ttl: Duration::from_secs(180),
        stale_ttl: Duration::from_secs(900),
        min_size: 1,
        fetch_timeout: Duration::from_secs(15),
        static_symbols: Vec::new(),
        emergency_symbols: vec!["SPY".into(), "QQQ".into()],
    }
}

fn clock() -> SharedClock {
    Arc::new(ManualClock::new(market_morning()))
}

#[tokio::test]
async fn test_hard_cap_keeps_top_800_of_2000() {
    let provider = Arc::new(MockProvider::new(2000));
    let cache = UniverseCache::new(cache_config(800), gateway(provider.clone(), clock()));

    let snapshot = cache.get_universe(market_morning()).await;

    assert_eq!(snapshot.source(), UniverseSource::Dynamic);
    assert_eq!(snapshot.len(), 800);
    // Ranks equal indices: the top 800 are S1999 down to S1200.
    assert_eq!(snapshot.symbols()[0], "S1999");
    assert_eq!(snapshot.symbols()[799], "S1200");
    assert!(!snapshot.symbols().iter().any(|s| s == "S1199"));
    assert_eq!(provider.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_misses_share_one_rebuild() {
    let provider = Arc::new(MockProvider::new(300).with_delay(Duration::from_secs(2)));
    let cache = Arc::new(UniverseCache::new(
        cache_config(100),
        gateway(provider.clone(), clock()),
    ));

    let now = market_morning();
    let calls = (0..64).map(|_| {
        let cache = cache.clone();
        tokio::spawn(async move { cache.get_universe(now).await })
    });
    let snapshots: Vec<_> = join_all(calls)
        .await
        .into_iter()
        .map(Result::unwrap)
        .collect();

    assert_eq!(provider.calls(), 1);
    assert!(snapshots.iter().all(|s| s.len() == 100));
    assert!(snapshots
        .iter()
        .all(|s| s.computed_at() == snapshots[0].computed_at()));
    assert_eq!(cache.stats().rebuilds, 1);
}

#[tokio::test]
async fn test_ttl_expiry_triggers_one_more_fetch() {
    let provider = Arc::new(MockProvider::new(10));
    let cache = UniverseCache::new(cache_config(5), gateway(provider.clone(), clock()));

    let t0 = market_morning();
    cache.get_universe(t0).await;
    cache.get_universe(t0 + chrono::Duration::seconds(179)).await;
    assert_eq!(provider.calls(), 1);

    cache.get_universe(t0 + chrono::Duration::seconds(180)).await;
    assert_eq!(provider.calls(), 2);
}

#[tokio::test]
async fn test_static_fallback_without_cache() {
    let provider = Arc::new(MockProvider::new(10).failing());
    let mut config = cache_config(800);
    config.static_symbols = vec!["aapl".into(), "MSFT".into(), " nvda ".into()];
    let cache = UniverseCache::new(config, gateway(provider, clock()));

    let snapshot = cache.get_universe(Utc::now()).await;

    assert_eq!(snapshot.source(), UniverseSource::StaticFallback);
    assert_eq!(snapshot.symbols(), &["AAPL", "MSFT", "NVDA"]);
}

#[tokio::test]
async fn test_stale_then_static_after_stale_window() {
    let provider = Arc::new(MockProvider::new(10));
    let mut config = cache_config(5);
    config.static_symbols = vec!["IWM".into()];
    let cache = UniverseCache::new(config, gateway(provider.clone(), clock()));

    let t0 = market_morning();
    let fresh = cache.get_universe(t0).await;
    assert_eq!(fresh.source(), UniverseSource::Dynamic);

    provider.set_failing(true);
    let stale = cache.get_universe(t0 + chrono::Duration::seconds(200)).await;
    assert_eq!(stale.source(), UniverseSource::CacheStaleFallback);
    assert_eq!(stale.symbols(), fresh.symbols());

    let expired = cache.get_universe(t0 + chrono::Duration::seconds(1000)).await;
    assert_eq!(expired.source(), UniverseSource::StaticFallback);

    provider.set_failing(false);
    let recovered = cache.get_universe(t0 + chrono::Duration::seconds(1200)).await;
    assert_eq!(recovered.source(), UniverseSource::Dynamic);
}

#[tokio::test]
async fn test_emergency_tier_is_last() {
    let provider = Arc::new(MockProvider::new(10).failing());
    let cache = UniverseCache::new(cache_config(800), gateway(provider, clock()));

    let snapshot = cache.get_universe(market_morning()).await;
    assert_eq!(snapshot.source(), UniverseSource::Emergency);
    assert_eq!(snapshot.symbols(), &["SPY", "QQQ"]);
    assert_eq!(cache.stats().resolution_failures, 0);
}
