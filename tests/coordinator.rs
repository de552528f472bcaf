use aqi_map::cache::store::MemoryStore;
use aqi_map::cache::{CacheSettings, DayCache};
use aqi_map::clock::{ManualClock, SECONDS_PER_DAY, TimeRange};
use aqi_map::coordinator::owner::OwnerRegistry;
use aqi_map::coordinator::{FetchKind, LoadState, LogCoordinator, LogsOutcome};
use aqi_map::telemetry::mock::{MockCall, MockSource};
use aqi_map::telemetry::{OwnerInfo, Reading};
use std::sync::Arc;
use time::UtcOffset;
use tokio::sync::Notify;

// 2024-03-05T12:00:00Z
const NOW_SECS: i64 = 1_709_640_000;
// 2024-03-01T00:00:00Z
const DAY0: i64 = 1_709_251_200;

fn day(n: i64) -> TimeRange {
    TimeRange::new(DAY0 + n * SECONDS_PER_DAY, DAY0 + (n + 1) * SECONDS_PER_DAY)
}

fn setup(source: MockSource) -> (Arc<LogCoordinator<MockSource>>, Arc<MockSource>) {
    let source = Arc::new(source);
    let cache = Arc::new(DayCache::new(
        Arc::new(MemoryStore::new()),
        Arc::new(ManualClock::at_secs(NOW_SECS)),
        CacheSettings::default(),
    ));
    let coordinator = LogCoordinator::new(Arc::clone(&source), cache, UtcOffset::UTC);
    (Arc::new(coordinator), source)
}

#[tokio::test]
async fn late_response_from_superseded_fetch_is_discarded() {
    let (coordinator, source) = setup(MockSource::new());
    let gate_a = Arc::new(Notify::new());
    let a_logs = vec![Reading::new(DAY0 + 10).with("pm25", 80.0)];
    let b_logs = vec![Reading::new(DAY0 + SECONDS_PER_DAY + 10).with("pm25", 3.0)];
    source.push_call(MockCall::logs(a_logs).gated(Arc::clone(&gate_a)));
    source.push_call(MockCall::logs(b_logs.clone()));

    let fetch_a = {
        let coordinator = Arc::clone(&coordinator);
        tokio::spawn(async move { coordinator.load("s1", FetchKind::Details, day(0)).await })
    };
    tokio::task::yield_now().await;

    let fetch_b = coordinator.load("s1", FetchKind::Details, day(1)).await;
    gate_a.notify_one();
    let fetch_a = fetch_a.await.expect("fetch A task");

    assert_eq!(fetch_a, LogsOutcome::NotLoaded);
    assert_eq!(fetch_b, LogsOutcome::Loaded(b_logs.clone()));
    assert_eq!(coordinator.last_logs("s1", FetchKind::Details), Some(b_logs));
    assert_eq!(coordinator.state("s1", FetchKind::Details), LoadState::Done);
}

#[tokio::test]
async fn sessions_of_different_sensors_do_not_interfere() {
    let (coordinator, source) = setup(
        MockSource::new()
            .with_logs("s1", vec![Reading::new(DAY0 + 1).with("pm25", 1.0)])
            .with_logs("s2", vec![Reading::new(DAY0 + 2).with("pm10", 2.0)]),
    );

    let (first, second) = tokio::join!(
        coordinator.load("s1", FetchKind::Details, day(0)),
        coordinator.load("s2", FetchKind::Details, day(0)),
    );

    assert!(matches!(first, LogsOutcome::Loaded(ref logs) if logs.len() == 1));
    assert!(matches!(second, LogsOutcome::Loaded(ref logs) if logs.len() == 1));
    assert_eq!(source.log_calls(), 2);
}

#[tokio::test]
async fn concurrent_owner_lookups_share_one_request() {
    let owner = OwnerInfo {
        owner: "0x51".to_string(),
        address: None,
    };
    let source = MockSource::new().with_owner("s1", owner.clone());
    let gate = Arc::new(Notify::new());
    source.set_owner_gate(Some(Arc::clone(&gate)));
    let source = Arc::new(source);
    let registry = Arc::new(OwnerRegistry::new());

    let spawn_lookup = || {
        let registry = Arc::clone(&registry);
        let source = Arc::clone(&source);
        tokio::spawn(async move { registry.lookup(source.as_ref(), "s1").await })
    };
    let first = spawn_lookup();
    let second = spawn_lookup();
    tokio::task::yield_now().await;
    assert_eq!(registry.pending_count(), 1);

    gate.notify_one();
    let first = first.await.expect("first lookup");
    let second = second.await.expect("second lookup");

    assert_eq!(source.owner_calls(), 1);
    assert_eq!(first, Some(owner.clone()));
    assert_eq!(second, Some(owner));
    assert_eq!(registry.pending_count(), 0);
}

#[tokio::test]
async fn settled_owner_lookup_is_not_reused() {
    let source = MockSource::new();
    source.set_fail_owner(true);
    let registry = OwnerRegistry::new();

    assert_eq!(registry.lookup(&source, "s1").await, None);
    source.set_fail_owner(false);
    assert_eq!(registry.lookup(&source, "s1").await, None);

    assert_eq!(source.owner_calls(), 2);
    assert_eq!(registry.pending_count(), 0);
}
