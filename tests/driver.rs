//! End-to-end tests of the tokio driver with scripted collaborators.

mod common;

use classlens_sync::{
    sync, AttendanceId, AttendanceStatus, BackoffPolicy, ChannelConfig, ClassId, ConnectionState,
    DropReason, FetchError, SyncConfig, ViewEvent, ViewFilter,
};
use common::{payload, record, CountingTrigger, FakeSource, ScriptedTransport, Session};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

fn config() -> SyncConfig {
    SyncConfig {
        fetch_backoff: BackoffPolicy::fixed_growth(
            Duration::from_secs(1),
            Duration::from_secs(4),
            2.0,
        ),
        channel: ChannelConfig {
            backoff: BackoffPolicy::fixed_growth(
                Duration::from_millis(500),
                Duration::from_secs(2),
                2.0,
            ),
            ..Default::default()
        },
        ..Default::default()
    }
}

/// Let the driver run for a while of virtual time.
async fn advance(ms: u64) {
    tokio::time::sleep(Duration::from_millis(ms)).await;
}

#[tokio::test(start_paused = true)]
async fn test_scan_is_overlaid_then_confirmed() {
    let source = FakeSource::with_rows(vec![record(1, 9, 5, 0, AttendanceStatus::Unknown)]);
    let transport = ScriptedTransport::new(vec![Session::Hold(vec![payload(9, 5, 10, "Present")])]);

    let handle = sync::spawn(config(), transport, source.clone()).unwrap();
    let view = handle.subscribe(ViewFilter::class(ClassId(5))).unwrap();

    advance(50).await;
    assert_eq!(source.fetch_count(), 1);
    let latest = view.latest().unwrap();
    assert_eq!(latest.connection, ConnectionState::Open);
    assert_eq!(latest.recent_events.len(), 1);
    let row = latest.snapshot.as_ref().unwrap().get(AttendanceId(1)).unwrap();
    assert_eq!(row.record.status, AttendanceStatus::Present);
    assert!(row.optimistic);

    source.set_rows(vec![
        record(1, 9, 5, 0, AttendanceStatus::Unknown),
        record(2, 9, 5, 10, AttendanceStatus::Present),
    ]);
    advance(400).await;
    assert_eq!(source.fetch_count(), 2);

    let latest = view.latest().unwrap();
    let snapshot = latest.snapshot.as_ref().unwrap();
    assert_eq!(snapshot.len(), 2);
    assert!(snapshot.iter().all(|r| !r.optimistic));

    handle.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_failed_fetch_retries_and_recovers() {
    let source = FakeSource::default();
    source.fail_with(FetchError::Status(503));
    let handle = sync::spawn(config(), ScriptedTransport::default(), source.clone()).unwrap();
    let view = handle.subscribe(ViewFilter::all()).unwrap();

    advance(50).await;
    assert_eq!(source.fetch_count(), 1);
    assert!(handle.snapshot().is_none());

    // First retry after 1s, second after a further 2s.
    advance(1000).await;
    assert_eq!(source.fetch_count(), 2);

    source.set_rows(vec![record(1, 1, 5, 0, AttendanceStatus::Present)]);
    advance(2000).await;
    assert_eq!(source.fetch_count(), 3);

    let snapshot = handle.snapshot().unwrap();
    assert!(!snapshot.is_stale());
    assert_eq!(snapshot.len(), 1);
    assert_eq!(view.latest().unwrap().snapshot.as_ref().unwrap().len(), 1);

    handle.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_triggers_refetch() {
    let transport = ScriptedTransport::new(vec![
        Session::Deliver(vec![]),
        Session::Hold(vec![]),
    ]);
    let source = FakeSource::with_rows(vec![]);
    let handle = sync::spawn(config(), transport.clone(), source.clone()).unwrap();

    // Initial fetch, drop, 500ms backoff, reopen, 300ms debounce, refetch.
    advance(2000).await;
    assert_eq!(transport.connects().len(), 2);
    assert_eq!(source.fetch_count(), 2);
    assert_eq!(handle.connection_state(), ConnectionState::Open);

    handle.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_manual_refresh_is_debounced() {
    let source = FakeSource::with_rows(vec![]);
    let handle = sync::spawn(config(), ScriptedTransport::default(), source.clone()).unwrap();
    advance(50).await;
    assert_eq!(source.fetch_count(), 1);

    handle.refresh().unwrap();
    handle.refresh().unwrap();
    advance(100).await;
    assert_eq!(source.fetch_count(), 1);
    advance(300).await;
    assert_eq!(source.fetch_count(), 2);

    handle.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_close_drops_views_and_stops_channel() {
    let transport = ScriptedTransport::default();
    let handle = sync::spawn(config(), transport.clone(), FakeSource::default()).unwrap();
    let view = handle.subscribe(ViewFilter::all()).unwrap();
    advance(50).await;

    handle.close().await;

    let events: Vec<_> = view.receiver.try_iter().collect();
    assert!(matches!(
        events.last(),
        Some(ViewEvent::Dropped {
            reason: DropReason::CoordinatorClosed
        })
    ));
    advance(60_000).await;
    assert_eq!(transport.connects().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_invalid_config_fails_fast() {
    let config = SyncConfig {
        snapshot_filter: ViewFilter::classes(vec![]),
        ..config()
    };
    let result = sync::spawn(config, ScriptedTransport::default(), FakeSource::default());
    assert!(result.is_err());
}

#[tokio::test]
async fn test_report_regeneration_is_fire_and_forget() {
    let trigger = Arc::new(CountingTrigger::default());
    sync::spawn_report_regeneration(Arc::clone(&trigger))
        .await
        .unwrap();
    assert_eq!(trigger.calls.load(Ordering::SeqCst), 1);
}
