//! End-to-end tracking scenarios: raw fixes in, safety events out.
//!
//! Run with: `cargo test --test tracking_scenarios`
//! Persistence scenarios need `--features persistence`.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam::channel::{self, Receiver, Sender};
use trail_sentinel::{
    DeviationMonitor, InMemoryRepository, RawFix, SafetyEvent, SafetyEventSink, SafetyStatus,
    SessionWorker, ThresholdConfig, ThresholdPreset, TrackingConfig, TrackingSession,
    TrailGeometry, TrailPoint, NO_TRAIL_DISTANCE,
};

fn init_logs() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Straight trail on the equator from (0, 0) to (0, 0.001)
fn equator_trail() -> TrailGeometry {
    TrailGeometry::from_points(
        "test_equator",
        "test",
        "Equator",
        vec![TrailPoint::new(0.0, 0.0), TrailPoint::new(0.0, 0.001)],
    )
    .expect("valid trail")
}

fn session_with(config: TrackingConfig, trails: Vec<TrailGeometry>) -> TrackingSession {
    let repository = Arc::new(InMemoryRepository::with_trails(trails));
    let mut session = TrackingSession::new(config, repository).expect("valid config");
    session.start("scenario", None).expect("idle session");
    session
}

// ============================================================================
// Synchronous pipeline
// ============================================================================

#[test]
fn test_first_fix_on_trail() {
    init_logs();
    let mut session = session_with(TrackingConfig::default(), vec![equator_trail()]);

    let event = session.on_fix(&RawFix::new(0.0, 0.0005, 5.0, 0)).unwrap();
    assert_eq!((event.lat, event.lng), (0.0, 0.0005));
    assert!(event.distance_meters.abs() < 1e-6);
    assert_eq!(event.status, SafetyStatus::Safe);
}

#[test]
fn test_off_trail_is_danger_under_both_presets() {
    init_logs();
    for preset in [ThresholdPreset::Standard, ThresholdPreset::Strict] {
        let mut session = session_with(TrackingConfig::with_preset(preset), vec![equator_trail()]);

        let event = session.on_fix(&RawFix::new(0.002, 0.0005, 5.0, 0)).unwrap();
        assert!(
            (event.distance_meters - 222.4).abs() < 0.5,
            "{:?}: got {}",
            preset,
            event.distance_meters
        );
        assert_eq!(event.status, SafetyStatus::Danger);

        // A second reading keeps DANGER while the first is still buffered
        let next = session.on_fix(&RawFix::new(0.002, 0.0005, 5.0, 1_000)).unwrap();
        assert_eq!(next.status, SafetyStatus::Danger);
    }
}

#[test]
fn test_no_trail_data_fails_closed() {
    init_logs();
    let mut session = session_with(TrackingConfig::default(), Vec::new());
    for (i, (lat, lng)) in [(0.0, 0.0), (-8.1, 112.9), (46.5, 7.9)].into_iter().enumerate() {
        let event = session.on_fix(&RawFix::new(lat, lng, 5.0, i as i64 * 1_000)).unwrap();
        assert_eq!(event.status, SafetyStatus::Danger);
        assert_eq!(event.distance_meters, NO_TRAIL_DISTANCE);
    }
}

#[test]
fn test_monitor_requires_full_safe_window() {
    let mut monitor = DeviationMonitor::new(ThresholdConfig::default(), 3);
    let statuses: Vec<SafetyStatus> = [200.0, 10.0, 10.0, 10.0]
        .iter()
        .map(|d| monitor.add_reading(*d).unwrap())
        .collect();
    assert_eq!(
        statuses,
        vec![
            SafetyStatus::Danger,
            SafetyStatus::Danger,
            SafetyStatus::Danger,
            SafetyStatus::Safe
        ]
    );
}

#[test]
fn test_event_json_shape() {
    let mut session = session_with(TrackingConfig::default(), vec![equator_trail()]);
    let event = session.on_fix(&RawFix::new(0.0, 0.0005, 5.0, 42)).unwrap();

    let json: serde_json::Value = serde_json::from_str(&event.to_json()).unwrap();
    assert_eq!(json["sessionId"], "scenario");
    assert_eq!(json["status"], "SAFE");
    assert_eq!(json["etaSeconds"], -1);
    assert_eq!(json["timestampMs"], 42);
}

// ============================================================================
// Background worker
// ============================================================================

/// Sink that blocks inside `on_event` until the test releases it.
struct GatedSink {
    entered: Sender<()>,
    release: Receiver<()>,
    events: Sender<SafetyEvent>,
}

impl SafetyEventSink for GatedSink {
    fn on_event(&self, event: &SafetyEvent) {
        let _ = self.entered.send(());
        let _ = self.release.recv();
        let _ = self.events.send(event.clone());
    }
}

struct Gate {
    entered: Receiver<()>,
    release: Sender<()>,
    events: Receiver<SafetyEvent>,
}

fn gated_sink() -> (GatedSink, Gate) {
    let (entered_tx, entered_rx) = channel::unbounded();
    let (release_tx, release_rx) = channel::unbounded();
    let (events_tx, events_rx) = channel::unbounded();
    (
        GatedSink {
            entered: entered_tx,
            release: release_rx,
            events: events_tx,
        },
        Gate {
            entered: entered_rx,
            release: release_tx,
            events: events_rx,
        },
    )
}

fn fix_at(second: i64) -> RawFix {
    RawFix::new(0.0, 0.0005, 5.0, second * 1_000)
}

#[test]
fn test_worker_drops_oldest_when_full() {
    init_logs();
    let config = TrackingConfig {
        queue_capacity: 2,
        ..TrackingConfig::default()
    };
    let (sink, gate) = gated_sink();
    let worker = SessionWorker::spawn(session_with(config, vec![equator_trail()]), sink).unwrap();

    // Worker is now blocked publishing fix 1
    worker.submit(fix_at(1)).unwrap();
    gate.entered.recv_timeout(Duration::from_secs(5)).unwrap();

    for second in 2..=6 {
        worker.submit(fix_at(second)).unwrap();
    }
    assert_eq!(worker.pending(), 2);
    assert_eq!(worker.dropped_fixes(), 3);

    for _ in 0..3 {
        gate.release.send(()).unwrap();
    }
    let published: Vec<i64> = (0..3)
        .map(|_| {
            gate.events
                .recv_timeout(Duration::from_secs(5))
                .unwrap()
                .timestamp_ms
        })
        .collect();
    assert_eq!(published, vec![1_000, 5_000, 6_000]);

    let summary = worker.stop().unwrap();
    assert_eq!(summary.accepted_fixes, 3);
    assert_eq!(summary.dropped_fixes, 3);
}

#[test]
fn test_stop_handle_prevents_further_processing() {
    init_logs();
    let (sink, gate) = gated_sink();
    let worker = SessionWorker::spawn(
        session_with(TrackingConfig::default(), vec![equator_trail()]),
        sink,
    )
    .unwrap();

    worker.submit(fix_at(1)).unwrap();
    gate.entered.recv_timeout(Duration::from_secs(5)).unwrap();
    worker.submit(fix_at(2)).unwrap();

    let handle = worker.stop_handle();
    thread::spawn(move || handle.stop()).join().unwrap();

    gate.release.send(()).unwrap();
    gate.release.send(()).unwrap();
    assert_eq!(
        gate.events
            .recv_timeout(Duration::from_secs(5))
            .unwrap()
            .timestamp_ms,
        1_000
    );

    let summary = worker.stop().unwrap();
    assert_eq!(summary.accepted_fixes, 1);
    assert!(gate.events.try_recv().is_err());
}

#[test]
fn test_worker_skips_rejected_fixes() {
    init_logs();
    let (tx, rx) = channel::unbounded::<SafetyEvent>();
    let worker = SessionWorker::spawn(
        session_with(TrackingConfig::default(), vec![equator_trail()]),
        tx,
    )
    .unwrap();

    worker.submit(fix_at(1)).unwrap();
    worker.submit(RawFix::new(f64::NAN, 0.0, 5.0, 2_000)).unwrap();
    worker.submit(fix_at(3)).unwrap();

    let first = rx.recv_timeout(Duration::from_secs(5)).unwrap();
    let second = rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!((first.timestamp_ms, second.timestamp_ms), (1_000, 3_000));

    let summary = worker.stop().unwrap();
    assert_eq!(summary.accepted_fixes, 2);
    assert_eq!(summary.rejected_fixes, 1);
}

// ============================================================================
// SQLite-backed pipeline
// ============================================================================

#[cfg(feature = "persistence")]
#[test]
fn test_sqlite_backed_session_records_breadcrumbs() {
    use trail_sentinel::{NavigationRepository, SqliteRepository};

    init_logs();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nav.db");
    let repository = Arc::new(SqliteRepository::new(path.to_str().unwrap()).unwrap());
    assert_eq!(repository.seed_if_empty(vec![equator_trail()]).unwrap(), 1);

    let mut session = TrackingSession::new(TrackingConfig::default(), repository.clone()).unwrap();
    session.start("sqlite", None).unwrap();
    let on = session.on_fix(&RawFix::new(0.0, 0.0005, 5.0, 0)).unwrap();
    assert_eq!(on.status, SafetyStatus::Safe);
    session.stop();

    assert_eq!(repository.breadcrumb_count("sqlite").unwrap(), 1);
    assert_eq!(repository.unsynced_breadcrumbs().unwrap().len(), 1);
    assert_eq!(repository.trail_count().unwrap(), 1);
}
