//! FFI bindings for mobile platforms (iOS/Android).
//!
//! This module provides the UniFFI bindings that expose the tracking pipeline
//! to Kotlin and Swift. All FFI functions are prefixed with `ffi_` to avoid
//! naming conflicts with the internal API.
//!
//! Trails live in one process-wide repository; sessions are kept in a
//! registry keyed by session id so the platform service only passes ids and
//! raw fix values across the boundary.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use log::{info, warn};
use once_cell::sync::Lazy;

use crate::ingest::parse_trail_documents;
use crate::{
    init_logging, InMemoryRepository, NavigationRepository, RawFix, SafetyEvent, TrackingConfig,
    TrackingSession,
};

// ============================================================================
// Global State
// ============================================================================

/// Trails shared by every session.
static REPOSITORY: Lazy<Arc<InMemoryRepository>> = Lazy::new(|| Arc::new(InMemoryRepository::new()));

/// Running sessions by id.
static SESSIONS: Lazy<Mutex<HashMap<String, TrackingSession>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

fn with_sessions<F, R>(f: F) -> R
where
    F: FnOnce(&mut HashMap<String, TrackingSession>) -> R,
{
    let mut sessions = SESSIONS.lock().unwrap_or_else(|p| p.into_inner());
    f(&mut sessions)
}

// ============================================================================
// Trails
// ============================================================================

/// Load trails from a JSON array of trail documents.
///
/// Each document is `{"id", "mountain_id", "name", "coordinates"}` where
/// `coordinates` is any geometry payload accepted by
/// [`crate::parse_geometry_json`]. Returns the number of trails inserted.
#[uniffi::export]
pub fn ffi_load_trails_json(json: String) -> u32 {
    init_logging();
    let report = match parse_trail_documents(&json) {
        Ok(report) => report,
        Err(e) => {
            warn!("[TrailSentinelRust] Trail payload rejected: {}", e);
            return 0;
        }
    };

    let mut inserted = 0u32;
    for trail in report.trails {
        match REPOSITORY.insert_trail(trail) {
            Ok(()) => inserted += 1,
            Err(e) => warn!("[TrailSentinelRust] Trail not inserted: {}", e),
        }
    }
    info!(
        "[TrailSentinelRust] Loaded {} trails ({} skipped)",
        inserted,
        report.skipped.len()
    );
    inserted
}

#[uniffi::export]
pub fn ffi_trail_count() -> u32 {
    REPOSITORY.trail_count().unwrap_or(0) as u32
}

/// Default tracking configuration as JSON, for the settings screen.
#[uniffi::export]
pub fn ffi_default_config_json() -> String {
    serde_json::to_string(&TrackingConfig::default()).unwrap_or_else(|_| "{}".to_string())
}

// ============================================================================
// Sessions
// ============================================================================

/// Start a session. An empty `config_json` selects the defaults.
///
/// Returns false if the id is already tracking or the config is invalid.
#[uniffi::export]
pub fn ffi_start_session(session_id: String, trail_id: Option<String>, config_json: String) -> bool {
    init_logging();

    let config = if config_json.trim().is_empty() {
        TrackingConfig::default()
    } else {
        match TrackingConfig::from_json(&config_json) {
            Ok(config) => config,
            Err(e) => {
                warn!("[TrailSentinelRust] Invalid config for {}: {}", session_id, e);
                return false;
            }
        }
    };

    with_sessions(|sessions| {
        if sessions.contains_key(&session_id) {
            warn!("[TrailSentinelRust] Session {} already running", session_id);
            return false;
        }

        let repository: Arc<dyn NavigationRepository> = Arc::<InMemoryRepository>::clone(&REPOSITORY);
        let started = TrackingSession::new(config, repository).and_then(|mut session| {
            session.start(&session_id, trail_id)?;
            Ok(session)
        });

        match started {
            Ok(session) => {
                sessions.insert(session_id, session);
                true
            }
            Err(e) => {
                warn!("[TrailSentinelRust] Could not start {}: {}", session_id, e);
                false
            }
        }
    })
}

/// Feed one raw fix. Returns `None` for unknown sessions and rejected fixes.
#[uniffi::export]
#[allow(clippy::too_many_arguments)]
pub fn ffi_on_fix(
    session_id: String,
    lat: f64,
    lng: f64,
    altitude: f64,
    accuracy: f64,
    speed: f64,
    bearing: f64,
    timestamp_ms: i64,
) -> Option<SafetyEvent> {
    let fix = RawFix {
        lat,
        lng,
        altitude,
        accuracy_meters: accuracy,
        speed_mps: speed,
        bearing_deg: bearing,
        timestamp_ms,
    };

    with_sessions(|sessions| {
        let session = sessions.get_mut(&session_id)?;
        match session.on_fix(&fix) {
            Ok(event) => Some(event),
            Err(e) if e.is_fatal() => {
                // The session already terminated itself
                sessions.remove(&session_id);
                None
            }
            Err(_) => None,
        }
    })
}

/// Stop and forget a session. Returns false if it was not running.
#[uniffi::export]
pub fn ffi_stop_session(session_id: String) -> bool {
    with_sessions(|sessions| match sessions.remove(&session_id) {
        Some(mut session) => session.stop().is_some(),
        None => false,
    })
}

/// `"SAFE"`, `"WARNING"`, `"DANGER"`, or `"IDLE"` for unknown sessions.
#[uniffi::export]
pub fn ffi_session_status(session_id: String) -> String {
    with_sessions(|sessions| {
        sessions
            .get(&session_id)
            .and_then(TrackingSession::status)
            .map(|s| s.as_str().to_string())
            .unwrap_or_else(|| "IDLE".to_string())
    })
}
