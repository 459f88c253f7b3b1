//! # Trail Sentinel
//!
//! Navigation-safety core for a hiking app: smooths noisy GPS fixes and turns
//! the distance to the nearest known trail into a debounced safety status.
//!
//! This library provides:
//! - Adaptive Kalman-style position smoothing
//! - Bounding-box trail index with exact nearest-segment distance
//! - Hysteresis monitor that suppresses alert flapping near thresholds
//! - A tracking session that wires the pieces into a per-fix pipeline
//!
//! ## Features
//!
//! - **`parallel`** - Enable parallel trail ingestion with rayon
//! - **`persistence`** - Enable SQLite storage for trails and breadcrumbs
//! - **`ffi`** - Enable FFI bindings for mobile platforms (iOS/Android)
//! - **`full`** - Enable all features
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use trail_sentinel::{
//!     InMemoryRepository, RawFix, SafetyStatus, TrackingConfig, TrackingSession, TrailGeometry,
//!     TrailPoint,
//! };
//!
//! let trail = TrailGeometry::from_points(
//!     "ridge",
//!     "semeru",
//!     "Ridge Path",
//!     vec![TrailPoint::new(0.0, 0.0), TrailPoint::new(0.0, 0.001)],
//! )
//! .unwrap();
//!
//! let repository = Arc::new(InMemoryRepository::with_trails(vec![trail]));
//! let mut session = TrackingSession::new(TrackingConfig::default(), repository).unwrap();
//! session.start("hike-1", None).unwrap();
//!
//! let event = session
//!     .on_fix(&RawFix::new(0.0, 0.0005, 5.0, 1_000))
//!     .unwrap();
//! assert_eq!(event.status, SafetyStatus::Safe);
//! ```

use geo::{BoundingRect, LineString};
use serde::{Deserialize, Serialize};

// Unified error handling
pub mod error;
pub use error::{OptionExt, Result, TrailSentinelError};

// Geographic utilities (distance, segment projection, bounds)
pub mod geo_utils;

// Thresholds, noise profiles and session tuning
pub mod config;
pub use config::{
    NoiseProfile, ThresholdConfig, ThresholdPreset, TrackingConfig, MAX_PROCESS_NOISE,
};

// Position smoothing
pub mod kalman;
pub use kalman::PositionFilter;

// Spatial prefilter over trail bounding boxes
pub mod trail_index;
pub use trail_index::TrailIndex;

// Nearest-trail distance and raw classification
pub mod deviation;
pub use deviation::{Assessment, DeviationEngine};

// Hysteresis over raw tiers
pub mod monitor;
pub use monitor::DeviationMonitor;

// Storage boundary
pub mod repository;
pub use repository::{InMemoryRepository, NavigationRepository};

// SQLite-backed repository
#[cfg(feature = "persistence")]
pub mod persistence;
#[cfg(feature = "persistence")]
pub use persistence::SqliteRepository;

// Trail geometry and mountain configuration loading
pub mod ingest;
pub use ingest::{
    load_mountains, parse_geometry_json, parse_gpx_pois, parse_gpx_tracks, GpxTrack, IngestReport,
    MountainsConfig,
};

// Session lifecycle and per-fix processing
pub mod pipeline;
pub use pipeline::{
    SafetyEventSink, SessionState, SessionSummary, SessionWorker, StopHandle, TrackingSession,
};

// FFI bindings for mobile platforms (iOS/Android)
#[cfg(feature = "ffi")]
pub mod ffi;

#[cfg(feature = "ffi")]
uniffi::setup_scaffolding!();

/// Initialize logging for Android (only used in FFI)
#[cfg(all(feature = "ffi", target_os = "android"))]
pub(crate) fn init_logging() {
    use android_logger::Config;
    use log::LevelFilter;

    android_logger::init_once(
        Config::default()
            .with_max_level(LevelFilter::Debug)
            .with_tag("TrailSentinelRust"),
    );
}

#[cfg(all(feature = "ffi", not(target_os = "android")))]
pub(crate) fn init_logging() {
    // No-op on non-Android platforms
}

// ============================================================================
// Core Types
// ============================================================================

/// A GPS coordinate with latitude and longitude in degrees.
///
/// # Example
/// ```
/// use trail_sentinel::GpsPoint;
/// let point = GpsPoint::new(-8.1077, 112.9224); // Semeru summit
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
pub struct GpsPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GpsPoint {
    /// Create a new GPS point.
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Check if the point has valid coordinates.
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && self.latitude >= -90.0
            && self.latitude <= 90.0
            && self.longitude >= -180.0
            && self.longitude <= 180.0
    }
}

/// One vertex of a trail polyline, optionally carrying elevation in meters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrailPoint {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub elevation: Option<f64>,
}

impl TrailPoint {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
            elevation: None,
        }
    }

    pub fn with_elevation(latitude: f64, longitude: f64, elevation: f64) -> Self {
        Self {
            latitude,
            longitude,
            elevation: Some(elevation),
        }
    }

    pub fn to_gps(&self) -> GpsPoint {
        GpsPoint::new(self.latitude, self.longitude)
    }
}

/// Axis-aligned bounding box in lat/lng space.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lng: f64,
    pub max_lng: f64,
}

impl Bounds {
    /// Tight envelope of the given points. `None` for an empty slice.
    pub fn from_points(points: &[TrailPoint]) -> Option<Self> {
        let line: LineString<f64> = points
            .iter()
            .map(|p| (p.longitude, p.latitude))
            .collect();
        let rect = line.bounding_rect()?;

        Some(Self {
            min_lat: rect.min().y,
            max_lat: rect.max().y,
            min_lng: rect.min().x,
            max_lng: rect.max().x,
        })
    }

    /// Bounds grown by `padding` degrees on every side.
    pub fn expand(&self, padding: f64) -> Self {
        Self {
            min_lat: self.min_lat - padding,
            max_lat: self.max_lat + padding,
            min_lng: self.min_lng - padding,
            max_lng: self.max_lng + padding,
        }
    }

    /// Inclusive containment test.
    pub fn contains(&self, point: &GpsPoint) -> bool {
        point.latitude >= self.min_lat
            && point.latitude <= self.max_lat
            && point.longitude >= self.min_lng
            && point.longitude <= self.max_lng
    }

    /// Inclusive overlap test between two boxes.
    pub fn overlaps(&self, other: &Bounds) -> bool {
        self.max_lat >= other.min_lat
            && self.min_lat <= other.max_lat
            && self.max_lng >= other.min_lng
            && self.min_lng <= other.max_lng
    }

    /// Square window of `padding` degrees around a point.
    pub fn around(point: &GpsPoint, padding: f64) -> Self {
        Self {
            min_lat: point.latitude - padding,
            max_lat: point.latitude + padding,
            min_lng: point.longitude - padding,
            max_lng: point.longitude + padding,
        }
    }

    /// Get the center point of the bounds.
    pub fn center(&self) -> GpsPoint {
        GpsPoint::new(
            (self.min_lat + self.max_lat) / 2.0,
            (self.min_lng + self.max_lng) / 2.0,
        )
    }
}

/// A trail polyline with its precomputed envelope and metadata.
///
/// Created once at ingestion and never mutated afterwards. Points keep the
/// order they had in the source file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrailGeometry {
    /// Unique identifier for the trail
    pub id: String,
    /// Mountain this trail belongs to
    pub mountain_id: String,
    pub name: String,
    /// Ordered vertices along the trail
    pub points: Vec<TrailPoint>,
    /// Tight envelope of `points`
    pub bounds: Bounds,
    /// 1 (easy) .. 5 (expert)
    pub difficulty: u8,
    /// Polyline length in meters
    pub distance_meters: f64,
    /// Sum of positive elevation deltas in meters
    pub elevation_gain: f64,
    pub is_official: bool,
}

impl TrailGeometry {
    /// Build a trail from ordered points, deriving bounds, length and gain.
    ///
    /// Returns an error for an empty point list or non-finite coordinates.
    /// Single-point trails are accepted but never match in distance queries.
    pub fn from_points(
        id: &str,
        mountain_id: &str,
        name: &str,
        points: Vec<TrailPoint>,
    ) -> Result<Self> {
        if let Some(bad) = points.iter().find(|p| !p.to_gps().is_valid()) {
            return Err(TrailSentinelError::InvalidCoordinates {
                trail_id: id.to_string(),
                message: format!("({}, {})", bad.latitude, bad.longitude),
            });
        }

        let bounds = Bounds::from_points(&points).ok_or_insufficient_points(id, 0, 1)?;
        let distance_meters = geo_utils::polyline_length(&points);
        let elevation_gain = geo_utils::elevation_gain(&points);

        Ok(Self {
            id: id.to_string(),
            mountain_id: mountain_id.to_string(),
            name: name.to_string(),
            points,
            bounds,
            difficulty: 1,
            distance_meters,
            elevation_gain,
            is_official: true,
        })
    }

    /// Whether the trail has enough points to take part in distance queries.
    pub fn is_queryable(&self) -> bool {
        self.points.len() >= 2
    }
}

impl AsRef<TrailGeometry> for TrailGeometry {
    fn as_ref(&self) -> &TrailGeometry {
        self
    }
}

/// One raw location sample as delivered by the platform location provider.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawFix {
    pub lat: f64,
    pub lng: f64,
    #[serde(default)]
    pub altitude: f64,
    pub accuracy_meters: f64,
    #[serde(default)]
    pub speed_mps: f64,
    #[serde(default)]
    pub bearing_deg: f64,
    pub timestamp_ms: i64,
}

impl RawFix {
    /// Fix with only the fields the filter consumes.
    pub fn new(lat: f64, lng: f64, accuracy_meters: f64, timestamp_ms: i64) -> Self {
        Self {
            lat,
            lng,
            altitude: 0.0,
            accuracy_meters,
            speed_mps: 0.0,
            bearing_deg: 0.0,
            timestamp_ms,
        }
    }

    pub fn point(&self) -> GpsPoint {
        GpsPoint::new(self.lat, self.lng)
    }

    /// Reject non-finite or out-of-range coordinates.
    ///
    /// Accuracy is not checked here: non-positive values are clamped by the filter.
    pub fn validate(&self) -> Result<()> {
        if !self.point().is_valid() {
            return Err(TrailSentinelError::InvalidFix {
                timestamp_ms: self.timestamp_ms,
                message: format!("coordinates out of range: ({}, {})", self.lat, self.lng),
            });
        }
        Ok(())
    }
}

/// Smoothed position produced by [`PositionFilter`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PositionEstimate {
    pub latitude: f64,
    pub longitude: f64,
    /// Position uncertainty in m²
    pub variance_meters2: f64,
    pub timestamp_ms: i64,
}

impl PositionEstimate {
    pub fn point(&self) -> GpsPoint {
        GpsPoint::new(self.latitude, self.longitude)
    }
}

/// Safety classification, used both for raw single-sample tiers and for the
/// debounced status published by [`DeviationMonitor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[cfg_attr(feature = "ffi", derive(uniffi::Enum))]
pub enum SafetyStatus {
    Safe,
    Warning,
    Danger,
}

/// Raw per-sample tier. Same values as the published status.
pub type SafetyTier = SafetyStatus;

impl SafetyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SafetyStatus::Safe => "SAFE",
            SafetyStatus::Warning => "WARNING",
            SafetyStatus::Danger => "DANGER",
        }
    }
}

impl std::fmt::Display for SafetyStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `eta_seconds` value meaning "not computed".
pub const ETA_UNKNOWN: i64 = -1;

/// `distance_meters` value meaning "no trail geometry available".
pub const NO_TRAIL_DISTANCE: f64 = -1.0;

/// Unit handed to the presentation/alerting collaborator after every fix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
pub struct SafetyEvent {
    pub session_id: String,
    pub lat: f64,
    pub lng: f64,
    pub status: SafetyStatus,
    /// Distance to the nearest trail, or [`NO_TRAIL_DISTANCE`]
    pub distance_meters: f64,
    /// Always [`ETA_UNKNOWN`]
    pub eta_seconds: i64,
    pub timestamp_ms: i64,
}

impl SafetyEvent {
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}

/// Persisted smoothed point recording where the hiker has been.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Breadcrumb {
    pub session_id: String,
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
    pub accuracy: f64,
    pub bearing: f64,
    pub speed: f64,
    pub timestamp_ms: i64,
    /// Whether the point has been handed to the front end / cloud
    pub synced: bool,
}

impl Breadcrumb {
    /// Smoothed position combined with the auxiliary readings of the raw fix.
    pub fn from_estimate(session_id: &str, estimate: &PositionEstimate, fix: &RawFix) -> Self {
        Self {
            session_id: session_id.to_string(),
            latitude: estimate.latitude,
            longitude: estimate.longitude,
            altitude: fix.altitude,
            accuracy: fix.accuracy_meters,
            bearing: fix.bearing_deg,
            speed: fix.speed_mps,
            timestamp_ms: fix.timestamp_ms,
            synced: false,
        }
    }
}

/// Point of interest on a mountain (camp, water source, checkpoint).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Poi {
    pub id: String,
    pub mountain_id: String,
    pub name: String,
    /// Lowercased waypoint type, e.g. `"camp"`, `"water"`, `"pos"`
    pub poi_type: String,
    pub latitude: f64,
    pub longitude: f64,
    /// Meters, 0 when the waypoint carries none
    pub elevation: f64,
}

// ============================================================================
// Tests
// ============================================================================
