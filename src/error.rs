//! Unified error handling for the trail-sentinel library.
//!
//! Every fallible operation returns [`Result`], so callers can tell a rejected
//! fix apart from a storage failure or a broken session invariant.

use thiserror::Error;

/// Unified error type for trail-sentinel operations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TrailSentinelError {
    /// Trail geometry has too few points for the operation
    #[error("Trail '{trail_id}' has {point_count} points, minimum {minimum_required} required")]
    InsufficientPoints {
        trail_id: String,
        point_count: usize,
        minimum_required: usize,
    },

    /// Trail geometry carries invalid coordinates
    #[error("Trail '{trail_id}' has invalid coordinates: {message}")]
    InvalidCoordinates { trail_id: String, message: String },

    /// A raw location fix was rejected before reaching the filter
    #[error("Rejected fix at {timestamp_ms}: {message}")]
    InvalidFix { timestamp_ms: i64, message: String },

    /// Configuration error
    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    /// Geometry or configuration payload could not be parsed
    #[error("Parse error: {message}")]
    ParseError { message: String },

    /// Persistence/storage error
    #[error("Persistence error: {message}")]
    PersistenceError { message: String },

    /// Operation not allowed in the current session state
    #[error("Session '{session_id}' {message}")]
    SessionState { session_id: String, message: String },

    /// Filter or monitor invariant broken; the session cannot continue
    #[error("Invariant violated in {component}: {message}")]
    InvariantViolation { component: String, message: String },

    /// Generic internal error
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl TrailSentinelError {
    /// True when this error must end the tracking session.
    pub fn is_fatal(&self) -> bool {
        matches!(self, TrailSentinelError::InvariantViolation { .. })
    }
}

impl From<serde_json::Error> for TrailSentinelError {
    fn from(err: serde_json::Error) -> Self {
        TrailSentinelError::ParseError {
            message: err.to_string(),
        }
    }
}

impl From<gpx::errors::GpxError> for TrailSentinelError {
    fn from(err: gpx::errors::GpxError) -> Self {
        TrailSentinelError::ParseError {
            message: err.to_string(),
        }
    }
}

#[cfg(feature = "persistence")]
impl From<rusqlite::Error> for TrailSentinelError {
    fn from(err: rusqlite::Error) -> Self {
        TrailSentinelError::PersistenceError {
            message: err.to_string(),
        }
    }
}

#[cfg(feature = "persistence")]
impl From<rmp_serde::encode::Error> for TrailSentinelError {
    fn from(err: rmp_serde::encode::Error) -> Self {
        TrailSentinelError::PersistenceError {
            message: err.to_string(),
        }
    }
}

#[cfg(feature = "persistence")]
impl From<rmp_serde::decode::Error> for TrailSentinelError {
    fn from(err: rmp_serde::decode::Error) -> Self {
        TrailSentinelError::PersistenceError {
            message: err.to_string(),
        }
    }
}

/// Result type alias for trail-sentinel operations.
pub type Result<T> = std::result::Result<T, TrailSentinelError>;

/// Extension trait for converting Option to TrailSentinelError.
pub trait OptionExt<T> {
    /// Convert Option to Result with insufficient points error.
    fn ok_or_insufficient_points(
        self,
        trail_id: &str,
        point_count: usize,
        minimum: usize,
    ) -> Result<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn ok_or_insufficient_points(
        self,
        trail_id: &str,
        point_count: usize,
        minimum: usize,
    ) -> Result<T> {
        self.ok_or_else(|| TrailSentinelError::InsufficientPoints {
            trail_id: trail_id.to_string(),
            point_count,
            minimum_required: minimum,
        })
    }
}
