//! Hysteresis over raw safety tiers.
//!
//! The monitor keeps the last N raw tiers (N = 3 by default) and publishes:
//! - DANGER if any buffered tier is DANGER
//! - SAFE if every buffered tier is SAFE
//! - WARNING otherwise
//!
//! A single DANGER reading takes effect immediately, while clearing an alert
//! needs a full window of SAFE readings.

use std::collections::VecDeque;

use crate::deviation::classify_distance;
use crate::error::{Result, TrailSentinelError};
use crate::{SafetyStatus, SafetyTier, ThresholdConfig};

/// Default number of raw tiers kept by the monitor.
pub const DEFAULT_WINDOW_SIZE: usize = 3;

/// Debounced safety status for one tracking session.
#[derive(Debug, Clone)]
pub struct DeviationMonitor {
    thresholds: ThresholdConfig,
    capacity: usize,
    readings: VecDeque<SafetyTier>,
    status: SafetyStatus,
}

impl DeviationMonitor {
    /// Monitor with the given thresholds and window size (at least 1).
    pub fn new(thresholds: ThresholdConfig, window_size: usize) -> Self {
        let capacity = window_size.max(1);
        Self {
            thresholds,
            capacity,
            readings: VecDeque::with_capacity(capacity),
            status: SafetyStatus::Safe,
        }
    }

    /// Classify a distance and push the resulting tier.
    pub fn add_reading(&mut self, distance_meters: f64) -> Result<SafetyStatus> {
        let tier = classify_distance(&self.thresholds, distance_meters);
        self.add_tier(tier)
    }

    /// Push an already classified tier and recompute the published status.
    pub fn add_tier(&mut self, tier: SafetyTier) -> Result<SafetyStatus> {
        self.readings.push_back(tier);
        if self.readings.len() > self.capacity {
            self.readings.pop_front();
        }

        if self.readings.len() > self.capacity {
            return Err(TrailSentinelError::InvariantViolation {
                component: "DeviationMonitor".to_string(),
                message: format!(
                    "buffer holds {} readings, capacity {}",
                    self.readings.len(),
                    self.capacity
                ),
            });
        }

        self.status = if self.readings.contains(&SafetyStatus::Danger) {
            SafetyStatus::Danger
        } else if self.readings.iter().all(|t| *t == SafetyStatus::Safe) {
            SafetyStatus::Safe
        } else {
            SafetyStatus::Warning
        };

        Ok(self.status)
    }

    /// Currently published status. SAFE before the first reading.
    pub fn status(&self) -> SafetyStatus {
        self.status
    }

    /// Buffered raw tiers, oldest first.
    pub fn readings(&self) -> impl Iterator<Item = &SafetyTier> {
        self.readings.iter()
    }

    pub fn len(&self) -> usize {
        self.readings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Drop all readings and return to SAFE. Used at session end.
    pub fn clear(&mut self) {
        self.readings.clear();
        self.status = SafetyStatus::Safe;
    }
}

impl Default for DeviationMonitor {
    fn default() -> Self {
        Self::new(ThresholdConfig::default(), DEFAULT_WINDOW_SIZE)
    }
}
