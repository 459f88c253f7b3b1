//! # Tracking Pipeline
//!
//! Per-fix processing for one hike:
//!
//! ```text
//! RawFix -> PositionFilter -> save breadcrumb -> nearby trails -> DeviationEngine
//!        -> DeviationMonitor -> SafetyEvent
//! ```
//!
//! [`TrackingSession`] is the synchronous state machine (Idle / Tracking).
//! [`SessionWorker`] moves a started session onto its own thread and feeds it
//! from a bounded queue that drops the oldest fix when full.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender, TrySendError};
use log::{debug, error, info, warn};

use crate::error::{Result, TrailSentinelError};
use crate::{
    Breadcrumb, DeviationEngine, DeviationMonitor, NavigationRepository, PositionFilter, RawFix,
    SafetyEvent, SafetyStatus, TrackingConfig, ETA_UNKNOWN, NO_TRAIL_DISTANCE,
};

/// Lifecycle state of a [`TrackingSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Tracking,
}

/// Counters and final status of a finished session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSummary {
    pub session_id: String,
    /// Trail the hiker said they would follow (informational only)
    pub trail_id: Option<String>,
    pub accepted_fixes: u64,
    pub rejected_fixes: u64,
    /// Fixes evicted from a full worker queue before processing
    pub dropped_fixes: u64,
    pub last_status: SafetyStatus,
}

/// Receiver of every [`SafetyEvent`] a session publishes.
pub trait SafetyEventSink: Send {
    fn on_event(&self, event: &SafetyEvent);
}

impl SafetyEventSink for Sender<SafetyEvent> {
    fn on_event(&self, event: &SafetyEvent) {
        match self.try_send(event.clone()) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                warn!("[SafetyEventSink] Event queue full, dropping event for {}", event.session_id)
            }
            Err(TrySendError::Disconnected(_)) => {
                debug!("[SafetyEventSink] Event receiver gone")
            }
        }
    }
}

/// Per-session mutable state, present only while tracking.
#[derive(Debug)]
struct ActiveSession {
    session_id: String,
    trail_id: Option<String>,
    filter: PositionFilter,
    monitor: DeviationMonitor,
    accepted_fixes: u64,
    rejected_fixes: u64,
    last_event: Option<SafetyEvent>,
}

impl ActiveSession {
    fn summary(&self) -> SessionSummary {
        SessionSummary {
            session_id: self.session_id.clone(),
            trail_id: self.trail_id.clone(),
            accepted_fixes: self.accepted_fixes,
            rejected_fixes: self.rejected_fixes,
            dropped_fixes: 0,
            last_status: self.monitor.status(),
        }
    }
}

/// One hiker's tracking pipeline.
///
/// Owns its filter and monitor exclusively. The repository is shared and may
/// be used by several sessions at once.
pub struct TrackingSession {
    config: TrackingConfig,
    engine: DeviationEngine,
    repository: Arc<dyn NavigationRepository>,
    active: Option<ActiveSession>,
    /// Summary of a session that ended on an invariant violation
    terminated: Option<SessionSummary>,
}

impl TrackingSession {
    /// Create an idle session. Fails if the configuration is invalid.
    pub fn new(config: TrackingConfig, repository: Arc<dyn NavigationRepository>) -> Result<Self> {
        config.validate()?;
        let engine = DeviationEngine::new(config.thresholds, config.effective_trail_padding());
        Ok(Self {
            config,
            engine,
            repository,
            active: None,
            terminated: None,
        })
    }

    pub fn config(&self) -> &TrackingConfig {
        &self.config
    }

    pub fn state(&self) -> SessionState {
        if self.active.is_some() {
            SessionState::Tracking
        } else {
            SessionState::Idle
        }
    }

    pub fn session_id(&self) -> Option<&str> {
        self.active.as_ref().map(|a| a.session_id.as_str())
    }

    /// Published status, `None` when idle.
    pub fn status(&self) -> Option<SafetyStatus> {
        self.active.as_ref().map(|a| a.monitor.status())
    }

    pub fn last_event(&self) -> Option<&SafetyEvent> {
        self.active.as_ref().and_then(|a| a.last_event.as_ref())
    }

    /// Counters of the running session.
    pub fn summary(&self) -> Option<SessionSummary> {
        self.active.as_ref().map(ActiveSession::summary)
    }

    /// Idle -> Tracking with a fresh filter and an empty monitor.
    pub fn start(&mut self, session_id: &str, trail_id: Option<String>) -> Result<()> {
        if let Some(active) = &self.active {
            return Err(TrailSentinelError::SessionState {
                session_id: active.session_id.clone(),
                message: "is already tracking".to_string(),
            });
        }

        info!(
            "[TrackingSession] Starting {} (trail: {}, thresholds {}/{} m, Q = {})",
            session_id,
            trail_id.as_deref().unwrap_or("none"),
            self.config.thresholds.warning_threshold_meters,
            self.config.thresholds.danger_threshold_meters,
            self.config.process_noise()
        );

        self.terminated = None;
        self.active = Some(ActiveSession {
            session_id: session_id.to_string(),
            trail_id,
            filter: PositionFilter::new(self.config.process_noise()),
            monitor: DeviationMonitor::new(self.config.thresholds, self.config.monitor_window_size),
            accepted_fixes: 0,
            rejected_fixes: 0,
            last_event: None,
        });
        Ok(())
    }

    /// Tracking -> Idle, discarding filter and monitor state.
    ///
    /// Returns the summary of the running session, or of the session that was
    /// terminated by an invariant violation since the last `start`.
    pub fn stop(&mut self) -> Option<SessionSummary> {
        match self.active.take() {
            Some(active) => {
                let summary = active.summary();
                info!(
                    "[TrackingSession] Stopped {} ({} accepted, {} rejected, last status {})",
                    summary.session_id,
                    summary.accepted_fixes,
                    summary.rejected_fixes,
                    summary.last_status
                );
                Some(summary)
            }
            None => self.terminated.take(),
        }
    }

    /// Run one fix through the pipeline and return the published event.
    ///
    /// Invalid fixes are rejected with [`TrailSentinelError::InvalidFix`] and
    /// leave filter and monitor untouched. An invariant violation ends the
    /// session before the error is returned.
    pub fn on_fix(&mut self, fix: &RawFix) -> Result<SafetyEvent> {
        let active = self
            .active
            .as_mut()
            .ok_or_else(|| TrailSentinelError::SessionState {
                session_id: String::new(),
                message: "is not tracking".to_string(),
            })?;

        if let Err(e) = fix.validate() {
            active.rejected_fixes += 1;
            warn!("[TrackingSession] {}: {}", active.session_id, e);
            return Err(e);
        }

        if let (Some(gap), Some(last)) = (self.config.filter_reset_gap_ms, active.filter.last_timestamp_ms())
        {
            let elapsed = fix.timestamp_ms.saturating_sub(last);
            if elapsed > gap {
                info!(
                    "[TrackingSession] {}: {} ms without fixes, restarting filter",
                    active.session_id, elapsed
                );
                active.filter.reset();
            }
        }

        let estimate = match active
            .filter
            .process(fix.lat, fix.lng, fix.accuracy_meters, fix.timestamp_ms)
        {
            Ok(estimate) => estimate,
            Err(e) if e.is_fatal() => return Err(self.terminate(e)),
            Err(e) => {
                active.rejected_fixes += 1;
                warn!("[TrackingSession] {}: {}", active.session_id, e);
                return Err(e);
            }
        };
        active.accepted_fixes += 1;

        let breadcrumb = Breadcrumb::from_estimate(&active.session_id, &estimate, fix);
        if let Err(e) = self.repository.save_breadcrumb(&breadcrumb) {
            warn!("[TrackingSession] {}: breadcrumb not saved: {}", active.session_id, e);
        }

        let point = estimate.point();
        let candidates = self
            .repository
            .nearby_trails(&point, self.config.query_padding_degrees)
            .unwrap_or_else(|e| {
                error!("[TrackingSession] {}: trail query failed: {}", active.session_id, e);
                Vec::new()
            });
        let assessment = self.engine.assess(&point, &candidates);

        let previous = active.monitor.status();
        let status = match active.monitor.add_tier(assessment.tier) {
            Ok(status) => status,
            Err(e) => return Err(self.terminate(e)),
        };

        if status == SafetyStatus::Danger && previous != SafetyStatus::Danger {
            warn!(
                "[TrackingSession] {}: entered DANGER at ({:.6}, {:.6}), nearest trail {}",
                active.session_id,
                point.latitude,
                point.longitude,
                if assessment.has_trail_data() {
                    format!("{:.1} m", assessment.distance_meters)
                } else {
                    "unknown".to_string()
                }
            );
        }

        let event = SafetyEvent {
            session_id: active.session_id.clone(),
            lat: point.latitude,
            lng: point.longitude,
            status,
            distance_meters: if assessment.has_trail_data() {
                assessment.distance_meters
            } else {
                NO_TRAIL_DISTANCE
            },
            eta_seconds: ETA_UNKNOWN,
            timestamp_ms: fix.timestamp_ms,
        };
        debug!(
            "[TrackingSession] {}: raw {} -> {} ({} candidates, {:.1} m, var {:.1})",
            event.session_id,
            assessment.tier,
            status,
            candidates.len(),
            assessment.distance_meters,
            estimate.variance_meters2
        );

        active.last_event = Some(event.clone());
        Ok(event)
    }

    fn terminate(&mut self, err: TrailSentinelError) -> TrailSentinelError {
        if let Some(active) = self.active.take() {
            error!("[TrackingSession] {} terminated: {}", active.session_id, err);
            self.terminated = Some(active.summary());
        }
        err
    }
}

// ============================================================================
// Background worker
// ============================================================================

/// Cloneable handle that stops a [`SessionWorker`] from any thread.
#[derive(Debug, Clone, Default)]
pub struct StopHandle {
    stopped: Arc<AtomicBool>,
}

impl StopHandle {
    /// Request the stop without waiting for the worker.
    ///
    /// A fix already in flight may finish and publish its event; no fix is
    /// taken off the queue afterwards.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// A started [`TrackingSession`] running on a dedicated thread.
pub struct SessionWorker {
    session_id: String,
    sender: Sender<RawFix>,
    /// Second receiver used by `submit` to evict the oldest queued fix
    overflow: Receiver<RawFix>,
    stop: StopHandle,
    dropped: Arc<AtomicU64>,
    handle: Option<JoinHandle<Option<SessionSummary>>>,
}

impl SessionWorker {
    /// Move `session` onto a worker thread that publishes to `sink`.
    ///
    /// The session must already be started.
    pub fn spawn<S>(mut session: TrackingSession, sink: S) -> Result<Self>
    where
        S: SafetyEventSink + 'static,
    {
        let session_id = session
            .session_id()
            .map(str::to_string)
            .ok_or_else(|| TrailSentinelError::SessionState {
                session_id: String::new(),
                message: "must be started before spawning a worker".to_string(),
            })?;

        let (sender, receiver) = channel::bounded::<RawFix>(session.config().queue_capacity);
        let overflow = receiver.clone();
        let stop = StopHandle::default();
        let worker_stop = stop.clone();

        let handle = thread::Builder::new()
            .name(format!("session-{}", session_id))
            .spawn(move || {
                loop {
                    let fix = match receiver.recv_timeout(POLL_INTERVAL) {
                        Ok(fix) => fix,
                        Err(RecvTimeoutError::Timeout) if worker_stop.is_stopped() => break,
                        Err(RecvTimeoutError::Timeout) => continue,
                        Err(RecvTimeoutError::Disconnected) => break,
                    };

                    if worker_stop.is_stopped() {
                        break;
                    }

                    match session.on_fix(&fix) {
                        Ok(event) => sink.on_event(&event),
                        Err(e) if e.is_fatal() => {
                            error!("[SessionWorker] Fatal error, worker exiting: {}", e);
                            worker_stop.stop();
                            break;
                        }
                        Err(e) => debug!("[SessionWorker] Fix skipped: {}", e),
                    }
                }
                session.stop()
            })
            .map_err(|e| TrailSentinelError::Internal {
                message: format!("failed to spawn session worker: {}", e),
            })?;

        info!("[SessionWorker] Spawned worker for {}", session_id);
        Ok(Self {
            session_id,
            sender,
            overflow,
            stop,
            dropped: Arc::new(AtomicU64::new(0)),
            handle: Some(handle),
        })
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Queue a fix. When the queue is full the oldest queued fix is dropped.
    ///
    /// Fails once the worker is stopped or has exited.
    pub fn submit(&self, fix: RawFix) -> Result<()> {
        let mut fix = fix;
        loop {
            if self.stop.is_stopped() || self.is_finished() {
                return Err(self.stopped_error());
            }
            match self.sender.try_send(fix) {
                Ok(()) => return Ok(()),
                Err(TrySendError::Full(rejected)) => {
                    if let Ok(evicted) = self.overflow.try_recv() {
                        self.dropped.fetch_add(1, Ordering::Relaxed);
                        debug!(
                            "[SessionWorker] {}: queue full, dropped fix at {}",
                            self.session_id, evicted.timestamp_ms
                        );
                    }
                    fix = rejected;
                }
                Err(TrySendError::Disconnected(_)) => return Err(self.stopped_error()),
            }
        }
    }

    /// Fixes currently waiting in the queue.
    pub fn pending(&self) -> usize {
        self.sender.len()
    }

    pub fn dropped_fixes(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Whether the worker thread has exited (stopped or fatal error).
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, |h| h.is_finished())
    }

    /// Stop the worker, wait for the thread and return the session summary.
    pub fn stop(mut self) -> Option<SessionSummary> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Option<SessionSummary> {
        self.stop.stop();
        let handle = self.handle.take()?;
        let mut summary = match handle.join() {
            Ok(summary) => summary,
            Err(_) => {
                error!("[SessionWorker] {}: worker thread panicked", self.session_id);
                None
            }
        };
        if let Some(summary) = summary.as_mut() {
            summary.dropped_fixes = self.dropped_fixes();
        }
        info!("[SessionWorker] Worker for {} stopped", self.session_id);
        summary
    }

    fn stopped_error(&self) -> TrailSentinelError {
        TrailSentinelError::SessionState {
            session_id: self.session_id.clone(),
            message: "worker is stopped".to_string(),
        }
    }
}

impl Drop for SessionWorker {
    fn drop(&mut self) {
        if self.handle.is_some() {
            self.shutdown();
        }
    }
}
