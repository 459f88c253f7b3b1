//! Storage boundary for trails and breadcrumbs.
//!
//! The pipeline only needs a read path for candidate trails and a write path
//! for smoothed points. Implementations must be shareable across session
//! workers, so every method takes `&self`.

use std::sync::{Arc, Mutex, RwLock};

use log::info;

use crate::error::{Result, TrailSentinelError};
use crate::{Breadcrumb, GpsPoint, TrailGeometry, TrailIndex};

/// Repository used by [`crate::TrackingSession`].
pub trait NavigationRepository: Send + Sync {
    /// Persist one smoothed breadcrumb.
    fn save_breadcrumb(&self, breadcrumb: &Breadcrumb) -> Result<()>;

    /// Trails whose box overlaps the square window of `padding_degrees` around `point`.
    fn nearby_trails(&self, point: &GpsPoint, padding_degrees: f64)
        -> Result<Vec<Arc<TrailGeometry>>>;

    /// Insert or replace a trail.
    fn insert_trail(&self, trail: TrailGeometry) -> Result<()>;

    fn trail_count(&self) -> Result<usize>;
}

/// In-process repository backed by a [`TrailIndex`].
#[derive(Debug, Default)]
pub struct InMemoryRepository {
    index: RwLock<TrailIndex>,
    breadcrumbs: Mutex<Vec<Breadcrumb>>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_trails(trails: Vec<TrailGeometry>) -> Self {
        Self {
            index: RwLock::new(TrailIndex::bulk_load(trails)),
            breadcrumbs: Mutex::new(Vec::new()),
        }
    }

    /// Seed the index unless it already holds trails. Returns whether it seeded.
    pub fn seed_if_empty(&self, trails: Vec<TrailGeometry>) -> Result<bool> {
        let mut index = self.index.write().map_err(|_| lock_error("trail index"))?;
        if !index.is_empty() {
            info!("[InMemoryRepository] Already seeded with {} trails", index.len());
            return Ok(false);
        }
        *index = TrailIndex::bulk_load(trails);
        Ok(true)
    }

    /// All breadcrumbs saved so far, oldest first.
    pub fn breadcrumbs(&self) -> Result<Vec<Breadcrumb>> {
        let crumbs = self.breadcrumbs.lock().map_err(|_| lock_error("breadcrumbs"))?;
        Ok(crumbs.clone())
    }

    pub fn breadcrumbs_for_session(&self, session_id: &str) -> Result<Vec<Breadcrumb>> {
        let crumbs = self.breadcrumbs.lock().map_err(|_| lock_error("breadcrumbs"))?;
        Ok(crumbs
            .iter()
            .filter(|b| b.session_id == session_id)
            .cloned()
            .collect())
    }
}

impl NavigationRepository for InMemoryRepository {
    fn save_breadcrumb(&self, breadcrumb: &Breadcrumb) -> Result<()> {
        let mut crumbs = self.breadcrumbs.lock().map_err(|_| lock_error("breadcrumbs"))?;
        crumbs.push(breadcrumb.clone());
        Ok(())
    }

    fn nearby_trails(
        &self,
        point: &GpsPoint,
        padding_degrees: f64,
    ) -> Result<Vec<Arc<TrailGeometry>>> {
        let index = self.index.read().map_err(|_| lock_error("trail index"))?;
        Ok(index.query(point, padding_degrees))
    }

    fn insert_trail(&self, trail: TrailGeometry) -> Result<()> {
        let mut index = self.index.write().map_err(|_| lock_error("trail index"))?;
        index.insert(trail);
        Ok(())
    }

    fn trail_count(&self) -> Result<usize> {
        let index = self.index.read().map_err(|_| lock_error("trail index"))?;
        Ok(index.len())
    }
}

fn lock_error(what: &str) -> TrailSentinelError {
    TrailSentinelError::Internal {
        message: format!("Failed to acquire {} lock", what),
    }
}
