//! Bounding-box index over trail geometries.
//!
//! The index is a conservative prefilter: a query returns every trail whose
//! box overlaps the padded window around a point, and possibly nothing more
//! precise than that. Exact distances are computed by [`crate::DeviationEngine`].
//! Trails are loaded once before tracking starts and only read afterwards.

use std::collections::HashMap;
use std::sync::Arc;

use log::{debug, info};
use rstar::{RTree, RTreeObject, AABB};

use crate::{Bounds, GpsPoint, TrailGeometry};

/// Bounds wrapper for R-tree spatial indexing
#[derive(Debug, Clone, PartialEq)]
struct TrailEnvelope {
    slot: usize,
    bounds: Bounds,
}

impl RTreeObject for TrailEnvelope {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_corners(
            [self.bounds.min_lng, self.bounds.min_lat],
            [self.bounds.max_lng, self.bounds.max_lat],
        )
    }
}

/// Shared, read-mostly collection of trails with an R-tree over their boxes.
#[derive(Debug, Default)]
pub struct TrailIndex {
    trails: Vec<Arc<TrailGeometry>>,
    slots: HashMap<String, usize>,
    spatial_index: RTree<TrailEnvelope>,
}

impl TrailIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build an index from a batch of trails in one pass.
    pub fn bulk_load(trails: Vec<TrailGeometry>) -> Self {
        let mut index = Self::new();
        for trail in trails {
            index.insert_slot(trail);
        }
        let envelopes: Vec<TrailEnvelope> = index
            .trails
            .iter()
            .enumerate()
            .map(|(slot, t)| TrailEnvelope {
                slot,
                bounds: t.bounds,
            })
            .collect();
        index.spatial_index = RTree::bulk_load(envelopes);

        info!("[TrailIndex] Bulk loaded {} trails", index.trails.len());
        index
    }

    /// Add one trail. A trail with an existing id replaces the previous one.
    pub fn insert(&mut self, trail: TrailGeometry) {
        let bounds = trail.bounds;
        let previous = self.slots.get(&trail.id).map(|&slot| (slot, self.trails[slot].bounds));
        let slot = self.insert_slot(trail);

        if let Some((old_slot, old_bounds)) = previous {
            if old_bounds == bounds {
                return;
            }
            self.spatial_index.remove(&TrailEnvelope {
                slot: old_slot,
                bounds: old_bounds,
            });
        }
        self.spatial_index.insert(TrailEnvelope { slot, bounds });
    }

    /// Store the geometry, reusing the slot of a trail with the same id.
    fn insert_slot(&mut self, trail: TrailGeometry) -> usize {
        match self.slots.get(&trail.id) {
            Some(&slot) => {
                debug!("[TrailIndex] Replacing trail {}", trail.id);
                self.trails[slot] = Arc::new(trail);
                slot
            }
            None => {
                let slot = self.trails.len();
                self.slots.insert(trail.id.clone(), slot);
                self.trails.push(Arc::new(trail));
                slot
            }
        }
    }

    /// Every trail whose box overlaps `[lat ± padding] × [lng ± padding]`,
    /// in insertion order.
    pub fn query(&self, point: &GpsPoint, padding_degrees: f64) -> Vec<Arc<TrailGeometry>> {
        let window = Bounds::around(point, padding_degrees);
        let search = AABB::from_corners(
            [window.min_lng, window.min_lat],
            [window.max_lng, window.max_lat],
        );

        let mut slots: Vec<usize> = self
            .spatial_index
            .locate_in_envelope_intersecting(&search)
            .map(|e| e.slot)
            .collect();
        slots.sort_unstable();

        slots
            .into_iter()
            .map(|slot| Arc::clone(&self.trails[slot]))
            .collect()
    }

    /// Reference query: linear scan with the explicit overlap test.
    pub fn query_linear(&self, point: &GpsPoint, padding_degrees: f64) -> Vec<Arc<TrailGeometry>> {
        let window = Bounds::around(point, padding_degrees);
        self.trails
            .iter()
            .filter(|t| t.bounds.overlaps(&window))
            .cloned()
            .collect()
    }

    pub fn get(&self, id: &str) -> Option<Arc<TrailGeometry>> {
        self.slots.get(id).map(|&slot| Arc::clone(&self.trails[slot]))
    }

    pub fn trails_for_mountain(&self, mountain_id: &str) -> Vec<Arc<TrailGeometry>> {
        self.trails
            .iter()
            .filter(|t| t.mountain_id == mountain_id)
            .cloned()
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<TrailGeometry>> {
        self.trails.iter()
    }

    pub fn len(&self) -> usize {
        self.trails.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trails.is_empty()
    }
}
