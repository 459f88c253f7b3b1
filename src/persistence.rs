//! # SQLite Repository
//!
//! Durable storage for trails and breadcrumbs.
//!
//! ## Tables
//!
//! 1. **trails**: metadata and bounding box columns (indexed), with the
//!    ordered points stored as a MessagePack blob
//! 2. **breadcrumbs**: one row per smoothed fix, with a `synced` flag for the
//!    hand-off to the front end
//! 3. **mountains** / **pois**: the catalog seeded from `mountains.json`
//!
//! Nearby-trail queries run the bounding-box overlap test in SQL, so only the
//! rows that can possibly matter are decoded.

use std::sync::{Arc, Mutex, MutexGuard};

use log::{debug, info, warn};
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::error::{Result, TrailSentinelError};
use crate::ingest::{IngestReport, MountainConfig};
use crate::{
    Bounds, Breadcrumb, GpsPoint, NavigationRepository, Poi, TrailGeometry, TrailIndex, TrailPoint,
};

/// Breadcrumb row as stored, with its database id.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredBreadcrumb {
    pub id: i64,
    pub breadcrumb: Breadcrumb,
}

/// [`NavigationRepository`] backed by a SQLite database.
pub struct SqliteRepository {
    db: Mutex<Connection>,
}

impl SqliteRepository {
    // ========================================================================
    // Initialization
    // ========================================================================

    /// Open (or create) the database at `db_path`.
    pub fn new(db_path: &str) -> Result<Self> {
        let db = Connection::open(db_path)?;
        Self::init_schema(&db)?;
        info!("[SqliteRepository] Opened {}", db_path);
        Ok(Self { db: Mutex::new(db) })
    }

    /// Create an in-memory database (for testing).
    pub fn in_memory() -> Result<Self> {
        Self::new(":memory:")
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            r#"
            -- Trail geometry and metadata
            CREATE TABLE IF NOT EXISTS trails (
                id TEXT PRIMARY KEY,
                mountain_id TEXT NOT NULL,
                name TEXT NOT NULL,
                min_lat REAL NOT NULL,
                max_lat REAL NOT NULL,
                min_lng REAL NOT NULL,
                max_lng REAL NOT NULL,
                difficulty INTEGER NOT NULL,
                distance_meters REAL NOT NULL,
                elevation_gain REAL NOT NULL,
                is_official INTEGER NOT NULL,
                points BLOB NOT NULL,
                point_count INTEGER NOT NULL
            );

            -- Smoothed positions recorded during tracking
            CREATE TABLE IF NOT EXISTS breadcrumbs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id TEXT NOT NULL,
                latitude REAL NOT NULL,
                longitude REAL NOT NULL,
                altitude REAL NOT NULL,
                accuracy REAL NOT NULL,
                bearing REAL NOT NULL,
                speed REAL NOT NULL,
                timestamp_ms INTEGER NOT NULL,
                synced INTEGER NOT NULL DEFAULT 0
            );

            -- Mountain catalog
            CREATE TABLE IF NOT EXISTS mountains (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                description TEXT NOT NULL,
                region TEXT NOT NULL,
                lat REAL NOT NULL,
                lng REAL NOT NULL,
                altitude REAL NOT NULL
            );

            -- Points of interest
            CREATE TABLE IF NOT EXISTS pois (
                id TEXT PRIMARY KEY,
                mountain_id TEXT NOT NULL,
                name TEXT NOT NULL,
                poi_type TEXT NOT NULL,
                lat REAL NOT NULL,
                lng REAL NOT NULL,
                elevation REAL NOT NULL
            );

            -- Indexes
            CREATE INDEX IF NOT EXISTS idx_pois_mountain ON pois(mountain_id);
            CREATE INDEX IF NOT EXISTS idx_trails_bounds ON trails(min_lat, max_lat, min_lng, max_lng);
            CREATE INDEX IF NOT EXISTS idx_trails_mountain ON trails(mountain_id);
            CREATE INDEX IF NOT EXISTS idx_breadcrumbs_session ON breadcrumbs(session_id, timestamp_ms);
            CREATE INDEX IF NOT EXISTS idx_breadcrumbs_synced ON breadcrumbs(synced);
        "#,
        )?;
        Ok(())
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.db.lock().map_err(|_| TrailSentinelError::PersistenceError {
            message: "database lock poisoned".to_string(),
        })
    }

    // ========================================================================
    // Trails
    // ========================================================================

    /// Insert the given trails unless the table already holds any.
    ///
    /// Returns the number of trails written (0 when already seeded).
    pub fn seed_if_empty(&self, trails: Vec<TrailGeometry>) -> Result<usize> {
        self.seed(&[], &trails, &[])
    }

    /// Store the mountains, trails and POIs of an ingest run unless trails are
    /// already present. Returns the number of trails written.
    pub fn seed_catalog_if_empty(
        &self,
        mountains: &[MountainConfig],
        report: &IngestReport,
    ) -> Result<usize> {
        self.seed(mountains, &report.trails, &report.pois)
    }

    fn seed(
        &self,
        mountains: &[MountainConfig],
        trails: &[TrailGeometry],
        pois: &[Poi],
    ) -> Result<usize> {
        let existing = self.trail_count()?;
        if existing > 0 {
            info!("[SqliteRepository] Already seeded with {} trails", existing);
            return Ok(0);
        }

        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        for mountain in mountains {
            tx.execute(
                "INSERT OR REPLACE INTO mountains (id, name, description, region, lat, lng, altitude)
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
                params![
                    mountain.id,
                    mountain.name,
                    mountain.description,
                    mountain.region,
                    mountain.lat,
                    mountain.lng,
                    mountain.altitude
                ],
            )?;
        }
        for trail in trails {
            store_trail(&tx, trail)?;
        }
        for poi in pois {
            tx.execute(
                "INSERT OR REPLACE INTO pois (id, mountain_id, name, poi_type, lat, lng, elevation)
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
                params![
                    poi.id,
                    poi.mountain_id,
                    poi.name,
                    poi.poi_type,
                    poi.latitude,
                    poi.longitude,
                    poi.elevation
                ],
            )?;
        }
        tx.commit()?;

        info!(
            "[SqliteRepository] Seeded {} mountains, {} trails, {} POIs",
            mountains.len(),
            trails.len(),
            pois.len()
        );
        Ok(trails.len())
    }

    /// Stored mountains by id. Track lists are not stored; trails carry their
    /// mountain id instead.
    pub fn mountains(&self) -> Result<Vec<MountainConfig>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, name, description, region, lat, lng, altitude FROM mountains ORDER BY id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(MountainConfig {
                id: row.get(0)?,
                name: row.get(1)?,
                description: row.get(2)?,
                region: row.get(3)?,
                lat: row.get(4)?,
                lng: row.get(5)?,
                altitude: row.get(6)?,
                tracks: Vec::new(),
                poi_file: None,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn pois_for_mountain(&self, mountain_id: &str) -> Result<Vec<Poi>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, mountain_id, name, poi_type, lat, lng, elevation
             FROM pois WHERE mountain_id = ? ORDER BY id",
        )?;
        let rows = stmt.query_map(params![mountain_id], |row| {
            Ok(Poi {
                id: row.get(0)?,
                mountain_id: row.get(1)?,
                name: row.get(2)?,
                poi_type: row.get(3)?,
                latitude: row.get(4)?,
                longitude: row.get(5)?,
                elevation: row.get(6)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn get_trail(&self, id: &str) -> Result<Option<TrailGeometry>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!("{} WHERE id = ?", SELECT_TRAIL))?;
        let row = stmt
            .query_row(params![id], |row| Ok(read_trail_row(row)))
            .optional()?;
        row.transpose()
    }

    /// Build an in-memory index over every stored trail.
    pub fn load_index(&self) -> Result<TrailIndex> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!("{} ORDER BY id", SELECT_TRAIL))?;
        let rows = stmt.query_map([], |row| Ok(read_trail_row(row)))?;

        let mut trails = Vec::new();
        for row in rows {
            trails.push(row??);
        }
        Ok(TrailIndex::bulk_load(trails))
    }

    // ========================================================================
    // Breadcrumbs
    // ========================================================================

    /// Breadcrumbs not yet handed off, oldest first.
    pub fn unsynced_breadcrumbs(&self) -> Result<Vec<StoredBreadcrumb>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, session_id, latitude, longitude, altitude, accuracy, bearing, speed,
                    timestamp_ms, synced
             FROM breadcrumbs WHERE synced = 0 ORDER BY timestamp_ms, id",
        )?;
        let rows = stmt.query_map([], read_breadcrumb_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Flag the given breadcrumb rows as synced. Returns the number updated.
    pub fn mark_synced(&self, ids: &[i64]) -> Result<usize> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let mut updated = 0;
        {
            let mut stmt = tx.prepare("UPDATE breadcrumbs SET synced = 1 WHERE id = ?")?;
            for id in ids {
                updated += stmt.execute(params![id])?;
            }
        }
        tx.commit()?;
        debug!("[SqliteRepository] Marked {} breadcrumbs synced", updated);
        Ok(updated)
    }

    pub fn breadcrumb_count(&self, session_id: &str) -> Result<usize> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM breadcrumbs WHERE session_id = ?",
            params![session_id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }
}

impl NavigationRepository for SqliteRepository {
    fn save_breadcrumb(&self, breadcrumb: &Breadcrumb) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO breadcrumbs (session_id, latitude, longitude, altitude, accuracy, bearing, speed, timestamp_ms, synced)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                breadcrumb.session_id,
                breadcrumb.latitude,
                breadcrumb.longitude,
                breadcrumb.altitude,
                breadcrumb.accuracy,
                breadcrumb.bearing,
                breadcrumb.speed,
                breadcrumb.timestamp_ms,
                breadcrumb.synced
            ],
        )?;
        Ok(())
    }

    fn nearby_trails(
        &self,
        point: &GpsPoint,
        padding_degrees: f64,
    ) -> Result<Vec<Arc<TrailGeometry>>> {
        let window = Bounds::around(point, padding_degrees);
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "{} WHERE max_lat >= ?1 AND min_lat <= ?2 AND max_lng >= ?3 AND min_lng <= ?4 ORDER BY id",
            SELECT_TRAIL
        ))?;
        let rows = stmt.query_map(
            params![window.min_lat, window.max_lat, window.min_lng, window.max_lng],
            |row| Ok(read_trail_row(row)),
        )?;

        let mut trails = Vec::new();
        for row in rows {
            match row? {
                Ok(trail) => trails.push(Arc::new(trail)),
                Err(e) => warn!("[SqliteRepository] Skipping undecodable trail: {}", e),
            }
        }
        Ok(trails)
    }

    fn insert_trail(&self, trail: TrailGeometry) -> Result<()> {
        let conn = self.conn()?;
        store_trail(&conn, &trail)
    }

    fn trail_count(&self) -> Result<usize> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM trails", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

const SELECT_TRAIL: &str = "SELECT id, mountain_id, name, min_lat, max_lat, min_lng, max_lng,
        difficulty, distance_meters, elevation_gain, is_official, points FROM trails";

fn store_trail(conn: &Connection, trail: &TrailGeometry) -> Result<()> {
    let points_blob = rmp_serde::to_vec_named(&trail.points)?;
    conn.execute(
        "INSERT OR REPLACE INTO trails (id, mountain_id, name, min_lat, max_lat, min_lng, max_lng,
            difficulty, distance_meters, elevation_gain, is_official, points, point_count)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        params![
            trail.id,
            trail.mountain_id,
            trail.name,
            trail.bounds.min_lat,
            trail.bounds.max_lat,
            trail.bounds.min_lng,
            trail.bounds.max_lng,
            trail.difficulty,
            trail.distance_meters,
            trail.elevation_gain,
            trail.is_official,
            points_blob,
            trail.points.len() as i64
        ],
    )?;
    Ok(())
}

/// Decode one trail row. The outer result is SQLite's, the inner one covers
/// blob decoding so a single bad row can be skipped.
fn read_trail_row(row: &Row<'_>) -> Result<TrailGeometry> {
    let blob: Vec<u8> = row.get(11)?;
    let points: Vec<TrailPoint> = rmp_serde::from_slice(&blob)?;

    Ok(TrailGeometry {
        id: row.get(0)?,
        mountain_id: row.get(1)?,
        name: row.get(2)?,
        bounds: Bounds {
            min_lat: row.get(3)?,
            max_lat: row.get(4)?,
            min_lng: row.get(5)?,
            max_lng: row.get(6)?,
        },
        difficulty: row.get(7)?,
        distance_meters: row.get(8)?,
        elevation_gain: row.get(9)?,
        is_official: row.get(10)?,
        points,
    })
}

fn read_breadcrumb_row(row: &Row<'_>) -> rusqlite::Result<StoredBreadcrumb> {
    Ok(StoredBreadcrumb {
        id: row.get(0)?,
        breadcrumb: Breadcrumb {
            session_id: row.get(1)?,
            latitude: row.get(2)?,
            longitude: row.get(3)?,
            altitude: row.get(4)?,
            accuracy: row.get(5)?,
            bearing: row.get(6)?,
            speed: row.get(7)?,
            timestamp_ms: row.get(8)?,
            synced: row.get(9)?,
        },
    })
}

#[cfg(all(test, feature = "persistence"))]
mod tests {
    use super::*;
    use crate::{PositionEstimate, RawFix};

    fn trail(id: &str, lat: f64, lng: f64) -> TrailGeometry {
        TrailGeometry::from_points(
            id,
            "semeru",
            id,
            vec![
                TrailPoint::with_elevation(lat, lng, 2100.0),
                TrailPoint::with_elevation(lat, lng + 0.001, 2150.0),
            ],
        )
        .unwrap()
    }

    fn crumb(session: &str, ts: i64) -> Breadcrumb {
        let fix = RawFix::new(-8.1, 112.9, 6.0, ts);
        let estimate = PositionEstimate {
            latitude: -8.1,
            longitude: 112.9,
            variance_meters2: 36.0,
            timestamp_ms: ts,
        };
        Breadcrumb::from_estimate(session, &estimate, &fix)
    }

    #[test]
    fn test_create_repository() {
        let repo = SqliteRepository::in_memory().unwrap();
        assert_eq!(repo.trail_count().unwrap(), 0);
    }

    #[test]
    fn test_trail_round_trip_keeps_metadata() {
        let repo = SqliteRepository::in_memory().unwrap();
        let original = trail("semeru_ranu_pani", -8.0, 112.9);
        repo.insert_trail(original.clone()).unwrap();

        let loaded = repo.get_trail("semeru_ranu_pani").unwrap().unwrap();
        assert_eq!(loaded, original);
        assert!(repo.get_trail("missing").unwrap().is_none());
    }

    #[test]
    fn test_nearby_query_filters_by_bounds() {
        let repo = SqliteRepository::in_memory().unwrap();
        repo.insert_trail(trail("near", 0.0, 0.0)).unwrap();
        repo.insert_trail(trail("far", 1.0, 1.0)).unwrap();

        let found = repo.nearby_trails(&GpsPoint::new(0.001, 0.0005), 0.002).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, "near");

        // Matches the in-memory index for the same data
        let index = repo.load_index().unwrap();
        assert_eq!(index.query(&GpsPoint::new(0.001, 0.0005), 0.002).len(), 1);
        assert_eq!(index.len(), 2);
    }

    #[test]
    fn test_insert_replaces_same_id() {
        let repo = SqliteRepository::in_memory().unwrap();
        repo.insert_trail(trail("t", 0.0, 0.0)).unwrap();
        repo.insert_trail(trail("t", 5.0, 5.0)).unwrap();
        assert_eq!(repo.trail_count().unwrap(), 1);
        assert!(repo.nearby_trails(&GpsPoint::new(0.0, 0.0), 0.002).unwrap().is_empty());
    }

    #[test]
    fn test_seed_skipped_when_populated() {
        let repo = SqliteRepository::in_memory().unwrap();
        assert_eq!(repo.seed_if_empty(vec![trail("a", 0.0, 0.0), trail("b", 1.0, 1.0)]).unwrap(), 2);
        assert_eq!(repo.seed_if_empty(vec![trail("c", 2.0, 2.0)]).unwrap(), 0);
        assert_eq!(repo.trail_count().unwrap(), 2);
    }

    #[test]
    fn test_catalog_seed_stores_mountains_and_pois() {
        let repo = SqliteRepository::in_memory().unwrap();
        let mountain = MountainConfig {
            id: "semeru".to_string(),
            name: "Gunung Semeru".to_string(),
            description: String::new(),
            region: "Jawa Timur".to_string(),
            lat: -8.1077,
            lng: 112.9224,
            altitude: 3676.0,
            tracks: Vec::new(),
            poi_file: Some("assets/semeru/pois.gpx".to_string()),
        };
        let report = IngestReport {
            trails: vec![trail("semeru_ranu_pani", -8.0, 112.9)],
            pois: vec![Poi {
                id: "semeru_poi_0".to_string(),
                mountain_id: "semeru".to_string(),
                name: "Ranu Kumbolo".to_string(),
                poi_type: "camp".to_string(),
                latitude: -8.04,
                longitude: 112.95,
                elevation: 2400.0,
            }],
            skipped: Vec::new(),
        };

        assert_eq!(repo.seed_catalog_if_empty(&[mountain.clone()], &report).unwrap(), 1);
        assert_eq!(repo.seed_catalog_if_empty(&[mountain], &report).unwrap(), 0);

        let mountains = repo.mountains().unwrap();
        assert_eq!(mountains.len(), 1);
        assert_eq!(mountains[0].region, "Jawa Timur");
        assert_eq!(mountains[0].altitude, 3676.0);
        assert_eq!(repo.pois_for_mountain("semeru").unwrap(), report.pois);
        assert!(repo.pois_for_mountain("arjuno").unwrap().is_empty());
    }

    #[test]
    fn test_breadcrumb_sync_flow() {
        let repo = SqliteRepository::in_memory().unwrap();
        for ts in [3_000, 1_000, 2_000] {
            repo.save_breadcrumb(&crumb("hike", ts)).unwrap();
        }
        assert_eq!(repo.breadcrumb_count("hike").unwrap(), 3);

        let pending = repo.unsynced_breadcrumbs().unwrap();
        let timestamps: Vec<i64> = pending.iter().map(|b| b.breadcrumb.timestamp_ms).collect();
        assert_eq!(timestamps, vec![1_000, 2_000, 3_000]);

        assert_eq!(repo.mark_synced(&[pending[0].id, pending[1].id]).unwrap(), 2);
        let rest = repo.unsynced_breadcrumbs().unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].breadcrumb.timestamp_ms, 3_000);
        assert!(!rest[0].breadcrumb.synced);
    }

    #[test]
    fn test_data_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trails.db");
        let path = path.to_str().unwrap();

        {
            let repo = SqliteRepository::new(path).unwrap();
            repo.insert_trail(trail("kept", 0.0, 0.0)).unwrap();
            repo.save_breadcrumb(&crumb("hike", 1)).unwrap();
        }

        let reopened = SqliteRepository::new(path).unwrap();
        assert_eq!(reopened.trail_count().unwrap(), 1);
        assert_eq!(reopened.breadcrumb_count("hike").unwrap(), 1);
    }
}
