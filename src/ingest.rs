//! Trail ingestion: geometry payloads, GPX assets and mountain configuration.
//!
//! Geometry parsing only produces an ordered list of [`TrailPoint`]s. Accepted
//! JSON payloads:
//!
//! - GeoJSON-style arrays: `[[lng, lat], [lng, lat, ele], ...]`
//! - Point objects: `[{"lat": .., "lng": .., "ele": ..}, ...]`
//! - A LineString document: `{"type": "LineString", "coordinates": [...]}`
//!
//! Track files ending in `.gpx` are read with the `gpx` crate instead: every
//! `<trk>` becomes one trail (its segments joined in order) and `<wpt>`
//! elements of a mountain's `poi_file` become [`Poi`]s.
//!
//! Point order is preserved and nothing is deduplicated.

use std::collections::HashMap;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

use crate::error::{Result, TrailSentinelError};
use crate::{Poi, TrailGeometry, TrailPoint};

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawCoordinate {
    /// `[lng, lat]` or `[lng, lat, ele]`
    Array(Vec<f64>),
    Object {
        lat: f64,
        #[serde(alias = "lon")]
        lng: f64,
        #[serde(default, alias = "elevation")]
        ele: Option<f64>,
    },
}

impl RawCoordinate {
    fn into_point(self, index: usize) -> Result<TrailPoint> {
        match self {
            RawCoordinate::Array(values) => match values.as_slice() {
                [lng, lat] => Ok(TrailPoint::new(*lat, *lng)),
                [lng, lat, ele, ..] => Ok(TrailPoint::with_elevation(*lat, *lng, *ele)),
                _ => Err(TrailSentinelError::ParseError {
                    message: format!(
                        "coordinate {} has {} values, expected [lng, lat, ele?]",
                        index,
                        values.len()
                    ),
                }),
            },
            RawCoordinate::Object { lat, lng, ele } => Ok(TrailPoint {
                latitude: lat,
                longitude: lng,
                elevation: ele,
            }),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum GeometryPayload {
    Coordinates(Vec<RawCoordinate>),
    LineString { coordinates: Vec<RawCoordinate> },
}

/// Parse a geometry payload into ordered trail points.
pub fn parse_geometry_json(json: &str) -> Result<Vec<TrailPoint>> {
    let payload: GeometryPayload = serde_json::from_str(json)?;
    let coordinates = match payload {
        GeometryPayload::Coordinates(c) => c,
        GeometryPayload::LineString { coordinates } => coordinates,
    };

    coordinates
        .into_iter()
        .enumerate()
        .map(|(i, c)| c.into_point(i))
        .collect()
}

// ============================================================================
// GPX
// ============================================================================

/// One `<trk>` of a GPX document.
#[derive(Debug, Clone, PartialEq)]
pub struct GpxTrack {
    pub name: Option<String>,
    pub points: Vec<TrailPoint>,
}

/// Read every track of a GPX document, segments concatenated in order.
pub fn parse_gpx_tracks(xml: &str) -> Result<Vec<GpxTrack>> {
    let gpx = gpx::read(xml.as_bytes())?;

    Ok(gpx
        .tracks
        .into_iter()
        .map(|track| {
            let points = track
                .segments
                .into_iter()
                .flat_map(|segment| segment.points)
                .map(|waypoint| {
                    let point = waypoint.point();
                    TrailPoint {
                        latitude: point.y(),
                        longitude: point.x(),
                        elevation: waypoint.elevation,
                    }
                })
                .collect();
            GpxTrack {
                name: track.name,
                points,
            }
        })
        .collect())
}

/// Read the waypoints of a GPX document as points of interest.
///
/// Ids are `{mountain}_poi_{index}` in document order. Types are
/// lowercased; a missing elevation reads as 0.
pub fn parse_gpx_pois(xml: &str, mountain_id: &str) -> Result<Vec<Poi>> {
    let gpx = gpx::read(xml.as_bytes())?;

    Ok(gpx
        .waypoints
        .into_iter()
        .enumerate()
        .map(|(i, waypoint)| {
            let point = waypoint.point();
            Poi {
                id: format!("{}_poi_{}", mountain_id, i),
                mountain_id: mountain_id.to_string(),
                name: waypoint.name.unwrap_or_default(),
                poi_type: waypoint.type_.unwrap_or_default().to_lowercase(),
                latitude: point.y(),
                longitude: point.x(),
                elevation: waypoint.elevation.unwrap_or(0.0),
            }
        })
        .collect())
}

fn is_gpx(file: &str) -> bool {
    file.to_ascii_lowercase().ends_with(".gpx")
}

/// Parse a track payload by file type. JSON payloads yield one unnamed track.
fn parse_track_payload(file: &str, payload: &str) -> Result<Vec<GpxTrack>> {
    if is_gpx(file) {
        parse_gpx_tracks(payload)
    } else {
        Ok(vec![GpxTrack {
            name: None,
            points: parse_geometry_json(payload)?,
        }])
    }
}

// ============================================================================
// Mountain configuration
// ============================================================================

/// One track file listed under a mountain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackConfig {
    /// Location of the geometry payload (`.gpx` or JSON), resolved by the
    /// caller's loader
    pub file: String,
    /// Display name. When empty the GPX track name is used.
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_difficulty")]
    pub difficulty: u8,
    #[serde(default = "default_official")]
    pub is_official: bool,
}

fn default_difficulty() -> u8 {
    1
}

fn default_official() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MountainConfig {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub region: String,
    #[serde(default)]
    pub lat: f64,
    #[serde(default)]
    pub lng: f64,
    /// Summit altitude in meters
    #[serde(default)]
    pub altitude: f64,
    #[serde(default)]
    pub tracks: Vec<TrackConfig>,
    /// GPX file whose waypoints are the mountain's points of interest
    #[serde(default)]
    pub poi_file: Option<String>,
}

/// Root of the bundled `mountains.json` document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MountainsConfig {
    #[serde(default)]
    pub mountains: Vec<MountainConfig>,
}

impl MountainsConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn track_count(&self) -> usize {
        self.mountains.iter().map(|m| m.tracks.len()).sum()
    }
}

/// Track that could not be turned into a queryable trail.
#[derive(Debug, Clone, PartialEq)]
pub struct SkippedTrack {
    pub mountain_id: String,
    pub file: String,
    pub reason: String,
}

/// Result of [`load_mountains`].
#[derive(Debug, Default)]
pub struct IngestReport {
    pub trails: Vec<TrailGeometry>,
    pub pois: Vec<Poi>,
    /// Track and POI files that produced nothing
    pub skipped: Vec<SkippedTrack>,
}

/// `{mountain}_{name}` with the name lowercased and every character outside
/// `[a-z0-9]` replaced by `_`.
pub fn trail_slug(mountain_id: &str, name: &str) -> String {
    let name: String = name
        .to_lowercase()
        .chars()
        .map(|c| {
            if c.is_ascii_lowercase() || c.is_ascii_digit() {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!("{}_{}", mountain_id, name)
}

/// Build every trail and point of interest listed in `config`.
///
/// `asset_loader` maps a track's `file` (or a mountain's `poi_file`) to its
/// contents. Tracks whose payload fails to load or parse, or that have fewer
/// than two points, are logged and reported in [`IngestReport::skipped`].
/// Trail ids follow [`trail_slug`]; repeated slugs get `_2`, `_3`, ...
/// suffixes in config order.
pub fn load_mountains<F>(config: &MountainsConfig, asset_loader: F) -> IngestReport
where
    F: Fn(&str) -> Result<String> + Sync,
{
    let jobs: Vec<(&MountainConfig, &TrackConfig)> = config
        .mountains
        .iter()
        .flat_map(|m| m.tracks.iter().map(move |t| (m, t)))
        .collect();

    let load = |(_, track): &(&MountainConfig, &TrackConfig)| {
        asset_loader(&track.file).and_then(|payload| parse_track_payload(&track.file, &payload))
    };

    #[cfg(feature = "parallel")]
    let parsed: Vec<Result<Vec<GpxTrack>>> = jobs.par_iter().map(load).collect();

    #[cfg(not(feature = "parallel"))]
    let parsed: Vec<Result<Vec<GpxTrack>>> = jobs.iter().map(load).collect();

    let mut report = IngestReport::default();
    let mut seen: HashMap<String, usize> = HashMap::new();

    for ((mountain, track), tracks) in jobs.into_iter().zip(parsed) {
        let skip = |reason: String| {
            warn!(
                "[Ingest] Skipping track '{}' of {}: {}",
                track.file, mountain.id, reason
            );
            SkippedTrack {
                mountain_id: mountain.id.clone(),
                file: track.file.clone(),
                reason,
            }
        };

        let tracks = match tracks {
            Ok(t) if t.is_empty() => {
                report.skipped.push(skip("no tracks in file".to_string()));
                continue;
            }
            Ok(t) => t,
            Err(e) => {
                report.skipped.push(skip(e.to_string()));
                continue;
            }
        };

        for parsed in tracks {
            if parsed.points.len() < 2 {
                report.skipped.push(skip(format!(
                    "{} points, at least 2 required",
                    parsed.points.len()
                )));
                continue;
            }

            let name = if track.name.is_empty() {
                parsed.name.unwrap_or_else(|| track.file.clone())
            } else {
                track.name.clone()
            };

            let base = trail_slug(&mountain.id, &name);
            let count = seen.entry(base.clone()).or_insert(0);
            *count += 1;
            let id = if *count == 1 {
                base
            } else {
                format!("{}_{}", base, count)
            };

            match TrailGeometry::from_points(&id, &mountain.id, &name, parsed.points) {
                Ok(mut trail) => {
                    trail.difficulty = track.difficulty;
                    trail.is_official = track.is_official;
                    debug!(
                        "[Ingest] {} -> {} ({} points, {:.0} m)",
                        track.file,
                        trail.id,
                        trail.points.len(),
                        trail.distance_meters
                    );
                    report.trails.push(trail);
                }
                Err(e) => report.skipped.push(skip(e.to_string())),
            }
        }
    }

    for mountain in &config.mountains {
        let Some(file) = mountain.poi_file.as_deref().filter(|f| !f.is_empty()) else {
            continue;
        };
        match asset_loader(file).and_then(|xml| parse_gpx_pois(&xml, &mountain.id)) {
            Ok(pois) => {
                debug!("[Ingest] {} -> {} POIs for {}", file, pois.len(), mountain.id);
                report.pois.extend(pois);
            }
            Err(e) => {
                warn!("[Ingest] Skipping POI file '{}' of {}: {}", file, mountain.id, e);
                report.skipped.push(SkippedTrack {
                    mountain_id: mountain.id.clone(),
                    file: file.to_string(),
                    reason: e.to_string(),
                });
            }
        }
    }

    info!(
        "[Ingest] Loaded {} trails and {} POIs from {} mountains ({} skipped)",
        report.trails.len(),
        report.pois.len(),
        config.mountains.len(),
        report.skipped.len()
    );
    report
}

/// Self-contained trail record, as handed over the FFI boundary.
#[derive(Debug, Clone, Deserialize)]
pub struct TrailDocument {
    pub id: String,
    #[serde(default)]
    pub mountain_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_difficulty")]
    pub difficulty: u8,
    #[serde(default = "default_official")]
    pub is_official: bool,
    pub coordinates: serde_json::Value,
}

/// Parse a JSON array of [`TrailDocument`]s, skipping invalid entries.
pub fn parse_trail_documents(json: &str) -> Result<IngestReport> {
    let docs: Vec<TrailDocument> = serde_json::from_str(json)?;
    let mut report = IngestReport::default();

    for doc in docs {
        let built = parse_geometry_json(&doc.coordinates.to_string()).and_then(|points| {
            TrailGeometry::from_points(&doc.id, &doc.mountain_id, &doc.name, points)
        });
        match built {
            Ok(mut trail) => {
                trail.difficulty = doc.difficulty;
                trail.is_official = doc.is_official;
                report.trails.push(trail);
            }
            Err(e) => {
                warn!("[Ingest] Skipping trail '{}': {}", doc.id, e);
                report.skipped.push(SkippedTrack {
                    mountain_id: doc.mountain_id,
                    file: doc.id,
                    reason: e.to_string(),
                });
            }
        }
    }
    Ok(report)
}
