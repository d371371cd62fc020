//! Point location against named boundary polygons.
//!
//! Boundaries come from GeoJSON FeatureCollections whose features carry a
//! `Polygon` or `MultiPolygon` geometry. Each polygon is stored together with
//! its bounding rectangle so most candidates are rejected without an exact
//! ring test.

use geo::{BoundingRect, Coord, Intersects, LineString, MultiPolygon, Polygon, Rect};
use serde_json::Value;
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info};

use crate::config::BoundaryProperties;
use crate::error::{PipelineError, Result};
use crate::model::RegionLabel;

/// How to resolve a point that falls into more than one polygon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TieBreak {
    /// The first containing polygon in dataset order wins.
    #[default]
    FirstMatch,
    /// Ambiguous points resolve to no polygon.
    RequireUnique,
}

impl fmt::Display for TieBreak {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TieBreak::FirstMatch => write!(f, "first-match"),
            TieBreak::RequireUnique => write!(f, "require-unique"),
        }
    }
}

impl FromStr for TieBreak {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "first-match" => Ok(TieBreak::FirstMatch),
            "require-unique" => Ok(TieBreak::RequireUnique),
            other => Err(PipelineError::UnknownOption {
                kind: "tie-break rule",
                value: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoundaryLevel {
    State,
    District,
}

/// A polygon prepared for repeated point queries.
#[derive(Debug, Clone)]
pub struct PreparedPolygon {
    label: RegionLabel,
    bounds: Rect<f64>,
    geometry: MultiPolygon<f64>,
}

impl PreparedPolygon {
    /// Returns `None` for geometries without any coordinates.
    pub fn new(label: RegionLabel, geometry: MultiPolygon<f64>) -> Option<Self> {
        let bounds = geometry.bounding_rect()?;
        Some(Self {
            label,
            bounds,
            geometry,
        })
    }

    pub fn label(&self) -> &RegionLabel {
        &self.label
    }

    /// Boundary points count as covered.
    pub fn covers(&self, point: Coord<f64>) -> bool {
        // 外接矩形で事前判定
        let (min, max) = (self.bounds.min(), self.bounds.max());
        if point.x < min.x || point.x > max.x || point.y < min.y || point.y > max.y {
            return false;
        }
        self.geometry.0.iter().any(|polygon| polygon.intersects(&point))
    }
}

/// Result of a point query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Location<'a> {
    Outside,
    Unique(&'a RegionLabel),
    /// `chosen` is `None` under [`TieBreak::RequireUnique`].
    Ambiguous {
        chosen: Option<&'a RegionLabel>,
        candidates: usize,
    },
}

impl<'a> Location<'a> {
    pub fn label(&self) -> Option<&'a RegionLabel> {
        match *self {
            Location::Outside => None,
            Location::Unique(label) => Some(label),
            Location::Ambiguous { chosen, .. } => chosen,
        }
    }

    pub fn is_ambiguous(&self) -> bool {
        matches!(self, Location::Ambiguous { .. })
    }
}

#[derive(Debug, Clone)]
pub struct PolygonIndex {
    level: BoundaryLevel,
    tie_break: TieBreak,
    polygons: Vec<PreparedPolygon>,
}

impl PolygonIndex {
    pub fn new(level: BoundaryLevel, tie_break: TieBreak, polygons: Vec<PreparedPolygon>) -> Self {
        Self {
            level,
            tie_break,
            polygons,
        }
    }

    /// Loads a boundary dataset. Any missing label or unusable geometry is
    /// fatal, since every later decision depends on this data.
    pub fn from_path(
        path: &Path,
        level: BoundaryLevel,
        properties: &BoundaryProperties,
        tie_break: TieBreak,
    ) -> Result<Self> {
        if !path.exists() {
            return Err(PipelineError::BoundaryMissing {
                path: path.to_path_buf(),
            });
        }

        let text = fs::read_to_string(path).map_err(|source| PipelineError::BoundaryRead {
            path: path.to_path_buf(),
            source,
        })?;
        let index = Self::from_geojson_str(&text, path, level, properties, tie_break)?;

        info!(
            "Loaded {} {:?} boundaries from {:?}",
            index.len(),
            level,
            path
        );
        Ok(index)
    }

    /// `path` is only used in error messages.
    pub fn from_geojson_str(
        text: &str,
        path: &Path,
        level: BoundaryLevel,
        properties: &BoundaryProperties,
        tie_break: TieBreak,
    ) -> Result<Self> {
        let format_error = |reason: String| PipelineError::BoundaryFormat {
            path: path.to_path_buf(),
            reason,
        };

        let root: Value = serde_json::from_str(text).map_err(|e| format_error(e.to_string()))?;
        let features = root
            .get("features")
            .and_then(Value::as_array)
            .ok_or_else(|| format_error("missing 'features' array".to_string()))?;

        let mut polygons = Vec::with_capacity(features.len());
        for (index, feature) in features.iter().enumerate() {
            let label = read_label(feature, level, properties).map_err(|property| {
                PipelineError::MissingBoundaryProperty {
                    path: path.to_path_buf(),
                    index,
                    property,
                }
            })?;

            let invalid = |reason: String| PipelineError::InvalidGeometry {
                path: path.to_path_buf(),
                index,
                reason,
            };
            let geometry = feature
                .get("geometry")
                .filter(|g| !g.is_null())
                .ok_or_else(|| invalid("geometry is missing".to_string()))?;
            let geometry = parse_geometry(geometry).map_err(invalid)?;
            let prepared = PreparedPolygon::new(label, geometry)
                .ok_or_else(|| invalid("geometry has no coordinates".to_string()))?;
            polygons.push(prepared);
        }

        Ok(Self::new(level, tie_break, polygons))
    }

    pub fn level(&self) -> BoundaryLevel {
        self.level
    }

    pub fn len(&self) -> usize {
        self.polygons.len()
    }

    pub fn is_empty(&self) -> bool {
        self.polygons.is_empty()
    }

    pub fn query(&self, point: Coord<f64>) -> Location<'_> {
        let mut hits = self.polygons.iter().filter(|p| p.covers(point));

        let Some(first) = hits.next() else {
            return Location::Outside;
        };
        let extra = hits.count();
        if extra == 0 {
            return Location::Unique(first.label());
        }

        debug!(
            "Point ({}, {}) lies in {} {:?} polygons",
            point.x,
            point.y,
            extra + 1,
            self.level
        );
        let chosen = match self.tie_break {
            TieBreak::FirstMatch => Some(first.label()),
            TieBreak::RequireUnique => None,
        };
        Location::Ambiguous {
            chosen,
            candidates: extra + 1,
        }
    }

    pub fn locate(&self, point: Coord<f64>) -> Option<&RegionLabel> {
        self.query(point).label()
    }
}

/// Reads the label properties; the error carries the offending property name.
fn read_label(
    feature: &Value,
    level: BoundaryLevel,
    properties: &BoundaryProperties,
) -> std::result::Result<RegionLabel, String> {
    let text = |key: &str| -> std::result::Result<String, String> {
        feature
            .get("properties")
            .and_then(|p| p.get(key))
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .ok_or_else(|| key.to_string())
    };

    match level {
        BoundaryLevel::State => Ok(RegionLabel::state(text(&properties.state_name)?)),
        BoundaryLevel::District => Ok(RegionLabel::district(
            text(&properties.district_state)?,
            text(&properties.district_name)?,
        )),
    }
}

fn parse_geometry(geometry: &Value) -> std::result::Result<MultiPolygon<f64>, String> {
    let kind = geometry
        .get("type")
        .and_then(Value::as_str)
        .ok_or("geometry has no type")?;
    let coordinates = geometry
        .get("coordinates")
        .ok_or("geometry has no coordinates")?;

    match kind {
        "Polygon" => Ok(MultiPolygon::new(vec![parse_polygon(coordinates)?])),
        "MultiPolygon" => {
            let parts = coordinates
                .as_array()
                .ok_or("MultiPolygon coordinates are not an array")?;
            let polygons = parts
                .iter()
                .map(parse_polygon)
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(MultiPolygon::new(polygons))
        }
        other => Err(format!("unsupported geometry type '{}'", other)),
    }
}

fn parse_polygon(value: &Value) -> std::result::Result<Polygon<f64>, String> {
    let rings = value.as_array().ok_or("polygon rings are not an array")?;
    let mut rings = rings.iter().map(parse_ring);

    let exterior = rings.next().ok_or("polygon has no exterior ring")??;
    let interiors = rings.collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(Polygon::new(exterior, interiors))
}

fn parse_ring(value: &Value) -> std::result::Result<LineString<f64>, String> {
    let positions = value.as_array().ok_or("ring is not an array")?;
    if positions.len() < 3 {
        return Err(format!("ring has {} positions, need at least 3", positions.len()));
    }

    positions
        .iter()
        .map(|position| {
            let x = position.get(0).and_then(Value::as_f64);
            let y = position.get(1).and_then(Value::as_f64);
            match (x, y) {
                (Some(x), Some(y)) => Ok(Coord { x, y }),
                _ => Err(format!("invalid position {}", position)),
            }
        })
        .collect::<std::result::Result<Vec<_>, _>>()
        .map(LineString::new)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn square(x0: f64, y0: f64, x1: f64, y1: f64) -> MultiPolygon<f64> {
        let ring = LineString::from(vec![(x0, y0), (x1, y0), (x1, y1), (x0, y1), (x0, y0)]);
        MultiPolygon::new(vec![Polygon::new(ring, vec![])])
    }

    fn overlapping_index(tie_break: TieBreak) -> PolygonIndex {
        let polygons = vec![
            PreparedPolygon::new(RegionLabel::state("Berlin"), square(13.0, 52.3, 13.8, 52.7)).unwrap(),
            PreparedPolygon::new(RegionLabel::state("Brandenburg"), square(11.2, 51.3, 13.2, 53.6)).unwrap(),
        ];
        PolygonIndex::new(BoundaryLevel::State, tie_break, polygons)
    }

    #[test]
    fn test_locate_unique_and_outside() {
        let index = overlapping_index(TieBreak::FirstMatch);

        let berlin = index.query(Coord { x: 13.4, y: 52.5 });
        assert_eq!(berlin, Location::Unique(&RegionLabel::state("Berlin")));

        assert_eq!(index.locate(Coord { x: 8.0, y: 50.0 }), None);
    }

    #[test]
    fn test_ambiguous_first_match() {
        let index = overlapping_index(TieBreak::FirstMatch);
        let location = index.query(Coord { x: 13.1, y: 52.5 });

        assert!(location.is_ambiguous());
        assert_eq!(location.label(), Some(&RegionLabel::state("Berlin")));
    }

    #[test]
    fn test_ambiguous_require_unique() {
        let index = overlapping_index(TieBreak::RequireUnique);
        let location = index.query(Coord { x: 13.1, y: 52.5 });

        assert_eq!(
            location,
            Location::Ambiguous {
                chosen: None,
                candidates: 2
            }
        );
    }

    #[test]
    fn test_boundary_point_is_covered() {
        let index = overlapping_index(TieBreak::FirstMatch);
        assert_eq!(
            index.locate(Coord { x: 13.8, y: 52.5 }),
            Some(&RegionLabel::state("Berlin"))
        );
    }

    #[test]
    fn test_hole_is_not_covered() {
        let exterior = LineString::from(vec![(0.0, 0.0), (10.0, 0.0), (10.0, 10.0), (0.0, 10.0)]);
        let hole = LineString::from(vec![(4.0, 4.0), (6.0, 4.0), (6.0, 6.0), (4.0, 6.0)]);
        let geometry = MultiPolygon::new(vec![Polygon::new(exterior, vec![hole])]);
        let polygon = PreparedPolygon::new(RegionLabel::state("Ring"), geometry).unwrap();

        assert!(polygon.covers(Coord { x: 1.0, y: 1.0 }));
        assert!(!polygon.covers(Coord { x: 5.0, y: 5.0 }));
    }

    #[test]
    fn test_from_geojson_districts() {
        let text = r#"{
            "type": "FeatureCollection",
            "features": [
                {
                    "type": "Feature",
                    "properties": {"NAME_1": "Berlin", "NAME_2": "Mitte"},
                    "geometry": {
                        "type": "MultiPolygon",
                        "coordinates": [[[[13.3, 52.5], [13.45, 52.5], [13.45, 52.56], [13.3, 52.56], [13.3, 52.5]]]]
                    }
                }
            ]
        }"#;

        let index = PolygonIndex::from_geojson_str(
            text,
            &PathBuf::from("districts.geojson"),
            BoundaryLevel::District,
            &BoundaryProperties::default(),
            TieBreak::FirstMatch,
        )
        .unwrap();

        assert_eq!(index.len(), 1);
        assert_eq!(index.level(), BoundaryLevel::District);
        assert_eq!(
            index.locate(Coord { x: 13.4, y: 52.52 }),
            Some(&RegionLabel::district("Berlin", "Mitte"))
        );
    }

    #[test]
    fn test_from_geojson_missing_name_is_fatal() {
        let text = r#"{"features": [{"properties": {"GEN": "Berlin"},
            "geometry": {"type": "Polygon", "coordinates": [[[0, 0], [1, 0], [1, 1], [0, 0]]]}}]}"#;

        let err = PolygonIndex::from_geojson_str(
            text,
            &PathBuf::from("states.geojson"),
            BoundaryLevel::State,
            &BoundaryProperties::default(),
            TieBreak::FirstMatch,
        )
        .unwrap_err();

        match err {
            PipelineError::MissingBoundaryProperty { index, property, .. } => {
                assert_eq!(index, 0);
                assert_eq!(property, "name");
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_from_geojson_rejects_point_geometry() {
        let text = r#"{"features": [{"properties": {"name": "Berlin"},
            "geometry": {"type": "Point", "coordinates": [13.4, 52.5]}}]}"#;

        let err = PolygonIndex::from_geojson_str(
            text,
            &PathBuf::from("states.geojson"),
            BoundaryLevel::State,
            &BoundaryProperties::default(),
            TieBreak::FirstMatch,
        )
        .unwrap_err();
        assert!(matches!(err, PipelineError::InvalidGeometry { .. }));
    }

    #[test]
    fn test_from_path_missing_file() {
        let err = PolygonIndex::from_path(
            Path::new("/nonexistent/states.geojson"),
            BoundaryLevel::State,
            &BoundaryProperties::default(),
            TieBreak::FirstMatch,
        )
        .unwrap_err();
        assert!(matches!(err, PipelineError::BoundaryMissing { .. }));
    }
}
