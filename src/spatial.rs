use std::fmt;
use std::path::{Path, PathBuf};

use log::{debug, warn};
use tempfile::TempDir;

use crate::error::{Error, Result};
use crate::geometry::{CommunityLookup, FeatureSource, GeometryKind, WGS84_EPSG};

/// One parameterization of "where" for an upstream query.
#[derive(Debug, Clone, PartialEq)]
pub enum SpatialTerm {
    StationName(String),
    Proximity { lon: f64, lat: f64, radius_km: f64 },
    BoundingBox { min_lon: f64, min_lat: f64, max_lon: f64, max_lat: f64 },
}

impl SpatialTerm {
    /// Query parameters for this term, in the order the API documents them.
    pub fn query_pairs(&self) -> Vec<(&'static str, String)> {
        match self {
            SpatialTerm::StationName(name) => vec![("stationName", name.clone())],
            SpatialTerm::Proximity { lon, lat, radius_km } => vec![
                ("point", format!("{lon},{lat}")),
                ("distance", radius_km.to_string()),
            ],
            SpatialTerm::BoundingBox {
                min_lon,
                min_lat,
                max_lon,
                max_lat,
            } => vec![(
                "boundingBox",
                format!("{min_lon},{min_lat},{max_lon},{max_lat}"),
            )],
        }
    }
}

impl fmt::Display for SpatialTerm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let pairs = self.query_pairs();
        for (i, (k, v)) in pairs.iter().enumerate() {
            if i > 0 {
                f.write_str("&")?;
            }
            write!(f, "{k}={v}")?;
        }
        Ok(())
    }
}

/// What the caller asked to query, after validation.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryTarget {
    Stations(Vec<String>),
    Communities { names: Vec<String>, radius_km: f64 },
    FeatureFile { path: PathBuf, radius_km: Option<f64> },
}

/// Where the spatial terms came from; drives the output file label.
#[derive(Debug, Clone, PartialEq)]
pub enum TargetOrigin {
    Stations(Vec<String>),
    Communities { names: Vec<String>, radius_km: f64 },
    Points { stem: String, radius_km: f64 },
    Polygons { stem: String },
}

#[derive(Debug)]
pub struct ResolvedTargets {
    pub terms: Vec<SpatialTerm>,
    pub origin: TargetOrigin,
    /// Reprojection scratch space; removed when dropped.
    pub workspace: Option<TempDir>,
}

pub struct SpatialTargetResolver<'a> {
    features: &'a dyn FeatureSource,
    communities: Option<&'a dyn CommunityLookup>,
}

impl<'a> SpatialTargetResolver<'a> {
    pub fn new(features: &'a dyn FeatureSource) -> Self {
        Self {
            features,
            communities: None,
        }
    }

    pub fn with_communities(mut self, communities: &'a dyn CommunityLookup) -> Self {
        self.communities = Some(communities);
        self
    }

    /// Resolve `target` into spatial terms. Any reprojected copy of a feature
    /// file is written below `work_root`.
    pub fn resolve(&self, target: &QueryTarget, work_root: &Path) -> Result<ResolvedTargets> {
        match target {
            QueryTarget::Stations(names) => Ok(ResolvedTargets {
                terms: station_terms(names),
                origin: TargetOrigin::Stations(names.clone()),
                workspace: None,
            }),
            QueryTarget::Communities { names, radius_km } => {
                let lookup = self.communities.ok_or_else(|| {
                    Error::InvalidParameter("no community lookup is configured".into())
                })?;
                Ok(ResolvedTargets {
                    terms: community_terms(lookup, names, *radius_km),
                    origin: TargetOrigin::Communities {
                        names: names.clone(),
                        radius_km: *radius_km,
                    },
                    workspace: None,
                })
            }
            QueryTarget::FeatureFile { path, radius_km } => {
                self.resolve_feature_file(path, *radius_km, work_root)
            }
        }
    }

    fn resolve_feature_file(
        &self,
        path: &Path,
        radius_km: Option<f64>,
        work_root: &Path,
    ) -> Result<ResolvedTargets> {
        if !path.exists() {
            return Err(Error::MissingResource(path.to_path_buf()));
        }

        let mut layer = self.features.open(path)?;
        let mut workspace = None;
        if layer.epsg != WGS84_EPSG {
            let dir = tempfile::Builder::new()
                .prefix("temp")
                .tempdir_in(work_root)?;
            debug!(
                "reprojecting {} from EPSG:{} into {}",
                path.display(),
                layer.epsg,
                dir.path().display()
            );
            // On error `dir` is dropped here and the scratch copy goes with it.
            layer = self.features.reproject_to_wgs84(&layer, dir.path())?;
            workspace = Some(dir);
        }

        let stem = layer.name.clone();
        let (terms, origin) = match layer.kind {
            GeometryKind::Point => {
                let radius_km = radius_km.ok_or_else(|| {
                    Error::InvalidParameter(
                        "search_radius is required for point feature files".into(),
                    )
                })?;
                let terms = layer
                    .features
                    .iter()
                    .flat_map(|f| f.geometry.coords())
                    .map(|c| SpatialTerm::Proximity {
                        lon: c.x,
                        lat: c.y,
                        radius_km,
                    })
                    .collect();
                (terms, TargetOrigin::Points { stem, radius_km })
            }
            GeometryKind::Polygon => {
                let terms = layer
                    .features
                    .iter()
                    .filter_map(|f| f.geometry.bounding_box())
                    .map(|b| SpatialTerm::BoundingBox {
                        min_lon: b.min_x,
                        min_lat: b.min_y,
                        max_lon: b.max_x,
                        max_lat: b.max_y,
                    })
                    .collect();
                (terms, TargetOrigin::Polygons { stem })
            }
            GeometryKind::Other(kind) => return Err(Error::UnsupportedGeometryKind(kind)),
        };

        Ok(ResolvedTargets {
            terms,
            origin,
            workspace,
        })
    }
}

pub fn station_terms(names: &[String]) -> Vec<SpatialTerm> {
    names
        .iter()
        .map(|n| SpatialTerm::StationName(n.clone()))
        .collect()
}

/// One proximity term per community match. Unknown names produce no term.
pub fn community_terms(
    lookup: &dyn CommunityLookup,
    names: &[String],
    radius_km: f64,
) -> Vec<SpatialTerm> {
    let mut terms = Vec::new();
    for name in names {
        let found = lookup.locate(name);
        if found.is_empty() {
            warn!("community {name:?} not found, skipping");
            continue;
        }
        terms.extend(found.into_iter().map(|c| SpatialTerm::Proximity {
            lon: c.x,
            lat: c.y,
            radius_km,
        }));
    }
    terms
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::geometry::{CommunityIndex, Coord, GeoJsonSource};

    fn names(xs: &[&str]) -> Vec<String> {
        xs.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn station_names_pass_through_verbatim() {
        let terms = station_terms(&names(&["KNIFE", "  FIVE MILE "]));
        assert_eq!(
            terms,
            vec![
                SpatialTerm::StationName("KNIFE".into()),
                SpatialTerm::StationName("  FIVE MILE ".into()),
            ]
        );
    }

    #[test]
    fn query_pairs_per_term_kind() {
        let p = SpatialTerm::Proximity {
            lon: -121.5,
            lat: 52.25,
            radius_km: 15.0,
        };
        assert_eq!(p.to_string(), "point=-121.5,52.25&distance=15");

        let b = SpatialTerm::BoundingBox {
            min_lon: -123.0,
            min_lat: 49.0,
            max_lon: -122.5,
            max_lat: 49.5,
        };
        assert_eq!(b.to_string(), "boundingBox=-123,49,-122.5,49.5");
    }

    #[test]
    fn unmatched_communities_are_skipped() {
        let index = CommunityIndex::new([
            ("150 Mile House".to_string(), Coord { x: -121.9, y: 52.1 }),
            ("Horsefly".to_string(), Coord { x: -121.4, y: 52.3 }),
        ]);
        let terms = community_terms(&index, &names(&["Horsefly", "Nowhere", "150 Mile House"]), 25.0);
        assert_eq!(
            terms,
            vec![
                SpatialTerm::Proximity {
                    lon: -121.4,
                    lat: 52.3,
                    radius_km: 25.0
                },
                SpatialTerm::Proximity {
                    lon: -121.9,
                    lat: 52.1,
                    radius_km: 25.0
                },
            ]
        );
    }

    #[test]
    fn communities_need_a_lookup() {
        let resolver = SpatialTargetResolver::new(&GeoJsonSource);
        let target = QueryTarget::Communities {
            names: names(&["Horsefly"]),
            radius_km: 10.0,
        };
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            resolver.resolve(&target, dir.path()),
            Err(Error::InvalidParameter(_))
        ));
    }

    fn write(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn polygons_become_bounding_boxes() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            dir.path(),
            "fire_zone.geojson",
            r#"{"type": "FeatureCollection", "features": [
                {"type": "Feature", "properties": {}, "geometry": {"type": "Polygon",
                 "coordinates": [[[-123.0, 49.0], [-122.0, 49.5], [-122.5, 50.0], [-123.0, 49.0]]]}},
                {"type": "Feature", "properties": {}, "geometry": {"type": "MultiPolygon",
                 "coordinates": [[[[-120.0, 51.0], [-119.0, 51.0], [-119.5, 52.0], [-120.0, 51.0]]]]}}
            ]}"#,
        );
        let resolver = SpatialTargetResolver::new(&GeoJsonSource);
        let resolved = resolver
            .resolve(
                &QueryTarget::FeatureFile {
                    path,
                    radius_km: None,
                },
                dir.path(),
            )
            .unwrap();
        assert_eq!(
            resolved.origin,
            TargetOrigin::Polygons {
                stem: "fire_zone".into()
            }
        );
        assert!(resolved.workspace.is_none());
        assert_eq!(
            resolved.terms,
            vec![
                SpatialTerm::BoundingBox {
                    min_lon: -123.0,
                    min_lat: 49.0,
                    max_lon: -122.0,
                    max_lat: 50.0
                },
                SpatialTerm::BoundingBox {
                    min_lon: -120.0,
                    min_lat: 51.0,
                    max_lon: -119.0,
                    max_lat: 52.0
                },
            ]
        );
    }

    #[test]
    fn points_require_a_radius() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            dir.path(),
            "towers.geojson",
            r#"{"type": "FeatureCollection", "features": [
                {"type": "Feature", "properties": {}, "geometry": {"type": "Point", "coordinates": [-121.0, 50.0]}}
            ]}"#,
        );
        let resolver = SpatialTargetResolver::new(&GeoJsonSource);

        let missing = resolver.resolve(
            &QueryTarget::FeatureFile {
                path: path.clone(),
                radius_km: None,
            },
            dir.path(),
        );
        assert!(matches!(missing, Err(Error::InvalidParameter(_))));

        let resolved = resolver
            .resolve(
                &QueryTarget::FeatureFile {
                    path,
                    radius_km: Some(20.0),
                },
                dir.path(),
            )
            .unwrap();
        assert_eq!(
            resolved.terms,
            vec![SpatialTerm::Proximity {
                lon: -121.0,
                lat: 50.0,
                radius_km: 20.0
            }]
        );
    }

    #[test]
    fn line_layers_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            dir.path(),
            "roads.geojson",
            r#"{"type": "FeatureCollection", "features": [
                {"type": "Feature", "properties": {}, "geometry": {"type": "LineString",
                 "coordinates": [[-121.0, 50.0], [-121.5, 50.5]]}}
            ]}"#,
        );
        let resolver = SpatialTargetResolver::new(&GeoJsonSource);
        let err = resolver
            .resolve(
                &QueryTarget::FeatureFile {
                    path,
                    radius_km: Some(5.0),
                },
                dir.path(),
            )
            .unwrap_err();
        assert!(matches!(err, Error::UnsupportedGeometryKind(k) if k == "LineString"));
    }

    #[test]
    fn missing_feature_file() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = SpatialTargetResolver::new(&GeoJsonSource);
        let err = resolver
            .resolve(
                &QueryTarget::FeatureFile {
                    path: dir.path().join("nope.geojson"),
                    radius_km: None,
                },
                dir.path(),
            )
            .unwrap_err();
        assert!(matches!(err, Error::MissingResource(_)));
    }

    #[test]
    fn reprojection_workspace_is_removed_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            dir.path(),
            "mercator.geojson",
            r#"{"type": "FeatureCollection",
                "crs": {"type": "name", "properties": {"name": "EPSG:3857"}},
                "features": [
                {"type": "Feature", "properties": {}, "geometry": {"type": "Point", "coordinates": [0.0, 0.0]}}
            ]}"#,
        );
        let resolver = SpatialTargetResolver::new(&GeoJsonSource);
        let resolved = resolver
            .resolve(
                &QueryTarget::FeatureFile {
                    path,
                    radius_km: Some(1.0),
                },
                dir.path(),
            )
            .unwrap();
        let workspace = resolved.workspace.as_ref().unwrap().path().to_path_buf();
        assert!(workspace.join("mercator_EPSG4326.geojson").exists());
        assert_eq!(
            resolved.origin,
            TargetOrigin::Points {
                stem: "mercator".into(),
                radius_km: 1.0
            }
        );

        drop(resolved);
        assert!(!workspace.exists());
    }
}
