use std::f64::consts::PI;
use std::fs;
use std::path::{Path, PathBuf};

use log::debug;
use serde_json::{Map, Value, json};

use crate::error::{Error, Result};

pub const WGS84_EPSG: u32 = 4326;
pub const WEB_MERCATOR_EPSG: u32 = 3857;

const WEB_MERCATOR_RADIUS: f64 = 6_378_137.0;

/// A longitude/latitude (or easting/northing before reprojection) pair.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Coord {
    pub x: f64,
    pub y: f64,
}

pub type Ring = Vec<Coord>;

#[derive(Debug, Clone, PartialEq)]
pub enum Geometry {
    Point(Coord),
    MultiPoint(Vec<Coord>),
    LineString(Vec<Coord>),
    MultiLineString(Vec<Vec<Coord>>),
    Polygon(Vec<Ring>),
    MultiPolygon(Vec<Vec<Ring>>),
    Collection(Vec<Geometry>),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl BoundingBox {
    fn from_coord(c: Coord) -> Self {
        Self {
            min_x: c.x,
            min_y: c.y,
            max_x: c.x,
            max_y: c.y,
        }
    }

    fn extend(&mut self, c: Coord) {
        self.min_x = self.min_x.min(c.x);
        self.min_y = self.min_y.min(c.y);
        self.max_x = self.max_x.max(c.x);
        self.max_y = self.max_y.max(c.y);
    }
}

impl Geometry {
    pub fn type_name(&self) -> &'static str {
        match self {
            Geometry::Point(_) => "Point",
            Geometry::MultiPoint(_) => "MultiPoint",
            Geometry::LineString(_) => "LineString",
            Geometry::MultiLineString(_) => "MultiLineString",
            Geometry::Polygon(_) => "Polygon",
            Geometry::MultiPolygon(_) => "MultiPolygon",
            Geometry::Collection(_) => "GeometryCollection",
        }
    }

    /// Every vertex of the geometry, collected depth-first without recursion.
    pub fn coords(&self) -> Vec<Coord> {
        let mut out = Vec::new();
        let mut stack = vec![self];
        while let Some(node) = stack.pop() {
            match node {
                Geometry::Point(c) => out.push(*c),
                Geometry::MultiPoint(cs) | Geometry::LineString(cs) => out.extend_from_slice(cs),
                Geometry::MultiLineString(lines) | Geometry::Polygon(lines) => {
                    lines.iter().for_each(|ring| out.extend_from_slice(ring));
                }
                Geometry::MultiPolygon(polys) => {
                    for rings in polys {
                        rings.iter().for_each(|ring| out.extend_from_slice(ring));
                    }
                }
                // Reversed so children are visited in document order.
                Geometry::Collection(children) => stack.extend(children.iter().rev()),
            }
        }
        out
    }

    pub fn bounding_box(&self) -> Option<BoundingBox> {
        let mut coords = self.coords().into_iter();
        let mut bbox = BoundingBox::from_coord(coords.next()?);
        coords.for_each(|c| bbox.extend(c));
        Some(bbox)
    }

    pub fn map_coords(&self, f: &impl Fn(Coord) -> Coord) -> Geometry {
        let ring = |r: &Vec<Coord>| r.iter().map(|c| f(*c)).collect::<Vec<_>>();
        match self {
            Geometry::Point(c) => Geometry::Point(f(*c)),
            Geometry::MultiPoint(cs) => Geometry::MultiPoint(ring(cs)),
            Geometry::LineString(cs) => Geometry::LineString(ring(cs)),
            Geometry::MultiLineString(ls) => Geometry::MultiLineString(ls.iter().map(ring).collect()),
            Geometry::Polygon(rs) => Geometry::Polygon(rs.iter().map(ring).collect()),
            Geometry::MultiPolygon(ps) => Geometry::MultiPolygon(
                ps.iter().map(|rs| rs.iter().map(ring).collect()).collect(),
            ),
            Geometry::Collection(gs) => {
                Geometry::Collection(gs.iter().map(|g| g.map_coords(f)).collect())
            }
        }
    }

    fn from_geojson(v: &Value) -> Result<Self> {
        let typ = v
            .get("type")
            .and_then(|t| t.as_str())
            .ok_or_else(|| Error::InvalidFeatureFile("geometry without a type".into()))?;

        if typ == "GeometryCollection" {
            let children = v
                .get("geometries")
                .and_then(|g| g.as_array())
                .ok_or_else(|| Error::InvalidFeatureFile("collection without geometries".into()))?;
            return Ok(Geometry::Collection(
                children.iter().map(Geometry::from_geojson).collect::<Result<_>>()?,
            ));
        }

        let coords = v
            .get("coordinates")
            .ok_or_else(|| Error::InvalidFeatureFile(format!("{typ} without coordinates")))?;

        Ok(match typ {
            "Point" => Geometry::Point(parse_coord(coords)?),
            "MultiPoint" => Geometry::MultiPoint(parse_coord_list(coords)?),
            "LineString" => Geometry::LineString(parse_coord_list(coords)?),
            "MultiLineString" => Geometry::MultiLineString(parse_nested(coords, parse_coord_list)?),
            "Polygon" => Geometry::Polygon(parse_nested(coords, parse_coord_list)?),
            "MultiPolygon" => Geometry::MultiPolygon(parse_nested(coords, |rings| {
                parse_nested(rings, parse_coord_list)
            })?),
            other => {
                return Err(Error::InvalidFeatureFile(format!(
                    "unknown geometry type: {other}"
                )));
            }
        })
    }

    fn to_geojson(&self) -> Value {
        let pair = |c: &Coord| json!([c.x, c.y]);
        let ring = |r: &Vec<Coord>| Value::Array(r.iter().map(pair).collect());
        let rings = |rs: &Vec<Ring>| Value::Array(rs.iter().map(ring).collect());
        match self {
            Geometry::Collection(gs) => json!({
                "type": "GeometryCollection",
                "geometries": gs.iter().map(Geometry::to_geojson).collect::<Vec<_>>(),
            }),
            other => {
                let coordinates = match other {
                    Geometry::Point(c) => pair(c),
                    Geometry::MultiPoint(cs) | Geometry::LineString(cs) => ring(cs),
                    Geometry::MultiLineString(ls) | Geometry::Polygon(ls) => rings(ls),
                    Geometry::MultiPolygon(ps) => Value::Array(ps.iter().map(rings).collect()),
                    Geometry::Collection(_) => Value::Null,
                };
                json!({ "type": other.type_name(), "coordinates": coordinates })
            }
        }
    }
}

fn parse_coord(v: &Value) -> Result<Coord> {
    let arr = v
        .as_array()
        .filter(|a| a.len() >= 2)
        .ok_or_else(|| Error::InvalidFeatureFile(format!("invalid position: {v}")))?;
    match (arr[0].as_f64(), arr[1].as_f64()) {
        (Some(x), Some(y)) => Ok(Coord { x, y }),
        _ => Err(Error::InvalidFeatureFile(format!("invalid position: {v}"))),
    }
}

fn parse_coord_list(v: &Value) -> Result<Vec<Coord>> {
    parse_nested(v, parse_coord)
}

fn parse_nested<T>(v: &Value, item: impl Fn(&Value) -> Result<T>) -> Result<Vec<T>> {
    v.as_array()
        .ok_or_else(|| Error::InvalidFeatureFile(format!("expected an array, got {v}")))?
        .iter()
        .map(item)
        .collect()
}

/// Geometry type shared by every feature of a layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GeometryKind {
    Point,
    Polygon,
    Other(String),
}

impl GeometryKind {
    fn of(features: &[Feature]) -> Self {
        let mut kinds = features.iter().map(|f| match &f.geometry {
            Geometry::Point(_) | Geometry::MultiPoint(_) => GeometryKind::Point,
            Geometry::Polygon(_) | Geometry::MultiPolygon(_) => GeometryKind::Polygon,
            other => GeometryKind::Other(other.type_name().to_string()),
        });
        let Some(first) = kinds.next() else {
            return GeometryKind::Other("None".into());
        };
        if kinds.all(|k| k == first) {
            first
        } else {
            GeometryKind::Other("Mixed".into())
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Feature {
    pub geometry: Geometry,
    pub properties: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FeatureLayer {
    /// File stem of the source, used in output names.
    pub name: String,
    pub epsg: u32,
    pub kind: GeometryKind,
    pub features: Vec<Feature>,
}

/// Reads point/polygon feature files and normalizes them to WGS84.
pub trait FeatureSource {
    fn open(&self, path: &Path) -> Result<FeatureLayer>;

    /// Reproject `layer` to EPSG:4326, writing any intermediate file into `work_dir`.
    fn reproject_to_wgs84(&self, layer: &FeatureLayer, work_dir: &Path) -> Result<FeatureLayer>;
}

/// GeoJSON `FeatureCollection` reader.
///
/// The CRS comes from the legacy `crs` member and defaults to EPSG:4326.
/// Reprojection is supported from EPSG:3857.
#[derive(Debug, Clone, Copy, Default)]
pub struct GeoJsonSource;

impl FeatureSource for GeoJsonSource {
    fn open(&self, path: &Path) -> Result<FeatureLayer> {
        let text = fs::read_to_string(path)?;
        let doc: Value = serde_json::from_str(&text)?;

        if doc.get("type").and_then(|t| t.as_str()) != Some("FeatureCollection") {
            return Err(Error::InvalidFeatureFile(format!(
                "{} is not a FeatureCollection",
                path.display()
            )));
        }

        let epsg = match doc.pointer("/crs/properties/name").and_then(|n| n.as_str()) {
            Some(name) => parse_crs_name(name).ok_or_else(|| {
                Error::InvalidFeatureFile(format!("unrecognized crs: {name}"))
            })?,
            None => WGS84_EPSG,
        };

        let mut features = Vec::new();
        for f in doc
            .get("features")
            .and_then(|f| f.as_array())
            .map(Vec::as_slice)
            .unwrap_or_default()
        {
            // Features with a null geometry carry nothing to query.
            let Some(geometry) = f.get("geometry").filter(|g| !g.is_null()) else {
                continue;
            };
            let properties = f
                .get("properties")
                .and_then(|p| p.as_object())
                .cloned()
                .unwrap_or_default();
            features.push(Feature {
                geometry: Geometry::from_geojson(geometry)?,
                properties,
            });
        }

        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();

        debug!(
            "opened {} ({} features, EPSG:{epsg})",
            path.display(),
            features.len()
        );

        Ok(FeatureLayer {
            name,
            epsg,
            kind: GeometryKind::of(&features),
            features,
        })
    }

    fn reproject_to_wgs84(&self, layer: &FeatureLayer, work_dir: &Path) -> Result<FeatureLayer> {
        let transform: fn(Coord) -> Coord = match layer.epsg {
            WGS84_EPSG => return Ok(layer.clone()),
            WEB_MERCATOR_EPSG => web_mercator_to_wgs84,
            other => return Err(Error::UnsupportedCrs(other)),
        };

        let features: Vec<Value> = layer
            .features
            .iter()
            .map(|f| {
                json!({
                    "type": "Feature",
                    "geometry": f.geometry.map_coords(&transform).to_geojson(),
                    "properties": f.properties,
                })
            })
            .collect();
        let doc = json!({ "type": "FeatureCollection", "features": features });

        let out_path: PathBuf = work_dir.join(format!("{}_EPSG4326.geojson", layer.name));
        fs::write(&out_path, serde_json::to_vec(&doc)?)?;
        debug!("reprojected {} to {}", layer.name, out_path.display());

        let mut projected = self.open(&out_path)?;
        projected.name = layer.name.clone();
        Ok(projected)
    }
}

/// Accepts `EPSG:n`, `urn:ogc:def:crs:EPSG::n` and the OGC CRS84 alias.
fn parse_crs_name(name: &str) -> Option<u32> {
    if name.ends_with("CRS84") {
        return Some(WGS84_EPSG);
    }
    let (_, code) = name.rsplit_once(':')?;
    code.parse().ok()
}

pub fn web_mercator_to_wgs84(c: Coord) -> Coord {
    let lon = (c.x / WEB_MERCATOR_RADIUS).to_degrees();
    let lat = (2.0 * (c.y / WEB_MERCATOR_RADIUS).exp().atan() - PI / 2.0).to_degrees();
    Coord { x: lon, y: lat }
}

/// Looks up community coordinates by name.
pub trait CommunityLookup {
    /// All coordinates registered under `name`; empty when unknown.
    fn locate(&self, name: &str) -> Vec<Coord>;
}

/// In-memory community index built from a point layer with a name property.
#[derive(Debug, Clone, Default)]
pub struct CommunityIndex {
    entries: Vec<(String, Coord)>,
}

impl CommunityIndex {
    pub const NAME_PROPERTY: &'static str = "Name";

    pub fn new(entries: impl IntoIterator<Item = (String, Coord)>) -> Self {
        Self {
            entries: entries.into_iter().collect(),
        }
    }

    pub fn from_layer(layer: &FeatureLayer, name_property: &str) -> Self {
        let entries = layer.features.iter().filter_map(|f| {
            let name = f.properties.get(name_property)?.as_str()?;
            match f.geometry {
                Geometry::Point(c) => Some((name.to_string(), c)),
                _ => None,
            }
        });
        Self::new(entries)
    }

    pub fn open(source: &dyn FeatureSource, path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(Error::MissingResource(path.to_path_buf()));
        }
        let layer = source.open(path)?;
        if layer.epsg != WGS84_EPSG {
            return Err(Error::InvalidFeatureFile(format!(
                "community layer must be EPSG:4326, got EPSG:{}",
                layer.epsg
            )));
        }
        Ok(Self::from_layer(&layer, Self::NAME_PROPERTY))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl CommunityLookup for CommunityIndex {
    fn locate(&self, name: &str) -> Vec<Coord> {
        self.entries
            .iter()
            .filter(|(n, _)| n == name)
            .map(|(_, c)| *c)
            .collect()
    }
}
