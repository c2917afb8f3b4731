//! Geographic primitives for location clauses.

use serde::Serialize;
use serde_json::Value;

/// Mean earth radius in meters.
const EARTH_RADIUS_METERS: f64 = 6_371_008.8;

/// A WGS84 coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GeoPoint {
    /// Latitude in degrees.
    pub lat: f64,
    /// Longitude in degrees.
    pub lon: f64,
}

impl GeoPoint {
    /// Creates a point, rejecting non-finite or out-of-range coordinates.
    #[must_use]
    pub fn new(lat: f64, lon: f64) -> Option<Self> {
        let valid = lat.is_finite()
            && lon.is_finite()
            && (-90.0..=90.0).contains(&lat)
            && (-180.0..=180.0).contains(&lon);
        valid.then_some(Self { lat, lon })
    }

    /// Reads a stored coordinate.
    ///
    /// Accepted layouts: `{"lat": .., "lon": ..}`, `[lon, lat]` and `"lat,lon"`.
    #[must_use]
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Object(map) => Self::new(number(map.get("lat")?)?, number(map.get("lon")?)?),
            Value::Array(pair) if pair.len() == 2 => Self::new(number(&pair[1])?, number(&pair[0])?),
            Value::String(s) => {
                let (lat, lon) = s.split_once(',')?;
                Self::new(lat.trim().parse().ok()?, lon.trim().parse().ok()?)
            }
            _ => None,
        }
    }

    /// Great-circle distance in meters (haversine).
    #[must_use]
    pub fn distance_meters(&self, other: &Self) -> f64 {
        let (lat1, lat2) = (self.lat.to_radians(), other.lat.to_radians());
        let dlat = lat2 - lat1;
        let dlon = (other.lon - self.lon).to_radians();

        let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
        2.0 * EARTH_RADIUS_METERS * a.sqrt().atan2((1.0 - a).sqrt())
    }
}

/// A simple polygon given by its vertices; the ring is closed implicitly.
#[derive(Debug, Clone, PartialEq)]
pub struct GeoPolygon {
    vertices: Vec<GeoPoint>,
}

impl GeoPolygon {
    /// Creates a polygon from at least three vertices.
    ///
    /// A trailing vertex equal to the first one is dropped.
    #[must_use]
    pub fn new(mut vertices: Vec<GeoPoint>) -> Option<Self> {
        if vertices.len() > 1 && vertices.first() == vertices.last() {
            vertices.pop();
        }
        (vertices.len() >= 3).then_some(Self { vertices })
    }

    /// The vertices in input order, without the closing vertex.
    #[must_use]
    pub fn vertices(&self) -> &[GeoPoint] {
        &self.vertices
    }

    /// The closed ring as `[lon, lat]` pairs.
    #[must_use]
    pub fn closed_ring(&self) -> Vec<[f64; 2]> {
        self.vertices
            .iter()
            .chain(self.vertices.first())
            .map(|p| [p.lon, p.lat])
            .collect()
    }

    /// Point-in-polygon test (even-odd rule on the lon/lat plane).
    #[must_use]
    pub fn contains(&self, point: &GeoPoint) -> bool {
        let (x, y) = (point.lon, point.lat);
        let mut inside = false;
        let mut j = self.vertices.len() - 1;

        for (i, vi) in self.vertices.iter().enumerate() {
            let vj = &self.vertices[j];
            let crosses = (vi.lat > y) != (vj.lat > y);
            if crosses {
                let x_at_y = (vj.lon - vi.lon) * (y - vi.lat) / (vj.lat - vi.lat) + vi.lon;
                if x < x_at_y {
                    inside = !inside;
                }
            }
            j = i;
        }

        inside
    }
}

/// Reads a JSON number, also accepting numeric strings.
pub(crate) fn number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
