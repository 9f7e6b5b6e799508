//! Geospatial point index.
//!
//! Points carry a longitude/latitude pair and are additionally placed in a
//! coarse 10°×10° tile map used only to prune candidate scans; tile
//! membership is not part of any wire contract. Distances use the
//! great-circle (haversine) formula with R = 6371 km.

use std::collections::{HashMap, HashSet};

use crate::error::{Error, Result};

/// Earth radius used by all distance computations, in kilometers.
pub const EARTH_RADIUS_KM: f64 = 6371.0;

const TILE_DEGREES: f64 = 10.0;
const GEOHASH_ALPHABET: &[u8; 32] = b"0123456789bcdefghjkmnpqrstuvwxyz";
const GEOHASH_LEN: usize = 12;

/// Distance unit accepted by the `GEO*` family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unit {
    /// Meters.
    M,
    /// Kilometers.
    Km,
    /// Statute miles.
    Mi,
    /// Feet.
    Ft,
}

impl Unit {
    /// Parse the wire spelling.
    pub fn parse(text: &str) -> Result<Self> {
        match text.to_ascii_lowercase().as_str() {
            "m" => Ok(Unit::M),
            "km" => Ok(Unit::Km),
            "mi" => Ok(Unit::Mi),
            "ft" => Ok(Unit::Ft),
            other => Err(Error::Constraint(format!("unsupported unit '{other}'"))),
        }
    }

    /// Convert a kilometer quantity into this unit.
    pub fn from_km(self, km: f64) -> f64 {
        match self {
            Unit::M => km * 1000.0,
            Unit::Km => km,
            Unit::Mi => km / 1.609_344,
            Unit::Ft => km * 3280.839_895,
        }
    }

    /// Convert a quantity in this unit into kilometers.
    pub fn to_km(self, value: f64) -> f64 {
        match self {
            Unit::M => value / 1000.0,
            Unit::Km => value,
            Unit::Mi => value * 1.609_344,
            Unit::Ft => value / 3280.839_895,
        }
    }
}

/// A stored point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoPoint {
    /// Longitude in degrees, [-180, 180].
    pub longitude: f64,
    /// Latitude in degrees, [-90, 90].
    pub latitude: f64,
}

/// A named geospatial index.
///
/// # Examples
///
/// ```rust
/// use fincache::store::{GeoIndex, Unit};
///
/// let mut idx = GeoIndex::new();
/// idx.add("a", -122.4194, 37.7749).unwrap();
/// idx.add("b", -122.4313, 37.7739).unwrap();
/// let km = idx.distance("a", "b", Unit::Km).unwrap();
/// assert!(km > 1.0 && km < 1.5);
/// ```
#[derive(Debug, Clone, Default)]
pub struct GeoIndex {
    points: HashMap<String, GeoPoint>,
    tiles: HashMap<(i16, i16), HashSet<String>>,
}

impl GeoIndex {
    /// Create an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored points.
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Whether the index holds no points.
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Add or move a named point. Coordinates outside canonical bounds are
    /// a constraint violation. Returns `true` when the name is new.
    pub fn add(&mut self, name: &str, longitude: f64, latitude: f64) -> Result<bool> {
        if !(-180.0..=180.0).contains(&longitude) || !longitude.is_finite() {
            return Err(Error::Constraint(format!(
                "longitude {longitude} out of range [-180, 180]"
            )));
        }
        if !(-90.0..=90.0).contains(&latitude) || !latitude.is_finite() {
            return Err(Error::Constraint(format!(
                "latitude {latitude} out of range [-90, 90]"
            )));
        }
        let fresh = match self.points.insert(
            name.to_string(),
            GeoPoint {
                longitude,
                latitude,
            },
        ) {
            Some(old) => {
                self.untile(name, old);
                false
            },
            None => true,
        };
        self.tiles
            .entry(tile_of(longitude, latitude))
            .or_default()
            .insert(name.to_string());
        Ok(fresh)
    }

    /// Remove a named point. Returns `true` when it existed.
    pub fn remove(&mut self, name: &str) -> bool {
        match self.points.remove(name) {
            Some(point) => {
                self.untile(name, point);
                true
            },
            None => false,
        }
    }

    /// Position lookup.
    pub fn position(&self, name: &str) -> Option<GeoPoint> {
        self.points.get(name).copied()
    }

    /// Great-circle distance between two stored points.
    pub fn distance(&self, a: &str, b: &str, unit: Unit) -> Result<f64> {
        let pa = self.points.get(a).ok_or(Error::NotFound)?;
        let pb = self.points.get(b).ok_or(Error::NotFound)?;
        Ok(unit.from_km(haversine_km(*pa, *pb)))
    }

    /// Points within `radius` of a center, with distances attached, sorted
    /// by `(distance, name)` for deterministic output.
    pub fn radius(
        &self,
        longitude: f64,
        latitude: f64,
        radius: f64,
        unit: Unit,
    ) -> Result<Vec<(String, GeoPoint, f64)>> {
        let center = GeoPoint {
            longitude,
            latitude,
        };
        let radius_km = unit.to_km(radius);
        if radius_km < 0.0 || !radius_km.is_finite() {
            return Err(Error::Constraint("radius must be non-negative".to_string()));
        }
        let mut hits: Vec<(String, GeoPoint, f64)> = Vec::new();
        self.for_candidates(center, radius_km, |name, point| {
            let km = haversine_km(center, point);
            if km <= radius_km {
                hits.push((name.to_string(), point, unit.from_km(km)));
            }
        });
        hits.sort_by(|a, b| a.2.total_cmp(&b.2).then_with(|| a.0.cmp(&b.0)));
        Ok(hits)
    }

    /// Radius query centered on a stored member.
    pub fn radius_by_member(
        &self,
        member: &str,
        radius: f64,
        unit: Unit,
    ) -> Result<Vec<(String, GeoPoint, f64)>> {
        let center = self.points.get(member).ok_or(Error::NotFound)?;
        self.radius(center.longitude, center.latitude, radius, unit)
    }

    /// Axis-aligned box search: `width` and `height` are full extents in
    /// `unit`, centered on the given coordinate.
    pub fn search_box(
        &self,
        longitude: f64,
        latitude: f64,
        width: f64,
        height: f64,
        unit: Unit,
    ) -> Result<Vec<(String, GeoPoint, f64)>> {
        let center = GeoPoint {
            longitude,
            latitude,
        };
        let half_w_km = unit.to_km(width) / 2.0;
        let half_h_km = unit.to_km(height) / 2.0;
        if half_w_km < 0.0 || half_h_km < 0.0 {
            return Err(Error::Constraint("box extents must be non-negative".to_string()));
        }
        // Prune with the circumscribing radius, then filter by per-axis
        // great-circle distance.
        let prune_km = (half_w_km * half_w_km + half_h_km * half_h_km).sqrt();
        let mut hits: Vec<(String, GeoPoint, f64)> = Vec::new();
        self.for_candidates(center, prune_km, |name, point| {
            let lat_km = haversine_km(
                GeoPoint {
                    longitude: center.longitude,
                    latitude: center.latitude,
                },
                GeoPoint {
                    longitude: center.longitude,
                    latitude: point.latitude,
                },
            );
            let lon_km = haversine_km(
                GeoPoint {
                    longitude: center.longitude,
                    latitude: point.latitude,
                },
                point,
            );
            if lat_km <= half_h_km && lon_km <= half_w_km {
                hits.push((name.to_string(), point, unit.from_km(haversine_km(center, point))));
            }
        });
        hits.sort_by(|a, b| a.2.total_cmp(&b.2).then_with(|| a.0.cmp(&b.0)));
        Ok(hits)
    }

    /// 12-character geohash of a stored member.
    pub fn geohash(&self, name: &str) -> Result<String> {
        let point = self.points.get(name).ok_or(Error::NotFound)?;
        Ok(encode_geohash(point.longitude, point.latitude))
    }

    /// Names starting with `prefix` (`atm:`, `merchant:`, `user:<id>:`
    /// conventions), unordered.
    pub fn members_with_prefix(&self, prefix: &str) -> Vec<String> {
        self.points
            .keys()
            .filter(|name| name.starts_with(prefix))
            .cloned()
            .collect()
    }

    /// All stored points. Used by snapshots.
    pub fn iter_all(&self) -> Vec<(String, GeoPoint)> {
        self.points
            .iter()
            .map(|(name, point)| (name.clone(), *point))
            .collect()
    }

    /// Approximate heap footprint in bytes. Constant-time: assumes an
    /// average name length.
    pub fn approximate_size(&self) -> usize {
        self.points.len() * 112 + self.tiles.len() * 48
    }

    fn untile(&mut self, name: &str, point: GeoPoint) {
        let tile = tile_of(point.longitude, point.latitude);
        if let Some(names) = self.tiles.get_mut(&tile) {
            names.remove(name);
            if names.is_empty() {
                self.tiles.remove(&tile);
            }
        }
    }

    /// Visit every point in tiles that might intersect a circle of
    /// `radius_km` around `center`. Falls back to the full map when the
    /// circle covers a large longitude span near the poles.
    fn for_candidates(&self, center: GeoPoint, radius_km: f64, mut visit: impl FnMut(&str, GeoPoint)) {
        let lat_delta = radius_km / 111.0;
        let cos_lat = center.latitude.to_radians().cos().abs();
        let lon_delta = if cos_lat < 1e-3 {
            360.0
        } else {
            radius_km / (111.0 * cos_lat)
        };
        if lon_delta >= 180.0 || lat_delta >= 90.0 {
            for (name, point) in &self.points {
                visit(name, *point);
            }
            return;
        }

        let lat_lo = tile_index(center.latitude - lat_delta - TILE_DEGREES);
        let lat_hi = tile_index(center.latitude + lat_delta + TILE_DEGREES);
        let lon_lo = tile_index(center.longitude - lon_delta - TILE_DEGREES);
        let lon_hi = tile_index(center.longitude + lon_delta + TILE_DEGREES);
        for lon_tile in lon_lo..=lon_hi {
            for lat_tile in lat_lo..=lat_hi {
                if let Some(names) = self.tiles.get(&(lon_tile, lat_tile)) {
                    for name in names {
                        if let Some(point) = self.points.get(name) {
                            visit(name, *point);
                        }
                    }
                }
            }
        }
    }
}

fn tile_index(degrees: f64) -> i16 {
    (degrees / TILE_DEGREES).floor() as i16
}

fn tile_of(longitude: f64, latitude: f64) -> (i16, i16) {
    (tile_index(longitude), tile_index(latitude))
}

/// Great-circle distance in kilometers.
pub fn haversine_km(a: GeoPoint, b: GeoPoint) -> f64 {
    let lat_a = a.latitude.to_radians();
    let lat_b = b.latitude.to_radians();
    let d_lat = (b.latitude - a.latitude).to_radians();
    let d_lon = (b.longitude - a.longitude).to_radians();
    let h = (d_lat / 2.0).sin().powi(2) + lat_a.cos() * lat_b.cos() * (d_lon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * h.sqrt().asin()
}

/// Interleaved base-32 geohash over the unit square.
pub fn encode_geohash(longitude: f64, latitude: f64) -> String {
    let mut lon_range = (-180.0f64, 180.0f64);
    let mut lat_range = (-90.0f64, 90.0f64);
    let mut out = String::with_capacity(GEOHASH_LEN);
    let mut bits = 0u8;
    let mut bit_count = 0u8;
    let mut even_bit = true;
    while out.len() < GEOHASH_LEN {
        if even_bit {
            let mid = (lon_range.0 + lon_range.1) / 2.0;
            if longitude >= mid {
                bits = (bits << 1) | 1;
                lon_range.0 = mid;
            } else {
                bits <<= 1;
                lon_range.1 = mid;
            }
        } else {
            let mid = (lat_range.0 + lat_range.1) / 2.0;
            if latitude >= mid {
                bits = (bits << 1) | 1;
                lat_range.0 = mid;
            } else {
                bits <<= 1;
                lat_range.1 = mid;
            }
        }
        even_bit = !even_bit;
        bit_count += 1;
        if bit_count == 5 {
            out.push(GEOHASH_ALPHABET[bits as usize] as char);
            bits = 0;
            bit_count = 0;
        }
    }
    out
}
