//! SRTM tile identifiers
//!
//! A tile id names the south-west corner of a 1° × 1° cell, e.g. `N36W112`.

use serde::{Deserialize, Serialize};

use crate::error::DownloadError;

/// South-west corner of a 1° × 1° SRTM cell.
///
/// Latitude is in [-89, 89], longitude in [-179, 179]; negative values are
/// the S/W hemispheres. The canonical text form is `[NS]dd[EW]ddd`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TileId {
    lat: i16,
    lon: i16,
}

impl TileId {
    pub fn new(lat: i16, lon: i16) -> Result<Self, DownloadError> {
        if !(-89..=89).contains(&lat) || !(-179..=179).contains(&lon) {
            return Err(DownloadError::InvalidTileId(format!(
                "lat {} lon {} out of range",
                lat, lon
            )));
        }
        Ok(Self { lat, lon })
    }

    /// Parse a canonical id like `N36W112`. Rejects anything malformed
    /// before any I/O happens.
    pub fn parse(s: &str) -> Result<Self, DownloadError> {
        let invalid = || DownloadError::InvalidTileId(s.to_string());

        let bytes = s.as_bytes();
        if bytes.len() != 7 {
            return Err(invalid());
        }

        let lat_sign = match bytes[0] {
            b'N' => 1,
            b'S' => -1,
            _ => return Err(invalid()),
        };
        let lon_sign = match bytes[3] {
            b'E' => 1,
            b'W' => -1,
            _ => return Err(invalid()),
        };

        let lat_digits = &s[1..3];
        let lon_digits = &s[4..7];
        if !lat_digits.bytes().all(|b| b.is_ascii_digit())
            || !lon_digits.bytes().all(|b| b.is_ascii_digit())
        {
            return Err(invalid());
        }

        let lat: i16 = lat_digits.parse().map_err(|_| invalid())?;
        let lon: i16 = lon_digits.parse().map_err(|_| invalid())?;
        if lat > 89 || lon > 179 {
            return Err(invalid());
        }

        Self::new(lat * lat_sign, lon * lon_sign)
    }

    /// Integer latitude of the south edge.
    pub fn lat(&self) -> i16 {
        self.lat
    }

    /// Integer longitude of the west edge.
    pub fn lon(&self) -> i16 {
        self.lon
    }

    /// Latitude band directory with hemisphere prefix, e.g. `N36`.
    pub fn lat_band(&self) -> String {
        let hemi = if self.lat >= 0 { 'N' } else { 'S' };
        format!("{}{:02}", hemi, self.lat.abs())
    }

    /// Object key under the bucket base, e.g. `N36/N36W112.hgt.gz`.
    pub fn storage_path(&self) -> String {
        format!("{}/{}.hgt.gz", self.lat_band(), self)
    }

    /// Full download URL against a base like
    /// `https://s3.amazonaws.com/elevation-tiles-prod/skadi`.
    pub fn url(&self, base: &str) -> String {
        format!("{}/{}", base.trim_end_matches('/'), self.storage_path())
    }

    /// Geographic extent as (south, west, north, east) degrees.
    pub fn bounds(&self) -> (f64, f64, f64, f64) {
        let south = f64::from(self.lat);
        let west = f64::from(self.lon);
        (south, west, south + 1.0, west + 1.0)
    }

    /// All tiles whose cells intersect the given bounding box. Returns an
    /// empty list for an inverted box (antimeridian crossings are not
    /// supported).
    pub fn cover_bbox(south: f64, west: f64, north: f64, east: f64) -> Vec<TileId> {
        if north < south || east < west {
            return Vec::new();
        }

        let lat_min = south.floor() as i16;
        let lat_max = tile_floor(north);
        let lon_min = west.floor() as i16;
        let lon_max = tile_floor(east);

        let mut tiles = Vec::new();
        for lat in lat_min..=lat_max {
            for lon in lon_min..=lon_max {
                if let Ok(id) = TileId::new(lat, lon) {
                    tiles.push(id);
                }
            }
        }
        tiles
    }
}

/// SW corner of the cell containing the value; an exact integer edge
/// belongs to the cell south/west of it.
fn tile_floor(value: f64) -> i16 {
    let floored = value.floor();
    if floored == value {
        floored as i16 - 1
    } else {
        floored as i16
    }
}

impl std::fmt::Display for TileId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let lat_hemi = if self.lat >= 0 { 'N' } else { 'S' };
        let lon_hemi = if self.lon >= 0 { 'E' } else { 'W' };
        write!(
            f,
            "{}{:02}{}{:03}",
            lat_hemi,
            self.lat.abs(),
            lon_hemi,
            self.lon.abs()
        )
    }
}

impl std::str::FromStr for TileId {
    type Err = DownloadError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for TileId {
    type Error = DownloadError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<TileId> for String {
    fn from(id: TileId) -> Self {
        id.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_canonical_ids() {
        let id = TileId::parse("N36W112").unwrap();
        assert_eq!(id.lat(), 36);
        assert_eq!(id.lon(), -112);
        assert_eq!(id.to_string(), "N36W112");

        let id = TileId::parse("S01E009").unwrap();
        assert_eq!(id.lat(), -1);
        assert_eq!(id.lon(), 9);
        assert_eq!(id.to_string(), "S01E009");
    }

    #[test]
    fn rejects_malformed_ids() {
        for bad in [
            "", "N36", "X36W112", "N36X112", "N90W112", "N36W180", "n36w112", "N36W11",
            "N3W1123", "N36W1a2",
        ] {
            assert!(
                matches!(TileId::parse(bad), Err(DownloadError::InvalidTileId(_))),
                "expected {:?} to be rejected",
                bad
            );
        }
    }

    #[test]
    fn storage_path_uses_latitude_band() {
        let id = TileId::parse("N36W112").unwrap();
        assert_eq!(id.storage_path(), "N36/N36W112.hgt.gz");

        let id = TileId::parse("S09E140").unwrap();
        assert_eq!(id.storage_path(), "S09/S09E140.hgt.gz");
    }

    #[test]
    fn url_joins_base_without_double_slash() {
        let id = TileId::parse("N36W112").unwrap();
        assert_eq!(
            id.url("https://example.com/skadi/"),
            "https://example.com/skadi/N36/N36W112.hgt.gz"
        );
    }

    #[test]
    fn bounds_cover_one_degree() {
        let id = TileId::parse("S01E009").unwrap();
        assert_eq!(id.bounds(), (-1.0, 9.0, 0.0, 10.0));
    }

    #[test]
    fn bbox_cover_lists_intersecting_cells() {
        let tiles = TileId::cover_bbox(36.2, -112.8, 37.5, -111.1);
        let names: Vec<String> = tiles.iter().map(|t| t.to_string()).collect();
        assert_eq!(
            names,
            vec!["N36W113", "N36W112", "N37W113", "N37W112"]
        );
    }

    #[test]
    fn bbox_cover_excludes_exact_north_east_edges() {
        // A box ending exactly on a cell edge does not pull in the next cell.
        let tiles = TileId::cover_bbox(36.0, -112.0, 37.0, -111.0);
        let names: Vec<String> = tiles.iter().map(|t| t.to_string()).collect();
        assert_eq!(names, vec!["N36W112"]);
    }

    #[test]
    fn bbox_cover_rejects_inverted_boxes() {
        assert!(TileId::cover_bbox(37.0, -111.0, 36.0, -112.0).is_empty());
    }

    #[test]
    fn serde_round_trips_as_canonical_string() {
        let id = TileId::parse("N36W112").unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"N36W112\"");
        let back: TileId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }
}
