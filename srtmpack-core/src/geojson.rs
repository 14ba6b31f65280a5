//! Cached-tile overlay
//!
//! Builds the GeoJSON rectangles a map UI draws over tiles that are already
//! in the cache.

use serde_json::{json, Value};

use crate::tile::TileId;

/// Geographic window, degrees. `west > east` (antimeridian crossing) is not
/// supported and matches nothing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub north: f64,
    pub south: f64,
    pub east: f64,
    pub west: f64,
}

impl Viewport {
    fn intersects(&self, tile: &TileId) -> bool {
        let (south, west, north, east) = tile.bounds();
        south < self.north && north > self.south && west < self.east && east > self.west
    }
}

/// One Polygon feature per cached tile whose 1° square intersects the
/// viewport, as a FeatureCollection.
pub fn cached_tiles_geojson(cached: &[TileId], viewport: &Viewport) -> Value {
    let features: Vec<Value> = cached
        .iter()
        .filter(|tile| viewport.intersects(tile))
        .map(|tile| {
            let (south, west, north, east) = tile.bounds();
            json!({
                "type": "Feature",
                "properties": { "tileId": tile.to_string() },
                "geometry": {
                    "type": "Polygon",
                    "coordinates": [[
                        [west, south],
                        [east, south],
                        [east, north],
                        [west, north],
                        [west, south],
                    ]],
                },
            })
        })
        .collect();

    json!({
        "type": "FeatureCollection",
        "features": features,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tile(s: &str) -> TileId {
        TileId::parse(s).unwrap()
    }

    #[test]
    fn emits_one_polygon_per_intersecting_tile() {
        let cached = vec![tile("N36W112"), tile("N36W113"), tile("N50E010")];
        let viewport = Viewport {
            north: 37.5,
            south: 36.2,
            east: -111.5,
            west: -112.8,
        };

        let collection = cached_tiles_geojson(&cached, &viewport);
        let features = collection["features"].as_array().unwrap();
        assert_eq!(features.len(), 2);
        assert_eq!(features[0]["properties"]["tileId"], "N36W112");
        assert_eq!(features[1]["properties"]["tileId"], "N36W113");
    }

    #[test]
    fn polygon_ring_is_closed() {
        let cached = vec![tile("N36W112")];
        let viewport = Viewport {
            north: 90.0,
            south: -90.0,
            east: 180.0,
            west: -180.0,
        };

        let collection = cached_tiles_geojson(&cached, &viewport);
        let ring = collection["features"][0]["geometry"]["coordinates"][0]
            .as_array()
            .unwrap();
        assert_eq!(ring.len(), 5);
        assert_eq!(ring[0], ring[4]);
        assert_eq!(ring[0], json!([-112.0, 36.0]));
        assert_eq!(ring[2], json!([-111.0, 37.0]));
    }

    #[test]
    fn tiles_touching_only_the_edge_are_excluded() {
        // Viewport exactly abutting the tile's east edge does not intersect.
        let cached = vec![tile("N36W112")];
        let viewport = Viewport {
            north: 37.0,
            south: 36.0,
            east: -110.0,
            west: -111.0,
        };
        let collection = cached_tiles_geojson(&cached, &viewport);
        assert!(collection["features"].as_array().unwrap().is_empty());
    }

    #[test]
    fn inverted_viewport_matches_nothing() {
        let cached = vec![tile("N36W112")];
        let viewport = Viewport {
            north: 37.0,
            south: 36.0,
            east: -179.0,
            west: 179.0,
        };
        let collection = cached_tiles_geojson(&cached, &viewport);
        assert!(collection["features"].as_array().unwrap().is_empty());
    }

    #[test]
    fn empty_cache_yields_empty_collection() {
        let viewport = Viewport {
            north: 1.0,
            south: 0.0,
            east: 1.0,
            west: 0.0,
        };
        let collection = cached_tiles_geojson(&[], &viewport);
        assert_eq!(collection["type"], "FeatureCollection");
        assert!(collection["features"].as_array().unwrap().is_empty());
    }
}
