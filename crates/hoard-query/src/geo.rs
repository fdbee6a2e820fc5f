//! Geographic primitives and the geocoder seam.
//!
//! `loc:"new york"` resolves a place name to one or more bounding
//! rectangles through a [`Geocoder`] supplied by the embedding; the query
//! core never talks to a geocoding service itself.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A point on the globe, in decimal degrees.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LatLong {
    /// Latitude, positive north.
    pub latitude: f64,
    /// Longitude, positive east.
    pub longitude: f64,
}

/// A bounding rectangle returned by a geocoder.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rect {
    /// North-east corner.
    pub north_east: LatLong,
    /// South-west corner.
    pub south_west: LatLong,
}

/// The bounding box accumulated over all matched locations in a query.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Area {
    /// Northernmost latitude seen.
    pub north: f64,
    /// Southernmost latitude seen.
    pub south: f64,
    /// Easternmost longitude seen.
    pub east: f64,
    /// Westernmost longitude seen.
    pub west: f64,
}

impl Area {
    /// An area covering the single point `p`.
    pub fn from_point(p: LatLong) -> Self {
        Self {
            north: p.latitude,
            south: p.latitude,
            east: p.longitude,
            west: p.longitude,
        }
    }

    /// Grows the area to include `p`.
    pub fn expand(&mut self, p: LatLong) {
        self.north = self.north.max(p.latitude);
        self.south = self.south.min(p.latitude);
        self.east = self.east.max(p.longitude);
        self.west = self.west.min(p.longitude);
    }

    /// Reports whether the area spans the 180th meridian, i.e. its east
    /// bound is numerically less than its west bound.
    pub fn crosses_dateline(&self) -> bool {
        self.east < self.west
    }
}

/// Error reported by a [`Geocoder`] lookup.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct GeocodeError(pub String);

/// Resolves free-form place names to bounding rectangles.
pub trait Geocoder {
    /// Looks up `place`, returning zero or more candidate rectangles.
    ///
    /// An empty result is not an error at this layer; the expression
    /// parser turns it into one, naming the atom.
    fn lookup(&self, place: &str) -> Result<Vec<Rect>, GeocodeError>;
}

/// A geocoder backed by a fixed table, for tests and offline setups.
#[derive(Debug, Clone, Default)]
pub struct StaticGeocoder {
    /// Lower-cased place name to rectangles.
    places: HashMap<String, Vec<Rect>>,
}

impl StaticGeocoder {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `rects` for `place` (matched case-insensitively).
    pub fn insert(&mut self, place: impl Into<String>, rects: Vec<Rect>) {
        self.places.insert(place.into().to_lowercase(), rects);
    }
}

impl Geocoder for StaticGeocoder {
    fn lookup(&self, place: &str) -> Result<Vec<Rect>, GeocodeError> {
        Ok(self
            .places
            .get(&place.to_lowercase())
            .cloned()
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn area_expands_to_cover_points() {
        let mut area = Area::from_point(LatLong {
            latitude: 40.0,
            longitude: -74.0,
        });
        area.expand(LatLong {
            latitude: 51.5,
            longitude: 0.1,
        });
        assert_eq!(area.north, 51.5);
        assert_eq!(area.south, 40.0);
        assert_eq!(area.east, 0.1);
        assert_eq!(area.west, -74.0);
        assert!(!area.crosses_dateline());
    }

    #[test]
    fn static_geocoder_is_case_insensitive() {
        let mut geo = StaticGeocoder::new();
        let rect = Rect {
            north_east: LatLong {
                latitude: 41.0,
                longitude: -73.0,
            },
            south_west: LatLong {
                latitude: 40.0,
                longitude: -75.0,
            },
        };
        geo.insert("New York", vec![rect]);
        assert_eq!(geo.lookup("new york").unwrap(), vec![rect]);
        assert!(geo.lookup("atlantis").unwrap().is_empty());
    }
}
