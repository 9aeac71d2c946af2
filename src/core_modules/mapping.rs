// THEORY:
// The `mapping` module moves coordinates between the data's coordinate
// reference system (source space) and the output window's (working space).
// Stacking happens entirely in working space, since that is where grid cells
// correspond to output pixels. Results are mapped back to source space before
// they leave the stacker.
//
// Only the transforms the stacker needs are provided: identity for matching
// systems, and spherical (web) mercator for geographic data drawn on a web
// map. Asking for any other pair is a fatal `NoTransformPath` error raised
// before a single feature is read.

use crate::error::{StackError, StackResult};
use geo::Coord;
use serde::{Deserialize, Serialize};
use std::f64::consts::{FRAC_PI_2, FRAC_PI_4};
use std::fmt;

/// Forward (source to working space) and inverse coordinate transforms.
pub trait CoordinateMapping: Send + Sync {
    fn forward(&self, point: Coord<f64>) -> StackResult<Coord<f64>>;
    fn inverse(&self, point: Coord<f64>) -> StackResult<Coord<f64>>;
}

/// A coordinate reference system, identified by its authority code.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct Crs(String);

impl Crs {
    pub fn new(code: impl AsRef<str>) -> Self {
        Self(code.as_ref().trim().to_ascii_uppercase())
    }

    pub fn wgs84() -> Self {
        Self::new("EPSG:4326")
    }

    pub fn web_mercator() -> Self {
        Self::new("EPSG:3857")
    }

    pub fn code(&self) -> &str {
        &self.0
    }

    fn is_geographic(&self) -> bool {
        matches!(self.code(), "EPSG:4326" | "CRS:84" | "OGC:CRS84")
    }

    fn is_web_mercator(&self) -> bool {
        matches!(self.code(), "EPSG:3857" | "EPSG:3785" | "EPSG:900913")
    }
}

impl From<String> for Crs {
    fn from(code: String) -> Self {
        Self::new(code)
    }
}

impl From<Crs> for String {
    fn from(crs: Crs) -> Self {
        crs.0
    }
}

impl fmt::Display for Crs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Finds the mapping from `source` to `target`.
pub fn find_mapping(source: &Crs, target: &Crs) -> StackResult<Box<dyn CoordinateMapping>> {
    if source == target
        || (source.is_geographic() && target.is_geographic())
        || (source.is_web_mercator() && target.is_web_mercator())
    {
        return Ok(Box::new(Identity));
    }
    if source.is_geographic() && target.is_web_mercator() {
        return Ok(Box::new(SphericalMercator));
    }
    if source.is_web_mercator() && target.is_geographic() {
        return Ok(Box::new(Reversed(SphericalMercator)));
    }
    Err(StackError::NoTransformPath {
        from: source.to_string(),
        to: target.to_string(),
    })
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Identity;

impl CoordinateMapping for Identity {
    fn forward(&self, point: Coord<f64>) -> StackResult<Coord<f64>> {
        Ok(point)
    }

    fn inverse(&self, point: Coord<f64>) -> StackResult<Coord<f64>> {
        Ok(point)
    }
}

const EARTH_RADIUS_M: f64 = 6_378_137.0;

/// Longitude/latitude degrees to spherical mercator meters.
#[derive(Debug, Clone, Copy, Default)]
pub struct SphericalMercator;

impl CoordinateMapping for SphericalMercator {
    fn forward(&self, point: Coord<f64>) -> StackResult<Coord<f64>> {
        if !point.x.is_finite() || !point.y.is_finite() || point.y.abs() >= 90.0 {
            return Err(StackError::TransformFailed {
                x: point.x,
                y: point.y,
                reason: "latitude outside the mercator domain".into(),
            });
        }
        Ok(Coord {
            x: EARTH_RADIUS_M * point.x.to_radians(),
            y: EARTH_RADIUS_M * (FRAC_PI_4 + point.y.to_radians() / 2.0).tan().ln(),
        })
    }

    fn inverse(&self, point: Coord<f64>) -> StackResult<Coord<f64>> {
        if !point.x.is_finite() || !point.y.is_finite() {
            return Err(StackError::TransformFailed {
                x: point.x,
                y: point.y,
                reason: "non-finite mercator coordinate".into(),
            });
        }
        Ok(Coord {
            x: (point.x / EARTH_RADIUS_M).to_degrees(),
            y: (2.0 * (point.y / EARTH_RADIUS_M).exp().atan() - FRAC_PI_2).to_degrees(),
        })
    }
}

/// Swaps the directions of a mapping.
#[derive(Debug, Clone, Copy)]
pub struct Reversed<M>(pub M);

impl<M: CoordinateMapping> CoordinateMapping for Reversed<M> {
    fn forward(&self, point: Coord<f64>) -> StackResult<Coord<f64>> {
        self.0.inverse(point)
    }

    fn inverse(&self, point: Coord<f64>) -> StackResult<Coord<f64>> {
        self.0.forward(point)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_systems_map_to_identity() {
        let mapping = find_mapping(&Crs::new("epsg:4326"), &Crs::wgs84()).unwrap();
        let p = Coord { x: 4.0, y: 4.0 };
        assert_eq!(mapping.forward(p).unwrap(), p);
        assert_eq!(mapping.inverse(p).unwrap(), p);
    }

    #[test]
    fn mercator_round_trips_within_tolerance() {
        let mapping = find_mapping(&Crs::wgs84(), &Crs::new("EPSG:3785")).unwrap();
        let p = Coord { x: -121.813201, y: 48.777343 };
        let projected = mapping.forward(p).unwrap();
        assert!((projected.x - -13_560_183.507).abs() < 0.01);
        assert!((projected.y - 6_237_165.261).abs() < 0.01);
        let back = mapping.inverse(projected).unwrap();
        assert!((back.x - p.x).abs() < 1e-9);
        assert!((back.y - p.y).abs() < 1e-9);
    }

    #[test]
    fn reversed_mapping_swaps_directions() {
        let mapping = find_mapping(&Crs::web_mercator(), &Crs::wgs84()).unwrap();
        let back = mapping.forward(Coord { x: 0.0, y: 0.0 }).unwrap();
        assert!(back.x.abs() < 1e-12 && back.y.abs() < 1e-12);
    }

    #[test]
    fn poles_cannot_be_projected() {
        assert!(SphericalMercator.forward(Coord { x: 0.0, y: 90.0 }).is_err());
    }

    #[test]
    fn unknown_pairs_have_no_transform_path() {
        let err = find_mapping(&Crs::new("EPSG:25832"), &Crs::web_mercator()).err().unwrap();
        assert!(matches!(err, StackError::NoTransformPath { .. }));
    }
}
