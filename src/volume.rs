//! Axis-aligned boxes, the building block of every detector volume.
//!
//! TPCs, modules, the detector as a whole and the containment reference
//! volumes are all [`Volume`]s. This module provides:
//! - Merging a set of boxes into their bounding union
//! - Centers and extents
//! - Per-wall shrinking by a margin
//! - Signed point-to-box offsets
//! - Strict point containment

use nalgebra::{Point3, Vector3};
use serde::{Deserialize, Serialize};

use crate::error::{GeoError, Result};

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn unit(lo: f64, hi: f64) -> Volume {
        Volume::new(Point3::new(lo, lo, lo), Point3::new(hi, hi, hi)).unwrap()
    }

    #[test]
    fn rejects_inverted_bounds() {
        let result = Volume::new(Point3::new(0.0, 1.0, 0.0), Point3::new(1.0, 0.0, 1.0));
        assert!(matches!(result, Err(GeoError::Geometry(_))));
    }

    #[test]
    fn merge_takes_min_lower_max_upper() {
        let a = Volume::from_bounds([[0.0, 10.0], [-5.0, 5.0], [-10.0, 0.0]]).unwrap();
        let b = Volume::from_bounds([[2.0, 12.0], [-6.0, 4.0], [0.0, 10.0]]).unwrap();
        let merged = Volume::merge([&a, &b]).unwrap();
        assert_eq!(merged.lower, Point3::new(0.0, -6.0, -10.0));
        assert_eq!(merged.upper, Point3::new(12.0, 5.0, 10.0));
    }

    #[test]
    fn merge_of_nothing_is_an_error() {
        let empty: Vec<&Volume> = Vec::new();
        assert!(Volume::merge(empty).is_err());
    }

    #[test]
    fn center_and_ranges() {
        let v = Volume::from_bounds([[0.0, 10.0], [0.0, 4.0], [-10.0, 0.0]]).unwrap();
        assert_eq!(v.center(), Point3::new(5.0, 2.0, -5.0));
        assert_eq!(v.ranges(), Vector3::new(10.0, 4.0, 10.0));
    }

    #[test]
    fn offset_is_zero_inside() {
        let v = unit(0.0, 10.0);
        assert_eq!(v.offset(&Point3::new(5.0, 1.0, 9.0)), Vector3::zeros());
        // on the wall counts as inside
        assert_eq!(v.offset(&Point3::new(0.0, 10.0, 5.0)), Vector3::zeros());
    }

    #[test]
    fn offset_is_signed_distance_to_violated_bound() {
        let v = unit(0.0, 10.0);
        assert_eq!(
            v.offset(&Point3::new(-3.0, 5.0, 5.0)),
            Vector3::new(-3.0, 0.0, 0.0)
        );
        assert_eq!(
            v.offset(&Point3::new(5.0, 12.5, 5.0)),
            Vector3::new(0.0, 2.5, 0.0)
        );
        let corner = v.offset(&Point3::new(11.0, -1.0, 13.0));
        assert_eq!(corner, Vector3::new(1.0, -1.0, 3.0));
        assert_relative_eq!(corner.norm(), 11.0_f64.sqrt());
    }

    #[test]
    fn contains_is_strict() {
        let v = unit(0.0, 10.0);
        assert!(v.contains(&Point3::new(5.0, 5.0, 5.0)));
        assert!(!v.contains(&Point3::new(0.0, 5.0, 5.0)));
        assert!(!v.contains(&Point3::new(5.0, 5.0, 10.0)));
    }

    #[test]
    fn shrink_moves_each_wall_inwards() {
        let v = unit(0.0, 10.0);
        let shrunk = v.shrink(&[[1.0, 2.0], [0.0, 0.0], [3.0, 0.5]]);
        assert_eq!(shrunk.lower, Point3::new(1.0, 0.0, 3.0));
        assert_eq!(shrunk.upper, Point3::new(8.0, 10.0, 9.5));
    }
}

/// Axis-aligned box with a lower and an upper bound along each axis.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Volume {
    pub lower: Point3<f64>,
    pub upper: Point3<f64>,
}

impl Volume {
    /// Creates a box, checking that `lower <= upper` along every axis.
    pub fn new(lower: Point3<f64>, upper: Point3<f64>) -> Result<Self> {
        for axis in 0..3 {
            // also rejects NaN bounds
            if !(lower[axis] <= upper[axis]) {
                return Err(GeoError::Geometry(format!(
                    "lower bound {} exceeds upper bound {} along axis {}",
                    lower[axis], upper[axis], axis
                )));
            }
        }
        Ok(Self { lower, upper })
    }

    /// Creates a box from `[[x_lo, x_hi], [y_lo, y_hi], [z_lo, z_hi]]`.
    pub fn from_bounds(bounds: [[f64; 2]; 3]) -> Result<Self> {
        Self::new(
            Point3::new(bounds[0][0], bounds[1][0], bounds[2][0]),
            Point3::new(bounds[0][1], bounds[1][1], bounds[2][1]),
        )
    }

    /// Returns the bounds as `[[x_lo, x_hi], [y_lo, y_hi], [z_lo, z_hi]]`.
    pub fn bounds(&self) -> [[f64; 2]; 3] {
        [
            [self.lower.x, self.upper.x],
            [self.lower.y, self.upper.y],
            [self.lower.z, self.upper.z],
        ]
    }

    /// Bound of a single wall, `side` 0 being the lower wall and 1 the upper.
    pub fn wall(&self, axis: usize, side: usize) -> f64 {
        if side == 0 {
            self.lower[axis]
        } else {
            self.upper[axis]
        }
    }

    /// Smallest box that encompasses all the given boxes.
    pub fn merge<'a, I>(volumes: I) -> Result<Self>
    where
        I: IntoIterator<Item = &'a Volume>,
    {
        let mut iter = volumes.into_iter();
        let first = iter
            .next()
            .ok_or_else(|| GeoError::Geometry("cannot merge an empty list of volumes".into()))?;

        Ok(iter.fold(*first, |acc, v| Volume {
            lower: acc.lower.inf(&v.lower),
            upper: acc.upper.sup(&v.upper),
        }))
    }

    /// Midpoint along each axis.
    pub fn center(&self) -> Point3<f64> {
        nalgebra::center(&self.lower, &self.upper)
    }

    /// Extent along each axis.
    pub fn ranges(&self) -> Vector3<f64> {
        self.upper - self.lower
    }

    /// Moves each wall inwards by its own margin, given as
    /// `[[x_lo, x_hi], [y_lo, y_hi], [z_lo, z_hi]]`.
    ///
    /// Large margins may produce a box whose lower bound exceeds its upper
    /// bound; such a box simply contains no point.
    pub fn shrink(&self, margin: &[[f64; 2]; 3]) -> Volume {
        let mut out = *self;
        for axis in 0..3 {
            out.lower[axis] += margin[axis][0];
            out.upper[axis] -= margin[axis][1];
        }
        out
    }

    /// Signed offset from the box to a point.
    ///
    /// Zero along an axis where the point lies between the bounds, otherwise
    /// the signed distance to the violated bound: negative below the lower
    /// bound, positive above the upper one.
    pub fn offset(&self, point: &Point3<f64>) -> Vector3<f64> {
        Vector3::from_fn(|axis, _| {
            let p = point[axis];
            if p < self.lower[axis] {
                p - self.lower[axis]
            } else if p > self.upper[axis] {
                p - self.upper[axis]
            } else {
                0.0
            }
        })
    }

    /// Whether the point lies strictly inside the box along every axis.
    pub fn contains(&self, point: &Point3<f64>) -> bool {
        (0..3).all(|axis| point[axis] > self.lower[axis] && point[axis] < self.upper[axis])
    }

    /// Whether every point of the cloud lies strictly inside the box.
    pub fn contains_all(&self, points: &[Point3<f64>]) -> bool {
        points.iter().all(|p| self.contains(p))
    }
}
