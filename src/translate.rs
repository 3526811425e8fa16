//! Moving point clouds between module coordinate frames.
//!
//! Modules of a multi-module detector are often identical, so a point cloud
//! recorded in one module can be overlaid onto another by a rigid shift of
//! their centers. [`Geometry::split`] does this for mixed clouds, moving
//! every point that lives in another module into a target one.

use nalgebra::{Point3, Vector3};

use crate::error::{GeoError, Result};
use crate::geometry::{group_indices, Geometry};
use crate::sources::SourceId;


/// Conversion between pixel (voxel index) and physical coordinates.
pub trait PixelMeta {
    /// Pixel to physical coordinates, at the voxel center if `center` is set
    /// and at its lower corner otherwise.
    fn to_cm(&self, points: &[Point3<f64>], center: bool) -> Vec<Point3<f64>>;

    /// Physical to pixel coordinates, floored to voxel indices if `floor`.
    fn to_px(&self, points: &[Point3<f64>], floor: bool) -> Vec<Point3<f64>>;
}

/// Regular voxel grid spanning `[lower, upper]` with voxels of `size`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VoxelMeta {
    pub lower: Point3<f64>,
    pub upper: Point3<f64>,
    pub size: Vector3<f64>,
}

impl VoxelMeta {
    pub fn new(lower: Point3<f64>, upper: Point3<f64>, size: Vector3<f64>) -> Result<Self> {
        if size.iter().any(|&s| !(s > 0.0)) {
            return Err(GeoError::InvalidArgument(format!(
                "voxel size must be positive, got {:?}",
                size.as_slice()
            )));
        }
        if (0..3).any(|a| !(lower[a] <= upper[a])) {
            return Err(GeoError::InvalidArgument(
                "voxel grid lower bound exceeds its upper bound".into(),
            ));
        }
        Ok(Self { lower, upper, size })
    }

    /// Number of voxels along each axis.
    pub fn count(&self) -> [usize; 3] {
        let n = (self.upper - self.lower).component_div(&self.size);
        [n.x, n.y, n.z].map(|v| v.round() as usize)
    }
}

impl PixelMeta for VoxelMeta {
    fn to_cm(&self, points: &[Point3<f64>], center: bool) -> Vec<Point3<f64>> {
        let shift = if center { 0.5 } else { 0.0 };
        points
            .iter()
            .map(|p| self.lower + (p.coords.add_scalar(shift)).component_mul(&self.size))
            .collect()
    }

    fn to_px(&self, points: &[Point3<f64>], floor: bool) -> Vec<Point3<f64>> {
        points
            .iter()
            .map(|p| {
                let px = (p - self.lower).component_div(&self.size);
                Point3::from(if floor { px.map(f64::floor) } else { px })
            })
            .collect()
    }
}

impl Geometry {
    /// Moves a point cloud from one module to another, shifting it by the
    /// difference of their centers scaled per axis by `factor`.
    ///
    /// `factor` is needed when the points are not in detector units.
    pub fn translate(
        &self,
        points: &[Point3<f64>],
        source_id: usize,
        target_id: usize,
        factor: Option<Vector3<f64>>,
    ) -> Result<Vec<Point3<f64>>> {
        self.check_module(source_id)?;
        self.check_module(target_id)?;
        if source_id == target_id {
            return Ok(points.to_vec());
        }

        let mut offset = self.centers()[target_id] - self.centers()[source_id];
        if let Some(factor) = factor {
            offset.component_mul_assign(&factor);
        }

        Ok(points.iter().map(|p| p + offset).collect())
    }

    /// Moves every point into the target module, organised by module.
    ///
    /// The module of each point is read from its logical source when
    /// `sources` is given, and found by proximity otherwise. With `meta`,
    /// points are taken to be in pixel coordinates: they are converted to
    /// physical units before being moved and floored back to pixels after.
    ///
    /// Returns the shifted points and the indices of the points that were
    /// attributed to each module. Points whose source module does not exist
    /// are left untouched and belong to no module.
    pub fn split(
        &self,
        points: &[Point3<f64>],
        target_id: usize,
        sources: Option<&[SourceId]>,
        meta: Option<&dyn PixelMeta>,
    ) -> Result<(Vec<Point3<f64>>, Vec<Vec<usize>>)> {
        self.check_module(target_id)?;

        let mut points = match meta {
            Some(meta) => meta.to_cm(points, true),
            None => points.to_vec(),
        };

        let module_indices = match sources {
            Some(sources) => {
                if sources.len() != points.len() {
                    return Err(GeoError::InvalidArgument(format!(
                        "got {} sources for {} points",
                        sources.len(),
                        points.len()
                    )));
                }
                let mut groups = vec![Vec::new(); self.num_modules()];
                for (i, source) in sources.iter().enumerate() {
                    if let Some(group) = usize::try_from(source[0])
                        .ok()
                        .and_then(|m| groups.get_mut(m))
                    {
                        group.push(i);
                    }
                }
                groups
            }
            None => group_indices(&self.closest_module(&points), self.num_modules()),
        };

        for (module_id, indices) in module_indices.iter().enumerate() {
            if module_id == target_id {
                continue;
            }
            let offset = self.centers()[target_id] - self.centers()[module_id];
            for &i in indices {
                points[i] += offset;
            }
        }

        if let Some(meta) = meta {
            points = meta.to_px(&points, true);
        }

        Ok((points, module_indices))
    }
}
