//! Multi-volume detector geometry.
//!
//! This module builds the TPC → module → detector hierarchy from a raw
//! `(N_m, N_t, 3, 2)` array of TPC boundaries and answers spatial queries
//! against it:
//! - Volume hierarchy (module boxes and centers, the detector box)
//! - Cathode/anode planes when every module has a central cathode
//! - Logical source lookups
//! - Nearest-TPC and nearest-module assignment of point clouds
//! - Signed point-to-TPC offsets
//!
//! All derived quantities are computed once at construction; a [`Geometry`]
//! is immutable afterwards and can be shared freely between readers.

use itertools::Itertools;
use log::debug;
use nalgebra::{Point3, Vector3};
use ndarray::{ArrayView4, ArrayViewD};

use crate::error::{GeoError, Result};
use crate::opdet::OpDets;
use crate::planes::{build_planes, ModulePlanes, Plane, TpcPlanes, WallId};
use crate::sources::{SourceId, SourceMap};
use crate::volume::Volume;

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::{Array4, ArrayD};

    /// Single module, two TPCs sharing a cathode at z = 0.
    pub(crate) fn single_module() -> Array4<f64> {
        let mut b = Array4::<f64>::zeros((1, 2, 3, 2));
        for t in 0..2 {
            b[[0, t, 0, 1]] = 10.0;
            b[[0, t, 1, 1]] = 10.0;
        }
        b[[0, 0, 2, 0]] = -10.0;
        b[[0, 1, 2, 1]] = 10.0;
        b
    }

    /// Two modules side by side along x, each with two TPCs drifting along x.
    pub(crate) fn two_modules() -> Array4<f64> {
        let bounds = [
            [[-100.0, -50.0], [-50.0, 50.0], [-50.0, 50.0]],
            [[-50.0, 0.0], [-50.0, 50.0], [-50.0, 50.0]],
            [[0.0, 50.0], [-50.0, 50.0], [-50.0, 50.0]],
            [[50.0, 100.0], [-50.0, 50.0], [-50.0, 50.0]],
        ];
        Array4::from_shape_fn((2, 2, 3, 2), |(m, t, a, s)| bounds[2 * m + t][a][s])
    }

    fn points(coords: &[[f64; 3]]) -> Vec<Point3<f64>> {
        coords.iter().map(|c| Point3::new(c[0], c[1], c[2])).collect()
    }

    #[test]
    fn builds_hierarchy() {
        let geo = Geometry::new(two_modules().view(), None, None).unwrap();
        assert_eq!(geo.num_modules(), 2);
        assert_eq!(geo.num_tpcs(), 4);
        assert_eq!(geo.num_tpcs_per_module(), 2);

        assert_eq!(
            geo.modules()[0].bounds(),
            [[-100.0, 0.0], [-50.0, 50.0], [-50.0, 50.0]]
        );
        assert_eq!(
            geo.modules()[1].bounds(),
            [[0.0, 100.0], [-50.0, 50.0], [-50.0, 50.0]]
        );
        assert_eq!(geo.centers()[0], Point3::new(-50.0, 0.0, 0.0));
        assert_eq!(geo.centers()[1], Point3::new(50.0, 0.0, 0.0));
        assert_eq!(
            geo.detector().bounds(),
            [[-100.0, 100.0], [-50.0, 50.0], [-50.0, 50.0]]
        );
        assert_eq!(geo.ranges()[0], Vector3::new(50.0, 100.0, 100.0));
    }

    #[test]
    fn module_is_merge_of_its_tpcs() {
        let geo = Geometry::new(two_modules().view(), None, None).unwrap();
        for m in 0..geo.num_modules() {
            let tpcs = geo.module_tpcs(m).unwrap();
            for axis in 0..3 {
                let lo = tpcs.iter().map(|t| t.lower[axis]).fold(f64::INFINITY, f64::min);
                let hi = tpcs.iter().map(|t| t.upper[axis]).fold(f64::NEG_INFINITY, f64::max);
                assert_eq!(geo.modules()[m].lower[axis], lo);
                assert_eq!(geo.modules()[m].upper[axis], hi);
            }
        }
    }

    #[test]
    fn rejects_bad_boundaries() {
        let b = Array4::<f64>::zeros((1, 2, 2, 2));
        assert!(matches!(
            Geometry::new(b.view(), None, None),
            Err(GeoError::Geometry(_))
        ));

        let b = Array4::<f64>::zeros((0, 2, 3, 2));
        assert!(Geometry::new(b.view(), None, None).is_err());

        let mut b = single_module();
        b[[0, 0, 1, 0]] = 20.0;
        assert!(Geometry::new(b.view(), None, None).is_err());
    }

    #[test]
    fn sources_must_match_boundaries() {
        let sources = Array4::<i64>::zeros((1, 3, 1, 2));
        let err = Geometry::new(single_module().view(), Some(sources.view()), None).unwrap_err();
        assert!(matches!(err, GeoError::ShapeMismatch(_)));
    }

    #[test]
    fn opdets_must_match_boundaries() {
        let opdets = ArrayD::<f64>::zeros(vec![2, 5, 3]);
        let err = Geometry::new(single_module().view(), None, Some(opdets.view())).unwrap_err();
        assert!(matches!(err, GeoError::ShapeMismatch(_)));

        let opdets = ArrayD::<f64>::zeros(vec![1, 5, 3]);
        let geo = Geometry::new(single_module().view(), None, Some(opdets.view())).unwrap();
        assert_eq!(geo.opdets().map(OpDets::len), Some(5));
    }

    #[test]
    fn planes_of_single_module() {
        let geo = Geometry::new(single_module().view(), None, None).unwrap();
        assert_eq!(geo.cathode(0), Some(Plane { axis: 2, position: 0.0 }));
        assert_eq!(geo.cathode_wall(0, 0), Some(WallId { axis: 2, side: 1 }));
        assert_eq!(geo.cathode_wall(0, 1), Some(WallId { axis: 2, side: 0 }));
        assert_eq!(geo.anode(0, 0), Some(Plane { axis: 2, position: -10.0 }));
        assert_eq!(geo.drift_dir(0, 0), Some(Vector3::new(0.0, 0.0, -1.0)));
        assert_eq!(geo.drift_dir(0, 1), Some(Vector3::new(0.0, 0.0, 1.0)));
    }

    #[test]
    fn cathode_sides_are_opposite_and_drifts_antiparallel() {
        let geo = Geometry::new(two_modules().view(), None, None).unwrap();
        for m in 0..geo.num_modules() {
            let a = geo.cathode_wall(m, 0).unwrap();
            let b = geo.cathode_wall(m, 1).unwrap();
            assert_eq!(a.axis, b.axis);
            assert_ne!(a.side, b.side);
            let da = geo.drift_dir(m, 0).unwrap();
            let db = geo.drift_dir(m, 1).unwrap();
            assert_relative_eq!(da.dot(&db), -1.0);
        }
    }

    #[test]
    fn no_planes_without_central_cathode() {
        let b = Array4::from_shape_fn((2, 1, 3, 2), |(m, _, a, s)| {
            if a == 0 {
                (m as f64) * 10.0 + (s as f64) * 10.0
            } else {
                (s as f64) * 10.0
            }
        });
        let geo = Geometry::new(b.view(), None, None).unwrap();
        assert!(geo.planes().is_none());
        assert!(geo.cathode(0).is_none());
        assert!(geo.drift_dir(1, 0).is_none());
    }

    #[test]
    fn non_aligned_drift_fails_construction() {
        let mut b = single_module();
        b[[0, 1, 0, 0]] = 5.0;
        b[[0, 1, 0, 1]] = 15.0;
        assert!(matches!(
            Geometry::new(b.view(), None, None),
            Err(GeoError::Geometry(_))
        ));
    }

    #[test]
    fn closest_tpc_scenario() {
        let geo = Geometry::new(single_module().view(), None, None).unwrap();
        let pts = points(&[[5.0, 5.0, 5.0], [5.0, 5.0, -5.0], [20.0, 5.0, -1.0]]);
        let indices = geo.closest_tpc_indices(&pts);
        assert_eq!(indices, vec![vec![1, 2], vec![0]]);

        let offsets = geo.point_box_offset(&pts[..1], 0, 0).unwrap();
        assert_eq!(offsets[0], Vector3::new(0.0, 0.0, 5.0));
    }

    #[test]
    fn closest_tpc_ties_go_to_lowest_index() {
        let geo = Geometry::new(single_module().view(), None, None).unwrap();
        // on the shared cathode, inside both TPCs
        let pts = points(&[[5.0, 5.0, 0.0], [5.0, 20.0, 0.0]]);
        let indices = geo.closest_tpc_indices(&pts);
        assert_eq!(indices, vec![vec![0, 1], vec![]]);
    }

    #[test]
    fn closest_module_uses_bisecting_cells() {
        let geo = Geometry::new(two_modules().view(), None, None).unwrap();
        let pts = points(&[
            [-10.0, 0.0, 0.0],
            [10.0, 0.0, 0.0],
            [-500.0, 900.0, 0.0],
            [500.0, -900.0, 0.0],
            // exactly on the cell boundary, falls back to the nearest center
            [0.0, 0.0, 0.0],
        ]);
        assert_eq!(geo.closest_module(&pts), vec![0, 1, 0, 1, 0]);
        assert_eq!(
            geo.closest_module_indices(&pts),
            vec![vec![0, 2, 4], vec![1, 3]]
        );
    }

    #[test]
    fn contributors_and_tpc_point_indices() {
        let geo = Geometry::new(two_modules().view(), None, None).unwrap();
        let sources: Vec<SourceId> = vec![[1, 0], [0, 1], [1, 0], [7, 7]];
        let (modules, tpcs) = geo.get_contributors(&sources);
        assert_eq!(modules, vec![0, 1]);
        assert_eq!(tpcs, vec![1, 0]);

        assert_eq!(geo.get_tpc_point_indices(&sources, 1, 0).unwrap(), vec![0, 2]);
        assert!(geo.get_tpc_point_indices(&sources, 1, 1).unwrap().is_empty());
        assert!(matches!(
            geo.get_tpc_point_indices(&sources, 2, 0),
            Err(GeoError::InvalidArgument(_))
        ));
    }

    #[test]
    fn min_offset_picks_largest_per_axis() {
        let geo = Geometry::new(single_module().view(), None, None).unwrap();
        let pts = points(&[[12.0, 5.0, 5.0], [-3.0, 5.0, 5.0], [5.0, 5.0, 14.0]]);
        let offset = geo.min_offset_to_tpc(&pts, 0, 1).unwrap();
        assert_eq!(offset, Vector3::new(-3.0, 0.0, 4.0));
        assert_eq!(geo.min_offset_to_tpc(&[], 0, 1).unwrap(), Vector3::zeros());
    }
}

/// Detector made of rectangular modules, each split into box-shaped TPCs.
#[derive(Debug, Clone, PartialEq)]
pub struct Geometry {
    tpcs: Vec<Volume>, // flattened in (module, tpc) order
    tpcs_per_module: usize,
    modules: Vec<Volume>,
    centers: Vec<Point3<f64>>,
    module_cells: Vec<Volume>, // nearest-module cells, possibly unbounded
    detector: Volume,
    sources: SourceMap,
    opdets: Option<OpDets>,
    planes: Option<Vec<ModulePlanes>>,
}

impl Geometry {
    /// Builds a geometry from in-memory arrays.
    ///
    /// - `boundaries`: `(N_m, N_t, 3, 2)` TPC boundaries
    /// - `sources`: optional `(N_m, N_t, N_s, 2)` logical `[module, tpc]`
    ///   pairs feeding each physical TPC, identity mapping when absent
    /// - `opdets`: optional `(N_m[, N_t], N_p, 3)` optical detector positions
    pub fn new(
        boundaries: ArrayView4<'_, f64>,
        sources: Option<ArrayView4<'_, i64>>,
        opdets: Option<ArrayViewD<'_, f64>>,
    ) -> Result<Self> {
        let shape = boundaries.shape();
        if shape[2] != 3 || shape[3] != 2 {
            return Err(GeoError::Geometry(format!(
                "boundaries must have shape (N_m, N_t, 3, 2), got {:?}",
                shape
            )));
        }
        let (num_modules, tpcs_per_module) = (shape[0], shape[1]);
        if num_modules == 0 || tpcs_per_module == 0 {
            return Err(GeoError::Geometry(format!(
                "the detector must contain at least one TPC, got shape {:?}",
                shape
            )));
        }

        let mut tpcs = Vec::with_capacity(num_modules * tpcs_per_module);
        for m in 0..num_modules {
            for t in 0..tpcs_per_module {
                let b = |a: usize, s: usize| boundaries[[m, t, a, s]];
                tpcs.push(Volume::from_bounds([
                    [b(0, 0), b(0, 1)],
                    [b(1, 0), b(1, 1)],
                    [b(2, 0), b(2, 1)],
                ])?);
            }
        }

        let sources = match sources {
            Some(array) => SourceMap::from_array(array, num_modules, tpcs_per_module)?,
            None => SourceMap::identity(num_modules, tpcs_per_module),
        };

        let opdets = opdets
            .map(|array| OpDets::from_array(array, num_modules, tpcs_per_module))
            .transpose()?;

        let modules = tpcs
            .chunks(tpcs_per_module)
            .map(Volume::merge)
            .collect::<Result<Vec<_>>>()?;
        let centers: Vec<Point3<f64>> = modules.iter().map(Volume::center).collect();
        let module_cells = build_module_cells(&centers);
        let detector = Volume::merge(&tpcs)?;

        // Cathodes/anodes only exist when every module shares a central cathode
        let planes = if tpcs_per_module == 2 {
            let per_module: Vec<&[Volume]> = tpcs.chunks(tpcs_per_module).collect();
            let planes = build_planes(&per_module)?;
            for (m, p) in planes.iter().enumerate() {
                debug!(
                    "module {}: cathode at {} along axis {}",
                    m, p.cathode.position, p.cathode.axis
                );
            }
            Some(planes)
        } else {
            None
        };

        debug!(
            "built geometry with {} modules of {} TPCs, detector {:?}",
            num_modules,
            tpcs_per_module,
            detector.bounds()
        );

        Ok(Self {
            tpcs,
            tpcs_per_module,
            modules,
            centers,
            module_cells,
            detector,
            sources,
            opdets,
            planes,
        })
    }

    /// Number of TPC volumes, `N_m * N_t`.
    pub fn num_tpcs(&self) -> usize {
        self.tpcs.len()
    }

    pub fn num_tpcs_per_module(&self) -> usize {
        self.tpcs_per_module
    }

    pub fn num_modules(&self) -> usize {
        self.modules.len()
    }

    /// All TPC boxes, in `(module, tpc)` order.
    pub fn tpcs(&self) -> &[Volume] {
        &self.tpcs
    }

    pub fn modules(&self) -> &[Volume] {
        &self.modules
    }

    pub fn detector(&self) -> &Volume {
        &self.detector
    }

    /// Center of each module.
    pub fn centers(&self) -> &[Point3<f64>] {
        &self.centers
    }

    /// Extent of each TPC along each axis, in `(module, tpc)` order.
    pub fn ranges(&self) -> Vec<Vector3<f64>> {
        self.tpcs.iter().map(Volume::ranges).collect()
    }

    pub fn sources(&self) -> &SourceMap {
        &self.sources
    }

    pub fn opdets(&self) -> Option<&OpDets> {
        self.opdets.as_ref()
    }

    /// Flat index of a `(module, tpc)` pair.
    pub fn tpc_index(&self, module_id: usize, tpc_id: usize) -> Result<usize> {
        if module_id >= self.num_modules() || tpc_id >= self.tpcs_per_module {
            return Err(GeoError::InvalidArgument(format!(
                "no TPC ({}, {}) in a detector of {} modules of {} TPCs",
                module_id,
                tpc_id,
                self.num_modules(),
                self.tpcs_per_module
            )));
        }
        Ok(module_id * self.tpcs_per_module + tpc_id)
    }

    pub fn tpc(&self, module_id: usize, tpc_id: usize) -> Result<&Volume> {
        Ok(&self.tpcs[self.tpc_index(module_id, tpc_id)?])
    }

    /// TPC boxes of one module.
    pub fn module_tpcs(&self, module_id: usize) -> Result<&[Volume]> {
        self.check_module(module_id)?;
        let start = module_id * self.tpcs_per_module;
        Ok(&self.tpcs[start..start + self.tpcs_per_module])
    }

    pub(crate) fn check_module(&self, module_id: usize) -> Result<()> {
        if module_id >= self.num_modules() {
            return Err(GeoError::InvalidArgument(format!(
                "module ID should be in [0, {}), got {}",
                self.num_modules(),
                module_id
            )));
        }
        Ok(())
    }

    /// Cathode/anode planes of every module, `None` unless each module is
    /// made of two TPCs sharing a central cathode.
    pub fn planes(&self) -> Option<&[ModulePlanes]> {
        self.planes.as_deref()
    }

    pub fn cathode(&self, module_id: usize) -> Option<Plane> {
        self.planes.as_ref()?.get(module_id).map(|p| p.cathode)
    }

    pub fn anode(&self, module_id: usize, tpc_id: usize) -> Option<Plane> {
        self.tpc_planes(module_id, tpc_id).map(|p| p.anode)
    }

    pub fn cathode_wall(&self, module_id: usize, tpc_id: usize) -> Option<WallId> {
        self.tpc_planes(module_id, tpc_id).map(|p| p.cathode_wall)
    }

    pub fn anode_wall(&self, module_id: usize, tpc_id: usize) -> Option<WallId> {
        self.tpc_planes(module_id, tpc_id).map(|p| p.anode_wall)
    }

    /// Drift direction in a TPC, from its cathode towards its anode.
    pub fn drift_dir(&self, module_id: usize, tpc_id: usize) -> Option<Vector3<f64>> {
        self.tpc_planes(module_id, tpc_id).map(|p| p.drift_dir)
    }

    fn tpc_planes(&self, module_id: usize, tpc_id: usize) -> Option<&TpcPlanes> {
        self.planes.as_ref()?.get(module_id)?.tpcs.get(tpc_id)
    }

    /// Physical TPCs fed by at least one of the given logical sources.
    ///
    /// Returns the module IDs and the TPC IDs of the contributors, in
    /// `(module, tpc)` order.
    pub fn get_contributors(&self, sources: &[SourceId]) -> (Vec<usize>, Vec<usize>) {
        let unique: Vec<&SourceId> = sources.iter().unique().collect();
        (0..self.num_tpcs())
            .filter(|&i| unique.iter().any(|s| self.sources.matches(i, s)))
            .map(|i| (i / self.tpcs_per_module, i % self.tpcs_per_module))
            .unzip()
    }

    /// Indices of the points whose logical source feeds a physical TPC.
    pub fn get_tpc_point_indices(
        &self,
        sources: &[SourceId],
        module_id: usize,
        tpc_id: usize,
    ) -> Result<Vec<usize>> {
        let index = self.tpc_index(module_id, tpc_id)?;
        Ok(sources
            .iter()
            .positions(|s| self.sources.matches(index, s))
            .collect())
    }

    /// For each TPC, the indices of the points closer to it than to any
    /// other TPC. Points inside a TPC are at distance zero from it.
    ///
    /// Ties go to the TPC that comes first in `(module, tpc)` order.
    pub fn closest_tpc_indices(&self, points: &[Point3<f64>]) -> Vec<Vec<usize>> {
        let labels: Vec<usize> = points
            .iter()
            .map(|p| {
                let mut best = (0, f64::INFINITY);
                for (i, tpc) in self.tpcs.iter().enumerate() {
                    let dist = tpc.offset(p).norm();
                    if dist < best.1 {
                        best = (i, dist);
                    }
                }
                best.0
            })
            .collect();

        group_indices(&labels, self.num_tpcs())
    }

    /// For each point, the ID of the closest module.
    ///
    /// Each module owns the cell obtained by bisecting, axis by axis, the
    /// separation between its center and every other module center. Points
    /// that fall in no cell (exactly on a boundary) go to the module with
    /// the nearest center.
    pub fn closest_module(&self, points: &[Point3<f64>]) -> Vec<usize> {
        let mut fallback = 0;
        let ids = points
            .iter()
            .map(|p| {
                self.module_cells
                    .iter()
                    .position(|cell| cell.contains(p))
                    .unwrap_or_else(|| {
                        fallback += 1;
                        self.nearest_center(p)
                    })
            })
            .collect();

        if fallback > 0 {
            debug!(
                "{} points on nearest-module cell boundaries, assigned by center distance",
                fallback
            );
        }
        ids
    }

    /// For each module, the indices of the points closest to it.
    pub fn closest_module_indices(&self, points: &[Point3<f64>]) -> Vec<Vec<usize>> {
        group_indices(&self.closest_module(points), self.num_modules())
    }

    fn nearest_center(&self, point: &Point3<f64>) -> usize {
        let mut best = (0, f64::INFINITY);
        for (m, c) in self.centers.iter().enumerate() {
            let dist = nalgebra::distance(c, point);
            if dist < best.1 {
                best = (m, dist);
            }
        }
        best.0
    }

    /// Signed offset of each point with respect to a TPC box.
    pub fn point_box_offset(
        &self,
        points: &[Point3<f64>],
        module_id: usize,
        tpc_id: usize,
    ) -> Result<Vec<Vector3<f64>>> {
        let tpc = self.tpc(module_id, tpc_id)?;
        Ok(points.iter().map(|p| tpc.offset(p)).collect())
    }

    /// Per-axis offset of largest magnitude across the point cloud, i.e.
    /// the offset that would bring the furthest point back to the TPC.
    pub fn min_offset_to_tpc(
        &self,
        points: &[Point3<f64>],
        module_id: usize,
        tpc_id: usize,
    ) -> Result<Vector3<f64>> {
        let offsets = self.point_box_offset(points, module_id, tpc_id)?;
        Ok(offsets.iter().fold(Vector3::zeros(), |acc, o| {
            Vector3::from_fn(|a, _| if o[a].abs() > acc[a].abs() { o[a] } else { acc[a] })
        }))
    }
}

/// Nearest-module cells: along each axis, the cell of a module extends
/// halfway to the closest module center on either side, and to infinity
/// where there is none.
fn build_module_cells(centers: &[Point3<f64>]) -> Vec<Volume> {
    centers
        .iter()
        .map(|c| {
            let mut lower = Point3::from([f64::NEG_INFINITY; 3]);
            let mut upper = Point3::from([f64::INFINITY; 3]);
            for other in centers {
                let d = other - c;
                for axis in 0..3 {
                    if d[axis] < 0.0 {
                        lower[axis] = lower[axis].max(c[axis] + d[axis] / 2.0);
                    } else if d[axis] > 0.0 {
                        upper[axis] = upper[axis].min(c[axis] + d[axis] / 2.0);
                    }
                }
            }
            Volume { lower, upper }
        })
        .collect()
}

/// Groups point indices by label.
pub(crate) fn group_indices(labels: &[usize], num_groups: usize) -> Vec<Vec<usize>> {
    let mut groups = vec![Vec::new(); num_groups];
    for (i, &label) in labels.iter().enumerate() {
        groups[label].push(i);
    }
    groups
}
