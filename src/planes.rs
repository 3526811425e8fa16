//! Cathode and anode planes of central-cathode modules.
//!
//! A module made of exactly two TPCs sharing a cathode has a single drift
//! axis. The cathode sits halfway between the two TPC centers, each TPC
//! owns the anode on its outer wall, and charge drifts from the cathode
//! towards that anode.

use nalgebra::Vector3;

use crate::error::{GeoError, Result};
use crate::volume::Volume;

/// Components of the normalised drift vector below this value are treated
/// as zero when identifying the drift axis.
pub const AXIS_ALIGNMENT_TOLERANCE: f64 = 1e-9;

#[cfg(test)]
mod tests {
    use super::*;

    fn module(a: [[f64; 2]; 3], b: [[f64; 2]; 3]) -> Vec<Volume> {
        vec![
            Volume::from_bounds(a).unwrap(),
            Volume::from_bounds(b).unwrap(),
        ]
    }

    #[test]
    fn shared_cathode_along_z() {
        let tpcs = module(
            [[0.0, 10.0], [0.0, 10.0], [-10.0, 0.0]],
            [[0.0, 10.0], [0.0, 10.0], [0.0, 10.0]],
        );
        let planes = ModulePlanes::from_tpcs(&tpcs).unwrap();

        assert_eq!(planes.cathode, Plane { axis: 2, position: 0.0 });
        assert_eq!(planes.tpcs[0].cathode_wall, WallId { axis: 2, side: 1 });
        assert_eq!(planes.tpcs[0].anode_wall, WallId { axis: 2, side: 0 });
        assert_eq!(planes.tpcs[1].cathode_wall, WallId { axis: 2, side: 0 });
        assert_eq!(planes.tpcs[1].anode_wall, WallId { axis: 2, side: 1 });
        assert_eq!(planes.tpcs[0].anode, Plane { axis: 2, position: -10.0 });
        assert_eq!(planes.tpcs[1].anode, Plane { axis: 2, position: 10.0 });
        assert_eq!(planes.tpcs[0].drift_dir, Vector3::new(0.0, 0.0, -1.0));
        assert_eq!(planes.tpcs[1].drift_dir, Vector3::new(0.0, 0.0, 1.0));
    }

    #[test]
    fn reversed_tpc_order_flips_sides() {
        let tpcs = module(
            [[50.0, 100.0], [0.0, 10.0], [0.0, 10.0]],
            [[-20.0, 50.0], [0.0, 10.0], [0.0, 10.0]],
        );
        let planes = ModulePlanes::from_tpcs(&tpcs).unwrap();

        // centers at 75 and 15, the cathode is their midpoint
        assert_eq!(planes.cathode, Plane { axis: 0, position: 45.0 });
        assert_eq!(planes.tpcs[0].cathode_wall.side, 0);
        assert_eq!(planes.tpcs[1].cathode_wall.side, 1);
        assert_eq!(planes.tpcs[0].anode.position, 100.0);
        assert_eq!(planes.tpcs[1].anode.position, -20.0);
        assert_eq!(planes.tpcs[0].drift_dir, Vector3::new(1.0, 0.0, 0.0));
        assert_eq!(planes.tpcs[1].drift_dir, Vector3::new(-1.0, 0.0, 0.0));
    }

    #[test]
    fn drift_must_be_axis_aligned() {
        let tpcs = module(
            [[0.0, 10.0], [0.0, 10.0], [0.0, 10.0]],
            [[10.0, 20.0], [5.0, 15.0], [0.0, 10.0]],
        );
        let err = ModulePlanes::from_tpcs(&tpcs).unwrap_err();
        assert!(matches!(err, GeoError::Geometry(_)));
    }

    #[test]
    fn coincident_tpcs_have_no_drift_axis() {
        let tpcs = module(
            [[0.0, 10.0], [0.0, 10.0], [0.0, 10.0]],
            [[0.0, 10.0], [0.0, 10.0], [0.0, 10.0]],
        );
        assert!(ModulePlanes::from_tpcs(&tpcs).is_err());
    }

    #[test]
    fn requires_exactly_two_tpcs() {
        let one = vec![Volume::from_bounds([[0.0, 1.0], [0.0, 1.0], [0.0, 1.0]]).unwrap()];
        assert!(matches!(
            ModulePlanes::from_tpcs(&one),
            Err(GeoError::Geometry(_))
        ));
        let three = vec![one[0]; 3];
        assert!(ModulePlanes::from_tpcs(&three).is_err());
    }
}

/// An `(axis, position)` pair: a plane perpendicular to one coordinate axis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Plane {
    pub axis: usize,
    pub position: f64,
}

/// Identifies one wall of a TPC: the axis it is perpendicular to and the
/// side (0 for the lower wall, 1 for the upper wall).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WallId {
    pub axis: usize,
    pub side: usize,
}

/// Planes owned by a single TPC of a central-cathode module.
#[derive(Debug, Clone, PartialEq)]
pub struct TpcPlanes {
    pub anode: Plane,
    pub cathode_wall: WallId,
    pub anode_wall: WallId,
    /// Unit vector pointing from the cathode towards the anode.
    pub drift_dir: Vector3<f64>,
}

/// Cathode of a module and the per-TPC planes on either side of it.
#[derive(Debug, Clone, PartialEq)]
pub struct ModulePlanes {
    pub cathode: Plane,
    pub tpcs: Vec<TpcPlanes>,
}

impl ModulePlanes {
    /// Derives the planes of a module from the boxes of its two TPCs.
    pub fn from_tpcs(tpcs: &[Volume]) -> Result<Self> {
        if tpcs.len() != 2 {
            return Err(GeoError::Geometry(format!(
                "a module needs exactly 2 TPCs to share a central cathode, found {}",
                tpcs.len()
            )));
        }

        let centers = [tpcs[0].center(), tpcs[1].center()];
        let axis = drift_axis(&(centers[1] - centers[0]))?;

        let midpoint = 0.5 * (centers[0][axis] + centers[1][axis]);
        let cathode = Plane {
            axis,
            position: midpoint,
        };

        let tpcs = tpcs
            .iter()
            .zip(centers.iter())
            .map(|(tpc, center)| {
                let side = usize::from(center[axis] < midpoint);
                TpcPlanes {
                    anode: Plane {
                        axis,
                        position: tpc.wall(axis, 1 - side),
                    },
                    cathode_wall: WallId { axis, side },
                    anode_wall: WallId {
                        axis,
                        side: 1 - side,
                    },
                    drift_dir: drift_dir(axis, side),
                }
            })
            .collect();

        Ok(Self { cathode, tpcs })
    }
}

/// Unit vector along `axis`, pointing away from the cathode wall `side`.
fn drift_dir(axis: usize, side: usize) -> Vector3<f64> {
    let mut dir = Vector3::zeros();
    dir[axis] = if side == 1 { -1.0 } else { 1.0 };
    dir
}

/// Identifies the single axis a displacement is aligned with.
fn drift_axis(displacement: &Vector3<f64>) -> Result<usize> {
    let norm = displacement.norm();
    if !(norm > 0.0) {
        return Err(GeoError::Geometry(
            "the two TPCs of a module share the same center, no drift axis".into(),
        ));
    }

    let direction = displacement / norm;
    let axes: Vec<usize> = (0..3)
        .filter(|&a| direction[a].abs() > AXIS_ALIGNMENT_TOLERANCE)
        .collect();

    match axes.as_slice() {
        [axis] => Ok(*axis),
        _ => Err(GeoError::Geometry(format!(
            "drift direction not axis-aligned: {:?}",
            direction.as_slice()
        ))),
    }
}

/// Builds the planes of every module.
pub fn build_planes(modules: &[&[Volume]]) -> Result<Vec<ModulePlanes>> {
    modules
        .iter()
        .map(|tpcs| ModulePlanes::from_tpcs(tpcs))
        .collect()
}
