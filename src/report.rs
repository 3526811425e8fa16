//! Serializable summaries of a detector and of point-cloud queries.

use nalgebra::Point3;
use serde::{Deserialize, Serialize};

use crate::containment::ContainmentConfig;
use crate::error::Result;
use crate::geometry::Geometry;
use crate::sources::SourceId;


/// Everything the command-line tool prints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    pub detector: DetectorSummary,
    pub points: Option<PointReport>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectorSummary {
    pub num_modules: usize,
    pub num_tpcs_per_module: usize,
    pub num_tpcs: usize,
    /// `[[x_min, x_max], [y_min, y_max], [z_min, z_max]]`
    pub detector: [[f64; 2]; 3],
    pub modules: Vec<[[f64; 2]; 3]>,
    pub tpcs: Vec<[[f64; 2]; 3]>,
    pub centers: Vec<[f64; 3]>,
    pub cathodes: Option<Vec<CathodeSummary>>,
    pub has_sources: bool,
    pub num_opdets: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CathodeSummary {
    pub axis: usize,
    pub position: f64,
}

impl DetectorSummary {
    pub fn new(geometry: &Geometry) -> Self {
        Self {
            num_modules: geometry.num_modules(),
            num_tpcs_per_module: geometry.num_tpcs_per_module(),
            num_tpcs: geometry.num_tpcs(),
            detector: geometry.detector().bounds(),
            modules: geometry.modules().iter().map(|m| m.bounds()).collect(),
            tpcs: geometry.tpcs().iter().map(|t| t.bounds()).collect(),
            centers: geometry.centers().iter().map(to_array).collect(),
            cathodes: geometry.planes().map(|planes| {
                planes
                    .iter()
                    .map(|p| CathodeSummary {
                        axis: p.cathode.axis,
                        position: p.cathode.position,
                    })
                    .collect()
            }),
            has_sources: !geometry.sources().is_identity(),
            num_opdets: geometry.opdets().map(|o| o.len()),
        }
    }
}

/// Results of the queries run against one point cloud.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PointReport {
    pub num_points: usize,
    /// Point indices closest to each TPC, in `(module, tpc)` order.
    pub closest_tpc: Vec<Vec<usize>>,
    pub closest_module: Vec<usize>,
    pub contained: bool,
    pub contained_points: Vec<bool>,
    /// `[module, tpc]` of the TPCs fed by the point sources.
    pub contributors: Option<Vec<[usize; 2]>>,
    pub split: Option<SplitSummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SplitSummary {
    pub target: usize,
    pub points: Vec<[f64; 3]>,
    pub groups: Vec<Vec<usize>>,
}

impl PointReport {
    pub fn new(
        geometry: &Geometry,
        config: &ContainmentConfig,
        points: &[Point3<f64>],
        sources: Option<&[SourceId]>,
        allow_multi_module: bool,
        target: Option<usize>,
    ) -> Result<Self> {
        let contributors = sources.map(|sources| {
            let (modules, tpcs) = geometry.get_contributors(sources);
            modules.into_iter().zip(tpcs).map(|(m, t)| [m, t]).collect()
        });

        let split = target
            .map(|target| {
                geometry
                    .split(points, target, sources, None)
                    .map(|(moved, groups)| SplitSummary {
                        target,
                        points: moved.iter().map(to_array).collect(),
                        groups,
                    })
            })
            .transpose()?;

        Ok(Self {
            num_points: points.len(),
            closest_tpc: geometry.closest_tpc_indices(points),
            closest_module: geometry.closest_module(points),
            contained: config.is_contained(geometry, points, sources, allow_multi_module)?,
            contained_points: config.contained_points(
                geometry,
                points,
                sources,
                allow_multi_module,
            )?,
            contributors,
            split,
        })
    }
}

fn to_array(point: &Point3<f64>) -> [f64; 3] {
    [point.x, point.y, point.z]
}
