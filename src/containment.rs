//! Containment of point clouds within detector volumes.
//!
//! Reconstructed particles are classified as fully measured or truncated by
//! checking whether their points stay away from the detector walls. This
//! module provides:
//! - Margin normalisation (scalar, per axis, or per wall)
//! - Reference volume sets per TPC, per module, for the whole detector, or
//!   per group of logical sources
//! - Separate margins for the cathode walls of central-cathode modules
//! - Whole-cloud and per-point containment checks
//!
//! # Key Components
//!
//! - [`ContainmentConfig`]: immutable set of reference volumes, produced by
//!   [`Geometry::define_containment_volumes`]
//! - [`ContainmentChecker`]: holder that starts undefined and refuses to
//!   check until volumes are defined

use std::fmt;
use std::str::FromStr;

use itertools::Itertools;
use log::{debug, warn};
use nalgebra::Point3;
use ndarray::ArrayViewD;
use serde::Deserialize;

use crate::error::{GeoError, Result};
use crate::geometry::Geometry;
use crate::planes::WallId;
use crate::sources::SourceId;
use crate::volume::Volume;


/// Minimum distance from a wall for a point to be considered contained.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(try_from = "RawMargin")]
pub enum Margin {
    /// Shared by all six walls.
    Scalar(f64),
    /// Shared by the two walls perpendicular to each axis.
    PerAxis([f64; 3]),
    /// `[[x_lo, x_hi], [y_lo, y_hi], [z_lo, z_hi]]`
    PerWall([[f64; 2]; 3]),
}

impl Margin {
    /// Margin of every wall, as `[[x_lo, x_hi], [y_lo, y_hi], [z_lo, z_hi]]`.
    pub fn walls(&self) -> [[f64; 2]; 3] {
        match *self {
            Margin::Scalar(m) => [[m; 2]; 3],
            Margin::PerAxis(m) => [[m[0]; 2], [m[1]; 2], [m[2]; 2]],
            Margin::PerWall(m) => m,
        }
    }

    /// Interprets a scalar, a `(3,)` vector or a `(3, 2)` matrix.
    pub fn from_array(array: ArrayViewD<'_, f64>) -> Result<Self> {
        let values: Vec<f64> = array.iter().copied().collect();
        match array.shape() {
            [] => Ok(Margin::Scalar(values[0])),
            [3] => Ok(Margin::PerAxis([values[0], values[1], values[2]])),
            [3, 2] => Ok(Margin::PerWall([
                [values[0], values[1]],
                [values[2], values[3]],
                [values[4], values[5]],
            ])),
            shape => Err(GeoError::InvalidArgument(format!(
                "margin must be a scalar, one value per axis or two values per axis, got shape {:?}",
                shape
            ))),
        }
    }
}

impl From<f64> for Margin {
    fn from(value: f64) -> Self {
        Margin::Scalar(value)
    }
}

/// Margin as written in a configuration file, before its shape is checked.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawMargin {
    Scalar(f64),
    Flat(Vec<f64>),
    Nested(Vec<Vec<f64>>),
}

impl TryFrom<RawMargin> for Margin {
    type Error = GeoError;

    fn try_from(raw: RawMargin) -> Result<Self> {
        match raw {
            RawMargin::Scalar(m) => Ok(Margin::Scalar(m)),
            RawMargin::Flat(m) => match m.as_slice() {
                [x, y, z] => Ok(Margin::PerAxis([*x, *y, *z])),
                _ => Err(GeoError::InvalidArgument(format!(
                    "must provide one margin per axis, got {}",
                    m.len()
                ))),
            },
            RawMargin::Nested(m) => {
                let rows: Vec<[f64; 2]> = m
                    .iter()
                    .filter_map(|row| match row.as_slice() {
                        [lo, hi] => Some([*lo, *hi]),
                        _ => None,
                    })
                    .collect();
                match rows.as_slice() {
                    [x, y, z] if m.len() == 3 => Ok(Margin::PerWall([*x, *y, *z])),
                    _ => Err(GeoError::InvalidArgument(
                        "must provide two margins per axis".into(),
                    )),
                }
            }
        }
    }
}

/// Which volumes a point cloud must fit in to be contained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub enum ContainmentMode {
    /// Within a single TPC.
    Tpc,
    /// Within the TPCs that recorded the points, according to their sources.
    Source,
    /// Within a single module.
    Module,
    /// Within the detector.
    Detector,
}

impl FromStr for ContainmentMode {
    type Err = GeoError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "tpc" => Ok(ContainmentMode::Tpc),
            "source" => Ok(ContainmentMode::Source),
            "module" => Ok(ContainmentMode::Module),
            "detector" => Ok(ContainmentMode::Detector),
            _ => Err(GeoError::InvalidArgument(format!(
                "containment check mode not recognized: {}",
                s
            ))),
        }
    }
}

impl TryFrom<String> for ContainmentMode {
    type Error = GeoError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl fmt::Display for ContainmentMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ContainmentMode::Tpc => "tpc",
            ContainmentMode::Source => "source",
            ContainmentMode::Module => "module",
            ContainmentMode::Detector => "detector",
        };
        write!(f, "{}", name)
    }
}

/// Outcome of a containment check.
#[derive(Debug, Clone, PartialEq)]
pub enum Containment {
    /// One flag for the whole point cloud.
    Summary(bool),
    /// One flag per point.
    PerPoint(Vec<bool>),
}

impl Containment {
    /// Whether every point is contained.
    pub fn all(&self) -> bool {
        match self {
            Containment::Summary(flag) => *flag,
            Containment::PerPoint(flags) => flags.iter().all(|&f| f),
        }
    }
}

/// Reference volumes shrunk by the requested margins.
#[derive(Debug, Clone, PartialEq)]
pub struct ContainmentConfig {
    mode: ContainmentMode,
    tpcs_per_module: usize,
    volumes: Vec<Volume>,
}

impl ContainmentConfig {
    pub fn mode(&self) -> ContainmentMode {
        self.mode
    }

    /// One volume per TPC, per module, or a single one for the detector.
    pub fn volumes(&self) -> &[Volume] {
        &self.volumes
    }

    /// Checks a point cloud against the reference volumes.
    ///
    /// A point is contained if it lies strictly inside at least one volume.
    /// With `summarize`, the cloud is contained if a single volume holds all
    /// of its points; otherwise one flag is returned per point.
    ///
    /// In [`ContainmentMode::Source`], `sources` must hold the logical
    /// `[module, tpc]` pair of each point. The volumes of all contributing
    /// TPCs are merged into one; a cloud fed by several modules is not
    /// contained unless `allow_multi_module` is set.
    pub fn check(
        &self,
        geometry: &Geometry,
        points: &[Point3<f64>],
        sources: Option<&[SourceId]>,
        allow_multi_module: bool,
        summarize: bool,
    ) -> Result<Containment> {
        let not_contained = || {
            if summarize {
                Containment::Summary(false)
            } else {
                Containment::PerPoint(vec![false; points.len()])
            }
        };

        let source_volume;
        let volumes: &[Volume] = if self.mode == ContainmentMode::Source {
            match self.source_volume(geometry, points, sources, allow_multi_module)? {
                Some(volume) => {
                    source_volume = [volume];
                    &source_volume
                }
                None => return Ok(not_contained()),
            }
        } else {
            &self.volumes
        };

        if summarize {
            Ok(Containment::Summary(
                volumes.iter().any(|v| v.contains_all(points)),
            ))
        } else {
            Ok(Containment::PerPoint(
                points
                    .iter()
                    .map(|p| volumes.iter().any(|v| v.contains(p)))
                    .collect(),
            ))
        }
    }

    /// Whether the whole point cloud is contained.
    pub fn is_contained(
        &self,
        geometry: &Geometry,
        points: &[Point3<f64>],
        sources: Option<&[SourceId]>,
        allow_multi_module: bool,
    ) -> Result<bool> {
        Ok(self
            .check(geometry, points, sources, allow_multi_module, true)?
            .all())
    }

    /// Containment flag of each point.
    pub fn contained_points(
        &self,
        geometry: &Geometry,
        points: &[Point3<f64>],
        sources: Option<&[SourceId]>,
        allow_multi_module: bool,
    ) -> Result<Vec<bool>> {
        match self.check(geometry, points, sources, allow_multi_module, false)? {
            Containment::PerPoint(flags) => Ok(flags),
            Containment::Summary(flag) => Ok(vec![flag; points.len()]),
        }
    }

    /// Smallest box holding the volumes of the TPCs that recorded the
    /// points, `None` when the cloud may not be contained at all.
    fn source_volume(
        &self,
        geometry: &Geometry,
        points: &[Point3<f64>],
        sources: Option<&[SourceId]>,
        allow_multi_module: bool,
    ) -> Result<Option<Volume>> {
        let sources = match sources {
            Some(s) if s.len() == points.len() => s,
            _ => {
                return Err(GeoError::InvalidArgument(
                    "need to provide one source per point to make a source-based check".into(),
                ))
            }
        };
        if self.tpcs_per_module != geometry.num_tpcs_per_module()
            || self.volumes.len() != geometry.num_tpcs()
        {
            return Err(GeoError::InvalidArgument(
                "containment volumes were defined for a different geometry".into(),
            ));
        }

        let (modules, tpcs) = geometry.get_contributors(sources);
        if modules.is_empty() {
            debug!("no TPC matches the sources of the point cloud");
            return Ok(None);
        }
        if !allow_multi_module && modules.iter().unique().count() > 1 {
            return Ok(None);
        }

        let contributing = modules
            .iter()
            .zip(tpcs.iter())
            .map(|(m, t)| &self.volumes[m * self.tpcs_per_module + t]);
        Volume::merge(contributing).map(Some)
    }
}

impl Geometry {
    /// Defines the reference volumes containment is checked against.
    ///
    /// `cathode_margin`, if given, replaces the margin of the cathode wall of
    /// each TPC. It only applies to the per-TPC modes and requires every
    /// module to have a central cathode.
    pub fn define_containment_volumes(
        &self,
        margin: Margin,
        cathode_margin: Option<f64>,
        mode: ContainmentMode,
    ) -> Result<ContainmentConfig> {
        let walls = margin.walls();

        let volumes = match mode {
            ContainmentMode::Tpc | ContainmentMode::Source => {
                let cathodes = match cathode_margin {
                    Some(cm) => {
                        if self.planes().is_none() {
                            return Err(GeoError::Geometry(
                                "a cathode margin requires modules of two TPCs sharing a central cathode".into(),
                            ));
                        }
                        Some(cm)
                    }
                    None => None,
                };

                let mut volumes = Vec::with_capacity(self.num_tpcs());
                for (i, tpc) in self.tpcs().iter().enumerate() {
                    let (m, t) = (
                        i / self.num_tpcs_per_module(),
                        i % self.num_tpcs_per_module(),
                    );
                    let cathode = cathodes.zip(self.cathode_wall(m, t));
                    volumes.push(adapt_volume(tpc, &walls, cathode));
                }
                volumes
            }
            ContainmentMode::Module => {
                if cathode_margin.is_some() {
                    warn!("cathode margin ignored for module containment volumes");
                }
                self.modules()
                    .iter()
                    .map(|m| adapt_volume(m, &walls, None))
                    .collect()
            }
            ContainmentMode::Detector => {
                if cathode_margin.is_some() {
                    warn!("cathode margin ignored for detector containment volumes");
                }
                vec![adapt_volume(self.detector(), &walls, None)]
            }
        };

        debug!(
            "defined {} containment volumes in {} mode",
            volumes.len(),
            mode
        );

        Ok(ContainmentConfig {
            mode,
            tpcs_per_module: self.num_tpcs_per_module(),
            volumes,
        })
    }
}

/// Shrinks a volume by its wall margins, the cathode wall being moved by
/// `cathode_margin` instead when one is given.
fn adapt_volume(
    volume: &Volume,
    margin: &[[f64; 2]; 3],
    cathode: Option<(f64, WallId)>,
) -> Volume {
    let mut out = volume.shrink(margin);
    if let Some((cathode_margin, WallId { axis, side })) = cathode {
        if side == 0 {
            out.lower[axis] = volume.lower[axis] + cathode_margin;
        } else {
            out.upper[axis] = volume.upper[axis] - cathode_margin;
        }
    }
    out
}

/// Holds the containment volumes of a geometry once they are defined.
///
/// Starts undefined; [`ContainmentChecker::define`] installs (or replaces)
/// the reference volumes. Checking before the first definition fails with
/// [`GeoError::NotConfigured`].
#[derive(Debug, Clone)]
pub struct ContainmentChecker<'g> {
    geometry: &'g Geometry,
    config: Option<ContainmentConfig>,
}

impl<'g> ContainmentChecker<'g> {
    pub fn new(geometry: &'g Geometry) -> Self {
        Self {
            geometry,
            config: None,
        }
    }

    pub fn define(
        &mut self,
        margin: Margin,
        cathode_margin: Option<f64>,
        mode: ContainmentMode,
    ) -> Result<&ContainmentConfig> {
        let config = self
            .geometry
            .define_containment_volumes(margin, cathode_margin, mode)?;
        Ok(self.config.insert(config))
    }

    pub fn config(&self) -> Option<&ContainmentConfig> {
        self.config.as_ref()
    }

    pub fn check(
        &self,
        points: &[Point3<f64>],
        sources: Option<&[SourceId]>,
        allow_multi_module: bool,
        summarize: bool,
    ) -> Result<Containment> {
        self.config
            .as_ref()
            .ok_or(GeoError::NotConfigured)?
            .check(self.geometry, points, sources, allow_multi_module, summarize)
    }

    pub fn is_contained(
        &self,
        points: &[Point3<f64>],
        sources: Option<&[SourceId]>,
        allow_multi_module: bool,
    ) -> Result<bool> {
        Ok(self
            .check(points, sources, allow_multi_module, true)?
            .all())
    }
}
