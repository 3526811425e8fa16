//! Loading geometry arrays from `.npy` files.
//!
//! A detector is either described by explicit files or by a preset name,
//! resolved inside a geometry directory as
//! `<name>_boundaries.npy` (required), `<name>_sources.npy` and
//! `<name>_opdets.npy` (both optional).

use std::path::{Path, PathBuf};

use log::info;
use nalgebra::Point3;
use ndarray::{Array2, Array4, ArrayD};
use ndarray_npy::{read_npy, ReadableElement};

use crate::error::{GeoError, Result};
use crate::geometry::Geometry;
use crate::sources::SourceId;


/// Files making up a detector preset.
#[derive(Debug, Clone, PartialEq)]
pub struct PresetFiles {
    pub boundaries: PathBuf,
    pub sources: Option<PathBuf>,
    pub opdets: Option<PathBuf>,
}

impl PresetFiles {
    /// Locates the files of preset `name` in `dir`.
    pub fn resolve(name: &str, dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        let name = name.to_lowercase();
        let boundaries = dir.join(format!("{}_boundaries.npy", name));
        if !boundaries.is_file() {
            return Err(GeoError::Configuration(format!(
                "unknown detector `{}`: no boundary file at {}",
                name,
                boundaries.display()
            )));
        }

        let optional = |kind: &str| {
            let path = dir.join(format!("{}_{}.npy", name, kind));
            path.is_file().then_some(path)
        };

        Ok(Self {
            boundaries,
            sources: optional("sources"),
            opdets: optional("opdets"),
        })
    }
}

/// Reads an array, reporting a missing file as a configuration error.
pub fn load_array<T, D>(path: &Path) -> Result<ndarray::Array<T, D>>
where
    T: ReadableElement,
    D: ndarray::Dimension,
{
    if !path.is_file() {
        return Err(GeoError::Configuration(format!(
            "could not find file: {}",
            path.display()
        )));
    }
    read_npy(path).map_err(|source| GeoError::Load {
        path: path.to_path_buf(),
        source,
    })
}

/// Reads a `(N, 3)` point cloud.
pub fn load_points(path: &Path) -> Result<Vec<Point3<f64>>> {
    let array: Array2<f64> = load_array(path)?;
    if array.ncols() != 3 {
        return Err(GeoError::InvalidArgument(format!(
            "points must have shape (N, 3), got {:?}",
            array.shape()
        )));
    }
    Ok(array
        .rows()
        .into_iter()
        .map(|r| Point3::new(r[0], r[1], r[2]))
        .collect())
}

/// Reads the `(N, 2)` logical `[module, tpc]` source of each point.
pub fn load_point_sources(path: &Path) -> Result<Vec<SourceId>> {
    let array: Array2<i64> = load_array(path)?;
    if array.ncols() != 2 {
        return Err(GeoError::InvalidArgument(format!(
            "point sources must have shape (N, 2), got {:?}",
            array.shape()
        )));
    }
    Ok(array.rows().into_iter().map(|r| [r[0], r[1]]).collect())
}

impl Geometry {
    /// Builds a geometry from `.npy` files.
    ///
    /// Sources are read as 64-bit integers and boundaries/opdets as 64-bit
    /// floats.
    pub fn from_files(
        boundaries: impl AsRef<Path>,
        sources: Option<&Path>,
        opdets: Option<&Path>,
    ) -> Result<Self> {
        let boundaries: Array4<f64> = load_array(boundaries.as_ref())?;
        let sources: Option<Array4<i64>> = sources.map(load_array).transpose()?;
        let opdets: Option<ArrayD<f64>> = opdets.map(load_array).transpose()?;

        Geometry::new(
            boundaries.view(),
            sources.as_ref().map(|s| s.view()),
            opdets.as_ref().map(|o| o.view()),
        )
    }

    /// Builds the geometry of a named detector preset found in `dir`.
    pub fn from_preset(name: &str, dir: impl AsRef<Path>) -> Result<Self> {
        let files = PresetFiles::resolve(name, dir)?;
        info!(
            "loading detector `{}` from {}",
            name,
            files.boundaries.display()
        );
        Geometry::from_files(
            &files.boundaries,
            files.sources.as_deref(),
            files.opdets.as_deref(),
        )
    }
}
