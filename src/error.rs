//! Error kinds raised by the geometry core.
//!
//! Every error is raised synchronously by the call that detects it. Nothing
//! is retried or recovered internally; callers fix their inputs and call
//! again.

use std::path::PathBuf;

/// Failure of a geometry construction or query.
#[derive(thiserror::Error, Debug)]
pub enum GeoError {
    /// A required construction input is missing or a preset cannot be resolved.
    #[error("configuration error: {0}")]
    Configuration(String),
    /// An auxiliary array (sources, opdets) does not match the boundaries.
    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),
    /// The boxes do not form a usable detector, or the topology does not
    /// support the requested plane-dependent operation.
    #[error("geometry error: {0}")]
    Geometry(String),
    /// A query argument is malformed (margin shape, mode, module id, ...).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// Containment was checked before any containment volumes were defined.
    #[error("containment volumes are not defined, call `define` first")]
    NotConfigured,
    /// A stored array could not be read.
    #[error("failed to read array from {path}: {source}")]
    Load {
        path: PathBuf,
        #[source]
        source: ndarray_npy::ReadNpyError,
    },
}

pub type Result<T> = std::result::Result<T, GeoError>;
