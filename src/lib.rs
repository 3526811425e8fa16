//! Geometry core for detectors made of several Time Projection Chambers.
//!
//! A detector is a set of modules, each made of box-shaped TPCs. From the
//! raw TPC boundaries, [`Geometry`] derives the module and detector boxes,
//! the cathode/anode planes of central-cathode modules, and answers
//! point-cloud queries: nearest TPC or module, offsets to a TPC, logical
//! source lookups, containment within shrunk volumes, and translation of
//! clouds between modules.

pub mod containment;
pub mod error;
pub mod geometry;
pub mod loader;
pub mod opdet;
pub mod planes;
pub mod report;
pub mod settings;
pub mod sources;
pub mod translate;
pub mod volume;

pub use containment::{Containment, ContainmentChecker, ContainmentConfig, ContainmentMode, Margin};
pub use error::{GeoError, Result};
pub use geometry::Geometry;
pub use sources::{SourceId, SourceMap};
pub use translate::{PixelMeta, VoxelMeta};
pub use volume::Volume;
