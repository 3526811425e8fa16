//! Mapping between logical TPC identities and physical geometry TPCs.
//!
//! Upstream reconstruction tags every point with the `[module, tpc]` pair
//! of the logical TPC that recorded it. A physical TPC of the geometry may
//! collect several logical ones. When no mapping is supplied, each physical
//! TPC has exactly one logical source, its own `(module, tpc)` pair.

use ndarray::ArrayView4;

use crate::error::{GeoError, Result};


/// A logical `[module ID, tpc ID]` pair as recorded upstream.
pub type SourceId = [i64; 2];

/// Logical sources of each physical TPC, indexed by flat TPC index
/// `module * tpcs_per_module + tpc`.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceMap {
    /// One logical TPC per physical TPC, in `(module, tpc)` order.
    Identity { num_tpcs: usize, tpcs_per_module: usize },
    /// Explicit list of contributing logical TPCs per physical TPC.
    Explicit(Vec<Vec<SourceId>>),
}

impl SourceMap {
    pub fn identity(num_modules: usize, tpcs_per_module: usize) -> Self {
        SourceMap::Identity {
            num_tpcs: num_modules * tpcs_per_module,
            tpcs_per_module,
        }
    }

    /// Builds an explicit mapping from a `(N_m, N_t, N_s, 2)` array.
    pub fn from_array(
        array: ArrayView4<'_, i64>,
        num_modules: usize,
        tpcs_per_module: usize,
    ) -> Result<Self> {
        let shape = array.shape();
        if shape[0] != num_modules || shape[1] != tpcs_per_module {
            return Err(GeoError::ShapeMismatch(format!(
                "there should be one list of sources per TPC: expected ({}, {}, _, 2), got {:?}",
                num_modules, tpcs_per_module, shape
            )));
        }
        if shape[3] != 2 {
            return Err(GeoError::ShapeMismatch(format!(
                "sources must be [module, tpc] pairs, got trailing dimension {}",
                shape[3]
            )));
        }

        let mut sources = Vec::with_capacity(num_modules * tpcs_per_module);
        for m in 0..num_modules {
            for t in 0..tpcs_per_module {
                sources.push(
                    (0..shape[2])
                        .map(|s| [array[[m, t, s, 0]], array[[m, t, s, 1]]])
                        .collect(),
                );
            }
        }

        Ok(SourceMap::Explicit(sources))
    }

    pub fn is_identity(&self) -> bool {
        matches!(self, SourceMap::Identity { .. })
    }

    /// Number of physical TPCs covered by the mapping.
    pub fn len(&self) -> usize {
        match self {
            SourceMap::Identity { num_tpcs, .. } => *num_tpcs,
            SourceMap::Explicit(sources) => sources.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Logical sources feeding the physical TPC with flat index `tpc_index`.
    pub fn sources(&self, tpc_index: usize) -> Vec<SourceId> {
        match self {
            SourceMap::Identity {
                tpcs_per_module, ..
            } => vec![identity_source(tpc_index, *tpcs_per_module)],
            SourceMap::Explicit(sources) => sources[tpc_index].clone(),
        }
    }

    /// Whether `source` is one of the logical sources of a physical TPC.
    pub fn matches(&self, tpc_index: usize, source: &SourceId) -> bool {
        match self {
            SourceMap::Identity {
                tpcs_per_module, ..
            } => identity_source(tpc_index, *tpcs_per_module) == *source,
            SourceMap::Explicit(sources) => sources[tpc_index].contains(source),
        }
    }
}

fn identity_source(tpc_index: usize, tpcs_per_module: usize) -> SourceId {
    [
        (tpc_index / tpcs_per_module) as i64,
        (tpc_index % tpcs_per_module) as i64,
    ]
}
