//! Optical detector positions, stored alongside the geometry as a
//! read-only annotation.

use nalgebra::Point3;
use ndarray::{ArrayViewD, Axis};

use crate::error::{GeoError, Result};

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::ArrayD;

    #[test]
    fn per_module_layout() {
        let array = ArrayD::<f64>::zeros(vec![2, 4, 3]);
        let opdets = OpDets::from_array(array.view(), 2, 2).unwrap();
        assert!(matches!(opdets, OpDets::PerModule(_)));
        assert_eq!(opdets.len(), 8);
        assert_eq!(opdets.module(1).len(), 4);
    }

    #[test]
    fn per_tpc_layout() {
        let mut array = ArrayD::<f64>::zeros(vec![1, 2, 3, 3]);
        array[[0, 1, 2, 0]] = 7.0;
        let opdets = OpDets::from_array(array.view(), 1, 2).unwrap();
        assert_eq!(opdets.len(), 6);
        assert_eq!(opdets.module(0).len(), 6);
        assert_eq!(opdets.module(0)[5], Point3::new(7.0, 0.0, 0.0));
    }

    #[test]
    fn mismatched_layouts_are_rejected() {
        let array = ArrayD::<f64>::zeros(vec![3, 4, 3]);
        assert!(matches!(
            OpDets::from_array(array.view(), 2, 2),
            Err(GeoError::ShapeMismatch(_))
        ));
        let array = ArrayD::<f64>::zeros(vec![2, 3, 4, 3]);
        assert!(OpDets::from_array(array.view(), 2, 2).is_err());
        let array = ArrayD::<f64>::zeros(vec![2, 4, 2]);
        assert!(OpDets::from_array(array.view(), 2, 2).is_err());
    }
}

/// Optical detector coordinates, either grouped per module or per TPC.
#[derive(Debug, Clone, PartialEq)]
pub enum OpDets {
    /// `[module][opdet]`
    PerModule(Vec<Vec<Point3<f64>>>),
    /// `[module][tpc][opdet]`
    PerTpc(Vec<Vec<Vec<Point3<f64>>>>),
}

impl OpDets {
    /// Interprets a `(N_m, N_p, 3)` or `(N_m, N_t, N_p, 3)` array.
    pub fn from_array(
        array: ArrayViewD<'_, f64>,
        num_modules: usize,
        tpcs_per_module: usize,
    ) -> Result<Self> {
        let shape = array.shape().to_vec();
        let mismatch = || {
            GeoError::ShapeMismatch(format!(
                "there should be one list of opdets per module or TPC, got shape {:?} for {} modules of {} TPCs",
                shape, num_modules, tpcs_per_module
            ))
        };

        if shape.last() != Some(&3) || shape[0] != num_modules {
            return Err(mismatch());
        }

        match shape.len() {
            3 => Ok(OpDets::PerModule(
                array.axis_iter(Axis(0)).map(|m| rows_to_points(&m)).collect(),
            )),
            4 if shape[1] == tpcs_per_module => Ok(OpDets::PerTpc(
                array
                    .axis_iter(Axis(0))
                    .map(|m| m.axis_iter(Axis(0)).map(|t| rows_to_points(&t)).collect())
                    .collect(),
            )),
            _ => Err(mismatch()),
        }
    }

    /// Total number of optical detectors.
    pub fn len(&self) -> usize {
        match self {
            OpDets::PerModule(modules) => modules.iter().map(Vec::len).sum(),
            OpDets::PerTpc(modules) => modules.iter().flatten().map(Vec::len).sum(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All optical detectors of a module, TPC by TPC for the per-TPC layout.
    pub fn module(&self, module_id: usize) -> Vec<Point3<f64>> {
        match self {
            OpDets::PerModule(modules) => modules[module_id].clone(),
            OpDets::PerTpc(modules) => modules[module_id].iter().flatten().copied().collect(),
        }
    }
}

fn rows_to_points(rows: &ArrayViewD<'_, f64>) -> Vec<Point3<f64>> {
    rows.axis_iter(Axis(0))
        .map(|r| Point3::new(r[0], r[1], r[2]))
        .collect()
}
