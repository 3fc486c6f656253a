//! Compute device selection and matmul dispatch.
//!
//! The device is resolved once when the engine is built. `Accelerated` runs
//! row-parallel matmuls on the rayon pool and rounds projection outputs to
//! bf16 (mixed precision); `Cpu` runs serial matmuls in full f32.

use anyhow::{bail, Result};
use half::bf16;
use ndarray::{Array2, ArrayView2, Axis};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DevicePreference {
    #[default]
    Auto,
    Cpu,
    Accelerated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComputeDevice {
    Cpu,
    Accelerated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Precision {
    Full,
    Mixed,
}

impl DevicePreference {
    pub fn resolve(self) -> ComputeDevice {
        match self {
            DevicePreference::Cpu => ComputeDevice::Cpu,
            DevicePreference::Accelerated => ComputeDevice::Accelerated,
            DevicePreference::Auto => {
                if rayon::current_num_threads() > 1 {
                    ComputeDevice::Accelerated
                } else {
                    ComputeDevice::Cpu
                }
            }
        }
    }
}

impl ComputeDevice {
    pub fn precision(self) -> Precision {
        match self {
            ComputeDevice::Cpu => Precision::Full,
            ComputeDevice::Accelerated => Precision::Mixed,
        }
    }

    /// Projection matmul in the device's working precision.
    pub fn matmul(self, lhs: ArrayView2<'_, f32>, rhs: ArrayView2<'_, f32>) -> Result<Array2<f32>> {
        let mut output = self.matmul_full(lhs, rhs)?;
        if self.precision() == Precision::Mixed {
            round_to_bf16(&mut output);
        }
        Ok(output)
    }

    /// Matmul that always keeps f32 outputs. Used for the LM head so beam
    /// scores are ranked on full-precision logits.
    pub fn matmul_full(
        self,
        lhs: ArrayView2<'_, f32>,
        rhs: ArrayView2<'_, f32>,
    ) -> Result<Array2<f32>> {
        if lhs.ncols() != rhs.nrows() {
            bail!(
                "matmul dimension mismatch: lhs {}x{} vs rhs {}x{}",
                lhs.nrows(),
                lhs.ncols(),
                rhs.nrows(),
                rhs.ncols()
            );
        }

        match self {
            ComputeDevice::Cpu => Ok(lhs.dot(&rhs)),
            ComputeDevice::Accelerated => {
                let mut output = Array2::<f32>::zeros((lhs.nrows(), rhs.ncols()));
                output
                    .axis_iter_mut(Axis(0))
                    .into_par_iter()
                    .enumerate()
                    .for_each(|(row_idx, mut row)| {
                        row.assign(&lhs.row(row_idx).dot(&rhs));
                    });
                Ok(output)
            }
        }
    }
}

pub fn round_to_bf16(data: &mut Array2<f32>) {
    data.mapv_inplace(|x| bf16::from_f32(x).to_f32());
}
