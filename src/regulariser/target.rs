use ndarray::{Array1, Array2};

use crate::ad::Scalar;
use crate::error::{CsmError, CsmResult};

#[derive(Debug, Clone)]
pub struct Target {
    /// `dim x state_dim` reference transition matrix.
    pub pi: Array2<f64>,
    /// length-`state_dim` reference initial distribution.
    pub q0: Array1<f64>,
    pub pi_weight: f64,
    pub q0_weight: f64,
}

impl Target {
    pub fn new(pi: Array2<f64>, q0: Array1<f64>, pi_weight: f64, q0_weight: f64) -> CsmResult<Self> {
        if pi.is_empty() || q0.is_empty() {
            return Err(CsmError::InvalidArgument(
                "target regulariser requires non-empty reference Π and q0".into(),
            ));
        }
        if pi.ncols() != q0.len() {
            return Err(CsmError::InvalidArgument(
                "target Π column count must match target q0 length".into(),
            ));
        }
        if pi.ncols() % pi.nrows() != 0 {
            return Err(CsmError::InvalidArgument(
                "target Π column count must be a power-of-dim multiple of its row count".into(),
            ));
        }
        Ok(Self {
            pi,
            q0,
            pi_weight,
            q0_weight,
        })
    }

    pub fn check_compatibility(&self, dim: usize, state_dim: usize) -> CsmResult<()> {
        if state_dim != self.q0.len() {
            return Err(CsmError::InvalidArgument(format!(
                "objective state_dim {state_dim} does not match target q0 length {}",
                self.q0.len()
            )));
        }
        if state_dim != self.pi.ncols() || dim != self.pi.nrows() {
            return Err(CsmError::InvalidArgument(format!(
                "objective dims ({dim}, {state_dim}) do not match target Π shape ({}, {})",
                self.pi.nrows(),
                self.pi.ncols()
            )));
        }
        Ok(())
    }

    pub fn calc<S: Scalar>(&self, pi_block: &[S], q0_block: &[S]) -> S {
        let pi_l2 = l2_distance(pi_block, self.pi.iter().copied());
        let q0_l2 = l2_distance(q0_block, self.q0.iter().copied());
        pi_l2 * S::from_f64(self.pi_weight) + q0_l2 * S::from_f64(self.q0_weight)
    }
}

fn l2_distance<S: Scalar>(block: &[S], reference: impl Iterator<Item = f64>) -> S {
    block
        .iter()
        .zip(reference)
        .fold(S::from_f64(0.0), |acc, (x, r)| {
            let d = x.clone() - S::from_f64(r);
            acc + d.clone() * d
        })
}
