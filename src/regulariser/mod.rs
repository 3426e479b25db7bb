//! Regularisers that add a differentiable penalty term to the CSM objective.
//! Represented as an enum rather than a `dyn Trait`: each variant's `calc`
//! must be generic over the AD scalar level ([`crate::ad::Scalar`]) so the
//! same regulariser runs unchanged at value, gradient, and Hessian
//! evaluation, and trait objects cannot carry generic methods.

pub mod entropy;
pub mod mixture;
pub mod nearest_neighbour;
pub mod target;

use crate::ad::Scalar;
use crate::error::CsmResult;
use target::Target;

#[derive(Debug, Clone)]
pub enum Regulariser {
    Entropy { pi_weight: f64, q0_weight: f64 },
    NearestNeighbour { max_dist_not_penalised: f64 },
    Target(Target),
    Mixture { children: Vec<(Regulariser, f64)> },
}

impl Regulariser {
    pub fn check_compatibility(&self, dim: usize, state_dim: usize) -> CsmResult<()> {
        match self {
            Regulariser::Entropy { .. } | Regulariser::NearestNeighbour { .. } => Ok(()),
            Regulariser::Target(t) => t.check_compatibility(dim, state_dim),
            Regulariser::Mixture { children } => {
                mixture::validate(children.len(), children.len())?;
                for (child, _) in children {
                    child.check_compatibility(dim, state_dim)?;
                }
                Ok(())
            }
        }
    }

    /// Evaluates the penalty given the current `Π` block (length `dim *
    /// state_dim`), `q0` block (length `state_dim`), and expanded transition
    /// matrix (`state_dim * state_dim`, row-major, `[to * state_dim + from]`).
    pub fn calc<S: Scalar>(
        &self,
        pi_block: &[S],
        q0_block: &[S],
        pi_expanded: &[S],
        dim: usize,
        state_dim: usize,
    ) -> S {
        match self {
            Regulariser::Entropy { pi_weight, q0_weight } => {
                entropy::calc(pi_block, q0_block, *pi_weight, *q0_weight)
            }
            Regulariser::NearestNeighbour { max_dist_not_penalised } => {
                nearest_neighbour::calc(pi_expanded, dim, state_dim, *max_dist_not_penalised)
            }
            Regulariser::Target(t) => t.calc(pi_block, q0_block),
            Regulariser::Mixture { children } => {
                let values: Vec<S> = children
                    .iter()
                    .map(|(child, _)| child.calc(pi_block, q0_block, pi_expanded, dim, state_dim))
                    .collect();
                let weights: Vec<f64> = children.iter().map(|(_, w)| *w).collect();
                mixture::calc(&values, &weights)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mixture_forwards_compatibility_check_to_children() {
        let bad_target = Regulariser::Target(
            target::Target::new(
                ndarray::array![[0.5, 0.5], [0.5, 0.5]],
                ndarray::array![0.5, 0.5],
                1.0,
                1.0,
            )
            .unwrap(),
        );
        let mixture = Regulariser::Mixture {
            children: vec![(bad_target, 1.0)],
        };
        assert!(mixture.check_compatibility(3, 9).is_err());
    }
}
