//! State-space algebra for the lifted Markov chain: dimension arithmetic and
//! conversion between the compact (`D x S`) and expanded (`S x S`) transition
//! matrix representations.

use ndarray::{Array2, ArrayView2};

use crate::error::{CsmError, CsmResult};

pub fn state_dim(dim: usize, memory: usize) -> usize {
    dim.pow(memory as u32 + 1)
}

pub fn nbr_pi_coeffs(dim: usize, memory: usize) -> usize {
    dim * state_dim(dim, memory)
}

/// Degrees of freedom: each of the `state_dim` transition columns has
/// `dim - 1` free entries, plus `state_dim - 1` free entries in `q0`.
pub fn dof(dim: usize, memory: usize) -> usize {
    let s = state_dim(dim, memory);
    s * (dim - 1) + s - 1
}

/// Inverts [`state_dim`]: recovers `memory` from `state_dim` and `dim`.
pub fn memory_from_state_dim(state_dim: usize, dim: usize) -> CsmResult<usize> {
    if dim < 2 {
        return Err(CsmError::InvalidArgument(
            "dim must be >= 2 to recover memory from state_dim".into(),
        ));
    }
    let mut s = 1usize;
    let mut m = 0usize;
    loop {
        if s == state_dim {
            return Ok(m.saturating_sub(1));
        }
        if s > state_dim || m > 64 {
            return Err(CsmError::InvalidArgument(format!(
                "state_dim {state_dim} is not a power of dim {dim}"
            )));
        }
        s *= dim;
        m += 1;
    }
}

/// Expands a compact `dim x state_dim` transition matrix into its `state_dim
/// x state_dim` block-shift form. Column `l` of the compact matrix, the
/// conditional distribution over the newest category given lifted state
/// `l`, is scattered into the `dim` expanded rows reachable from `l`: those
/// whose trailing `memory` coordinates equal the leading `memory` coordinates
/// of `l`.
pub fn expand_transition_matrix(compact: ArrayView2<f64>, dim: usize) -> Array2<f64> {
    let state_dim = compact.ncols();
    debug_assert_eq!(compact.nrows(), dim);
    let mut expanded = Array2::zeros((state_dim, state_dim));
    if state_dim == dim {
        expanded.assign(&compact);
        return expanded;
    }
    let unobserved_state_dim = state_dim / dim;
    for l in 0..state_dim {
        let next_base = (l % unobserved_state_dim) * dim;
        for k in 0..dim {
            expanded[[next_base + k, l]] = compact[[k, l]];
        }
    }
    expanded
}

/// Estimates a compact transition matrix from complete (or complete +
/// incomplete) observed trajectories via empirical transition frequencies.
/// `trajectories` holds, per trajectory, a dense per-period *raw category*
/// sequence with `None` marking unobserved periods; the lifted state
/// `Y_{t-1} = (X_{t-1}, ..., X_{t-1-memory})` that indexes a column of
/// `counts` is reconstructed from a sliding window of `memory + 1`
/// consecutive raw categories, newest first, and flattened with
/// [`crate::multi_index::flatten`].
///
/// A window position is unknown either because it falls before the start of
/// the trajectory (no pre-history) or because the raw observation itself is
/// `None`. When `use_incomplete_data` is set, a transition with unknown
/// window positions (but a known target) spreads its unit weight uniformly
/// over every lifted state compatible with the known positions; a transition
/// with a known window but unknown target spreads its weight uniformly over
/// every target category. A transition with unknowns on both sides carries
/// no information and is skipped. With `use_incomplete_data` unset, any
/// transition touching an unknown position is skipped entirely.
pub fn transition_matrix_from_trajectories(
    trajectories: &[Vec<Option<usize>>],
    dim: usize,
    state_dim: usize,
    use_incomplete_data: bool,
) -> CsmResult<Array2<f64>> {
    if trajectories.is_empty() {
        return Err(CsmError::LogicError(
            "cannot estimate a transition matrix without longitudinal data".into(),
        ));
    }
    let memory = memory_from_state_dim(state_dim, dim)?;
    let mut counts = Array2::<f64>::zeros((dim, state_dim));
    for traj in trajectories {
        for t in 1..traj.len() {
            let target = traj[t];
            let window: Vec<Option<usize>> = (0..=memory)
                .map(|k| if t >= 1 + k { traj[t - 1 - k] } else { None })
                .collect();
            let missing: Vec<usize> = window
                .iter()
                .enumerate()
                .filter(|(_, v)| v.is_none())
                .map(|(i, _)| i)
                .collect();

            match (missing.is_empty(), target) {
                (true, Some(n)) => {
                    let known: Vec<usize> = window.iter().map(|v| v.unwrap()).collect();
                    counts[[n, crate::multi_index::flatten(&known, dim)]] += 1.0;
                }
                (true, None) if use_incomplete_data => {
                    let known: Vec<usize> = window.iter().map(|v| v.unwrap()).collect();
                    let col = crate::multi_index::flatten(&known, dim);
                    for k in 0..dim {
                        counts[[k, col]] += 1.0 / dim as f64;
                    }
                }
                (false, Some(n)) if use_incomplete_data => {
                    let nbr_combos = dim.pow(missing.len() as u32);
                    let weight = 1.0 / nbr_combos as f64;
                    let mut filled = window.clone();
                    for combo in 0..nbr_combos {
                        let mut rem = combo;
                        for &pos in &missing {
                            filled[pos] = Some(rem % dim);
                            rem /= dim;
                        }
                        let tuple: Vec<usize> = filled.iter().map(|v| v.unwrap()).collect();
                        counts[[n, crate::multi_index::flatten(&tuple, dim)]] += weight;
                    }
                }
                _ => {}
            }
        }
    }
    for col in 0..state_dim {
        let sum: f64 = counts.column(col).sum();
        if sum > 0.0 {
            counts.column_mut(col).mapv_inplace(|v| v / sum);
        } else {
            counts.column_mut(col).fill(1.0 / dim as f64);
        }
    }
    Ok(counts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn memoryless_expansion_is_identity() {
        let compact = array![[0.2, 0.5], [0.8, 0.5]];
        let expanded = expand_transition_matrix(compact.view(), 2);
        assert_eq!(expanded, compact);
    }

    #[test]
    fn memory_one_expansion_scatters_into_block_shift_columns() {
        // dim=2, memory=1 => state_dim=4, states flat-indexed (newest fastest).
        let compact = array![[0.1, 0.2, 0.3, 0.4], [0.9, 0.8, 0.7, 0.6]];
        let expanded = expand_transition_matrix(compact.view(), 2);
        // from state 0 = (0,0): next states reachable are 0=(0,0),1=(1,0)
        assert_eq!(expanded[[0, 0]], 0.1);
        assert_eq!(expanded[[1, 0]], 0.9);
        assert_eq!(expanded[[2, 0]], 0.0);
        // every column still sums to 1
        for c in 0..4 {
            let s: f64 = expanded.column(c).sum();
            assert!((s - 1.0).abs() < 1e-12);
        }
    }

    #[test]
    fn dimension_formulas() {
        assert_eq!(state_dim(3, 0), 3);
        assert_eq!(state_dim(3, 1), 9);
        assert_eq!(nbr_pi_coeffs(3, 1), 27);
        assert_eq!(dof(3, 1), 9 * 2 + 8);
        assert_eq!(memory_from_state_dim(9, 3).unwrap(), 1);
    }

    /// Eight memory-1 trajectories whose first two categories cover every
    /// lifted state once, then evolve deterministically ((i, j) -> 1 - j if
    /// i == j else j), so each column converges to a single target category.
    fn memory_one_trajectories() -> Vec<Vec<Option<usize>>> {
        let dim = 2;
        let t = 11;
        (0..8usize)
            .map(|q| {
                let mut traj = vec![None; t];
                traj[0] = Some((q / dim) % dim);
                traj[1] = Some(q % dim);
                for k in 2..t {
                    let prev_prev = traj[k - 2].unwrap();
                    let prev = traj[k - 1].unwrap();
                    let next = if prev == prev_prev { 1 - prev } else { prev };
                    traj[k] = Some(next);
                }
                traj
            })
            .collect()
    }

    #[test]
    fn trajectories_complete_only_skips_the_unknown_prehistory_transition() {
        let pi = transition_matrix_from_trajectories(&memory_one_trajectories(), 2, 4, false).unwrap();
        // columns labelled (older, newer): 0=(0,0) 1=(0,1) 2=(1,0) 3=(1,1)
        assert!((pi[[1, 0]] - 1.0).abs() < 1e-12); // (0,0) -> 1
        assert!((pi[[1, 1]] - 1.0).abs() < 1e-12); // (0,1) -> 1
        assert!((pi[[0, 2]] - 1.0).abs() < 1e-12); // (1,0) -> 0
        assert!((pi[[0, 3]] - 1.0).abs() < 1e-12); // (1,1) -> 0
    }

    #[test]
    fn trajectories_with_incomplete_data_diffuses_the_unknown_prehistory_coordinate() {
        let pi = transition_matrix_from_trajectories(&memory_one_trajectories(), 2, 4, true).unwrap();
        assert!((pi[[1, 0]] - 0.95).abs() < 1e-12);
        assert!((pi[[0, 0]] - 0.05).abs() < 1e-12);
        assert!((pi[[1, 1]] - 0.95).abs() < 1e-12);
        assert!((pi[[0, 1]] - 0.05).abs() < 1e-12);
        assert!((pi[[0, 2]] - 0.95).abs() < 1e-12);
        assert!((pi[[1, 2]] - 0.05).abs() < 1e-12);
        assert!((pi[[0, 3]] - 0.95).abs() < 1e-12);
        assert!((pi[[1, 3]] - 0.05).abs() < 1e-12);
    }
}
