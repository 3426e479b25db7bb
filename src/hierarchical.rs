//! Utilities for moving a fitted compact transition matrix between memory
//! lengths and into a nested, per-category view used for reporting.

use ndarray::{Array1, Array2};

use crate::error::{CsmError, CsmResult};
use crate::markov::state_dim;

/// Extends a compact `dim x state_dim` transition matrix fitted with
/// `old_memory` to one compatible with `old_memory + 1`: the freshly added
/// oldest coordinate is assumed uninformative, so every one of the `dim`
/// lifted states that share the same `old_memory`-length suffix inherits an
/// identical copy of the original column's transition distribution.
pub fn increase_memory_length_in_transition_matrix(
    pi: &Array2<f64>,
    dim: usize,
    old_memory: usize,
) -> CsmResult<Array2<f64>> {
    let old_state_dim = state_dim(dim, old_memory);
    if pi.nrows() != dim || pi.ncols() != old_state_dim {
        return Err(CsmError::InvalidArgument(format!(
            "expected a {dim} x {old_state_dim} matrix for memory {old_memory}, got {} x {}",
            pi.nrows(),
            pi.ncols()
        )));
    }
    let new_state_dim = old_state_dim * dim;
    let mut extended = Array2::zeros((dim, new_state_dim));
    for new_col in 0..new_state_dim {
        let old_col = new_col % old_state_dim;
        extended.column_mut(new_col).assign(&pi.column(old_col));
    }
    Ok(extended)
}

/// One category's transition sub-table: the lifted states whose newest
/// coordinate is that category, each paired with its outgoing distribution.
pub struct CategoryBlock {
    pub category: usize,
    pub lifted_states: Vec<usize>,
    pub columns: Vec<Array1<f64>>,
}

/// Groups a compact transition matrix's columns by the newest (fastest
/// varying) coordinate of the lifted state they originate from, giving a
/// per-category view suitable for a hierarchical report (one block per
/// "currently in category k" group, rather than a flat `state_dim`-wide
/// table).
pub fn to_hierarchical_compact_form(pi: &Array2<f64>, dim: usize) -> Vec<CategoryBlock> {
    let state_dim = pi.ncols();
    (0..dim)
        .map(|category| {
            let lifted_states: Vec<usize> = (0..state_dim).filter(|l| l % dim == category).collect();
            let columns = lifted_states.iter().map(|&l| pi.column(l).to_owned()).collect();
            CategoryBlock {
                category,
                lifted_states,
                columns,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn increasing_memory_duplicates_columns_across_the_new_axis() {
        let pi = array![[0.2, 0.6], [0.8, 0.4]];
        let extended = increase_memory_length_in_transition_matrix(&pi, 2, 0).unwrap();
        assert_eq!(extended.ncols(), 4);
        assert_eq!(extended.column(0), extended.column(2));
        assert_eq!(extended.column(1), extended.column(3));
    }

    #[test]
    fn hierarchical_form_groups_columns_by_newest_category() {
        // dim=2, memory=1 -> state_dim=4, states 0,2 have newest coordinate 0.
        let pi = Array2::from_elem((2, 4), 0.5);
        let blocks = to_hierarchical_compact_form(&pi, 2);
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].lifted_states, vec![0, 2]);
        assert_eq!(blocks[1].lifted_states, vec![1, 3]);
    }
}
