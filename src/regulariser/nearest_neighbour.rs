use crate::ad::Scalar;

/// Penalises expanded-matrix entries whose source/destination categories are
/// more than `max_dist_not_penalised` apart, biasing the fit toward
/// ordinal-scale transitions.
///
/// `pi_expanded` is stored row-major with `pi_expanded[to * state_dim + from]`
/// holding `P(next state = to | current state = from)`, matching
/// [`crate::workspace`]'s layout.
pub fn calc<S: Scalar>(
    pi_expanded: &[S],
    dim: usize,
    state_dim: usize,
    max_dist_not_penalised: f64,
) -> S {
    let unobserved_state_dim = state_dim / dim;
    let mut sum = S::from_f64(0.0);
    for from in 0..state_dim {
        let last_cat = from % dim;
        let all_cats_but_oldest = from % unobserved_state_dim;
        for next_cat in 0..dim {
            let next_state = all_cats_but_oldest * dim + next_cat;
            let dist = (last_cat as f64 - next_cat as f64).abs();
            if dist > max_dist_not_penalised {
                let entry = pi_expanded[next_state * state_dim + from].clone();
                sum = sum + entry.clone() * entry;
            }
        }
    }
    sum
}
