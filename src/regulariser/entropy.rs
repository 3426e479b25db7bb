use crate::ad::Scalar;

/// `w_pi * sum(p * log p)` over the `Π` block plus `w_q0 * sum(p * log p)`
/// over the `q0` block. Negative weights reward high entropy.
pub fn calc<S: Scalar>(pi_block: &[S], q0_block: &[S], pi_weight: f64, q0_weight: f64) -> S {
    let pi_sum = sum_p_log_p(pi_block);
    let q0_sum = sum_p_log_p(q0_block);
    pi_sum * S::from_f64(pi_weight) + q0_sum * S::from_f64(q0_weight)
}

fn sum_p_log_p<S: Scalar>(block: &[S]) -> S {
    block
        .iter()
        .fold(S::from_f64(0.0), |acc, p| acc + p.clone() * p.ln())
}
