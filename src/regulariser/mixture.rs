use crate::ad::Scalar;
use crate::error::{CsmError, CsmResult};

pub fn validate(nbr_children: usize, nbr_weights: usize) -> CsmResult<()> {
    if nbr_children == 0 {
        return Err(CsmError::InvalidArgument(
            "mixture regulariser requires at least one child".into(),
        ));
    }
    if nbr_children != nbr_weights {
        return Err(CsmError::InvalidArgument(
            "mixture regulariser requires one weight per child".into(),
        ));
    }
    Ok(())
}

/// Weighted sum of already-evaluated child regularisation terms.
pub fn calc<S: Scalar>(child_values: &[S], weights: &[f64]) -> S {
    child_values
        .iter()
        .zip(weights)
        .fold(S::from_f64(0.0), |acc, (v, &w)| acc + v.clone() * S::from_f64(w))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn weighted_sum_of_children() {
        let values = vec![2.0f64, 4.0];
        let weights = vec![0.5, 0.25];
        assert_eq!(calc(&values, &weights), 2.0);
    }

    #[test]
    fn rejects_mismatched_weight_count() {
        assert!(validate(2, 1).is_err());
        assert!(validate(0, 0).is_err());
    }
}
