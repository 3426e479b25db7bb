//! Hyperparameters and optimiser termination criteria: the public
//! configuration surface of the estimator.

use crate::error::{CsmError, CsmResult};
use crate::regulariser::Regulariser;

#[derive(Debug, Clone)]
pub struct CsmParams {
    pub memory: usize,
    pub tr_prob_nn: f64,
    pub dim: usize,
    pub regularisation_lambda: f64,
    pub regulariser: Option<Regulariser>,
}

impl CsmParams {
    pub fn new(
        memory: usize,
        tr_prob_nn: f64,
        dim: usize,
        regularisation_lambda: f64,
        regulariser: Option<Regulariser>,
    ) -> CsmResult<Self> {
        let params = Self {
            memory,
            tr_prob_nn,
            dim,
            regularisation_lambda,
            regulariser,
        };
        params.validate()?;
        Ok(params)
    }

    /// Returns a copy with `dim` filled in from `data_dim` when `self.dim`
    /// was left at the sentinel value `0`.
    pub fn with_dim(&self, data_dim: usize) -> Self {
        let mut clone = self.clone();
        if clone.dim == 0 {
            clone.dim = data_dim;
        }
        clone
    }

    pub fn validate(&self) -> CsmResult<()> {
        if !(0.0..=1.0).contains(&self.tr_prob_nn) {
            return Err(CsmError::OutOfRange(
                "tr_prob_nn must lie in [0, 1]".into(),
            ));
        }
        if self.regularisation_lambda < 0.0 {
            return Err(CsmError::OutOfRange(
                "regularisation_lambda must be non-negative".into(),
            ));
        }
        if self.regularisation_lambda > 0.0 && self.regulariser.is_none() {
            return Err(CsmError::InvalidArgument(
                "a positive regularisation_lambda requires a regulariser".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StoppingConditions {
    pub stopval: f64,
    pub ftol_abs: f64,
    pub ftol_rel: f64,
    pub xtol_abs: f64,
    pub xtol_rel: f64,
    pub maxeval: usize,
    pub maxtime: f64,
}

impl Default for StoppingConditions {
    fn default() -> Self {
        Self {
            stopval: 1e-12,
            ftol_abs: 0.0,
            ftol_rel: 1e-12,
            xtol_abs: 0.0,
            xtol_rel: 1e-6,
            maxeval: 1000,
            maxtime: 60.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PiInitMethod {
    Identity,
    MaxEntropy,
    FromTrajectories,
    FromTrajectoriesCompleteOnly,
    Heuristic,
}

impl PiInitMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PiInitMethod::Identity => "IDENTITY",
            PiInitMethod::MaxEntropy => "MAX_ENTROPY",
            PiInitMethod::FromTrajectories => "FROM_TRAJECTORIES",
            PiInitMethod::FromTrajectoriesCompleteOnly => "FROM_TRAJECTORIES_COMPLETE_ONLY",
            PiInitMethod::Heuristic => "HEURISTIC",
        }
    }

    pub fn parse(s: &str) -> CsmResult<Self> {
        match s {
            "IDENTITY" => Ok(PiInitMethod::Identity),
            "MAX_ENTROPY" => Ok(PiInitMethod::MaxEntropy),
            "FROM_TRAJECTORIES" => Ok(PiInitMethod::FromTrajectories),
            "FROM_TRAJECTORIES_COMPLETE_ONLY" => Ok(PiInitMethod::FromTrajectoriesCompleteOnly),
            "HEURISTIC" => Ok(PiInitMethod::Heuristic),
            other => Err(CsmError::InvalidArgument(format!(
                "unknown Π initial-guess method: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Q0InitMethod {
    MaxEntropy,
    FromData,
}

impl Q0InitMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Q0InitMethod::MaxEntropy => "MAX_ENTROPY",
            Q0InitMethod::FromData => "FROM_DATA",
        }
    }

    pub fn parse(s: &str) -> CsmResult<Self> {
        match s {
            "MAX_ENTROPY" => Ok(Q0InitMethod::MaxEntropy),
            "FROM_DATA" => Ok(Q0InitMethod::FromData),
            other => Err(CsmError::InvalidArgument(format!(
                "unknown q0 initial-guess method: {other}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_out_of_range_tr_prob_nn() {
        assert!(CsmParams::new(0, 1.5, 2, 0.0, None).is_err());
    }

    #[test]
    fn rejects_positive_lambda_without_regulariser() {
        assert!(CsmParams::new(0, 1.0, 2, 0.5, None).is_err());
    }

    #[test]
    fn round_trips_init_method_names() {
        for m in [
            PiInitMethod::Identity,
            PiInitMethod::MaxEntropy,
            PiInitMethod::FromTrajectories,
            PiInitMethod::FromTrajectoriesCompleteOnly,
            PiInitMethod::Heuristic,
        ] {
            assert_eq!(PiInitMethod::parse(m.as_str()).unwrap(), m);
        }
        assert!(PiInitMethod::parse("NONSENSE").is_err());
    }
}
