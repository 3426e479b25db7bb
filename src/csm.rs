//! The public driver: orchestrates initial guesses, the optimiser, and
//! confidence-interval extrapolation around a single [`Objective`].

use std::time::Instant;

use ndarray::{Array1, Array2};
use tracing::{debug, warn};

use crate::data::ObservedData;
use crate::error::{CsmError, CsmResult, EPS};
use crate::extrapolate::{self, ConfidenceIntervals};
use crate::markov::transition_matrix_from_trajectories;
use crate::objective::Objective;
use crate::optimiser::{BoxedBfgs, GradientProblem, Optimiser};
use crate::params::{CsmParams, PiInitMethod, Q0InitMethod, StoppingConditions};

pub struct Csm {
    pub params: CsmParams,
    objective: Objective,
}

#[derive(Debug, Clone)]
pub struct EstimationReport {
    pub loss: f64,
    pub status: String,
    pub iterations: usize,
    pub elapsed_seconds: f64,
}

struct ObjectiveProblem<'a> {
    objective: &'a Objective,
}

impl GradientProblem for ObjectiveProblem<'_> {
    fn evaluate(&self, x: &[f64]) -> CsmResult<(f64, Vec<f64>)> {
        self.objective.value_and_gradient(x, false)
    }
}

impl Csm {
    pub fn new(data: ObservedData, params: CsmParams) -> CsmResult<Self> {
        let params = params.with_dim(data.dim());
        params.validate()?;
        let objective = Objective::new(
            data,
            params.dim,
            params.memory,
            params.tr_prob_nn,
            params.regularisation_lambda,
            params.regulariser.clone(),
        )?;
        Ok(Self { params, objective })
    }

    pub fn dim(&self) -> usize {
        self.objective.dim
    }

    pub fn state_dim(&self) -> usize {
        self.objective.state_dim
    }

    pub fn data(&self) -> &ObservedData {
        &self.objective.data
    }

    pub fn calc_initial_guess_pi(&self, method: PiInitMethod) -> CsmResult<Array2<f64>> {
        let dim = self.dim();
        let state_dim = self.state_dim();
        match method {
            PiInitMethod::Identity => Ok(identity_pi(dim, state_dim)),
            PiInitMethod::MaxEntropy => Ok(Array2::from_elem((dim, state_dim), 1.0 / dim as f64)),
            PiInitMethod::FromTrajectories => self.pi_from_trajectories(true),
            PiInitMethod::FromTrajectoriesCompleteOnly => self.pi_from_trajectories(false),
            PiInitMethod::Heuristic => {
                let data = self.data();
                let mean_surveys = if data.nbr_surveys.is_empty() {
                    0.0
                } else {
                    data.nbr_surveys.mean().unwrap_or(0.0)
                };
                let n_traj = data.ltrajs.nbr_rows() as f64;
                let use_trajectories = data.has_trajectories()
                    && (!data.has_cross_sectional() || mean_surveys < n_traj);
                if use_trajectories {
                    self.pi_from_trajectories(true)
                } else {
                    Ok(identity_pi(dim, state_dim))
                }
            }
        }
    }

    fn pi_from_trajectories(&self, use_incomplete_data: bool) -> CsmResult<Array2<f64>> {
        let data = self.data();
        if !data.has_trajectories() {
            return Err(CsmError::LogicError(
                "cannot build an initial guess from trajectories without longitudinal data".into(),
            ));
        }
        let padded_len = data.padded_len()?;
        let trajectories: CsmResult<Vec<Vec<Option<usize>>>> = (0..data.ltrajs.nbr_rows())
            .map(|r| data.expand_trajectory(r, padded_len))
            .collect();
        transition_matrix_from_trajectories(
            &trajectories?,
            self.dim(),
            self.state_dim(),
            use_incomplete_data,
        )
    }

    pub fn calc_initial_guess_q0(&self, method: Q0InitMethod) -> CsmResult<Array1<f64>> {
        let state_dim = self.state_dim();
        let dim = self.dim();
        match method {
            Q0InitMethod::MaxEntropy => Ok(Array1::from_elem(state_dim, 1.0 / state_dim as f64)),
            Q0InitMethod::FromData => {
                let data = self.data();
                if !data.has_cross_sectional() {
                    return Err(CsmError::LogicError(
                        "cannot build a q0 guess from data without cross-sectional observations".into(),
                    ));
                }
                let first_marginal = data.probs.column(0);
                let mut q0 = Array1::from_elem(state_dim, EPS);
                for i in 0..dim {
                    // diagonal lifted state (i, i, ..., i)
                    let diag_state = crate::multi_index::flatten(&vec![i; self.params.memory + 1], dim);
                    q0[diag_state] = first_marginal[i].max(EPS);
                }
                Ok(q0)
            }
        }
    }

    /// Flattens `(pi, q0)` column-major-by-column into the objective's
    /// parameter layout.
    fn flatten(&self, pi: &Array2<f64>, q0: &Array1<f64>) -> CsmResult<Vec<f64>> {
        if pi.nrows() != self.dim() || pi.ncols() != self.state_dim() || q0.len() != self.state_dim() {
            return Err(CsmError::InvalidArgument(
                "Π/q0 dimensions do not match this estimator's (dim, state_dim)".into(),
            ));
        }
        let mut x = Vec::with_capacity(self.objective.arg_dim);
        for col in pi.columns() {
            x.extend(col.iter().copied());
        }
        x.extend(q0.iter().copied());
        Ok(x)
    }

    fn unflatten(&self, x: &[f64]) -> (Array2<f64>, Array1<f64>) {
        let dim = self.dim();
        let state_dim = self.state_dim();
        let mut pi = Array2::zeros((dim, state_dim));
        for (col, chunk) in x[..dim * state_dim].chunks(dim).enumerate() {
            for (row, &v) in chunk.iter().enumerate() {
                pi[[row, col]] = v;
            }
        }
        let q0 = Array1::from(x[dim * state_dim..].to_vec());
        (pi, q0)
    }

    /// Fits `(pi, q0)` in place, returning the final loss and optimiser status.
    pub fn estimate(
        &self,
        pi: &mut Array2<f64>,
        q0: &mut Array1<f64>,
        stopping: StoppingConditions,
    ) -> CsmResult<EstimationReport> {
        self.estimate_with(pi, q0, stopping, &BoxedBfgs::default())
    }

    pub fn estimate_with(
        &self,
        pi: &mut Array2<f64>,
        q0: &mut Array1<f64>,
        stopping: StoppingConditions,
        optimiser: &dyn Optimiser,
    ) -> CsmResult<EstimationReport> {
        let start = Instant::now();
        let mut x0 = self.flatten(pi, q0)?;
        for v in x0.iter_mut() {
            *v = v.clamp(EPS, 1.0);
        }
        fix_renormalise(&mut x0, self.dim(), self.state_dim());

        let (lower, upper) = self.objective.bounds();
        let problem = ObjectiveProblem {
            objective: &self.objective,
        };
        let outcome = optimiser.minimise(&problem, x0, &lower, &upper, stopping)?;

        let mut x_final = outcome.x;
        fix_renormalise(&mut x_final, self.dim(), self.state_dim());
        let loss = self.objective.value_only(&x_final, true)?;

        let (fitted_pi, fitted_q0) = self.unflatten(&x_final);
        *pi = fitted_pi;
        *q0 = fitted_q0;

        let elapsed_seconds = start.elapsed().as_secs_f64();
        debug!(
            iterations = outcome.iterations,
            elapsed_seconds, loss, status = outcome.status.as_str(), "CSM estimation finished"
        );
        if matches!(
            outcome.status,
            crate::optimiser::OptimiserStatus::MaxEvalReached | crate::optimiser::OptimiserStatus::MaxTimeReached
        ) {
            warn!(status = outcome.status.as_str(), "optimiser did not fully converge");
        }

        Ok(EstimationReport {
            loss,
            status: outcome.status.as_str().to_string(),
            iterations: outcome.iterations,
            elapsed_seconds,
        })
    }

    /// Per-observation weighted residuals `w_t * (P[:,t] - fitted marginal)`
    /// on the original (unpadded) time grid.
    pub fn calc_errors(&self, pi: &Array2<f64>, q0: &Array1<f64>) -> CsmResult<Array2<f64>> {
        let data = self.data();
        let padded = extrapolate::extrapolate_dense(pi, q0, self.objective.t_padded, self.dim());
        let mut errors = Array2::zeros((self.dim(), data.times.len()));
        for (obs_idx, &t_pad) in self.objective.input_to_padded.iter().enumerate() {
            let weight = data.nbr_surveys[obs_idx];
            for k in 0..self.dim() {
                errors[[k, obs_idx]] = weight * (data.probs[[k, obs_idx]] - padded[[k, t_pad]]);
            }
        }
        Ok(errors)
    }

    pub fn extrapolate_analytic_confidence_intervals(
        &self,
        pi: &Array2<f64>,
        q0: &Array1<f64>,
        periods: usize,
        alpha: f64,
    ) -> CsmResult<ConfidenceIntervals> {
        let x = self.flatten(pi, q0)?;
        extrapolate::confidence_intervals(&self.objective, &x, periods, alpha)
    }

    pub fn value(&self, pi: &Array2<f64>, q0: &Array1<f64>) -> CsmResult<f64> {
        let x = self.flatten(pi, q0)?;
        self.objective.value_only(&x, true)
    }
}

fn identity_pi(dim: usize, state_dim: usize) -> Array2<f64> {
    let mut pi = Array2::from_elem((dim, state_dim), EPS);
    for col in 0..state_dim {
        pi[[col % dim, col]] = 1.0;
    }
    pi
}

fn fix_renormalise(x: &mut [f64], dim: usize, state_dim: usize) {
    for v in x.iter_mut() {
        *v = v.clamp(EPS, 1.0);
    }
    crate::workspace::normalise_distributions(x, state_dim, dim);
}

/// A reusable wrapper around [`Csm`] for walk-forward model comparison:
/// calibrate on one dataset, then compare held-out likelihood against
/// another dataset fit with the same `(memory, tr_prob_nn)` family.
pub struct Model {
    pub pi_init: PiInitMethod,
    pub q0_init: Q0InitMethod,
    pub stopping: StoppingConditions,
}

impl Default for Model {
    fn default() -> Self {
        Self {
            pi_init: PiInitMethod::Heuristic,
            q0_init: Q0InitMethod::FromData,
            stopping: StoppingConditions::default(),
        }
    }
}

impl Model {
    /// Fits `data` and extrapolates the observed marginals for `periods`
    /// unit steps from the first observed time. Returns the final loss and
    /// the extrapolated `dim x periods` marginal matrix.
    pub fn calibrate_and_extrapolate(
        &self,
        data: ObservedData,
        params: CsmParams,
        periods: usize,
    ) -> CsmResult<(f64, Array2<f64>)> {
        let csm = Csm::new(data, params)?;
        let mut pi = csm.calc_initial_guess_pi(self.pi_init)?;
        let mut q0 = csm.calc_initial_guess_q0(self.q0_init)?;
        let report = csm.estimate(&mut pi, &mut q0, self.stopping)?;
        let extrapolated = extrapolate::extrapolate_dense(&pi, &q0, periods, csm.dim());
        Ok((report.loss, extrapolated))
    }

    /// Fits on `calibration_data` and reports both the training loss and the
    /// negative log-likelihood of the fitted model against `test_data`
    /// (same `(dim, memory)` family), for out-of-sample model comparison.
    pub fn calibrate_and_score(
        &self,
        calibration_data: ObservedData,
        test_data: ObservedData,
        params: CsmParams,
    ) -> CsmResult<(f64, f64)> {
        let csm = Csm::new(calibration_data, params.clone())?;
        let mut pi = csm.calc_initial_guess_pi(self.pi_init)?;
        let mut q0 = csm.calc_initial_guess_q0(self.q0_init)?;
        let report = csm.estimate(&mut pi, &mut q0, self.stopping)?;

        let test_csm = Csm::new(test_data, params)?;
        let test_loss = test_csm.value(&pi, &q0)?;
        Ok((report.loss, test_loss))
    }
}
