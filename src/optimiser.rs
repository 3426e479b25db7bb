//! The nonlinear optimiser is treated as an external collaborator behind a
//! minimal callback contract: a value+gradient evaluator, box bounds, and
//! stopping conditions. [`BoxedBfgs`] is the one concrete implementation
//! this crate ships, a bound-constrained BFGS quasi-Newton method with
//! projected, Armijo-backtracking line search.

use std::time::Instant;

use ndarray::{Array1, Array2};

use crate::error::CsmResult;
use crate::params::StoppingConditions;

pub trait GradientProblem {
    /// Value and gradient of the objective at `x`. `x` may briefly stray
    /// outside `[lower, upper]` during line search backtracking.
    fn evaluate(&self, x: &[f64]) -> CsmResult<(f64, Vec<f64>)>;
}

#[derive(Debug, Clone)]
pub enum OptimiserStatus {
    StopValReached,
    FtolReached,
    XtolReached,
    MaxEvalReached,
    MaxTimeReached,
}

impl OptimiserStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OptimiserStatus::StopValReached => "stopval reached",
            OptimiserStatus::FtolReached => "function tolerance reached",
            OptimiserStatus::XtolReached => "parameter tolerance reached",
            OptimiserStatus::MaxEvalReached => "maximum evaluation count reached",
            OptimiserStatus::MaxTimeReached => "maximum time budget reached",
        }
    }
}

#[derive(Debug, Clone)]
pub struct OptimiserOutcome {
    pub x: Vec<f64>,
    pub value: f64,
    pub status: OptimiserStatus,
    pub iterations: usize,
}

pub trait Optimiser {
    fn minimise(
        &self,
        problem: &dyn GradientProblem,
        x0: Vec<f64>,
        lower: &[f64],
        upper: &[f64],
        stopping: StoppingConditions,
    ) -> CsmResult<OptimiserOutcome>;
}

/// Bound-constrained BFGS with gradient projection onto `[lower, upper]` at
/// every accepted step, and an Armijo backtracking line search whose trial
/// points are also projected (so the objective only ever sees feasible
/// points at accepted iterates, though line-search probes may briefly stray
/// outside the box before projection).
pub struct BoxedBfgs {
    pub armijo_c1: f64,
    pub backtrack_factor: f64,
    pub max_line_search_steps: usize,
}

impl Default for BoxedBfgs {
    fn default() -> Self {
        Self {
            armijo_c1: 1e-4,
            backtrack_factor: 0.5,
            max_line_search_steps: 40,
        }
    }
}

fn project(x: &mut Array1<f64>, lower: &[f64], upper: &[f64]) {
    for i in 0..x.len() {
        x[i] = x[i].clamp(lower[i], upper[i]);
    }
}

impl Optimiser for BoxedBfgs {
    fn minimise(
        &self,
        problem: &dyn GradientProblem,
        x0: Vec<f64>,
        lower: &[f64],
        upper: &[f64],
        stopping: StoppingConditions,
    ) -> CsmResult<OptimiserOutcome> {
        let start = Instant::now();
        let n = x0.len();
        let mut x = Array1::from(x0);
        project(&mut x, lower, upper);

        let (mut f, g0) = problem.evaluate(x.as_slice().unwrap())?;
        let mut g = Array1::from(g0);
        let mut h_inv = Array2::<f64>::eye(n);
        let mut iterations = 0usize;

        loop {
            if f <= stopping.stopval {
                return Ok(OptimiserOutcome {
                    x: x.to_vec(),
                    value: f,
                    status: OptimiserStatus::StopValReached,
                    iterations,
                });
            }
            if iterations >= stopping.maxeval {
                return Ok(OptimiserOutcome {
                    x: x.to_vec(),
                    value: f,
                    status: OptimiserStatus::MaxEvalReached,
                    iterations,
                });
            }
            if start.elapsed().as_secs_f64() >= stopping.maxtime {
                return Ok(OptimiserOutcome {
                    x: x.to_vec(),
                    value: f,
                    status: OptimiserStatus::MaxTimeReached,
                    iterations,
                });
            }

            let direction = -h_inv.dot(&g);
            let directional_derivative = g.dot(&direction);
            if directional_derivative.abs() < 1e-300 {
                return Ok(OptimiserOutcome {
                    x: x.to_vec(),
                    value: f,
                    status: OptimiserStatus::XtolReached,
                    iterations,
                });
            }

            let mut step = 1.0;
            let mut accepted = None;
            for _ in 0..self.max_line_search_steps {
                let mut trial = &x + &(&direction * step);
                project(&mut trial, lower, upper);
                let (f_trial, g_trial) = problem.evaluate(trial.as_slice().unwrap())?;
                if f_trial <= f + self.armijo_c1 * step * directional_derivative {
                    accepted = Some((trial, f_trial, Array1::from(g_trial)));
                    break;
                }
                step *= self.backtrack_factor;
            }

            let (x_next, f_next, g_next) = match accepted {
                Some(a) => a,
                None => {
                    return Ok(OptimiserOutcome {
                        x: x.to_vec(),
                        value: f,
                        status: OptimiserStatus::XtolReached,
                        iterations,
                    })
                }
            };

            let s = &x_next - &x;
            let y = &g_next - &g;
            let sy = s.dot(&y);
            if sy > 1e-12 {
                // BFGS inverse-Hessian update (Sherman-Morrison form).
                let rho = 1.0 / sy;
                let n = s.len();
                let i = Array2::<f64>::eye(n);
                let s_col = s.clone().insert_axis(ndarray::Axis(1));
                let y_col = y.clone().insert_axis(ndarray::Axis(1));
                let term1 = &i - &(s_col.dot(&y_col.t()) * rho);
                let term2 = &i - &(y_col.dot(&s_col.t()) * rho);
                h_inv = term1.dot(&h_inv).dot(&term2) + s_col.dot(&s_col.t()) * rho;
            }

            let rel_f_change = (f - f_next).abs() / f.abs().max(1.0);
            let x_change = (&x_next - &x).mapv(f64::abs).sum() / (x.mapv(f64::abs).sum().max(1.0));

            x = x_next;
            f = f_next;
            g = g_next;
            iterations += 1;

            if rel_f_change < stopping.ftol_rel || (f - f_next).abs() < stopping.ftol_abs {
                return Ok(OptimiserOutcome {
                    x: x.to_vec(),
                    value: f,
                    status: OptimiserStatus::FtolReached,
                    iterations,
                });
            }
            if x_change < stopping.xtol_rel {
                return Ok(OptimiserOutcome {
                    x: x.to_vec(),
                    value: f,
                    status: OptimiserStatus::XtolReached,
                    iterations,
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Quadratic;

    impl GradientProblem for Quadratic {
        fn evaluate(&self, x: &[f64]) -> CsmResult<(f64, Vec<f64>)> {
            // f(x) = sum((x_i - 0.3)^2), minimised at x_i = 0.3
            let value = x.iter().map(|&xi| (xi - 0.3).powi(2)).sum();
            let grad = x.iter().map(|&xi| 2.0 * (xi - 0.3)).collect();
            Ok((value, grad))
        }
    }

    #[test]
    fn converges_to_the_unconstrained_minimum() {
        let optimiser = BoxedBfgs::default();
        let stopping = StoppingConditions {
            maxeval: 200,
            ..Default::default()
        };
        let outcome = optimiser
            .minimise(&Quadratic, vec![0.9, 0.1], &[0.0, 0.0], &[1.0, 1.0], stopping)
            .unwrap();
        for &xi in &outcome.x {
            assert!((xi - 0.3).abs() < 1e-3);
        }
    }

    #[test]
    fn respects_box_bounds() {
        let optimiser = BoxedBfgs::default();
        let stopping = StoppingConditions {
            maxeval: 200,
            ..Default::default()
        };
        let outcome = optimiser
            .minimise(&Quadratic, vec![0.9], &[0.5], &[1.0], stopping)
            .unwrap();
        assert!(outcome.x[0] >= 0.5 - 1e-9);
    }
}
