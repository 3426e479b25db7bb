//! Post-fit extrapolation: dense forward projection of `(Π, q0)`, gap-aware
//! out-of-order extrapolation via the matrix-power cache, and analytic
//! confidence-interval bands built from the objective's Hessian.

use ndarray::{Array1, Array2};

use crate::ad::{Scalar, AD0};
use crate::error::{CsmError, CsmResult};
use crate::linalg::{moore_penrose_pinv, normal_critical_value, symmetric_pinv};
use crate::markov::expand_transition_matrix;
use crate::matrix_power_cache::MatrixPowerCache;
use crate::objective::Objective;
use crate::workspace::Workspace;

/// Dense forward extrapolation: `dim x periods` observed marginals starting
/// from `q0`, one period per column.
pub fn extrapolate_dense(pi: &Array2<f64>, q0: &Array1<f64>, periods: usize, dim: usize) -> Array2<f64> {
    let expanded = expand_transition_matrix(pi.view(), dim);
    let mut state = q0.clone();
    let mut out = Array2::zeros((dim, periods));
    out.column_mut(0).assign(&reduce(&state, dim));
    for t in 1..periods {
        state = expanded.dot(&state);
        out.column_mut(t).assign(&reduce(&state, dim));
    }
    out
}

fn reduce(state_distr: &Array1<f64>, dim: usize) -> Array1<f64> {
    let mut out = Array1::zeros(dim);
    for (idx, &s) in state_distr.iter().enumerate() {
        out[idx % dim] += s;
    }
    out
}

/// Extrapolates to arbitrary, possibly out-of-order output times. Forward
/// steps multiply by `Π^q`; a request for a time before the running cursor
/// (but at or after `t0`) is served by solving `Π^n . x = state` for `x` via
/// the pseudo-inverse of `Π^n`, then renormalising the result onto the
/// simplex.
pub fn extrapolate_at_times(
    pi: &Array2<f64>,
    q0: &Array1<f64>,
    dim: usize,
    t0: f64,
    out_times: &[f64],
) -> Array2<f64> {
    let expanded = expand_transition_matrix(pi.view(), dim);
    let mut cache = MatrixPowerCache::new(expanded.clone());
    let mut cursor_time = t0;
    let mut cursor_state = q0.clone();
    let mut out = Array2::zeros((dim, out_times.len()));

    for (col, &t) in out_times.iter().enumerate() {
        let state = if t < t0 {
            cursor_time = t0;
            cursor_state = q0.clone();
            cursor_state.clone()
        } else if t >= cursor_time {
            let steps = (t - cursor_time).round() as usize;
            let state = if steps == 0 {
                cursor_state.clone()
            } else {
                cache.power(steps).dot(&cursor_state)
            };
            cursor_time = t;
            cursor_state = state.clone();
            state
        } else {
            let steps = (cursor_time - t).round() as usize;
            let power = cache.power(steps).clone();
            let pinv = moore_penrose_pinv(&power, 1e-12);
            let mut solved = pinv.dot(&cursor_state);
            renormalise_simplex(&mut solved);
            solved
        };
        out.column_mut(col).assign(&reduce(&state, dim));
    }
    out
}

fn renormalise_simplex(v: &mut Array1<f64>) {
    for x in v.iter_mut() {
        if *x < 0.0 {
            *x = 0.0;
        }
    }
    let sum: f64 = v.sum();
    if sum > 0.0 {
        v.mapv_inplace(|x| x / sum);
    }
}

fn logit(p: f64) -> f64 {
    (p / (1.0 - p)).ln()
}

fn sigmoid(l: f64) -> f64 {
    1.0 / (1.0 + (-l).exp())
}

#[derive(Debug, Clone)]
pub struct ConfidenceIntervals {
    pub probs: Array2<f64>,
    pub lower: Array2<f64>,
    pub upper: Array2<f64>,
    pub covariance_logit_params: Array2<f64>,
}

/// Analytic confidence-interval extrapolation: builds the Hessian of the
/// fitted objective, converts it to an approximate covariance of the
/// logit-transformed parameters, and propagates that covariance through the
/// extrapolated marginals by the delta method.
pub fn confidence_intervals(
    objective: &Objective,
    x: &[f64],
    periods: usize,
    alpha: f64,
) -> CsmResult<ConfidenceIntervals> {
    if !objective.data.has_cross_sectional() {
        return Err(CsmError::LogicError(
            "analytic confidence intervals require cross-sectional data".into(),
        ));
    }
    let arg_dim = objective.arg_dim;
    let (_, _, hessian_flat) = objective.value_gradient_hessian(x, true)?;
    let hessian = Array2::from_shape_vec((arg_dim, arg_dim), hessian_flat)
        .expect("hessian shape matches arg_dim x arg_dim");

    // dp/dl = p(1-p) for the logit reparametrisation of each parameter entry.
    let scale: Vec<f64> = x.iter().map(|&xi| xi * (1.0 - xi)).collect();
    let mut scaled_hessian = hessian.clone();
    for i in 0..arg_dim {
        for j in 0..arg_dim {
            scaled_hessian[[i, j]] *= scale[i] * scale[j];
        }
    }
    let covariance_logit_params = symmetric_pinv(&scaled_hessian, 1e-14);

    let dim = objective.dim;
    let mut probs = Array2::zeros((dim, periods));
    let mut lower = Array2::zeros((dim, periods));
    let mut upper = Array2::zeros((dim, periods));
    let z = normal_critical_value(alpha);

    let mut ws: Workspace<AD0> = Workspace::new(objective.dim, objective.memory, periods, &objective.data)?;
    ws.set_calibrated_parameters(x, true)?;
    for t in 1..periods {
        ws.extrapolate_to(t);
    }

    for t in 0..periods {
        for k in 0..dim {
            let p_ad = ws.p_approx[t * dim + k].clone();
            let p = p_ad.value().clamp(1e-12, 1.0 - 1e-12);
            probs[[k, t]] = p;
            let l = logit(p);

            // d(logit p)/dx_i = dp/dx_i / (p(1-p)); scale by dx_i/d(logit x_i) = x_i(1-x_i)
            // to express the gradient in the same logit-parameter basis as the covariance.
            let mut variance = 0.0;
            let dlogit_dx: Vec<f64> = (0..arg_dim)
                .map(|i| p_ad.dx(i) / (p * (1.0 - p)) * scale[i])
                .collect();
            for i in 0..arg_dim {
                if dlogit_dx[i] == 0.0 {
                    continue;
                }
                for j in 0..arg_dim {
                    if dlogit_dx[j] == 0.0 {
                        continue;
                    }
                    variance += dlogit_dx[i] * covariance_logit_params[[i, j]] * dlogit_dx[j];
                }
            }
            let sigma = variance.max(0.0).sqrt();
            lower[[k, t]] = sigmoid(l - z * sigma).clamp(0.0, 1.0);
            upper[[k, t]] = sigmoid(l + z * sigma).clamp(0.0, 1.0);
        }
    }

    Ok(ConfidenceIntervals {
        probs,
        lower,
        upper,
        covariance_logit_params,
    })
}
