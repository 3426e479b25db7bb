//! The penalised negative log-likelihood: cross-sectional KL divergence,
//! regularisation, and longitudinal trajectory likelihood, evaluated at
//! whichever AD level the caller needs (value, gradient, or Hessian).

use tracing::error;

use crate::ad::{Scalar, AD0, AD1};
use crate::data::ObservedData;
use crate::error::{CsmError, CsmResult};
use crate::regulariser::Regulariser;
use crate::workspace::Workspace;

pub struct Objective {
    pub data: ObservedData,
    pub dim: usize,
    pub memory: usize,
    pub state_dim: usize,
    pub arg_dim: usize,
    pub t_padded: usize,
    /// Maps each column of `data.probs` to its period index on the padded grid.
    pub input_to_padded: Vec<usize>,
    pub tr_prob_nn: f64,
    pub lambda: f64,
    pub regulariser: Option<Regulariser>,
}

impl Objective {
    pub fn new(
        data: ObservedData,
        dim: usize,
        memory: usize,
        tr_prob_nn: f64,
        lambda: f64,
        regulariser: Option<Regulariser>,
    ) -> CsmResult<Self> {
        data.validate()?;
        let state_dim = crate::markov::state_dim(dim, memory);
        if let Some(r) = &regulariser {
            r.check_compatibility(dim, state_dim)?;
        }
        let t_padded = data.padded_len()?;
        let input_to_padded = data.input_to_padded()?;
        Ok(Self {
            arg_dim: dim * state_dim + state_dim,
            data,
            dim,
            memory,
            state_dim,
            t_padded,
            input_to_padded,
            tr_prob_nn,
            lambda,
            regulariser,
        })
    }

    /// Lower/upper bound vectors over the `arg_dim`-length parameter vector,
    /// clamping non-neighbour transitions to [`Objective::tr_prob_nn`].
    pub fn bounds(&self) -> (Vec<f64>, Vec<f64>) {
        let mut lower = vec![crate::error::EPS; self.arg_dim];
        let mut upper = vec![1.0; self.arg_dim];
        for l in 0..self.state_dim {
            let last_cat = l % self.dim;
            for k in 0..self.dim {
                if (k as isize - last_cat as isize).unsigned_abs() > 1 {
                    upper[l * self.dim + k] = self.tr_prob_nn;
                }
            }
        }
        (lower, upper)
    }

    pub fn value_only(&self, x: &[f64], add_norm: bool) -> CsmResult<f64> {
        let (v, _) = self.eval::<f64>(x, false, add_norm)?;
        Ok(v)
    }

    pub fn value_and_gradient(&self, x: &[f64], add_norm: bool) -> CsmResult<(f64, Vec<f64>)> {
        let (v, _) = self.eval::<AD0>(x, true, add_norm)?;
        let grad = (0..self.arg_dim).map(|i| v.dx(i)).collect();
        Ok((v.value(), grad))
    }

    /// Row-major `arg_dim x arg_dim` Hessian alongside the value and gradient.
    pub fn value_gradient_hessian(
        &self,
        x: &[f64],
        add_norm: bool,
    ) -> CsmResult<(f64, Vec<f64>, Vec<f64>)> {
        let (v, _) = self.eval::<AD1>(x, true, add_norm)?;
        let n = self.arg_dim;
        let grad = (0..n).map(|i| v.dx(i).value()).collect();
        let mut hessian = vec![0.0; n * n];
        for i in 0..n {
            for j in 0..n {
                hessian[i * n + j] = v.dx(i).dx(j);
            }
        }
        Ok((v.value(), grad, hessian))
    }

    fn eval<S: Scalar>(&self, x: &[f64], with_gradient: bool, add_norm: bool) -> CsmResult<(S, Workspace<S>)> {
        let mut ws: Workspace<S> = Workspace::new(self.dim, self.memory, self.t_padded, &self.data)?;
        let norm_penalty = ws.set_calibrated_parameters(x, with_gradient)?;

        for t in 1..self.t_padded {
            ws.extrapolate_to(t);
        }

        let mut cross_sectional = S::from_f64(0.0);
        for (obs_idx, &t_pad) in self.input_to_padded.iter().enumerate() {
            let observed = self.data.probs.column(obs_idx);
            let weight = self.data.nbr_surveys[obs_idx];
            if weight <= 0.0 {
                continue;
            }
            for k in 0..self.dim {
                let p = observed[k];
                if p <= 0.0 {
                    continue;
                }
                let q = ws.p_approx[t_pad * self.dim + k].clone();
                if q.value() <= 0.0 {
                    let detail = format!("model assigns zero probability to category {k}");
                    error!(trajectory = obs_idx, period = t_pad, %detail, "zero probability encountered");
                    return Err(CsmError::ZeroProbability {
                        trajectory: obs_idx,
                        period: t_pad,
                        detail,
                    });
                }
                let term = S::from_f64(p) * (S::from_f64(p).ln() - q.ln());
                cross_sectional = cross_sectional + term * S::from_f64(weight);
            }
        }

        let mut regularisation = S::from_f64(0.0);
        if self.lambda > 0.0 {
            if let Some(r) = &self.regulariser {
                let pi_block = &ws.ax[..self.dim * self.state_dim];
                let q0_block = &ws.ax[self.dim * self.state_dim..];
                let term = r.calc(pi_block, q0_block, &ws.pi_expanded, self.dim, self.state_dim);
                regularisation = term * S::from_f64(self.lambda);
            }
        }

        let longitudinal = if self.memory == 0 {
            self.memoryless_longitudinal_term(&mut ws)?
        } else {
            self.memoryful_longitudinal_term(&mut ws)?
        };

        let mut total = cross_sectional + regularisation + longitudinal;
        if add_norm {
            total = total + norm_penalty;
        }
        Ok((total, ws))
    }

    fn memoryless_longitudinal_term<S: Scalar>(&self, ws: &mut Workspace<S>) -> CsmResult<S> {
        let mut total = S::from_f64(0.0);
        for traj in 0..ws.expanded_data.len() {
            let observed: Vec<(usize, usize)> = ws.expanded_data[traj]
                .iter()
                .enumerate()
                .filter_map(|(t, c)| c.map(|c| (t, c)))
                .collect();
            if observed.is_empty() {
                continue;
            }
            let (t0, c0) = observed[0];
            let p0 = ws.p_approx[t0 * self.dim + c0].clone();
            if p0.value() <= 0.0 {
                let detail = "initial observation has zero model probability";
                error!(trajectory = traj, period = t0, detail, "zero probability encountered");
                return Err(CsmError::ZeroProbability {
                    trajectory: traj,
                    period: t0,
                    detail: detail.into(),
                });
            }
            total = total - p0.ln();
            for w in observed.windows(2) {
                let (t_prev, c_prev) = w[0];
                let (t_next, c_next) = w[1];
                let q = t_next - t_prev;
                let step = ws.pi_power_elem(q, c_next, c_prev);
                if step.value() <= 0.0 {
                    let detail = format!("transition {c_prev} -> {c_next} over {q} periods has zero probability");
                    error!(trajectory = traj, period = t_next, %detail, "zero probability encountered");
                    return Err(CsmError::ZeroProbability {
                        trajectory: traj,
                        period: t_next,
                        detail,
                    });
                }
                total = total - step.ln();
            }
        }
        Ok(total)
    }

    fn memoryful_longitudinal_term<S: Scalar>(&self, ws: &mut Workspace<S>) -> CsmResult<S> {
        let mut total = S::from_f64(0.0);
        let state_dim = self.state_dim;
        for traj in 0..ws.expanded_data.len() {
            let observed_times: Vec<usize> = (0..ws.expanded_data[traj].len())
                .filter(|&t| ws.expanded_data[traj][t].is_some())
                .collect();
            if observed_times.is_empty() {
                continue;
            }
            let t0 = observed_times[0];
            let c0 = ws.expanded_data[traj][t0].unwrap();
            let mut next: Vec<S> = (0..state_dim)
                .map(|s| {
                    if s % self.dim == c0 {
                        ws.state_distr_approx[t0 * state_dim + s].clone()
                    } else {
                        S::from_f64(0.0)
                    }
                })
                .collect();

            let mut prev_t = t0;
            for &t in &observed_times[1..] {
                let q = t - prev_t;
                let prev = next;
                let window = self.observation_window(&ws.expanded_data[traj], t);
                let candidates = compatible_flat_states(&window, self.dim);
                let mut updated = vec![S::from_f64(0.0); state_dim];
                for &s in &candidates {
                    let mut acc = S::from_f64(0.0);
                    for u in 0..state_dim {
                        let pu = prev[u].clone();
                        if pu.value() == 0.0 {
                            continue;
                        }
                        acc = acc + pu * ws.pi_power_elem(q, s, u);
                    }
                    updated[s] = acc;
                }
                next = updated;
                prev_t = t;
            }

            let total_prob = next
                .into_iter()
                .fold(S::from_f64(0.0), |acc, v| acc + v);
            if total_prob.value() <= 0.0 {
                let detail = "observed trajectory has zero joint probability under the fitted model";
                error!(trajectory = traj, period = prev_t, detail, "zero probability encountered");
                return Err(CsmError::ZeroProbability {
                    trajectory: traj,
                    period: prev_t,
                    detail: detail.into(),
                });
            }
            total = total - total_prob.ln();
        }
        Ok(total)
    }

    /// Categories at `{t - memory, ..., t}`, oldest first, `None` where
    /// unobserved or before the start of the padded grid.
    fn observation_window(&self, expanded: &[Option<usize>], t: usize) -> Vec<Option<usize>> {
        (0..=self.memory)
            .map(|j| {
                let offset = self.memory - j;
                if offset > t {
                    None
                } else {
                    expanded[t - offset]
                }
            })
            .collect()
    }
}

/// Flat lifted-state indices compatible with a partially-observed window
/// (oldest-first, length `memory + 1`), enumerating free categories at
/// unspecified positions.
fn compatible_flat_states(window: &[Option<usize>], dim: usize) -> Vec<usize> {
    let len = window.len();
    let mut out = Vec::new();
    let mut tuple = vec![0usize; len];
    fn rec(pos: usize, window: &[Option<usize>], dim: usize, tuple: &mut [usize], out: &mut Vec<usize>) {
        if pos == window.len() {
            // tuple is ordered i_0 (newest) .. i_{len-1} (oldest); flatten
            // with the newest varying fastest.
            let mut flat = 0usize;
            for &i in tuple.iter().rev() {
                flat = flat * dim + i;
            }
            out.push(flat);
            return;
        }
        let tuple_idx = window.len() - 1 - pos;
        match window[pos] {
            Some(c) => {
                tuple[tuple_idx] = c;
                rec(pos + 1, window, dim, tuple, out);
            }
            None => {
                for c in 0..dim {
                    tuple[tuple_idx] = c;
                    rec(pos + 1, window, dim, tuple, out);
                }
            }
        }
    }
    rec(0, window, dim, &mut tuple, &mut out);
    out
}
