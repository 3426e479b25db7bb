//! The observed-data value type: cross-sectional marginals, survey weights,
//! observation times, and optional longitudinal trajectories. Immutable once
//! constructed; shared by reference between the driver and its objective.

use ndarray::{Array1, Array2};

use crate::error::{CsmError, CsmResult};
use crate::jagged::Jagged2DArray;

#[derive(Debug, Clone)]
pub struct ObservedData {
    /// `dim x T` column-stochastic cross-sectional distributions.
    pub probs: Array2<f64>,
    /// Per-period survey sizes, used as weights in the KL term.
    pub nbr_surveys: Array1<f64>,
    /// Observation times, strictly increasing, aligned with `probs` columns.
    pub times: Vec<f64>,
    /// Per-trajectory observed lifted-state indices.
    pub ltrajs: Jagged2DArray<usize>,
    /// Per-trajectory observation times, strictly increasing per row.
    pub ltimes: Jagged2DArray<f64>,
}

impl ObservedData {
    pub fn empty(dim: usize) -> Self {
        Self {
            probs: Array2::zeros((dim, 0)),
            nbr_surveys: Array1::zeros(0),
            times: Vec::new(),
            ltrajs: Jagged2DArray::from_rows(Vec::<Vec<usize>>::new()),
            ltimes: Jagged2DArray::from_rows(Vec::<Vec<f64>>::new()),
        }
    }

    pub fn dim(&self) -> usize {
        self.probs.nrows()
    }

    pub fn has_cross_sectional(&self) -> bool {
        !self.times.is_empty()
    }

    pub fn has_trajectories(&self) -> bool {
        self.ltrajs.nbr_elements() > 0
    }

    pub fn first_time(&self) -> Option<f64> {
        let cs = self.times.first().copied();
        let lg = self
            .ltimes
            .iter()
            .cloned()
            .fold(None, |acc: Option<f64>, t| match acc {
                Some(a) => Some(a.min(t)),
                None => Some(t),
            });
        match (cs, lg) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (Some(a), None) => Some(a),
            (None, Some(b)) => Some(b),
            (None, None) => None,
        }
    }

    pub fn last_time(&self) -> Option<f64> {
        let cs = self.times.last().copied();
        let lg = self
            .ltimes
            .iter()
            .cloned()
            .fold(None, |acc: Option<f64>, t| match acc {
                Some(a) => Some(a.max(t)),
                None => Some(t),
            });
        match (cs, lg) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (Some(a), None) => Some(a),
            (None, Some(b)) => Some(b),
            (None, None) => None,
        }
    }

    /// Number of unit-step periods spanning the full observed range.
    pub fn padded_len(&self) -> CsmResult<usize> {
        let first = self.first_time().ok_or_else(|| {
            CsmError::DataException("cannot determine padded length of empty data".into())
        })?;
        let last = self.last_time().unwrap();
        Ok((last - first).round() as usize + 1)
    }

    pub fn validate(&self) -> CsmResult<()> {
        if self.probs.ncols() != self.times.len() {
            return Err(CsmError::DataException(
                "probs column count must match times length".into(),
            ));
        }
        if self.nbr_surveys.len() != self.times.len() {
            return Err(CsmError::DataException(
                "nbr_surveys length must match times length".into(),
            ));
        }
        for w in self.nbr_surveys.iter() {
            if *w < 0.0 {
                return Err(CsmError::DataException("survey weights must be non-negative".into()));
            }
        }
        for col in self.probs.columns() {
            let sum: f64 = col.sum();
            if col.iter().any(|&v| v < 0.0) || (sum - 1.0).abs() > 1e-6 {
                return Err(CsmError::DataException(
                    "each cross-sectional column must be a probability distribution".into(),
                ));
            }
        }
        if self.ltrajs.nbr_rows() != self.ltimes.nbr_rows() {
            return Err(CsmError::DataException(
                "ltrajs and ltimes must have the same number of trajectories".into(),
            ));
        }
        for r in 0..self.ltrajs.nbr_rows() {
            if self.ltrajs.row(r).len() != self.ltimes.row(r).len() {
                return Err(CsmError::DataException(format!(
                    "trajectory {r}: state and time row lengths differ"
                )));
            }
            if !self.ltimes.row(r).windows(2).all(|w| w[1] > w[0]) {
                return Err(CsmError::DataException(format!(
                    "trajectory {r}: observation times must be strictly increasing"
                )));
            }
        }
        Ok(())
    }

    /// Maps each observed cross-sectional time to its index on the padded,
    /// unit-step grid starting at [`ObservedData::first_time`].
    pub fn input_to_padded(&self) -> CsmResult<Vec<usize>> {
        let first = self
            .first_time()
            .ok_or_else(|| CsmError::DataException("no observed times".into()))?;
        Ok(self
            .times
            .iter()
            .map(|&t| (t - first).round() as usize)
            .collect())
    }

    /// Dense per-period expansion of trajectory `row`, `-1` (`None`) marking
    /// unobserved periods, relative to [`ObservedData::first_time`].
    pub fn expand_trajectory(&self, row: usize, padded_len: usize) -> CsmResult<Vec<Option<usize>>> {
        let first = self
            .first_time()
            .ok_or_else(|| CsmError::DataException("no observed times".into()))?;
        let mut out = vec![None; padded_len];
        for (&state, &t) in self.ltrajs.row(row).iter().zip(self.ltimes.row(row).iter()) {
            let idx = (t - first).round() as usize;
            if idx >= padded_len {
                return Err(CsmError::DataException(format!(
                    "trajectory {row} observation at time {t} falls outside the padded grid"
                )));
            }
            out[idx] = Some(state);
        }
        Ok(out)
    }

    /// Counts non-missing entries among `{t - memory, ..., t}` of a dense,
    /// per-period expanded trajectory.
    pub fn count_specified_states(expanded: &[Option<usize>], t: usize, memory: usize) -> usize {
        let lo = t.saturating_sub(memory);
        expanded[lo..=t].iter().filter(|s| s.is_some()).count()
    }
}

/// Leave-one-period-out iterator over the cross-sectional part of `data`,
/// for cross-validating a fit's sensitivity to any single observed period.
pub struct LeaveOnePeriodOut<'a> {
    data: &'a ObservedData,
    next: usize,
}

impl<'a> LeaveOnePeriodOut<'a> {
    pub fn new(data: &'a ObservedData) -> Self {
        Self { data, next: 0 }
    }
}

impl<'a> Iterator for LeaveOnePeriodOut<'a> {
    type Item = ObservedData;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.data.times.len() {
            return None;
        }
        let skip = self.next;
        self.next += 1;
        let keep: Vec<usize> = (0..self.data.times.len()).filter(|&i| i != skip).collect();
        let probs = self.data.probs.select(ndarray::Axis(1), &keep);
        let nbr_surveys = self.data.nbr_surveys.select(ndarray::Axis(0), &keep);
        let times = keep.iter().map(|&i| self.data.times[i]).collect();
        Some(ObservedData {
            probs,
            nbr_surveys,
            times,
            ltrajs: self.data.ltrajs.clone(),
            ltimes: self.data.ltimes.clone(),
        })
    }
}

/// Bootstrap-resamples the cross-sectional periods of `data` with
/// replacement, drawing survey weights from the same observed periods.
/// `draw` must return a uniform index in `[0, n)`.
pub fn resample_cross_sectional(data: &ObservedData, mut draw: impl FnMut(usize) -> usize) -> ObservedData {
    let n = data.times.len();
    let picks: Vec<usize> = (0..n).map(|_| draw(n)).collect();
    let probs = data.probs.select(ndarray::Axis(1), &picks);
    let nbr_surveys = data.nbr_surveys.select(ndarray::Axis(0), &picks);
    ObservedData {
        probs,
        nbr_surveys,
        times: data.times.clone(),
        ltrajs: data.ltrajs.clone(),
        ltimes: data.ltimes.clone(),
    }
}
