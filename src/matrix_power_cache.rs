//! Lazy cache of `A^q` for a fixed square matrix `A`, filled by
//! divide-and-conquer squaring: `A^q = A^floor(q/2) * A^ceil(q/2)`.
//!
//! Used by the dense (non-AD) extrapolation path in [`crate::extrapolate`]
//! for gap-aware forward/backward stepping. The AD-aware variant needed
//! inside the objective's inner loop lives next to the workspace buffers it
//! shares ([`crate::workspace::Workspace::ensure_power`]) rather than here,
//! since it must interleave with AD-level renormalisation at every step.

use ndarray::Array2;

pub struct MatrixPowerCache {
    base: Array2<f64>,
    cache: Vec<Option<Array2<f64>>>,
}

impl MatrixPowerCache {
    pub fn new(base: Array2<f64>) -> Self {
        Self {
            base,
            cache: Vec::new(),
        }
    }

    pub fn max_power(&self) -> usize {
        self.cache.len()
    }

    pub fn is_power_available(&self, q: usize) -> bool {
        q >= 1 && q <= self.cache.len() && self.cache[q - 1].is_some()
    }

    /// Returns `A^q`, computing and caching any missing intermediate powers.
    pub fn power(&mut self, q: usize) -> &Array2<f64> {
        assert!(q >= 1, "matrix power must be >= 1");
        if q > self.cache.len() {
            self.cache.resize_with(q, || None);
        }
        if self.cache[q - 1].is_none() {
            let result = if q == 1 {
                self.base.clone()
            } else {
                let l = q / 2;
                let r = q - l;
                let left = self.power(l).clone();
                let right = self.power(r).clone();
                left.dot(&right)
            };
            self.cache[q - 1] = Some(result);
        }
        self.cache[q - 1].as_ref().unwrap()
    }
}
