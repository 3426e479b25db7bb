//! Small numerical linear algebra kept in-house rather than pulled from a
//! LAPACK-backed crate: a cyclic Jacobi eigensolver for symmetric matrices,
//! and a Moore-Penrose pseudo-inverse built on it. Matrices here are small
//! (`arg_dim x arg_dim`, `arg_dim = dim * state_dim + state_dim`), so an
//! O(n^3)-per-sweep dense solver is more than fast enough and avoids a
//! system BLAS/LAPACK dependency.

use ndarray::{Array1, Array2};
use statrs::distribution::{ContinuousCDF, Normal};

/// Eigen-decomposes a symmetric matrix via the cyclic Jacobi algorithm.
/// Returns `(eigenvalues, eigenvectors)` with eigenvectors as columns.
pub fn symmetric_eigen(a: &Array2<f64>, max_sweeps: usize, tol: f64) -> (Array1<f64>, Array2<f64>) {
    let n = a.nrows();
    let mut m = a.clone();
    let mut v = Array2::eye(n);

    for _ in 0..max_sweeps {
        let mut off_diag_norm = 0.0;
        for p in 0..n {
            for q in (p + 1)..n {
                off_diag_norm += m[[p, q]] * m[[p, q]];
            }
        }
        if off_diag_norm.sqrt() < tol {
            break;
        }
        for p in 0..n {
            for q in (p + 1)..n {
                if m[[p, q]].abs() < tol * tol {
                    continue;
                }
                let theta = (m[[q, q]] - m[[p, p]]) / (2.0 * m[[p, q]]);
                let t = theta.signum() / (theta.abs() + (theta * theta + 1.0).sqrt());
                let c = 1.0 / (t * t + 1.0).sqrt();
                let s = t * c;

                for i in 0..n {
                    let mip = m[[i, p]];
                    let miq = m[[i, q]];
                    m[[i, p]] = c * mip - s * miq;
                    m[[i, q]] = s * mip + c * miq;
                }
                for i in 0..n {
                    let mpi = m[[p, i]];
                    let mqi = m[[q, i]];
                    m[[p, i]] = c * mpi - s * mqi;
                    m[[q, i]] = s * mpi + c * mqi;
                }
                for i in 0..n {
                    let vip = v[[i, p]];
                    let viq = v[[i, q]];
                    v[[i, p]] = c * vip - s * viq;
                    v[[i, q]] = s * vip + c * viq;
                }
            }
        }
    }

    let eigenvalues = Array1::from_iter((0..n).map(|i| m[[i, i]]));
    (eigenvalues, v)
}

/// Pseudo-inverse of a symmetric matrix via direct eigendecomposition,
/// flooring eigenvalues below `eigenvalue_floor` (avoids squaring the
/// condition number the way the general pseudo-inverse below does).
pub fn symmetric_pinv(a: &Array2<f64>, eigenvalue_floor: f64) -> Array2<f64> {
    let (eigenvalues, eigenvectors) = symmetric_eigen(a, 100, 1e-12);
    let n = a.nrows();
    let mut inv_diag = Array2::zeros((n, n));
    for i in 0..n {
        if eigenvalues[i].abs() > eigenvalue_floor {
            inv_diag[[i, i]] = 1.0 / eigenvalues[i];
        }
    }
    eigenvectors.dot(&inv_diag).dot(&eigenvectors.t())
}

/// Moore-Penrose pseudo-inverse with eigenvalues below `eigenvalue_floor`
/// (relative to the largest) treated as zero. `a` need not be symmetric:
/// the pseudo-inverse is obtained from the symmetric eigendecomposition of
/// `a^T a` via the normal-equations identity `pinv(a) = pinv(a^T a) a^T`.
pub fn moore_penrose_pinv(a: &Array2<f64>, eigenvalue_floor: f64) -> Array2<f64> {
    let ata = a.t().dot(a);
    let (eigenvalues, eigenvectors) = symmetric_eigen(&ata, 100, 1e-12);
    let max_eig = eigenvalues.iter().cloned().fold(0.0_f64, f64::max).max(eigenvalue_floor);
    let n = ata.nrows();
    let mut inv_diag = Array2::zeros((n, n));
    for i in 0..n {
        if eigenvalues[i] > eigenvalue_floor * max_eig.max(1.0) {
            inv_diag[[i, i]] = 1.0 / eigenvalues[i];
        }
    }
    let ata_pinv = eigenvectors.dot(&inv_diag).dot(&eigenvectors.t());
    ata_pinv.dot(&a.t())
}

/// `z = -Phi^-1((1 - alpha) / 2)`, the two-sided normal critical value used
/// to build a `100*alpha%` confidence band from a standard error.
pub fn normal_critical_value(alpha: f64) -> f64 {
    let normal = Normal::new(0.0, 1.0).expect("standard normal parameters are always valid");
    -normal.inverse_cdf((1.0 - alpha) / 2.0)
}
