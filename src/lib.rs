//! Cross-sectional Markov estimator: fits a lifted-state discrete Markov
//! chain to cross-sectional marginals and/or longitudinal trajectories,
//! under a configurable memory length, nearest-neighbour transition
//! clamping, and optional regularisation.

pub mod ad;
pub mod config;
pub mod csm;
pub mod data;
pub mod error;
pub mod extrapolate;
pub mod hierarchical;
pub mod jagged;
pub mod linalg;
pub mod markov;
pub mod matrix_power_cache;
pub mod multi_index;
pub mod objective;
pub mod optimiser;
pub mod params;
pub mod regulariser;
pub mod statistics;
pub mod workspace;

mod logging;

pub use ad::{Dual, Scalar, AD0, AD1};
pub use config::CsmConfig;
pub use csm::{Csm, EstimationReport, Model};
pub use data::ObservedData;
pub use error::{CsmError, CsmResult};
pub use extrapolate::ConfidenceIntervals;
pub use logging::init_tracing;
pub use objective::Objective;
pub use optimiser::{BoxedBfgs, Optimiser};
pub use params::{CsmParams, PiInitMethod, Q0InitMethod, StoppingConditions};
pub use regulariser::Regulariser;
