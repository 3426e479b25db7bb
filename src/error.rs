use thiserror::Error;

/// Smallest probability mass a parameter entry may take. Columns of `Π` and
/// `q0` are clamped into `[EPS, 1]` rather than `[0, 1]` so that likelihood
/// terms never take the log of an exact zero that the optimiser itself
/// produced.
pub const EPS: f64 = 1e-14;

#[derive(Debug, Error)]
pub enum CsmError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("out of range: {0}")]
    OutOfRange(String),

    #[error("logic error: {0}")]
    LogicError(String),

    #[error("invalid data: {0}")]
    DataException(String),

    #[error("zero probability encountered for trajectory {trajectory}, period {period}: {detail}")]
    ZeroProbability {
        trajectory: usize,
        period: usize,
        detail: String,
    },
}

pub type CsmResult<T> = Result<T, CsmError>;
