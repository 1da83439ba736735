//! Error types for the SQP solver.

use thiserror::Error;

use crate::qp::QpStatus;

/// Errors reported by the problem oracle.
#[derive(Error, Debug)]
pub enum OracleError {
    /// A callback produced NaN or otherwise invalid values
    #[error("Evaluation failed: {0}")]
    EvalError(String),

    /// Declared sizes are inconsistent
    #[error("Invalid problem sizes: {0}")]
    InvalidSizes(String),
}

/// Errors that can occur while driving the SQP algorithm.
///
/// Algorithmic terminations (QP failures, resource limits, small trust
/// region) are not errors; they come back as `ExitFlag` values in the solve
/// report. `SqpError` covers oracle failures and misuse.
#[derive(Error, Debug)]
pub enum SqpError {
    /// Problem validation failed
    #[error("Invalid problem: {0}")]
    InvalidProblem(String),

    /// Oracle callback failed
    #[error("Oracle failed: {0}")]
    Oracle(#[from] OracleError),

    /// `optimize` called before `initialize`
    #[error("Solver not initialized")]
    NotInitialised,

    /// A QP setup round found no dirty flag set; indicates a missing
    /// dirty-flag path in the driver
    #[error("QP is not changed: no update flag set")]
    QpUnchanged,

    /// Selected QP engine is not available in this build
    #[error("QP engine not available: {0}")]
    EngineUnavailable(String),

    /// Subproblem engine failed in a way the handler could not classify
    #[error("QP handler error: {0:?}")]
    QpHandler(QpStatus),

    /// Internal solver error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type for SQP operations.
pub type SqpResult<T> = Result<T, SqpError>;
