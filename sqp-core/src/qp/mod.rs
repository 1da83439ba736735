//! QP subproblem layer: the engine contract, the built-in dense
//! interior-point engine, and the handler that owns the augmented SL1QP data.

pub mod engine;
pub mod handler;
pub mod ipm;

pub use engine::{QpEngine, QpProblemView, QpSolution, QpStatus};
pub use handler::{QpHandler, QpMode};
pub use ipm::DenseIpmEngine;
