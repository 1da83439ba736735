//! An SL1QP trust-region solver for nonlinear programming.
//!
//! This library implements a Sequential Quadratic Programming method with an
//! l1 exact penalty function (SL1QP) and a trust region for problems of the
//! form
//!
//! ```text
//! minimize    f(x)
//! subject to  c_l <= c(x) <= c_u
//!             x_l <=  x   <= x_u
//! ```
//!
//! # Algorithm
//!
//! Each outer iteration linearizes the constraints and builds a quadratic
//! model around the current iterate, absorbing constraint violation into the
//! objective through nonnegative slack variables weighted by a penalty
//! parameter. The resulting subproblem
//!
//! ```text
//! minimize    (1/2) p^T H p + g^T p + rho * 1^T (u+ + u-)
//! subject to  c_l - c_k <= J p - u+ + u- <= c_u - c_k
//!             max(x_l - x_k, -delta) <= p <= min(x_u - x_k, delta)
//!             u+, u- >= 0
//! ```
//!
//! is handed to a QP engine. A merit-function ratio test decides acceptance,
//! the penalty parameter is driven by an LP-based feasibility estimate, and
//! the trust-region radius contracts or expands with step quality. The solver
//! terminates at a first-order KKT point or on resource limits.
//!
//! # Example
//!
//! ```ignore
//! use sqp_core::{SqpSettings, SqpSolver};
//!
//! let oracle = MyProblem::new();
//! let mut solver = SqpSolver::new(SqpSettings::default());
//! solver.initialize(Box::new(oracle), "my_problem")?;
//! let report = solver.optimize()?;
//!
//! println!("Status: {}", report.exit_flag);
//! println!("Objective: {}", report.obj_value);
//! ```

#![warn(clippy::all)]
#![allow(clippy::too_many_arguments)] // SQP plumbing carries many vectors

pub mod error;
pub mod journal;
pub mod linalg;
pub mod oracle;
pub mod qp;
pub mod settings;
pub mod solver;
pub mod stats;
pub mod status;

// Re-export main types
pub use error::{OracleError, SqpError, SqpResult};
pub use oracle::{NlpOracle, ProblemSizes};
pub use settings::{QpSolverChoice, SqpSettings};
pub use solver::{SolveReport, SqpSolver};
pub use stats::Stats;
pub use status::{ActiveKind, ConstraintKind, ExitFlag, KktStatus};
