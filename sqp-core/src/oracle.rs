//! The problem oracle: a uniform view over external NLP callbacks.
//!
//! The solver consumes the problem exclusively through [`NlpOracle`]. All
//! evaluation methods write into buffers owned by the driver; structure
//! callbacks fill triplet index arrays once, value callbacks refresh the
//! value arrays on every call.

use crate::error::OracleError;
use crate::linalg::TripletMat;

/// Problem dimensions reported by the oracle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProblemSizes {
    /// Number of variables (n).
    pub num_vars: usize,
    /// Number of constraints (m).
    pub num_cons: usize,
    /// Nonzeros in the constraint Jacobian.
    pub nnz_jacobian: usize,
    /// Nonzeros in the upper triangle of the Lagrangian Hessian.
    pub nnz_hessian: usize,
}

/// NLP callback provider.
///
/// Sign and layout conventions:
/// - bounds use `f64::INFINITY` / `f64::NEG_INFINITY` for open sides;
/// - the Jacobian is `m x n` in triplet form;
/// - the Hessian is the Hessian of the Lagrangian `f(x) - sum_i lambda_i c_i(x)`
///   with objective multiplier 1, upper triangle only.
pub trait NlpOracle {
    /// Problem dimensions; called once at initialization.
    fn problem_sizes(&self) -> ProblemSizes;

    /// Fill variable and constraint bounds.
    fn bounds(
        &self,
        x_l: &mut [f64],
        x_u: &mut [f64],
        c_l: &mut [f64],
        c_u: &mut [f64],
    ) -> Result<(), OracleError>;

    /// Fill the starting point and initial constraint multipliers.
    fn starting_point(&self, x: &mut [f64], lambda: &mut [f64]) -> Result<(), OracleError>;

    /// Objective value at `x`.
    fn eval_objective(&self, x: &[f64]) -> Result<f64, OracleError>;

    /// Objective gradient at `x`.
    fn eval_gradient(&self, x: &[f64], grad: &mut [f64]) -> Result<(), OracleError>;

    /// Constraint values at `x`.
    fn eval_constraints(&self, x: &[f64], c: &mut [f64]) -> Result<(), OracleError>;

    /// Fill the Jacobian sparsity pattern; called once.
    fn jacobian_structure(&self, x: &[f64], jac: &mut TripletMat) -> Result<(), OracleError>;

    /// Refresh Jacobian values at `x`.
    fn eval_jacobian(&self, x: &[f64], jac: &mut TripletMat) -> Result<(), OracleError>;

    /// Fill the Hessian sparsity pattern (upper triangle); called once.
    fn hessian_structure(
        &self,
        x: &[f64],
        lambda: &[f64],
        hess: &mut TripletMat,
    ) -> Result<(), OracleError>;

    /// Refresh Hessian-of-the-Lagrangian values at (`x`, `lambda`).
    fn eval_hessian(
        &self,
        x: &[f64],
        lambda: &[f64],
        hess: &mut TripletMat,
    ) -> Result<(), OracleError>;
}
