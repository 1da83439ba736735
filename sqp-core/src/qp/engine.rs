//! The narrow contract between the QP handler and any subproblem engine.

use sprs::CsMat;

/// Status of a subproblem solve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QpStatus {
    /// Optimal solution found.
    Optimal,

    /// The subproblem is infeasible.
    Infeasible,

    /// The subproblem is unbounded below.
    Unbounded,

    /// The engine was asked to solve before receiving problem data.
    NotInitialised,

    /// The engine hit its internal iteration cap.
    ExceedMaxIter,

    /// Unclassified engine failure.
    Unknown,
}

/// Borrowed view of one subproblem:
///
/// ```text
/// minimize    (1/2) z^T H z + g^T z
/// subject to  lb_a <= A z <= ub_a
///             lb   <=   z <= ub
/// ```
///
/// `hessian` is `None` for LP subproblems; otherwise it holds the upper
/// triangle of a symmetric matrix. Infinite bounds mark open sides.
#[derive(Clone, Copy)]
pub struct QpProblemView<'a> {
    pub hessian: Option<&'a CsMat<f64>>,
    pub constraints: &'a CsMat<f64>,
    pub gradient: &'a [f64],
    pub lb: &'a [f64],
    pub ub: &'a [f64],
    pub lb_a: &'a [f64],
    pub ub_a: &'a [f64],
}

impl QpProblemView<'_> {
    pub fn num_vars(&self) -> usize {
        self.gradient.len()
    }

    pub fn num_cons(&self) -> usize {
        self.lb_a.len()
    }
}

/// Result of a subproblem solve.
///
/// Multipliers follow the sign convention of the outer algorithm: a
/// multiplier is nonnegative when the lower side is binding and nonpositive
/// when the upper side is binding. `bound_multipliers` is `None` for engines
/// that do not report them; the handler reconstructs those.
#[derive(Debug, Clone)]
pub struct QpSolution {
    pub status: QpStatus,
    pub primal: Vec<f64>,
    pub constraint_multipliers: Vec<f64>,
    pub bound_multipliers: Option<Vec<f64>>,
    pub objective: Option<f64>,
    /// Working-set recalculations (or interior-point iterations) spent.
    pub iterations: usize,
}

impl QpSolution {
    /// A failure result carrying only a status and the iterations spent.
    pub fn failed(status: QpStatus, iterations: usize) -> Self {
        Self {
            status,
            primal: Vec::new(),
            constraint_multipliers: Vec::new(),
            bound_multipliers: None,
            objective: None,
            iterations,
        }
    }
}

/// A QP/LP engine the handler can dispatch to.
///
/// `warm_start` is false exactly once per handler lifetime (the structural
/// cold start); engines that can reuse internal state across calls key off
/// it.
pub trait QpEngine {
    fn solve(&mut self, qp: &QpProblemView<'_>, warm_start: bool) -> QpSolution;
}
