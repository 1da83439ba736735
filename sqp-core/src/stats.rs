//! Solve statistics counters.

/// Counters accumulated over one call to `optimize`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Stats {
    /// Outer SQP iterations completed.
    pub iter: usize,

    /// Total QP/LP engine iterations (working-set recalculations) across all
    /// subproblem solves.
    pub qp_iter: usize,

    /// Penalty increase trials attempted.
    pub penalty_change_trial: usize,

    /// Penalty increases accepted by the sufficient-reduction test.
    pub penalty_change_succ: usize,

    /// Penalty increases rolled back.
    pub penalty_change_fail: usize,

    /// Second-order correction steps attempted.
    pub soc_trials: usize,
}

impl Stats {
    pub fn new() -> Self {
        Self::default()
    }
}
