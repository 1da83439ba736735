//! The QP subproblem handler.
//!
//! Owns the augmented SL1QP subproblem in slack-variable form with decision
//! vector (p, u+, u-) of length n + 2m:
//!
//! ```text
//! minimize    (1/2) p^T H p + g^T p + rho * 1^T (u+ + u-)
//! subject to  c_l - c_k <= J p - u+ + u- <= c_u - c_k
//!             max(x_l - x_k, -delta) <= p <= min(x_u - x_k, delta)
//!             u+, u- >= 0
//! ```
//!
//! Structural setup happens once: the augmented Jacobian [J | -I | +I] is
//! realized through the identity-injection descriptor so the +/-1 entries
//! occupy fixed tail slots that later Jacobian refreshes cannot touch. The
//! driver then pushes only the data components that changed through the
//! narrow `update_*` methods.
//!
//! The LP used by the penalty update is the same handler constructed in
//! [`QpMode::Lp`]: no Hessian, zero gradient on the p block.

use crate::linalg::{CompressedMat, IdentityInjection, StorageOrder, TripletMat};
use crate::oracle::ProblemSizes;
use crate::stats::Stats;

use super::engine::{QpEngine, QpProblemView, QpSolution, QpStatus};

/// Whether the handler carries a quadratic term.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QpMode {
    Qp,
    Lp,
}

pub struct QpHandler {
    mode: QpMode,
    num_vars: usize,
    num_cons: usize,

    engine: Box<dyn QpEngine>,

    jacobian: Option<CompressedMat>,
    hessian: Option<CompressedMat>,
    gradient: Vec<f64>,
    lb: Vec<f64>,
    ub: Vec<f64>,
    lb_a: Vec<f64>,
    ub_a: Vec<f64>,

    solved_once: bool,
    last: Option<QpSolution>,
}

impl QpHandler {
    pub fn new(sizes: &ProblemSizes, mode: QpMode, engine: Box<dyn QpEngine>) -> Self {
        let n = sizes.num_vars;
        let m = sizes.num_cons;
        let nqp = n + 2 * m;
        let mut gradient = vec![0.0; nqp];
        let mut lb = vec![f64::NEG_INFINITY; nqp];
        let mut ub = vec![f64::INFINITY; nqp];
        for j in n..nqp {
            lb[j] = 0.0;
            gradient[j] = 0.0;
        }
        Self {
            mode,
            num_vars: n,
            num_cons: m,
            engine,
            jacobian: None,
            hessian: None,
            gradient,
            lb,
            ub,
            lb_a: vec![0.0; m],
            ub_a: vec![0.0; m],
            solved_once: false,
            last: None,
        }
    }

    fn nqp(&self) -> usize {
        self.num_vars + 2 * self.num_cons
    }

    /// Build the augmented Jacobian structure and fill its values.
    /// Later calls refresh values only.
    pub fn set_jacobian(&mut self, jac: &TripletMat) {
        let (n, m) = (self.num_vars, self.num_cons);
        if self.jacobian.is_none() {
            let injection = IdentityInjection {
                size: m,
                irow1: 0,
                jcol1: n + m, // +I on the u- block
                irow2: 0,
                jcol2: n, // -I on the u+ block
            };
            self.jacobian = Some(CompressedMat::from_triplet(
                jac,
                m,
                self.nqp(),
                StorageOrder::ColumnMajor,
                false,
                Some(injection),
            ));
        }
        self.jacobian
            .as_mut()
            .expect("jacobian structure just built")
            .refresh_values(jac);
    }

    /// Refresh Jacobian values; structure must exist.
    pub fn update_jacobian(&mut self, jac: &TripletMat) {
        self.set_jacobian(jac);
    }

    /// Build the Hessian structure (QP mode) and fill its values.
    pub fn set_hessian(&mut self, hess: &TripletMat) {
        debug_assert_eq!(self.mode, QpMode::Qp, "LP handler carries no Hessian");
        if self.hessian.is_none() {
            // Upper triangle over the p block of the (n + 2m)-dimensional
            // decision space; the slack blocks carry no curvature.
            self.hessian = Some(CompressedMat::from_triplet(
                hess,
                self.nqp(),
                self.nqp(),
                StorageOrder::ColumnMajor,
                false,
                None,
            ));
        }
        self.hessian
            .as_mut()
            .expect("hessian structure just built")
            .refresh_values(hess);
    }

    /// Refresh Hessian values; structure must exist.
    pub fn update_hessian(&mut self, hess: &TripletMat) {
        self.set_hessian(hess);
    }

    /// Set the p-block gradient and the penalty weight on the slacks.
    pub fn set_gradient(&mut self, grad_f: &[f64], rho: f64) {
        debug_assert_eq!(grad_f.len(), self.num_vars);
        self.gradient[..self.num_vars].copy_from_slice(grad_f);
        for gj in self.gradient[self.num_vars..].iter_mut() {
            *gj = rho;
        }
    }

    /// LP objective: penalty weight on the slacks only.
    pub fn set_gradient_lp(&mut self, rho: f64) {
        debug_assert_eq!(self.mode, QpMode::Lp);
        self.gradient[..self.num_vars].fill(0.0);
        for gj in self.gradient[self.num_vars..].iter_mut() {
            *gj = rho;
        }
    }

    /// Replace the p-block gradient, leaving the penalty weights untouched.
    pub fn update_gradient(&mut self, grad: &[f64]) {
        debug_assert_eq!(grad.len(), self.num_vars);
        self.gradient[..self.num_vars].copy_from_slice(grad);
    }

    /// Re-weight the slack blocks with a new penalty parameter.
    pub fn update_penalty(&mut self, rho: f64) {
        for gj in self.gradient[self.num_vars..].iter_mut() {
            *gj = rho;
        }
    }

    /// Recenter all bounds on the current iterate and radius.
    pub fn set_bounds(
        &mut self,
        delta: f64,
        x_l: &[f64],
        x_u: &[f64],
        x_k: &[f64],
        c_l: &[f64],
        c_u: &[f64],
        c_k: &[f64],
    ) {
        let (n, m) = (self.num_vars, self.num_cons);
        for j in 0..n {
            self.lb[j] = (x_l[j] - x_k[j]).max(-delta);
            self.ub[j] = (x_u[j] - x_k[j]).min(delta);
        }
        for i in 0..m {
            self.lb_a[i] = if c_l[i].is_finite() {
                c_l[i] - c_k[i]
            } else {
                f64::NEG_INFINITY
            };
            self.ub_a[i] = if c_u[i].is_finite() {
                c_u[i] - c_k[i]
            } else {
                f64::INFINITY
            };
        }
    }

    /// Alias of [`set_bounds`](Self::set_bounds) for post-setup updates.
    pub fn update_bounds(
        &mut self,
        delta: f64,
        x_l: &[f64],
        x_u: &[f64],
        x_k: &[f64],
        c_l: &[f64],
        c_u: &[f64],
        c_k: &[f64],
    ) {
        self.set_bounds(delta, x_l, x_u, x_k, c_l, c_u, c_k);
    }

    /// Re-clip only the trust-region box on the p block.
    pub fn update_delta(&mut self, delta: f64, x_l: &[f64], x_u: &[f64], x_k: &[f64]) {
        for j in 0..self.num_vars {
            self.lb[j] = (x_l[j] - x_k[j]).max(-delta);
            self.ub[j] = (x_u[j] - x_k[j]).min(delta);
        }
    }

    /// Dispatch to the engine. The first call is the structural cold start.
    ///
    /// Adds the engine-reported working-set recalculation count to
    /// `stats.qp_iter` and stores the solution for the getters.
    pub fn solve(&mut self, stats: &mut Stats) -> QpStatus {
        let jacobian = match self.jacobian.as_ref() {
            Some(j) => j,
            None => return QpStatus::NotInitialised,
        };
        if self.mode == QpMode::Qp && self.hessian.is_none() {
            return QpStatus::NotInitialised;
        }

        let view = QpProblemView {
            hessian: self.hessian.as_ref().map(|h| h.matrix()),
            constraints: jacobian.matrix(),
            gradient: &self.gradient,
            lb: &self.lb,
            ub: &self.ub,
            lb_a: &self.lb_a,
            ub_a: &self.ub_a,
        };
        let warm = self.solved_once;
        let mut sol = self.engine.solve(&view, warm);
        self.solved_once = true;
        stats.qp_iter += sol.iterations;

        if sol.status == QpStatus::Optimal && sol.objective.is_none() {
            sol.objective = Some(self.recompute_objective(&sol.primal));
        }
        let status = sol.status;
        self.last = Some(sol);
        status
    }

    /// (1/2) z^T H z + g^T z for engines that do not report an objective.
    fn recompute_objective(&self, z: &[f64]) -> f64 {
        let mut obj = 0.0;
        if let Some(h) = self.hessian.as_ref() {
            for (&v, (i, j)) in h.matrix().iter() {
                obj += if i == j {
                    0.5 * v * z[i] * z[j]
                } else {
                    v * z[i] * z[j]
                };
            }
        }
        for (gj, zj) in self.gradient.iter().zip(z.iter()) {
            obj += gj * zj;
        }
        obj
    }

    fn last_solution(&self) -> &QpSolution {
        self.last
            .as_ref()
            .expect("getter called before a successful solve")
    }

    /// The full optimal decision vector (p, u+, u-), length n + 2m.
    pub fn primal(&self) -> &[f64] {
        &self.last_solution().primal
    }

    /// Multipliers for the m constraint rows.
    pub fn constraint_multipliers(&self) -> &[f64] {
        &self.last_solution().constraint_multipliers
    }

    /// Multipliers for the n variable bounds.
    ///
    /// Engines that do not report bound multipliers get them reconstructed
    /// from stationarity: mu = H p + g - J^T y.
    pub fn bound_multipliers(&self) -> Vec<f64> {
        let sol = self.last_solution();
        if let Some(mu) = sol.bound_multipliers.as_ref() {
            return mu[..self.num_vars].to_vec();
        }

        let n = self.num_vars;
        let p = &sol.primal[..n];
        let y = &sol.constraint_multipliers;

        // H p over the p block (upper-triangle storage).
        let mut mu = vec![0.0; n];
        if let Some(h) = self.hessian.as_ref() {
            for (&v, (i, j)) in h.matrix().iter() {
                mu[i] += v * p[j];
                if i != j {
                    mu[j] += v * p[i];
                }
            }
        }
        for j in 0..n {
            mu[j] += self.gradient[j];
        }
        // - J^T y, skipping the injected slack columns.
        if let Some(jac) = self.jacobian.as_ref() {
            for (&v, (i, j)) in jac.matrix().iter() {
                if j < n {
                    mu[j] -= v * y[i];
                }
            }
        }
        mu
    }

    /// Objective value of the last solve.
    pub fn objective(&self) -> f64 {
        self.last_solution()
            .objective
            .expect("objective populated after an optimal solve")
    }

    /// Model infeasibility 1^T (u+ + u-): the l1 norm of the slack block.
    pub fn model_infeasibility(&self) -> f64 {
        let n = self.num_vars;
        self.last_solution().primal[n..].iter().map(|u| u.max(0.0)).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::qp::ipm::DenseIpmEngine;

    fn sizes(n: usize, m: usize, nnz_j: usize, nnz_h: usize) -> ProblemSizes {
        ProblemSizes {
            num_vars: n,
            num_cons: m,
            nnz_jacobian: nnz_j,
            nnz_hessian: nnz_h,
        }
    }

    /// One-variable, one-constraint model: f = (1/2)p^2 + p, c row p <= 0.5.
    fn tiny_handler() -> (QpHandler, TripletMat, TripletMat) {
        let s = sizes(1, 1, 1, 1);
        let engine = Box::new(DenseIpmEngine::new(200));
        let mut h = QpHandler::new(&s, QpMode::Qp, engine);
        let jac = TripletMat::from_triplets(1, 1, &[(0, 0, 1.0)], false);
        let hess = TripletMat::from_triplets(1, 1, &[(0, 0, 1.0)], true);
        h.set_jacobian(&jac);
        h.set_hessian(&hess);
        h.set_gradient(&[1.0], 10.0);
        h.set_bounds(
            2.0,
            &[-5.0],
            &[5.0],
            &[0.0],
            &[f64::NEG_INFINITY],
            &[0.5],
            &[0.0],
        );
        (h, jac, hess)
    }

    #[test]
    fn test_unconstrained_minimum_inside_region() {
        let (mut h, _, _) = tiny_handler();
        let mut stats = Stats::new();
        let status = h.solve(&mut stats);
        assert_eq!(status, QpStatus::Optimal);
        // min 0.5 p^2 + p with p in [-2, 2], row p <= 0.5: optimum p = -1.
        let p = h.primal()[0];
        assert!((p + 1.0).abs() < 1e-6, "p = {}", p);
        assert!(h.model_infeasibility() < 1e-7);
        assert!(stats.qp_iter > 0);
    }

    #[test]
    fn test_slack_absorbs_violation() {
        // Constraint row forces p >= 1 but the trust region caps p at 0.5;
        // the u- slack absorbs the rest and shows up in the model
        // infeasibility.
        let s = sizes(1, 1, 1, 1);
        let engine = Box::new(DenseIpmEngine::new(200));
        let mut h = QpHandler::new(&s, QpMode::Qp, engine);
        let jac = TripletMat::from_triplets(1, 1, &[(0, 0, 1.0)], false);
        let hess = TripletMat::from_triplets(1, 1, &[(0, 0, 1.0)], true);
        h.set_jacobian(&jac);
        h.set_hessian(&hess);
        h.set_gradient(&[0.0], 100.0);
        h.set_bounds(
            0.5,
            &[-5.0],
            &[5.0],
            &[0.0],
            &[1.0],
            &[f64::INFINITY],
            &[0.0],
        );
        let mut stats = Stats::new();
        assert_eq!(h.solve(&mut stats), QpStatus::Optimal);
        assert!((h.primal()[0] - 0.5).abs() < 1e-5);
        assert!((h.model_infeasibility() - 0.5).abs() < 1e-5);
    }

    #[test]
    fn test_bound_multiplier_reconstruction_matches_engine() {
        let (mut h, _, _) = tiny_handler();
        let mut stats = Stats::new();
        assert_eq!(h.solve(&mut stats), QpStatus::Optimal);

        let from_engine = h.bound_multipliers();
        // Strip the engine-provided multipliers and reconstruct.
        let direct = {
            let sol = h.last.as_mut().unwrap();
            sol.bound_multipliers = None;
            h.bound_multipliers()
        };
        assert_eq!(from_engine.len(), direct.len());
        for (a, b) in from_engine.iter().zip(direct.iter()) {
            assert!((a - b).abs() < 1e-5, "{} vs {}", a, b);
        }
    }

    #[test]
    fn test_lp_mode_min_violation() {
        // LP: minimize slack mass for row p >= 1 with p capped at 0.5.
        let s = sizes(1, 1, 1, 0);
        let engine = Box::new(DenseIpmEngine::new(200));
        let mut h = QpHandler::new(&s, QpMode::Lp, engine);
        let jac = TripletMat::from_triplets(1, 1, &[(0, 0, 1.0)], false);
        h.set_jacobian(&jac);
        h.set_gradient_lp(1.0);
        h.set_bounds(
            0.5,
            &[-5.0],
            &[5.0],
            &[0.0],
            &[1.0],
            &[f64::INFINITY],
            &[0.0],
        );
        let mut stats = Stats::new();
        assert_eq!(h.solve(&mut stats), QpStatus::Optimal);
        assert!((h.model_infeasibility() - 0.5).abs() < 1e-5);
    }

    #[test]
    fn test_step_stays_inside_trust_region() {
        let (mut h, _, _) = tiny_handler();
        let mut stats = Stats::new();
        assert_eq!(h.solve(&mut stats), QpStatus::Optimal);
        let p = &h.primal()[..1];
        assert!(crate::linalg::dense::inf_norm(p) <= 2.0 + 1e-8);
    }

    #[test]
    fn test_model_infeasibility_monotone_in_penalty() {
        // Row p >= 1 with p capped at 0.5 leaves 0.5 units of violation;
        // raising rho can only shrink the slack mass at fixed data.
        let s = sizes(1, 1, 1, 1);
        let engine = Box::new(DenseIpmEngine::new(400));
        let mut h = QpHandler::new(&s, QpMode::Qp, engine);
        let jac = TripletMat::from_triplets(1, 1, &[(0, 0, 1.0)], false);
        let hess = TripletMat::from_triplets(1, 1, &[(0, 0, 1.0)], true);
        h.set_jacobian(&jac);
        h.set_hessian(&hess);
        h.set_gradient(&[0.0], 0.01);
        h.set_bounds(
            0.5,
            &[-5.0],
            &[5.0],
            &[0.0],
            &[1.0],
            &[f64::INFINITY],
            &[0.0],
        );
        let mut stats = Stats::new();
        let mut last = f64::INFINITY;
        for rho in [0.01, 0.1, 1.0, 10.0, 100.0] {
            h.update_penalty(rho);
            assert_eq!(h.solve(&mut stats), QpStatus::Optimal);
            let infea = h.model_infeasibility();
            assert!(
                infea <= last + 1e-7,
                "infeasibility grew: {} -> {} at rho {}",
                last,
                infea,
                rho
            );
            last = infea;
        }
        // Saturated: the violation cannot drop below 0.5.
        assert!((last - 0.5).abs() < 1e-5);
    }

    #[test]
    fn test_objective_matches_recomputed_model() {
        let (mut h, _, _) = tiny_handler();
        let mut stats = Stats::new();
        assert_eq!(h.solve(&mut stats), QpStatus::Optimal);
        let reported = h.objective();
        let recomputed = h.recompute_objective(&h.primal().to_vec());
        let scale = 1.0_f64.max(reported.abs());
        assert!(
            (reported - recomputed).abs() <= 1e-10 * scale,
            "{} vs {}",
            reported,
            recomputed
        );
    }

    #[test]
    fn test_solve_before_setup_is_not_initialised() {
        let s = sizes(1, 1, 1, 1);
        let engine = Box::new(DenseIpmEngine::new(10));
        let mut h = QpHandler::new(&s, QpMode::Qp, engine);
        let mut stats = Stats::new();
        assert_eq!(h.solve(&mut stats), QpStatus::NotInitialised);
    }
}
