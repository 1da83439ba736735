//! End-to-end tests for the SL1QP solver.
//!
//! Each scenario builds its oracle inline and drives the full pipeline:
//! oracle evaluation, QP subproblems, penalty updates, ratio tests and the
//! KKT termination check.

use sqp_core::linalg::TripletMat;
use sqp_core::{ExitFlag, NlpOracle, OracleError, ProblemSizes, SqpSettings, SqpSolver};

// ============================================================================
// Oracles
// ============================================================================

/// f(x) = 0.5 (x1^2 + x2^2), unconstrained, x0 = (3, 4).
struct ConvexQuadratic;

impl NlpOracle for ConvexQuadratic {
    fn problem_sizes(&self) -> ProblemSizes {
        ProblemSizes {
            num_vars: 2,
            num_cons: 0,
            nnz_jacobian: 0,
            nnz_hessian: 2,
        }
    }

    fn bounds(
        &self,
        _x_l: &mut [f64],
        _x_u: &mut [f64],
        _c_l: &mut [f64],
        _c_u: &mut [f64],
    ) -> Result<(), OracleError> {
        Ok(())
    }

    fn starting_point(&self, x: &mut [f64], _lambda: &mut [f64]) -> Result<(), OracleError> {
        x[0] = 3.0;
        x[1] = 4.0;
        Ok(())
    }

    fn eval_objective(&self, x: &[f64]) -> Result<f64, OracleError> {
        Ok(0.5 * (x[0] * x[0] + x[1] * x[1]))
    }

    fn eval_gradient(&self, x: &[f64], grad: &mut [f64]) -> Result<(), OracleError> {
        grad.copy_from_slice(x);
        Ok(())
    }

    fn eval_constraints(&self, _x: &[f64], _c: &mut [f64]) -> Result<(), OracleError> {
        Ok(())
    }

    fn jacobian_structure(&self, _x: &[f64], _jac: &mut TripletMat) -> Result<(), OracleError> {
        Ok(())
    }

    fn eval_jacobian(&self, _x: &[f64], _jac: &mut TripletMat) -> Result<(), OracleError> {
        Ok(())
    }

    fn hessian_structure(
        &self,
        _x: &[f64],
        _lambda: &[f64],
        hess: &mut TripletMat,
    ) -> Result<(), OracleError> {
        hess.set_structure(0, 0, 0);
        hess.set_structure(1, 1, 1);
        Ok(())
    }

    fn eval_hessian(
        &self,
        _x: &[f64],
        _lambda: &[f64],
        hess: &mut TripletMat,
    ) -> Result<(), OracleError> {
        hess.set_value(0, 1.0);
        hess.set_value(1, 1.0);
        Ok(())
    }
}

/// Hock-Schittkowski 71.
///
/// ```text
/// min  x1 x4 (x1 + x2 + x3) + x3
/// s.t. x1 x2 x3 x4 >= 25
///      x1^2 + x2^2 + x3^2 + x4^2 = 40
///      1 <= x <= 5,  x0 = (1, 5, 5, 1)
/// ```
struct Hs71;

impl NlpOracle for Hs71 {
    fn problem_sizes(&self) -> ProblemSizes {
        ProblemSizes {
            num_vars: 4,
            num_cons: 2,
            nnz_jacobian: 8,
            nnz_hessian: 10,
        }
    }

    fn bounds(
        &self,
        x_l: &mut [f64],
        x_u: &mut [f64],
        c_l: &mut [f64],
        c_u: &mut [f64],
    ) -> Result<(), OracleError> {
        x_l.fill(1.0);
        x_u.fill(5.0);
        c_l[0] = 25.0;
        c_u[0] = f64::INFINITY;
        c_l[1] = 40.0;
        c_u[1] = 40.0;
        Ok(())
    }

    fn starting_point(&self, x: &mut [f64], _lambda: &mut [f64]) -> Result<(), OracleError> {
        x.copy_from_slice(&[1.0, 5.0, 5.0, 1.0]);
        Ok(())
    }

    fn eval_objective(&self, x: &[f64]) -> Result<f64, OracleError> {
        Ok(x[0] * x[3] * (x[0] + x[1] + x[2]) + x[2])
    }

    fn eval_gradient(&self, x: &[f64], grad: &mut [f64]) -> Result<(), OracleError> {
        grad[0] = x[3] * (2.0 * x[0] + x[1] + x[2]);
        grad[1] = x[0] * x[3];
        grad[2] = x[0] * x[3] + 1.0;
        grad[3] = x[0] * (x[0] + x[1] + x[2]);
        Ok(())
    }

    fn eval_constraints(&self, x: &[f64], c: &mut [f64]) -> Result<(), OracleError> {
        c[0] = x[0] * x[1] * x[2] * x[3];
        c[1] = x[0] * x[0] + x[1] * x[1] + x[2] * x[2] + x[3] * x[3];
        Ok(())
    }

    fn jacobian_structure(&self, _x: &[f64], jac: &mut TripletMat) -> Result<(), OracleError> {
        let mut k = 0;
        for i in 0..2 {
            for j in 0..4 {
                jac.set_structure(k, i, j);
                k += 1;
            }
        }
        Ok(())
    }

    fn eval_jacobian(&self, x: &[f64], jac: &mut TripletMat) -> Result<(), OracleError> {
        let v = jac.values_mut();
        v[0] = x[1] * x[2] * x[3];
        v[1] = x[0] * x[2] * x[3];
        v[2] = x[0] * x[1] * x[3];
        v[3] = x[0] * x[1] * x[2];
        v[4] = 2.0 * x[0];
        v[5] = 2.0 * x[1];
        v[6] = 2.0 * x[2];
        v[7] = 2.0 * x[3];
        Ok(())
    }

    fn hessian_structure(
        &self,
        _x: &[f64],
        _lambda: &[f64],
        hess: &mut TripletMat,
    ) -> Result<(), OracleError> {
        // Dense upper triangle of a 4x4 symmetric matrix.
        let mut k = 0;
        for i in 0..4 {
            for j in i..4 {
                hess.set_structure(k, i, j);
                k += 1;
            }
        }
        Ok(())
    }

    fn eval_hessian(
        &self,
        x: &[f64],
        lambda: &[f64],
        hess: &mut TripletMat,
    ) -> Result<(), OracleError> {
        // Lagrangian f - lambda1 c1 - lambda2 c2, upper triangle in the
        // order (0,0),(0,1),(0,2),(0,3),(1,1),(1,2),(1,3),(2,2),(2,3),(3,3).
        let (l1, l2) = (lambda[0], lambda[1]);
        let v = hess.values_mut();
        v[0] = 2.0 * x[3] - l2 * 2.0;
        v[1] = x[3] - l1 * (x[2] * x[3]);
        v[2] = x[3] - l1 * (x[1] * x[3]);
        v[3] = 2.0 * x[0] + x[1] + x[2] - l1 * (x[1] * x[2]);
        v[4] = -l2 * 2.0;
        v[5] = -l1 * (x[0] * x[3]);
        v[6] = x[0] - l1 * (x[0] * x[2]);
        v[7] = -l2 * 2.0;
        v[8] = x[0] - l1 * (x[0] * x[1]);
        v[9] = -l2 * 2.0;
        Ok(())
    }
}

/// Rosenbrock in a box: f = 100 (x2 - x1^2)^2 + (1 - x1)^2, x in [-2, 2]^2.
struct Rosenbrock;

impl NlpOracle for Rosenbrock {
    fn problem_sizes(&self) -> ProblemSizes {
        ProblemSizes {
            num_vars: 2,
            num_cons: 0,
            nnz_jacobian: 0,
            nnz_hessian: 3,
        }
    }

    fn bounds(
        &self,
        x_l: &mut [f64],
        x_u: &mut [f64],
        _c_l: &mut [f64],
        _c_u: &mut [f64],
    ) -> Result<(), OracleError> {
        x_l.fill(-2.0);
        x_u.fill(2.0);
        Ok(())
    }

    fn starting_point(&self, x: &mut [f64], _lambda: &mut [f64]) -> Result<(), OracleError> {
        x[0] = -1.2;
        x[1] = 1.0;
        Ok(())
    }

    fn eval_objective(&self, x: &[f64]) -> Result<f64, OracleError> {
        let a = x[1] - x[0] * x[0];
        let b = 1.0 - x[0];
        Ok(100.0 * a * a + b * b)
    }

    fn eval_gradient(&self, x: &[f64], grad: &mut [f64]) -> Result<(), OracleError> {
        let a = x[1] - x[0] * x[0];
        grad[0] = -400.0 * a * x[0] - 2.0 * (1.0 - x[0]);
        grad[1] = 200.0 * a;
        Ok(())
    }

    fn eval_constraints(&self, _x: &[f64], _c: &mut [f64]) -> Result<(), OracleError> {
        Ok(())
    }

    fn jacobian_structure(&self, _x: &[f64], _jac: &mut TripletMat) -> Result<(), OracleError> {
        Ok(())
    }

    fn eval_jacobian(&self, _x: &[f64], _jac: &mut TripletMat) -> Result<(), OracleError> {
        Ok(())
    }

    fn hessian_structure(
        &self,
        _x: &[f64],
        _lambda: &[f64],
        hess: &mut TripletMat,
    ) -> Result<(), OracleError> {
        hess.set_structure(0, 0, 0);
        hess.set_structure(1, 0, 1);
        hess.set_structure(2, 1, 1);
        Ok(())
    }

    fn eval_hessian(
        &self,
        x: &[f64],
        _lambda: &[f64],
        hess: &mut TripletMat,
    ) -> Result<(), OracleError> {
        let v = hess.values_mut();
        v[0] = 1200.0 * x[0] * x[0] - 400.0 * x[1] + 2.0;
        v[1] = -400.0 * x[0];
        v[2] = 200.0;
        Ok(())
    }
}

/// min x^2 with the contradictory requirements x >= 1 and x <= 0, expressed
/// as variable bounds.
struct InfeasibleBox;

impl NlpOracle for InfeasibleBox {
    fn problem_sizes(&self) -> ProblemSizes {
        ProblemSizes {
            num_vars: 1,
            num_cons: 0,
            nnz_jacobian: 0,
            nnz_hessian: 1,
        }
    }

    fn bounds(
        &self,
        x_l: &mut [f64],
        x_u: &mut [f64],
        _c_l: &mut [f64],
        _c_u: &mut [f64],
    ) -> Result<(), OracleError> {
        x_l[0] = 1.0;
        x_u[0] = 0.0;
        Ok(())
    }

    fn starting_point(&self, x: &mut [f64], _lambda: &mut [f64]) -> Result<(), OracleError> {
        x[0] = 0.5;
        Ok(())
    }

    fn eval_objective(&self, x: &[f64]) -> Result<f64, OracleError> {
        Ok(x[0] * x[0])
    }

    fn eval_gradient(&self, x: &[f64], grad: &mut [f64]) -> Result<(), OracleError> {
        grad[0] = 2.0 * x[0];
        Ok(())
    }

    fn eval_constraints(&self, _x: &[f64], _c: &mut [f64]) -> Result<(), OracleError> {
        Ok(())
    }

    fn jacobian_structure(&self, _x: &[f64], _jac: &mut TripletMat) -> Result<(), OracleError> {
        Ok(())
    }

    fn eval_jacobian(&self, _x: &[f64], _jac: &mut TripletMat) -> Result<(), OracleError> {
        Ok(())
    }

    fn hessian_structure(
        &self,
        _x: &[f64],
        _lambda: &[f64],
        hess: &mut TripletMat,
    ) -> Result<(), OracleError> {
        hess.set_structure(0, 0, 0);
        Ok(())
    }

    fn eval_hessian(
        &self,
        _x: &[f64],
        _lambda: &[f64],
        hess: &mut TripletMat,
    ) -> Result<(), OracleError> {
        hess.set_value(0, 2.0);
        Ok(())
    }
}

// ============================================================================
// Scenarios
// ============================================================================

#[test]
fn test_unconstrained_convex_quadratic() {
    let mut solver = SqpSolver::new(SqpSettings::default());
    solver.initialize(Box::new(ConvexQuadratic), "quad2").unwrap();
    let report = solver.optimize().unwrap();

    assert_eq!(report.exit_flag, ExitFlag::Optimal);
    let norm = (report.x[0] * report.x[0] + report.x[1] * report.x[1]).sqrt();
    assert!(norm < 1e-6, "||x|| = {}", norm);
    assert!(report.stats.iter <= 3, "iters = {}", report.stats.iter);

    // On an optimal exit every KKT condition holds.
    assert!(report.kkt.first_order_optimal);
    assert!(report.kkt.primal_feasible);
    assert!(report.kkt.dual_feasible);
    assert!(report.kkt.complementarity);
    assert!(report.kkt.stationarity);
}

#[test]
fn test_hs71() {
    let mut solver = SqpSolver::new(SqpSettings::default());
    solver.initialize(Box::new(Hs71), "hs71").unwrap();
    let report = solver.optimize().unwrap();

    assert_eq!(report.exit_flag, ExitFlag::Optimal, "kkt: {:?}", report.kkt);
    assert!(
        (report.obj_value - 17.0140173).abs() < 1e-3,
        "f = {}",
        report.obj_value
    );
    // Known solution: x1 at its lower bound.
    assert!((report.x[0] - 1.0).abs() < 1e-3, "x = {:?}", report.x);
    assert!(report.infea_measure < 1e-4);
}

#[test]
fn test_inconsistent_bounds_propagate_qp_infeasibility() {
    let mut solver = SqpSolver::new(SqpSettings::default());
    solver.initialize(Box::new(InfeasibleBox), "infeasible").unwrap();
    let report = solver.optimize().unwrap();

    assert_eq!(report.exit_flag, ExitFlag::QpErrorInfeasible);
}

#[test]
fn test_rosenbrock_with_bounds() {
    let mut solver = SqpSolver::new(SqpSettings::default());
    solver.initialize(Box::new(Rosenbrock), "rosenbrock").unwrap();
    let report = solver.optimize().unwrap();

    assert_eq!(report.exit_flag, ExitFlag::Optimal, "kkt: {:?}", report.kkt);
    assert!((report.x[0] - 1.0).abs() < 1e-3, "x = {:?}", report.x);
    assert!((report.x[1] - 1.0).abs() < 1e-3, "x = {:?}", report.x);
    assert!(report.stats.iter <= 50, "iters = {}", report.stats.iter);
}

#[test]
fn test_tiny_trust_region_stalls_with_kkt_probe() {
    let mut settings = SqpSettings::default();
    settings.trust_region_init_value = 2.0;
    settings.trust_region_min_value = 1.0;
    let mut solver = SqpSolver::new(settings);
    solver.initialize(Box::new(Hs71), "hs71_tiny_tr").unwrap();
    let report = solver.optimize().unwrap();

    assert_eq!(report.exit_flag, ExitFlag::TrustRegionTooSmall);
    // The final KKT probe ran and recorded the violations.
    assert!(report.kkt.kkt_error.is_finite());
    assert!(report.kkt.kkt_error > 0.0);
}

#[test]
fn test_iteration_cap_is_exact() {
    let settings = SqpSettings::default().with_max_iterations(1);
    let mut solver = SqpSolver::new(settings);
    solver.initialize(Box::new(Rosenbrock), "rosenbrock_cap").unwrap();
    let report = solver.optimize().unwrap();

    assert_eq!(report.exit_flag, ExitFlag::ExceedMaxIterations);
    assert_eq!(report.stats.iter, 1);
}

// ============================================================================
// Cross-cutting properties
// ============================================================================

#[test]
fn test_no_constraints_never_touches_penalty_loop() {
    let mut solver = SqpSolver::new(SqpSettings::default());
    solver.initialize(Box::new(ConvexQuadratic), "quad2").unwrap();
    let report = solver.optimize().unwrap();

    assert_eq!(report.exit_flag, ExitFlag::Optimal);
    assert_eq!(report.stats.penalty_change_trial, 0);
    assert_eq!(report.stats.penalty_change_succ, 0);
    assert_eq!(report.stats.penalty_change_fail, 0);
}

#[test]
fn test_second_order_correction_path() {
    // The SOC path must not derail convergence on a curved problem.
    let settings = SqpSettings::default().with_second_order_correction();
    let mut solver = SqpSolver::new(settings);
    solver.initialize(Box::new(Rosenbrock), "rosenbrock_soc").unwrap();
    let report = solver.optimize().unwrap();

    assert_eq!(report.exit_flag, ExitFlag::Optimal, "kkt: {:?}", report.kkt);
    assert!((report.x[0] - 1.0).abs() < 1e-3);
    assert!((report.x[1] - 1.0).abs() < 1e-3);
}

#[test]
fn test_hs71_multiplier_sign_convention() {
    // mu >= 0 for the binding lower bound on c1 (c1 >= 25 is active at the
    // solution).
    let mut solver = SqpSolver::new(SqpSettings::default());
    solver.initialize(Box::new(Hs71), "hs71_signs").unwrap();
    let report = solver.optimize().unwrap();
    assert_eq!(report.exit_flag, ExitFlag::Optimal);
    assert!(
        report.constraint_multipliers[0] >= -1e-6,
        "mu = {:?}",
        report.constraint_multipliers
    );
}

#[test]
fn test_time_limit_reports_cpu_exit() {
    let mut settings = SqpSettings::default();
    settings.cpu_time_limit = 0.0;
    let mut solver = SqpSolver::new(settings);
    solver.initialize(Box::new(Rosenbrock), "rosenbrock_t0").unwrap();
    let report = solver.optimize().unwrap();
    // One iteration runs before the poll fires.
    assert_eq!(report.exit_flag, ExitFlag::ExceedMaxCpuTime);
    assert_eq!(report.stats.iter, 1);
}
