//! Shared test problem definitions for the CLI and smoke benchmarking.

use sqp_core::linalg::TripletMat;
use sqp_core::{ExitFlag, NlpOracle, OracleError, ProblemSizes};

/// Test problem definition.
pub struct TestProblem {
    pub name: &'static str,
    pub description: &'static str,
    pub builder: fn() -> Box<dyn NlpOracle>,
    pub expected_status: ExitFlag,
    pub expected_objective: Option<f64>,
}

/// Registry of all built-in problems.
pub fn registry() -> Vec<TestProblem> {
    vec![
        TestProblem {
            name: "quadratic",
            description: "unconstrained convex quadratic, x0 = (3, 4)",
            builder: || Box::new(ConvexQuadratic),
            expected_status: ExitFlag::Optimal,
            expected_objective: Some(0.0),
        },
        TestProblem {
            name: "hs71",
            description: "Hock-Schittkowski 71 (two nonlinear constraints)",
            builder: || Box::new(Hs71),
            expected_status: ExitFlag::Optimal,
            expected_objective: Some(17.0140173),
        },
        TestProblem {
            name: "rosenbrock",
            description: "Rosenbrock in [-2, 2]^2, x0 = (-1.2, 1)",
            builder: || Box::new(Rosenbrock),
            expected_status: ExitFlag::Optimal,
            expected_objective: Some(0.0),
        },
        TestProblem {
            name: "infeasible-box",
            description: "x >= 1 and x <= 0: the QP reports infeasibility",
            builder: || Box::new(InfeasibleBox),
            expected_status: ExitFlag::QpErrorInfeasible,
            expected_objective: None,
        },
    ]
}

/// Look up a problem by name.
pub fn find(name: &str) -> Option<TestProblem> {
    registry().into_iter().find(|p| p.name == name)
}

// ============================================================================
// Oracle implementations
// ============================================================================

/// f(x) = 0.5 (x1^2 + x2^2), unconstrained.
pub struct ConvexQuadratic;

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
pub struct Hs71;

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

/// Rosenbrock in a box.
pub struct Rosenbrock;

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

/// Contradictory variable bounds; terminates through the QP engine's
/// infeasibility report.
pub struct InfeasibleBox;

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
