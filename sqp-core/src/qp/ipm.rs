//! Built-in dense primal-dual interior-point engine.
//!
//! Solves the handler's subproblems
//!
//! ```text
//! minimize    (1/2) z^T H z + g^T z
//! subject to  lb_a <= A z <= ub_a,   lb <= z <= ub
//! ```
//!
//! with an infeasible-start Mehrotra predictor-corrector method on the
//! reduced KKT system. Range rows and variable bounds split into one-sided
//! inequalities G z <= h; rows (and fixed variables) whose two sides
//! coincide are kept as equalities E z = d. The KKT factorization carries a
//! static regularization that is escalated when the factorization
//! degenerates, which also covers Hessians that are indefinite inside the
//! trust-region box.
//!
//! The subproblems are dense-small (n + 2m variables), so factorizations use
//! dense LU.

use nalgebra::{DMatrix, DVector};

use super::engine::{QpEngine, QpProblemView, QpSolution, QpStatus};
use crate::linalg::dense;

/// Side-by-side bookkeeping for inequality rows of G.
#[derive(Debug, Clone, Copy)]
enum IneqSource {
    ConsUpper(usize),
    ConsLower(usize),
    VarUpper(usize),
    VarLower(usize),
}

/// Bookkeeping for equality rows of E.
#[derive(Debug, Clone, Copy)]
enum EqSource {
    Cons(usize),
    Var(usize),
}

/// Two sides closer than this collapse into an equality row.
const EQ_TOL: f64 = 1.0e-10;

/// Interval inconsistency beyond this is reported as infeasible.
const INTERVAL_TOL: f64 = 1.0e-12;

/// Fraction-to-boundary factor for step lengths.
const STEP_FRACTION: f64 = 0.995;

/// Dual blow-up threshold for the infeasibility heuristic.
const DUAL_BLOWUP: f64 = 1.0e10;

/// Primal blow-up threshold for the unboundedness heuristic.
const PRIMAL_BLOWUP: f64 = 1.0e10;

pub struct DenseIpmEngine {
    max_iter: usize,
    tol: f64,
    static_reg: f64,
}

impl DenseIpmEngine {
    pub fn new(max_iter: usize) -> Self {
        Self {
            max_iter,
            tol: 1.0e-9,
            static_reg: 1.0e-8,
        }
    }
}

impl QpEngine for DenseIpmEngine {
    fn solve(&mut self, qp: &QpProblemView<'_>, _warm_start: bool) -> QpSolution {
        // Interior-point iterations restart from scratch; the cold/warm
        // distinction of the contract carries no state here.
        solve_dense_ipm(qp, self.max_iter, self.tol, self.static_reg)
    }
}

fn solve_dense_ipm(qp: &QpProblemView<'_>, max_iter: usize, tol: f64, reg0: f64) -> QpSolution {
    let n = qp.num_vars();
    let m = qp.num_cons();

    // Inconsistent intervals make the subproblem trivially infeasible.
    for j in 0..n {
        if qp.lb[j] > qp.ub[j] + INTERVAL_TOL {
            return QpSolution::failed(QpStatus::Infeasible, 0);
        }
    }
    for i in 0..m {
        if qp.lb_a[i] > qp.ub_a[i] + INTERVAL_TOL {
            return QpSolution::failed(QpStatus::Infeasible, 0);
        }
    }

    if n == 0 {
        return QpSolution {
            status: QpStatus::Optimal,
            primal: Vec::new(),
            constraint_multipliers: vec![0.0; m],
            bound_multipliers: Some(Vec::new()),
            objective: Some(0.0),
            iterations: 0,
        };
    }

    // Dense problem data.
    let h_full = expand_hessian(qp, n);
    let a_dense = dense_constraints(qp, m, n);
    let g = DVector::from_column_slice(qp.gradient);

    // Outer Hessians need not be convex. Iterations run on a shifted copy
    // whose smallest eigenvalue is nonnegative; the reported objective is
    // always evaluated against the original quadratic, so the caller's
    // model identities hold unchanged.
    let h_iter = if qp.hessian.is_some() {
        let eigmin = h_full
            .clone()
            .symmetric_eigen()
            .eigenvalues
            .iter()
            .fold(f64::INFINITY, |a, &v| a.min(v));
        if eigmin < 0.0 {
            let mut shifted = h_full.clone();
            for j in 0..n {
                shifted[(j, j)] += -eigmin + 1.0e-8;
            }
            shifted
        } else {
            h_full.clone()
        }
    } else {
        h_full.clone()
    };

    // Partition into equalities and one-sided inequalities.
    let mut eq_src: Vec<EqSource> = Vec::new();
    let mut d_vals: Vec<f64> = Vec::new();
    let mut ineq_src: Vec<IneqSource> = Vec::new();
    let mut h_vals: Vec<f64> = Vec::new();
    for i in 0..m {
        let (l, u) = (qp.lb_a[i], qp.ub_a[i]);
        if l.is_finite() && u.is_finite() && u - l <= EQ_TOL {
            eq_src.push(EqSource::Cons(i));
            d_vals.push(0.5 * (l + u));
        } else {
            if u.is_finite() {
                ineq_src.push(IneqSource::ConsUpper(i));
                h_vals.push(u);
            }
            if l.is_finite() {
                ineq_src.push(IneqSource::ConsLower(i));
                h_vals.push(-l);
            }
        }
    }
    for j in 0..n {
        let (l, u) = (qp.lb[j], qp.ub[j]);
        if l.is_finite() && u.is_finite() && u - l <= EQ_TOL {
            eq_src.push(EqSource::Var(j));
            d_vals.push(0.5 * (l + u));
        } else {
            if u.is_finite() {
                ineq_src.push(IneqSource::VarUpper(j));
                h_vals.push(u);
            }
            if l.is_finite() {
                ineq_src.push(IneqSource::VarLower(j));
                h_vals.push(-l);
            }
        }
    }
    let ne = eq_src.len();
    let mi = ineq_src.len();

    // E (ne x n) and G (mi x n).
    let mut e_mat = DMatrix::zeros(ne, n);
    for (k, src) in eq_src.iter().enumerate() {
        match *src {
            EqSource::Cons(i) => e_mat.row_mut(k).copy_from(&a_dense.row(i)),
            EqSource::Var(j) => e_mat[(k, j)] = 1.0,
        }
    }
    let mut g_mat = DMatrix::zeros(mi, n);
    for (k, src) in ineq_src.iter().enumerate() {
        match *src {
            IneqSource::ConsUpper(i) => g_mat.row_mut(k).copy_from(&a_dense.row(i)),
            IneqSource::ConsLower(i) => {
                g_mat.row_mut(k).copy_from(&(-a_dense.row(i)));
            }
            IneqSource::VarUpper(j) => g_mat[(k, j)] = 1.0,
            IneqSource::VarLower(j) => g_mat[(k, j)] = -1.0,
        }
    }
    let d_vec = DVector::from_vec(d_vals);
    let h_vec = DVector::from_vec(h_vals);

    // Starting point: z centered in its box where possible, slacks pushed
    // into the interior.
    let mut z = DVector::zeros(n);
    for j in 0..n {
        let (l, u) = (qp.lb[j], qp.ub[j]);
        z[j] = if l.is_finite() && u.is_finite() {
            0.5 * (l + u)
        } else if l.is_finite() {
            l.max(0.0)
        } else if u.is_finite() {
            u.min(0.0)
        } else {
            0.0
        };
    }
    let mut y = DVector::zeros(ne);
    let (mut s, mut lam) = if mi > 0 {
        let gz = &g_mat * &z;
        let mut s = DVector::from_element(mi, 1.0);
        for k in 0..mi {
            s[k] = (h_vec[k] - gz[k]).max(1.0);
        }
        (s, DVector::from_element(mi, 1.0))
    } else {
        (DVector::zeros(0), DVector::zeros(0))
    };

    let scale_d = 1.0 + dense::inf_norm(qp.gradient);
    let scale_p = 1.0
        + d_vec.iter().fold(0.0_f64, |a, &v| a.max(v.abs()))
        + h_vec.iter().fold(0.0_f64, |a, &v| a.max(v.abs()));
    let mu0 = if mi > 0 { s.dot(&lam) / mi as f64 } else { 0.0 };

    let mut reg = reg0;
    let mut iterations = 0usize;

    for _ in 0..max_iter {
        // Residuals.
        let hz = &h_iter * &z;
        let mut r_d = &hz + &g;
        if ne > 0 {
            r_d += e_mat.transpose() * &y;
        }
        if mi > 0 {
            r_d += g_mat.transpose() * &lam;
        }
        let r_e = if ne > 0 {
            &e_mat * &z - &d_vec
        } else {
            DVector::zeros(0)
        };
        let r_g = if mi > 0 {
            &g_mat * &z + &s - &h_vec
        } else {
            DVector::zeros(0)
        };
        let mu = if mi > 0 { s.dot(&lam) / mi as f64 } else { 0.0 };

        let rd_inf = r_d.amax();
        let re_inf = if ne > 0 { r_e.amax() } else { 0.0 };
        let rg_inf = if mi > 0 { r_g.amax() } else { 0.0 };

        if !rd_inf.is_finite() || !re_inf.is_finite() || !rg_inf.is_finite() {
            return QpSolution::failed(QpStatus::Unknown, iterations);
        }

        if rd_inf <= tol * scale_d && re_inf <= tol * scale_p && rg_inf <= tol * scale_p
            && mu <= tol * (1.0 + mu0)
        {
            return extract_solution(
                &z, &y, &lam, &eq_src, &ineq_src, &h_full, &g, m, n, iterations,
            );
        }

        // Divergence heuristics: exploding duals with stuck primal
        // infeasibility indicate an infeasible subproblem, exploding primal
        // an unbounded one.
        if mi > 0 && lam.amax() > DUAL_BLOWUP && rg_inf > tol * scale_p {
            return QpSolution::failed(QpStatus::Infeasible, iterations);
        }
        if z.amax() > PRIMAL_BLOWUP {
            return QpSolution::failed(QpStatus::Unbounded, iterations);
        }

        // Reduced KKT matrix [[H + G^T W G + reg I, E^T], [E, -reg I]].
        let mut w = DVector::zeros(mi);
        for k in 0..mi {
            w[k] = lam[k] / s[k];
        }
        let mut m_block = h_iter.clone();
        for k in 0..mi {
            let row = g_mat.row(k);
            for a in 0..n {
                let ra = row[a];
                if ra == 0.0 {
                    continue;
                }
                for b in 0..n {
                    m_block[(a, b)] += w[k] * ra * row[b];
                }
            }
        }

        let dim = n + ne;
        let lu = loop {
            let mut kkt = DMatrix::zeros(dim, dim);
            kkt.view_mut((0, 0), (n, n)).copy_from(&m_block);
            for j in 0..n {
                kkt[(j, j)] += reg;
            }
            if ne > 0 {
                kkt.view_mut((0, n), (n, ne)).copy_from(&e_mat.transpose());
                kkt.view_mut((n, 0), (ne, n)).copy_from(&e_mat);
                for k in 0..ne {
                    kkt[(n + k, n + k)] = -reg;
                }
            }
            let lu = kkt.lu();
            // A degenerate factorization shows up as a failed solve; probe
            // with a unit vector.
            let probe = lu.solve(&DVector::from_element(dim, 1.0));
            match probe {
                Some(p) if p.iter().all(|v| v.is_finite()) => break lu,
                _ => {
                    reg *= 100.0;
                    if reg > 1.0 {
                        return QpSolution::failed(QpStatus::Unknown, iterations);
                    }
                }
            }
        };

        // Affine (predictor) direction: sigma = 0.
        let rc_aff: DVector<f64> = lam.component_mul(&s);
        let (dz_aff, _dy_aff) = solve_step(&lu, n, ne, mi, &r_d, &r_e, &r_g, &rc_aff, &g_mat, &w, &s);
        let ds_aff = if mi > 0 {
            -(&r_g + &g_mat * &dz_aff)
        } else {
            DVector::zeros(0)
        };
        let mut dlam_aff = DVector::zeros(mi);
        for k in 0..mi {
            dlam_aff[k] = -(rc_aff[k] + lam[k] * ds_aff[k]) / s[k];
        }

        let mu_target = if mi > 0 && mu > 1e-300 {
            let alpha_aff = step_length(&s, &ds_aff, &lam, &dlam_aff, 1.0);
            let mut mu_aff = 0.0;
            for k in 0..mi {
                mu_aff += (s[k] + alpha_aff * ds_aff[k]) * (lam[k] + alpha_aff * dlam_aff[k]);
            }
            mu_aff /= mi as f64;
            let sigma = (mu_aff / mu).powi(3).clamp(0.0, 0.999);
            sigma * mu
        } else {
            0.0
        };

        // Combined (corrector) direction.
        let mut rc = DVector::zeros(mi);
        for k in 0..mi {
            rc[k] = lam[k] * s[k] - mu_target + dlam_aff[k] * ds_aff[k];
        }
        let (dz, dy) = solve_step(&lu, n, ne, mi, &r_d, &r_e, &r_g, &rc, &g_mat, &w, &s);
        let ds = if mi > 0 {
            -(&r_g + &g_mat * &dz)
        } else {
            DVector::zeros(0)
        };
        let mut dlam = DVector::zeros(mi);
        for k in 0..mi {
            dlam[k] = -(rc[k] + lam[k] * ds[k]) / s[k];
        }

        let alpha = if mi > 0 {
            step_length(&s, &ds, &lam, &dlam, STEP_FRACTION)
        } else {
            1.0
        };

        z += &dz * alpha;
        if ne > 0 {
            y += &dy * alpha;
        }
        if mi > 0 {
            s += &ds * alpha;
            lam += &dlam * alpha;
        }
        iterations += 1;
    }

    QpSolution::failed(QpStatus::ExceedMaxIter, iterations)
}

/// Solve the reduced KKT system for one (predictor or corrector) direction.
fn solve_step(
    lu: &nalgebra::LU<f64, nalgebra::Dyn, nalgebra::Dyn>,
    n: usize,
    ne: usize,
    mi: usize,
    r_d: &DVector<f64>,
    r_e: &DVector<f64>,
    r_g: &DVector<f64>,
    rc: &DVector<f64>,
    g_mat: &DMatrix<f64>,
    w: &DVector<f64>,
    s: &DVector<f64>,
) -> (DVector<f64>, DVector<f64>) {
    let mut rhs = DVector::zeros(n + ne);
    let mut top = -r_d.clone();
    if mi > 0 {
        // -G^T (W r_g - S^{-1} rc)
        let mut t = DVector::zeros(mi);
        for k in 0..mi {
            t[k] = w[k] * r_g[k] - rc[k] / s[k];
        }
        top -= g_mat.transpose() * t;
    }
    rhs.rows_mut(0, n).copy_from(&top);
    if ne > 0 {
        rhs.rows_mut(n, ne).copy_from(&(-r_e.clone()));
    }
    let sol = lu.solve(&rhs).unwrap_or_else(|| DVector::zeros(n + ne));
    let dz = sol.rows(0, n).into_owned();
    let dy = if ne > 0 {
        sol.rows(n, ne).into_owned()
    } else {
        DVector::zeros(0)
    };
    (dz, dy)
}

/// Largest alpha in (0, cap] keeping s + alpha ds > 0 and lam + alpha dlam > 0.
fn step_length(
    s: &DVector<f64>,
    ds: &DVector<f64>,
    lam: &DVector<f64>,
    dlam: &DVector<f64>,
    fraction: f64,
) -> f64 {
    let mut alpha = 1.0_f64;
    for k in 0..s.len() {
        if ds[k] < 0.0 {
            alpha = alpha.min(-fraction * s[k] / ds[k]);
        }
        if dlam[k] < 0.0 {
            alpha = alpha.min(-fraction * lam[k] / dlam[k]);
        }
    }
    alpha.min(1.0)
}

/// Expand the upper-triangle Hessian view into a full dense matrix.
fn expand_hessian(qp: &QpProblemView<'_>, n: usize) -> DMatrix<f64> {
    let mut h = DMatrix::zeros(n, n);
    if let Some(hess) = qp.hessian {
        for (&v, (i, j)) in hess.iter() {
            h[(i, j)] += v;
            if i != j {
                h[(j, i)] += v;
            }
        }
    }
    h
}

/// Densify the constraint matrix.
fn dense_constraints(qp: &QpProblemView<'_>, m: usize, n: usize) -> DMatrix<f64> {
    let mut a = DMatrix::zeros(m, n);
    for (&v, (i, j)) in qp.constraints.iter() {
        a[(i, j)] += v;
    }
    a
}

/// Fold the split multipliers back into the caller's sign convention:
/// nonnegative for a binding lower side, nonpositive for a binding upper
/// side.
fn extract_solution(
    z: &DVector<f64>,
    y: &DVector<f64>,
    lam: &DVector<f64>,
    eq_src: &[EqSource],
    ineq_src: &[IneqSource],
    h_full: &DMatrix<f64>,
    g: &DVector<f64>,
    m: usize,
    n: usize,
    iterations: usize,
) -> QpSolution {
    let mut y_cons = vec![0.0; m];
    let mut mu_var = vec![0.0; n];
    for (k, src) in eq_src.iter().enumerate() {
        match *src {
            EqSource::Cons(i) => y_cons[i] = -y[k],
            EqSource::Var(j) => mu_var[j] = -y[k],
        }
    }
    for (k, src) in ineq_src.iter().enumerate() {
        match *src {
            IneqSource::ConsUpper(i) => y_cons[i] -= lam[k],
            IneqSource::ConsLower(i) => y_cons[i] += lam[k],
            IneqSource::VarUpper(j) => mu_var[j] -= lam[k],
            IneqSource::VarLower(j) => mu_var[j] += lam[k],
        }
    }

    let objective = 0.5 * (z.transpose() * h_full * z)[(0, 0)] + g.dot(z);

    QpSolution {
        status: QpStatus::Optimal,
        primal: z.iter().copied().collect(),
        constraint_multipliers: y_cons,
        bound_multipliers: Some(mu_var),
        objective: Some(objective),
        iterations,
    }
}
