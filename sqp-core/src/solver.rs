//! The outer SQP trust-region / penalty driver.
//!
//! One `SqpSolver` owns every buffer of the solve: iterate, trial point,
//! bounds, multipliers, Jacobian and Hessian triplets, and the QP/LP
//! handlers. Handlers receive borrowed views on reads and whole-buffer copies
//! on writes, so the augmented matrices (whose injected +/-1 entries must
//! never be touched) are never aliased.
//!
//! The outer iteration follows the SL1QP scheme: solve the penalized QP,
//! drive the penalty parameter with an LP feasibility estimate, run the merit
//! ratio test, optionally attempt a second-order correction, check the KKT
//! conditions, and update the trust-region radius. All terminal conditions
//! funnel into a single monotone [`ExitFlag`].

use std::time::Instant;

use crate::error::{SqpError, SqpResult};
use crate::journal::Journal;
use crate::linalg::{dense, TripletMat};
use crate::oracle::{NlpOracle, ProblemSizes};
use crate::qp::{DenseIpmEngine, QpEngine, QpHandler, QpMode, QpStatus};
use crate::settings::{QpSolverChoice, SqpSettings};
use crate::stats::Stats;
use crate::status::{ActiveKind, ConstraintKind, ExitFlag, KktStatus, QpUpdateFlags};

/// Result of one `optimize` call.
#[derive(Debug, Clone)]
pub struct SolveReport {
    /// Terminal status.
    pub exit_flag: ExitFlag,

    /// Final iterate.
    pub x: Vec<f64>,

    /// Objective at the final iterate.
    pub obj_value: f64,

    /// Constraint multipliers at the final iterate.
    pub constraint_multipliers: Vec<f64>,

    /// Bound multipliers at the final iterate.
    pub bound_multipliers: Vec<f64>,

    /// Constraint violation (l1) at the final iterate.
    pub infea_measure: f64,

    /// Infinity norm of the last step.
    pub norm_p: f64,

    /// KKT violations recorded by the last optimality check.
    pub kkt: KktStatus,

    /// Iteration and subproblem counters.
    pub stats: Stats,
}

/// The SL1QP trust-region solver.
pub struct SqpSolver {
    settings: SqpSettings,
    oracle: Option<Box<dyn NlpOracle>>,
    problem_name: String,

    num_vars: usize,
    num_cons: usize,

    // Iterate data
    x_k: Vec<f64>,
    x_trial: Vec<f64>,
    p_k: Vec<f64>,
    c_k: Vec<f64>,
    c_trial: Vec<f64>,
    grad_f: Vec<f64>,
    x_l: Vec<f64>,
    x_u: Vec<f64>,
    c_l: Vec<f64>,
    c_u: Vec<f64>,
    multiplier_cons: Vec<f64>,
    multiplier_vars: Vec<f64>,
    jacobian: TripletMat,
    hessian: TripletMat,

    cons_kind: Vec<ConstraintKind>,
    bound_kind: Vec<ConstraintKind>,
    active_cons: Vec<ActiveKind>,
    active_bounds: Vec<ActiveKind>,

    // Scalars
    delta: f64,
    rho: f64,
    eps1: f64,
    obj_value: f64,
    obj_value_trial: f64,
    infea_measure: f64,
    infea_measure_model: f64,
    infea_measure_trial: f64,
    norm_p_k: f64,
    qp_obj: f64,
    actual_reduction: f64,
    pred_reduction: f64,

    update_flags: QpUpdateFlags,
    exit_flag: ExitFlag,
    kkt: KktStatus,
    stats: Stats,
    accepted: bool,

    qp: Option<QpHandler>,
    lp: Option<QpHandler>,
    journal: Journal,
    initialized: bool,
}

/// l1 violation of `c` against `[c_l, c_u]`.
pub(crate) fn constraint_violation(c: &[f64], c_l: &[f64], c_u: &[f64]) -> f64 {
    let mut infea = 0.0;
    for i in 0..c.len() {
        if c[i] < c_l[i] {
            infea += c_l[i] - c[i];
        } else if c[i] > c_u[i] {
            infea += c[i] - c_u[i];
        }
    }
    infea
}

/// Complementarity violation of one row.
///
/// A positive multiplier pairs with the lower side and a negative one with
/// the upper side; two-sided rows charge the multiplier against whichever
/// side its sign selects, and rows with no finite bound must carry a zero
/// multiplier.
fn complementarity_term(mu: f64, v: f64, l: f64, u: f64, kind: ConstraintKind) -> f64 {
    match kind {
        ConstraintKind::BoundedAbove => (mu * (u - v)).abs(),
        ConstraintKind::BoundedBelow => (mu * (v - l)).abs(),
        ConstraintKind::Bounded => {
            if mu >= 0.0 {
                (mu * (v - l)).abs()
            } else {
                (mu * (u - v)).abs()
            }
        }
        ConstraintKind::Unbounded => mu.abs(),
        ConstraintKind::Equal => 0.0,
    }
}

fn map_qp_status(status: QpStatus) -> ExitFlag {
    match status {
        QpStatus::Optimal => ExitFlag::Unknown,
        QpStatus::Infeasible => ExitFlag::QpErrorInfeasible,
        QpStatus::Unbounded => ExitFlag::QpErrorUnbounded,
        QpStatus::NotInitialised => ExitFlag::QpErrorNotInitialised,
        QpStatus::ExceedMaxIter => ExitFlag::QpErrorExceedMaxIter,
        QpStatus::Unknown => ExitFlag::QpErrorUnknown,
    }
}

impl SqpSolver {
    pub fn new(settings: SqpSettings) -> Self {
        let journal = Journal::open(&settings);
        let eps1 = settings.eps1;
        let delta = settings.trust_region_init_value;
        let rho = settings.penalty_parameter_init_value;
        Self {
            settings,
            oracle: None,
            problem_name: String::new(),
            num_vars: 0,
            num_cons: 0,
            x_k: Vec::new(),
            x_trial: Vec::new(),
            p_k: Vec::new(),
            c_k: Vec::new(),
            c_trial: Vec::new(),
            grad_f: Vec::new(),
            x_l: Vec::new(),
            x_u: Vec::new(),
            c_l: Vec::new(),
            c_u: Vec::new(),
            multiplier_cons: Vec::new(),
            multiplier_vars: Vec::new(),
            jacobian: TripletMat::new(0, 0, 0, false),
            hessian: TripletMat::new(0, 0, 0, true),
            cons_kind: Vec::new(),
            bound_kind: Vec::new(),
            active_cons: Vec::new(),
            active_bounds: Vec::new(),
            delta,
            rho,
            eps1,
            obj_value: 0.0,
            obj_value_trial: 0.0,
            infea_measure: 0.0,
            infea_measure_model: 0.0,
            infea_measure_trial: 0.0,
            norm_p_k: 0.0,
            qp_obj: 0.0,
            actual_reduction: 0.0,
            pred_reduction: 0.0,
            update_flags: QpUpdateFlags::default(),
            exit_flag: ExitFlag::Unknown,
            kkt: KktStatus::default(),
            stats: Stats::new(),
            accepted: false,
            qp: None,
            lp: None,
            journal,
            initialized: false,
        }
    }

    /// Read options, allocate state from the oracle's sizes, evaluate the
    /// starting point, classify constraints and open the journal.
    ///
    /// The starting point is clamped into the variable box. Non-finite
    /// oracle values set [`ExitFlag::InvalidNlp`]; `optimize` then returns
    /// immediately with that status.
    pub fn initialize(&mut self, oracle: Box<dyn NlpOracle>, name: &str) -> SqpResult<()> {
        let sizes = oracle.problem_sizes();
        self.validate_sizes(&sizes)?;
        self.allocate(&sizes);
        self.problem_name = name.to_string();
        self.oracle = Some(oracle);

        self.delta = self.settings.trust_region_init_value;
        self.rho = self.settings.penalty_parameter_init_value;
        self.eps1 = self.settings.eps1;
        self.norm_p_k = 0.0;
        self.exit_flag = ExitFlag::Unknown;
        self.stats = Stats::new();
        self.update_flags = QpUpdateFlags::default();

        {
            let oracle = self.oracle.as_ref().expect("oracle just stored");
            oracle.bounds(&mut self.x_l, &mut self.x_u, &mut self.c_l, &mut self.c_u)?;
            oracle.starting_point(&mut self.x_k, &mut self.multiplier_cons)?;
        }

        // Shift the starting point into the variable box.
        for j in 0..self.num_vars {
            if self.x_k[j] < self.x_l[j] {
                self.x_k[j] = self.x_l[j];
            } else if self.x_k[j] > self.x_u[j] {
                self.x_k[j] = self.x_u[j];
            }
        }

        {
            let oracle = self.oracle.as_ref().expect("oracle stored above");
            self.obj_value = oracle.eval_objective(&self.x_k)?;
            oracle.eval_gradient(&self.x_k, &mut self.grad_f)?;
            oracle.eval_constraints(&self.x_k, &mut self.c_k)?;
            oracle.hessian_structure(&self.x_k, &self.multiplier_cons, &mut self.hessian)?;
            oracle.eval_hessian(&self.x_k, &self.multiplier_cons, &mut self.hessian)?;
            oracle.jacobian_structure(&self.x_k, &mut self.jacobian)?;
            oracle.eval_jacobian(&self.x_k, &mut self.jacobian)?;
        }

        if !self.obj_value.is_finite()
            || dense::has_nan(&self.grad_f)
            || dense::has_nan(&self.c_k)
            || dense::has_nan(self.hessian.values())
            || dense::has_nan(self.jacobian.values())
        {
            log::warn!("oracle returned non-finite values at the starting point");
            self.exit_flag = ExitFlag::InvalidNlp;
        }

        self.classify_constraints();
        self.infea_measure = constraint_violation(&self.c_k, &self.c_l, &self.c_u);

        let sizes = ProblemSizes {
            num_vars: self.num_vars,
            num_cons: self.num_cons,
            nnz_jacobian: self.jacobian.nnz(),
            nnz_hessian: self.hessian.nnz(),
        };
        self.qp = Some(QpHandler::new(&sizes, QpMode::Qp, self.make_engine(true)?));
        self.lp = Some(QpHandler::new(&sizes, QpMode::Lp, self.make_engine(false)?));

        self.journal.header();
        self.initialized = true;
        Ok(())
    }

    fn validate_sizes(&self, sizes: &ProblemSizes) -> SqpResult<()> {
        if sizes.num_vars == 0 {
            return Err(SqpError::InvalidProblem(
                "problem has no variables".to_string(),
            ));
        }
        if sizes.nnz_jacobian > sizes.num_vars * sizes.num_cons {
            return Err(SqpError::InvalidProblem(format!(
                "jacobian nnz {} exceeds {}x{}",
                sizes.nnz_jacobian, sizes.num_cons, sizes.num_vars
            )));
        }
        Ok(())
    }

    fn allocate(&mut self, sizes: &ProblemSizes) {
        let n = sizes.num_vars;
        let m = sizes.num_cons;
        self.num_vars = n;
        self.num_cons = m;
        self.x_k = vec![0.0; n];
        self.x_trial = vec![0.0; n];
        self.p_k = vec![0.0; n];
        self.c_k = vec![0.0; m];
        self.c_trial = vec![0.0; m];
        self.grad_f = vec![0.0; n];
        self.x_l = vec![f64::NEG_INFINITY; n];
        self.x_u = vec![f64::INFINITY; n];
        self.c_l = vec![f64::NEG_INFINITY; m];
        self.c_u = vec![f64::INFINITY; m];
        self.multiplier_cons = vec![0.0; m];
        self.multiplier_vars = vec![0.0; n];
        self.jacobian = TripletMat::new(sizes.nnz_jacobian, m, n, false);
        self.hessian = TripletMat::new(sizes.nnz_hessian, n, n, true);
        self.cons_kind = vec![ConstraintKind::Unbounded; m];
        self.bound_kind = vec![ConstraintKind::Unbounded; n];
        self.active_cons = vec![ActiveKind::Inactive; m];
        self.active_bounds = vec![ActiveKind::Inactive; n];
    }

    fn make_engine(&self, qp: bool) -> SqpResult<Box<dyn QpEngine>> {
        let max_iter = if qp {
            self.settings.qp_solver_max_num_iterations
        } else {
            self.settings.lp_solver_max_num_iterations
        };
        match self.settings.qp_solver_choice {
            QpSolverChoice::DenseIpm => Ok(Box::new(DenseIpmEngine::new(max_iter))),
            other => Err(SqpError::EngineUnavailable(format!("{:?}", other))),
        }
    }

    fn classify_constraints(&mut self) {
        for i in 0..self.num_cons {
            self.cons_kind[i] = ConstraintKind::classify(self.c_l[i], self.c_u[i]);
        }
        for j in 0..self.num_vars {
            self.bound_kind[j] = ConstraintKind::classify(self.x_l[j], self.x_u[j]);
        }
    }

    /// Run the outer loop until a terminal condition fires.
    pub fn optimize(&mut self) -> SqpResult<SolveReport> {
        if !self.initialized {
            return Err(SqpError::NotInitialised);
        }
        let start = Instant::now();

        while self.stats.iter < self.settings.max_num_iterations
            && self.exit_flag == ExitFlag::Unknown
        {
            self.setup_qp()?;

            let status = {
                let qp = self.qp.as_mut().expect("handler built at initialize");
                qp.solve(&mut self.stats)
            };
            if status != QpStatus::Optimal {
                self.exit_flag = map_qp_status(status);
                break;
            }
            self.extract_search_direction();

            self.update_penalty_parameter()?;
            if self.exit_flag != ExitFlag::Unknown {
                break;
            }

            self.norm_p_k = dense::inf_norm(&self.p_k);

            self.eval_trial_point()?;
            if self.exit_flag != ExitFlag::Unknown {
                break;
            }

            self.ratio_test()?;
            if self.exit_flag != ExitFlag::Unknown {
                break;
            }

            self.second_order_correction()?;
            if self.exit_flag != ExitFlag::Unknown {
                break;
            }

            self.stats.iter += 1;
            self.journal.iteration(
                self.stats.iter,
                self.obj_value,
                self.norm_p_k,
                self.infea_measure,
                self.delta,
                self.rho,
                self.stats.qp_iter,
            );

            self.check_optimality();
            if self.exit_flag != ExitFlag::Unknown {
                break;
            }

            self.update_radius();
            if self.exit_flag == ExitFlag::TrustRegionTooSmall {
                // Final KKT probe: a stalled radius at a KKT point is still
                // an optimal exit.
                self.check_optimality();
                break;
            }

            // Resource polls, once per iteration after the loop body.
            let elapsed = start.elapsed().as_secs_f64();
            if elapsed > self.settings.cpu_time_limit {
                self.exit_flag = ExitFlag::ExceedMaxCpuTime;
                break;
            }
            if elapsed > self.settings.wallclock_time_limit {
                self.exit_flag = ExitFlag::ExceedMaxWallclockTime;
                break;
            }
        }

        if self.exit_flag == ExitFlag::Unknown
            && self.stats.iter >= self.settings.max_num_iterations
        {
            self.exit_flag = ExitFlag::ExceedMaxIterations;
        }

        let report = self.report();
        self.journal.final_summary(
            report.exit_flag,
            self.num_vars,
            self.num_cons,
            report.obj_value,
            report.infea_measure,
            report.norm_p,
            &report.kkt,
            &report.stats,
        );
        self.journal.flush();
        Ok(report)
    }

    fn report(&self) -> SolveReport {
        SolveReport {
            exit_flag: self.exit_flag,
            x: self.x_k.clone(),
            obj_value: self.obj_value,
            constraint_multipliers: self.multiplier_cons.clone(),
            bound_multipliers: self.multiplier_vars.clone(),
            infea_measure: self.infea_measure,
            norm_p: self.norm_p_k,
            kkt: self.kkt,
            stats: self.stats,
        }
    }

    /// Push problem data into the QP: everything at iteration zero, only the
    /// dirty components afterwards.
    fn setup_qp(&mut self) -> SqpResult<()> {
        let qp = self.qp.as_mut().expect("handler built at initialize");
        if self.stats.iter == 0 {
            qp.set_jacobian(&self.jacobian);
            qp.set_hessian(&self.hessian);
            qp.set_bounds(
                self.delta, &self.x_l, &self.x_u, &self.x_k, &self.c_l, &self.c_u, &self.c_k,
            );
            qp.set_gradient(&self.grad_f, self.rho);
            return Ok(());
        }

        if !self.update_flags.any() {
            return Err(SqpError::QpUnchanged);
        }
        if self.update_flags.jacobian {
            qp.update_jacobian(&self.jacobian);
            self.update_flags.jacobian = false;
        }
        if self.update_flags.hessian {
            qp.update_hessian(&self.hessian);
            self.update_flags.hessian = false;
        }
        if self.update_flags.bounds {
            qp.update_bounds(
                self.delta, &self.x_l, &self.x_u, &self.x_k, &self.c_l, &self.c_u, &self.c_k,
            );
            self.update_flags.bounds = false;
            self.update_flags.delta = false;
        } else if self.update_flags.delta {
            qp.update_delta(self.delta, &self.x_l, &self.x_u, &self.x_k);
            self.update_flags.delta = false;
        }
        if self.update_flags.penalty {
            qp.update_penalty(self.rho);
            self.update_flags.penalty = false;
        }
        if self.update_flags.gradient {
            qp.update_gradient(&self.grad_f);
            self.update_flags.gradient = false;
        }
        Ok(())
    }

    /// Copy the step out of the QP optimum: p is the first n entries, the
    /// slack mass is the model infeasibility.
    fn extract_search_direction(&mut self) {
        let qp = self.qp.as_ref().expect("handler built at initialize");
        self.p_k.copy_from_slice(&qp.primal()[..self.num_vars]);
        self.infea_measure_model = qp.model_infeasibility();
        self.qp_obj = qp.objective();
    }

    /// Pull constraint and bound multipliers from the last QP solve.
    fn get_multipliers(&mut self) {
        let qp = self.qp.as_ref().expect("handler built at initialize");
        self.multiplier_cons
            .copy_from_slice(qp.constraint_multipliers());
        self.multiplier_vars = qp.bound_multipliers();
    }

    /// Evaluate objective, constraints and infeasibility at x_k + p_k.
    fn eval_trial_point(&mut self) -> SqpResult<()> {
        dense::scaled_sum(&mut self.x_trial, 1.0, &self.x_k, 1.0, &self.p_k);
        let oracle = self.oracle.as_ref().expect("oracle stored at initialize");
        let obj = match oracle.eval_objective(&self.x_trial) {
            Ok(v) => v,
            Err(e) => {
                log::warn!("oracle failure at trial point: {}", e);
                self.exit_flag = ExitFlag::InvalidNlp;
                return Ok(());
            }
        };
        if oracle
            .eval_constraints(&self.x_trial, &mut self.c_trial)
            .is_err()
            || !obj.is_finite()
            || dense::has_nan(&self.c_trial)
        {
            self.exit_flag = ExitFlag::InvalidNlp;
            return Ok(());
        }
        self.obj_value_trial = obj;
        self.infea_measure_trial = constraint_violation(&self.c_trial, &self.c_l, &self.c_u);
        Ok(())
    }

    /// Merit-function ratio test.
    ///
    /// With P(x) = f(x) + rho * phi(x), accept when the actual merit
    /// reduction covers at least eta_s of the predicted one and is not
    /// meaningfully negative. Acceptance commits the trial point and
    /// refreshes gradient, Jacobian, Hessian and multipliers, marking the
    /// corresponding QP components dirty.
    fn ratio_test(&mut self) -> SqpResult<()> {
        let p1_x = self.obj_value + self.rho * self.infea_measure;
        let p1_trial = self.obj_value_trial + self.rho * self.infea_measure_trial;
        self.actual_reduction = p1_x - p1_trial;
        self.pred_reduction = self.rho * self.infea_measure - self.qp_obj;

        if self.settings.error_on_negative_pred && self.pred_reduction < -1.0e-8 {
            self.exit_flag = ExitFlag::PredReductionNegative;
            return Ok(());
        }

        let eta_s = self.settings.trust_region_ratio_accept_tol;
        if self.actual_reduction >= eta_s * self.pred_reduction
            && self.actual_reduction >= -self.settings.opt_tol
        {
            self.infea_measure = self.infea_measure_trial;
            self.obj_value = self.obj_value_trial;
            self.x_k.copy_from_slice(&self.x_trial);
            self.c_k.copy_from_slice(&self.c_trial);
            self.get_multipliers();

            let oracle = self.oracle.as_ref().expect("oracle stored at initialize");
            let ok = oracle.eval_gradient(&self.x_k, &mut self.grad_f).is_ok()
                && oracle.eval_jacobian(&self.x_k, &mut self.jacobian).is_ok()
                && oracle
                    .eval_hessian(&self.x_k, &self.multiplier_cons, &mut self.hessian)
                    .is_ok();
            if !ok
                || dense::has_nan(&self.grad_f)
                || dense::has_nan(self.jacobian.values())
                || dense::has_nan(self.hessian.values())
            {
                self.exit_flag = ExitFlag::InvalidNlp;
                return Ok(());
            }

            self.update_flags.mark_accepted_step();
            self.accepted = true;
        } else {
            self.accepted = false;
        }
        Ok(())
    }

    /// Penalty update.
    ///
    /// Triggered when the QP still carries slack mass. An LP probe (same
    /// linearization, no Hessian) estimates the best linearized feasibility
    /// inside the current trust region; depending on that estimate the
    /// penalty parameter is driven up until the QP model is feasible (case A)
    /// or until the model recovers a fixed fraction of the achievable
    /// feasibility gain (case B). The raise is kept only if the QP model
    /// then promises sufficient merit reduction.
    fn update_penalty_parameter(&mut self) -> SqpResult<()> {
        if self.infea_measure_model <= self.settings.penalty_update_tol {
            return Ok(());
        }
        let model_backup = self.infea_measure_model;
        let mut rho_trial = self.rho;

        // LP probe for the best achievable linearized feasibility.
        let lp_status = {
            let lp = self.lp.as_mut().expect("handler built at initialize");
            lp.set_jacobian(&self.jacobian);
            lp.set_gradient_lp(rho_trial);
            lp.set_bounds(
                self.delta, &self.x_l, &self.x_u, &self.x_k, &self.c_l, &self.c_u, &self.c_k,
            );
            lp.solve(&mut self.stats)
        };
        if lp_status != QpStatus::Optimal {
            self.exit_flag = map_qp_status(lp_status);
            return Ok(());
        }
        let infea_measure_infty = {
            let lp = self.lp.as_ref().expect("handler built at initialize");
            lp.model_infeasibility()
        };

        let rho_max = self.settings.penalty_parameter_max_value;
        let incr = self.settings.penalty_parameter_increase_factor;
        let tol = self.settings.penalty_update_tol;

        if infea_measure_infty <= tol {
            // Case A: the linearization is feasible inside the trust region;
            // raise rho until the QP model agrees.
            while self.infea_measure_model > tol {
                if rho_trial >= rho_max {
                    break;
                }
                rho_trial = rho_max.min(rho_trial * incr);
                if !self.penalty_resolve(rho_trial)? {
                    return Ok(());
                }
            }
        } else {
            // Case B: genuinely infeasible linearization; raise rho until
            // the model recovers an eps1 fraction of the achievable gain.
            while self.infea_measure - self.infea_measure_model
                < self.eps1 * (self.infea_measure - infea_measure_infty)
                && self.stats.penalty_change_trial < self.settings.penalty_iter_max
            {
                if rho_trial >= rho_max {
                    break;
                }
                rho_trial = rho_max.min(rho_trial * incr);
                if !self.penalty_resolve(rho_trial)? {
                    return Ok(());
                }
            }
        }

        if rho_trial > self.rho {
            let qp_obj = {
                let qp = self.qp.as_ref().expect("handler built at initialize");
                qp.objective()
            };
            let promised = rho_trial * self.infea_measure - qp_obj;
            let required =
                self.settings.eps2 * rho_trial * (self.infea_measure - self.infea_measure_model);
            if promised >= required {
                self.stats.penalty_change_succ += 1;
                self.eps1 += (1.0 - self.eps1) * self.settings.eps1_change_parm;

                // Adopt the re-solved QP's step under the raised penalty.
                self.extract_search_direction();
                self.rho = rho_trial;
                self.eval_trial_point()?;
                if self.exit_flag != ExitFlag::Unknown {
                    return Ok(());
                }
                let p1_x = self.obj_value + self.rho * self.infea_measure;
                let p1_trial = self.obj_value_trial + self.rho * self.infea_measure_trial;
                self.actual_reduction = p1_x - p1_trial;
                self.pred_reduction = self.rho * self.infea_measure - self.qp_obj;
            } else {
                self.stats.penalty_change_fail += 1;
                self.infea_measure_model = model_backup;
                // The QP currently carries rho_trial; rebuild with the kept
                // rho on the next setup round.
                self.update_flags.penalty = true;
            }
        }
        Ok(())
    }

    /// Re-solve the QP under a trial penalty. Returns false (with the exit
    /// flag set) when the QP fails; penalty failures are not retried.
    fn penalty_resolve(&mut self, rho_trial: f64) -> SqpResult<bool> {
        self.stats.penalty_change_trial += 1;
        let status = {
            let qp = self.qp.as_mut().expect("handler built at initialize");
            qp.update_penalty(rho_trial);
            qp.solve(&mut self.stats)
        };
        if status != QpStatus::Optimal {
            self.exit_flag = map_qp_status(status);
            return Ok(false);
        }
        self.infea_measure_model = {
            let qp = self.qp.as_ref().expect("handler built at initialize");
            qp.model_infeasibility()
        };
        Ok(true)
    }

    /// Second-order correction.
    ///
    /// After a rejected trial the correction QP keeps the same Hessian but
    /// recenters the gradient at grad f + H p and the bounds on the trial
    /// point. The correction adds to p_k and the ratio test runs again; a
    /// second rejection restores the pre-correction step and QP state.
    fn second_order_correction(&mut self) -> SqpResult<()> {
        if self.accepted || !self.settings.perform_second_order_correction_step {
            return Ok(());
        }
        self.stats.soc_trials += 1;

        let p_backup = self.p_k.clone();
        let norm_backup = self.norm_p_k;
        let qp_obj_backup = self.qp_obj;

        // Gradient of the correction model: grad f + H p.
        let mut hp = vec![0.0; self.num_vars];
        self.hessian.multiply(&self.p_k, &mut hp);
        dense::axpy(1.0, &self.grad_f, &mut hp);

        let status = {
            let qp = self.qp.as_mut().expect("handler built at initialize");
            qp.update_gradient(&hp);
            qp.update_bounds(
                self.delta,
                &self.x_l,
                &self.x_u,
                &self.x_trial,
                &self.c_l,
                &self.c_u,
                &self.c_trial,
            );
            qp.solve(&mut self.stats)
        };
        if status != QpStatus::Optimal {
            // A failing correction QP is fatal for the solve.
            self.exit_flag = map_qp_status(status);
            return Ok(());
        }

        // Copy from the solution only now that the solve succeeded.
        {
            let qp = self.qp.as_ref().expect("handler built at initialize");
            let correction = &qp.primal()[..self.num_vars];
            for (pj, sj) in self.p_k.iter_mut().zip(correction.iter()) {
                *pj += sj;
            }
            self.qp_obj =
                qp.objective() + (qp_obj_backup - self.rho * self.infea_measure_model);
        }
        self.norm_p_k = dense::inf_norm(&self.p_k);

        self.eval_trial_point()?;
        if self.exit_flag != ExitFlag::Unknown {
            return Ok(());
        }
        self.ratio_test()?;
        if self.exit_flag != ExitFlag::Unknown {
            return Ok(());
        }

        if !self.accepted {
            self.p_k = p_backup;
            self.qp_obj = qp_obj_backup;
            self.norm_p_k = norm_backup;
            let qp = self.qp.as_mut().expect("handler built at initialize");
            qp.update_gradient(&self.grad_f);
            qp.update_bounds(
                self.delta, &self.x_l, &self.x_u, &self.x_k, &self.c_l, &self.c_u, &self.c_k,
            );
        }
        Ok(())
    }

    /// KKT check: primal, dual, complementarity and stationarity violations.
    ///
    /// Active-set markers are recomputed from scratch on every call. Sign
    /// convention: a multiplier is nonnegative on a binding lower side and
    /// nonpositive on a binding upper side.
    fn check_optimality(&mut self) {
        self.get_multipliers();
        let tol = self.settings.active_set_tol;

        // Active sets, reset each call.
        for i in 0..self.num_cons {
            self.active_cons[i] = ActiveKind::Inactive;
            match self.cons_kind[i] {
                ConstraintKind::BoundedAbove => {
                    if (self.c_u[i] - self.c_k[i]).abs() < tol {
                        self.active_cons[i] = ActiveKind::ActiveAbove;
                    }
                }
                ConstraintKind::BoundedBelow => {
                    if (self.c_k[i] - self.c_l[i]).abs() < tol {
                        self.active_cons[i] = ActiveKind::ActiveBelow;
                    }
                }
                ConstraintKind::Equal => {
                    if (self.c_u[i] - self.c_k[i]).abs() < tol
                        && (self.c_k[i] - self.c_l[i]).abs() < tol
                    {
                        self.active_cons[i] = ActiveKind::ActiveBothSides;
                    }
                }
                _ => {}
            }
        }
        for j in 0..self.num_vars {
            self.active_bounds[j] = ActiveKind::Inactive;
            match self.bound_kind[j] {
                ConstraintKind::BoundedAbove => {
                    if (self.x_u[j] - self.x_k[j]).abs() < tol {
                        self.active_bounds[j] = ActiveKind::ActiveAbove;
                    }
                }
                ConstraintKind::BoundedBelow => {
                    if (self.x_k[j] - self.x_l[j]).abs() < tol {
                        self.active_bounds[j] = ActiveKind::ActiveBelow;
                    }
                }
                ConstraintKind::Equal => {
                    if (self.x_u[j] - self.x_k[j]).abs() < tol
                        && (self.x_k[j] - self.x_l[j]).abs() < tol
                    {
                        self.active_bounds[j] = ActiveKind::ActiveBothSides;
                    }
                }
                _ => {}
            }
        }

        let primal_violation = self.infea_measure;

        let mut dual_violation = 0.0;
        for j in 0..self.num_vars {
            match self.bound_kind[j] {
                ConstraintKind::BoundedAbove => {
                    dual_violation += self.multiplier_vars[j].max(0.0);
                }
                ConstraintKind::BoundedBelow => {
                    dual_violation += (-self.multiplier_vars[j]).max(0.0);
                }
                _ => {}
            }
        }
        for i in 0..self.num_cons {
            match self.cons_kind[i] {
                ConstraintKind::BoundedAbove => {
                    dual_violation += self.multiplier_cons[i].max(0.0);
                }
                ConstraintKind::BoundedBelow => {
                    dual_violation += (-self.multiplier_cons[i]).max(0.0);
                }
                _ => {}
            }
        }

        let mut compl_violation = 0.0;
        for i in 0..self.num_cons {
            compl_violation += complementarity_term(
                self.multiplier_cons[i],
                self.c_k[i],
                self.c_l[i],
                self.c_u[i],
                self.cons_kind[i],
            );
        }
        for j in 0..self.num_vars {
            compl_violation += complementarity_term(
                self.multiplier_vars[j],
                self.x_k[j],
                self.x_l[j],
                self.x_u[j],
                self.bound_kind[j],
            );
        }

        // Stationarity: grad f - J^T mu_cons - mu_vars.
        let mut residual = vec![0.0; self.num_vars];
        self.jacobian
            .multiply_transpose(&self.multiplier_cons, &mut residual);
        dense::axpy(1.0, &self.multiplier_vars, &mut residual);
        dense::axpy(-1.0, &self.grad_f, &mut residual);
        let stationarity_violation = dense::one_norm(&residual);

        self.kkt = KktStatus {
            primal_violation,
            dual_violation,
            compl_violation,
            stationarity_violation,
            kkt_error: primal_violation
                + dual_violation
                + compl_violation
                + stationarity_violation,
            primal_feasible: primal_violation < self.settings.opt_tol_primal_feasibility,
            dual_feasible: dual_violation < self.settings.opt_tol_dual_feasibility,
            complementarity: compl_violation < self.settings.opt_tol_complementarity,
            stationarity: stationarity_violation
                < self.settings.opt_tol_stationarity_feasibility,
            first_order_optimal: false,
        };
        self.kkt.first_order_optimal = self.kkt.primal_feasible
            && self.kkt.dual_feasible
            && self.kkt.complementarity
            && self.kkt.stationarity;

        if self.kkt.first_order_optimal {
            self.exit_flag = ExitFlag::Optimal;
        }
    }

    /// Trust-region update: contract on a poor ratio, expand when the ratio
    /// is strong and the step hit the boundary, stop when the radius
    /// collapses.
    fn update_radius(&mut self) {
        let eta_c = self.settings.trust_region_ratio_decrease_tol;
        let eta_e = self.settings.trust_region_ratio_increase_tol;

        if self.actual_reduction < eta_c * self.pred_reduction {
            self.delta *= self.settings.trust_region_decrease_factor;
            self.update_flags.delta = true;
        } else if self.actual_reduction > eta_e * self.pred_reduction
            && (self.delta - self.norm_p_k).abs() < self.settings.opt_tol
        {
            self.delta = (self.settings.trust_region_increase_factor * self.delta)
                .min(self.settings.trust_region_max_value);
            self.update_flags.delta = true;
        }

        if self.delta < self.settings.trust_region_min_value {
            self.exit_flag = ExitFlag::TrustRegionTooSmall;
        }
    }

    // Accessors used by callers and tests.

    pub fn exit_flag(&self) -> ExitFlag {
        self.exit_flag
    }

    pub fn stats(&self) -> &Stats {
        &self.stats
    }

    pub fn kkt_status(&self) -> &KktStatus {
        &self.kkt
    }

    pub fn objective(&self) -> f64 {
        self.obj_value
    }

    pub fn iterate(&self) -> &[f64] {
        &self.x_k
    }

    /// Active-set markers recorded by the last KKT check, for constraints
    /// and variable bounds respectively.
    pub fn active_set(&self) -> (&[ActiveKind], &[ActiveKind]) {
        (&self.active_cons, &self.active_bounds)
    }

    pub fn problem_name(&self) -> &str {
        &self.problem_name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::OracleError;

    /// min x^2 subject to nothing, x0 = 3, x in [-10, 10].
    struct Square;

    impl NlpOracle for Square {
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
            x_l[0] = -10.0;
            x_u[0] = 10.0;
            Ok(())
        }

        fn starting_point(&self, x: &mut [f64], _lambda: &mut [f64]) -> Result<(), OracleError> {
            x[0] = 30.0; // outside the box on purpose
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

        fn jacobian_structure(
            &self,
            _x: &[f64],
            _jac: &mut TripletMat,
        ) -> Result<(), OracleError> {
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

    #[test]
    fn test_constraint_violation() {
        let c = [0.5, 2.0, -1.0];
        let c_l = [0.0, 0.0, 0.0];
        let c_u = [1.0, 1.0, 1.0];
        // middle row violates above by 1, last below by 1
        assert_eq!(constraint_violation(&c, &c_l, &c_u), 2.0);
        assert_eq!(constraint_violation(&[], &[], &[]), 0.0);
    }

    #[test]
    fn test_starting_point_clamped_into_box() {
        let mut solver = SqpSolver::new(SqpSettings::default());
        solver.initialize(Box::new(Square), "square").unwrap();
        assert!(solver.iterate()[0] <= 10.0);
        assert!(solver.iterate()[0] >= -10.0);
    }

    #[test]
    fn test_unconstrained_square_solves() {
        let mut solver = SqpSolver::new(SqpSettings::default());
        solver.initialize(Box::new(Square), "square").unwrap();
        let report = solver.optimize().unwrap();
        assert_eq!(report.exit_flag, ExitFlag::Optimal);
        assert!(report.x[0].abs() < 1e-4, "x = {}", report.x[0]);
        assert!(report.kkt.first_order_optimal);
    }

    #[test]
    fn test_optimize_before_initialize() {
        let mut solver = SqpSolver::new(SqpSettings::default());
        assert!(matches!(solver.optimize(), Err(SqpError::NotInitialised)));
    }

    #[test]
    fn test_external_engine_reported_unavailable() {
        let mut settings = SqpSettings::default();
        settings.qp_solver_choice = QpSolverChoice::Gurobi;
        let mut solver = SqpSolver::new(settings);
        let err = solver.initialize(Box::new(Square), "square");
        assert!(matches!(err, Err(SqpError::EngineUnavailable(_))));
    }

    /// min x^4, unbounded, x0 = 3. Not quadratic, so one step cannot look
    /// stationary.
    struct Quartic;

    impl NlpOracle for Quartic {
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
            _x_l: &mut [f64],
            _x_u: &mut [f64],
            _c_l: &mut [f64],
            _c_u: &mut [f64],
        ) -> Result<(), OracleError> {
            Ok(())
        }

        fn starting_point(&self, x: &mut [f64], _lambda: &mut [f64]) -> Result<(), OracleError> {
            x[0] = 3.0;
            Ok(())
        }

        fn eval_objective(&self, x: &[f64]) -> Result<f64, OracleError> {
            Ok(x[0].powi(4))
        }

        fn eval_gradient(&self, x: &[f64], grad: &mut [f64]) -> Result<(), OracleError> {
            grad[0] = 4.0 * x[0].powi(3);
            Ok(())
        }

        fn eval_constraints(&self, _x: &[f64], _c: &mut [f64]) -> Result<(), OracleError> {
            Ok(())
        }

        fn jacobian_structure(
            &self,
            _x: &[f64],
            _jac: &mut TripletMat,
        ) -> Result<(), OracleError> {
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
            x: &[f64],
            _lambda: &[f64],
            hess: &mut TripletMat,
        ) -> Result<(), OracleError> {
            hess.set_value(0, 12.0 * x[0] * x[0]);
            Ok(())
        }
    }

    #[test]
    fn test_iteration_cap_exact() {
        let settings = SqpSettings::default().with_max_iterations(1);
        let mut solver = SqpSolver::new(settings);
        solver.initialize(Box::new(Quartic), "quartic").unwrap();
        let report = solver.optimize().unwrap();
        assert_eq!(report.exit_flag, ExitFlag::ExceedMaxIterations);
        assert_eq!(report.stats.iter, 1);
    }
}
