//! Configuration settings for the SQP solver.

use std::fmt;

/// QP engine used for step computation.
///
/// `DenseIpm` is the built-in engine. The remaining choices name external
/// engines whose bindings are not part of this build; selecting one is
/// reported at `initialize`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QpSolverChoice {
    /// Built-in dense primal-dual interior-point engine.
    #[default]
    DenseIpm,
    Qore,
    Qpoases,
    Gurobi,
    Cplex,
}

impl QpSolverChoice {
    /// Parse an option value as accepted by `qp_solver_choice`.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "DENSE_IPM" => Some(QpSolverChoice::DenseIpm),
            "QORE" => Some(QpSolverChoice::Qore),
            "QPOASES" => Some(QpSolverChoice::Qpoases),
            "GUROBI" => Some(QpSolverChoice::Gurobi),
            "CPLEX" => Some(QpSolverChoice::Cplex),
            _ => None,
        }
    }
}

/// Error from the string-keyed settings interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettingsError {
    UnknownKey(String),
    InvalidValue { key: String, value: String },
}

impl fmt::Display for SettingsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SettingsError::UnknownKey(k) => write!(f, "unknown option '{}'", k),
            SettingsError::InvalidValue { key, value } => {
                write!(f, "invalid value '{}' for option '{}'", value, key)
            }
        }
    }
}

impl std::error::Error for SettingsError {}

/// SQP solver settings.
#[derive(Debug, Clone)]
pub struct SqpSettings {
    // === Termination ===
    /// Outer iteration cap.
    pub max_num_iterations: usize,

    /// CPU time limit in seconds.
    pub cpu_time_limit: f64,

    /// Wallclock time limit in seconds.
    pub wallclock_time_limit: f64,

    // === Trust region ===
    /// Initial trust-region radius (delta_0).
    pub trust_region_init_value: f64,

    /// Largest radius the update rule may reach.
    pub trust_region_max_value: f64,

    /// Radius below which the solve stops with TrustRegionTooSmall.
    pub trust_region_min_value: f64,

    /// Ratio threshold triggering contraction (eta_c).
    pub trust_region_ratio_decrease_tol: f64,

    /// Ratio threshold for accepting the trial point (eta_s).
    pub trust_region_ratio_accept_tol: f64,

    /// Ratio threshold for expansion when the step hits the boundary (eta_e).
    pub trust_region_ratio_increase_tol: f64,

    /// Contraction factor (gamma_c).
    pub trust_region_decrease_factor: f64,

    /// Expansion factor (gamma_e).
    pub trust_region_increase_factor: f64,

    // === Penalty ===
    /// Initial penalty parameter (rho_0).
    pub penalty_parameter_init_value: f64,

    /// Cap on the penalty parameter.
    pub penalty_parameter_max_value: f64,

    /// Multiplicative increase factor for rho.
    pub penalty_parameter_increase_factor: f64,

    /// Model infeasibility above which the penalty loop triggers.
    pub penalty_update_tol: f64,

    /// Cap on penalty trials within a single outer iteration.
    pub penalty_iter_max: usize,

    /// Case-B progress fraction (eps1).
    pub eps1: f64,

    /// Growth applied to eps1 after an accepted increase.
    pub eps1_change_parm: f64,

    /// Sufficient-reduction fraction for accepting a new rho (eps2).
    pub eps2: f64,

    // === Steps ===
    /// Attempt a second-order correction after a rejected step.
    pub perform_second_order_correction_step: bool,

    /// Treat a negative predicted reduction as a terminal error.
    pub error_on_negative_pred: bool,

    // === Optimality test ===
    /// General numerical tolerance (ratio test slack, boundary proximity).
    pub opt_tol: f64,

    /// Proximity tolerance for active-set classification.
    pub active_set_tol: f64,

    /// Primal feasibility tolerance.
    pub opt_tol_primal_feasibility: f64,

    /// Dual feasibility tolerance.
    pub opt_tol_dual_feasibility: f64,

    /// Complementarity tolerance.
    pub opt_tol_complementarity: f64,

    /// Stationarity tolerance.
    pub opt_tol_stationarity_feasibility: f64,

    // === Subproblem engines ===
    /// QP engine used for step computation.
    pub qp_solver_choice: QpSolverChoice,

    /// Iteration cap per QP solve.
    pub qp_solver_max_num_iterations: usize,

    /// Iteration cap per LP solve (penalty update probes).
    pub lp_solver_max_num_iterations: usize,

    // === Output ===
    /// Console verbosity (0 silent, 1 summary, 2 iteration table and up).
    pub print_level: u32,

    /// Verbosity for the file journal.
    pub file_print_level: u32,

    /// File journal path; empty disables file output.
    pub output_file: String,
}

impl Default for SqpSettings {
    fn default() -> Self {
        Self {
            max_num_iterations: 3000,
            cpu_time_limit: 1e10,
            wallclock_time_limit: 1e10,

            trust_region_init_value: 1.0,
            trust_region_max_value: 1e10,
            trust_region_min_value: 1e-16,
            trust_region_ratio_decrease_tol: 0.25,
            trust_region_ratio_accept_tol: 1.0e-8,
            trust_region_ratio_increase_tol: 0.75,
            trust_region_decrease_factor: 0.5,
            trust_region_increase_factor: 2.0,

            penalty_parameter_init_value: 1.0,
            penalty_parameter_max_value: 1.0e8,
            penalty_parameter_increase_factor: 10.0,
            penalty_update_tol: 1.0e-8,
            penalty_iter_max: 200,
            eps1: 0.1,
            eps1_change_parm: 0.1,
            eps2: 1.0e-6,

            perform_second_order_correction_step: false,
            error_on_negative_pred: false,

            opt_tol: 1.0e-8,
            active_set_tol: 1.0e-5,
            opt_tol_primal_feasibility: 1.0e-4,
            opt_tol_dual_feasibility: 1.0e-4,
            opt_tol_complementarity: 1.0e-4,
            opt_tol_stationarity_feasibility: 1.0e-4,

            qp_solver_choice: QpSolverChoice::default(),
            qp_solver_max_num_iterations: 1000,
            lp_solver_max_num_iterations: 100,

            print_level: 0,
            file_print_level: 2,
            output_file: String::new(),
        }
    }
}

impl SqpSettings {
    /// Settings with the iteration table printed to the console.
    pub fn verbose() -> Self {
        let mut s = Self::default();
        s.print_level = 2;
        s
    }

    /// Set the outer iteration cap.
    pub fn with_max_iterations(mut self, iters: usize) -> Self {
        self.max_num_iterations = iters;
        self
    }

    /// Set the initial trust-region radius.
    pub fn with_trust_region_init(mut self, delta: f64) -> Self {
        self.trust_region_init_value = delta;
        self
    }

    /// Set the initial penalty parameter.
    pub fn with_penalty_init(mut self, rho: f64) -> Self {
        self.penalty_parameter_init_value = rho;
        self
    }

    /// Enable the second-order correction step.
    pub fn with_second_order_correction(mut self) -> Self {
        self.perform_second_order_correction_step = true;
        self
    }

    /// Typed lookup by option key.
    ///
    /// Accepts the documented option names with string values; numeric
    /// options parse as f64/usize, booleans as yes/no or true/false. Used by
    /// the CLI's `--option key=value`.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), SettingsError> {
        let bad = || SettingsError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
        };
        let as_f64 = || value.parse::<f64>().map_err(|_| bad());
        let as_usize = || value.parse::<usize>().map_err(|_| bad());
        let as_u32 = || value.parse::<u32>().map_err(|_| bad());
        let as_bool = || match value.to_ascii_lowercase().as_str() {
            "yes" | "true" | "1" => Ok(true),
            "no" | "false" | "0" => Ok(false),
            _ => Err(bad()),
        };

        match key {
            "max_num_iterations" => self.max_num_iterations = as_usize()?,
            "cpu_time_limit" => self.cpu_time_limit = as_f64()?,
            "wallclock_time_limit" => self.wallclock_time_limit = as_f64()?,
            "trust_region_init_value" => self.trust_region_init_value = as_f64()?,
            "trust_region_max_value" => self.trust_region_max_value = as_f64()?,
            "trust_region_min_value" => self.trust_region_min_value = as_f64()?,
            "trust_region_ratio_decrease_tol" => {
                self.trust_region_ratio_decrease_tol = as_f64()?
            }
            "trust_region_ratio_accept_tol" => {
                self.trust_region_ratio_accept_tol = as_f64()?
            }
            "trust_region_ratio_increase_tol" => {
                self.trust_region_ratio_increase_tol = as_f64()?
            }
            "trust_region_decrease_factor" => self.trust_region_decrease_factor = as_f64()?,
            "trust_region_increase_factor" => self.trust_region_increase_factor = as_f64()?,
            "penalty_parameter_init_value" => self.penalty_parameter_init_value = as_f64()?,
            "penalty_parameter_max_value" => self.penalty_parameter_max_value = as_f64()?,
            "penalty_parameter_increase_factor" => {
                self.penalty_parameter_increase_factor = as_f64()?
            }
            "penalty_update_tol" => self.penalty_update_tol = as_f64()?,
            "penalty_iter_max" => self.penalty_iter_max = as_usize()?,
            "eps1" => self.eps1 = as_f64()?,
            "eps1_change_parm" => self.eps1_change_parm = as_f64()?,
            "eps2" => self.eps2 = as_f64()?,
            "perform_second_order_correction_step" => {
                self.perform_second_order_correction_step = as_bool()?
            }
            "opt_tol" => self.opt_tol = as_f64()?,
            "active_set_tol" => self.active_set_tol = as_f64()?,
            "opt_tol_primal_feasibility" => self.opt_tol_primal_feasibility = as_f64()?,
            "opt_tol_dual_feasibility" => self.opt_tol_dual_feasibility = as_f64()?,
            "opt_tol_complementarity" => self.opt_tol_complementarity = as_f64()?,
            "opt_tol_stationarity_feasibility" => {
                self.opt_tol_stationarity_feasibility = as_f64()?
            }
            "qp_solver_choice" => {
                self.qp_solver_choice = QpSolverChoice::parse(value).ok_or_else(|| bad())?
            }
            "qp_solver_max_num_iterations" => self.qp_solver_max_num_iterations = as_usize()?,
            "lp_solver_max_num_iterations" => self.lp_solver_max_num_iterations = as_usize()?,
            "print_level" => self.print_level = as_u32()?,
            "file_print_level" => self.file_print_level = as_u32()?,
            "output_file" => self.output_file = value.to_string(),
            _ => return Err(SettingsError::UnknownKey(key.to_string())),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let s = SqpSettings::default();
        assert_eq!(s.max_num_iterations, 3000);
        assert_eq!(s.trust_region_ratio_decrease_tol, 0.25);
        assert_eq!(s.penalty_parameter_increase_factor, 10.0);
        assert_eq!(s.qp_solver_choice, QpSolverChoice::DenseIpm);
    }

    #[test]
    fn test_typed_set() {
        let mut s = SqpSettings::default();
        s.set("max_num_iterations", "50").unwrap();
        s.set("trust_region_init_value", "2.5").unwrap();
        s.set("perform_second_order_correction_step", "yes").unwrap();
        s.set("qp_solver_choice", "qpoases").unwrap();
        assert_eq!(s.max_num_iterations, 50);
        assert_eq!(s.trust_region_init_value, 2.5);
        assert!(s.perform_second_order_correction_step);
        assert_eq!(s.qp_solver_choice, QpSolverChoice::Qpoases);
    }

    #[test]
    fn test_set_rejects_bad_input() {
        let mut s = SqpSettings::default();
        assert!(matches!(
            s.set("no_such_option", "1"),
            Err(SettingsError::UnknownKey(_))
        ));
        assert!(matches!(
            s.set("eps1", "abc"),
            Err(SettingsError::InvalidValue { .. })
        ));
    }
}
