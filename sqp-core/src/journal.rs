//! Iteration journal: console table and optional file log.
//!
//! Console output is gated by `print_level` (0 silent, 1 final summary,
//! 2 iteration table). The file journal, when `output_file` is set, uses
//! `file_print_level` with the same meaning and lives from `initialize`
//! until the solver is dropped.

use std::fs::File;
use std::io::{BufWriter, Write};

use crate::settings::SqpSettings;
use crate::stats::Stats;
use crate::status::{ExitFlag, KktStatus};

const DIVIDER: &str =
    "=========================================================================================";

pub struct Journal {
    print_level: u32,
    file_print_level: u32,
    file: Option<BufWriter<File>>,
}

impl Journal {
    /// Open console and (if configured) file journals.
    pub fn open(settings: &SqpSettings) -> Self {
        let file = if settings.output_file.is_empty() {
            None
        } else {
            match File::create(&settings.output_file) {
                Ok(f) => Some(BufWriter::new(f)),
                Err(e) => {
                    log::warn!(
                        "could not open output file '{}': {}",
                        settings.output_file,
                        e
                    );
                    None
                }
            }
        };
        Self {
            print_level: settings.print_level,
            file_print_level: settings.file_print_level,
            file,
        }
    }

    fn emit(&mut self, level: u32, line: &str) {
        if self.print_level >= level {
            println!("{}", line);
        }
        if self.file_print_level >= level {
            if let Some(f) = self.file.as_mut() {
                let _ = writeln!(f, "{}", line);
            }
        }
    }

    /// Column header for the iteration table.
    pub fn header(&mut self) {
        self.emit(2, DIVIDER);
        self.emit(
            2,
            &format!(
                "{:>5} {:>18} {:>10} {:>10} {:>10} {:>10} {:>8}",
                "iter", "f", "||p||", "infea", "delta", "rho", "qp_iter"
            ),
        );
        self.emit(2, DIVIDER);
    }

    /// One row of the iteration table; the header repeats every ten rows.
    pub fn iteration(
        &mut self,
        iter: usize,
        obj: f64,
        norm_p: f64,
        infea: f64,
        delta: f64,
        rho: f64,
        qp_iter: usize,
    ) {
        if iter % 10 == 0 {
            self.header();
        }
        self.emit(
            2,
            &format!(
                "{:>5} {:>18.10e} {:>10.3e} {:>10.3e} {:>10.3e} {:>10.3e} {:>8}",
                iter, obj, norm_p, infea, delta, rho, qp_iter
            ),
        );
    }

    /// Final summary block.
    pub fn final_summary(
        &mut self,
        exit_flag: ExitFlag,
        num_vars: usize,
        num_cons: usize,
        obj: f64,
        infea: f64,
        norm_p: f64,
        kkt: &KktStatus,
        stats: &Stats,
    ) {
        self.emit(1, DIVIDER);
        self.emit(1, &format!("Exit status:                  {}", exit_flag));
        self.emit(1, &format!("Number of variables:          {}", num_vars));
        self.emit(1, &format!("Number of constraints:        {}", num_cons));
        self.emit(1, &format!("Iterations:                   {}", stats.iter));
        self.emit(1, &format!("QP solver iterations:         {}", stats.qp_iter));
        self.emit(1, &format!("Penalty trials (succ/fail):   {} ({}/{})",
            stats.penalty_change_trial, stats.penalty_change_succ, stats.penalty_change_fail));
        self.emit(1, &format!("Final objective:              {:.16e}", obj));
        self.emit(
            1,
            &format!("Primal feasibility violation: {:.16e}", kkt.primal_violation),
        );
        self.emit(
            1,
            &format!("Dual feasibility violation:   {:.16e}", kkt.dual_violation),
        );
        self.emit(
            1,
            &format!("Complementarity violation:    {:.16e}", kkt.compl_violation),
        );
        self.emit(
            1,
            &format!("Stationarity violation:       {:.16e}", kkt.stationarity_violation),
        );
        self.emit(1, &format!("||p_k||:                      {:.16e}", norm_p));
        self.emit(1, &format!("||c_k||:                      {:.16e}", infea));
        self.emit(1, DIVIDER);
    }

    pub fn flush(&mut self) {
        if let Some(f) = self.file.as_mut() {
            let _ = f.flush();
        }
    }
}

impl Drop for Journal {
    fn drop(&mut self) {
        self.flush();
    }
}
