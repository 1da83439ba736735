//! CLI for running the SL1QP solver on built-in test problems.

mod test_problems;

use anyhow::{anyhow, bail, Result};
use clap::{Parser, Subcommand};
use sqp_core::{ExitFlag, SqpSettings, SqpSolver};
use std::time::Instant;

#[derive(Parser)]
#[command(name = "sqp-bench")]
#[command(about = "Run the SL1QP solver on built-in test problems")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Solve one problem from the registry
    Solve {
        /// Problem name (see `list`)
        problem: String,

        /// Maximum outer iterations
        #[arg(long)]
        max_iter: Option<usize>,

        /// Initial trust-region radius
        #[arg(long)]
        trust_init: Option<f64>,

        /// Initial penalty parameter
        #[arg(long)]
        penalty_init: Option<f64>,

        /// Enable the second-order correction step
        #[arg(long)]
        soc: bool,

        /// Raw option override, repeatable: --option key=value
        #[arg(long = "option", value_name = "KEY=VALUE")]
        options: Vec<String>,

        /// Print the iteration table
        #[arg(long, short)]
        verbose: bool,
    },

    /// List the problem registry
    List,

    /// Solve every problem and compare against expected outcomes
    Smoke {
        /// Maximum outer iterations per problem
        #[arg(long, default_value = "3000")]
        max_iter: usize,
    },
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::List => {
            for p in test_problems::registry() {
                println!("{:<16} {}", p.name, p.description);
            }
            Ok(())
        }
        Commands::Solve {
            problem,
            max_iter,
            trust_init,
            penalty_init,
            soc,
            options,
            verbose,
        } => {
            let prob = test_problems::find(&problem)
                .ok_or_else(|| anyhow!("unknown problem '{}' (try `list`)", problem))?;

            let mut settings = if verbose {
                SqpSettings::verbose()
            } else {
                SqpSettings::default()
            };
            if let Some(it) = max_iter {
                settings.max_num_iterations = it;
            }
            if let Some(d) = trust_init {
                settings.trust_region_init_value = d;
            }
            if let Some(r) = penalty_init {
                settings.penalty_parameter_init_value = r;
            }
            if soc {
                settings.perform_second_order_correction_step = true;
            }
            for opt in &options {
                let (key, value) = opt
                    .split_once('=')
                    .ok_or_else(|| anyhow!("expected key=value, got '{}'", opt))?;
                settings
                    .set(key, value)
                    .map_err(|e| anyhow!("bad option: {}", e))?;
            }

            let mut solver = SqpSolver::new(settings);
            solver.initialize((prob.builder)(), prob.name)?;

            let start = Instant::now();
            let report = solver.optimize()?;
            let elapsed = start.elapsed();

            println!("problem:    {}", prob.name);
            println!("status:     {}", report.exit_flag);
            println!("objective:  {:.10e}", report.obj_value);
            println!("infeas:     {:.3e}", report.infea_measure);
            println!("x:          {:?}", report.x);
            println!(
                "iters:      {} outer, {} QP",
                report.stats.iter, report.stats.qp_iter
            );
            println!("time:       {:.1} ms", elapsed.as_secs_f64() * 1e3);
            Ok(())
        }
        Commands::Smoke { max_iter } => {
            let mut failures = 0;
            for prob in test_problems::registry() {
                let settings = SqpSettings::default().with_max_iterations(max_iter);
                let mut solver = SqpSolver::new(settings);
                solver.initialize((prob.builder)(), prob.name)?;
                let report = solver.optimize()?;

                let status_ok = report.exit_flag == prob.expected_status;
                let obj_ok = match prob.expected_objective {
                    Some(expected) if report.exit_flag == ExitFlag::Optimal => {
                        (report.obj_value - expected).abs() < 1e-3 * (1.0 + expected.abs())
                    }
                    _ => true,
                };
                let verdict = if status_ok && obj_ok { "ok" } else { "FAIL" };
                if verdict == "FAIL" {
                    failures += 1;
                }
                println!(
                    "{:<16} {:<6} status={:?} f={:.6e} iters={}",
                    prob.name, verdict, report.exit_flag, report.obj_value, report.stats.iter
                );
            }
            if failures > 0 {
                bail!("{} problem(s) failed", failures);
            }
            Ok(())
        }
    }
}
