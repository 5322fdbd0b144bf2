use std::env;
use std::time::Instant;

use nalgebra::{DMatrix, DVector};
use slq_mp::problems::lti::{LtiCost, LtiSystem, TvlqrSolver};
use slq_mp::{Algorithm, Iterate, SettingsBuilder, SlqSolver};
use sysinfo::{get_current_pid, ProcessRefreshKind, System};

fn main() {
    let options = match Options::parse(env::args().skip(1)) {
        Ok(opts) => opts,
        Err(err) => {
            eprintln!("scale_probe: {err}");
            Options::print_help();
            std::process::exit(2);
        }
    };

    eprintln!("\n{}", "=".repeat(80));
    eprintln!("slq-mp Scaling Probe: Phase Throughput and Correctness");
    eprintln!("{}", "=".repeat(80));
    eprintln!();
    eprintln!("Measures wall-clock time and memory for each dispatched phase across");
    eprintln!("worker-thread counts, and verifies that every thread count produces a");
    eprintln!("trajectory identical to the single-threaded run.");
    eprintln!();
    eprintln!("Metrics:");
    eprintln!("  • wall_s: wall-clock seconds (lower is better)");
    eprintln!("  • rss_delta_kib: resident-set delta in KiB");
    eprintln!("  • status: 'passed' = matches 1-thread baseline, 'not_checked' = timing-only");
    eprintln!();

    let mut sys = System::new();
    let mut measurements = Vec::new();

    eprintln!("[1/3] Probing LQ-build phase (linearization + quadratization)...");
    measurements.extend(run_lq_build(&options, &mut sys));
    eprintln!();

    eprintln!("[2/3] Probing shot-rollout phase...");
    measurements.extend(run_shot_rollout(&options, &mut sys));
    eprintln!();

    eprintln!("[3/3] Probing full iterations (incl. parallel line search)...");
    measurements.extend(run_full_iterations(&options, &mut sys));
    eprintln!();

    print_summary(&measurements);

    if let Err(err) = options.format.write(&measurements) {
        eprintln!("scale_probe output error: {err}");
        std::process::exit(1);
    }
}

struct Options {
    format: OutputFormat,
    horizon: usize,
    max_threads: usize,
}

impl Options {
    fn parse<I, T>(mut args: I) -> Result<Self, String>
    where
        I: Iterator<Item = T>,
        T: Into<String>,
    {
        let mut format = OutputFormat::Csv;
        let mut horizon = 4_096usize;
        let mut max_threads = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);

        while let Some(arg) = args.next() {
            let arg = arg.into();
            if arg == "--help" || arg == "-h" {
                Options::print_help();
                std::process::exit(0);
            } else if let Some(value) = arg.strip_prefix("--format=") {
                format = OutputFormat::from_str(value)?;
            } else if arg == "--format" {
                let value = args
                    .next()
                    .ok_or_else(|| "missing value after --format".to_string())?
                    .into();
                format = OutputFormat::from_str(&value)?;
            } else if let Some(value) = arg.strip_prefix("--horizon=") {
                horizon = value
                    .parse::<usize>()
                    .map_err(|_| "horizon must be a positive integer".to_string())?;
            } else if let Some(value) = arg.strip_prefix("--max-threads=") {
                max_threads = value
                    .parse::<usize>()
                    .map_err(|_| "max-threads must be a positive integer".to_string())?;
            } else {
                return Err(format!("unrecognized argument '{arg}'"));
            }
        }

        if horizon < 2 {
            return Err("horizon must be at least 2".to_string());
        }
        if max_threads == 0 {
            return Err("max-threads must be at least 1".to_string());
        }
        Ok(Self {
            format,
            horizon,
            max_threads,
        })
    }

    fn print_help() {
        println!(
            "\
Usage: cargo run --bin scale_probe [-- <options>]

Options:
  --format <csv|table|json>     Output format (default: csv)
  --horizon <N>                 Trajectory stages per scenario (default: 4096)
  --max-threads <N>             Largest worker count probed (default: all cores)
  -h, --help                    Print this help message

Examples:
  cargo run --release --bin scale_probe
  cargo run --release --bin scale_probe -- --format table --horizon 8192
"
        );
    }

    fn thread_counts(&self) -> Vec<usize> {
        let mut counts = vec![1usize];
        let mut n = 2;
        while n <= self.max_threads {
            counts.push(n);
            n *= 2;
        }
        if counts.last() != Some(&self.max_threads) && self.max_threads > 1 {
            counts.push(self.max_threads);
        }
        counts
    }
}

#[derive(Copy, Clone)]
enum OutputFormat {
    Csv,
    Table,
    Json,
}

impl OutputFormat {
    fn from_str(value: &str) -> Result<Self, String> {
        match value {
            "csv" => Ok(Self::Csv),
            "table" => Ok(Self::Table),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown format '{other}'")),
        }
    }

    fn write(self, measurements: &[Measurement]) -> Result<(), String> {
        match self {
            OutputFormat::Csv => write_csv(measurements),
            OutputFormat::Table => write_table(measurements),
            OutputFormat::Json => write_json(measurements),
        }
    }
}

#[derive(Clone)]
struct Measurement {
    scenario: &'static str,
    size_desc: String,
    wall_s: f64,
    rss_delta_kib: u64,
    verification_status: VerificationStatus,
}

#[derive(Clone, Copy, PartialEq)]
enum VerificationStatus {
    NotChecked,
    Passed,
    Failed,
}

impl VerificationStatus {
    fn label(&self) -> &'static str {
        match self {
            VerificationStatus::NotChecked => "not_checked",
            VerificationStatus::Passed => "passed",
            VerificationStatus::Failed => "failed",
        }
    }
}

fn probe_system(nx: usize, nu: usize) -> LtiSystem {
    let mut a = DMatrix::zeros(nx, nx);
    for i in 0..nx {
        a[(i, i)] = 0.9;
        if i + 1 < nx {
            a[(i, i + 1)] = 0.05;
        }
    }
    let mut b = DMatrix::zeros(nx, nu);
    for j in 0..nu {
        b[(nx - 1 - j, j)] = 0.1;
    }
    LtiSystem::new(a, b)
}

fn probe_solver(horizon: usize, n_threads: usize) -> SlqSolver<LtiSystem, LtiCost> {
    let nx = 8;
    let nu = 2;
    let settings = SettingsBuilder::new()
        .n_threads(n_threads)
        .shot_length(16)
        .algorithm(Algorithm::MultipleShooting)
        .build()
        .expect("probe settings are valid");
    let initial = Iterate::constant(DVector::from_element(nx, 0.5), nu, horizon);
    SlqSolver::new(probe_system(nx, nu), LtiCost::identity(nx, nu), settings, initial)
        .expect("probe problem is well-formed")
}

fn measure<F>(scenario: &'static str, size_desc: String, sys: &mut System, compute: F) -> Measurement
where
    F: FnOnce() -> VerificationStatus,
{
    let before = rss_kib(sys);
    let start = Instant::now();
    let status = compute();
    let duration = start.elapsed();
    let after = rss_kib(sys);

    Measurement {
        scenario,
        size_desc,
        wall_s: duration.as_secs_f64(),
        rss_delta_kib: after.saturating_sub(before),
        verification_status: status,
    }
}

fn run_lq_build(options: &Options, sys: &mut System) -> Vec<Measurement> {
    let horizon = options.horizon;
    // 1-thread baseline for bit-exact comparison.
    let baseline = {
        let solver = probe_solver(horizon, 1);
        solver.dispatch_lq_build(0, horizon - 1);
        let a = solver.backend().lq().stage(horizon / 2).a.clone();
        solver.shutdown();
        a
    };

    options
        .thread_counts()
        .into_iter()
        .map(|n_threads| {
            eprint!("      threads={n_threads} ... ");
            let m = measure("lq_build", format!("threads={n_threads}"), sys, || {
                let solver = probe_solver(horizon, n_threads);
                solver.dispatch_lq_build(0, horizon - 1);
                let status = if solver.backend().lq().stage(horizon / 2).a == baseline {
                    VerificationStatus::Passed
                } else {
                    VerificationStatus::Failed
                };
                solver.shutdown();
                status
            });
            eprintln!("{:.3}s [{}]", m.wall_s, m.verification_status.label());
            m
        })
        .collect()
}

fn run_shot_rollout(options: &Options, sys: &mut System) -> Vec<Measurement> {
    let horizon = options.horizon;
    let baseline = {
        let solver = probe_solver(horizon, 1);
        solver
            .dispatch_shot_rollout(0, horizon - 1)
            .expect("probe rollout is finite");
        let d = solver.backend().lq().defect_norm();
        solver.shutdown();
        d
    };

    options
        .thread_counts()
        .into_iter()
        .map(|n_threads| {
            eprint!("      threads={n_threads} ... ");
            let m = measure("shot_rollout", format!("threads={n_threads}"), sys, || {
                let solver = probe_solver(horizon, n_threads);
                solver
                    .dispatch_shot_rollout(0, horizon - 1)
                    .expect("probe rollout is finite");
                let status = if solver.backend().lq().defect_norm() == baseline {
                    VerificationStatus::Passed
                } else {
                    VerificationStatus::Failed
                };
                solver.shutdown();
                status
            });
            eprintln!("{:.3}s [{}]", m.wall_s, m.verification_status.label());
            m
        })
        .collect()
}

fn run_full_iterations(options: &Options, sys: &mut System) -> Vec<Measurement> {
    let horizon = options.horizon.min(2_048);
    let tvlqr = TvlqrSolver::new();
    let baseline = {
        let solver = probe_solver(horizon, 1);
        for _ in 0..3 {
            solver
                .run_iteration(&tvlqr)
                .expect("probe iteration succeeds");
        }
        let it = solver.iterate();
        solver.shutdown();
        it
    };

    options
        .thread_counts()
        .into_iter()
        .map(|n_threads| {
            eprint!("      threads={n_threads} ... ");
            let m = measure("full_iteration_x3", format!("threads={n_threads}"), sys, || {
                let solver = probe_solver(horizon, n_threads);
                for _ in 0..3 {
                    solver
                        .run_iteration(&tvlqr)
                        .expect("probe iteration succeeds");
                }
                let status = if solver.iterate() == baseline {
                    VerificationStatus::Passed
                } else {
                    VerificationStatus::Failed
                };
                solver.shutdown();
                status
            });
            eprintln!("{:.3}s [{}]", m.wall_s, m.verification_status.label());
            m
        })
        .collect()
}

fn print_summary(measurements: &[Measurement]) {
    let failed = measurements
        .iter()
        .filter(|m| m.verification_status == VerificationStatus::Failed)
        .count();
    eprintln!("{}", "=".repeat(80));
    if failed == 0 {
        eprintln!("✓ All thread counts reproduced the single-threaded result.");
    } else {
        eprintln!("✗ {failed} scenario(s) diverged from the single-threaded baseline.");
    }
    eprintln!("{}", "=".repeat(80));
    eprintln!();
}

fn write_csv(measurements: &[Measurement]) -> Result<(), String> {
    println!("scenario,size_desc,wall_s,rss_delta_kib,verification_status");
    for m in measurements {
        println!(
            "{},{},{:.3},{},{}",
            m.scenario,
            m.size_desc,
            m.wall_s,
            m.rss_delta_kib,
            m.verification_status.label(),
        );
    }
    Ok(())
}

fn write_table(measurements: &[Measurement]) -> Result<(), String> {
    let mut col1 = "scenario".len();
    let mut col2 = "size".len();
    for m in measurements {
        col1 = col1.max(m.scenario.len());
        col2 = col2.max(m.size_desc.len());
    }

    println!(
        "{:<col1$}  {:<col2$}  {:>12}  {:>14}  {:>12}",
        "scenario",
        "size",
        "wall_s",
        "rss_delta_kib",
        "status",
        col1 = col1,
        col2 = col2
    );
    println!(
        "{:-<col1$}  {:-<col2$}  {:-<12}  {:-<14}  {:-<12}",
        "",
        "",
        "",
        "",
        "",
        col1 = col1,
        col2 = col2
    );
    for m in measurements {
        println!(
            "{:<col1$}  {:<col2$}  {:>12.3}  {:>14}  {:>12}",
            m.scenario,
            m.size_desc,
            m.wall_s,
            m.rss_delta_kib,
            m.verification_status.label(),
            col1 = col1,
            col2 = col2
        );
    }
    Ok(())
}

fn write_json(measurements: &[Measurement]) -> Result<(), String> {
    println!("[");
    for (idx, m) in measurements.iter().enumerate() {
        println!(
            "  {{\"scenario\":\"{}\",\"size\":\"{}\",\"wall_s\":{:.3},\"rss_delta_kib\":{},\"verification\":\"{}\"}}{}",
            m.scenario,
            m.size_desc,
            m.wall_s,
            m.rss_delta_kib,
            m.verification_status.label(),
            if idx + 1 == measurements.len() { "" } else { "," }
        );
    }
    println!("]");
    Ok(())
}

fn rss_kib(sys: &mut System) -> u64 {
    sys.refresh_processes_specifics(ProcessRefreshKind::new());
    if let Some(process) = get_current_pid().ok().and_then(|pid| sys.process(pid)) {
        process.memory()
    } else {
        0
    }
}
