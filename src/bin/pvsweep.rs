use anyhow::{format_err, Result};
use clap::{Args, Parser, Subcommand};
use num_complex::Complex64;
use pvsweep::debug::format_polar_vec;
use pvsweep::export::{summary_text, write_all};
use pvsweep::{
    load_case, radial_case, Alg, CancelToken, Contingency, ContingencyAnalysis, LoadModel,
    PFOpt, PfOutcome, PowerFlow, PvConfig, RunPF, ScalingMode, MPC,
};
use std::path::PathBuf;

/// PV curve tracing and contingency voltage stability analysis.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Trace PV curves for the base case and each contingency.
    Sweep(SweepArgs),

    /// Power Flow
    #[clap(name = "pf")]
    PowerFlow(PfArgs),
}

#[derive(Args)]
struct CaseArgs {
    /// MATPOWER JSON case file.
    input: Option<PathBuf>,

    /// Use a generated radial network with this many buses.
    #[arg(long, conflicts_with = "input")]
    radial: Option<usize>,
}

#[derive(Args)]
struct SweepArgs {
    #[command(flatten)]
    case: CaseArgs,

    /// TOML analysis configuration.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Source buses (comma separated).
    #[arg(long, value_delimiter = ',')]
    sources: Vec<usize>,

    /// Sink buses (comma separated).
    #[arg(long, value_delimiter = ',')]
    sinks: Vec<usize>,

    /// Bus whose voltage is traced.
    #[arg(long)]
    monitor: Option<usize>,

    /// Which loads take up the transfer.
    #[arg(long)]
    mode: Option<ScalingMode>,

    #[arg(long)]
    load_model: Option<LoadModel>,

    /// First transfer increment (MW).
    #[arg(long)]
    initial_step: Option<f64>,

    /// Smallest transfer increment (MW).
    #[arg(long)]
    min_step: Option<f64>,

    /// Maximum cumulative transfer (MW).
    #[arg(long)]
    max_transfer: Option<f64>,

    /// Branch outage written from_to, may be repeated.
    #[arg(long = "contingency")]
    contingencies: Vec<Contingency>,

    /// Ignore generator reactive power limits.
    #[arg(long, default_value_t = false)]
    no_q_limits: bool,

    /// Number of critical contingencies to report.
    #[arg(long)]
    critical: Option<usize>,

    /// Directory for CSV and JSON results.
    #[arg(short, long)]
    output: Option<PathBuf>,
}

#[derive(Args)]
struct PfArgs {
    #[command(flatten)]
    case: CaseArgs,

    /// AC power flow algorithm.
    #[arg(long)]
    pub alg: Option<Alg>,

    /// Termination tolerance on per unit P & Q mismatch.
    #[arg(long)]
    pub tol: Option<f64>,

    /// Maximum number of iterations.
    #[arg(long)]
    pub max_it: Option<usize>,

    /// Enforce gen reactive power limits at expense of |V|.
    #[arg(long, default_value_t = false)]
    pub qlim: bool,
}

fn main() {
    env_logger::Builder::from_default_env()
        .format_level(false)
        .format_target(false)
        .format_timestamp(None)
        .init();

    let cli = Cli::parse();

    let result = match &cli.command {
        Commands::Sweep(args) => sweep(args),
        Commands::PowerFlow(args) => power_flow(args),
    };
    match result {
        Ok(_) => {
            std::process::exit(0);
        }
        Err(err) => {
            eprintln!("error: {}", err);
            std::process::exit(2);
        }
    }
}

/// Loads the case named on the command line, falling back to `config_case`.
fn read_case(args: &CaseArgs, config_case: Option<&PathBuf>, sources: &[usize], sinks: &[usize]) -> Result<MPC> {
    if let Some(nb) = args.radial {
        let sources = if sources.is_empty() { vec![1] } else { sources.to_vec() };
        let sinks = if sinks.is_empty() { vec![nb] } else { sinks.to_vec() };
        return Ok(radial_case(nb, &sources, &sinks, Complex64::new(0.01, 0.1)));
    }
    match args.input.as_ref().or(config_case) {
        Some(path) => load_case(path),
        None => Err(format_err!("no case given: pass a case file, --radial or set `case` in the config")),
    }
}

fn sweep(args: &SweepArgs) -> Result<()> {
    let mut cfg = match &args.config {
        Some(path) => PvConfig::load(path)?,
        None => PvConfig::default(),
    };

    // Command line values override the file.
    if !args.sources.is_empty() {
        cfg.transfer.sources = args.sources.clone();
    }
    if !args.sinks.is_empty() {
        cfg.transfer.sinks = args.sinks.clone();
    }
    if let Some(mode) = args.mode {
        cfg.transfer.mode = mode;
    }
    if let Some(model) = args.load_model {
        cfg.load_model = model;
    }
    if let Some(step) = args.initial_step {
        cfg.step.initial_step = step;
    }
    if let Some(step) = args.min_step {
        cfg.step.min_step = step;
    }
    if args.max_transfer.is_some() {
        cfg.step.max_transfer = args.max_transfer;
    }
    if !args.contingencies.is_empty() {
        cfg.analysis.contingencies = args.contingencies.clone();
    }
    if args.no_q_limits {
        cfg.solver.enforce_q_limits = false;
    }
    if let Some(n) = args.critical {
        cfg.analysis.critical_scenarios = n;
    }

    let mut mpc = read_case(&args.case, cfg.case.as_ref(), &cfg.transfer.sources, &cfg.transfer.sinks)?;
    if args.case.radial.is_some() {
        if cfg.transfer.sources.is_empty() {
            cfg.transfer.sources = vec![1];
        }
        if cfg.transfer.sinks.is_empty() {
            cfg.transfer.sinks = vec![mpc.bus.len()];
        }
    }
    cfg.transfer.monitor = match args.monitor {
        Some(bus) => bus,
        None if cfg.transfer.monitor == 0 => cfg
            .transfer
            .sinks
            .first()
            .copied()
            .ok_or_else(|| format_err!("no monitored bus given"))?,
        None => cfg.transfer.monitor,
    };

    cfg.validate()?;
    cfg.validate_for(&mpc)?;
    cfg.apply_load_model(&mut mpc);

    let sweep = cfg.sweep_options();
    let analysis = ContingencyAnalysis {
        base: &mpc,
        transfer: &cfg.transfer,
        sweep: &sweep,
        run_base_to_completion: cfg.analysis.run_base_to_completion,
    };
    let set = analysis.run(&cfg.analysis.contingencies, &RunPF::new(), &CancelToken::new());

    print!("{}", summary_text(&set, cfg.analysis.critical_scenarios));

    if let Some(dir) = &args.output {
        for path in write_all(dir, &set)? {
            println!("wrote {}", path.display());
        }
    }
    Ok(())
}

fn power_flow(args: &PfArgs) -> Result<()> {
    let mpc = read_case(&args.case, None, &[], &[])?;

    let mut opt = PFOpt::default();
    if let Some(alg) = args.alg {
        opt.algorithm = alg;
        opt.max_it = PFOpt::default_max_it(alg);
    }
    if let Some(tol) = args.tol {
        opt.tolerance = tol;
    }
    if let Some(max_it) = args.max_it {
        opt.max_it = max_it;
    }
    opt.enforce_q_limits = args.qlim;

    match RunPF::new().solve(&mpc, &opt, None) {
        PfOutcome::Converged(solution) => {
            println!("converged in {} iterations", solution.iterations);
            println!("{}", format_polar_vec(&solution.v));
            Ok(())
        }
        PfOutcome::Failed { reason } => Err(format_err!("power flow did not succeed: {}", reason)),
    }
}
