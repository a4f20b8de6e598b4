use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use env_logger::{Builder, Env};
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, info, warn};
use nbody_common::AnalysisConfig;
use nbody_diagnostics::aggregate::{RealizationAggregator, RunOutcome, SimulationRun};
use nbody_diagnostics::error_stats::{energy_spread_by_timestep, ConservationReport};
use nbody_diagnostics::energy::EnergyEvaluator;
use nbody_diagnostics::oscillator::error_vs_timestep;
use nbody_diagnostics::output;
use nbody_diagnostics::parser::{ParseReport, Trajectory, TrajectoryParser};
use nbody_diagnostics::pool::WorkerPool;
use nbody_diagnostics::structure::{crossing_time, half_mass_series};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Instant;

const DEFAULT_CONFIG: &str = "analysis.toml";

/// Diagnostics for N-body trajectory files
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the analysis config (defaults to analysis.toml when present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Worker thread count, overriding batch.workers
    #[arg(short, long, global = true)]
    workers: Option<usize>,

    /// Prefix for output files, overriding output.base_filename
    #[arg(short, long, global = true)]
    output: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Energy components and conservation of one trajectory
    Energy {
        /// Trajectory file
        #[arg(short, long)]
        input: PathBuf,
    },
    /// Half-mass radius series and crossing time of one trajectory
    HalfMass {
        /// Trajectory file
        #[arg(short, long)]
        input: PathBuf,
    },
    /// Ensemble half-mass statistics over all particle counts and realizations
    Batch,
    /// Total-energy spread for each configured time step
    Timestep,
    /// Integrator error against the analytical damped oscillator
    Oscillator,
}

#[derive(Serialize)]
struct EnergySummary<'a> {
    source: &'a Path,
    snapshots: usize,
    parse: &'a ParseReport,
    conservation: Option<ConservationReport>,
}

#[derive(Serialize)]
struct HalfMassSummary<'a> {
    source: &'a Path,
    snapshots: usize,
    parse: &'a ParseReport,
    crossing_time: Option<f64>,
    final_half_mass: Option<f64>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    Builder::from_env(Env::default().default_filter_or("info")).init();

    let config = load_config(args.config.as_deref())?;
    let base = args.output.clone().unwrap_or_else(|| config.output.base_filename.clone());
    let workers = args.workers.or(config.batch.workers);

    let start_time = Instant::now();
    match args.command {
        Command::Energy { input } => run_energy(&config, &base, &input)?,
        Command::HalfMass { input } => run_half_mass(&config, &base, &input)?,
        Command::Batch => run_batch(&config, &base, workers)?,
        Command::Timestep => run_timestep(&config, &base, workers)?,
        Command::Oscillator => run_oscillator(&config, &base, workers)?,
    }
    info!("Analysis finished in {:.3} seconds.", start_time.elapsed().as_secs_f64());
    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<AnalysisConfig> {
    match path {
        Some(path) => AnalysisConfig::load(path),
        None if Path::new(DEFAULT_CONFIG).exists() => AnalysisConfig::load(DEFAULT_CONFIG),
        None => {
            info!("No {} found, using default configuration.", DEFAULT_CONFIG);
            Ok(AnalysisConfig::default())
        }
    }
}

fn build_pool(workers: Option<usize>) -> Result<WorkerPool> {
    let pool = WorkerPool::new(workers).context("Failed to start worker pool")?;
    info!("Using {} worker threads.", pool.workers());
    Ok(pool)
}

fn log_trajectory(input: &Path, trajectory: &Trajectory) {
    let mut times = trajectory.times();
    let first = times.next().unwrap_or_default();
    let last = times.last().unwrap_or(first);
    info!("{}: {} snapshots from t = {} to t = {}", input.display(), trajectory.len(), first, last);
    if !trajectory.report.is_clean() {
        warn!("{} had input problems: {:?}", input.display(), trajectory.report);
    }
}

fn run_energy(config: &AnalysisConfig, base: &str, input: &Path) -> Result<()> {
    let parser = TrajectoryParser::new(config.parser_options());
    let trajectory = parser
        .parse_file(input)
        .with_context(|| format!("Failed to load trajectory '{}'", input.display()))?;
    if trajectory.is_empty() {
        warn!("{} contains no snapshots. Nothing to analyse.", input.display());
        return Ok(());
    }
    log_trajectory(input, &trajectory);

    let evaluator = EnergyEvaluator::new(config.physical_constants());
    debug!("Physical constants: {:?}", evaluator.constants());
    let energy = evaluator.energy_series(&trajectory);
    let total = energy.map(|e| e.total);

    let conservation = match ConservationReport::evaluate(&total, config.conservation.relative_tolerance) {
        Ok(report) => {
            info!(
                "E0 = {:.6}, final = {:.6}, max relative error = {:.4}% ({})",
                report.initial,
                report.final_value,
                report.max_relative * 100.0,
                if report.conserved { "conserved" } else { "NOT conserved" }
            );
            Some(report)
        }
        Err(e) => {
            warn!("Conservation statistics unavailable: {}", e);
            None
        }
    };

    if config.output.save_series {
        output::write_energy_series(Path::new(&format!("{}_energy.csv", base)), &energy)?;
    }
    let summary = EnergySummary {
        source: input,
        snapshots: trajectory.len(),
        parse: &trajectory.report,
        conservation,
    };
    output::write_summary(base, "energy", config.output.format, &summary)?;
    Ok(())
}

fn run_half_mass(config: &AnalysisConfig, base: &str, input: &Path) -> Result<()> {
    let parser = TrajectoryParser::new(config.parser_options());
    let trajectory = parser
        .parse_file(input)
        .with_context(|| format!("Failed to load trajectory '{}'", input.display()))?;
    if trajectory.is_empty() {
        warn!("{} contains no snapshots. Nothing to analyse.", input.display());
        return Ok(());
    }
    log_trajectory(input, &trajectory);

    let series = half_mass_series(&trajectory);
    let crossing = crossing_time(&series, &config.crossing_criteria());
    match crossing {
        Some(t) => info!("Half-mass radius first exceeds {} at t = {}", config.structure.crossing_threshold, t),
        None => info!("Half-mass radius never exceeds {} after warm-up", config.structure.crossing_threshold),
    }

    if config.output.save_series {
        output::write_scalar_series(Path::new(&format!("{}_half_mass.csv", base)), "r_hm", &series)?;
    }
    let summary = HalfMassSummary {
        source: input,
        snapshots: trajectory.len(),
        parse: &trajectory.report,
        crossing_time: crossing,
        final_half_mass: series.last().map(|(_, r)| *r),
    };
    output::write_summary(base, "half_mass", config.output.format, &summary)?;
    Ok(())
}

fn run_batch(config: &AnalysisConfig, base: &str, workers: Option<usize>) -> Result<()> {
    let counts = config.batch.particle_count_values();
    if counts.is_empty() {
        anyhow::bail!("No particle counts configured (batch.particle_counts or batch.particle_count_range).");
    }
    let runs: Vec<SimulationRun> = counts
        .iter()
        .flat_map(|&n| {
            (0..config.batch.realizations).map(move |j| SimulationRun::new(n, j, config.batch.resolve_path(n, j)))
        })
        .collect();
    info!(
        "Batch: {} particle counts x {} realizations = {} runs",
        counts.len(),
        config.batch.realizations,
        runs.len()
    );

    let pool = build_pool(workers)?;
    let aggregator =
        RealizationAggregator::new(TrajectoryParser::new(config.parser_options()), config.crossing_criteria());

    let progress_bar = ProgressBar::new(runs.len() as u64);
    progress_bar.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} runs ({percent}%) [{eta}] {msg}")?
            .progress_chars("#>-"),
    );
    let report = aggregator.run_batch_with_progress(&pool, runs, |run, outcome| {
        if let RunOutcome::Skipped(_) = outcome {
            progress_bar.set_message(format!("skipped {}", run.path.display()));
        }
        progress_bar.inc(1);
    });
    progress_bar.finish_with_message("done");

    info!(
        "{} runs contributed, {} skipped, {} of {} groups skipped",
        report.total_contributed(),
        report.total_skipped(),
        report.groups.iter().filter(|g| g.is_skipped()).count(),
        report.groups.len()
    );

    if config.output.save_series {
        output::write_ensemble_series(base, &report)?;
        output::write_pairs(Path::new(&format!("{}_slopes.csv", base)), ["n", "slope"], &report.slopes())?;
        output::write_pairs(
            Path::new(&format!("{}_crossing_times.csv", base)),
            ["n", "crossing_time"],
            &report.crossing_times(),
        )?;
    }
    output::write_summary(base, "batch", config.output.format, &report)?;
    Ok(())
}

fn run_timestep(config: &AnalysisConfig, base: &str, workers: Option<usize>) -> Result<()> {
    let runs: Vec<(f64, PathBuf)> =
        config.timestep.dts.iter().map(|&dt| (dt, config.timestep.resolve_path(dt))).collect();
    let pool = build_pool(workers)?;
    let parser = TrajectoryParser::new(config.parser_options());
    let evaluator = EnergyEvaluator::new(config.physical_constants());

    let report = energy_spread_by_timestep(&pool, &parser, &evaluator, runs);
    info!("{} time steps analysed, {} skipped", report.spreads.len(), report.skipped.len());

    if config.output.save_series {
        let rows: Vec<(f64, f64)> = report.spreads.iter().map(|s| (s.dt, s.energy_std_dev)).collect();
        output::write_pairs(Path::new(&format!("{}_energy_spread.csv", base)), ["dt", "energy_std_dev"], &rows)?;
    }
    output::write_summary(base, "timestep", config.output.format, &report)?;
    Ok(())
}

fn run_oscillator(config: &AnalysisConfig, base: &str, workers: Option<usize>) -> Result<()> {
    let pool = build_pool(workers)?;
    let results = error_vs_timestep(&pool, &config.oscillator).context("Oscillator comparison failed")?;

    for integrator in &results {
        info!(
            "{}: {} time steps compared, {} files missing",
            integrator.integrator,
            integrator.errors.len(),
            integrator.missing.len()
        );
        if config.output.save_series {
            let rows: Vec<(f64, f64)> = integrator.errors.iter().map(|e| (e.dt, e.mse)).collect();
            let path = format!("{}_{}_mse.csv", base, integrator.integrator);
            output::write_pairs(Path::new(&path), ["dt", "mse"], &rows)?;
        }
    }
    output::write_summary(base, "oscillator", config.output.format, &results)?;
    Ok(())
}
