use crate::energy::EnergyEvaluator;
use crate::error::{Result, UndefinedStatistic};
use crate::parser::TrajectoryParser;
use crate::pool::WorkerPool;
use crate::stats;
use log::{info, warn};
use nbody_common::TimeSeries;
use serde::Serialize;
use std::path::PathBuf;

pub const DEFAULT_RELATIVE_TOLERANCE: f64 = 0.01;

/// Drift of a conserved quantity relative to its first sample.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConservationReport {
    pub initial: f64,
    pub final_value: f64,
    pub absolute_errors: TimeSeries<f64>,
    pub relative_errors: TimeSeries<f64>,
    pub max_absolute: f64,
    pub max_relative: f64,
    pub mean_relative: f64,
    pub tolerance: f64,
    pub conserved: bool,
}

impl ConservationReport {
    /// Errors with `EmptySeries` for no samples, `ZeroInitialEnergy` when E₀ is exactly zero
    /// and `NonFiniteInitialEnergy` when E₀ is infinite or NaN.
    pub fn evaluate(series: &TimeSeries<f64>, relative_tolerance: f64) -> Result<Self> {
        let (_, &initial) = series.first().ok_or(UndefinedStatistic::EmptySeries)?;
        let (_, &final_value) = series.last().ok_or(UndefinedStatistic::EmptySeries)?;
        if !initial.is_finite() {
            return Err(UndefinedStatistic::NonFiniteInitialEnergy.into());
        }
        if initial == 0.0 {
            return Err(UndefinedStatistic::ZeroInitialEnergy.into());
        }

        let absolute_errors = series.map(|e| (e - initial).abs());
        let relative_errors = absolute_errors.map(|d| d / initial.abs());

        let max_absolute = absolute_errors.values().copied().fold(0.0, f64::max);
        let relative: Vec<f64> = relative_errors.values().copied().collect();
        let max_relative = relative.iter().copied().fold(0.0, f64::max);
        // f64::max skips NaN, so a non-finite sample has to fail the check explicitly
        let all_finite = relative.iter().all(|r| r.is_finite());
        let mean_relative = stats::mean(&relative).unwrap_or(0.0);

        Ok(Self {
            initial,
            final_value,
            absolute_errors,
            relative_errors,
            max_absolute,
            max_relative,
            mean_relative,
            tolerance: relative_tolerance,
            conserved: all_finite && max_relative <= relative_tolerance,
        })
    }
}

/// Population standard deviation of total energy for one time step.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TimestepSpread {
    pub dt: f64,
    pub snapshots: usize,
    pub energy_std_dev: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkippedTimestep {
    pub dt: f64,
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StabilityReport {
    /// Ascending by `dt`.
    pub spreads: Vec<TimestepSpread>,
    pub skipped: Vec<SkippedTimestep>,
}

/// Reduces each run's total-energy series to its standard deviation, keyed by `dt`.
///
/// Missing, unreadable and empty files are recorded as skipped.
pub fn energy_spread_by_timestep(
    pool: &WorkerPool,
    parser: &TrajectoryParser,
    evaluator: &EnergyEvaluator,
    runs: Vec<(f64, PathBuf)>,
) -> StabilityReport {
    let tasks: Vec<((f64, PathBuf), PathBuf)> = runs.into_iter().map(|(dt, path)| ((dt, path.clone()), path)).collect();

    let outcomes = pool.run_all(tasks, |path| -> std::result::Result<(usize, f64), String> {
        let trajectory = parser.parse_file(&path).map_err(|e| e.to_string())?;
        let energy = evaluator.total_energy_series(&trajectory);
        let values: Vec<f64> = energy.values().copied().collect();
        let spread = stats::std_dev(&values).ok_or_else(|| "no parseable snapshots".to_string())?;
        Ok((values.len(), spread))
    });

    let mut report = StabilityReport::default();
    for ((dt, path), outcome) in outcomes {
        match outcome {
            Ok((snapshots, energy_std_dev)) => {
                info!("dt = {}: energy std dev {:.6e} over {} snapshots", dt, energy_std_dev, snapshots);
                report.spreads.push(TimestepSpread { dt, snapshots, energy_std_dev });
            }
            Err(reason) => {
                warn!("Skipping dt = {} ({}): {}", dt, path.display(), reason);
                report.skipped.push(SkippedTimestep { dt, path, reason });
            }
        }
    }
    report.spreads.sort_by(|a, b| a.dt.total_cmp(&b.dt));
    report.skipped.sort_by(|a, b| a.dt.total_cmp(&b.dt));
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AnalysisError;
    use nbody_common::{ParserOptions, PhysicalConstants};

    fn series(values: &[f64]) -> TimeSeries<f64> {
        TimeSeries::from_points_keep_first(values.iter().enumerate().map(|(i, v)| (i as f64, *v)).collect())
    }

    #[test]
    fn small_drift_is_within_one_percent() {
        let energy = series(&[-10.0, -10.05, -9.98]);

        let loose = ConservationReport::evaluate(&energy, DEFAULT_RELATIVE_TOLERANCE).unwrap();
        assert_eq!(loose.initial, -10.0);
        assert_eq!(loose.final_value, -9.98);
        assert!((loose.max_relative - 0.005).abs() < 1e-12);
        assert!((loose.max_absolute - 0.05).abs() < 1e-12);
        assert!((loose.mean_relative - (0.005 + 0.002) / 3.0).abs() < 1e-12);
        assert!(loose.conserved);

        let strict = ConservationReport::evaluate(&energy, 0.001).unwrap();
        assert!(!strict.conserved);
    }

    #[test]
    fn per_sample_errors_follow_the_series() {
        let report = ConservationReport::evaluate(&series(&[4.0, 5.0, 2.0]), 0.1).unwrap();
        assert_eq!(report.absolute_errors.as_slice(), &[(0.0, 0.0), (1.0, 1.0), (2.0, 2.0)]);
        assert_eq!(report.relative_errors.as_slice(), &[(0.0, 0.0), (1.0, 0.25), (2.0, 0.5)]);
    }

    #[test]
    fn zero_initial_energy_is_undefined() {
        let err = ConservationReport::evaluate(&series(&[0.0, 1.0]), 0.01).unwrap_err();
        assert!(matches!(err, AnalysisError::Undefined(UndefinedStatistic::ZeroInitialEnergy)));

        let err = ConservationReport::evaluate(&series(&[]), 0.01).unwrap_err();
        assert!(matches!(err, AnalysisError::Undefined(UndefinedStatistic::EmptySeries)));
    }

    #[test]
    fn coincident_unsoftened_particles_are_never_conserved() {
        let err = ConservationReport::evaluate(&series(&[f64::NEG_INFINITY, -1.0]), 0.01).unwrap_err();
        assert!(matches!(err, AnalysisError::Undefined(UndefinedStatistic::NonFiniteInitialEnergy)));
        let err = ConservationReport::evaluate(&series(&[f64::NAN, -1.0]), 0.01).unwrap_err();
        assert!(matches!(err, AnalysisError::Undefined(UndefinedStatistic::NonFiniteInitialEnergy)));

        let report = ConservationReport::evaluate(&series(&[-1.0, f64::NAN, -1.0]), 0.01).unwrap();
        assert!(!report.conserved);
        let report = ConservationReport::evaluate(&series(&[-1.0, f64::NEG_INFINITY]), 0.01).unwrap();
        assert!(report.max_relative.is_infinite());
        assert!(!report.conserved);
    }

    #[test]
    fn spread_is_keyed_and_sorted_by_dt() {
        let dir = tempfile::tempdir().unwrap();
        // Two particles at rest, separation changing between snapshots
        let write_run = |name: &str, separations: &[f64]| {
            let mut text = String::new();
            for (i, d) in separations.iter().enumerate() {
                text.push_str(&format!("{};Galaxy;0;0;0\n", i as f64 * 0.1));
                text.push_str("0;0;0;0;0;0;0\n");
                text.push_str(&format!("1;{};0;0;0;0;0\n", d));
            }
            let path = dir.path().join(name);
            std::fs::write(&path, text).unwrap();
            path
        };
        let coarse = write_run("coarse.csv", &[1.0, 2.0, 1.0, 2.0]);
        let fine = write_run("fine.csv", &[1.0, 1.0, 1.0]);

        let pool = WorkerPool::new(Some(2)).unwrap();
        let parser = TrajectoryParser::new(ParserOptions::default());
        let evaluator = EnergyEvaluator::new(PhysicalConstants { g: 1.0, softening: 0.0, particle_mass: 1.0 });
        let report = energy_spread_by_timestep(
            &pool,
            &parser,
            &evaluator,
            vec![(0.1, coarse), (0.001, dir.path().join("missing.csv")), (0.01, fine)],
        );

        let dts: Vec<f64> = report.spreads.iter().map(|s| s.dt).collect();
        assert_eq!(dts, vec![0.01, 0.1]);
        assert_eq!(report.spreads[0].energy_std_dev, 0.0);
        // Energies alternate between -1 and -0.5
        assert!((report.spreads[1].energy_std_dev - 0.25).abs() < 1e-12);
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].dt, 0.001);
    }
}
