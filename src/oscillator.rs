//! Integrator validation against the analytical under-damped oscillator.
//!
//! Each integrator run is a `t;pos[;vel]` CSV with a header row. The numeric
//! positions are compared to x(t) = A·e^(−γt/2m)·cos(ω′t) with
//! ω′ = √(k/m − γ²/4m²).

use crate::error::{AnalysisError, Result};
use crate::pool::WorkerPool;
use log::{debug, info, warn};
use nbody_common::OscillatorConfig;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OscillatorParams {
    pub stiffness: f64,
    pub damping: f64,
    pub mass: f64,
    pub amplitude: f64,
}

impl From<&OscillatorConfig> for OscillatorParams {
    fn from(config: &OscillatorConfig) -> Self {
        Self {
            stiffness: config.stiffness,
            damping: config.damping,
            mass: config.mass,
            amplitude: config.amplitude,
        }
    }
}

/// Closed-form solution for one set of under-damped parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnalyticalOscillator {
    params: OscillatorParams,
    decay_rate: f64,
    angular_frequency: f64,
}

impl AnalyticalOscillator {
    /// Fails unless `mass > 0` and the system is strictly under-damped.
    pub fn new(params: OscillatorParams) -> Result<Self> {
        if !(params.mass > 0.0) {
            return Err(AnalysisError::InvalidInput(format!("oscillator mass must be positive, got {}", params.mass)));
        }
        let omega_sq = params.stiffness / params.mass
            - params.damping * params.damping / (4.0 * params.mass * params.mass);
        if !(omega_sq > 0.0) {
            return Err(AnalysisError::InvalidInput(format!(
                "oscillator is not under-damped (k = {}, gamma = {}, m = {})",
                params.stiffness, params.damping, params.mass
            )));
        }
        Ok(Self {
            params,
            decay_rate: params.damping / (2.0 * params.mass),
            angular_frequency: omega_sq.sqrt(),
        })
    }

    pub fn angular_frequency(&self) -> f64 {
        self.angular_frequency
    }

    pub fn position(&self, t: f64) -> f64 {
        self.params.amplitude * (-self.decay_rate * t).exp() * (self.angular_frequency * t).cos()
    }
}

pub fn analytical_position(t: f64, params: OscillatorParams) -> Result<f64> {
    Ok(AnalyticalOscillator::new(params)?.position(t))
}

/// Mean of squared differences; `None` for empty or mismatched inputs.
pub fn mean_squared_error(numeric: &[f64], analytical: &[f64]) -> Option<f64> {
    if numeric.is_empty() || numeric.len() != analytical.len() {
        return None;
    }
    let sum: f64 = numeric.iter().zip(analytical).map(|(a, b)| (a - b) * (a - b)).sum();
    Some(sum / numeric.len() as f64)
}

/// One row of an integrator output file. Extra columns are ignored.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct OscillatorSample {
    pub t: f64,
    pub pos: f64,
}

pub fn read_samples<P: AsRef<Path>>(path: P) -> Result<Vec<OscillatorSample>> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|e| AnalysisError::from_io(path, e))?;
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b';')
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(file);

    let mut samples = Vec::new();
    for row in reader.deserialize::<OscillatorSample>() {
        samples.push(row?);
    }
    debug!("Read {} oscillator samples from {}", samples.len(), path.display());
    Ok(samples)
}

/// MSE of one run file against the analytical solution at its own sample times.
pub fn run_error(oscillator: &AnalyticalOscillator, path: &Path) -> Result<(usize, f64)> {
    let samples = read_samples(path)?;
    let numeric: Vec<f64> = samples.iter().map(|s| s.pos).collect();
    let analytical: Vec<f64> = samples.iter().map(|s| oscillator.position(s.t)).collect();
    let mse = mean_squared_error(&numeric, &analytical)
        .ok_or_else(|| AnalysisError::InvalidInput(format!("{} holds no samples", path.display())))?;
    Ok((samples.len(), mse))
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimestepError {
    pub dt: f64,
    pub samples: usize,
    pub mse: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IntegratorErrors {
    pub integrator: String,
    /// Ascending by `dt`.
    pub errors: Vec<TimestepError>,
    pub missing: Vec<PathBuf>,
}

/// MSE against the analytical solution for every integrator and time step.
///
/// Files that are missing or unreadable are logged and listed, never fatal.
pub fn error_vs_timestep(pool: &WorkerPool, config: &OscillatorConfig) -> Result<Vec<IntegratorErrors>> {
    let oscillator = AnalyticalOscillator::new(OscillatorParams::from(config))?;
    info!(
        "Comparing {} integrators over {} time steps (omega' = {:.4})",
        config.integrators.len(),
        config.dts.len(),
        oscillator.angular_frequency()
    );

    let mut tasks = Vec::new();
    for (index, integrator) in config.integrators.iter().enumerate() {
        for &dt in &config.dts {
            let path = config.resolve_path(integrator, dt);
            tasks.push(((index, dt, path.clone()), path));
        }
    }

    let outcomes = pool.run_all(tasks, |path| run_error(&oscillator, &path));

    let mut results: Vec<IntegratorErrors> = config
        .integrators
        .iter()
        .map(|name| IntegratorErrors { integrator: name.clone(), errors: Vec::new(), missing: Vec::new() })
        .collect();
    for ((index, dt, path), outcome) in outcomes {
        let entry = &mut results[index];
        match outcome {
            Ok((samples, mse)) => {
                debug!("{} dt = {}: MSE {:.3e}", entry.integrator, dt, mse);
                entry.errors.push(TimestepError { dt, samples, mse });
            }
            Err(e) => {
                warn!("Skipping {} dt = {}: {}", entry.integrator, dt, e);
                entry.missing.push(path);
            }
        }
    }
    for entry in &mut results {
        entry.errors.sort_by(|a, b| a.dt.total_cmp(&b.dt));
        entry.missing.sort();
    }
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fmt::Write as _;

    fn reference() -> OscillatorParams {
        OscillatorParams { stiffness: 10_000.0, damping: 100.0, mass: 70.0, amplitude: 1.0 }
    }

    #[test]
    fn analytical_solution_starts_at_amplitude_and_decays() {
        let oscillator = AnalyticalOscillator::new(reference()).unwrap();
        assert_eq!(oscillator.position(0.0), 1.0);

        let expected_omega = (10_000.0_f64 / 70.0 - 100.0 * 100.0 / (4.0 * 70.0 * 70.0)).sqrt();
        assert!((oscillator.angular_frequency() - expected_omega).abs() < 1e-12);

        // One full period later the cosine is back to 1, scaled by the envelope
        let period = 2.0 * std::f64::consts::PI / expected_omega;
        let envelope = (-100.0 / 140.0 * period).exp();
        assert!((oscillator.position(period) - envelope).abs() < 1e-9);
    }

    #[test]
    fn over_damped_parameters_are_rejected() {
        let params = OscillatorParams { damping: 10_000.0, ..reference() };
        assert!(matches!(analytical_position(0.5, params), Err(AnalysisError::InvalidInput(_))));

        let params = OscillatorParams { mass: 0.0, ..reference() };
        assert!(AnalyticalOscillator::new(params).is_err());
    }

    #[test]
    fn mse_of_known_offsets() {
        assert_eq!(mean_squared_error(&[1.0, 2.0, 3.0], &[1.0, 1.0, 1.0]), Some(5.0 / 3.0));
        assert_eq!(mean_squared_error(&[], &[]), None);
        assert_eq!(mean_squared_error(&[1.0], &[1.0, 2.0]), None);
    }

    #[test]
    fn sample_files_ignore_extra_columns() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("verlet_sim_1e-2.csv");
        std::fs::write(&path, "t;pos;vel\n0.0;1.0;0.0\n0.01; 0.99 ;-1.0\n").unwrap();

        let samples = read_samples(&path).unwrap();
        assert_eq!(samples, vec![OscillatorSample { t: 0.0, pos: 1.0 }, OscillatorSample { t: 0.01, pos: 0.99 }]);
        assert!(matches!(read_samples(dir.path().join("nope.csv")), Err(AnalysisError::MissingFile(_))));
    }

    #[test]
    fn errors_are_grouped_per_integrator_and_sorted() {
        let dir = tempfile::tempdir().unwrap();
        let params = reference();
        let oscillator = AnalyticalOscillator::new(params).unwrap();

        // An exact run and one that is off by a constant 0.1
        let write_run = |name: &str, offset: f64| {
            let mut text = String::from("t;pos;vel\n");
            for i in 0..50 {
                let t = i as f64 * 0.01;
                writeln!(text, "{};{};0", t, oscillator.position(t) + offset).unwrap();
            }
            std::fs::write(dir.path().join(name), text).unwrap();
        };
        write_run("verlet_sim_1e-2.csv", 0.0);
        write_run("verlet_sim_1e-1.csv", 0.1);
        write_run("gear_sim_1e-2.csv", 0.0);

        let config = OscillatorConfig {
            stiffness: params.stiffness,
            damping: params.damping,
            mass: params.mass,
            amplitude: params.amplitude,
            integrators: vec!["verlet".to_string(), "gear".to_string()],
            dts: vec![1e-1, 1e-2],
            path_template: format!("{}/{{integrator}}_sim_{{dt}}.csv", dir.path().display()),
        };
        let pool = WorkerPool::new(Some(2)).unwrap();
        let results = error_vs_timestep(&pool, &config).unwrap();

        assert_eq!(results.len(), 2);
        let verlet = &results[0];
        assert_eq!(verlet.integrator, "verlet");
        assert_eq!(verlet.errors.iter().map(|e| e.dt).collect::<Vec<_>>(), vec![1e-2, 1e-1]);
        assert!(verlet.errors[0].mse < 1e-20);
        assert!((verlet.errors[1].mse - 0.01).abs() < 1e-9);
        assert!(verlet.missing.is_empty());

        let gear = &results[1];
        assert_eq!(gear.errors.len(), 1);
        assert_eq!(gear.missing, vec![dir.path().join("gear_sim_1e-1.csv")]);
    }
}
