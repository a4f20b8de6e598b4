use crate::params::{CrossingCriteria, HeaderRule, ParserOptions, PhysicalConstants};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

// Constants of the softened gravity model used by the simulator
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct PhysicsConfig {
    #[serde(default = "default_g")]
    pub g: f64,
    #[serde(default = "default_softening")]
    pub softening: f64,
    #[serde(default = "default_particle_mass")]
    pub particle_mass: f64,
}

// How trajectory files are read
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct ParserConfig {
    /// Substring identifying a block header label. Empty or absent selects the field-count rule.
    #[serde(default = "default_header_marker")]
    pub header_marker: Option<String>,
    #[serde(default = "default_true")]
    pub sort_by_time: bool,
    #[serde(default = "default_true")]
    pub fill_short_snapshots: bool,
}

// Half-mass radius crossing detection
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct StructureConfig {
    #[serde(default = "default_crossing_threshold")]
    pub crossing_threshold: f64,
    #[serde(default = "default_warmup_time")]
    pub warmup_time: f64,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct ConservationConfig {
    #[serde(default = "default_relative_tolerance")]
    pub relative_tolerance: f64,
}

/// Inclusive range of particle counts, e.g. `{ start = 100, end = 2000, step = 200 }`.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct CountRange {
    pub start: u32,
    pub end: u32,
    pub step: u32,
}

impl CountRange {
    pub fn values(&self) -> Vec<u32> {
        if self.step == 0 {
            return vec![self.start];
        }
        (self.start..=self.end).step_by(self.step as usize).collect()
    }
}

// Multi-realization batch over particle counts
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct BatchConfig {
    /// Worker threads; defaults to the number of available cores.
    #[serde(default)]
    pub workers: Option<usize>,
    #[serde(default)]
    pub particle_counts: Vec<u32>,
    #[serde(default)]
    pub particle_count_range: Option<CountRange>,
    #[serde(default = "default_realizations")]
    pub realizations: u32,
    /// File name template with `{n}` and `{j}` placeholders.
    #[serde(default = "default_batch_template")]
    pub path_template: String,
}

// Energy spread across integration time steps
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct TimestepConfig {
    #[serde(default = "default_timestep_dts")]
    pub dts: Vec<f64>,
    /// File name template with a `{dt}` placeholder.
    #[serde(default = "default_timestep_template")]
    pub path_template: String,
}

// Damped oscillator reference used to score integrators
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct OscillatorConfig {
    #[serde(default = "default_stiffness")]
    pub stiffness: f64,
    #[serde(default = "default_damping")]
    pub damping: f64,
    #[serde(default = "default_oscillator_mass")]
    pub mass: f64,
    #[serde(default = "default_amplitude")]
    pub amplitude: f64,
    #[serde(default = "default_integrators")]
    pub integrators: Vec<String>,
    #[serde(default = "default_oscillator_dts")]
    pub dts: Vec<f64>,
    /// File name template with `{integrator}` and `{dt}` placeholders.
    #[serde(default = "default_oscillator_template")]
    pub path_template: String,
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Json,
    Bincode,
    Messagepack,
}

// Configuration for output settings
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct OutputConfig {
    #[serde(default = "default_base_filename")]
    pub base_filename: String,
    #[serde(default = "default_output_format")]
    pub format: OutputFormat,
    #[serde(default = "default_true")]
    pub save_series: bool,
}

/// Main analysis configuration structure, loaded from a TOML file.
#[derive(Deserialize, Serialize, Debug, Clone, Default)]
pub struct AnalysisConfig {
    #[serde(default)]
    pub physics: PhysicsConfig,
    #[serde(default)]
    pub parser: ParserConfig,
    #[serde(default)]
    pub structure: StructureConfig,
    #[serde(default)]
    pub conservation: ConservationConfig,
    #[serde(default)]
    pub batch: BatchConfig,
    #[serde(default)]
    pub timestep: TimestepConfig,
    #[serde(default)]
    pub oscillator: OscillatorConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

impl AnalysisConfig {
    /// Loads the analysis configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_ref = path.as_ref();

        let config_str = std::fs::read_to_string(path_ref)
            .map_err(|e| anyhow::anyhow!("Failed to read config file '{}': {}", path_ref.display(), e))?;
        let config = Self::from_toml_str(&config_str)
            .map_err(|e| anyhow::anyhow!("Invalid config '{}': {}", path_ref.display(), e))?;
        Ok(config)
    }

    /// Parses and validates a configuration held in memory.
    pub fn from_toml_str(config_str: &str) -> Result<Self> {
        let config: AnalysisConfig = toml::from_str(config_str)
            .map_err(|e| anyhow::anyhow!("Failed to parse TOML: {}", e))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.physics.g > 0.0) {
            anyhow::bail!("physics.g must be positive.");
        }
        if !(self.physics.softening >= 0.0) {
            anyhow::bail!("physics.softening must be non-negative.");
        }
        if !(self.physics.particle_mass > 0.0) {
            anyhow::bail!("physics.particle_mass must be positive.");
        }
        if !(self.conservation.relative_tolerance >= 0.0) {
            anyhow::bail!("conservation.relative_tolerance must be non-negative.");
        }
        if !self.structure.crossing_threshold.is_finite() || !self.structure.warmup_time.is_finite() {
            anyhow::bail!("structure thresholds must be finite.");
        }
        if self.batch.workers == Some(0) {
            anyhow::bail!("batch.workers must be greater than 0.");
        }
        if self.oscillator.mass <= 0.0 {
            anyhow::bail!("oscillator.mass must be positive.");
        }
        Ok(())
    }

    pub fn physical_constants(&self) -> PhysicalConstants {
        PhysicalConstants {
            g: self.physics.g,
            softening: self.physics.softening,
            particle_mass: self.physics.particle_mass,
        }
    }

    pub fn parser_options(&self) -> ParserOptions {
        let header_rule = match self.parser.header_marker.as_deref() {
            Some(marker) if !marker.is_empty() => HeaderRule::Labeled { marker: marker.to_string() },
            _ => HeaderRule::FieldCount,
        };
        ParserOptions {
            header_rule,
            sort_by_time: self.parser.sort_by_time,
            fill_short_snapshots: self.parser.fill_short_snapshots,
        }
    }

    pub fn crossing_criteria(&self) -> CrossingCriteria {
        CrossingCriteria {
            threshold: self.structure.crossing_threshold,
            warmup_time: self.structure.warmup_time,
        }
    }
}

impl BatchConfig {
    /// Particle counts to analyse: the explicit list, else the range.
    pub fn particle_count_values(&self) -> Vec<u32> {
        if !self.particle_counts.is_empty() {
            return self.particle_counts.clone();
        }
        self.particle_count_range.map(|r| r.values()).unwrap_or_default()
    }

    pub fn resolve_path(&self, particle_count: u32, realization: u32) -> PathBuf {
        PathBuf::from(
            self.path_template
                .replace("{n}", &particle_count.to_string())
                .replace("{j}", &realization.to_string()),
        )
    }
}

impl TimestepConfig {
    pub fn resolve_path(&self, dt: f64) -> PathBuf {
        PathBuf::from(self.path_template.replace("{dt}", &format_decimal(dt)))
    }
}

impl OscillatorConfig {
    /// Files are named with the dt in short exponent form, e.g. `1e-4`.
    pub fn resolve_path(&self, integrator: &str, dt: f64) -> PathBuf {
        PathBuf::from(
            self.path_template
                .replace("{integrator}", integrator)
                .replace("{dt}", &format_exponent(dt)),
        )
    }
}

/// Formats `0.0001` as `1e-4`, matching the simulator's file naming.
pub fn format_exponent(value: f64) -> String {
    format!("{:.0e}", value)
}

/// Shortest round-trip form with Python float spelling: `0.001`, `1.0`, `1e-05`, `2.5e+16`.
pub fn format_decimal(value: f64) -> String {
    let magnitude = value.abs();
    if value.is_finite() && magnitude != 0.0 && !(1e-4..1e16).contains(&magnitude) {
        let text = format!("{:e}", value);
        return match text.split_once('e') {
            Some((mantissa, exponent)) => {
                let (sign, digits) = match exponent.strip_prefix('-') {
                    Some(digits) => ('-', digits),
                    None => ('+', exponent),
                };
                format!("{}e{}{:0>2}", mantissa, sign, digits)
            }
            None => text,
        };
    }
    let text = value.to_string();
    if value.is_finite() && !text.contains('.') {
        format!("{}.0", text)
    } else {
        text
    }
}

impl Default for PhysicsConfig {
    fn default() -> Self {
        Self { g: default_g(), softening: default_softening(), particle_mass: default_particle_mass() }
    }
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self { header_marker: default_header_marker(), sort_by_time: true, fill_short_snapshots: true }
    }
}

impl Default for StructureConfig {
    fn default() -> Self {
        Self { crossing_threshold: default_crossing_threshold(), warmup_time: default_warmup_time() }
    }
}

impl Default for ConservationConfig {
    fn default() -> Self {
        Self { relative_tolerance: default_relative_tolerance() }
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        BatchConfig {
            workers: None,
            particle_counts: Vec::new(),
            particle_count_range: Some(CountRange { start: 100, end: 2000, step: 200 }),
            realizations: default_realizations(),
            path_template: default_batch_template(),
        }
    }
}

impl Default for TimestepConfig {
    fn default() -> Self {
        Self { dts: default_timestep_dts(), path_template: default_timestep_template() }
    }
}

impl Default for OscillatorConfig {
    fn default() -> Self {
        Self {
            stiffness: default_stiffness(),
            damping: default_damping(),
            mass: default_oscillator_mass(),
            amplitude: default_amplitude(),
            integrators: default_integrators(),
            dts: default_oscillator_dts(),
            path_template: default_oscillator_template(),
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self { base_filename: default_base_filename(), format: default_output_format(), save_series: true }
    }
}

fn default_true() -> bool {
    true
}

fn default_g() -> f64 {
    1.0
}

fn default_softening() -> f64 {
    0.05
}

fn default_particle_mass() -> f64 {
    1.0
}

fn default_header_marker() -> Option<String> {
    Some("Galaxy".to_string())
}

fn default_crossing_threshold() -> f64 {
    1.0
}

fn default_warmup_time() -> f64 {
    0.2
}

fn default_relative_tolerance() -> f64 {
    0.01 // 1% drift
}

fn default_realizations() -> u32 {
    10
}

fn default_batch_template() -> String {
    "data/sim_{n}_{j}.csv".to_string()
}

fn default_timestep_dts() -> Vec<f64> {
    vec![0.1, 0.01, 0.001, 0.0001]
}

fn default_timestep_template() -> String {
    "data/sim_dt_{dt}.csv".to_string()
}

fn default_stiffness() -> f64 {
    10000.0
}

fn default_damping() -> f64 {
    100.0
}

fn default_oscillator_mass() -> f64 {
    70.0
}

fn default_amplitude() -> f64 {
    1.0
}

fn default_integrators() -> Vec<String> {
    vec!["verlet".to_string(), "beeman".to_string(), "gear".to_string()]
}

fn default_oscillator_dts() -> Vec<f64> {
    vec![1e-1, 1e-2, 1e-3, 1e-4, 1e-5, 1e-6, 1e-7]
}

fn default_oscillator_template() -> String {
    "data/raw/{integrator}_sim_{dt}.csv".to_string()
}

fn default_base_filename() -> String {
    "nbody".to_string()
}

fn default_output_format() -> OutputFormat {
    OutputFormat::Json
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn empty_config_uses_defaults() {
        let config = AnalysisConfig::from_toml_str("").unwrap();
        let constants = config.physical_constants();
        assert_eq!(constants.g, 1.0);
        assert_eq!(constants.softening, 0.05);
        assert_eq!(config.crossing_criteria().threshold, 1.0);
        assert_eq!(config.crossing_criteria().warmup_time, 0.2);
        assert_eq!(config.output.format, OutputFormat::Json);
        assert_eq!(
            config.parser_options().header_rule,
            HeaderRule::Labeled { marker: "Galaxy".to_string() }
        );
        assert_eq!(config.batch.particle_count_values().len(), 10);
    }

    #[test]
    fn load_reads_sections_from_file() {
        let content = r#"
            [physics]
            softening = 0.1

            [parser]
            header_marker = ""

            [batch]
            particle_counts = [100, 300]
            realizations = 3
            workers = 2

            [output]
            format = "messagepack"
        "#;
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{}", content).unwrap();
        let config = AnalysisConfig::load(file.path()).unwrap();

        assert_eq!(config.physics.softening, 0.1);
        assert_eq!(config.parser_options().header_rule, HeaderRule::FieldCount);
        assert_eq!(config.batch.particle_count_values(), vec![100, 300]);
        assert_eq!(config.batch.workers, Some(2));
        assert_eq!(config.output.format, OutputFormat::Messagepack);
    }

    #[test]
    fn invalid_constants_are_rejected() {
        assert!(AnalysisConfig::from_toml_str("[physics]\ng = 0.0").is_err());
        assert!(AnalysisConfig::from_toml_str("[physics]\nsoftening = -1.0").is_err());
        assert!(AnalysisConfig::from_toml_str("[batch]\nworkers = 0").is_err());
    }

    #[test]
    fn path_templates_substitute_run_parameters() {
        let config = AnalysisConfig::default();
        assert_eq!(config.batch.resolve_path(500, 3), PathBuf::from("data/sim_500_3.csv"));
        assert_eq!(config.timestep.resolve_path(0.001), PathBuf::from("data/sim_dt_0.001.csv"));
        assert_eq!(
            config.oscillator.resolve_path("gear", 1e-4),
            PathBuf::from("data/raw/gear_sim_1e-4.csv")
        );
    }

    #[test]
    fn small_time_steps_use_exponent_file_names() {
        let config = AnalysisConfig::default();
        assert_eq!(config.timestep.resolve_path(1e-5), PathBuf::from("data/sim_dt_1e-05.csv"));
        assert_eq!(config.timestep.resolve_path(0.0001), PathBuf::from("data/sim_dt_0.0001.csv"));
        assert_eq!(format_decimal(1.5e-5), "1.5e-05");
        assert_eq!(format_decimal(1.0), "1.0");
        assert_eq!(format_decimal(0.1), "0.1");
        assert_eq!(format_decimal(2.5e16), "2.5e+16");
    }

    #[test]
    fn count_range_is_inclusive() {
        let range = CountRange { start: 100, end: 500, step: 200 };
        assert_eq!(range.values(), vec![100, 300, 500]);
    }
}
