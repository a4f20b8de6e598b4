use crate::aggregate::BatchReport;
use crate::energy::EnergyBreakdown;
use anyhow::{Context, Result};
use log::info;
use nbody_common::{OutputFormat, TimeSeries};
use serde::Serialize;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

pub fn summary_extension(format: OutputFormat) -> &'static str {
    match format {
        OutputFormat::Json => "json",
        OutputFormat::Bincode => "bin",
        OutputFormat::Messagepack => "msgpack",
    }
}

/// Writes `value` to `<base>_<name>.<ext>` in the configured format.
pub fn write_summary<T: Serialize>(base: &str, name: &str, format: OutputFormat, value: &T) -> Result<PathBuf> {
    let path = PathBuf::from(format!("{}_{}.{}", base, name, summary_extension(format)));
    let file = File::create(&path).with_context(|| format!("Failed to create summary file '{}'", path.display()))?;
    let mut writer = BufWriter::new(file);

    match format {
        OutputFormat::Json => serde_json::to_writer_pretty(&mut writer, value)
            .with_context(|| format!("Failed to serialize summary to JSON '{}'", path.display()))?,
        OutputFormat::Bincode => bincode::serialize_into(&mut writer, value)
            .with_context(|| format!("Failed to serialize summary to bincode '{}'", path.display()))?,
        OutputFormat::Messagepack => rmp_serde::encode::write_named(&mut writer, value)
            .with_context(|| format!("Failed to serialize summary to MessagePack '{}'", path.display()))?,
    }
    writer.flush()?;

    info!("Summary saved to {}", path.display());
    Ok(path)
}

/// `t,<column>` rows for a scalar series.
pub fn write_scalar_series(path: &Path, column: &str, series: &TimeSeries<f64>) -> Result<()> {
    let mut writer =
        csv::Writer::from_path(path).with_context(|| format!("Failed to create CSV file '{}'", path.display()))?;
    writer.write_record(["t", column])?;
    for (t, value) in series.iter() {
        writer.write_record(&[t.to_string(), value.to_string()])?;
    }
    writer.flush()?;
    info!("Series '{}' saved to {}", column, path.display());
    Ok(())
}

pub fn write_energy_series(path: &Path, series: &TimeSeries<EnergyBreakdown>) -> Result<()> {
    let mut writer =
        csv::Writer::from_path(path).with_context(|| format!("Failed to create CSV file '{}'", path.display()))?;
    writer.write_record(["t", "kinetic", "potential", "total"])?;
    for (t, e) in series.iter() {
        writer.write_record(&[t.to_string(), e.kinetic.to_string(), e.potential.to_string(), e.total.to_string()])?;
    }
    writer.flush()?;
    info!("Energy series saved to {}", path.display());
    Ok(())
}

/// One `<base>_half_mass_N<n>.csv` per group with an ensemble mean.
pub fn write_ensemble_series(base: &str, report: &BatchReport) -> Result<Vec<PathBuf>> {
    let mut written = Vec::new();
    for group in &report.groups {
        if let Some(summary) = &group.summary {
            let path = PathBuf::from(format!("{}_half_mass_N{}.csv", base, group.particle_count));
            write_scalar_series(&path, "r_hm", &summary.mean_half_mass)?;
            written.push(path);
        }
    }
    Ok(written)
}

/// `x,y` rows, e.g. slope or crossing time against particle count.
pub fn write_pairs<X: ToString, Y: ToString>(path: &Path, header: [&str; 2], rows: &[(X, Y)]) -> Result<()> {
    let mut writer =
        csv::Writer::from_path(path).with_context(|| format!("Failed to create CSV file '{}'", path.display()))?;
    writer.write_record(header)?;
    for (x, y) in rows {
        writer.write_record(&[x.to_string(), y.to_string()])?;
    }
    writer.flush()?;
    info!("Saved {} rows to {}", rows.len(), path.display());
    Ok(())
}
