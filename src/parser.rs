use crate::error::{AnalysisError, Result};
use csv::{ByteRecord, ReaderBuilder, Trim};
use log::{debug, trace, warn};
use nbody_common::{timestamp_key, HeaderRule, ParserOptions, ParticleRecord, Snapshot, Vec3};
use serde::Serialize;
use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// `timestamp;label;aux1;aux2;aux3`
pub const HEADER_FIELDS: usize = 5;
/// `id;x;y;z;vx;vy;vz`
pub const PARTICLE_FIELDS_REDUCED: usize = 7;
/// `id;x;y;z;vx;vy;vz;fx;fy;fz`
pub const PARTICLE_FIELDS_FULL: usize = 10;

/// Counters describing what the parser skipped, merged or repaired.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ParseReport {
    pub records_read: usize,
    pub header_blocks: usize,
    /// Lines skipped for a wrong field count, non-numeric values or a bad header timestamp.
    pub malformed_lines: usize,
    /// Particle lines with no valid header in effect.
    pub orphan_particles: usize,
    /// Blocks appended to an existing snapshot with the same timestamp.
    pub merged_blocks: usize,
    /// Particle count established by the first snapshot.
    pub expected_particles: Option<usize>,
    pub short_snapshots: usize,
    /// Records copied from the previous snapshot into short snapshots.
    pub filled_particles: usize,
    pub oversized_snapshots: usize,
}

impl ParseReport {
    /// True when the input needed no skipping or repair.
    pub fn is_clean(&self) -> bool {
        self.malformed_lines == 0
            && self.orphan_particles == 0
            && self.short_snapshots == 0
            && self.oversized_snapshots == 0
    }
}

/// Snapshots of one simulation run, plus the diagnostics gathered while reading them.
#[derive(Debug, Clone, Default)]
pub struct Trajectory {
    pub snapshots: Vec<Snapshot>,
    pub report: ParseReport,
}

impl Trajectory {
    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    pub fn times(&self) -> impl Iterator<Item = f64> + '_ {
        self.snapshots.iter().map(|s| s.time)
    }
}

enum Line {
    Header(f64),
    BadHeader,
    Particle(ParticleRecord),
    Malformed(&'static str),
    Blank,
}

/// Reads the block-structured trajectory format written by the simulator.
///
/// A header line opens a timestamp block; the particle lines that follow belong
/// to it until the next header. Blocks repeating an earlier timestamp (one block
/// per galaxy) are merged into the same snapshot.
#[derive(Debug, Clone, Default)]
pub struct TrajectoryParser {
    options: ParserOptions,
}

impl TrajectoryParser {
    pub fn new(options: ParserOptions) -> Self {
        Self { options }
    }

    /// Parses a trajectory file. A missing file is reported as `AnalysisError::MissingFile`.
    pub fn parse_file<P: AsRef<Path>>(&self, path: P) -> Result<Trajectory> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| AnalysisError::from_io(path, e))?;
        let trajectory = self.parse_reader(file)?;
        debug!(
            "Parsed {}: {} snapshots, {} malformed lines, {} merged blocks",
            path.display(),
            trajectory.len(),
            trajectory.report.malformed_lines,
            trajectory.report.merged_blocks
        );
        Ok(trajectory)
    }

    pub fn parse_str(&self, text: &str) -> Result<Trajectory> {
        self.parse_reader(text.as_bytes())
    }

    pub fn parse_reader<R: Read>(&self, reader: R) -> Result<Trajectory> {
        let mut csv_reader = ReaderBuilder::new()
            .delimiter(b';')
            .has_headers(false)
            .flexible(true)
            .quoting(false)
            .trim(Trim::All)
            .from_reader(reader);

        let mut assembler = BlockAssembler::default();
        let mut record = ByteRecord::new();

        while csv_reader.read_byte_record(&mut record)? {
            let line_no = record.position().map_or(0, |p| p.line());
            assembler.report.records_read += 1;

            match self.classify(&record) {
                Line::Blank => {}
                Line::Header(time) => {
                    trace!("Header at line {} opens block t={}", line_no, time);
                    assembler.start_block(Some(time));
                }
                Line::BadHeader => {
                    debug!("Skipping header with invalid timestamp at line {}", line_no);
                    assembler.report.malformed_lines += 1;
                    assembler.start_block(None);
                }
                Line::Particle(particle) => assembler.push_particle(particle),
                Line::Malformed(reason) => {
                    debug!("Skipping malformed line {}: {}", line_no, reason);
                    assembler.report.malformed_lines += 1;
                }
            }
        }

        let (mut snapshots, mut report) = assembler.finish();
        if self.options.sort_by_time {
            snapshots.sort_by(|a, b| a.time.total_cmp(&b.time));
        }
        reconcile_particle_counts(&mut snapshots, self.options.fill_short_snapshots, &mut report);

        if report.malformed_lines > 0 || report.orphan_particles > 0 {
            warn!(
                "Skipped {} malformed lines and {} orphan particle lines",
                report.malformed_lines, report.orphan_particles
            );
        }

        Ok(Trajectory { snapshots, report })
    }

    fn classify(&self, record: &ByteRecord) -> Line {
        match record.len() {
            0 => Line::Blank,
            1 if record.get(0).map_or(true, |f| f.is_empty()) => Line::Blank,
            HEADER_FIELDS => {
                let is_header = match &self.options.header_rule {
                    HeaderRule::Labeled { marker } => {
                        field_str(record, 1).map_or(false, |label| label.contains(marker.as_str()))
                    }
                    HeaderRule::FieldCount => true,
                };
                if !is_header {
                    return Line::Malformed("5-field line without a header label");
                }
                match parse_f64(record, 0) {
                    Some(time) => Line::Header(time),
                    None => Line::BadHeader,
                }
            }
            PARTICLE_FIELDS_REDUCED | PARTICLE_FIELDS_FULL => match parse_particle(record) {
                Some(particle) => Line::Particle(particle),
                None => Line::Malformed("non-numeric particle field"),
            },
            _ => Line::Malformed("unexpected field count"),
        }
    }
}

/// Accumulates particle lines into per-timestamp snapshots.
#[derive(Default)]
struct BlockAssembler {
    snapshots: Vec<Snapshot>,
    by_time: HashMap<u64, usize>,
    current_time: Option<f64>,
    buffer: Vec<ParticleRecord>,
    report: ParseReport,
}

impl BlockAssembler {
    fn start_block(&mut self, time: Option<f64>) {
        self.flush();
        if time.is_some() {
            self.report.header_blocks += 1;
        }
        self.current_time = time;
    }

    fn push_particle(&mut self, particle: ParticleRecord) {
        if self.current_time.is_some() {
            self.buffer.push(particle);
        } else {
            self.report.orphan_particles += 1;
        }
    }

    fn flush(&mut self) {
        let Some(time) = self.current_time else {
            return;
        };
        if self.buffer.is_empty() {
            return;
        }
        let particles = std::mem::take(&mut self.buffer);
        match self.by_time.get(&timestamp_key(time)) {
            Some(&idx) => {
                self.snapshots[idx].particles.extend(particles);
                self.report.merged_blocks += 1;
            }
            None => {
                self.by_time.insert(timestamp_key(time), self.snapshots.len());
                self.snapshots.push(Snapshot::new(time, particles));
            }
        }
    }

    fn finish(mut self) -> (Vec<Snapshot>, ParseReport) {
        self.flush();
        (self.snapshots, self.report)
    }
}

/// Checks every snapshot against the particle count of the first one.
///
/// Short snapshots are back-filled with the previous snapshot's trailing records
/// when `fill` is set. This hides truncated input, so every fill is
/// counted and logged.
fn reconcile_particle_counts(snapshots: &mut [Snapshot], fill: bool, report: &mut ParseReport) {
    let Some(expected) = snapshots.first().map(Snapshot::len) else {
        return;
    };
    report.expected_particles = Some(expected);

    for idx in 1..snapshots.len() {
        let (before, rest) = snapshots.split_at_mut(idx);
        let previous = &before[idx - 1];
        let current = &mut rest[0];

        if current.len() > expected {
            report.oversized_snapshots += 1;
            warn!(
                "Snapshot t={} has {} particles, expected {}",
                current.time,
                current.len(),
                expected
            );
            continue;
        }
        if current.len() == expected {
            continue;
        }

        report.short_snapshots += 1;
        if !fill {
            warn!("Snapshot t={} has {} of {} particles", current.time, current.len(), expected);
            continue;
        }

        // Ids restart in every galaxy block, so the tail is matched by position, not id
        let missing: Vec<ParticleRecord> =
            previous.particles.get(current.len()..expected).map(<[ParticleRecord]>::to_vec).unwrap_or_default();
        warn!(
            "Snapshot t={} has {} of {} particles; copying {} records from t={}",
            current.time,
            current.len(),
            expected,
            missing.len(),
            previous.time
        );
        report.filled_particles += missing.len();
        current.particles.extend(missing);
    }
}

fn field_str(record: &ByteRecord, idx: usize) -> Option<&str> {
    record.get(idx).and_then(|f| std::str::from_utf8(f).ok())
}

fn parse_f64(record: &ByteRecord, idx: usize) -> Option<f64> {
    field_str(record, idx)?.parse::<f64>().ok().filter(|v| v.is_finite())
}

fn parse_id(record: &ByteRecord) -> Option<u64> {
    let text = field_str(record, 0)?;
    if let Ok(id) = text.parse::<u64>() {
        return Some(id);
    }
    // Some writers emit ids as floats ("12.0")
    let value = text.parse::<f64>().ok()?;
    (value >= 0.0 && value.fract() == 0.0 && value <= u64::MAX as f64).then(|| value as u64)
}

fn parse_vec3(record: &ByteRecord, start: usize) -> Option<Vec3> {
    Some(Vec3::new(
        parse_f64(record, start)?,
        parse_f64(record, start + 1)?,
        parse_f64(record, start + 2)?,
    ))
}

fn parse_particle(record: &ByteRecord) -> Option<ParticleRecord> {
    let force = if record.len() == PARTICLE_FIELDS_FULL {
        Some(parse_vec3(record, 7)?)
    } else {
        None
    };
    Some(ParticleRecord {
        id: parse_id(record)?,
        position: parse_vec3(record, 1)?,
        velocity: parse_vec3(record, 4)?,
        force,
    })
}
