use crate::error::AnalysisError;
use crate::parser::{ParseReport, TrajectoryParser};
use crate::pool::WorkerPool;
use crate::stats::{self, LinearFit};
use crate::structure::{crossing_time, half_mass_series};
use log::{debug, info, warn};
use nbody_common::{timestamp_key, CrossingCriteria, TimeSeries};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

/// Parameter tuple identifying one run of a realization batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct RunKey {
    pub particle_count: u32,
    pub realization: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulationRun {
    pub key: RunKey,
    pub path: PathBuf,
}

impl SimulationRun {
    pub fn new(particle_count: u32, realization: u32, path: impl Into<PathBuf>) -> Self {
        Self { key: RunKey { particle_count, realization }, path: path.into() }
    }
}

/// Why a run contributed nothing to its group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", content = "detail", rename_all = "snake_case")]
pub enum SkipReason {
    MissingFile,
    /// The file exists but holds no parseable snapshot.
    EmptyData,
    ReadFailed(String),
}

impl SkipReason {
    /// Classifies a load failure. Anything but a missing file is a read failure.
    pub fn from_error(error: &AnalysisError) -> Self {
        match error {
            AnalysisError::MissingFile(_) => SkipReason::MissingFile,
            other => SkipReason::ReadFailed(other.to_string()),
        }
    }
}

/// Diagnostics of one realization that found data.
#[derive(Debug, Clone, PartialEq)]
pub struct RunResult {
    pub half_mass: TimeSeries<f64>,
    pub crossing_time: Option<f64>,
    pub report: ParseReport,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Completed(RunResult),
    Skipped(SkipReason),
}

/// Scalars kept per contributing realization once its series is dropped.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RealizationSummary {
    pub realization: u32,
    pub snapshots: usize,
    pub crossing_time: Option<f64>,
    pub final_half_mass: Option<f64>,
    pub parse: ParseReport,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkippedRun {
    pub realization: u32,
    pub path: PathBuf,
    pub reason: SkipReason,
}

/// Ensemble results of a group with at least one contributing realization.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnsembleSummary {
    pub mean_half_mass: TimeSeries<f64>,
    /// Fit over the later half of the mean series; `None` when undefined.
    pub steady_state: Option<LinearFit>,
    /// Mean over realizations that crossed; `None` when none did.
    pub mean_crossing_time: Option<f64>,
    pub crossings_found: usize,
    /// Timestamps missing from at least one contributing realization.
    pub unaligned_timestamps: usize,
}

/// All realizations sharing one particle count.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupReport {
    pub particle_count: u32,
    pub realizations: Vec<RealizationSummary>,
    pub skipped: Vec<SkippedRun>,
    /// `None` when no realization contributed data.
    pub summary: Option<EnsembleSummary>,
}

impl GroupReport {
    pub fn contributed(&self) -> usize {
        self.realizations.len()
    }

    pub fn is_skipped(&self) -> bool {
        self.summary.is_none()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchReport {
    /// Ascending by particle count.
    pub groups: Vec<GroupReport>,
}

impl BatchReport {
    pub fn group(&self, particle_count: u32) -> Option<&GroupReport> {
        self.groups.iter().find(|g| g.particle_count == particle_count)
    }

    pub fn total_contributed(&self) -> usize {
        self.groups.iter().map(GroupReport::contributed).sum()
    }

    pub fn total_skipped(&self) -> usize {
        self.groups.iter().map(|g| g.skipped.len()).sum()
    }

    /// `(N, slope)` for every group with a defined steady-state fit.
    pub fn slopes(&self) -> Vec<(u32, f64)> {
        self.groups
            .iter()
            .filter_map(|g| {
                let fit = g.summary.as_ref()?.steady_state?;
                Some((g.particle_count, fit.slope))
            })
            .collect()
    }

    /// `(N, mean crossing time)` for every group where some realization crossed.
    pub fn crossing_times(&self) -> Vec<(u32, f64)> {
        self.groups
            .iter()
            .filter_map(|g| Some((g.particle_count, g.summary.as_ref()?.mean_crossing_time?)))
            .collect()
    }
}

/// Runs half-mass diagnostics over many realizations and reduces them per particle count.
#[derive(Debug, Clone)]
pub struct RealizationAggregator {
    parser: TrajectoryParser,
    criteria: CrossingCriteria,
}

impl RealizationAggregator {
    pub fn new(parser: TrajectoryParser, criteria: CrossingCriteria) -> Self {
        Self { parser, criteria }
    }

    /// Diagnostics of a single run file. Never fails: absent or empty data is a skip.
    pub fn process_run(&self, path: &Path) -> RunOutcome {
        let trajectory = match self.parser.parse_file(path) {
            Ok(trajectory) => trajectory,
            Err(e) => {
                warn!("Skipping {}: {}", path.display(), e);
                return RunOutcome::Skipped(SkipReason::from_error(&e));
            }
        };
        if trajectory.is_empty() {
            warn!("Skipping {}: no parseable snapshots", path.display());
            return RunOutcome::Skipped(SkipReason::EmptyData);
        }

        let half_mass = half_mass_series(&trajectory);
        let crossing_time = crossing_time(&half_mass, &self.criteria);
        debug!(
            "Processed {}: {} snapshots, crossing time {:?}",
            path.display(),
            trajectory.len(),
            crossing_time
        );
        RunOutcome::Completed(RunResult { half_mass, crossing_time, report: trajectory.report })
    }

    pub fn run_batch(&self, pool: &WorkerPool, runs: Vec<SimulationRun>) -> BatchReport {
        self.run_batch_with_progress(pool, runs, |_, _| {})
    }

    /// Processes every run on the pool, calling `on_complete` as each one finishes.
    pub fn run_batch_with_progress<O>(&self, pool: &WorkerPool, runs: Vec<SimulationRun>, on_complete: O) -> BatchReport
    where
        O: FnMut(&SimulationRun, &RunOutcome),
    {
        info!("Processing {} runs on {} workers", runs.len(), pool.workers());
        let tasks: Vec<(SimulationRun, PathBuf)> = runs
            .into_iter()
            .map(|run| {
                let path = run.path.clone();
                (run, path)
            })
            .collect();
        let outcomes = pool.execute(tasks, |path| self.process_run(&path), on_complete);
        self.aggregate(outcomes)
    }

    /// Fan-in: groups outcomes by particle count. The result does not depend on input order.
    pub fn aggregate(&self, mut outcomes: Vec<(SimulationRun, RunOutcome)>) -> BatchReport {
        outcomes.sort_by_key(|(run, _)| run.key);

        let mut grouped: BTreeMap<u32, Vec<(SimulationRun, RunOutcome)>> = BTreeMap::new();
        for (run, outcome) in outcomes {
            grouped.entry(run.key.particle_count).or_default().push((run, outcome));
        }

        let groups = grouped
            .into_iter()
            .map(|(particle_count, members)| summarize_group(particle_count, members))
            .collect();
        BatchReport { groups }
    }
}

fn summarize_group(particle_count: u32, members: Vec<(SimulationRun, RunOutcome)>) -> GroupReport {
    let mut realizations = Vec::new();
    let mut skipped = Vec::new();
    let mut series = Vec::new();

    for (run, outcome) in members {
        match outcome {
            RunOutcome::Completed(result) => {
                realizations.push(RealizationSummary {
                    realization: run.key.realization,
                    snapshots: result.half_mass.len(),
                    crossing_time: result.crossing_time,
                    final_half_mass: result.half_mass.last().map(|(_, r)| *r),
                    parse: result.report,
                });
                series.push(result.half_mass);
            }
            RunOutcome::Skipped(reason) => skipped.push(SkippedRun {
                realization: run.key.realization,
                path: run.path,
                reason,
            }),
        }
    }

    if series.is_empty() {
        warn!("No valid realizations for N = {} ({} skipped). Skipping group.", particle_count, skipped.len());
        return GroupReport { particle_count, realizations, skipped, summary: None };
    }

    let (mean_half_mass, unaligned_timestamps) = ensemble_mean(&series);
    if unaligned_timestamps > 0 {
        warn!(
            "N = {}: {} timestamps are not shared by all {} realizations",
            particle_count,
            unaligned_timestamps,
            series.len()
        );
    }

    let crossings: Vec<f64> = realizations.iter().filter_map(|r| r.crossing_time).collect();
    let mean_crossing_time = stats::mean(&crossings);
    let steady_state = steady_state_fit(&mean_half_mass);

    info!(
        "N = {}: {} realizations used, {} skipped, {} crossed, mean t* = {:?}, slope = {:?}",
        particle_count,
        realizations.len(),
        skipped.len(),
        crossings.len(),
        mean_crossing_time,
        steady_state.map(|f| f.slope)
    );

    GroupReport {
        particle_count,
        realizations,
        skipped,
        summary: Some(EnsembleSummary {
            mean_half_mass,
            steady_state,
            mean_crossing_time,
            crossings_found: crossings.len(),
            unaligned_timestamps,
        }),
    }
}

/// Timestamp-aligned mean of several series.
///
/// Values are matched by exact timestamp; each timestamp averages the series that
/// contain it. Also returns how many timestamps some series lacked.
pub fn ensemble_mean(series: &[TimeSeries<f64>]) -> (TimeSeries<f64>, usize) {
    let mut sums: HashMap<u64, (f64, f64, usize)> = HashMap::new();
    for s in series {
        for (time, value) in s.iter() {
            let entry = sums.entry(timestamp_key(time)).or_insert((time, 0.0, 0));
            entry.1 += *value;
            entry.2 += 1;
        }
    }

    let unaligned = sums.values().filter(|(_, _, count)| *count < series.len()).count();
    let points: Vec<(f64, f64)> = sums.into_values().map(|(time, sum, count)| (time, sum / count as f64)).collect();
    (TimeSeries::from_points_keep_first(points), unaligned)
}

/// Linear fit of the later half (by index) of a series against time.
pub fn steady_state_fit(series: &TimeSeries<f64>) -> Option<LinearFit> {
    let skip = series.len() / 2;
    let times: Vec<f64> = series.times().skip(skip).collect();
    let values: Vec<f64> = series.values().skip(skip).copied().collect();
    stats::linear_regression(&times, &values)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn series(points: &[(f64, f64)]) -> TimeSeries<f64> {
        TimeSeries::from_points_keep_first(points.to_vec())
    }

    fn completed(half_mass: TimeSeries<f64>, crossing_time: Option<f64>) -> RunOutcome {
        RunOutcome::Completed(RunResult { half_mass, crossing_time, report: ParseReport::default() })
    }

    fn aggregator() -> RealizationAggregator {
        RealizationAggregator::new(TrajectoryParser::default(), CrossingCriteria::default())
    }

    #[test]
    fn ensemble_mean_aligns_by_timestamp() {
        let a = series(&[(0.0, 1.0), (0.1, 2.0), (0.2, 3.0)]);
        let b = series(&[(0.0, 3.0), (0.1, 4.0), (0.2, 5.0)]);
        let (mean, unaligned) = ensemble_mean(&[a, b]);
        assert_eq!(mean.as_slice(), &[(0.0, 2.0), (0.1, 3.0), (0.2, 4.0)]);
        assert_eq!(unaligned, 0);
    }

    #[test]
    fn ensemble_mean_counts_unshared_timestamps() {
        let a = series(&[(0.0, 1.0), (0.1, 2.0)]);
        let b = series(&[(0.0, 3.0), (0.15, 4.0)]);
        let (mean, unaligned) = ensemble_mean(&[a, b]);
        assert_eq!(mean.as_slice(), &[(0.0, 2.0), (0.1, 2.0), (0.15, 4.0)]);
        assert_eq!(unaligned, 2);
    }

    #[test]
    fn steady_state_uses_later_half() {
        // Flat first half, slope 2 in the second half
        let points: Vec<(f64, f64)> =
            (0..10).map(|i| i as f64).map(|t| (t, if t < 5.0 { 1.0 } else { 2.0 * t })).collect();
        let fit = steady_state_fit(&series(&points)).unwrap();
        assert!((fit.slope - 2.0).abs() < 1e-12);
        assert_eq!(fit.points, 5);
    }

    #[test]
    fn steady_state_needs_two_points() {
        assert!(steady_state_fit(&series(&[(0.0, 1.0), (1.0, 2.0)])).is_none());
        assert!(steady_state_fit(&series(&[])).is_none());
        assert!(steady_state_fit(&series(&[(0.0, 1.0), (1.0, 2.0), (2.0, 4.0)])).is_some());
    }

    #[test]
    fn mean_crossing_excludes_runs_that_never_crossed() {
        let shape = series(&[(0.0, 0.5), (0.5, 1.5), (1.0, 2.0)]);
        let outcomes: Vec<(SimulationRun, RunOutcome)> = (0..10)
            .map(|j| {
                let crossing = if j < 3 { None } else { Some(j as f64) };
                (SimulationRun::new(500, j, format!("sim_500_{}.csv", j)), completed(shape.clone(), crossing))
            })
            .collect();

        let report = aggregator().aggregate(outcomes);
        let group = report.group(500).unwrap();
        let summary = group.summary.as_ref().unwrap();
        assert_eq!(group.contributed(), 10);
        assert_eq!(summary.crossings_found, 7);
        // mean of 3..=9
        assert_eq!(summary.mean_crossing_time, Some(6.0));
    }

    #[test]
    fn no_crossing_anywhere_leaves_mean_undefined() {
        let outcomes = vec![
            (SimulationRun::new(100, 0, "a"), completed(series(&[(0.0, 0.5)]), None)),
            (SimulationRun::new(100, 1, "b"), completed(series(&[(0.0, 0.7)]), None)),
        ];
        let report = aggregator().aggregate(outcomes);
        let summary = report.group(100).unwrap().summary.as_ref().unwrap();
        assert_eq!(summary.mean_crossing_time, None);
        assert_eq!(summary.crossings_found, 0);
        assert!(report.crossing_times().is_empty());
    }

    #[test]
    fn group_without_valid_runs_is_skipped() {
        let outcomes = vec![
            (SimulationRun::new(300, 0, "x"), RunOutcome::Skipped(SkipReason::MissingFile)),
            (SimulationRun::new(300, 1, "y"), RunOutcome::Skipped(SkipReason::EmptyData)),
            (SimulationRun::new(100, 0, "z"), completed(series(&[(0.0, 1.0), (1.0, 1.0), (2.0, 1.0)]), None)),
        ];
        let report = aggregator().aggregate(outcomes);

        assert_eq!(report.groups.iter().map(|g| g.particle_count).collect::<Vec<_>>(), vec![100, 300]);
        let skipped = report.group(300).unwrap();
        assert!(skipped.is_skipped());
        assert_eq!(skipped.skipped.len(), 2);
        assert_eq!(report.total_contributed(), 1);
        assert_eq!(report.total_skipped(), 2);
        assert_eq!(report.slopes(), vec![(100, 0.0)]);
    }

    #[test]
    fn aggregation_ignores_completion_order() {
        let make = |order: &[u32]| -> Vec<(SimulationRun, RunOutcome)> {
            order
                .iter()
                .map(|&j| {
                    let offset = j as f64 * 0.1;
                    (
                        SimulationRun::new(200, j, format!("r{}", j)),
                        completed(series(&[(0.0, 0.3 + offset), (0.5, 0.7 + offset), (1.0, 1.1 + offset)]), Some(0.5)),
                    )
                })
                .collect()
        };
        let forward = aggregator().aggregate(make(&[0, 1, 2, 3]));
        let shuffled = aggregator().aggregate(make(&[2, 0, 3, 1]));
        assert_eq!(forward, shuffled);
    }

    #[test]
    fn missing_file_becomes_a_skip() {
        let dir = tempfile::tempdir().unwrap();
        let outcome = aggregator().process_run(&dir.path().join("absent.csv"));
        assert_eq!(outcome, RunOutcome::Skipped(SkipReason::MissingFile));

        let empty = dir.path().join("empty.csv");
        std::fs::write(&empty, "not;a;trajectory\n").unwrap();
        assert_eq!(aggregator().process_run(&empty), RunOutcome::Skipped(SkipReason::EmptyData));
    }
}
