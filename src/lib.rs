pub mod aggregate;
pub mod energy;
pub mod error;
pub mod error_stats;
pub mod oscillator;
pub mod output;
pub mod parser;
pub mod pool;
pub mod stats;
pub mod structure;

// Re-export key types for easier use by the driver and integration tests
pub use aggregate::{BatchReport, GroupReport, RealizationAggregator, RunKey, RunOutcome, SimulationRun, SkipReason};
pub use energy::{EnergyBreakdown, EnergyEvaluator};
pub use error::{AnalysisError, UndefinedStatistic};
pub use error_stats::{energy_spread_by_timestep, ConservationReport, StabilityReport};
pub use parser::{ParseReport, Trajectory, TrajectoryParser};
pub use pool::WorkerPool;
pub use stats::LinearFit;
