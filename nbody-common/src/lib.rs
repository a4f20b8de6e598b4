pub mod config;
pub mod params;
pub mod series;
pub mod snapshot;
pub mod vecmath;

// Re-export key types for easier use by dependent crates
pub use config::{AnalysisConfig, BatchConfig, CountRange, OscillatorConfig, OutputConfig, OutputFormat, TimestepConfig};
pub use params::{CrossingCriteria, HeaderRule, ParserOptions, PhysicalConstants};
pub use series::{timestamp_key, TimeSeries};
pub use snapshot::{ParticleRecord, Snapshot};
pub use vecmath::Vec3;
