use serde::{Deserialize, Serialize};

/// Constants of the softened pairwise gravity model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PhysicalConstants {
    /// Gravitational coupling G.
    pub g: f64,
    /// Softening length H, added in quadrature to every pair separation.
    pub softening: f64,
    /// Mass of every particle.
    pub particle_mass: f64,
}

impl Default for PhysicalConstants {
    fn default() -> Self {
        Self { g: 1.0, softening: 0.05, particle_mass: 1.0 }
    }
}

/// How a 5-field line is recognised as a block header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum HeaderRule {
    /// The label field must contain `marker` (e.g. `Galaxy_1`).
    Labeled { marker: String },
    /// Any 5-field line is a header.
    FieldCount,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParserOptions {
    pub header_rule: HeaderRule,
    /// Re-order snapshots by timestamp after reading.
    pub sort_by_time: bool,
    /// Back-fill snapshots shorter than the first one from the previous snapshot.
    pub fill_short_snapshots: bool,
}

impl Default for ParserOptions {
    fn default() -> Self {
        Self {
            header_rule: HeaderRule::Labeled { marker: "Galaxy".to_string() },
            sort_by_time: true,
            fill_short_snapshots: true,
        }
    }
}

/// Threshold and warm-up window for half-mass radius crossing detection.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CrossingCriteria {
    pub threshold: f64,
    /// Samples at or before this time are ignored.
    pub warmup_time: f64,
}

impl Default for CrossingCriteria {
    fn default() -> Self {
        Self { threshold: 1.0, warmup_time: 0.2 }
    }
}
