use crate::vecmath::Vec3;
use serde::{Deserialize, Serialize};

/// One particle line of a trajectory file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParticleRecord {
    /// Particle identifier, unique within a snapshot.
    pub id: u64,
    pub position: Vec3,
    pub velocity: Vec3,
    /// Only present in the 10-field particle layout.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub force: Option<Vec3>,
}

/// All particle records sharing one simulation timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Simulation time of the block header that introduced these particles.
    pub time: f64,
    pub particles: Vec<ParticleRecord>,
}

impl Snapshot {
    pub fn new(time: f64, particles: Vec<ParticleRecord>) -> Self {
        Self { time, particles }
    }

    pub fn len(&self) -> usize {
        self.particles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.particles.is_empty()
    }

    /// Iterator over particle positions, in record order.
    pub fn positions(&self) -> impl Iterator<Item = Vec3> + '_ {
        self.particles.iter().map(|p| p.position)
    }
}
