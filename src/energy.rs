use crate::parser::Trajectory;
use nbody_common::{ParticleRecord, PhysicalConstants, Snapshot, TimeSeries};
use rayon::prelude::*;
use serde::Serialize;

/// Kinetic, potential and total mechanical energy of one snapshot. Signed: a bound system has negative total energy.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct EnergyBreakdown {
    pub kinetic: f64,
    pub potential: f64,
    pub total: f64,
}

/// Evaluates energies under the softened pairwise gravity model.
#[derive(Debug, Clone, Copy)]
pub struct EnergyEvaluator {
    constants: PhysicalConstants,
}

impl EnergyEvaluator {
    pub fn new(constants: PhysicalConstants) -> Self {
        Self { constants }
    }

    pub fn constants(&self) -> &PhysicalConstants {
        &self.constants
    }

    /// KE = ½·m·Σ|v|²
    pub fn kinetic(&self, particles: &[ParticleRecord]) -> f64 {
        let sum_v2: f64 = particles.iter().map(|p| p.velocity.length_squared()).sum();
        0.5 * self.constants.particle_mass * sum_v2
    }

    /// PE = Σ_{i<j} −G·m² / √(|r_i − r_j|² + H²)
    ///
    /// All-pairs sum, split over rows `i` in parallel. Matches the serial sum up
    /// to floating-point summation order.
    pub fn potential(&self, particles: &[ParticleRecord]) -> f64 {
        let h2 = self.constants.softening * self.constants.softening;
        let coupling = -self.constants.g * self.constants.particle_mass * self.constants.particle_mass;

        let inverse_distance_sum: f64 = (0..particles.len())
            .into_par_iter()
            .map(|i| {
                let pos_i = particles[i].position;
                particles[i + 1..]
                    .iter()
                    .map(|other| 1.0 / (pos_i.distance_squared(other.position) + h2).sqrt())
                    .sum::<f64>()
            })
            .sum();

        coupling * inverse_distance_sum
    }

    pub fn evaluate_particles(&self, particles: &[ParticleRecord]) -> EnergyBreakdown {
        let kinetic = self.kinetic(particles);
        let potential = self.potential(particles);
        EnergyBreakdown { kinetic, potential, total: kinetic + potential }
    }

    pub fn evaluate(&self, snapshot: &Snapshot) -> EnergyBreakdown {
        self.evaluate_particles(&snapshot.particles)
    }

    /// Energy components for every snapshot of a trajectory, ordered by time.
    pub fn energy_series(&self, trajectory: &Trajectory) -> TimeSeries<EnergyBreakdown> {
        let points: Vec<(f64, EnergyBreakdown)> = trajectory
            .snapshots
            .par_iter()
            .map(|snapshot| (snapshot.time, self.evaluate(snapshot)))
            .collect();
        // Snapshot times are already unique after parsing
        TimeSeries::from_points_keep_first(points)
    }

    /// Total energy only, for conservation checks.
    pub fn total_energy_series(&self, trajectory: &Trajectory) -> TimeSeries<f64> {
        self.energy_series(trajectory).map(|e| e.total)
    }
}
