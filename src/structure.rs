use crate::parser::Trajectory;
use nbody_common::{CrossingCriteria, ParticleRecord, Snapshot, TimeSeries, Vec3};
use rayon::prelude::*;

/// Unit-mass centroid of a set of particles. `None` when empty.
pub fn center_of_mass(particles: &[ParticleRecord]) -> Option<Vec3> {
    if particles.is_empty() {
        return None;
    }
    let sum: Vec3 = particles.iter().map(|p| p.position).sum();
    Some(sum / particles.len() as f64)
}

/// Lower-median order statistic: the value at ascending index `len / 2`.
///
/// Uses selection rather than a full sort; the slice is reordered.
pub fn lower_median(values: &mut [f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mid = values.len() / 2;
    let (_, median, _) = values.select_nth_unstable_by(mid, |a, b| a.total_cmp(b));
    Some(*median)
}

/// Half-mass radius: the distance from the centroid at which half the particles
/// (by the `N / 2` index rule) are enclosed.
pub fn half_mass_radius(snapshot: &Snapshot) -> Option<f64> {
    let center = center_of_mass(&snapshot.particles)?;
    let mut distances: Vec<f64> = snapshot.positions().map(|p| p.distance(center)).collect();
    lower_median(&mut distances)
}

/// Half-mass radius of every non-empty snapshot, ordered by time.
pub fn half_mass_series(trajectory: &Trajectory) -> TimeSeries<f64> {
    let points: Vec<(f64, f64)> = trajectory
        .snapshots
        .par_iter()
        .filter_map(|snapshot| half_mass_radius(snapshot).map(|r| (snapshot.time, r)))
        .collect();
    TimeSeries::from_points_keep_first(points)
}

/// First time after the warm-up window at which the radius exceeds the threshold.
///
/// `None` means the radius never crossed; callers exclude it from averages.
pub fn crossing_time(series: &TimeSeries<f64>, criteria: &CrossingCriteria) -> Option<f64> {
    series
        .iter()
        .find(|(t, r)| *t > criteria.warmup_time && **r > criteria.threshold)
        .map(|(t, _)| t)
}
