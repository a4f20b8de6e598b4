use serde::{Deserialize, Serialize};

/// Hash key for exact timestamp matching. `0.0` and `-0.0` share a key.
pub fn timestamp_key(time: f64) -> u64 {
    if time == 0.0 {
        0.0f64.to_bits()
    } else {
        time.to_bits()
    }
}

/// An ordered sequence of `(time, value)` pairs.
///
/// Times are finite and strictly increasing. Building a series from unordered
/// points merges values that share a timestamp instead of overwriting them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeSeries<T> {
    points: Vec<(f64, T)>,
}

impl<T> Default for TimeSeries<T> {
    fn default() -> Self {
        Self { points: Vec::new() }
    }
}

impl<T> TimeSeries<T> {
    /// Builds a series from points in any order.
    ///
    /// Points are stably sorted by time; a point whose time equals the previous
    /// one is folded into it with `merge(existing, later)`. Non-finite times are dropped.
    pub fn from_points_with<F>(points: Vec<(f64, T)>, mut merge: F) -> Self
    where
        F: FnMut(&mut T, T),
    {
        let mut points: Vec<(f64, T)> = points.into_iter().filter(|(t, _)| t.is_finite()).collect();
        points.sort_by(|a, b| a.0.total_cmp(&b.0));

        let mut merged: Vec<(f64, T)> = Vec::with_capacity(points.len());
        for (time, value) in points {
            match merged.last_mut() {
                // -0.0 and 0.0 compare equal here, unlike under total_cmp
                Some((last, existing)) if *last == time => merge(existing, value),
                _ => merged.push((time, value)),
            }
        }
        Self { points: merged }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn as_slice(&self) -> &[(f64, T)] {
        &self.points
    }

    pub fn iter(&self) -> impl Iterator<Item = (f64, &T)> + '_ {
        self.points.iter().map(|(t, v)| (*t, v))
    }

    pub fn times(&self) -> impl Iterator<Item = f64> + '_ {
        self.points.iter().map(|(t, _)| *t)
    }

    pub fn values(&self) -> impl Iterator<Item = &T> + '_ {
        self.points.iter().map(|(_, v)| v)
    }

    pub fn first(&self) -> Option<(f64, &T)> {
        self.points.first().map(|(t, v)| (*t, v))
    }

    pub fn last(&self) -> Option<(f64, &T)> {
        self.points.last().map(|(t, v)| (*t, v))
    }

    /// Applies `f` to every value, keeping the timestamps.
    pub fn map<U, F>(&self, mut f: F) -> TimeSeries<U>
    where
        F: FnMut(&T) -> U,
    {
        TimeSeries { points: self.points.iter().map(|(t, v)| (*t, f(v))).collect() }
    }

    /// Builds a series from points in any order, keeping the first value seen
    /// for a repeated timestamp.
    pub fn from_points_keep_first(points: Vec<(f64, T)>) -> Self {
        Self::from_points_with(points, |_, _| {})
    }
}
