use serde::Serialize;

/// Ordinary least-squares fit of `y = slope * x + intercept`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LinearFit {
    pub slope: f64,
    pub intercept: f64,
    /// Pearson correlation coefficient.
    pub r_value: f64,
    /// Standard error of the slope; zero for a two-point fit.
    pub std_err: f64,
    pub points: usize,
}

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Population standard deviation (divides by `n`).
pub fn std_dev(values: &[f64]) -> Option<f64> {
    let m = mean(values)?;
    let variance = values.iter().map(|v| (v - m) * (v - m)).sum::<f64>() / values.len() as f64;
    Some(variance.sqrt())
}

/// Least-squares regression of `ys` against `xs`.
///
/// `None` with fewer than two points, mismatched lengths, or when every `x` is equal.
pub fn linear_regression(xs: &[f64], ys: &[f64]) -> Option<LinearFit> {
    let n = xs.len();
    if n < 2 || ys.len() != n {
        return None;
    }
    let x_mean = mean(xs)?;
    let y_mean = mean(ys)?;

    let mut ss_xx = 0.0;
    let mut ss_yy = 0.0;
    let mut ss_xy = 0.0;
    for (x, y) in xs.iter().zip(ys) {
        let dx = x - x_mean;
        let dy = y - y_mean;
        ss_xx += dx * dx;
        ss_yy += dy * dy;
        ss_xy += dx * dy;
    }
    if ss_xx <= 0.0 {
        return None;
    }

    let slope = ss_xy / ss_xx;
    let intercept = y_mean - slope * x_mean;
    let r_value = if ss_yy > 0.0 { (ss_xy / (ss_xx * ss_yy).sqrt()).clamp(-1.0, 1.0) } else { 0.0 };
    let std_err = if n > 2 {
        ((1.0 - r_value * r_value) * ss_yy / ss_xx / (n - 2) as f64).max(0.0).sqrt()
    } else {
        0.0
    };

    Some(LinearFit { slope, intercept, r_value, std_err, points: n })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mean_and_population_std_dev() {
        let values = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        assert_eq!(mean(&values), Some(5.0));
        assert_eq!(std_dev(&values), Some(2.0));
        assert_eq!(mean(&[]), None);
        assert_eq!(std_dev(&[]), None);
    }

    #[test]
    fn exact_line_is_recovered() {
        let xs = [0.0, 1.0, 2.0, 3.0];
        let ys: Vec<f64> = xs.iter().map(|x| 0.5 * x - 1.0).collect();
        let fit = linear_regression(&xs, &ys).unwrap();
        assert!((fit.slope - 0.5).abs() < 1e-12);
        assert!((fit.intercept + 1.0).abs() < 1e-12);
        assert!((fit.r_value - 1.0).abs() < 1e-12);
        assert!(fit.std_err.abs() < 1e-9);
        assert_eq!(fit.points, 4);
    }

    #[test]
    fn noisy_fit_reports_standard_error() {
        let xs = [1.0, 2.0, 3.0, 4.0, 5.0];
        let ys = [2.0, 4.0, 5.0, 4.0, 5.0];
        let fit = linear_regression(&xs, &ys).unwrap();
        assert!((fit.slope - 0.6).abs() < 1e-12);
        assert!((fit.intercept - 2.2).abs() < 1e-12);
        assert!(fit.std_err > 0.0);
        assert!(fit.r_value > 0.0 && fit.r_value < 1.0);
    }

    #[test]
    fn degenerate_inputs_are_undefined() {
        assert!(linear_regression(&[1.0], &[2.0]).is_none());
        assert!(linear_regression(&[1.0, 1.0, 1.0], &[1.0, 2.0, 3.0]).is_none());
        assert!(linear_regression(&[1.0, 2.0], &[1.0]).is_none());
    }
}
