//! Not-a-knot cubic spline through uniformly spaced samples.
//!
//! Knots sit at `0, 1, ..., n-1`. Evaluation outside that range extends the
//! first or last cubic piece.
#![allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]

/// Cubic spline interpolant of a sampled waveform.
#[derive(Debug, Clone)]
pub struct CubicSpline<'a> {
    values: &'a [f64],
    /// Second derivative at each knot.
    curvature: Vec<f64>,
}

impl<'a> CubicSpline<'a> {
    /// Fits the spline to `values`.
    ///
    /// Fewer than four samples fall back to the polynomial of matching
    /// degree (constant, line or parabola), which is what the not-a-knot
    /// conditions reduce to.
    #[must_use]
    pub fn new(values: &'a [f64]) -> Self {
        let n = values.len();
        let curvature = match n {
            0..=2 => vec![0.0; n],
            3 => vec![values[0] - 2.0 * values[1] + values[2]; 3],
            _ => not_a_knot_curvature(values),
        };
        Self { values, curvature }
    }

    /// Evaluates the spline at fractional sample position `x`.
    #[must_use]
    pub fn eval(&self, x: f64) -> f64 {
        let n = self.values.len();
        match n {
            0 => f64::NAN,
            1 => self.values[0],
            _ => {
                let i = (x.floor().max(0.0) as usize).min(n - 2);
                let t = x - i as f64;
                let u = 1.0 - t;
                u * self.values[i]
                    + t * self.values[i + 1]
                    + ((u * u * u - u) * self.curvature[i] + (t * t * t - t) * self.curvature[i + 1])
                        / 6.0
            }
        }
    }
}

/// Second derivatives under not-a-knot end conditions, unit knot spacing.
/// Requires at least four samples.
///
/// Substituting `M0 = 2 M1 - M2` (and its mirror at the far end) into the
/// continuity equations leaves a tridiagonal system in `M1..M(n-2)`.
fn not_a_knot_curvature(y: &[f64]) -> Vec<f64> {
    let n = y.len();
    let m = n - 2;
    let mut diag = vec![4.0; m];
    let mut lower = vec![1.0; m];
    let mut upper = vec![1.0; m];
    let mut rhs: Vec<f64> = (1..=m)
        .map(|i| 6.0 * (y[i + 1] - 2.0 * y[i] + y[i - 1]))
        .collect();

    diag[0] = 6.0;
    upper[0] = 0.0;
    diag[m - 1] = 6.0;
    lower[m - 1] = 0.0;

    // Thomas algorithm.
    for i in 1..m {
        let w = lower[i] / diag[i - 1];
        diag[i] -= w * upper[i - 1];
        rhs[i] -= w * rhs[i - 1];
    }
    let mut inner = vec![0.0; m];
    inner[m - 1] = rhs[m - 1] / diag[m - 1];
    for i in (0..m - 1).rev() {
        inner[i] = (rhs[i] - upper[i] * inner[i + 1]) / diag[i];
    }

    let mut curvature = Vec::with_capacity(n);
    curvature.push(2.0 * inner[0] - inner[1]);
    curvature.extend_from_slice(&inner);
    curvature.push(2.0 * inner[m - 1] - inner[m - 2]);
    curvature
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_spline_reproduces_knots() {
        let y = [0.0, 1.0, -2.0, 4.0, 3.5, -1.0];
        let spline = CubicSpline::new(&y);
        for (i, &v) in y.iter().enumerate() {
            assert_abs_diff_eq!(spline.eval(i as f64), v, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_spline_is_exact_for_cubics() {
        let f = |x: f64| 0.5 * x * x * x - 2.0 * x * x + x - 3.0;
        let y: Vec<f64> = (0..8).map(|i| f(f64::from(i))).collect();
        let spline = CubicSpline::new(&y);
        for x in [0.25, 1.5, 3.7, 6.9, -0.5, 7.4] {
            assert_abs_diff_eq!(spline.eval(x), f(x), epsilon = 1e-9);
        }
    }

    #[test]
    fn test_short_inputs() {
        assert_abs_diff_eq!(CubicSpline::new(&[2.0]).eval(0.7), 2.0);
        assert_abs_diff_eq!(CubicSpline::new(&[0.0, 2.0]).eval(0.25), 0.5);
        // Parabola x^2 through (0,0), (1,1), (2,4).
        assert_abs_diff_eq!(CubicSpline::new(&[0.0, 1.0, 4.0]).eval(1.5), 2.25, epsilon = 1e-12);
        assert!(CubicSpline::new(&[]).eval(0.0).is_nan());
    }
}
