//! Bootstrap merge threshold.
//!
//! The cutoff is the upper bound of a bias-corrected and accelerated (BCa)
//! confidence interval around a percentile of the connection strengths
//! between live clusters. Replicates are independent and run on the rayon
//! pool, each with its own generator seeded from the caller's.
#![allow(clippy::cast_precision_loss)]

use log::{debug, info};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use spikesort_core::clustering::Partition;
use spikesort_core::config::BootstrapConfig;
use spikesort_core::energy::{EnergyModel, InterfaceEnergy};
use spikesort_core::error::{Error, Result};
use statrs::distribution::{ContinuousCDF, Normal};

/// Percentile of `sorted` (ascending) with midpoint interpolation.
///
/// Sample `i` (1-based) sits at percent `100 (i - 0.5) / n`; values between
/// positions are interpolated linearly and values outside are clamped to
/// the extremes. Returns NaN for empty input.
#[must_use]
pub fn percentile(sorted: &[f64], percent: f64) -> f64 {
    let n = sorted.len();
    match n {
        0 => f64::NAN,
        1 => sorted[0],
        _ => {
            let position = percent / 100.0 * n as f64 - 0.5;
            if position <= 0.0 {
                return sorted[0];
            }
            if position >= (n - 1) as f64 {
                return sorted[n - 1];
            }
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let lower = position.floor() as usize;
            let t = position - lower as f64;
            sorted[lower] + t * (sorted[lower + 1] - sorted[lower])
        }
    }
}

fn sorted_percentile(mut values: Vec<f64>, percent: f64) -> f64 {
    values.sort_by(f64::total_cmp);
    percentile(&values, percent)
}

/// Point estimate and BCa upper bound of a percentile.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BootstrapBound {
    /// Percentile of the observed values.
    pub point: f64,
    /// Upper end of the BCa interval.
    pub upper: f64,
    /// Bias correction `z0`.
    pub bias: f64,
    /// Jackknife acceleration.
    pub acceleration: f64,
}

impl BootstrapBound {
    /// The larger of the bound and the point estimate.
    #[must_use]
    pub fn cutoff(&self) -> f64 {
        self.upper.max(self.point)
    }
}

/// Derives the merge-stopping threshold.
#[derive(Debug, Clone, Default)]
pub struct CutoffEstimator {
    config: BootstrapConfig,
}

impl CutoffEstimator {
    /// Creates an estimator with the given configuration.
    #[must_use]
    pub fn new(config: BootstrapConfig) -> Self {
        Self { config }
    }

    /// Current configuration.
    #[must_use]
    pub fn config(&self) -> &BootstrapConfig {
        &self.config
    }

    /// Cutoff for the clusters of `partition` under `energy`.
    ///
    /// Returns 0 when at most two clusters are live.
    ///
    /// # Errors
    /// Returns [`Error::Configuration`] for invalid bootstrap parameters.
    pub fn estimate<R: Rng>(
        &self,
        model: &dyn EnergyModel,
        energy: &InterfaceEnergy,
        partition: &Partition,
        rng: &mut R,
    ) -> Result<f64> {
        self.config.validate()?;
        let live = partition.live();
        if live.len() <= 2 {
            debug!("{} live clusters, cutoff is 0", live.len());
            return Ok(0.0);
        }
        let strengths: Vec<f64> = model
            .connection_strength(energy, &partition.counts)
            .live_pairs(&live)
            .map(|(_, _, value)| value)
            .collect();
        let bound = self.bound(&strengths, rng)?;
        info!(
            "cutoff {:.4} (point {:.4}, bias {:.3}, acceleration {:.3}) from {} pairs",
            bound.cutoff(),
            bound.point,
            bound.bias,
            bound.acceleration,
            strengths.len()
        );
        Ok(bound.cutoff())
    }

    /// BCa interval of the configured percentile of `values`.
    ///
    /// # Errors
    /// Returns [`Error::Configuration`] for invalid bootstrap parameters and
    /// [`Error::DegenerateInput`] for empty or non-finite values.
    pub fn bound<R: Rng>(&self, values: &[f64], rng: &mut R) -> Result<BootstrapBound> {
        self.config.validate()?;
        if values.is_empty() || values.iter().any(|v| !v.is_finite()) {
            return Err(Error::DegenerateInput(
                "bootstrap needs finite, non-empty data".into(),
            ));
        }
        let percent = self.config.percentile;
        let resamples = self.config.resamples;
        let point = sorted_percentile(values.to_vec(), percent);

        let seeds: Vec<u64> = (0..resamples).map(|_| rng.gen()).collect();
        let mut replicates: Vec<f64> = seeds
            .into_par_iter()
            .map(|seed| {
                let mut local = StdRng::seed_from_u64(seed);
                let draw = (0..values.len())
                    .map(|_| values[local.gen_range(0..values.len())])
                    .collect();
                sorted_percentile(draw, percent)
            })
            .collect();
        replicates.sort_by(f64::total_cmp);

        let standard = Normal::new(0.0, 1.0).map_err(|e| Error::Configuration(e.to_string()))?;
        let below = replicates.iter().filter(|&&r| r < point).count() as f64;
        let tied = replicates.iter().filter(|&&r| r == point).count() as f64;
        let b = resamples as f64;
        let proportion = ((below + tied / 2.0) / b).clamp(0.5 / b, 1.0 - 0.5 / b);
        let bias = standard.inverse_cdf(proportion);

        let acceleration = jackknife_acceleration(values, percent);
        let z = standard.inverse_cdf(1.0 - self.config.alpha / 2.0);
        let shifted = bias + z;
        let denominator = 1.0 - acceleration * shifted;
        let level = if denominator > 0.0 {
            standard.cdf(bias + shifted / denominator)
        } else {
            1.0
        };
        let upper = percentile(&replicates, 100.0 * level);
        debug!("bootstrap level {level:.4} over {resamples} replicates");

        Ok(BootstrapBound {
            point,
            upper,
            bias,
            acceleration,
        })
    }
}

/// Skewness-based acceleration from leave-one-out percentiles.
fn jackknife_acceleration(values: &[f64], percent: f64) -> f64 {
    let n = values.len();
    if n < 2 {
        return 0.0;
    }
    let leave_one_out: Vec<f64> = (0..n)
        .into_par_iter()
        .map(|skip| {
            let rest = values
                .iter()
                .enumerate()
                .filter(|&(i, _)| i != skip)
                .map(|(_, &v)| v)
                .collect();
            sorted_percentile(rest, percent)
        })
        .collect();
    // Deviations from the first value, so equal values cancel exactly.
    let origin = leave_one_out[0];
    let deltas: Vec<f64> = leave_one_out.iter().map(|&theta| theta - origin).collect();
    let mean = deltas.iter().sum::<f64>() / n as f64;
    let (squares, cubes) = deltas.iter().fold((0.0, 0.0), |(s, c), &delta| {
        let d = mean - delta;
        (s + d * d, c + d * d * d)
    });
    if squares == 0.0 {
        return 0.0;
    }
    cubes / (6.0 * squares.powf(1.5))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::energy::ExponentialEnergy;
    use approx::assert_relative_eq;

    fn estimator() -> CutoffEstimator {
        CutoffEstimator::new(BootstrapConfig::new().with_resamples(400))
    }

    #[test]
    fn test_percentile_interpolates_between_midpoints() {
        let sorted = [1.0, 2.0, 3.0, 4.0];
        assert_relative_eq!(percentile(&sorted, 50.0), 2.5);
        assert_relative_eq!(percentile(&sorted, 25.0), 1.5);
        assert_relative_eq!(percentile(&sorted, 0.0), 1.0);
        assert_relative_eq!(percentile(&sorted, 100.0), 4.0);
        assert_relative_eq!(percentile(&[7.0], 90.0), 7.0);
        assert!(percentile(&[], 50.0).is_nan());
    }

    #[test]
    fn test_two_live_clusters_give_zero() {
        let energy = InterfaceEnergy::zeros(3).unwrap();
        let partition = Partition::from_labels(vec![1, 1, 3, 3], 3).unwrap();
        let cutoff = estimator()
            .estimate(&ExponentialEnergy, &energy, &partition, &mut StdRng::seed_from_u64(1))
            .unwrap();
        assert_relative_eq!(cutoff, 0.0);
    }

    #[test]
    fn test_upper_bound_not_below_point_estimate() {
        let mut rng = StdRng::seed_from_u64(17);
        for seed in 0..5 {
            let values: Vec<f64> = (0..30).map(|i| f64::from((i * 7 + seed) % 11) * 0.1).collect();
            let bound = estimator().bound(&values, &mut rng).unwrap();
            assert!(bound.cutoff() >= bound.point);
            assert!(bound.upper.is_finite());
        }
    }

    #[test]
    fn test_constant_values_give_that_value() {
        let bound = estimator()
            .bound(&[0.3; 12], &mut StdRng::seed_from_u64(2))
            .unwrap();
        assert_relative_eq!(bound.point, 0.3);
        assert_relative_eq!(bound.upper, 0.3);
        assert_relative_eq!(bound.acceleration, 0.0);
    }

    #[test]
    fn test_tied_leave_one_out_values_have_no_acceleration() {
        for value in [0.1, 0.3, 1.0 / 3.0, 7.77e-5] {
            assert_relative_eq!(jackknife_acceleration(&[value; 9], 50.0), 0.0);
            assert_relative_eq!(jackknife_acceleration(&[value; 9], 5.0), 0.0);
        }
        let skewed = [0.1, 0.1, 0.1, 0.1, 0.1, 0.1, 0.1, 0.1, 0.9];
        assert!(jackknife_acceleration(&skewed, 95.0).abs() > 0.0);
    }

    #[test]
    fn test_same_seed_same_bound() {
        let values: Vec<f64> = (1..=20).map(|i| 1.0 / f64::from(i)).collect();
        let first = estimator().bound(&values, &mut StdRng::seed_from_u64(5)).unwrap();
        let second = estimator().bound(&values, &mut StdRng::seed_from_u64(5)).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_estimate_over_live_pairs() {
        let mut energy = InterfaceEnergy::zeros(3).unwrap();
        energy.set(1, 2, 2.0);
        energy.set(1, 3, 1.0);
        energy.set(2, 3, 4.0);
        let partition = Partition::from_labels(vec![1, 2, 3], 3).unwrap();
        let median = BootstrapConfig::new().with_resamples(400).with_percentile(50.0);
        let cutoff = CutoffEstimator::new(median)
            .estimate(&ExponentialEnergy, &energy, &partition, &mut StdRng::seed_from_u64(3))
            .unwrap();
        // Singleton strengths are 2 E_ij, so the median pair is 4.0.
        assert!(cutoff >= 4.0);
        assert!(cutoff <= 8.0);
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let err = CutoffEstimator::new(BootstrapConfig::new().with_alpha(0.0))
            .bound(&[1.0, 2.0], &mut StdRng::seed_from_u64(0))
            .unwrap_err();
        assert!(err.is_configuration());
    }
}
