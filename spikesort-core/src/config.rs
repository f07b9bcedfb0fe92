//! Per-stage sorting configuration.
#![allow(
    clippy::cast_possible_truncation,
    clippy::cast_possible_wrap,
    clippy::cast_sign_loss
)]

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::clustering::ClusterConfig;
use crate::error::{Error, Result};

/// Peak alignment parameters.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct AlignConfig {
    /// Samples recorded before the threshold crossing; the peak search starts here.
    pub pre_threshold: usize,
    /// Length of the peak search window (seconds).
    pub peak_window_s: f64,
    /// Sampling rate (Hz).
    pub sample_rate_hz: f64,
    /// Sample offsets around the peak used for the centre-of-mass correction.
    pub com_window: Vec<i32>,
    /// ADC count to microvolt scale factor.
    pub int_to_uv: f64,
}

impl Default for AlignConfig {
    fn default() -> Self {
        Self {
            pre_threshold: 10,
            peak_window_s: 0.0004, // 12 samples at 30 kHz
            sample_rate_hz: 30_000.0,
            com_window: vec![-1, 0, 1],
            int_to_uv: 0.195,
        }
    }
}

impl AlignConfig {
    /// Creates an alignment configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the number of pre-threshold samples.
    #[must_use]
    pub fn with_pre_threshold(mut self, samples: usize) -> Self {
        self.pre_threshold = samples;
        self
    }

    /// Sets the peak search window in seconds.
    #[must_use]
    pub fn with_peak_window(mut self, seconds: f64) -> Self {
        self.peak_window_s = seconds;
        self
    }

    /// Sets the sampling rate in Hz.
    #[must_use]
    pub fn with_sample_rate(mut self, hz: f64) -> Self {
        self.sample_rate_hz = hz;
        self
    }

    /// Sets the centre-of-mass offsets.
    #[must_use]
    pub fn with_com_window(mut self, offsets: Vec<i32>) -> Self {
        self.com_window = offsets;
        self
    }

    /// Sets the ADC scale factor.
    #[must_use]
    pub fn with_int_to_uv(mut self, scale: f64) -> Self {
        self.int_to_uv = scale;
        self
    }

    /// Peak search window length in samples, `round(peak_window_s * sample_rate_hz)`.
    #[must_use]
    pub fn jitter_samples(&self) -> usize {
        (self.peak_window_s * self.sample_rate_hz).round().max(0.0) as usize
    }

    /// Checks the parameters against a waveform length of `samples`.
    ///
    /// # Errors
    /// Returns [`Error::Configuration`] when the search window is empty or
    /// does not fit, when a centre-of-mass offset could fall outside the
    /// waveform, or when the scale factor is not finite and non-zero.
    pub fn validate(&self, samples: usize) -> Result<()> {
        if !(self.int_to_uv.is_finite() && self.int_to_uv != 0.0) {
            return Err(Error::Configuration(format!(
                "int_to_uv must be finite and non-zero, got {}",
                self.int_to_uv
            )));
        }
        if !(self.peak_window_s.is_finite() && self.sample_rate_hz.is_finite()) {
            return Err(Error::Configuration(
                "peak window and sample rate must be finite".into(),
            ));
        }
        let jit = self.jitter_samples();
        if jit == 0 {
            return Err(Error::Configuration(
                "peak search window rounds to zero samples".into(),
            ));
        }
        if self.pre_threshold + jit > samples {
            return Err(Error::Configuration(format!(
                "peak search window {}..{} exceeds waveform length {samples}",
                self.pre_threshold,
                self.pre_threshold + jit
            )));
        }
        if jit >= samples {
            return Err(Error::Configuration(format!(
                "aligned length would be {} samples",
                samples.saturating_sub(jit)
            )));
        }
        if self.com_window.is_empty() {
            return Err(Error::Configuration("com_window must not be empty".into()));
        }
        let lo = self.com_window.iter().copied().min().unwrap_or(0);
        let hi = self.com_window.iter().copied().max().unwrap_or(0);
        let first = self.pre_threshold as i64 + i64::from(lo);
        let last = (self.pre_threshold + jit - 1) as i64 + i64::from(hi);
        if first < 0 || last >= samples as i64 {
            return Err(Error::Configuration(format!(
                "com_window [{lo}, {hi}] reaches outside the waveform"
            )));
        }
        Ok(())
    }
}

/// Significance window and principal component reduction parameters.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct ReduceConfig {
    /// Centre of the Gaussian weighting window (samples).
    pub window_mean: f64,
    /// Gaussian mass reached by the last sample; 0 disables weighting.
    pub window_mass: f64,
    /// Minimum explained variance to capture, in percent.
    pub variance_target: f64,
}

impl Default for ReduceConfig {
    fn default() -> Self {
        Self {
            window_mean: 0.0,
            window_mass: 0.0,
            variance_target: 90.0,
        }
    }
}

impl ReduceConfig {
    /// Creates a reduction configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the weighting window centre and mass.
    #[must_use]
    pub fn with_window(mut self, mean: f64, mass: f64) -> Self {
        self.window_mean = mean;
        self.window_mass = mass;
        self
    }

    /// Sets the explained variance target (percent).
    #[must_use]
    pub fn with_variance_target(mut self, percent: f64) -> Self {
        self.variance_target = percent;
        self
    }

    /// Checks parameter ranges.
    ///
    /// # Errors
    /// Returns [`Error::Configuration`] if the variance target is outside
    /// `0..=100` or the window mass outside `0..1`.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=100.0).contains(&self.variance_target) {
            return Err(Error::Configuration(format!(
                "variance_target must be within 0..=100, got {}",
                self.variance_target
            )));
        }
        if !(0.0..1.0).contains(&self.window_mass) || !self.window_mean.is_finite() {
            return Err(Error::Configuration(format!(
                "window mass must be within 0..1, got {}",
                self.window_mass
            )));
        }
        Ok(())
    }
}

/// Bootstrap parameters of the merge cutoff estimate.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct BootstrapConfig {
    /// Number of bootstrap resamples.
    pub resamples: usize,
    /// Two-sided significance level of the confidence interval.
    pub alpha: f64,
    /// Percentile (0..=100) of connection strengths being estimated. Must stay
    /// below the strengths of merged clusters, which fall as clusters grow.
    pub percentile: f64,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            resamples: 1000,
            alpha: 0.05,
            percentile: 5.0,
        }
    }
}

impl BootstrapConfig {
    /// Creates a bootstrap configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the number of resamples.
    #[must_use]
    pub fn with_resamples(mut self, resamples: usize) -> Self {
        self.resamples = resamples;
        self
    }

    /// Sets the significance level.
    #[must_use]
    pub fn with_alpha(mut self, alpha: f64) -> Self {
        self.alpha = alpha;
        self
    }

    /// Sets the estimated percentile.
    #[must_use]
    pub fn with_percentile(mut self, percentile: f64) -> Self {
        self.percentile = percentile;
        self
    }

    /// Checks parameter ranges.
    ///
    /// # Errors
    /// Returns [`Error::Configuration`] for zero resamples, `alpha` outside
    /// `(0, 1)` or a percentile outside `0..=100`.
    pub fn validate(&self) -> Result<()> {
        if self.resamples == 0 {
            return Err(Error::Configuration("resamples must be at least 1".into()));
        }
        if !(self.alpha > 0.0 && self.alpha < 1.0) {
            return Err(Error::Configuration(format!(
                "alpha must be within (0, 1), got {}",
                self.alpha
            )));
        }
        if !(0.0..=100.0).contains(&self.percentile) {
            return Err(Error::Configuration(format!(
                "percentile must be within 0..=100, got {}",
                self.percentile
            )));
        }
        Ok(())
    }
}

/// Full pipeline configuration for one or more electrodes.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct SortConfig {
    /// Peak alignment.
    pub align: AlignConfig,
    /// Windowing and PCA.
    pub reduce: ReduceConfig,
    /// Initial over-clustering.
    pub cluster: ClusterConfig,
    /// Merge cutoff estimation.
    pub bootstrap: BootstrapConfig,
    /// Seed of the random source; electrodes derive their own streams from it.
    pub seed: u64,
}

impl SortConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the alignment configuration.
    #[must_use]
    pub fn with_align(mut self, align: AlignConfig) -> Self {
        self.align = align;
        self
    }

    /// Sets the reduction configuration.
    #[must_use]
    pub fn with_reduce(mut self, reduce: ReduceConfig) -> Self {
        self.reduce = reduce;
        self
    }

    /// Sets the clustering configuration.
    #[must_use]
    pub fn with_cluster(mut self, cluster: ClusterConfig) -> Self {
        self.cluster = cluster;
        self
    }

    /// Sets the bootstrap configuration.
    #[must_use]
    pub fn with_bootstrap(mut self, bootstrap: BootstrapConfig) -> Self {
        self.bootstrap = bootstrap;
        self
    }

    /// Sets the random seed.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Validates every stage for waveforms of `samples` samples.
    ///
    /// # Errors
    /// Returns the first stage error encountered.
    pub fn validate(&self, samples: usize) -> Result<()> {
        self.align.validate(samples)?;
        self.reduce.validate()?;
        self.cluster.validate()?;
        self.bootstrap.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_jitter_samples_rounds() {
        let config = AlignConfig::new()
            .with_peak_window(0.0004)
            .with_sample_rate(30_000.0);
        assert_eq!(config.jitter_samples(), 12);
        assert!(config.validate(40).is_ok());
    }

    #[test]
    fn test_align_validate_window_overflow() {
        let config = AlignConfig::new().with_pre_threshold(30);
        assert!(config.validate(40).unwrap_err().is_configuration());
    }

    #[test]
    fn test_align_validate_com_window_reach() {
        let config = AlignConfig::new()
            .with_pre_threshold(1)
            .with_com_window(vec![-2, 0, 2]);
        assert!(config.validate(40).is_err());
    }

    #[test]
    fn test_reduce_and_bootstrap_ranges() {
        assert!(ReduceConfig::new().with_variance_target(101.0).validate().is_err());
        assert!(ReduceConfig::new().with_window(5.0, 0.99).validate().is_ok());
        assert!(BootstrapConfig::new().with_alpha(0.0).validate().is_err());
        assert!(BootstrapConfig::new().with_resamples(0).validate().is_err());
        assert!(BootstrapConfig::new().with_percentile(95.0).validate().is_ok());
    }

    #[test]
    fn test_sort_config_builder() {
        let config = SortConfig::new()
            .with_seed(7)
            .with_cluster(ClusterConfig::new().with_bisections(3));
        assert_eq!(config.seed, 7);
        assert_eq!(config.cluster.bisections, 3);
        assert!(config.validate(40).is_ok());
    }
}
