//! Significance weighting and principal component reduction.
#![allow(clippy::cast_precision_loss)]

use log::{debug, info};
use nalgebra::DMatrix;
use spikesort_core::config::ReduceConfig;
use spikesort_core::error::{Error, Result};
use spikesort_core::waveform::{Components, Waveforms};
use statrs::distribution::{ContinuousCDF, Normal};

/// Gaussian weighting window over `n` samples.
///
/// The Gaussian is centred on sample `mean` (samples are numbered from 1)
/// and its standard deviation is chosen so that its cumulative mass reaches
/// `mass` at sample `n`: `sigma = (n - mean) / Φ⁻¹(mass)`. Weights are
/// scaled to sum to `n`. `mass == 0` gives a flat window of ones.
///
/// # Errors
/// Returns [`Error::Configuration`] if the implied standard deviation is not
/// a positive finite number.
pub fn significance_window(n: usize, mean: f64, mass: f64) -> Result<Vec<f64>> {
    if n == 0 {
        return Ok(Vec::new());
    }
    if mass == 0.0 {
        return Ok(vec![1.0; n]);
    }
    let standard = Normal::new(0.0, 1.0).map_err(|e| Error::Configuration(e.to_string()))?;
    let sigma = (n as f64 - mean) / standard.inverse_cdf(mass);
    if !(sigma.is_finite() && sigma > 0.0) {
        return Err(Error::Configuration(format!(
            "window mass {mass} with centre {mean} over {n} samples gives sigma {sigma}"
        )));
    }

    let mut weights: Vec<f64> = (1..=n)
        .map(|k| {
            let z = (k as f64 - mean) / sigma;
            (-0.5 * z * z).exp()
        })
        .collect();
    let total: f64 = weights.iter().sum();
    let scale = n as f64 / total;
    weights.iter_mut().for_each(|w| *w *= scale);
    Ok(weights)
}

/// Output of [`WindowedDimReducer::reduce`].
#[derive(Debug, Clone)]
pub struct Reduction {
    /// Projection of every waveform onto the retained components.
    pub components: Components,
    /// Explained variance of every non-null component, percent, descending.
    pub explained: Vec<f64>,
}

impl Reduction {
    /// Number of retained components.
    #[must_use]
    pub fn retained(&self) -> usize {
        self.components.dims()
    }

    /// Cumulative explained variance of the first `count` components.
    #[must_use]
    pub fn captured(&self, count: usize) -> f64 {
        self.explained.iter().take(count).sum()
    }
}

/// Weights waveforms by a significance window and projects them onto the
/// fewest principal components that capture the variance target.
#[derive(Debug, Clone, Default)]
pub struct WindowedDimReducer {
    config: ReduceConfig,
}

impl WindowedDimReducer {
    /// Creates a reducer with the given configuration.
    #[must_use]
    pub fn new(config: ReduceConfig) -> Self {
        Self { config }
    }

    /// Current configuration.
    #[must_use]
    pub fn config(&self) -> &ReduceConfig {
        &self.config
    }

    /// Multiplies every waveform sample-wise by the configured window.
    ///
    /// # Errors
    /// See [`significance_window`].
    pub fn apply_window(&self, waveforms: &Waveforms) -> Result<Waveforms> {
        let weights = significance_window(
            waveforms.samples(),
            self.config.window_mean,
            self.config.window_mass,
        )?;
        let mut weighted = waveforms.clone();
        if !weights.is_empty() {
            for column in weighted.as_mut_slice().chunks_exact_mut(weights.len()) {
                column.iter_mut().zip(&weights).for_each(|(v, w)| *v *= w);
            }
        }
        Ok(weighted)
    }

    /// Windows the waveforms, then reduces them.
    ///
    /// # Errors
    /// See [`WindowedDimReducer::apply_window`] and [`WindowedDimReducer::reduce`].
    pub fn window_and_reduce(&self, waveforms: &Waveforms) -> Result<Reduction> {
        self.reduce(&self.apply_window(waveforms)?)
    }

    /// Principal component reduction.
    ///
    /// Keeps the smallest number of components whose cumulative explained
    /// variance first exceeds the target. If no prefix exceeds it, every
    /// non-null component is kept. Collinear waveforms are fine: the
    /// decomposition is an SVD of the centred data, and null directions are
    /// simply never retained.
    ///
    /// # Errors
    /// Returns [`Error::DegenerateInput`] for fewer than two waveforms,
    /// non-finite samples or zero total variance.
    pub fn reduce(&self, waveforms: &Waveforms) -> Result<Reduction> {
        self.config.validate()?;
        let spikes = waveforms.len();
        let samples = waveforms.samples();
        if spikes < 2 || samples == 0 {
            return Err(Error::DegenerateInput(format!(
                "PCA needs at least two waveforms, got {spikes}"
            )));
        }
        waveforms.ensure_finite()?;

        let mut data = DMatrix::from_fn(spikes, samples, |i, j| waveforms.column(i)[j]);
        for j in 0..samples {
            let mean = data.column(j).mean();
            data.column_mut(j).add_scalar_mut(-mean);
        }

        let svd = data.clone().svd(false, true);
        let v_t = svd
            .v_t
            .ok_or_else(|| Error::DegenerateInput("SVD did not produce right vectors".into()))?;
        let variances: Vec<f64> = svd.singular_values.iter().map(|s| s * s).collect();
        let total: f64 = variances.iter().sum();
        if !(total.is_finite() && total > 0.0) {
            return Err(Error::DegenerateInput(
                "waveforms have zero total variance".into(),
            ));
        }

        let mut order: Vec<usize> = (0..variances.len())
            .filter(|&k| variances[k] > f64::EPSILON * total)
            .collect();
        order.sort_by(|&a, &b| variances[b].total_cmp(&variances[a]));
        let explained: Vec<f64> = order.iter().map(|&k| 100.0 * variances[k] / total).collect();

        let mut cumulative = 0.0;
        let retained = explained
            .iter()
            .position(|e| {
                cumulative += e;
                cumulative > self.config.variance_target
            })
            .map_or(explained.len(), |k| k + 1);
        debug!("explained variance per component: {explained:?}");

        let mut basis = DMatrix::from_fn(samples, retained, |r, c| v_t[(order[c], r)]);
        for mut axis in basis.column_iter_mut() {
            // Largest loading positive, so signs do not depend on the solver.
            let pivot = axis.iter().copied().fold(0.0_f64, |best, v| {
                if v.abs() > best.abs() {
                    v
                } else {
                    best
                }
            });
            if pivot < 0.0 {
                axis.neg_mut();
            }
        }
        let scores = data * basis;

        let mut flat = Vec::with_capacity(spikes * retained);
        for row in scores.row_iter() {
            flat.extend(row.iter().copied());
        }
        info!(
            "retained {retained} of {} components ({:.1}% variance)",
            explained.len(),
            explained.iter().take(retained).sum::<f64>()
        );
        Ok(Reduction {
            components: Components::from_flat(retained, flat)?,
            explained,
        })
    }
}
