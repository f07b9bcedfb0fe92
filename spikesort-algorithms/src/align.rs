//! Peak alignment of threshold-crossed waveforms.
//!
//! Each waveform is shifted so that its peak, refined to sub-sample
//! precision by a centre-of-mass correction, lands on a common sample.
//! The shift is applied by resampling the waveform with a cubic spline.
//! Per-spike work is independent and runs on the rayon pool.
#![allow(
    clippy::cast_possible_truncation,
    clippy::cast_possible_wrap,
    clippy::cast_precision_loss,
    clippy::cast_sign_loss
)]

use log::{debug, info, warn};
use rayon::prelude::*;
use spikesort_core::config::AlignConfig;
use spikesort_core::error::Result;
use spikesort_core::waveform::{Polarity, RawWaveforms, Waveforms};

use crate::spline::CubicSpline;

/// Location of one spike's peak.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PeakPosition {
    /// Absolute sample index of the discrete peak.
    pub sample: usize,
    /// Sub-sample centre-of-mass correction around `sample`.
    pub correction: f64,
    /// True when the correction denominator vanished and was clamped to 0.
    pub degenerate: bool,
}

/// Resamples waveforms to a common, peak-aligned time base.
#[derive(Debug, Clone, Default)]
pub struct WaveformAligner {
    config: AlignConfig,
}

impl WaveformAligner {
    /// Creates an aligner with the given configuration.
    #[must_use]
    pub fn new(config: AlignConfig) -> Self {
        Self { config }
    }

    /// Current configuration.
    #[must_use]
    pub fn config(&self) -> &AlignConfig {
        &self.config
    }

    /// Converts raw ADC waveforms to µV and aligns them.
    ///
    /// Output has `S - jit` samples per spike, where `jit` is the peak
    /// search window length. An empty batch yields an empty result.
    ///
    /// # Errors
    /// Returns a configuration error if the search window or centre-of-mass
    /// offsets do not fit the waveform length.
    pub fn align(&self, raw: &RawWaveforms, polarity: Polarity) -> Result<Waveforms> {
        self.align_physical(&raw.to_physical(self.config.int_to_uv), polarity)
    }

    /// Aligns waveforms already in physical units.
    ///
    /// # Errors
    /// See [`WaveformAligner::align`]; additionally rejects non-finite samples.
    pub fn align_physical(&self, waveforms: &Waveforms, polarity: Polarity) -> Result<Waveforms> {
        let samples = waveforms.samples();
        let jit = self.config.jitter_samples();
        if waveforms.is_empty() {
            return Ok(Waveforms::new(samples.saturating_sub(jit)));
        }
        self.config.validate(samples)?;
        waveforms.ensure_finite()?;

        let aligned_len = samples - jit;
        let mut out = vec![0.0; aligned_len * waveforms.len()];

        let degenerate = out
            .par_chunks_mut(aligned_len)
            .zip(waveforms.as_slice().par_chunks(samples))
            .map(|(dst, src)| {
                let peak = self.locate_peak(src, polarity);
                let head = (peak.sample - self.config.pre_threshold) as f64;
                let spline = CubicSpline::new(src);
                for (k, value) in dst.iter_mut().enumerate() {
                    *value = spline.eval(head + k as f64 + peak.correction);
                }
                peak.degenerate
            })
            .filter(|&flat| flat)
            .count();

        if degenerate > 0 {
            warn!("{degenerate} spikes had a flat centre-of-mass window; correction set to 0");
        }
        info!(
            "aligned {} spikes to {aligned_len} samples (peak window {jit})",
            waveforms.len()
        );
        Waveforms::from_flat(aligned_len, out)
    }

    /// Finds the discrete peak inside the search window and its sub-sample
    /// correction.
    ///
    /// The caller must have validated the configuration against the
    /// waveform length.
    #[must_use]
    pub fn locate_peak(&self, waveform: &[f64], polarity: Polarity) -> PeakPosition {
        let start = self.config.pre_threshold;
        let window = &waveform[start..start + self.config.jitter_samples()];

        let mut best = 0;
        for (i, &v) in window.iter().enumerate().skip(1) {
            let better = match polarity {
                Polarity::Positive => v > window[best],
                Polarity::Negative => v < window[best],
            };
            if better {
                best = i;
            }
        }
        let sample = start + best;

        let (weighted, total) = self
            .config
            .com_window
            .iter()
            .fold((0.0, 0.0), |(weighted, total), &offset| {
                let v = waveform[(sample as i64 + i64::from(offset)) as usize];
                (weighted + f64::from(offset) * v, total + v)
            });
        let correction = weighted / total;
        if total == 0.0 || !correction.is_finite() {
            debug!("flat centre-of-mass window at sample {sample}");
            return PeakPosition {
                sample,
                correction: 0.0,
                degenerate: true,
            };
        }
        PeakPosition {
            sample,
            correction,
            degenerate: false,
        }
    }
}
