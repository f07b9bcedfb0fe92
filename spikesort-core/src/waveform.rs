//! Column-per-spike waveform storage.
//!
//! A [`WaveformBatch`] holds `N` waveforms of `S` samples each in one flat
//! vector, spike-major: samples of spike `j` occupy `data[j*S..(j+1)*S]`.
//! This is the S×N matrix layout the sorting stages consume, with each
//! spike's column contiguous so per-spike work can be split into
//! independent chunks.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Raw threshold-crossed waveforms in integer ADC units.
pub type RawWaveforms = WaveformBatch<i16>;

/// Waveforms in physical units (µV).
pub type Waveforms = WaveformBatch<f64>;

/// Sign of the detection threshold, and so of the spike peak.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Polarity {
    /// Peaks are maxima.
    Positive,
    /// Peaks are minima.
    Negative,
}

impl Polarity {
    /// Polarity of a threshold value: positive above zero, negative otherwise.
    #[must_use]
    pub fn of_threshold(threshold: f64) -> Self {
        if threshold > 0.0 {
            Self::Positive
        } else {
            Self::Negative
        }
    }
}

/// A batch of equal-length waveforms stored column by column.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct WaveformBatch<T> {
    samples: usize,
    data: Vec<T>,
}

impl<T: Copy> WaveformBatch<T> {
    /// Creates an empty batch for waveforms of `samples` samples.
    #[must_use]
    pub fn new(samples: usize) -> Self {
        Self {
            samples,
            data: Vec::new(),
        }
    }

    /// Creates an empty batch with room for `spikes` waveforms.
    #[must_use]
    pub fn with_capacity(samples: usize, spikes: usize) -> Self {
        Self {
            samples,
            data: Vec::with_capacity(samples * spikes),
        }
    }

    /// Wraps a flat spike-major buffer.
    ///
    /// # Errors
    /// Returns [`Error::SizeMismatch`] if `data` is not a whole number of
    /// waveforms, or [`Error::Configuration`] for a zero sample count with
    /// non-empty data.
    pub fn from_flat(samples: usize, data: Vec<T>) -> Result<Self> {
        if samples == 0 {
            if data.is_empty() {
                return Ok(Self { samples, data });
            }
            return Err(Error::Configuration(
                "waveform length must be positive".into(),
            ));
        }
        if data.len() % samples != 0 {
            let expected = (data.len() / samples + 1) * samples;
            return Err(Error::size_mismatch("waveform buffer", expected, data.len()));
        }
        Ok(Self { samples, data })
    }

    /// Builds a batch from per-spike sample vectors.
    ///
    /// # Errors
    /// Returns [`Error::SizeMismatch`] if the columns differ in length.
    pub fn from_columns<C: AsRef<[T]>>(samples: usize, columns: &[C]) -> Result<Self> {
        let mut batch = Self::with_capacity(samples, columns.len());
        for column in columns {
            batch.push(column.as_ref())?;
        }
        Ok(batch)
    }

    /// Appends one waveform.
    ///
    /// # Errors
    /// Returns [`Error::SizeMismatch`] if the waveform has the wrong length.
    pub fn push(&mut self, waveform: &[T]) -> Result<()> {
        if waveform.len() != self.samples {
            return Err(Error::size_mismatch("waveform", self.samples, waveform.len()));
        }
        self.data.extend_from_slice(waveform);
        Ok(())
    }

    /// Number of samples per waveform (`S`).
    #[must_use]
    pub fn samples(&self) -> usize {
        self.samples
    }

    /// Number of waveforms (`N`).
    #[must_use]
    pub fn len(&self) -> usize {
        if self.samples == 0 {
            0
        } else {
            self.data.len() / self.samples
        }
    }

    /// Returns true if the batch holds no waveforms.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Samples of spike `index`.
    ///
    /// # Panics
    /// Panics if `index >= self.len()`.
    #[must_use]
    pub fn column(&self, index: usize) -> &[T] {
        &self.data[index * self.samples..(index + 1) * self.samples]
    }

    /// Iterates over spike waveforms in column order.
    pub fn columns(&self) -> impl ExactSizeIterator<Item = &[T]> + '_ {
        self.data.chunks_exact(self.samples.max(1))
    }

    /// The flat spike-major buffer.
    #[must_use]
    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    /// Mutable access to the flat buffer.
    pub fn as_mut_slice(&mut self) -> &mut [T] {
        &mut self.data
    }

    /// Consumes the batch, returning the flat buffer.
    #[must_use]
    pub fn into_inner(self) -> Vec<T> {
        self.data
    }
}

impl RawWaveforms {
    /// Converts ADC counts to physical units with a linear scale factor.
    #[must_use]
    pub fn to_physical(&self, int_to_uv: f64) -> Waveforms {
        Waveforms {
            samples: self.samples,
            data: self.data.iter().map(|&v| f64::from(v) * int_to_uv).collect(),
        }
    }
}

impl Waveforms {
    /// Returns an error if any sample is NaN or infinite.
    ///
    /// # Errors
    /// Returns [`Error::DegenerateInput`] naming the first offending spike.
    pub fn ensure_finite(&self) -> Result<()> {
        match self.columns().position(|w| w.iter().any(|v| !v.is_finite())) {
            Some(spike) => Err(Error::DegenerateInput(format!(
                "waveform {spike} contains non-finite samples"
            ))),
            None => Ok(()),
        }
    }
}

/// Reduced feature vectors, one column of `dims` values per spike.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Components {
    dims: usize,
    data: Vec<f64>,
}

impl Components {
    /// Wraps a flat spike-major buffer of `dims` values per spike.
    ///
    /// # Errors
    /// Returns [`Error::SizeMismatch`] if the buffer length is not a multiple
    /// of `dims`, or [`Error::Configuration`] for `dims == 0`.
    pub fn from_flat(dims: usize, data: Vec<f64>) -> Result<Self> {
        if dims == 0 {
            return Err(Error::Configuration(
                "component dimension must be positive".into(),
            ));
        }
        if data.len() % dims != 0 {
            let expected = (data.len() / dims + 1) * dims;
            return Err(Error::size_mismatch("component buffer", expected, data.len()));
        }
        Ok(Self { dims, data })
    }

    /// Builds components from per-spike vectors.
    ///
    /// # Errors
    /// Returns [`Error::SizeMismatch`] if the vectors differ in length.
    pub fn from_columns<C: AsRef<[f64]>>(columns: &[C]) -> Result<Self> {
        let dims = columns.first().map_or(0, |c| c.as_ref().len());
        let mut data = Vec::with_capacity(dims * columns.len());
        for column in columns {
            let column = column.as_ref();
            if column.len() != dims {
                return Err(Error::size_mismatch("component vector", dims, column.len()));
            }
            data.extend_from_slice(column);
        }
        Self::from_flat(dims, data)
    }

    /// Number of components per spike.
    #[must_use]
    pub fn dims(&self) -> usize {
        self.dims
    }

    /// Number of spikes.
    #[must_use]
    pub fn len(&self) -> usize {
        if self.dims == 0 {
            0
        } else {
            self.data.len() / self.dims
        }
    }

    /// Returns true if there are no spikes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Component vector of spike `index`.
    ///
    /// # Panics
    /// Panics if `index >= self.len()`.
    #[must_use]
    pub fn column(&self, index: usize) -> &[f64] {
        &self.data[index * self.dims..(index + 1) * self.dims]
    }

    /// Iterates over per-spike component vectors.
    pub fn columns(&self) -> impl ExactSizeIterator<Item = &[f64]> + '_ {
        self.data.chunks_exact(self.dims.max(1))
    }

    /// The flat spike-major buffer.
    #[must_use]
    pub fn as_slice(&self) -> &[f64] {
        &self.data
    }

    /// Euclidean distance between spikes `a` and `b`.
    #[must_use]
    pub fn distance(&self, a: usize, b: usize) -> f64 {
        squared_distance(self.column(a), self.column(b)).sqrt()
    }
}

/// Squared Euclidean distance between equal-length vectors.
#[inline]
#[must_use]
pub fn squared_distance(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}
