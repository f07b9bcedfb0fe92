//! Exponential interface energy.
//!
//! Every pair of distinct spikes contributes `exp(-d / (KERNEL_WIDTH * d0))`
//! to the cell of their two clusters, where `d` is the Euclidean distance
//! between their components. Pairs within one cluster land on the diagonal. The sum over
//! pairs is what makes [`InterfaceEnergy::absorb`] exact.
#![allow(clippy::cast_precision_loss)]

use log::debug;
use rayon::prelude::*;
use spikesort_core::clustering::{id_of, slot, Partition};
use spikesort_core::energy::{ConnectionStrength, EnergyModel, InterfaceEnergy};
use spikesort_core::error::{Error, Result};
use spikesort_core::waveform::Components;

/// Kernel length in units of the residual scale `d0`. `d0` carries a factor
/// of 1/10, so the kernel decays over one residual standard deviation.
pub const KERNEL_WIDTH: f64 = 10.0;

/// `x / d`, with a zero denominator replaced by 1.
#[inline]
fn ratio(x: f64, d: f64) -> f64 {
    if d == 0.0 {
        x
    } else {
        x / d
    }
}

/// Distance-decay kernel over all spike pairs.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExponentialEnergy;

impl ExponentialEnergy {
    /// Creates the model.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl EnergyModel for ExponentialEnergy {
    fn name(&self) -> &'static str {
        "exponential"
    }

    fn build_energy(
        &self,
        components: &Components,
        partition: &Partition,
        scale: f64,
    ) -> Result<InterfaceEnergy> {
        if components.len() != partition.spikes() {
            return Err(Error::size_mismatch(
                "cluster labels",
                components.len(),
                partition.spikes(),
            ));
        }
        partition.validate()?;
        if !(scale.is_finite() && scale > 0.0) {
            return Err(Error::DegenerateInput(format!(
                "energy scale must be positive, got {scale}"
            )));
        }

        let length = KERNEL_WIDTH * scale;
        let capacity = partition.capacity();
        let labels = &partition.labels;
        let spikes = labels.len();
        // One row of contributions per spike, summed in spike order so the
        // result does not depend on how rayon splits the work.
        let rows: Vec<Vec<f64>> = (0..spikes)
            .into_par_iter()
            .map(|a| {
                let mut row = vec![0.0; capacity];
                for b in a + 1..spikes {
                    row[slot(labels[b])] += (-components.distance(a, b) / length).exp();
                }
                row
            })
            .collect();
        let mut cells = vec![0.0; capacity * capacity];
        for (a, row) in rows.iter().enumerate() {
            let la = slot(labels[a]);
            for (lb, &value) in row.iter().enumerate() {
                let (lo, hi) = if la <= lb { (la, lb) } else { (lb, la) };
                cells[lo * capacity + hi] += value;
            }
        }

        let mut energy = InterfaceEnergy::zeros(capacity)?;
        for lo in 0..capacity {
            for hi in lo..capacity {
                energy.set(id_of(lo), id_of(hi), cells[lo * capacity + hi]);
            }
        }
        debug!("built {capacity}x{capacity} interface energy over {spikes} spikes");
        Ok(energy)
    }

    /// `J = 2 Ê_ij / (Ê_ii + Ê_jj)`, where `Ê_ij = E_ij / (n_i n_j)` and
    /// `Ê_ii = E_ii / (n_i (n_i - 1) / 2)`. Every zero denominator is
    /// replaced by 1. Pairs involving an empty cluster stay at 0.
    fn connection_strength(
        &self,
        energy: &InterfaceEnergy,
        counts: &[usize],
    ) -> ConnectionStrength {
        let capacity = energy.capacity().min(counts.len());
        let mut strength = ConnectionStrength::zeros(energy.capacity());
        let density: Vec<f64> = (0..capacity)
            .map(|i| {
                let n = counts[i] as f64;
                ratio(energy.self_energy(id_of(i)), n * (n - 1.0) / 2.0)
            })
            .collect();

        for i in 0..capacity {
            if counts[i] == 0 {
                continue;
            }
            for j in i + 1..capacity {
                if counts[j] == 0 {
                    continue;
                }
                let (a, b) = (id_of(i), id_of(j));
                let mutual = ratio(energy.get(a, b), (counts[i] * counts[j]) as f64);
                strength.set(a, b, ratio(2.0 * mutual, density[i] + density[j]));
            }
        }
        strength
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn line(points: &[f64]) -> Components {
        let columns: Vec<[f64; 1]> = points.iter().map(|&p| [p]).collect();
        Components::from_columns(&columns).unwrap()
    }

    #[test]
    fn test_energy_sums_over_pairs() {
        let components = line(&[0.0, 1.0, 3.0]);
        let partition = Partition::from_labels(vec![1, 1, 2], 2).unwrap();
        let scale = 1.0 / KERNEL_WIDTH;
        let energy = ExponentialEnergy.build_energy(&components, &partition, scale).unwrap();

        assert_relative_eq!(energy.self_energy(1), (-1.0f64).exp(), epsilon = 1e-12);
        assert_relative_eq!(energy.self_energy(2), 0.0);
        assert_relative_eq!(
            energy.get(1, 2),
            (-3.0f64).exp() + (-2.0f64).exp(),
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_absorb_matches_rebuilt_energy() {
        let components = line(&[0.0, 0.5, 2.0, 4.0, 4.5]);
        let model = ExponentialEnergy::new();
        let split = Partition::from_labels(vec![1, 1, 2, 3, 3], 3).unwrap();
        let merged = Partition::from_labels(vec![1, 1, 2, 2, 2], 3).unwrap();

        let mut incremental = model.build_energy(&components, &split, 2.0).unwrap();
        incremental.absorb(2, 3);
        let rebuilt = model.build_energy(&components, &merged, 2.0).unwrap();

        assert_relative_eq!(incremental.self_energy(2), rebuilt.self_energy(2), epsilon = 1e-12);
        assert_relative_eq!(incremental.get(1, 2), rebuilt.get(1, 2), epsilon = 1e-12);
        assert_relative_eq!(incremental.self_energy(1), rebuilt.self_energy(1), epsilon = 1e-12);
    }

    #[test]
    fn test_strength_drops_as_self_energy_grows() {
        let mut energy = InterfaceEnergy::zeros(2).unwrap();
        energy.set(1, 2, 4.0);
        energy.set(1, 1, 3.0);
        energy.set(2, 2, 3.0);
        let counts = [3, 3];
        let before = ExponentialEnergy.connection_strength(&energy, &counts).get(1, 2).unwrap();

        energy.set(1, 1, 6.0);
        let after = ExponentialEnergy.connection_strength(&energy, &counts).get(1, 2).unwrap();
        assert!(after < before, "{after} should be below {before}");
    }

    #[test]
    fn test_zero_denominators_are_replaced() {
        let mut energy = InterfaceEnergy::zeros(2).unwrap();
        energy.set(1, 2, 0.5);
        let strength = ExponentialEnergy.connection_strength(&energy, &[1, 1]);
        // Singletons have no intra pairs and zero self-energy: J = 2 * 0.5 / 1.
        assert_relative_eq!(strength.get(1, 2).unwrap(), 1.0);
        assert!(strength.get(1, 2).unwrap().is_finite());
    }

    #[test]
    fn test_empty_clusters_have_no_strength() {
        let mut energy = InterfaceEnergy::zeros(3).unwrap();
        energy.set(1, 2, 1.0);
        energy.set(1, 3, 1.0);
        let strength = ExponentialEnergy.connection_strength(&energy, &[2, 2, 0]);
        assert!(strength.get(1, 2).unwrap() > 0.0);
        assert_relative_eq!(strength.get(1, 3).unwrap(), 0.0);
    }

    #[test]
    fn test_build_rejects_bad_inputs() {
        let components = line(&[0.0, 1.0]);
        let partition = Partition::from_labels(vec![1, 1, 1], 1).unwrap();
        assert!(matches!(
            ExponentialEnergy.build_energy(&components, &partition, 1.0),
            Err(Error::SizeMismatch { .. })
        ));

        let partition = Partition::from_labels(vec![1, 1], 1).unwrap();
        assert!(matches!(
            ExponentialEnergy.build_energy(&components, &partition, 0.0),
            Err(Error::DegenerateInput(_))
        ));
    }
}
