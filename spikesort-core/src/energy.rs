//! Interface energy storage and the energy model trait.
//!
//! [`InterfaceEnergy`] is a dense, fixed-capacity upper-triangular matrix
//! indexed by cluster id. Cells are never reallocated while clusters merge:
//! a merged-away cluster keeps its slot, with its row and column zeroed and
//! a sentinel self-energy of 1.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::clustering::{id_of, slot, ClusterId, LiveSet, Partition, MAX_CLUSTERS};
use crate::error::{Error, Result};
use crate::waveform::Components;

/// Self-energy written into the diagonal of a tombstoned cluster.
pub const TOMBSTONE_SELF_ENERGY: f64 = 1.0;

/// Pairwise interface energies between clusters.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct InterfaceEnergy {
    capacity: usize,
    values: Vec<f64>,
}

impl InterfaceEnergy {
    /// Creates an all-zero matrix over `capacity` cluster slots.
    ///
    /// # Errors
    /// Returns [`Error::Capacity`] if `capacity` exceeds the id space.
    pub fn zeros(capacity: usize) -> Result<Self> {
        if capacity > MAX_CLUSTERS {
            return Err(Error::Capacity {
                requested: capacity,
                max: MAX_CLUSTERS,
            });
        }
        Ok(Self {
            capacity,
            values: vec![0.0; capacity * capacity],
        })
    }

    /// Number of cluster slots.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    fn offset(&self, a: ClusterId, b: ClusterId) -> usize {
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        slot(lo) * self.capacity + slot(hi)
    }

    /// Energy between `a` and `b`; order does not matter.
    #[inline]
    #[must_use]
    pub fn get(&self, a: ClusterId, b: ClusterId) -> f64 {
        self.values[self.offset(a, b)]
    }

    /// Overwrites the energy between `a` and `b`.
    #[inline]
    pub fn set(&mut self, a: ClusterId, b: ClusterId, value: f64) {
        let offset = self.offset(a, b);
        self.values[offset] = value;
    }

    /// Adds to the energy between `a` and `b`.
    #[inline]
    pub fn add(&mut self, a: ClusterId, b: ClusterId, value: f64) {
        let offset = self.offset(a, b);
        self.values[offset] += value;
    }

    /// Intra-cluster energy of `id`.
    #[inline]
    #[must_use]
    pub fn self_energy(&self, id: ClusterId) -> f64 {
        self.get(id, id)
    }

    /// Folds cluster `high` into `low`.
    ///
    /// The survivor's self-energy absorbs both former self-energies plus
    /// their mutual energy, and its energy to every other cluster becomes
    /// the sum of the two donors'. `high` is then tombstoned.
    pub fn absorb(&mut self, low: ClusterId, high: ClusterId) {
        debug_assert!(low < high, "merges fold the higher id into the lower");
        let merged = self.self_energy(low) + self.self_energy(high) + self.get(low, high);
        self.set(low, low, merged);
        for index in 0..self.capacity {
            let other = id_of(index);
            if other == low || other == high {
                continue;
            }
            let donated = self.get(high, other);
            self.add(low, other, donated);
        }
        self.tombstone(high);
    }

    /// Zeroes every interface of `id` and writes the sentinel self-energy.
    pub fn tombstone(&mut self, id: ClusterId) {
        for index in 0..self.capacity {
            self.set(id, id_of(index), 0.0);
        }
        self.set(id, id, TOMBSTONE_SELF_ENERGY);
    }

    /// Non-zero upper-triangular cells as `(low, high, energy)`.
    pub fn nonzero_entries(&self) -> impl Iterator<Item = (ClusterId, ClusterId, f64)> + '_ {
        (0..self.capacity).flat_map(move |i| {
            (i..self.capacity).filter_map(move |j| {
                let value = self.values[i * self.capacity + j];
                (value != 0.0).then(|| (id_of(i), id_of(j), value))
            })
        })
    }
}

/// Normalised connection strengths, defined only between distinct clusters.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionStrength {
    capacity: usize,
    values: Vec<f64>,
}

impl ConnectionStrength {
    /// Creates an all-zero strength matrix.
    #[must_use]
    pub fn zeros(capacity: usize) -> Self {
        Self {
            capacity,
            values: vec![0.0; capacity * capacity],
        }
    }

    /// Number of cluster slots.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Strength between distinct clusters `a` and `b`; `None` on the diagonal.
    #[must_use]
    pub fn get(&self, a: ClusterId, b: ClusterId) -> Option<f64> {
        if a == b {
            return None;
        }
        let (lo, hi) = if a < b { (a, b) } else { (b, a) };
        Some(self.values[slot(lo) * self.capacity + slot(hi)])
    }

    /// Sets the strength between distinct clusters `a` and `b`.
    ///
    /// Diagonal writes are ignored.
    pub fn set(&mut self, a: ClusterId, b: ClusterId, value: f64) {
        if a == b {
            return;
        }
        let (lo, hi) = if a < b { (a, b) } else { (b, a) };
        self.values[slot(lo) * self.capacity + slot(hi)] = value;
    }

    /// Strengths between all pairs of live clusters, `low < high`.
    pub fn live_pairs<'a>(
        &'a self,
        live: &'a LiveSet,
    ) -> impl Iterator<Item = (ClusterId, ClusterId, f64)> + 'a {
        live.iter().flat_map(move |lo| {
            live.iter()
                .filter(move |&hi| hi > lo)
                .map(move |hi| (lo, hi, self.values[slot(lo) * self.capacity + slot(hi)]))
        })
    }
}

/// Kernel that turns clustered components into interface energies.
///
/// Implementations must keep [`InterfaceEnergy::absorb`] exact: the
/// self-energy of a union equals the two self-energies plus their mutual
/// energy, and a union's energy to a third cluster is the sum of its parts.
pub trait EnergyModel: Send + Sync {
    /// Model name.
    fn name(&self) -> &'static str;

    /// Builds the raw interface energy matrix.
    ///
    /// # Errors
    /// Returns an error if the components and partition disagree in size or
    /// if `scale` is not a positive finite number.
    fn build_energy(
        &self,
        components: &Components,
        partition: &Partition,
        scale: f64,
    ) -> Result<InterfaceEnergy>;

    /// Normalises energies by cluster size into comparable strengths.
    ///
    /// Raising either cluster's self-energy against a fixed mutual energy
    /// must lower the strength.
    fn connection_strength(&self, energy: &InterfaceEnergy, counts: &[usize])
        -> ConnectionStrength;
}
