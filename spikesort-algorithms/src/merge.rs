//! Greedy agglomerative merging of an over-clustered partition.
//!
//! Each step ranks all untested live pairs by connection strength and folds
//! the strongest pair together, as long as its strength reaches the cutoff.
//! The interface energy is updated in place, so strengths never have to be
//! recomputed from spikes.

use log::{debug, info};
use spikesort_core::clustering::{id_of, slot, ClusterId, LiveSet, MergeRecord, Partition};
use spikesort_core::energy::{EnergyModel, InterfaceEnergy};
use spikesort_core::error::{Error, Result};

/// Strengths at or below this are treated as disconnected and never merged,
/// whatever the cutoff.
pub const MIN_CONNECTION: f64 = 1e-12;

/// Upper-triangular mask of cluster pairs still waiting to be tested.
#[derive(Debug, Clone)]
pub struct PairMask {
    capacity: usize,
    untested: Vec<bool>,
}

impl PairMask {
    /// Marks every pair of `live` clusters untested.
    #[must_use]
    pub fn over(capacity: usize, live: &LiveSet) -> Self {
        let mut mask = Self {
            capacity,
            untested: vec![false; capacity * capacity],
        };
        for lo in live.iter() {
            for hi in live.iter().filter(|&hi| hi > lo) {
                mask.set(lo, hi, true);
            }
        }
        mask
    }

    fn index(&self, a: ClusterId, b: ClusterId) -> usize {
        let (lo, hi) = if a < b { (a, b) } else { (b, a) };
        slot(lo) * self.capacity + slot(hi)
    }

    fn set(&mut self, a: ClusterId, b: ClusterId, untested: bool) {
        if a != b {
            let index = self.index(a, b);
            self.untested[index] = untested;
        }
    }

    /// Returns true if `(a, b)` still waits to be tested.
    #[must_use]
    pub fn is_untested(&self, a: ClusterId, b: ClusterId) -> bool {
        a != b && self.untested[self.index(a, b)]
    }

    /// Marks `(a, b)` tested.
    pub fn mark_tested(&mut self, a: ClusterId, b: ClusterId) {
        self.set(a, b, false);
    }

    /// Marks every pair involving `id` tested.
    pub fn retire(&mut self, id: ClusterId) {
        for index in 0..self.capacity {
            self.set(id, id_of(index), false);
        }
    }

    /// Reopens `(id, j)` for every live `j` other than `id`.
    pub fn reopen(&mut self, id: ClusterId, live: &LiveSet) {
        for other in live.iter() {
            self.set(id, other, true);
        }
    }

    /// Untested pairs `(low, high)` in row-major order.
    pub fn untested(&self) -> impl Iterator<Item = (ClusterId, ClusterId)> + '_ {
        let capacity = self.capacity;
        self.untested
            .iter()
            .enumerate()
            .filter(|(_, &open)| open)
            .map(move |(index, _)| (id_of(index / capacity), id_of(index % capacity)))
    }

    /// Returns true if any pair is untested.
    #[must_use]
    pub fn any(&self) -> bool {
        self.untested.iter().any(|&open| open)
    }
}

/// Result of [`AgglomerativeMerger::merge`].
#[derive(Debug, Clone)]
pub struct MergeOutcome {
    /// Partition after merging; ids are not renumbered.
    pub partition: Partition,
    /// Interface energy after merging, with tombstoned rows.
    pub energy: InterfaceEnergy,
    /// Executed merges in order.
    pub log: Vec<MergeRecord>,
    /// Connection strength of each executed merge.
    pub strengths: Vec<f64>,
}

/// Folds strongly connected clusters together until the cutoff is reached.
#[derive(Debug, Clone, Default)]
pub struct AgglomerativeMerger<M> {
    model: M,
}

impl<M: EnergyModel> AgglomerativeMerger<M> {
    /// Creates a merger ranking pairs with `model`.
    #[must_use]
    pub fn new(model: M) -> Self {
        Self { model }
    }

    /// The energy model in use.
    pub fn model(&self) -> &M {
        &self.model
    }

    /// Runs the merge loop.
    ///
    /// Stops when the strongest untested pair falls below `cutoff` or when
    /// every pair has been tested. Pairs whose strength is NaN or at most
    /// [`MIN_CONNECTION`] are not candidates. The higher id of a merged pair
    /// is always folded into the lower one.
    ///
    /// # Errors
    /// Returns [`Error::SizeMismatch`] if the energy and partition capacities
    /// differ or the partition is inconsistent, and
    /// [`Error::Configuration`] for a NaN cutoff.
    pub fn merge(
        &self,
        mut partition: Partition,
        mut energy: InterfaceEnergy,
        cutoff: f64,
    ) -> Result<MergeOutcome> {
        partition.validate()?;
        if energy.capacity() != partition.capacity() {
            return Err(Error::size_mismatch(
                "energy capacity",
                partition.capacity(),
                energy.capacity(),
            ));
        }
        if cutoff.is_nan() {
            return Err(Error::Configuration("merge cutoff is NaN".into()));
        }

        let mut log = Vec::new();
        let mut strengths = Vec::new();
        let live = partition.live();
        if live.len() <= 1 {
            return Ok(MergeOutcome {
                partition,
                energy,
                log,
                strengths,
            });
        }

        let mut mask = PairMask::over(partition.capacity(), &live);
        while mask.any() {
            let strength = self.model.connection_strength(&energy, &partition.counts);
            let mut best: Option<(ClusterId, ClusterId, f64)> = None;
            for (a, b) in mask.untested() {
                let Some(value) = strength.get(a, b).filter(|&v| v > MIN_CONNECTION) else {
                    continue;
                };
                if best.is_none_or(|(_, _, top)| value > top) {
                    best = Some((a, b, value));
                }
            }
            let Some((low, high, value)) = best else {
                break;
            };
            if value < cutoff {
                debug!("strongest pair ({low}, {high}) at {value:.4} is below cutoff {cutoff:.4}");
                break;
            }

            mask.mark_tested(low, high);
            log.push(MergeRecord::new(low, high));
            strengths.push(value);

            for label in &mut partition.labels {
                if *label == high {
                    *label = low;
                }
            }
            energy.absorb(low, high);
            partition.counts[slot(low)] += partition.counts[slot(high)];
            partition.counts[slot(high)] = 0;

            debug_assert_eq!(partition.total(), partition.spikes());

            mask.retire(high);
            mask.reopen(low, &partition.live());
            debug!("merged {high} into {low} at strength {value:.4}");
        }

        info!(
            "{} merges: {} -> {} clusters",
            log.len(),
            live.len(),
            partition.live_count()
        );
        Ok(MergeOutcome {
            partition,
            energy,
            log,
            strengths,
        })
    }
}
