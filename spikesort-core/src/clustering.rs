//! Cluster identifiers, partitions and clustering configuration.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Cluster identifier. Live ids run from 1; 0 is never a valid id.
pub type ClusterId = u8;

/// Largest number of addressable clusters.
pub const MAX_CLUSTERS: usize = u8::MAX as usize;

/// Dense array slot of a cluster id.
#[inline]
#[must_use]
pub fn slot(id: ClusterId) -> usize {
    debug_assert!(id > 0, "cluster id 0 is reserved");
    usize::from(id) - 1
}

/// Cluster id stored in dense array slot `index`.
///
/// # Panics
/// Panics if `index >= MAX_CLUSTERS`.
#[inline]
#[must_use]
pub fn id_of(index: usize) -> ClusterId {
    ClusterId::try_from(index + 1).expect("cluster slot exceeds the 8-bit id space")
}

/// Fixed-size liveness bitset over the cluster id range.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct LiveSet {
    words: [u64; 4],
}

impl LiveSet {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a set holding ids `1..=count`.
    #[must_use]
    pub fn first(count: usize) -> Self {
        let mut set = Self::new();
        for index in 0..count.min(MAX_CLUSTERS) {
            set.insert(id_of(index));
        }
        set
    }

    /// Marks `id` live.
    #[inline]
    pub fn insert(&mut self, id: ClusterId) {
        self.words[usize::from(id) / 64] |= 1u64 << (id % 64);
    }

    /// Marks `id` dead.
    #[inline]
    pub fn remove(&mut self, id: ClusterId) {
        self.words[usize::from(id) / 64] &= !(1u64 << (id % 64));
    }

    /// Returns true if `id` is live.
    #[inline]
    #[must_use]
    pub fn contains(&self, id: ClusterId) -> bool {
        self.words[usize::from(id) / 64] & (1u64 << (id % 64)) != 0
    }

    /// Number of live ids.
    #[must_use]
    pub fn len(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Returns true if no id is live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|&w| w == 0)
    }

    /// Live ids in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = ClusterId> + '_ {
        (1..=u8::MAX).filter(move |&id| self.contains(id))
    }
}

impl FromIterator<ClusterId> for LiveSet {
    fn from_iter<I: IntoIterator<Item = ClusterId>>(iter: I) -> Self {
        let mut set = Self::new();
        for id in iter {
            set.insert(id);
        }
        set
    }
}

/// Assignment of spikes to clusters.
///
/// `counts` is indexed by cluster slot and keeps its full capacity for the
/// lifetime of a sort; a slot with count zero is a tombstone.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Partition {
    /// Spike count per cluster slot.
    pub counts: Vec<usize>,
    /// Cluster id per spike.
    pub labels: Vec<ClusterId>,
}

impl Partition {
    /// Builds a partition from per-spike labels with `capacity` cluster slots.
    ///
    /// # Errors
    /// Returns [`Error::Capacity`] if `capacity` exceeds the id space, or
    /// [`Error::Configuration`] if a label is 0 or beyond `capacity`.
    pub fn from_labels(labels: Vec<ClusterId>, capacity: usize) -> Result<Self> {
        if capacity > MAX_CLUSTERS {
            return Err(Error::Capacity {
                requested: capacity,
                max: MAX_CLUSTERS,
            });
        }
        let mut counts = vec![0; capacity];
        for &label in &labels {
            if label == 0 || usize::from(label) > capacity {
                return Err(Error::Configuration(format!(
                    "cluster label {label} outside 1..={capacity}"
                )));
            }
            counts[slot(label)] += 1;
        }
        Ok(Self { counts, labels })
    }

    /// Number of cluster slots, live or tombstoned.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.counts.len()
    }

    /// Number of spikes.
    #[must_use]
    pub fn spikes(&self) -> usize {
        self.labels.len()
    }

    /// Spike count of cluster `id`.
    #[must_use]
    pub fn count(&self, id: ClusterId) -> usize {
        self.counts[slot(id)]
    }

    /// Sum of all cluster counts.
    #[must_use]
    pub fn total(&self) -> usize {
        self.counts.iter().sum()
    }

    /// Ids with a non-zero count.
    #[must_use]
    pub fn live(&self) -> LiveSet {
        self.counts
            .iter()
            .enumerate()
            .filter(|(_, &n)| n > 0)
            .map(|(index, _)| id_of(index))
            .collect()
    }

    /// Number of live clusters.
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.counts.iter().filter(|&&n| n > 0).count()
    }

    /// Checks that counts agree with labels.
    ///
    /// # Errors
    /// Returns [`Error::SizeMismatch`] when the counts do not sum to the
    /// spike count, or when a label points past the count array.
    pub fn validate(&self) -> Result<()> {
        if self.total() != self.spikes() {
            return Err(Error::size_mismatch(
                "cluster counts",
                self.spikes(),
                self.total(),
            ));
        }
        if let Some(&label) = self
            .labels
            .iter()
            .find(|&&l| l == 0 || usize::from(l) > self.capacity())
        {
            return Err(Error::size_mismatch(
                "cluster slots",
                usize::from(label),
                self.capacity(),
            ));
        }
        Ok(())
    }

    /// Maps live ids onto `1..=live_count` in ascending order.
    ///
    /// Returns the relabeled partition (capacity equal to the live count)
    /// and the old id of every new slot.
    #[must_use]
    pub fn relabel(&self) -> (Partition, Vec<ClusterId>) {
        let mut map = [0 as ClusterId; MAX_CLUSTERS + 1];
        let mut old_ids = Vec::new();
        for id in self.live().iter() {
            old_ids.push(id);
            map[usize::from(id)] = id_of(old_ids.len() - 1);
        }
        let labels = self.labels.iter().map(|&l| map[usize::from(l)]).collect();
        let counts = old_ids.iter().map(|&id| self.count(id)).collect();
        (Partition { counts, labels }, old_ids)
    }
}

/// One executed merge: `high` was folded into `low`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct MergeRecord {
    /// Surviving cluster.
    pub low: ClusterId,
    /// Absorbed cluster, tombstoned after the merge.
    pub high: ClusterId,
}

impl MergeRecord {
    /// Creates a record, ordering the pair so that `low < high`.
    #[must_use]
    pub fn new(a: ClusterId, b: ClusterId) -> Self {
        Self {
            low: a.min(b),
            high: a.max(b),
        }
    }
}

/// Configuration of the initial over-clustering step.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct ClusterConfig {
    /// Number of bisection rounds; up to `2^bisections` clusters.
    pub bisections: u32,
    /// Maximum reassignment iterations per round.
    pub assign_iterations: usize,
    /// Minimum spikes per cluster.
    pub min_spikes: usize,
    /// Random spike pairs sampled to estimate the centroid jitter scale.
    pub distance_samples: usize,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            bisections: 5,
            assign_iterations: 10,
            min_spikes: 15,
            distance_samples: 5000,
        }
    }
}

impl ClusterConfig {
    /// Creates a clustering configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the number of bisection rounds.
    #[must_use]
    pub fn with_bisections(mut self, bisections: u32) -> Self {
        self.bisections = bisections;
        self
    }

    /// Sets the reassignment iteration limit.
    #[must_use]
    pub fn with_assign_iterations(mut self, iterations: usize) -> Self {
        self.assign_iterations = iterations;
        self
    }

    /// Sets the minimum cluster size.
    #[must_use]
    pub fn with_min_spikes(mut self, min_spikes: usize) -> Self {
        self.min_spikes = min_spikes;
        self
    }

    /// Sets the number of sampled spike pairs.
    #[must_use]
    pub fn with_distance_samples(mut self, samples: usize) -> Self {
        self.distance_samples = samples;
        self
    }

    /// Number of cluster slots this configuration can produce.
    #[must_use]
    pub fn capacity(&self) -> usize {
        1usize.checked_shl(self.bisections).unwrap_or(usize::MAX)
    }

    /// Checks parameters that do not depend on the data.
    ///
    /// # Errors
    /// Returns [`Error::Capacity`] if `2^bisections` does not fit the id
    /// space, or [`Error::Configuration`] for zero-valued limits.
    pub fn validate(&self) -> Result<()> {
        if self.capacity() > MAX_CLUSTERS {
            return Err(Error::Capacity {
                requested: self.capacity(),
                max: MAX_CLUSTERS,
            });
        }
        if self.assign_iterations == 0 {
            return Err(Error::Configuration(
                "assign_iterations must be at least 1".into(),
            ));
        }
        if self.min_spikes == 0 {
            return Err(Error::Configuration("min_spikes must be at least 1".into()));
        }
        if self.distance_samples == 0 {
            return Err(Error::Configuration(
                "distance_samples must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Summary of one electrode's sort.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SortStatistics {
    /// Spikes sorted.
    pub spikes: usize,
    /// Samples per aligned waveform.
    pub aligned_samples: usize,
    /// Principal components retained.
    pub components: usize,
    /// Live clusters after over-clustering.
    pub initial_clusters: usize,
    /// Live clusters after merging.
    pub final_clusters: usize,
    /// Merges executed.
    pub merges: usize,
}
