//! Over-clustering by repeated centroid bisection.
//!
//! Starting from a single cluster at the component mean, every round splits
//! each live centroid into two jittered children, then alternates
//! nearest-centroid assignment with centroid updates. Clusters that fall
//! below the minimum size are dissolved into their members' next-nearest
//! survivors, so every returned cluster holds at least `min_spikes` spikes.
#![allow(clippy::cast_precision_loss)]

use std::collections::HashSet;

use log::{debug, info};
use rand::Rng;
use rand_distr::{Distribution, StandardNormal};
use rayon::prelude::*;
use spikesort_core::clustering::{id_of, slot, ClusterConfig, ClusterId, LiveSet, Partition};
use spikesort_core::error::{Error, Result};
use spikesort_core::waveform::{squared_distance, Components};

/// Heuristic divisor turning the mean inter-spike distance into the
/// per-dimension centroid jitter.
const JITTER_DIVISOR: f64 = 100.0;

/// Divisor applied to the residual spread when deriving the energy scale.
const SCALE_DIVISOR: f64 = 10.0;

/// Draw budget of the pair sampler, per pair in the pool.
const MAX_DRAWS_PER_PAIR: usize = 8;

/// Result of [`InitialClusterer::cluster`].
#[derive(Debug, Clone)]
pub struct InitialClustering {
    /// Dense partition with ids `1..=C`.
    pub partition: Partition,
    /// Residual within-cluster spread, used to scale interface energies.
    pub scale: f64,
    /// Standard deviation of the centroid perturbation.
    pub jitter: f64,
}

/// Working state of one bisection run.
struct Centroids {
    dims: usize,
    values: Vec<f64>,
    live: LiveSet,
}

impl Centroids {
    fn new(dims: usize, capacity: usize) -> Self {
        Self {
            dims,
            values: vec![0.0; dims * capacity],
            live: LiveSet::new(),
        }
    }

    fn get(&self, id: ClusterId) -> &[f64] {
        let start = slot(id) * self.dims;
        &self.values[start..start + self.dims]
    }

    fn get_mut(&mut self, id: ClusterId) -> &mut [f64] {
        let start = slot(id) * self.dims;
        &mut self.values[start..start + self.dims]
    }

    /// Nearest live centroid to `point`, skipping `exclude`. Ties go to the
    /// lower id.
    fn nearest(&self, point: &[f64], exclude: Option<ClusterId>) -> Option<ClusterId> {
        let mut best = None;
        let mut best_distance = f64::INFINITY;
        for id in self.live.iter() {
            if Some(id) == exclude {
                continue;
            }
            let d = squared_distance(point, self.get(id));
            if best.is_none() || d < best_distance {
                best = Some(id);
                best_distance = d;
            }
        }
        best
    }

    /// Replaces every live centroid with the mean of its members.
    fn update(&mut self, components: &Components, partition: &Partition) {
        let live = self.live;
        for id in live.iter() {
            self.get_mut(id).fill(0.0);
        }
        for (point, &label) in components.columns().zip(&partition.labels) {
            self.get_mut(label)
                .iter_mut()
                .zip(point)
                .for_each(|(c, v)| *c += v);
        }
        for id in live.iter() {
            let n = partition.count(id) as f64;
            self.get_mut(id).iter_mut().for_each(|c| *c /= n);
        }
    }
}

/// Partitions spike components into many small clusters.
#[derive(Debug, Clone, Default)]
pub struct InitialClusterer {
    config: ClusterConfig,
}

impl InitialClusterer {
    /// Creates a clusterer with the given configuration.
    #[must_use]
    pub fn new(config: ClusterConfig) -> Self {
        Self { config }
    }

    /// Current configuration.
    #[must_use]
    pub fn config(&self) -> &ClusterConfig {
        &self.config
    }

    /// Runs the bisection rounds.
    ///
    /// The result depends only on the inputs and the state of `rng`.
    ///
    /// # Errors
    /// Returns [`Error::Capacity`] if `2^bisections` exceeds the id space,
    /// [`Error::Configuration`] if there are fewer spikes than `min_spikes`,
    /// and [`Error::DegenerateInput`] for non-finite components.
    pub fn cluster<R: Rng>(
        &self,
        components: &Components,
        rng: &mut R,
    ) -> Result<InitialClustering> {
        self.config.validate()?;
        let spikes = components.len();
        if spikes < self.config.min_spikes {
            return Err(Error::Configuration(format!(
                "{spikes} spikes is fewer than the minimum cluster size {}",
                self.config.min_spikes
            )));
        }
        if components.as_slice().iter().any(|v| !v.is_finite()) {
            return Err(Error::DegenerateInput(
                "components contain non-finite values".into(),
            ));
        }

        let dims = components.dims();
        let capacity = self.config.capacity();
        let jitter = self.jitter_scale(components, rng);
        debug!("centroid jitter {jitter:.4} over {dims} dimensions");

        let mut centroids = Centroids::new(dims, capacity);
        centroids.live.insert(1);
        let mut partition = Partition::from_labels(vec![1; spikes], capacity)?;
        centroids.update(components, &partition);

        for round in 1..=self.config.bisections {
            split(&mut centroids, &mut partition, jitter, rng);
            let iterations = self.refine(components, &mut centroids, &mut partition);
            debug!(
                "bisection {round}: {} live clusters after {iterations} iterations",
                centroids.live.len()
            );
        }

        let scale = residual_scale(components, &partition, &centroids);
        let (partition, _) = partition.relabel();
        info!(
            "initial clustering: {} clusters from {spikes} spikes (scale {scale:.4})",
            partition.live_count()
        );
        Ok(InitialClustering {
            partition,
            scale,
            jitter,
        })
    }

    /// Mean distance over distinct spike pairs, divided by
    /// `100 * dims`. All pairs are used when there are no more of them than
    /// the sampling budget.
    fn jitter_scale<R: Rng>(&self, components: &Components, rng: &mut R) -> f64 {
        let spikes = components.len();
        let pairs = spikes * spikes.saturating_sub(1) / 2;
        let (sum, taken) = if pairs <= self.config.distance_samples {
            let mut sum = 0.0;
            for a in 0..spikes {
                for b in a + 1..spikes {
                    sum += components.distance(a, b);
                }
            }
            (sum, pairs)
        } else {
            let sampled = sample_pairs(spikes, self.config.distance_samples, rng);
            let sum = sampled.iter().map(|&(a, b)| components.distance(a, b)).sum();
            (sum, sampled.len())
        };
        if taken == 0 {
            return 0.0;
        }
        sum / taken as f64 / JITTER_DIVISOR / components.dims() as f64
    }

    /// Assignment iterations of one round. Returns how many ran.
    fn refine(
        &self,
        components: &Components,
        centroids: &mut Centroids,
        partition: &mut Partition,
    ) -> usize {
        for iteration in 1..=self.config.assign_iterations {
            let labels: Vec<ClusterId> = components
                .as_slice()
                .par_chunks(components.dims())
                .map(|point| centroids.nearest(point, None).unwrap_or(1))
                .collect();
            let changed = labels != partition.labels;

            partition.counts.fill(0);
            for &label in &labels {
                partition.counts[slot(label)] += 1;
            }
            partition.labels = labels;

            let live = centroids.live;
            for id in live.iter() {
                if partition.count(id) == 0 {
                    centroids.live.remove(id);
                }
            }
            self.evict_small(components, centroids, partition);
            centroids.update(components, partition);

            if !changed {
                return iteration;
            }
        }
        self.config.assign_iterations
    }

    /// Dissolves clusters below `min_spikes`, in ascending id order, into
    /// their members' next-nearest surviving clusters.
    ///
    /// Survivors only grow, so a single pass leaves every remaining cluster
    /// at or above the minimum.
    fn evict_small(
        &self,
        components: &Components,
        centroids: &mut Centroids,
        partition: &mut Partition,
    ) {
        let live = centroids.live;
        for id in live.iter() {
            let n = partition.count(id);
            if n >= self.config.min_spikes || centroids.live.len() < 2 {
                continue;
            }
            centroids.live.remove(id);
            for (spike, label) in partition.labels.iter_mut().enumerate() {
                if *label != id {
                    continue;
                }
                if let Some(target) = centroids.nearest(components.column(spike), Some(id)) {
                    *label = target;
                    partition.counts[slot(target)] += 1;
                }
            }
            partition.counts[slot(id)] = 0;
            debug!("evicted cluster {id} with {n} spikes");
        }
    }
}

/// Draws up to `count` distinct unordered pairs `(a, b)`, `a < b`, of
/// `spikes` spikes. Repeated pairs are redrawn; the number of draws is
/// bounded by `MAX_DRAWS_PER_PAIR` times the size of the pair pool. Asking
/// for the whole pool returns every pair in order.
fn sample_pairs<R: Rng>(spikes: usize, count: usize, rng: &mut R) -> Vec<(usize, usize)> {
    let pool = spikes * spikes.saturating_sub(1) / 2;
    if count >= pool {
        return (0..spikes)
            .flat_map(|a| (a + 1..spikes).map(move |b| (a, b)))
            .collect();
    }
    let wanted = count;
    let mut seen = HashSet::with_capacity(wanted);
    let mut pairs = Vec::with_capacity(wanted);
    let mut draws = 0;
    let budget = pool.saturating_mul(MAX_DRAWS_PER_PAIR);
    while pairs.len() < wanted && draws < budget {
        draws += 1;
        let a = rng.gen_range(0..spikes);
        let mut b = rng.gen_range(0..spikes - 1);
        if b >= a {
            b += 1;
        }
        let pair = (a.min(b), a.max(b));
        if seen.insert(pair) {
            pairs.push(pair);
        }
    }
    if pairs.len() < wanted {
        debug!(
            "sampled {} of {wanted} distinct pairs in {draws} draws",
            pairs.len()
        );
    }
    pairs
}

/// Duplicates every live centroid into slots `2i` and `2i + 1` (0-based) and
/// jitters both children.
fn split<R: Rng>(centroids: &mut Centroids, partition: &mut Partition, jitter: f64, rng: &mut R) {
    let parents: Vec<ClusterId> = centroids.live.iter().collect();
    let mut next = Centroids::new(centroids.dims, partition.capacity());
    for parent in parents {
        let origin = centroids.get(parent).to_vec();
        for child in [id_of(2 * slot(parent)), id_of(2 * slot(parent) + 1)] {
            for (c, &o) in next.get_mut(child).iter_mut().zip(&origin) {
                let noise: f64 = StandardNormal.sample(rng);
                *c = o + jitter * noise;
            }
            next.live.insert(child);
        }
    }
    *centroids = next;

    partition.counts.fill(0);
    for label in &mut partition.labels {
        *label = id_of(2 * slot(*label));
        partition.counts[slot(*label)] += 1;
    }
}

/// `sqrt(trace cov(S) - trace cov(C)) / 10`, where `C` holds each spike's
/// assigned centroid.
fn residual_scale(components: &Components, partition: &Partition, centroids: &Centroids) -> f64 {
    let spikes = components.len();
    let dims = components.dims();
    let denominator = spikes.saturating_sub(1).max(1) as f64;
    let mut total = 0.0;
    for d in 0..dims {
        let raw: Vec<f64> = components.columns().map(|c| c[d]).collect();
        let assigned: Vec<f64> = partition
            .labels
            .iter()
            .map(|&l| centroids.get(l)[d])
            .collect();
        total += scatter(&raw) - scatter(&assigned);
    }
    (total.max(0.0) / denominator).sqrt() / SCALE_DIVISOR
}

/// Sum of squared deviations from the mean.
fn scatter(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    values.iter().map(|v| (v - mean) * (v - mean)).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn cloud(centres: &[(f64, f64)], per_cloud: usize, seed: u64) -> Components {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut columns = Vec::new();
        for &(x, y) in centres {
            for _ in 0..per_cloud {
                let dx: f64 = StandardNormal.sample(&mut rng);
                let dy: f64 = StandardNormal.sample(&mut rng);
                columns.push([x + dx, y + dy]);
            }
        }
        Components::from_columns(&columns).unwrap()
    }

    fn clusterer(bisections: u32, min_spikes: usize) -> InitialClusterer {
        InitialClusterer::new(
            ClusterConfig::new()
                .with_bisections(bisections)
                .with_assign_iterations(10)
                .with_min_spikes(min_spikes),
        )
    }

    #[test]
    fn test_every_cluster_meets_minimum() {
        let components = cloud(&[(0.0, 0.0), (30.0, 30.0)], 100, 1);
        let result = clusterer(4, 8)
            .cluster(&components, &mut StdRng::seed_from_u64(7))
            .unwrap();
        let partition = &result.partition;
        assert!(partition.validate().is_ok());
        assert_eq!(partition.total(), 200);
        assert!(partition.live_count() >= 2);
        assert!(partition.counts.iter().all(|&n| n >= 8));
        assert_eq!(partition.live_count(), partition.capacity());
    }

    #[test]
    fn test_same_seed_same_result() {
        let components = cloud(&[(0.0, 0.0), (20.0, -5.0)], 60, 2);
        let first = clusterer(3, 5)
            .cluster(&components, &mut StdRng::seed_from_u64(99))
            .unwrap();
        let second = clusterer(3, 5)
            .cluster(&components, &mut StdRng::seed_from_u64(99))
            .unwrap();
        assert_eq!(first.partition, second.partition);
        assert!((first.scale - second.scale).abs() < f64::EPSILON);
    }

    #[test]
    fn test_separated_clouds_are_not_mixed() {
        let components = cloud(&[(0.0, 0.0), (50.0, 50.0)], 100, 3);
        let result = clusterer(3, 5)
            .cluster(&components, &mut StdRng::seed_from_u64(4))
            .unwrap();
        let labels = &result.partition.labels;
        for a in 0..100 {
            for b in 100..200 {
                assert_ne!(labels[a], labels[b], "spikes {a} and {b} share a cluster");
            }
        }
    }

    #[test]
    fn test_scale_is_positive_for_spread_clusters() {
        let components = cloud(&[(0.0, 0.0)], 80, 5);
        let result = clusterer(2, 5)
            .cluster(&components, &mut StdRng::seed_from_u64(5))
            .unwrap();
        assert!(result.scale > 0.0);
        assert!(result.jitter > 0.0);
    }

    #[test]
    fn test_too_few_spikes_is_rejected() {
        let components = cloud(&[(0.0, 0.0)], 4, 6);
        let err = clusterer(2, 5)
            .cluster(&components, &mut StdRng::seed_from_u64(0))
            .unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn test_too_many_bisections_is_rejected() {
        let components = cloud(&[(0.0, 0.0)], 20, 6);
        let err = clusterer(8, 1)
            .cluster(&components, &mut StdRng::seed_from_u64(0))
            .unwrap_err();
        assert!(matches!(err, Error::Capacity { .. }));
    }

    #[test]
    fn test_sampled_pairs_are_distinct() {
        let mut rng = StdRng::seed_from_u64(11);
        // 20 spikes give 190 pairs; ask for most of them.
        let pairs = sample_pairs(20, 150, &mut rng);
        assert_eq!(pairs.len(), 150);
        assert!(pairs.iter().all(|&(a, b)| a < b && b < 20));
        let unique: HashSet<_> = pairs.iter().copied().collect();
        assert_eq!(unique.len(), pairs.len());
    }

    #[test]
    fn test_pair_sampling_stops_at_pool_size() {
        let pairs = sample_pairs(5, 50, &mut StdRng::seed_from_u64(12));
        assert_eq!(pairs.len(), 10);
        assert_eq!(pairs[0], (0, 1));
        assert_eq!(pairs[9], (3, 4));
        assert!(sample_pairs(1, 5, &mut StdRng::seed_from_u64(12)).is_empty());
    }

    #[test]
    fn test_sampled_jitter_is_close_to_exhaustive() {
        let components = cloud(&[(0.0, 0.0)], 120, 8);
        let mut rng = StdRng::seed_from_u64(3);
        let sampled = InitialClusterer::new(ClusterConfig::new().with_distance_samples(3000))
            .jitter_scale(&components, &mut rng);
        let exhaustive = InitialClusterer::new(ClusterConfig::new().with_distance_samples(10_000))
            .jitter_scale(&components, &mut rng);
        assert!((sampled - exhaustive).abs() < 0.1 * exhaustive, "{sampled} vs {exhaustive}");
    }

    #[test]
    fn test_identical_spikes_collapse_to_one_cluster() {
        let components = Components::from_columns(&vec![[1.0, 1.0]; 30]).unwrap();
        let result = clusterer(3, 2)
            .cluster(&components, &mut StdRng::seed_from_u64(1))
            .unwrap();
        assert_eq!(result.partition.live_count(), 1);
        assert_eq!(result.partition.counts, vec![30]);
        assert!(result.scale.abs() < f64::EPSILON);
    }
}
