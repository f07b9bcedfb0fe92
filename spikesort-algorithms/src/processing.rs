//! High-level helpers that chain every sorting stage for one or many
//! electrodes.

use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use spikesort_core::clustering::{ClusterId, MergeRecord, SortStatistics};
use spikesort_core::config::SortConfig;
use spikesort_core::energy::EnergyModel;
use spikesort_core::error::{Error, Result};
use spikesort_core::waveform::{Components, Polarity, RawWaveforms};

use crate::{
    AgglomerativeMerger, CutoffEstimator, ExponentialEnergy, InitialClusterer, WaveformAligner,
    WindowedDimReducer,
};

/// Threshold-crossed waveforms recorded on one electrode.
#[derive(Debug, Clone, PartialEq)]
pub struct ElectrodeInput {
    /// Electrode identifier, carried through to the output.
    pub id: u32,
    /// Detection threshold; its sign selects the peak polarity.
    pub threshold: f64,
    /// Raw waveforms in ADC units.
    pub waveforms: RawWaveforms,
}

/// Result of sorting one electrode.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SortOutcome {
    /// Final cluster id of every spike, dense in `1..=C`.
    pub labels: Vec<ClusterId>,
    /// Spike count of every final cluster.
    pub counts: Vec<usize>,
    /// Executed merges, in ids of the initial partition.
    pub merge_log: Vec<MergeRecord>,
    /// Merge cutoff that was in force.
    pub cutoff: f64,
    /// Run summary.
    pub statistics: SortStatistics,
}

/// Seed of the random stream for electrode `index`.
#[must_use]
pub fn electrode_seed(seed: u64, index: usize) -> u64 {
    seed ^ (index as u64).wrapping_add(1).wrapping_mul(0x9E37_79B9_7F4A_7C15)
}

/// Aligns, reduces, clusters and merges one electrode's waveforms.
///
/// # Errors
/// Returns the first error raised by any stage; an empty batch is
/// [`Error::DegenerateInput`].
pub fn sort_electrode<R: Rng>(
    raw: &RawWaveforms,
    polarity: Polarity,
    config: &SortConfig,
    rng: &mut R,
) -> Result<SortOutcome> {
    if raw.is_empty() {
        return Err(Error::DegenerateInput("no waveforms to sort".into()));
    }
    config.validate(raw.samples())?;

    let aligned = WaveformAligner::new(config.align.clone()).align(raw, polarity)?;
    let reduction = WindowedDimReducer::new(config.reduce.clone()).window_and_reduce(&aligned)?;

    let mut outcome = sort_components(&reduction.components, config, rng)?;
    outcome.statistics.aligned_samples = aligned.samples();
    Ok(outcome)
}

/// Clustering half of the pipeline: over-cluster, estimate the cutoff,
/// merge and relabel.
///
/// # Errors
/// Returns the first error raised by any stage.
pub fn sort_components<R: Rng>(
    components: &Components,
    config: &SortConfig,
    rng: &mut R,
) -> Result<SortOutcome> {
    let initial = InitialClusterer::new(config.cluster.clone()).cluster(components, rng)?;
    let initial_clusters = initial.partition.live_count();

    let model = ExponentialEnergy::new();
    debug!("{} energy at scale {:.4}", model.name(), initial.scale);
    let energy = model.build_energy(components, &initial.partition, initial.scale)?;
    let cutoff = CutoffEstimator::new(config.bootstrap.clone()).estimate(
        &model,
        &energy,
        &initial.partition,
        rng,
    )?;
    let merged = AgglomerativeMerger::new(model).merge(initial.partition, energy, cutoff)?;

    let (partition, _) = merged.partition.relabel();
    let statistics = SortStatistics {
        spikes: components.len(),
        aligned_samples: 0,
        components: components.dims(),
        initial_clusters,
        final_clusters: partition.live_count(),
        merges: merged.log.len(),
    };
    Ok(SortOutcome {
        labels: partition.labels,
        counts: partition.counts,
        merge_log: merged.log,
        cutoff,
        statistics,
    })
}

/// Sorts independent electrodes in parallel.
///
/// Electrode `i` draws from a generator seeded with
/// [`electrode_seed`]`(config.seed, i)`, so results do not depend on thread
/// scheduling.
///
/// # Errors
/// Fails as a whole if any electrode fails.
pub fn sort_electrodes(inputs: &[ElectrodeInput], config: &SortConfig) -> Result<Vec<SortOutcome>> {
    let outcomes = inputs
        .par_iter()
        .enumerate()
        .map(|(index, electrode)| {
            let mut rng = StdRng::seed_from_u64(electrode_seed(config.seed, index));
            let polarity = Polarity::of_threshold(electrode.threshold);
            sort_electrode(&electrode.waveforms, polarity, config, &mut rng)
                .inspect_err(|e| warn!("electrode {} failed: {e}", electrode.id))
        })
        .collect::<Result<Vec<_>>>()?;

    info!(
        "sorted {} electrodes into {} units",
        outcomes.len(),
        outcomes.iter().map(|o| o.counts.len()).sum::<usize>()
    );
    Ok(outcomes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand_distr::{Distribution, StandardNormal};
    use spikesort_core::clustering::ClusterConfig;

    #[test]
    fn test_electrode_seeds_differ() {
        assert_ne!(electrode_seed(1, 0), electrode_seed(1, 1));
        assert_ne!(electrode_seed(0, 0), 0);
        assert_eq!(electrode_seed(9, 3), electrode_seed(9, 3));
    }

    #[test]
    fn test_empty_electrode_is_rejected() {
        let raw = RawWaveforms::new(40);
        let err = sort_electrode(
            &raw,
            Polarity::Negative,
            &SortConfig::new(),
            &mut StdRng::seed_from_u64(0),
        )
        .unwrap_err();
        assert!(matches!(err, Error::DegenerateInput(_)));
    }

    #[test]
    fn test_sort_components_conserves_spikes() {
        let mut rng = StdRng::seed_from_u64(8);
        let columns: Vec<[f64; 2]> = (0..60)
            .map(|_| {
                let x: f64 = StandardNormal.sample(&mut rng);
                let y: f64 = StandardNormal.sample(&mut rng);
                [x, y]
            })
            .collect();
        let components = Components::from_columns(&columns).unwrap();
        let config = SortConfig::new()
            .with_cluster(ClusterConfig::new().with_bisections(2).with_min_spikes(5));
        let outcome = sort_components(&components, &config, &mut rng).unwrap();

        assert_eq!(outcome.labels.len(), 60);
        assert_eq!(outcome.counts.iter().sum::<usize>(), 60);
        assert!(outcome.counts.iter().all(|&n| n > 0));
        assert_eq!(
            outcome.statistics.merges,
            outcome.statistics.initial_clusters - outcome.statistics.final_clusters
        );
    }
}
