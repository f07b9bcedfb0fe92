#![allow(
    clippy::uninlined_format_args,
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss
)]
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal, StandardNormal};
use spikesort_algorithms::{
    sort_components, sort_electrodes, AgglomerativeMerger, ClusterConfig, CutoffEstimator, ElectrodeInput,
    EnergyModel, ExponentialEnergy, InitialClusterer, SortConfig,
};
use spikesort_core::config::BootstrapConfig;
use spikesort_core::waveform::{Components, RawWaveforms};
use spikesort_core::Error;

/// Far below any strength inside a cloud, far above the strength between
/// clouds fifty units apart.
const CLOUD_CUTOFF: f64 = 1e-6;

fn gaussian_clouds(centres: &[(f64, f64)], per_cloud: usize, seed: u64) -> Components {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut columns = Vec::with_capacity(centres.len() * per_cloud);
    for &(x, y) in centres {
        for _ in 0..per_cloud {
            let dx: f64 = StandardNormal.sample(&mut rng);
            let dy: f64 = StandardNormal.sample(&mut rng);
            columns.push([x + dx, y + dy]);
        }
    }
    Components::from_columns(&columns).unwrap()
}

fn cluster_config(bisections: u32) -> ClusterConfig {
    ClusterConfig::new()
        .with_bisections(bisections)
        .with_assign_iterations(10)
        .with_min_spikes(5)
}

#[test]
fn test_two_separated_clouds_merge_to_two_clusters() {
    let components = gaussian_clouds(&[(0.0, 0.0), (50.0, 50.0)], 100, 21);
    let mut rng = StdRng::seed_from_u64(21);
    let initial = InitialClusterer::new(cluster_config(3))
        .cluster(&components, &mut rng)
        .unwrap();
    let initial_count = initial.partition.live_count();
    assert!(initial_count >= 2, "only {} initial clusters", initial_count);
    assert_eq!(initial.partition.total(), 200);

    let model = ExponentialEnergy::new();
    let energy = model
        .build_energy(&components, &initial.partition, initial.scale)
        .unwrap();
    let outcome = AgglomerativeMerger::new(model)
        .merge(initial.partition, energy, CLOUD_CUTOFF)
        .unwrap();

    let (partition, _) = outcome.partition.relabel();
    assert_eq!(partition.live_count(), 2, "counts {:?}", partition.counts);
    assert_eq!(partition.counts, vec![100, 100]);
    assert_eq!(outcome.log.len(), initial_count - 2);
    assert!(outcome.strengths.iter().all(|&s| s >= CLOUD_CUTOFF));
    assert!(partition.labels[..100].iter().all(|&l| l == partition.labels[0]));
    assert!(partition.labels[100..].iter().all(|&l| l == partition.labels[100]));
}

fn estimated_cutoff_config(bisections: u32) -> SortConfig {
    SortConfig::new()
        .with_cluster(cluster_config(bisections))
        .with_bootstrap(BootstrapConfig::new().with_resamples(300))
}

#[test]
fn test_single_cloud_collapses_to_one_cluster() {
    let components = gaussian_clouds(&[(3.0, -2.0)], 50, 5);
    for bisections in 0..=4 {
        let config = estimated_cutoff_config(bisections);
        for seed in 0..5 {
            let mut rng = StdRng::seed_from_u64(seed);
            let outcome = sort_components(&components, &config, &mut rng).unwrap();
            let statistics = &outcome.statistics;

            assert_eq!(
                statistics.final_clusters,
                1,
                "bisections {} seed {}: {} clusters at cutoff {}",
                bisections,
                seed,
                statistics.initial_clusters,
                outcome.cutoff
            );
            assert_eq!(outcome.counts, vec![50]);
            assert!(outcome.labels.iter().all(|&l| l == 1));
            assert_eq!(outcome.merge_log.len(), statistics.initial_clusters - 1);
        }
    }
}

#[test]
fn test_two_clouds_stay_apart_with_estimated_cutoff() {
    let components = gaussian_clouds(&[(0.0, 0.0), (50.0, 50.0)], 100, 21);
    let config = estimated_cutoff_config(3);
    for seed in 0..4 {
        let mut rng = StdRng::seed_from_u64(seed);
        let outcome = sort_components(&components, &config, &mut rng).unwrap();

        assert_eq!(outcome.counts, vec![100, 100], "seed {}", seed);
        assert!(outcome.labels[..100].iter().all(|&l| l == outcome.labels[0]));
        assert!(outcome.labels[100..].iter().all(|&l| l == outcome.labels[100]));
        assert_ne!(outcome.labels[0], outcome.labels[100]);
    }
}

#[test]
fn test_merges_never_accept_below_estimated_cutoff() {
    let components = gaussian_clouds(&[(0.0, 0.0), (6.0, 0.0), (0.0, 6.0)], 40, 9);
    let mut rng = StdRng::seed_from_u64(9);
    let initial = InitialClusterer::new(cluster_config(4))
        .cluster(&components, &mut rng)
        .unwrap();
    let model = ExponentialEnergy::new();
    let energy = model
        .build_energy(&components, &initial.partition, initial.scale)
        .unwrap();
    let cutoff = CutoffEstimator::new(BootstrapConfig::new().with_resamples(300))
        .estimate(&model, &energy, &initial.partition, &mut rng)
        .unwrap();
    assert!(cutoff >= 0.0);

    let before = initial.partition.live_count();
    let outcome = AgglomerativeMerger::new(model)
        .merge(initial.partition, energy, cutoff)
        .unwrap();
    assert_eq!(outcome.log.len(), before - outcome.partition.live_count());
    assert_eq!(outcome.partition.total(), 120);
    assert!(outcome.strengths.iter().all(|&s| s >= cutoff));
    assert!(outcome.log.iter().all(|r| r.low < r.high));
}

/// Negative-going spikes of two shapes with jittered onset and noise.
fn synthetic_electrode(id: u32, per_unit: usize, seed: u64) -> ElectrodeInput {
    let samples = 40;
    let mut rng = StdRng::seed_from_u64(seed);
    let noise = Normal::new(0.0, 8.0).unwrap();
    let mut waveforms = RawWaveforms::with_capacity(samples, 2 * per_unit);
    for unit in 0..2 {
        let (amplitude, width) = if unit == 0 { (-600.0, 1.5) } else { (-250.0, 3.0) };
        for k in 0..per_unit {
            let centre = 14.0 + (k % 4) as f64 * 0.5;
            let wave: Vec<i16> = (0..samples)
                .map(|i| {
                    let t = (i as f64 - centre) / width;
                    let value = amplitude * (-0.5 * t * t).exp() + noise.sample(&mut rng);
                    value.round() as i16
                })
                .collect();
            waveforms.push(&wave).unwrap();
        }
    }
    ElectrodeInput {
        id,
        threshold: -50.0,
        waveforms,
    }
}

#[test]
fn test_sort_electrodes_is_reproducible() {
    let inputs = vec![synthetic_electrode(1, 60, 1), synthetic_electrode(2, 60, 2)];
    let config = SortConfig::new()
        .with_seed(42)
        .with_bootstrap(BootstrapConfig::new().with_resamples(200));

    let first = sort_electrodes(&inputs, &config).unwrap();
    let second = sort_electrodes(&inputs, &config).unwrap();
    assert_eq!(first, second);

    for outcome in &first {
        assert_eq!(outcome.labels.len(), 120);
        assert_eq!(outcome.counts.iter().sum::<usize>(), 120);
        assert!(outcome.counts.iter().all(|&n| n > 0));
        assert_eq!(outcome.statistics.aligned_samples, 28);
        assert_eq!(
            outcome.statistics.merges,
            outcome.statistics.initial_clusters - outcome.statistics.final_clusters
        );
        let max_label = usize::from(*outcome.labels.iter().max().unwrap());
        assert_eq!(max_label, outcome.counts.len());
    }
}

#[test]
fn test_failing_electrode_fails_the_batch() {
    let inputs = vec![synthetic_electrode(1, 60, 3), synthetic_electrode(2, 5, 4)];
    let err = sort_electrodes(&inputs, &SortConfig::new()).unwrap_err();
    assert!(matches!(err, Error::Configuration(_)), "{:?}", err);
}
