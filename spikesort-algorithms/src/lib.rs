//! spikesort-algorithms: The stages of automated spike sorting.
//!
//! This crate provides the sorting pipeline, stage by stage:
//! - **Alignment** - sub-sample peak alignment by spline resampling
//! - **Reduction** - significance windowing and PCA
//! - **Initial clustering** - iterative centroid bisection
//! - **Energy** - exponential interface energy and connection strength
//! - **Cutoff** - BCa bootstrap merge threshold
//! - **Merging** - greedy agglomeration with in-place energy updates
//!
#![warn(missing_docs)]

mod align;
mod cutoff;
mod energy;
mod initial;
mod merge;
mod processing;
mod reduce;
pub mod spline;

pub use align::{PeakPosition, WaveformAligner};
pub use cutoff::{percentile, BootstrapBound, CutoffEstimator};
pub use energy::{ExponentialEnergy, KERNEL_WIDTH};
pub use initial::{InitialClusterer, InitialClustering};
pub use merge::{AgglomerativeMerger, MergeOutcome, PairMask, MIN_CONNECTION};
pub use processing::{
    electrode_seed, sort_components, sort_electrode, sort_electrodes, ElectrodeInput, SortOutcome,
};
pub use reduce::{significance_window, Reduction, WindowedDimReducer};
pub use spline::CubicSpline;

// Re-export core types used across the stage APIs
pub use spikesort_core::clustering::{ClusterConfig, MergeRecord, Partition, SortStatistics};
pub use spikesort_core::config::SortConfig;
pub use spikesort_core::energy::{EnergyModel, InterfaceEnergy};
