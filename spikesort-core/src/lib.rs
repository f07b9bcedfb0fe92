//! spikesort-core: Core types, configuration and traits for spike sorting.
//!
//! This crate provides the waveform and component containers, the bounded
//! cluster id space, the interface energy arena, and the per-stage
//! configuration shared by the sorting algorithms.
//!

pub mod clustering;
pub mod config;
pub mod energy;
pub mod error;
pub mod waveform;

pub use clustering::{
    ClusterConfig, ClusterId, LiveSet, MergeRecord, Partition, SortStatistics, MAX_CLUSTERS,
};
pub use config::{AlignConfig, BootstrapConfig, ReduceConfig, SortConfig};
pub use energy::{ConnectionStrength, EnergyModel, InterfaceEnergy, TOMBSTONE_SELF_ENERGY};
pub use error::{Error, Result};
pub use waveform::{Components, Polarity, RawWaveforms, WaveformBatch, Waveforms};
