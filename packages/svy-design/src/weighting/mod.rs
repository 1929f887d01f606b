// src/weighting/mod.rs

pub mod replication;

pub use replication::{BootstrapConfig, JackknifeConfig, REPLICATE_PREFIX};
