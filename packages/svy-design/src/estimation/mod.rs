// src/estimation/mod.rs
pub mod domain;
pub mod estimators;
pub mod replication;
pub mod result;
pub mod taylor;

pub use domain::{for_each_domain, Domains};
pub use estimators::{mean, median, proportion, quantile, ratio, total};
pub use replication::{replicate_estimates, variance_from_replicates, ReplicateEstimate};
pub use result::{EstimateRow, Estimates, Statistic};
pub use taylor::{taylor_variance, weighted_quantile, QuantileMethod};
