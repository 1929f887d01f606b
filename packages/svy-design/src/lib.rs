// src/lib.rs
//! Design-based estimation from complex survey samples.
//!
//! A [`Design`] couples a polars unit table with its sampling design: simple
//! random, stratified, clustered, or a replicate-weight design derived from
//! one of those. Estimators ([`mean`], [`total`], [`ratio`], [`proportion`],
//! [`quantile`]) take a design, variable names and an optional domain column
//! and return [`Estimates`] with design-correct standard errors, by Taylor
//! linearization for analytic designs and from replicate spread otherwise.

pub mod design;
pub mod error;
pub mod estimation;
pub mod weighting;

pub use design::resolve::{Input, WeightSource};
pub use design::{
    Design, DesignKind, DesignSpec, Replicate, ReplicateMethod, ReplicateSelector,
    ReplicateWeights, SingletonMethod, VarianceCenter,
};
pub use design::replicate::ReplicateOptions;
pub use error::{Result, SurveyError};
pub use estimation::{
    for_each_domain, mean, median, proportion, quantile, ratio, total, EstimateRow, Estimates,
    QuantileMethod, Statistic,
};
pub use weighting::{BootstrapConfig, JackknifeConfig};
