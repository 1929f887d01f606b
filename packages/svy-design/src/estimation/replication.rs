// src/estimation/replication.rs
//! Replication-based variance estimation

use rayon::prelude::*;

use crate::design::{Replicate, ReplicateWeights, VarianceCenter};
use crate::error::Result;

/// Full-sample estimate with its replicate estimates and variance.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplicateEstimate {
    pub estimate: f64,
    pub replicates: Vec<f64>,
    pub variance: f64,
}

/// Compute variance from replicate estimates
///
/// # Arguments
/// * `theta_full` - Full sample estimate
/// * `theta_reps` - Vector of replicate estimates
/// * `rep_coefs` - Replicate coefficients
/// * `center` - Centering point (FullSample or ReplicateMean)
pub fn variance_from_replicates(
    theta_full: f64,
    theta_reps: &[f64],
    rep_coefs: &[f64],
    center: VarianceCenter,
) -> f64 {
    let n_reps = theta_reps.len();
    if n_reps == 0 {
        return 0.0;
    }

    let center_value = match center {
        VarianceCenter::FullSample => theta_full,
        VarianceCenter::ReplicateMean => theta_reps.iter().sum::<f64>() / n_reps as f64,
    };

    theta_reps
        .iter()
        .zip(rep_coefs)
        .map(|(&rep, &c)| {
            let diff = rep - center_value;
            c * diff * diff
        })
        .sum()
}

/// Evaluate `estimator` under every replicate weight column, in replicate order.
///
/// A zero denominator in any replicate fails the whole evaluation and names
/// that replicate (1-based).
pub fn replicate_estimates<F>(replicates: &ReplicateWeights, estimator: F) -> Result<Vec<f64>>
where
    F: Fn(&[f64]) -> Result<f64> + Sync,
{
    (0..replicates.n_replicates())
        .into_par_iter()
        .map(|r| {
            let weights = replicates.column(r).to_vec();
            estimator(&weights).map_err(|e| e.in_replicate(r + 1))
        })
        .collect()
}

/// Full-sample and replicate estimates of one statistic.
pub fn replicate_variance<F>(design: &Replicate, estimator: F) -> Result<ReplicateEstimate>
where
    F: Fn(&[f64]) -> Result<f64> + Sync,
{
    let estimate = estimator(design.base().weights())?;
    let reps = design.replicates();
    let replicates = replicate_estimates(reps, &estimator)?;
    let variance =
        variance_from_replicates(estimate, &replicates, reps.coefficients(), reps.center());
    Ok(ReplicateEstimate { estimate, replicates, variance })
}
