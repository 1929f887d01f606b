// src/weighting/replication.rs
//
// Replicate weight creation for variance estimation methods:
// - Bootstrap (Rao-Wu rescaling within strata)
// - Jackknife (JKn, delete one PSU at a time)

use ndarray::{Array1, Array2};
use polars::prelude::*;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::design::{
    Design, PsuLayout, Replicate, ReplicateMethod, ReplicateWeights, VarianceCenter,
};
use crate::error::{Result, SurveyError};

/// Prefix of generated replicate columns (`replicate_1`, `replicate_2`, ...).
pub const REPLICATE_PREFIX: &str = "replicate_";

/// Bootstrap settings; all explicit, nothing process-wide.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BootstrapConfig {
    pub replicates: usize,
    pub seed: u64,
    /// Variance multiplier, e.g. `B/(B-1)`.
    pub scale: f64,
    pub center: VarianceCenter,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        BootstrapConfig { replicates: 4000, seed: 0, scale: 1.0, center: VarianceCenter::FullSample }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JackknifeConfig {
    pub center: VarianceCenter,
}

// ============================================================================
// PSU Ordering
// ============================================================================

/// PSU ids of every stratum, strata and PSUs both in label order.
///
/// Label order makes the resampling independent of how rows are arranged.
fn sorted_stratum_psus(layout: &PsuLayout) -> Result<Vec<Vec<u32>>> {
    let labels = layout.psus.psu.labels();
    layout
        .strata
        .sorted_groups()
        .into_iter()
        .filter(|&h| !layout.psus.psus_in(h).is_empty())
        .map(|h| {
            let mut psus = layout.psus.psus_in(h).to_vec();
            if psus.len() < 2 {
                return Err(SurveyError::singleton(layout.strata.label(h), psus.len()));
            }
            psus.sort_by(|&a, &b| labels[a as usize].cmp(&labels[b as usize]));
            Ok(psus)
        })
        .collect()
}

fn columns_to_matrix(n_obs: usize, columns: Vec<Array1<f64>>) -> Array2<f64> {
    let mut result = Array2::zeros((n_obs, columns.len()));
    for (r, col) in columns.into_iter().enumerate() {
        result.column_mut(r).assign(&col);
    }
    result
}

// ============================================================================
// Bootstrap
// ============================================================================

/// Rao-Wu rescaling bootstrap with `m_h = n_h - 1` PSUs drawn per stratum.
///
/// A PSU drawn `r` times gets multiplier `r · n_h/(n_h - 1)`. Replicate `b`
/// draws from its own ChaCha stream seeded with `seed + b`.
pub(crate) fn create_bootstrap_weights(
    wgt: &[f64],
    layout: &PsuLayout,
    n_reps: usize,
    seed: u64,
) -> Result<Array2<f64>> {
    if n_reps < 2 {
        return Err(SurveyError::InvalidReplicateCount { count: n_reps });
    }
    let n_obs = wgt.len();
    let stratum_psus = sorted_stratum_psus(layout)?;
    let psu_ids = layout.psus.psu.ids();
    let n_psus = layout.psus.psu.n_groups();

    let rep_weights: Vec<Array1<f64>> = (0..n_reps)
        .into_par_iter()
        .map(|r| {
            let mut rng = ChaCha8Rng::seed_from_u64(seed.wrapping_add(r as u64));
            let mut multiplier = vec![0.0; n_psus];
            for psus in &stratum_psus {
                let n_h = psus.len();
                let factor = n_h as f64 / (n_h - 1) as f64;
                for _ in 0..n_h - 1 {
                    let sel = psus[rng.gen_range(0..n_h as u64) as usize];
                    multiplier[sel as usize] += factor;
                }
            }
            Array1::from_iter(
                wgt.iter().zip(psu_ids).map(|(&w, &c)| w * multiplier[c as usize]),
            )
        })
        .collect();

    Ok(columns_to_matrix(n_obs, rep_weights))
}

// ============================================================================
// Jackknife
// ============================================================================

/// JKn: one replicate per PSU, zeroing it and scaling the rest of its stratum
/// by `n_h/(n_h - 1)`. Returns the weights and the `(n_h - 1)/n_h` coefficients.
pub(crate) fn create_jkn_weights(wgt: &[f64], layout: &PsuLayout) -> Result<(Array2<f64>, Vec<f64>)> {
    let n_obs = wgt.len();
    let stratum_psus = sorted_stratum_psus(layout)?;
    let psu_ids = layout.psus.psu.ids();
    let psu_stratum = &layout.psus.psu_stratum;

    // (deleted psu, its stratum, n_h) per replicate
    let deletions: Vec<(u32, u32, usize)> = stratum_psus
        .iter()
        .flat_map(|psus| psus.iter().map(move |&c| (c, psu_stratum[c as usize], psus.len())))
        .collect();
    if deletions.len() < 2 {
        return Err(SurveyError::InvalidReplicateCount { count: deletions.len() });
    }

    let rep_weights: Vec<Array1<f64>> = deletions
        .par_iter()
        .map(|&(del_psu, del_stratum, n_h)| {
            let factor = n_h as f64 / (n_h - 1) as f64;
            Array1::from_iter(wgt.iter().zip(psu_ids).map(|(&w, &c)| {
                if c == del_psu {
                    0.0
                } else if psu_stratum[c as usize] == del_stratum {
                    w * factor
                } else {
                    w
                }
            }))
        })
        .collect();

    let coefficients = deletions
        .iter()
        .map(|&(_, _, n_h)| (n_h as f64 - 1.0) / n_h as f64)
        .collect();
    Ok((columns_to_matrix(n_obs, rep_weights), coefficients))
}

// ============================================================================
// Replicate Designs
// ============================================================================

fn replicate_names(n_reps: usize) -> Vec<String> {
    (1..=n_reps).map(|r| format!("{REPLICATE_PREFIX}{r}")).collect()
}

/// Unit table with the generated replicate columns appended.
fn attach_replicates(df: &DataFrame, names: &[String], matrix: &Array2<f64>) -> Result<DataFrame> {
    let mut data = df.clone();
    for (r, name) in names.iter().enumerate() {
        data.with_column(Column::new(name.as_str().into(), matrix.column(r).to_vec()))?;
    }
    Ok(data)
}

impl Design {
    /// Bootstrap replicate design; unclustered designs resample units.
    ///
    /// For clustered designs strata and PSUs are visited in label order, so
    /// the replicates for a seed do not depend on row order. Simple random
    /// and stratified designs have no unit labels: each row is its own PSU,
    /// identified by its position, and reordering rows changes which units a
    /// seed draws. Declare a clustered design on a unit id column when the
    /// replicates must be independent of row order.
    #[instrument(skip(self, config), fields(design = self.kind_name(), replicates = config.replicates, seed = config.seed))]
    pub fn bootstrap(&self, config: &BootstrapConfig) -> Result<Design> {
        let layout = self.psu_layout()?;
        let matrix = create_bootstrap_weights(self.weights(), &layout, config.replicates, config.seed)?;
        let names = replicate_names(config.replicates);
        let data = attach_replicates(self.data(), &names, &matrix)?;
        let replicates = ReplicateWeights::new(
            names,
            matrix,
            ReplicateWeights::bootstrap_coefficients(config.replicates, config.scale),
            config.scale,
            config.center,
            ReplicateMethod::Bootstrap,
        )?;
        info!(psus = layout.psus.psu.n_groups(), "created bootstrap replicate weights");
        Ok(Design::Replicate(Replicate::new(self, data, replicates)?))
    }

    /// Delete-one-PSU jackknife replicate design.
    #[instrument(skip(self, config), fields(design = self.kind_name()))]
    pub fn jackknife(&self, config: &JackknifeConfig) -> Result<Design> {
        let layout = self.psu_layout()?;
        let (matrix, coefficients) = create_jkn_weights(self.weights(), &layout)?;
        let names = replicate_names(matrix.ncols());
        let data = attach_replicates(self.data(), &names, &matrix)?;
        info!(replicates = names.len(), "created jackknife replicate weights");
        let replicates = ReplicateWeights::new(
            names,
            matrix,
            coefficients,
            1.0,
            config.center,
            ReplicateMethod::Jackknife,
        )?;
        Ok(Design::Replicate(Replicate::new(self, data, replicates)?))
    }
}
