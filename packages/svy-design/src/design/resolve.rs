// src/design/resolve.rs
//! Canonical weights, inclusion probabilities and finite population corrections.

use polars::prelude::DataFrame;
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::columns::required_numeric;
use super::index::GroupIndex;
use crate::error::{Result, SurveyError};

/// A design input: a constant, a column of the unit table, or explicit values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Input {
    Constant(f64),
    Column(String),
    Values(Vec<f64>),
}

impl Input {
    pub fn column(name: impl Into<String>) -> Self {
        Input::Column(name.into())
    }

    /// Expand to one value per row.
    pub fn resolve(&self, df: &DataFrame, what: &str) -> Result<Vec<f64>> {
        let n = df.height();
        match self {
            Input::Constant(v) => Ok(vec![*v; n]),
            Input::Column(name) => required_numeric(df, name),
            Input::Values(values) => {
                if values.len() != n {
                    return Err(SurveyError::DimensionMismatch {
                        column: what.to_string(),
                        expected: n,
                        got: values.len(),
                    });
                }
                Ok(values.clone())
            }
        }
    }

    fn describe(&self, what: &str) -> String {
        match self {
            Input::Column(name) => name.clone(),
            _ => what.to_string(),
        }
    }
}

/// Where the canonical weights came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WeightSource {
    Weights,
    Probs,
    WeightsAndProbs,
    Popsize,
    /// Equal weights assumed; nothing about the population was declared.
    Default,
}

#[derive(Debug, Clone)]
pub struct ResolvedWeights {
    pub weights: Vec<f64>,
    pub probs: Vec<f64>,
    /// Declared population size of every group, when given.
    pub popsize: Option<Vec<f64>>,
    pub source: WeightSource,
}

fn check_positive(values: &[f64], name: &str) -> Result<()> {
    match values.iter().position(|v| !(v.is_finite() && *v > 0.0)) {
        Some(i) => Err(SurveyError::invalid(format!(
            "'{name}' must be finite and positive, got {} at row {i}",
            values[i]
        ))),
        None => Ok(()),
    }
}

/// Population size of every group; a column must be constant within each group.
fn group_popsize(values: &[f64], groups: &GroupIndex, name: &str) -> Result<Vec<f64>> {
    let mut sizes: Vec<Option<f64>> = vec![None; groups.n_groups()];
    for (&g, &v) in groups.ids().iter().zip(values) {
        match sizes[g as usize] {
            None => sizes[g as usize] = Some(v),
            Some(prev) if prev != v => {
                return Err(SurveyError::invalid(format!(
                    "popsize '{name}' is not constant within group '{}' ({prev} vs {v})",
                    groups.label(g as usize)
                )))
            }
            Some(_) => {}
        }
    }
    let sizes: Vec<f64> = sizes.into_iter().map(|s| s.unwrap_or(0.0)).collect();
    check_positive(&sizes, name)?;
    Ok(sizes)
}

/// Derive canonical weights and probabilities.
///
/// `groups` maps rows to the groups a population size refers to (strata, or a
/// single group) and `sampled` counts the sampling units drawn in each group
/// (rows, or PSUs for cluster designs).
pub fn resolve_weights(
    df: &DataFrame,
    weights: Option<&Input>,
    probs: Option<&Input>,
    popsize: Option<&Input>,
    groups: &GroupIndex,
    sampled: &[usize],
) -> Result<ResolvedWeights> {
    let pop = match popsize {
        Some(input) => {
            let name = input.describe("popsize");
            let values = input.resolve(df, "popsize")?;
            Some(group_popsize(&values, groups, &name)?)
        }
        None => None,
    };

    let resolved = match (weights, probs) {
        (Some(w), Some(p)) => {
            let w_vals = w.resolve(df, "weights")?;
            let p_vals = p.resolve(df, "probs")?;
            check_positive(&w_vals, &w.describe("weights"))?;
            check_positive(&p_vals, &p.describe("probs"))?;
            // Both are kept as given; disagreement is reported, not reconciled.
            if let Some(i) = w_vals
                .iter()
                .zip(&p_vals)
                .position(|(w, p)| (w * p - 1.0).abs() > 1e-8)
            {
                warn!(
                    row = i,
                    weight = w_vals[i],
                    prob = p_vals[i],
                    "weights and probs disagree (weights != 1/probs); keeping both as supplied"
                );
            }
            (w_vals, p_vals, WeightSource::WeightsAndProbs)
        }
        (Some(w), None) => {
            let w_vals = w.resolve(df, "weights")?;
            check_positive(&w_vals, &w.describe("weights"))?;
            let p_vals = w_vals.iter().map(|w| 1.0 / w).collect();
            (w_vals, p_vals, WeightSource::Weights)
        }
        (None, Some(p)) => {
            let p_vals = p.resolve(df, "probs")?;
            let name = p.describe("probs");
            check_positive(&p_vals, &name)?;
            if let Some(i) = p_vals.iter().position(|&v| v > 1.0) {
                return Err(SurveyError::invalid(format!(
                    "'{name}' is a probability but is {} at row {i}",
                    p_vals[i]
                )));
            }
            let w_vals = p_vals.iter().map(|p| 1.0 / p).collect();
            (w_vals, p_vals, WeightSource::Probs)
        }
        (None, None) => match &pop {
            Some(sizes) => {
                let w_vals: Vec<f64> = groups
                    .ids()
                    .iter()
                    .map(|&g| sizes[g as usize] / sampled[g as usize] as f64)
                    .collect();
                let p_vals = w_vals.iter().map(|w| 1.0 / w).collect();
                (w_vals, p_vals, WeightSource::Popsize)
            }
            None => {
                let n = df.height();
                (vec![1.0; n], vec![1.0; n], WeightSource::Default)
            }
        },
    };

    let (weights, probs, source) = resolved;
    Ok(ResolvedWeights { weights, probs, popsize: pop, source })
}

/// Finite population correction `1 - n/N` for one group.
pub fn fpc_factor(sampled: usize, population: f64, group: &str) -> Result<f64> {
    let fpc = 1.0 - sampled as f64 / population;
    if fpc < -1e-12 {
        return Err(SurveyError::invalid(format!(
            "population size {population} in '{group}' is smaller than the {sampled} sampled units"
        )));
    }
    Ok(fpc.max(0.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use polars::df;

    fn frame() -> DataFrame {
        df!(
            "pw" => [2.0, 4.0, 4.0, 8.0],
            "pr" => [0.5, 0.25, 0.25, 0.125],
            "npop" => [10.0, 10.0, 40.0, 40.0]
        )
        .unwrap()
    }

    #[test]
    fn test_probs_from_weights() {
        let df = frame();
        let groups = GroupIndex::single(4, "all");
        let r = resolve_weights(&df, Some(&Input::column("pw")), None, None, &groups, &[4]).unwrap();
        assert_eq!(r.source, WeightSource::Weights);
        assert_relative_eq!(r.probs[3], 0.125);
    }

    #[test]
    fn test_weights_from_probs() {
        let df = frame();
        let groups = GroupIndex::single(4, "all");
        let r = resolve_weights(&df, None, Some(&Input::column("pr")), None, &groups, &[4]).unwrap();
        assert_eq!(r.weights, vec![2.0, 4.0, 4.0, 8.0]);
    }

    #[test]
    fn test_default_equal_weights() {
        let df = frame();
        let groups = GroupIndex::single(4, "all");
        let r = resolve_weights(&df, None, None, None, &groups, &[4]).unwrap();
        assert_eq!(r.source, WeightSource::Default);
        assert!(r.weights.iter().all(|&w| w == 1.0));
        assert!(r.popsize.is_none());
    }

    #[test]
    fn test_weights_from_group_popsize() {
        let df = frame();
        let groups = GroupIndex::from_labels(&["a", "a", "b", "b"]);
        let r = resolve_weights(&df, None, None, Some(&Input::column("npop")), &groups, &[2, 2]).unwrap();
        assert_eq!(r.weights, vec![5.0, 5.0, 20.0, 20.0]);
        assert_eq!(r.popsize, Some(vec![10.0, 40.0]));
    }

    #[test]
    fn test_popsize_must_be_constant_within_group() {
        let df = frame();
        let groups = GroupIndex::single(4, "all");
        let err = resolve_weights(&df, None, None, Some(&Input::column("npop")), &groups, &[4]).unwrap_err();
        assert!(err.to_string().contains("npop"));
    }

    #[test]
    fn test_both_inputs_kept_as_given() {
        let df = frame();
        let groups = GroupIndex::single(4, "all");
        let r = resolve_weights(
            &df,
            Some(&Input::Constant(3.0)),
            Some(&Input::column("pr")),
            None,
            &groups,
            &[4],
        )
        .unwrap();
        assert_eq!(r.weights, vec![3.0; 4]);
        assert_eq!(r.probs, vec![0.5, 0.25, 0.25, 0.125]);
    }

    #[test]
    fn test_values_length_checked() {
        let df = frame();
        let groups = GroupIndex::single(4, "all");
        let err = resolve_weights(&df, Some(&Input::Values(vec![1.0; 3])), None, None, &groups, &[4])
            .unwrap_err();
        assert!(matches!(err, SurveyError::DimensionMismatch { expected: 4, got: 3, .. }));
    }

    #[test]
    fn test_fpc_factor() {
        assert_relative_eq!(fpc_factor(15, 757.0, "all").unwrap(), 1.0 - 15.0 / 757.0);
        assert!(fpc_factor(20, 10.0, "all").is_err());
    }
}
