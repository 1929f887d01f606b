// src/design/replicate.rs
//! Replicate-weight designs.

use ndarray::{Array1, Array2, ArrayView1};
use polars::prelude::*;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::columns::required_numeric;
use super::Design;
use crate::error::{Result, SurveyError};

/// How the replicate weights were obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplicateMethod {
    Bootstrap,
    Jackknife,
    /// Columns already present in the unit table.
    Supplied,
}

/// Centering point of the replicate variance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VarianceCenter {
    /// Full-sample estimate (`θ̂`).
    #[default]
    FullSample,
    /// Mean of the replicate estimates.
    ReplicateMean,
}

/// Three equivalent ways of naming existing replicate columns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplicateSelector {
    Names(Vec<String>),
    /// Half-open range of column positions in the unit table.
    Range { start: usize, end: usize },
    /// Regular expression matched against column names, table order kept.
    Pattern(String),
}

impl ReplicateSelector {
    /// Normalize to an ordered list of column names.
    pub fn resolve(&self, df: &DataFrame) -> Result<Vec<String>> {
        let available: Vec<String> =
            df.get_column_names().iter().map(|name| name.to_string()).collect();
        let names = match self {
            ReplicateSelector::Names(names) => {
                if let Some(missing) = names.iter().find(|n| !available.contains(n)) {
                    return Err(SurveyError::invalid(format!(
                        "replicate column '{missing}' is not in the unit table"
                    )));
                }
                names.clone()
            }
            ReplicateSelector::Range { start, end } => {
                if start >= end || *end > available.len() {
                    return Err(SurveyError::invalid(format!(
                        "replicate column range {start}..{end} is outside the {} columns",
                        available.len()
                    )));
                }
                available[*start..*end].to_vec()
            }
            ReplicateSelector::Pattern(pattern) => {
                let re = Regex::new(pattern)?;
                available.into_iter().filter(|name| re.is_match(name)).collect()
            }
        };
        if names.len() < 2 {
            return Err(SurveyError::InvalidReplicateCount { count: names.len() });
        }
        Ok(names)
    }
}

/// Options for designs built from supplied replicate columns.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplicateOptions {
    pub scale: f64,
    pub center: VarianceCenter,
}

impl Default for ReplicateOptions {
    fn default() -> Self {
        ReplicateOptions { scale: 1.0, center: VarianceCenter::FullSample }
    }
}

/// Named replicate weight columns with their variance coefficients.
#[derive(Debug, Clone)]
pub struct ReplicateWeights {
    names: Vec<String>,
    /// `n × B`, one column per replicate.
    matrix: Array2<f64>,
    coefficients: Vec<f64>,
    scale: f64,
    center: VarianceCenter,
    method: ReplicateMethod,
}

impl ReplicateWeights {
    pub(crate) fn new(
        names: Vec<String>,
        matrix: Array2<f64>,
        coefficients: Vec<f64>,
        scale: f64,
        center: VarianceCenter,
        method: ReplicateMethod,
    ) -> Result<Self> {
        let n_reps = matrix.ncols();
        if n_reps < 2 {
            return Err(SurveyError::InvalidReplicateCount { count: n_reps });
        }
        if names.len() != n_reps {
            return Err(SurveyError::DimensionMismatch {
                column: "replicate names".into(),
                expected: n_reps,
                got: names.len(),
            });
        }
        if coefficients.len() != n_reps {
            return Err(SurveyError::DimensionMismatch {
                column: "replicate coefficients".into(),
                expected: n_reps,
                got: coefficients.len(),
            });
        }
        if !(scale.is_finite() && scale > 0.0) {
            return Err(SurveyError::invalid(format!("replicate scale must be positive, got {scale}")));
        }
        Ok(ReplicateWeights { names, matrix, coefficients, scale, center, method })
    }

    /// Coefficients `scale / B` of the bootstrap variance.
    pub fn bootstrap_coefficients(n_reps: usize, scale: f64) -> Vec<f64> {
        vec![scale / n_reps as f64; n_reps]
    }

    pub fn n_replicates(&self) -> usize {
        self.matrix.ncols()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn matrix(&self) -> &Array2<f64> {
        &self.matrix
    }

    pub fn column(&self, r: usize) -> ArrayView1<'_, f64> {
        self.matrix.column(r)
    }

    pub fn coefficients(&self) -> &[f64] {
        &self.coefficients
    }

    pub fn scale(&self) -> f64 {
        self.scale
    }

    pub fn center(&self) -> VarianceCenter {
        self.center
    }

    pub fn method(&self) -> ReplicateMethod {
        self.method
    }
}

/// A base design augmented with replicate weights.
#[derive(Debug, Clone)]
pub struct Replicate {
    base: Box<Design>,
    data: DataFrame,
    replicates: ReplicateWeights,
}

impl Replicate {
    pub(crate) fn new(base: &Design, data: DataFrame, replicates: ReplicateWeights) -> Result<Self> {
        if replicates.matrix.nrows() != base.sampsize() {
            return Err(SurveyError::DimensionMismatch {
                column: "replicate weights".into(),
                expected: base.sampsize(),
                got: replicates.matrix.nrows(),
            });
        }
        Ok(Replicate { base: Box::new(base.clone()), data, replicates })
    }

    pub fn base(&self) -> &Design {
        &self.base
    }

    pub fn data(&self) -> &DataFrame {
        &self.data
    }

    pub fn replicates(&self) -> &ReplicateWeights {
        &self.replicates
    }
}

impl Design {
    /// Wrap this design with replicate columns already present in its unit table.
    pub fn with_replicate_columns(
        &self,
        selector: &ReplicateSelector,
        options: &ReplicateOptions,
    ) -> Result<Design> {
        if self.is_replicate() {
            return Err(SurveyError::invalid("design already carries replicate weights"));
        }
        let df = self.data();
        let names = selector.resolve(df)?;
        let n = df.height();
        let mut matrix = Array2::zeros((n, names.len()));
        for (r, name) in names.iter().enumerate() {
            let values = required_numeric(df, name)?;
            matrix.column_mut(r).assign(&Array1::from(values));
        }
        debug!(replicates = names.len(), "selected supplied replicate columns");
        let coefficients = ReplicateWeights::bootstrap_coefficients(names.len(), options.scale);
        let replicates = ReplicateWeights::new(
            names,
            matrix,
            coefficients,
            options.scale,
            options.center,
            ReplicateMethod::Supplied,
        )?;
        Ok(Design::Replicate(Replicate::new(self, df.clone(), replicates)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::design::DesignSpec;

    fn frame() -> DataFrame {
        df!(
            "y" => [1.0, 2.0, 3.0],
            "rep_1" => [1.0, 0.0, 2.0],
            "rep_2" => [2.0, 1.0, 0.0],
            "rep_3" => [0.0, 2.0, 1.0],
            "other" => [1.0, 1.0, 1.0]
        )
        .unwrap()
    }

    #[test]
    fn test_selectors_normalize_to_same_names() {
        let df = frame();
        let expected = vec!["rep_1".to_string(), "rep_2".into(), "rep_3".into()];
        let by_name = ReplicateSelector::Names(expected.clone()).resolve(&df).unwrap();
        let by_range = ReplicateSelector::Range { start: 1, end: 4 }.resolve(&df).unwrap();
        let by_pattern = ReplicateSelector::Pattern("^rep_\\d+$".into()).resolve(&df).unwrap();
        assert_eq!(by_name, expected);
        assert_eq!(by_range, expected);
        assert_eq!(by_pattern, expected);
    }

    #[test]
    fn test_selector_errors() {
        let df = frame();
        assert!(ReplicateSelector::Names(vec!["rep_9".into(), "rep_1".into()]).resolve(&df).is_err());
        assert!(ReplicateSelector::Range { start: 3, end: 9 }.resolve(&df).is_err());
        assert!(matches!(
            ReplicateSelector::Pattern("^other$".into()).resolve(&df),
            Err(SurveyError::InvalidReplicateCount { count: 1 })
        ));
        assert!(matches!(
            ReplicateSelector::Pattern("(".into()).resolve(&df),
            Err(SurveyError::InvalidPattern(_))
        ));
    }

    #[test]
    fn test_with_replicate_columns() {
        let df = frame();
        let base = Design::new(&df, &DesignSpec::simple_random()).unwrap();
        let design = base
            .with_replicate_columns(
                &ReplicateSelector::Pattern("^rep_".into()),
                &ReplicateOptions::default(),
            )
            .unwrap();
        let Design::Replicate(rep) = &design else { panic!("wrong variant") };
        assert_eq!(rep.replicates().n_replicates(), 3);
        assert_eq!(rep.replicates().column(1).to_vec(), vec![2.0, 1.0, 0.0]);
        assert_eq!(rep.replicates().method(), ReplicateMethod::Supplied);
        assert_eq!(design.degrees_of_freedom(), 2);
        assert!(base.with_replicate_columns(&ReplicateSelector::Range { start: 1, end: 3 }, &ReplicateOptions::default()).is_ok());
        assert!(design
            .with_replicate_columns(&ReplicateSelector::Range { start: 1, end: 3 }, &ReplicateOptions::default())
            .is_err());
    }
}
