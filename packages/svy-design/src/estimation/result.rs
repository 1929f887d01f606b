// src/estimation/result.rs
//! Estimator output.

use polars::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Which statistic a result table holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Statistic {
    Mean,
    Total,
    Ratio,
    Proportion,
    Quantile,
}

impl Statistic {
    pub fn name(&self) -> &'static str {
        match self {
            Statistic::Mean => "mean",
            Statistic::Total => "total",
            Statistic::Ratio => "ratio",
            Statistic::Proportion => "proportion",
            Statistic::Quantile => "quantile",
        }
    }
}

/// One estimated quantity.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EstimateRow {
    pub domain: Option<String>,
    pub variable: String,
    /// Denominator variable of a ratio.
    pub denominator: Option<String>,
    /// Category of a proportion.
    pub level: Option<String>,
    /// Probability of a quantile.
    pub probability: Option<f64>,
    pub estimate: f64,
    pub se: f64,
    pub variance: f64,
    pub df: usize,
    /// Observed units in scope.
    pub n: usize,
    /// Per-replicate estimates, replicate designs only.
    pub replicates: Option<Vec<f64>>,
}

impl EstimateRow {
    /// Empty row for `variable`, filled in by the estimator.
    pub fn new(variable: impl Into<String>) -> Self {
        EstimateRow {
            domain: None,
            variable: variable.into(),
            denominator: None,
            level: None,
            probability: None,
            estimate: 0.0,
            se: 0.0,
            variance: 0.0,
            df: 0,
            n: 0,
            replicates: None,
        }
    }
}

/// Ordered estimator rows: request order of variables, domains in
/// first-appearance order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Estimates {
    statistic: Statistic,
    domain_column: Option<String>,
    rows: Vec<EstimateRow>,
}

impl Estimates {
    pub fn new(statistic: Statistic, domain_column: Option<String>, rows: Vec<EstimateRow>) -> Self {
        Estimates { statistic, domain_column, rows }
    }

    pub fn statistic(&self) -> Statistic {
        self.statistic
    }

    pub fn domain_column(&self) -> Option<&str> {
        self.domain_column.as_deref()
    }

    pub fn rows(&self) -> &[EstimateRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// First row for `variable` in the given domain (`None` for whole-sample rows).
    pub fn get(&self, variable: &str, domain: Option<&str>) -> Option<&EstimateRow> {
        self.rows
            .iter()
            .find(|r| r.variable == variable && r.domain.as_deref() == domain)
    }

    /// Row of one proportion level.
    pub fn level(&self, variable: &str, level: &str, domain: Option<&str>) -> Option<&EstimateRow> {
        self.rows.iter().find(|r| {
            r.variable == variable
                && r.level.as_deref() == Some(level)
                && r.domain.as_deref() == domain
        })
    }

    pub fn estimates(&self) -> Vec<f64> {
        self.rows.iter().map(|r| r.estimate).collect()
    }

    pub fn standard_errors(&self) -> Vec<f64> {
        self.rows.iter().map(|r| r.se).collect()
    }

    /// Render as a polars table:
    /// `{<domain>?, y, x?, level?, p?, est, se, var, df, n, rep_1..rep_B?}`.
    pub fn to_dataframe(&self) -> Result<DataFrame> {
        let rows = &self.rows;
        let mut columns: Vec<Column> = Vec::new();

        if let Some(by) = &self.domain_column {
            let labels: Vec<String> = rows.iter().map(|r| r.domain.clone().unwrap_or_default()).collect();
            columns.push(Column::new(by.as_str().into(), labels));
        }
        let variables: Vec<String> = rows.iter().map(|r| r.variable.clone()).collect();
        columns.push(Column::new("y".into(), variables));

        if rows.iter().any(|r| r.denominator.is_some()) {
            let x: Vec<String> = rows.iter().map(|r| r.denominator.clone().unwrap_or_default()).collect();
            columns.push(Column::new("x".into(), x));
        }
        if rows.iter().any(|r| r.level.is_some()) {
            let levels: Vec<String> = rows.iter().map(|r| r.level.clone().unwrap_or_default()).collect();
            columns.push(Column::new("level".into(), levels));
        }
        if rows.iter().any(|r| r.probability.is_some()) {
            let p: Vec<f64> = rows.iter().map(|r| r.probability.unwrap_or(f64::NAN)).collect();
            columns.push(Column::new("p".into(), p));
        }

        columns.push(Column::new("est".into(), rows.iter().map(|r| r.estimate).collect::<Vec<f64>>()));
        columns.push(Column::new("se".into(), rows.iter().map(|r| r.se).collect::<Vec<f64>>()));
        columns.push(Column::new("var".into(), rows.iter().map(|r| r.variance).collect::<Vec<f64>>()));
        columns.push(Column::new("df".into(), rows.iter().map(|r| r.df as u64).collect::<Vec<u64>>()));
        columns.push(Column::new("n".into(), rows.iter().map(|r| r.n as u64).collect::<Vec<u64>>()));

        let n_reps = rows
            .iter()
            .filter_map(|r| r.replicates.as_ref().map(Vec::len))
            .max()
            .unwrap_or(0);
        for b in 0..n_reps {
            let values: Vec<Option<f64>> = rows
                .iter()
                .map(|r| r.replicates.as_ref().and_then(|reps| reps.get(b).copied()))
                .collect();
            columns.push(Column::new(format!("rep_{}", b + 1).into(), values));
        }

        Ok(DataFrame::new(columns)?)
    }
}
