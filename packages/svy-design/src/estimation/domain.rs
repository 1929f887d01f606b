// src/estimation/domain.rs
//! Domain (subgroup) dispatch shared by the analytic and replicate engines.
//!
//! A domain is never estimated from a subset of the unit table: every call
//! sees the full design and a row mask, so stratification and clustering
//! still shape the variance.

use tracing::debug;

use super::result::{EstimateRow, Estimates, Statistic};
use crate::design::index::GroupIndex;
use crate::design::Design;
use crate::error::{Result, SurveyError};

/// Distinct values of a grouping column with their row masks.
#[derive(Debug, Clone)]
pub struct Domains {
    column: String,
    index: GroupIndex,
}

impl Domains {
    /// Partition `design`'s units by `by`, first-appearance order.
    pub fn new(design: &Design, by: &str) -> Result<Self> {
        let df = design.data();
        if df.column(by).is_err() {
            return Err(SurveyError::invalid(format!(
                "domain column '{by}' is not in the unit table"
            )));
        }
        let index = GroupIndex::from_column(df, by)?;
        debug!(column = by, domains = index.n_groups(), "split design into domains");
        Ok(Domains { column: by.to_string(), index })
    }

    pub fn column(&self) -> &str {
        &self.column
    }

    pub fn labels(&self) -> &[String] {
        self.index.labels()
    }

    pub fn len(&self) -> usize {
        self.index.n_groups()
    }

    pub fn is_empty(&self) -> bool {
        self.index.n_groups() == 0
    }

    /// Row mask of domain `d`.
    pub fn mask(&self, d: usize) -> Vec<bool> {
        self.index.ids().iter().map(|&g| g as usize == d).collect()
    }
}

/// Run `estimate` once per domain of `by` and label the rows.
///
/// The first failing domain aborts the call; a zero denominator carries the
/// domain label.
pub fn for_each_domain<F>(design: &Design, by: &str, mut estimate: F) -> Result<Vec<EstimateRow>>
where
    F: FnMut(&[bool]) -> Result<Vec<EstimateRow>>,
{
    let domains = Domains::new(design, by)?;
    let mut rows = Vec::new();
    for (d, label) in domains.labels().iter().enumerate() {
        let mask = domains.mask(d);
        for mut row in estimate(&mask).map_err(|e| e.in_domain(label))? {
            row.domain = Some(label.clone());
            rows.push(row);
        }
    }
    Ok(rows)
}

/// Whole-sample rows, or per-domain rows when `by` is given.
pub(crate) fn dispatch<F>(
    design: &Design,
    statistic: Statistic,
    by: Option<&str>,
    mut estimate: F,
) -> Result<Estimates>
where
    F: FnMut(Option<&[bool]>) -> Result<Vec<EstimateRow>>,
{
    let rows = match by {
        Some(column) => for_each_domain(design, column, |mask| estimate(Some(mask)))?,
        None => estimate(None)?,
    };
    Ok(Estimates::new(statistic, by.map(str::to_string), rows))
}
