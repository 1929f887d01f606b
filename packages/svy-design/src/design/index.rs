// src/design/index.rs
//! Integer coding of strata, PSUs and domains.

use std::collections::HashMap;

use polars::prelude::DataFrame;

use super::columns::label_values;
use crate::error::{Result, SurveyError};

/// Dense group ids in first-appearance order.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupIndex {
    ids: Vec<u32>,
    labels: Vec<String>,
}

impl GroupIndex {
    /// Index a label column; null membership is a design error.
    pub fn from_column(df: &DataFrame, name: &str) -> Result<Self> {
        let values = label_values(df, name)?;
        let labels: Vec<String> = values
            .into_iter()
            .enumerate()
            .map(|(i, v)| {
                v.ok_or_else(|| SurveyError::invalid(format!("column '{name}' is null at row {i}")))
            })
            .collect::<Result<_>>()?;
        Ok(Self::from_labels(&labels))
    }

    pub fn from_labels<S: AsRef<str>>(values: &[S]) -> Self {
        let mut map: HashMap<&str, u32> = HashMap::new();
        let mut labels = Vec::new();
        let ids = values
            .iter()
            .map(|v| {
                let v = v.as_ref();
                *map.entry(v).or_insert_with(|| {
                    labels.push(v.to_string());
                    (labels.len() - 1) as u32
                })
            })
            .collect();
        GroupIndex { ids, labels }
    }

    /// A single group spanning `n` rows.
    pub fn single(n: usize, label: &str) -> Self {
        GroupIndex { ids: vec![0; n], labels: vec![label.to_string()] }
    }

    /// Each row is its own group.
    pub fn rows(n: usize) -> Self {
        GroupIndex {
            ids: (0..n as u32).collect(),
            labels: (0..n).map(|i| i.to_string()).collect(),
        }
    }

    pub fn ids(&self) -> &[u32] {
        &self.ids
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn label(&self, group: usize) -> &str {
        &self.labels[group]
    }

    pub fn n_groups(&self) -> usize {
        self.labels.len()
    }

    pub fn n_rows(&self) -> usize {
        self.ids.len()
    }

    pub fn counts(&self) -> Vec<usize> {
        let mut counts = vec![0usize; self.labels.len()];
        for &g in &self.ids {
            counts[g as usize] += 1;
        }
        counts
    }

    /// Group ids ordered by label, independent of row order.
    pub fn sorted_groups(&self) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.labels.len()).collect();
        order.sort_by(|&a, &b| self.labels[a].cmp(&self.labels[b]));
        order
    }
}

/// PSUs nested within strata: the same PSU label in two strata names two PSUs.
#[derive(Debug, Clone, PartialEq)]
pub struct NestedIndex {
    pub psu: GroupIndex,
    /// Stratum of every PSU.
    pub psu_stratum: Vec<u32>,
    /// PSU ids of every stratum, in first-appearance order.
    pub stratum_psus: Vec<Vec<u32>>,
}

impl NestedIndex {
    pub fn new(strata: &GroupIndex, psu_labels: &[String]) -> Self {
        let keyed: Vec<String> = strata
            .ids()
            .iter()
            .zip(psu_labels)
            .map(|(&h, p)| format!("{}\u{1f}{}", strata.label(h as usize), p))
            .collect();
        let keyed_index = GroupIndex::from_labels(&keyed);

        let n_psus = keyed_index.n_groups();
        let mut psu_stratum = vec![u32::MAX; n_psus];
        let mut plain_labels = vec![String::new(); n_psus];
        for ((&c, &h), p) in keyed_index.ids().iter().zip(strata.ids()).zip(psu_labels) {
            if psu_stratum[c as usize] == u32::MAX {
                psu_stratum[c as usize] = h;
                plain_labels[c as usize] = p.clone();
            }
        }

        let mut stratum_psus = vec![Vec::new(); strata.n_groups()];
        for (c, &h) in psu_stratum.iter().enumerate() {
            stratum_psus[h as usize].push(c as u32);
        }

        NestedIndex {
            psu: GroupIndex { ids: keyed_index.ids, labels: plain_labels },
            psu_stratum,
            stratum_psus,
        }
    }

    pub fn psus_in(&self, stratum: usize) -> &[u32] {
        &self.stratum_psus[stratum]
    }
}
