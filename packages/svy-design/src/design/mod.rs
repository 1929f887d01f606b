// src/design/mod.rs
//! Declared sampling designs.
//!
//! A [`Design`] is built once from a unit table and a [`DesignSpec`] and is
//! read-only afterwards. Estimators select their formulas from the variant
//! tag alone.

pub mod columns;
pub mod index;
pub mod replicate;
pub mod resolve;

use polars::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, SurveyError};
use index::{GroupIndex, NestedIndex};
use resolve::{fpc_factor, resolve_weights, Input, ResolvedWeights, WeightSource};

pub use replicate::{Replicate, ReplicateMethod, ReplicateSelector, ReplicateWeights, VarianceCenter};

/// Name of the canonical weight column attached to the unit table.
pub const WEIGHTS_COL: &str = "weights";
/// Name of the canonical inclusion-probability column.
pub const PROBS_COL: &str = "probs";

const ALL: &str = "all";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DesignKind {
    #[default]
    SimpleRandom,
    Stratified,
    Clustered,
}

/// Handling of strata (or cluster designs) with a single sampling unit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SingletonMethod {
    /// Fail with `InsufficientSampleSize`.
    #[default]
    Fail,
    /// Deviation from the grand mean stands in for the missing within-stratum spread.
    Center,
}

/// Declared design metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DesignSpec {
    pub kind: DesignKind,
    pub weights: Option<Input>,
    pub probs: Option<Input>,
    pub popsize: Option<Input>,
    pub strata: Option<String>,
    /// Cluster columns, first stage first.
    pub clusters: Vec<String>,
    pub ignore_fpc: bool,
    pub singleton: SingletonMethod,
}

impl DesignSpec {
    pub fn simple_random() -> Self {
        DesignSpec { kind: DesignKind::SimpleRandom, ..Default::default() }
    }

    pub fn stratified(strata: impl Into<String>) -> Self {
        DesignSpec { kind: DesignKind::Stratified, strata: Some(strata.into()), ..Default::default() }
    }

    pub fn clustered(cluster: impl Into<String>) -> Self {
        DesignSpec { kind: DesignKind::Clustered, clusters: vec![cluster.into()], ..Default::default() }
    }

    pub fn weights(mut self, input: Input) -> Self {
        self.weights = Some(input);
        self
    }

    pub fn probs(mut self, input: Input) -> Self {
        self.probs = Some(input);
        self
    }

    pub fn popsize(mut self, input: Input) -> Self {
        self.popsize = Some(input);
        self
    }

    pub fn strata(mut self, column: impl Into<String>) -> Self {
        self.strata = Some(column.into());
        self
    }

    /// Add a deeper cluster stage.
    pub fn cluster(mut self, column: impl Into<String>) -> Self {
        self.clusters.push(column.into());
        self
    }

    pub fn ignore_fpc(mut self, ignore: bool) -> Self {
        self.ignore_fpc = ignore;
        self
    }

    pub fn singleton(mut self, method: SingletonMethod) -> Self {
        self.singleton = method;
        self
    }
}

/// State shared by every design variant.
#[derive(Debug, Clone)]
pub struct SampleFrame {
    data: DataFrame,
    weights: Vec<f64>,
    probs: Vec<f64>,
    sampsize: usize,
    popsize: Option<f64>,
    weight_source: WeightSource,
    singleton: SingletonMethod,
}

impl SampleFrame {
    fn new(df: &DataFrame, resolved: ResolvedWeights, singleton: SingletonMethod) -> Result<Self> {
        let mut data = df.clone();
        data.with_column(Column::new(WEIGHTS_COL.into(), resolved.weights.clone()))?;
        data.with_column(Column::new(PROBS_COL.into(), resolved.probs.clone()))?;
        Ok(SampleFrame {
            sampsize: df.height(),
            popsize: resolved.popsize.map(|sizes| sizes.iter().sum()),
            data,
            weights: resolved.weights,
            probs: resolved.probs,
            weight_source: resolved.source,
            singleton,
        })
    }

    pub fn data(&self) -> &DataFrame {
        &self.data
    }

    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    pub fn probs(&self) -> &[f64] {
        &self.probs
    }

    pub fn sampsize(&self) -> usize {
        self.sampsize
    }

    /// Declared population size, if any.
    pub fn popsize(&self) -> Option<f64> {
        self.popsize
    }

    /// Estimated population size `Σ w`.
    pub fn estimated_popsize(&self) -> f64 {
        self.weights.iter().sum()
    }

    pub fn weight_source(&self) -> WeightSource {
        self.weight_source
    }

    pub fn singleton(&self) -> SingletonMethod {
        self.singleton
    }
}

#[derive(Debug, Clone)]
pub struct SimpleRandom {
    frame: SampleFrame,
    fpc: f64,
}

impl SimpleRandom {
    pub fn frame(&self) -> &SampleFrame {
        &self.frame
    }

    pub fn fpc(&self) -> f64 {
        self.fpc
    }
}

#[derive(Debug, Clone)]
pub struct Stratified {
    frame: SampleFrame,
    column: String,
    strata: GroupIndex,
    /// `N_h = Σ w` within each stratum.
    stratum_popsize: Vec<f64>,
    fpc: Vec<f64>,
}

impl Stratified {
    pub fn frame(&self) -> &SampleFrame {
        &self.frame
    }

    pub fn column(&self) -> &str {
        &self.column
    }

    pub fn strata(&self) -> &GroupIndex {
        &self.strata
    }

    pub fn stratum_popsize(&self) -> &[f64] {
        &self.stratum_popsize
    }

    /// `1 - f_h` per stratum.
    pub fn fpc(&self) -> &[f64] {
        &self.fpc
    }
}

#[derive(Debug, Clone)]
pub struct Clustered {
    frame: SampleFrame,
    clusters: Vec<String>,
    strata_column: Option<String>,
    strata: GroupIndex,
    psus: NestedIndex,
    fpc: Vec<f64>,
}

impl Clustered {
    pub fn frame(&self) -> &SampleFrame {
        &self.frame
    }

    pub fn clusters(&self) -> &[String] {
        &self.clusters
    }

    pub fn strata_column(&self) -> Option<&str> {
        self.strata_column.as_deref()
    }

    pub fn strata(&self) -> &GroupIndex {
        &self.strata
    }

    pub fn psus(&self) -> &NestedIndex {
        &self.psus
    }

    pub fn n_psus(&self) -> usize {
        self.psus.psu.n_groups()
    }

    /// `1 - m_h/M_h` per stratum.
    pub fn fpc(&self) -> &[f64] {
        &self.fpc
    }
}

/// A declared sampling design.
#[derive(Debug, Clone)]
pub enum Design {
    SimpleRandom(SimpleRandom),
    Stratified(Stratified),
    Clustered(Clustered),
    Replicate(Replicate),
}

/// Strata and primary sampling units of a design, rows standing in for PSUs
/// when the design is unclustered.
#[derive(Debug, Clone)]
pub(crate) struct PsuLayout {
    pub strata: GroupIndex,
    pub psus: NestedIndex,
}

fn require_column(df: &DataFrame, name: &str) -> Result<()> {
    df.column(name).map(|_| ()).map_err(|_| {
        SurveyError::invalid(format!("column '{name}' is not in the unit table"))
    })
}

impl Design {
    /// Build the design declared by `spec.kind`.
    pub fn new(df: &DataFrame, spec: &DesignSpec) -> Result<Self> {
        match spec.kind {
            DesignKind::SimpleRandom => Self::simple_random(df, spec),
            DesignKind::Stratified => Self::stratified(df, spec),
            DesignKind::Clustered => Self::clustered(df, spec),
        }
    }

    pub fn simple_random(df: &DataFrame, spec: &DesignSpec) -> Result<Self> {
        if spec.strata.is_some() || !spec.clusters.is_empty() {
            return Err(SurveyError::invalid(
                "a simple random design takes no strata or cluster columns",
            ));
        }
        let n = df.height();
        let groups = GroupIndex::single(n, ALL);
        let resolved = resolve_weights(
            df,
            spec.weights.as_ref(),
            spec.probs.as_ref(),
            spec.popsize.as_ref(),
            &groups,
            &[n],
        )?;
        let fpc = match (&resolved.popsize, spec.ignore_fpc) {
            (Some(sizes), false) => fpc_factor(n, sizes[0], ALL)?,
            _ => 1.0,
        };
        let frame = SampleFrame::new(df, resolved, spec.singleton)?;
        debug!(rows = n, fpc, "built simple random design");
        Ok(Design::SimpleRandom(SimpleRandom { frame, fpc }))
    }

    pub fn stratified(df: &DataFrame, spec: &DesignSpec) -> Result<Self> {
        let column = spec.strata.clone().ok_or_else(|| {
            SurveyError::invalid("a stratified design requires a strata column")
        })?;
        if !spec.clusters.is_empty() {
            return Err(SurveyError::invalid(
                "cluster columns belong to a clustered design; declare strata there",
            ));
        }
        require_column(df, &column)?;
        let strata = GroupIndex::from_column(df, &column)?;
        let n_h = strata.counts();
        let resolved = resolve_weights(
            df,
            spec.weights.as_ref(),
            spec.probs.as_ref(),
            spec.popsize.as_ref(),
            &strata,
            &n_h,
        )?;

        let mut stratum_popsize = vec![0.0; strata.n_groups()];
        for (&h, &w) in strata.ids().iter().zip(&resolved.weights) {
            stratum_popsize[h as usize] += w;
        }

        let fpc = (0..strata.n_groups())
            .map(|h| {
                if spec.ignore_fpc {
                    return Ok(1.0);
                }
                match (&resolved.popsize, resolved.source) {
                    (Some(sizes), _) => fpc_factor(n_h[h], sizes[h], strata.label(h)),
                    (None, WeightSource::Default) => Ok(1.0),
                    (None, _) => fpc_factor(n_h[h], stratum_popsize[h], strata.label(h)),
                }
            })
            .collect::<Result<Vec<f64>>>()?;

        let frame = SampleFrame::new(df, resolved, spec.singleton)?;
        debug!(rows = df.height(), strata = strata.n_groups(), "built stratified design");
        Ok(Design::Stratified(Stratified { frame, column, strata, stratum_popsize, fpc }))
    }

    pub fn clustered(df: &DataFrame, spec: &DesignSpec) -> Result<Self> {
        let first = spec.clusters.first().ok_or_else(|| {
            SurveyError::invalid("a clustered design requires at least one cluster column")
        })?;
        for name in spec.clusters.iter().chain(spec.strata.iter()) {
            require_column(df, name)?;
        }
        // Deeper stages only need complete membership; variance uses the first stage.
        for name in &spec.clusters[1..] {
            GroupIndex::from_column(df, name)?;
        }

        let n = df.height();
        let strata = match &spec.strata {
            Some(name) => GroupIndex::from_column(df, name)?,
            None => GroupIndex::single(n, ALL),
        };
        let psu_index = GroupIndex::from_column(df, first)?;
        let psu_labels: Vec<String> =
            psu_index.ids().iter().map(|&c| psu_index.label(c as usize).to_string()).collect();
        let psus = NestedIndex::new(&strata, &psu_labels);
        let m_h: Vec<usize> = psus.stratum_psus.iter().map(Vec::len).collect();

        let resolved = resolve_weights(
            df,
            spec.weights.as_ref(),
            spec.probs.as_ref(),
            spec.popsize.as_ref(),
            &strata,
            &m_h,
        )?;
        let fpc = (0..strata.n_groups())
            .map(|h| match (&resolved.popsize, spec.ignore_fpc) {
                (Some(sizes), false) => fpc_factor(m_h[h], sizes[h], strata.label(h)),
                _ => Ok(1.0),
            })
            .collect::<Result<Vec<f64>>>()?;

        let frame = SampleFrame::new(df, resolved, spec.singleton)?;
        debug!(
            rows = n,
            strata = strata.n_groups(),
            psus = psus.psu.n_groups(),
            "built clustered design"
        );
        Ok(Design::Clustered(Clustered {
            frame,
            clusters: spec.clusters.clone(),
            strata_column: spec.strata.clone(),
            strata,
            psus,
            fpc,
        }))
    }

    /// Shared state; replicate designs report their base design's frame.
    pub fn frame(&self) -> &SampleFrame {
        match self {
            Design::SimpleRandom(d) => &d.frame,
            Design::Stratified(d) => &d.frame,
            Design::Clustered(d) => &d.frame,
            Design::Replicate(d) => d.base().frame(),
        }
    }

    /// Unit table, including derived columns.
    pub fn data(&self) -> &DataFrame {
        match self {
            Design::Replicate(d) => d.data(),
            _ => self.frame().data(),
        }
    }

    pub fn weights(&self) -> &[f64] {
        self.frame().weights()
    }

    pub fn probs(&self) -> &[f64] {
        self.frame().probs()
    }

    pub fn sampsize(&self) -> usize {
        self.frame().sampsize()
    }

    pub fn popsize(&self) -> Option<f64> {
        self.frame().popsize()
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Design::SimpleRandom(_) => "simple_random",
            Design::Stratified(_) => "stratified",
            Design::Clustered(_) => "clustered",
            Design::Replicate(_) => "replicate",
        }
    }

    pub fn is_replicate(&self) -> bool {
        matches!(self, Design::Replicate(_))
    }

    /// Design degrees of freedom.
    pub fn degrees_of_freedom(&self) -> usize {
        match self {
            Design::SimpleRandom(d) => d.frame.sampsize.saturating_sub(1),
            Design::Stratified(d) => d.strata.counts().iter().map(|n| n.saturating_sub(1)).sum(),
            Design::Clustered(d) => d.psus.stratum_psus.iter().map(|p| p.len().saturating_sub(1)).sum(),
            Design::Replicate(d) => d.replicates().n_replicates().saturating_sub(1),
        }
    }

    pub(crate) fn psu_layout(&self) -> Result<PsuLayout> {
        let n = self.sampsize();
        let rows: Vec<String> = (0..n).map(|i| i.to_string()).collect();
        match self {
            Design::SimpleRandom(_) => {
                let strata = GroupIndex::single(n, ALL);
                let psus = NestedIndex::new(&strata, &rows);
                Ok(PsuLayout { strata, psus })
            }
            Design::Stratified(d) => {
                let psus = NestedIndex::new(&d.strata, &rows);
                Ok(PsuLayout { strata: d.strata.clone(), psus })
            }
            Design::Clustered(d) => Ok(PsuLayout { strata: d.strata.clone(), psus: d.psus.clone() }),
            Design::Replicate(_) => Err(SurveyError::invalid(
                "replicate weights cannot be derived from a replicate design",
            )),
        }
    }
}
