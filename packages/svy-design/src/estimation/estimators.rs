// src/estimation/estimators.rs
//! Public estimator entry points.
//!
//! Each statistic knows its point estimate under any weight vector and its
//! Taylor variance under an analytic design. Replicate designs reuse the
//! point estimate once per replicate column instead.

use std::collections::BTreeSet;

use super::domain::dispatch;
use super::replication::replicate_variance;
use super::result::{EstimateRow, Estimates, Statistic};
use super::taylor::{
    point_estimate_mean, point_estimate_quantile, point_estimate_ratio,
    point_estimate_stratified_mean, point_estimate_total, quantile_woodruff, ratio_totals,
    in_domain, scores_mean, scores_ratio, scores_total, srs_proportion_variance,
    taylor_variance, weight_total, QuantileMethod,
};
use crate::design::columns::{categorical_values, numeric_values};
use crate::design::index::GroupIndex;
use crate::design::Design;
use crate::error::{Result, SurveyError};

fn observed_count(y: &[Option<f64>], mask: Option<&[bool]>) -> usize {
    y.iter().enumerate().filter(|(i, v)| v.is_some() && in_domain(mask, *i)).count()
}

// ============================================================================
// Estimator Trait
// ============================================================================

pub(crate) trait Estimator: Sync {
    fn variable(&self) -> &str;

    /// Point estimate under an arbitrary weight vector.
    fn point(&self, weights: &[f64], mask: Option<&[bool]>) -> Result<f64>;

    /// Point estimate and Taylor variance under an analytic design.
    fn taylor(&self, design: &Design, mask: Option<&[bool]>) -> Result<(f64, f64)>;

    /// Observed units in scope.
    fn count(&self, mask: Option<&[bool]>) -> usize;

    fn row(&self) -> EstimateRow {
        EstimateRow::new(self.variable())
    }
}

/// Estimate one statistic, dispatching on the design variant.
fn evaluate(design: &Design, estimator: &dyn Estimator, mask: Option<&[bool]>) -> Result<EstimateRow> {
    let (estimate, variance, replicates) = match design {
        Design::Replicate(rep) => {
            let result = replicate_variance(rep, |w| estimator.point(w, mask))?;
            (result.estimate, result.variance, Some(result.replicates))
        }
        _ => {
            let (estimate, variance) = estimator.taylor(design, mask)?;
            (estimate, variance, None)
        }
    };
    let variance = variance.max(0.0);
    Ok(EstimateRow {
        estimate,
        se: variance.sqrt(),
        variance,
        df: design.degrees_of_freedom(),
        n: estimator.count(mask),
        replicates,
        ..estimator.row()
    })
}

fn evaluate_all<E: Estimator>(
    design: &Design,
    estimators: &[E],
    mask: Option<&[bool]>,
) -> Result<Vec<EstimateRow>> {
    estimators.iter().map(|e| evaluate(design, e, mask)).collect()
}

/// Strata whose population shares combine stratum means, if any.
fn mean_strata(design: &Design) -> Option<GroupIndex> {
    match design {
        Design::Stratified(d) => Some(d.strata().clone()),
        Design::Replicate(rep) => mean_strata(rep.base()),
        _ => None,
    }
}

// ============================================================================
// Mean
// ============================================================================

pub(crate) struct MeanEstimator {
    variable: String,
    y: Vec<Option<f64>>,
    strata: Option<GroupIndex>,
}

impl MeanEstimator {
    fn new(design: &Design, variable: &str) -> Result<Self> {
        Ok(MeanEstimator {
            variable: variable.to_string(),
            y: numeric_values(design.data(), variable)?,
            strata: mean_strata(design),
        })
    }

    fn from_values(design: &Design, variable: &str, y: Vec<Option<f64>>) -> Self {
        MeanEstimator { variable: variable.to_string(), y, strata: mean_strata(design) }
    }
}

impl Estimator for MeanEstimator {
    fn variable(&self) -> &str {
        &self.variable
    }

    fn point(&self, weights: &[f64], mask: Option<&[bool]>) -> Result<f64> {
        match &self.strata {
            Some(strata) => point_estimate_stratified_mean(&self.y, weights, mask, strata, &self.variable),
            None => point_estimate_mean(&self.y, weights, mask, &self.variable),
        }
    }

    fn taylor(&self, design: &Design, mask: Option<&[bool]>) -> Result<(f64, f64)> {
        let weights = design.weights();
        let estimate = self.point(weights, mask)?;
        let sum_w = weight_total(&self.y, weights, mask);
        let u = scores_mean(&self.y, estimate, mask);
        Ok((estimate, taylor_variance(design, &u)? / (sum_w * sum_w)))
    }

    fn count(&self, mask: Option<&[bool]>) -> usize {
        observed_count(&self.y, mask)
    }
}

/// Weighted mean of each numeric variable.
///
/// # Errors
///
/// All or nothing: the first failing variable, domain or replicate fails the
/// call and no rows are returned. A replicate that leaves a domain with zero
/// weight gives `ZeroDenominator` naming the domain and the replicate.
pub fn mean(design: &Design, variables: &[&str], by: Option<&str>) -> Result<Estimates> {
    let estimators = variables
        .iter()
        .map(|v| MeanEstimator::new(design, v))
        .collect::<Result<Vec<_>>>()?;
    dispatch(design, Statistic::Mean, by, |mask| evaluate_all(design, &estimators, mask))
}

// ============================================================================
// Total
// ============================================================================

pub(crate) struct TotalEstimator {
    variable: String,
    y: Vec<Option<f64>>,
}

impl Estimator for TotalEstimator {
    fn variable(&self) -> &str {
        &self.variable
    }

    fn point(&self, weights: &[f64], mask: Option<&[bool]>) -> Result<f64> {
        Ok(point_estimate_total(&self.y, weights, mask))
    }

    fn taylor(&self, design: &Design, mask: Option<&[bool]>) -> Result<(f64, f64)> {
        let estimate = self.point(design.weights(), mask)?;
        let u = scores_total(&self.y, mask);
        Ok((estimate, taylor_variance(design, &u)?))
    }

    fn count(&self, mask: Option<&[bool]>) -> usize {
        observed_count(&self.y, mask)
    }
}

/// Weighted total of each numeric variable.
///
/// # Errors
///
/// All or nothing: the first failing variable or domain fails the call and no
/// rows are returned. An empty domain has a total of zero, not an error.
pub fn total(design: &Design, variables: &[&str], by: Option<&str>) -> Result<Estimates> {
    let estimators = variables
        .iter()
        .map(|v| {
            Ok(TotalEstimator { variable: v.to_string(), y: numeric_values(design.data(), v)? })
        })
        .collect::<Result<Vec<_>>>()?;
    dispatch(design, Statistic::Total, by, |mask| evaluate_all(design, &estimators, mask))
}

// ============================================================================
// Ratio
// ============================================================================

pub(crate) struct RatioEstimator {
    numerator: String,
    denominator: String,
    y: Vec<Option<f64>>,
    x: Vec<Option<f64>>,
}

impl Estimator for RatioEstimator {
    fn variable(&self) -> &str {
        &self.numerator
    }

    fn point(&self, weights: &[f64], mask: Option<&[bool]>) -> Result<f64> {
        point_estimate_ratio(&self.y, &self.x, weights, mask, &self.denominator)
    }

    fn taylor(&self, design: &Design, mask: Option<&[bool]>) -> Result<(f64, f64)> {
        let weights = design.weights();
        let estimate = self.point(weights, mask)?;
        let (_, sum_wx) = ratio_totals(&self.y, &self.x, weights, mask);
        let u = scores_ratio(&self.y, &self.x, estimate, mask);
        Ok((estimate, taylor_variance(design, &u)? / (sum_wx * sum_wx)))
    }

    fn count(&self, mask: Option<&[bool]>) -> usize {
        self.y
            .iter()
            .zip(&self.x)
            .enumerate()
            .filter(|(i, (y, x))| y.is_some() && x.is_some() && in_domain(mask, *i))
            .count()
    }

    fn row(&self) -> EstimateRow {
        EstimateRow { denominator: Some(self.denominator.clone()), ..EstimateRow::new(&self.numerator) }
    }
}

/// Ratio of weighted totals `Σwy / Σwx`.
///
/// # Errors
///
/// All or nothing: the first failing variable, domain or replicate fails the
/// call and no rows are returned. A replicate that leaves a domain with zero
/// weight gives `ZeroDenominator` naming the domain and the replicate.
pub fn ratio(design: &Design, numerator: &str, denominator: &str, by: Option<&str>) -> Result<Estimates> {
    let estimator = RatioEstimator {
        numerator: numerator.to_string(),
        denominator: denominator.to_string(),
        y: numeric_values(design.data(), numerator)?,
        x: numeric_values(design.data(), denominator)?,
    };
    dispatch(design, Statistic::Ratio, by, |mask| {
        evaluate_all(design, std::slice::from_ref(&estimator), mask)
    })
}

// ============================================================================
// Proportion
// ============================================================================

pub(crate) struct ProportionEstimator {
    level: String,
    indicator: MeanEstimator,
    /// fpc of a simple random design, which takes the binomial formula.
    srs_fpc: Option<f64>,
}

impl Estimator for ProportionEstimator {
    fn variable(&self) -> &str {
        &self.indicator.variable
    }

    fn point(&self, weights: &[f64], mask: Option<&[bool]>) -> Result<f64> {
        self.indicator.point(weights, mask)
    }

    fn taylor(&self, design: &Design, mask: Option<&[bool]>) -> Result<(f64, f64)> {
        match (self.srs_fpc, mask) {
            (Some(fpc), None) => {
                let p = self.point(design.weights(), None)?;
                Ok((p, srs_proportion_variance(p, self.count(None), fpc)?))
            }
            _ => self.indicator.taylor(design, mask),
        }
    }

    fn count(&self, mask: Option<&[bool]>) -> usize {
        self.indicator.count(mask)
    }

    fn row(&self) -> EstimateRow {
        EstimateRow { level: Some(self.level.clone()), ..self.indicator.row() }
    }
}

/// Estimated share of every category of each categorical variable, levels in sorted order.
///
/// Fails as a whole, like [`mean`].
pub fn proportion(design: &Design, variables: &[&str], by: Option<&str>) -> Result<Estimates> {
    let srs_fpc = match design {
        Design::SimpleRandom(d) => Some(d.fpc()),
        _ => None,
    };
    let mut estimators = Vec::new();
    for variable in variables {
        let labels = categorical_values(design.data(), variable)?;
        let levels: BTreeSet<&str> = labels.iter().flatten().map(String::as_str).collect();
        for level in levels {
            let indicator = labels
                .iter()
                .map(|v| v.as_deref().map(|l| if l == level { 1.0 } else { 0.0 }))
                .collect();
            estimators.push(ProportionEstimator {
                level: level.to_string(),
                indicator: MeanEstimator::from_values(design, variable, indicator),
                srs_fpc,
            });
        }
    }
    dispatch(design, Statistic::Proportion, by, |mask| evaluate_all(design, &estimators, mask))
}

// ============================================================================
// Quantile
// ============================================================================

pub(crate) struct QuantileEstimator {
    variable: String,
    y: Vec<Option<f64>>,
    p: f64,
    method: QuantileMethod,
}

impl Estimator for QuantileEstimator {
    fn variable(&self) -> &str {
        &self.variable
    }

    fn point(&self, weights: &[f64], mask: Option<&[bool]>) -> Result<f64> {
        point_estimate_quantile(&self.y, weights, mask, self.p, self.method, &self.variable)
    }

    fn taylor(&self, design: &Design, mask: Option<&[bool]>) -> Result<(f64, f64)> {
        quantile_woodruff(design, &self.y, mask, self.p, self.method, &self.variable)
    }

    fn count(&self, mask: Option<&[bool]>) -> usize {
        observed_count(&self.y, mask)
    }

    fn row(&self) -> EstimateRow {
        EstimateRow { probability: Some(self.p), ..EstimateRow::new(&self.variable) }
    }
}

/// Weighted quantiles of each numeric variable at every probability in `probs`.
///
/// # Errors
///
/// All or nothing: the first failing variable, domain or replicate fails the
/// call and no rows are returned. A replicate that leaves a domain with zero
/// weight gives `ZeroDenominator` naming the domain and the replicate.
pub fn quantile(
    design: &Design,
    variables: &[&str],
    probs: &[f64],
    method: QuantileMethod,
    by: Option<&str>,
) -> Result<Estimates> {
    if let Some(&p) = probs.iter().find(|p| !(0.0..=1.0).contains(*p)) {
        return Err(SurveyError::InvalidQuantile { p });
    }
    let mut estimators = Vec::new();
    for variable in variables {
        let y = numeric_values(design.data(), variable)?;
        for &p in probs {
            estimators.push(QuantileEstimator { variable: variable.to_string(), y: y.clone(), p, method });
        }
    }
    dispatch(design, Statistic::Quantile, by, |mask| evaluate_all(design, &estimators, mask))
}

/// Weighted median of each numeric variable; fails as a whole, like [`quantile`].
pub fn median(design: &Design, variables: &[&str], by: Option<&str>) -> Result<Estimates> {
    quantile(design, variables, &[0.5], QuantileMethod::default(), by)
}
