// src/estimation/taylor.rs
//! Point estimates and Taylor-linearization variance.
//!
//! Every estimator reduces to a linearized variable `u` whose weighted total
//! carries the estimator's sampling error; [`taylor_variance`] turns `u` into
//! a variance under the design. Units outside a domain, or with a missing
//! value, keep their place in the design with `u = 0`.

use serde::{Deserialize, Serialize};

use crate::design::index::{GroupIndex, NestedIndex};
use crate::design::{Design, SingletonMethod};
use crate::error::{Result, SurveyError};

/// Two-sided 95% normal quantile used by the Woodruff interval.
pub const WALD_Z: f64 = 1.959_963_984_540_054;

/// Quantile interpolation method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuantileMethod {
    /// Largest value whose CDF is below `p`
    Lower,
    /// Smallest value whose CDF reaches `p` (inverse CDF)
    Higher,
    /// Midpoint of lower and higher
    Middle,
    /// Whichever of lower and higher has the closer CDF
    Nearest,
    /// Linear interpolation of the weighted CDF
    #[default]
    Linear,
}

#[inline]
pub(crate) fn in_domain(mask: Option<&[bool]>, i: usize) -> bool {
    mask.map_or(true, |m| m[i])
}

// ============================================================================
// Point Estimates
// ============================================================================

/// `Σ w` over observed units in the domain.
pub fn weight_total(y: &[Option<f64>], weights: &[f64], mask: Option<&[bool]>) -> f64 {
    y.iter()
        .zip(weights)
        .enumerate()
        .filter(|(i, (yi, _))| yi.is_some() && in_domain(mask, *i))
        .map(|(_, (_, wi))| wi)
        .sum()
}

pub fn point_estimate_total(y: &[Option<f64>], weights: &[f64], mask: Option<&[bool]>) -> f64 {
    y.iter()
        .zip(weights)
        .enumerate()
        .filter(|(i, _)| in_domain(mask, *i))
        .filter_map(|(_, (yi, wi))| Some((*yi)? * wi))
        .sum()
}

pub fn point_estimate_mean(
    y: &[Option<f64>],
    weights: &[f64],
    mask: Option<&[bool]>,
    variable: &str,
) -> Result<f64> {
    let sum_w = weight_total(y, weights, mask);
    if sum_w == 0.0 {
        return Err(SurveyError::zero_denominator(variable));
    }
    Ok(point_estimate_total(y, weights, mask) / sum_w)
}

/// Stratified mean `Σ W_h ȳ_h` with population shares `W_h = N_h / Σ N_h`.
///
/// Strata are combined in label order so the result does not depend on the
/// order strata appear in the unit table.
pub fn point_estimate_stratified_mean(
    y: &[Option<f64>],
    weights: &[f64],
    mask: Option<&[bool]>,
    strata: &GroupIndex,
    variable: &str,
) -> Result<f64> {
    let n_strata = strata.n_groups();
    let mut sum_w = vec![0.0; n_strata];
    let mut sum_wy = vec![0.0; n_strata];
    for (i, (&h, (yi, wi))) in strata.ids().iter().zip(y.iter().zip(weights)).enumerate() {
        if let (Some(y_val), true) = (yi, in_domain(mask, i)) {
            sum_w[h as usize] += wi;
            sum_wy[h as usize] += wi * y_val;
        }
    }

    let order = strata.sorted_groups();
    let big_n: f64 = order.iter().map(|&h| sum_w[h]).sum();
    if big_n == 0.0 {
        return Err(SurveyError::zero_denominator(variable));
    }
    Ok(order
        .iter()
        .filter(|&&h| sum_w[h] > 0.0)
        .map(|&h| (sum_w[h] / big_n) * (sum_wy[h] / sum_w[h]))
        .sum())
}

/// `(Σ wy, Σ wx)` over units where both values are observed.
pub fn ratio_totals(
    y: &[Option<f64>],
    x: &[Option<f64>],
    weights: &[f64],
    mask: Option<&[bool]>,
) -> (f64, f64) {
    let mut sum_wy = 0.0;
    let mut sum_wx = 0.0;
    for (i, ((yi, xi), wi)) in y.iter().zip(x).zip(weights).enumerate() {
        if let (Some(y_val), Some(x_val), true) = (yi, xi, in_domain(mask, i)) {
            sum_wy += wi * y_val;
            sum_wx += wi * x_val;
        }
    }
    (sum_wy, sum_wx)
}

pub fn point_estimate_ratio(
    y: &[Option<f64>],
    x: &[Option<f64>],
    weights: &[f64],
    mask: Option<&[bool]>,
    variable: &str,
) -> Result<f64> {
    let (sum_wy, sum_wx) = ratio_totals(y, x, weights, mask);
    if sum_wx == 0.0 {
        return Err(SurveyError::zero_denominator(variable));
    }
    Ok(sum_wy / sum_wx)
}

// ============================================================================
// Weighted Quantile Functions
// ============================================================================

/// Weighted quantile of sorted values given their cumulative distribution.
///
/// # Arguments
/// * `y_sorted` - Values in ascending order
/// * `cdf` - `cumsum(weights) / sum(weights)` aligned with `y_sorted`
/// * `p` - Target probability in `[0, 1]`
/// * `method` - Interpolation method
pub fn weighted_quantile(y_sorted: &[f64], cdf: &[f64], p: f64, method: QuantileMethod) -> f64 {
    let n = y_sorted.len();
    if n == 0 {
        return f64::NAN;
    }
    if n == 1 || p <= cdf[0] {
        return y_sorted[0];
    }
    if p >= cdf[n - 1] {
        return y_sorted[n - 1];
    }

    // cdf[right] >= p > cdf[left]
    let right = cdf.partition_point(|&c| c < p);
    let left = right - 1;

    match method {
        QuantileMethod::Lower => y_sorted[left],
        QuantileMethod::Higher => y_sorted[right],
        QuantileMethod::Middle => (y_sorted[left] + y_sorted[right]) / 2.0,
        QuantileMethod::Nearest => {
            if (p - cdf[left]).abs() <= (cdf[right] - p).abs() {
                y_sorted[left]
            } else {
                y_sorted[right]
            }
        }
        QuantileMethod::Linear => {
            // p sits exactly on a step: split the flat stretch evenly
            if (cdf[right] - p).abs() < 1e-12 && right + 1 < n {
                return (y_sorted[right] + y_sorted[right + 1]) / 2.0;
            }
            let denom = cdf[right] - cdf[left];
            if denom <= 0.0 {
                return y_sorted[right];
            }
            let t = (p - cdf[left]) / denom;
            (1.0 - t) * y_sorted[left] + t * y_sorted[right]
        }
    }
}

/// Sorted observed values in the domain with their weighted CDF.
pub fn empirical_cdf(
    y: &[Option<f64>],
    weights: &[f64],
    mask: Option<&[bool]>,
) -> Option<(Vec<f64>, Vec<f64>)> {
    let mut pairs: Vec<(f64, f64)> = y
        .iter()
        .zip(weights)
        .enumerate()
        .filter(|(i, (_, wi))| **wi > 0.0 && in_domain(mask, *i))
        .filter_map(|(_, (yi, wi))| Some(((*yi)?, *wi)))
        .collect();
    if pairs.is_empty() {
        return None;
    }
    pairs.sort_by(|a, b| a.0.total_cmp(&b.0));

    let total_w: f64 = pairs.iter().map(|(_, w)| w).sum();
    let mut cumsum = 0.0;
    let cdf = pairs
        .iter()
        .map(|(_, w)| {
            cumsum += w;
            cumsum / total_w
        })
        .collect();
    Some((pairs.into_iter().map(|(y, _)| y).collect(), cdf))
}

pub fn point_estimate_quantile(
    y: &[Option<f64>],
    weights: &[f64],
    mask: Option<&[bool]>,
    p: f64,
    method: QuantileMethod,
    variable: &str,
) -> Result<f64> {
    if !(0.0..=1.0).contains(&p) {
        return Err(SurveyError::InvalidQuantile { p });
    }
    let (y_sorted, cdf) = empirical_cdf(y, weights, mask)
        .ok_or_else(|| SurveyError::zero_denominator(variable))?;
    Ok(weighted_quantile(&y_sorted, &cdf, p, method))
}

// ============================================================================
// Linearized Variables
// ============================================================================

pub fn scores_mean(y: &[Option<f64>], estimate: f64, mask: Option<&[bool]>) -> Vec<f64> {
    y.iter()
        .enumerate()
        .map(|(i, yi)| match yi {
            Some(y_val) if in_domain(mask, i) => y_val - estimate,
            _ => 0.0,
        })
        .collect()
}

pub fn scores_total(y: &[Option<f64>], mask: Option<&[bool]>) -> Vec<f64> {
    y.iter()
        .enumerate()
        .map(|(i, yi)| match yi {
            Some(y_val) if in_domain(mask, i) => *y_val,
            _ => 0.0,
        })
        .collect()
}

/// Residuals `y - R̂x` of the ratio.
pub fn scores_ratio(
    y: &[Option<f64>],
    x: &[Option<f64>],
    ratio: f64,
    mask: Option<&[bool]>,
) -> Vec<f64> {
    y.iter()
        .zip(x)
        .enumerate()
        .map(|(i, (yi, xi))| match (yi, xi) {
            (Some(y_val), Some(x_val)) if in_domain(mask, i) => y_val - ratio * x_val,
            _ => 0.0,
        })
        .collect()
}

// ============================================================================
// Variance of a Weighted Total
// ============================================================================

/// Element sampling within strata: `Σ_h N_h² (1 - f_h) s²_h / n_h`.
fn variance_element(
    u: &[f64],
    weights: &[f64],
    strata: &GroupIndex,
    fpc: &[f64],
    singleton: SingletonMethod,
) -> Result<f64> {
    let n_strata = strata.n_groups();
    let mut n_h = vec![0usize; n_strata];
    let mut big_n = vec![0.0; n_strata];
    let mut sums = vec![0.0; n_strata];
    for ((&h, &ui), &wi) in strata.ids().iter().zip(u).zip(weights) {
        let h = h as usize;
        n_h[h] += 1;
        big_n[h] += wi;
        sums[h] += ui;
    }
    let means: Vec<f64> = sums.iter().zip(&n_h).map(|(s, &n)| s / n.max(1) as f64).collect();
    let mut sum_sq = vec![0.0; n_strata];
    for (&h, &ui) in strata.ids().iter().zip(u) {
        sum_sq[h as usize] += (ui - means[h as usize]).powi(2);
    }
    let grand_mean = if u.is_empty() { 0.0 } else { u.iter().sum::<f64>() / u.len() as f64 };

    let mut total_var = 0.0;
    for h in strata.sorted_groups() {
        match n_h[h] {
            0 => continue,
            1 => match singleton {
                SingletonMethod::Fail => return Err(SurveyError::singleton(strata.label(h), 1)),
                SingletonMethod::Center => {
                    total_var += big_n[h].powi(2) * fpc[h] * (sums[h] - grand_mean).powi(2);
                }
            },
            n => {
                let s2 = sum_sq[h] / (n as f64 - 1.0);
                total_var += big_n[h].powi(2) * fpc[h] * s2 / n as f64;
            }
        }
    }
    Ok(total_var)
}

/// Cluster sampling: between-PSU spread of weighted PSU totals within strata.
fn variance_cluster(
    u: &[f64],
    weights: &[f64],
    strata: &GroupIndex,
    psus: &NestedIndex,
    fpc: &[f64],
    singleton: SingletonMethod,
) -> Result<f64> {
    let mut psu_totals = vec![0.0; psus.psu.n_groups()];
    for ((&c, &ui), &wi) in psus.psu.ids().iter().zip(u).zip(weights) {
        psu_totals[c as usize] += wi * ui;
    }
    let grand_mean = if psu_totals.is_empty() {
        0.0
    } else {
        psu_totals.iter().sum::<f64>() / psu_totals.len() as f64
    };

    let mut total_var = 0.0;
    for h in strata.sorted_groups() {
        let members = psus.psus_in(h);
        let m = members.len();
        match m {
            0 => continue,
            1 => match singleton {
                SingletonMethod::Fail => return Err(SurveyError::singleton(strata.label(h), 1)),
                SingletonMethod::Center => {
                    total_var += fpc[h] * (psu_totals[members[0] as usize] - grand_mean).powi(2);
                }
            },
            _ => {
                let mean_h = members.iter().map(|&c| psu_totals[c as usize]).sum::<f64>() / m as f64;
                let sum_sq: f64 =
                    members.iter().map(|&c| (psu_totals[c as usize] - mean_h).powi(2)).sum();
                total_var += fpc[h] * (m as f64 / (m as f64 - 1.0)) * sum_sq;
            }
        }
    }
    Ok(total_var)
}

/// Variance of the weighted total `Σ wᵢuᵢ` under an analytic design.
pub fn taylor_variance(design: &Design, u: &[f64]) -> Result<f64> {
    let frame = design.frame();
    let weights = frame.weights();
    let singleton = frame.singleton();
    match design {
        Design::SimpleRandom(d) => {
            let strata = GroupIndex::single(u.len(), "all");
            variance_element(u, weights, &strata, &[d.fpc()], singleton)
        }
        Design::Stratified(d) => variance_element(u, weights, d.strata(), d.fpc(), singleton),
        Design::Clustered(d) => variance_cluster(u, weights, d.strata(), d.psus(), d.fpc(), singleton),
        Design::Replicate(_) => Err(SurveyError::invalid(
            "replicate designs are estimated from their replicate weights",
        )),
    }
}

/// Variance of a proportion under simple random sampling: `fpc·p(1-p)/(n-1)`.
pub fn srs_proportion_variance(p: f64, n: usize, fpc: f64) -> Result<f64> {
    if n <= 1 {
        return Err(SurveyError::singleton("all", n));
    }
    Ok(fpc * p * (1.0 - p) / (n as f64 - 1.0))
}

// ============================================================================
// Quantile Variance using Woodruff Method
// ============================================================================

/// Quantile estimate and its Woodruff variance.
///
/// The variance of `F̂(q̂)` comes from the design; the interval
/// `p ± z·se(F̂)` is mapped back through the weighted quantile function and
/// its half-width divided by `z` gives the standard error.
pub fn quantile_woodruff(
    design: &Design,
    y: &[Option<f64>],
    mask: Option<&[bool]>,
    p: f64,
    method: QuantileMethod,
    variable: &str,
) -> Result<(f64, f64)> {
    if !(0.0..=1.0).contains(&p) {
        return Err(SurveyError::InvalidQuantile { p });
    }
    let weights = design.weights();
    let (y_sorted, cdf) = empirical_cdf(y, weights, mask)
        .ok_or_else(|| SurveyError::zero_denominator(variable))?;
    let q = weighted_quantile(&y_sorted, &cdf, p, method);

    let sum_w = weight_total(y, weights, mask);
    let below: Vec<Option<f64>> = y.iter().map(|yi| yi.map(|v| if v <= q { 1.0 } else { 0.0 })).collect();
    let share = point_estimate_total(&below, weights, mask) / sum_w;
    let u = scores_mean(&below, share, mask);
    let var_p = taylor_variance(design, &u)? / sum_w.powi(2);
    let se_p = var_p.max(0.0).sqrt();

    let lower = weighted_quantile(&y_sorted, &cdf, (p - WALD_Z * se_p).max(0.0), method);
    let upper = weighted_quantile(&y_sorted, &cdf, (p + WALD_Z * se_p).min(1.0), method);
    let se = (upper - lower) / (2.0 * WALD_Z);
    Ok((q, se * se))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::design::resolve::Input;
    use crate::design::DesignSpec;
    use approx::assert_relative_eq;
    use polars::df;

    fn some(values: &[f64]) -> Vec<Option<f64>> {
        values.iter().copied().map(Some).collect()
    }

    fn cdf_of(w: &[f64]) -> Vec<f64> {
        let total: f64 = w.iter().sum();
        w.iter().scan(0.0, |acc, &x| { *acc += x; Some(*acc / total) }).collect()
    }

    #[test]
    fn test_weighted_quantile_uniform_weights() {
        let y = vec![1.0, 2.0, 3.0, 4.0, 5.0];
        let cdf = cdf_of(&[1.0; 5]);

        assert_eq!(weighted_quantile(&y, &cdf, 0.5, QuantileMethod::Lower), 2.0);
        assert_eq!(weighted_quantile(&y, &cdf, 0.5, QuantileMethod::Higher), 3.0);
        assert_eq!(weighted_quantile(&y, &cdf, 0.5, QuantileMethod::Middle), 2.5);
        assert_relative_eq!(weighted_quantile(&y, &cdf, 0.5, QuantileMethod::Linear), 2.5);
        assert_eq!(weighted_quantile(&y, &cdf, 0.0, QuantileMethod::Linear), 1.0);
        assert_eq!(weighted_quantile(&y, &cdf, 1.0, QuantileMethod::Linear), 5.0);
    }

    #[test]
    fn test_weighted_quantile_nonuniform_weights() {
        let y = vec![1.0, 2.0, 3.0];
        // CDF = [0.25, 0.75, 1.0]
        let cdf = cdf_of(&[1.0, 2.0, 1.0]);
        assert_relative_eq!(weighted_quantile(&y, &cdf, 0.5, QuantileMethod::Linear), 1.5);
        assert_eq!(weighted_quantile(&y, &cdf, 0.5, QuantileMethod::Nearest), 1.0);
        // exactly on a step: midpoint of the flat stretch
        assert_relative_eq!(weighted_quantile(&y, &cdf, 0.75, QuantileMethod::Linear), 2.5);
    }

    #[test]
    fn test_point_estimates_skip_missing_and_out_of_domain() {
        let y = vec![Some(1.0), None, Some(3.0), Some(10.0)];
        let w = vec![1.0, 5.0, 3.0, 2.0];
        let mask = vec![true, true, true, false];
        assert_relative_eq!(point_estimate_total(&y, &w, Some(&mask)), 10.0);
        assert_relative_eq!(point_estimate_mean(&y, &w, Some(&mask), "y").unwrap(), 2.5);
        let none = vec![false; 4];
        assert!(matches!(
            point_estimate_mean(&y, &w, Some(&none), "y"),
            Err(SurveyError::ZeroDenominator { .. })
        ));
    }

    #[test]
    fn test_stratified_mean_is_population_weighted() {
        let y = some(&[1.0, 3.0, 10.0, 20.0]);
        let w = vec![1.0, 1.0, 4.0, 4.0];
        let strata = GroupIndex::from_labels(&["a", "a", "b", "b"]);
        // W_a = 2/10, W_b = 8/10
        let est = point_estimate_stratified_mean(&y, &w, None, &strata, "y").unwrap();
        assert_relative_eq!(est, 0.2 * 2.0 + 0.8 * 15.0);
    }

    #[test]
    fn test_ratio_ignores_incomplete_pairs() {
        let y = vec![Some(2.0), Some(4.0), None];
        let x = vec![Some(1.0), Some(1.0), Some(5.0)];
        let w = vec![1.0, 1.0, 1.0];
        assert_relative_eq!(point_estimate_ratio(&y, &x, &w, None, "y/x").unwrap(), 3.0);
        assert_eq!(scores_ratio(&y, &x, 3.0, None), vec![-1.0, 1.0, 0.0]);
    }

    #[test]
    fn test_srs_variance_matches_closed_form() {
        let df = df!("y" => [2.0, 4.0, 6.0, 8.0]).unwrap();
        let spec = DesignSpec::simple_random().popsize(Input::Constant(40.0));
        let design = Design::new(&df, &spec).unwrap();
        let u = scores_mean(&some(&[2.0, 4.0, 6.0, 8.0]), 5.0, None);
        // var(y) = 20/3, fpc = 0.9
        let var_mean = taylor_variance(&design, &u).unwrap() / 40.0_f64.powi(2);
        assert_relative_eq!(var_mean, 0.9 * (20.0 / 3.0) / 4.0, epsilon = 1e-12);
    }

    #[test]
    fn test_cluster_variance_uses_psu_totals() {
        let df = df!(
            "y" => [1.0, 1.0, 2.0, 2.0, 6.0, 6.0],
            "c" => [1i64, 1, 2, 2, 3, 3]
        )
        .unwrap();
        let design = Design::new(&df, &DesignSpec::clustered("c")).unwrap();
        let u = scores_total(&some(&[1.0, 1.0, 2.0, 2.0, 6.0, 6.0]), None);
        // PSU totals 2, 4, 12: mean 6, SS = 16 + 4 + 36 = 56, m/(m-1) = 1.5
        assert_relative_eq!(taylor_variance(&design, &u).unwrap(), 84.0);
    }

    #[test]
    fn test_singleton_stratum_fails_or_centers() {
        let df = df!(
            "y" => [1.0, 2.0, 3.0],
            "h" => ["a", "a", "b"]
        )
        .unwrap();
        let u = scores_total(&some(&[1.0, 2.0, 3.0]), None);

        let design = Design::new(&df, &DesignSpec::stratified("h")).unwrap();
        match taylor_variance(&design, &u) {
            Err(SurveyError::InsufficientSampleSize { stratum, count }) => {
                assert_eq!(stratum, "b");
                assert_eq!(count, 1);
            }
            other => panic!("expected InsufficientSampleSize, got {other:?}"),
        }

        let centered = DesignSpec::stratified("h").singleton(SingletonMethod::Center);
        let design = Design::new(&df, &centered).unwrap();
        // stratum a: N=2, s²=0.5, n=2 -> 4 * 0.5 / 2 = 1; stratum b: (3 - 2)² = 1
        assert_relative_eq!(taylor_variance(&design, &u).unwrap(), 2.0);
    }

    #[test]
    fn test_woodruff_se_is_positive_and_finite() {
        let values: Vec<f64> = (1..=20).map(f64::from).collect();
        let df = df!("y" => values.clone()).unwrap();
        let design = Design::new(&df, &DesignSpec::simple_random()).unwrap();
        let (q, var) =
            quantile_woodruff(&design, &some(&values), None, 0.5, QuantileMethod::Linear, "y").unwrap();
        assert_relative_eq!(q, 10.5);
        assert!(var.is_finite() && var > 0.0);
        assert!(matches!(
            quantile_woodruff(&design, &some(&values), None, 1.5, QuantileMethod::Linear, "y"),
            Err(SurveyError::InvalidQuantile { .. })
        ));
    }
}
