// tests/replicates.rs
use approx::assert_relative_eq;
use polars::df;
use polars::prelude::DataFrame;

use svy_design::{
    mean, quantile, ratio, total, BootstrapConfig, Design, DesignSpec, Input, JackknifeConfig,
    QuantileMethod, ReplicateOptions, ReplicateSelector, SurveyError,
};

fn supplied_frame() -> DataFrame {
    df!(
        "y" => [3.0, 5.0, 4.0, 8.0, 6.0, 9.0],
        "g" => ["a", "b", "a", "b", "a", "b"],
        "rep_1" => [2.0, 0.0, 1.0, 1.0, 2.0, 0.0],
        "rep_2" => [0.0, 2.0, 1.0, 1.0, 0.0, 2.0],
        "rep_3" => [1.0, 1.0, 2.0, 0.0, 1.0, 1.0],
        "rep_4" => [1.0, 1.0, 0.0, 2.0, 1.0, 1.0]
    )
    .unwrap()
}

/// 4 strata x 5 PSUs x 3 units.
fn clustered_frame() -> DataFrame {
    let mut id = Vec::new();
    let mut stratum = Vec::new();
    let mut psu = Vec::new();
    let mut y = Vec::new();
    let mut x = Vec::new();
    for h in 0..4i64 {
        for c in 0..5i64 {
            for k in 0..3i64 {
                id.push(h * 100 + c * 10 + k);
                stratum.push(format!("s{h}"));
                psu.push(format!("p{c}"));
                y.push(10.0 + (h * 3) as f64 + ((c * 7 + k * 3) % 11) as f64);
                x.push(5.0 + ((c * 5 + k) % 4) as f64);
            }
        }
    }
    df!("id" => id, "stratum" => stratum, "psu" => psu, "y" => y, "x" => x).unwrap()
}

fn clustered_design(df: &DataFrame) -> Design {
    Design::new(df, &DesignSpec::clustered("psu").strata("stratum").weights(Input::Constant(4.0))).unwrap()
}

/// Rows in a fixed scrambled order.
fn scrambled(df: &DataFrame) -> DataFrame {
    let n = df.height() as u32;
    let order: Vec<u32> = (0..n).map(|i| (i * 37 + 11) % n).collect();
    df.take(&polars::prelude::IdxCa::from_vec("idx".into(), order)).unwrap()
}

#[test]
fn selector_forms_are_equivalent() {
    let df = supplied_frame();
    let base = Design::new(&df, &DesignSpec::simple_random()).unwrap();
    let options = ReplicateOptions::default();
    let names = ReplicateSelector::Names((1..=4).map(|r| format!("rep_{r}")).collect());
    let range = ReplicateSelector::Range { start: 2, end: 6 };
    let pattern = ReplicateSelector::Pattern("^rep_[0-9]+$".into());

    let results: Vec<_> = [names, range, pattern]
        .iter()
        .map(|selector| {
            let design = base.with_replicate_columns(selector, &options).unwrap();
            mean(&design, &["y"], None).unwrap()
        })
        .collect();
    assert_eq!(results[0], results[1]);
    assert_eq!(results[0], results[2]);
    assert_eq!(results[0].rows()[0].replicates.as_ref().map(Vec::len), Some(4));
}

#[test]
fn replicate_column_order_does_not_change_se() {
    let df = supplied_frame();
    let base = Design::new(&df, &DesignSpec::simple_random()).unwrap();
    let options = ReplicateOptions::default();
    let forward = ReplicateSelector::Names(vec!["rep_1".into(), "rep_2".into(), "rep_3".into(), "rep_4".into()]);
    let reversed = ReplicateSelector::Names(vec!["rep_4".into(), "rep_3".into(), "rep_2".into(), "rep_1".into()]);

    let a = mean(&base.with_replicate_columns(&forward, &options).unwrap(), &["y"], None).unwrap();
    let b = mean(&base.with_replicate_columns(&reversed, &options).unwrap(), &["y"], None).unwrap();
    assert_eq!(a.rows()[0].estimate, b.rows()[0].estimate);
    assert_relative_eq!(a.rows()[0].se, b.rows()[0].se, max_relative = 1e-12);
}

#[test]
fn replicate_variance_formula() {
    let df = supplied_frame();
    let base = Design::new(&df, &DesignSpec::simple_random()).unwrap();
    let selector = ReplicateSelector::Pattern("^rep_".into());
    let design = base.with_replicate_columns(&selector, &ReplicateOptions::default()).unwrap();
    let result = total(&design, &["y"], None).unwrap();
    let row = &result.rows()[0];

    // replicate totals: 6+4+8+12 = 30, 10+4+8+18 = 40, 3+5+8+6+9 = 31, 3+5+16+6+9 = 39
    assert_relative_eq!(row.estimate, 35.0);
    assert_eq!(row.replicates.as_deref(), Some(&[30.0, 40.0, 31.0, 39.0][..]));
    let expected = (25.0 + 25.0 + 16.0 + 16.0) / 4.0;
    assert_relative_eq!(row.variance, expected);

    let scaled = base
        .with_replicate_columns(&selector, &ReplicateOptions { scale: 2.0, ..Default::default() })
        .unwrap();
    assert_relative_eq!(total(&scaled, &["y"], None).unwrap().rows()[0].variance, 2.0 * expected);
}

#[test]
fn replicate_domains_carry_labels() {
    let df = supplied_frame();
    let base = Design::new(&df, &DesignSpec::simple_random()).unwrap();
    let design = base
        .with_replicate_columns(&ReplicateSelector::Pattern("^rep_".into()), &ReplicateOptions::default())
        .unwrap();
    let est = total(&design, &["y"], Some("g")).unwrap();
    assert_eq!(est.len(), 2);
    assert_relative_eq!(est.get("y", Some("a")).unwrap().estimate, 13.0);
    let out = est.to_dataframe().unwrap();
    assert!(out.column("g").is_ok());
    assert!(out.column("rep_4").is_ok());
}

#[test]
fn jackknife_total_matches_linearization() {
    let df = clustered_frame();
    let design = clustered_design(&df);
    let taylor = total(&design, &["y"], None).unwrap().rows()[0].variance;
    let jk = design.jackknife(&JackknifeConfig::default()).unwrap();
    let result = total(&jk, &["y"], None).unwrap();
    let row = &result.rows()[0];
    assert_eq!(row.replicates.as_ref().map(Vec::len), Some(20));
    assert_relative_eq!(row.variance, taylor, max_relative = 1e-9);
}

#[test]
fn bootstrap_is_reproducible() {
    let df = clustered_frame();
    let design = clustered_design(&df);
    let config = BootstrapConfig { replicates: 50, seed: 2024, ..Default::default() };
    let a = ratio(&design.bootstrap(&config).unwrap(), "y", "x", None).unwrap();
    let b = ratio(&design.bootstrap(&config).unwrap(), "y", "x", None).unwrap();
    assert_eq!(a, b);

    let other = BootstrapConfig { seed: 2025, ..config };
    let c = ratio(&design.bootstrap(&other).unwrap(), "y", "x", None).unwrap();
    assert_ne!(a.rows()[0].replicates, c.rows()[0].replicates);
}

#[test]
fn bootstrap_ignores_row_order() {
    let df = clustered_frame();
    let shuffled = scrambled(&df);
    let config = BootstrapConfig { replicates: 30, seed: 11, ..Default::default() };

    let a = mean(&clustered_design(&df).bootstrap(&config).unwrap(), &["y"], None).unwrap();
    let b = mean(&clustered_design(&shuffled).bootstrap(&config).unwrap(), &["y"], None).unwrap();
    let (ra, rb) = (&a.rows()[0], &b.rows()[0]);
    assert_relative_eq!(ra.estimate, rb.estimate, max_relative = 1e-12);
    for (x, y) in ra.replicates.as_ref().unwrap().iter().zip(rb.replicates.as_ref().unwrap()) {
        assert_relative_eq!(*x, *y, max_relative = 1e-12);
    }
    assert_relative_eq!(ra.se, rb.se, max_relative = 1e-9);
}

#[test]
fn bootstrap_se_tracks_linearization() {
    let df = clustered_frame();
    let design = clustered_design(&df);
    let taylor = mean(&design, &["y"], None).unwrap().rows()[0].se;
    let config = BootstrapConfig { replicates: 2000, seed: 1, ..Default::default() };
    let boot = mean(&design.bootstrap(&config).unwrap(), &["y"], None).unwrap().rows()[0].se;
    assert!((boot / taylor - 1.0).abs() < 0.25, "bootstrap se {boot} vs taylor se {taylor}");
}

#[test]
fn replicate_quantile_has_spread() {
    let df = clustered_frame();
    let design = clustered_design(&df).bootstrap(&BootstrapConfig { replicates: 40, seed: 5, ..Default::default() }).unwrap();
    let est = quantile(&design, &["y"], &[0.5], QuantileMethod::Linear, None).unwrap();
    let row = &est.rows()[0];
    assert!(row.estimate > 10.0);
    assert!(row.se.is_finite());
    assert_eq!(row.df, 39);
}

/// 15 clusters of 4 units; domain "rare" lives only in the first cluster.
fn rare_domain_frame() -> DataFrame {
    let mut psu = Vec::new();
    let mut group = Vec::new();
    let mut y = Vec::new();
    for c in 0..15i64 {
        for k in 0..4i64 {
            psu.push(c);
            group.push(if c == 0 { "rare" } else { "common" });
            y.push(2.0 + ((c * 5 + k * 3) % 9) as f64);
        }
    }
    df!("psu" => psu, "group" => group, "y" => y).unwrap()
}

#[test]
fn replicate_dropping_a_domain_names_it() {
    let df = rare_domain_frame();
    let design = Design::new(&df, &DesignSpec::clustered("psu").weights(Input::Constant(3.0))).unwrap();

    let taylor = mean(&design, &["y"], Some("group")).unwrap();
    assert_eq!(taylor.len(), 2);
    assert!(taylor.get("y", Some("rare")).is_some());

    let boot = design.bootstrap(&BootstrapConfig { replicates: 200, seed: 3, ..Default::default() }).unwrap();
    match mean(&boot, &["y"], Some("group")) {
        Err(SurveyError::ZeroDenominator { variable, domain, replicate }) => {
            assert_eq!(variable, "y");
            assert_eq!(domain.as_deref(), Some("rare"));
            assert!(matches!(replicate, Some(r) if (1..=200).contains(&r)));
        }
        other => panic!("expected ZeroDenominator, got {other:?}"),
    }
}

#[test]
fn bootstrap_on_unit_ids_ignores_row_order() {
    let df = clustered_frame();
    let shuffled = scrambled(&df);
    let spec = DesignSpec::clustered("id").weights(Input::Constant(4.0));
    let config = BootstrapConfig { replicates: 25, seed: 19, ..Default::default() };

    let a = total(&Design::new(&df, &spec).unwrap().bootstrap(&config).unwrap(), &["y"], None).unwrap();
    let b = total(&Design::new(&shuffled, &spec).unwrap().bootstrap(&config).unwrap(), &["y"], None).unwrap();
    for (x, y) in a.rows()[0].replicates.as_ref().unwrap().iter().zip(b.rows()[0].replicates.as_ref().unwrap()) {
        assert_relative_eq!(*x, *y, max_relative = 1e-12);
    }
}

#[test]
fn too_few_replicates() {
    let df = clustered_frame();
    let config = BootstrapConfig { replicates: 1, ..Default::default() };
    assert!(matches!(
        clustered_design(&df).bootstrap(&config),
        Err(SurveyError::InvalidReplicateCount { count: 1 })
    ));

    let base = Design::new(&supplied_frame(), &DesignSpec::simple_random()).unwrap();
    assert!(matches!(
        base.with_replicate_columns(&ReplicateSelector::Names(vec!["rep_1".into()]), &ReplicateOptions::default()),
        Err(SurveyError::InvalidReplicateCount { count: 1 })
    ));
}
