// src/error.rs

use polars::prelude::PolarsError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SurveyError {
    #[error("Dimension mismatch for '{column}': expected {expected} values, got {got}")]
    DimensionMismatch { column: String, expected: usize, got: usize },

    #[error("Invalid design specification: {0}")]
    InvalidDesignSpecification(String),

    #[error("Insufficient sample size in stratum '{stratum}': {count} sampled unit(s)")]
    InsufficientSampleSize { stratum: String, count: usize },

    #[error("Invalid replicate count: {count} (at least 2 replicates are required)")]
    InvalidReplicateCount { count: usize },

    #[error("Unsupported variable type for '{variable}': {dtype}")]
    UnsupportedVariableType { variable: String, dtype: String },

    #[error("Weighted denominator is zero for '{variable}'{}", scope(.domain, .replicate))]
    ZeroDenominator {
        variable: String,
        /// Domain label, when the estimate was split by domain.
        domain: Option<String>,
        /// 1-based replicate column, when the failure came from one replicate.
        replicate: Option<usize>,
    },

    #[error("Quantile probability must lie in [0, 1], got {p}")]
    InvalidQuantile { p: f64 },

    #[error("Invalid replicate column pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    #[error(transparent)]
    Polars(#[from] PolarsError),
}

pub type Result<T> = std::result::Result<T, SurveyError>;

fn scope(domain: &Option<String>, replicate: &Option<usize>) -> String {
    match (domain, replicate) {
        (Some(d), Some(r)) => format!(" in domain '{d}' under replicate {r}"),
        (Some(d), None) => format!(" in domain '{d}'"),
        (None, Some(r)) => format!(" under replicate {r}"),
        (None, None) => String::new(),
    }
}

impl SurveyError {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        SurveyError::InvalidDesignSpecification(msg.into())
    }

    pub(crate) fn singleton(stratum: &str, count: usize) -> Self {
        SurveyError::InsufficientSampleSize { stratum: stratum.to_string(), count }
    }

    pub(crate) fn zero_denominator(variable: &str) -> Self {
        SurveyError::ZeroDenominator { variable: variable.to_string(), domain: None, replicate: None }
    }

    /// Attach the domain label to a zero-denominator failure.
    pub(crate) fn in_domain(self, label: &str) -> Self {
        match self {
            SurveyError::ZeroDenominator { variable, domain: None, replicate } => {
                SurveyError::ZeroDenominator { variable, domain: Some(label.to_string()), replicate }
            }
            other => other,
        }
    }

    /// Attach the 1-based replicate number to a zero-denominator failure.
    pub(crate) fn in_replicate(self, r: usize) -> Self {
        match self {
            SurveyError::ZeroDenominator { variable, domain, replicate: None } => {
                SurveyError::ZeroDenominator { variable, domain, replicate: Some(r) }
            }
            other => other,
        }
    }
}
