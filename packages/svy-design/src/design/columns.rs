// src/design/columns.rs
//! Typed access to unit-table columns.

use polars::prelude::*;

use crate::error::{Result, SurveyError};

/// Declared kind of an analysis variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarKind {
    Numeric,
    Categorical,
}

fn is_integer(dtype: &DataType) -> bool {
    matches!(
        dtype,
        DataType::Int8
            | DataType::Int16
            | DataType::Int32
            | DataType::Int64
            | DataType::UInt8
            | DataType::UInt16
            | DataType::UInt32
            | DataType::UInt64
    )
}

/// Check that `name` can be analysed as `kind` without inspecting its values.
pub fn check_kind(df: &DataFrame, name: &str, kind: VarKind) -> Result<()> {
    let dtype = df.column(name)?.dtype().clone();
    let ok = match kind {
        VarKind::Numeric => {
            is_integer(&dtype) || matches!(dtype, DataType::Float32 | DataType::Float64)
        }
        VarKind::Categorical => {
            is_integer(&dtype) || matches!(dtype, DataType::String | DataType::Boolean)
        }
    };
    if ok {
        Ok(())
    } else {
        Err(SurveyError::UnsupportedVariableType {
            variable: name.to_string(),
            dtype: dtype.to_string(),
        })
    }
}

/// Numeric column values; nulls and non-finite values (`NaN`, `±inf`) are missing.
pub fn numeric_values(df: &DataFrame, name: &str) -> Result<Vec<Option<f64>>> {
    check_kind(df, name, VarKind::Numeric)?;
    let col = df.column(name)?.cast(&DataType::Float64)?;
    Ok(col.f64()?.into_iter().map(|v| v.filter(|x| x.is_finite())).collect())
}

/// Numeric column that must be fully observed (design metadata).
pub fn required_numeric(df: &DataFrame, name: &str) -> Result<Vec<f64>> {
    numeric_values(df, name)?
        .into_iter()
        .enumerate()
        .map(|(i, v)| {
            v.ok_or_else(|| {
                SurveyError::invalid(format!("column '{name}' is missing or non-finite at row {i}"))
            })
        })
        .collect()
}

/// Column values rendered as labels, nulls preserved.
pub fn label_values(df: &DataFrame, name: &str) -> Result<Vec<Option<String>>> {
    let col = df.column(name)?.cast(&DataType::String)?;
    Ok(col.str()?.into_iter().map(|v| v.map(str::to_string)).collect())
}

/// Categorical analysis variable as labels.
pub fn categorical_values(df: &DataFrame, name: &str) -> Result<Vec<Option<String>>> {
    check_kind(df, name, VarKind::Categorical)?;
    label_values(df, name)
}
