//! Aggregation function registry
//!
//! Function names are resolved once, at compile time, into a closed set of
//! realizations: a native engine aggregation, a statistic derived from native
//! primitives, or a statistic that needs a dependent second query.

use std::fmt;

use crate::error::{Error, Result};
use crate::schema::ColumnKind;
use crate::value::Dtype;

/// Quantile fractions requested from `quantile`
#[derive(Debug, Clone, PartialEq)]
pub enum Quantiles {
    /// One fraction: one column per target field
    Scalar(f64),
    /// Several fractions: one extra index level, one row per fraction
    List(Vec<f64>),
}

impl Quantiles {
    pub fn fractions(&self) -> Vec<f64> {
        match self {
            Quantiles::Scalar(q) => vec![*q],
            Quantiles::List(qs) => qs.clone(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        let fractions = self.fractions();
        if fractions.is_empty() {
            return Err(Error::InvalidInput(
                "quantile requires at least one fraction".into(),
            ));
        }
        for q in fractions {
            if !(0.0..=1.0).contains(&q) {
                return Err(Error::InvalidInput(format!(
                    "quantile fraction {} is outside [0, 1]",
                    q
                )));
            }
        }
        Ok(())
    }

    /// Percents as the engine's percentiles aggregation expects them
    pub fn percents(&self) -> Vec<f64> {
        self.fractions().into_iter().map(|q| q * 100.0).collect()
    }
}

impl Default for Quantiles {
    fn default() -> Self {
        Quantiles::Scalar(0.5)
    }
}

impl From<f64> for Quantiles {
    fn from(q: f64) -> Self {
        Quantiles::Scalar(q)
    }
}

impl From<Vec<f64>> for Quantiles {
    fn from(qs: Vec<f64>) -> Self {
        Quantiles::List(qs)
    }
}

impl From<&[f64]> for Quantiles {
    fn from(qs: &[f64]) -> Self {
        Quantiles::List(qs.to_vec())
    }
}

impl<const N: usize> From<[f64; N]> for Quantiles {
    fn from(qs: [f64; N]) -> Self {
        Quantiles::List(qs.to_vec())
    }
}

/// A resolved aggregation function
#[derive(Debug, Clone, PartialEq)]
pub enum AggFunc {
    Min,
    Max,
    Mean,
    Sum,
    Count,
    Nunique,
    Median,
    Quantile(Quantiles),
    Var,
    Std,
    Mad,
}

/// Native engine aggregation
#[derive(Debug, Clone, PartialEq)]
pub enum NativeAgg {
    Min,
    Max,
    Avg,
    Sum,
    ValueCount,
    Cardinality,
    /// Percents in [0, 100]
    Percentiles(Vec<f64>),
}

impl NativeAgg {
    /// Aggregation type name in the query DSL
    pub fn op(&self) -> &'static str {
        match self {
            NativeAgg::Min => "min",
            NativeAgg::Max => "max",
            NativeAgg::Avg => "avg",
            NativeAgg::Sum => "sum",
            NativeAgg::ValueCount => "value_count",
            NativeAgg::Cardinality => "cardinality",
            NativeAgg::Percentiles(_) => "percentiles",
        }
    }
}

/// Statistic computed client-side from one `extended_stats` primitive
/// (`count`, `sum`, `sum_of_squares`)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DerivedStat {
    Variance,
    StdDeviation,
}

/// Statistic that needs a second query depending on first-pass results
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DependentStat {
    /// First pass: per-group mean. Second pass: scripted sum of
    /// `|x - mean|`, value count, and a bucket_script dividing the two.
    MeanAbsoluteDeviation,
}

/// How a function is realized against the engine
#[derive(Debug, Clone, PartialEq)]
pub enum Realization {
    Native(NativeAgg),
    Derived(DerivedStat),
    Dependent(DependentStat),
}

/// Resolve a function name
pub fn resolve(name: &str) -> Result<AggFunc> {
    let func = match name {
        "min" => AggFunc::Min,
        "max" => AggFunc::Max,
        "mean" => AggFunc::Mean,
        "sum" => AggFunc::Sum,
        "count" => AggFunc::Count,
        "nunique" => AggFunc::Nunique,
        "median" => AggFunc::Median,
        "quantile" => AggFunc::Quantile(Quantiles::default()),
        "var" => AggFunc::Var,
        "std" => AggFunc::Std,
        "mad" => AggFunc::Mad,
        other => return Err(Error::unsupported(other)),
    };
    Ok(func)
}

impl AggFunc {
    /// pandas name of the function, used in two-level column labels
    pub fn name(&self) -> &'static str {
        match self {
            AggFunc::Min => "min",
            AggFunc::Max => "max",
            AggFunc::Mean => "mean",
            AggFunc::Sum => "sum",
            AggFunc::Count => "count",
            AggFunc::Nunique => "nunique",
            AggFunc::Median => "median",
            AggFunc::Quantile(_) => "quantile",
            AggFunc::Var => "var",
            AggFunc::Std => "std",
            AggFunc::Mad => "mad",
        }
    }

    pub fn realization(&self) -> Realization {
        match self {
            AggFunc::Min => Realization::Native(NativeAgg::Min),
            AggFunc::Max => Realization::Native(NativeAgg::Max),
            AggFunc::Mean => Realization::Native(NativeAgg::Avg),
            AggFunc::Sum => Realization::Native(NativeAgg::Sum),
            AggFunc::Count => Realization::Native(NativeAgg::ValueCount),
            AggFunc::Nunique => Realization::Native(NativeAgg::Cardinality),
            AggFunc::Median => Realization::Native(NativeAgg::Percentiles(vec![50.0])),
            AggFunc::Quantile(q) => Realization::Native(NativeAgg::Percentiles(q.percents())),
            AggFunc::Var => Realization::Derived(DerivedStat::Variance),
            AggFunc::Std => Realization::Derived(DerivedStat::StdDeviation),
            AggFunc::Mad => Realization::Dependent(DependentStat::MeanAbsoluteDeviation),
        }
    }

    /// Whether the engine can compute the function over a column of `kind`
    pub fn accepts(&self, kind: ColumnKind) -> bool {
        match (self, kind) {
            (_, ColumnKind::Unaggregatable) => false,
            (AggFunc::Count | AggFunc::Nunique, _) => true,
            (
                AggFunc::Min | AggFunc::Max | AggFunc::Mean | AggFunc::Median | AggFunc::Quantile(_),
                kind,
            ) => kind != ColumnKind::Categorical,
            (AggFunc::Sum | AggFunc::Var | AggFunc::Std | AggFunc::Mad, kind) => kind.is_numeric(),
        }
    }

    /// Result dtype over a column of `kind`, before null widening
    pub fn output_dtype(&self, kind: ColumnKind) -> Dtype {
        match (self, kind) {
            (AggFunc::Count | AggFunc::Nunique, _) => Dtype::Int64,
            (AggFunc::Min | AggFunc::Max, kind) => kind.dtype(),
            (AggFunc::Sum, ColumnKind::Integer | ColumnKind::Boolean) => Dtype::Int64,
            (AggFunc::Sum, ColumnKind::Temporal) => Dtype::Datetime,
            (AggFunc::Mean | AggFunc::Median | AggFunc::Quantile(_), ColumnKind::Temporal) => {
                Dtype::Datetime
            }
            _ => Dtype::Float64,
        }
    }
}

impl fmt::Display for AggFunc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}
