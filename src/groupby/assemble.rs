//! Assembly of bucket results into a pandas-shaped table.

use crate::dataframe::table::{Column, ResultTable};
use crate::error::{Error, Result};
use crate::groupby::compiler::{CompositeQuery, OutputColumn, ValueSource};
use crate::groupby::registry::DerivedStat;
use crate::groupby::response::{BucketResult, MetricValue};
use crate::groupby::stats::{sample_std, sample_variance};
use crate::index::{ColumnLabel, Index, MultiIndex, RowIndex};
use crate::value::{Dtype, Scalar};

/// Shape of the column labels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnLayout {
    /// One label per target column (`agg("min")`, `min()`)
    Flat,
    /// `(column, function)` labels (`agg(["min"])`)
    Nested,
}

/// Build the result table from the buckets of `query`.
///
/// Buckets must already be in engine key order with the null bucket where
/// the configured null order puts it.
pub fn assemble(query: &CompositeQuery, buckets: &[BucketResult], layout: ColumnLayout) -> Result<ResultTable> {
    let rows: Vec<(&BucketResult, Option<usize>)> = match &query.quantile_levels {
        Some(levels) => buckets
            .iter()
            .flat_map(|b| (0..levels.len()).map(move |j| (b, Some(j))))
            .collect(),
        None => buckets.iter().map(|b| (b, None)).collect(),
    };

    let index = build_index(query, &rows)?;
    let columns = build_labels(&query.outputs, layout)?;
    let data = query
        .outputs
        .iter()
        .map(|output| {
            let cells = rows
                .iter()
                .map(|(bucket, q)| read_cell(output, bucket, *q))
                .collect();
            Column::from_cells(cells, output.dtype)
        })
        .collect();

    ResultTable::new(index, columns, data)
}

fn build_index(query: &CompositeQuery, rows: &[(&BucketResult, Option<usize>)]) -> Result<RowIndex> {
    let fields = &query.group.fields;
    let mut names: Vec<Option<String>> = fields.iter().map(|f| Some(f.name.clone())).collect();

    if fields.len() == 1 && query.quantile_levels.is_none() {
        let values = rows.iter().map(|(b, _)| b.key[0].clone()).collect();
        let index = Index::with_dtype(values, names.pop().flatten(), fields[0].kind().dtype())?;
        return Ok(RowIndex::Single(index));
    }

    if let Some(levels) = &query.quantile_levels {
        names.push(None);
        if rows.is_empty() {
            return Ok(RowIndex::Multi(MultiIndex::empty(names.len(), Some(names))?));
        }
        let tuples = rows
            .iter()
            .map(|(bucket, q)| {
                let mut tuple = bucket.key.clone();
                tuple.push(Scalar::Float(q.map_or(f64::NAN, |j| levels[j])));
                tuple
            })
            .collect();
        return Ok(RowIndex::Multi(MultiIndex::from_tuples(tuples, Some(names))?));
    }

    if rows.is_empty() {
        return Ok(RowIndex::Multi(MultiIndex::empty(names.len(), Some(names))?));
    }
    let tuples = rows.iter().map(|(bucket, _)| bucket.key.clone()).collect();
    Ok(RowIndex::Multi(MultiIndex::from_tuples(tuples, Some(names))?))
}

fn build_labels(outputs: &[OutputColumn], layout: ColumnLayout) -> Result<Vec<ColumnLabel>> {
    let labels: Vec<ColumnLabel> = outputs
        .iter()
        .map(|o| match layout {
            ColumnLayout::Flat => ColumnLabel::Flat(o.column.clone()),
            ColumnLayout::Nested => ColumnLabel::Pair(o.column.clone(), o.func.name().to_string()),
        })
        .collect();

    for (i, label) in labels.iter().enumerate() {
        if labels[..i].contains(label) {
            return Err(Error::Consistency(format!("duplicate column label {}", label)));
        }
    }
    Ok(labels)
}

fn read_cell(output: &OutputColumn, bucket: &BucketResult, quantile: Option<usize>) -> Scalar {
    let value = match &output.source {
        ValueSource::Null => None,
        ValueSource::Value { key } | ValueSource::Dependent { key } => bucket.value(key),
        ValueSource::Percentile { key, percent } => percentile(bucket, key, *percent),
        ValueSource::Percentiles { key, percents } => quantile
            .and_then(|j| percents.get(j))
            .and_then(|percent| percentile(bucket, key, *percent)),
        ValueSource::Derived { key, stat } => match bucket.metrics.get(key) {
            Some(MetricValue::ExtendedStats {
                count,
                sum,
                sum_of_squares,
            }) => {
                let sum_of_squares = sum_of_squares.unwrap_or(f64::NAN);
                Some(match stat {
                    DerivedStat::Variance => sample_variance(*count, *sum, sum_of_squares),
                    DerivedStat::StdDeviation => sample_std(*count, *sum, sum_of_squares),
                })
            }
            _ => None,
        },
    };

    match value {
        Some(v) if !v.is_nan() => match output.dtype {
            Dtype::Int64 => Scalar::Int(v.round() as i64),
            Dtype::Bool => Scalar::Bool(v != 0.0),
            Dtype::Datetime => Scalar::from_epoch_millis(v),
            _ => Scalar::Float(v),
        },
        _ => Scalar::Null,
    }
}

fn percentile(bucket: &BucketResult, key: &str, percent: f64) -> Option<f64> {
    match bucket.metrics.get(key) {
        Some(MetricValue::Percentiles(values)) => values
            .iter()
            .find(|(p, _)| (p - percent).abs() < 1e-9)
            .and_then(|(_, v)| *v),
        _ => None,
    }
}
