//! Parsing of bucketed aggregation responses.

use std::collections::HashMap;

use serde_json::Value;

use crate::error::{Error, Result};
use crate::groupby::compiler::{BucketAggregation, CompositeQuery, MetricKind, BUCKETS_AGG, MISSING_AGG};
use crate::config::NullOrder;
use crate::schema::ColumnKind;
use crate::transport::check_response;
use crate::value::Scalar;

/// Value of one metric sub-aggregation in one bucket
#[derive(Debug, Clone, PartialEq)]
pub enum MetricValue {
    /// `value` of a single-value metric; `None` when the engine returned null
    Value(Option<f64>),
    /// `(percent, value)` pairs of a percentiles metric
    Percentiles(Vec<(f64, Option<f64>)>),
    /// Primitives of an extended_stats metric
    ExtendedStats {
        count: u64,
        sum: f64,
        sum_of_squares: Option<f64>,
    },
}

/// One bucket: a group key, its document count and its metrics
#[derive(Debug, Clone, PartialEq)]
pub struct BucketResult {
    pub key: Vec<Scalar>,
    pub doc_count: u64,
    pub metrics: HashMap<String, MetricValue>,
}

impl BucketResult {
    /// Single value of a metric, if present and non-null
    pub fn value(&self, key: &str) -> Option<f64> {
        match self.metrics.get(key) {
            Some(MetricValue::Value(v)) => *v,
            _ => None,
        }
    }
}

/// Buckets of one response
#[derive(Debug, Clone, Default)]
pub struct BucketPage {
    pub buckets: Vec<BucketResult>,
    /// Cursor of the next composite page; `None` when exhausted
    pub after_key: Option<Value>,
    /// Documents not covered by a (truncated) terms response
    pub sum_other_doc_count: u64,
}

/// Parse one search response produced by `query`
pub fn parse_page(query: &CompositeQuery, response: &Value) -> Result<BucketPage> {
    check_response(response)?;

    let aggregations = response
        .get("aggregations")
        .ok_or_else(|| Error::Consistency("response has no aggregations".into()))?;
    let bucket_agg = aggregations
        .get(BUCKETS_AGG)
        .ok_or_else(|| Error::Consistency(format!("response has no '{}' aggregation", BUCKETS_AGG)))?;
    let raw_buckets = bucket_agg
        .get("buckets")
        .and_then(Value::as_array)
        .ok_or_else(|| Error::Consistency(format!("'{}' has no buckets", BUCKETS_AGG)))?;

    let kinds: Vec<ColumnKind> = query.group.fields.iter().map(|f| f.kind()).collect();
    let mut page = BucketPage::default();

    match &query.bucket {
        BucketAggregation::Terms {
            include_missing,
            null_order,
            ..
        } => {
            let mut buckets = Vec::with_capacity(raw_buckets.len() + 1);
            for raw in raw_buckets {
                let key = parse_key(raw.get("key"), raw.get("key_as_string"), kinds[0])?;
                buckets.push(parse_bucket(query, vec![key], raw)?);
            }

            if *include_missing {
                if let Some(missing) = aggregations.get(MISSING_AGG) {
                    let bucket = parse_bucket(query, vec![Scalar::Null], missing)?;
                    if bucket.doc_count > 0 {
                        match null_order {
                            NullOrder::First => buckets.insert(0, bucket),
                            NullOrder::Last => buckets.push(bucket),
                        }
                    }
                }
            }

            page.buckets = buckets;
            page.sum_other_doc_count = bucket_agg
                .get("sum_other_doc_count")
                .and_then(Value::as_u64)
                .unwrap_or(0);
        }
        BucketAggregation::Composite { sources, .. } => {
            for raw in raw_buckets {
                let raw_key = raw
                    .get("key")
                    .and_then(Value::as_object)
                    .ok_or_else(|| Error::Consistency("composite bucket without key".into()))?;
                let key = sources
                    .iter()
                    .zip(kinds.iter())
                    .map(|(source, kind)| parse_key(raw_key.get(&source.name), None, *kind))
                    .collect::<Result<Vec<_>>>()?;
                page.buckets.push(parse_bucket(query, key, raw)?);
            }
            page.after_key = bucket_agg.get("after_key").filter(|k| !k.is_null()).cloned();
        }
    }

    Ok(page)
}

fn parse_bucket(query: &CompositeQuery, key: Vec<Scalar>, raw: &Value) -> Result<BucketResult> {
    let doc_count = raw.get("doc_count").and_then(Value::as_u64).unwrap_or(0);
    let mut metrics = HashMap::with_capacity(query.metrics.len());

    for (name, _) in &query.metrics {
        let Some(body) = raw.get(name) else {
            continue;
        };
        let kind = query
            .metric_kinds
            .get(name)
            .copied()
            .unwrap_or(MetricKind::Value);
        metrics.insert(name.clone(), parse_metric(kind, body)?);
    }

    Ok(BucketResult {
        key,
        doc_count,
        metrics,
    })
}

fn parse_metric(kind: MetricKind, body: &Value) -> Result<MetricValue> {
    match kind {
        MetricKind::Value => Ok(MetricValue::Value(body.get("value").and_then(Value::as_f64))),
        MetricKind::Percentiles => {
            let values = body
                .get("values")
                .ok_or_else(|| Error::Consistency("percentiles without values".into()))?;
            let pairs = match values {
                // keyed: false
                Value::Array(entries) => entries
                    .iter()
                    .filter_map(|entry| {
                        let percent = entry.get("key").and_then(Value::as_f64)?;
                        Some((percent, entry.get("value").and_then(Value::as_f64)))
                    })
                    .collect(),
                // keyed: true ({"50.0": value})
                Value::Object(entries) => entries
                    .iter()
                    .filter_map(|(percent, value)| {
                        Some((percent.parse::<f64>().ok()?, value.as_f64()))
                    })
                    .collect(),
                _ => return Err(Error::Consistency("malformed percentiles values".into())),
            };
            Ok(MetricValue::Percentiles(pairs))
        }
        MetricKind::ExtendedStats => Ok(MetricValue::ExtendedStats {
            count: body.get("count").and_then(Value::as_u64).unwrap_or(0),
            sum: body.get("sum").and_then(Value::as_f64).unwrap_or(0.0),
            sum_of_squares: body.get("sum_of_squares").and_then(Value::as_f64),
        }),
    }
}

/// Convert a raw bucket key component to a typed scalar
fn parse_key(raw: Option<&Value>, as_string: Option<&Value>, kind: ColumnKind) -> Result<Scalar> {
    let raw = match raw {
        None | Some(Value::Null) => return Ok(Scalar::Null),
        Some(raw) => raw,
    };

    let scalar = match kind {
        ColumnKind::Boolean => match (raw, as_string.and_then(Value::as_str)) {
            (_, Some("true")) => Scalar::Bool(true),
            (_, Some("false")) => Scalar::Bool(false),
            (Value::Bool(b), _) => Scalar::Bool(*b),
            (Value::Number(n), _) => Scalar::Bool(n.as_f64().map_or(false, |v| v != 0.0)),
            (Value::String(s), _) => Scalar::Bool(s == "true"),
            _ => return Err(unexpected_key(raw, kind)),
        },
        ColumnKind::Integer => match raw {
            Value::Number(n) => match n.as_i64() {
                Some(v) => Scalar::Int(v),
                None => n
                    .as_f64()
                    .map(|v| Scalar::Int(v.round() as i64))
                    .ok_or_else(|| unexpected_key(raw, kind))?,
            },
            _ => return Err(unexpected_key(raw, kind)),
        },
        ColumnKind::Float => match raw.as_f64() {
            Some(v) => Scalar::Float(v),
            None => return Err(unexpected_key(raw, kind)),
        },
        ColumnKind::Temporal => match raw.as_f64() {
            Some(millis) => Scalar::from_epoch_millis(millis),
            None => return Err(unexpected_key(raw, kind)),
        },
        ColumnKind::Categorical | ColumnKind::Unaggregatable => match raw {
            Value::String(s) => Scalar::Str(s.clone()),
            other => Scalar::Str(other.to_string()),
        },
    };
    Ok(scalar)
}

fn unexpected_key(raw: &Value, kind: ColumnKind) -> Error {
    Error::Consistency(format!("unexpected {:?} bucket key {}", kind, raw))
}
