//! In-process emulator of the search engine's aggregation endpoint
//!
//! Understands the subset of the aggregation DSL the grouping core emits:
//! `terms`, `missing` and paginated `composite` buckets, the metric
//! aggregations, the scripted absolute-deviation `sum` and `bucket_script`.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use searchframe::schema::{ColumnKind, TableSchema};
use searchframe::transport::Transport;
use searchframe::value::Scalar;
use searchframe::{Error, Result};
use serde_json::{json, Map, Value};

pub type Doc = Map<String, Value>;

pub struct MockEngine {
    schema: TableSchema,
    docs: Vec<Doc>,
    requests: Mutex<Vec<Value>>,
    failure: Option<(u16, String)>,
}

impl MockEngine {
    pub fn new(schema: TableSchema, docs: Vec<Doc>) -> Self {
        MockEngine {
            schema,
            docs,
            requests: Mutex::new(Vec::new()),
            failure: None,
        }
    }

    /// An engine answering every search with an error body
    pub fn failing(schema: TableSchema, status: u16, message: &str) -> Self {
        MockEngine {
            failure: Some((status, message.to_string())),
            ..MockEngine::new(schema, Vec::new())
        }
    }

    pub fn schema(&self) -> &TableSchema {
        &self.schema
    }

    pub fn docs(&self) -> &[Doc] {
        &self.docs
    }

    /// Request bodies received so far
    pub fn requests(&self) -> Vec<Value> {
        self.requests.lock().unwrap().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    fn kind_of(&self, field: &str) -> ColumnKind {
        self.schema
            .fields()
            .iter()
            .find(|f| f.agg_field.as_deref() == Some(field) || f.name == field)
            .map(|f| f.kind())
            .unwrap_or(ColumnKind::Categorical)
    }

    fn raw<'d>(&self, doc: &'d Doc, field: &str) -> Option<&'d Value> {
        doc.get(field).or_else(|| {
            field
                .rsplit_once('.')
                .and_then(|(base, _)| doc.get(base))
        })
    }

    fn value(&self, doc: &Doc, field: &str) -> Scalar {
        match self.raw(doc, field) {
            Some(raw) => to_scalar(raw, self.kind_of(field)),
            None => Scalar::Null,
        }
    }

    /// Lookup key the painless script builds from a document's boxed doc
    /// values (Boolean, ZonedDateTime, Double, Long or String)
    fn painless_key(&self, doc: &Doc, by: &[&str]) -> String {
        by.iter()
            .map(|field| match (self.kind_of(field), self.raw(doc, field)) {
                (_, None) | (_, Some(Value::Null)) => "n;".to_string(),
                (ColumnKind::Boolean, Some(Value::Bool(b))) => format!("b{};", u8::from(*b)),
                (ColumnKind::Temporal, Some(v)) => {
                    format!("t{};", v.as_f64().unwrap_or(0.0).round() as i64)
                }
                (ColumnKind::Float, Some(v)) => {
                    format!("f{};", double_to_long_bits(v.as_f64().unwrap_or(f64::NAN)))
                }
                (ColumnKind::Integer, Some(v)) => format!("i{};", v.as_i64().unwrap_or(0)),
                (_, Some(v)) => {
                    let s = match v {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    format!("s{}:{}", s.encode_utf16().count(), s)
                }
            })
            .collect()
    }

    fn values(&self, docs: &[usize], field: &str) -> Vec<Scalar> {
        docs.iter()
            .map(|&i| self.value(&self.docs[i], field))
            .filter(|v| !v.is_null())
            .collect()
    }

    fn numbers(&self, docs: &[usize], field: &str) -> Vec<f64> {
        self.values(docs, field)
            .iter()
            .filter_map(Scalar::as_f64)
            .collect()
    }

    fn eval_bucket_agg(&self, agg: &Value, docs: &[usize]) -> Result<Value> {
        let sub_aggs = agg.get("aggs");

        if let Some(terms) = agg.get("terms") {
            let field = str_param(terms, "field")?;
            let size = terms.get("size").and_then(Value::as_u64).unwrap_or(10) as usize;
            let kind = self.kind_of(field);

            let mut groups: HashMap<Scalar, Vec<usize>> = HashMap::new();
            for &i in docs {
                let key = self.value(&self.docs[i], field);
                if !key.is_null() {
                    groups.entry(key).or_default().push(i);
                }
            }
            let mut keys: Vec<Scalar> = groups.keys().cloned().collect();
            keys.sort_by(compare_scalars);

            let mut buckets = Vec::new();
            let mut other = 0;
            for (n, key) in keys.iter().enumerate() {
                let rows = &groups[key];
                if n >= size {
                    other += rows.len();
                    continue;
                }
                let mut bucket = self.eval_metrics(sub_aggs, rows)?;
                if kind == ColumnKind::Boolean {
                    let b = matches!(key, Scalar::Bool(true));
                    bucket.insert("key".into(), json!(if b { 1 } else { 0 }));
                    bucket.insert("key_as_string".into(), json!(b.to_string()));
                } else {
                    bucket.insert("key".into(), key_json(key));
                }
                bucket.insert("doc_count".into(), json!(rows.len()));
                buckets.push(Value::Object(bucket));
            }
            return Ok(json!({
                "doc_count_error_upper_bound": 0,
                "sum_other_doc_count": other,
                "buckets": buckets
            }));
        }

        if let Some(missing) = agg.get("missing") {
            let field = str_param(missing, "field")?;
            let rows: Vec<usize> = docs
                .iter()
                .copied()
                .filter(|&i| self.value(&self.docs[i], field).is_null())
                .collect();
            let mut bucket = self.eval_metrics(sub_aggs, &rows)?;
            bucket.insert("doc_count".into(), json!(rows.len()));
            return Ok(Value::Object(bucket));
        }

        if let Some(composite) = agg.get("composite") {
            return self.eval_composite(composite, sub_aggs, docs);
        }

        Err(Error::Backend {
            status: Some(400),
            message: format!("unsupported aggregation {}", agg),
        })
    }

    fn eval_composite(&self, composite: &Value, sub_aggs: Option<&Value>, docs: &[usize]) -> Result<Value> {
        let size = composite.get("size").and_then(Value::as_u64).unwrap_or(10) as usize;
        let mut sources = Vec::new();
        for source in composite
            .get("sources")
            .and_then(Value::as_array)
            .ok_or_else(|| bad_request("composite without sources"))?
        {
            let (name, body) = source
                .as_object()
                .and_then(|m| m.iter().next())
                .ok_or_else(|| bad_request("empty composite source"))?;
            let terms = body.get("terms").ok_or_else(|| bad_request("non-terms source"))?;
            let field = str_param(terms, "field")?.to_string();
            let missing_bucket = terms.get("missing_bucket").and_then(Value::as_bool).unwrap_or(false);
            let nulls_first = terms.get("missing_order").and_then(Value::as_str) == Some("first");
            sources.push((name.clone(), field, missing_bucket, nulls_first));
        }

        let mut groups: HashMap<Vec<Scalar>, Vec<usize>> = HashMap::new();
        for &i in docs {
            let key: Vec<Scalar> = sources
                .iter()
                .map(|(_, field, _, _)| self.value(&self.docs[i], field))
                .collect();
            let allowed = key
                .iter()
                .zip(sources.iter())
                .all(|(k, (_, _, missing_bucket, _))| !k.is_null() || *missing_bucket);
            if allowed {
                groups.entry(key).or_default().push(i);
            }
        }

        let nulls_first: Vec<bool> = sources.iter().map(|s| s.3).collect();
        let order = |a: &Vec<Scalar>, b: &Vec<Scalar>| compare_tuples(a, b, &nulls_first);
        let mut keys: Vec<Vec<Scalar>> = groups.keys().cloned().collect();
        keys.sort_by(order);

        if let Some(after) = composite.get("after") {
            let after: Vec<Scalar> = sources
                .iter()
                .map(|(name, field, _, _)| match after.get(name) {
                    Some(raw) => to_scalar(raw, self.kind_of(field)),
                    None => Scalar::Null,
                })
                .collect();
            keys.retain(|k| order(k, &after) == Ordering::Greater);
        }
        keys.truncate(size);

        let mut buckets = Vec::new();
        for key in &keys {
            let rows = &groups[key];
            let mut bucket = self.eval_metrics(sub_aggs, rows)?;
            bucket.insert("key".into(), tuple_json(&sources, key));
            bucket.insert("doc_count".into(), json!(rows.len()));
            buckets.push(Value::Object(bucket));
        }

        let mut result = json!({ "buckets": buckets });
        if let Some(last) = keys.last() {
            result["after_key"] = tuple_json(&sources, last);
        }
        Ok(result)
    }

    fn eval_metrics(&self, aggs: Option<&Value>, docs: &[usize]) -> Result<Map<String, Value>> {
        let mut out = Map::new();
        let Some(aggs) = aggs.and_then(Value::as_object) else {
            return Ok(out);
        };

        for (name, agg) in aggs {
            if agg.get("bucket_script").is_some() {
                continue;
            }
            out.insert(name.clone(), self.eval_metric(agg, docs)?);
        }

        for (name, agg) in aggs {
            let Some(script) = agg.get("bucket_script") else {
                continue;
            };
            let path = script
                .get("buckets_path")
                .ok_or_else(|| bad_request("bucket_script without buckets_path"))?;
            let input = |var: &str| {
                path.get(var)
                    .and_then(Value::as_str)
                    .and_then(|agg_name| out.get(agg_name))
                    .and_then(|v| v.get("value"))
                    .and_then(Value::as_f64)
            };
            let value = match (input("abs_dev_sum"), input("n")) {
                (Some(sum), Some(n)) if n > 0.0 => json!(sum / n),
                _ => Value::Null,
            };
            out.insert(name.clone(), json!({ "value": value }));
        }

        Ok(out)
    }

    fn eval_metric(&self, agg: &Value, docs: &[usize]) -> Result<Value> {
        let (op, body) = agg
            .as_object()
            .and_then(|m| m.iter().next())
            .ok_or_else(|| bad_request("empty metric"))?;

        if op == "sum" {
            if let Some(script) = body.get("script") {
                return Ok(json!({ "value": self.eval_abs_deviation(script, docs)? }));
            }
        }

        let field = str_param(body, "field")?;
        let numbers = self.numbers(docs, field);
        let value = match op.as_str() {
            "min" => json!(numbers.iter().copied().reduce(f64::min)),
            "max" => json!(numbers.iter().copied().reduce(f64::max)),
            "avg" => {
                if numbers.is_empty() {
                    Value::Null
                } else {
                    json!(numbers.iter().sum::<f64>() / numbers.len() as f64)
                }
            }
            "sum" => json!(numbers.iter().sum::<f64>()),
            "value_count" => json!(self.values(docs, field).len()),
            "cardinality" => {
                let distinct: HashSet<Scalar> = self.values(docs, field).into_iter().collect();
                json!(distinct.len())
            }
            "percentiles" => {
                let percents: Vec<f64> = body
                    .get("percents")
                    .and_then(Value::as_array)
                    .map(|p| p.iter().filter_map(Value::as_f64).collect())
                    .unwrap_or_else(|| vec![1.0, 5.0, 25.0, 50.0, 75.0, 95.0, 99.0]);
                let mut sorted = numbers.clone();
                sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
                let values: Vec<Value> = percents
                    .iter()
                    .map(|p| json!({"key": p, "value": linear_quantile(&sorted, p / 100.0)}))
                    .collect();
                return Ok(json!({ "values": values }));
            }
            "extended_stats" => {
                let count = numbers.len();
                let sum: f64 = numbers.iter().sum();
                let sum_of_squares: f64 = numbers.iter().map(|v| v * v).sum();
                return Ok(json!({
                    "count": count,
                    "sum": sum,
                    "sum_of_squares": if count == 0 { Value::Null } else { json!(sum_of_squares) },
                    "min": numbers.iter().copied().reduce(f64::min),
                    "max": numbers.iter().copied().reduce(f64::max)
                }));
            }
            other => {
                return Err(bad_request(&format!("unsupported metric {}", other)));
            }
        };
        Ok(json!({ "value": value }))
    }

    /// Scripted sum of |x - mean(group)|, keyed the way the painless script
    /// builds its lookup key
    fn eval_abs_deviation(&self, script: &Value, docs: &[usize]) -> Result<f64> {
        let params = script.get("params").ok_or_else(|| bad_request("script without params"))?;
        let by: Vec<&str> = params
            .get("by")
            .and_then(Value::as_array)
            .ok_or_else(|| bad_request("script without by"))?
            .iter()
            .filter_map(Value::as_str)
            .collect();
        let field = str_param(params, "field")?;
        let means = params
            .get("means")
            .and_then(Value::as_object)
            .ok_or_else(|| bad_request("script without means"))?;

        let mut total = 0.0;
        for &i in docs {
            let doc = &self.docs[i];
            let Some(x) = self.value(doc, field).as_f64() else {
                continue;
            };
            if let Some(mean) = means.get(&self.painless_key(doc, &by)).and_then(Value::as_f64) {
                total += (x - mean).abs();
            }
        }
        Ok(total)
    }
}

impl Transport for MockEngine {
    fn search(&self, _index: &str, body: &Value) -> Result<Value> {
        self.requests.lock().unwrap().push(body.clone());
        if let Some((status, message)) = &self.failure {
            return Ok(json!({
                "error": {"type": "search_phase_execution_exception", "reason": message},
                "status": status
            }));
        }
        if body.get("size").and_then(Value::as_u64) != Some(0) {
            return Err(bad_request("aggregation requests must not fetch hits"));
        }

        let aggs = body
            .get("aggs")
            .and_then(Value::as_object)
            .ok_or_else(|| bad_request("request without aggs"))?;
        let all: Vec<usize> = (0..self.docs.len()).collect();
        let mut aggregations = Map::new();
        for (name, agg) in aggs {
            aggregations.insert(name.clone(), self.eval_bucket_agg(agg, &all)?);
        }

        Ok(json!({
            "took": 1,
            "timed_out": false,
            "hits": {"total": {"value": self.docs.len()}, "hits": []},
            "aggregations": aggregations
        }))
    }

    fn mapping(&self, index: &str) -> Result<Value> {
        let mut properties = Map::new();
        for field in self.schema.fields() {
            properties.insert(field.name.clone(), json!({ "type": field.field_type.as_str() }));
        }
        let mut response = Map::new();
        response.insert(index.to_string(), json!({ "mappings": { "properties": properties } }));
        Ok(Value::Object(response))
    }
}

/// Typed view of a document value
pub fn to_scalar(raw: &Value, kind: ColumnKind) -> Scalar {
    match (kind, raw) {
        (_, Value::Null) => Scalar::Null,
        (ColumnKind::Integer, v) => v.as_i64().map(Scalar::Int).unwrap_or(Scalar::Null),
        (ColumnKind::Float, v) => v.as_f64().map(Scalar::Float).unwrap_or(Scalar::Null),
        (ColumnKind::Boolean, Value::Bool(b)) => Scalar::Bool(*b),
        (ColumnKind::Temporal, v) => v.as_f64().map(Scalar::from_epoch_millis).unwrap_or(Scalar::Null),
        (_, Value::String(s)) => Scalar::Str(s.clone()),
        (_, other) => Scalar::Str(other.to_string()),
    }
}

/// `Double.doubleToLongBits`: IEEE 754 bits with NaN collapsed to one value
fn double_to_long_bits(x: f64) -> i64 {
    if x.is_nan() {
        0x7ff8_0000_0000_0000
    } else {
        x.to_bits() as i64
    }
}

/// Ascending key order: booleans, numbers and timestamps numerically,
/// strings lexicographically
pub fn compare_scalars(a: &Scalar, b: &Scalar) -> Ordering {
    match (a, b) {
        (Scalar::Str(a), Scalar::Str(b)) => a.cmp(b),
        _ => {
            let a = a.as_f64().unwrap_or(f64::NAN);
            let b = b.as_f64().unwrap_or(f64::NAN);
            a.partial_cmp(&b).unwrap_or(Ordering::Equal)
        }
    }
}

/// Lexicographic tuple order with per-level null placement
pub fn compare_tuples(a: &[Scalar], b: &[Scalar], nulls_first: &[bool]) -> Ordering {
    for (i, (x, y)) in a.iter().zip(b.iter()).enumerate() {
        let first = nulls_first.get(i).copied().unwrap_or(false);
        let ordering = match (x.is_null(), y.is_null()) {
            (true, true) => Ordering::Equal,
            (true, false) if first => Ordering::Less,
            (true, false) => Ordering::Greater,
            (false, true) if first => Ordering::Greater,
            (false, true) => Ordering::Less,
            (false, false) => compare_scalars(x, y),
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

/// pandas' default (linear) quantile over sorted values
pub fn linear_quantile(sorted: &[f64], q: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    let pos = q * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * (pos - lo as f64))
}

fn key_json(key: &Scalar) -> Value {
    match key {
        Scalar::Null => Value::Null,
        Scalar::Bool(b) => json!(b),
        Scalar::Int(v) => json!(v),
        Scalar::Float(v) => json!(v),
        Scalar::Str(s) => json!(s),
        Scalar::Timestamp(ts) => json!(ts.and_utc().timestamp_millis()),
    }
}

fn tuple_json(sources: &[(String, String, bool, bool)], key: &[Scalar]) -> Value {
    let mut map = Map::new();
    for ((name, _, _, _), value) in sources.iter().zip(key.iter()) {
        map.insert(name.clone(), key_json(value));
    }
    Value::Object(map)
}

fn str_param<'v>(body: &'v Value, name: &str) -> Result<&'v str> {
    body.get(name)
        .and_then(Value::as_str)
        .ok_or_else(|| bad_request(&format!("missing parameter '{}'", name)))
}

fn bad_request(message: &str) -> Error {
    Error::Backend {
        status: Some(400),
        message: message.to_string(),
    }
}
