//! Test tables and a local pandas-semantics reference

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use searchframe::schema::{Field, FieldType, TableSchema};
use searchframe::value::Scalar;
use searchframe::{GroupByConfig, SearchFrame};
use serde_json::{json, Map, Value};

use super::engine::{compare_tuples, linear_quantile, to_scalar, Doc, MockEngine};

const CARRIERS: [&str; 4] = ["ES-Air", "JetBeats", "Kibana Airlines", "Logstash Airways"];
const COUNTRIES: [&str; 5] = ["CN", "DE", "IT", "JP", "US"];
/// 2018-01-01T00:00:00Z
const BASE_MILLIS: i64 = 1_514_764_800_000;

pub fn flights_schema() -> TableSchema {
    TableSchema::new(vec![
        Field::new("AvgTicketPrice", FieldType::Float),
        Field::new("Cancelled", FieldType::Boolean),
        Field::new("Carrier", FieldType::Keyword),
        Field::new("DestCountry", FieldType::Keyword),
        Field::new("DistanceKilometers", FieldType::Float),
        Field::new("FlightDelayMin", FieldType::Integer),
        Field::new("FlightNum", FieldType::Text),
        Field::new("dayOfWeek", FieldType::Integer),
        Field::new("timestamp", FieldType::Date),
    ])
    .unwrap()
}

/// Seeded flights-like rows without missing values
pub fn flights_docs(n: usize, seed: u64) -> Vec<Doc> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n)
        .map(|i| {
            let price: f64 = rng.random_range(100.0..1200.0);
            let distance: f64 = rng.random_range(0.0..20000.0);
            let doc = json!({
                "AvgTicketPrice": (price * 100.0).round() / 100.0,
                "Cancelled": rng.random_bool(0.2),
                "Carrier": CARRIERS[rng.random_range(0..CARRIERS.len())],
                "DestCountry": COUNTRIES[rng.random_range(0..COUNTRIES.len())],
                "DistanceKilometers": (distance * 10.0).round() / 10.0,
                "FlightDelayMin": rng.random_range(0..12i64) * 15,
                "FlightNum": format!("FL{:04}", i),
                "dayOfWeek": rng.random_range(0..7i64),
                "timestamp": BASE_MILLIS + rng.random_range(0..30 * 24i64) * 3_600_000
            });
            into_doc(doc)
        })
        .collect()
}

pub fn ecommerce_schema() -> TableSchema {
    TableSchema::new(vec![
        Field::new("customer_gender", FieldType::Keyword),
        Field::new("day_of_week_i", FieldType::Integer),
        Field::new("order_date", FieldType::Date),
        Field::new("paid", FieldType::Boolean),
        Field::new("taxful_total_price", FieldType::Double),
        Field::new("total_quantity", FieldType::Long),
    ])
    .unwrap()
}

/// Small hand-written table with missing values in every column
pub fn ecommerce_docs() -> Vec<Doc> {
    let day = 86_400_000i64;
    vec![
        json!({"customer_gender": "FEMALE", "day_of_week_i": 0, "order_date": BASE_MILLIS, "paid": true, "taxful_total_price": 36.98, "total_quantity": 2}),
        json!({"customer_gender": "MALE", "day_of_week_i": 0, "order_date": BASE_MILLIS + day, "paid": false, "taxful_total_price": 53.96, "total_quantity": 2}),
        json!({"customer_gender": "FEMALE", "day_of_week_i": 1, "order_date": BASE_MILLIS + 2 * day, "paid": true, "taxful_total_price": 199.98, "total_quantity": 4}),
        json!({"customer_gender": null, "day_of_week_i": 1, "order_date": BASE_MILLIS + 3 * day, "paid": true, "taxful_total_price": 40.0, "total_quantity": 1}),
        json!({"customer_gender": "MALE", "day_of_week_i": null, "order_date": BASE_MILLIS + 4 * day, "paid": null, "taxful_total_price": 80.5, "total_quantity": 3}),
        json!({"customer_gender": "FEMALE", "day_of_week_i": 2, "order_date": null, "paid": false, "taxful_total_price": null, "total_quantity": 1}),
        json!({"customer_gender": null, "day_of_week_i": null, "order_date": BASE_MILLIS + 6 * day, "paid": false, "taxful_total_price": 12.5, "total_quantity": 5}),
        json!({"customer_gender": "MALE", "day_of_week_i": 2, "order_date": BASE_MILLIS + 7 * day, "paid": true, "taxful_total_price": 64.0, "total_quantity": 2}),
    ]
    .into_iter()
    .map(into_doc)
    .collect()
}

fn into_doc(value: Value) -> Doc {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

/// Engine and frame over the given rows
pub fn frame_with(schema: TableSchema, docs: Vec<Doc>, config: GroupByConfig) -> (Arc<MockEngine>, SearchFrame) {
    let engine = Arc::new(MockEngine::new(schema.clone(), docs));
    let frame = SearchFrame::new(engine.clone(), "test-index", schema)
        .with_config(config)
        .unwrap();
    (engine, frame)
}

pub fn flights_frame() -> (Arc<MockEngine>, SearchFrame) {
    frame_with(flights_schema(), flights_docs(120, 7), GroupByConfig::default())
}

pub fn ecommerce_frame() -> (Arc<MockEngine>, SearchFrame) {
    frame_with(ecommerce_schema(), ecommerce_docs(), GroupByConfig::default())
}

/// Groups computed locally, in pandas order (ascending keys, nulls last)
pub struct Groups {
    pub keys: Vec<Vec<Scalar>>,
    pub rows: Vec<Vec<usize>>,
}

pub fn group_rows(schema: &TableSchema, docs: &[Doc], by: &[&str], dropna: bool) -> Groups {
    let mut groups: HashMap<Vec<Scalar>, Vec<usize>> = HashMap::new();
    for (i, doc) in docs.iter().enumerate() {
        let key: Vec<Scalar> = by.iter().map(|c| cell(schema, doc, c)).collect();
        if dropna && key.iter().any(Scalar::is_null) {
            continue;
        }
        groups.entry(key).or_default().push(i);
    }

    let nulls_first = vec![false; by.len()];
    let mut keys: Vec<Vec<Scalar>> = groups.keys().cloned().collect();
    keys.sort_by(|a, b| compare_tuples(a, b, &nulls_first));
    let rows = keys.iter().map(|k| groups[k].clone()).collect();
    Groups { keys, rows }
}

pub fn cell(schema: &TableSchema, doc: &Doc, column: &str) -> Scalar {
    let kind = schema.get(column).map(|f| f.kind()).unwrap();
    doc.get(column)
        .map(|raw| to_scalar(raw, kind))
        .unwrap_or(Scalar::Null)
}

/// Non-missing numeric values of `column` over `rows`
pub fn numbers(schema: &TableSchema, docs: &[Doc], rows: &[usize], column: &str) -> Vec<f64> {
    rows.iter()
        .filter_map(|&i| cell(schema, &docs[i], column).as_f64())
        .collect()
}

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Two-pass sample variance (ddof = 1)
pub fn variance(values: &[f64]) -> f64 {
    if values.len() <= 1 {
        return f64::NAN;
    }
    let m = mean(values);
    values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (values.len() - 1) as f64
}

pub fn mean_abs_deviation(values: &[f64]) -> f64 {
    let m = mean(values);
    mean(&values.iter().map(|v| (v - m).abs()).collect::<Vec<_>>())
}

pub fn quantile(values: &[f64], q: f64) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
    linear_quantile(&sorted, q).unwrap_or(f64::NAN)
}

/// Relative comparison with NaN equal to NaN
pub fn assert_close(actual: f64, expected: f64, context: &str) {
    if expected.is_nan() {
        assert!(actual.is_nan(), "{}: expected NaN, got {}", context, actual);
        return;
    }
    let tolerance = 1e-6 * expected.abs().max(1.0);
    assert!(
        (actual - expected).abs() <= tolerance,
        "{}: expected {}, got {}",
        context,
        expected,
        actual
    );
}
