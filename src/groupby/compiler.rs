//! Query compiler
//!
//! Turns a validated grouping and a set of (column, function) requests into
//! one composite request: a bucket aggregation over the grouping columns plus
//! uniquely keyed metric sub-aggregations. Compilation performs no I/O.

use std::collections::HashMap;

use serde_json::{json, Map, Value};

use crate::config::{GroupByConfig, NullOrder};
use crate::error::{Error, Result};
use crate::groupby::registry::{AggFunc, DependentStat, DerivedStat, NativeAgg, Quantiles, Realization};
use crate::groupby::response::BucketResult;
use crate::schema::{ColumnKind, Field};
use crate::value::{script_key, Dtype};

/// Name of the bucket aggregation in requests and responses
pub const BUCKETS_AGG: &str = "groupby_buckets";
/// Name of the sibling `missing` aggregation holding the null-key bucket
pub const MISSING_AGG: &str = "groupby_missing";

/// Painless source of the dependent `mad` pass: the absolute deviation of a
/// document's value from the mean of its group, looked up by group key.
///
/// The key encoding is the one of [`crate::value::script_key`].
pub const ABS_DEVIATION_SCRIPT: &str = "String key = ''; \
for (int i = 0; i < params.by.size(); ++i) { \
def f = params.by.get(i); \
if (doc[f].size() == 0) { key += 'n;'; } \
else { def v = doc[f].value; \
if (v instanceof Boolean) { key += v ? 'b1;' : 'b0;'; } \
else if (v instanceof TemporalAccessor) { key += 't' + v.toInstant().toEpochMilli() + ';'; } \
else if (v instanceof Double || v instanceof Float) { key += 'f' + Double.doubleToLongBits(((Number) v).doubleValue()) + ';'; } \
else if (v instanceof Number) { key += 'i' + ((Number) v).longValue() + ';'; } \
else { String s = String.valueOf(v); key += 's' + s.length() + ':' + s; } } } \
if (doc[params.field].size() == 0) { return 0; } \
def mean = params.means.get(key); \
if (mean == null) { return 0; } \
def x = doc[params.field].value; \
if (x instanceof Boolean) { x = x ? 1 : 0; } \
return Math.abs(x - mean);";

/// Bucket script dividing the two named pipeline inputs of the `mad` pass
pub const MAD_BUCKET_SCRIPT: &str =
    "params.n > 0 ? params.abs_dev_sum / params.n : Double.NaN";

/// How non-numeric columns are treated (pandas' `numeric_only`)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumericOnly {
    /// `numeric_only=True`: non-numeric columns are dropped
    Numeric,
    /// `numeric_only=None`: every column is kept, impossible cells are null
    Tolerant,
    /// `numeric_only=False`: every column is kept, impossible cells are an error
    Strict,
}

impl From<bool> for NumericOnly {
    fn from(numeric_only: bool) -> Self {
        if numeric_only {
            NumericOnly::Numeric
        } else {
            NumericOnly::Strict
        }
    }
}

impl From<Option<bool>> for NumericOnly {
    fn from(numeric_only: Option<bool>) -> Self {
        match numeric_only {
            Some(flag) => flag.into(),
            None => NumericOnly::Tolerant,
        }
    }
}

/// Validated grouping columns
#[derive(Debug, Clone, PartialEq)]
pub struct GroupSpec {
    pub fields: Vec<Field>,
    pub dropna: bool,
}

impl GroupSpec {
    pub fn names(&self) -> Vec<String> {
        self.fields.iter().map(|f| f.name.clone()).collect()
    }

    fn agg_fields(&self) -> Vec<String> {
        self.fields
            .iter()
            .map(|f| f.agg_field.clone().unwrap_or_else(|| f.name.clone()))
            .collect()
    }
}

/// Requested functions per target column, in column order
#[derive(Debug, Clone, Default)]
pub struct AggregationRequest {
    pub targets: Vec<(Field, Vec<AggFunc>)>,
}

impl AggregationRequest {
    /// The same functions for every column
    pub fn uniform(fields: Vec<Field>, funcs: &[AggFunc]) -> Self {
        AggregationRequest {
            targets: fields.into_iter().map(|f| (f, funcs.to_vec())).collect(),
        }
    }
}

/// Bucket aggregation over the grouping columns
#[derive(Debug, Clone, PartialEq)]
pub enum BucketAggregation {
    /// One grouping column; the null bucket is a sibling `missing` aggregation
    Terms {
        field: String,
        size: usize,
        include_missing: bool,
        null_order: NullOrder,
    },
    /// Several grouping columns, paginated by after-key
    Composite {
        sources: Vec<CompositeSource>,
        size: usize,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompositeSource {
    pub name: String,
    pub field: String,
    pub missing_bucket: bool,
    pub missing_order: NullOrder,
}

/// Response shape of a metric sub-aggregation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    Value,
    Percentiles,
    ExtendedStats,
}

/// Where the cells of one output column come from
#[derive(Debug, Clone, PartialEq)]
pub enum ValueSource {
    /// The function cannot apply to the column; every cell is null
    Null,
    /// `value` of a single-value metric
    Value { key: String },
    /// One percentile of a percentiles metric
    Percentile { key: String, percent: f64 },
    /// Every percentile of a percentiles metric, one row per percent
    Percentiles { key: String, percents: Vec<f64> },
    /// Statistic derived from an extended_stats metric
    Derived { key: String, stat: DerivedStat },
    /// `value` produced by the dependent pass
    Dependent { key: String },
}

/// One output column of the result table
#[derive(Debug, Clone, PartialEq)]
pub struct OutputColumn {
    pub column: String,
    pub func: AggFunc,
    pub dtype: Dtype,
    pub source: ValueSource,
}

/// A compiled request for one round trip (or one paginated traversal)
#[derive(Debug, Clone)]
pub struct CompositeQuery {
    pub group: GroupSpec,
    pub bucket: BucketAggregation,
    /// Metric sub-aggregations in insertion order
    pub metrics: Vec<(String, Value)>,
    pub metric_kinds: HashMap<String, MetricKind>,
    pub outputs: Vec<OutputColumn>,
    /// Quantile fractions fanned out as an extra index level
    pub quantile_levels: Option<Vec<f64>>,
}

impl CompositeQuery {
    pub fn is_composite(&self) -> bool {
        matches!(self.bucket, BucketAggregation::Composite { .. })
    }

    fn add_metric(&mut self, key: &str, kind: MetricKind, body: Value) {
        if !self.metric_kinds.contains_key(key) {
            self.metric_kinds.insert(key.to_string(), kind);
            self.metrics.push((key.to_string(), body));
        }
    }

    fn metrics_body(&self) -> Option<Value> {
        if self.metrics.is_empty() {
            return None;
        }
        let mut aggs = Map::new();
        for (key, body) in &self.metrics {
            aggs.insert(key.clone(), body.clone());
        }
        Some(Value::Object(aggs))
    }

    /// Request body; `after` is the cursor of the previous composite page
    pub fn body(&self, after: Option<&Value>) -> Value {
        let metrics = self.metrics_body();
        let mut aggs = Map::new();

        match &self.bucket {
            BucketAggregation::Terms {
                field,
                size,
                include_missing,
                ..
            } => {
                let mut terms = json!({
                    "terms": {
                        "field": field,
                        "size": size,
                        "order": {"_key": "asc"}
                    }
                });
                if let Some(metrics) = &metrics {
                    terms["aggs"] = metrics.clone();
                }
                aggs.insert(BUCKETS_AGG.to_string(), terms);

                if *include_missing {
                    let mut missing = json!({"missing": {"field": field}});
                    if let Some(metrics) = &metrics {
                        missing["aggs"] = metrics.clone();
                    }
                    aggs.insert(MISSING_AGG.to_string(), missing);
                }
            }
            BucketAggregation::Composite { sources, size } => {
                let sources: Vec<Value> = sources
                    .iter()
                    .map(|source| {
                        let mut terms = json!({
                            "field": source.field,
                            "order": "asc"
                        });
                        if source.missing_bucket {
                            terms["missing_bucket"] = Value::Bool(true);
                            terms["missing_order"] = json!(source.missing_order.as_str());
                        }
                        let mut named = Map::new();
                        named.insert(source.name.clone(), json!({ "terms": terms }));
                        Value::Object(named)
                    })
                    .collect();

                let mut composite = json!({"size": size, "sources": sources});
                if let Some(after) = after {
                    composite["after"] = after.clone();
                }
                let mut bucket = json!({ "composite": composite });
                if let Some(metrics) = metrics {
                    bucket["aggs"] = metrics;
                }
                aggs.insert(BUCKETS_AGG.to_string(), bucket);
            }
        }

        json!({
            "size": 0,
            "track_total_hits": false,
            "aggs": Value::Object(aggs)
        })
    }

    /// Same grouping and buckets, no metrics
    fn skeleton(&self) -> CompositeQuery {
        CompositeQuery {
            group: self.group.clone(),
            bucket: self.bucket.clone(),
            metrics: Vec::new(),
            metric_kinds: HashMap::new(),
            outputs: Vec::new(),
            quantile_levels: None,
        }
    }
}

/// One `mad` target awaiting its dependent pass
#[derive(Debug, Clone, PartialEq)]
pub struct MadTarget {
    pub field: String,
    /// Key of the first-pass per-group mean
    pub mean_key: String,
    pub abs_sum_key: String,
    pub count_key: String,
    /// Key of the bucket_script output read by the assembler
    pub output_key: String,
}

/// Second query of a mean-absolute-deviation request.
///
/// It cannot be compiled until the first pass has produced per-group means;
/// [`DependentStage::bind`] does that.
#[derive(Debug, Clone, PartialEq)]
pub struct DependentStage {
    pub stat: DependentStat,
    pub targets: Vec<MadTarget>,
}

impl DependentStage {
    /// Number of first-pass buckets one dependent request covers; `None`
    /// when the dependent pass is a single terms request.
    pub fn page_size(&self, first: &CompositeQuery, config: &GroupByConfig) -> Option<usize> {
        match dependent_bucket(first, config) {
            BucketAggregation::Composite { .. } => Some(config.composite_page_size),
            BucketAggregation::Terms { .. } => None,
        }
    }

    /// Compile one request of the second pass from the first query and the
    /// first-pass buckets that request covers.
    ///
    /// Only the means of `buckets` are sent, so a paginated second pass binds
    /// each page with the matching slice of first-pass buckets. A
    /// `bucket_script` needs a multi-bucket parent, so a terms query with a
    /// sibling `missing` bucket is rebound as a composite one.
    pub fn bind(
        &self,
        first: &CompositeQuery,
        buckets: &[BucketResult],
        config: &GroupByConfig,
    ) -> Result<CompositeQuery> {
        let mut query = first.skeleton();
        query.bucket = dependent_bucket(first, config);
        let by = first.group.agg_fields();

        for target in &self.targets {
            let mut means = Map::new();
            for bucket in buckets {
                if let Some(mean) = bucket.value(&target.mean_key) {
                    means.insert(script_key(&bucket.key), json!(mean));
                }
            }

            query.add_metric(
                &target.abs_sum_key,
                MetricKind::Value,
                json!({
                    "sum": {
                        "script": {
                            "lang": "painless",
                            "source": ABS_DEVIATION_SCRIPT,
                            "params": {
                                "by": by,
                                "field": target.field,
                                "means": Value::Object(means)
                            }
                        }
                    }
                }),
            );
            query.add_metric(
                &target.count_key,
                MetricKind::Value,
                json!({"value_count": {"field": target.field}}),
            );
            query.add_metric(
                &target.output_key,
                MetricKind::Value,
                json!({
                    "bucket_script": {
                        "buckets_path": {
                            "abs_dev_sum": target.abs_sum_key,
                            "n": target.count_key
                        },
                        "script": MAD_BUCKET_SCRIPT
                    }
                }),
            );
        }

        Ok(query)
    }
}

/// Output of compilation: the first query and, for `mad`, the dependent stage
#[derive(Debug, Clone)]
pub struct CompiledPlan {
    pub first: CompositeQuery,
    pub dependent: Option<DependentStage>,
}

/// Compile a grouping request
pub fn compile(
    group: &GroupSpec,
    request: &AggregationRequest,
    numeric_only: NumericOnly,
    config: &GroupByConfig,
) -> Result<CompiledPlan> {
    if group.fields.is_empty() {
        return Err(Error::MissingParameter("by".into()));
    }

    let quantile_levels = quantile_levels(request)?;
    let mut query = CompositeQuery {
        group: group.clone(),
        bucket: bucket_aggregation(group, config, false),
        metrics: Vec::new(),
        metric_kinds: HashMap::new(),
        outputs: Vec::new(),
        quantile_levels,
    };
    let mut mad_targets = Vec::new();

    let targets = request.targets.iter().filter(|(field, _)| match numeric_only {
        NumericOnly::Numeric => field.kind().is_numeric(),
        NumericOnly::Tolerant | NumericOnly::Strict => true,
    });

    for (ordinal, (field, funcs)) in targets.enumerate() {
        let kind = field.kind();
        let mut percentile_keys: Vec<(Vec<f64>, String)> = Vec::new();

        for func in funcs {
            let source = if !func.accepts(kind) {
                if numeric_only == NumericOnly::Strict {
                    return Err(Error::IncompatibleType {
                        column: field.name.clone(),
                        function: func.name().to_string(),
                        field_type: field.field_type.to_string(),
                    });
                }
                ValueSource::Null
            } else {
                let agg_field = field
                    .agg_field
                    .clone()
                    .unwrap_or_else(|| field.name.clone());
                compile_function(
                    &mut query,
                    &mut percentile_keys,
                    &mut mad_targets,
                    func,
                    ordinal,
                    &agg_field,
                    config,
                )
            };

            query.outputs.push(OutputColumn {
                column: field.name.clone(),
                func: func.clone(),
                dtype: func.output_dtype(kind),
                source,
            });
        }
    }

    let dependent = if mad_targets.is_empty() {
        None
    } else {
        Some(DependentStage {
            stat: DependentStat::MeanAbsoluteDeviation,
            targets: mad_targets,
        })
    };

    Ok(CompiledPlan {
        first: query,
        dependent,
    })
}

/// Recompile with composite buckets, used when a terms response was truncated
pub fn force_composite(plan: &CompiledPlan, config: &GroupByConfig) -> CompiledPlan {
    let mut first = plan.first.clone();
    first.bucket = bucket_aggregation(&first.group, config, true);
    CompiledPlan {
        first,
        dependent: plan.dependent.clone(),
    }
}

fn dependent_bucket(first: &CompositeQuery, config: &GroupByConfig) -> BucketAggregation {
    match first.bucket {
        BucketAggregation::Terms {
            include_missing: true,
            ..
        } => bucket_aggregation(&first.group, config, true),
        _ => first.bucket.clone(),
    }
}

fn bucket_aggregation(group: &GroupSpec, config: &GroupByConfig, composite: bool) -> BucketAggregation {
    let fields = group.agg_fields();
    if fields.len() == 1 && !composite && !config.always_composite {
        return BucketAggregation::Terms {
            field: fields[0].clone(),
            size: config.terms_size,
            include_missing: !group.dropna,
            null_order: config.null_order,
        };
    }

    BucketAggregation::Composite {
        sources: group
            .fields
            .iter()
            .zip(fields)
            .map(|(f, agg_field)| CompositeSource {
                name: f.name.clone(),
                field: agg_field,
                missing_bucket: !group.dropna,
                missing_order: config.null_order,
            })
            .collect(),
        size: config.composite_page_size,
    }
}

fn quantile_levels(request: &AggregationRequest) -> Result<Option<Vec<f64>>> {
    let mut levels: Option<Vec<f64>> = None;
    for (_, funcs) in &request.targets {
        for func in funcs {
            if let AggFunc::Quantile(q) = func {
                q.validate()?;
                if let Quantiles::List(fractions) = q {
                    if funcs.len() > 1 {
                        return Err(Error::InvalidInput(
                            "a list of quantiles cannot be combined with other functions".into(),
                        ));
                    }
                    match &levels {
                        Some(existing) if existing != fractions => {
                            return Err(Error::InvalidInput(
                                "every column must request the same quantiles".into(),
                            ))
                        }
                        _ => levels = Some(fractions.clone()),
                    }
                }
            }
        }
    }
    Ok(levels)
}

fn compile_function(
    query: &mut CompositeQuery,
    percentile_keys: &mut Vec<(Vec<f64>, String)>,
    mad_targets: &mut Vec<MadTarget>,
    func: &AggFunc,
    ordinal: usize,
    agg_field: &str,
    config: &GroupByConfig,
) -> ValueSource {
    match func.realization() {
        Realization::Native(NativeAgg::Percentiles(percents)) => {
            let key = match percentile_keys.iter().find(|(p, _)| *p == percents) {
                Some((_, key)) => key.clone(),
                None => {
                    let key = format!("percentiles_{}_{}", ordinal, percentile_keys.len());
                    let mut body = json!({
                        "field": agg_field,
                        "percents": percents,
                        "keyed": false
                    });
                    if let Some(compression) = config.percentiles_compression {
                        body["tdigest"] = json!({ "compression": compression });
                    }
                    query.add_metric(&key, MetricKind::Percentiles, json!({ "percentiles": body }));
                    percentile_keys.push((percents.clone(), key.clone()));
                    key
                }
            };
            match func {
                AggFunc::Quantile(Quantiles::List(_)) => ValueSource::Percentiles { key, percents },
                _ => ValueSource::Percentile {
                    key,
                    percent: percents[0],
                },
            }
        }
        Realization::Native(native) => {
            let key = format!("{}_{}", native.op(), ordinal);
            let mut body = json!({ "field": agg_field });
            if native == NativeAgg::Cardinality {
                if let Some(threshold) = config.cardinality_precision_threshold {
                    body["precision_threshold"] = json!(threshold);
                }
            }
            let mut agg = Map::new();
            agg.insert(native.op().to_string(), body);
            query.add_metric(&key, MetricKind::Value, Value::Object(agg));
            ValueSource::Value { key }
        }
        Realization::Derived(stat) => {
            let key = format!("extended_stats_{}", ordinal);
            query.add_metric(
                &key,
                MetricKind::ExtendedStats,
                json!({"extended_stats": {"field": agg_field}}),
            );
            ValueSource::Derived { key, stat }
        }
        Realization::Dependent(DependentStat::MeanAbsoluteDeviation) => {
            let mean_key = format!("avg_{}", ordinal);
            query.add_metric(
                &mean_key,
                MetricKind::Value,
                json!({"avg": {"field": agg_field}}),
            );
            let output_key = format!("mad_{}", ordinal);
            if !mad_targets.iter().any(|t| t.output_key == output_key) {
                mad_targets.push(MadTarget {
                    field: agg_field.to_string(),
                    mean_key,
                    abs_sum_key: format!("mad_abs_sum_{}", ordinal),
                    count_key: format!("mad_count_{}", ordinal),
                    output_key: output_key.clone(),
                });
            }
            ValueSource::Dependent { key: output_key }
        }
    }
}
