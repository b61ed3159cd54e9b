//! GroupBy operations for search-backed tables
//!
//! Provides pandas-compatible GroupBy functionality. Grouping and aggregation
//! run inside the search engine: a call is validated, compiled to one
//! bucketed aggregation request, executed through the frame's transport and
//! reassembled into a [`ResultTable`].

pub mod assemble;
pub mod compiler;
pub mod registry;
pub mod response;
pub mod stats;
pub mod validate;

use std::collections::HashMap;

use serde_json::Value;

use crate::dataframe::table::ResultTable;
use crate::dataframe::SearchFrame;
use crate::error::{Error, ErrorKind, Result};
use crate::value::Scalar;
use compiler::DependentStage;
use response::BucketPage;

pub use assemble::{assemble, ColumnLayout};
pub use compiler::{compile, AggregationRequest, CompiledPlan, CompositeQuery, GroupSpec, NumericOnly};
pub use registry::{resolve, AggFunc, Quantiles};
pub use response::{BucketResult, MetricValue};

/// Grouping columns passed to [`SearchFrame::groupby`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct By(Option<Vec<String>>);

impl By {
    /// No grouping column (rejected when a method is called)
    pub fn none() -> Self {
        By(None)
    }

    pub fn columns(&self) -> Option<&[String]> {
        self.0.as_deref()
    }
}

impl From<&str> for By {
    fn from(column: &str) -> Self {
        By(Some(vec![column.to_string()]))
    }
}

impl From<String> for By {
    fn from(column: String) -> Self {
        By(Some(vec![column]))
    }
}

impl From<Vec<String>> for By {
    fn from(columns: Vec<String>) -> Self {
        By(Some(columns))
    }
}

impl From<Vec<&str>> for By {
    fn from(columns: Vec<&str>) -> Self {
        By(Some(columns.into_iter().map(String::from).collect()))
    }
}

impl From<&[&str]> for By {
    fn from(columns: &[&str]) -> Self {
        By(Some(columns.iter().map(|c| c.to_string()).collect()))
    }
}

impl<const N: usize> From<[&str; N]> for By {
    fn from(columns: [&str; N]) -> Self {
        By(Some(columns.iter().map(|c| c.to_string()).collect()))
    }
}

impl<T: Into<By>> From<Option<T>> for By {
    fn from(by: Option<T>) -> Self {
        by.map(Into::into).unwrap_or_default()
    }
}

/// Functions passed to `aggregate`: one name (flat columns) or a list of
/// names (`(column, function)` columns)
#[derive(Debug, Clone, PartialEq)]
pub enum AggSpec {
    Single(String),
    List(Vec<String>),
}

impl From<&str> for AggSpec {
    fn from(name: &str) -> Self {
        AggSpec::Single(name.to_string())
    }
}

impl From<String> for AggSpec {
    fn from(name: String) -> Self {
        AggSpec::Single(name)
    }
}

impl From<Vec<&str>> for AggSpec {
    fn from(names: Vec<&str>) -> Self {
        AggSpec::List(names.into_iter().map(String::from).collect())
    }
}

impl From<Vec<String>> for AggSpec {
    fn from(names: Vec<String>) -> Self {
        AggSpec::List(names)
    }
}

impl From<&[&str]> for AggSpec {
    fn from(names: &[&str]) -> Self {
        AggSpec::List(names.iter().map(|n| n.to_string()).collect())
    }
}

impl<const N: usize> From<[&str; N]> for AggSpec {
    fn from(names: [&str; N]) -> Self {
        AggSpec::List(names.iter().map(|n| n.to_string()).collect())
    }
}

/// Lifecycle of one grouping call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupByState {
    Uninitialized,
    Validated,
    Compiled,
    Executed,
    Assembled,
    Failed(ErrorKind),
}

/// What a method call asks for, before resolution
#[derive(Debug, Clone)]
enum Request {
    Named(AggSpec),
    Func(AggFunc),
}

/// GroupBy object returned by [`SearchFrame::groupby`]
///
/// Construction is lazy: nothing is validated until a method is called, and
/// every call runs its own validation, compilation and query.
#[derive(Debug, Clone)]
pub struct DataFrameGroupBy<'a> {
    frame: &'a SearchFrame,
    by: By,
    dropna: bool,
    selection: Option<Vec<String>>,
}

impl<'a> DataFrameGroupBy<'a> {
    pub(crate) fn new(frame: &'a SearchFrame, by: By, dropna: bool) -> Self {
        DataFrameGroupBy {
            frame,
            by,
            dropna,
            selection: None,
        }
    }

    /// Grouping columns as given
    pub fn by(&self) -> Option<&[String]> {
        self.by.columns()
    }

    pub fn dropna(&self) -> bool {
        self.dropna
    }

    /// Restrict aggregation to a subset of columns (`df.groupby(by)[cols]`).
    /// Unknown columns are reported when a method is called.
    pub fn select<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.selection = Some(columns.into_iter().map(Into::into).collect());
        self
    }

    /// Aggregate with one function name or a list of names
    pub fn aggregate(
        &self,
        funcs: impl Into<AggSpec>,
        numeric_only: impl Into<NumericOnly>,
    ) -> Result<ResultTable> {
        self.run(Request::Named(funcs.into()), numeric_only.into())
    }

    /// Alias of [`DataFrameGroupBy::aggregate`]
    pub fn agg(&self, funcs: impl Into<AggSpec>, numeric_only: impl Into<NumericOnly>) -> Result<ResultTable> {
        self.aggregate(funcs, numeric_only)
    }

    pub fn min(&self, numeric_only: impl Into<NumericOnly>) -> Result<ResultTable> {
        self.run(Request::Func(AggFunc::Min), numeric_only.into())
    }

    pub fn max(&self, numeric_only: impl Into<NumericOnly>) -> Result<ResultTable> {
        self.run(Request::Func(AggFunc::Max), numeric_only.into())
    }

    pub fn mean(&self, numeric_only: impl Into<NumericOnly>) -> Result<ResultTable> {
        self.run(Request::Func(AggFunc::Mean), numeric_only.into())
    }

    pub fn sum(&self, numeric_only: impl Into<NumericOnly>) -> Result<ResultTable> {
        self.run(Request::Func(AggFunc::Sum), numeric_only.into())
    }

    /// Non-null values per group (int64)
    pub fn count(&self, numeric_only: impl Into<NumericOnly>) -> Result<ResultTable> {
        self.run(Request::Func(AggFunc::Count), numeric_only.into())
    }

    /// Distinct values per group (int64, approximate above the configured
    /// precision threshold)
    pub fn nunique(&self, numeric_only: impl Into<NumericOnly>) -> Result<ResultTable> {
        self.run(Request::Func(AggFunc::Nunique), numeric_only.into())
    }

    pub fn median(&self, numeric_only: impl Into<NumericOnly>) -> Result<ResultTable> {
        self.run(Request::Func(AggFunc::Median), numeric_only.into())
    }

    /// Sample variance (ddof = 1)
    pub fn var(&self, numeric_only: impl Into<NumericOnly>) -> Result<ResultTable> {
        self.run(Request::Func(AggFunc::Var), numeric_only.into())
    }

    /// Sample standard deviation (ddof = 1)
    pub fn std(&self, numeric_only: impl Into<NumericOnly>) -> Result<ResultTable> {
        self.run(Request::Func(AggFunc::Std), numeric_only.into())
    }

    /// Mean absolute deviation; runs a second, dependent query
    pub fn mad(&self, numeric_only: impl Into<NumericOnly>) -> Result<ResultTable> {
        self.run(Request::Func(AggFunc::Mad), numeric_only.into())
    }

    /// Quantiles of numeric columns.
    ///
    /// A scalar fraction gives one column per target; a list adds an inner,
    /// unnamed index level holding the fraction.
    pub fn quantile(&self, q: impl Into<Quantiles>) -> Result<ResultTable> {
        self.quantile_with(q, true)
    }

    pub fn quantile_with(
        &self,
        q: impl Into<Quantiles>,
        numeric_only: impl Into<NumericOnly>,
    ) -> Result<ResultTable> {
        self.run(Request::Func(AggFunc::Quantile(q.into())), numeric_only.into())
    }

    /// Always fails: `mode` has no engine realization
    pub fn mode(&self) -> Result<ResultTable> {
        self.run(Request::Named(AggSpec::Single("mode".into())), NumericOnly::Tolerant)
    }

    /// Compiled request body of an aggregation, without executing it.
    /// For `mad` this is the first of the two queries.
    pub fn query(&self, funcs: impl Into<AggSpec>, numeric_only: impl Into<NumericOnly>) -> Result<Value> {
        let (funcs, _) = resolve_request(Request::Named(funcs.into()))?;
        let plan = self.compile(&funcs, numeric_only.into())?;
        Ok(plan.first.body(None))
    }

    fn run(&self, request: Request, numeric_only: NumericOnly) -> Result<ResultTable> {
        Execution::new(self).run(request, numeric_only)
    }

    fn compile(&self, funcs: &[AggFunc], numeric_only: NumericOnly) -> Result<CompiledPlan> {
        let schema = self.frame.schema();
        let group = validate::validate_by(self.by.columns(), schema, self.dropna)?;
        let targets = validate::validate_targets(self.selection.as_deref(), schema, &group)?;
        let request = AggregationRequest::uniform(targets, funcs);
        compile(&group, &request, numeric_only, self.frame.config())
    }
}

fn resolve_request(request: Request) -> Result<(Vec<AggFunc>, ColumnLayout)> {
    match request {
        Request::Func(func) => Ok((vec![func], ColumnLayout::Flat)),
        Request::Named(AggSpec::Single(name)) => Ok((vec![resolve(&name)?], ColumnLayout::Flat)),
        Request::Named(AggSpec::List(names)) => {
            if names.is_empty() {
                return Err(Error::InvalidInput("No aggregation functions requested".into()));
            }
            let mut funcs: Vec<AggFunc> = Vec::with_capacity(names.len());
            for name in &names {
                let func = resolve(name)?;
                if funcs.contains(&func) {
                    return Err(Error::InvalidInput(format!(
                        "Function names must be unique, found duplicate '{}'",
                        name
                    )));
                }
                funcs.push(func);
            }
            Ok((funcs, ColumnLayout::Nested))
        }
    }
}

/// One method call driven through [`GroupByState`]
struct Execution<'g, 'a> {
    groupby: &'g DataFrameGroupBy<'a>,
    state: GroupByState,
    #[cfg(test)]
    history: Vec<GroupByState>,
}

impl<'g, 'a> Execution<'g, 'a> {
    fn new(groupby: &'g DataFrameGroupBy<'a>) -> Self {
        Execution {
            groupby,
            state: GroupByState::Uninitialized,
            #[cfg(test)]
            history: vec![GroupByState::Uninitialized],
        }
    }

    fn transition(&mut self, next: GroupByState) {
        log::debug!("groupby on '{}': {:?} -> {:?}", self.groupby.frame.index_name(), self.state, next);
        self.state = next;
        #[cfg(test)]
        self.history.push(next);
    }

    fn run(&mut self, request: Request, numeric_only: NumericOnly) -> Result<ResultTable> {
        let result = self.drive(request, numeric_only);
        if let Err(err) = &result {
            self.transition(GroupByState::Failed(err.kind()));
        }
        result
    }

    fn drive(&mut self, request: Request, numeric_only: NumericOnly) -> Result<ResultTable> {
        let (funcs, layout) = resolve_request(request)?;
        let frame = self.groupby.frame;
        let schema = frame.schema();

        let group = validate::validate_by(self.groupby.by.columns(), schema, self.groupby.dropna)?;
        let targets = validate::validate_targets(self.groupby.selection.as_deref(), schema, &group)?;
        self.transition(GroupByState::Validated);

        let request = AggregationRequest::uniform(targets, &funcs);
        let mut plan = compile(&group, &request, numeric_only, frame.config())?;
        self.transition(GroupByState::Compiled);

        let (mut buckets, other_docs) = self.fetch_buckets(&plan.first)?;
        if other_docs > 0 {
            log::warn!(
                "terms aggregation on '{}' left {} documents in other buckets, retrying as composite",
                frame.index_name(),
                other_docs
            );
            plan = compiler::force_composite(&plan, frame.config());
            buckets = self.fetch_buckets(&plan.first)?.0;
        }

        if let Some(stage) = &plan.dependent {
            if !buckets.is_empty() {
                log::info!(
                    "running dependent {:?} pass over {} groups",
                    stage.stat,
                    buckets.len()
                );
                let dependent = self.fetch_dependent(stage, &plan.first, &buckets)?;
                merge_metrics(&mut buckets, dependent);
            }
        }
        self.transition(GroupByState::Executed);

        let table = assemble(&plan.first, &buckets, layout)?;
        self.transition(GroupByState::Assembled);
        Ok(table)
    }

    /// Every bucket of `query` and, for terms, the documents left out of the
    /// returned buckets. Composite pages are fetched one after another.
    fn fetch_buckets(&self, query: &CompositeQuery) -> Result<(Vec<BucketResult>, u64)> {
        let frame = self.groupby.frame;
        let config = frame.config();
        let mut buckets = Vec::new();
        let mut after: Option<Value> = None;
        let mut pages = 0usize;

        loop {
            let page = self.fetch_page(query, after.as_ref())?;
            pages += 1;

            if !query.is_composite() {
                return Ok((page.buckets, page.sum_other_doc_count));
            }

            let last_page = page.buckets.len() < config.composite_page_size;
            buckets.extend(page.buckets);
            match page.after_key {
                Some(next) if !last_page => {
                    if after.as_ref() == Some(&next) {
                        return Err(Error::Consistency(
                            "composite aggregation cursor did not advance".into(),
                        ));
                    }
                    if config.max_pages.is_some_and(|max| pages >= max) {
                        return Err(Error::Consistency(format!(
                            "composite aggregation needs more than {} pages",
                            pages
                        )));
                    }
                    after = Some(next);
                }
                _ => break,
            }
        }

        log::info!(
            "fetched {} buckets from '{}' in {} composite pages",
            buckets.len(),
            frame.index_name(),
            pages
        );
        Ok((buckets, 0))
    }

    /// Run the dependent pass page by page. Both passes order their buckets
    /// the same way, so page `n` of the second pass covers the `n`-th slice
    /// of first-pass buckets and only carries their means.
    fn fetch_dependent(
        &self,
        stage: &DependentStage,
        first: &CompositeQuery,
        buckets: &[BucketResult],
    ) -> Result<Vec<BucketResult>> {
        let config = self.groupby.frame.config();
        let page_size = stage.page_size(first, config).unwrap_or(buckets.len()).max(1);
        let mut results = Vec::with_capacity(buckets.len());
        let mut after: Option<Value> = None;

        for chunk in buckets.chunks(page_size) {
            let query = stage.bind(first, chunk, config)?;
            let page = self.fetch_page(&query, after.as_ref())?;
            let aligned = page.buckets.len() == chunk.len()
                && page.buckets.iter().zip(chunk).all(|(a, b)| a.key == b.key);
            if !aligned {
                return Err(Error::Consistency(
                    "groups changed between the two passes of a dependent aggregation".into(),
                ));
            }
            results.extend(page.buckets);
            after = page.after_key;
        }
        Ok(results)
    }

    fn fetch_page(&self, query: &CompositeQuery, after: Option<&Value>) -> Result<BucketPage> {
        let frame = self.groupby.frame;
        let body = query.body(after);
        log::debug!("search request on '{}': {}", frame.index_name(), body);
        let response = frame.transport().search(frame.index_name(), &body)?;
        response::parse_page(query, &response)
    }
}

/// Attach the metrics of the dependent pass to the first-pass buckets
fn merge_metrics(buckets: &mut [BucketResult], dependent: Vec<BucketResult>) {
    let positions: HashMap<Vec<Scalar>, usize> = buckets
        .iter()
        .enumerate()
        .map(|(i, b)| (b.key.clone(), i))
        .collect();
    for bucket in dependent {
        if let Some(&i) = positions.get(&bucket.key) {
            buckets[i].metrics.extend(bucket.metrics);
        }
    }
}
