//! Search-backed table handle

pub mod table;

use std::fmt;
use std::sync::Arc;

use crate::config::GroupByConfig;
use crate::error::Result;
use crate::groupby::{By, DataFrameGroupBy};
use crate::schema::{SchemaCache, SchemaProvider, TableSchema};
use crate::transport::Transport;

pub use table::{Column, ResultTable};

/// A table stored in a search index.
///
/// Holds no rows: only the index name, the schema, the transport the
/// aggregations run through and the grouping configuration. Cloning is cheap
/// and a frame may be shared across threads.
#[derive(Clone)]
pub struct SearchFrame {
    index: String,
    schema: Arc<TableSchema>,
    transport: Arc<dyn Transport>,
    config: Arc<GroupByConfig>,
}

impl SearchFrame {
    /// Create a frame over `index` with a known schema
    pub fn new(transport: Arc<dyn Transport>, index: impl Into<String>, schema: TableSchema) -> Self {
        SearchFrame {
            index: index.into(),
            schema: Arc::new(schema),
            transport,
            config: Arc::new(GroupByConfig::default()),
        }
    }

    /// Create a frame whose schema comes from a schema cache
    pub fn from_cache<P: SchemaProvider>(
        transport: Arc<dyn Transport>,
        index: impl Into<String>,
        cache: &SchemaCache<P>,
    ) -> Result<Self> {
        let index = index.into();
        let schema = cache.get(&index)?;
        Ok(SearchFrame {
            index,
            schema,
            transport,
            config: Arc::new(GroupByConfig::default()),
        })
    }

    /// Replace the grouping configuration
    pub fn with_config(mut self, config: GroupByConfig) -> Result<Self> {
        config.validate()?;
        self.config = Arc::new(config);
        Ok(self)
    }

    pub fn index_name(&self) -> &str {
        &self.index
    }

    pub fn schema(&self) -> &TableSchema {
        &self.schema
    }

    pub fn config(&self) -> &GroupByConfig {
        &self.config
    }

    pub fn transport(&self) -> &dyn Transport {
        self.transport.as_ref()
    }

    pub fn columns(&self) -> Vec<&str> {
        self.schema.names()
    }

    /// Keep the listed columns that exist, in the listed order
    /// (pandas `DataFrame.filter(items=...)`)
    pub fn filter(&self, items: &[&str]) -> Result<SearchFrame> {
        let columns: Vec<String> = items
            .iter()
            .filter(|c| self.schema.contains(c))
            .map(|c| c.to_string())
            .collect();
        self.with_schema(self.schema.select(&columns)?)
    }

    /// Keep exactly the listed columns (`df[[...]]`); every unknown column is
    /// reported
    pub fn select(&self, columns: &[&str]) -> Result<SearchFrame> {
        let columns: Vec<String> = columns.iter().map(|c| c.to_string()).collect();
        self.with_schema(self.schema.select(&columns)?)
    }

    /// Group by one or more columns; validation happens when a method of the
    /// returned handle is called
    pub fn groupby(&self, by: impl Into<By>, dropna: bool) -> DataFrameGroupBy<'_> {
        DataFrameGroupBy::new(self, by.into(), dropna)
    }

    fn with_schema(&self, schema: TableSchema) -> Result<SearchFrame> {
        Ok(SearchFrame {
            index: self.index.clone(),
            schema: Arc::new(schema),
            transport: Arc::clone(&self.transport),
            config: Arc::clone(&self.config),
        })
    }
}

impl fmt::Debug for SearchFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SearchFrame")
            .field("index", &self.index)
            .field("columns", &self.schema.names())
            .field("config", &self.config)
            .finish()
    }
}
