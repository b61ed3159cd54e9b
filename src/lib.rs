#![allow(clippy::too_many_arguments)]

//! pandas-compatible `groupby` for tables stored in an OpenSearch-style
//! search engine.
//!
//! Grouping and aggregation never pull rows to the client: a call is compiled
//! to the engine's bucket aggregation DSL, executed through a [`Transport`],
//! and the buckets are reshaped into a [`ResultTable`] with pandas' index
//! structure, column layout, dtypes and null handling.

pub mod config;
pub mod dataframe;
pub mod error;
pub mod groupby;
pub mod index;
pub mod na;
pub mod schema;
pub mod transport;
pub mod value;

// Re-export commonly used types
pub use config::{GroupByConfig, GroupByConfigBuilder, NullOrder};
pub use dataframe::{Column, ResultTable, SearchFrame};
pub use error::{Error, ErrorKind, Result};
pub use groupby::{AggFunc, AggSpec, By, DataFrameGroupBy, GroupByState, NumericOnly, Quantiles};
pub use index::{ColumnLabel, Index, MultiIndex, RowIndex};
pub use na::NA;
pub use schema::{ColumnKind, Field, FieldType, SchemaCache, SchemaProvider, TableSchema, TransportSchemaProvider};
pub use transport::Transport;
pub use value::{Dtype, Scalar};

// Export version info
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
