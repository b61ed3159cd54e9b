mod multi_index;

pub use multi_index::MultiIndex;

use crate::error::{Error, Result};
use crate::value::{Dtype, Scalar};
use std::collections::HashMap;
use std::fmt;

/// Index structure
///
/// Row labels of a result table: group keys typed after the grouping field.
#[derive(Debug, Clone)]
pub struct Index {
    /// Index values
    values: Vec<Scalar>,

    /// Mapping from value to position
    map: HashMap<Scalar, usize>,

    /// Index name (optional)
    name: Option<String>,

    dtype: Dtype,
}

impl Index {
    /// Create a new unnamed index
    pub fn new(values: Vec<Scalar>) -> Result<Self> {
        Self::with_name(values, None)
    }

    /// Create a new named index
    pub fn with_name(values: Vec<Scalar>, name: Option<String>) -> Result<Self> {
        let dtype = Dtype::infer(&values);
        Self::with_dtype(values, name, dtype)
    }

    /// Create a new named index with an explicit dtype; values are coerced
    pub fn with_dtype(values: Vec<Scalar>, name: Option<String>, dtype: Dtype) -> Result<Self> {
        let dtype = dtype.widen(&values);
        let values: Vec<Scalar> = values.into_iter().map(|v| dtype.coerce(v)).collect();
        let mut map = HashMap::with_capacity(values.len());

        // Build the map while checking uniqueness
        for (i, value) in values.iter().enumerate() {
            if map.insert(value.clone(), i).is_some() {
                return Err(Error::Index(format!(
                    "Duplicate index value '{}'",
                    value
                )));
            }
        }

        Ok(Index {
            values,
            map,
            name,
            dtype,
        })
    }

    /// Get the index length
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Check whether the index is empty
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Get the position of a value
    pub fn get_loc(&self, key: &Scalar) -> Option<usize> {
        self.map.get(&self.dtype.coerce(key.clone())).copied()
    }

    /// Get the value at a position
    pub fn get_value(&self, pos: usize) -> Option<&Scalar> {
        self.values.get(pos)
    }

    /// Get all values
    pub fn values(&self) -> &[Scalar] {
        &self.values
    }

    /// Get the index name
    pub fn name(&self) -> Option<&String> {
        self.name.as_ref()
    }

    pub fn dtype(&self) -> Dtype {
        self.dtype
    }
}

impl PartialEq for Index {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.dtype == other.dtype && self.values == other.values
    }
}

/// Row index of a result table
#[derive(Debug, Clone, PartialEq)]
pub enum RowIndex {
    /// Single-level index
    Single(Index),
    /// Multi-level index
    Multi(MultiIndex),
}

impl RowIndex {
    pub fn len(&self) -> usize {
        match self {
            RowIndex::Single(idx) => idx.len(),
            RowIndex::Multi(idx) => idx.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn n_levels(&self) -> usize {
        match self {
            RowIndex::Single(_) => 1,
            RowIndex::Multi(idx) => idx.n_levels(),
        }
    }

    pub fn is_multi(&self) -> bool {
        matches!(self, RowIndex::Multi(_))
    }

    pub fn names(&self) -> Vec<Option<String>> {
        match self {
            RowIndex::Single(idx) => vec![idx.name().cloned()],
            RowIndex::Multi(idx) => idx.names().to_vec(),
        }
    }

    /// The labels of the row at `pos`, one per level
    pub fn get_tuple(&self, pos: usize) -> Option<Vec<Scalar>> {
        match self {
            RowIndex::Single(idx) => idx.get_value(pos).map(|v| vec![v.clone()]),
            RowIndex::Multi(idx) => idx.get_tuple(pos),
        }
    }

    /// All row labels, one tuple per row
    pub fn tuples(&self) -> Vec<Vec<Scalar>> {
        (0..self.len()).filter_map(|i| self.get_tuple(i)).collect()
    }

    /// Dtype of every level
    pub fn dtypes(&self) -> Vec<Dtype> {
        match self {
            RowIndex::Single(idx) => vec![idx.dtype()],
            RowIndex::Multi(idx) => idx.level_dtypes().to_vec(),
        }
    }
}

/// Column label of a result table
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ColumnLabel {
    /// Plain column name
    Flat(String),
    /// `(column, function)` pair when a list of functions was requested
    Pair(String, String),
}

impl ColumnLabel {
    pub fn column(&self) -> &str {
        match self {
            ColumnLabel::Flat(name) | ColumnLabel::Pair(name, _) => name,
        }
    }

    pub fn function(&self) -> Option<&str> {
        match self {
            ColumnLabel::Flat(_) => None,
            ColumnLabel::Pair(_, func) => Some(func),
        }
    }
}

impl From<&str> for ColumnLabel {
    fn from(name: &str) -> Self {
        ColumnLabel::Flat(name.to_string())
    }
}

impl From<(&str, &str)> for ColumnLabel {
    fn from((name, func): (&str, &str)) -> Self {
        ColumnLabel::Pair(name.to_string(), func.to_string())
    }
}

impl fmt::Display for ColumnLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnLabel::Flat(name) => write!(f, "{}", name),
            ColumnLabel::Pair(name, func) => write!(f, "({}, {})", name, func),
        }
    }
}
