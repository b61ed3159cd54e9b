//! Result tables of grouping calls.

use std::fmt;

use chrono::NaiveDateTime;

use crate::error::{Error, Result};
use crate::index::{ColumnLabel, RowIndex};
use crate::na::NA;
use crate::value::{Dtype, Scalar};

/// Typed cells of one result column
#[derive(Debug, Clone, PartialEq)]
pub enum Column {
    Int64(Vec<i64>),
    /// Missing cells are NaN
    Float64(Vec<f64>),
    Bool(Vec<bool>),
    Datetime(Vec<NA<NaiveDateTime>>),
    /// Strings, or booleans mixed with missing cells
    Object(Vec<Scalar>),
}

impl Column {
    /// Build a column from cells, widening `preferred` when a cell is null
    /// (integers to float64, booleans to object).
    pub fn from_cells(cells: Vec<Scalar>, preferred: Dtype) -> Column {
        let dtype = preferred.widen(&cells);
        let cells = cells.into_iter().map(|c| dtype.coerce(c));
        match dtype {
            Dtype::Int64 => Column::Int64(cells.map(|c| c.as_i64().unwrap_or_default()).collect()),
            Dtype::Float64 => Column::Float64(cells.map(|c| c.as_f64().unwrap_or(f64::NAN)).collect()),
            Dtype::Bool => Column::Bool(
                cells
                    .map(|c| matches!(c, Scalar::Bool(true)))
                    .collect(),
            ),
            Dtype::Datetime => Column::Datetime(
                cells
                    .map(|c| match c {
                        Scalar::Timestamp(ts) => Some(ts),
                        _ => None,
                    })
                    .map(NA::from)
                    .collect(),
            ),
            Dtype::Object => Column::Object(cells.collect()),
        }
    }

    pub fn dtype(&self) -> Dtype {
        match self {
            Column::Int64(_) => Dtype::Int64,
            Column::Float64(_) => Dtype::Float64,
            Column::Bool(_) => Dtype::Bool,
            Column::Datetime(_) => Dtype::Datetime,
            Column::Object(_) => Dtype::Object,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Column::Int64(v) => v.len(),
            Column::Float64(v) => v.len(),
            Column::Bool(v) => v.len(),
            Column::Datetime(v) => v.len(),
            Column::Object(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cell at `row`
    pub fn get(&self, row: usize) -> Option<Scalar> {
        let cell = match self {
            Column::Int64(v) => Scalar::Int(*v.get(row)?),
            Column::Float64(v) => Scalar::Float(*v.get(row)?),
            Column::Bool(v) => Scalar::Bool(*v.get(row)?),
            Column::Datetime(v) => {
                Option::<NaiveDateTime>::from(*v.get(row)?).map_or(Scalar::Null, Scalar::Timestamp)
            }
            Column::Object(v) => v.get(row)?.clone(),
        };
        Some(cell)
    }

    /// Numeric view; missing cells and strings are NaN
    pub fn to_f64_vec(&self) -> Vec<f64> {
        (0..self.len())
            .map(|i| self.get(i).and_then(|c| c.as_f64()).unwrap_or(f64::NAN))
            .collect()
    }

    /// Whether the cell at `row` is missing
    pub fn is_na(&self, row: usize) -> bool {
        self.get(row).map_or(true, |c| c.is_null())
    }

    /// Equality treating missing cells in the same position as equal
    pub fn equals(&self, other: &Column) -> bool {
        self.dtype() == other.dtype()
            && self.len() == other.len()
            && (0..self.len()).all(|i| self.get(i) == other.get(i))
    }
}

/// A grouped result: row index, column labels and one typed column per label
#[derive(Debug, Clone, PartialEq)]
pub struct ResultTable {
    index: RowIndex,
    columns: Vec<ColumnLabel>,
    data: Vec<Column>,
}

impl ResultTable {
    pub fn new(index: RowIndex, columns: Vec<ColumnLabel>, data: Vec<Column>) -> Result<Self> {
        if columns.len() != data.len() {
            return Err(Error::Consistency(format!(
                "{} column labels for {} columns",
                columns.len(),
                data.len()
            )));
        }
        if let Some(column) = data.iter().find(|c| c.len() != index.len()) {
            return Err(Error::Consistency(format!(
                "column of length {} does not match index of length {}",
                column.len(),
                index.len()
            )));
        }
        Ok(ResultTable {
            index,
            columns,
            data,
        })
    }

    pub fn index(&self) -> &RowIndex {
        &self.index
    }

    pub fn columns(&self) -> &[ColumnLabel] {
        &self.columns
    }

    /// Whether column labels are `(column, function)` pairs
    pub fn has_multi_columns(&self) -> bool {
        self.columns
            .iter()
            .any(|label| matches!(label, ColumnLabel::Pair(..)))
    }

    pub fn nrows(&self) -> usize {
        self.index.len()
    }

    pub fn ncols(&self) -> usize {
        self.columns.len()
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.nrows(), self.ncols())
    }

    pub fn column(&self, label: impl Into<ColumnLabel>) -> Option<&Column> {
        let label = label.into();
        self.columns
            .iter()
            .position(|l| *l == label)
            .map(|i| &self.data[i])
    }

    /// Cell at (`row`, `label`)
    pub fn get(&self, row: usize, label: impl Into<ColumnLabel>) -> Option<Scalar> {
        self.column(label)?.get(row)
    }

    /// Position of the row labelled `key` (one scalar per index level)
    pub fn row_position(&self, key: &[Scalar]) -> Option<usize> {
        match &self.index {
            RowIndex::Single(idx) => match key {
                [single] => idx.get_loc(single),
                _ => None,
            },
            RowIndex::Multi(idx) => idx.get_loc(key),
        }
    }

    /// Cell addressed by row key and column label
    pub fn loc(&self, key: &[Scalar], label: impl Into<ColumnLabel>) -> Option<Scalar> {
        let row = self.row_position(key)?;
        self.get(row, label)
    }

    pub fn dtypes(&self) -> Vec<(ColumnLabel, Dtype)> {
        self.columns
            .iter()
            .cloned()
            .zip(self.data.iter().map(Column::dtype))
            .collect()
    }

    /// Structural equality with missing cells in the same positions equal
    pub fn equals(&self, other: &ResultTable) -> bool {
        self.index == other.index
            && self.columns == other.columns
            && self.data.len() == other.data.len()
            && self.data.iter().zip(other.data.iter()).all(|(a, b)| a.equals(b))
    }
}

impl fmt::Display for ResultTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<String> = self
            .index
            .names()
            .into_iter()
            .map(|n| n.unwrap_or_default())
            .collect();

        let mut header: Vec<String> = vec![String::new(); names.len()];
        header.extend(self.columns.iter().map(|c| c.to_string()));
        writeln!(f, "{}", header.join("\t"))?;
        if names.iter().any(|n| !n.is_empty()) {
            writeln!(f, "{}", names.join("\t"))?;
        }

        for row in 0..self.nrows() {
            let mut cells: Vec<String> = self
                .index
                .get_tuple(row)
                .unwrap_or_default()
                .iter()
                .map(|v| v.to_string())
                .collect();
            for column in &self.data {
                let cell = match column.get(row) {
                    Some(Scalar::Null) if column.dtype() == Dtype::Datetime => "NaT".to_string(),
                    Some(cell) => cell.to_string(),
                    None => String::new(),
                };
                cells.push(cell);
            }
            writeln!(f, "{}", cells.join("\t"))?;
        }

        write!(f, "[{} rows x {} columns]", self.nrows(), self.ncols())
    }
}
