use crate::error::{Error, Result};
use crate::index::Index;
use crate::value::{Dtype, Scalar};
use std::collections::HashMap;

/// MultiIndex structure
///
/// Hierarchical row labels, one level per grouping column, following the
/// layout of pandas' `MultiIndex`: per-level unique values plus per-row codes.
/// A code of `-1` marks a null key (kept when grouping with `dropna=false`).
#[derive(Debug, Clone)]
pub struct MultiIndex {
    /// Unique labels of each level
    levels: Vec<Vec<Scalar>>,

    /// Per-level codes pointing into `levels` (-1 is a null key)
    codes: Vec<Vec<i32>>,

    /// Level names
    names: Vec<Option<String>>,

    /// Dtype of each level, including the effect of null codes
    level_dtypes: Vec<Dtype>,

    /// Mapping from row tuple to position
    map: HashMap<Vec<Scalar>, usize>,
}

impl MultiIndex {
    /// Create a new MultiIndex
    ///
    /// # Arguments
    /// * `levels` - unique values of each level
    /// * `codes` - per-row positions into each level (-1 for a null key)
    /// * `names` - level names (optional)
    pub fn new(
        levels: Vec<Vec<Scalar>>,
        codes: Vec<Vec<i32>>,
        names: Option<Vec<Option<String>>>,
    ) -> Result<Self> {
        if levels.is_empty() {
            return Err(Error::Index("At least one level is required".into()));
        }

        if levels.len() != codes.len() {
            return Err(Error::Index(
                "levels and codes must have the same length".into(),
            ));
        }

        for (level_idx, level_codes) in codes.iter().enumerate() {
            let max_code = levels[level_idx].len() as i32 - 1;
            for &code in level_codes.iter() {
                if code > max_code || code < -1 {
                    return Err(Error::Index(format!(
                        "Code {} of level {} is out of range",
                        code, level_idx
                    )));
                }
            }
        }

        let n_rows = codes[0].len();
        if codes.iter().any(|level_codes| level_codes.len() != n_rows) {
            return Err(Error::Index(
                "All levels must have the same number of rows".into(),
            ));
        }

        let names = match names {
            Some(n) => {
                if n.len() != levels.len() {
                    return Err(Error::Index(
                        "names must have the same length as levels".into(),
                    ));
                }
                n
            }
            None => vec![None; levels.len()],
        };

        let level_dtypes: Vec<Dtype> = levels
            .iter()
            .zip(codes.iter())
            .map(|(level, level_codes)| {
                let mut sample = level.clone();
                if level_codes.contains(&-1) {
                    sample.push(Scalar::Null);
                }
                Dtype::infer(&sample)
            })
            .collect();

        let levels: Vec<Vec<Scalar>> = levels
            .into_iter()
            .zip(level_dtypes.iter())
            .map(|(level, dtype)| level.into_iter().map(|v| dtype.coerce(v)).collect())
            .collect();

        let mut index = MultiIndex {
            levels,
            codes,
            names,
            level_dtypes,
            map: HashMap::with_capacity(n_rows),
        };

        for i in 0..n_rows {
            let row = index.row(i);
            if index.map.insert(row, i).is_some() {
                return Err(Error::Index(
                    "Duplicate values are not allowed in a MultiIndex".into(),
                ));
            }
        }

        Ok(index)
    }

    /// Create a MultiIndex from row tuples, like `pandas.MultiIndex.from_tuples`
    ///
    /// Level values keep their first-appearance order; null components get
    /// code -1.
    pub fn from_tuples(tuples: Vec<Vec<Scalar>>, names: Option<Vec<Option<String>>>) -> Result<Self> {
        if tuples.is_empty() {
            return Err(Error::Index("Empty tuple list".into()));
        }

        let n_levels = tuples[0].len();
        Self::from_tuples_with_levels(tuples, n_levels, names)
    }

    /// Create an empty MultiIndex with a known number of levels
    pub fn empty(n_levels: usize, names: Option<Vec<Option<String>>>) -> Result<Self> {
        Self::from_tuples_with_levels(Vec::new(), n_levels, names)
    }

    fn from_tuples_with_levels(
        tuples: Vec<Vec<Scalar>>,
        n_levels: usize,
        names: Option<Vec<Option<String>>>,
    ) -> Result<Self> {
        for (i, tuple) in tuples.iter().enumerate() {
            if tuple.len() != n_levels {
                return Err(Error::Index(format!(
                    "All tuples must have the same length. Tuple {} has length {}, expected {}",
                    i,
                    tuple.len(),
                    n_levels
                )));
            }
        }

        let mut unique_values: Vec<Vec<Scalar>> = vec![Vec::new(); n_levels];
        let mut level_maps: Vec<HashMap<Scalar, i32>> = vec![HashMap::new(); n_levels];
        let mut codes: Vec<Vec<i32>> = vec![vec![-1; tuples.len()]; n_levels];

        for (row_idx, tuple) in tuples.iter().enumerate() {
            for (level_idx, value) in tuple.iter().enumerate() {
                if value.is_null() {
                    continue;
                }
                let level_map = &mut level_maps[level_idx];

                let code = match level_map.get(value) {
                    Some(&code) => code,
                    None => {
                        let new_code = unique_values[level_idx].len() as i32;
                        unique_values[level_idx].push(value.clone());
                        level_map.insert(value.clone(), new_code);
                        new_code
                    }
                };

                codes[level_idx][row_idx] = code;
            }
        }

        MultiIndex::new(unique_values, codes, names)
    }

    fn row(&self, pos: usize) -> Vec<Scalar> {
        (0..self.levels.len())
            .map(|level_idx| {
                let code = self.codes[level_idx][pos];
                if code == -1 {
                    self.level_dtypes[level_idx].coerce(Scalar::Null)
                } else {
                    self.levels[level_idx][code as usize].clone()
                }
            })
            .collect()
    }

    /// Get the tuple at a position
    pub fn get_tuple(&self, pos: usize) -> Option<Vec<Scalar>> {
        if pos >= self.len() {
            return None;
        }
        Some(self.row(pos))
    }

    /// Get the position of a tuple
    pub fn get_loc(&self, key: &[Scalar]) -> Option<usize> {
        if key.len() != self.levels.len() {
            return None;
        }

        let key_vec: Vec<Scalar> = key
            .iter()
            .zip(self.level_dtypes.iter())
            .map(|(v, dtype)| dtype.coerce(v.clone()))
            .collect();
        self.map.get(&key_vec).copied()
    }

    /// Get the number of rows
    pub fn len(&self) -> usize {
        if self.codes.is_empty() {
            0
        } else {
            self.codes[0].len()
        }
    }

    /// Check whether the index is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get the number of levels
    pub fn n_levels(&self) -> usize {
        self.levels.len()
    }

    /// Get the unique values of each level
    pub fn levels(&self) -> &[Vec<Scalar>] {
        &self.levels
    }

    /// Get the codes of each level
    pub fn codes(&self) -> &[Vec<i32>] {
        &self.codes
    }

    /// Get the level names
    pub fn names(&self) -> &[Option<String>] {
        &self.names
    }

    pub fn level_dtypes(&self) -> &[Dtype] {
        &self.level_dtypes
    }

    /// Get the values of one level as a (possibly non-unique) list
    pub fn get_level_values(&self, level: usize) -> Result<Vec<Scalar>> {
        if level >= self.levels.len() {
            return Err(Error::Index(format!(
                "Level {} is out of range; valid levels are 0 to {}",
                level,
                self.levels.len() - 1
            )));
        }

        Ok((0..self.len()).map(|pos| self.row(pos)[level].clone()).collect())
    }

    /// Get one level as a unique single-level index
    pub fn level_index(&self, level: usize) -> Result<Index> {
        if level >= self.levels.len() {
            return Err(Error::Index(format!("Level {} is out of range", level)));
        }
        Index::with_dtype(
            self.levels[level].clone(),
            self.names[level].clone(),
            self.level_dtypes[level],
        )
    }
}

impl PartialEq for MultiIndex {
    fn eq(&self, other: &Self) -> bool {
        self.names == other.names
            && self.level_dtypes == other.level_dtypes
            && self.len() == other.len()
            && (0..self.len()).all(|i| self.row(i) == other.row(i))
    }
}
