//! Scalar cells and dtypes shared by indexes, buckets and result tables.

use std::fmt::{self, Display};
use std::hash::{Hash, Hasher};

use chrono::{DateTime, NaiveDateTime};
use num_traits::ToPrimitive;

/// A single typed cell or group key.
#[derive(Debug, Clone)]
pub enum Scalar {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Timestamp(NaiveDateTime),
}

impl Scalar {
    pub fn is_null(&self) -> bool {
        match self {
            Scalar::Null => true,
            Scalar::Float(v) => v.is_nan(),
            _ => false,
        }
    }

    /// Numeric view of the cell; timestamps become epoch milliseconds.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Scalar::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Scalar::Int(v) => v.to_f64(),
            Scalar::Float(v) if !v.is_nan() => Some(*v),
            Scalar::Timestamp(ts) => ts.and_utc().timestamp_millis().to_f64(),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Scalar::Int(v) => Some(*v),
            Scalar::Bool(b) => Some(*b as i64),
            Scalar::Float(v) => v.to_i64(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Scalar::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Build a timestamp from epoch milliseconds, as returned by the engine
    /// for date keys and date metric values.
    pub fn from_epoch_millis(millis: f64) -> Scalar {
        millis
            .round()
            .to_i64()
            .and_then(DateTime::from_timestamp_millis)
            .map(|dt| Scalar::Timestamp(dt.naive_utc()))
            .unwrap_or(Scalar::Null)
    }

    /// Encoding of a group key component as the painless script in the
    /// dependent `mad` pass renders the doc value.
    ///
    /// Every token is self-delimiting: numbers end with `;`, strings carry
    /// their UTF-16 length. Doubles are encoded by their IEEE 754 bits so the
    /// encoding never depends on decimal formatting.
    pub fn script_token(&self) -> String {
        match self {
            Scalar::Null => "n;".to_string(),
            Scalar::Bool(true) => "b1;".to_string(),
            Scalar::Bool(false) => "b0;".to_string(),
            Scalar::Int(v) => format!("i{};", v),
            Scalar::Float(v) if v.is_nan() => "n;".to_string(),
            Scalar::Float(v) => format!("f{};", v.to_bits() as i64),
            Scalar::Str(s) => format!("s{}:{}", s.encode_utf16().count(), s),
            Scalar::Timestamp(ts) => format!("t{};", ts.and_utc().timestamp_millis()),
        }
    }
}

/// Concatenated tokens of a group key; must match the script emitted by the
/// query compiler for the dependent `mad` pass.
pub fn script_key(key: &[Scalar]) -> String {
    key.iter().map(Scalar::script_token).collect()
}

impl PartialEq for Scalar {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Scalar::Null, Scalar::Null) => true,
            (Scalar::Bool(a), Scalar::Bool(b)) => a == b,
            (Scalar::Int(a), Scalar::Int(b)) => a == b,
            (Scalar::Float(a), Scalar::Float(b)) => {
                (a.is_nan() && b.is_nan()) || a.to_bits() == b.to_bits() || a == b
            }
            (Scalar::Str(a), Scalar::Str(b)) => a == b,
            (Scalar::Timestamp(a), Scalar::Timestamp(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Scalar {}

impl Hash for Scalar {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Scalar::Null => {}
            Scalar::Bool(b) => b.hash(state),
            Scalar::Int(v) => v.hash(state),
            Scalar::Float(v) => {
                // -0.0 == 0.0 and every NaN is equal to every other NaN
                let bits = if v.is_nan() {
                    f64::NAN.to_bits()
                } else if *v == 0.0 {
                    0.0f64.to_bits()
                } else {
                    v.to_bits()
                };
                bits.hash(state)
            }
            Scalar::Str(s) => s.hash(state),
            Scalar::Timestamp(ts) => ts.hash(state),
        }
    }
}

impl Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Null => write!(f, "NaN"),
            Scalar::Bool(true) => write!(f, "True"),
            Scalar::Bool(false) => write!(f, "False"),
            Scalar::Int(v) => write!(f, "{}", v),
            Scalar::Float(v) if v.is_nan() => write!(f, "NaN"),
            Scalar::Float(v) if v.fract() == 0.0 && v.abs() < 1e16 => write!(f, "{:.1}", v),
            Scalar::Float(v) => write!(f, "{}", v),
            Scalar::Str(s) => write!(f, "{}", s),
            Scalar::Timestamp(ts) => write!(f, "{}", ts.format("%Y-%m-%d %H:%M:%S")),
        }
    }
}

impl From<bool> for Scalar {
    fn from(v: bool) -> Self {
        Scalar::Bool(v)
    }
}

impl From<i64> for Scalar {
    fn from(v: i64) -> Self {
        Scalar::Int(v)
    }
}

impl From<f64> for Scalar {
    fn from(v: f64) -> Self {
        Scalar::Float(v)
    }
}

impl From<&str> for Scalar {
    fn from(v: &str) -> Self {
        Scalar::Str(v.to_string())
    }
}

impl From<String> for Scalar {
    fn from(v: String) -> Self {
        Scalar::Str(v)
    }
}

impl From<NaiveDateTime> for Scalar {
    fn from(v: NaiveDateTime) -> Self {
        Scalar::Timestamp(v)
    }
}

/// Column and index dtypes, named as pandas names them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dtype {
    Int64,
    Float64,
    Bool,
    Datetime,
    Object,
}

impl Dtype {
    /// Apply pandas widening to a preferred dtype given the actual cells:
    /// integers holding a null become `float64`, booleans become `object`.
    pub fn widen(self, values: &[Scalar]) -> Dtype {
        let has_null = || values.iter().any(Scalar::is_null);
        match self {
            Dtype::Int64 if has_null() => Dtype::Float64,
            Dtype::Bool if has_null() => Dtype::Object,
            other => other,
        }
    }

    /// Infer the dtype of a sequence of keys.
    pub fn infer(values: &[Scalar]) -> Dtype {
        let mut seen: Option<Dtype> = None;
        let mut has_null = false;
        for value in values {
            let dtype = match value {
                Scalar::Null => {
                    has_null = true;
                    continue;
                }
                Scalar::Bool(_) => Dtype::Bool,
                Scalar::Int(_) => Dtype::Int64,
                Scalar::Float(v) if v.is_nan() => {
                    has_null = true;
                    continue;
                }
                Scalar::Float(_) => Dtype::Float64,
                Scalar::Str(_) => Dtype::Object,
                Scalar::Timestamp(_) => Dtype::Datetime,
            };
            seen = Some(match (seen, dtype) {
                (None, d) => d,
                (Some(a), b) if a == b => a,
                (Some(Dtype::Int64), Dtype::Float64) | (Some(Dtype::Float64), Dtype::Int64) => {
                    Dtype::Float64
                }
                _ => Dtype::Object,
            });
        }
        match (seen, has_null) {
            (None, true) => Dtype::Float64,
            (None, false) => Dtype::Object,
            (Some(Dtype::Int64), true) => Dtype::Float64,
            (Some(Dtype::Bool), true) => Dtype::Object,
            (Some(d), _) => d,
        }
    }

    /// Convert a cell to this dtype's representation: integers in a float
    /// column become floats and nulls become NaN.
    pub fn coerce(self, value: Scalar) -> Scalar {
        match (self, value) {
            (Dtype::Float64, Scalar::Int(v)) => Scalar::Float(v as f64),
            (Dtype::Float64, Scalar::Bool(b)) => Scalar::Float(if b { 1.0 } else { 0.0 }),
            (Dtype::Float64, Scalar::Null) => Scalar::Float(f64::NAN),
            (Dtype::Int64, Scalar::Float(v)) if !v.is_nan() => Scalar::Int(v.round() as i64),
            (Dtype::Int64, Scalar::Bool(b)) => Scalar::Int(b as i64),
            (Dtype::Bool, Scalar::Float(v)) if !v.is_nan() => Scalar::Bool(v != 0.0),
            (Dtype::Bool, Scalar::Int(v)) => Scalar::Bool(v != 0),
            (Dtype::Datetime, Scalar::Float(v)) if !v.is_nan() => Scalar::from_epoch_millis(v),
            (Dtype::Datetime, Scalar::Int(v)) => Scalar::from_epoch_millis(v as f64),
            (_, Scalar::Float(v)) if v.is_nan() => Scalar::Null,
            (_, other) => other,
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Dtype::Int64 | Dtype::Float64 | Dtype::Bool)
    }
}

impl Display for Dtype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Dtype::Int64 => "int64",
            Dtype::Float64 => "float64",
            Dtype::Bool => "bool",
            Dtype::Datetime => "datetime64[ns]",
            Dtype::Object => "object",
        };
        write!(f, "{}", name)
    }
}
