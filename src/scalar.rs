// used for persistence
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, Value, ValueRef};
use serde::{Deserialize, Serialize};

// used to print out readable forms of a scalar
use std::fmt;
// used to indicate that scalars need to be hashable, since values are interned
use std::hash::{Hash, Hasher};

use crate::error::{EavError, Result};

/// The only two kinds of data an attribute or a primary key can hold.
///
/// Numbers are stored as `f64`, so integers written as keys come back as
/// numbers with a zero fraction. Equality and hashing follow the bit pattern,
/// except that `-0.0` and `0.0` are the same value (as they are to SQLite's
/// uniqueness constraint).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Number(f64),
    Text(String),
}

impl Scalar {
    pub fn is_numeric(&self) -> bool {
        matches!(self, Scalar::Number(_))
    }
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Scalar::Number(n) => Some(*n),
            Scalar::Text(_) => None,
        }
    }
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Scalar::Number(_) => None,
            Scalar::Text(s) => Some(s),
        }
    }
    /// An integer as a number, refused when `f64` cannot hold it exactly.
    pub fn integer(n: i64) -> Result<Scalar> {
        let number = n as f64;
        // widened so that 2^63 cannot saturate back to i64::MAX
        if number as i128 == n as i128 {
            Ok(Scalar::Number(number))
        } else {
            Err(EavError::validation(format!(
                "{n} cannot be stored exactly as a number"
            )))
        }
    }
    /// NaN cannot be stored in the value dictionary (SQLite turns it into NULL).
    pub fn check_storable(&self) -> Result<()> {
        match self {
            Scalar::Number(n) if n.is_nan() => {
                Err(EavError::validation("NaN is not a storable number"))
            }
            _ => Ok(()),
        }
    }
    /// Converts a cell read back from the store; NULL and blobs have no scalar form.
    pub fn from_cell(cell: &Value) -> Option<Scalar> {
        match cell {
            Value::Integer(i) => Some(Scalar::Number(*i as f64)),
            Value::Real(r) => Some(Scalar::Number(*r)),
            Value::Text(s) => Some(Scalar::Text(s.clone())),
            Value::Null | Value::Blob(_) => None,
        }
    }
    fn normalized_bits(n: f64) -> u64 {
        if n == 0.0 { 0 } else { n.to_bits() }
    }
}

impl PartialEq for Scalar {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Scalar::Number(a), Scalar::Number(b)) => {
                Scalar::normalized_bits(*a) == Scalar::normalized_bits(*b)
            }
            (Scalar::Text(a), Scalar::Text(b)) => a == b,
            _ => false,
        }
    }
}
impl Eq for Scalar {}

impl Hash for Scalar {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            Scalar::Number(n) => {
                0u8.hash(state);
                Scalar::normalized_bits(*n).hash(state);
            }
            Scalar::Text(s) => {
                1u8.hash(state);
                s.hash(state);
            }
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Scalar::Number(n) => write!(f, "{}", n),
            Scalar::Text(s) => write!(f, "{}", s),
        }
    }
}

impl ToSql for Scalar {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        match self {
            Scalar::Number(n) => Ok(ToSqlOutput::from(*n)),
            Scalar::Text(s) => Ok(ToSqlOutput::from(s.as_str())),
        }
    }
}
impl FromSql for Scalar {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        match value {
            ValueRef::Integer(i) => Ok(Scalar::Number(i as f64)),
            ValueRef::Real(r) => Ok(Scalar::Number(r)),
            ValueRef::Text(t) => Ok(Scalar::Text(
                std::str::from_utf8(t)
                    .map_err(|e| FromSqlError::Other(Box::new(e)))?
                    .to_string(),
            )),
            _ => Err(FromSqlError::InvalidType),
        }
    }
}

impl From<Scalar> for Value {
    fn from(scalar: Scalar) -> Value {
        match scalar {
            Scalar::Number(n) => Value::Real(n),
            Scalar::Text(s) => Value::Text(s),
        }
    }
}

impl From<f64> for Scalar {
    fn from(n: f64) -> Self {
        Scalar::Number(n)
    }
}
impl From<f32> for Scalar {
    fn from(n: f32) -> Self {
        Scalar::Number(n as f64)
    }
}
impl From<i32> for Scalar {
    fn from(n: i32) -> Self {
        Scalar::Number(n as f64)
    }
}
/// Numbers are stored as `f64`, so integers beyond 2^53 in magnitude round to
/// the nearest representable value. Use [`Scalar::integer`] to refuse them instead.
impl From<i64> for Scalar {
    fn from(n: i64) -> Self {
        Scalar::Number(n as f64)
    }
}
impl From<u32> for Scalar {
    fn from(n: u32) -> Self {
        Scalar::Number(n as f64)
    }
}
impl From<&str> for Scalar {
    fn from(s: &str) -> Self {
        Scalar::Text(s.to_string())
    }
}
impl From<String> for Scalar {
    fn from(s: String) -> Self {
        Scalar::Text(s)
    }
}
