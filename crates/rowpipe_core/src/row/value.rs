use std::fmt;

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use rowpipe_error::{RowpipeError, Result};
use serde::{Deserialize, Serialize};

use super::layout::DataType;

/// A single typed value in a row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Boolean(bool),
    Integer(i64),
    Number(f64),
    String(String),
    Date(NaiveDate),
    Timestamp(DateTime<Utc>),
    Binary(Vec<u8>),
}

impl Value {
    /// Data type of this value, `None` for nulls.
    pub fn datatype(&self) -> Option<DataType> {
        Some(match self {
            Self::Null => return None,
            Self::Boolean(_) => DataType::Boolean,
            Self::Integer(_) => DataType::Integer,
            Self::Number(_) => DataType::Number,
            Self::String(_) => DataType::String,
            Self::Date(_) => DataType::Date,
            Self::Timestamp(_) => DataType::Timestamp,
            Self::Binary(_) => DataType::Binary,
        })
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Coerce this value to an integer.
    ///
    /// Nulls coerce to `None`. Numbers are truncated toward zero, strings are
    /// parsed after trimming, booleans map to 0/1, dates and timestamps map to
    /// days and milliseconds since the epoch respectively. Binary values can't
    /// be coerced.
    pub fn try_as_i64(&self) -> Result<Option<i64>> {
        let v = match self {
            Self::Null => return Ok(None),
            Self::Boolean(b) => *b as i64,
            Self::Integer(i) => *i,
            Self::Number(n) => {
                if !n.is_finite() {
                    return Err(RowpipeError::new("Cannot convert non-finite number to integer")
                        .with_field("value", n));
                }
                n.trunc() as i64
            }
            Self::String(s) => s.trim().parse::<i64>().map_err(|_| {
                RowpipeError::new("Cannot convert string to integer").with_field("value", s)
            })?,
            Self::Date(d) => days_since_epoch(d),
            Self::Timestamp(ts) => ts.timestamp_millis(),
            Self::Binary(_) => {
                return Err(RowpipeError::new("Cannot convert binary value to integer"));
            }
        };
        Ok(Some(v))
    }

    /// Write a canonical byte representation of this value to `buf`.
    ///
    /// Used as input for hash partitioning, so the encoding must never depend
    /// on platform or process state.
    pub fn write_key_bytes(&self, buf: &mut Vec<u8>) {
        match self {
            Self::Null => (),
            Self::Boolean(b) => buf.push(*b as u8),
            Self::Integer(i) => buf.extend_from_slice(&i.to_le_bytes()),
            Self::Number(n) => buf.extend_from_slice(&n.to_bits().to_le_bytes()),
            Self::String(s) => buf.extend_from_slice(s.as_bytes()),
            Self::Date(d) => buf.extend_from_slice(&days_since_epoch(d).to_le_bytes()),
            Self::Timestamp(ts) => buf.extend_from_slice(&ts.timestamp_micros().to_le_bytes()),
            Self::Binary(b) => buf.extend_from_slice(b),
        }
    }
}

/// Days from 0001-01-01 (CE) to 1970-01-01.
const UNIX_EPOCH_DAYS_FROM_CE: i64 = 719_163;

fn days_since_epoch(date: &NaiveDate) -> i64 {
    i64::from(date.num_days_from_ce()) - UNIX_EPOCH_DAYS_FROM_CE
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "NULL"),
            Self::Boolean(v) => write!(f, "{v}"),
            Self::Integer(v) => write!(f, "{v}"),
            Self::Number(v) => write!(f, "{v}"),
            Self::String(v) => write!(f, "{v}"),
            Self::Date(v) => write!(f, "{v}"),
            Self::Timestamp(v) => write!(f, "{}", v.to_rfc3339()),
            Self::Binary(v) => write!(f, "<{} bytes>", v.len()),
        }
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Integer(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Number(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Boolean(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_coercion() {
        struct TestCase {
            value: Value,
            expected: Option<i64>,
        }

        let cases = [
            TestCase {
                value: Value::Integer(13),
                expected: Some(13),
            },
            TestCase {
                value: Value::Number(13.9),
                expected: Some(13),
            },
            TestCase {
                value: Value::Number(-2.5),
                expected: Some(-2),
            },
            TestCase {
                value: " 42 ".into(),
                expected: Some(42),
            },
            TestCase {
                value: true.into(),
                expected: Some(1),
            },
            TestCase {
                value: Value::Null,
                expected: None,
            },
        ];

        for case in cases {
            assert_eq!(case.expected, case.value.try_as_i64().unwrap(), "{:?}", case.value);
        }
    }

    #[test]
    fn integer_coercion_errors() {
        assert!(Value::from("abc").try_as_i64().is_err());
        assert!(Value::Number(f64::NAN).try_as_i64().is_err());
        assert!(Value::Binary(vec![1]).try_as_i64().is_err());
    }

    #[test]
    fn key_bytes_are_stable() {
        let mut buf = Vec::new();
        Value::Integer(1).write_key_bytes(&mut buf);
        assert_eq!(vec![1, 0, 0, 0, 0, 0, 0, 0], buf);

        buf.clear();
        Value::from("ab").write_key_bytes(&mut buf);
        assert_eq!(b"ab".to_vec(), buf);
    }
}
