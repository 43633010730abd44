use std::fmt;
use std::fmt::Display;

use serde::Deserialize;
use serde::Serialize;

/// A single value as it travels through plans and result rows.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub enum ScalarValue {
    Null,
    Boolean(Option<bool>),
    Int64(Option<i64>),
    Float64(Option<f64>),
    Utf8(Option<String>),
    /// milliseconds since UNIX epoch
    TimestampMillisecond(Option<i64>),
    List(Option<Vec<ScalarValue>>),
}

impl ScalarValue {
    pub fn is_null(&self) -> bool {
        matches!(
            self,
            ScalarValue::Null
                | ScalarValue::Boolean(None)
                | ScalarValue::Int64(None)
                | ScalarValue::Float64(None)
                | ScalarValue::Utf8(None)
                | ScalarValue::TimestampMillisecond(None)
                | ScalarValue::List(None)
        )
    }
}

impl From<bool> for ScalarValue {
    fn from(v: bool) -> Self {
        ScalarValue::Boolean(Some(v))
    }
}

impl From<i64> for ScalarValue {
    fn from(v: i64) -> Self {
        ScalarValue::Int64(Some(v))
    }
}

impl From<f64> for ScalarValue {
    fn from(v: f64) -> Self {
        ScalarValue::Float64(Some(v))
    }
}

impl From<&str> for ScalarValue {
    fn from(v: &str) -> Self {
        ScalarValue::Utf8(Some(v.to_string()))
    }
}

impl From<String> for ScalarValue {
    fn from(v: String) -> Self {
        ScalarValue::Utf8(Some(v))
    }
}

impl Display for ScalarValue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ScalarValue::Boolean(Some(v)) => write!(f, "{v}"),
            ScalarValue::Int64(Some(v)) => write!(f, "{v}"),
            ScalarValue::Float64(Some(v)) => write!(f, "{v}"),
            ScalarValue::Utf8(Some(v)) => write!(f, "{v}"),
            ScalarValue::TimestampMillisecond(Some(v)) => write!(f, "{v}"),
            ScalarValue::List(Some(vals)) => {
                write!(f, "[")?;
                for (i, v) in vals.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{v}")?;
                }
                write!(f, "]")
            }
            _ => write!(f, "null"),
        }
    }
}
