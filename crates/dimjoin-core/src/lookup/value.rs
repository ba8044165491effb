//! Scalar values carried by stream rows and reference records.
//!
//! [`ScalarValue`] covers the value types a dimension table can hold:
//! strings, numerics, binary blobs and timestamps. Stream rows may also
//! carry [`ScalarValue::TimeIndicator`], a timestamp annotated as the
//! event-time or processing-time attribute of the stream. Enriched output
//! rows never carry that annotation; see
//! [`ScalarValue::normalize_time_indicator`].

use std::fmt;

use serde::{Deserialize, Serialize};

/// A single field value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ScalarValue {
    /// SQL NULL
    Null,
    /// Boolean
    Bool(bool),
    /// 64-bit signed integer (covers i8/i16/i32/i64)
    Int64(i64),
    /// 64-bit float (covers f32/f64)
    Float64(f64),
    /// UTF-8 string
    Utf8(String),
    /// Raw binary data
    Binary(Vec<u8>),
    /// Timestamp as microseconds since Unix epoch
    Timestamp(i64),
    /// Event-time or processing-time attribute, microseconds since Unix epoch
    TimeIndicator(i64),
}

impl ScalarValue {
    /// Returns `true` for [`ScalarValue::Null`].
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Strips the time-attribute annotation, leaving a plain timestamp.
    ///
    /// Every other variant is returned unchanged.
    #[must_use]
    pub fn normalize_time_indicator(self) -> Self {
        match self {
            Self::TimeIndicator(us) => Self::Timestamp(us),
            other => other,
        }
    }

    /// Appends the raw textual form of this value to a lookup key.
    ///
    /// Unlike [`Display`](fmt::Display), strings are written unquoted so
    /// the result matches row identifiers stored in the reference table.
    pub fn write_key(&self, out: &mut String) {
        use std::fmt::Write;
        // Writing into a String cannot fail.
        let _ = match self {
            Self::Null => Ok(()),
            Self::Bool(v) => write!(out, "{v}"),
            Self::Int64(v) => write!(out, "{v}"),
            Self::Float64(v) => write!(out, "{v}"),
            Self::Utf8(v) => {
                out.push_str(v);
                Ok(())
            }
            Self::Binary(v) => {
                out.push_str(&String::from_utf8_lossy(v));
                Ok(())
            }
            Self::Timestamp(us) | Self::TimeIndicator(us) => write!(out, "{us}"),
        };
    }
}

impl fmt::Display for ScalarValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "NULL"),
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int64(v) => write!(f, "{v}"),
            Self::Float64(v) => write!(f, "{v}"),
            Self::Utf8(v) => write!(f, "'{v}'"),
            Self::Binary(v) => write!(f, "X'{}'", hex_encode(v)),
            Self::Timestamp(us) => write!(f, "TIMESTAMP '{us}'"),
            Self::TimeIndicator(us) => write!(f, "TIME_ATTRIBUTE '{us}'"),
        }
    }
}

impl From<&str> for ScalarValue {
    fn from(v: &str) -> Self {
        Self::Utf8(v.to_string())
    }
}

impl From<String> for ScalarValue {
    fn from(v: String) -> Self {
        Self::Utf8(v)
    }
}

impl From<i64> for ScalarValue {
    fn from(v: i64) -> Self {
        Self::Int64(v)
    }
}

impl From<f64> for ScalarValue {
    fn from(v: f64) -> Self {
        Self::Float64(v)
    }
}

impl From<bool> for ScalarValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl<T: Into<ScalarValue>> From<Option<T>> for ScalarValue {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

/// Encode bytes as lowercase hex string.
fn hex_encode(bytes: &[u8]) -> String {
    use std::fmt::Write;
    bytes
        .iter()
        .fold(String::with_capacity(bytes.len() * 2), |mut s, b| {
            let _ = write!(s, "{b:02x}");
            s
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key_of(v: &ScalarValue) -> String {
        let mut s = String::new();
        v.write_key(&mut s);
        s
    }

    #[test]
    fn test_display() {
        assert_eq!(ScalarValue::Null.to_string(), "NULL");
        assert_eq!(ScalarValue::Utf8("abc".into()).to_string(), "'abc'");
        assert_eq!(ScalarValue::Binary(vec![0xde, 0xad]).to_string(), "X'dead'");
        assert_eq!(ScalarValue::Timestamp(5).to_string(), "TIMESTAMP '5'");
    }

    #[test]
    fn test_key_form_is_unquoted() {
        assert_eq!(key_of(&ScalarValue::Utf8("abc".into())), "abc");
        assert_eq!(key_of(&ScalarValue::Int64(42)), "42");
        assert_eq!(key_of(&ScalarValue::Bool(true)), "true");
        assert_eq!(key_of(&ScalarValue::Binary(b"row1".to_vec())), "row1");
    }

    #[test]
    fn test_normalize_time_indicator() {
        assert_eq!(
            ScalarValue::TimeIndicator(1_700_000_000_000_000).normalize_time_indicator(),
            ScalarValue::Timestamp(1_700_000_000_000_000)
        );
        assert_eq!(
            ScalarValue::Int64(7).normalize_time_indicator(),
            ScalarValue::Int64(7)
        );
    }

    #[test]
    fn test_from_option() {
        assert_eq!(ScalarValue::from(None::<i64>), ScalarValue::Null);
        assert_eq!(ScalarValue::from(Some("x")), ScalarValue::Utf8("x".into()));
    }
}
