//! Tolerant decoding of one archive line into a typed record, and the per-line outcome
//! that the pipeline folds over.

use crate::allowlist::normalize_identifier;
use crate::error::RecordDecodeError;
use serde::Deserialize;
use serde_json::Value;
use std::borrow::Cow;

/// Line-level schema. Extra fields are ignored by serde; every named field is optional.
/// Pass-through fields never fail a line: a non-string value reads as `None`.
#[derive(Debug, Deserialize)]
pub struct RawRecord {
    #[serde(rename = "subreddit")]
    pub identifier: Option<String>,
    pub created_utc: Option<Value>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub body: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub author: Option<String>,
}

fn lenient_string<'de, D: serde::Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
    Ok(match Value::deserialize(d)? {
        Value::String(s) => Some(s),
        _ => None,
    })
}

/// A decoded record with its fields coerced: identifier lowercased, timestamp an integer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommentRecord {
    pub identifier: String,
    pub timestamp: i64,
    pub body: Option<String>,
    pub id: Option<String>,
    pub author: Option<String>,
}

/// Why a decoded record was not counted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterReason {
    NotAllowed,
    OutsideWindow,
}

/// Result of folding one line.
#[derive(Debug)]
pub enum LineOutcome {
    Admitted(CommentRecord),
    SkippedParse(RecordDecodeError),
    SkippedFilter(FilterReason),
}

/// Decode one line. Invalid UTF-8 is replaced rather than rejected.
/// A missing `created_utc` becomes 0; a present but non-integral one is an error.
pub fn decode_line(line: &[u8]) -> Result<CommentRecord, RecordDecodeError> {
    let text: Cow<'_, str> = String::from_utf8_lossy(line);
    let raw: RawRecord = serde_json::from_str(&text)?;
    let timestamp = match raw.created_utc {
        None | Some(Value::Null) => 0,
        Some(v) => coerce_timestamp(&v)?,
    };
    Ok(CommentRecord {
        identifier: raw.identifier.as_deref().map(normalize_identifier).unwrap_or_default(),
        timestamp,
        body: raw.body,
        id: raw.id,
        author: raw.author,
    })
}

/// Archives carry `created_utc` as an integer, a float, or a numeric string depending on year.
fn coerce_timestamp(v: &Value) -> Result<i64, RecordDecodeError> {
    match v {
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(i)
            } else {
                match n.as_f64() {
                    Some(f) if f.is_finite() && f.abs() < i64::MAX as f64 => Ok(f.trunc() as i64),
                    _ => Err(RecordDecodeError::Timestamp(n.to_string())),
                }
            }
        }
        Value::String(s) => s
            .trim()
            .parse::<i64>()
            .map_err(|_| RecordDecodeError::Timestamp(s.clone())),
        other => Err(RecordDecodeError::Timestamp(other.to_string())),
    }
}
