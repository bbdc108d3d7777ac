use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};
use chrono_tz::Tz;

/// A single reading.
#[derive(Debug, Clone, PartialEq)]
pub enum SensorValue {
    Float(f64),
    Integer(i64),
    Text(String),
    Timestamp(DateTime<Utc>),
}

impl SensorValue {
    /// The string placed in the state document. Integral floats keep one
    /// decimal (`42.0`), timestamps are RFC 3339 to the second in `tz`.
    pub fn render(&self, tz: &Tz) -> String {
        match self {
            SensorValue::Float(v) => render_float(*v),
            SensorValue::Integer(v) => v.to_string(),
            SensorValue::Text(v) => v.clone(),
            SensorValue::Timestamp(v) => v
                .with_timezone(tz)
                .to_rfc3339_opts(SecondsFormat::Secs, false),
        }
    }

    pub fn is_empty_text(&self) -> bool {
        matches!(self, SensorValue::Text(t) if t.trim().is_empty())
    }
}

fn render_float(v: f64) -> String {
    if v.is_nan() {
        "nan".to_string()
    } else if v.is_infinite() {
        if v > 0.0 { "inf" } else { "-inf" }.to_string()
    } else if v.fract() == 0.0 {
        format!("{v:.1}")
    } else {
        v.to_string()
    }
}

impl fmt::Display for SensorValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render(&Tz::UTC))
    }
}

impl From<f64> for SensorValue {
    fn from(v: f64) -> Self {
        SensorValue::Float(v)
    }
}

impl From<i64> for SensorValue {
    fn from(v: i64) -> Self {
        SensorValue::Integer(v)
    }
}

impl From<u64> for SensorValue {
    fn from(v: u64) -> Self {
        SensorValue::Integer(i64::try_from(v).unwrap_or(i64::MAX))
    }
}

impl From<String> for SensorValue {
    fn from(v: String) -> Self {
        SensorValue::Text(v)
    }
}

impl From<&str> for SensorValue {
    fn from(v: &str) -> Self {
        SensorValue::Text(v.to_string())
    }
}

impl From<DateTime<Utc>> for SensorValue {
    fn from(v: DateTime<Utc>) -> Self {
        SensorValue::Timestamp(v)
    }
}
