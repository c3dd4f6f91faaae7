//! Utility functions for common operations

use crate::ingestion::error::{IngestError, Result};
use crate::ingestion::types::Region;
use chrono::{Duration, NaiveDate};
use reqwest::Client;
use serde_json::Value;

/// Date format used by the BNGB properties
const SOURCE_DATE_FORMAT: &str = "%d-%m-%Y";

/// Build the HTTP client shared by every fetch of a run
pub fn build_http_client(timeout: std::time::Duration) -> Result<Client> {
    Client::builder()
        .timeout(timeout)
        .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(IngestError::HttpClient)
}

/// Substitute the region code into the endpoint template
pub fn endpoint_url(template: &str, region: Region) -> String {
    template.replace("{uf}", region.as_str())
}

/// Parse a `DD-MM-YYYY` date; anything else is None
pub fn parse_source_date(text: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(text.trim(), SOURCE_DATE_FORMAT).ok()
}

/// Null-preserving stringification of a property value
pub fn value_to_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Array(_) | Value::Object(_) => Some(value.to_string()),
    }
}

/// Numbers or numeric strings; non-finite values are treated as missing
pub fn value_to_f64(value: &Value) -> Option<f64> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed.filter(|v| v.is_finite())
}

/// Integral numbers or integer strings
pub fn value_to_id(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| {
            n.as_f64()
                .filter(|f| f.fract() == 0.0 && f.abs() < i64::MAX as f64)
                .map(|f| f as i64)
        }),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
}

pub fn value_to_date(value: &Value) -> Option<NaiveDate> {
    value.as_str().and_then(parse_source_date)
}

fn unix_epoch() -> NaiveDate {
    NaiveDate::default()
}

/// Days since 1970-01-01, the Arrow Date32 representation
pub fn date_to_days(date: NaiveDate) -> i32 {
    (date - unix_epoch()).num_days() as i32
}

pub fn days_to_date(days: i32) -> Option<NaiveDate> {
    unix_epoch().checked_add_signed(Duration::days(days as i64))
}
