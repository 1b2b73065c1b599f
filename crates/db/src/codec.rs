//! Column encodings shared by the SQLite repositories.
//!
//! Timestamps are stored as fixed-width RFC 3339 text in UTC so that string
//! comparison in SQL orders them chronologically. Structured columns carry a
//! `{"schema_version":1,"data":...}` envelope.

use chrono::{DateTime, SecondsFormat, Utc};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::warn;

use crate::repositories::RepositoryError;

pub const SCHEMA_VERSION: u64 = 1;

pub fn encode_timestamp(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn encode_optional_timestamp(value: Option<DateTime<Utc>>) -> Option<String> {
    value.map(encode_timestamp)
}

pub fn decode_timestamp(column: &str, raw: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(raw).map(|value| value.with_timezone(&Utc)).map_err(|error| {
        RepositoryError::Decode(format!("invalid timestamp in `{column}`: {error}"))
    })
}

pub fn decode_optional_timestamp(
    column: &str,
    raw: Option<String>,
) -> Result<Option<DateTime<Utc>>, RepositoryError> {
    raw.map(|raw| decode_timestamp(column, &raw)).transpose()
}

pub fn decode_decimal(column: &str, raw: &str) -> Result<Decimal, RepositoryError> {
    raw.trim()
        .parse::<Decimal>()
        .map_err(|error| RepositoryError::Decode(format!("invalid decimal in `{column}`: {error}")))
}

pub fn decode_optional_decimal(
    column: &str,
    raw: Option<String>,
) -> Result<Option<Decimal>, RepositoryError> {
    raw.map(|raw| decode_decimal(column, &raw)).transpose()
}

pub fn encode_envelope<T: Serialize>(column: &str, value: &T) -> Result<String, RepositoryError> {
    let data = serde_json::to_value(value)
        .map_err(|error| RepositoryError::Decode(format!("cannot encode `{column}`: {error}")))?;
    Ok(json!({ "schema_version": SCHEMA_VERSION, "data": data }).to_string())
}

/// Reads an enveloped column. Bare legacy values are accepted as-is; anything
/// that does not decode falls back to `T::default()` with a warning.
pub fn decode_envelope<T>(column: &str, record_id: &str, raw: &str) -> T
where
    T: DeserializeOwned + Default,
{
    match try_decode_envelope(raw) {
        Ok(value) => value,
        Err(reason) => {
            warn!(
                event_name = "db.column.decode_fallback",
                column,
                record_id,
                reason = %reason,
                "malformed structured column; using default"
            );
            T::default()
        }
    }
}

fn try_decode_envelope<T: DeserializeOwned>(raw: &str) -> Result<T, String> {
    let parsed: Value = serde_json::from_str(raw).map_err(|error| error.to_string())?;
    let payload = match parsed {
        Value::Object(mut object) if object.contains_key("schema_version") => {
            match object.get("schema_version").and_then(Value::as_u64) {
                Some(SCHEMA_VERSION) => {}
                other => return Err(format!("unsupported schema_version {other:?}")),
            }
            object.remove("data").unwrap_or(Value::Null)
        }
        legacy => legacy,
    };
    serde_json::from_value(payload).map_err(|error| error.to_string())
}
