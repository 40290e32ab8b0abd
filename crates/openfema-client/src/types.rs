//! Response types for the OpenFEMA API.
//!
//! Every entity endpoint answers with an envelope of the form
//! `{"metadata": {...}, "<EntityName>": [ {row}, ... ]}`. Rows are kept as raw
//! JSON objects here; reconciling their key sets is the fetcher's job.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// A single row as delivered by the API. Null-valued fields are often omitted.
pub type RawRow = serde_json::Map<String, serde_json::Value>;

/// One page of rows, in API order.
pub type RawPage = Vec<RawRow>;

/// The `metadata` block of an entity response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseMetadata {
    /// `$skip` echoed back
    #[serde(default)]
    pub skip: Option<u64>,
    /// `$top` echoed back
    #[serde(default)]
    pub top: Option<u64>,
    /// Total matching records (present with `$inlinecount=allpages`)
    #[serde(default)]
    pub count: Option<u64>,
    /// `$filter` echoed back
    #[serde(default)]
    pub filter: Option<String>,
    /// Entity name the rows were read from
    #[serde(default, rename = "entityname")]
    pub entity_name: Option<String>,
}

/// Decoded page: the rows plus the total count when the API reported one.
#[derive(Debug, Clone, Default)]
pub struct PageResponse {
    /// Rows in API order
    pub rows: RawPage,
    /// `metadata.count`, if present
    pub count: Option<u64>,
}

impl PageResponse {
    /// Decode an entity envelope.
    ///
    /// Rows are read from the key matching `entity` (ignoring case), falling
    /// back to the only array-valued key other than `metadata`.
    pub fn from_envelope(body: serde_json::Value, entity: &str) -> Result<Self, String> {
        let serde_json::Value::Object(mut envelope) = body else {
            return Err("response body is not a JSON object".to_string());
        };

        let metadata: ResponseMetadata = match envelope.remove("metadata") {
            Some(value) => serde_json::from_value(value)
                .map_err(|e| format!("malformed metadata block: {}", e))?,
            None => ResponseMetadata::default(),
        };

        let key = envelope
            .keys()
            .find(|k| k.eq_ignore_ascii_case(entity))
            .cloned()
            .or_else(|| {
                let mut arrays = envelope.iter().filter(|(_, v)| v.is_array());
                match (arrays.next(), arrays.next()) {
                    (Some((k, _)), None) => Some(k.clone()),
                    _ => None,
                }
            })
            .ok_or_else(|| format!("response has no '{}' rows", entity))?;

        let serde_json::Value::Array(items) = envelope.remove(&key).unwrap_or_default() else {
            return Err(format!("'{}' is not an array", key));
        };

        let rows = items
            .into_iter()
            .enumerate()
            .map(|(i, item)| match item {
                serde_json::Value::Object(row) => Ok(row),
                other => Err(format!("row {} is not an object: {}", i, other)),
            })
            .collect::<Result<RawPage, String>>()?;

        Ok(Self {
            rows,
            count: metadata.count,
        })
    }
}

/// Entry of the `/v1/DataSets` listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataSetSummary {
    /// Entity name, e.g. "FimaNfipClaims"
    pub name: String,
    /// Human-readable title
    #[serde(default)]
    pub title: Option<String>,
    /// Endpoint version
    pub version: u32,
    /// Description
    #[serde(default)]
    pub description: Option<String>,
    /// When the dataset was last refreshed upstream
    #[serde(default)]
    pub last_refresh: Option<DateTime<Utc>>,
}

/// Entry of the `/v1/DataSetFields` listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataSetField {
    /// Field name as it appears in rows
    pub name: String,
    /// Human-readable title
    #[serde(default)]
    pub title: Option<String>,
    /// Upstream type name (text, date, decimal, boolean, ...)
    #[serde(rename = "type", default)]
    pub field_type: String,
    /// Description
    #[serde(default)]
    pub description: Option<String>,
    /// Whether the field is part of the primary key
    #[serde(default, deserialize_with = "lenient_bool")]
    pub primary_key: Option<bool>,
}

impl DataSetField {
    /// Returns true when the upstream type is a date or date-time.
    pub fn is_date(&self) -> bool {
        let ty = self.field_type.to_ascii_lowercase();
        ty == "date" || ty == "datetime" || ty == "timestamp"
    }
}

/// Envelope of `/v1/DataSets`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct DataSetsResponse {
    #[serde(default)]
    pub data_sets: Vec<DataSetSummary>,
}

/// Envelope of `/v1/DataSetFields`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct DataSetFieldsResponse {
    #[serde(default)]
    pub data_set_fields: Vec<DataSetField>,
}

/// Extract a human-readable message from an error body.
///
/// Accepts `{"message": ".."}`, `{"error": ".."}` and
/// `{"error": {"message": ".."}}`.
pub(crate) fn api_error_message(body: &[u8]) -> Option<String> {
    let value: serde_json::Value = serde_json::from_slice(body).ok()?;
    let text = |v: &serde_json::Value| v.as_str().map(str::to_string);

    value
        .get("message")
        .and_then(text)
        .or_else(|| value.get("error").and_then(text))
        .or_else(|| {
            value
                .get("error")
                .and_then(|e| e.get("message"))
                .and_then(text)
        })
}

fn lenient_bool<'de, D>(deserializer: D) -> Result<Option<bool>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::Bool(b)) => Some(b),
        Some(serde_json::Value::Number(n)) => n.as_i64().map(|n| n != 0),
        Some(serde_json::Value::String(s)) => match s.to_ascii_lowercase().as_str() {
            "yes" | "true" | "y" | "1" => Some(true),
            "no" | "false" | "n" | "0" => Some(false),
            _ => None,
        },
        _ => None,
    })
}
