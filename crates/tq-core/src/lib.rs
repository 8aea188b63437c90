pub mod command;
pub mod completion;
pub mod event;
pub mod progress;
pub mod status;
pub mod tabs;
pub mod wire;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Per-batch submission summary served by the report directory.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BatchStats {
    #[serde(rename = "_id", deserialize_with = "deserialize_id")]
    pub id: String,
    #[serde(default, deserialize_with = "deserialize_count")]
    pub count: u64,
    #[serde(default, deserialize_with = "deserialize_count")]
    pub submitted_count: u64,
    #[serde(default)]
    pub submission_status: SubmissionStatus,
    #[serde(default, deserialize_with = "deserialize_ids")]
    pub report_ids: Vec<String>,
    #[serde(default)]
    pub latest_upload: Option<String>,
    #[serde(default)]
    pub earliest_upload: Option<String>,
    #[serde(default)]
    pub percentage: Option<f64>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SubmissionStatus {
    #[default]
    Pending,
    Partial,
    Completed,
}

impl SubmissionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubmissionStatus::Pending => "pending",
            SubmissionStatus::Partial => "partial",
            SubmissionStatus::Completed => "completed",
        }
    }
}

impl fmt::Display for SubmissionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubmissionStatus {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.trim().to_lowercase().as_str() {
            "pending" => Ok(SubmissionStatus::Pending),
            "partial" => Ok(SubmissionStatus::Partial),
            "completed" => Ok(SubmissionStatus::Completed),
            other => Err(format!("Unknown submission status: {other}")),
        }
    }
}

/// One ingested record of a batch. Spreadsheet columns vary per upload and
/// land in `columns`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Report {
    #[serde(rename = "_id", deserialize_with = "deserialize_id")]
    pub id: String,
    #[serde(default, rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub batch_id: String,
    #[serde(default, deserialize_with = "deserialize_count")]
    pub row_number: u64,
    #[serde(default)]
    pub ts: String,
    #[serde(default)]
    pub report_asset_file: String,
    #[serde(default)]
    pub form_id: String,
    #[serde(flatten)]
    pub columns: HashMap<String, Value>,
}

/// Deserialize an ID that can be either a string or a number into a String
pub(crate) fn deserialize_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let val = Value::deserialize(deserializer)?;
    match val {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        _ => Err(serde::de::Error::custom("expected string or number for id")),
    }
}

pub(crate) fn deserialize_opt_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let val = Option::<Value>::deserialize(deserializer)?;
    match val {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(Value::Number(n)) => Ok(Some(n.to_string())),
        Some(_) => Err(serde::de::Error::custom("expected string or number for id")),
    }
}

fn deserialize_ids<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let v: Vec<Value> = Vec::deserialize(deserializer)?;
    let mut ids = Vec::new();
    for val in v {
        if let Some(s) = val.as_str() {
            ids.push(s.to_string());
        } else if let Some(u) = val.as_u64() {
            ids.push(u.to_string());
        } else if let Some(i) = val.as_i64() {
            ids.push(i.to_string());
        }
    }
    Ok(ids)
}

fn deserialize_count<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(deserialize_opt_count(deserializer)?.unwrap_or(0))
}

/// Counters arrive as integers, floats, numeric strings or null depending on
/// which worker sent them. Negative values clamp to zero.
pub(crate) fn deserialize_opt_count<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    let val = Option::<Value>::deserialize(deserializer)?;
    match val {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => {
            if let Some(u) = n.as_u64() {
                Ok(Some(u))
            } else if let Some(f) = n.as_f64() {
                Ok(Some(if f.is_finite() && f > 0.0 { f.floor() as u64 } else { 0 }))
            } else {
                Ok(Some(0))
            }
        }
        Some(Value::String(s)) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                return Ok(None);
            }
            trimmed
                .parse::<f64>()
                .map(|f| Some(if f > 0.0 { f.floor() as u64 } else { 0 }))
                .map_err(|err| serde::de::Error::custom(format!("invalid count '{s}': {err}")))
        }
        Some(other) => Err(serde::de::Error::custom(format!(
            "expected number for count, got {other}"
        ))),
    }
}

pub(crate) fn deserialize_opt_u32<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(deserialize_opt_count(deserializer)?.map(|value| u32::try_from(value).unwrap_or(u32::MAX)))
}
