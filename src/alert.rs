//! data structures for deserializing incoming alert group notifications
use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// state of an alert group or a single alert
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Firing,
    Resolved,
}

impl Status {
    /// upper-cased form used in the message subject
    pub fn as_upper(self) -> &'static str {
        match self {
            Status::Firing => "FIRING",
            Status::Resolved => "RESOLVED",
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
/// alert group notification received by the alertmanager webhook receiver
#[allow(clippy::missing_docs_in_private_items)]
pub struct Data {
    pub version: String,
    pub group_key: String,

    pub receiver: String,
    pub status: Status,
    #[serde(default)]
    pub alerts: Vec<Alert>,
    #[serde(default)]
    pub group_labels: HashMap<String, String>,
    #[serde(default)]
    pub common_labels: HashMap<String, String>,
    #[serde(default)]
    pub common_annotations: HashMap<String, String>,
    #[serde(rename = "externalURL", default)]
    pub external_url: String,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
#[allow(clippy::missing_docs_in_private_items)]
pub struct Alert {
    pub status: Status,
    #[serde(default)]
    pub labels: HashMap<String, String>,
    #[serde(default)]
    pub annotations: HashMap<String, String>,
    pub starts_at: DateTime<Utc>,
    /// the zero timestamp means the alert is still open, renderers receive it
    /// uninterpreted
    pub ends_at: DateTime<Utc>,
    #[serde(rename = "generatorURL", default)]
    pub generator_url: String,
}

/// the request body was not a valid alert group notification
#[derive(Debug, Error)]
#[error("malformed alertmanager payload: {0}")]
pub struct ParseError(#[from] serde_json::Error);

/// Deserializes the raw webhook request body. Unknown fields are ignored,
/// absent label maps and alert lists default to empty.
pub fn parse(bytes: &[u8]) -> Result<Data, ParseError> {
    Ok(serde_json::from_slice(bytes)?)
}
