//! Assembles per-protocol renderings into the multi-protocol message
//! envelope published to the notification topic.
//!
//! The envelope is a single flat JSON object keyed by protocol name whose
//! values are the renderer outputs. The broker fans it out per subscriber
//! protocol and falls back to the `default` entry for protocols without
//! their own key.

use indexmap::IndexMap;
use serde::Serialize;

use crate::{alert, renderer::Protocol};

/// maximum subject size accepted by the broker, longer subjects are truncated
pub const MAX_SUBJECT_LEN: usize = 100;

/// one rendering per protocol, `default` always present
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct MessageEnvelope(IndexMap<Protocol, String>);

impl MessageEnvelope {
    /// the envelope serialized to the single JSON string the broker expects
    /// as message body
    pub fn to_json(&self) -> String {
        #[allow(clippy::expect_used)]
        serde_json::to_string(self).expect("string map serialization cannot fail")
    }
}

/// Builds the message envelope and its subject line. Inputs are already
/// validated and rendered, so this cannot fail.
pub fn build(
    rendered: IndexMap<Protocol, String>,
    data: &alert::Data,
) -> (MessageEnvelope, String) {
    debug_assert!(rendered.contains_key(&Protocol::Default));

    (MessageEnvelope(rendered), subject(data))
}

/// `"[{STATUS}:{N}] {alertname}"` with the upper-cased group status, the
/// alert count and `commonLabels["alertname"]` (empty string if absent)
fn subject(data: &alert::Data) -> String {
    let alertname = data
        .common_labels
        .get("alertname")
        .map(String::as_str)
        .unwrap_or_default();

    truncate(format!(
        "[{}:{}] {}",
        data.status.as_upper(),
        data.alerts.len(),
        alertname
    ))
}

/// truncate to [MAX_SUBJECT_LEN] bytes on a char boundary
fn truncate(mut subject: String) -> String {
    if subject.len() <= MAX_SUBJECT_LEN {
        return subject;
    }

    let mut end = MAX_SUBJECT_LEN;
    while !subject.is_char_boundary(end) {
        end -= 1;
    }
    subject.truncate(end);

    subject
}
