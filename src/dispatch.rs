//! Orchestrates one alert group dispatch: validation, per-protocol
//! rendering, envelope construction and the publish call.
//!
//! Returns a typed result for the webhook receiver to map onto response
//! codes, it does not log or write responses itself.

use thiserror::Error;

use crate::{
    alert::{self, ParseError},
    envelope,
    publisher::{PublishError, PublishReceipt, Publisher},
    renderer::{AlertRenderer, RenderError},
};

/// terminal state of a successful dispatch, carries enough context for the
/// caller's log entry
#[derive(Debug)]
pub struct Published {
    pub receipt: PublishReceipt,
    pub group_key: String,
    pub subject: String,
}

#[derive(Debug, Error)]
pub enum DispatchError {
    /// the submitter must fix the request, nothing was published
    #[error("invalid alert payload: {0}")]
    BadRequest(#[from] ParseError),
    /// template configuration defect, nothing was published
    #[error("failed to render alert group {group_key}: {source}")]
    RenderFailure {
        group_key: String,
        #[source]
        source: RenderError,
    },
    /// publish rejected or retries exhausted
    #[error("failed to publish alert group {group_key}: {source}")]
    PublishFailure {
        group_key: String,
        #[source]
        source: PublishError,
    },
}

impl DispatchError {
    /// stable label for metrics and logs
    pub fn kind(&self) -> &'static str {
        match self {
            DispatchError::BadRequest(_) => "bad_request",
            DispatchError::RenderFailure { .. } => "render_failure",
            DispatchError::PublishFailure { .. } => "publish_failure",
        }
    }
}

/// Per-process dispatcher. Holds the read-only template set and the broker
/// client, everything per-request is created fresh inside [dispatch].
///
/// [dispatch]: Dispatcher::dispatch
pub struct Dispatcher {
    renderer: AlertRenderer,
    publisher: Publisher,
}

impl Dispatcher {
    pub fn new(renderer: AlertRenderer, publisher: Publisher) -> Self {
        Self {
            renderer,
            publisher,
        }
    }

    /// Dispatches one raw webhook body to `topic`.
    ///
    /// A render failure for any one protocol fails the whole request before
    /// the publish call, a partial envelope is never published.
    pub async fn dispatch(&self, topic: &str, body: &[u8]) -> Result<Published, DispatchError> {
        let data = alert::parse(body)?;

        let rendered =
            self.renderer
                .render_all(&data)
                .map_err(|source| DispatchError::RenderFailure {
                    group_key: data.group_key.clone(),
                    source,
                })?;

        let (envelope, subject) = envelope::build(rendered, &data);

        let receipt = self
            .publisher
            .publish(topic, &envelope.to_json(), &subject)
            .await
            .map_err(|source| DispatchError::PublishFailure {
                group_key: data.group_key.clone(),
                source,
            })?;

        Ok(Published {
            receipt,
            group_key: data.group_key,
            subject,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;

    use super::*;
    use crate::{
        publisher::{AttemptError, PublishApi, RetrySettings},
        renderer::Protocol,
    };

    /// records every accepted publish call
    struct RecordingApi {
        calls: Mutex<Vec<(String, String, String)>>,
    }

    impl RecordingApi {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                calls: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> Vec<(String, String, String)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl PublishApi for RecordingApi {
        async fn publish_once(
            &self,
            topic: &str,
            body: &str,
            subject: &str,
        ) -> Result<String, AttemptError> {
            let mut calls = self.calls.lock().unwrap();
            calls.push((topic.to_owned(), body.to_owned(), subject.to_owned()));
            Ok(format!("msg-{}", calls.len()))
        }
    }

    fn renderer() -> AlertRenderer {
        AlertRenderer::from_raw_templates([
            (
                Protocol::Default,
                "[{{ status | upper }}:{{ alerts | length }}] {{ commonLabels.alertname | default(value=\"\") }}",
            ),
            (Protocol::Email, "email for {{ commonLabels.alertname }}"),
            (Protocol::Sms, "sms for {{ commonLabels.alertname }}"),
        ])
        .unwrap()
    }

    fn dispatcher(api: Arc<RecordingApi>) -> Dispatcher {
        Dispatcher::new(
            renderer(),
            Publisher::new(Box::new(api), RetrySettings::default()),
        )
    }

    fn payload(alertname: &str) -> Vec<u8> {
        format!(
            r#"{{
                "version": "4",
                "groupKey": "group-{alertname}",
                "status": "firing",
                "receiver": "sns",
                "commonLabels": {{ "alertname": "{alertname}" }},
                "externalURL": "http://am",
                "alerts": [
                    {{
                        "status": "firing",
                        "startsAt": "2022-05-10T09:00:00Z",
                        "endsAt": "0001-01-01T00:00:00Z"
                    }}
                ]
            }}"#
        )
        .into_bytes()
    }

    #[tokio::test]
    async fn dispatch_publishes_the_protocol_envelope() {
        let api = RecordingApi::new();
        let dispatcher = dispatcher(Arc::clone(&api));

        let published = dispatcher
            .dispatch("arn:topic", &payload("HighCPU"))
            .await
            .unwrap();

        assert_eq!(published.subject, "[FIRING:1] HighCPU");
        assert_eq!(published.group_key, "group-HighCPU");
        assert_eq!(published.receipt.attempts, 1);

        let calls = api.calls();
        assert_eq!(calls.len(), 1);
        let (topic, body, subject) = &calls[0];
        assert_eq!(topic, "arn:topic");
        assert_eq!(subject, "[FIRING:1] HighCPU");

        let envelope: serde_json::Value = serde_json::from_str(body).unwrap();
        assert_eq!(envelope["default"], "[FIRING:1] HighCPU");
        assert_eq!(envelope["email"], "email for HighCPU");
        assert_eq!(envelope["sms"], "sms for HighCPU");
    }

    #[tokio::test]
    async fn malformed_body_is_rejected_before_publishing() {
        let api = RecordingApi::new();
        let dispatcher = dispatcher(Arc::clone(&api));

        let err = dispatcher
            .dispatch("arn:topic", br#"{ "alerts": "not-a-list" }"#)
            .await
            .unwrap_err();

        assert!(matches!(err, DispatchError::BadRequest(_)));
        assert_eq!(err.kind(), "bad_request");
        assert!(api.calls().is_empty());
    }

    #[tokio::test]
    async fn render_failure_of_one_protocol_fails_the_whole_dispatch() {
        let api = RecordingApi::new();
        let dispatcher = Dispatcher::new(
            AlertRenderer::from_raw_templates([
                (Protocol::Default, "ok"),
                (Protocol::Email, "{{ no_such_field }}"),
                (Protocol::Sms, "ok"),
            ])
            .unwrap(),
            Publisher::new(Box::new(Arc::clone(&api)), RetrySettings::default()),
        );

        let err = dispatcher
            .dispatch("arn:topic", &payload("HighCPU"))
            .await
            .unwrap_err();

        match err {
            DispatchError::RenderFailure { group_key, source } => {
                assert_eq!(group_key, "group-HighCPU");
                assert_eq!(source.protocol, Protocol::Email);
            }
            other => panic!("expected RenderFailure, got {other:?}"),
        }
        assert!(api.calls().is_empty());
    }

    #[tokio::test]
    async fn concurrent_dispatches_are_independent() {
        let api = RecordingApi::new();
        let dispatcher = Arc::new(dispatcher(Arc::clone(&api)));

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let dispatcher = Arc::clone(&dispatcher);
                tokio::spawn(async move {
                    let alertname = format!("Alert{i}");
                    let published = dispatcher
                        .dispatch(&format!("arn:topic-{i}"), &payload(&alertname))
                        .await
                        .unwrap();
                    (alertname, published)
                })
            })
            .collect();

        for handle in handles {
            let (alertname, published) = handle.await.unwrap();

            assert_eq!(published.subject, format!("[FIRING:1] {alertname}"));
            assert_eq!(published.group_key, format!("group-{alertname}"));
        }

        // every recorded call must pair its own subject with its own envelope
        let calls = api.calls();
        assert_eq!(calls.len(), 8);
        for (_, body, subject) in calls {
            let envelope: serde_json::Value = serde_json::from_str(&body).unwrap();
            let alertname = subject.trim_start_matches("[FIRING:1] ");

            assert_eq!(envelope["email"], format!("email for {alertname}"));
            assert_eq!(envelope["sms"], format!("sms for {alertname}"));
        }
    }
}
