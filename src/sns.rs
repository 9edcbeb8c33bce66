//! AWS SNS implementation of the publish api.
//!
//! The only module that touches SDK types. Failures are classified here so
//! the retry policy in [publisher](crate::publisher) stays broker-agnostic.

use anyhow::anyhow;
use async_trait::async_trait;
use aws_config::meta::region::RegionProviderChain;
use aws_sdk_sns::{
    error::{PublishError, PublishErrorKind},
    types::SdkError,
    Client, Region,
};
use serde::Deserialize;

use crate::publisher::{AttemptError, PublishApi};

#[derive(Debug, Clone, Deserialize)]
pub struct SnsSettings {
    /// falls back to the ambient AWS environment if unset
    pub region: Option<String>,
}

/// SNS client handle, constructed once at startup and shared across requests
pub struct SnsApi {
    client: Client,
}

impl SnsApi {
    pub async fn new(settings: &SnsSettings) -> Self {
        let region = RegionProviderChain::first_try(settings.region.clone().map(Region::new))
            .or_default_provider();
        let config = aws_config::from_env().region(region).load().await;

        Self {
            client: Client::new(&config),
        }
    }
}

#[async_trait]
impl PublishApi for SnsApi {
    async fn publish_once(
        &self,
        topic: &str,
        body: &str,
        subject: &str,
    ) -> Result<String, AttemptError> {
        // MessageStructure=json makes SNS fan the envelope out per
        // subscriber protocol
        let result = self
            .client
            .publish()
            .topic_arn(topic)
            .subject(subject)
            .message(body)
            .message_structure("json")
            .send()
            .await;

        match result {
            Ok(output) => Ok(output.message_id().unwrap_or_default().to_owned()),
            Err(err) => Err(classify(err)),
        }
    }
}

/// Splits sdk errors into transient (retryable) and permanent failures.
/// Throttling, internal service errors and anything that never produced a
/// service response are transient, every other service rejection (bad topic,
/// invalid parameters, authorization) is permanent.
fn classify(err: SdkError<PublishError>) -> AttemptError {
    let transient = match &err {
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) | SdkError::ResponseError { .. } => {
            true
        }
        SdkError::ServiceError { err, .. } => matches!(
            err.kind,
            PublishErrorKind::ThrottledException(_) | PublishErrorKind::InternalErrorException(_)
        ),
        _ => false,
    };

    if transient {
        AttemptError::Transient(anyhow!(err))
    } else {
        AttemptError::Permanent(anyhow!(err))
    }
}
