//! Publisher adapter in front of the pub/sub broker.
//!
//! The broker itself sits behind the narrow [PublishApi] trait (one publish
//! attempt, outcome already classified). [Publisher] adds the retry policy:
//! transient failures are retried a bounded number of times with exponential
//! backoff, permanent failures surface immediately.

use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use backoff::{backoff::Backoff, ExponentialBackoff, ExponentialBackoffBuilder};
use serde::Deserialize;
use serde_with::{serde_as, DurationSeconds};
use thiserror::Error;

/// a single publish attempt against the broker
///
/// Implementations classify their own failures: [AttemptError::Transient]
/// may be retried, [AttemptError::Permanent] may not.
#[async_trait]
pub trait PublishApi: Send + Sync {
    async fn publish_once(
        &self,
        topic: &str,
        body: &str,
        subject: &str,
    ) -> Result<String, AttemptError>;
}

#[async_trait]
impl<A: PublishApi + ?Sized> PublishApi for std::sync::Arc<A> {
    async fn publish_once(
        &self,
        topic: &str,
        body: &str,
        subject: &str,
    ) -> Result<String, AttemptError> {
        (**self).publish_once(topic, body, subject).await
    }
}

/// classified outcome of a single publish attempt
#[derive(Debug, Error)]
pub enum AttemptError {
    /// throttling, timeouts, connection or internal service errors
    #[error("transient broker error: {0}")]
    Transient(anyhow::Error),
    /// invalid topic, malformed request, authorization failure
    #[error("permanent broker error: {0}")]
    Permanent(anyhow::Error),
}

/// successful publish
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishReceipt {
    /// message id assigned by the broker
    pub message_id: String,
    /// number of attempts needed
    pub attempts: u32,
}

#[derive(Debug, Error)]
pub enum PublishError {
    /// retries exhausted
    #[error("publish failed after {attempts} attempt(s): {source}")]
    Transient { attempts: u32, source: anyhow::Error },
    /// not retried
    #[error("publish rejected by broker: {source}")]
    Permanent { source: anyhow::Error },
}

#[serde_as]
#[derive(Debug, Clone, Copy, Deserialize)]
/// retry policy for transient publish failures
pub struct RetrySettings {
    /// total attempt budget per request, including the first attempt
    pub max_attempts: u32,
    /// upper bound for a single publish attempt
    #[serde_as(as = "DurationSeconds<f64>")]
    pub attempt_timeout: Duration,
    /// duration of the first backoff interval
    #[serde_as(as = "DurationSeconds<f64>")]
    pub starting_interval: Duration,
    /// maximum duration of a single backoff interval
    #[serde_as(as = "DurationSeconds<f64>")]
    pub max_interval: Duration,
    /// the factor by which to increase each next backoff interval until
    /// `max_interval` is reached
    pub multiplier: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            attempt_timeout: Duration::from_secs(5),
            starting_interval: Duration::from_millis(500),
            max_interval: Duration::from_secs(2),
            multiplier: 2.0,
        }
    }
}

impl RetrySettings {
    /// construct an `ExponentialBackoff` by the configured settings
    fn build(&self) -> ExponentialBackoff {
        ExponentialBackoffBuilder::default()
            .with_max_elapsed_time(None)
            .with_initial_interval(self.starting_interval)
            .with_max_interval(self.max_interval)
            .with_multiplier(self.multiplier)
            .with_randomization_factor(0_f64)
            .build()
    }
}

/// retrying publisher, shared read-only across requests
pub struct Publisher {
    api: Box<dyn PublishApi>,
    settings: RetrySettings,
}

impl Publisher {
    pub fn new(api: Box<dyn PublishApi>, settings: RetrySettings) -> Self {
        Self { api, settings }
    }

    /// Publishes `body` under `subject` to `topic`.
    ///
    /// Retries synchronously on transient failures until the attempt budget
    /// is spent. An attempt exceeding `attempt_timeout` counts as transient.
    pub async fn publish(
        &self,
        topic: &str,
        body: &str,
        subject: &str,
    ) -> Result<PublishReceipt, PublishError> {
        let max_attempts = self.settings.max_attempts.max(1);
        let mut backoff = self.settings.build();
        let mut attempt = 0;

        loop {
            attempt += 1;

            let result = match tokio::time::timeout(
                self.settings.attempt_timeout,
                self.api.publish_once(topic, body, subject),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(AttemptError::Transient(anyhow!(
                    "publish attempt timed out after {:?}",
                    self.settings.attempt_timeout
                ))),
            };

            match result {
                Ok(message_id) => {
                    return Ok(PublishReceipt {
                        message_id,
                        attempts: attempt,
                    })
                }
                Err(AttemptError::Permanent(source)) => {
                    return Err(PublishError::Permanent { source })
                }
                Err(AttemptError::Transient(source)) => {
                    if attempt >= max_attempts {
                        return Err(PublishError::Transient {
                            attempts: attempt,
                            source,
                        });
                    }

                    #[allow(clippy::expect_used)]
                    let delay = backoff
                        .next_backoff()
                        .expect("ExponentialBackoff configured with infinite backoffs");

                    tracing::debug!(
                        "transient publish failure on attempt {attempt}, retrying in {delay:?}: {source}"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}
