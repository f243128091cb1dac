//! Status Reporter (§4.8): best-effort HTTP lifecycle notifications.

use backoff::{future::retry_notify, ExponentialBackoff};
use derive_more::{Display, Error as DeriveError};
use serde::Serialize;
use url::Url;

use crate::logging::log;

/// Lifecycle stage reported to `statusCallbackUrl` (§4.8).
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Joining,
    AwaitingAdmission,
    Active,
    Completed,
    Failed,
}

/// Payload POSTed at each stage transition.
#[derive(Clone, Debug, Serialize)]
pub struct StatusPayload {
    pub stage: Stage,
    pub meeting_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extra: Option<serde_json::Value>,
}

/// Errors from a single delivery attempt.
#[derive(Debug, Display, DeriveError)]
pub enum DeliveryError {
    #[display(fmt = "Failed to perform status callback request: {}", _0)]
    RequestFailed(reqwest::Error),

    #[display(fmt = "Status callback responded with bad status: {}", _0)]
    BadStatus(#[error(not(source))] reqwest::StatusCode),
}

impl DeliveryError {
    /// Classifies this error as transient (worth retrying) or permanent,
    /// per §4.8 / §7's transient-I/O policy: network failures and 5xx/408/429
    /// responses are retried, anything else is not.
    fn into_backoff(self) -> backoff::Error<Self> {
        let transient = match &self {
            Self::RequestFailed(e) => !e.is_builder() && !e.is_redirect(),
            Self::BadStatus(status) => {
                status.is_server_error()
                    || *status == reqwest::StatusCode::REQUEST_TIMEOUT
                    || *status == reqwest::StatusCode::TOO_MANY_REQUESTS
            }
        };
        if transient {
            backoff::Error::Transient(self)
        } else {
            backoff::Error::Permanent(self)
        }
    }
}

/// Reports worker lifecycle stages to an external bot-manager, best-effort.
#[derive(Clone, Debug)]
pub struct StatusReporter {
    client: reqwest::Client,
    callback_url: Option<Url>,
    meeting_id: String,
}

impl StatusReporter {
    #[must_use]
    pub fn new(callback_url: Option<Url>, meeting_id: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            callback_url,
            meeting_id: meeting_id.into(),
        }
    }

    /// Reports `stage`, retrying transient failures up to 3 times with
    /// exponential backoff (§4.8). Never fails the caller: delivery is
    /// best-effort and failures are logged, not propagated (§7 "reports are
    /// best-effort; failure to deliver does not block shutdown").
    pub async fn report(&self, stage: Stage, reason: Option<String>, extra: Option<serde_json::Value>) {
        let Some(url) = self.callback_url.clone() else {
            return;
        };

        let payload = StatusPayload {
            stage,
            meeting_id: self.meeting_id.clone(),
            reason,
            extra,
        };

        let backoff = ExponentialBackoff {
            max_elapsed_time: Some(std::time::Duration::from_secs(15)),
            ..ExponentialBackoff::default()
        };

        let outcome = retry_notify(
            backoff,
            || self.attempt(&url, &payload),
            |err, dur| {
                log::warn!(
                    "Retrying status callback ({:?}) in {:?} due to: {}",
                    payload.stage,
                    dur,
                    err,
                );
            },
        )
        .await;

        if let Err(e) = outcome {
            log::error!("Failed to deliver status callback {:?}: {}", stage, e);
        }
    }

    async fn attempt(
        &self,
        url: &Url,
        payload: &StatusPayload,
    ) -> Result<(), backoff::Error<DeliveryError>> {
        let resp = self
            .client
            .post(url.clone())
            .json(payload)
            .send()
            .await
            .map_err(|e| DeliveryError::RequestFailed(e).into_backoff())?;

        if !resp.status().is_success() {
            return Err(DeliveryError::BadStatus(resp.status()).into_backoff());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bad_status_5xx_is_transient() {
        let err = DeliveryError::BadStatus(reqwest::StatusCode::BAD_GATEWAY);
        assert!(matches!(err.into_backoff(), backoff::Error::Transient(_)));
    }

    #[test]
    fn bad_status_4xx_is_permanent() {
        let err = DeliveryError::BadStatus(reqwest::StatusCode::BAD_REQUEST);
        assert!(matches!(err.into_backoff(), backoff::Error::Permanent(_)));
    }

    #[test]
    fn no_callback_url_is_a_silent_noop() {
        // Just exercises construction; `report` with no URL returns without
        // sending anything, covered by the `awaiting-admission` scenario
        // where a worker runs with no bot-manager attached.
        let _reporter = StatusReporter::new(None, "meeting-1");
    }
}
