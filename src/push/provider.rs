//! Push transport abstraction.
//!
//! A [`PushProvider`] wraps one platform transport. It reports each item as
//! accepted or rejected with the provider's own error code; classification
//! into actionable categories happens in [`crate::push::report`].
//!
//! `Err` from a provider method means the call as a whole failed (credentials
//! could not be minted, the transport is down). Per-token problems are
//! returned as [`SendOutcome::Rejected`] instead.

use async_trait::async_trait;

use crate::error::Result;
use crate::push::payload::NotificationPayload;

/// Error code recorded when a request never produced a provider response.
pub const TRANSPORT_ERROR_CODE: &str = "transport-error";

/// Error code recorded when the dispatch deadline abandoned a request.
pub const TIMEOUT_ERROR_CODE: &str = "timeout";

/// Result of sending to one token or topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// Provider accepted the message.
    Accepted {
        /// Provider-assigned message id.
        message_id: String,
    },
    /// Provider rejected the message.
    Rejected {
        /// Provider error code, e.g. `UNREGISTERED`.
        error_code: String,
        /// Human-readable reason.
        message: String,
    },
}

impl SendOutcome {
    pub fn rejected(error_code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Rejected {
            error_code: error_code.into(),
            message: message.into(),
        }
    }

    #[must_use]
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted { .. })
    }
}

/// Result of one batch call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchResponse {
    pub success_count: usize,
    pub failure_count: usize,
    /// One outcome per input token, in input order.
    pub results: Vec<SendOutcome>,
}

impl BatchResponse {
    /// Build a response, deriving the counts from the outcomes.
    pub fn from_results(results: Vec<SendOutcome>) -> Self {
        let success_count = results.iter().filter(|r| r.is_accepted()).count();
        Self {
            success_count,
            failure_count: results.len() - success_count,
            results,
        }
    }
}

/// A push delivery transport.
#[async_trait]
pub trait PushProvider: Send + Sync {
    /// Short name for logs and metrics.
    fn name(&self) -> &'static str;

    /// Whether credentials and project settings are present.
    fn is_configured(&self) -> bool;

    /// Maximum tokens accepted by one [`PushProvider::send_batch`] call.
    fn batch_limit(&self) -> usize;

    /// Send to a single device token.
    async fn send_one(&self, token: &str, content: &NotificationPayload) -> Result<SendOutcome>;

    /// Send the same content to up to [`PushProvider::batch_limit`] tokens.
    async fn send_batch(
        &self,
        tokens: &[String],
        content: &NotificationPayload,
    ) -> Result<BatchResponse>;

    /// Send to every device subscribed to `topic`.
    async fn send_topic(&self, topic: &str, content: &NotificationPayload)
    -> Result<SendOutcome>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_response_counts() {
        let response = BatchResponse::from_results(vec![
            SendOutcome::Accepted {
                message_id: "projects/p/messages/1".to_string(),
            },
            SendOutcome::rejected("UNREGISTERED", "Requested entity was not found."),
            SendOutcome::Accepted {
                message_id: "projects/p/messages/2".to_string(),
            },
        ]);

        assert_eq!(response.success_count, 2);
        assert_eq!(response.failure_count, 1);
        assert_eq!(response.results.len(), 3);
    }

    #[test]
    fn test_batch_response_empty() {
        let response = BatchResponse::from_results(vec![]);
        assert_eq!(response.success_count, 0);
        assert_eq!(response.failure_count, 0);
    }

    #[test]
    fn test_outcome_helpers() {
        assert!(
            SendOutcome::Accepted {
                message_id: "m".to_string()
            }
            .is_accepted()
        );
        assert!(!SendOutcome::rejected(TIMEOUT_ERROR_CODE, "deadline exceeded").is_accepted());
    }
}
