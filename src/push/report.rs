//! Result aggregation and provider error taxonomy.
//!
//! Every dispatch path ends in a [`DispatchReport`]. Provider rejections are
//! folded into four categories so callers know whether to delete a stored
//! token, page an operator, or just move on.

use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use crate::push::provider::SendOutcome;
use crate::push::token::{self, Platform};

/// Actionable category of a rejected push.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Malformed or never-valid registration. Delete the stored token.
    InvalidToken,
    /// Was valid, now stale. Delete the stored token.
    UnregisteredToken,
    /// Provider credential or project problem. Not the recipient's fault.
    AuthError,
    /// Anything else, assumed transient.
    UnknownError,
}

impl ErrorCategory {
    /// Map a provider error code to its category.
    #[must_use]
    pub fn classify(error_code: &str) -> Self {
        match error_code {
            "INVALID_ARGUMENT"
            | "messaging/invalid-registration-token"
            | "messaging/invalid-argument"
            | "BadDeviceToken" => Self::InvalidToken,
            "UNREGISTERED"
            | "NOT_FOUND"
            | "messaging/registration-token-not-registered"
            | "Unregistered" => Self::UnregisteredToken,
            "THIRD_PARTY_AUTH_ERROR"
            | "SENDER_ID_MISMATCH"
            | "UNAUTHENTICATED"
            | "PERMISSION_DENIED"
            | "messaging/third-party-auth-error"
            | "messaging/mismatched-credential"
            | "messaging/authentication-error"
            | "InvalidProviderToken" => Self::AuthError,
            _ => Self::UnknownError,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InvalidToken => "invalid_token",
            Self::UnregisteredToken => "unregistered_token",
            Self::AuthError => "auth_error",
            Self::UnknownError => "unknown_error",
        }
    }

    /// Whether the caller should remove the stored token.
    #[must_use]
    pub fn should_delete(self) -> bool {
        matches!(self, Self::InvalidToken | Self::UnregisteredToken)
    }
}

/// Outcome for one recipient token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchResult {
    /// Redacted token, safe to log.
    pub token: String,
    /// Apparent platform of the full token.
    pub platform: Platform,
    pub accepted: bool,
    pub message_id: Option<String>,
    pub error_code: Option<String>,
    pub reason: Option<String>,
    /// Set when the full token was a legacy 64-hex APNs token.
    legacy_apns: bool,
}

impl DispatchResult {
    /// Record a provider outcome for `token`. Only the redacted form is kept.
    #[must_use]
    pub fn from_outcome(token: &str, outcome: SendOutcome) -> Self {
        let platform = token::classify(token);
        let legacy_apns = token::is_legacy_apns(token);
        let token = token::redact(token);
        match outcome {
            SendOutcome::Accepted { message_id } => Self {
                token,
                platform,
                accepted: true,
                message_id: Some(message_id),
                error_code: None,
                reason: None,
                legacy_apns,
            },
            SendOutcome::Rejected {
                error_code,
                message,
            } => Self {
                token,
                platform,
                accepted: false,
                message_id: None,
                error_code: Some(error_code),
                reason: Some(message),
                legacy_apns,
            },
        }
    }

    /// Record the outcome of a topic send. Topic names are kept verbatim.
    #[must_use]
    pub fn for_topic(topic: &str, outcome: SendOutcome) -> Self {
        let mut result = Self::from_outcome("", outcome);
        result.token = format!("topic:{topic}");
        result
    }

    /// Category of a rejection; `None` when accepted.
    #[must_use]
    pub fn category(&self) -> Option<ErrorCategory> {
        if self.accepted {
            return None;
        }
        Some(ErrorCategory::classify(
            self.error_code.as_deref().unwrap_or_default(),
        ))
    }

    fn hint(&self, category: ErrorCategory) -> Option<String> {
        let hint = match (category, self.platform) {
            (ErrorCategory::InvalidToken, Platform::Ios) if self.legacy_apns => {
                "looks like an expired or debug-build iOS token"
            }
            (ErrorCategory::InvalidToken, Platform::Unknown) => {
                "token format not recognized for any platform"
            }
            (ErrorCategory::UnregisteredToken, _) => {
                "app was uninstalled or the token was rotated"
            }
            (ErrorCategory::AuthError, _) => "check push credentials and project configuration",
            _ => return None,
        };
        Some(hint.to_string())
    }
}

/// Why a report looks the way it does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchReason {
    /// Every attempted push was accepted.
    Delivered,
    /// Some pushes were accepted, some were not.
    PartiallyDelivered,
    /// Pushes were attempted and none was accepted.
    AllFailed,
    /// Nobody to notify.
    NoRecipients,
    /// The only recipient was the actor.
    SkippedSelf,
    /// The addressed recipient has no registered token.
    NoDeviceToken,
    /// The referenced activity does not exist.
    ActivityNotFound,
    /// The event was rejected before any network call.
    InvalidInput,
}

impl DispatchReason {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Delivered => "delivered",
            Self::PartiallyDelivered => "partially_delivered",
            Self::AllFailed => "all_failed",
            Self::NoRecipients => "no_recipients",
            Self::SkippedSelf => "skipped_self",
            Self::NoDeviceToken => "no_device_token",
            Self::ActivityNotFound => "activity_not_found",
            Self::InvalidInput => "invalid_input",
        }
    }
}

/// A rejected token as surfaced to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedToken {
    /// Redacted token.
    pub token: String,
    pub category: ErrorCategory,
    pub error_code: String,
    pub reason: String,
    pub should_delete: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

/// Summary returned for every dispatch call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchReport {
    pub success: bool,
    pub reason: DispatchReason,
    pub message: String,
    pub notifications_sent: usize,
    pub notifications_failed: usize,
    /// Tokens attempted. Always `notifications_sent + notifications_failed`.
    pub total_recipients: usize,
    pub success_rate: String,
    /// Raw candidates returned by the directory before filtering.
    pub candidates: usize,
    /// Recipients left after filtering.
    pub eligible_recipients: usize,
    /// Whether the directory served the lookup from its fallback path.
    pub degraded: bool,
    pub failed_tokens: Vec<FailedToken>,
}

impl DispatchReport {
    fn empty(success: bool, reason: DispatchReason, message: impl Into<String>) -> Self {
        Self {
            success,
            reason,
            message: message.into(),
            notifications_sent: 0,
            notifications_failed: 0,
            total_recipients: 0,
            success_rate: success_rate(0, 0),
            candidates: 0,
            eligible_recipients: 0,
            degraded: false,
            failed_tokens: Vec::new(),
        }
    }

    /// Nothing to do. Counts as success.
    #[must_use]
    pub fn no_recipients(candidates: usize, degraded: bool) -> Self {
        Self {
            candidates,
            degraded,
            ..Self::empty(true, DispatchReason::NoRecipients, "no recipients")
        }
    }

    /// The actor would have notified themselves. Counts as success.
    #[must_use]
    pub fn skipped_self(message: impl Into<String>) -> Self {
        Self::empty(true, DispatchReason::SkippedSelf, message)
    }

    /// Failure detected before any push was attempted.
    #[must_use]
    pub fn rejected(reason: DispatchReason, message: impl Into<String>) -> Self {
        Self::empty(false, reason, message)
    }
}

/// Format `sent / attempted` as a percentage with two decimals, or `"0%"`
/// when nothing was attempted.
#[must_use]
pub fn success_rate(sent: usize, attempted: usize) -> String {
    if attempted == 0 {
        return "0%".to_string();
    }
    format!("{:.2}%", sent as f64 / attempted as f64 * 100.0)
}

/// Folds per-token outcomes into a [`DispatchReport`].
///
/// Totals are sums over the recorded results, so the order results arrive
/// in does not change the report.
#[derive(Debug, Default)]
pub struct ResultAggregator {
    candidates: usize,
    eligible: usize,
    degraded: bool,
    results: Vec<DispatchResult>,
}

impl ResultAggregator {
    #[must_use]
    pub fn new(candidates: usize, eligible: usize, degraded: bool) -> Self {
        Self {
            candidates,
            eligible,
            degraded,
            results: Vec::with_capacity(eligible),
        }
    }

    pub fn record(&mut self, result: DispatchResult) {
        self.results.push(result);
    }

    pub fn extend(&mut self, results: impl IntoIterator<Item = DispatchResult>) {
        self.results.extend(results);
    }

    /// Produce the final report.
    #[must_use]
    pub fn finish(self) -> DispatchReport {
        let total = self.results.len();
        let sent = self.results.iter().filter(|r| r.accepted).count();
        let failed = total - sent;

        let mut auth_errors = 0usize;
        let failed_tokens: Vec<FailedToken> = self
            .results
            .iter()
            .filter_map(|result| {
                let category = result.category()?;
                if category == ErrorCategory::AuthError {
                    auth_errors += 1;
                }
                Some(FailedToken {
                    token: result.token.clone(),
                    category,
                    error_code: result.error_code.clone().unwrap_or_default(),
                    reason: result.reason.clone().unwrap_or_default(),
                    should_delete: category.should_delete(),
                    hint: result.hint(category),
                })
            })
            .collect();

        if auth_errors > 0 {
            error!(
                auth_errors,
                total, "Push provider rejected credentials; check service account and project"
            );
        }
        if failed > 0 {
            warn!(sent, failed, total, "Some notifications were not delivered");
        }

        let (success, reason, message) = if total == 0 {
            (true, DispatchReason::NoRecipients, "no recipients".to_string())
        } else if failed == 0 {
            (
                true,
                DispatchReason::Delivered,
                format!("Sent {sent} of {total} notifications"),
            )
        } else if sent > 0 {
            (
                true,
                DispatchReason::PartiallyDelivered,
                format!("Sent {sent} of {total} notifications ({failed} failed)"),
            )
        } else {
            (
                false,
                DispatchReason::AllFailed,
                format!("All {total} notifications failed"),
            )
        };

        DispatchReport {
            success,
            reason,
            message,
            notifications_sent: sent,
            notifications_failed: failed,
            total_recipients: total,
            success_rate: success_rate(sent, total),
            candidates: self.candidates,
            eligible_recipients: self.eligible,
            degraded: self.degraded,
            failed_tokens,
        }
    }
}
