//! Request and outcome types for a single send.

use chrono::TimeDelta;
use serde::{Deserialize, Serialize};

use crate::error::DispatchError;

/// The acting candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerProfile {
    pub owner_id: String,
    pub display_name: String,
    pub email: String,
}

/// One message to one target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchRequest {
    pub target_id: String,
    pub target_name: String,
    pub recipient_address: String,
    pub subject: String,
    pub body: String,
    pub owner: OwnerProfile,
}

/// Why a request was not attempted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// A required field was blank.
    Invalid(String),
    /// The recipient opted out.
    Unsubscribed,
    /// The owner sent to this target too recently.
    Cooldown {
        retry_after: TimeDelta,
        retry_after_days: i64,
    },
    /// The target has no contact address.
    MissingAddress,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Invalid(field) => write!(f, "Missing {field}"),
            Self::Unsubscribed => write!(f, "Recipient has unsubscribed"),
            Self::Cooldown {
                retry_after_days, ..
            } => {
                let unit = if *retry_after_days == 1 { "day" } else { "days" };
                write!(f, "Already contacted recently, try again in {retry_after_days} {unit}")
            }
            Self::MissingAddress => write!(f, "No contact email on file"),
        }
    }
}

/// Result of one send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Sent { message_id: String },
    Skipped(SkipReason),
    Failed(DispatchError),
}

impl DispatchOutcome {
    pub fn is_sent(&self) -> bool {
        matches!(self, Self::Sent { .. })
    }

    /// Short label for progress reporting.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Sent { .. } => "sent",
            Self::Skipped(_) => "skipped",
            Self::Failed(_) => "failed",
        }
    }

    /// User-facing description of a non-sent outcome.
    pub fn describe(&self) -> Option<String> {
        match self {
            Self::Sent { .. } => None,
            Self::Skipped(reason) => Some(reason.to_string()),
            Self::Failed(err) => Some(err.user_message()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cooldown_reason_reads_in_days() {
        let one = SkipReason::Cooldown {
            retry_after: TimeDelta::hours(3),
            retry_after_days: 1,
        };
        assert_eq!(one.to_string(), "Already contacted recently, try again in 1 day");

        let many = SkipReason::Cooldown {
            retry_after: TimeDelta::days(13),
            retry_after_days: 14,
        };
        assert!(many.to_string().ends_with("14 days"));
    }

    #[test]
    fn labels_and_descriptions() {
        let sent = DispatchOutcome::Sent {
            message_id: "m1".into(),
        };
        assert!(sent.is_sent());
        assert_eq!(sent.label(), "sent");
        assert!(sent.describe().is_none());

        let skipped = DispatchOutcome::Skipped(SkipReason::Unsubscribed);
        assert_eq!(skipped.label(), "skipped");
        assert_eq!(skipped.describe().unwrap(), "Recipient has unsubscribed");

        let failed = DispatchOutcome::Failed(DispatchError::Timeout);
        assert_eq!(failed.label(), "failed");
        assert!(failed.describe().is_some());
    }
}
