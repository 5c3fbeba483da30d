//! Notification models

use serde::{Deserialize, Serialize};

/// Delivery channel for outbound notifications
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NotificationChannel {
    Email,
    Groupme,
}

impl NotificationChannel {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationChannel::Email => "email",
            NotificationChannel::Groupme => "groupme",
        }
    }
}

/// Outcome of a delivery attempt
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Sent,
    Failed,
    Skipped,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Sent => "sent",
            DeliveryStatus::Failed => "failed",
            DeliveryStatus::Skipped => "skipped",
        }
    }
}

/// GroupMe rejects bot messages longer than this
pub const GROUPME_MAX_MESSAGE_LEN: usize = 1000;

/// Shorten text to fit a GroupMe bot message, appending an ellipsis when cut
pub fn truncate_for_groupme(text: &str) -> String {
    if text.chars().count() <= GROUPME_MAX_MESSAGE_LEN {
        return text.to_string();
    }
    let mut out: String = text.chars().take(GROUPME_MAX_MESSAGE_LEN - 1).collect();
    out.push('…');
    out
}
