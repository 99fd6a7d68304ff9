use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One user-visible notification, whichever source it came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationRecord {
    pub id: String,
    pub kind: NotificationKind,
    pub text: LocalizedText,
    pub reference: Option<TransactionRef>,
    pub payload: serde_json::Value,
    pub timestamp: DateTime<Utc>,
    pub read: bool,
    pub origin: Origin,
}

impl NotificationRecord {
    /// Short code rendered as a badge next to the message, if the payload carries one.
    pub fn badge(&self) -> Option<String> {
        match self.payload.get("code")? {
            serde_json::Value::String(code) if !code.is_empty() => Some(code.clone()),
            serde_json::Value::Number(code) => Some(code.to_string()),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Notification,
    UploadStarted,
    UploadProgress,
    UploadCompleted,
    UploadFailed,
}

impl NotificationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            NotificationKind::Notification => "notification",
            NotificationKind::UploadStarted => "upload_started",
            NotificationKind::UploadProgress => "upload_progress",
            NotificationKind::UploadCompleted => "upload_completed",
            NotificationKind::UploadFailed => "upload_failed",
        }
    }

    pub fn is_upload(self) -> bool {
        !matches!(self, NotificationKind::Notification)
    }

    pub fn from_wire(value: &str) -> Option<Self> {
        match value {
            "notification" => Some(NotificationKind::Notification),
            "upload_started" => Some(NotificationKind::UploadStarted),
            "upload_progress" => Some(NotificationKind::UploadProgress),
            "upload_completed" => Some(NotificationKind::UploadCompleted),
            "upload_failed" => Some(NotificationKind::UploadFailed),
            _ => None,
        }
    }
}

impl fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which source last supplied a record. Merge bookkeeping only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    Push,
    Snapshot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Locale {
    #[default]
    English,
    Arabic,
}

impl FromStr for Locale {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "en" | "eng" | "english" => Ok(Locale::English),
            "ar" | "ara" | "arabic" => Ok(Locale::Arabic),
            other => Err(format!("unsupported locale {other}")),
        }
    }
}

/// Message text in both supported languages: `primary` is English, `secondary` Arabic.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LocalizedText {
    pub primary: String,
    pub secondary: String,
}

impl LocalizedText {
    /// Builds the pair from the wire fields. The untranslated `message` fills
    /// whichever variant the sender left out.
    pub fn from_parts(
        message: Option<&str>,
        english: Option<&str>,
        arabic: Option<&str>,
    ) -> Self {
        let fallback = message.map(str::trim).unwrap_or_default();
        let pick = |value: Option<&str>| {
            value
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .unwrap_or(fallback)
                .to_string()
        };
        Self {
            primary: pick(english),
            secondary: pick(arabic),
        }
    }

    /// Text for the active locale, falling back to the other variant when empty.
    pub fn for_locale(&self, locale: Locale) -> &str {
        let (preferred, other) = match locale {
            Locale::English => (&self.primary, &self.secondary),
            Locale::Arabic => (&self.secondary, &self.primary),
        };
        if preferred.is_empty() {
            other
        } else {
            preferred
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransactionKind {
    #[serde(rename = "FAR")]
    Far,
    #[serde(rename = "AFR")]
    Afr,
    #[serde(rename = "HFR")]
    Hfr,
    #[serde(rename = "DFR")]
    Dfr,
}

impl TransactionKind {
    pub fn code(self) -> &'static str {
        match self {
            TransactionKind::Far => "FAR",
            TransactionKind::Afr => "AFR",
            TransactionKind::Hfr => "HFR",
            TransactionKind::Dfr => "DFR",
        }
    }
}

impl FromStr for TransactionKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_uppercase().as_str() {
            "FAR" => Ok(TransactionKind::Far),
            "AFR" => Ok(TransactionKind::Afr),
            "HFR" => Ok(TransactionKind::Hfr),
            "DFR" => Ok(TransactionKind::Dfr),
            other => Err(format!("unknown transaction kind {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActionKind {
    List,
    Approval,
}

impl ActionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ActionKind::List => "List",
            ActionKind::Approval => "Approval",
        }
    }
}

impl FromStr for ActionKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "list" => Ok(ActionKind::List),
            "approval" => Ok(ActionKind::Approval),
            other => Err(format!("unknown action kind {other}")),
        }
    }
}

/// Business reference used to build a deep link. Fields stay optional because
/// senders routinely omit some of them; [`crate::route::resolve_route`] decides
/// whether enough is present.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TransactionRef {
    pub transaction_id: Option<i64>,
    pub transaction_kind: Option<TransactionKind>,
    pub action_kind: Option<ActionKind>,
}

impl TransactionRef {
    /// Parses the loosely typed wire fields. Returns `None` when nothing usable is present.
    pub fn from_wire(
        transaction_id: Option<i64>,
        transaction_kind: Option<&str>,
        action_kind: Option<&str>,
    ) -> Option<Self> {
        let reference = Self {
            transaction_id,
            transaction_kind: transaction_kind.and_then(|v| v.parse().ok()),
            action_kind: action_kind.and_then(|v| v.parse().ok()),
        };
        if reference == Self::default() {
            None
        } else {
            Some(reference)
        }
    }
}
