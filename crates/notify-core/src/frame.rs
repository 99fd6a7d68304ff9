//! Decoding of push frames into [`NotificationRecord`]s.
//!
//! Every frame yields at most one record. Frames that fail to decode or carry
//! a `type` this client does not know are reported as [`FrameError`] so the
//! caller can log and drop them without touching the connection.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Deserialize;
use thiserror::Error;

use crate::record::{LocalizedText, NotificationKind, NotificationRecord, Origin, TransactionRef};

pub const HANDSHAKE_TYPE: &str = "connection_established";

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("frame has no type discriminator")]
    MissingType,
    #[error("unknown frame type {0}")]
    UnknownType(String),
}

/// Wire shape of an inbound frame. Field names follow the server verbatim,
/// including its spelling of `type_of_Trasnction`.
#[derive(Debug, Deserialize)]
struct InboundFrame {
    #[serde(rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    id: Option<serde_json::Value>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    eng_message: Option<String>,
    #[serde(default)]
    ara_message: Option<String>,
    #[serde(rename = "Transaction_id", default)]
    transaction_id: Option<serde_json::Value>,
    #[serde(rename = "type_of_Trasnction", default)]
    transaction_kind: Option<String>,
    #[serde(rename = "Type_of_action", default)]
    action_kind: Option<String>,
    #[serde(default)]
    data: Option<serde_json::Value>,
    #[serde(default)]
    timestamp: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Routed {
    /// Server acknowledged the session; connection bookkeeping only.
    Handshake { message: Option<String> },
    Record(NotificationRecord),
}

/// Turns frames into records and synthesises identities for frames that
/// arrive without one.
#[derive(Debug, Default)]
pub struct MessageRouter {
    local_counter: u64,
}

impl MessageRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route(&mut self, text: &str, received_at: DateTime<Utc>) -> Result<Routed, FrameError> {
        let frame: InboundFrame = serde_json::from_str(text)?;
        let kind_raw = frame
            .kind
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .ok_or(FrameError::MissingType)?;

        if kind_raw == HANDSHAKE_TYPE {
            return Ok(Routed::Handshake {
                message: frame.message,
            });
        }
        let kind = NotificationKind::from_wire(kind_raw)
            .ok_or_else(|| FrameError::UnknownType(kind_raw.to_string()))?;

        let sent_at = frame.timestamp.as_deref().and_then(parse_timestamp);
        let reference = TransactionRef::from_wire(
            frame.transaction_id.as_ref().and_then(lenient_i64),
            frame.transaction_kind.as_deref(),
            frame.action_kind.as_deref(),
        );
        let payload = frame.data.unwrap_or(serde_json::Value::Null);
        let id = match frame.id.as_ref().and_then(identity_from_value) {
            Some(id) => id,
            None => self.synthesize_id(kind, reference.as_ref(), &payload, sent_at, received_at),
        };

        Ok(Routed::Record(NotificationRecord {
            id,
            kind,
            text: LocalizedText::from_parts(
                frame.message.as_deref(),
                frame.eng_message.as_deref(),
                frame.ara_message.as_deref(),
            ),
            reference,
            payload,
            timestamp: sent_at.unwrap_or(received_at),
            read: false,
            origin: Origin::Push,
        }))
    }

    /// Identity for frames without an `id`. Stable inputs first so a redelivered
    /// frame maps onto the same record; the receipt-time form is the last resort.
    /// Message text is never an input.
    ///
    /// Upload ids carry the kind, so progress updates replace each other while
    /// a later `upload_failed` stays a record of its own. A reference id is only
    /// stable with a send time; without one every frame is a new event.
    fn synthesize_id(
        &mut self,
        kind: NotificationKind,
        reference: Option<&TransactionRef>,
        payload: &serde_json::Value,
        sent_at: Option<DateTime<Utc>>,
        received_at: DateTime<Utc>,
    ) -> String {
        if kind.is_upload() {
            if let Some(upload) = payload.get("upload_id").and_then(identity_from_value) {
                return format!("upload:{upload}:{kind}");
            }
        }
        if let (Some(reference), Some(sent_at)) = (reference, sent_at) {
            return format!(
                "ref:{}:{}:{}:{}:{}",
                kind,
                reference.transaction_kind.map(|k| k.code()).unwrap_or("-"),
                reference
                    .transaction_id
                    .map(|id| id.to_string())
                    .unwrap_or_else(|| "-".into()),
                reference.action_kind.map(|a| a.as_str()).unwrap_or("-"),
                sent_at.timestamp_millis(),
            );
        }
        self.local_counter += 1;
        format!(
            "local:{}:{}",
            received_at.timestamp_millis(),
            self.local_counter
        )
    }
}

fn identity_from_value(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

pub(crate) fn lenient_i64(value: &serde_json::Value) -> Option<i64> {
    match value {
        serde_json::Value::Number(n) => n.as_i64(),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// RFC 3339, or a naive ISO-8601 timestamp read as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}
