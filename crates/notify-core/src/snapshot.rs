use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::warn;

use crate::frame::{lenient_i64, parse_timestamp};
use crate::record::{LocalizedText, NotificationKind, NotificationRecord, Origin, TransactionRef};

/// One row of the REST notification listing.
#[derive(Debug, Clone, Deserialize)]
pub struct SnapshotItem {
    #[serde(default)]
    pub id: Option<serde_json::Value>,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub eng_message: Option<String>,
    #[serde(default)]
    pub ara_message: Option<String>,
    #[serde(default)]
    pub is_read: bool,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(rename = "Transaction_id", default)]
    pub transaction_id: Option<serde_json::Value>,
    #[serde(rename = "type_of_Trasnction", default)]
    pub transaction_kind: Option<String>,
    #[serde(rename = "Type_of_action", default)]
    pub action_kind: Option<String>,
    #[serde(default)]
    pub data: Option<serde_json::Value>,
}

impl SnapshotItem {
    /// Rows without a usable id cannot be reconciled and are skipped.
    pub fn into_record(self, fetched_at: DateTime<Utc>) -> Option<NotificationRecord> {
        let id = match self.id.as_ref() {
            Some(serde_json::Value::Number(n)) => n.to_string(),
            Some(serde_json::Value::String(s)) if !s.trim().is_empty() => s.trim().to_string(),
            _ => {
                warn!(target = "notify.snapshot", "snapshot row without id skipped");
                return None;
            }
        };
        let kind = self
            .kind
            .as_deref()
            .and_then(NotificationKind::from_wire)
            .unwrap_or(NotificationKind::Notification);
        let timestamp = self
            .created_at
            .as_deref()
            .and_then(parse_timestamp)
            .unwrap_or(fetched_at);
        Some(NotificationRecord {
            id,
            kind,
            text: LocalizedText::from_parts(
                self.message.as_deref(),
                self.eng_message.as_deref(),
                self.ara_message.as_deref(),
            ),
            reference: TransactionRef::from_wire(
                self.transaction_id.as_ref().and_then(lenient_i64),
                self.transaction_kind.as_deref(),
                self.action_kind.as_deref(),
            ),
            payload: self.data.unwrap_or(serde_json::Value::Null),
            timestamp,
            read: self.is_read,
            origin: Origin::Snapshot,
        })
    }
}

/// Listing response: either the paginated envelope or a bare array.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum SnapshotBody {
    Paged {
        #[serde(default)]
        count: Option<u64>,
        #[serde(default)]
        next: Option<String>,
        results: Vec<SnapshotItem>,
    },
    Bare(Vec<SnapshotItem>),
}

#[derive(Debug, Clone, Default)]
pub struct SnapshotPage {
    pub records: Vec<NotificationRecord>,
    pub next: Option<String>,
    pub count: Option<u64>,
}

impl SnapshotBody {
    pub fn into_page(self, fetched_at: DateTime<Utc>) -> SnapshotPage {
        let (items, next, count) = match self {
            SnapshotBody::Paged {
                count,
                next,
                results,
            } => (results, next.filter(|n| !n.is_empty()), count),
            SnapshotBody::Bare(items) => (items, None, None),
        };
        SnapshotPage {
            records: items
                .into_iter()
                .filter_map(|item| item.into_record(fetched_at))
                .collect(),
            next,
            count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn decodes_paged_listing() {
        let body: SnapshotBody = serde_json::from_str(
            r#"{
                "count": 2,
                "next": "http://api/notifications/?page=2",
                "previous": null,
                "results": [
                    {"id": 7, "message": "Hi", "is_read": true, "created_at": "2024-01-01T10:00:00Z"},
                    {"message": "no id", "is_read": false}
                ]
            }"#,
        )
        .expect("body");
        let page = body.into_page(Utc::now());
        assert_eq!(page.count, Some(2));
        assert!(page.next.is_some());
        assert_eq!(page.records.len(), 1);
        let record = &page.records[0];
        assert_eq!(record.id, "7");
        assert!(record.read);
        assert_eq!(record.origin, Origin::Snapshot);
        assert_eq!(
            record.timestamp,
            Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap()
        );
    }

    #[test]
    fn decodes_bare_listing() {
        let body: SnapshotBody =
            serde_json::from_str(r#"[{"id": "n-1", "type": "upload_completed", "is_read": false}]"#)
                .expect("body");
        let page = body.into_page(Utc::now());
        assert_eq!(page.next, None);
        assert_eq!(page.records[0].kind, NotificationKind::UploadCompleted);
    }
}
