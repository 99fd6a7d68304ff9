//! Scripted push connector shared by the driver and client tests.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use notify_core::{LocalizedText, NotificationKind, NotificationRecord, Origin, PushEndpoint};
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::link::{LinkError, LinkEvent, PushConnector, PushLink};

pub(crate) enum Outcome {
    Refuse,
    Hang,
    Link(mpsc::UnboundedReceiver<LinkEvent>),
}

/// Each `open` consumes the next scripted outcome; an empty script refuses.
#[derive(Default)]
pub(crate) struct ScriptedConnector {
    script: Mutex<VecDeque<Outcome>>,
    opened: Mutex<Vec<String>>,
    closed: Arc<Mutex<Vec<u16>>>,
}

impl ScriptedConnector {
    pub(crate) fn push(&self, outcome: Outcome) {
        self.script.lock().push_back(outcome);
    }

    /// Scripts a link that stays open and returns the sender feeding it.
    pub(crate) fn push_link(&self) -> mpsc::UnboundedSender<LinkEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.push(Outcome::Link(rx));
        tx
    }

    /// Redacted addresses of every open attempt.
    pub(crate) fn opened(&self) -> Vec<String> {
        self.opened.lock().clone()
    }

    /// Close codes sent by the driver.
    pub(crate) fn closed(&self) -> Vec<u16> {
        self.closed.lock().clone()
    }
}

#[async_trait]
impl PushConnector for ScriptedConnector {
    async fn open(&self, endpoint: &PushEndpoint) -> Result<Box<dyn PushLink>, LinkError> {
        self.opened.lock().push(endpoint.redacted());
        let outcome = self.script.lock().pop_front().unwrap_or(Outcome::Refuse);
        match outcome {
            Outcome::Refuse => Err(LinkError::Connect("connection refused".into())),
            Outcome::Hang => std::future::pending().await,
            Outcome::Link(events) => Ok(Box::new(ScriptedLink {
                events,
                closed: Arc::clone(&self.closed),
            })),
        }
    }
}

struct ScriptedLink {
    events: mpsc::UnboundedReceiver<LinkEvent>,
    closed: Arc<Mutex<Vec<u16>>>,
}

#[async_trait]
impl PushLink for ScriptedLink {
    async fn next_event(&mut self) -> LinkEvent {
        self.events
            .recv()
            .await
            .unwrap_or(LinkEvent::Closed { code: None })
    }

    async fn close(&mut self, code: u16) {
        self.closed.lock().push(code);
    }
}

pub(crate) fn at(minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 9, minute, 0).unwrap()
}

pub(crate) fn snapshot_record(id: &str, minute: u32, read: bool) -> NotificationRecord {
    NotificationRecord {
        id: id.into(),
        kind: NotificationKind::Notification,
        text: LocalizedText {
            primary: format!("message {id}"),
            secondary: String::new(),
        },
        reference: None,
        payload: serde_json::Value::Null,
        timestamp: at(minute),
        read,
        origin: Origin::Snapshot,
    }
}
