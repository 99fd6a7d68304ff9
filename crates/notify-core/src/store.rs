//! In-memory merge of the REST snapshot and the push stream.
//!
//! The store keeps three inputs (the last applied snapshot, push-origin
//! records, and locally pending mutations) and derives the merged, ordered
//! list from them after every change. Nothing derived is cached apart from
//! that list; the unread count is always computed from it.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{debug, trace};

use crate::record::{NotificationKind, NotificationRecord};

pub const DEFAULT_MAX_PUSH_RECORDS: usize = 500;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("unknown notification {0}")]
    UnknownNotification(String),
}

/// Issued before a snapshot request goes out. Responses are applied in ticket
/// order; a response overtaken by a newer one is discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct SnapshotTicket(u64);

pub type MutationId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationKind {
    MarkRead,
    Delete,
}

/// Handle for one optimistic mutation, consumed by `confirm*` or `rollback*`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationTicket {
    pub id: MutationId,
    pub kind: MutationKind,
    pub ids: Vec<String>,
    /// Store session the mutation began in; stale after `clear()`.
    epoch: u64,
}

/// Kind and timestamp of one event. Two records with the same id and
/// fingerprint are the same event delivered twice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Fingerprint {
    kind: NotificationKind,
    timestamp: DateTime<Utc>,
}

impl Fingerprint {
    fn of(record: &NotificationRecord) -> Self {
        Self {
            kind: record.kind,
            timestamp: record.timestamp,
        }
    }

    fn matches(&self, record: &NotificationRecord) -> bool {
        *self == Self::of(record)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Mark {
    mutation: MutationId,
    /// Snapshot tickets issued up to this sequence predate the confirmation.
    confirmed_at: Option<u64>,
}

#[derive(Debug, Clone, Default)]
struct Pending {
    read: Option<Mark>,
    delete: Option<Mark>,
}

impl Pending {
    fn is_empty(&self) -> bool {
        self.read.is_none() && self.delete.is_none()
    }

    fn slot(&mut self, kind: MutationKind) -> &mut Option<Mark> {
        match kind {
            MutationKind::MarkRead => &mut self.read,
            MutationKind::Delete => &mut self.delete,
        }
    }
}

/// Immutable merged list handed to observers.
#[derive(Debug, Clone, PartialEq)]
pub struct NotificationView {
    records: Arc<[NotificationRecord]>,
}

impl Default for NotificationView {
    fn default() -> Self {
        Self {
            records: Arc::from(Vec::new()),
        }
    }
}

impl NotificationView {
    pub fn records(&self) -> &[NotificationRecord] {
        &self.records
    }

    pub fn unread_count(&self) -> usize {
        unread_in(&self.records)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[derive(Debug)]
pub struct ReconciliationStore {
    snapshot: HashMap<String, NotificationRecord>,
    push: HashMap<String, NotificationRecord>,
    pending: HashMap<String, Pending>,
    deleted: HashMap<String, Fingerprint>,
    merged: Vec<NotificationRecord>,
    max_push_records: usize,
    issued_tickets: u64,
    applied_ticket: u64,
    accept_from: u64,
    next_mutation: MutationId,
    epoch: u64,
}

impl Default for ReconciliationStore {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_PUSH_RECORDS)
    }
}

impl ReconciliationStore {
    pub fn new(max_push_records: usize) -> Self {
        Self {
            snapshot: HashMap::new(),
            push: HashMap::new(),
            pending: HashMap::new(),
            deleted: HashMap::new(),
            merged: Vec::new(),
            max_push_records: max_push_records.max(1),
            issued_tickets: 0,
            applied_ticket: 0,
            accept_from: 0,
            next_mutation: 0,
            epoch: 0,
        }
    }

    /// Merged records, newest first.
    pub fn records(&self) -> &[NotificationRecord] {
        &self.merged
    }

    pub fn view(&self) -> NotificationView {
        NotificationView {
            records: self.merged.clone().into(),
        }
    }

    pub fn unread_count(&self) -> usize {
        unread_in(&self.merged)
    }

    pub fn get(&self, id: &str) -> Option<&NotificationRecord> {
        self.merged.iter().find(|record| record.id == id)
    }

    /// Whether a local mutation for `id` is still overriding remote data.
    pub fn is_pending(&self, id: &str) -> bool {
        self.pending.contains_key(id)
    }

    pub fn begin_snapshot(&mut self) -> SnapshotTicket {
        self.issued_tickets += 1;
        SnapshotTicket(self.issued_tickets)
    }

    /// Replaces the snapshot with `records`. Returns `false` (and changes
    /// nothing) if a newer snapshot was already applied or the store was
    /// cleared after the ticket was issued.
    pub fn apply_snapshot(
        &mut self,
        ticket: SnapshotTicket,
        records: Vec<NotificationRecord>,
    ) -> bool {
        if ticket.0 < self.accept_from || ticket.0 < self.applied_ticket {
            debug!(
                target = "notify.store",
                ticket = ticket.0,
                applied = self.applied_ticket,
                "discarding stale snapshot"
            );
            return false;
        }
        self.applied_ticket = ticket.0;
        self.snapshot = records
            .into_iter()
            .map(|record| (record.id.clone(), record))
            .collect();

        // Confirmations that happened before this request was issued are now
        // reflected remotely; anything later still overrides.
        self.pending.retain(|_, pending| {
            for slot in [&mut pending.read, &mut pending.delete] {
                if matches!(slot, Some(Mark { confirmed_at: Some(at), .. }) if ticket.0 > *at) {
                    *slot = None;
                }
            }
            !pending.is_empty()
        });
        self.rebuild();
        true
    }

    /// Convenience for callers that fetch and apply in one step.
    pub fn replace_snapshot(&mut self, records: Vec<NotificationRecord>) -> bool {
        let ticket = self.begin_snapshot();
        self.apply_snapshot(ticket, records)
    }

    /// Adds or refreshes a push-origin record. A redelivery (same id, kind and
    /// timestamp) never clears a read flag and stays hidden once deleted; a
    /// different event reusing the id is taken as new.
    pub fn ingest_push(&mut self, mut record: NotificationRecord) -> bool {
        let mut reused = false;
        if let Some(deleted) = self.deleted.get(&record.id) {
            if deleted.matches(&record) {
                trace!(target = "notify.store", id = %record.id, "push for deleted notification ignored");
                return false;
            }
            self.deleted.remove(&record.id);
            reused = true;
        }
        if let Some(existing) = self.push.get(&record.id).or_else(|| self.snapshot.get(&record.id)) {
            if Fingerprint::of(existing).matches(&record) {
                if let Some(pushed) = self.push.get(&record.id) {
                    record.read |= pushed.read;
                }
            } else if existing.timestamp > record.timestamp {
                trace!(target = "notify.store", id = %record.id, "older event for held id ignored");
                return false;
            } else {
                reused = true;
            }
        }
        if reused {
            debug!(target = "notify.store", id = %record.id, "new event reuses a known id");
            self.retire_confirmed(&record.id);
        }
        self.push.insert(record.id.clone(), record);
        self.evict_push_overflow();
        self.rebuild();
        true
    }

    pub fn begin_mark_read(&mut self, id: &str) -> Result<Option<MutationTicket>, StoreError> {
        let record = self
            .get(id)
            .ok_or_else(|| StoreError::UnknownNotification(id.to_string()))?;
        if record.read {
            return Ok(None);
        }
        Ok(Some(self.begin(MutationKind::MarkRead, vec![id.to_string()])))
    }

    pub fn begin_mark_all_read(&mut self) -> Option<MutationTicket> {
        let ids: Vec<String> = self
            .merged
            .iter()
            .filter(|record| !record.read)
            .map(|record| record.id.clone())
            .collect();
        if ids.is_empty() {
            return None;
        }
        Some(self.begin(MutationKind::MarkRead, ids))
    }

    pub fn begin_delete(&mut self, id: &str) -> Result<MutationTicket, StoreError> {
        if self.get(id).is_none() {
            return Err(StoreError::UnknownNotification(id.to_string()));
        }
        Ok(self.begin(MutationKind::Delete, vec![id.to_string()]))
    }

    pub fn begin_clear_all(&mut self) -> Option<MutationTicket> {
        let ids: Vec<String> = self.merged.iter().map(|record| record.id.clone()).collect();
        if ids.is_empty() {
            return None;
        }
        Some(self.begin(MutationKind::Delete, ids))
    }

    pub fn confirm(&mut self, ticket: &MutationTicket) {
        self.confirm_ids(ticket, &ticket.ids);
    }

    /// Marks the remote side as having applied `ids` of the mutation.
    pub fn confirm_ids(&mut self, ticket: &MutationTicket, ids: &[String]) {
        if self.is_stale(ticket) {
            return;
        }
        let confirmed_at = self.issued_tickets;
        for id in ids {
            if let Some(pending) = self.pending.get_mut(id) {
                if let Some(mark) = pending.slot(ticket.kind) {
                    if mark.mutation == ticket.id {
                        mark.confirmed_at = Some(confirmed_at);
                    }
                }
            }
            match ticket.kind {
                MutationKind::MarkRead => {
                    if let Some(record) = self.push.get_mut(id) {
                        record.read = true;
                    }
                }
                MutationKind::Delete => {
                    let removed = self.push.remove(id);
                    let tombstone = removed
                        .as_ref()
                        .or_else(|| self.snapshot.get(id))
                        .map(Fingerprint::of);
                    if let Some(tombstone) = tombstone {
                        self.deleted.insert(id.clone(), tombstone);
                    }
                }
            }
        }
        self.rebuild();
    }

    pub fn rollback(&mut self, ticket: &MutationTicket) {
        self.rollback_ids(ticket, &ticket.ids);
    }

    /// Reverts the optimistic effect of the mutation for `ids`.
    pub fn rollback_ids(&mut self, ticket: &MutationTicket, ids: &[String]) {
        if self.is_stale(ticket) {
            return;
        }
        for id in ids {
            let Some(pending) = self.pending.get_mut(id) else {
                continue;
            };
            let slot = pending.slot(ticket.kind);
            if slot.map(|mark| mark.mutation) == Some(ticket.id) {
                *slot = None;
            }
            if pending.is_empty() {
                self.pending.remove(id);
            }
        }
        self.rebuild();
    }

    /// Drops everything; used when the session ends. Snapshot requests issued
    /// before the clear can no longer be applied.
    pub fn clear(&mut self) {
        self.snapshot.clear();
        self.push.clear();
        self.pending.clear();
        self.deleted.clear();
        self.merged.clear();
        self.accept_from = self.issued_tickets + 1;
        self.epoch += 1;
    }

    /// Confirmed marks describe an earlier event; drop them so they do not
    /// hide or pre-read a new one under the same id.
    fn retire_confirmed(&mut self, id: &str) {
        let Some(pending) = self.pending.get_mut(id) else {
            return;
        };
        for slot in [&mut pending.read, &mut pending.delete] {
            if matches!(slot, Some(Mark { confirmed_at: Some(_), .. })) {
                *slot = None;
            }
        }
        if pending.is_empty() {
            self.pending.remove(id);
        }
    }

    fn is_stale(&self, ticket: &MutationTicket) -> bool {
        if ticket.epoch == self.epoch {
            return false;
        }
        debug!(
            target = "notify.store",
            mutation = ticket.id,
            "mutation settled after the store was cleared; ignored"
        );
        true
    }

    fn begin(&mut self, kind: MutationKind, ids: Vec<String>) -> MutationTicket {
        self.next_mutation += 1;
        let mutation = self.next_mutation;
        for id in &ids {
            let pending = self.pending.entry(id.clone()).or_default();
            *pending.slot(kind) = Some(Mark {
                mutation,
                confirmed_at: None,
            });
        }
        self.rebuild();
        MutationTicket {
            id: mutation,
            kind,
            ids,
            epoch: self.epoch,
        }
    }

    fn evict_push_overflow(&mut self) {
        while self.push.len() > self.max_push_records {
            let oldest = self
                .push
                .values()
                .min_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| b.id.cmp(&a.id)))
                .map(|record| record.id.clone());
            match oldest {
                Some(id) => {
                    self.push.remove(&id);
                }
                None => break,
            }
        }
    }

    fn rebuild(&mut self) {
        // The snapshot holds an id unless a newer event for it was pushed.
        let pushed_newer = |record: &NotificationRecord| {
            self.push
                .get(&record.id)
                .is_some_and(|pushed| pushed.timestamp > record.timestamp)
        };
        let mut merged: Vec<NotificationRecord> = self
            .snapshot
            .values()
            .filter(|record| !pushed_newer(record))
            .chain(self.push.values().filter(|record| {
                self.snapshot
                    .get(&record.id)
                    .map_or(true, |held| record.timestamp > held.timestamp)
            }))
            .filter(|record| {
                self.pending
                    .get(&record.id)
                    .map_or(true, |pending| pending.delete.is_none())
            })
            .cloned()
            .collect();

        for record in &mut merged {
            if let Some(pushed) = self.push.get(&record.id) {
                if Fingerprint::of(pushed).matches(record) {
                    record.read |= pushed.read;
                }
            }
            if let Some(pending) = self.pending.get(&record.id) {
                record.read |= pending.read.is_some();
            }
        }
        merged.sort_by(newest_first);
        self.merged = merged;
    }
}

fn newest_first(a: &NotificationRecord, b: &NotificationRecord) -> Ordering {
    b.timestamp
        .cmp(&a.timestamp)
        .then_with(|| a.id.cmp(&b.id))
}

fn unread_in(records: &[NotificationRecord]) -> usize {
    records.iter().filter(|record| !record.read).count()
}
