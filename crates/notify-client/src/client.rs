use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use notify_core::{
    resolve_route, ConnectionMachine, ConnectionState, MutationTicket, NotificationView,
    ReconciliationStore, SessionToken, StoreError,
};
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use crate::config::ClientConfig;
use crate::driver::{Command, Driver};
use crate::link::PushConnector;
use crate::rest::{ApiError, NotificationApi};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("snapshot fetch failed: {0}")]
    Snapshot(#[source] ApiError),
    #[error("{operation} failed for {ids:?}: {source}")]
    Mutation {
        operation: &'static str,
        ids: Vec<String>,
        #[source]
        source: ApiError,
    },
    #[error("notification driver has stopped")]
    DriverStopped,
}

/// State shared between the client handles and the driver task.
pub(crate) struct Shared {
    pub(crate) store: Mutex<ReconciliationStore>,
    pub(crate) refresh: Notify,
    view_tx: watch::Sender<NotificationView>,
    state_tx: watch::Sender<ConnectionState>,
}

impl Shared {
    pub(crate) fn publish_view(&self) {
        let view = self.store.lock().view();
        self.view_tx.send_replace(view);
    }

    pub(crate) fn publish_state(&self, state: ConnectionState) {
        self.state_tx.send_if_modified(|current| {
            if *current == state {
                return false;
            }
            debug!(target = "notify.client", from = ?*current, to = ?state, "connection state changed");
            *current = state;
            true
        });
    }
}

struct Inner {
    config: ClientConfig,
    api: Arc<dyn NotificationApi>,
    shared: Arc<Shared>,
    commands: mpsc::UnboundedSender<Command>,
    session_active: AtomicBool,
}

/// Handle to one notification session: the push connection, the merged view
/// and the REST mutations. Cheap to clone; the session ends when the last
/// handle is dropped or [`NotificationClient::teardown`] runs.
#[derive(Clone)]
pub struct NotificationClient {
    inner: Arc<Inner>,
}

impl NotificationClient {
    /// Starts the connection driver on the current tokio runtime.
    pub fn spawn(
        config: ClientConfig,
        api: Arc<dyn NotificationApi>,
        connector: Arc<dyn PushConnector>,
    ) -> Self {
        let (view_tx, _) = watch::channel(NotificationView::default());
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let shared = Arc::new(Shared {
            store: Mutex::new(ReconciliationStore::new(config.max_push_records)),
            refresh: Notify::new(),
            view_tx,
            state_tx,
        });
        let (commands, rx) = mpsc::unbounded_channel();
        let driver = Driver::new(
            ConnectionMachine::new(config.retry),
            connector,
            Arc::clone(&shared),
            rx,
            config.api_base_url.clone(),
            config.push_path.clone(),
            config.connect_timeout,
        );
        tokio::spawn(driver.run());

        Self {
            inner: Arc::new(Inner {
                config,
                api,
                shared,
                commands,
                session_active: AtomicBool::new(false),
            }),
        }
    }

    /// Opens the push connection. Without a token this does nothing.
    pub fn connect(&self, token: Option<SessionToken>) -> Result<(), ClientError> {
        if token.is_some() {
            self.inner.session_active.store(true, Ordering::SeqCst);
        }
        self.inner
            .commands
            .send(Command::Connect(token))
            .map_err(|_| ClientError::DriverStopped)
    }

    /// Closes the connection, cancels any pending reconnect and empties the
    /// view. Safe to call repeatedly.
    pub async fn teardown(&self) {
        self.inner.session_active.store(false, Ordering::SeqCst);
        let (done_tx, done_rx) = oneshot::channel();
        if self.inner.commands.send(Command::Teardown(done_tx)).is_ok() && done_rx.await.is_ok() {
            return;
        }
        // Driver already gone; still drop everything held locally.
        self.inner.shared.store.lock().clear();
        self.inner.shared.publish_view();
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.shared.state_tx.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.shared.state_tx.subscribe()
    }

    /// Merged view updates; the receiver starts at the current view.
    pub fn subscribe(&self) -> watch::Receiver<NotificationView> {
        self.inner.shared.view_tx.subscribe()
    }

    pub fn view(&self) -> NotificationView {
        self.inner.shared.view_tx.borrow().clone()
    }

    pub fn unread_count(&self) -> usize {
        self.with_store(|store| store.unread_count())
    }

    /// Fetches the listing and applies it unless a newer snapshot landed
    /// first. Returns the number of records fetched.
    pub async fn refresh(&self) -> Result<usize, ClientError> {
        let ticket = self.with_store(|store| store.begin_snapshot());
        let records = self
            .inner
            .api
            .fetch_snapshot(self.inner.config.max_snapshot_pages)
            .await
            .map_err(ClientError::Snapshot)?;
        let fetched = records.len();
        if self.with_store(|store| store.apply_snapshot(ticket, records)) {
            self.inner.shared.publish_view();
        }
        debug!(target = "notify.client", fetched, "snapshot refreshed");
        Ok(fetched)
    }

    pub async fn mark_read(&self, id: &str) -> Result<(), ClientError> {
        let Some(ticket) = self.with_store(|store| store.begin_mark_read(id))? else {
            return Ok(());
        };
        self.inner.shared.publish_view();
        let result = self.inner.api.mark_read(id).await;
        self.settle("mark_read", ticket, result)
    }

    pub async fn mark_all_read(&self) -> Result<(), ClientError> {
        let Some(ticket) = self.with_store(|store| store.begin_mark_all_read()) else {
            return Ok(());
        };
        self.inner.shared.publish_view();
        let result = self.inner.api.mark_all_read().await;
        self.settle("mark_all_read", ticket, result)
    }

    pub async fn delete(&self, id: &str) -> Result<(), ClientError> {
        let ticket = self.with_store(|store| store.begin_delete(id))?;
        self.inner.shared.publish_view();
        let result = self.inner.api.delete(id).await;
        self.settle("delete", ticket, result)
    }

    /// Deletes every visible notification, one request per id. Ids whose
    /// request failed come back individually and are reported together.
    pub async fn clear_all(&self) -> Result<(), ClientError> {
        let Some(ticket) = self.with_store(|store| store.begin_clear_all()) else {
            return Ok(());
        };
        self.inner.shared.publish_view();

        let mut deleted = Vec::new();
        let mut failed = Vec::new();
        let mut last_error = None;
        for id in &ticket.ids {
            match self.inner.api.delete(id).await {
                Ok(()) => deleted.push(id.clone()),
                Err(err) => {
                    warn!(target = "notify.client", id = %id, error = %err, "delete failed during clear");
                    failed.push(id.clone());
                    last_error = Some(err);
                }
            }
        }
        self.with_store(|store| {
            store.confirm_ids(&ticket, &deleted);
            store.rollback_ids(&ticket, &failed);
        });
        self.inner.shared.publish_view();

        match last_error {
            None => Ok(()),
            Some(source) => Err(ClientError::Mutation {
                operation: "clear_all",
                ids: failed,
                source,
            }),
        }
    }

    /// Resolves the deep link for a tapped notification and marks it read in
    /// the background. Unknown ids yield `None`.
    pub fn activate(&self, id: &str) -> Option<String> {
        let (route, unread) = self.with_store(|store| {
            store
                .get(id)
                .map(|record| (record.reference.as_ref().and_then(resolve_route), !record.read))
        })?;
        if unread {
            let client = self.clone();
            let id = id.to_string();
            tokio::spawn(async move {
                if let Err(err) = client.mark_read(&id).await {
                    warn!(target = "notify.client", id = %id, error = %err, "background mark_read failed");
                }
            });
        }
        route
    }

    /// Refreshes the snapshot every `refresh_interval` and after each
    /// successful connect while a session is active. The task ends once every
    /// client handle is gone.
    pub fn spawn_refresh_loop(&self) -> JoinHandle<()> {
        let inner = Arc::downgrade(&self.inner);
        let shared = Arc::clone(&self.inner.shared);
        let period = self.inner.config.refresh_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = shared.refresh.notified() => {}
                }
                let Some(inner) = inner.upgrade() else {
                    break;
                };
                if !inner.session_active.load(Ordering::SeqCst) {
                    continue;
                }
                let client = NotificationClient { inner };
                if let Err(err) = client.refresh().await {
                    warn!(target = "notify.client", error = %err, "background refresh failed");
                }
            }
            debug!(target = "notify.client", "refresh loop stopped");
        })
    }

    fn settle(
        &self,
        operation: &'static str,
        ticket: MutationTicket,
        result: Result<(), ApiError>,
    ) -> Result<(), ClientError> {
        let outcome = match result {
            Ok(()) => {
                self.with_store(|store| store.confirm(&ticket));
                Ok(())
            }
            Err(source) => {
                warn!(
                    target = "notify.client",
                    operation,
                    ids = ?ticket.ids,
                    error = %source,
                    "mutation failed; rolling back"
                );
                self.with_store(|store| store.rollback(&ticket));
                Err(ClientError::Mutation {
                    operation,
                    ids: ticket.ids,
                    source,
                })
            }
        };
        self.inner.shared.publish_view();
        outcome
    }

    fn with_store<R>(&self, f: impl FnOnce(&mut ReconciliationStore) -> R) -> R {
        f(&mut self.inner.shared.store.lock())
    }
}
