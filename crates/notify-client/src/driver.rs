//! Task that executes the connection state machine against real I/O.
//!
//! The driver owns the machine, the in-flight open, the live link and the
//! retry timer. Dropping the open future or the timer is how attempts are
//! cancelled, so nothing abandoned can report back into a newer session.

use std::collections::VecDeque;
use std::future::{pending, Future};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use notify_core::{
    AttemptId, ConnectionEvent, ConnectionMachine, Effect, MessageRouter, PushEndpoint, Routed,
    SessionToken, NORMAL_CLOSURE,
};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep, Sleep};
use tracing::{debug, info, warn};

use crate::client::Shared;
use crate::link::{LinkError, LinkEvent, PushConnector, PushLink};

type OpenFuture = Pin<Box<dyn Future<Output = Result<Box<dyn PushLink>, LinkError>> + Send>>;

#[derive(Debug)]
pub(crate) enum Command {
    Connect(Option<SessionToken>),
    Teardown(oneshot::Sender<()>),
}

pub(crate) struct Driver {
    machine: ConnectionMachine,
    router: MessageRouter,
    connector: Arc<dyn PushConnector>,
    shared: Arc<Shared>,
    commands: mpsc::UnboundedReceiver<Command>,
    api_base_url: String,
    push_path: String,
    connect_timeout: Duration,
    opening: Option<(AttemptId, OpenFuture)>,
    link: Option<(AttemptId, Box<dyn PushLink>)>,
    retry: Option<Pin<Box<Sleep>>>,
}

impl Driver {
    pub(crate) fn new(
        machine: ConnectionMachine,
        connector: Arc<dyn PushConnector>,
        shared: Arc<Shared>,
        commands: mpsc::UnboundedReceiver<Command>,
        api_base_url: String,
        push_path: String,
        connect_timeout: Duration,
    ) -> Self {
        Self {
            machine,
            router: MessageRouter::new(),
            connector,
            shared,
            commands,
            api_base_url,
            push_path,
            connect_timeout,
            opening: None,
            link: None,
            retry: None,
        }
    }

    pub(crate) async fn run(mut self) {
        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Connect(token)) => {
                        self.dispatch(ConnectionEvent::Connect(token)).await;
                    }
                    Some(Command::Teardown(done)) => {
                        self.dispatch(ConnectionEvent::Teardown).await;
                        let _ = done.send(());
                    }
                    None => {
                        self.dispatch(ConnectionEvent::Teardown).await;
                        debug!(target = "notify.driver", "all client handles dropped; driver exiting");
                        break;
                    }
                },
                (attempt, result) = poll_opening(&mut self.opening) => {
                    self.opening = None;
                    self.on_open_result(attempt, result).await;
                }
                (attempt, event) = poll_link(&mut self.link) => {
                    self.on_link_event(attempt, event).await;
                }
                _ = poll_timer(&mut self.retry) => {
                    self.retry = None;
                    self.dispatch(ConnectionEvent::RetryElapsed).await;
                }
            }
        }
    }

    async fn on_open_result(
        &mut self,
        attempt: AttemptId,
        result: Result<Box<dyn PushLink>, LinkError>,
    ) {
        match result {
            Ok(link) => {
                if let Some((_, mut previous)) = self.link.replace((attempt, link)) {
                    previous.close(NORMAL_CLOSURE).await;
                }
                self.dispatch(ConnectionEvent::Opened { attempt }).await;
                if self.machine.state() == notify_core::ConnectionState::Connected {
                    // Pushes may have been missed while the link was down.
                    self.shared.refresh.notify_one();
                }
            }
            Err(err) => {
                warn!(target = "notify.driver", attempt, error = %err, "push connect failed");
                self.dispatch_failure(attempt, err.to_string()).await;
            }
        }
    }

    async fn on_link_event(&mut self, attempt: AttemptId, event: LinkEvent) {
        match event {
            LinkEvent::Frame(text) => self.on_frame(&text).await,
            LinkEvent::Closed { code } => {
                self.link = None;
                debug!(target = "notify.driver", attempt, code = ?code, "push link closed");
                self.dispatch(ConnectionEvent::Closed { attempt, code }).await;
            }
            LinkEvent::Failed(reason) => {
                self.link = None;
                self.dispatch_failure(attempt, reason).await;
            }
        }
    }

    async fn on_frame(&mut self, text: &str) {
        match self.router.route(text, Utc::now()) {
            Ok(Routed::Handshake { message }) => {
                debug!(
                    target = "notify.router",
                    message = message.as_deref().unwrap_or(""),
                    "push handshake acknowledged"
                );
                self.dispatch(ConnectionEvent::HandshakeAcknowledged).await;
            }
            Ok(Routed::Record(record)) => {
                debug!(
                    target = "notify.router",
                    id = %record.id,
                    kind = %record.kind,
                    "push notification received"
                );
                let changed = self.shared.store.lock().ingest_push(record);
                if changed {
                    self.shared.publish_view();
                }
            }
            Err(err) => {
                warn!(
                    target = "notify.router",
                    error = %err,
                    len = text.len(),
                    "dropping push frame"
                );
            }
        }
    }

    async fn dispatch(&mut self, event: ConnectionEvent) {
        self.apply(event).await;
        self.shared.publish_state(self.machine.state());
    }

    /// A failed attempt counts as an abnormal close so it is retried like a
    /// dropped link. Observers only see the state after both steps.
    async fn dispatch_failure(&mut self, attempt: AttemptId, reason: String) {
        self.apply(ConnectionEvent::Failed { attempt, reason }).await;
        self.apply(ConnectionEvent::Closed { attempt, code: None })
            .await;
        self.shared.publish_state(self.machine.state());
    }

    async fn apply(&mut self, event: ConnectionEvent) {
        let mut queue: VecDeque<Effect> = self.machine.handle(event).into();
        while let Some(effect) = queue.pop_front() {
            match effect {
                Effect::Open { attempt, token } => {
                    match PushEndpoint::derive(&self.api_base_url, &self.push_path, &token) {
                        Ok(endpoint) => {
                            info!(
                                target = "notify.driver",
                                attempt,
                                url = %endpoint,
                                "opening push connection"
                            );
                            self.opening = Some((attempt, self.open_future(endpoint)));
                        }
                        Err(err) => {
                            warn!(target = "notify.driver", error = %err, "cannot derive push address");
                            queue.extend(self.machine.handle(ConnectionEvent::Failed {
                                attempt,
                                reason: err.to_string(),
                            }));
                            queue.extend(
                                self.machine
                                    .handle(ConnectionEvent::Closed { attempt, code: None }),
                            );
                        }
                    }
                }
                Effect::CloseLink { code } => {
                    self.opening = None;
                    if let Some((_, mut link)) = self.link.take() {
                        link.close(code).await;
                    }
                }
                Effect::DiscardLink { attempt } => {
                    if matches!(&self.link, Some((current, _)) if *current == attempt) {
                        if let Some((_, mut link)) = self.link.take() {
                            link.close(NORMAL_CLOSURE).await;
                        }
                    }
                }
                Effect::ScheduleRetry { delay, attempt } => {
                    info!(
                        target = "notify.driver",
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "reconnect scheduled"
                    );
                    self.retry = Some(Box::pin(sleep(delay)));
                }
                Effect::CancelRetry => {
                    self.retry = None;
                }
                Effect::ClearStore => {
                    self.shared.store.lock().clear();
                    self.shared.publish_view();
                }
            }
        }
    }

    fn open_future(&self, endpoint: PushEndpoint) -> OpenFuture {
        let connector = Arc::clone(&self.connector);
        let timeout = self.connect_timeout;
        Box::pin(async move {
            match tokio::time::timeout(timeout, connector.open(&endpoint)).await {
                Ok(result) => result,
                Err(_) => Err(LinkError::Timeout(timeout)),
            }
        })
    }
}

async fn poll_opening(
    opening: &mut Option<(AttemptId, OpenFuture)>,
) -> (AttemptId, Result<Box<dyn PushLink>, LinkError>) {
    match opening {
        Some((attempt, future)) => {
            let result = future.as_mut().await;
            (*attempt, result)
        }
        None => pending().await,
    }
}

async fn poll_link(link: &mut Option<(AttemptId, Box<dyn PushLink>)>) -> (AttemptId, LinkEvent) {
    match link {
        Some((attempt, link)) => {
            let event = link.next_event().await;
            (*attempt, event)
        }
        None => pending().await,
    }
}

async fn poll_timer(timer: &mut Option<Pin<Box<Sleep>>>) {
    match timer {
        Some(sleep) => sleep.as_mut().await,
        None => pending().await,
    }
}
