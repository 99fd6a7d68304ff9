//! Push connection lifecycle as an explicit state machine.
//!
//! [`ConnectionMachine::handle`] is pure apart from logging: it consumes one
//! [`ConnectionEvent`] and returns the [`Effect`]s the driver must carry out
//! (open a link, arm or cancel the retry timer, close, clear the store).

use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::endpoint::SessionToken;

/// WebSocket close code for an intentional shutdown.
pub const NORMAL_CLOSURE: u16 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub delay: Duration,
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            delay: Duration::from_secs(3),
            max_attempts: 5,
        }
    }
}

/// Identifies one open attempt so late results from an abandoned attempt can be told apart.
pub type AttemptId = u64;

#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    Connect(Option<SessionToken>),
    Opened { attempt: AttemptId },
    Closed { attempt: AttemptId, code: Option<u16> },
    Failed { attempt: AttemptId, reason: String },
    RetryElapsed,
    HandshakeAcknowledged,
    Teardown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    Open {
        attempt: AttemptId,
        token: SessionToken,
    },
    /// Close the live link (or abandon the in-flight open) with `code`.
    CloseLink { code: u16 },
    /// A link finished opening for an attempt that is no longer current; close it.
    DiscardLink { attempt: AttemptId },
    ScheduleRetry { delay: Duration, attempt: u32 },
    CancelRetry,
    ClearStore,
}

#[derive(Debug, Default)]
pub struct ConnectionMachine {
    policy: RetryPolicy,
    state: ConnectionState,
    token: Option<SessionToken>,
    current_attempt: Option<AttemptId>,
    next_attempt: AttemptId,
    retries: u32,
    retry_pending: bool,
    acknowledged: bool,
    exhausted: bool,
}

impl ConnectionMachine {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            ..Self::default()
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Automatic reconnection attempts made since the last successful open.
    pub fn retries(&self) -> u32 {
        self.retries
    }

    pub fn retry_pending(&self) -> bool {
        self.retry_pending
    }

    /// Whether the server acknowledged the current connection.
    pub fn acknowledged(&self) -> bool {
        self.acknowledged
    }

    /// Set once the retry budget runs out; cleared by the next explicit connect.
    pub fn exhausted(&self) -> bool {
        self.exhausted
    }

    pub fn has_token(&self) -> bool {
        self.token.is_some()
    }

    pub fn handle(&mut self, event: ConnectionEvent) -> Vec<Effect> {
        match event {
            ConnectionEvent::Connect(token) => self.on_connect(token),
            ConnectionEvent::Opened { attempt } => self.on_open(attempt),
            ConnectionEvent::Closed { attempt, code } => self.on_close(attempt, code),
            ConnectionEvent::Failed { attempt, reason } => self.on_error(attempt, &reason),
            ConnectionEvent::RetryElapsed => self.on_retry_elapsed(),
            ConnectionEvent::HandshakeAcknowledged => {
                if self.state == ConnectionState::Connected {
                    self.acknowledged = true;
                }
                Vec::new()
            }
            ConnectionEvent::Teardown => self.teardown(),
        }
    }

    fn on_connect(&mut self, token: Option<SessionToken>) -> Vec<Effect> {
        let Some(token) = token else {
            debug!(target = "notify.connection", "no session token; connect skipped");
            return Vec::new();
        };
        if matches!(
            self.state,
            ConnectionState::Connecting | ConnectionState::Connected
        ) {
            // Keep the newest credential for later reconnects.
            self.token = Some(token);
            return Vec::new();
        }

        let mut effects = Vec::new();
        if self.retry_pending {
            self.retry_pending = false;
            effects.push(Effect::CancelRetry);
        }
        self.retries = 0;
        self.exhausted = false;
        self.token = Some(token.clone());
        effects.push(self.begin_attempt(token));
        effects
    }

    fn on_open(&mut self, attempt: AttemptId) -> Vec<Effect> {
        if self.state != ConnectionState::Connecting || self.current_attempt != Some(attempt) {
            debug!(
                target = "notify.connection",
                attempt, "late open for abandoned attempt; discarding link"
            );
            return vec![Effect::DiscardLink { attempt }];
        }
        info!(
            target = "notify.connection",
            attempt,
            after_retries = self.retries,
            "push connection established"
        );
        self.state = ConnectionState::Connected;
        self.retries = 0;
        Vec::new()
    }

    fn on_close(&mut self, attempt: AttemptId, code: Option<u16>) -> Vec<Effect> {
        if self.current_attempt != Some(attempt) {
            return Vec::new();
        }
        self.current_attempt = None;
        self.acknowledged = false;
        self.state = ConnectionState::Disconnected;

        if code == Some(NORMAL_CLOSURE) {
            info!(target = "notify.connection", attempt, "push connection closed normally");
            return Vec::new();
        }
        if self.token.is_none() {
            return Vec::new();
        }
        if self.retries >= self.policy.max_attempts {
            warn!(
                target = "notify.connection",
                attempts = self.retries,
                code = ?code,
                "push reconnection budget exhausted"
            );
            self.state = ConnectionState::Error;
            self.exhausted = true;
            return Vec::new();
        }

        let next = self.retries + 1;
        debug!(
            target = "notify.connection",
            code = ?code,
            next_attempt = next,
            delay_ms = self.policy.delay.as_millis() as u64,
            "push connection dropped; scheduling reconnect"
        );
        self.retry_pending = true;
        vec![Effect::ScheduleRetry {
            delay: self.policy.delay,
            attempt: next,
        }]
    }

    fn on_error(&mut self, attempt: AttemptId, reason: &str) -> Vec<Effect> {
        if self.current_attempt != Some(attempt) {
            return Vec::new();
        }
        warn!(target = "notify.connection", attempt, error = %reason, "push connection error");
        self.state = ConnectionState::Error;
        Vec::new()
    }

    fn on_retry_elapsed(&mut self) -> Vec<Effect> {
        if !self.retry_pending {
            return Vec::new();
        }
        self.retry_pending = false;
        let Some(token) = self.token.clone() else {
            return Vec::new();
        };
        self.retries += 1;
        vec![self.begin_attempt(token)]
    }

    fn teardown(&mut self) -> Vec<Effect> {
        let mut effects = Vec::new();
        if self.retry_pending {
            self.retry_pending = false;
            effects.push(Effect::CancelRetry);
        }
        if self.current_attempt.take().is_some() {
            effects.push(Effect::CloseLink {
                code: NORMAL_CLOSURE,
            });
        }
        effects.push(Effect::ClearStore);
        self.state = ConnectionState::Disconnected;
        self.token = None;
        self.retries = 0;
        self.acknowledged = false;
        self.exhausted = false;
        effects
    }

    fn begin_attempt(&mut self, token: SessionToken) -> Effect {
        self.next_attempt += 1;
        let attempt = self.next_attempt;
        self.current_attempt = Some(attempt);
        self.state = ConnectionState::Connecting;
        Effect::Open { attempt, token }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token() -> Option<SessionToken> {
        SessionToken::new("tok")
    }

    fn open_attempt(effects: &[Effect]) -> AttemptId {
        effects
            .iter()
            .find_map(|effect| match effect {
                Effect::Open { attempt, .. } => Some(*attempt),
                _ => None,
            })
            .expect("open effect")
    }

    fn connected(machine: &mut ConnectionMachine) -> AttemptId {
        let attempt = open_attempt(&machine.handle(ConnectionEvent::Connect(token())));
        assert!(machine.handle(ConnectionEvent::Opened { attempt }).is_empty());
        attempt
    }

    #[test]
    fn connect_without_token_is_a_no_op() {
        let mut machine = ConnectionMachine::default();
        assert!(machine.handle(ConnectionEvent::Connect(None)).is_empty());
        assert_eq!(machine.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn connect_while_connecting_or_connected_is_a_no_op() {
        let mut machine = ConnectionMachine::default();
        let effects = machine.handle(ConnectionEvent::Connect(token()));
        assert_eq!(machine.state(), ConnectionState::Connecting);
        assert_eq!(effects.len(), 1);
        assert!(machine.handle(ConnectionEvent::Connect(token())).is_empty());

        let attempt = open_attempt(&effects);
        machine.handle(ConnectionEvent::Opened { attempt });
        assert_eq!(machine.state(), ConnectionState::Connected);
        assert!(machine.handle(ConnectionEvent::Connect(token())).is_empty());
    }

    #[test]
    fn abnormal_close_schedules_reconnect_after_fixed_delay() {
        let mut machine = ConnectionMachine::default();
        let attempt = connected(&mut machine);

        let effects = machine.handle(ConnectionEvent::Closed {
            attempt,
            code: Some(1006),
        });
        assert_eq!(machine.state(), ConnectionState::Disconnected);
        assert_eq!(
            effects,
            vec![Effect::ScheduleRetry {
                delay: Duration::from_secs(3),
                attempt: 1
            }]
        );

        let effects = machine.handle(ConnectionEvent::RetryElapsed);
        assert_eq!(machine.state(), ConnectionState::Connecting);
        assert_ne!(open_attempt(&effects), attempt);
    }

    #[test]
    fn normal_close_does_not_reconnect() {
        let mut machine = ConnectionMachine::default();
        let attempt = connected(&mut machine);
        let effects = machine.handle(ConnectionEvent::Closed {
            attempt,
            code: Some(NORMAL_CLOSURE),
        });
        assert!(effects.is_empty());
        assert_eq!(machine.state(), ConnectionState::Disconnected);
        assert!(!machine.retry_pending());
    }

    #[test]
    fn error_alone_does_not_schedule_retry() {
        let mut machine = ConnectionMachine::default();
        let attempt = connected(&mut machine);
        let effects = machine.handle(ConnectionEvent::Failed {
            attempt,
            reason: "reset".into(),
        });
        assert!(effects.is_empty());
        assert_eq!(machine.state(), ConnectionState::Error);
        assert!(!machine.retry_pending());
    }

    #[test]
    fn gives_up_after_five_failed_reconnects() {
        let mut machine = ConnectionMachine::default();
        let mut attempt = connected(&mut machine);
        let mut scheduled = 0;

        loop {
            let effects = machine.handle(ConnectionEvent::Closed {
                attempt,
                code: None,
            });
            if effects.is_empty() {
                break;
            }
            assert!(matches!(effects[0], Effect::ScheduleRetry { .. }));
            scheduled += 1;
            attempt = open_attempt(&machine.handle(ConnectionEvent::RetryElapsed));
            assert_eq!(machine.state(), ConnectionState::Connecting);
        }

        assert_eq!(scheduled, 5);
        assert_eq!(machine.state(), ConnectionState::Error);
        assert!(machine.exhausted());
        assert!(machine.handle(ConnectionEvent::RetryElapsed).is_empty());

        let effects = machine.handle(ConnectionEvent::Connect(token()));
        assert_eq!(machine.state(), ConnectionState::Connecting);
        assert_eq!(machine.retries(), 0);
        assert!(!machine.exhausted());
        open_attempt(&effects);
    }

    #[test]
    fn successful_open_resets_retry_counter() {
        let mut machine = ConnectionMachine::default();
        let attempt = connected(&mut machine);
        machine.handle(ConnectionEvent::Closed { attempt, code: None });
        let attempt = open_attempt(&machine.handle(ConnectionEvent::RetryElapsed));
        assert_eq!(machine.retries(), 1);
        machine.handle(ConnectionEvent::Opened { attempt });
        assert_eq!(machine.retries(), 0);
    }

    #[test]
    fn teardown_cancels_retry_and_is_idempotent() {
        let mut machine = ConnectionMachine::default();
        let attempt = connected(&mut machine);
        machine.handle(ConnectionEvent::Closed { attempt, code: Some(1011) });
        assert!(machine.retry_pending());

        let effects = machine.handle(ConnectionEvent::Teardown);
        assert_eq!(effects, vec![Effect::CancelRetry, Effect::ClearStore]);
        assert_eq!(machine.state(), ConnectionState::Disconnected);
        assert!(!machine.has_token());

        assert_eq!(
            machine.handle(ConnectionEvent::Teardown),
            vec![Effect::ClearStore]
        );
        assert!(machine.handle(ConnectionEvent::RetryElapsed).is_empty());
    }

    #[test]
    fn teardown_closes_live_link_normally() {
        let mut machine = ConnectionMachine::default();
        connected(&mut machine);
        let effects = machine.handle(ConnectionEvent::Teardown);
        assert_eq!(
            effects,
            vec![
                Effect::CloseLink {
                    code: NORMAL_CLOSURE
                },
                Effect::ClearStore
            ]
        );
    }

    #[test]
    fn late_open_after_teardown_stays_disconnected() {
        let mut machine = ConnectionMachine::default();
        let attempt = open_attempt(&machine.handle(ConnectionEvent::Connect(token())));
        machine.handle(ConnectionEvent::Teardown);

        let effects = machine.handle(ConnectionEvent::Opened { attempt });
        assert_eq!(effects, vec![Effect::DiscardLink { attempt }]);
        assert_eq!(machine.state(), ConnectionState::Disconnected);
        assert!(machine
            .handle(ConnectionEvent::Closed { attempt, code: None })
            .is_empty());
        assert_eq!(machine.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn handshake_only_counts_while_connected() {
        let mut machine = ConnectionMachine::default();
        machine.handle(ConnectionEvent::HandshakeAcknowledged);
        assert!(!machine.acknowledged());
        let attempt = connected(&mut machine);
        machine.handle(ConnectionEvent::HandshakeAcknowledged);
        assert!(machine.acknowledged());
        machine.handle(ConnectionEvent::Closed { attempt, code: None });
        assert!(!machine.acknowledged());
    }
}
