//! Notification core: the data model and the pure logic behind the transfer
//! notification client.
//!
//! Responsibilities:
//! - decoding push frames into notification records
//! - reconciling push records with the REST snapshot (dedupe, read state, ordering)
//! - the push connection lifecycle as a transport-free state machine
//! - push address derivation and deep-link resolution
//!
//! Nothing here performs I/O; `notify-client` drives these types over the network.

pub mod connection;
pub mod endpoint;
pub mod frame;
pub mod record;
pub mod route;
pub mod snapshot;
pub mod store;

pub use connection::{
    AttemptId, ConnectionEvent, ConnectionMachine, ConnectionState, Effect, RetryPolicy,
    NORMAL_CLOSURE,
};
pub use endpoint::{EndpointError, PushEndpoint, SessionToken, DEFAULT_PUSH_PATH};
pub use frame::{FrameError, MessageRouter, Routed};
pub use record::{
    ActionKind, Locale, LocalizedText, NotificationKind, NotificationRecord, Origin,
    TransactionKind, TransactionRef,
};
pub use route::resolve_route;
pub use snapshot::{SnapshotBody, SnapshotItem, SnapshotPage};
pub use store::{
    MutationKind, MutationTicket, NotificationView, ReconciliationStore, SnapshotTicket,
    StoreError,
};
