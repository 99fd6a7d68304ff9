//! Async runtime for the transfer notification client.
//!
//! [`NotificationClient`] owns one push session. A background driver task
//! runs the connection state machine from `notify-core` over a
//! [`PushConnector`], feeds decoded frames into the reconciliation store and
//! publishes the merged view through `tokio::sync::watch`. Snapshot fetches
//! and mutations go through a [`NotificationApi`].
//!
//! ```no_run
//! # async fn demo() -> Result<(), notify_client::ClientError> {
//! use std::sync::Arc;
//! use notify_client::{ClientConfig, HttpNotificationApi, NotificationClient, WebSocketConnector};
//! use notify_core::SessionToken;
//!
//! let token = SessionToken::new("session-token").expect("token");
//! let base = "https://budget.example.com/api";
//! let client = NotificationClient::spawn(
//!     ClientConfig::new(base),
//!     Arc::new(HttpNotificationApi::new(base, token.clone())),
//!     Arc::new(WebSocketConnector),
//! );
//! client.connect(Some(token))?;
//! client.refresh().await?;
//! println!("{} unread", client.view().unread_count());
//! client.teardown().await;
//! # Ok(())
//! # }
//! ```

mod client;
mod config;
mod driver;
mod link;
mod rest;
#[cfg(test)]
mod test_support;

pub use client::{ClientError, NotificationClient};
pub use config::ClientConfig;
pub use link::{LinkError, LinkEvent, PushConnector, PushLink, WebSocketConnector};
pub use rest::{ApiCall, ApiError, HttpNotificationApi, InMemoryNotificationApi, NotificationApi};
