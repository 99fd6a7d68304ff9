use async_trait::async_trait;
use futures_util::StreamExt;
use notify_core::PushEndpoint;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{error::ProtocolError, Error as WsError, Message},
    MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, trace, warn};

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("websocket connect failed: {0}")]
    Connect(String),
    #[error("websocket connect timed out after {0:?}")]
    Timeout(std::time::Duration),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    Frame(String),
    /// Peer closed or the stream ended; `code` is absent when no close frame arrived.
    Closed { code: Option<u16> },
    Failed(String),
}

/// One open push connection.
#[async_trait]
pub trait PushLink: Send {
    async fn next_event(&mut self) -> LinkEvent;

    async fn close(&mut self, code: u16);
}

/// Opens push links. The driver only talks to this seam, so tests substitute
/// a scripted connector for the network.
#[async_trait]
pub trait PushConnector: Send + Sync {
    async fn open(&self, endpoint: &PushEndpoint) -> Result<Box<dyn PushLink>, LinkError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketConnector;

#[async_trait]
impl PushConnector for WebSocketConnector {
    async fn open(&self, endpoint: &PushEndpoint) -> Result<Box<dyn PushLink>, LinkError> {
        let (stream, _) = connect_async(endpoint.url().as_str())
            .await
            .map_err(|err| LinkError::Connect(err.to_string()))?;
        debug!(
            target = "notify.link",
            url = %endpoint,
            "push websocket connected"
        );
        Ok(Box::new(WebSocketLink { stream }))
    }
}

struct WebSocketLink {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl PushLink for WebSocketLink {
    async fn next_event(&mut self) -> LinkEvent {
        while let Some(msg) = self.stream.next().await {
            match msg {
                Ok(Message::Text(text)) => {
                    trace!(
                        target = "notify.link",
                        event = "ws_in",
                        kind = "text",
                        len = text.len()
                    );
                    return LinkEvent::Frame(text);
                }
                Ok(Message::Binary(data)) => {
                    trace!(
                        target = "notify.link",
                        event = "ws_in",
                        kind = "binary",
                        len = data.len()
                    );
                    match String::from_utf8(data) {
                        Ok(text) => return LinkEvent::Frame(text),
                        Err(err) => {
                            warn!(target = "notify.link", error = %err, "invalid utf8 in binary frame");
                        }
                    }
                }
                Ok(Message::Close(frame)) => {
                    return LinkEvent::Closed {
                        code: frame.map(|f| u16::from(f.code)),
                    };
                }
                Ok(_) => {}
                Err(err) => {
                    return match &err {
                        WsError::ConnectionClosed
                        | WsError::AlreadyClosed
                        | WsError::Protocol(ProtocolError::ResetWithoutClosingHandshake) => {
                            debug!(target = "notify.link", "push websocket closed: {err}");
                            LinkEvent::Closed { code: None }
                        }
                        _ => LinkEvent::Failed(err.to_string()),
                    };
                }
            }
        }
        LinkEvent::Closed { code: None }
    }

    async fn close(&mut self, code: u16) {
        let frame = CloseFrame {
            code: CloseCode::from(code),
            reason: "".into(),
        };
        if let Err(err) = self.stream.close(Some(frame)).await {
            debug!(target = "notify.link", error = %err, "push websocket close failed");
        }
    }
}
