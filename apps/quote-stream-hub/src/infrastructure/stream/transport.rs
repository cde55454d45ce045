//! Transport
//!
//! Text-message transport under the STOMP session. Production uses a
//! WebSocket; tests drive the connection manager through
//! the in-memory transport behind the `test-util` feature.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

/// Transport errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// Could not open the connection.
    #[error("transport connect failed: {0}")]
    Connect(String),

    /// Write failed.
    #[error("transport send failed: {0}")]
    Send(String),

    /// Read failed.
    #[error("transport receive failed: {0}")]
    Receive(String),

    /// The link is already closed.
    #[error("transport closed")]
    Closed,
}

/// What a read produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// A text message.
    Text(String),
    /// Non-text traffic (pong, ping, binary); counts as liveness.
    Activity,
    /// The peer closed the link.
    Closed,
}

/// Opens links to the upstream server.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open a link to `url`.
    async fn open(&self, url: &str) -> Result<Box<dyn TransportLink>, TransportError>;
}

/// One open link.
///
/// `recv` must be cancel-safe: it is raced against other events.
#[async_trait]
pub trait TransportLink: Send {
    /// Send a text message.
    async fn send(&mut self, text: String) -> Result<(), TransportError>;

    /// Send a transport-level ping.
    async fn ping(&mut self) -> Result<(), TransportError>;

    /// Wait for the next inbound event.
    async fn recv(&mut self) -> Result<LinkEvent, TransportError>;

    /// Close the link. Errors are ignored.
    async fn close(&mut self);
}

/// WebSocket transport over `tokio-tungstenite`.
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketTransport;

#[async_trait]
impl Transport for WebSocketTransport {
    async fn open(&self, url: &str) -> Result<Box<dyn TransportLink>, TransportError> {
        let (stream, _response) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        tracing::debug!(url, "WebSocket opened");
        Ok(Box::new(WebSocketLink { stream }))
    }
}

struct WebSocketLink {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl TransportLink for WebSocketLink {
    async fn send(&mut self, text: String) -> Result<(), TransportError> {
        self.stream
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| TransportError::Send(e.to_string()))
    }

    async fn ping(&mut self) -> Result<(), TransportError> {
        self.stream
            .send(Message::Ping(Vec::new().into()))
            .await
            .map_err(|e| TransportError::Send(e.to_string()))
    }

    async fn recv(&mut self) -> Result<LinkEvent, TransportError> {
        match self.stream.next().await {
            Some(Ok(Message::Text(text))) => Ok(LinkEvent::Text(text.as_str().to_owned())),
            Some(Ok(Message::Close(frame))) => {
                tracing::info!(?frame, "Server sent close frame");
                Ok(LinkEvent::Closed)
            }
            // tungstenite answers pings on its own.
            Some(Ok(_)) => Ok(LinkEvent::Activity),
            Some(Err(e)) => Err(TransportError::Receive(e.to_string())),
            None => Ok(LinkEvent::Closed),
        }
    }

    async fn close(&mut self) {
        if let Err(e) = self.stream.close(None).await {
            tracing::debug!(error = %e, "WebSocket close failed");
        }
    }
}
