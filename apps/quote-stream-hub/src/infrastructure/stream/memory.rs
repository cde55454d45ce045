//! In-memory transport.
//!
//! Each successful `open` hands the test a [`MemoryPeer`] playing the server
//! side of the link. Opens can be scripted to fail.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::frame::{StompCommand, StompFrame};
use super::transport::{LinkEvent, Transport, TransportError, TransportLink};

enum ServerEvent {
    Text(String),
    Activity,
    Close,
    Fail(String),
}

#[derive(Default)]
struct Script {
    refusals: VecDeque<String>,
    opened: Vec<String>,
}

/// Scripted in-memory [`Transport`].
#[derive(Clone)]
pub struct MemoryTransport {
    script: Arc<Mutex<Script>>,
    peers: mpsc::UnboundedSender<MemoryPeer>,
}

/// Receives the server side of every accepted link.
pub struct MemoryServer {
    peers: mpsc::UnboundedReceiver<MemoryPeer>,
}

impl MemoryTransport {
    /// Create a transport and its server handle.
    #[must_use]
    pub fn new() -> (Self, MemoryServer) {
        let (peers_tx, peers_rx) = mpsc::unbounded_channel();
        (
            Self {
                script: Arc::new(Mutex::new(Script::default())),
                peers: peers_tx,
            },
            MemoryServer { peers: peers_rx },
        )
    }

    /// Fail the next `count` opens.
    pub fn refuse_next(&self, count: usize) {
        let mut script = self.script.lock();
        for _ in 0..count {
            script.refusals.push_back("connection refused".to_string());
        }
    }

    /// Number of open attempts so far, refused ones included.
    #[must_use]
    pub fn open_attempts(&self) -> usize {
        self.script.lock().opened.len()
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn open(&self, url: &str) -> Result<Box<dyn TransportLink>, TransportError> {
        {
            let mut script = self.script.lock();
            script.opened.push(url.to_string());
            if let Some(reason) = script.refusals.pop_front() {
                return Err(TransportError::Connect(reason));
            }
        }

        let (client_tx, client_rx) = mpsc::unbounded_channel();
        let (server_tx, server_rx) = mpsc::unbounded_channel();
        let pings = Arc::new(AtomicUsize::new(0));

        let peer = MemoryPeer {
            inbound: client_rx,
            outbound: server_tx,
            pings: Arc::clone(&pings),
            heart_beats: 0,
        };
        self.peers
            .send(peer)
            .map_err(|_| TransportError::Connect("memory server dropped".to_string()))?;

        Ok(Box::new(MemoryLink {
            outbound: client_tx,
            inbound: server_rx,
            pings,
        }))
    }
}

impl MemoryServer {
    /// Next accepted link, in open order.
    pub async fn accept(&mut self) -> Option<MemoryPeer> {
        self.peers.recv().await
    }

    /// Accept a link and complete the STOMP handshake on it.
    pub async fn accept_session(&mut self) -> Option<MemoryPeer> {
        let mut peer = self.accept().await?;
        let connect = peer.next_frame().await?;
        if connect.command != StompCommand::Connect {
            return None;
        }
        peer.send_frame(&StompFrame::new(StompCommand::Connected).header("version", "1.2"));
        Some(peer)
    }
}

/// Server side of one in-memory link.
pub struct MemoryPeer {
    inbound: mpsc::UnboundedReceiver<String>,
    outbound: mpsc::UnboundedSender<ServerEvent>,
    pings: Arc<AtomicUsize>,
    heart_beats: usize,
}

impl MemoryPeer {
    /// Next frame the client sent; `None` once the client hung up.
    pub async fn next_frame(&mut self) -> Option<StompFrame> {
        loop {
            let text = self.inbound.recv().await?;
            if let Some(frame) = self.accept_text(&text) {
                return Some(frame);
            }
        }
    }

    /// Frames already sent by the client, without waiting.
    pub fn drain_frames(&mut self) -> Vec<StompFrame> {
        let mut frames = Vec::new();
        while let Ok(text) = self.inbound.try_recv() {
            if let Some(frame) = self.accept_text(&text) {
                frames.push(frame);
            }
        }
        frames
    }

    /// STOMP heart-beats read so far by `next_frame` or `drain_frames`.
    #[must_use]
    pub const fn heart_beats(&self) -> usize {
        self.heart_beats
    }

    fn accept_text(&mut self, text: &str) -> Option<StompFrame> {
        match StompFrame::decode(text) {
            Ok(Some(frame)) => Some(frame),
            Ok(None) => {
                self.heart_beats += 1;
                None
            }
            Err(_) => None,
        }
    }

    /// Send a frame to the client.
    pub fn send_frame(&self, frame: &StompFrame) {
        self.send_text(frame.encode());
    }

    /// Send raw text to the client.
    pub fn send_text(&self, text: impl Into<String>) {
        let _ = self.outbound.send(ServerEvent::Text(text.into()));
    }

    /// Send a `MESSAGE` frame on `destination`.
    pub fn publish(&self, destination: &str, body: &str) {
        self.send_frame(
            &StompFrame::new(StompCommand::Message)
                .header("destination", destination)
                .header("message-id", "0")
                .body(body),
        );
    }

    /// Signal non-text liveness traffic.
    pub fn pong(&self) {
        let _ = self.outbound.send(ServerEvent::Activity);
    }

    /// Close the link from the server side.
    pub fn close(&self) {
        let _ = self.outbound.send(ServerEvent::Close);
    }

    /// Break the link with a read error.
    pub fn fail(&self, reason: &str) {
        let _ = self.outbound.send(ServerEvent::Fail(reason.to_string()));
    }

    /// Pings the client has sent.
    #[must_use]
    pub fn pings(&self) -> usize {
        self.pings.load(Ordering::SeqCst)
    }
}

struct MemoryLink {
    outbound: mpsc::UnboundedSender<String>,
    inbound: mpsc::UnboundedReceiver<ServerEvent>,
    pings: Arc<AtomicUsize>,
}

#[async_trait]
impl TransportLink for MemoryLink {
    async fn send(&mut self, text: String) -> Result<(), TransportError> {
        self.outbound.send(text).map_err(|_| TransportError::Closed)
    }

    async fn ping(&mut self) -> Result<(), TransportError> {
        self.pings.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn recv(&mut self) -> Result<LinkEvent, TransportError> {
        match self.inbound.recv().await {
            Some(ServerEvent::Text(text)) => Ok(LinkEvent::Text(text)),
            Some(ServerEvent::Activity) => Ok(LinkEvent::Activity),
            Some(ServerEvent::Close) | None => Ok(LinkEvent::Closed),
            Some(ServerEvent::Fail(reason)) => Err(TransportError::Receive(reason)),
        }
    }

    async fn close(&mut self) {
        self.inbound.close();
    }
}
