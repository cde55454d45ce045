//! Connection Manager
//!
//! Owns the single upstream STOMP session.
//!
//! # Lifecycle
//!
//! [`ConnectionManager::connect`] spawns one driver task per connection
//! intent. The driver opens the transport, performs the STOMP handshake,
//! restores every registered topic and then multiplexes cancellation, the
//! heartbeat ticker, subscription commands and inbound traffic. Failures
//! move the state to ERROR and the driver backs off before the next attempt;
//! a server-initiated close moves to DISCONNECTED and reconnects the same way.
//! Once the backoff policy is exhausted the state stays ERROR until the next
//! explicit `connect()`.
//!
//! [`ConnectionManager::disconnect`] cancels the driver (including any
//! backoff sleep or pending topic retry), clears the registry and resets the
//! policy before returning. Each driver carries a generation number and its
//! state transitions are ignored once its session has been replaced.
//!
//! # Subscriptions
//!
//! The registry outlives individual sessions. `subscribe` only records the
//! topic and nudges the driver; the driver sends `SUBSCRIBE` whenever a
//! session is up. A STOMP `ERROR` frame naming a topic schedules a linear
//! retry for that topic alone; after its retry budget the topic is FAILED.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, watch};
use tokio_stream::wrappers::WatchStream;
use tokio_util::sync::CancellationToken;

use super::codec::StreamCodec;
use super::frame::{FrameError, StompCommand, StompFrame};
use super::heartbeat::{HeartbeatConfig, HeartbeatEvent, HeartbeatState};
use super::reconnect::{ReconnectConfig, ReconnectPolicy, TopicRetryConfig};
use super::transport::{LinkEvent, Transport, TransportError, TransportLink};
use crate::application::ports::{InboundSink, TopicSubscriber};
use crate::domain::connection::ConnectionState;
use crate::domain::topic::Topic;
use crate::infrastructure::metrics;

// =============================================================================
// Error Type
// =============================================================================

/// Errors that end one session attempt.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectionError {
    /// Transport failure.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Handshake frame could not be parsed.
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    /// Server rejected the `CONNECT`.
    #[error("handshake rejected: {0}")]
    HandshakeRejected(String),

    /// No `CONNECTED` within the handshake timeout.
    #[error("handshake timed out after {0:?}")]
    HandshakeTimeout(Duration),

    /// Link closed during the handshake.
    #[error("connection closed during handshake")]
    ClosedDuringHandshake,

    /// Server `ERROR` frame not tied to a topic.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// No inbound traffic within the heartbeat timeout.
    #[error("heartbeat timeout")]
    HeartbeatTimeout,
}

// =============================================================================
// Configuration
// =============================================================================

/// Connection manager settings.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// WebSocket URL.
    pub url: String,
    /// STOMP `host` header.
    pub host: String,
    /// Bearer token for the `CONNECT` frame.
    pub access_token: Option<String>,
    /// Connection backoff.
    pub reconnect: ReconnectConfig,
    /// Ping interval and silence timeout.
    pub heartbeat: HeartbeatConfig,
    /// Time allowed between opening the transport and `CONNECTED`.
    pub handshake_timeout: Duration,
    /// Retry schedule of ordinary topics.
    pub topic_retry: TopicRetryConfig,
    /// Retry schedule of the priority topic.
    pub priority_topic_retry: TopicRetryConfig,
    /// Topic retried with `priority_topic_retry`.
    pub priority_topic: Option<Topic>,
}

impl ConnectionConfig {
    /// Defaults for `url`, with the host taken from the URL.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        let url = url.into();
        let host = host_of(&url);
        Self {
            url,
            host,
            access_token: None,
            reconnect: ReconnectConfig::default(),
            heartbeat: HeartbeatConfig::default(),
            handshake_timeout: Duration::from_secs(10),
            topic_retry: TopicRetryConfig::ORDINARY,
            priority_topic_retry: TopicRetryConfig::PRIORITY,
            priority_topic: None,
        }
    }

    fn retry_for(&self, topic: &Topic) -> TopicRetryConfig {
        if self.priority_topic.as_ref() == Some(topic) {
            self.priority_topic_retry
        } else {
            self.topic_retry
        }
    }
}

fn host_of(url: &str) -> String {
    let rest = url.split_once("://").map_or(url, |(_, rest)| rest);
    let authority = rest.split(['/', '?', '#']).next().unwrap_or(rest);
    let authority = authority.rsplit_once('@').map_or(authority, |(_, host)| host);
    authority.to_string()
}

// =============================================================================
// Subscription Registry
// =============================================================================

/// Lifecycle of one registered topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    /// Registered; not yet sent on the current session.
    Pending,
    /// `SUBSCRIBE` sent on the current session.
    Active,
    /// Rejected by the server; a retry is scheduled.
    Retrying,
    /// Retry budget exhausted.
    Failed,
}

/// Bookkeeping of one registered topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubscriptionState {
    /// Topic destination.
    pub topic: Topic,
    /// STOMP subscription id.
    pub subscription_id: String,
    /// Current status.
    pub status: SubscriptionStatus,
    /// Server rejections since registration.
    pub retry_count: u32,
}

impl SubscriptionState {
    /// Whether the topic is live on the current session.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status == SubscriptionStatus::Active
    }
}

/// Subscription lifecycle notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionEvent {
    /// `SUBSCRIBE` was sent.
    Active(Topic),
    /// Rejected; retrying after `delay`.
    Retrying {
        /// Topic.
        topic: Topic,
        /// Retry number, 1-based.
        attempt: u32,
        /// Delay before the retry.
        delay: Duration,
    },
    /// Retry budget exhausted.
    Failed(Topic),
}

#[derive(Debug, Default)]
struct Registry {
    topics: BTreeMap<Topic, SubscriptionState>,
    next_id: u64,
}

impl Registry {
    fn by_id(&self, id: &str) -> Option<&Topic> {
        self.topics
            .values()
            .find(|state| state.subscription_id == id)
            .map(|state| &state.topic)
    }

    fn mark_all_pending(&mut self) {
        for state in self.topics.values_mut() {
            if matches!(state.status, SubscriptionStatus::Active) {
                state.status = SubscriptionStatus::Pending;
            }
        }
    }

    fn count(&self, status: SubscriptionStatus) -> usize {
        self.topics.values().filter(|s| s.status == status).count()
    }
}

// =============================================================================
// Stats
// =============================================================================

/// Connection and subscription snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionStats {
    /// Current state.
    pub state: ConnectionState,
    /// Reconnect attempts since the last successful handshake.
    pub reconnect_attempts: u32,
    /// Most recent backoff delay, in milliseconds.
    pub current_backoff_ms: Option<u64>,
    /// Topics live on the current session.
    pub active_topics: usize,
    /// Topics waiting for a session.
    pub pending_topics: usize,
    /// Topics waiting for a retry.
    pub retrying_topics: usize,
    /// Topics that exhausted their retries.
    pub failed_topics: usize,
}

// =============================================================================
// Connection Manager
// =============================================================================

#[derive(Debug)]
enum Command {
    Subscribe(Topic),
    Unsubscribe(String),
    Retry(Topic),
}

struct Session {
    cancel: CancellationToken,
    commands: mpsc::UnboundedSender<Command>,
    generation: u64,
}

enum Step {
    Cancelled,
    Tick,
    Command(Command),
    Link(Result<LinkEvent, TransportError>),
}

/// Upstream session owner.
pub struct ConnectionManager {
    config: ConnectionConfig,
    transport: Arc<dyn Transport>,
    codec: StreamCodec,
    sink: Arc<dyn InboundSink>,
    state_tx: watch::Sender<ConnectionState>,
    registry: Mutex<Registry>,
    session: Mutex<Option<Session>>,
    policy: Mutex<ReconnectPolicy>,
    events: broadcast::Sender<SubscriptionEvent>,
    generation: AtomicU64,
}

impl ConnectionManager {
    /// Create a disconnected manager.
    #[must_use]
    pub fn new(
        config: ConnectionConfig,
        transport: Arc<dyn Transport>,
        codec: StreamCodec,
        sink: Arc<dyn InboundSink>,
    ) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let (events, _) = broadcast::channel(256);
        let policy = ReconnectPolicy::new(config.reconnect.clone());
        Self {
            config,
            transport,
            codec,
            sink,
            state_tx,
            registry: Mutex::new(Registry::default()),
            session: Mutex::new(None),
            policy: Mutex::new(policy),
            events,
            generation: AtomicU64::new(0),
        }
    }

    /// Start connecting. No-op while a connection is being attempted,
    /// established or awaiting a reconnect.
    pub fn connect(self: &Arc<Self>) {
        let mut session = self.session.lock();
        if session.is_some() {
            tracing::debug!(state = %self.state(), "connect() ignored, connection already active");
            return;
        }

        self.policy.lock().reset();
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let cancel = CancellationToken::new();
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        *session = Some(Session {
            cancel: cancel.clone(),
            commands: commands_tx.clone(),
            generation,
        });
        self.set_state(ConnectionState::Connecting);
        drop(session);

        tracing::info!(url = %self.config.url, generation, "Connecting to quote stream");
        let this = Arc::clone(self);
        tokio::spawn(async move {
            this.drive(generation, cancel, commands_tx, commands_rx).await;
        });
    }

    /// Close the session and forget every subscription. Never reconnects.
    pub fn disconnect(&self) {
        if let Some(session) = self.session.lock().take() {
            session.cancel.cancel();
        }
        self.registry.lock().topics.clear();
        self.policy.lock().reset();
        self.set_state(ConnectionState::Disconnected);
        metrics::set_active_topics(0);
        tracing::info!("Disconnected from quote stream");
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    /// Receiver of state changes.
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// State changes as a stream, starting with the current state.
    #[must_use]
    pub fn state_stream(&self) -> WatchStream<ConnectionState> {
        WatchStream::new(self.state_tx.subscribe())
    }

    /// Receiver of subscription lifecycle events.
    #[must_use]
    pub fn subscription_events(&self) -> broadcast::Receiver<SubscriptionEvent> {
        self.events.subscribe()
    }

    /// Registered topics.
    #[must_use]
    pub fn subscriptions(&self) -> Vec<SubscriptionState> {
        self.registry.lock().topics.values().cloned().collect()
    }

    /// Bookkeeping of one topic.
    #[must_use]
    pub fn subscription(&self, topic: &Topic) -> Option<SubscriptionState> {
        self.registry.lock().topics.get(topic).cloned()
    }

    /// Snapshot of connection and subscription state.
    #[must_use]
    pub fn stats(&self) -> ConnectionStats {
        let (reconnect_attempts, last_delay) = {
            let policy = self.policy.lock();
            (policy.attempt_count(), policy.last_delay())
        };
        let registry = self.registry.lock();
        ConnectionStats {
            state: self.state(),
            reconnect_attempts,
            current_backoff_ms: last_delay.map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX)),
            active_topics: registry.count(SubscriptionStatus::Active),
            pending_topics: registry.count(SubscriptionStatus::Pending),
            retrying_topics: registry.count(SubscriptionStatus::Retrying),
            failed_topics: registry.count(SubscriptionStatus::Failed),
        }
    }

    // -------------------------------------------------------------------------
    // State
    // -------------------------------------------------------------------------

    fn set_state(&self, state: ConnectionState) {
        let previous = self.state_tx.send_replace(state);
        if previous != state {
            tracing::info!(from = %previous, to = %state, "Connection state changed");
            metrics::set_connection_state(state);
            self.sink.on_state_change(previous, state);
        }
    }

    /// Apply a transition if `generation` still owns the session.
    fn transition(&self, generation: u64, state: ConnectionState) -> bool {
        let session = self.session.lock();
        if session.as_ref().is_none_or(|s| s.generation != generation) {
            return false;
        }
        self.set_state(state);
        true
    }

    /// Give up: drop the session and park in ERROR.
    fn give_up(&self, generation: u64) {
        let mut session = self.session.lock();
        if session.as_ref().is_some_and(|s| s.generation == generation) {
            *session = None;
            self.set_state(ConnectionState::Error);
        }
    }

    // -------------------------------------------------------------------------
    // Driver
    // -------------------------------------------------------------------------

    async fn drive(
        self: Arc<Self>,
        generation: u64,
        cancel: CancellationToken,
        commands_tx: mpsc::UnboundedSender<Command>,
        mut commands: mpsc::UnboundedReceiver<Command>,
    ) {
        loop {
            let outcome = self
                .run_session(generation, &cancel, &commands_tx, &mut commands)
                .await;
            if cancel.is_cancelled() {
                tracing::debug!(generation, "Connection driver cancelled");
                return;
            }

            match outcome {
                Ok(()) => {
                    tracing::info!("Quote stream closed by server");
                    self.transition(generation, ConnectionState::Disconnected);
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Quote stream connection failed");
                    self.transition(generation, ConnectionState::Error);
                }
            }
            self.registry.lock().mark_all_pending();
            metrics::set_active_topics(0);

            let (delay, attempt, max_attempts) = {
                let mut policy = self.policy.lock();
                (policy.next_delay(), policy.attempt_count(), policy.max_attempts())
            };
            let Some(delay) = delay else {
                tracing::error!(
                    attempts = max_attempts,
                    "Reconnect attempts exhausted, staying in ERROR"
                );
                self.give_up(generation);
                return;
            };

            tracing::info!(attempt, delay_ms = delay.as_millis(), "Reconnecting to quote stream");
            metrics::record_reconnect_attempt();
            if !self.transition(generation, ConnectionState::Reconnecting) {
                return;
            }
            tokio::select! {
                () = cancel.cancelled() => return,
                () = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// One session attempt. `Ok(())` means the server closed the link or the
    /// driver was cancelled.
    async fn run_session(
        &self,
        generation: u64,
        cancel: &CancellationToken,
        commands_tx: &mpsc::UnboundedSender<Command>,
        commands: &mut mpsc::UnboundedReceiver<Command>,
    ) -> Result<(), ConnectionError> {
        self.transition(generation, ConnectionState::Connecting);

        let opened = tokio::select! {
            () = cancel.cancelled() => return Ok(()),
            opened = self.transport.open(&self.config.url) => opened,
        };
        let mut link = opened?;

        let connect = StompFrame::connect(
            &self.config.host,
            &self.config.heartbeat.stomp_header(),
            self.config.access_token.as_deref(),
        );
        link.send(connect.encode()).await?;

        let handshake = tokio::select! {
            () = cancel.cancelled() => {
                link.close().await;
                return Ok(());
            }
            handshake = tokio::time::timeout(
                self.config.handshake_timeout,
                await_connected(link.as_mut()),
            ) => handshake,
        };
        match handshake {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                link.close().await;
                return Err(e);
            }
            Err(_elapsed) => {
                link.close().await;
                return Err(ConnectionError::HandshakeTimeout(self.config.handshake_timeout));
            }
        }

        self.policy.lock().reset();
        if !self.transition(generation, ConnectionState::Connected) {
            link.close().await;
            return Ok(());
        }

        let heartbeat = HeartbeatState::new(self.config.heartbeat);
        let mut ticker = heartbeat.interval();
        let mut sent: HashMap<String, Topic> = HashMap::new();
        self.restore_subscriptions(link.as_mut(), &mut sent).await?;

        loop {
            let step = tokio::select! {
                biased;
                () = cancel.cancelled() => Step::Cancelled,
                _ = ticker.tick() => Step::Tick,
                Some(command) = commands.recv() => Step::Command(command),
                event = link.recv() => Step::Link(event),
            };

            match step {
                Step::Cancelled => {
                    let _ = link.send(StompFrame::disconnect().encode()).await;
                    link.close().await;
                    return Ok(());
                }
                Step::Tick => match heartbeat.check() {
                    HeartbeatEvent::SendPing => {
                        link.send(StompFrame::HEART_BEAT.to_string()).await?;
                        link.ping().await?;
                    }
                    HeartbeatEvent::Timeout => {
                        link.close().await;
                        return Err(ConnectionError::HeartbeatTimeout);
                    }
                },
                Step::Command(command) => {
                    self.apply_command(command, link.as_mut(), &mut sent).await?;
                }
                Step::Link(event) => match event? {
                    LinkEvent::Text(text) => {
                        heartbeat.record_activity();
                        if let Some(topic) = self.handle_text(&text)? {
                            sent.retain(|_, t| *t != topic);
                            self.schedule_retry(&topic, cancel, commands_tx);
                        }
                    }
                    LinkEvent::Activity => heartbeat.record_activity(),
                    LinkEvent::Closed => {
                        link.close().await;
                        return Ok(());
                    }
                },
            }
        }
    }

    async fn restore_subscriptions(
        &self,
        link: &mut dyn TransportLink,
        sent: &mut HashMap<String, Topic>,
    ) -> Result<(), TransportError> {
        let targets: Vec<(Topic, String)> = self
            .registry
            .lock()
            .topics
            .values()
            .filter(|s| s.status != SubscriptionStatus::Failed)
            .map(|s| (s.topic.clone(), s.subscription_id.clone()))
            .collect();

        if !targets.is_empty() {
            tracing::info!(topics = targets.len(), "Restoring subscriptions");
        }
        for (topic, id) in targets {
            self.send_subscribe(link, &topic, &id, sent).await?;
        }
        Ok(())
    }

    async fn apply_command(
        &self,
        command: Command,
        link: &mut dyn TransportLink,
        sent: &mut HashMap<String, Topic>,
    ) -> Result<(), TransportError> {
        match command {
            Command::Subscribe(topic) => {
                let target = self.registry.lock().topics.get(&topic).and_then(|s| {
                    (s.status != SubscriptionStatus::Failed && !sent.contains_key(&s.subscription_id))
                        .then(|| s.subscription_id.clone())
                });
                if let Some(id) = target {
                    self.send_subscribe(link, &topic, &id, sent).await?;
                }
            }
            Command::Retry(topic) => {
                let target = self.registry.lock().topics.get(&topic).and_then(|s| {
                    (s.status == SubscriptionStatus::Retrying).then(|| s.subscription_id.clone())
                });
                if let Some(id) = target {
                    tracing::info!(topic = %topic, "Retrying subscription");
                    self.send_subscribe(link, &topic, &id, sent).await?;
                }
            }
            Command::Unsubscribe(id) => {
                if sent.remove(&id).is_some() {
                    link.send(StompFrame::unsubscribe(&id).encode()).await?;
                }
            }
        }
        Ok(())
    }

    async fn send_subscribe(
        &self,
        link: &mut dyn TransportLink,
        topic: &Topic,
        id: &str,
        sent: &mut HashMap<String, Topic>,
    ) -> Result<(), TransportError> {
        link.send(StompFrame::subscribe(id, topic.as_str()).encode())
            .await?;
        sent.insert(id.to_string(), topic.clone());

        let mut registry = self.registry.lock();
        if let Some(state) = registry.topics.get_mut(topic) {
            state.status = SubscriptionStatus::Active;
        }
        metrics::set_active_topics(registry.count(SubscriptionStatus::Active));
        drop(registry);

        tracing::debug!(topic = %topic, id, "Subscribed");
        let _ = self.events.send(SubscriptionEvent::Active(topic.clone()));
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Inbound
    // -------------------------------------------------------------------------

    /// Handle one inbound text message. Returns a topic the server rejected.
    fn handle_text(&self, text: &str) -> Result<Option<Topic>, ConnectionError> {
        metrics::record_frame_received();
        let frame = match StompFrame::decode(text) {
            Ok(Some(frame)) => frame,
            Ok(None) => return Ok(None),
            Err(e) => {
                tracing::warn!(error = %e, "Dropping malformed STOMP frame");
                metrics::record_parse_failure("frame");
                return Ok(None);
            }
        };

        match frame.command {
            StompCommand::Message => {
                self.handle_message(&frame);
                Ok(None)
            }
            StompCommand::Error => self.handle_error_frame(&frame).map(Some),
            command => {
                tracing::debug!(command = command.as_str(), "Ignoring control frame");
                Ok(None)
            }
        }
    }

    fn handle_message(&self, frame: &StompFrame) {
        let Some(destination) = frame.get("destination") else {
            tracing::warn!("Dropping MESSAGE frame without destination");
            metrics::record_parse_failure("frame");
            return;
        };

        match self.codec.decode(destination, &frame.body) {
            Ok(messages) => {
                let started = std::time::Instant::now();
                for message in messages {
                    self.sink.on_message(message);
                }
                metrics::record_ingest_duration(started.elapsed());
            }
            Err(e) => {
                tracing::warn!(destination, error = %e, "Dropping undecodable message");
                metrics::record_parse_failure("payload");
            }
        }
    }

    /// A topic-specific `ERROR` yields that topic; anything else fails the session.
    fn handle_error_frame(&self, frame: &StompFrame) -> Result<Topic, ConnectionError> {
        let message = frame
            .get("message")
            .map_or_else(|| frame.body.trim().to_string(), ToString::to_string);

        let registry = self.registry.lock();
        let topic = frame
            .get("destination")
            .map(Topic::new)
            .filter(|t| registry.topics.contains_key(t))
            .or_else(|| frame.get("subscription").and_then(|id| registry.by_id(id).cloned()));
        drop(registry);

        match topic {
            Some(topic) => {
                tracing::warn!(topic = %topic, error = %message, "Server rejected subscription");
                Ok(topic)
            }
            None => Err(ConnectionError::Protocol(message)),
        }
    }

    fn schedule_retry(
        &self,
        topic: &Topic,
        cancel: &CancellationToken,
        commands_tx: &mpsc::UnboundedSender<Command>,
    ) {
        let retry = self.config.retry_for(topic);
        let scheduled = {
            let mut registry = self.registry.lock();
            let Some(state) = registry.topics.get_mut(topic) else {
                return;
            };
            state.retry_count += 1;
            let attempt = state.retry_count;
            if let Some(delay) = retry.delay_for(attempt) {
                state.status = SubscriptionStatus::Retrying;
                Some((attempt, delay))
            } else {
                state.status = SubscriptionStatus::Failed;
                None
            }
        };

        let Some((attempt, delay)) = scheduled else {
            tracing::error!(topic = %topic, retries = retry.max_retries, "Subscription failed permanently");
            metrics::record_subscription_failure();
            let _ = self.events.send(SubscriptionEvent::Failed(topic.clone()));
            return;
        };

        tracing::info!(topic = %topic, attempt, delay_ms = delay.as_millis(), "Scheduling subscription retry");
        metrics::record_subscription_retry();
        let _ = self.events.send(SubscriptionEvent::Retrying {
            topic: topic.clone(),
            attempt,
            delay,
        });

        let cancel = cancel.clone();
        let commands_tx = commands_tx.clone();
        let topic = topic.clone();
        tokio::spawn(async move {
            tokio::select! {
                () = cancel.cancelled() => {}
                () = tokio::time::sleep(delay) => {
                    let _ = commands_tx.send(Command::Retry(topic));
                }
            }
        });
    }
}

/// Wait for `CONNECTED`, skipping heart-beats and unrelated traffic.
async fn await_connected(link: &mut dyn TransportLink) -> Result<(), ConnectionError> {
    loop {
        match link.recv().await? {
            LinkEvent::Text(text) => match StompFrame::decode(&text)? {
                Some(frame) if frame.command == StompCommand::Connected => return Ok(()),
                Some(frame) if frame.command == StompCommand::Error => {
                    let reason = frame
                        .get("message")
                        .map_or_else(|| frame.body.clone(), ToString::to_string);
                    return Err(ConnectionError::HandshakeRejected(reason));
                }
                _ => {}
            },
            LinkEvent::Activity => {}
            LinkEvent::Closed => return Err(ConnectionError::ClosedDuringHandshake),
        }
    }
}

impl TopicSubscriber for ConnectionManager {
    fn subscribe(&self, topic: &Topic) {
        {
            let mut registry = self.registry.lock();
            let registry = &mut *registry;
            match registry.topics.get_mut(topic) {
                Some(state) if state.status != SubscriptionStatus::Failed => return,
                Some(state) => {
                    state.status = SubscriptionStatus::Pending;
                    state.retry_count = 0;
                }
                None => {
                    let subscription_id = format!("sub-{}", registry.next_id);
                    registry.next_id += 1;
                    registry.topics.insert(
                        topic.clone(),
                        SubscriptionState {
                            topic: topic.clone(),
                            subscription_id,
                            status: SubscriptionStatus::Pending,
                            retry_count: 0,
                        },
                    );
                }
            }
        }

        if let Some(session) = self.session.lock().as_ref() {
            let _ = session.commands.send(Command::Subscribe(topic.clone()));
        }
    }

    fn unsubscribe(&self, topic: &Topic) {
        let Some(state) = self.registry.lock().topics.remove(topic) else {
            return;
        };
        if let Some(session) = self.session.lock().as_ref() {
            let _ = session
                .commands
                .send(Command::Unsubscribe(state.subscription_id));
        }
    }

    fn is_subscribed(&self, topic: &Topic) -> bool {
        self.registry
            .lock()
            .topics
            .get(topic)
            .is_some_and(|s| s.status != SubscriptionStatus::Failed)
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("url", &self.config.url)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ports::InboundMessage;
    use crate::domain::chart::seoul_offset;
    use crate::domain::topic::TopicLayout;
    use crate::infrastructure::stream::memory::{MemoryServer, MemoryTransport};

    #[derive(Default)]
    struct RecordingSink {
        messages: Mutex<Vec<InboundMessage>>,
        states: Mutex<Vec<(ConnectionState, ConnectionState)>>,
    }

    impl InboundSink for RecordingSink {
        fn on_message(&self, message: InboundMessage) {
            self.messages.lock().push(message);
        }

        fn on_state_change(&self, previous: ConnectionState, current: ConnectionState) {
            self.states.lock().push((previous, current));
        }
    }

    fn manager() -> (Arc<ConnectionManager>, MemoryTransport, MemoryServer, Arc<RecordingSink>) {
        let (transport, server) = MemoryTransport::new();
        let sink = Arc::new(RecordingSink::default());
        let manager = Arc::new(ConnectionManager::new(
            ConnectionConfig::new("ws://quotes.test/ws"),
            Arc::new(transport.clone()),
            StreamCodec::new(TopicLayout::default(), seoul_offset()),
            sink.clone(),
        ));
        (manager, transport, server, sink)
    }

    async fn wait_for(manager: &ConnectionManager, state: ConnectionState) {
        let mut rx = manager.watch_state();
        rx.wait_for(|s| *s == state).await.unwrap();
    }

    #[test]
    fn host_is_taken_from_url() {
        assert_eq!(host_of("wss://quotes.example.com/ws?x=1"), "quotes.example.com");
        assert_eq!(host_of("ws://user@localhost:8080"), "localhost:8080");
    }

    #[test]
    fn subscribe_is_idempotent_while_disconnected() {
        let (manager, _, _, _) = manager();
        let topic = Topic::new("/topic/stocks/005930");

        manager.subscribe(&topic);
        manager.subscribe(&topic);

        let subs = manager.subscriptions();
        assert_eq!(subs.len(), 1);
        assert_eq!(subs[0].subscription_id, "sub-0");
        assert_eq!(subs[0].status, SubscriptionStatus::Pending);
        assert!(manager.is_subscribed(&topic));
    }

    #[tokio::test]
    async fn handshake_then_restores_pending_topics() {
        let (manager, _, mut server, _) = manager();
        manager.subscribe(&Topic::new("/topic/stocks/005930"));

        manager.connect();
        let mut peer = server.accept_session().await.unwrap();
        wait_for(&manager, ConnectionState::Connected).await;

        let frame = peer.next_frame().await.unwrap();
        assert_eq!(frame.command, StompCommand::Subscribe);
        assert_eq!(frame.get("destination"), Some("/topic/stocks/005930"));
        assert_eq!(frame.get("id"), Some("sub-0"));
    }

    #[tokio::test]
    async fn routes_messages_and_drops_garbage() {
        let (manager, _, mut server, sink) = manager();
        manager.connect();
        let peer = server.accept_session().await.unwrap();
        wait_for(&manager, ConnectionState::Connected).await;

        peer.publish("/topic/stocks/005930", "{not json");
        peer.send_text("BOGUS\n\n\0");
        peer.publish("/topic/stocks/005930", r#"{"tradePrice":75000}"#);

        tokio::time::timeout(Duration::from_secs(5), async {
            while sink.messages.lock().is_empty() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
        assert_eq!(sink.messages.lock().len(), 1);
        assert!(manager.state().is_connected());
    }

    #[tokio::test]
    async fn untargeted_error_frame_fails_the_session() {
        let (manager, _, mut server, sink) = manager();
        manager.connect();
        let peer = server.accept_session().await.unwrap();
        wait_for(&manager, ConnectionState::Connected).await;

        peer.send_frame(&StompFrame::new(StompCommand::Error).header("message", "boom"));
        wait_for(&manager, ConnectionState::Reconnecting).await;

        let states = sink.states.lock().clone();
        assert!(states.contains(&(ConnectionState::Connected, ConnectionState::Error)));
    }

    #[tokio::test]
    async fn connect_while_active_is_a_no_op() {
        let (manager, transport, mut server, _) = manager();
        manager.connect();
        manager.connect();
        let _peer = server.accept_session().await.unwrap();
        wait_for(&manager, ConnectionState::Connected).await;
        manager.connect();

        assert_eq!(transport.open_attempts(), 1);
    }

    #[tokio::test]
    async fn disconnect_clears_registry_and_stays_down() {
        let (manager, transport, mut server, _) = manager();
        manager.subscribe(&Topic::new("/topic/stocks/005930"));
        manager.connect();
        let mut peer = server.accept_session().await.unwrap();
        wait_for(&manager, ConnectionState::Connected).await;

        manager.disconnect();

        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert!(manager.subscriptions().is_empty());
        // Subscribe, then the DISCONNECT frame, then hang-up.
        let mut commands = Vec::new();
        while let Some(frame) = peer.next_frame().await {
            commands.push(frame.command);
        }
        assert_eq!(commands.last(), Some(&StompCommand::Disconnect));
        assert_eq!(transport.open_attempts(), 1);
    }
}
