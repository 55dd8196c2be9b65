//! The realtime transport client.
//!
//! Owns at most one live connection. Status changes and inbound events are
//! published on the [`EventDispatcher`]; no method here returns a connection
//! error. Lost connections are retried with exponential backoff until the
//! attempt budget runs out, then the client settles in `Disconnected` and
//! publishes [`DisconnectReason::RetriesExhausted`].
//!
//! An automatic reconnect keeps dispatcher subscriptions and replays channel
//! membership (user channel, common chat). An explicit [`disconnect`]
//! forgets both.
//!
//! [`disconnect`]: TransportClient::disconnect

mod link;

pub use link::{
    ConnectRequest, Connector, Link, LinkEvent, LinkPeer, TransportError, WsConnector,
};

use crate::backoff::Backoff;
use crate::config::{ClientConfig, ReconnectConfig};
use crate::dispatcher::EventDispatcher;
use crate::storage::CredentialStore;
use dalali_core::{
    ChatMessage, ClientEvent, ConnectionState, ConnectionStatus, DisconnectReason, MessageRead,
    ServerEvent, UserProfile,
};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub url: String,
    pub connect_timeout: Duration,
    pub reconnect: ReconnectConfig,
}

impl From<&ClientConfig> for TransportConfig {
    fn from(config: &ClientConfig) -> Self {
        Self {
            url: config.socket_url.clone(),
            connect_timeout: config.connect_timeout(),
            reconnect: config.reconnect,
        }
    }
}

/// Point-in-time view of the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportSnapshot {
    pub state: ConnectionState,
    pub connected: bool,
    pub connection_id: Option<u64>,
    /// Reconnect attempts since the last successful connect.
    pub attempts: u32,
}

struct State {
    phase: ConnectionState,
    /// Bumped by every `connect()` and `disconnect()`. Work started under an
    /// older epoch is discarded when it completes.
    epoch: u64,
    outbound: Option<mpsc::UnboundedSender<String>>,
    connection_id: Option<u64>,
    connections_opened: u64,
    backoff: Backoff,
    user: Option<UserProfile>,
    common_chat: bool,
    reader: Option<JoinHandle<()>>,
    retry: Option<JoinHandle<()>>,
}

struct Inner {
    config: TransportConfig,
    connector: Arc<dyn Connector>,
    store: Arc<dyn CredentialStore>,
    events: EventDispatcher,
    state: Mutex<State>,
}

/// Handle to the process-wide realtime connection. Clones share it.
#[derive(Clone)]
pub struct TransportClient {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for TransportClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportClient")
            .field("url", &self.inner.config.url)
            .field("snapshot", &self.snapshot())
            .finish()
    }
}

impl TransportClient {
    pub fn new(
        config: TransportConfig,
        connector: Arc<dyn Connector>,
        store: Arc<dyn CredentialStore>,
    ) -> Self {
        let backoff = Backoff::new(config.reconnect);
        Self {
            inner: Arc::new(Inner {
                config,
                connector,
                store,
                events: EventDispatcher::new(),
                state: Mutex::new(State {
                    phase: ConnectionState::Disconnected,
                    epoch: 0,
                    outbound: None,
                    connection_id: None,
                    connections_opened: 0,
                    backoff,
                    user: None,
                    common_chat: false,
                    reader: None,
                    retry: None,
                }),
            }),
        }
    }

    /// The dispatcher inbound events and status changes are published on.
    pub fn events(&self) -> &EventDispatcher {
        &self.inner.events
    }

    pub fn snapshot(&self) -> TransportSnapshot {
        let state = self.inner.state();
        TransportSnapshot {
            state: state.phase,
            connected: state.phase == ConnectionState::Connected,
            connection_id: state.connection_id,
            attempts: state.backoff.attempts(),
        }
    }

    pub fn current_user(&self) -> Option<UserProfile> {
        self.inner.state().user.clone()
    }

    /// Open the connection, announcing `user` once it is up.
    ///
    /// Returns after the first attempt has either connected or scheduled a
    /// retry. Does nothing while connected or connecting. A pending retry is
    /// replaced by an immediate attempt with a fresh attempt budget.
    pub async fn connect(&self, user: Option<UserProfile>) {
        let epoch = {
            let mut state = self.inner.state();
            match state.phase {
                ConnectionState::Connected | ConnectionState::Connecting => {
                    if user.is_some() && state.user.as_ref().map(|u| &u.id) != user.as_ref().map(|u| &u.id) {
                        tracing::warn!("connect() for another user while connected; disconnect first");
                    }
                    return;
                }
                ConnectionState::Reconnecting => {
                    if let Some(retry) = state.retry.take() {
                        retry.abort();
                    }
                }
                ConnectionState::Disconnected => {}
            }
            state.epoch += 1;
            state.phase = ConnectionState::Connecting;
            state.backoff.reset();
            state.user = user;
            state.epoch
        };
        self.inner.attempt(epoch).await;
    }

    /// Tear the connection down, cancel any pending retry, and drop every
    /// dispatcher subscription. Safe to call repeatedly.
    pub fn disconnect(&self) {
        let was_active = {
            let mut state = self.inner.state();
            state.epoch += 1;
            if let Some(retry) = state.retry.take() {
                retry.abort();
            }
            if let Some(reader) = state.reader.take() {
                reader.abort();
            }
            let active = state.phase != ConnectionState::Disconnected || state.outbound.is_some();
            state.outbound = None;
            state.connection_id = None;
            state.phase = ConnectionState::Disconnected;
            state.user = None;
            state.common_chat = false;
            state.backoff.reset();
            active
        };
        if was_active {
            tracing::info!("Disconnected from {}", self.inner.config.url);
            self.inner
                .events
                .publish(ConnectionStatus::Disconnected(DisconnectReason::Requested));
        }
        self.inner.events.clear();
    }

    /// Join the shared chat channel.
    ///
    /// Membership is remembered either way and sent with the next handshake;
    /// `false` with a warning when the join could not be sent now.
    pub fn join_common_chat(&self) -> bool {
        let mut state = self.inner.state();
        state.common_chat = true;
        if !Inner::send_locked(&state, &ClientEvent::JoinCommonChat) {
            tracing::warn!("join_common_chat() while {:?}; joining on connect", state.phase);
            return false;
        }
        true
    }

    /// Leave the shared chat channel. Sends nothing, with a warning, when not
    /// connected.
    pub fn leave_common_chat(&self) -> bool {
        let mut state = self.inner.state();
        state.common_chat = false;
        if !Inner::send_locked(&state, &ClientEvent::LeaveCommonChat) {
            tracing::warn!("leave_common_chat() while {:?}; ignored", state.phase);
            return false;
        }
        true
    }

    pub fn send_direct_message(&self, message: &ChatMessage) -> bool {
        self.emit(&ClientEvent::NewMessage(message.clone()))
    }

    pub fn send_common_chat_message(&self, message: &ChatMessage) -> bool {
        self.emit(&ClientEvent::NewCommonChatMessage(message.clone()))
    }

    pub fn mark_message_read(&self, receipt: &MessageRead) -> bool {
        self.emit(&ClientEvent::MarkMessageRead(receipt.clone()))
    }

    /// Fire-and-forget send. `false` when not connected.
    pub fn emit(&self, event: &ClientEvent) -> bool {
        let state = self.inner.state();
        let sent = Inner::send_locked(&state, event);
        if !sent {
            tracing::warn!("Dropping {} while {:?}", event.name(), state.phase);
        }
        sent
    }
}

impl Inner {
    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn send_locked(state: &State, event: &ClientEvent) -> bool {
        match (&state.outbound, state.phase) {
            (Some(outbound), ConnectionState::Connected) => send_frame(outbound, event),
            _ => false,
        }
    }

    async fn attempt(self: &Arc<Self>, epoch: u64) {
        let request = ConnectRequest {
            url: self.config.url.clone(),
            credential: self.store.load(),
            timeout: self.config.connect_timeout,
        };
        tracing::debug!(
            "Connecting to {} ({})",
            request.url,
            if request.credential.is_some() { "authenticated" } else { "anonymous" }
        );
        match self.connector.open(request).await {
            Ok(link) => self.on_open(epoch, link),
            Err(e) => {
                tracing::warn!("Connection to {} failed: {}", self.config.url, e);
                self.schedule_retry(epoch);
            }
        }
    }

    fn on_open(self: &Arc<Self>, epoch: u64, link: Link) {
        let Link { outbound, inbound } = link;
        let connection_id = {
            let mut state = self.state();
            if state.epoch != epoch {
                tracing::debug!("Discarding connection opened for a superseded attempt");
                return;
            }
            state.connections_opened += 1;
            let connection_id = state.connections_opened;

            let mut handshake = Vec::new();
            if let Some(user) = &state.user {
                handshake.push(ClientEvent::Setup(user.clone()));
                handshake.push(ClientEvent::JoinUserRoom {
                    user_id: user.id.clone(),
                });
            }
            if state.common_chat {
                handshake.push(ClientEvent::JoinCommonChat);
            }
            for event in &handshake {
                send_frame(&outbound, event);
            }

            state.phase = ConnectionState::Connected;
            state.connection_id = Some(connection_id);
            state.backoff.reset();
            state.outbound = Some(outbound);
            state.retry = None;
            state.reader = Some(tokio::spawn(read_loop(self.clone(), inbound, epoch)));
            connection_id
        };
        tracing::info!("Connected to {} (connection {})", self.config.url, connection_id);
        self.events
            .publish(ConnectionStatus::Connected { connection_id });
    }

    fn deliver(&self, text: &str) {
        match ServerEvent::decode(text) {
            Ok(Some(event)) => {
                tracing::trace!("<- {:?}", event.category());
                self.events.publish(event);
            }
            Ok(None) => tracing::debug!("Ignoring unhandled event: {}", text),
            Err(e) => tracing::warn!("Dropping frame: {}", e),
        }
    }

    fn on_lost(self: &Arc<Self>, epoch: u64, reason: String) {
        {
            let mut state = self.state();
            if state.epoch != epoch || state.phase != ConnectionState::Connected {
                return;
            }
            state.outbound = None;
            state.connection_id = None;
            state.reader = None;
            state.phase = ConnectionState::Reconnecting;
        }
        tracing::warn!("Connection to {} lost: {}", self.config.url, reason);
        self.events
            .publish(ConnectionStatus::Disconnected(DisconnectReason::Lost(reason)));
        self.schedule_retry(epoch);
    }

    fn schedule_retry(self: &Arc<Self>, epoch: u64) {
        let status = {
            let mut state = self.state();
            if state.epoch != epoch {
                return;
            }
            match state.backoff.next_delay() {
                Some(delay) => {
                    let attempt = state.backoff.attempts();
                    state.phase = ConnectionState::Reconnecting;
                    let inner = self.clone();
                    state.retry = Some(tokio::spawn(async move {
                        tokio::time::sleep(delay).await;
                        inner.attempt(epoch).await;
                    }));
                    tracing::info!("Reconnect attempt {} in {:?}", attempt, delay);
                    ConnectionStatus::Reconnecting { attempt, delay }
                }
                None => {
                    let attempts = state.backoff.attempts();
                    state.phase = ConnectionState::Disconnected;
                    state.retry = None;
                    tracing::error!(
                        "Giving up on {} after {} reconnect attempts",
                        self.config.url,
                        attempts
                    );
                    ConnectionStatus::Disconnected(DisconnectReason::RetriesExhausted { attempts })
                }
            }
        };
        self.events.publish(status);
    }
}

async fn read_loop(
    inner: Arc<Inner>,
    mut inbound: mpsc::UnboundedReceiver<LinkEvent>,
    epoch: u64,
) {
    let reason = loop {
        match inbound.recv().await {
            Some(LinkEvent::Frame(text)) => inner.deliver(&text),
            Some(LinkEvent::Closed(reason)) => {
                break reason.unwrap_or_else(|| "closed by server".to_string());
            }
            None => break "link dropped".to_string(),
        }
    };
    inner.on_lost(epoch, reason);
}

fn send_frame(outbound: &mpsc::UnboundedSender<String>, event: &ClientEvent) -> bool {
    match event.to_text() {
        Ok(text) => {
            tracing::debug!("-> {}", event.name());
            outbound.send(text).is_ok()
        }
        Err(e) => {
            tracing::warn!("Could not encode {}: {}", event.name(), e);
            false
        }
    }
}
