//! Core types for the Hostel Dalali realtime client.
//!
//! This crate holds the wire protocol and the payloads both the transport and
//! the reconciling consumers understand. It does no I/O.

mod chat;
mod event;
mod exchange;
mod user;

pub use chat::{normalize_messages, ChatMessage, MessageRead, OutgoingMessage};
pub use event::{ClientEvent, FrameError, ServerEvent};
pub use exchange::{DashboardStats, ExchangeNotice, Interest, Listing};
pub use user::{Credential, CredentialParseError, UserProfile};

use std::fmt;
use std::time::Duration;

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    /// First attempt in flight.
    Connecting,
    /// Waiting for, or running, a backoff retry.
    Reconnecting,
    Connected,
}

/// A connection status change, as delivered to subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connected { connection_id: u64 },
    /// A retry was scheduled.
    Reconnecting { attempt: u32, delay: Duration },
    Disconnected(DisconnectReason),
}

/// Why the connection is down.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// `disconnect()` was called.
    Requested,
    /// The socket closed or errored; a retry may follow.
    Lost(String),
    /// The retry budget is spent. Terminal until the next `connect()`.
    RetriesExhausted { attempts: u32 },
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Requested => write!(f, "disconnect requested"),
            Self::Lost(reason) => write!(f, "connection lost: {reason}"),
            Self::RetriesExhausted { attempts } => {
                write!(f, "gave up after {attempts} reconnect attempts")
            }
        }
    }
}

/// Routing key for dispatched events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Category {
    DirectMessage,
    CommonChatMessage,
    MessageRead,
    ConnectionStatus,
    ExchangeCompleted,
    RequestApproved,
    RequestRejected,
}

impl Category {
    /// The exchange domain events.
    pub const EXCHANGE: [Category; 3] = [
        Category::ExchangeCompleted,
        Category::RequestApproved,
        Category::RequestRejected,
    ];
}
