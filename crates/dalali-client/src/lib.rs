//! Realtime sync client for Hostel Dalali.
//!
//! A [`TransportClient`] keeps one WebSocket connection to the server and
//! publishes what arrives on an [`EventDispatcher`]. A [`RequestClient`] talks
//! to the REST API. Consumers ([`ChatFeed`], [`DashboardCounts`],
//! [`InterestBoard`]) combine the two: events tell them something changed, and
//! they re-fetch the authoritative state.
//!
//! [`Hub`] wires it all together from a [`ClientConfig`].

pub mod api;
mod backoff;
pub mod config;
pub mod consumers;
pub mod dispatcher;
pub mod hub;
pub mod reconcile;
pub mod request;
pub mod session;
pub mod storage;
pub mod transport;

pub use api::{ChatApi, ChatScope, DashboardApi, ListingApi};
pub use backoff::Backoff;
pub use config::{ClientConfig, ConfigError, ReconnectConfig};
pub use consumers::{ChatFeed, DashboardCounts, InterestBoard};
pub use dispatcher::{Event, EventDispatcher, Subscription, Subscriptions};
pub use hub::Hub;
pub use reconcile::{MutationError, Optimistic, ReconciledView, Sequencer, Ticket, ViewState};
pub use request::{Body, RequestClient, RequestError, RequestOptions};
pub use session::{Session, SessionError, SignupRequest};
pub use storage::{CredentialStore, FileStore, MemoryStore, StorageError};
pub use transport::{
    ConnectRequest, Connector, Link, LinkEvent, LinkPeer, TransportClient, TransportConfig,
    TransportError, TransportSnapshot, WsConnector,
};

pub use dalali_core::{
    Category, ChatMessage, ConnectionState, ConnectionStatus, Credential, DashboardStats,
    DisconnectReason, ExchangeNotice, Interest, Listing, MessageRead, ServerEvent, UserProfile,
};
