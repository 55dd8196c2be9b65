use crate::api::ChatScope;
use crate::config::ClientConfig;
use crate::consumers::{ChatFeed, DashboardCounts, InterestBoard};
use crate::dispatcher::EventDispatcher;
use crate::request::{RequestClient, RequestError};
use crate::session::Session;
use crate::storage::{CredentialStore, FileStore, MemoryStore};
use crate::transport::{Connector, TransportClient, TransportConfig, WsConnector};
use std::sync::Arc;

/// Everything a front end needs, built once from a [`ClientConfig`].
///
/// Construct one at start-up, hand out clones of the parts, and call
/// [`shutdown`](Self::shutdown) on exit.
#[derive(Debug, Clone)]
pub struct Hub {
    config: ClientConfig,
    requests: RequestClient,
    transport: TransportClient,
    session: Session,
}

impl Hub {
    pub fn new(config: ClientConfig) -> Result<Self, RequestError> {
        Self::with_connector(config, Arc::new(WsConnector))
    }

    pub fn with_connector(
        config: ClientConfig,
        connector: Arc<dyn Connector>,
    ) -> Result<Self, RequestError> {
        let store: Arc<dyn CredentialStore> = match &config.credential_path {
            Some(path) => Arc::new(FileStore::new(path)),
            None => Arc::new(MemoryStore::new()),
        };
        Self::with_parts(config, connector, store)
    }

    pub fn with_parts(
        config: ClientConfig,
        connector: Arc<dyn Connector>,
        store: Arc<dyn CredentialStore>,
    ) -> Result<Self, RequestError> {
        let requests = RequestClient::new(
            config.api_base_url.clone(),
            store.clone(),
            config.request_timeout(),
        )?;
        let transport = TransportClient::new(TransportConfig::from(&config), connector, store.clone());
        let session = Session::new(requests.clone(), transport.clone(), store);
        tracing::debug!(
            "Hub ready: api {} socket {}",
            config.api_base_url,
            config.socket_url
        );
        Ok(Self {
            config,
            requests,
            transport,
            session,
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn requests(&self) -> &RequestClient {
        &self.requests
    }

    pub fn transport(&self) -> &TransportClient {
        &self.transport
    }

    pub fn events(&self) -> &EventDispatcher {
        self.transport.events()
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub async fn chat_feed(&self, scope: ChatScope) -> ChatFeed<RequestClient> {
        ChatFeed::open(Arc::new(self.requests.clone()), self.transport.clone(), scope).await
    }

    pub async fn dashboard(&self) -> DashboardCounts<RequestClient> {
        DashboardCounts::open(Arc::new(self.requests.clone()), self.events()).await
    }

    pub async fn interest_board(&self) -> InterestBoard<RequestClient> {
        InterestBoard::open(Arc::new(self.requests.clone()), self.events()).await
    }

    /// Disconnect and drop all subscriptions. The credential is kept.
    pub fn shutdown(&self) {
        tracing::info!("Shutting down");
        self.transport.disconnect();
    }
}
