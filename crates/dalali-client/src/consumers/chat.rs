use crate::api::{ChatApi, ChatScope};
use crate::dispatcher::Subscriptions;
use crate::reconcile::{refetch_on_notify, ReconciledView, ViewState};
use crate::request::RequestError;
use crate::transport::TransportClient;
use dalali_core::{normalize_messages, ChatMessage, MessageRead};
use futures_util::future::BoxFuture;
use std::sync::Arc;
use tokio::sync::watch;

/// Messages of one conversation, kept in sync with the server.
///
/// Realtime events only trigger a re-fetch; the list is always the server's,
/// sorted by timestamp with repeated ids dropped. A common-chat feed joins the
/// shared channel while open and leaves it on close.
pub struct ChatFeed<A: ChatApi> {
    api: Arc<A>,
    scope: ChatScope,
    transport: TransportClient,
    view: ReconciledView<Vec<ChatMessage>>,
    subs: Subscriptions,
    closed: bool,
}

fn fetcher<A: ChatApi>(
    api: &Arc<A>,
    scope: &ChatScope,
) -> impl Fn() -> BoxFuture<'static, Result<Vec<ChatMessage>, RequestError>> + Send + Sync + 'static {
    let api = api.clone();
    let scope = scope.clone();
    move || {
        let api = api.clone();
        let scope = scope.clone();
        Box::pin(async move { api.messages(&scope).await.map(normalize_messages) })
    }
}

impl<A: ChatApi> ChatFeed<A> {
    /// Subscribe, join the channel if needed, and run the initial fetch.
    ///
    /// An initial failure leaves the feed in [`ViewState::Failed`]; call
    /// [`retry`](Self::retry) to try again.
    pub async fn open(api: Arc<A>, transport: TransportClient, scope: ChatScope) -> Self {
        let mut feed = Self {
            api,
            scope,
            transport,
            view: ReconciledView::new(),
            subs: Subscriptions::new(),
            closed: false,
        };
        feed.subscribe();
        if let Err(e) = feed.retry().await {
            tracing::warn!("Initial load of {} failed: {}", feed.scope.path(), e);
        }
        feed
    }

    fn subscribe(&mut self) {
        let events = self.transport.events();
        let trigger = Arc::new(refetch_on_notify(&self.view, fetcher(&self.api, &self.scope)));
        match &self.scope {
            ChatScope::Common => {
                self.transport.join_common_chat();
                self.subs
                    .push(events.on_common_chat_message(move |_| trigger()));
            }
            ChatScope::Direct { me, peer } => {
                let (me, peer) = (me.clone(), peer.clone());
                let on_message = trigger.clone();
                self.subs.push(events.on_direct_message(move |msg| {
                    if msg.in_thread(&me, &peer) {
                        on_message();
                    }
                }));
                self.subs.push(events.on_message_read(move |_| trigger()));
            }
        }
    }

    pub fn scope(&self) -> &ChatScope {
        &self.scope
    }

    pub fn state(&self) -> ViewState<Vec<ChatMessage>> {
        self.view.state()
    }

    /// Current messages, empty while loading.
    pub fn messages(&self) -> Vec<ChatMessage> {
        self.view.value().unwrap_or_default()
    }

    pub fn watch(&self) -> watch::Receiver<ViewState<Vec<ChatMessage>>> {
        self.view.watch()
    }

    /// Authoritative reload. Failures move the feed to `Failed`.
    pub async fn retry(&self) -> Result<(), RequestError> {
        let fetch = fetcher(&self.api, &self.scope);
        self.view.load(fetch()).await.map(|_| ())
    }

    /// Post `content`, announce it on the realtime channel, then re-fetch.
    pub async fn send(&self, content: &str) -> Result<ChatMessage, RequestError> {
        let message = self.api.post_message(&self.scope, content).await?;
        match self.scope {
            ChatScope::Common => self.transport.send_common_chat_message(&message),
            ChatScope::Direct { .. } => self.transport.send_direct_message(&message),
        };
        let fetch = fetcher(&self.api, &self.scope);
        self.view.refresh(fetch()).await;
        Ok(message)
    }

    /// Tell the sender a direct message was read. Ignored for the common chat.
    pub fn mark_read(&self, message_id: &str) -> bool {
        match &self.scope {
            ChatScope::Direct { me, .. } => self.transport.mark_message_read(&MessageRead {
                message_id: message_id.to_string(),
                reader: me.clone(),
            }),
            ChatScope::Common => false,
        }
    }

    /// Stop following the conversation. Late responses are ignored.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.view.close();
        self.subs.unsubscribe_all();
        if self.scope == ChatScope::Common {
            self.transport.leave_common_chat();
        }
    }
}

impl<A: ChatApi> Drop for ChatFeed<A> {
    fn drop(&mut self) {
        self.close();
    }
}
