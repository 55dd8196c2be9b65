//! Category keyed publish/subscribe for inbound events.
//!
//! Delivery is synchronous and follows registration order. A subscriber that
//! panics is logged and skipped; the rest of the subscribers for that event
//! still run. Nothing is buffered, so a late subscriber never sees earlier
//! events.

use dalali_core::{
    Category, ChatMessage, ConnectionStatus, ExchangeNotice, MessageRead, ServerEvent,
};
use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

/// Anything the dispatcher can deliver.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Server(ServerEvent),
    Status(ConnectionStatus),
}

impl Event {
    pub fn category(&self) -> Category {
        match self {
            Self::Server(event) => event.category(),
            Self::Status(_) => Category::ConnectionStatus,
        }
    }
}

impl From<ServerEvent> for Event {
    fn from(event: ServerEvent) -> Self {
        Self::Server(event)
    }
}

impl From<ConnectionStatus> for Event {
    fn from(status: ConnectionStatus) -> Self {
        Self::Status(status)
    }
}

/// Subscriber callback.
pub type Callback = Arc<dyn Fn(&Event) + Send + Sync>;

type Slots = BTreeMap<Category, Vec<(u64, Callback)>>;

#[derive(Default)]
struct Registry {
    next_id: AtomicU64,
    slots: Mutex<Slots>,
}

impl Registry {
    fn slots(&self) -> MutexGuard<'_, Slots> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn contains(&self, category: Category, id: u64) -> bool {
        self.slots()
            .get(&category)
            .is_some_and(|list| list.iter().any(|(sid, _)| *sid == id))
    }

    fn remove(&self, category: Category, id: u64) -> bool {
        let mut slots = self.slots();
        let Some(list) = slots.get_mut(&category) else {
            return false;
        };
        let before = list.len();
        list.retain(|(sid, _)| *sid != id);
        let removed = list.len() != before;
        if list.is_empty() {
            slots.remove(&category);
        }
        removed
    }
}

/// Cheap to clone; clones share one registry.
#[derive(Clone, Default)]
pub struct EventDispatcher {
    registry: Arc<Registry>,
}

impl std::fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let slots = self.registry.slots();
        let counts: BTreeMap<_, _> = slots.iter().map(|(c, l)| (*c, l.len())).collect();
        f.debug_struct("EventDispatcher").field("subscribers", &counts).finish()
    }
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `callback` for `category`.
    ///
    /// Registering the same closure twice yields two independent
    /// subscriptions.
    pub fn subscribe(
        &self,
        category: Category,
        callback: impl Fn(&Event) + Send + Sync + 'static,
    ) -> Subscription {
        let id = self.registry.next_id.fetch_add(1, Ordering::Relaxed);
        self.registry
            .slots()
            .entry(category)
            .or_default()
            .push((id, Arc::new(callback)));
        Subscription {
            registry: Arc::downgrade(&self.registry),
            category,
            id,
        }
    }

    /// Deliver `event` to every subscriber of its category.
    ///
    /// Subscribers added during delivery see the next event, not this one.
    /// A subscriber removed by an earlier callback is skipped. Returns how
    /// many subscribers returned normally.
    pub fn publish(&self, event: impl Into<Event>) -> usize {
        let event = event.into();
        let category = event.category();
        // Snapshot so callbacks may subscribe or unsubscribe while we iterate.
        let callbacks: Vec<(u64, Callback)> = match self.registry.slots().get(&category) {
            Some(list) => list.clone(),
            None => return 0,
        };

        let mut delivered = 0;
        for (id, callback) in callbacks {
            if !self.registry.contains(category, id) {
                continue;
            }
            match catch_unwind(AssertUnwindSafe(|| callback(&event))) {
                Ok(()) => delivered += 1,
                Err(panic) => {
                    tracing::error!(
                        "Subscriber {} for {:?} panicked: {}",
                        id,
                        category,
                        panic_message(&*panic)
                    );
                }
            }
        }
        delivered
    }

    /// Drop every subscription.
    pub fn clear(&self) {
        let dropped: usize = {
            let mut slots = self.registry.slots();
            let n = slots.values().map(Vec::len).sum();
            slots.clear();
            n
        };
        if dropped > 0 {
            tracing::debug!("Cleared {} subscriptions", dropped);
        }
    }

    pub fn subscriber_count(&self, category: Category) -> usize {
        self.registry.slots().get(&category).map_or(0, Vec::len)
    }

    pub fn on_direct_message(
        &self,
        f: impl Fn(&ChatMessage) + Send + Sync + 'static,
    ) -> Subscription {
        self.subscribe(Category::DirectMessage, move |event| {
            if let Event::Server(ServerEvent::MessageReceived(msg)) = event {
                f(msg);
            }
        })
    }

    pub fn on_common_chat_message(
        &self,
        f: impl Fn(&ChatMessage) + Send + Sync + 'static,
    ) -> Subscription {
        self.subscribe(Category::CommonChatMessage, move |event| {
            if let Event::Server(ServerEvent::CommonChatMessage(msg)) = event {
                f(msg);
            }
        })
    }

    pub fn on_message_read(
        &self,
        f: impl Fn(&MessageRead) + Send + Sync + 'static,
    ) -> Subscription {
        self.subscribe(Category::MessageRead, move |event| {
            if let Event::Server(ServerEvent::MessageRead(receipt)) = event {
                f(receipt);
            }
        })
    }

    pub fn on_connection_status(
        &self,
        f: impl Fn(&ConnectionStatus) + Send + Sync + 'static,
    ) -> Subscription {
        self.subscribe(Category::ConnectionStatus, move |event| {
            if let Event::Status(status) = event {
                f(status);
            }
        })
    }

    pub fn on_exchange_completed(
        &self,
        f: impl Fn(&ExchangeNotice) + Send + Sync + 'static,
    ) -> Subscription {
        self.subscribe(Category::ExchangeCompleted, move |event| {
            if let Event::Server(ServerEvent::ExchangeCompleted(notice)) = event {
                f(notice);
            }
        })
    }

    pub fn on_request_approved(
        &self,
        f: impl Fn(&ExchangeNotice) + Send + Sync + 'static,
    ) -> Subscription {
        self.subscribe(Category::RequestApproved, move |event| {
            if let Event::Server(ServerEvent::RequestApproved(notice)) = event {
                f(notice);
            }
        })
    }

    pub fn on_request_rejected(
        &self,
        f: impl Fn(&ExchangeNotice) + Send + Sync + 'static,
    ) -> Subscription {
        self.subscribe(Category::RequestRejected, move |event| {
            if let Event::Server(ServerEvent::RequestRejected(notice)) = event {
                f(notice);
            }
        })
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s
    } else {
        "non-string panic payload"
    }
}

/// Handle for one registration.
///
/// Dropping the handle does not unsubscribe; call [`Subscription::unsubscribe`].
#[derive(Debug)]
pub struct Subscription {
    registry: Weak<Registry>,
    category: Category,
    id: u64,
}

impl Subscription {
    pub fn category(&self) -> Category {
        self.category
    }

    /// Remove this registration. Returns `false` if it was already gone
    /// (unsubscribed before, or cleared by a disconnect).
    pub fn unsubscribe(&self) -> bool {
        match self.registry.upgrade() {
            Some(registry) => registry.remove(self.category, self.id),
            None => false,
        }
    }
}

/// A set of subscriptions released together.
#[derive(Debug, Default)]
pub struct Subscriptions(Vec<Subscription>);

impl Subscriptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, subscription: Subscription) {
        self.0.push(subscription);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn unsubscribe_all(&mut self) {
        for subscription in self.0.drain(..) {
            subscription.unsubscribe();
        }
    }
}

impl Extend<Subscription> for Subscriptions {
    fn extend<T: IntoIterator<Item = Subscription>>(&mut self, iter: T) {
        self.0.extend(iter);
    }
}
