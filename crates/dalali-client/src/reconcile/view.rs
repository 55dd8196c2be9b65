use super::sequence::{Sequencer, Ticket};
use crate::request::RequestError;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;

/// What a page renders.
#[derive(Debug, Clone, PartialEq)]
pub enum ViewState<T> {
    Loading,
    Ready(T),
    /// The last load failed. `stale` keeps whatever was shown before.
    Failed { error: String, stale: Option<T> },
}

impl<T> ViewState<T> {
    pub fn value(&self) -> Option<&T> {
        match self {
            Self::Ready(value) => Some(value),
            Self::Failed { stale, .. } => stale.as_ref(),
            Self::Loading => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            Self::Failed { error, .. } => Some(error),
            _ => None,
        }
    }

    pub fn is_loading(&self) -> bool {
        matches!(self, Self::Loading)
    }

    fn take_value(&mut self) -> Option<T> {
        match std::mem::replace(self, Self::Loading) {
            Self::Ready(value) => Some(value),
            Self::Failed { stale, .. } => stale,
            Self::Loading => None,
        }
    }
}

/// How a completed fetch was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Applied,
    /// A newer response had already been applied.
    Stale,
    /// The view was closed before the response arrived.
    Closed,
    /// The fetch failed.
    Failed,
}

type ApplyHook<T> = Box<dyn Fn(Ticket, &T) + Send + Sync>;

struct Shared<T> {
    state: watch::Sender<ViewState<T>>,
    seq: Sequencer,
    alive: AtomicBool,
    on_apply: Option<ApplyHook<T>>,
}

/// View state fed by authoritative fetches.
///
/// Every fetch takes a ticket when it starts; a completion is applied only
/// if nothing newer has been applied, and only while the view is open.
pub struct ReconciledView<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for ReconciledView<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> Default for ReconciledView<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Send + Sync + 'static> ReconciledView<T> {
    pub fn new() -> Self {
        Self::build(None)
    }

    /// Like [`new`](Self::new), with `hook` run on every applied value while
    /// the view's state is still locked. The hook gets the ticket of the
    /// fetch that produced the value.
    pub fn with_apply_hook(hook: impl Fn(Ticket, &T) + Send + Sync + 'static) -> Self {
        Self::build(Some(Box::new(hook)))
    }

    fn build(on_apply: Option<ApplyHook<T>>) -> Self {
        let (state, _) = watch::channel(ViewState::Loading);
        Self {
            shared: Arc::new(Shared {
                state,
                seq: Sequencer::new(),
                alive: AtomicBool::new(true),
                on_apply,
            }),
        }
    }

    pub fn state(&self) -> ViewState<T> {
        self.shared.state.borrow().clone()
    }

    pub fn value(&self) -> Option<T> {
        self.shared.state.borrow().value().cloned()
    }

    /// Receiver that wakes on every state change.
    pub fn watch(&self) -> watch::Receiver<ViewState<T>> {
        self.shared.state.subscribe()
    }

    pub fn is_alive(&self) -> bool {
        self.shared.alive.load(Ordering::SeqCst)
    }

    /// Stop applying responses. Fetches still in flight are ignored when they
    /// complete.
    pub fn close(&self) {
        self.shared.alive.store(false, Ordering::SeqCst);
    }

    pub fn begin(&self) -> Ticket {
        self.shared.seq.begin()
    }

    /// Ticket of the most recently started fetch.
    pub fn latest(&self) -> Ticket {
        self.shared.seq.latest()
    }

    /// Apply a successful response for `ticket`.
    pub fn complete(&self, ticket: Ticket, value: T) -> Outcome {
        if !self.is_alive() {
            return Outcome::Closed;
        }
        let shared = &self.shared;
        let mut outcome = Outcome::Stale;
        shared.state.send_if_modified(|state| {
            if !shared.seq.accept(ticket) {
                return false;
            }
            if let Some(hook) = &shared.on_apply {
                hook(ticket, &value);
            }
            *state = ViewState::Ready(value);
            outcome = Outcome::Applied;
            true
        });
        outcome
    }

    /// Record a failed load for `ticket`, keeping the previous value as stale.
    pub fn fail(&self, ticket: Ticket, error: &RequestError) -> Outcome {
        if !self.is_alive() {
            return Outcome::Closed;
        }
        let shared = &self.shared;
        let mut outcome = Outcome::Stale;
        shared.state.send_if_modified(|state| {
            if !shared.seq.is_current(ticket) {
                return false;
            }
            let stale = state.take_value();
            *state = ViewState::Failed {
                error: error.to_string(),
                stale,
            };
            outcome = Outcome::Failed;
            true
        });
        outcome
    }

    /// Authoritative load: initial fetch or a manual retry.
    ///
    /// A failure is terminal for this attempt; the view moves to `Failed`
    /// and the error is returned so the caller can offer a retry.
    pub async fn load<Fut>(&self, fetch: Fut) -> Result<Outcome, RequestError>
    where
        Fut: Future<Output = Result<T, RequestError>>,
    {
        let ticket = self.begin();
        self.shared.state.send_if_modified(|state| match state {
            ViewState::Failed { .. } => {
                *state = ViewState::Loading;
                true
            }
            _ => false,
        });
        match fetch.await {
            Ok(value) => Ok(self.complete(ticket, value)),
            Err(e) => {
                self.fail(ticket, &e);
                Err(e)
            }
        }
    }

    /// Re-fetch after a notification. Failures are logged and the current
    /// state is kept.
    pub async fn refresh<Fut>(&self, fetch: Fut) -> Outcome
    where
        Fut: Future<Output = Result<T, RequestError>>,
    {
        let ticket = self.begin();
        self.settle(ticket, fetch.await)
    }

    /// Apply the result of a fetch started with `ticket`, logging failures.
    pub fn settle(&self, ticket: Ticket, result: Result<T, RequestError>) -> Outcome {
        match result {
            Ok(value) => self.complete(ticket, value),
            Err(e) => {
                tracing::warn!("Refresh failed, keeping current view: {}", e);
                Outcome::Failed
            }
        }
    }

    /// Mutate the shown value in place. No-op unless the view is `Ready`.
    pub fn update(&self, f: impl FnOnce(&mut T)) -> bool {
        self.shared.state.send_if_modified(|state| match state {
            ViewState::Ready(value) => {
                f(value);
                true
            }
            _ => false,
        })
    }
}

/// A callback that re-fetches `view` each time it is invoked.
///
/// Meant for dispatcher subscriptions: the fetch runs on the current tokio
/// runtime so the dispatcher is never blocked, and its ticket is taken when
/// the notification arrives.
pub fn refetch_on_notify<T, F, Fut>(view: &ReconciledView<T>, fetch: F) -> impl Fn() + Send + Sync + 'static
where
    T: Clone + Send + Sync + 'static,
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, RequestError>> + Send + 'static,
{
    let view = view.clone();
    move || {
        if !view.is_alive() {
            return;
        }
        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                tracing::warn!("Notification outside a tokio runtime; refetch skipped");
                return;
            }
        };
        let ticket = view.begin();
        let fut = fetch();
        let view = view.clone();
        handle.spawn(async move {
            view.settle(ticket, fut.await);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::oneshot;

    fn err(status: u16) -> RequestError {
        RequestError::Http {
            status,
            message: crate::request::status_message(status),
        }
    }

    #[tokio::test]
    async fn slower_older_fetch_does_not_win() {
        let view = ReconciledView::<&'static str>::new();
        let (tx_a, rx_a) = oneshot::channel();
        let (tx_b, rx_b) = oneshot::channel();

        let a = tokio::spawn({
            let view = view.clone();
            async move { view.refresh(async { Ok(rx_a.await.unwrap()) }).await }
        });
        tokio::task::yield_now().await;
        let b = tokio::spawn({
            let view = view.clone();
            async move { view.refresh(async { Ok(rx_b.await.unwrap()) }).await }
        });
        tokio::task::yield_now().await;

        tx_b.send("B").unwrap();
        assert_eq!(b.await.unwrap(), Outcome::Applied);
        tx_a.send("A").unwrap();
        assert_eq!(a.await.unwrap(), Outcome::Stale);

        assert_eq!(view.state(), ViewState::Ready("B"));
    }

    #[test]
    fn tickets_decide_not_completion_order() {
        let view = ReconciledView::<u32>::new();
        let a = view.begin();
        let b = view.begin();
        assert_eq!(view.complete(b, 2), Outcome::Applied);
        assert_eq!(view.complete(a, 1), Outcome::Stale);
        assert_eq!(view.value(), Some(2));
    }

    #[tokio::test]
    async fn initial_failure_is_terminal_and_retry_recovers() {
        let view = ReconciledView::<u32>::new();
        let e = view.load(async { Err(err(503)) }).await.unwrap_err();
        assert_eq!(e.status(), Some(503));
        assert_eq!(view.state().error(), Some(crate::request::status_message(503).as_str()));

        assert_eq!(view.load(async { Ok(7) }).await.unwrap(), Outcome::Applied);
        assert_eq!(view.state(), ViewState::Ready(7));
    }

    #[tokio::test]
    async fn failed_reload_keeps_stale_value() {
        let view = ReconciledView::<u32>::new();
        view.load(async { Ok(1) }).await.unwrap();
        view.load(async { Err(err(500)) }).await.unwrap_err();
        assert_eq!(view.value(), Some(1));
        assert!(view.state().error().is_some());
    }

    #[tokio::test]
    async fn refresh_failure_keeps_state() {
        let view = ReconciledView::<u32>::new();
        view.load(async { Ok(1) }).await.unwrap();
        assert_eq!(view.refresh(async { Err(err(502)) }).await, Outcome::Failed);
        assert_eq!(view.state(), ViewState::Ready(1));
    }

    #[tokio::test]
    async fn closed_view_ignores_late_response() {
        let view = ReconciledView::<u32>::new();
        let ticket = view.begin();
        view.close();
        assert_eq!(view.complete(ticket, 9), Outcome::Closed);
        assert!(view.state().is_loading());
    }

    #[tokio::test]
    async fn watchers_see_changes() {
        let view = ReconciledView::<u32>::new();
        let mut rx = view.watch();
        view.load(async { Ok(3) }).await.unwrap();
        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow_and_update(), ViewState::Ready(3));
        assert!(view.update(|v| *v += 1));
        assert_eq!(*rx.borrow_and_update(), ViewState::Ready(4));
    }

    #[test]
    fn apply_hook_sees_the_fetch_ticket() {
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let view = ReconciledView::with_apply_hook({
            let seen = seen.clone();
            move |ticket, value: &u32| seen.lock().unwrap().push((ticket, *value))
        });
        let a = view.begin();
        let b = view.begin();
        assert_eq!(view.latest(), b);
        view.complete(b, 2);
        view.complete(a, 1);
        assert_eq!(*seen.lock().unwrap(), vec![(b, 2)]);
    }

    #[tokio::test]
    async fn notify_callback_refetches() {
        let view = ReconciledView::<u32>::new();
        let calls = Arc::new(std::sync::atomic::AtomicU32::new(0));
        let trigger = {
            let calls = calls.clone();
            refetch_on_notify(&view, move || {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                async move { Ok(n * 10) }
            })
        };
        let mut rx = view.watch();
        trigger();
        rx.changed().await.unwrap();
        assert_eq!(view.value(), Some(10));

        view.close();
        trigger();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
