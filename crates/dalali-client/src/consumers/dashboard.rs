use crate::api::DashboardApi;
use crate::dispatcher::{EventDispatcher, Subscriptions};
use crate::reconcile::{refetch_on_notify, ReconciledView, ViewState};
use crate::request::RequestError;
use dalali_core::{Category, DashboardStats};
use futures_util::future::BoxFuture;
use std::sync::Arc;
use tokio::sync::watch;

/// Categories after which the badge counts may have changed.
const TRIGGERS: [Category; 5] = [
    Category::DirectMessage,
    Category::MessageRead,
    Category::ExchangeCompleted,
    Category::RequestApproved,
    Category::RequestRejected,
];

/// Dashboard badge counts, re-fetched whenever something they count changes.
pub struct DashboardCounts<A: DashboardApi> {
    api: Arc<A>,
    view: ReconciledView<DashboardStats>,
    subs: Subscriptions,
}

fn fetcher<A: DashboardApi>(
    api: &Arc<A>,
) -> impl Fn() -> BoxFuture<'static, Result<DashboardStats, RequestError>> + Send + Sync + 'static {
    let api = api.clone();
    move || {
        let api = api.clone();
        Box::pin(async move { api.stats().await })
    }
}

impl<A: DashboardApi> DashboardCounts<A> {
    pub async fn open(api: Arc<A>, events: &EventDispatcher) -> Self {
        let view = ReconciledView::new();
        let trigger = Arc::new(refetch_on_notify(&view, fetcher(&api)));
        let mut subs = Subscriptions::new();
        subs.extend(TRIGGERS.into_iter().map(|category| {
            let trigger = trigger.clone();
            events.subscribe(category, move |_| trigger())
        }));

        let counts = Self { api, view, subs };
        if let Err(e) = counts.retry().await {
            tracing::warn!("Initial dashboard load failed: {}", e);
        }
        counts
    }

    pub fn state(&self) -> ViewState<DashboardStats> {
        self.view.state()
    }

    pub fn stats(&self) -> Option<DashboardStats> {
        self.view.value()
    }

    pub fn watch(&self) -> watch::Receiver<ViewState<DashboardStats>> {
        self.view.watch()
    }

    pub async fn retry(&self) -> Result<(), RequestError> {
        self.view.load(fetcher(&self.api)()).await.map(|_| ())
    }

    pub fn close(&mut self) {
        self.view.close();
        self.subs.unsubscribe_all();
    }
}

impl<A: DashboardApi> Drop for DashboardCounts<A> {
    fn drop(&mut self) {
        self.close();
    }
}
