use crate::api::ListingApi;
use crate::dispatcher::{EventDispatcher, Subscriptions};
use crate::reconcile::{refetch_on_notify, MutationError, OptimisticMap, ReconciledView, ViewState};
use crate::request::RequestError;
use dalali_core::{Category, Interest, Listing};
use futures_util::future::BoxFuture;
use std::sync::Arc;
use tokio::sync::watch;

/// Room listings with an optimistic interest toggle.
///
/// Interest is shown from an [`OptimisticMap`] keyed by listing id. Every
/// applied listings fetch overwrites it. A pending toggle is overwritten only
/// by a fetch that started after the toggle did; an older fetch leaves it to
/// the server's answer.
pub struct InterestBoard<A: ListingApi> {
    api: Arc<A>,
    view: ReconciledView<Vec<Listing>>,
    interest: Arc<OptimisticMap<String, Interest>>,
    subs: Subscriptions,
}

fn fetcher<A: ListingApi>(
    api: &Arc<A>,
) -> impl Fn() -> BoxFuture<'static, Result<Vec<Listing>, RequestError>> + Send + Sync + 'static {
    let api = api.clone();
    move || {
        let api = api.clone();
        Box::pin(async move { api.listings().await })
    }
}

impl<A: ListingApi> InterestBoard<A> {
    pub async fn open(api: Arc<A>, events: &EventDispatcher) -> Self {
        let interest = Arc::new(OptimisticMap::new());
        let view = ReconciledView::with_apply_hook({
            let interest = interest.clone();
            move |ticket, listings: &Vec<Listing>| {
                interest.supersede_all(
                    listings.iter().map(|l| (l.id.clone(), l.interest())),
                    ticket,
                );
            }
        });

        let trigger = Arc::new(refetch_on_notify(&view, fetcher(&api)));
        let mut subs = Subscriptions::new();
        subs.extend(Category::EXCHANGE.into_iter().map(|category| {
            let trigger = trigger.clone();
            events.subscribe(category, move |_| trigger())
        }));

        let board = Self {
            api,
            view,
            interest,
            subs,
        };
        if let Err(e) = board.retry().await {
            tracing::warn!("Initial listings load failed: {}", e);
        }
        board
    }

    pub fn state(&self) -> ViewState<Vec<Listing>> {
        self.view.state()
    }

    /// Listings with the interest currently shown, pending toggles included.
    pub fn listings(&self) -> Vec<Listing> {
        let mut listings = self.view.value().unwrap_or_default();
        for listing in &mut listings {
            if let Some(interest) = self.interest.get(&listing.id) {
                listing.interest_count = interest.count;
                listing.interested = interest.interested;
            }
        }
        listings
    }

    pub fn interest(&self, listing_id: &str) -> Option<Interest> {
        self.interest.get(&listing_id.to_string())
    }

    pub fn is_pending(&self, listing_id: &str) -> bool {
        self.interest.is_pending(&listing_id.to_string())
    }

    pub fn watch(&self) -> watch::Receiver<ViewState<Vec<Listing>>> {
        self.view.watch()
    }

    pub async fn retry(&self) -> Result<(), RequestError> {
        self.view.load(fetcher(&self.api)()).await.map(|_| ())
    }

    /// Flip interest in `listing_id`.
    ///
    /// The flipped count and flag show immediately. On success the server's
    /// answer replaces them; on failure they revert, the listings are
    /// re-fetched, and the error is returned. A second toggle while the first
    /// is in flight fails with [`MutationError::Pending`].
    pub async fn toggle(&self, listing_id: &str) -> Result<Interest, MutationError> {
        let change = self
            .interest
            .begin(listing_id.to_string(), self.view.latest(), |current| current.toggled())?;
        tracing::debug!("Toggling interest in {} to {:?}", listing_id, change.tentative());
        self.touch();

        let result = self.api.toggle_interest(listing_id).await;
        match result {
            Ok(confirmed) => {
                change.commit(confirmed);
                self.touch();
                Ok(confirmed)
            }
            Err(e) => {
                change.revert();
                self.touch();
                tracing::warn!("Interest toggle on {} failed: {}", listing_id, e);
                self.view.refresh(fetcher(&self.api)()).await;
                Err(e.into())
            }
        }
    }

    /// Wake watchers after the interest overlay changed.
    fn touch(&self) {
        self.view.update(|_| {});
    }

    pub fn close(&mut self) {
        self.view.close();
        self.subs.unsubscribe_all();
    }
}

impl<A: ListingApi> Drop for InterestBoard<A> {
    fn drop(&mut self) {
        self.close();
    }
}
