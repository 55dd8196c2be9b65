//! Typed REST endpoints used by the consumers.
//!
//! Each consumer depends on one of these traits rather than on
//! [`RequestClient`] directly, so tests can script responses and their
//! timing.

use crate::request::{RequestClient, RequestError, RequestOptions};
use dalali_core::{ChatMessage, DashboardStats, Interest, Listing, OutgoingMessage};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::future::Future;

/// Which conversation a chat feed follows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatScope {
    Common,
    /// The thread between the signed-in user `me` and `peer`.
    Direct { me: String, peer: String },
}

impl ChatScope {
    pub fn path(&self) -> String {
        match self {
            Self::Common => "/api/messages/common".to_string(),
            Self::Direct { peer, .. } => {
                format!("/api/messages/direct/{}", urlencoding::encode(peer))
            }
        }
    }

    fn recipient(&self) -> Option<String> {
        match self {
            Self::Common => None,
            Self::Direct { peer, .. } => Some(peer.clone()),
        }
    }
}

pub trait ChatApi: Send + Sync + 'static {
    fn messages(
        &self,
        scope: &ChatScope,
    ) -> impl Future<Output = Result<Vec<ChatMessage>, RequestError>> + Send;

    fn post_message(
        &self,
        scope: &ChatScope,
        content: &str,
    ) -> impl Future<Output = Result<ChatMessage, RequestError>> + Send;
}

pub trait DashboardApi: Send + Sync + 'static {
    fn stats(&self) -> impl Future<Output = Result<DashboardStats, RequestError>> + Send;
}

pub trait ListingApi: Send + Sync + 'static {
    fn listings(&self) -> impl Future<Output = Result<Vec<Listing>, RequestError>> + Send;

    /// Flip the current user's interest and return the server's new count.
    fn toggle_interest(
        &self,
        listing_id: &str,
    ) -> impl Future<Output = Result<Interest, RequestError>> + Send;
}

/// A list the server returns either bare or under a named key.
#[derive(Deserialize)]
#[serde(untagged)]
enum ListBody<T> {
    Bare(Vec<T>),
    Messages { messages: Vec<T> },
    Listings { listings: Vec<T> },
}

impl<T> ListBody<T> {
    fn into_vec(self) -> Vec<T> {
        match self {
            Self::Bare(items) | Self::Messages { messages: items } | Self::Listings { listings: items } => items,
        }
    }
}

async fn fetch_list<T: DeserializeOwned>(
    client: &RequestClient,
    path: &str,
) -> Result<Vec<T>, RequestError> {
    client
        .fetch::<ListBody<T>>(path, RequestOptions::get())
        .await
        .map(ListBody::into_vec)
}

impl ChatApi for RequestClient {
    async fn messages(&self, scope: &ChatScope) -> Result<Vec<ChatMessage>, RequestError> {
        fetch_list(self, &scope.path()).await
    }

    async fn post_message(
        &self,
        scope: &ChatScope,
        content: &str,
    ) -> Result<ChatMessage, RequestError> {
        let body = OutgoingMessage {
            recipient: scope.recipient(),
            content: content.to_string(),
        };
        self.fetch(&scope.path(), RequestOptions::post(body)?).await
    }
}

impl DashboardApi for RequestClient {
    async fn stats(&self) -> Result<DashboardStats, RequestError> {
        self.fetch("/api/dashboard/stats", RequestOptions::get()).await
    }
}

impl ListingApi for RequestClient {
    async fn listings(&self) -> Result<Vec<Listing>, RequestError> {
        fetch_list(self, "/api/listings").await
    }

    async fn toggle_interest(&self, listing_id: &str) -> Result<Interest, RequestError> {
        self.fetch(&interest_path(listing_id), RequestOptions::post(serde_json::json!({}))?)
            .await
    }
}

fn interest_path(listing_id: &str) -> String {
    format!("/api/listings/{}/interest", urlencoding::encode(listing_id))
}
