//! Room-exchange payloads: listings, interest counts, and the domain events
//! pushed when an exchange request changes state.

use serde::{Deserialize, Serialize};

/// A room listing as far as the client needs to interpret it.
///
/// Everything else the server sends is kept verbatim in `extra`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Listing {
    #[serde(alias = "_id")]
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub interest_count: u32,
    /// Whether the current user has expressed interest.
    #[serde(default, alias = "isInterested")]
    pub interested: bool,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Listing {
    pub fn interest(&self) -> Interest {
        Interest {
            count: self.interest_count,
            interested: self.interested,
        }
    }
}

/// Interest state of one listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Interest {
    #[serde(alias = "interestCount")]
    pub count: u32,
    #[serde(alias = "isInterested")]
    pub interested: bool,
}

impl Interest {
    /// The value expected after the user toggles.
    pub fn toggled(self) -> Self {
        if self.interested {
            Self {
                count: self.count.saturating_sub(1),
                interested: false,
            }
        } else {
            Self {
                count: self.count.saturating_add(1),
                interested: true,
            }
        }
    }
}

/// Payload of `exchangeCompleted`, `requestApproved` and `requestRejected`.
///
/// Opaque to the client beyond a few well-known fields.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExchangeNotice {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub listing_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Badge counts shown on the dashboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardStats {
    #[serde(default)]
    pub unread_messages: u32,
    #[serde(default)]
    pub pending_requests: u32,
    #[serde(default)]
    pub active_listings: u32,
    /// Only reported by servers that track it.
    #[serde(default)]
    pub registered_users: Option<u32>,
}
