//! Chat payloads.

use serde::{Deserialize, Serialize};

/// A direct or common-chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    #[serde(alias = "_id")]
    pub id: String,
    pub sender: String,
    /// `None` for common-chat messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient: Option<String>,
    pub content: String,
    /// Milliseconds since the Unix epoch.
    #[serde(alias = "createdAt")]
    pub timestamp: i64,
    #[serde(default)]
    pub read: bool,
}

impl ChatMessage {
    /// Whether this message belongs to the direct thread between `me` and `peer`.
    pub fn in_thread(&self, me: &str, peer: &str) -> bool {
        match self.recipient.as_deref() {
            Some(to) => (self.sender == me && to == peer) || (self.sender == peer && to == me),
            None => false,
        }
    }
}

/// Body of an outbound message before the server assigns an id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutgoingMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient: Option<String>,
    pub content: String,
}

/// Read receipt for a direct message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRead {
    pub message_id: String,
    pub reader: String,
}

/// Sort by timestamp (id breaks ties) and drop repeated ids.
///
/// The first occurrence of an id wins.
pub fn normalize_messages(mut messages: Vec<ChatMessage>) -> Vec<ChatMessage> {
    let mut seen = std::collections::HashSet::new();
    messages.retain(|m| seen.insert(m.id.clone()));
    messages.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id)));
    messages
}
