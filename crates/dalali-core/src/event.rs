//! Realtime frames.
//!
//! Every frame on the socket is a JSON text message of the form
//! `{"event": <name>, "data": <payload>}`. Outbound frames are
//! [`ClientEvent`]s, inbound frames decode into [`ServerEvent`]s.

use crate::{Category, ChatMessage, ExchangeNotice, MessageRead, UserProfile};
use serde::{Deserialize, Serialize};

/// Frames sent from client to server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum ClientEvent {
    /// Identity handshake.
    Setup(UserProfile),
    /// Join the per-user channel so pushes addressed to this user arrive here.
    JoinUserRoom { user_id: String },
    JoinCommonChat,
    LeaveCommonChat,
    /// A direct message was stored; tell the recipient.
    NewMessage(ChatMessage),
    NewCommonChatMessage(ChatMessage),
    MarkMessageRead(MessageRead),
}

impl ClientEvent {
    pub fn to_text(&self) -> Result<String, FrameError> {
        Ok(serde_json::to_string(self)?)
    }

    /// The wire name, for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Setup(_) => "setup",
            Self::JoinUserRoom { .. } => "joinUserRoom",
            Self::JoinCommonChat => "joinCommonChat",
            Self::LeaveCommonChat => "leaveCommonChat",
            Self::NewMessage(_) => "newMessage",
            Self::NewCommonChatMessage(_) => "newCommonChatMessage",
            Self::MarkMessageRead(_) => "markMessageRead",
        }
    }
}

/// Frames pushed from server to client.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    MessageReceived(ChatMessage),
    CommonChatMessage(ChatMessage),
    MessageRead(MessageRead),
    ExchangeCompleted(ExchangeNotice),
    RequestApproved(ExchangeNotice),
    RequestRejected(ExchangeNotice),
}

#[derive(Deserialize)]
struct RawFrame {
    event: String,
    #[serde(default)]
    data: serde_json::Value,
}

impl ServerEvent {
    /// Decode a text frame.
    ///
    /// Returns `Ok(None)` for well-formed frames naming an event this client
    /// does not handle.
    pub fn decode(text: &str) -> Result<Option<Self>, FrameError> {
        let RawFrame { event, data } = serde_json::from_str(text)?;
        let decoded = match event.as_str() {
            "messageReceived" => Self::MessageReceived(serde_json::from_value(data)?),
            "commonChatMessage" => Self::CommonChatMessage(serde_json::from_value(data)?),
            "messageRead" => Self::MessageRead(serde_json::from_value(data)?),
            "exchangeCompleted" => Self::ExchangeCompleted(notice(data)?),
            "requestApproved" => Self::RequestApproved(notice(data)?),
            "requestRejected" => Self::RequestRejected(notice(data)?),
            _ => return Ok(None),
        };
        Ok(Some(decoded))
    }

    pub fn category(&self) -> Category {
        match self {
            Self::MessageReceived(_) => Category::DirectMessage,
            Self::CommonChatMessage(_) => Category::CommonChatMessage,
            Self::MessageRead(_) => Category::MessageRead,
            Self::ExchangeCompleted(_) => Category::ExchangeCompleted,
            Self::RequestApproved(_) => Category::RequestApproved,
            Self::RequestRejected(_) => Category::RequestRejected,
        }
    }
}

// Domain events sometimes arrive with no payload at all.
fn notice(data: serde_json::Value) -> Result<ExchangeNotice, serde_json::Error> {
    if data.is_null() {
        Ok(ExchangeNotice::default())
    } else {
        serde_json::from_value(data)
    }
}

/// Error encoding or decoding a frame.
#[derive(Debug, thiserror::Error)]
#[error("malformed frame: {0}")]
pub struct FrameError(#[from] serde_json::Error);
