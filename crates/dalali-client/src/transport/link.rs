//! The socket underneath the transport client.
//!
//! A [`Connector`] opens a [`Link`]: a pair of channels carrying text frames.
//! The production connector pumps a tokio-tungstenite WebSocket into those
//! channels; tests hand out in-memory links from [`Link::pair`].

use dalali_core::Credential;
use futures_util::future::BoxFuture;
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::{HeaderValue, AUTHORIZATION};
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Parameters for one connection attempt.
#[derive(Debug, Clone)]
pub struct ConnectRequest {
    pub url: String,
    /// Sent as `Authorization: Bearer <token>`; `None` connects anonymously.
    pub credential: Option<Credential>,
    pub timeout: Duration,
}

/// What the far side of a link reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    Frame(String),
    /// The connection ended, with a reason when one is known.
    Closed(Option<String>),
}

/// Client half of an open connection.
///
/// Dropping `outbound` closes the connection.
#[derive(Debug)]
pub struct Link {
    pub outbound: mpsc::UnboundedSender<String>,
    pub inbound: mpsc::UnboundedReceiver<LinkEvent>,
}

/// Server half of an in-memory link.
#[derive(Debug)]
pub struct LinkPeer {
    /// Frames the client sent.
    pub sent: mpsc::UnboundedReceiver<String>,
    /// Feed frames or a close to the client.
    pub push: mpsc::UnboundedSender<LinkEvent>,
}

impl Link {
    pub fn pair() -> (Link, LinkPeer) {
        let (outbound, sent) = mpsc::unbounded_channel();
        let (push, inbound) = mpsc::unbounded_channel();
        (Link { outbound, inbound }, LinkPeer { sent, push })
    }
}

impl LinkPeer {
    /// Drain everything sent so far.
    pub fn drain(&mut self) -> Vec<String> {
        let mut frames = Vec::new();
        while let Ok(frame) = self.sent.try_recv() {
            frames.push(frame);
        }
        frames
    }
}

/// Opens links. Implementations must be cheap to call repeatedly; the
/// transport calls `open` once per attempt.
pub trait Connector: Send + Sync + 'static {
    fn open(&self, request: ConnectRequest) -> BoxFuture<'static, Result<Link, TransportError>>;
}

/// WebSocket connector.
#[derive(Debug, Default, Clone, Copy)]
pub struct WsConnector;

impl Connector for WsConnector {
    fn open(&self, request: ConnectRequest) -> BoxFuture<'static, Result<Link, TransportError>> {
        Box::pin(async move {
            let mut ws_request = request
                .url
                .as_str()
                .into_client_request()
                .map_err(|e| TransportError::InvalidUrl(e.to_string()))?;
            if let Some(credential) = &request.credential {
                let value = HeaderValue::from_str(&credential.bearer())
                    .map_err(|e| TransportError::Handshake(e.to_string()))?;
                ws_request.headers_mut().insert(AUTHORIZATION, value);
            }

            let (stream, _) = tokio::time::timeout(request.timeout, connect_async(ws_request))
                .await
                .map_err(|_| TransportError::Timeout(request.timeout))?
                .map_err(TransportError::from_dial)?;
            tracing::debug!("WebSocket open to {}", request.url);

            let (link, peer) = Link::pair();
            tokio::spawn(pump(stream, peer));
            Ok(link)
        })
    }
}

/// Shuttle frames between the socket and the link until either side ends.
async fn pump(stream: WsStream, mut peer: LinkPeer) {
    let (mut sink, mut source) = stream.split();
    loop {
        tokio::select! {
            out = peer.sent.recv() => match out {
                Some(text) => {
                    if let Err(e) = sink.send(Message::Text(text.into())).await {
                        let _ = peer.push.send(LinkEvent::Closed(Some(e.to_string())));
                        break;
                    }
                }
                // Client dropped its half: close politely.
                None => {
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                }
            },

            incoming = source.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    if peer.push.send(LinkEvent::Frame(text.as_str().to_owned())).is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    let reason = frame
                        .map(|f| f.reason.as_str().to_owned())
                        .filter(|r| !r.is_empty());
                    let _ = peer.push.send(LinkEvent::Closed(reason));
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::debug!("WebSocket error: {}", e);
                    let _ = peer.push.send(LinkEvent::Closed(Some(e.to_string())));
                    break;
                }
                None => {
                    let _ = peer.push.send(LinkEvent::Closed(None));
                    break;
                }
            }
        }
    }
}

/// Why an attempt failed. Logged by the transport, never returned to callers.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("invalid socket url: {0}")]
    InvalidUrl(String),
    #[error("handshake failed: {0}")]
    Handshake(String),
    #[error("connect timed out after {0:?}")]
    Timeout(Duration),
    #[error("websocket: {0}")]
    Socket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("server unreachable: {0}")]
    Unreachable(String),
}

impl TransportError {
    /// Socket-level failures while dialing mean nothing is listening.
    fn from_dial(e: tungstenite::Error) -> Self {
        match e {
            tungstenite::Error::Io(io) => Self::Unreachable(io.to_string()),
            other => Self::Socket(other),
        }
    }
}
