use dalali_client::{
    Category, ConnectRequest, ConnectionState, ConnectionStatus, Connector, DisconnectReason,
    Link, LinkEvent, LinkPeer, MemoryStore, ReconnectConfig, TransportClient, TransportConfig,
    TransportError, UserProfile,
};
use futures_util::future::BoxFuture;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

enum Step {
    Refuse,
    Accept,
}

/// Connector that follows a script, then refuses everything.
struct Scripted {
    steps: Mutex<VecDeque<Step>>,
    opened: Mutex<Vec<(Instant, ConnectRequest)>>,
    peers: mpsc::UnboundedSender<LinkPeer>,
}

impl Scripted {
    fn new(steps: impl IntoIterator<Item = Step>) -> (Arc<Self>, mpsc::UnboundedReceiver<LinkPeer>) {
        let (peers, rx) = mpsc::unbounded_channel();
        let scripted = Arc::new(Self {
            steps: Mutex::new(steps.into_iter().collect()),
            opened: Mutex::new(Vec::new()),
            peers,
        });
        (scripted, rx)
    }

    fn opens(&self) -> Vec<(Instant, ConnectRequest)> {
        self.opened.lock().unwrap().clone()
    }
}

impl Connector for Scripted {
    fn open(&self, request: ConnectRequest) -> BoxFuture<'static, Result<Link, TransportError>> {
        self.opened.lock().unwrap().push((Instant::now(), request));
        let step = self.steps.lock().unwrap().pop_front().unwrap_or(Step::Refuse);
        let result = match step {
            Step::Refuse => Err(TransportError::Unreachable("connection refused".into())),
            Step::Accept => {
                let (link, peer) = Link::pair();
                self.peers.send(peer).unwrap();
                Ok(link)
            }
        };
        Box::pin(async move { result })
    }
}

fn config() -> TransportConfig {
    TransportConfig {
        url: "ws://dalali.test/ws".into(),
        connect_timeout: Duration::from_secs(5),
        reconnect: ReconnectConfig::default(),
    }
}

fn client(connector: Arc<Scripted>) -> TransportClient {
    TransportClient::new(config(), connector, Arc::new(MemoryStore::new()))
}

fn statuses(client: &TransportClient) -> mpsc::UnboundedReceiver<ConnectionStatus> {
    let (tx, rx) = mpsc::unbounded_channel();
    client.events().on_connection_status(move |status| {
        let _ = tx.send(status.clone());
    });
    rx
}

async fn wait_connected(rx: &mut mpsc::UnboundedReceiver<ConnectionStatus>) -> u64 {
    loop {
        if let ConnectionStatus::Connected { connection_id } = rx.recv().await.unwrap() {
            return connection_id;
        }
    }
}

fn event_names(frames: &[String]) -> Vec<String> {
    frames
        .iter()
        .map(|f| {
            let v: Value = serde_json::from_str(f).unwrap();
            v["event"].as_str().unwrap().to_string()
        })
        .collect()
}

#[tokio::test(start_paused = true)]
async fn retries_back_off_then_give_up() {
    let (connector, _peers) = Scripted::new([]);
    let client = client(connector.clone());
    let mut rx = statuses(&client);

    client.connect(None).await;
    tokio::time::sleep(Duration::from_secs(120)).await;

    let mut seen = Vec::new();
    while let Ok(status) = rx.try_recv() {
        seen.push(status);
    }
    let delays: Vec<u64> = seen
        .iter()
        .filter_map(|s| match s {
            ConnectionStatus::Reconnecting { delay, .. } => Some(delay.as_secs()),
            _ => None,
        })
        .collect();
    assert_eq!(delays, [1, 2, 4, 8, 10]);
    assert_eq!(
        seen.last(),
        Some(&ConnectionStatus::Disconnected(DisconnectReason::RetriesExhausted {
            attempts: 5
        }))
    );

    let opens = connector.opens();
    assert_eq!(opens.len(), 6);
    let start = opens[0].0;
    let offsets: Vec<u64> = opens.iter().map(|(at, _)| (*at - start).as_secs()).collect();
    assert_eq!(offsets, [0, 1, 3, 7, 15, 25]);

    let snapshot = client.snapshot();
    assert_eq!(snapshot.state, ConnectionState::Disconnected);
    assert!(!snapshot.connected);
}

#[tokio::test(start_paused = true)]
async fn handshake_announces_user_with_credential() {
    let (connector, mut peers) = Scripted::new([Step::Accept]);
    let store = Arc::new(MemoryStore::with_credential("tok-123".parse().unwrap()));
    let client = TransportClient::new(config(), connector.clone(), store);
    let mut rx = statuses(&client);

    client.connect(Some(UserProfile::new("u1", "Asha"))).await;
    assert_eq!(wait_connected(&mut rx).await, 1);

    let mut peer = peers.recv().await.unwrap();
    let frames = peer.drain();
    assert_eq!(event_names(&frames), ["setup", "joinUserRoom"]);
    let join: Value = serde_json::from_str(&frames[1]).unwrap();
    assert_eq!(join["data"]["userId"], "u1");

    let opens = connector.opens();
    assert_eq!(opens[0].1.credential.as_ref().map(|c| c.as_str()), Some("tok-123"));

    let snapshot = client.snapshot();
    assert!(snapshot.connected);
    assert_eq!(snapshot.connection_id, Some(1));
}

#[tokio::test(start_paused = true)]
async fn anonymous_connect_without_credential() {
    let (connector, mut peers) = Scripted::new([Step::Accept]);
    let client = client(connector.clone());

    client.connect(None).await;
    let mut peer = peers.recv().await.unwrap();
    assert!(peer.drain().is_empty());
    assert!(connector.opens()[0].1.credential.is_none());
}

#[tokio::test(start_paused = true)]
async fn inbound_frames_reach_subscribers_and_junk_is_dropped() {
    let (connector, mut peers) = Scripted::new([Step::Accept]);
    let client = client(connector);
    let (tx, mut reads) = mpsc::unbounded_channel();
    client.events().on_message_read(move |receipt| {
        let _ = tx.send(receipt.clone());
    });

    client.connect(None).await;
    let peer = peers.recv().await.unwrap();
    peer.push.send(LinkEvent::Frame("not json".into())).unwrap();
    peer.push
        .send(LinkEvent::Frame(r#"{"event":"typing","data":{}}"#.into()))
        .unwrap();
    peer.push
        .send(LinkEvent::Frame(
            r#"{"event":"messageRead","data":{"messageId":"m1","reader":"u2"}}"#.into(),
        ))
        .unwrap();

    let receipt = reads.recv().await.unwrap();
    assert_eq!(receipt.message_id, "m1");
    assert!(client.snapshot().connected);
}

#[tokio::test(start_paused = true)]
async fn lost_connection_reconnects_and_rejoins() {
    let (connector, mut peers) = Scripted::new([Step::Accept, Step::Accept]);
    let client = client(connector);
    let mut rx = statuses(&client);
    let (tx, mut chat) = mpsc::unbounded_channel();
    client.events().on_common_chat_message(move |msg| {
        let _ = tx.send(msg.content.clone());
    });

    client.connect(Some(UserProfile::new("u1", "Asha"))).await;
    let mut first = peers.recv().await.unwrap();
    assert!(client.join_common_chat());
    assert_eq!(
        event_names(&first.drain()),
        ["setup", "joinUserRoom", "joinCommonChat"]
    );

    first.push.send(LinkEvent::Closed(Some("server restart".into()))).unwrap();
    assert_eq!(wait_connected(&mut rx).await, 1);
    assert_eq!(wait_connected(&mut rx).await, 2);

    let mut second = peers.recv().await.unwrap();
    assert_eq!(
        event_names(&second.drain()),
        ["setup", "joinUserRoom", "joinCommonChat"]
    );

    second
        .push
        .send(LinkEvent::Frame(
            r#"{"event":"commonChatMessage","data":{"id":"m9","sender":"u2","content":"hi","timestamp":1}}"#.into(),
        ))
        .unwrap();
    assert_eq!(chat.recv().await.unwrap(), "hi");
    assert_eq!(client.snapshot().connection_id, Some(2));
}

#[tokio::test(start_paused = true)]
async fn common_chat_joined_during_backoff_is_sent_on_reconnect() {
    let (connector, mut peers) = Scripted::new([Step::Refuse, Step::Accept]);
    let client = client(connector);
    let mut rx = statuses(&client);

    client.connect(Some(UserProfile::new("u1", "Asha"))).await;
    assert_eq!(client.snapshot().state, ConnectionState::Reconnecting);
    assert!(!client.join_common_chat());

    assert_eq!(wait_connected(&mut rx).await, 1);
    let mut peer = peers.recv().await.unwrap();
    assert_eq!(
        event_names(&peer.drain()),
        ["setup", "joinUserRoom", "joinCommonChat"]
    );
}

#[tokio::test(start_paused = true)]
async fn common_chat_left_while_offline_is_not_rejoined() {
    let (connector, mut peers) = Scripted::new([Step::Refuse, Step::Accept]);
    let client = client(connector);
    let mut rx = statuses(&client);

    client.connect(None).await;
    assert!(!client.join_common_chat());
    assert!(!client.leave_common_chat());

    wait_connected(&mut rx).await;
    let mut peer = peers.recv().await.unwrap();
    assert!(peer.drain().is_empty());
}

#[tokio::test(start_paused = true)]
async fn lost_connection_reports_reason() {
    let (connector, mut peers) = Scripted::new([Step::Accept]);
    let client = client(connector);
    let mut rx = statuses(&client);

    client.connect(None).await;
    let peer = peers.recv().await.unwrap();
    wait_connected(&mut rx).await;
    peer.push.send(LinkEvent::Closed(None)).unwrap();

    assert_eq!(
        rx.recv().await.unwrap(),
        ConnectionStatus::Disconnected(DisconnectReason::Lost("closed by server".into()))
    );
    assert!(matches!(
        rx.recv().await.unwrap(),
        ConnectionStatus::Reconnecting { attempt: 1, .. }
    ));
}

#[tokio::test(start_paused = true)]
async fn disconnect_drops_subscriptions_and_closes_link() {
    let (connector, mut peers) = Scripted::new([Step::Accept]);
    let client = client(connector);
    let (tx, mut rx) = mpsc::unbounded_channel();
    client.events().on_connection_status(move |status| {
        let _ = tx.send(status.clone());
    });
    client.events().on_direct_message(|_| {});

    client.connect(None).await;
    let mut peer = peers.recv().await.unwrap();
    client.disconnect();

    assert_eq!(client.events().subscriber_count(Category::DirectMessage), 0);
    assert_eq!(client.events().subscriber_count(Category::ConnectionStatus), 0);
    assert_eq!(client.snapshot().state, ConnectionState::Disconnected);
    assert!(peer.sent.recv().await.is_none());

    let mut seen = Vec::new();
    while let Ok(status) = rx.try_recv() {
        seen.push(status);
    }
    assert_eq!(
        seen.last(),
        Some(&ConnectionStatus::Disconnected(DisconnectReason::Requested))
    );

    // Disconnecting again is harmless.
    client.disconnect();
}

#[tokio::test(start_paused = true)]
async fn disconnect_cancels_pending_retry() {
    let (connector, _peers) = Scripted::new([]);
    let client = client(connector.clone());

    client.connect(None).await;
    assert_eq!(client.snapshot().state, ConnectionState::Reconnecting);
    client.disconnect();
    tokio::time::sleep(Duration::from_secs(60)).await;

    assert_eq!(connector.opens().len(), 1);
    assert_eq!(client.snapshot().state, ConnectionState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn connect_while_connected_is_a_no_op() {
    let (connector, _peers) = Scripted::new([Step::Accept, Step::Accept]);
    let client = client(connector.clone());

    client.connect(None).await;
    client.connect(None).await;
    assert_eq!(connector.opens().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn commands_while_disconnected_are_dropped() {
    let (connector, _peers) = Scripted::new([]);
    let client = client(connector);

    assert!(!client.join_common_chat());
    assert!(!client.leave_common_chat());
    assert!(!client.emit(&dalali_core::ClientEvent::JoinCommonChat));
}
