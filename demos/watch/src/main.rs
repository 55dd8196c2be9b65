//! Follow a Hostel Dalali account from the terminal.
//!
//! Signs in (or resumes a stored session), then logs dashboard counts, chat
//! traffic and exchange notifications as they arrive:
//!   cargo run -p dalali-watch -- --email asha@example.com --password secret --common
//!   DALALI_CONFIG=dalali.toml cargo run -p dalali-watch -- --peer 64f0c2
//!
//! RUST_LOG=dalali_client=debug shows the transport underneath.

use clap::Parser;
use dalali_client::{ChatMessage, ChatScope, ClientConfig, DashboardStats, Hub, ViewState};
use std::path::PathBuf;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "watch", about = "Follow a Hostel Dalali account in realtime")]
struct Args {
    /// TOML config file.
    #[arg(long, env = "DALALI_CONFIG")]
    config: Option<PathBuf>,

    #[arg(long, env = "DALALI_API_URL")]
    api_url: Option<String>,

    #[arg(long, env = "DALALI_SOCKET_URL")]
    socket_url: Option<String>,

    #[arg(long, env = "DALALI_EMAIL", requires = "password")]
    email: Option<String>,

    #[arg(long, env = "DALALI_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Follow the common chat.
    #[arg(long)]
    common: bool,

    /// Follow the direct thread with this user id.
    #[arg(long)]
    peer: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("watch=info".parse()?))
        .init();

    let args = Args::parse();
    let mut config = match &args.config {
        Some(path) => ClientConfig::load(path)?,
        None => ClientConfig::default(),
    };
    if let Some(url) = args.api_url {
        config.api_base_url = url;
    }
    if let Some(url) = args.socket_url {
        config.socket_url = url;
    }

    let hub = Hub::new(config)?;
    hub.events().on_connection_status(|status| tracing::info!("Connection: {:?}", status));
    hub.events().on_exchange_completed(|notice| {
        tracing::info!("Exchange completed: {}", notice.message.as_deref().unwrap_or("-"));
    });
    hub.events().on_request_approved(|notice| {
        tracing::info!("Request approved: {}", notice.request_id.as_deref().unwrap_or("-"));
    });
    hub.events().on_request_rejected(|notice| {
        tracing::info!("Request rejected: {}", notice.request_id.as_deref().unwrap_or("-"));
    });

    let user = match (&args.email, &args.password) {
        (Some(email), Some(password)) => Some(hub.session().login(email, password).await?),
        _ => hub.session().restore().await?,
    };
    match &user {
        Some(user) => tracing::info!("Signed in as {} ({})", user.name, user.id),
        None => {
            tracing::info!("No session; watching anonymously");
            hub.transport().connect(None).await;
        }
    }

    let dashboard = hub.dashboard().await;
    log_changes("dashboard", dashboard.watch(), |stats: &DashboardStats| {
        format!(
            "{} unread, {} pending requests, {} active listings",
            stats.unread_messages, stats.pending_requests, stats.active_listings
        )
    });

    let common = if args.common {
        Some(hub.chat_feed(ChatScope::Common).await)
    } else {
        None
    };
    if let Some(feed) = &common {
        log_changes("common chat", feed.watch(), |m: &Vec<ChatMessage>| describe_chat(m));
    }

    let direct = match (args.peer, &user) {
        (Some(peer), Some(me)) => Some(
            hub.chat_feed(ChatScope::Direct {
                me: me.id.clone(),
                peer,
            })
            .await,
        ),
        (Some(_), None) => {
            tracing::warn!("--peer needs a signed-in user; ignoring");
            None
        }
        (None, _) => None,
    };
    if let Some(feed) = &direct {
        log_changes("direct", feed.watch(), |m: &Vec<ChatMessage>| describe_chat(m));
    }

    tokio::signal::ctrl_c().await?;
    drop((common, direct, dashboard));
    hub.shutdown();
    Ok(())
}

fn describe_chat(messages: &[ChatMessage]) -> String {
    match messages.last() {
        Some(last) => format!("{} messages, latest from {}: {}", messages.len(), last.sender, last.content),
        None => "no messages".to_string(),
    }
}

fn render<T>(state: &ViewState<T>, describe: &impl Fn(&T) -> String) -> String {
    match state {
        ViewState::Loading => "loading".to_string(),
        ViewState::Ready(value) => describe(value),
        ViewState::Failed { error, .. } => format!("failed: {error}"),
    }
}

fn log_changes<T, F>(label: &'static str, mut rx: watch::Receiver<ViewState<T>>, describe: F)
where
    T: Send + Sync + 'static,
    F: Fn(&T) -> String + Send + 'static,
{
    tokio::spawn(async move {
        let line = render(&rx.borrow_and_update(), &describe);
        tracing::info!("{}: {}", label, line);
        while rx.changed().await.is_ok() {
            let line = render(&rx.borrow_and_update(), &describe);
            tracing::info!("{}: {}", label, line);
        }
    });
}
