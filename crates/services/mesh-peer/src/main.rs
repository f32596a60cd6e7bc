//! Command-line mesh participant
//!
//! Joins a conversation through the signaling relay, connects to every other
//! participant and sends a silent VP8 track. Ctrl+C hangs up.
//!
//! # Usage
//!
//! ```bash
//! # Join with a YAML config
//! cargo run -p meshcall-peer -- --config ./mesh.yaml
//!
//! # Or configure everything from flags / environment
//! cargo run -p meshcall-peer -- \
//!   --relay-url wss://relay.example.com \
//!   --lookup-url https://lookup.example.com \
//!   --store-id store-1 \
//!   --conversation-id conv-1 \
//!   --user-id alice
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use meshcall_webrtc::{MeshCall, MeshConfig, MeshEvent, SampleVideoSource};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// MeshCall participant
///
/// Flags override values read from the config file.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// YAML configuration file
    #[arg(short, long, env = "MESH_CONFIG")]
    config: Option<PathBuf>,

    /// Signaling relay URL
    #[arg(long, env = "MESH_RELAY_URL")]
    relay_url: Option<String>,

    /// Participant lookup base URL
    #[arg(long, env = "MESH_LOOKUP_URL")]
    lookup_url: Option<String>,

    #[arg(long, env = "MESH_STORE_ID")]
    store_id: Option<String>,

    #[arg(long, env = "MESH_CONVERSATION_ID")]
    conversation_id: Option<String>,

    #[arg(long, env = "MESH_USER_ID")]
    user_id: Option<String>,

    /// Device id; a random one is generated when unset
    #[arg(long, env = "MESH_DEVICE_ID")]
    device_id: Option<String>,

    /// STUN servers (comma-separated)
    #[arg(long, value_delimiter = ',')]
    stun_servers: Option<Vec<String>>,

    /// Drop connections that are not connected after this long
    #[arg(long, env = "MESH_CONNECT_TIMEOUT_MS")]
    connect_timeout_ms: Option<u64>,

    /// Hang up after this many seconds
    #[arg(long)]
    duration_secs: Option<u64>,

    /// Log as JSON lines
    #[arg(long, default_value_t = false)]
    json: bool,
}

impl Args {
    fn into_config(self) -> Result<MeshConfig> {
        let mut config = match &self.config {
            Some(path) => MeshConfig::from_yaml_file(path)
                .with_context(|| format!("Failed to load config from {}", path.display()))?,
            None => MeshConfig::default(),
        };

        if let Some(url) = self.relay_url {
            config.relay_url = url;
        }
        if let Some(url) = self.lookup_url {
            config.lookup_url = url;
        }
        if let Some(store_id) = self.store_id {
            config.identity.store_id = store_id;
        }
        if let Some(conversation_id) = self.conversation_id {
            config.identity.conversation_id = conversation_id;
        }
        if let Some(user_id) = self.user_id {
            config.identity.user_id = user_id;
        }
        if let Some(device_id) = self.device_id {
            config.identity.device_id = device_id;
        }
        if config.identity.device_id.is_empty() {
            config.identity.device_id = uuid::Uuid::new_v4().to_string();
        }
        if let Some(stun_servers) = self.stun_servers {
            config.stun_servers = stun_servers;
        }
        if let Some(ms) = self.connect_timeout_ms {
            config.options.connect_timeout_ms = ms;
        }

        config.validate().context("Invalid configuration")?;
        Ok(config)
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.json);

    let shutdown_flag = Arc::new(AtomicBool::new(false));
    let shutdown_flag_handler = Arc::clone(&shutdown_flag);

    ctrlc::set_handler(move || {
        eprintln!("\nCtrl+C received, hanging up...");

        if shutdown_flag_handler.swap(true, Ordering::SeqCst) {
            eprintln!("Shutdown already in progress, forcing exit");
            std::process::exit(0);
        }

        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_secs(5));
            eprintln!("Graceful shutdown timed out, forcing exit");
            std::process::exit(0);
        });
    })
    .context("Failed to set Ctrl+C handler")?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .thread_name("mesh-worker")
        .enable_all()
        .build()?;

    runtime.block_on(async_main(args, shutdown_flag))
}

async fn async_main(args: Args, shutdown_flag: Arc<AtomicBool>) -> Result<()> {
    let duration = args.duration_secs.map(Duration::from_secs);
    let config = args.into_config()?;

    info!(
        version = meshcall_webrtc::version(),
        relay = %config.relay_url,
        conversation = %config.identity.conversation_id,
        device = %config.identity.device_id,
        "MeshCall peer starting"
    );

    let call = MeshCall::from_config(config, Arc::new(SampleVideoSource::default()))?;
    tokio::spawn(log_events(call.subscribe()));

    call.start().await.context("Failed to join the call")?;
    info!("Joined. Press Ctrl+C to hang up.");

    let started = tokio::time::Instant::now();
    while !shutdown_flag.load(Ordering::SeqCst) {
        if duration.is_some_and(|limit| started.elapsed() >= limit) {
            info!("Duration elapsed");
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    call.hang_up().await;
    info!("Hung up");
    Ok(())
}

async fn log_events(mut events: broadcast::Receiver<MeshEvent>) {
    loop {
        match events.recv().await {
            Ok(MeshEvent::ConnectionAdded {
                connection_id,
                role,
            }) => info!(%connection_id, %role, "Connection added"),
            Ok(MeshEvent::ConnectionStateChanged {
                connection_id,
                state,
            }) => info!(%connection_id, %state, "Connection state changed"),
            Ok(MeshEvent::ConnectionRemoved {
                connection_id,
                reason,
            }) => info!(%connection_id, ?reason, "Connection removed"),
            Ok(MeshEvent::RemoteTrack {
                connection_id,
                track,
            }) => info!(%connection_id, track = %track.id, kind = %track.kind, "Remote track"),
            Ok(MeshEvent::CallEnded) => info!("Call ended"),
            Ok(event) => info!(?event, "Mesh event"),
            Err(broadcast::error::RecvError::Lagged(n)) => warn!("Dropped {} mesh events", n),
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

fn init_tracing(json: bool) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,meshcall_webrtc=debug,webrtc=warn"));

    let registry = tracing_subscriber::registry().with(env_filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}
