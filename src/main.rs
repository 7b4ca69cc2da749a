use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use lan_inspector::capture::{self, CaptureQueue};
use lan_inspector::state::AppState;
use lan_inspector::{config, forwarding, mdns, oui, privilege, scanner, spoofer, ssdp, store, tasks, topology};
use tracing::{error, info};

const BANNER: &str = r#"
  _                 _                             _
 | |   __ _ _ __   (_)_ __  ___ _ __   ___  ___| |_ ___  _ __
 | |  / _` | '_ \  | | '_ \/ __| '_ \ / _ \/ __| __/ _ \| '__|
 | |_| (_| | | | | | | | | \__ \ |_) |  __/ (__| || (_) | |
 |_____\__,_|_| |_| |_|_| |_|___/ .__/ \___|\___|\__\___/|_|
                                 |_|
"#;

const TOPOLOGY_REFRESH_PERIOD: Duration = Duration::from_secs(60);
const ARP_SCAN_PERIOD: Duration = Duration::from_secs(10);
const CAPTURE_ROLL_PERIOD: Duration = Duration::from_secs(30);
const ARP_SPOOF_PERIOD: Duration = Duration::from_secs(10);
const MDNS_SSDP_PERIOD: Duration = Duration::from_secs(5);
const CAPTURE_QUEUE_CAPACITY: usize = 4096;

/// Local-network device-inspection engine: ARP discovery/spoofing, packet
/// capture and classification, backed by an embedded relational store.
#[derive(Parser, Debug)]
#[command(name = "lan-inspector", version, about)]
struct Cli {
    /// Network interface to inspect (default: resolved from the OS routing table).
    #[arg(short, long)]
    interface: Option<String>,

    /// Path to a JSON configuration file.
    #[arg(short, long, default_value = "./inspector_config.json")]
    config: String,

    /// Path to a SQLite database file (overrides the config's in-memory default).
    #[arg(long)]
    db: Option<String>,

    /// Path to an OUI vendor database (tab-separated PREFIX\tVendor lines).
    #[arg(long)]
    oui_file: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "lan_inspector=info".into()),
        )
        .init();

    let cli = Cli::parse();

    println!("{BANNER}");
    info!(version = env!("CARGO_PKG_VERSION"), "starting lan-inspector");

    if !privilege::is_admin() {
        anyhow::bail!("lan-inspector must run with administrator/root privileges (ARP spoofing requires raw socket access)");
    }

    let app_config = config::AppConfig::from_file(&cli.config);

    let oui_db = match cli.oui_file {
        Some(ref path) => oui::OuiDatabase::load(path),
        None => oui::OuiDatabase::parse(""),
    };

    let mut network = topology::resolve().await.context("failed to resolve network topology")?;
    if let Some(interface) = cli.interface {
        network.interface_name = interface;
    }
    info!(
        interface = network.interface_name,
        host_ip = %network.host_ip,
        gateway_ip = %network.gateway_ip,
        "topology resolved"
    );

    let database_url = match cli.db {
        Some(path) => format!("sqlite://{path}"),
        None if app_config.use_in_memory_db => "sqlite::memory:".to_string(),
        None => "sqlite://lan-inspector.db".to_string(),
    };
    let pool = store::init(&database_url).await.context("failed to initialize store")?;

    forwarding::enable().await.context("failed to enable OS IP forwarding")?;

    let state = Arc::new(AppState::new(network, pool, app_config, oui_db));

    spawn_supervised_tasks(state.clone());

    info!("lan-inspector running, press Ctrl-C to stop");
    tokio::signal::ctrl_c().await.context("failed to listen for shutdown signal")?;

    info!("shutting down");
    state.stop();
    forwarding::disable().await;

    Ok(())
}

fn spawn_supervised_tasks(state: Arc<AppState>) {
    {
        let state = state.clone();
        tasks::spawn("topology-refresh", TOPOLOGY_REFRESH_PERIOD, move || {
            let state = state.clone();
            async move {
                topology::refresh(&state).await;
                Ok(())
            }
        });
    }

    {
        let state = state.clone();
        tasks::spawn("arp-scanner", ARP_SCAN_PERIOD, move || {
            let state = state.clone();
            async move { scanner::tick(&state).await }
        });
    }

    let capture_queue = CaptureQueue::new(CAPTURE_QUEUE_CAPACITY);
    capture::spawn_classifier(state.clone(), capture_queue.clone());
    {
        let state = state.clone();
        let queue = capture_queue;
        tasks::spawn("capture-session", CAPTURE_ROLL_PERIOD, move || {
            let state = state.clone();
            let queue = queue.clone();
            async move {
                if let Err(err) = capture::run_session(state, queue).await {
                    error!(error = ?err, "capture session ended with an error, will restart next tick");
                }
                Ok(())
            }
        });
    }

    {
        let state = state.clone();
        tasks::spawn("arp-spoofer", ARP_SPOOF_PERIOD, move || {
            let state = state.clone();
            async move { spoofer::tick(&state).await }
        });
    }

    {
        let state = state.clone();
        tokio::spawn(async move { mdns::run(state).await });
    }

    {
        let state = state.clone();
        tasks::spawn("ssdp-discovery", MDNS_SSDP_PERIOD, move || {
            let state = state.clone();
            async move { ssdp::tick(&state).await }
        });
    }
}
