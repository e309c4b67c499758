use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use monitorix::{
    config::read_config_file,
    live::LiveUpdateBroadcaster,
    monitor::Monitor,
    notify::Notifier,
    proxmox::ProxmoxClient,
    scheduler::Scheduler,
    seed::seed,
    storage,
};
use tracing::{info, level_filters::LevelFilter, trace};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Parser)]
#[command(version, about = "Proxmox and service monitoring hub")]
struct Args {
    /// Config file
    #[arg(short)]
    file: String,
}

fn init() {
    let filter = filter::Targets::new().with_targets(vec![
        ("monitorix", LevelFilter::DEBUG),
        ("monitorix_hub", LevelFilter::TRACE),
        ("tower_http", LevelFilter::DEBUG),
    ]);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .compact()
                .with_ansi(false),
        )
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init();
    let args = Args::parse();
    trace!("started with args: {args:?}");

    let config = read_config_file(&args.file)?;

    let store = storage::open(&config.storage.clone().unwrap_or_default()).await?;
    info!("using storage backend: {}", store.describe());
    seed(store.as_ref(), &config).await?;

    let gateway = Arc::new(ProxmoxClient::new(Duration::from_secs(
        config.proxmox.timeout_secs,
    ))?);
    let notifier = Arc::new(Notifier::new(store.clone(), config.email.as_ref())?);
    let live = Arc::new(LiveUpdateBroadcaster::new());

    let monitor = Arc::new(Monitor::new(
        store,
        gateway,
        notifier,
        live.clone(),
        config.retention.clone(),
    )?);
    let scheduler = Arc::new(Scheduler::start(monitor, &config.scheduler));

    #[cfg(feature = "api")]
    {
        use monitorix::api::{ApiConfig, ApiState, spawn_api_server};

        let api_config = ApiConfig::from(&config.api);
        spawn_api_server(api_config, ApiState::new(scheduler.clone(), live)).await?;
    }
    #[cfg(not(feature = "api"))]
    drop(live);

    tokio::signal::ctrl_c().await?;
    info!("received Ctrl-C, shutting down");
    scheduler.stop().await;

    Ok(())
}
