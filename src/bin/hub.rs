use clap::Parser;
use ping_store::{
    ServerEvents, Store,
    config::{Config, read_config_file},
    storage::open_engine,
};
use tokio::{signal, spawn, sync::mpsc};
use tracing::{info, instrument, level_filters::LevelFilter, trace};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

const CONFIG_ENV: &str = "PING_STORE_CONFIG";

#[derive(Debug, Clone, Parser)]
struct Args {
    /// Config file (falls back to $PING_STORE_CONFIG, then in-memory storage)
    #[arg(short)]
    file: Option<String>,
}

fn init() {
    let filter = filter::Targets::new().with_targets(vec![
        ("ping_store", LevelFilter::TRACE),
        ("ping_store_hub", LevelFilter::TRACE),
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

    let config = match args.file.or_else(|| std::env::var(CONFIG_ENV).ok()) {
        Some(path) => read_config_file(&path)?,
        None => Config::default(),
    };

    let (engine, engine_config) = open_engine(&config.storage())?;
    let (store, events) = Store::bind(engine, &engine_config).await?;

    let ServerEvents {
        add_servers,
        kick_servers,
    } = events;
    let add_handle = spawn(drain("start polling", add_servers));
    let kick_handle = spawn(drain("stop polling", kick_servers));

    signal::ctrl_c().await?;
    info!("shutdown requested");

    store.close().await?;
    // dropping the store closes the channels and ends the drains
    drop(store);

    add_handle.await?;
    kick_handle.await?;

    Ok(())
}

#[instrument(skip(rx))]
async fn drain(action: &'static str, mut rx: mpsc::Receiver<String>) {
    while let Some(server) = rx.recv().await {
        info!("{action}: {server}");
    }
    trace!("channel closed");
}
