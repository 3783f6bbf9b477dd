//! # PrintSplit Control Interface Application

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::info;

use job_types::config::RuntimeConfig;
use printsplit_control_interface::{create_app_router, AppState};
use printsplit_worker::{
    JobBroker, MemoryBroker, MemoryStore, ObjectStore, RedisBroker, S3Store, SplitWorker,
};

#[derive(Parser)]
#[command(name = "printsplit-server")]
#[command(version, about = "PrintSplit HTTP control interface")]
struct Cli {
    /// Port to listen on
    #[arg(short, long, default_value = "3000")]
    port: u16,

    /// Run self-contained: in-process broker, store, and worker
    #[arg(long)]
    in_memory: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let config = RuntimeConfig::from_env().context("reading configuration")?;

    info!("PrintSplit control interface v{}", env!("CARGO_PKG_VERSION"));

    let (broker, store): (Arc<dyn JobBroker>, Arc<dyn ObjectStore>) = if cli.in_memory {
        info!("running self-contained with in-memory broker and store");
        (Arc::new(MemoryBroker::new()), Arc::new(MemoryStore::new()))
    } else {
        let broker = RedisBroker::connect(&config.redis_url, "split")
            .await
            .context("connecting to broker")?;
        let store = S3Store::from_config(&config.store);
        store
            .ensure_buckets(&[
                config.store.upload_bucket.as_str(),
                config.store.results_bucket.as_str(),
            ])
            .await
            .context("preparing buckets")?;
        (Arc::new(broker), Arc::new(store))
    };

    // Self-contained mode has no external worker process; run one inline.
    if cli.in_memory {
        let worker = Arc::new(SplitWorker::new(
            Arc::clone(&broker),
            Arc::clone(&store),
            config.clone(),
        ));
        tokio::spawn(async move {
            if let Err(err) = worker.run().await {
                tracing::error!(error = %err, "inline worker stopped");
            }
        });
    }

    let state = AppState::new(broker, store, config);
    let app = create_app_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], cli.port));
    info!("control interface listening on {}", addr);

    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .await?;

    Ok(())
}
