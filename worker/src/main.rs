//! # PrintSplit Worker Application
//!
//! Connects to the broker and the object store from environment
//! configuration and processes split jobs until asked to restart.

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::info;

use job_types::config::RuntimeConfig;
use printsplit_worker::{JobBroker, MemoryBroker, MemoryStore, ObjectStore, RedisBroker, S3Store};
use printsplit_worker::SplitWorker;

#[derive(Parser)]
#[command(name = "printsplit-worker")]
#[command(version, about = "PrintSplit queue worker")]
struct Cli {
    /// Run against in-process doubles instead of Redis and MinIO
    #[arg(long)]
    in_memory: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let config = RuntimeConfig::from_env().context("reading configuration")?;

    let (broker, store): (Arc<dyn JobBroker>, Arc<dyn ObjectStore>) = if cli.in_memory {
        info!("running with in-memory broker and store");
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

    let worker = Arc::new(SplitWorker::new(broker, store, config));
    worker.run().await?;

    // Restart signal observed: exit 0 and let the supervisor bring up a
    // fresh process.
    info!("worker exiting for restart");
    Ok(())
}
