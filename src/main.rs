//! CLI for brokerlink
//!
//! Subcommands:
//! - `demo`: run a worker against the in-memory broker and publish a few
//!   events through it
//! - `config`: print the resolved settings

use std::sync::Arc;
use std::time::Duration;

use brokerlink::config::{LinkConfig, Settings, load_config};
use brokerlink::transport::InboundMessage;
use brokerlink::transport::memory::MemoryBroker;
use brokerlink::utils::logging;
use brokerlink::worker::Worker;
use clap::Parser;
use serde_json::json;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "brokerlink")]
enum Command {
    /// Run a worker against the in-memory broker
    Demo {
        /// Number of events to publish for each known event name
        #[arg(long, default_value_t = 3)]
        events: usize,
        /// How long to keep consuming after the last publish
        #[arg(long, default_value_t = 250)]
        linger_ms: u64,
    },
    /// Print the resolved settings as JSON
    Config,
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();

    let settings = match load_config() {
        Ok(settings) => settings,
        Err(e) => {
            logging::init("info");
            error!("Failed to load configuration: {}", e);
            return;
        }
    };
    logging::init(&settings.log.level);

    match Command::parse() {
        Command::Demo { events, linger_ms } => {
            if let Err(e) = run_demo(&settings, events, Duration::from_millis(linger_ms)).await {
                error!("Demo failed: {}", e);
            }
        }
        Command::Config => match serde_json::to_string_pretty(&settings) {
            Ok(rendered) => println!("{rendered}"),
            Err(e) => error!("Failed to render configuration: {}", e),
        },
    }
}

async fn run_demo(
    settings: &Settings,
    events: usize,
    linger: Duration,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = LinkConfig::from(&settings.link);
    if let Some(tag) = &settings.worker.consumer_tag {
        config = config.with_consumer_tag(tag);
    }

    let broker = MemoryBroker::new();
    let mut worker = Worker::connect(config, Arc::new(broker.clone()))
        .await?
        .with_settings(&settings.worker);

    worker.add_handler("created", |message: &InboundMessage| {
        match message.decode::<serde_json::Value>() {
            Ok(payload) => {
                info!(routing_key = %message.routing_key, %payload, "created");
                true
            }
            Err(e) => {
                warn!("undecodable payload: {}", e);
                false
            }
        }
    })?;
    worker.add_handler("deleted", |message: &InboundMessage| {
        info!(routing_key = %message.routing_key, "deleted, leaving unacknowledged");
        false
    })?;

    worker
        .bind(&settings.worker.queue, &settings.worker.binding_key)
        .await?;

    let publisher = worker.publisher().clone();
    for id in 0..events {
        publisher.publish_topic("created", &json!({ "id": id })).await?;
        publisher.publish_topic("deleted", &json!({ "id": id })).await?;
    }
    publisher.publish_topic("archived", &json!({ "id": 0 })).await?;

    let first = worker.run_until(linger_or_ctrl_c(linger)).await?;
    println!("{}", serde_json::to_string_pretty(&first)?);

    // drop the broker connection; the next publish repairs it
    worker.client().start().await?;
    broker.sever_connections();
    publisher
        .publish_topic("created", &json!({ "id": "after-restart" }))
        .await?;

    // the fresh consumer also receives what the first run left unacknowledged
    worker
        .bind(&settings.worker.queue, &settings.worker.binding_key)
        .await?;
    let summary = worker.run_until(linger_or_ctrl_c(linger)).await?;

    info!(
        restarts = worker.client().manager().restart_count(),
        acked = broker.acked().len(),
        "demo finished"
    );
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

async fn linger_or_ctrl_c(linger: Duration) {
    tokio::select! {
        _ = tokio::time::sleep(linger) => {}
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received. Exiting gracefully.");
        }
    }
}
