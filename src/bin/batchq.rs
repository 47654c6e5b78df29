//! batchq CLI: drive a simulated workload through a per-key batch queue.

use batchq::config::Config;
use batchq::model::{Batch, Keyed};
use batchq::processor::BatchFailure;
use batchq::queue::QueueBuilder;
use batchq::telemetry::{TelemetryConfig, init_telemetry};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "batchq", about = "Per-key batched work queue")]
struct Cli {
    /// TOML config file (defaults to environment variables)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a simulated channel-update workload and print queue stats
    Demo {
        /// Number of distinct channels (partition keys)
        #[arg(long, default_value_t = 4)]
        keys: usize,
        /// Total updates to offer, spread round-robin across channels
        #[arg(long, default_value_t = 200)]
        items: usize,
        /// Override the configured maximum batch size
        #[arg(long)]
        max_batch_size: Option<usize>,
        /// Override the configured maximum wait, in milliseconds
        #[arg(long)]
        max_wait_ms: Option<u64>,
        /// Override the configured idle timeout, in milliseconds
        #[arg(long)]
        idle_timeout_ms: Option<u64>,
        /// Simulated processing time per batch, in milliseconds
        #[arg(long, default_value_t = 20)]
        process_delay_ms: u64,
        /// Fail every Nth batch (0 disables failures)
        #[arg(long, default_value_t = 0)]
        fail_every: u64,
        /// Pause between offers, in milliseconds
        #[arg(long, default_value_t = 1)]
        offer_interval_ms: u64,
    },
    /// Print the effective configuration
    Config,
}

/// A pending edit to a Discord channel message.
#[derive(Debug)]
struct ChannelUpdate {
    channel_id: String,
    message_id: u64,
}

impl Keyed for ChannelUpdate {
    type Key = String;

    fn partition_key(&self) -> String {
        self.channel_id.clone()
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::from_env()?,
    };

    match cli.command {
        Command::Config => {
            println!("max_batch_size:  {}", config.queue.max_batch_size);
            println!("max_wait:        {:?}", config.queue.max_wait);
            println!(
                "idle_timeout:    {}",
                config
                    .queue
                    .idle_timeout
                    .map(|d| format!("{d:?}"))
                    .unwrap_or_else(|| "-".to_string())
            );
            println!(
                "otel_endpoint:   {}",
                config.otel_endpoint.as_deref().unwrap_or("-")
            );
            println!("log_level:       {}", config.log_level);
            Ok(())
        }
        Command::Demo {
            keys,
            items,
            max_batch_size,
            max_wait_ms,
            idle_timeout_ms,
            process_delay_ms,
            fail_every,
            offer_interval_ms,
        } => {
            let mut config = config;
            if let Some(size) = max_batch_size {
                config.queue.max_batch_size = size;
            }
            if let Some(ms) = max_wait_ms {
                config.queue.max_wait = Duration::from_millis(ms);
            }
            if let Some(ms) = idle_timeout_ms {
                config.queue.idle_timeout = Some(Duration::from_millis(ms));
            }
            anyhow::ensure!(keys > 0, "--keys must be at least 1");

            let _guard = init_telemetry(TelemetryConfig {
                endpoint: config.otel_endpoint.clone(),
                service_name: "batchq".to_string(),
                log_level: config.log_level.clone(),
            })?;

            cmd_demo(
                config,
                keys,
                items,
                Duration::from_millis(process_delay_ms),
                fail_every,
                Duration::from_millis(offer_interval_ms),
            )
            .await
        }
    }
}

async fn cmd_demo(
    config: Config,
    keys: usize,
    items: usize,
    process_delay: Duration,
    fail_every: u64,
    offer_interval: Duration,
) -> anyhow::Result<()> {
    let queue = QueueBuilder::new(config.queue)
        .error_sink(|failure: BatchFailure<String, String>| {
            warn!(
                channel = %failure.key,
                seq = failure.seq,
                batch_len = failure.batch_len,
                "dead-lettered batch: {}",
                failure.cause
            );
        })
        .build(move |batch: Batch<ChannelUpdate>| async move {
            tokio::time::sleep(process_delay).await;
            if fail_every > 0 && batch.seq % fail_every == 0 {
                return Err(format!(
                    "simulated failure for {} (batch {})",
                    batch.key, batch.seq
                ));
            }
            let first = batch.items.first().map(|u| u.message_id);
            let last = batch.items.last().map(|u| u.message_id);
            info!(
                channel = %batch.key,
                seq = batch.seq,
                size = batch.len(),
                trigger = %batch.trigger,
                ?first,
                ?last,
                "applied channel updates"
            );
            Ok(())
        })?;

    let producer = {
        let queue = queue.clone();
        async move {
            for n in 0..items {
                let update = ChannelUpdate {
                    channel_id: format!("channel-{}", n % keys),
                    message_id: n as u64,
                };
                if queue.offer(update).is_err() {
                    break;
                }
                if !offer_interval.is_zero() {
                    tokio::time::sleep(offer_interval).await;
                }
            }
        }
    };

    tokio::select! {
        () = producer => info!(items, "all updates offered"),
        _ = tokio::signal::ctrl_c() => warn!("interrupted, shutting down early"),
    }

    queue.shutdown().await;
    println!("{}", serde_json::to_string_pretty(&queue.stats())?);
    Ok(())
}
