//! dispatch-check: drive a dispatcher from a config file and report where
//! requests went.
//!
//! Usage:
//!   dispatch-check --config dispatch.yaml --url https://api.example.com/health -n 50
//!   dispatch-check --config dispatch.yaml --url https://api.example.com/health --watch

use anyhow::Context;
use clap::Parser;
use egress_dispatch::{load_config, ConfigWatcher, Dispatcher};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "dispatch-check")]
#[command(about = "Send test traffic through an egress dispatcher", long_about = None)]
struct Cli {
    /// Dispatcher config (.yaml, .yml or .json)
    #[arg(short, long)]
    config: PathBuf,

    /// Target URL for the GET requests
    #[arg(short, long)]
    url: url::Url,

    /// Number of requests per round
    #[arg(short = 'n', long, default_value_t = 20)]
    requests: usize,

    /// Keep running: reload the config on change and repeat a round every interval
    #[arg(short, long)]
    watch: bool,

    /// Seconds between rounds in watch mode
    #[arg(long, default_value_t = 10)]
    interval: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "egress_dispatch=info,dispatch_check=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    let dispatcher = Arc::new(
        Dispatcher::new(config)
            .await
            .context("building dispatcher")?,
    );

    if !cli.watch {
        round(&dispatcher, &cli.url, cli.requests).await?;
        return Ok(());
    }

    let (watcher, updates) = ConfigWatcher::new(&cli.config);
    let _watcher = watcher.run().context("starting config watcher")?;
    let follower = Arc::clone(&dispatcher);
    tokio::spawn(async move { follower.follow(updates).await });

    let mut ticker = tokio::time::interval(Duration::from_secs(cli.interval.max(1)));
    loop {
        tokio::select! {
            _ = ticker.tick() => round(&dispatcher, &cli.url, cli.requests).await?,
            _ = tokio::signal::ctrl_c() => break,
        }
    }
    Ok(())
}

async fn round(dispatcher: &Dispatcher, url: &url::Url, requests: usize) -> anyhow::Result<()> {
    let mut statuses: HashMap<String, usize> = HashMap::new();
    for _ in 0..requests {
        let key = match dispatcher.get(url.clone()).await {
            Ok(resp) => resp.status().as_u16().to_string(),
            Err(e) => {
                tracing::debug!(error = %e, "request failed");
                if e.is_deadline_or_cancel() {
                    "timeout".to_string()
                } else {
                    "error".to_string()
                }
            }
        };
        *statuses.entry(key).or_default() += 1;
    }

    let signals = dispatcher.signals();
    println!("results: {:?}", statuses);
    println!("{}", serde_json::to_string_pretty(&signals)?);
    Ok(())
}
