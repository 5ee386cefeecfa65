use anyhow::Context;
use cart_cdc::config::{CdcConfig, SnapshotBackend};
use cart_cdc::controller::{spawn_signal_hook, unless_signalled, wait_for_termination};
use cart_cdc::logging::{self, LogFormat};
use cart_cdc::ChangeFeed;
use clap::Parser;
use std::path::PathBuf;
use tracing::{error, info};

/// Poll the cart collection and publish one event per detected change.
#[derive(Parser, Debug)]
#[command(name = "cart-cdc", version)]
struct Cli {
    /// JSON config file. Flags below override its values.
    #[arg(short, long, env = "CART_CDC_CONFIG")]
    config: Option<PathBuf>,

    /// Seconds between polls
    #[arg(long, env = "CART_CDC_POLL_INTERVAL")]
    poll_interval: Option<u64>,

    /// Bus destination (Redis stream key)
    #[arg(long, visible_alias = "topic", env = "CART_CDC_DESTINATION")]
    destination: Option<String>,

    /// Redis URL for the bus
    #[arg(long, env = "CART_CDC_REDIS_URL")]
    redis_url: Option<String>,

    /// URL returning the full cart collection
    #[arg(long, env = "CART_CDC_SOURCE_URL")]
    source_url: Option<String>,

    /// Snapshot location (file path or SQLite database)
    #[arg(long, env = "CART_CDC_STATE")]
    state: Option<String>,

    /// Snapshot backend
    #[arg(long, value_parser = ["file", "sqlite"])]
    state_backend: Option<String>,

    /// Directory for events that could not be published
    #[arg(long, env = "CART_CDC_DEAD_LETTER_DIR")]
    dead_letter_dir: Option<String>,

    /// Keep a dated local copy of every event in this directory
    #[arg(long, env = "CART_CDC_ARCHIVE_DIR")]
    archive_dir: Option<String>,

    /// Do not connect to a bus; log events instead
    #[arg(long, env = "CART_CDC_LOCAL_MODE", default_value_t = false)]
    local_mode: bool,

    /// Run a single cycle and exit
    #[arg(long, default_value_t = false)]
    once: bool,

    #[arg(long, value_enum, default_value_t = LogFormat::Pretty, env = "CART_CDC_LOG_FORMAT")]
    log_format: LogFormat,
}

impl Cli {
    fn load_config(&self) -> anyhow::Result<CdcConfig> {
        let mut config = match &self.config {
            Some(path) => CdcConfig::from_json_file(path)
                .with_context(|| format!("failed to load {}", path.display()))?,
            None => CdcConfig::default(),
        };

        if let Some(secs) = self.poll_interval {
            config.poll.interval_sec = secs;
        }
        if let Some(dest) = &self.destination {
            config.bus.destination = dest.clone();
        }
        if let Some(url) = &self.redis_url {
            config.bus.redis_url = Some(url.clone());
        }
        if let Some(url) = &self.source_url {
            config.source.url = url.clone();
        }
        if let Some(path) = &self.state {
            config.snapshot.path = path.clone();
        }
        match self.state_backend.as_deref() {
            Some("sqlite") => config.snapshot.backend = SnapshotBackend::Sqlite,
            Some("file") => config.snapshot.backend = SnapshotBackend::File,
            _ => {}
        }
        if let Some(dir) = &self.dead_letter_dir {
            config.dead_letter.dir = dir.clone();
        }
        if let Some(dir) = &self.archive_dir {
            config.archive.dir = Some(dir.clone());
        }
        if self.local_mode {
            config.bus.local_mode = true;
        }

        config.validate().context("invalid configuration")?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init(cli.log_format);

    let config = cli.load_config()?;
    // The bus connect can retry for a while; honour a signal meanwhile.
    let Some(built) = unless_signalled(ChangeFeed::from_config(config), wait_for_termination()).await
    else {
        return Ok(());
    };
    let mut feed = built.context("failed to build change feed")?;

    if cli.once {
        feed.start().await.context("failed to start")?;
        let report = feed.run_cycle().await?;
        feed.shutdown().await;
        info!(outcome = report.outcome.label(), "Single cycle finished");
        if !report.outcome.is_committed() {
            anyhow::bail!("cycle did not commit: {:?}", report.outcome);
        }
        return Ok(());
    }

    let signals = spawn_signal_hook(feed.shutdown_handle());
    let result = feed.run().await;
    signals.abort();

    if let Err(e) = &result {
        error!(error = %e, "Change feed stopped with an error");
    }
    result.context("change feed failed")
}
