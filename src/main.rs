//! Grünbeck softener poller - command line entry point
//!
//! `probe` checks that a host answers like a softener, `read` fetches once,
//! and `run` polls until interrupted, printing every new snapshot.

use anyhow::Context;
use clap::{Parser, Subcommand};
use gruenbeck_telemetry::{
    logging::{init_logging, LogConfig},
    services::{probe_device, render_all},
    PollerConfig, Snapshot, SoftenerClient, SoftenerHttpClient, TelemetryPoller,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn, Level};

/// Grünbeck softener telemetry poller
#[derive(Parser, Debug)]
#[command(name = "gruenbeck-poller")]
#[command(about = "Poll a Grünbeck water softener over its local mux_http endpoint")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Softener host or base URL
    #[arg(long, global = true, env = "GRUENBECK_HOST")]
    host: Option<String>,

    /// TOML configuration file
    #[arg(short, long, global = true, env = "GRUENBECK_CONFIG")]
    config: Option<PathBuf>,

    /// Print readings as JSON lines
    #[arg(long, global = true)]
    json: bool,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Query the device identity registers
    Probe,
    /// Fetch the operational registers once
    Read,
    /// Poll until interrupted
    Run {
        /// Polling interval in seconds
        #[arg(short, long)]
        interval: Option<u64>,

        /// Skip the identity probe before polling
        #[arg(long)]
        skip_probe: bool,
    },
}

impl Cli {
    fn load_config(&self) -> anyhow::Result<PollerConfig> {
        let mut config = match &self.config {
            Some(path) => {
                let mut config = PollerConfig::from_file(path)
                    .with_context(|| format!("loading {}", path.display()))?;
                config.apply_env()?;
                config
            }
            None => PollerConfig::from_env()?,
        };

        if let Some(host) = &self.host {
            config.host = host.clone();
        }
        if let Command::Run {
            interval: Some(secs),
            ..
        } = self.command
        {
            config.interval_secs = secs;
        }

        config.validate()?;
        Ok(config)
    }

    fn initialize_logging(&self, config: &PollerConfig) -> anyhow::Result<()> {
        let mut log_config = LogConfig::from_settings(&config.logging);
        if self.debug {
            log_config.level = Level::DEBUG;
        }
        init_logging(log_config).map_err(|e| anyhow::anyhow!("failed to initialize logging: {e}"))
    }
}

fn print_snapshot(snapshot: &Snapshot, json: bool) {
    let readings = render_all(snapshot);
    if json {
        match serde_json::to_string(&readings) {
            Ok(line) => println!("{line}"),
            Err(e) => warn!("Could not encode readings: {e}"),
        }
        return;
    }

    let fetched_at = snapshot
        .fetched_at
        .map(|at| at.to_rfc3339())
        .unwrap_or_default();
    println!("#{} at {fetched_at}", snapshot.sequence);
    for reading in readings {
        let value = reading
            .value
            .map(|v| v.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "  {:<32} {} {}",
            reading.name,
            value,
            reading.unit.unwrap_or_default()
        );
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = cli.load_config()?;
    cli.initialize_logging(&config)?;

    let client = Arc::new(SoftenerHttpClient::new(&config)?);

    match cli.command {
        Command::Probe => {
            let info = probe_device(client.as_ref(), config.device_id).await?;
            if cli.json {
                println!("{}", serde_json::to_string(&info)?);
            } else {
                println!("Device type:       {}", info.device_type);
                println!("Firmware version:  {}", info.firmware_version);
                println!("Hardware revision: {}", info.hardware_revision);
            }
        }
        Command::Read => {
            let poller = TelemetryPoller::new(&config, client)?;
            let outcome = poller.refresh().await?;
            if !outcome.is_success() {
                anyhow::bail!("fetch failed: {}", outcome.kind());
            }
            print_snapshot(&poller.snapshot(), cli.json);
        }
        Command::Run { skip_probe, .. } => {
            if !skip_probe {
                let info = probe_device(client.as_ref(), config.device_id)
                    .await
                    .with_context(|| format!("probing {}", client.endpoint()))?;
                info!("Connected to softener, firmware {}", info.firmware_version);
            }

            let poller = TelemetryPoller::new(&config, client)?;
            let json = cli.json;
            poller.on_update("cli", move |snapshot| print_snapshot(&snapshot, json))?;
            poller.start()?;

            // The first tick is one interval away; show data right away.
            let outcome = poller.refresh().await?;
            if !outcome.is_success() {
                warn!("Initial fetch: {}", outcome.kind());
            }

            tokio::signal::ctrl_c()
                .await
                .context("waiting for ctrl-c")?;
            info!("Shutting down");
            poller.stop();
        }
    }

    Ok(())
}
