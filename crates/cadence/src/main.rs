//! Cadence
//!
//! Runs a single timed scene from a `scene.toml` configuration.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use cadence::config::{AppConfig, DEFAULT_CONFIG_PATH, TomlConfigStore};
use cadence::http::{BridgeClients, HttpWebhook};
use cadence_runtime::{NotificationLevel, SceneEngine};
use cadence_types::{DeviceClass, SceneOutcome};

/// How often the run command prints the scene status
const STATUS_INTERVAL: Duration = Duration::from_secs(10);

/// Cadence Scene Runner
#[derive(Parser, Debug)]
#[command(name = "cadence")]
#[command(about = "Runs timed device scenes", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one scene to completion (Ctrl+C stops it)
    Run {
        /// Path to the configuration file
        #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,

        /// Log device firings and webhooks instead of performing them
        #[arg(long)]
        dry_run: bool,
    },

    /// Load and validate the configuration
    Check {
        /// Path to the configuration file
        #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,
    },

    /// Write a default configuration file
    Init {
        /// Path to the configuration file
        #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("cadence=info,cadence_runtime=info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    match args.command {
        Command::Run { config, dry_run } => run(config, dry_run).await,
        Command::Check { config } => check(config).await,
        Command::Init { config, force } => init(config, force).await,
    }
}

/// Run a scene and report its outcome
async fn run(path: PathBuf, dry_run: bool) -> Result<()> {
    info!("Starting Cadence v{}", env!("CARGO_PKG_VERSION"));

    let store = Arc::new(TomlConfigStore::new(&path));
    let app = store
        .load_app()
        .await
        .with_context(|| format!("Failed to load {}", path.display()))?;

    let timeout = Duration::from_secs(app.bridge.timeout_secs);
    let clients = BridgeClients::new(&app.bridge.base_url, timeout)
        .context("Failed to create bridge client")?;
    let webhook = HttpWebhook::new(timeout).context("Failed to create webhook client")?;
    info!("Device bridge: {}", clients.base_url());

    let engine = SceneEngine::new(store, Arc::new(clients), Arc::new(webhook));
    let handle = engine.start(dry_run).await?;

    let wait = handle.wait();
    tokio::pin!(wait);
    let mut ticker = tokio::time::interval(STATUS_INTERVAL);
    ticker.tick().await;

    let outcome = loop {
        tokio::select! {
            outcome = &mut wait => break outcome?,
            _ = ticker.tick() => {
                info!("Scene status: {}", engine.status());
                report_popups(&engine);
            }
            result = tokio::signal::ctrl_c() => {
                match result {
                    Ok(()) => info!("Received Ctrl+C, stopping scene..."),
                    Err(e) => error!("Failed to listen for Ctrl+C: {}", e),
                }
                engine.stop();
            }
        }
    };

    report_popups(&engine);
    print_outcome(&outcome);
    Ok(())
}

fn report_popups(engine: &SceneEngine) {
    for popup in engine.notifier().drain_popups() {
        match popup.level {
            NotificationLevel::Info => info!("{}: {}", popup.title, popup.message),
            NotificationLevel::Warning => warn!("{}: {}", popup.title, popup.message),
            NotificationLevel::Alert => error!("{}: {}", popup.title, popup.message),
        }
    }
}

fn print_outcome(outcome: &SceneOutcome) {
    println!(
        "Scene {} after {}s",
        outcome.reason, outcome.running_secs
    );
    for (device, count) in &outcome.fire_counts {
        println!("  {:<20} {}", device.to_string(), count);
    }
}

/// Validate the configuration and print a summary
async fn check(path: PathBuf) -> Result<()> {
    let store = TomlConfigStore::new(&path);
    let app = store
        .load_app()
        .await
        .with_context(|| format!("Failed to load {}", path.display()))?;

    print_summary(&path, &app);

    let issues = app.scene.validate();
    if !issues.is_empty() {
        for issue in &issues {
            println!("  ! {}", issue);
        }
        bail!("{} configuration issue(s) found", issues.len());
    }

    println!("Configuration OK");
    Ok(())
}

fn print_summary(path: &std::path::Path, app: &AppConfig) {
    let scene = &app.scene;
    println!("Configuration: {}", path.display());
    println!("  Bridge:        {}", app.bridge.base_url);
    println!("  Duration:      {}s", scene.scene.duration);
    println!("  Initial delay: {}s", scene.scene.initial_delay_secs);

    for class in DeviceClass::ALL {
        let enabled: Vec<String> = scene
            .devices
            .iter()
            .filter(|d| d.class == class && d.enabled)
            .map(|d| format!("{} (every {}s)", d.key(), d.interval))
            .collect();
        if !enabled.is_empty() {
            println!("  {}: {}", class.label(), enabled.join(", "));
        }
    }

    println!("  Sensors:       {}", scene.sensors.len());
    println!("  Modifiers:     {}", scene.modifiers.iter().filter(|m| m.enabled).count());
    match &scene.killswitch {
        Some(killswitch) if killswitch.enabled => {
            println!("  Killswitch:    {}", killswitch.target)
        }
        _ => println!("  Killswitch:    off"),
    }
}

/// Write the default configuration file
async fn init(path: PathBuf, force: bool) -> Result<()> {
    TomlConfigStore::new(&path)
        .init(force)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))?;
    println!("Wrote default configuration to {}", path.display());
    Ok(())
}
