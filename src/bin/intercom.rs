//! Intercom service
//!
//! Runs the intercom until a signal, a web client or the restart timer asks
//! it to stop. The device listing commands help pick `speaker` and
//! `microphone` values for the configuration file.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use rpi_intercom::{
    audio::{list_raw, list_recommended, CpalBackend, DeviceListing},
    config::{AppConfig, DeviceSelector},
    network::EchoNetwork,
    shutdown::Shutdown,
    ui::WebServer,
    Intercom,
};

#[derive(Parser)]
#[command(name = "rpi-intercom", version, about = "Always-on voice intercom")]
struct Cli {
    /// Configuration file (TOML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(flatten)]
    overrides: Overrides,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the intercom (default)
    Run,
    /// Print the recommended sound device names
    ListDevices,
    /// Print every identifier the sound driver reports
    ListDevicesRaw,
}

#[derive(Args)]
struct Overrides {
    /// Playback device name, index, "default" or "none"
    #[arg(long, global = true)]
    speaker: Option<DeviceSelector>,

    /// Capture device name, index, "default" or "none"
    #[arg(long, global = true)]
    microphone: Option<DeviceSelector>,

    /// Frames per device read/write
    #[arg(long, global = true)]
    chunk_size: Option<usize>,

    /// Seconds of outbound audio kept before the backlog is dropped
    #[arg(long, global = true)]
    send_buffer_latency: Option<f64>,

    /// Exit after this many seconds (0 = never)
    #[arg(long, global = true)]
    restart_seconds: Option<u64>,

    /// Do not start the status server
    #[arg(long, global = true)]
    no_ui: bool,
}

impl Overrides {
    fn apply(self, config: &mut AppConfig) {
        if let Some(speaker) = self.speaker {
            config.audio.speaker = speaker;
        }
        if let Some(microphone) = self.microphone {
            config.audio.microphone = microphone;
        }
        if let Some(chunk_size) = self.chunk_size {
            config.audio.chunk_size = chunk_size;
        }
        if let Some(latency) = self.send_buffer_latency {
            config.network.send_buffer_latency = latency;
        }
        if let Some(seconds) = self.restart_seconds {
            config.restart_seconds = seconds;
        }
        if self.no_ui {
            config.ui.enabled = false;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let mut config = match cli.config.or_else(AppConfig::default_path) {
        Some(path) => AppConfig::load(&path)
            .with_context(|| format!("Loading configuration from {}", path.display()))?,
        None => AppConfig::default(),
    };
    cli.overrides.apply(&mut config);
    config.validate()?;

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run(config).await,
        Command::ListDevices => {
            let listing = list_recommended(&CpalBackend::new())?;
            print_listing(&listing);
            println!();
            println!("Use one of these names as 'speaker' or 'microphone' in the configuration file.");
            Ok(())
        }
        Command::ListDevicesRaw => {
            let listing = list_raw(&CpalBackend::new())?;
            print_listing(&listing);
            println!();
            println!("These are all the identifiers the sound driver reports. Most of them are");
            println!("plugins or aliases that will not work well; prefer the names printed by");
            println!("'list-devices' unless you know you need one of these.");
            Ok(())
        }
    }
}

fn print_listing(listing: &DeviceListing) {
    println!("Playback devices:");
    for name in &listing.playback {
        println!("  {}", name);
    }
    println!("Capture devices:");
    for name in &listing.capture {
        println!("  {}", name);
    }
}

async fn run(config: AppConfig) -> Result<()> {
    let shutdown = Shutdown::new();
    let intercom = Arc::new(Intercom::new(
        config.clone(),
        Arc::new(CpalBackend::new()),
        Arc::new(EchoNetwork::new()),
        shutdown.clone(),
    ));

    let signals = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = wait_for_signal(signals).await {
            tracing::error!("Unable to listen for signals: {}", e);
        }
    });

    let server = if config.ui.enabled {
        let server = WebServer::new(config.ui.bind_address.clone(), intercom.app_state());
        tracing::info!("Web UI available at http://{}", config.ui.bind_address);
        Some(tokio::spawn(server.run()))
    } else {
        None
    };

    let runner = intercom.clone();
    let result = tokio::task::spawn_blocking(move || runner.run()).await?;

    // A failed start never saw a shutdown request; release the server
    shutdown.request();
    if let Some(server) = server {
        if let Err(e) = server.await? {
            tracing::warn!("Status server failed: {}", e);
        }
    }

    result?;
    Ok(())
}

#[cfg(unix)]
async fn wait_for_signal(shutdown: Shutdown) -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = signal(SignalKind::terminate())?;
    let mut quit = signal(SignalKind::quit())?;
    let mut interrupt = signal(SignalKind::interrupt())?;

    let name = tokio::select! {
        _ = terminate.recv() => "SIGTERM",
        _ = quit.recv() => "SIGQUIT",
        _ = interrupt.recv() => "SIGINT",
    };

    tracing::info!("Received {}", name);
    shutdown.request();
    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_signal(shutdown: Shutdown) -> std::io::Result<()> {
    tokio::signal::ctrl_c().await?;
    tracing::info!("Received Ctrl+C");
    shutdown.request();
    Ok(())
}
