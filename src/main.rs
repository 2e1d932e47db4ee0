// Main entry point - Command line, dependency injection and runtime wiring
mod domain;
mod application;
mod infrastructure;
mod presentation;

use std::{net::SocketAddr, sync::Arc};

use clap::{Parser, Subcommand, ValueEnum};
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

use crate::application::obd_source::{self, FrameShape, SyntheticObd};
use crate::application::pipeline::TelemetryPipeline;
use crate::application::relay_hub::RelayHub;
use crate::application::supervisor::ConnectionSupervisor;
use crate::infrastructure::config::{AppConfig, DEFAULT_CONFIG_PATH, load_config};
use crate::infrastructure::ws_connector::WsConnector;
use crate::presentation::console::{
    ConsoleSink, TerminalNotifier, run_command_prompt, spawn_stdin_lines,
};
use crate::presentation::relay_server;

#[derive(Parser, Debug)]
#[command(name = "obd-relay", version, about = "OBD-II telemetry relay and monitor")]
struct Cli {
    /// Configuration file, extension optional
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: String,

    #[command(subcommand)]
    command: Mode,
}

#[derive(Subcommand, Debug)]
enum Mode {
    /// Broadcast every message from one peer to all other peers
    Relay {
        #[arg(long)]
        bind: Option<String>,
    },
    /// Watch live telemetry, raise alerts and send light commands from stdin
    Monitor {
        #[arg(long)]
        url: Option<String>,
    },
    /// Publish synthetic vehicle readings through the relay
    Source {
        #[arg(long)]
        url: Option<String>,
        #[arg(long, value_enum)]
        shape: Option<ShapeArg>,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum ShapeArg {
    Flat,
    Command,
}

impl From<ShapeArg> for FrameShape {
    fn from(shape: ShapeArg) -> Self {
        match shape {
            ShapeArg::Flat => FrameShape::Flat,
            ShapeArg::Command => FrameShape::Command,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    // Load configuration
    let mut config = load_config(&cli.config)?;

    match cli.command {
        Mode::Relay { bind } => {
            if let Some(bind) = bind {
                config.relay.bind = bind;
            }
            run_relay(config).await
        }
        Mode::Monitor { url } => {
            if let Some(url) = url {
                config.monitor.url = url;
            }
            run_monitor(config).await
        }
        Mode::Source { url, shape } => {
            if let Some(url) = url {
                config.source.url = url;
            }
            if let Some(shape) = shape {
                config.source.shape = shape.into();
            }
            run_source(config).await
        }
    }
}

async fn run_relay(config: AppConfig) -> anyhow::Result<()> {
    let addr: SocketAddr = config.relay.bind.parse()?;
    let (relay, _hub) = RelayHub::spawn();

    let listener = tokio::net::TcpListener::bind(addr).await?;
    println!("Starting obd-relay on {}", listener.local_addr()?);

    relay_server::serve(listener, relay, shutdown_signal()).await?;
    tracing::info!("Relay stopped");
    Ok(())
}

async fn run_monitor(config: AppConfig) -> anyhow::Result<()> {
    let connector = Arc::new(WsConnector::new(config.monitor.url.clone()));
    let mut pipeline = TelemetryPipeline::start(
        connector,
        config.monitor.pipeline(),
        Arc::new(ConsoleSink),
        Arc::new(TerminalNotifier),
    );
    println!("Monitoring {}", config.monitor.url);

    let prompt = tokio::spawn(run_command_prompt(pipeline.commands(), spawn_stdin_lines()));

    tokio::select! {
        _ = shutdown_signal() => {}
        _ = pipeline.stopped() => println!("Relay unreachable, giving up"),
    }
    tracing::info!(
        "Shutting down monitor (connection {})",
        pipeline.connection_state()
    );
    prompt.abort();
    pipeline.teardown().await;
    Ok(())
}

async fn run_source(config: AppConfig) -> anyhow::Result<()> {
    let source = config.source;
    let connector = Arc::new(WsConnector::new(source.url.clone()));
    let (mut supervisor, events) = ConnectionSupervisor::start(connector, source.supervisor());
    println!("Publishing {:?} frames to {}", source.shape, source.url);

    let commands = tokio::spawn(obd_source::receive_commands(events));
    let (stop_tx, stop_rx) = watch::channel(false);
    let publisher = tokio::spawn(obd_source::run_source(
        supervisor.link(),
        SyntheticObd,
        source.shape,
        source.interval(),
        stop_rx,
    ));

    tokio::select! {
        _ = shutdown_signal() => {}
        _ = supervisor.stopped() => println!("Relay unreachable, giving up"),
    }
    stop_tx.send(true)?;
    publisher.await?;
    supervisor.teardown().await;
    let received = commands.await?;
    tracing::info!("Source saw {} light commands", received);
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for Ctrl-C: {}", e);
    }
}
