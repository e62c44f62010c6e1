//! MIDI WS GW
//!
//! Relays MIDI input events to WebSocket clients and sends MIDI fades over HTTP.

use anyhow::Result;
use clap::Parser;
use colored::*;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use midi_ws_gw::api::{self, ApiState, DEFAULT_PORT};
use midi_ws_gw::config::{duration_from_secs, CorsOrigins, FadeDefaults, ServerConfig};
use midi_ws_gw::listener::{run_pump, spawn_listeners, INBOUND_CHANNEL_CAPACITY};
use midi_ws_gw::ports::{DeviceList, MidiPorts, MidirPorts};
use midi_ws_gw::BroadcastHub;

/// MIDI WS GW - Stream MIDI input to WebSocket clients, send MIDI fades over HTTP
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Address to listen on
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    host: IpAddr,

    /// Port to listen on
    #[arg(short, long, env = "PORT", default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Allowed CORS origins as a JSON array, e.g. '["http://localhost:5173"]'
    #[arg(long, env = "CORS_ORIGINS")]
    cors_origins: Option<String>,

    /// Output device used when a start request names none
    #[arg(long, env = "MIDI_OUTPUT_DEVICE")]
    output_device: Option<String>,

    /// Default fade channels, comma separated (default: 0-15)
    #[arg(long, value_delimiter = ',')]
    fade_channels: Option<Vec<u8>>,

    /// Default number of fade steps
    #[arg(long)]
    fade_steps: Option<u32>,

    /// Default delay between fade steps, in seconds
    #[arg(long)]
    fade_step_delay: Option<f64>,

    /// Default controller number to fade
    #[arg(long)]
    fade_control: Option<u8>,

    /// List available MIDI ports and exit
    #[arg(long)]
    list_ports: bool,
}

impl Args {
    fn server_config(&self) -> Result<ServerConfig> {
        let defaults = FadeDefaults::default();
        let fade = FadeDefaults {
            device: self.output_device.clone(),
            channels: self.fade_channels.clone().unwrap_or(defaults.channels),
            steps: self.fade_steps.unwrap_or(defaults.steps),
            step_delay: match self.fade_step_delay {
                Some(secs) => duration_from_secs(secs)?,
                None => defaults.step_delay,
            },
            control: self.fade_control.unwrap_or(defaults.control),
        };
        fade.validate()?;

        Ok(ServerConfig {
            bind: SocketAddr::new(self.host, self.port),
            cors: CorsOrigins::from_env_value(self.cors_origins.as_deref()),
            fade,
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Parse command line arguments
    let args = Args::parse();

    // Initialize logging
    init_logging(&args.log_level)?;

    let ports: Arc<dyn MidiPorts> = Arc::new(MidirPorts::default());

    if args.list_ports {
        list_ports_formatted(ports.as_ref());
        return Ok(());
    }

    let config = args.server_config()?;
    info!("Starting MIDI WS GW...");

    // Listener threads → pump task → hub
    let hub = Arc::new(BroadcastHub::default());
    let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_CHANNEL_CAPACITY);
    tokio::spawn(run_pump(hub.clone(), inbound_rx));

    let listeners = spawn_listeners(ports.clone(), inbound_tx);
    info!("{} MIDI listener(s) started", listeners.len());

    let state = Arc::new(ApiState {
        ports,
        hub,
        fade_defaults: config.fade.clone(),
    });

    api::start_server(state, &config, shutdown_signal()).await?;

    // Listener threads block on their devices; they end with the process
    info!("MIDI WS GW shutdown complete");
    Ok(())
}

fn init_logging(level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_thread_ids(false)
                .with_thread_names(false),
        )
        .init();

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for Ctrl+C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

/// List all ports in a formatted way
fn list_ports_formatted(ports: &dyn MidiPorts) {
    let devices = DeviceList::enumerate(ports);

    println!("\n{}", "=== Available MIDI Ports ===".bold().cyan());

    for (title, names) in [
        ("Input Ports:", &devices.input),
        ("Output Ports:", &devices.output),
    ] {
        println!("\n{}", title.bold());
        if names.is_empty() {
            println!("  {}", "No ports found".dimmed());
        }
        for (index, name) in names.iter().enumerate() {
            println!("  {} {}", format!("[{}]", index).green(), name);
        }
    }

    println!();
}
