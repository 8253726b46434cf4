use anyhow::{Context, Result};
use clap::Parser;
use log::{info, warn};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use rcdrive_bridge::config::Config;
use rcdrive_bridge::link::{start_link_task, LinkManager, DEFAULT_REQUEST_TIMEOUT};
use rcdrive_bridge::serial::SerialTransport;
use rcdrive_bridge::state::{VehicleState, VehicleStateStore};
use rcdrive_bridge::web_server::{start_server, AppContext};

/// Drive an RC vehicle from a browser over a serial link.
#[derive(Parser, Debug)]
#[command(name = "rcdrive", version, about)]
struct Args {
    /// Path to the JSON config file.
    #[arg(short, long, default_value = "rcdrive.json")]
    config: PathBuf,

    /// Serial port to open on startup instead of the best discovered one.
    #[arg(short, long)]
    port: Option<String>,

    /// Serial baud rate.
    #[arg(short, long)]
    baud: Option<u32>,

    /// Address for the HTTP server, e.g. 127.0.0.1:3000.
    #[arg(short, long)]
    listen: Option<SocketAddr>,

    /// Print the ranked serial ports and exit.
    #[arg(long)]
    list_ports: bool,

    /// Write the effective config back to the config file.
    #[arg(long)]
    save_config: bool,
}

fn init_logging() -> bool {
    let from_env = std::env::var_os("RUST_LOG").is_some();
    env_logger::Builder::new()
        .filter_level(log::LevelFilter::Trace)
        .parse_default_env()
        .init();
    from_env
}

fn main() -> Result<()> {
    let args = Args::parse();
    let log_from_env = init_logging();

    let mut config = Config::load_or_default(&args.config);
    if let Some(port) = args.port {
        config.serial.port = Some(port);
    }
    if let Some(baud) = args.baud {
        config.serial.baud_rate = baud;
    }
    if let Some(listen) = args.listen {
        config.http.bind_address = listen.ip();
        config.http.port = listen.port();
    }
    config.validate();

    if !log_from_env {
        log::set_max_level(config.log_level.as_level_filter());
    }

    if args.save_config {
        config
            .save(&args.config)
            .with_context(|| format!("failed to save {}", args.config.display()))?;
    }

    let state = Arc::new(VehicleStateStore::new(VehicleState::new(
        config.initial_speed(),
    )));
    let transport = SerialTransport::new(config.serial.write_timeout());
    let mut manager = LinkManager::new(transport, config.serial.baud_rate, state.clone());

    let candidates = manager.discover();
    if args.list_ports {
        for candidate in &candidates {
            let marker = if candidate.preferred { "*" } else { " " };
            println!(
                "{marker} {:<24} {}",
                candidate.info.path,
                candidate.info.label()
            );
        }
        return Ok(());
    }

    info!("Found {} serial port(s)", candidates.len());
    for candidate in &candidates {
        info!(
            "  {} - {}{}",
            candidate.info.path,
            candidate.info.label(),
            if candidate.preferred { " (preferred)" } else { "" }
        );
    }

    if config.serial.auto_connect {
        match manager.auto_connect_from(&candidates, config.serial.port.as_deref()) {
            Ok(Some(port)) => info!("Connected to {port}"),
            Ok(None) => {}
            Err(e) => warn!("Startup connect failed: {e}"),
        }
    } else {
        info!("Auto-connect disabled, waiting for /connect");
    }

    let (link, _link_thread) = start_link_task(
        manager,
        config.serial.reconnect_interval(),
        DEFAULT_REQUEST_TIMEOUT,
    )
    .context("failed to start link task")?;

    let ctx = Arc::new(AppContext { state, link });
    let addr = config.http.socket_addr();
    start_server(&ctx, addr).with_context(|| format!("failed to serve on {addr}"))
}
