//! CLI entry point (§10.4): parses flags, loads config, installs logging,
//! starts the event loop and drives it until Ctrl-C, then shuts down
//! gracefully.

mod config;

use std::{
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use clap::Parser;
use controller_net_core::{ConnectionId, DriverConfig, EventLoop};
use controller_net_protocol::{ControllerDataFrame, Request, RequestMethod, Response, ResponsePayload, ResultCode};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use config::ServerConfig;

#[derive(Parser, Debug)]
#[command(name = "controller-net-server", about = "Motion-controller telemetry/RPC network core")]
struct Cli {
    /// Overrides the config file's (or default) bind address; applies to
    /// both the TCP acceptor and the UDP pairing/telemetry socket (§6).
    #[arg(long)]
    bind: Option<String>,

    /// Path to a TOML config file. Defaults to the platform config dir.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Fallback log level used when `RUST_LOG` isn't set.
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn install_tracing(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level.to_string()));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Request handler (§1's external collaborator). This binary ships a
/// minimal stand-in so the server is runnable out of the box; real
/// deployments are expected to supply their own handler closure and link
/// against `controller-net-core` directly.
fn handle_request(id: ConnectionId, request: Request) -> Response {
    let payload = match request.method {
        RequestMethod::GetServiceVersion => {
            ResponsePayload::ServiceVersion(env!("CARGO_PKG_VERSION").to_string())
        }
        RequestMethod::GetControllerList => ResponsePayload::ControllerList(Vec::new()),
        RequestMethod::StartControllerDataStream { .. } | RequestMethod::StopControllerDataStream { .. } => {
            ResponsePayload::Ack
        }
        RequestMethod::Custom { name, .. } => {
            warn!(%id, method = %name, "unhandled custom request");
            ResponsePayload::Error(format!("unknown method {name}"))
        }
    };
    Response { request_id: request.request_id, result_code: ResultCode::Ok, payload }
}

fn main() -> std::io::Result<()> {
    let cli = Cli::parse();
    install_tracing(&cli.log_level);

    let server_config = ServerConfig::load(cli.config.as_deref()).unwrap_or_else(|err| {
        warn!(%err, "failed to load config, falling back to defaults");
        ServerConfig::default()
    });

    let bind_addr = match cli.bind.as_deref() {
        Some(addr) => addr.parse().map_err(|_| {
            std::io::Error::new(std::io::ErrorKind::InvalidInput, format!("invalid --bind address {addr}"))
        })?,
        None => server_config.bind_addr().unwrap_or_else(|err| {
            warn!(%err, "invalid bind_addr in config, using default");
            ServerConfig::default().bind_addr().expect("default bind_addr is always valid")
        }),
    };

    let driver_config = DriverConfig {
        tcp_bind_addr: bind_addr,
        udp_bind_addr: bind_addr,
        max_message_size: server_config.max_message_size,
        max_data_frame_size: server_config.max_data_frame_size,
        poll_budget: server_config.poll_budget,
        socket_buf_size: server_config.socket_buf_size,
    };

    let mut event_loop =
        EventLoop::<Request, Response, ControllerDataFrame, _>::startup(driver_config, handle_request)?;

    let shutdown_requested = Arc::new(AtomicBool::new(false));
    {
        let shutdown_requested = Arc::clone(&shutdown_requested);
        ctrlc::set_handler(move || {
            shutdown_requested.store(true, Ordering::SeqCst);
        })
        .expect("failed to install Ctrl-C handler");
    }

    info!(addr = %bind_addr, "controller-net-server running, press Ctrl-C to stop");
    while !shutdown_requested.load(Ordering::SeqCst) {
        event_loop.run_once()?;
        std::thread::sleep(Duration::from_millis(1));
    }

    event_loop.shutdown();
    Ok(())
}
