mod server;

use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;

use roomcast_core::config::Config;
use roomcast_core::logging;
use roomcast_core::models::Namespace;
use roomcast_core::registry::{RoomReaper, StreamRegistry};
use roomcast_core::service::{AdminPicker, AlwaysPresentFileChecker, Dispatcher, NullMetadataFetcher, SocketCoordinator};

use server::{RoomcastServer, Services};

#[derive(Parser, Debug)]
#[command(name = "roomcast")]
#[command(about = "Synchronized watch-party coordination server", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the coordination server.
    Serve {
        /// Path to an optional YAML config file.
        #[arg(long, env = "ROOMCAST_CONFIG")]
        config: Option<String>,

        /// Override the listen address (host:port) from the loaded config.
        #[arg(long, env = "ROOMCAST_BIND")]
        bind: Option<String>,

        /// Override the log format ("json" or "pretty") from the loaded config.
        #[arg(long, env = "ROOMCAST_LOG_FORMAT")]
        log_format: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let Command::Serve { config, bind, log_format } = args.command;

    let mut config = Config::load(config.as_deref())?;
    if let Some(bind) = bind {
        apply_bind_override(&mut config, &bind);
    }
    if let Some(format) = log_format {
        config.logging.format = format;
    }

    logging::init_logging(&config.logging)?;

    info!("roomcast starting...");
    info!(address = %config.server.address(), "server configuration loaded");

    let engine = &config.engine;
    let namespace = Arc::new(Namespace::new(engine.timer_tick(), engine.queue_capacity));
    let streams = Arc::new(StreamRegistry::new(Arc::new(NullMetadataFetcher), Arc::new(AlwaysPresentFileChecker)));
    let dispatcher = Arc::new(Dispatcher::new(Arc::clone(&streams)));
    let coordinator = Arc::new(SocketCoordinator::new(
        Arc::clone(&namespace),
        dispatcher,
        engine.default_room.clone(),
        engine.username_history_len,
        engine.stream_sync_broadcast_secs,
    ));

    let reaper = Arc::new(RoomReaper::new(
        Arc::clone(&namespace),
        Arc::clone(&streams),
        engine.reaper_interval(),
        engine.reap_age(),
    ));
    let admin_picker = Arc::new(AdminPicker::new(
        Arc::clone(&namespace),
        engine.admin_picker_interval(),
        engine.admin_grace(),
    ));

    let services = Services {
        namespace,
        streams,
        coordinator,
    };

    let server = RoomcastServer::new(config, services, reaper, admin_picker);
    server.start().await?;

    info!("roomcast shut down");
    Ok(())
}

/// Split a `host:port` override on its last `:`, since an IPv6 host may
/// itself contain colons.
fn apply_bind_override(config: &mut Config, bind: &str) {
    if let Some((host, port)) = bind.rsplit_once(':') {
        if let Ok(port) = port.parse() {
            config.server.host = host.to_string();
            config.server.port = port;
            return;
        }
    }
    config.server.host = bind.to_string();
}
