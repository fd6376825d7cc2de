//! FluxDB Server - TCP line protocol frontend
//!
//! One listener thread accepts connections; each client is served by its
//! own handler thread. Usage: `fluxdb-server [port] [data-dir]`. Setting
//! `FLUXDB_PASSWORD` requires clients to authenticate first.

mod conn;

use anyhow::Context;
use fluxdb_core::manager::DatabaseManager;
use fluxdb_core::pubsub::PubSubManager;
use std::net::TcpListener;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn, Level};

/// Server configuration
#[derive(Debug, Clone)]
struct ServerConfig {
    port: u16,
    data_dir: PathBuf,
    password: String,
}

impl ServerConfig {
    fn from_env_and_args() -> anyhow::Result<Self> {
        let mut args = std::env::args().skip(1);
        let port = match args.next() {
            Some(arg) => arg.parse().context("invalid port argument")?,
            None => 8080,
        };
        let data_dir = args.next().map_or_else(|| PathBuf::from("data"), PathBuf::from);
        let password = std::env::var("FLUXDB_PASSWORD").unwrap_or_default();
        Ok(Self {
            port,
            data_dir,
            password,
        })
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .with_target(false)
        .init();

    let config = ServerConfig::from_env_and_args()?;

    info!("starting FluxDB server v{}", fluxdb_core::VERSION);
    info!("data directory: {:?}", config.data_dir);
    info!(
        "auth: {}",
        if config.password.is_empty() { "disabled" } else { "enabled" }
    );

    let manager = Arc::new(
        DatabaseManager::new(&config.data_dir).context("cannot open data directory")?,
    );
    let pubsub = Arc::new(PubSubManager::new());

    let listener = TcpListener::bind(("0.0.0.0", config.port))
        .with_context(|| format!("cannot bind port {}", config.port))?;
    info!("listening on port {}", config.port);

    let mut next_conn_id: u64 = 0;
    for stream in listener.incoming() {
        let stream = match stream {
            Ok(stream) => stream,
            Err(e) => {
                warn!("accept failed: {}", e);
                continue;
            }
        };

        next_conn_id += 1;
        let conn_id = next_conn_id;
        let manager = manager.clone();
        let pubsub = pubsub.clone();
        let password = config.password.clone();
        std::thread::Builder::new()
            .name(format!("fluxdb-conn-{conn_id}"))
            .spawn(move || {
                conn::handle_client(stream, conn_id, manager, pubsub, &password);
            })
            .context("cannot spawn connection handler")?;
    }

    manager.close_all();
    Ok(())
}
