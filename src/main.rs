//! emberkv - A Single-Threaded In-Memory Key-Value Server
//!
//! The main entry point: reads the optional configuration file, sets up
//! logging, restores the snapshot if one exists, then runs the accept
//! loop and the maintenance cron on a current-thread runtime.

use std::path::Path;
use std::sync::Arc;

use emberkv::config::Config;
use emberkv::connection::{handle_connection, ServerStats};
use emberkv::server::{cron, ServerState};
use emberkv::storage::{snapshot, Store};
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::FmtSubscriber;

fn usage() -> ! {
    eprintln!("Usage: emberkv [/path/to/emberkv.conf]");
    std::process::exit(1);
}

/// Parses the command line: at most one positional argument, the
/// configuration file path.
fn load_config() -> Config {
    let args: Vec<String> = std::env::args().collect();
    match args.len() {
        1 => Config::default(),
        2 => {
            if args[1] == "--help" || args[1] == "-h" {
                usage();
            }
            match Config::load(&args[1]) {
                Ok(config) => config,
                Err(err) => {
                    eprintln!("{err}");
                    std::process::exit(1);
                }
            }
        }
        _ => usage(),
    }
}

/// Sets up the global tracing subscriber according to the `loglevel`
/// and `logfile` directives.
fn init_logging(config: &Config) -> anyhow::Result<()> {
    let level = config.log_level.as_tracing_level();
    let builder = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    match &config.log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?;
            builder.with_ansi(false).with_writer(Arc::new(file)).init();
        }
        None => builder.init(),
    }
    Ok(())
}

/// Restores the snapshot file, if present. Corrupt snapshots are fatal:
/// starting empty would eventually overwrite the only good copy.
fn restore_store(config: &Config) -> anyhow::Result<Store> {
    match snapshot::load(Path::new(&config.db_filename), config.db_count) {
        Ok(Some(store)) => {
            info!("DB loaded from disk");
            Ok(store)
        }
        Ok(None) => Ok(Store::new(config.db_count)),
        Err(err) => {
            error!("error loading snapshot {}: {err}", config.db_filename);
            Err(err.into())
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let config = load_config();
    init_logging(&config)?;

    info!("server started, emberkv version {}", emberkv::VERSION);

    let store = restore_store(&config)?;
    let shared = ServerState::new(&config, store).shared();
    let stats = Arc::new(ServerStats::new());

    let listener = TcpListener::bind(config.bind_address()).await.map_err(|err| {
        error!("can't bind {}: {err}", config.bind_address());
        err
    })?;
    info!("the server is now ready to accept connections on {}", config.bind_address());

    tokio::spawn(cron::run(Arc::clone(&shared), Arc::clone(&stats)));

    let shutdown = async {
        if let Err(err) = signal::ctrl_c().await {
            error!("failed to install Ctrl+C handler: {err}");
            std::future::pending::<()>().await;
        }
        warn!("shutdown signal received, saving DB and stopping...");
    };

    tokio::select! {
        _ = accept_loop(listener, shared.clone(), stats) => {}
        _ = shutdown => {
            let mut state = match shared.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            if let Err(err) = state.save() {
                error!("error saving DB on shutdown: {err}");
            }
        }
    }

    info!("server shutdown complete");
    Ok(())
}

/// Accepts connections forever, one task per client.
async fn accept_loop(listener: TcpListener, shared: emberkv::SharedState, stats: Arc<ServerStats>) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                if let Err(err) = stream.set_nodelay(true) {
                    warn!(client = %addr, "can't disable Nagle: {err}");
                }
                let shared = Arc::clone(&shared);
                let stats = Arc::clone(&stats);

                tokio::spawn(async move {
                    handle_connection(stream, addr, shared, stats).await;
                });
            }
            Err(err) => {
                error!("failed to accept connection: {err}");
            }
        }
    }
}
