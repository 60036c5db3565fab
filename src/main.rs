//! chatroom-server: a TCP chatroom server with a bounded client pool
//!
//! Every accepted client gets its own handler task:
//! - The first message a client sends is its display name
//! - Each further message is printed to the operator's console
//! - Sending `exit` (or disconnecting) ends the session
//!
//! At most `capacity` clients are connected at once. While the pool is
//! full the server stops accepting until a client leaves.

mod config;
mod connection;
mod console;
mod handler;
mod id;
mod pool;
mod server;

use config::Config;
use server::Server;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging. Stdout is reserved for the chatroom console.
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    info!(
        host = %config.host,
        port = config.port,
        capacity = config.capacity,
        name_size = config.name_size,
        message_size = config.message_size,
        workers = ?config.workers,
        "Starting chatroom server"
    );

    let mut builder = tokio::runtime::Builder::new_multi_thread();
    if let Some(workers) = config.workers {
        builder.worker_threads(workers);
    }
    let runtime = builder.enable_all().build()?;

    runtime.block_on(serve(config))
}

async fn serve(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let (notices, console_rx) = console::channel(console::NOTICE_BACKLOG);
    let server = Server::bind(&config, notices).await?;

    println!("{}", console::BANNER);
    tokio::spawn(async move {
        if let Err(e) = console::print_notices(console_rx, tokio::io::stdout()).await {
            error!(error = %e, "Console output failed");
        }
    });

    server.run().await.map_err(|e| e as Box<dyn std::error::Error>)
}
