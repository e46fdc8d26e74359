//! lenframe: a length-prefixed request/response server
//!
//! Every message on the wire is a 4-byte little-endian length followed by
//! that many payload bytes. The server reads one request frame, answers
//! with one response frame, and repeats until the client disconnects.
//!
//! Features:
//! - Payload size limit enforced before any payload byte is read
//! - Sequential, thread-per-connection or tokio serving modes
//! - Greeting and echo request handlers
//! - Demonstration client
//! - Configuration via CLI arguments or TOML file

mod async_server;
mod client;
mod config;
mod framing;
mod handler;
mod server;
mod session;

use clap::Parser;
use config::{Cli, Command, Config};
use server::Server;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Command::Serve(args) => serve(Config::load(args)?),
        Command::Client(args) => {
            init_logging(&args.log_level);
            client::run(&args)?;
            Ok(())
        }
    }
}

fn serve(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    init_logging(&config.log_level);

    info!(
        listen = %config.listen,
        mode = ?config.mode,
        handler = ?config.handler,
        max_payload = config.max_payload,
        read_timeout = ?config.read_timeout,
        "Starting lenframe server"
    );

    let handler = handler::from_config(&config);
    let server = Server::bind(&config, handler).map_err(|e| {
        error!(error = %e, "Failed to start server");
        e
    })?;
    server.run()?;
    Ok(())
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}
