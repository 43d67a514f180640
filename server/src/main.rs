use clap::Parser;
use env_logger::Env;
use log::info;
use server::dispatcher::Dispatcher;
use server::network::{Server, ServerConfig};
use server::utils::tick_duration;
use shared::UnitSchemaRegistry;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Command line arguments
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Server IP address to bind to
    #[clap(short = 'H', long, default_value = "127.0.0.1")]
    host: String,
    /// Server port to listen on
    #[clap(short, long, default_value = "2627")]
    port: u16,
    /// Tick rate (updates per second)
    #[clap(short, long, default_value = "30")]
    tick_rate: u32,
    /// Maximum number of connected peers
    #[clap(short, long, default_value = "32")]
    max_clients: usize,
    /// Unit schema table
    #[clap(short, long, default_value = "units.toml")]
    units: PathBuf,
    /// Seconds of silence before a peer's tank is released
    #[clap(long, default_value = "5")]
    client_timeout: u64,
    /// Log a hex dump of every inbound frame at debug level
    #[clap(long)]
    debug_packets: bool,
}

/// Parses command-line arguments, loads the unit schemas and runs the server
/// until it stops or Ctrl+C is received.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    let schemas = Arc::new(UnitSchemaRegistry::load_or_builtin(&args.units)?);

    let mut dispatcher = Dispatcher::new(schemas);
    dispatcher.set_debug_packets(args.debug_packets);

    let config = ServerConfig {
        tick_duration: tick_duration(args.tick_rate),
        max_clients: args.max_clients,
        client_timeout: Duration::from_secs(args.client_timeout),
    };

    let address = format!("{}:{}", args.host, args.port);
    let mut server = Server::new(&address, dispatcher, config).await?;

    tokio::select! {
        result = server.run() => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down gracefully...");
        }
    }

    Ok(())
}
