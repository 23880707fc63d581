use clap::Parser;
use clap_derive::Parser;
use orbit_relay::config::{shared_key_from_arg, DirectoryConfig, DEFAULT_DIRECTORY_ADDR};
use orbit_relay::directory::service::run_directory;
use orbit_relay::util::logging::init_logging;
use orbit_relay::util::shutdown::shutdown_signal;

/// Registration service that relays register with and everybody queries for routing
#[derive(Parser)]
struct Args {
    #[clap(long, default_value = DEFAULT_DIRECTORY_ADDR)]
    bind: String,

    /// 16 bytes shared by all nodes of the network
    #[clap(long)]
    shared_key: Option<String>,

    #[clap(long)]
    max_connections: Option<usize>,

    #[clap(short, long, default_value_t = false)]
    verbose: bool,

    #[clap(long, default_value_t = false)]
    very_verbose: bool,
}

#[tokio::main]
pub async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(args.verbose, args.very_verbose);

    let mut config = DirectoryConfig::new(args.bind.parse()?);
    config.shared_key = shared_key_from_arg(args.shared_key.as_deref());
    if let Some(max_connections) = args.max_connections {
        config.server.max_connections = max_connections;
    }

    run_directory(config, shutdown_signal()).await
}
