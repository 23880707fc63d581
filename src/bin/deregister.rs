use clap::Parser;
use clap_derive::Parser;
use orbit_relay::config::{shared_key_from_arg, DEFAULT_DIRECTORY_ADDR};
use orbit_relay::directory::client::{DirectoryClient, TcpDirectoryClient};
use orbit_relay::messaging::envelope::EnvelopeCodec;
use orbit_relay::util::logging::init_logging;
use std::sync::Arc;
use tracing::info;

/// Removes a relay that did not shut down cleanly from the directory
#[derive(Parser)]
struct Args {
    #[clap(long)]
    host: String,

    #[clap(long)]
    port: u16,

    #[clap(long, default_value = DEFAULT_DIRECTORY_ADDR)]
    directory: String,

    /// 16 bytes shared by all nodes of the network
    #[clap(long)]
    shared_key: Option<String>,

    #[clap(short, long, default_value_t = false)]
    verbose: bool,
}

#[tokio::main]
pub async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(args.verbose, false);

    let codec = Arc::new(EnvelopeCodec::new(&shared_key_from_arg(args.shared_key.as_deref()))?);
    let client = TcpDirectoryClient::new(args.directory, codec);

    let addr = format!("{}:{}", args.host, args.port);
    let ack = client.deregister(&addr).await?;
    info!("received acknowledgment: {}", ack);
    info!("relay at {} deregistered", addr);
    Ok(())
}
