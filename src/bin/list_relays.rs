use clap::Parser;
use clap_derive::Parser;
use orbit_relay::config::{shared_key_from_arg, DEFAULT_DIRECTORY_ADDR};
use orbit_relay::directory::client::{DirectoryClient, TcpDirectoryClient};
use orbit_relay::messaging::envelope::EnvelopeCodec;
use orbit_relay::util::clock::unix_now_secs;
use orbit_relay::util::logging::init_logging;
use std::sync::Arc;

/// Prints the relays currently registered with the directory, with their current positions
#[derive(Parser)]
struct Args {
    #[clap(long, default_value = DEFAULT_DIRECTORY_ADDR)]
    directory: String,

    /// 16 bytes shared by all nodes of the network
    #[clap(long)]
    shared_key: Option<String>,

    /// print the raw JSON records
    #[clap(long, default_value_t = false)]
    json: bool,

    #[clap(short, long, default_value_t = false)]
    verbose: bool,
}

#[tokio::main]
pub async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(args.verbose, false);

    let codec = Arc::new(EnvelopeCodec::new(&shared_key_from_arg(args.shared_key.as_deref()))?);
    let records = TcpDirectoryClient::new(args.directory, codec).list().await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(());
    }

    let now = unix_now_secs();
    println!("{} relay(s) registered", records.len());
    for record in records {
        match &record.orbit {
            Some(orbit) => {
                let (lat, long) = orbit.position(now);
                println!("{:<20} {:<22} lat {:>8.3} long {:>8.3} alt {:>7.1} km", record.device_name, record.addr, lat, long, orbit.altitude_km);
            }
            None => println!("{:<20} {:<22} (no orbit)", record.device_name, record.addr),
        }
    }
    Ok(())
}
