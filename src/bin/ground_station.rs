use clap::Parser;
use clap_derive::Parser;
use orbit_relay::config::{shared_key_from_arg, GroundStationConfig, DEFAULT_GROUND_STATION_ADDR};
use orbit_relay::node::ground_station::GroundStation;
use orbit_relay::util::logging::init_logging;
use orbit_relay::util::shutdown::shutdown_signal;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

/// Collects telemetry at the end of every route
#[derive(Parser)]
struct Args {
    #[clap(long, default_value = DEFAULT_GROUND_STATION_ADDR)]
    bind: String,

    /// 16 bytes shared by all nodes of the network
    #[clap(long)]
    shared_key: Option<String>,

    #[clap(short, long, default_value_t = false)]
    verbose: bool,

    #[clap(long, default_value_t = false)]
    very_verbose: bool,
}

#[tokio::main]
pub async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(args.verbose, args.very_verbose);

    let mut config = GroundStationConfig::new(args.bind.parse()?);
    config.shared_key = shared_key_from_arg(args.shared_key.as_deref());

    let ground_station = GroundStation::new(config).await?;

    let mut deliveries = ground_station.subscribe();
    tokio::spawn(async move {
        let mut count = 0u64;
        let mut total_latency = 0.0;
        loop {
            match deliveries.recv().await {
                Ok(delivery) => {
                    count += 1;
                    if let Some(latency) = delivery.latency_seconds {
                        total_latency += latency;
                    }
                    info!("{} message(s) received, average latency {:.6}s", count, total_latency / count as f64);
                }
                Err(RecvError::Lagged(n)) => warn!("statistics skipped {} deliveries", n),
                Err(RecvError::Closed) => break,
            }
        }
    });

    ground_station.run(shutdown_signal()).await
}
