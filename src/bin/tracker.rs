use clap::Parser;
use clap_derive::Parser;
use orbit_relay::config::{shared_key_from_arg, TrackerConfig, DEFAULT_DIRECTORY_ADDR};
use orbit_relay::tracker::telemetry::{Bird, Marine, TelemetryExtension, TelemetryProducer, Terrestrial, TrackerKind};
use orbit_relay::tracker::Tracker;
use orbit_relay::util::logging::init_logging;
use orbit_relay::util::random::RngRandom;
use orbit_relay::util::shutdown::shutdown_signal;
use std::time::Duration;

/// A wildlife tracker sending simulated telemetry through the relay network
#[derive(Parser)]
struct Args {
    /// bird, marine or terrestrial
    #[clap(long, default_value = "bird")]
    kind: TrackerKind,

    /// defaults to a name derived from the kind
    #[clap(long)]
    name: Option<String>,

    #[clap(long, default_value = DEFAULT_DIRECTORY_ADDR)]
    directory: String,

    #[clap(long, default_value_t = 6)]
    interval_secs: u64,

    #[clap(long, default_value_t = 5)]
    retry_secs: u64,

    /// 16 bytes shared by all nodes of the network
    #[clap(long)]
    shared_key: Option<String>,

    #[clap(short, long, default_value_t = false)]
    verbose: bool,

    #[clap(long, default_value_t = false)]
    very_verbose: bool,
}

async fn run<X: TelemetryExtension>(args: Args, extension: X) -> anyhow::Result<()> {
    let producer = TelemetryProducer::<X, RngRandom>::new(args.name, extension);

    let mut config = TrackerConfig::new(producer.device_name());
    config.directory_addr = args.directory;
    config.sample_interval = Duration::from_secs(args.interval_secs);
    config.retry_backoff = Duration::from_secs(args.retry_secs);
    config.shared_key = shared_key_from_arg(args.shared_key.as_deref());

    Tracker::new(config, producer)?
        .run(shutdown_signal())
        .await;
    Ok(())
}

#[tokio::main]
pub async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(args.verbose, args.very_verbose);

    match args.kind {
        TrackerKind::Bird => run(args, Bird::new::<RngRandom>()).await,
        TrackerKind::Marine => run(args, Marine::new::<RngRandom>()).await,
        TrackerKind::Terrestrial => run(args, Terrestrial).await,
    }
}
