use clap::Parser;
use clap_derive::Parser;
use orbit_relay::config::{shared_key_from_arg, GroundStationInfo, RelayConfig, DEFAULT_DIRECTORY_ADDR, DEFAULT_GROUND_STATION_ADDR};
use orbit_relay::node::relay::Relay;
use orbit_relay::orbit::{Direction, OrbitBuilder};
use orbit_relay::util::clock::unix_now_secs;
use orbit_relay::util::logging::init_logging;
use orbit_relay::util::random::RngRandom;
use orbit_relay::util::shutdown::shutdown_signal;
use std::time::Duration;
use tracing::info;

/// A relay satellite. Orbital parameters that are not given are chosen at random.
#[derive(Parser)]
struct Args {
    #[clap(long)]
    name: String,

    #[clap(long)]
    bind: String,

    /// address registered with the directory, defaults to the bound address
    #[clap(long)]
    advertised_addr: Option<String>,

    #[clap(long, default_value = DEFAULT_DIRECTORY_ADDR)]
    directory: String,

    #[clap(long, default_value = DEFAULT_GROUND_STATION_ADDR)]
    ground_station: String,
    #[clap(long, default_value_t = 53.34, allow_hyphen_values = true)]
    ground_station_lat: f64,
    #[clap(long, default_value_t = -6.26, allow_hyphen_values = true)]
    ground_station_long: f64,

    #[clap(long, allow_hyphen_values = true)]
    init_lat: Option<f64>,
    #[clap(long, allow_hyphen_values = true)]
    init_long: Option<f64>,
    #[clap(long)]
    inclination: Option<f64>,
    /// 1 (prograde) or -1 (retrograde)
    #[clap(long, allow_hyphen_values = true)]
    direction: Option<i64>,
    #[clap(long)]
    period_seconds: Option<f64>,
    #[clap(long)]
    altitude_km: Option<f64>,

    #[clap(long, default_value_t = 30)]
    forward_timeout_secs: u64,

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

    let mut orbit = OrbitBuilder::<RngRandom>::default();
    orbit.init_lat = args.init_lat;
    orbit.init_long = args.init_long;
    orbit.inclination = args.inclination;
    orbit.direction = args.direction.map(Direction::try_from).transpose()
        .map_err(|e| anyhow::anyhow!(e))?;
    orbit.period_seconds = args.period_seconds;
    orbit.altitude_km = args.altitude_km;
    let orbit = orbit.build(unix_now_secs())?;
    info!("{} orbit: {:?}", args.name, orbit);

    let mut config = RelayConfig::new(args.name, args.bind.parse()?, orbit);
    config.advertised_addr = args.advertised_addr;
    config.directory_addr = args.directory;
    config.ground_station = GroundStationInfo::new(args.ground_station, args.ground_station_lat, args.ground_station_long);
    config.forward_timeout = Duration::from_secs(args.forward_timeout_secs);
    config.shared_key = shared_key_from_arg(args.shared_key.as_deref());

    let relay = Relay::new(config).await?;
    relay.run(shutdown_signal()).await
}
