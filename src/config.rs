use std::net::SocketAddr;
use std::time::Duration;

use crate::orbit::geo::GeoPoint;
use crate::orbit::OrbitalState;

/// Development key of the network. Real deployments pass their own key on the command line.
pub const DEFAULT_SHARED_KEY: &[u8; 16] = b"supersecretkey12";

pub const DEFAULT_DIRECTORY_ADDR: &str = "127.0.0.1:5500";
pub const DEFAULT_GROUND_STATION_ADDR: &str = "127.0.0.1:5600";

pub const GROUND_STATION_NAME: &str = "Ground Station";

/// Settings shared by every listening node
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    /// connections beyond this number wait in the OS backlog until a slot frees up
    pub max_connections: usize,
    /// time that in-flight connections get to finish after shutdown was requested, before
    ///  they are aborted
    pub shutdown_grace_period: Duration,
}

impl ServerConfig {
    pub fn new(bind_addr: SocketAddr) -> ServerConfig {
        ServerConfig {
            bind_addr,
            max_connections: 256,
            shutdown_grace_period: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DirectoryConfig {
    pub server: ServerConfig,
    pub shared_key: Vec<u8>,
}

impl DirectoryConfig {
    pub fn new(bind_addr: SocketAddr) -> DirectoryConfig {
        DirectoryConfig {
            server: ServerConfig::new(bind_addr),
            shared_key: DEFAULT_SHARED_KEY.to_vec(),
        }
    }
}

/// The ground station as routing candidate: it is never registered with the directory, every
///  relay knows its fixed address and position.
#[derive(Debug, Clone, PartialEq)]
pub struct GroundStationInfo {
    pub name: String,
    pub addr: String,
    pub position: GeoPoint,
}

impl GroundStationInfo {
    pub fn new(addr: impl Into<String>, lat: f64, long: f64) -> GroundStationInfo {
        GroundStationInfo {
            name: GROUND_STATION_NAME.to_string(),
            addr: addr.into(),
            position: GeoPoint::on_surface(lat, long),
        }
    }
}

impl Default for GroundStationInfo {
    /// Dublin
    fn default() -> Self {
        GroundStationInfo::new(DEFAULT_GROUND_STATION_ADDR, 53.34, -6.26)
    }
}

#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub name: String,
    pub server: ServerConfig,
    /// address registered with the directory - defaults to the bound address, which is not
    ///  reachable from other hosts if bound to a wildcard address
    pub advertised_addr: Option<String>,
    pub orbit: OrbitalState,
    pub directory_addr: String,
    pub ground_station: GroundStationInfo,
    pub shared_key: Vec<u8>,
    /// upper bound for connecting to the next hop, sending and receiving its acknowledgment
    pub forward_timeout: Duration,
}

impl RelayConfig {
    pub fn new(name: impl Into<String>, bind_addr: SocketAddr, orbit: OrbitalState) -> RelayConfig {
        RelayConfig {
            name: name.into(),
            server: ServerConfig::new(bind_addr),
            advertised_addr: None,
            orbit,
            directory_addr: DEFAULT_DIRECTORY_ADDR.to_string(),
            ground_station: Default::default(),
            shared_key: DEFAULT_SHARED_KEY.to_vec(),
            forward_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GroundStationConfig {
    pub server: ServerConfig,
    pub shared_key: Vec<u8>,
}

impl GroundStationConfig {
    pub fn new(bind_addr: SocketAddr) -> GroundStationConfig {
        GroundStationConfig {
            server: ServerConfig::new(bind_addr),
            shared_key: DEFAULT_SHARED_KEY.to_vec(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TrackerConfig {
    pub device_name: String,
    pub directory_addr: String,
    pub shared_key: Vec<u8>,
    pub sample_interval: Duration,
    /// wait before retrying the queue's head item after a failed attempt
    pub retry_backoff: Duration,
    pub ack_timeout: Duration,
}

impl TrackerConfig {
    pub fn new(device_name: impl Into<String>) -> TrackerConfig {
        TrackerConfig {
            device_name: device_name.into(),
            directory_addr: DEFAULT_DIRECTORY_ADDR.to_string(),
            shared_key: DEFAULT_SHARED_KEY.to_vec(),
            sample_interval: Duration::from_secs(6),
            retry_backoff: Duration::from_secs(5),
            ack_timeout: Duration::from_secs(30),
        }
    }
}

/// The key given on the command line, or the development key.
pub fn shared_key_from_arg(arg: Option<&str>) -> Vec<u8> {
    match arg {
        Some(key) => key.as_bytes().to_vec(),
        None => DEFAULT_SHARED_KEY.to_vec(),
    }
}
