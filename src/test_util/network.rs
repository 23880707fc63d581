use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail};
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tracing::debug;

use crate::config::{DirectoryConfig, GroundStationConfig, GroundStationInfo, RelayConfig, DEFAULT_SHARED_KEY};
use crate::directory::client::{DirectoryClient, TcpDirectoryClient};
use crate::directory::service::DirectoryService;
use crate::directory::Directory;
use crate::messaging::envelope::EnvelopeCodec;
use crate::node::ground_station::{Delivery, GroundStation};
use crate::node::relay::Relay;
use crate::node::server::Server;
use crate::orbit::OrbitalState;

struct RunningNode {
    name: String,
    addr: SocketAddr,
    stop: oneshot::Sender<()>,
    handle: JoinHandle<anyhow::Result<()>>,
}

impl RunningNode {
    async fn stop(self) -> anyhow::Result<()> {
        let _ = self.stop.send(());
        self.handle.await?
    }
}

fn stop_signal() -> (oneshot::Sender<()>, impl std::future::Future<Output=()>) {
    let (send, recv) = oneshot::channel::<()>();
    (send, async move { let _ = recv.await; })
}

/// A directory, a ground station and any number of relays on loopback addresses, all with the
///  default shared key.
pub struct TestNetwork {
    directory: RunningNode,
    ground_station: RunningNode,
    ground_station_info: GroundStationInfo,
    deliveries: broadcast::Receiver<Delivery>,
    relays: Vec<RunningNode>,
}

impl TestNetwork {
    pub async fn start(ground_station_lat: f64, ground_station_long: f64) -> anyhow::Result<TestNetwork> {
        let loopback: SocketAddr = "127.0.0.1:0".parse()?;

        let config = DirectoryConfig::new(loopback);
        let service = DirectoryService::new(Arc::new(Directory::new()), &config.shared_key)?;
        let server = Server::bind(config.server).await?;
        let directory_addr = server.local_addr()?;
        let (stop, shutdown) = stop_signal();
        let directory = RunningNode {
            name: "directory".to_string(),
            addr: directory_addr,
            stop,
            handle: tokio::spawn(server.run(Arc::new(service), shutdown)),
        };

        let ground_station = GroundStation::new(GroundStationConfig::new(loopback)).await?;
        let ground_station_addr = ground_station.local_addr()?;
        let deliveries = ground_station.subscribe();
        let (stop, shutdown) = stop_signal();
        let ground_station_info = GroundStationInfo::new(ground_station_addr.to_string(), ground_station_lat, ground_station_long);
        let ground_station = RunningNode {
            name: ground_station_info.name.clone(),
            addr: ground_station_addr,
            stop,
            handle: tokio::spawn(ground_station.run(shutdown)),
        };

        Ok(TestNetwork {
            directory,
            ground_station,
            ground_station_info,
            deliveries,
            relays: Vec::new(),
        })
    }

    pub fn directory_addr(&self) -> SocketAddr {
        self.directory.addr
    }

    pub fn ground_station_info(&self) -> &GroundStationInfo {
        &self.ground_station_info
    }

    pub fn directory_client(&self) -> anyhow::Result<TcpDirectoryClient> {
        let codec = Arc::new(EnvelopeCodec::new(DEFAULT_SHARED_KEY)?);
        Ok(TcpDirectoryClient::new(self.directory_addr().to_string(), codec))
    }

    /// Starts a relay and waits until the directory lists it.
    pub async fn add_relay(&mut self, name: &str, orbit: OrbitalState) -> anyhow::Result<SocketAddr> {
        let mut config = RelayConfig::new(name, "127.0.0.1:0".parse()?, orbit);
        config.directory_addr = self.directory_addr().to_string();
        config.ground_station = self.ground_station_info.clone();
        config.forward_timeout = Duration::from_secs(10);

        let relay = Relay::new(config).await?;
        let addr = relay.local_addr()?;
        let (stop, shutdown) = stop_signal();
        self.relays.push(RunningNode {
            name: name.to_string(),
            addr,
            stop,
            handle: tokio::spawn(relay.run(shutdown)),
        });

        self.await_listed(name, true).await?;
        debug!("relay {} is up at {}", name, addr);
        Ok(addr)
    }

    /// Shuts a relay down and waits until the directory no longer lists it.
    pub async fn stop_relay(&mut self, name: &str) -> anyhow::Result<()> {
        let idx = self.relays.iter()
            .position(|r| r.name == name)
            .ok_or_else(|| anyhow!("no relay named {}", name))?;
        self.relays.remove(idx).stop().await?;
        self.await_listed(name, false).await
    }

    async fn await_listed(&self, name: &str, listed: bool) -> anyhow::Result<()> {
        let client = self.directory_client()?;
        let deadline = Instant::now() + Duration::from_secs(10);
        loop {
            let records = client.list().await?;
            if records.iter().any(|r| r.device_name == name) == listed {
                return Ok(());
            }
            if Instant::now() > deadline {
                bail!("{} was not {} in time", name, if listed { "registered" } else { "deregistered" });
            }
            sleep(Duration::from_millis(10)).await;
        }
    }

    pub async fn next_delivery(&mut self, max_wait: Duration) -> anyhow::Result<Delivery> {
        Ok(tokio::time::timeout(max_wait, self.deliveries.recv()).await??)
    }

    pub async fn shutdown(self) -> anyhow::Result<()> {
        for relay in self.relays {
            relay.stop().await?;
        }
        self.ground_station.stop().await?;
        self.directory.stop().await
    }
}
