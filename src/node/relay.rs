use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};

use crate::config::RelayConfig;
use crate::directory::client::{DirectoryClient, TcpDirectoryClient};
use crate::directory::DirectoryRecord;
use crate::messaging::ack::Ack;
use crate::messaging::envelope::{Envelope, EnvelopeCodec, Path};
use crate::messaging::frame::request;
use crate::node::server::{MessageHandler, Server};
use crate::orbit::OrbitalState;
use crate::routing::{HopSelection, Router};
use crate::util::clock::unix_now_secs;

/// Validates incoming messages, appends this relay to their path and hands them to the closest
///  unvisited node. The upstream acknowledgment is sent only after the next hop acknowledged.
pub struct RelayHandler {
    name: String,
    orbit: OrbitalState,
    codec: Arc<EnvelopeCodec>,
    router: Router,
    forward_timeout: Duration,
}

impl RelayHandler {
    pub fn new(name: impl Into<String>, orbit: OrbitalState, codec: Arc<EnvelopeCodec>, router: Router, forward_timeout: Duration) -> RelayHandler {
        RelayHandler {
            name: name.into(),
            orbit,
            codec,
            router,
            forward_timeout,
        }
    }

    async fn relay(&self, peer: SocketAddr, frame: &[u8]) -> Ack {
        let envelope = match Envelope::from_bytes(frame) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!("rejecting message from {}: {}", peer, e);
                return Ack::from(&e);
            }
        };
        let payload = match self.codec.open_verified(&envelope) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("rejecting message from {} via {}: {}", peer, envelope.path, e);
                return Ack::from(&e);
            }
        };

        if envelope.path.contains(&self.name) {
            warn!("{} is already on path {} - refusing to forward in a loop", self.name, envelope.path);
            return Ack::error(format!("Loop detected: {} is already on path {}", self.name, envelope.path));
        }

        info!("received message #{} from {}",
            payload.get("message_order").map(|o| o.to_string()).unwrap_or_default(),
            payload.get("device_name").and_then(|n| n.as_str()).unwrap_or("<unknown>"),
        );

        let mut envelope = envelope;
        envelope.path.push(self.name.clone());

        let now = unix_now_secs();
        let hop = match self.router.next_hop(&self.orbit.geo_point(now), &envelope.path, now).await {
            Ok(hop) => hop,
            Err(e) => {
                error!("cannot forward message on path {}: {}", envelope.path, e);
                return Ack::Error(e.to_string());
            }
        };

        let next_hop = hop.candidate.device_name.clone();
        match self.forward(&hop, &envelope).await {
            Ok(Ack::Ok(downstream)) => {
                debug!("{} acknowledged: {}", next_hop, downstream);
                Ack::ok(format!("Data received and forwarded to {} at {}", next_hop, unix_now_secs()))
            }
            Ok(Ack::Error(reason)) => {
                warn!("{} reported an error: {}", next_hop, reason);
                Ack::error(format!("Forwarding to {} failed: {}", next_hop, reason))
            }
            Err(e) => {
                warn!("forwarding to {} failed: {}", next_hop, e);
                Ack::error(format!("Forwarding to {} failed: {}", next_hop, e))
            }
        }
    }

    async fn forward(&self, hop: &HopSelection, envelope: &Envelope) -> anyhow::Result<Ack> {
        debug!("forwarding to {} at {} ({:.2} km), path {}", hop.candidate.device_name, hop.candidate.addr, hop.distance_km, envelope.path);
        let frame = envelope.to_bytes();

        timeout(self.forward_timeout, async {
            let mut stream = TcpStream::connect(&hop.candidate.addr).await?;
            sleep(hop.delay).await;
            let ack = request(&mut stream, &frame).await?;
            Ok::<_, anyhow::Error>(Ack::from_bytes(&ack))
        })
            .await
            .map_err(|_| anyhow!("no acknowledgment within {:?}", self.forward_timeout))?
    }
}

#[async_trait]
impl MessageHandler for RelayHandler {
    async fn on_message(&self, peer: SocketAddr, frame: &[u8]) -> String {
        self.relay(peer, frame).await.to_string()
    }
}


/// A relay's lifecycle: bind, register with the directory, serve until shutdown, deregister.
pub struct Relay {
    config: Arc<RelayConfig>,
    server: Server,
    directory: Arc<dyn DirectoryClient>,
    handler: Arc<RelayHandler>,
}

impl Relay {
    pub async fn new(config: RelayConfig) -> anyhow::Result<Relay> {
        let codec = Arc::new(EnvelopeCodec::new(&config.shared_key)?);
        let directory = Arc::new(TcpDirectoryClient::new(config.directory_addr.clone(), codec.clone()));
        Self::new_with_directory(config, codec, directory).await
    }

    pub async fn new_with_directory(config: RelayConfig, codec: Arc<EnvelopeCodec>, directory: Arc<dyn DirectoryClient>) -> anyhow::Result<Relay> {
        Path::check_node_name(&config.name)?;
        let router = Router::new(directory.clone(), Some(&config.ground_station));
        let handler = Arc::new(RelayHandler::new(config.name.clone(), config.orbit.clone(), codec, router, config.forward_timeout));
        let server = Server::bind(config.server.clone()).await?;

        Ok(Relay {
            config: Arc::new(config),
            server,
            directory,
            handler,
        })
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        self.server.local_addr()
    }

    /// the address other nodes reach this relay at
    pub fn advertised_addr(&self) -> anyhow::Result<String> {
        match &self.config.advertised_addr {
            Some(addr) => Ok(addr.clone()),
            None => Ok(self.local_addr()?.to_string()),
        }
    }

    pub fn directory_record(&self) -> anyhow::Result<DirectoryRecord> {
        Ok(DirectoryRecord {
            device_name: self.config.name.clone(),
            addr: self.advertised_addr()?,
            orbit: Some(self.config.orbit.clone()),
        })
    }

    /// Registration failure is fatal, deregistration failure is only logged.
    pub async fn run(self, shutdown: impl Future<Output=()>) -> anyhow::Result<()> {
        let record = self.directory_record()?;
        let ack = self.directory.register(&record).await
            .map_err(|e| anyhow!("registration of {} with the directory failed: {}", record.device_name, e))?;
        info!("{} registered as {}: {}", record.device_name, record.addr, ack);

        let result = self.server.run(self.handler, shutdown).await;

        match self.directory.deregister(&record.addr).await {
            Ok(ack) => info!("{} deregistered: {}", record.device_name, ack),
            Err(e) => warn!("deregistration of {} failed: {}", record.device_name, e),
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{GroundStationInfo, DEFAULT_SHARED_KEY};
    use crate::directory::client::MockDirectoryClient;
    use crate::messaging::envelope::{Path, Payload};
    use crate::messaging::frame::{read_frame, write_frame};
    use crate::test_util::record::test_orbit;
    use rstest::rstest;
    use serde_json::json;
    use tokio::net::TcpListener;
    use tokio::sync::{mpsc, oneshot};

    fn peer() -> SocketAddr {
        "127.0.0.1:40000".parse().unwrap()
    }

    fn codec() -> Arc<EnvelopeCodec> {
        Arc::new(EnvelopeCodec::new(DEFAULT_SHARED_KEY).unwrap())
    }

    fn sealed(path: &[&str]) -> Envelope {
        let mut payload = Payload::new();
        payload.insert("device_name".to_string(), json!("T"));
        payload.insert("message_order".to_string(), json!(1));
        codec().seal(&payload, path.iter().copied().collect()).unwrap()
    }

    /// Stands in for the next hop: records every frame it receives and answers with `ack`.
    async fn fake_hop(ack: &'static str) -> (String, mpsc::UnboundedReceiver<Envelope>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let (send, recv) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            loop {
                let (mut stream, _) = listener.accept().await.unwrap();
                let send = send.clone();
                tokio::spawn(async move {
                    while let Ok(Some(frame)) = read_frame(&mut stream).await {
                        send.send(Envelope::from_bytes(&frame).unwrap()).unwrap();
                        write_frame(&mut stream, ack.as_bytes()).await.unwrap();
                    }
                });
            }
        });
        (addr, recv)
    }

    fn handler_with_ground_station(name: &str, ground_station_addr: &str) -> RelayHandler {
        let mut directory = MockDirectoryClient::new();
        directory.expect_list()
            .returning(|| Ok(vec![]));

        let ground_station = GroundStationInfo::new(ground_station_addr, 53.34, -6.26);
        let router = Router::new(Arc::new(directory), Some(&ground_station));
        RelayHandler::new(name, test_orbit(10.0, 360.0), codec(), router, Duration::from_secs(5))
    }

    #[tokio::test]
    async fn test_forwards_with_extended_path() {
        let (ground_addr, mut received) = fake_hop("Data received from Satellite at 1.0").await;
        let handler = handler_with_ground_station("SAT-1", &ground_addr);

        let original = sealed(&["T"]);
        let ack = handler.on_message(peer(), &original.to_bytes()).await;
        assert!(ack.starts_with("Data received and forwarded to Ground Station at "), "{}", ack);

        let forwarded = received.recv().await.unwrap();
        assert_eq!(forwarded.path.to_string(), "T-->SAT-1");
        assert_eq!(forwarded.ciphertext, original.ciphertext);
        assert_eq!(forwarded.iv, original.iv);
        assert_eq!(forwarded.tag, original.tag);
    }

    #[tokio::test]
    async fn test_downstream_error_is_reported_upstream() {
        let (ground_addr, _received) = fake_hop("Error: Checksum mismatch detected!").await;
        let handler = handler_with_ground_station("SAT-1", &ground_addr);

        let ack = handler.on_message(peer(), &sealed(&["T"]).to_bytes()).await;
        let ack = Ack::parse(&ack);
        assert!(!ack.is_ok());
        assert!(!ack.is_rejection(), "{}", ack);
        assert!(ack.to_string().contains("Checksum mismatch"), "{}", ack);
    }

    #[tokio::test]
    async fn test_next_hop_unreachable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let dead_addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let handler = handler_with_ground_station("SAT-1", &dead_addr);
        let ack = Ack::parse(&handler.on_message(peer(), &sealed(&["T"]).to_bytes()).await);
        assert!(ack.to_string().starts_with("Error: Forwarding to Ground Station failed"), "{}", ack);
    }

    #[tokio::test]
    async fn test_loop_is_rejected() {
        let handler = handler_with_ground_station("SAT-1", "127.0.0.1:1");
        let ack = handler.on_message(peer(), &sealed(&["T", "SAT-1", "SAT-2"]).to_bytes()).await;
        assert!(ack.starts_with("Error: Loop detected"), "{}", ack);
    }

    #[tokio::test]
    async fn test_no_route() {
        let handler = handler_with_ground_station("SAT-1", "127.0.0.1:1");
        let ack = handler.on_message(peer(), &sealed(&["T", "Ground Station"]).to_bytes()).await;
        assert_eq!(ack, "Error: No route to a ground station");
    }

    #[tokio::test]
    async fn test_invalid_message_is_not_forwarded() {
        let (ground_addr, mut received) = fake_hop("Data received from Satellite at 1.0").await;
        let handler = handler_with_ground_station("SAT-1", &ground_addr);

        let mut envelope = sealed(&["T"]);
        envelope.ciphertext[0] ^= 1;
        let ack = handler.on_message(peer(), &envelope.to_bytes()).await;
        assert_eq!(ack, "Error: Decryption failed");
        assert!(received.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_lifecycle_registers_and_deregisters() {
        let mut config = RelayConfig::new("SAT-7", "127.0.0.1:0".parse().unwrap(), test_orbit(10.0, 360.0));
        config.advertised_addr = Some("sat-7.example:6007".to_string());

        let mut directory = MockDirectoryClient::new();
        directory.expect_register()
            .withf(|r| r.device_name == "SAT-7" && r.addr == "sat-7.example:6007" && r.orbit.is_some())
            .times(1)
            .returning(|_| Ok(Ack::ok("Satellite registered at now")));
        directory.expect_deregister()
            .withf(|addr| addr == "sat-7.example:6007")
            .times(1)
            .returning(|_| Err(anyhow!("directory is gone")));

        let relay = Relay::new_with_directory(config, codec(), Arc::new(directory)).await.unwrap();
        let (stop_send, stop_recv) = oneshot::channel::<()>();
        let running = tokio::spawn(relay.run(async move { let _ = stop_recv.await; }));

        stop_send.send(()).unwrap();
        running.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_registration_failure_is_fatal() {
        let config = RelayConfig::new("SAT-7", "127.0.0.1:0".parse().unwrap(), test_orbit(10.0, 360.0));

        let mut directory = MockDirectoryClient::new();
        directory.expect_register()
            .returning(|_| Err(anyhow!("connection refused")));
        directory.expect_deregister()
            .never();

        let relay = Relay::new_with_directory(config, codec(), Arc::new(directory)).await.unwrap();
        assert!(relay.run(std::future::pending()).await.is_err());
    }

    #[rstest]
    #[case::separator("SAT-->7")]
    #[case::empty("")]
    #[tokio::test]
    async fn test_name_must_fit_on_path(#[case] name: &str) {
        let config = RelayConfig::new(name, "127.0.0.1:0".parse().unwrap(), test_orbit(10.0, 360.0));
        assert!(Relay::new_with_directory(config, codec(), Arc::new(MockDirectoryClient::new())).await.is_err());
    }

    #[tokio::test]
    async fn test_message_without_path() {
        let (ground_addr, mut received) = fake_hop("Data received from Satellite at 1.0").await;
        let handler = handler_with_ground_station("SAT-1", &ground_addr);

        let envelope = codec().seal(&Payload::new(), Path::new()).unwrap();
        let ack = handler.on_message(peer(), &envelope.to_bytes()).await;
        assert!(Ack::parse(&ack).is_ok(), "{}", ack);
        assert_eq!(received.recv().await.unwrap().path.to_string(), "SAT-1");
    }
}
